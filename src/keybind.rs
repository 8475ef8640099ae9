//! # Keybind
//!
//! Key capture lives outside this crate. Components and hacks that want a hotkey hand out a [`Keybind`]; the
//! host's dispatcher remembers it and, when the key is pressed, calls
//! [`HackRegistry::trigger`](crate::registry::HackRegistry::trigger) with the bound id.

/// A key code bound to a component or hack id
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Keybind {
    /// Id of the component or hack to trigger
    pub id: String,
    /// Virtual key code
    pub key: u32,
}

impl Keybind {
    /// Binds `key` to `id`
    pub fn new(id: impl Into<String>, key: u32) -> Self {
        Self { id: id.into(), key }
    }
}

/// Receives keybinds from the registry
pub trait KeybindDispatcher {
    /// Registers a keybind
    fn register(&mut self, keybind: Keybind);
    /// Drops every registered keybind
    fn clear(&mut self);
}

/// Plain table of keybinds
#[derive(Debug, Default, Clone)]
pub struct KeybindTable {
    /// Registered keybinds, at most one per id
    binds: Vec<Keybind>,
}

impl KeybindTable {
    /// Empty table
    pub fn new() -> Self {
        Self::default()
    }

    /// Ids bound to `key`, in registration order
    pub fn triggered(&self, key: u32) -> impl Iterator<Item = &str> {
        self.binds
            .iter()
            .filter(move |bind| bind.key == key)
            .map(|bind| bind.id.as_str())
    }

    /// All registered keybinds
    pub fn binds(&self) -> &[Keybind] {
        &self.binds
    }
}

impl KeybindDispatcher for KeybindTable {
    fn register(&mut self, keybind: Keybind) {
        // one key per id; re-registering moves the binding
        self.binds.retain(|bind| bind.id != keybind.id);
        self.binds.push(keybind);
    }

    fn clear(&mut self) {
        self.binds.clear();
    }
}
