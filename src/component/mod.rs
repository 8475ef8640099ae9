//! # Component
//!
//! Components are the entries of a [`Window`](crate::window::Window). The set of kinds is closed, so they're an
//! enum rather than trait objects.

pub mod toggle;

pub use toggle::{ToggleCallback, ToggleComponent, ToggleError};

/// A component that only displays text
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextComponent {
    /// Displayed text
    text: String,
}

impl TextComponent {
    /// Text component showing `text`
    pub fn new(text: impl Into<String>) -> Self {
        Self { text: text.into() }
    }

    /// Displayed text
    pub fn text(&self) -> &str {
        &self.text
    }
}

/// Renders a hack's condensed UI inside a window.
///
/// The hack itself persists its settings, into this component's record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmbeddedHackComponent {
    /// Id of the embedded hack
    hack_id: String,
}

impl EmbeddedHackComponent {
    /// Embeds the hack registered under `hack_id`
    pub fn new(hack_id: impl Into<String>) -> Self {
        Self {
            hack_id: hack_id.into(),
        }
    }

    /// Id of the embedded hack, which is also the component's id
    pub fn hack_id(&self) -> &str {
        &self.hack_id
    }
}

/// Entry of a window
#[derive(Debug)]
pub enum Component {
    /// Opcode set switched as a unit
    Toggle(ToggleComponent),
    /// Plain text
    Text(TextComponent),
    /// Condensed UI of a hack
    EmbeddedHack(EmbeddedHackComponent),
}

impl Component {
    /// Id used for lookups and persistence. Text has none.
    pub fn id(&self) -> Option<&str> {
        match self {
            Component::Toggle(toggle) => Some(toggle.id()),
            Component::Text(_) => None,
            Component::EmbeddedHack(embedded) => Some(embedded.hack_id()),
        }
    }

    /// Components are ordered by this within a window. Text has an empty key, so it leads the window.
    pub fn sort_key(&self) -> &str {
        match self {
            Component::Toggle(toggle) => toggle.sort_key(),
            Component::Text(_) => "",
            Component::EmbeddedHack(embedded) => embedded.hack_id(),
        }
    }

    /// The toggle, if this is one
    pub fn as_toggle(&self) -> Option<&ToggleComponent> {
        match self {
            Component::Toggle(toggle) => Some(toggle),
            _ => None,
        }
    }

    /// The toggle, if this is one
    pub fn as_toggle_mut(&mut self) -> Option<&mut ToggleComponent> {
        match self {
            Component::Toggle(toggle) => Some(toggle),
            _ => None,
        }
    }
}

impl From<ToggleComponent> for Component {
    fn from(toggle: ToggleComponent) -> Self {
        Component::Toggle(toggle)
    }
}

impl From<TextComponent> for Component {
    fn from(text: TextComponent) -> Self {
        Component::Text(text)
    }
}

impl From<EmbeddedHackComponent> for Component {
    fn from(embedded: EmbeddedHackComponent) -> Self {
        Component::EmbeddedHack(embedded)
    }
}
