//! Toggle component: a set of opcodes switched on and off as one unit

use serde_json::Value;
use thiserror::Error;
use tracing::{debug, error, warn};

use crate::keybind::Keybind;
use crate::opcode::OpcodeSet;
use crate::patcher::{CodePatcher, PatchError};
use crate::settings::{self, ToggleRecord};
use crate::ui::{self, Ui};

/// Errors when switching a toggle
#[derive(Debug, Error)]
pub enum ToggleError {
    /// One of the toggle's opcodes couldn't be resolved at init
    #[error("{0} has unresolved opcodes")]
    Unusable(String),
    /// A write failed; everything written before it was rolled back
    #[error("failed to patch {id}: {source}")]
    Write {
        /// Id of the toggle
        id: String,
        /// The write that failed
        #[source]
        source: PatchError,
    },
}

/// Called with the new state after every successful transition
pub type ToggleCallback = Box<dyn FnMut(bool)>;

/// Shown next to toggles that have side effects users should know about
const WARNING_TEXT: &str = "This hack might cause unexpected side effects.";

/// Pairs an id and title with an opcode set that gets enabled and disabled as a whole
pub struct ToggleComponent {
    /// Globally unique key
    id: String,
    /// Label shown on the toggle's button
    title: String,
    /// Tooltip text, empty for none
    description: String,
    /// Whether memory holds the on bytes
    enabled: bool,
    /// Patches switched together
    opcodes: OpcodeSet,
    /// Fired after each successful transition
    callback: Option<ToggleCallback>,
    /// Key code that toggles it
    keybind: Option<u32>,
    /// Shows a side-effect warning in the tooltip
    has_warnings: bool,
    /// Counts towards [`HackRegistry::is_cheating`](crate::registry::HackRegistry::is_cheating)
    is_cheat: bool,
}

impl std::fmt::Debug for ToggleComponent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToggleComponent")
            .field("id", &self.id)
            .field("title", &self.title)
            .field("enabled", &self.enabled)
            .field("opcodes", &self.opcodes.len())
            .field("keybind", &self.keybind)
            .finish_non_exhaustive()
    }
}

impl ToggleComponent {
    /// Disabled toggle over `opcodes`
    pub fn new(id: impl Into<String>, title: impl Into<String>, opcodes: OpcodeSet) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            description: String::new(),
            enabled: false,
            opcodes,
            callback: None,
            keybind: None,
            has_warnings: false,
            is_cheat: false,
        }
    }

    /// Sets the callback fired after each successful transition
    pub fn with_callback(mut self, callback: impl FnMut(bool) + 'static) -> Self {
        self.callback = Some(Box::new(callback));
        self
    }

    /// Sets the tooltip text
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Unique key
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Label shown on the button
    pub fn title(&self) -> &str {
        &self.title
    }

    /// Tooltip text
    pub fn description(&self) -> &str {
        &self.description
    }

    /// Toggles are ordered by title
    pub fn sort_key(&self) -> &str {
        &self.title
    }

    /// Whether the on bytes are applied
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Patches switched by this toggle
    pub fn opcodes(&self) -> &OpcodeSet {
        &self.opcodes
    }

    /// Key code bound to the toggle
    pub fn keybind(&self) -> Option<u32> {
        self.keybind
    }

    /// Binds a key code, or clears the binding
    pub fn set_keybind(&mut self, key: Option<u32>) {
        self.keybind = key;
    }

    /// Marks the toggle as having side effects
    pub fn set_warnings(&mut self, has_warnings: bool) {
        self.has_warnings = has_warnings;
    }

    /// Whether the toggle has side effects
    pub fn has_warnings(&self) -> bool {
        self.has_warnings
    }

    /// Marks the toggle as a cheat
    pub fn set_is_cheat(&mut self, is_cheat: bool) {
        self.is_cheat = is_cheat;
    }

    /// Whether enabling the toggle counts as cheating
    pub fn is_cheat(&self) -> bool {
        self.is_cheat
    }

    /// `false` if any opcode failed to resolve. Unusable toggles are hidden and refuse to switch.
    pub fn is_usable(&self) -> bool {
        self.opcodes.iter().all(|opcode| opcode.is_usable())
    }

    /// Whether `search` appears in the title, ignoring case. An empty search matches everything.
    pub fn matches_search(&self, search: &str) -> bool {
        ui::matches_search(&self.title, search)
    }

    /// Writes the bytes for the current state to every opcode.
    ///
    /// If a write fails, the opcodes already written by this call get their previous bytes back, so memory is
    /// never left holding a mix of both states. `enabled` is never changed here.
    pub fn apply_patch(&self, patcher: &mut dyn CodePatcher) -> Result<(), ToggleError> {
        if !self.is_usable() {
            return Err(ToggleError::Unusable(self.id.clone()));
        }

        for (i, opcode) in self.opcodes.iter().enumerate() {
            if let Err(source) = patcher.write_opcode(opcode, self.enabled) {
                warn!(id = %self.id, error = %source, "patch failed, rolling back");
                for written in self.opcodes[..i].iter().rev() {
                    if let Err(e) = patcher.write_opcode(written, !self.enabled) {
                        // nothing left to fall back to
                        error!(
                            id = %self.id,
                            address = format_args!("{:#x}", written.address().unwrap_or_default()),
                            error = %e,
                            "rollback failed"
                        );
                    }
                }
                return Err(ToggleError::Write {
                    id: self.id.clone(),
                    source,
                });
            }
        }
        Ok(())
    }

    /// Flips the state and patches memory to match. On failure the state is put back.
    pub fn toggle(&mut self, patcher: &mut dyn CodePatcher) -> Result<(), ToggleError> {
        if !self.is_usable() {
            return Err(ToggleError::Unusable(self.id.clone()));
        }

        self.enabled = !self.enabled;
        if let Err(e) = self.apply_patch(patcher) {
            self.enabled = !self.enabled;
            return Err(e);
        }

        debug!(id = %self.id, enabled = self.enabled, "toggled");
        self.fire_callback();
        Ok(())
    }

    /// Physically applies a state restored by [`ToggleComponent::load`].
    ///
    /// Only enabled toggles are written; memory already holds the off bytes otherwise. A toggle that fails to
    /// apply ends up disabled. Unusable toggles are skipped and keep their restored state, so it is saved again.
    pub fn apply_loaded(&mut self, patcher: &mut dyn CodePatcher) -> Result<(), ToggleError> {
        if !self.enabled || !self.is_usable() {
            return Ok(());
        }
        if let Err(e) = self.apply_patch(patcher) {
            self.enabled = false;
            return Err(e);
        }
        self.fire_callback();
        Ok(())
    }

    /// Calls the callback with the current state
    fn fire_callback(&mut self) {
        if let Some(callback) = &mut self.callback {
            callback(self.enabled);
        }
    }

    /// Keybind to register for this toggle, if one is set
    pub fn create_keybind(&self) -> Option<Keybind> {
        self.keybind.map(|key| Keybind::new(&self.id, key))
    }

    /// Restores the enabled flag and keybind. Memory is left alone.
    pub fn load(&mut self, record: Option<&Value>) {
        let record: ToggleRecord = settings::read_record(&self.id, record);
        self.enabled = record.enabled;
        self.keybind = record.keybind;
    }

    /// Record holding the enabled flag and keybind
    pub fn save(&self) -> Value {
        settings::write_record(
            &self.id,
            &ToggleRecord {
                enabled: self.enabled,
                keybind: self.keybind,
            },
        )
    }

    /// Draws the toggle. Clicking it toggles right away.
    pub fn draw(&mut self, ui: &mut dyn Ui, patcher: &mut dyn CodePatcher, search: &str) {
        if !self.is_usable() {
            return;
        }

        let highlighted = self.matches_search(search);
        if ui.toggle_button(&self.title, self.enabled, highlighted) {
            if let Err(e) = self.toggle(patcher) {
                warn!(id = %self.id, error = %e, "unable to toggle");
            }
        }

        match (self.description.is_empty(), self.has_warnings) {
            (true, false) => {}
            (false, false) => ui.tooltip(&self.description),
            (true, true) => ui.tooltip(WARNING_TEXT),
            (false, true) => ui.tooltip(&format!("{}\n\n{WARNING_TEXT}", self.description)),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::rc::Rc;

    use serde_json::json;

    use super::*;
    use crate::opcode::Opcode;
    use crate::patcher::image::MemoryImage;

    const A: usize = 0x401000;
    const B: usize = 0x401010;
    const C: usize = 0x401020;

    fn image() -> MemoryImage {
        let mut image = MemoryImage::new();
        let mut code = vec![0xcc; 0x30];
        code[0x00..0x02].copy_from_slice(&[0x74, 0x05]);
        code[0x10..0x12].copy_from_slice(&[0x0f, 0x84]);
        code[0x20] = 0x75;
        image.map(A, code);
        image
    }

    fn noclip() -> ToggleComponent {
        ToggleComponent::new(
            "noclip",
            "NoClip",
            vec![
                Opcode::resolved("game.exe", A, vec![0x90, 0x90], vec![0x74, 0x05]),
                Opcode::resolved("game.exe", B, vec![0x90, 0xe9], vec![0x0f, 0x84]),
                Opcode::resolved("game.exe", C, vec![0xeb], vec![0x75]),
            ],
        )
    }

    #[test]
    fn test_toggle_on_off() {
        let mut image = image();
        let mut toggle = noclip();

        toggle.toggle(&mut image).unwrap();
        assert!(toggle.is_enabled());
        assert_eq!(image.bytes(A, 2), [0x90, 0x90]);
        assert_eq!(image.bytes(B, 2), [0x90, 0xe9]);
        assert_eq!(image.bytes(C, 1), [0xeb]);

        toggle.toggle(&mut image).unwrap();
        assert!(!toggle.is_enabled());
        assert_eq!(image.bytes(A, 2), [0x74, 0x05]);
        assert_eq!(image.bytes(B, 2), [0x0f, 0x84]);
        assert_eq!(image.bytes(C, 1), [0x75]);
    }

    #[test]
    /// A failing write rolls back everything written before it and keeps the old state
    fn test_rollback() {
        let mut image = image();
        let original = image.clone();
        image.fail_writes_at(C);
        let mut toggle = noclip();

        let err = toggle.toggle(&mut image).unwrap_err();
        assert!(matches!(err, ToggleError::Write { ref id, .. } if id == "noclip"));
        assert!(!toggle.is_enabled());
        assert_eq!(image.bytes(A, 0x30), original.bytes(A, 0x30));
    }

    #[test]
    fn test_rollback_when_disabling() {
        let mut image = image();
        let mut toggle = noclip();
        toggle.toggle(&mut image).unwrap();

        image.fail_writes_at(B);
        assert!(toggle.toggle(&mut image).is_err());
        assert!(toggle.is_enabled());
        assert_eq!(image.bytes(A, 2), [0x90, 0x90]);
        assert_eq!(image.bytes(B, 2), [0x90, 0xe9]);
    }

    #[test]
    fn test_callback_fires_on_success_only() {
        let mut image = image();
        let seen = Rc::new(RefCell::new(Vec::new()));
        let sink = seen.clone();
        let mut toggle = noclip().with_callback(move |enabled| sink.borrow_mut().push(enabled));

        toggle.toggle(&mut image).unwrap();
        toggle.toggle(&mut image).unwrap();
        image.fail_writes_at(A);
        assert!(toggle.toggle(&mut image).is_err());

        assert_eq!(*seen.borrow(), [true, false]);
    }

    #[test]
    fn test_unusable_refuses() {
        let mut image = image();
        let mut toggle = ToggleComponent::new(
            "fmod_patch",
            "Fmod Patch",
            vec![Opcode::unresolved("fmod.dll", vec![0x90], vec![0x74])],
        );

        assert!(!toggle.is_usable());
        assert!(matches!(
            toggle.toggle(&mut image),
            Err(ToggleError::Unusable(_))
        ));
        assert!(!toggle.is_enabled());
        assert_eq!(image.write_count(), 0);
    }

    #[test]
    /// Loading restores the flag without touching memory; applying happens afterwards
    fn test_load_then_apply() {
        let mut image = image();
        let mut toggle = noclip();

        toggle.load(Some(&json!({ "enabled": true, "keybind": 78 })));
        assert!(toggle.is_enabled());
        assert_eq!(toggle.keybind(), Some(78));
        assert_eq!(image.write_count(), 0);

        toggle.apply_loaded(&mut image).unwrap();
        assert_eq!(image.bytes(A, 2), [0x90, 0x90]);
        assert_eq!(toggle.create_keybind(), Some(Keybind::new("noclip", 78)));
    }

    #[test]
    fn test_apply_loaded_failure_disables() {
        let mut image = image();
        image.fail_writes_at(B);
        let mut toggle = noclip();
        toggle.load(Some(&json!({ "enabled": true })));

        assert!(toggle.apply_loaded(&mut image).is_err());
        assert!(!toggle.is_enabled());
        assert_eq!(image.bytes(A, 2), [0x74, 0x05]);
    }

    #[test]
    /// An unresolved toggle keeps the state it was saved with
    fn test_apply_loaded_skips_unusable() {
        let mut image = image();
        let mut toggle = ToggleComponent::new(
            "fmod_patch",
            "Fmod Patch",
            vec![Opcode::unresolved("fmod.dll", vec![0x90], vec![0x74])],
        );
        toggle.load(Some(&json!({ "enabled": true })));

        toggle.apply_loaded(&mut image).unwrap();
        assert!(toggle.is_enabled());
        assert_eq!(image.write_count(), 0);
        assert_eq!(toggle.save(), json!({ "enabled": true }));
    }

    #[test]
    fn test_save_load() {
        let mut image = image();
        let mut toggle = noclip();
        toggle.toggle(&mut image).unwrap();
        toggle.set_keybind(Some(0x4e));

        let record = toggle.save();
        assert_eq!(record, json!({ "enabled": true, "keybind": 0x4e }));

        let mut fresh = noclip();
        fresh.load(Some(&record));
        assert!(fresh.is_enabled());
        assert_eq!(fresh.keybind(), Some(0x4e));
    }

    #[test]
    fn test_search() {
        let toggle = noclip();
        assert!(toggle.matches_search(""));
        assert!(toggle.matches_search("clip"));
        assert!(toggle.matches_search("NOCL"));
        assert!(!toggle.matches_search("speed"));
    }
}
