//! # Window
//!
//! Named, ordered groups of components. Windows are also the top level of the persisted settings.

use serde_json::{Map, Value};
use tracing::warn;

use crate::component::{Component, ToggleComponent};
use crate::hack::Hack;
use crate::patcher::CodePatcher;
use crate::registry::RegistryError;
use crate::ui::Ui;

/// A titled list of components
#[derive(Debug)]
pub struct Window {
    /// Title, also the window's settings key
    title: String,
    /// Entries in display order
    components: Vec<Component>,
}

impl Window {
    /// Empty window
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            components: Vec::new(),
        }
    }

    /// Title, also the settings key
    pub fn title(&self) -> &str {
        &self.title
    }

    /// Appends a component. Id uniqueness is checked by the registry.
    pub fn add_component(&mut self, component: impl Into<Component>) {
        self.components.push(component.into());
    }

    /// Entries in display order
    pub fn components(&self) -> &[Component] {
        &self.components
    }

    /// Entries in display order
    pub fn components_mut(&mut self) -> &mut [Component] {
        &mut self.components
    }

    /// Every toggle in the window
    pub fn toggles(&self) -> impl Iterator<Item = &ToggleComponent> {
        self.components.iter().filter_map(Component::as_toggle)
    }

    /// Orders components by their sort key, keeping equal keys in insertion order
    pub fn sort_components(&mut self) {
        self.components
            .sort_by(|a, b| a.sort_key().to_lowercase().cmp(&b.sort_key().to_lowercase()));
    }

    /// Whether a hack is drawn inside this window
    pub fn embeds(&self, hack_id: &str) -> bool {
        self.components
            .iter()
            .any(|c| matches!(c, Component::EmbeddedHack(e) if e.hack_id() == hack_id))
    }

    /// Draws the window contents
    pub fn draw(
        &mut self,
        ui: &mut dyn Ui,
        patcher: &mut dyn CodePatcher,
        hacks: &mut [Box<dyn Hack>],
        search: &str,
    ) {
        if ui.begin_window(&self.title) {
            for component in &mut self.components {
                match component {
                    Component::Toggle(toggle) => toggle.draw(ui, patcher, search),
                    Component::Text(text) => ui.text(text.text()),
                    Component::EmbeddedHack(embedded) => {
                        if let Some(hack) = hacks.iter_mut().find(|h| h.id() == embedded.hack_id()) {
                            hack.draw(ui, true, search);
                        }
                    }
                }
            }
        }
        ui.end_window();
    }

    /// Records of every component, keyed by id
    pub fn save(&self, hacks: &[Box<dyn Hack>]) -> Value {
        let mut records = Map::new();
        for component in &self.components {
            match component {
                Component::Toggle(toggle) => {
                    records.insert(toggle.id().to_string(), toggle.save());
                }
                Component::Text(_) => {}
                Component::EmbeddedHack(embedded) => {
                    if let Some(hack) = hacks.iter().find(|h| h.id() == embedded.hack_id()) {
                        records.insert(embedded.hack_id().to_string(), hack.save());
                    }
                }
            }
        }
        Value::Object(records)
    }

    /// Restores every component from the window's records. Missing records restore defaults.
    pub fn load(&mut self, section: Option<&Value>, hacks: &mut [Box<dyn Hack>]) {
        let records = match section {
            None | Some(Value::Null) => None,
            Some(Value::Object(records)) => Some(records),
            Some(other) => {
                warn!(window = %self.title, section = %other, "window settings are not an object");
                None
            }
        };
        let record = |id: &str| records.and_then(|records| records.get(id));

        for component in &mut self.components {
            match component {
                Component::Toggle(toggle) => {
                    let id = toggle.id().to_string();
                    toggle.load(record(&id));
                }
                Component::Text(_) => {}
                Component::EmbeddedHack(embedded) => {
                    if let Some(hack) = hacks.iter_mut().find(|h| h.id() == embedded.hack_id()) {
                        hack.load(record(embedded.hack_id()).unwrap_or(&Value::Null));
                    }
                }
            }
        }
    }
}

/// Looks up a toggle by id across windows
pub(crate) fn find_toggle<'a>(windows: &'a [Window], id: &str) -> Option<&'a ToggleComponent> {
    windows
        .iter()
        .flat_map(|w| w.components.iter())
        .filter_map(Component::as_toggle)
        .find(|toggle| toggle.id() == id)
}

/// Looks up a toggle by id across windows
pub(crate) fn find_toggle_mut<'a>(
    windows: &'a mut [Window],
    id: &str,
) -> Option<&'a mut ToggleComponent> {
    windows
        .iter_mut()
        .flat_map(|w| w.components.iter_mut())
        .filter_map(Component::as_toggle_mut)
        .find(|toggle| toggle.id() == id)
}

/// Adds a component to the titled window, creating it if needed. Ids must be unique across all windows, and
/// toggles can't reuse any of `hack_ids`.
pub(crate) fn add_unique(
    windows: &mut Vec<Window>,
    hack_ids: &[String],
    title: &str,
    component: Component,
) -> Result<(), RegistryError> {
    if let Component::Toggle(toggle) = &component {
        if hack_ids.iter().any(|id| id == toggle.id()) {
            return Err(RegistryError::IdConflict(toggle.id().to_string()));
        }
    }
    if let Some(id) = component.id() {
        let taken = windows
            .iter()
            .flat_map(|w| w.components.iter())
            .any(|c| c.id() == Some(id));
        if taken {
            return Err(RegistryError::DuplicateComponent(id.to_string()));
        }
    }

    match windows.iter_mut().find(|w| w.title == title) {
        Some(window) => window.add_component(component),
        None => {
            let mut window = Window::new(title);
            window.add_component(component);
            windows.push(window);
        }
    }
    Ok(())
}
