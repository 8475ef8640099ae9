//! # Registry
//!
//! [`HackRegistry`] is built once at startup and owns every hack, window and component, along with the patcher
//! and module resolver they work against. The host drives it:
//!
//! ```ignore
//! logging::init_from(&config);
//! let mut registry = HackRegistry::new(Box::new(patcher), Box::new(modules), config);
//! registry.load_definitions()?;
//! registry.register_hack(Box::new(Speedhack::new(target, interceptor, None)))?;
//! let settings = registry.load_settings();
//! registry.start(&settings);
//!
//! // every frame, on the main thread
//! registry.update();
//! registry.draw(&mut ui);
//! ```

use serde_json::Value;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::component::{Component, ToggleComponent, ToggleError};
use crate::config::Config;
use crate::definitions::{HackDefinitions, ToggleDefinition};
use crate::hack::{FrameContext, Hack, InitContext, LateInitContext};
use crate::keybind::KeybindDispatcher;
use crate::module::ModuleResolver;
use crate::opcode::OpcodeCatalog;
use crate::patcher::CodePatcher;
use crate::settings::{Settings, SettingsError};
use crate::ui::Ui;
use crate::window::{self, Window};

/// Errors from registering or looking up hacks and components
#[derive(Debug, Error)]
pub enum RegistryError {
    /// Two hacks share an id
    #[error("a hack with id {0} is already registered")]
    DuplicateHack(String),
    /// Two components share an id
    #[error("a component with id {0} is already registered")]
    DuplicateComponent(String),
    /// A hack and a toggle share an id
    #[error("{0} is used by both a hack and a toggle")]
    IdConflict(String),
    /// Nothing is registered under the id
    #[error("no component or hack with id {0}")]
    UnknownId(String),
    /// The toggle refused to switch
    #[error(transparent)]
    Toggle(#[from] ToggleError),
}

/// Owns every hack and window
pub struct HackRegistry {
    /// Registered hacks, in registration order
    hacks: Vec<Box<dyn Hack>>,
    /// Windows, in the order they were first referenced
    windows: Vec<Window>,
    /// Definitions waiting to be built by [`HackRegistry::init`]
    definitions: HackDefinitions,
    /// Writes every patch
    patcher: Box<dyn CodePatcher>,
    /// Resolves the modules opcodes are declared in
    modules: Box<dyn ModuleResolver>,
    /// Paths and behavior settings
    config: Config,
    /// Current search filter
    search: String,
}

impl HackRegistry {
    /// Creates an empty registry
    pub fn new(
        patcher: Box<dyn CodePatcher>,
        modules: Box<dyn ModuleResolver>,
        config: Config,
    ) -> Self {
        Self {
            hacks: Vec::new(),
            windows: Vec::new(),
            definitions: HackDefinitions::default(),
            patcher,
            modules,
            config,
            search: String::new(),
        }
    }

    /// Configuration the registry was created with
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Patcher every toggle writes through
    pub fn patcher(&self) -> &dyn CodePatcher {
        &*self.patcher
    }

    /// Adds a hack. Must happen before [`HackRegistry::init`].
    ///
    /// The id can't be shared with another hack or with any toggle, queued or built.
    pub fn register_hack(&mut self, hack: Box<dyn Hack>) -> Result<(), RegistryError> {
        let id = hack.id();
        if self.hacks.iter().any(|h| h.id() == id) {
            return Err(RegistryError::DuplicateHack(id.to_string()));
        }
        let queued = self
            .definitions
            .windows
            .iter()
            .flat_map(|w| &w.hacks)
            .any(|definition| definition.id == id);
        if queued || window::find_toggle(&self.windows, id).is_some() {
            return Err(RegistryError::IdConflict(id.to_string()));
        }
        debug!(id = hack.id(), "registered hack");
        self.hacks.push(hack);
        Ok(())
    }

    /// Queues toggle definitions to be built during [`HackRegistry::init`]
    pub fn add_definitions(&mut self, definitions: HackDefinitions) {
        self.definitions.windows.extend(definitions.windows);
    }

    /// Reads the configured definitions file. A missing file adds nothing.
    pub fn load_definitions(&mut self) -> Result<(), SettingsError> {
        match HackDefinitions::load(&self.config.definitions_file) {
            Ok(definitions) => {
                self.add_definitions(definitions);
                Ok(())
            }
            Err(e) if e.is_not_found() => {
                warn!(path = %self.config.definitions_file.display(), "no hack definitions found");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    /// Reads the configured settings file. Unreadable settings are logged and replaced with empty ones.
    pub fn load_settings(&self) -> Settings {
        Settings::load(&self.config.settings_file).unwrap_or_else(|e| {
            error!(path = %self.config.settings_file.display(), error = %e, "unable to read settings");
            Settings::new()
        })
    }

    /// Writes the current state to the configured settings file
    pub fn save_settings(&self) -> Result<(), SettingsError> {
        self.save().save(&self.config.settings_file)
    }

    /// Runs the startup lifecycle: init, load, late init, then applies every restored toggle
    pub fn start(&mut self, settings: &Settings) {
        self.init();
        self.load(settings);
        self.late_init();
        self.apply_loaded();
        info!(
            hacks = self.hacks.len(),
            windows = self.windows.len(),
            toggles = self.toggles().count(),
            "hacks ready"
        );
    }

    /// Builds toggles from the queued definitions, then initializes every hack.
    ///
    /// Toggles reusing a hack's id are skipped. A hack that isn't embedded anywhere is saved under its own id, so
    /// one whose id is also a window title is dropped.
    pub fn init(&mut self) {
        let hack_ids: Vec<String> = self.hacks.iter().map(|h| h.id().to_string()).collect();

        let definitions = std::mem::take(&mut self.definitions);
        for definition in definitions.windows {
            if !self.windows.iter().any(|w| w.title() == definition.title) {
                self.windows.push(Window::new(&definition.title));
            }
            for hack in &definition.hacks {
                let toggle = self.build_toggle(hack);
                let added =
                    window::add_unique(&mut self.windows, &hack_ids, &definition.title, toggle.into());
                if let Err(e) = added {
                    error!(window = %definition.title, error = %e, "skipping toggle");
                }
            }
        }

        for hack in &mut self.hacks {
            let mut ctx =
                InitContext::new(&*self.modules, &*self.patcher, &mut self.windows, &hack_ids);
            hack.init(&mut ctx);
        }

        let windows = &self.windows;
        self.hacks.retain(|hack| {
            let id = hack.id();
            let shadows_window = windows.iter().any(|w| w.title() == id)
                && !windows.iter().any(|w| w.embeds(id));
            if shadows_window {
                error!(id, "standalone hack shares its id with a window title, dropping it");
            }
            !shadows_window
        });

        if self.config.sort_components {
            for window in &mut self.windows {
                window.sort_components();
            }
        }
    }

    /// A toggle with unresolvable opcodes is still built, but stays unusable
    fn build_toggle(&self, definition: &ToggleDefinition) -> ToggleComponent {
        let catalog = OpcodeCatalog::new(&*self.modules, &*self.patcher);
        let opcodes = catalog
            .resolve_set(&definition.opcodes)
            .unwrap_or_else(|(unresolved, e)| {
                warn!(id = %definition.id, error = %e, "toggle disabled");
                unresolved
            });

        let mut toggle = ToggleComponent::new(&definition.id, &definition.title, opcodes)
            .with_description(&definition.description);
        toggle.set_warnings(definition.warnings);
        toggle.set_is_cheat(definition.cheat);
        toggle
    }

    /// Restores persisted values into every component and hack. Memory is left alone.
    pub fn load(&mut self, settings: &Settings) {
        for window in &mut self.windows {
            window.load(settings.section(window.title()), &mut self.hacks);
        }

        let windows = &self.windows;
        for hack in &mut self.hacks {
            if !windows.iter().any(|w| w.embeds(hack.id())) {
                hack.load(settings.section(hack.id()).unwrap_or(&Value::Null));
            }
        }
    }

    /// Gives every hack access to all the others
    pub fn late_init(&mut self) {
        for i in 0..self.hacks.len() {
            let (before, rest) = self.hacks.split_at_mut(i);
            let Some((hack, after)) = rest.split_first_mut() else {
                break;
            };
            let mut ctx = LateInitContext::new(before, after, &mut self.windows);
            hack.late_init(&mut ctx);
        }
    }

    /// Patches memory for every toggle that was restored as enabled
    pub fn apply_loaded(&mut self) {
        let patcher = &mut *self.patcher;
        for toggle in self
            .windows
            .iter_mut()
            .flat_map(|w| w.components_mut().iter_mut())
            .filter_map(Component::as_toggle_mut)
        {
            if let Err(e) = toggle.apply_loaded(patcher) {
                warn!(id = toggle.id(), error = %e, "unable to restore toggle");
            }
        }
    }

    /// Per-frame hack updates
    pub fn update(&mut self) {
        let mut ctx = FrameContext::new(&mut *self.patcher);
        for hack in &mut self.hacks {
            hack.update(&mut ctx);
        }
    }

    /// Draws every window, then every hack that isn't embedded in one
    pub fn draw(&mut self, ui: &mut dyn Ui) {
        for window in &mut self.windows {
            window.draw(ui, &mut *self.patcher, &mut self.hacks, &self.search);
        }

        let windows = &self.windows;
        for hack in &mut self.hacks {
            if !windows.iter().any(|w| w.embeds(hack.id())) {
                hack.draw(ui, false, &self.search);
            }
        }
    }

    /// Snapshot of every persisted value
    pub fn save(&self) -> Settings {
        let mut settings = Settings::new();
        for window in &self.windows {
            settings.set_section(window.title(), window.save(&self.hacks));
        }
        for hack in &self.hacks {
            if !self.windows.iter().any(|w| w.embeds(hack.id())) {
                settings.set_section(hack.id(), hack.save());
            }
        }
        settings
    }

    /// Every window, in the order they were first referenced
    pub fn windows(&self) -> &[Window] {
        &self.windows
    }

    /// Every toggle in every window
    pub fn toggles(&self) -> impl Iterator<Item = &ToggleComponent> {
        self.windows.iter().flat_map(Window::toggles)
    }

    /// Finds a hack by id, if it is a `T`
    pub fn find_hack<T: Hack>(&self, id: &str) -> Option<&T> {
        self.hacks
            .iter()
            .find(|hack| hack.id() == id)
            .and_then(|hack| (**hack).as_any().downcast_ref())
    }

    /// Finds a hack by id, if it is a `T`
    pub fn find_hack_mut<T: Hack>(&mut self, id: &str) -> Option<&mut T> {
        self.hacks
            .iter_mut()
            .find(|hack| hack.id() == id)
            .and_then(|hack| (**hack).as_any_mut().downcast_mut())
    }

    /// Finds a toggle by id
    pub fn find_component(&self, id: &str) -> Option<&ToggleComponent> {
        window::find_toggle(&self.windows, id)
    }

    /// Finds a toggle by id
    pub fn find_component_mut(&mut self, id: &str) -> Option<&mut ToggleComponent> {
        window::find_toggle_mut(&mut self.windows, id)
    }

    /// Toggles a component by id
    pub fn toggle(&mut self, id: &str) -> Result<(), RegistryError> {
        let toggle = window::find_toggle_mut(&mut self.windows, id)
            .ok_or_else(|| RegistryError::UnknownId(id.to_string()))?;
        toggle.toggle(&mut *self.patcher)?;
        Ok(())
    }

    /// Runs the keybind action for `id`. Returns `false` if nothing handled it.
    pub fn trigger(&mut self, id: &str) -> bool {
        match self.toggle(id) {
            Ok(()) => return true,
            Err(RegistryError::UnknownId(_)) => {}
            Err(e) => {
                warn!(id, error = %e, "keybind failed");
                return true;
            }
        }

        self.hacks
            .iter_mut()
            .find(|hack| hack.id() == id)
            .is_some_and(|hack| hack.on_keybind())
    }

    /// Replaces the dispatcher's keybinds with every bound toggle and hack
    pub fn register_keybinds(&self, dispatcher: &mut dyn KeybindDispatcher) {
        dispatcher.clear();
        let toggles = self.toggles().filter_map(ToggleComponent::create_keybind);
        let hacks = self.hacks.iter().filter_map(|hack| hack.load_keybind());
        for keybind in toggles.chain(hacks) {
            debug!(id = %keybind.id, key = keybind.key, "registering keybind");
            dispatcher.register(keybind);
        }
    }

    /// Whether anything currently active changes game behavior
    pub fn is_cheating(&self) -> bool {
        self.toggles()
            .any(|t| t.is_enabled() && t.is_usable() && t.is_cheat())
            || self.hacks.iter().any(|hack| hack.is_cheating())
    }

    /// Current search filter
    pub fn search(&self) -> &str {
        &self.search
    }

    /// Highlights toggles whose title contains `search`
    pub fn set_search(&mut self, search: impl Into<String>) {
        self.search = search.into();
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::rc::Rc;

    use serde_json::json;

    use super::*;
    use crate::component::EmbeddedHackComponent;
    use crate::keybind::{Keybind, KeybindTable};
    use crate::module::{Module, ModuleTable};
    use crate::patcher::image::MemoryImage;

    const BASE: usize = 0x400000;
    const NOCLIP: usize = BASE + 0x10;

    type Log = Rc<RefCell<Vec<String>>>;

    /// Hack that counts keybind presses and records what it saw
    struct Counter {
        id: String,
        embed_in: Option<&'static str>,
        log: Log,
        presses: u64,
        saw_noclip: bool,
    }

    impl Counter {
        fn boxed(id: &str, embed_in: Option<&'static str>, log: &Log) -> Box<dyn Hack> {
            Box::new(Self {
                id: id.to_string(),
                embed_in,
                log: log.clone(),
                presses: 0,
                saw_noclip: false,
            })
        }

        fn record(&self, event: &str) {
            self.log.borrow_mut().push(format!("{}:{event}", self.id));
        }
    }

    impl Hack for Counter {
        fn id(&self) -> &str {
            &self.id
        }

        fn init(&mut self, ctx: &mut InitContext<'_>) {
            self.record("init");
            if let Some(window) = self.embed_in {
                ctx.add_component(window, EmbeddedHackComponent::new(&self.id))
                    .unwrap();
            }
        }

        fn late_init(&mut self, ctx: &mut LateInitContext<'_>) {
            self.record("late_init");
            self.saw_noclip = ctx.find_component("noclip").is_some();
        }

        fn draw(&mut self, _ui: &mut dyn Ui, _embedded: bool, _search: &str) {}

        fn load(&mut self, record: &Value) {
            self.record("load");
            self.presses = record.get("presses").and_then(Value::as_u64).unwrap_or(0);
        }

        fn save(&self) -> Value {
            json!({ "presses": self.presses })
        }

        fn load_keybind(&self) -> Option<Keybind> {
            Some(Keybind::new(&self.id, 0x70))
        }

        fn on_keybind(&mut self) -> bool {
            self.presses += 1;
            true
        }
    }

    fn definitions() -> HackDefinitions {
        HackDefinitions::from_json(
            r#"[
                {
                    "title": "Player",
                    "hacks": [
                        {
                            "id": "noclip",
                            "title": "NoClip",
                            "cheat": true,
                            "opcodes": [{ "library": "game.exe", "address": 16, "on": "90 90", "off": "74 05" }]
                        },
                        {
                            "id": "fmod_pitch",
                            "title": "Audio Pitch",
                            "opcodes": [{ "library": "fmod.dll", "address": 4096, "on": "90", "off": "75" }]
                        }
                    ]
                }
            ]"#,
        )
        .unwrap()
    }

    fn image() -> MemoryImage {
        let mut image = MemoryImage::new();
        let mut code = vec![0xcc; 0x100];
        code[0x10..0x12].copy_from_slice(&[0x74, 0x05]);
        image.map(BASE, code);
        image
    }

    fn registry(image: MemoryImage, log: &Log) -> HackRegistry {
        let modules = ModuleTable::new().with(Module::new("game.exe", BASE, 0x100));
        let mut registry = HackRegistry::new(Box::new(image), Box::new(modules), Config::default());
        registry.add_definitions(definitions());
        registry
            .register_hack(Counter::boxed("counter", Some("Global"), log))
            .unwrap();
        registry
            .register_hack(Counter::boxed("standalone", None, log))
            .unwrap();
        registry
    }

    #[test]
    fn test_lifecycle_order() {
        let log = Log::default();
        let mut registry = registry(image(), &log);
        registry.start(&Settings::new());

        assert_eq!(
            *log.borrow(),
            [
                "counter:init",
                "standalone:init",
                "counter:load",
                "standalone:load",
                "counter:late_init",
                "standalone:late_init",
            ]
        );
        assert!(registry.find_hack::<Counter>("counter").unwrap().saw_noclip);
        assert!(registry.find_hack::<Counter>("missing").is_none());
    }

    #[test]
    /// A toggle whose module isn't loaded is kept but can't be switched
    fn test_unresolved_toggle_is_unusable() {
        let log = Log::default();
        let mut registry = registry(image(), &log);
        registry.start(&Settings::new());

        assert!(registry.find_component("noclip").unwrap().is_usable());
        assert!(!registry.find_component("fmod_pitch").unwrap().is_usable());
        assert!(matches!(
            registry.toggle("fmod_pitch"),
            Err(RegistryError::Toggle(ToggleError::Unusable(_)))
        ));
        assert!(matches!(
            registry.toggle("nothing"),
            Err(RegistryError::UnknownId(_))
        ));
    }

    #[test]
    fn test_save_load_round_trip() {
        let log = Log::default();
        let mut registry = registry(image(), &log);
        registry.start(&Settings::new());

        registry.toggle("noclip").unwrap();
        registry
            .find_component_mut("noclip")
            .unwrap()
            .set_keybind(Some(78));
        assert!(registry.trigger("counter"));
        assert!(registry.trigger("standalone"));
        assert!(registry.trigger("standalone"));

        let settings = registry.save();
        assert_eq!(
            settings.section("Player").unwrap()["noclip"],
            json!({ "enabled": true, "keybind": 78 })
        );
        assert_eq!(settings.section("Global").unwrap()["counter"], json!({ "presses": 1 }));
        assert_eq!(settings.section("standalone").unwrap(), &json!({ "presses": 2 }));

        let mut fresh = HackRegistry::new(
            Box::new(image()),
            Box::new(ModuleTable::new().with(Module::new("game.exe", BASE, 0x100))),
            Config::default(),
        );
        fresh.add_definitions(definitions());
        fresh
            .register_hack(Counter::boxed("counter", Some("Global"), &log))
            .unwrap();
        fresh
            .register_hack(Counter::boxed("standalone", None, &log))
            .unwrap();
        fresh.start(&settings);

        let noclip = fresh.find_component("noclip").unwrap();
        assert!(noclip.is_enabled());
        assert_eq!(noclip.keybind(), Some(78));
        assert_eq!(fresh.patcher().read(NOCLIP, 2).unwrap(), [0x90, 0x90]);
        assert_eq!(fresh.find_hack::<Counter>("counter").unwrap().presses, 1);
        assert_eq!(fresh.find_hack::<Counter>("standalone").unwrap().presses, 2);
        assert_eq!(fresh.save(), settings);
    }

    #[test]
    /// A restored toggle that can't be applied comes up disabled
    fn test_apply_loaded_failure() {
        let log = Log::default();
        let mut image = image();
        image.fail_writes_at(NOCLIP);
        let mut registry = registry(image, &log);

        let settings =
            Settings::from_value(json!({ "Player": { "noclip": { "enabled": true } } })).unwrap();
        registry.start(&settings);

        assert!(!registry.find_component("noclip").unwrap().is_enabled());
        assert_eq!(registry.patcher().read(NOCLIP, 2).unwrap(), [0x74, 0x05]);
    }

    #[test]
    fn test_duplicate_ids() {
        let log = Log::default();
        let mut registry = registry(image(), &log);
        assert!(matches!(
            registry.register_hack(Counter::boxed("counter", None, &log)),
            Err(RegistryError::DuplicateHack(id)) if id == "counter"
        ));

        let mut duplicate = definitions();
        duplicate.windows[0].title = "Bypass".to_string();
        duplicate.windows[0].hacks.truncate(1);
        registry.add_definitions(duplicate);
        registry.start(&Settings::new());

        assert_eq!(
            registry.toggles().filter(|t| t.id() == "noclip").count(),
            1
        );
        assert!(registry.windows().iter().any(|w| w.title() == "Bypass"));
    }

    #[test]
    /// A hack can't take a toggle's id, whichever of the two is declared first
    fn test_hack_and_toggle_ids_conflict() {
        let log = Log::default();
        let mut registry = registry(image(), &log);
        assert!(matches!(
            registry.register_hack(Counter::boxed("noclip", None, &log)),
            Err(RegistryError::IdConflict(id)) if id == "noclip"
        ));

        let modules = ModuleTable::new().with(Module::new("game.exe", BASE, 0x100));
        let mut registry = HackRegistry::new(Box::new(image()), Box::new(modules), Config::default());
        registry
            .register_hack(Counter::boxed("noclip", None, &log))
            .unwrap();
        registry.add_definitions(definitions());
        registry.start(&Settings::new());

        assert!(registry.find_component("noclip").is_none());
        assert!(registry.find_component("fmod_pitch").is_some());
        assert!(registry.trigger("noclip"));
        assert_eq!(registry.find_hack::<Counter>("noclip").unwrap().presses, 1);
        assert_eq!(registry.patcher().read(NOCLIP, 2).unwrap(), [0x74, 0x05]);
    }

    #[test]
    /// Standalone hacks named like a window would overwrite its settings, so they're dropped
    fn test_standalone_hack_named_like_window() {
        let log = Log::default();
        let mut registry = registry(image(), &log);
        registry
            .register_hack(Counter::boxed("Player", None, &log))
            .unwrap();
        registry
            .register_hack(Counter::boxed("Global", None, &log))
            .unwrap();
        registry.start(&Settings::new());
        registry.toggle("noclip").unwrap();

        assert!(registry.find_hack::<Counter>("Player").is_none());
        assert!(registry.find_hack::<Counter>("Global").is_none());
        assert!(registry.find_hack::<Counter>("standalone").is_some());

        let settings = registry.save();
        assert_eq!(
            settings.section("Player").unwrap()["noclip"],
            json!({ "enabled": true })
        );
        assert_eq!(settings.section("Global").unwrap()["counter"], json!({ "presses": 0 }));
    }

    #[test]
    fn test_keybinds() {
        let log = Log::default();
        let mut registry = registry(image(), &log);
        let settings = Settings::from_value(json!({
            "Player": { "noclip": { "keybind": 78 } }
        }))
        .unwrap();
        registry.start(&settings);

        let mut table = KeybindTable::new();
        registry.register_keybinds(&mut table);
        assert_eq!(table.triggered(78).collect::<Vec<_>>(), ["noclip"]);
        assert_eq!(
            table.triggered(0x70).collect::<Vec<_>>(),
            ["counter", "standalone"]
        );

        assert!(registry.trigger("noclip"));
        assert_eq!(registry.patcher().read(NOCLIP, 2).unwrap(), [0x90, 0x90]);
        assert!(registry.trigger("noclip"));
        assert_eq!(registry.patcher().read(NOCLIP, 2).unwrap(), [0x74, 0x05]);
        assert!(!registry.trigger("nothing"));
    }

    #[test]
    fn test_is_cheating() {
        let log = Log::default();
        let mut registry = registry(image(), &log);
        registry.start(&Settings::new());

        assert!(!registry.is_cheating());
        registry.toggle("noclip").unwrap();
        assert!(registry.is_cheating());
        registry.toggle("noclip").unwrap();
        assert!(!registry.is_cheating());
    }
}
