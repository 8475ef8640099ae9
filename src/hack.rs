//! # Hack
//!
//! Hacks are self-contained modifications with their own state and settings. The registry drives them through a
//! fixed lifecycle:
//!
//! 1. [`Hack::init`]: nothing is loaded yet. Build components and declare opcodes here.
//! 2. [`Hack::load`]: persisted values are restored, for every hack and component.
//! 3. [`Hack::late_init`]: the registry is complete, other hacks and components can be looked up.
//! 4. [`Hack::update`] and [`Hack::draw`]: once per frame, on the host's main thread.

use std::any::Any;

use serde_json::Value;

use crate::component::{Component, ToggleComponent};
use crate::keybind::Keybind;
use crate::module::ModuleResolver;
use crate::opcode::OpcodeCatalog;
use crate::patcher::CodePatcher;
use crate::registry::RegistryError;
use crate::ui::Ui;
use crate::window::{self, Window};

/// Upcasting helper so hacks can be looked up by concrete type
pub trait AsAny: Any {
    /// `self` as [`Any`]
    fn as_any(&self) -> &dyn Any;
    /// `self` as mutable [`Any`]
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

impl<T: Any> AsAny for T {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

/// A behavioral modification with its own lifecycle and settings
pub trait Hack: AsAny {
    /// Stable, unique key used for lookups and persistence
    fn id(&self) -> &str;

    /// Called before settings are loaded
    fn init(&mut self, ctx: &mut InitContext<'_>);

    /// Called once every hack is initialized and loaded
    fn late_init(&mut self, _ctx: &mut LateInitContext<'_>) {}

    /// Called every frame
    fn update(&mut self, _ctx: &mut FrameContext<'_>) {}

    /// Draws the hack's settings. `embedded` asks for a condensed form inside another window. Widgets whose label
    /// doesn't match `search` are drawn dimmed.
    fn draw(&mut self, ui: &mut dyn Ui, embedded: bool, search: &str);

    /// Restores persisted values. `record` is `Value::Null` when nothing was saved.
    fn load(&mut self, record: &Value);

    /// Persisted values
    fn save(&self) -> Value;

    /// Keybind to register for this hack, if it supports one and one is set
    fn load_keybind(&self) -> Option<Keybind> {
        None
    }

    /// Called when the hack's keybind is pressed. Returns `false` if the hack has no keybind action.
    fn on_keybind(&mut self) -> bool {
        false
    }

    /// Whether the hack currently changes game behavior
    fn is_cheating(&self) -> bool {
        false
    }
}

/// What a hack gets to see during [`Hack::init`]
pub struct InitContext<'a> {
    /// Modules opcodes are resolved against
    modules: &'a dyn ModuleResolver,
    /// Read access to the patched memory, for capturing off bytes
    memory: &'a dyn CodePatcher,
    /// Windows built so far
    windows: &'a mut Vec<Window>,
    /// Ids of every registered hack, which toggles can't reuse
    hack_ids: &'a [String],
}

impl<'a> InitContext<'a> {
    /// Context over the registry's windows
    pub(crate) fn new(
        modules: &'a dyn ModuleResolver,
        memory: &'a dyn CodePatcher,
        windows: &'a mut Vec<Window>,
        hack_ids: &'a [String],
    ) -> Self {
        Self {
            modules,
            memory,
            windows,
            hack_ids,
        }
    }

    /// Catalog for resolving opcode declarations
    pub fn catalog(&self) -> OpcodeCatalog<'a> {
        OpcodeCatalog::new(self.modules, self.memory)
    }

    /// Loaded modules
    pub fn modules(&self) -> &'a dyn ModuleResolver {
        self.modules
    }

    /// Adds a component to the window titled `window`, creating the window if needed
    pub fn add_component(
        &mut self,
        window: &str,
        component: impl Into<Component>,
    ) -> Result<(), RegistryError> {
        window::add_unique(self.windows, self.hack_ids, window, component.into())
    }
}

/// What a hack gets to see during [`Hack::late_init`]: every other hack and every component
pub struct LateInitContext<'a> {
    /// Hacks registered before the current one
    before: &'a mut [Box<dyn Hack>],
    /// Hacks registered after the current one
    after: &'a mut [Box<dyn Hack>],
    /// Every window and its components
    windows: &'a mut [Window],
}

impl<'a> LateInitContext<'a> {
    /// Context for the hack sitting between `before` and `after`
    pub(crate) fn new(
        before: &'a mut [Box<dyn Hack>],
        after: &'a mut [Box<dyn Hack>],
        windows: &'a mut [Window],
    ) -> Self {
        Self {
            before,
            after,
            windows,
        }
    }

    /// Finds another hack by id, if it is a `T`
    pub fn find_hack<T: Hack>(&self, id: &str) -> Option<&T> {
        self.before
            .iter()
            .chain(self.after.iter())
            .map(|hack| &**hack)
            .find(|hack| hack.id() == id)
            .and_then(|hack| hack.as_any().downcast_ref())
    }

    /// Finds another hack by id, if it is a `T`
    pub fn find_hack_mut<T: Hack>(&mut self, id: &str) -> Option<&mut T> {
        self.before
            .iter_mut()
            .chain(self.after.iter_mut())
            .map(|hack| &mut **hack)
            .find(|hack| hack.id() == id)
            .and_then(|hack| hack.as_any_mut().downcast_mut())
    }

    /// Finds a toggle by id
    pub fn find_component(&self, id: &str) -> Option<&ToggleComponent> {
        window::find_toggle(self.windows, id)
    }

    /// Finds a toggle by id
    pub fn find_component_mut(&mut self, id: &str) -> Option<&mut ToggleComponent> {
        window::find_toggle_mut(self.windows, id)
    }
}

/// What a hack gets to see during [`Hack::update`]
pub struct FrameContext<'a> {
    /// Patcher toggles write through
    patcher: &'a mut dyn CodePatcher,
}

impl<'a> FrameContext<'a> {
    /// Context for one frame
    pub(crate) fn new(patcher: &'a mut dyn CodePatcher) -> Self {
        Self { patcher }
    }

    /// Patcher for writing opcodes
    pub fn patcher(&mut self) -> &mut dyn CodePatcher {
        self.patcher
    }
}
