//! # libhack
//!
//! In-process patching framework: named hacks made of toggleable byte patches and hooks, grouped into windows,
//! drawn through the host's immediate-mode UI and persisted to a JSON settings file.
//!
//! The layers, from the bottom up:
//! - [`patcher`]: writes bytes into (possibly read-only) code, or into a fake [`patcher::image::MemoryImage`]
//! - [`opcode`]: resolves module-relative patch declarations into absolute [`opcode::Opcode`]s
//! - [`component`]: [`component::ToggleComponent`] switches an opcode set as one all-or-nothing unit
//! - [`hack`], [`window`], [`registry`]: the lifecycle that owns, loads, saves and draws everything
//! - [`hook`]: inline hooks with relocated trampolines, used by [`hacks::Speedhack`]
//!
//! Toggle patches are only written on explicit transitions (a click, a keybind, or the pass applying restored
//! settings at startup); nothing re-asserts them every frame.

#![warn(clippy::missing_docs_in_private_items)]
#![warn(rustdoc::missing_crate_level_docs)]

pub mod alloc;
pub mod code;
pub mod component;
pub mod config;
pub mod definitions;
pub mod hack;
pub mod hacks;
pub mod hook;
pub mod keybind;
pub mod logging;
pub mod module;
pub mod opcode;
pub mod patcher;
pub mod registry;
pub mod settings;
pub mod ui;
pub mod window;

pub use component::{Component, ToggleComponent, ToggleError};
pub use config::Config;
pub use definitions::HackDefinitions;
pub use hack::Hack;
pub use opcode::{CodeTarget, Opcode, OpcodeCatalog, OpcodeDecl, OpcodeSet};
pub use patcher::{CodePatcher, PatchError};
pub use registry::{HackRegistry, RegistryError};
pub use settings::{Settings, SettingsError};
