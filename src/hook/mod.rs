//! # Hook
//!
//! This module covers hooks, which redirect execution from one location to another

use std::fmt::Debug;

use thiserror::Error;

use crate::alloc::AllocError;
use crate::patcher::byte::BytePatcher;
use crate::patcher::mem::{PermissionError, PermissionWrapper};

pub mod inline;
pub mod scheduler;

/// Inline hook writing into the code of the current process
pub type ProcessHook = inline::InlineHook<PermissionWrapper<BytePatcher>>;
/// Errors from [`ProcessHook`]
pub type ProcessHookError = HookError<PermissionError<()>>;

/// Trait for hooks
///
/// # Safety
///
/// Hooks are inherently unsafe; the implementor must make sure the hooked code keeps working for every caller
/// that was already running or is about to run it.
pub unsafe trait Hook {
    /// Errors that could happen during a hook
    type Error;
    /// Hook guard to allow functions to be automatically unhooked when the guard goes out of scope
    type Guard<'a>: HookGuard + 'a
    where
        Self: 'a;

    /// Creates a hook which redirects `source` to `destination`.
    ///
    /// # Safety
    ///
    /// - Both `source` and `destination` must be valid pointers
    /// - `destination` must be valid executable code
    unsafe fn hook(
        &self,
        source: *const u8,
        destination: *const u8,
    ) -> Result<Self::Guard<'_>, Self::Error>;
}

/// Guard for a currently active hook
///
/// # Safety
///
/// Must ensure that the guard fully unhooks whether dropped or unhooked via `unhook`
pub unsafe trait HookGuard: Sized {
    /// Manually unhooks the hook rather than letting the guard go out of scope
    fn unhook(self) {
        // most guards will implement all functionality in [`Drop::drop`]
    }
}

/// Errors when installing a hook
#[derive(Debug, Error)]
pub enum HookError<E: Debug> {
    /// The patcher refused to write the jump
    #[error("unable to write the jump: {0:?}")]
    Patch(E),
    /// Prologue contains bytes that don't decode
    #[error("unable to decode the instruction at {0:#x}")]
    Decode(u64),
    /// Function returns before there's room for the jump
    #[error("function at {address:#x} returns within its first {needed} bytes")]
    TooShort {
        /// Hooked function
        address: u64,
        /// Bytes the jump needs
        needed: usize,
    },
    /// Relocated prologue couldn't be encoded
    #[error("unable to relocate the prologue: {0}")]
    Relocate(#[from] iced_x86::IcedError),
    /// Relocated prologue doesn't fit its trampoline
    #[error("relocated prologue needs {needed} bytes, only {available} were allocated")]
    TrampolineOverflow {
        /// Encoded length
        needed: usize,
        /// Allocated length
        available: usize,
    },
    /// No memory for the trampoline
    #[error("unable to allocate the trampoline: {0}")]
    Alloc(#[from] AllocError),
}
