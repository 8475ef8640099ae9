//! This module contains a patcher which adjusts memory permissions to patch read-only data

use region::Protection;
use thiserror::Error;
use tracing::error;

use super::{PatchGuard, Patcher};

/// Errors when using permission patching
#[derive(Debug, Error)]
pub enum PermissionError<E> {
    /// Error when setting memory protections
    #[error("Error setting memory protections")]
    ProtectionError(#[from] region::Error),
    /// Custom error type from the underlying patcher
    #[error("{0}")]
    CustomError(E),
}
impl From<()> for PermissionError<()> {
    fn from(e: ()) -> Self {
        Self::CustomError(e)
    }
}

/// This struct wraps patchers to allow them to write to memory that's normally unwritable.
/// It achieves this result by changing the memory permissions of the target memory, triggering the patch, and then reverting the permissions.
///
/// # Safety
///
/// `PermissionWrapper` relies on the size of the patch value to determine how many pages to change write permissions,
/// pairing `PermissionWrapper` with a patcher that writes more memory than the size of the patch is undefined behavior.
///
/// The `*mut u8` handed to the wrapper **MUST** be memory not tracked by Rust, or ensured that reading from and writing to data tracked by Rust will not trigger undefined behavior.
pub struct PermissionWrapper<P: Patcher> {
    /// Underlying patcher.
    patcher: P,
}
impl<P: Patcher> PermissionWrapper<P> {
    /// Creates a new PermissionWrapper
    pub const fn new(patcher: P) -> Self {
        Self { patcher }
    }
}

/// Converts a const pointer to a mutable pointer to be passed into our [`Patcher::patch`] implementation.
///
/// # Safety
///
/// **THIS FUNCTION DOES NOT CHANGE MEMORY PERMISSIONS.**
///
/// This function should **ONLY** be called in conjunction with our [`Patcher::patch`] implementation, which properly changes the memory permissions.
pub unsafe fn to_mut<T>(ptr: *const T) -> *mut T {
    ptr as _
}

/// Makes sure the CPU doesn't keep executing stale copies of code we just rewrote
pub(crate) fn flush_instruction_cache(location: *const u8, len: usize) {
    #[cfg(target_os = "windows")]
    unsafe {
        use windows::Win32::System::Diagnostics::Debug::FlushInstructionCache;
        use windows::Win32::System::Threading::GetCurrentProcess;

        if let Err(e) = FlushInstructionCache(GetCurrentProcess(), Some(location as _), len) {
            tracing::warn!(error = %e, "failed to flush instruction cache");
        }
    }
    // x86 keeps instruction fetch coherent with data writes on its own
    #[cfg(not(target_os = "windows"))]
    let _ = (location, len);
}

unsafe impl<P> Patcher for PermissionWrapper<P>
where
    P: Patcher,
    PermissionError<P::Error>: From<P::Error>,
{
    type Error = PermissionError<P::Error>;
    type Guard<'a> = PermissionWrapperGuard<P::Guard<'a>> where Self: 'a;

    unsafe fn patch<'a>(
        &'a self,
        location: *mut u8,
        patch: &[u8],
    ) -> Result<Self::Guard<'a>, Self::Error> {
        let _guard = region::protect_with_handle(location, patch.len(), Protection::all())?;
        let guard = self
            .patcher
            .patch(location, patch)
            .map(|g| PermissionWrapperGuard::guard(g, location, patch.len()))?;
        flush_instruction_cache(location, patch.len());
        Ok(guard)
    }

    unsafe fn write(&self, location: *mut u8, data: &[u8]) -> Result<(), Self::Error> {
        // previous protection comes back when `_guard` drops
        let _guard = region::protect_with_handle(location, data.len(), Protection::all())?;
        self.patcher.write(location, data)?;
        flush_instruction_cache(location, data.len());
        Ok(())
    }
}

/// Permission guard for the underlying patch guard
pub struct PermissionWrapperGuard<G: PatchGuard> {
    /// Underlying patch guard for the wrapped patcher. `Option` so that we can drop it in our [`Drop::drop`] impl
    guard: Option<G>,
    /// Location of the patch
    location: *const u8,
    /// Length of the patch
    len: usize,
}
impl<G: PatchGuard> PermissionWrapperGuard<G> {
    /// Wrap a patcher's guard. When this guard is dropped, the underlying guard will also be dropped with its target location made writable
    fn guard(guard: G, location: *const u8, len: usize) -> Self {
        let guard = Some(guard);
        Self {
            guard,
            location,
            len,
        }
    }
}
unsafe impl<G: PatchGuard> PatchGuard for PermissionWrapperGuard<G> {}

impl<G: PatchGuard> Drop for PermissionWrapperGuard<G> {
    fn drop(&mut self) {
        let Some(guard) = self.guard.take() else {
            return;
        };
        match unsafe { region::protect_with_handle(self.location, self.len, Protection::all()) } {
            Ok(_handle) => {
                guard.restore();
                flush_instruction_cache(self.location, self.len);
            }
            Err(e) => {
                // restoring into memory we can't write to would fault, leaving the patch in place is the lesser evil
                error!(
                    address = format_args!("{:#x}", self.location as usize),
                    error = %e,
                    "unable to restore patch"
                );
                std::mem::forget(guard);
            }
        }
    }
}
