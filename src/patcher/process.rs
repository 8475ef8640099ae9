//! Patcher for the memory of the process we're running in

use region::Protection;

use super::byte::BytePatcher;
use super::mem::{PermissionError, PermissionWrapper};
use super::{CodePatcher, PatchError, Patcher};

/// [`CodePatcher`] writing straight into the current process.
///
/// Writes go through a [`PermissionWrapper`], so read-only code pages are writable for the duration of the write only.
pub struct ProcessPatcher {
    /// Patcher doing the actual writes
    patcher: PermissionWrapper<BytePatcher>,
}
impl ProcessPatcher {
    /// Creates a patcher for the current process
    ///
    /// # Safety
    ///
    /// Every address later passed to [`CodePatcher::write`] must belong to memory that is not tracked by Rust
    /// (typically code or data of a module loaded by the host) and must not be executing while it's written.
    pub unsafe fn new() -> Self {
        Self {
            patcher: PermissionWrapper::new(BytePatcher::new()),
        }
    }

    /// Fails unless every page of the range is mapped and readable
    fn check_readable(address: usize, len: usize) -> Result<(), PatchError> {
        let inaccessible = || PatchError::Inaccessible { address, len };
        if address == 0 || address.checked_add(len).is_none() {
            return Err(inaccessible());
        }
        if len == 0 {
            return Ok(());
        }
        let regions = region::query_range(address as *const u8, len).map_err(|_| inaccessible())?;
        for region in regions {
            let region = region.map_err(|_| inaccessible())?;
            if region.is_guarded() || !region.protection().contains(Protection::READ) {
                return Err(inaccessible());
            }
        }
        Ok(())
    }
}

impl CodePatcher for ProcessPatcher {
    fn read(&self, address: usize, len: usize) -> Result<Vec<u8>, PatchError> {
        Self::check_readable(address, len)?;
        // Safety: the range was just checked to be mapped and readable
        Ok(unsafe { std::slice::from_raw_parts(address as *const u8, len) }.to_vec())
    }

    fn write(&mut self, address: usize, data: &[u8]) -> Result<(), PatchError> {
        Self::check_readable(address, data.len())?;
        // Safety: `new`'s contract covers the target; the wrapper handles protections
        unsafe { self.patcher.write(address as *mut u8, data) }.map_err(|e| match e {
            PermissionError::ProtectionError(e) => PatchError::Protection(e),
            PermissionError::CustomError(()) => PatchError::Inaccessible {
                address,
                len: data.len(),
            },
        })
    }
}
