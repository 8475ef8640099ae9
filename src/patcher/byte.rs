//! This module contains a byte patcher

use std::ptr;

use super::{PatchGuard, Patcher};

/// Patcher for patching memory locations with byte arrays.
/// This patcher never fails.
#[derive(Default)]
pub struct BytePatcher;
impl BytePatcher {
    /// Creates a new [`BytePatcher`]
    pub const fn new() -> Self {
        Self
    }
}
unsafe impl Patcher for BytePatcher {
    type Error = ();
    type Guard<'a> = BytePatchGuard;

    unsafe fn patch<'a>(
        &'a self,
        location: *mut u8,
        patch: &[u8],
    ) -> Result<Self::Guard<'a>, Self::Error> {
        Ok(BytePatchGuard::patch(location, patch))
    }

    unsafe fn write(&self, location: *mut u8, data: &[u8]) -> Result<(), Self::Error> {
        // Safety: caller must ensure that `location` is writable for `data.len()` bytes
        ptr::copy(data.as_ptr(), location, data.len());
        Ok(())
    }
}
/// Guard for byte-patches
///
/// See [`BytePatcher`].
pub struct BytePatchGuard {
    /// Original data from `location`
    original: Vec<u8>,
    /// Location of the patch
    location: *mut u8,
}
impl BytePatchGuard {
    /// Patches a location, returning a guard for unpatching
    ///
    /// # Safety
    ///
    /// `location` must be valid for reads and writes of `patch.len()` bytes
    unsafe fn patch(location: *mut u8, patch: &[u8]) -> Self {
        // Safety: caller must pass in a `location` pointer that is valid for the full length of the patch
        let original = std::slice::from_raw_parts(location, patch.len()).to_vec();

        let guard = Self { original, location };

        // Safety: caller must ensure that `location` is writable
        ptr::copy(patch.as_ptr(), location, patch.len());

        guard
    }

    /// Bytes that were at the location before patching
    pub fn original(&self) -> &[u8] {
        &self.original
    }
}
unsafe impl PatchGuard for BytePatchGuard {}
impl Drop for BytePatchGuard {
    fn drop(&mut self) {
        // Safety: creator must pass in a `location` pointer that is valid and writable for the full length of the patch
        unsafe {
            ptr::copy(self.original.as_ptr(), self.location, self.original.len());
        }
    }
}
