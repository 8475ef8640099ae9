//! # Patcher
//!
//! This module covers patchers, which are used to overwrite and restore locations in memory.
//!
//! There are two layers here:
//! - [`Patcher`]: the raw, pointer-based layer. Implementations are stacked (see [`mem::PermissionWrapper`])
//!   and hand back guards that restore the original bytes when dropped.
//! - [`CodePatcher`]: the safe, address-based layer the toggle engine talks to. The real process adapter is
//!   [`process::ProcessPatcher`]; [`image::MemoryImage`] is a fake that lives entirely in a heap buffer.

use thiserror::Error;

use crate::opcode::Opcode;

pub mod byte;
pub mod image;
pub mod mem;
pub mod process;

/// All patchers save state from where they patched and are able to revert on-command
///
/// # Safety
///
/// Patchers are inherently unsafe. The implementor must ensure that the implementation of `patch` works correctly and is properly documented for avoiding undefined behavior
pub unsafe trait Patcher {
    /// Error type that can occur when patching. If patching always succeeds, use `()`.
    type Error;
    /// Guard type for the patcher. When this guard is dropped, the location should be restored.
    type Guard<'a>: PatchGuard + 'a
    where
        Self: 'a;

    /// Patches a given location, returning a guard that restores the original data.
    ///
    /// # Safety
    ///
    /// This function is intended to be used on arbitrary memory addresses, but must be valid for the supplied patcher
    unsafe fn patch<'a>(
        &'a self,
        target: *mut u8,
        patch: &[u8],
    ) -> Result<Self::Guard<'a>, Self::Error>;

    /// Overwrites a given location without keeping track of what was there.
    ///
    /// # Safety
    ///
    /// Same requirements as [`Patcher::patch`]
    unsafe fn write(&self, target: *mut u8, data: &[u8]) -> Result<(), Self::Error>;
}

/// Guard for a patch
///
/// # Safety
///
/// Guard must fully unpatch the location when dropped, even if `restore` is not called
pub unsafe trait PatchGuard: Sized {
    /// Restores the original value of a patch
    fn restore(self) {
        // most implementations have their functionality in their [`Drop::drop`] implementation
    }
}

/// Errors from writing to or reading from patched memory
#[derive(Debug, Error)]
pub enum PatchError {
    /// Opcode has byte arrays of different lengths
    #[error("opcode at {address:#x} has {on} on bytes but {off} off bytes")]
    LengthMismatch {
        /// Address of the opcode
        address: usize,
        /// Length of the on bytes
        on: usize,
        /// Length of the off bytes
        off: usize,
    },
    /// Opcode was never resolved to an absolute address
    #[error("opcode in {library} was never resolved")]
    Unresolved {
        /// Module the opcode belongs to
        library: String,
    },
    /// Target range is not mapped or not readable
    #[error("{len} bytes at {address:#x} are not accessible")]
    Inaccessible {
        /// Start of the range
        address: usize,
        /// Length of the range
        len: usize,
    },
    /// Error when setting memory protections
    #[error("error setting memory protections: {0}")]
    Protection(#[from] region::Error),
}

/// Safe, address-based view of the memory that opcodes get written into
pub trait CodePatcher {
    /// Reads `len` bytes starting at `address`
    fn read(&self, address: usize, len: usize) -> Result<Vec<u8>, PatchError>;

    /// Writes `data` starting at `address`. Either every byte is written or none is.
    fn write(&mut self, address: usize, data: &[u8]) -> Result<(), PatchError>;

    /// Writes the on or off bytes of `opcode`
    fn write_opcode(&mut self, opcode: &Opcode, enabled: bool) -> Result<(), PatchError> {
        let address = opcode.address().ok_or_else(|| PatchError::Unresolved {
            library: opcode.library.clone(),
        })?;
        if opcode.on_bytes.len() != opcode.off_bytes.len() {
            return Err(PatchError::LengthMismatch {
                address,
                on: opcode.on_bytes.len(),
                off: opcode.off_bytes.len(),
            });
        }
        self.write(address, opcode.bytes(enabled))
    }
}

#[cfg(test)]
mod tests {
    use crate::opcode::Opcode;
    use crate::patcher::image::MemoryImage;
    use crate::patcher::{CodePatcher, PatchError};

    #[test]
    /// Writing an opcode selects the byte array for the requested state
    fn test_write_opcode() {
        let mut image = MemoryImage::new();
        image.map(0x1000, vec![0x74, 0x05, 0xcc]);
        let opcode = Opcode::resolved("game.exe", 0x1000, vec![0x90, 0x90], vec![0x74, 0x05]);

        image.write_opcode(&opcode, true).unwrap();
        assert_eq!(image.bytes(0x1000, 3), [0x90, 0x90, 0xcc]);

        image.write_opcode(&opcode, false).unwrap();
        assert_eq!(image.bytes(0x1000, 3), [0x74, 0x05, 0xcc]);
    }

    #[test]
    /// Mismatched byte arrays never reach memory
    fn test_length_mismatch() {
        let mut image = MemoryImage::new();
        image.map(0x1000, vec![0x74, 0x05]);
        let opcode = Opcode::resolved("game.exe", 0x1000, vec![0x90], vec![0x74, 0x05]);

        let err = image.write_opcode(&opcode, true).unwrap_err();
        assert!(matches!(err, PatchError::LengthMismatch { on: 1, off: 2, .. }));
        assert_eq!(image.bytes(0x1000, 2), [0x74, 0x05]);
    }

    #[test]
    /// Unresolved opcodes are refused
    fn test_unresolved() {
        let mut image = MemoryImage::new();
        let opcode = Opcode::unresolved("missing.dll", vec![0x90], vec![0x74]);
        assert!(matches!(
            image.write_opcode(&opcode, true),
            Err(PatchError::Unresolved { .. })
        ));
    }
}
