//! In-memory stand-in for process memory
//!
//! [`MemoryImage`] maps byte buffers at fake addresses and implements [`CodePatcher`] on top of them, so the
//! toggle engine can be driven without touching real code. Writes can be made to fail at chosen addresses.

use std::collections::{BTreeMap, HashSet};

use super::{CodePatcher, PatchError};

/// Fake address space made of byte buffers
#[derive(Debug, Default, Clone)]
pub struct MemoryImage {
    /// Mapped buffers, keyed by their base address
    regions: BTreeMap<usize, Vec<u8>>,
    /// Writes starting at any of these addresses fail
    faults: HashSet<usize>,
    /// Number of successful writes
    writes: usize,
}

impl MemoryImage {
    /// Creates an empty image
    pub fn new() -> Self {
        Self::default()
    }

    /// Maps `data` at `base`, replacing anything that was mapped at the same base
    pub fn map(&mut self, base: usize, data: Vec<u8>) {
        self.regions.insert(base, data);
    }

    /// Makes every write starting at `address` fail
    pub fn fail_writes_at(&mut self, address: usize) {
        self.faults.insert(address);
    }

    /// Removes every injected failure
    pub fn clear_faults(&mut self) {
        self.faults.clear();
    }

    /// Number of writes that went through
    pub fn write_count(&self) -> usize {
        self.writes
    }

    /// Reads bytes for inspection, returning an empty vec if the range isn't mapped
    pub fn bytes(&self, address: usize, len: usize) -> Vec<u8> {
        self.read(address, len).unwrap_or_default()
    }

    /// Finds the buffer containing the whole range and the range's offset into it
    fn locate(&self, address: usize, len: usize) -> Option<(usize, usize)> {
        let (&base, data) = self.regions.range(..=address).next_back()?;
        let offset = address - base;
        (offset.checked_add(len)? <= data.len()).then_some((base, offset))
    }
}

impl CodePatcher for MemoryImage {
    fn read(&self, address: usize, len: usize) -> Result<Vec<u8>, PatchError> {
        let (base, offset) = self
            .locate(address, len)
            .ok_or(PatchError::Inaccessible { address, len })?;
        Ok(self.regions[&base][offset..offset + len].to_vec())
    }

    fn write(&mut self, address: usize, data: &[u8]) -> Result<(), PatchError> {
        let len = data.len();
        let inaccessible = PatchError::Inaccessible { address, len };
        if self.faults.contains(&address) {
            return Err(inaccessible);
        }
        let (base, offset) = self.locate(address, len).ok_or(inaccessible)?;
        if let Some(region) = self.regions.get_mut(&base) {
            region[offset..offset + len].copy_from_slice(data);
        }
        self.writes += 1;
        Ok(())
    }
}
