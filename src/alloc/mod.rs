//! Executable memory for trampolines, placed close enough to hooked code for 32-bit displacements
//!
//! Based on the proximity allocator from detour-rs: https://github.com/darfink/detour-rs

// detour-rs - A cross-platform detour library written in Rust
// Copyright (C) 2017 Elliott Linder.
// All rights reserved.
//
// Redistribution and use in source and binary forms, with or without
// modification, are permitted provided that the following conditions
// are met:
//
//  1. Redistributions of source code must retain the above copyright
//     notice, this list of conditions and the following disclaimer.
//  2. Redistributions in binary form must reproduce the above copyright
//     notice, this list of conditions and the following disclaimer in the
//     documentation and/or other materials provided with the distribution.
//
// THIS SOFTWARE IS PROVIDED BY THE COPYRIGHT HOLDERS AND CONTRIBUTORS
// "AS IS" AND ANY EXPRESS OR IMPLIED WARRANTIES, INCLUDING, BUT NOT LIMITED
// TO, THE IMPLIED WARRANTIES OF MERCHANTABILITY AND FITNESS FOR A
// PARTICULAR PURPOSE ARE DISCLAIMED. IN NO EVENT SHALL THE COPYRIGHT HOLDER
// OR CONTRIBUTORS BE LIABLE FOR ANY DIRECT, INDIRECT, INCIDENTAL, SPECIAL,
// EXEMPLARY, OR CONSEQUENTIAL DAMAGES (INCLUDING, BUT NOT LIMITED TO,
// PROCUREMENT OF SUBSTITUTE GOODS OR SERVICES; LOSS OF USE, DATA, OR
// PROFITS; OR BUSINESS INTERRUPTION) HOWEVER CAUSED AND ON ANY THEORY OF
// LIABILITY, WHETHER IN CONTRACT, STRICT LIABILITY, OR TORT (INCLUDING
// NEGLIGENCE OR OTHERWISE) ARISING IN ANY WAY OUT OF THE USE OF THIS
// SOFTWARE, EVEN IF ADVISED OF THE POSSIBILITY OF SUCH DAMAGE.
//
// ===============================================================================
//
// minhook-rs - A minimalist x86/x86-64 hooking library for Rust
// Copyright (C) 2015 Jascha Neutelings.
// All rights reserved.
//
// Redistribution and use in source and binary forms, with or without
// modification, are permitted provided that the following conditions
// are met:
//
//  1. Redistributions of source code must retain the above copyright
//     notice, this list of conditions and the following disclaimer.
//  2. Redistributions in binary form must reproduce the above copyright
//     notice, this list of conditions and the following disclaimer in the
//     documentation and/or other materials provided with the distribution.
//
// THIS SOFTWARE IS PROVIDED BY THE COPYRIGHT HOLDERS AND CONTRIBUTORS
// "AS IS" AND ANY EXPRESS OR IMPLIED WARRANTIES, INCLUDING, BUT NOT LIMITED
// TO, THE IMPLIED WARRANTIES OF MERCHANTABILITY AND FITNESS FOR A
// PARTICULAR PURPOSE ARE DISCLAIMED. IN NO EVENT SHALL THE COPYRIGHT HOLDER
// OR CONTRIBUTORS BE LIABLE FOR ANY DIRECT, INDIRECT, INCIDENTAL, SPECIAL,
// EXEMPLARY, OR CONSEQUENTIAL DAMAGES (INCLUDING, BUT NOT LIMITED TO,
// PROCUREMENT OF SUBSTITUTE GOODS OR SERVICES; LOSS OF USE, DATA, OR
// PROFITS; OR BUSINESS INTERRUPTION) HOWEVER CAUSED AND ON ANY THEORY OF
// LIABILITY, WHETHER IN CONTRACT, STRICT LIABILITY, OR TORT (INCLUDING
// NEGLIGENCE OR OTHERWISE) ARISING IN ANY WAY OUT OF THE USE OF THIS
// SOFTWARE, EVEN IF ADVISED OF THE POSSIBILITY OF SUCH DAMAGE.
use std::ops::{Deref, DerefMut};
use std::sync::{Mutex, PoisonError};

use lazy_static::lazy_static;
use thiserror::Error;

pub mod proximity;
pub mod search;

use proximity::{Allocation, ProximityAllocator};

/// Errors when allocating executable memory
#[derive(Debug, Error)]
pub enum AllocError {
    /// Nothing free within reach of the origin
    #[error("no free memory within {max_distance:#x} bytes of {origin:#x}")]
    OutOfRange {
        /// Address the memory had to be close to
        origin: usize,
        /// Furthest the memory was allowed to be
        max_distance: usize,
    },
    /// Mapping a free region failed
    #[error("unable to map memory: {0}")]
    Map(mmap::MapError),
    /// Walking the address space failed
    #[error("unable to query memory: {0}")]
    Query(#[from] region::Error),
}

/// The furthest a trampoline may be from the code it was allocated for (2 GiB)
pub const DETOUR_RANGE: usize = 0x8000_0000;

lazy_static! {
    /// Pools shared by every hook
    static ref POOL: Mutex<ProximityAllocator> = Mutex::new(ProximityAllocator::new(DETOUR_RANGE));
}

/// Readable, writable and executable bytes. The chunk goes back to its pool when dropped.
pub struct ExecutableMemory(Allocation);

impl ExecutableMemory {
    /// Start of the chunk
    pub fn address(&self) -> usize {
        self.0.as_ptr() as usize
    }
}

impl Deref for ExecutableMemory {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        &self.0
    }
}

impl DerefMut for ExecutableMemory {
    fn deref_mut(&mut self) -> &mut [u8] {
        &mut self.0
    }
}

/// Allocates `size` executable bytes within [`DETOUR_RANGE`] of `origin`.
///
/// The contents are unspecified.
pub fn allocate_executable(origin: usize, size: usize) -> Result<ExecutableMemory, AllocError> {
    let mut pool = POOL.lock().unwrap_or_else(PoisonError::into_inner);
    pool.allocate(origin, size).map(ExecutableMemory)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_allocate_near() {
        let origin = test_allocate_near as *const () as usize;
        let mut memory = allocate_executable(origin, 64).unwrap();
        assert!(memory.len() >= 64);
        assert!(memory.address().abs_diff(origin) < DETOUR_RANGE);

        memory[..2].copy_from_slice(&[0x90, 0xc3]);
        assert_eq!(memory[..2], [0x90, 0xc3]);

        let region = region::query(memory.as_ptr()).unwrap();
        assert!(region.protection().contains(region::Protection::READ_WRITE_EXECUTE));
    }
}
