//! Pools of executable memory, each mapped close to the code it serves
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
use std::ops::Range;
use std::slice;

use slice_pool::sync::{SliceBox, SlicePool};
use tracing::debug;

use super::search::{self, Direction};
use super::AllocError;

/// A chunk handed out by one of the pools
pub type Allocation = SliceBox<u8>;

/// Every pool mapped so far
pub struct ProximityAllocator {
    /// Furthest a chunk may be from its origin
    max_distance: usize,
    /// Pools, never unmapped
    pools: Vec<SlicePool<u8>>,
}

/// Addresses covered by a pool
fn span(pool: &SlicePool<u8>) -> Range<usize> {
    let start = pool.as_ptr() as usize;
    start..start + pool.len()
}

impl ProximityAllocator {
    /// Allocator placing chunks within `max_distance` of their origin
    pub fn new(max_distance: usize) -> Self {
        Self {
            max_distance,
            pools: Vec::new(),
        }
    }

    /// Allocates `size` bytes within reach of `origin`, mapping a new pool if none of the existing ones fit
    pub fn allocate(&mut self, origin: usize, size: usize) -> Result<Allocation, AllocError> {
        let reach =
            origin.saturating_sub(self.max_distance)..origin.saturating_add(self.max_distance);

        let existing = self
            .pools
            .iter()
            .filter(|pool| {
                let span = span(pool);
                reach.contains(&span.start) && reach.contains(&(span.end - 1))
            })
            .find_map(|pool| pool.alloc(size));
        if let Some(allocation) = existing {
            return Ok(allocation);
        }

        let out_of_range = AllocError::OutOfRange {
            origin,
            max_distance: self.max_distance,
        };
        let pool = self.map_pool(reach, origin, size)?;
        let allocation = pool.alloc(size).ok_or(out_of_range)?;
        self.pools.push(pool);
        Ok(allocation)
    }

    /// Maps a new pool in the closest free region, looking above `origin` first
    fn map_pool(
        &self,
        reach: Range<usize>,
        origin: usize,
        size: usize,
    ) -> Result<SlicePool<u8>, AllocError> {
        let len = region::page::ceil(size.max(1) as *const ()) as usize;
        let candidates = search::free_regions(origin, reach.clone(), Direction::Up)
            .chain(search::free_regions(origin, reach, Direction::Down));

        for candidate in candidates {
            let address = candidate?;
            match Self::map_fixed(address, len) {
                Ok(pool) => {
                    debug!(
                        origin = format_args!("{origin:#x}"),
                        address = format_args!("{address:#x}"),
                        len,
                        "mapped trampoline pool"
                    );
                    return Ok(pool);
                }
                // taken in the meantime, or too small; try the next one
                Err(AllocError::Map(_)) => continue,
                Err(e) => return Err(e),
            }
        }
        Err(AllocError::OutOfRange {
            origin,
            max_distance: self.max_distance,
        })
    }

    /// Maps `len` RWX bytes at exactly `address`
    fn map_fixed(address: usize, len: usize) -> Result<SlicePool<u8>, AllocError> {
        let map = mmap::MemoryMap::new(
            len,
            &[
                mmap::MapOption::MapReadable,
                mmap::MapOption::MapWritable,
                mmap::MapOption::MapExecutable,
                mmap::MapOption::MapAddr(address as *const u8),
            ],
        )
        .map_err(AllocError::Map)?;
        Ok(SlicePool::new(MappedBytes(map)))
    }
}

/// Lets a memory map back a `SlicePool`
struct MappedBytes(mmap::MemoryMap);

impl AsRef<[u8]> for MappedBytes {
    fn as_ref(&self) -> &[u8] {
        // Safety: the map is readable for its whole length and lives as long as `self`
        unsafe { slice::from_raw_parts(self.0.data(), self.0.len()) }
    }
}

impl AsMut<[u8]> for MappedBytes {
    fn as_mut(&mut self) -> &mut [u8] {
        // Safety: the map is writable for its whole length and lives as long as `self`
        unsafe { slice::from_raw_parts_mut(self.0.data(), self.0.len()) }
    }
}

// Safety: the map is owned memory; access to it goes through the pool
unsafe impl Send for MappedBytes {}
unsafe impl Sync for MappedBytes {}
