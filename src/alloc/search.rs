//! Walks the address space for unmapped pages near an address
//!
//! Based on the region search from detour-rs: https://github.com/darfink/detour-rs

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
use std::iter;
use std::ops::Range;

/// Which way to walk from the origin
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Towards lower addresses
    Down,
    /// Towards higher addresses
    Up,
}

/// Start addresses of unmapped pages inside `range`, closest to `origin` first
pub fn free_regions(
    origin: usize,
    range: Range<usize>,
    direction: Direction,
) -> impl Iterator<Item = Result<usize, region::Error>> {
    let page = region::page::size();
    let step = move |address: usize| match direction {
        Direction::Down => address.checked_sub(page),
        Direction::Up => address.checked_add(page),
    };
    let mut cursor = Some(region::page::floor(origin as *const ()) as usize);

    iter::from_fn(move || {
        while let Some(address) = cursor.filter(|a| *a > 0 && range.contains(a)) {
            match region::query(address as *const ()) {
                Ok(mapped) => {
                    // skip the whole mapping
                    let mapped = mapped.as_range();
                    cursor = match direction {
                        Direction::Down => mapped.start.checked_sub(page),
                        Direction::Up => Some(mapped.end),
                    };
                }
                Err(region::Error::UnmappedRegion) => {
                    cursor = step(address);
                    return Some(Ok(address));
                }
                Err(e) => {
                    cursor = step(address);
                    return Some(Err(e));
                }
            }
        }
        None
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    /// Free pages found around a live function are actually unmapped
    fn test_free_regions() {
        let origin = test_free_regions as *const () as usize;
        let range = origin.saturating_sub(0x8000_0000)..origin.saturating_add(0x8000_0000);

        for direction in [Direction::Up, Direction::Down] {
            let free = free_regions(origin, range.clone(), direction)
                .next()
                .unwrap()
                .unwrap();
            assert!(range.contains(&free));
            assert_eq!(free % region::page::size(), 0);
            assert!(region::query(free as *const ()).is_err());
        }
    }
}
