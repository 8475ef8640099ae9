//! # Code
//!
//! Machine code snippets written over hooked functions

pub mod x64;
pub mod x86;

/// Length of the jump [`jump`] writes
#[cfg(target_pointer_width = "64")]
pub const JUMP_LEN: usize = x64::JMP_ABS_LEN;
/// Length of the jump [`jump`] writes
#[cfg(target_pointer_width = "32")]
pub const JUMP_LEN: usize = x86::JMP_REL32_LEN;

/// Encodes a jump that is placed at `from` and lands on `to`
#[cfg(target_pointer_width = "64")]
pub fn jump(_from: usize, to: usize) -> [u8; JUMP_LEN] {
    x64::jmp_abs(to as u64)
}

/// Encodes a jump that is placed at `from` and lands on `to`
#[cfg(target_pointer_width = "32")]
pub fn jump(from: usize, to: usize) -> [u8; JUMP_LEN] {
    x86::jmp_rel32(from as u32, to as u32)
}
