//! # Inline Hook
//!
//! Overwrites the start of a function with a jump to the detour. The instructions that get overwritten are
//! relocated into a trampoline first, followed by a jump back into the rest of the function, so the detour can
//! still call the original.

use std::fmt::Debug;

use iced_x86::{
    BlockEncoder, BlockEncoderOptions, Code, Decoder, DecoderOptions, FlowControl, Instruction,
    InstructionBlock,
};
use tracing::debug;

use crate::alloc::{self, ExecutableMemory};
use crate::code::{self, JUMP_LEN};
use crate::patcher::mem::{flush_instruction_cache, to_mut};
use crate::patcher::{PatchGuard, Patcher};

use super::{Hook, HookError, HookGuard};

/// Longest x86 instruction
const MAX_INSTRUCTION_LEN: usize = 15;

/// Copies the instructions covering the first `min_len` bytes of `code`, which lives at `ip`, so they can run at
/// `target_ip`, and appends a jump back to the first instruction that wasn't copied.
///
/// Relative operands are fixed up for the new location.
pub fn relocate_prologue<E: Debug>(
    bitness: u32,
    code: &[u8],
    ip: u64,
    min_len: usize,
    target_ip: u64,
) -> Result<Vec<u8>, HookError<E>> {
    let mut decoder = Decoder::with_ip(bitness, code, ip, DecoderOptions::NONE);
    let mut instructions = Vec::new();
    let mut covered = 0;

    while covered < min_len {
        let address = ip + covered as u64;
        if !decoder.can_decode() {
            return Err(HookError::Decode(address));
        }
        let instruction = decoder.decode();
        if instruction.is_invalid() {
            return Err(HookError::Decode(address));
        }
        if instruction.flow_control() == FlowControl::Return {
            return Err(HookError::TooShort {
                address: ip,
                needed: min_len,
            });
        }
        covered += instruction.len();
        instructions.push(instruction);
    }

    let jmp = if bitness == 64 {
        Code::Jmp_rel32_64
    } else {
        Code::Jmp_rel32_32
    };
    instructions.push(Instruction::with_branch(jmp, ip + covered as u64)?);

    let block = InstructionBlock::new(&instructions, target_ip);
    let encoded = BlockEncoder::encode(bitness, block, BlockEncoderOptions::NONE)?;
    Ok(encoded.code_buffer)
}

/// Hook that moves the function's prologue into a trampoline
pub struct InlineHook<P> {
    /// Patcher writing the jump over the prologue
    patcher: P,
}
impl<P: Patcher> InlineHook<P> {
    /// Creates a new inline hook
    pub const fn new(patcher: P) -> Self {
        Self { patcher }
    }
}

impl<P> InlineHook<P>
where
    P: Patcher,
    P::Error: Debug,
{
    /// Same as [`Hook::hook`], but hands the trampoline to `publish` before the prologue is overwritten, so a
    /// detour reached right after the jump is written can already find the original.
    ///
    /// # Safety
    ///
    /// Same contract as [`Hook::hook`]
    pub unsafe fn hook_with(
        &self,
        source: *const u8,
        destination: *const u8,
        publish: impl FnOnce(*const u8),
    ) -> Result<InlineHookGuard<P::Guard<'_>>, HookError<P::Error>> {
        let ip = source as usize;
        // Safety: caller guarantees `source` is a function, which is at least one instruction longer than the jump
        let prologue = std::slice::from_raw_parts(source, JUMP_LEN + MAX_INSTRUCTION_LEN);

        // relocation can grow instructions, e.g. short branches becoming near ones
        let capacity = prologue.len() * 2 + 32;
        let mut trampoline = alloc::allocate_executable(ip, capacity)?;
        let relocated = relocate_prologue::<P::Error>(
            usize::BITS,
            prologue,
            ip as u64,
            JUMP_LEN,
            trampoline.address() as u64,
        )?;
        if relocated.len() > trampoline.len() {
            return Err(HookError::TrampolineOverflow {
                needed: relocated.len(),
                available: trampoline.len(),
            });
        }
        trampoline[..relocated.len()].copy_from_slice(&relocated);
        flush_instruction_cache(trampoline.as_ptr(), relocated.len());
        publish(trampoline.as_ptr());

        let jump = code::jump(ip, destination as usize);
        let guard = self
            .patcher
            .patch(to_mut(source), &jump)
            .map_err(HookError::Patch)?;

        debug!(
            source = format_args!("{ip:#x}"),
            destination = format_args!("{:#x}", destination as usize),
            trampoline = format_args!("{:#x}", trampoline.address()),
            "hook installed"
        );
        Ok(InlineHookGuard { guard, trampoline })
    }
}

unsafe impl<P> Hook for InlineHook<P>
where
    P: Patcher,
    P::Error: Debug,
{
    type Error = HookError<P::Error>;
    type Guard<'a> = InlineHookGuard<P::Guard<'a>> where Self: 'a;

    unsafe fn hook(
        &self,
        source: *const u8,
        destination: *const u8,
    ) -> Result<Self::Guard<'_>, Self::Error> {
        self.hook_with(source, destination, |_| {})
    }
}

/// Guard for inline hooks
pub struct InlineHookGuard<G: PatchGuard> {
    /// Restores the prologue. Declared first so it drops before the trampoline is freed.
    guard: G,
    /// Relocated prologue
    trampoline: ExecutableMemory,
}
impl<G: PatchGuard> InlineHookGuard<G> {
    /// Entry point that runs the original function
    pub fn original(&self) -> *const u8 {
        self.trampoline.as_ptr()
    }
}
unsafe impl<G: PatchGuard> HookGuard for InlineHookGuard<G> {}
