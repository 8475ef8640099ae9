//! 32-bit x86 snippets

/// Length of [`jmp_rel32`]
pub const JMP_REL32_LEN: usize = 5;

/// `jmp rel32` placed at `from`. Every 32-bit target is reachable since the displacement wraps.
pub fn jmp_rel32(from: u32, to: u32) -> [u8; JMP_REL32_LEN] {
    let displacement = to.wrapping_sub(from.wrapping_add(JMP_REL32_LEN as u32));
    let mut code = [0xe9; JMP_REL32_LEN];
    code[1..].copy_from_slice(&displacement.to_le_bytes());
    code
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_jmp_rel32() {
        assert_eq!(jmp_rel32(0x1000, 0x2000), [0xe9, 0xfb, 0x0f, 0x00, 0x00]);
        // backwards
        assert_eq!(jmp_rel32(0x2000, 0x1000), [0xe9, 0xfb, 0xef, 0xff, 0xff]);
    }
}
