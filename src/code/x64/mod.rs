//! x86-64 snippets

/// Length of [`jmp_abs`]
pub const JMP_ABS_LEN: usize = 14;

/// `jmp [rip + 0]` followed by the 8 byte target, reaching anywhere in the address space
pub fn jmp_abs(target: u64) -> [u8; JMP_ABS_LEN] {
    let mut code = [0; JMP_ABS_LEN];
    code[..6].copy_from_slice(&[0xff, 0x25, 0x00, 0x00, 0x00, 0x00]);
    code[6..].copy_from_slice(&target.to_le_bytes());
    code
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_jmp_abs() {
        assert_eq!(
            jmp_abs(0x7ff6_1234_5678),
            [0xff, 0x25, 0, 0, 0, 0, 0x78, 0x56, 0x34, 0x12, 0xf6, 0x7f, 0, 0]
        );
    }
}
