//! Patch command codes.
//!
//! Commands are prefix codes read LSB-first. A 6-bit peek of the command
//! stream indexes a 64-entry table that yields the command and the number
//! of bits its code occupies.

use std::fmt;

/// Bits peeked to decode one command.
pub const PEEK_BITS: u32 = 6;

/// Bits in the width field that precedes a variable length.
pub const WIDTH_BITS: u32 = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum PatchCommand {
    /// Copy bytes from the source.
    Copy = 0,
    /// Discard source bytes.
    Skip = 1,
    /// Write literal bytes without touching the source.
    Insert = 2,
    /// Write literal bytes over the same number of source bytes.
    Replace = 3,
    ReplaceOneCopyThree = 4,
    ReplaceOneCopySeven = 5,
    ReplaceTwoCopySix = 6,
}

impl PatchCommand {
    pub const ALL: [Self; 7] = [
        Self::Copy,
        Self::Skip,
        Self::Insert,
        Self::Replace,
        Self::ReplaceOneCopyThree,
        Self::ReplaceOneCopySeven,
        Self::ReplaceTwoCopySix,
    ];

    /// Code bits in read order (bit 0 is read first) and the code length.
    pub const fn code(self) -> (u32, u32) {
        match self {
            Self::Copy => (0b0, 1),
            Self::Skip => (0b001, 3),
            Self::Insert => (0b101, 3),
            Self::Replace => (0b0011, 4),
            Self::ReplaceOneCopyThree => (0b1011, 4),
            Self::ReplaceOneCopySeven => (0b0111, 4),
            Self::ReplaceTwoCopySix => (0b1111, 4),
        }
    }

    /// Whether a variable length follows the code.
    #[inline]
    pub const fn has_length(self) -> bool {
        (self as u8) <= 3
    }

    /// Literal bytes written by a fixed-size command before its copy.
    pub const fn fixed_literals(self) -> u64 {
        match self {
            Self::ReplaceOneCopyThree | Self::ReplaceOneCopySeven => 1,
            Self::ReplaceTwoCopySix => 2,
            _ => 0,
        }
    }

    /// Bytes copied from the source by a fixed-size command.
    pub const fn fixed_copy(self) -> u64 {
        match self {
            Self::ReplaceOneCopyThree => 3,
            Self::ReplaceOneCopySeven => 7,
            Self::ReplaceTwoCopySix => 6,
            _ => 0,
        }
    }
}

impl TryFrom<u8> for PatchCommand {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Self::ALL.get(value as usize).copied().ok_or(value)
    }
}

impl fmt::Display for PatchCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Copy => "copy",
            Self::Skip => "skip",
            Self::Insert => "insert",
            Self::Replace => "replace",
            Self::ReplaceOneCopyThree => "replace1+copy3",
            Self::ReplaceOneCopySeven => "replace1+copy7",
            Self::ReplaceTwoCopySix => "replace2+copy6",
        };
        f.write_str(name)
    }
}

/// Lookup from a 6-bit peek to (command, code length).
#[derive(Debug, Clone)]
pub struct CommandTable {
    entries: [(PatchCommand, u8); 1 << PEEK_BITS],
}

impl CommandTable {
    pub fn new() -> Self {
        let mut entries = [(PatchCommand::Copy, 1u8); 1 << PEEK_BITS];
        for (peek, entry) in entries.iter_mut().enumerate() {
            let peek = peek as u32;
            // The code set is complete, so exactly one command matches.
            for command in PatchCommand::ALL {
                let (code, len) = command.code();
                if peek & ((1 << len) - 1) == code {
                    *entry = (command, len as u8);
                    break;
                }
            }
        }
        Self { entries }
    }

    #[inline]
    pub fn lookup(&self, peek: u32) -> (PatchCommand, u32) {
        let (command, len) = self.entries[(peek & ((1 << PEEK_BITS) - 1)) as usize];
        (command, u32::from(len))
    }
}

impl Default for CommandTable {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes_are_prefix_free_and_complete() {
        let kraft: f64 = PatchCommand::ALL
            .iter()
            .map(|command| 0.5f64.powi(command.code().1 as i32))
            .sum();
        assert_eq!(kraft, 1.0);

        for a in PatchCommand::ALL {
            for b in PatchCommand::ALL {
                if a == b {
                    continue;
                }
                let (code_a, len_a) = a.code();
                let (code_b, len_b) = b.code();
                let shared = len_a.min(len_b);
                let mask = (1 << shared) - 1;
                assert_ne!(code_a & mask, code_b & mask, "{a} is a prefix of {b}");
            }
        }
    }

    #[test]
    fn test_table_decodes_every_code() {
        let table = CommandTable::new();
        for command in PatchCommand::ALL {
            let (code, len) = command.code();
            // Arbitrary trailing bits must not change the decoded command.
            for tail in 0..(1u32 << (PEEK_BITS - len)) {
                assert_eq!(table.lookup(code | (tail << len)), (command, len));
            }
        }
    }

    #[test]
    fn test_try_from() {
        assert_eq!(PatchCommand::try_from(5), Ok(PatchCommand::ReplaceOneCopySeven));
        assert_eq!(PatchCommand::try_from(7), Err(7));
    }
}
