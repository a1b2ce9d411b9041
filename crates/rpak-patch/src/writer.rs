//! Edit-stream authoring.

use byteorder::{LittleEndian, WriteBytesExt};

use crate::command::{PatchCommand, WIDTH_BITS};

/// LSB-first bit packer.
#[derive(Debug, Default)]
struct BitWriter {
    bytes: Vec<u8>,
    bits: u64,
}

impl BitWriter {
    fn push(&mut self, value: u32, count: u32) {
        for bit in 0..count {
            let byte = (self.bits / 8) as usize;
            if byte == self.bytes.len() {
                self.bytes.push(0);
            }
            if (value >> bit) & 1 != 0 {
                self.bytes[byte] |= 1 << (self.bits % 8);
            }
            self.bits += 1;
        }
    }
}

/// Builds an edit stream command by command.
///
/// ```
/// use rpak_patch::{EditStream, EditStreamWriter, PatchEngine, PatchState};
///
/// let mut writer = EditStreamWriter::new();
/// writer.copy(3);
/// writer.replace(b"!!");
///
/// let mut engine = PatchEngine::new(EditStream::parse(&writer.finish()).unwrap());
/// let mut dest = [0u8; 5];
/// let progress = engine.apply(b"abcde", &mut dest).unwrap();
/// assert_eq!(&dest, b"abc!!");
/// assert_eq!(progress.state, PatchState::Finished);
/// ```
#[derive(Debug, Default)]
pub struct EditStreamWriter {
    commands: BitWriter,
    literals: Vec<u8>,
    count: u32,
}

impl EditStreamWriter {
    pub fn new() -> Self {
        Self::default()
    }

    fn code(&mut self, command: PatchCommand) {
        let (code, len) = command.code();
        self.commands.push(code, len);
        self.count += 1;
    }

    fn length(&mut self, length: u32) {
        debug_assert!(length > 0);
        let width = 31 - length.leading_zeros();
        self.commands.push(width, WIDTH_BITS);
        self.commands.push(length - (1 << width), width);
    }

    fn with_length(&mut self, command: PatchCommand, length: u32) {
        if length == 0 {
            return;
        }
        self.code(command);
        self.length(length);
    }

    pub fn copy(&mut self, length: u32) {
        self.with_length(PatchCommand::Copy, length);
    }

    pub fn skip(&mut self, length: u32) {
        self.with_length(PatchCommand::Skip, length);
    }

    pub fn insert(&mut self, bytes: &[u8]) {
        self.with_length(PatchCommand::Insert, bytes.len() as u32);
        self.literals.extend_from_slice(bytes);
    }

    pub fn replace(&mut self, bytes: &[u8]) {
        self.with_length(PatchCommand::Replace, bytes.len() as u32);
        self.literals.extend_from_slice(bytes);
    }

    pub fn replace_one_copy_three(&mut self, byte: u8) {
        self.code(PatchCommand::ReplaceOneCopyThree);
        self.literals.push(byte);
    }

    pub fn replace_one_copy_seven(&mut self, byte: u8) {
        self.code(PatchCommand::ReplaceOneCopySeven);
        self.literals.push(byte);
    }

    pub fn replace_two_copy_six(&mut self, bytes: [u8; 2]) {
        self.code(PatchCommand::ReplaceTwoCopySix);
        self.literals.extend_from_slice(&bytes);
    }

    /// Serialize as `command_count`, `command_bytes`, bitstream, literals.
    pub fn finish(self) -> Vec<u8> {
        let mut out = Vec::with_capacity(8 + self.commands.bytes.len() + self.literals.len());
        // Writing into a Vec cannot fail.
        let _ = out.write_u32::<LittleEndian>(self.count);
        let _ = out.write_u32::<LittleEndian>(self.commands.bytes.len() as u32);
        out.extend_from_slice(&self.commands.bytes);
        out.extend_from_slice(&self.literals);
        out
    }

    /// Edit stream that turns `source` into `target` with an aligned diff:
    /// runs of equal bytes are copied, differing runs replaced, and any
    /// length difference inserted or skipped at the end.
    pub fn diff(source: &[u8], target: &[u8]) -> Vec<u8> {
        let mut writer = Self::new();
        let common = source.len().min(target.len());
        let same = |at: usize| {
            (at..common)
                .take_while(|&i| source[i] == target[i])
                .count()
        };
        let differ = |at: usize| {
            (at..common)
                .take_while(|&i| source[i] != target[i])
                .count()
        };

        let mut pos = 0;
        while pos < common {
            let run = same(pos);
            if run > 0 {
                writer.copy(run as u32);
                pos += run;
                continue;
            }

            let mismatch = differ(pos);
            let after = same(pos + mismatch);
            match (mismatch, after) {
                (1, 7..) => {
                    writer.replace_one_copy_seven(target[pos]);
                    pos += 8;
                }
                (1, 3..) => {
                    writer.replace_one_copy_three(target[pos]);
                    pos += 4;
                }
                (2, 6..) => {
                    writer.replace_two_copy_six([target[pos], target[pos + 1]]);
                    pos += 8;
                }
                _ => {
                    writer.replace(&target[pos..pos + mismatch]);
                    pos += mismatch;
                }
            }
        }

        if target.len() > common {
            writer.insert(&target[common..]);
        }
        if source.len() > common {
            writer.skip((source.len() - common) as u32);
        }
        writer.finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{EditStream, PatchEngine, PatchState};
    use proptest::prelude::*;

    fn apply(stream: &[u8], source: &[u8], dest_len: usize) -> Vec<u8> {
        let mut engine = PatchEngine::new(EditStream::parse(stream).unwrap());
        let mut dest = vec![0u8; dest_len];
        let progress = engine.apply(source, &mut dest).unwrap();
        assert_eq!(progress.state, PatchState::Finished);
        assert_eq!(progress.dest_written, dest_len);
        dest
    }

    #[test]
    fn test_length_encoding() {
        let mut writer = EditStreamWriter::new();
        writer.copy(1);
        writer.copy(0x1234);

        let stream = writer.finish();
        let parsed = EditStream::parse(&stream).unwrap();
        assert_eq!(parsed.command_count, 2);
        // copy(1): code 1 bit + width 5 bits (w = 0); copy(0x1234): 1 + 5 + 12 bits.
        assert_eq!(parsed.commands.len(), 3);
        assert!(parsed.literals.is_empty());
    }

    #[test]
    fn test_diff_uses_fixed_commands() {
        let source = b"aaaaaaaaaaaaaaaaaaaa".to_vec();
        let mut target = source.clone();
        target[0] = b'X'; //              replace1 + copy7
        target[8] = b'Y'; //              replace1 + copy3
        target[12] = b'Z';
        target[13] = b'W'; //             replace2 + copy6

        let stream = EditStreamWriter::diff(&source, &target);
        let parsed = EditStream::parse(&stream).unwrap();
        assert_eq!(parsed.literals, b"XYZW");
        assert_eq!(apply(&stream, &source, target.len()), target);
    }

    proptest! {
        #[test]
        fn diff_reconstructs_target(
            source in proptest::collection::vec(0u8..4, 0..300),
            target in proptest::collection::vec(0u8..4, 0..300),
        ) {
            let stream = EditStreamWriter::diff(&source, &target);
            prop_assert_eq!(apply(&stream, &source, target.len()), target);
        }
    }
}
