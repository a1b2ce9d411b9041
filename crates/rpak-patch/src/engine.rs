//! Applies an edit stream to a source stream.

use log::trace;
use rpak_common::{BinaryReader, BitReader};

use crate::command::{CommandTable, PatchCommand, WIDTH_BITS};
use crate::{PatchError, Result};

/// A parsed edit stream: `command_count u32`, `command_bytes u32`, the
/// command bitstream, then the literal bytes.
#[derive(Debug, Clone, Default)]
pub struct EditStream {
    pub command_count: u32,
    pub commands: Vec<u8>,
    pub literals: Vec<u8>,
}

impl EditStream {
    pub fn parse(bytes: &[u8]) -> Result<Self> {
        let mut reader = BinaryReader::new(bytes);
        let command_count = reader.read_u32()?;
        let command_bytes = reader.read_u32()? as usize;
        let commands = reader.read_bytes(command_bytes)?.to_vec();
        let literals = reader.read_bytes(reader.remaining())?.to_vec();
        Ok(Self {
            command_count,
            commands,
            literals,
        })
    }
}

/// Why [`PatchEngine::apply`] returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PatchState {
    /// The current command needs more source bytes.
    NeedSource,
    /// The destination window is full.
    NeedDestination,
    /// Every command has executed.
    Finished,
}

/// Bytes moved by one [`PatchEngine::apply`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PatchProgress {
    pub source_consumed: usize,
    pub dest_written: usize,
    pub state: PatchState,
}

/// Work left in the command being executed, in execution order.
#[derive(Debug, Clone, Copy)]
struct Pending {
    command: PatchCommand,
    insert: u64,
    replace: u64,
    skip: u64,
    copy: u64,
}

/// Source and destination windows for one apply call.
struct PatchIo<'s, 'd> {
    source: &'s [u8],
    source_pos: usize,
    dest: &'d mut [u8],
    dest_pos: usize,
}

impl PatchIo<'_, '_> {
    #[inline]
    fn source_left(&self) -> usize {
        self.source.len() - self.source_pos
    }

    #[inline]
    fn dest_left(&self) -> usize {
        self.dest.len() - self.dest_pos
    }

    #[inline]
    fn moved(&self) -> usize {
        self.source_pos + self.dest_pos
    }
}

type Handler = fn(&mut PatchEngine, &mut PatchIo<'_, '_>) -> Result<bool>;

/// One handler per command, indexed by command code.
const HANDLERS: [Handler; 7] = [
    PatchEngine::handle_copy,
    PatchEngine::handle_skip,
    PatchEngine::handle_insert,
    PatchEngine::handle_replace,
    PatchEngine::handle_replace_one_copy_three,
    PatchEngine::handle_replace_one_copy_seven,
    PatchEngine::handle_replace_two_copy_six,
];

/// Resumable edit-stream interpreter.
///
/// Each call to [`apply`](Self::apply) runs commands against the given
/// source and destination windows until one of them is exhausted or the
/// command stream ends. Partially executed commands resume on the next call.
pub struct PatchEngine {
    table: CommandTable,
    stream: EditStream,
    bit_pos: u64,
    literal_pos: usize,
    executed: u32,
    pending: Option<Pending>,
}

impl PatchEngine {
    pub fn new(stream: EditStream) -> Self {
        trace!(
            "patch: {} commands, {} command bytes, {} literal bytes",
            stream.command_count,
            stream.commands.len(),
            stream.literals.len()
        );
        Self {
            table: CommandTable::new(),
            stream,
            bit_pos: 0,
            literal_pos: 0,
            executed: 0,
            pending: None,
        }
    }

    #[inline]
    pub fn executed(&self) -> u32 {
        self.executed
    }

    #[inline]
    pub fn command_count(&self) -> u32 {
        self.stream.command_count
    }

    #[inline]
    pub fn is_finished(&self) -> bool {
        self.pending.is_none() && self.executed == self.stream.command_count
    }

    pub fn apply(&mut self, source: &[u8], dest: &mut [u8]) -> Result<PatchProgress> {
        let mut io = PatchIo {
            source,
            source_pos: 0,
            dest,
            dest_pos: 0,
        };

        let state = loop {
            let pending = match self.pending {
                Some(pending) => pending,
                None if self.executed == self.stream.command_count => break PatchState::Finished,
                None => {
                    let pending = self.decode_command()?;
                    self.pending = Some(pending);
                    pending
                }
            };

            let before = io.moved();
            let literals_before = self.literal_pos;
            if HANDLERS[pending.command as usize](self, &mut io)? {
                self.pending = None;
                self.executed += 1;
                continue;
            }

            if let Some(state) = self.blocked_on(&io) {
                break state;
            }
            if io.moved() == before && self.literal_pos == literals_before {
                return Err(PatchError::Stuck {
                    command: pending.command,
                    executed: self.executed,
                });
            }
        };

        Ok(PatchProgress {
            source_consumed: io.source_pos,
            dest_written: io.dest_pos,
            state,
        })
    }

    /// Check the engine's state once the caller has no more source to offer.
    pub fn finish_source(&self) -> Result<()> {
        if self.is_finished() {
            Ok(())
        } else {
            Err(PatchError::SourceExhausted {
                executed: self.executed,
                command_count: self.stream.command_count,
            })
        }
    }

    /// Error for commands left over once the destination is complete.
    pub fn overrun(&self) -> PatchError {
        PatchError::Overrun {
            remaining: self.stream.command_count - self.executed,
        }
    }

    /// Error for a command stream that ended before the destination was complete.
    pub fn incomplete_destination(&self) -> PatchError {
        self.truncated("destination")
    }

    fn truncated(&self, stream: &'static str) -> PatchError {
        PatchError::Truncated {
            stream,
            executed: self.executed,
            command_count: self.stream.command_count,
        }
    }

    fn decode_command(&mut self) -> Result<Pending> {
        let mut bits = BitReader::new_at(&self.stream.commands, self.bit_pos);
        if bits.remaining_bits() == 0 {
            return Err(self.truncated("command stream"));
        }

        let (command, len) = self.table.lookup(bits.peek(crate::command::PEEK_BITS));
        let length = bits.consume(len).and_then(|()| {
            if command.has_length() {
                let width = bits.read(WIDTH_BITS)?;
                let value = bits.read(width)?;
                Ok((1u64 << width) + u64::from(value))
            } else {
                Ok(0)
            }
        });
        let length = length.map_err(|_| self.truncated("command stream"))?;
        self.bit_pos = bits.position();

        let mut pending = Pending {
            command,
            insert: 0,
            replace: command.fixed_literals(),
            skip: 0,
            copy: command.fixed_copy(),
        };
        match command {
            PatchCommand::Copy => pending.copy = length,
            PatchCommand::Skip => pending.skip = length,
            PatchCommand::Insert => pending.insert = length,
            PatchCommand::Replace => pending.replace = length,
            _ => {}
        }
        Ok(pending)
    }

    fn blocked_on(&self, io: &PatchIo<'_, '_>) -> Option<PatchState> {
        let pending = self.pending?;
        let (needs_dest, needs_source) = if pending.insert > 0 {
            (true, false)
        } else if pending.replace > 0 {
            (true, true)
        } else if pending.skip > 0 {
            (false, true)
        } else {
            (true, true)
        };

        if needs_dest && io.dest_left() == 0 {
            Some(PatchState::NeedDestination)
        } else if needs_source && io.source_left() == 0 {
            Some(PatchState::NeedSource)
        } else {
            None
        }
    }

    fn pending_mut(&mut self) -> &mut Pending {
        // Handlers only run while a command is pending.
        self.pending.get_or_insert(Pending {
            command: PatchCommand::Copy,
            insert: 0,
            replace: 0,
            skip: 0,
            copy: 0,
        })
    }

    fn copy_source(&mut self, io: &mut PatchIo<'_, '_>) -> bool {
        let left = self.pending_mut().copy;
        let n = (left.min(io.source_left() as u64) as usize).min(io.dest_left());
        io.dest[io.dest_pos..io.dest_pos + n].copy_from_slice(&io.source[io.source_pos..io.source_pos + n]);
        io.source_pos += n;
        io.dest_pos += n;
        self.pending_mut().copy -= n as u64;
        self.pending_mut().copy == 0
    }

    fn skip_source(&mut self, io: &mut PatchIo<'_, '_>) -> bool {
        let left = self.pending_mut().skip;
        let n = left.min(io.source_left() as u64) as usize;
        io.source_pos += n;
        self.pending_mut().skip -= n as u64;
        self.pending_mut().skip == 0
    }

    /// Write pending literals; with `consume_source` each literal also
    /// discards one source byte.
    fn write_literals(&mut self, io: &mut PatchIo<'_, '_>, consume_source: bool) -> Result<bool> {
        let left = if consume_source {
            self.pending_mut().replace
        } else {
            self.pending_mut().insert
        };

        let mut n = left.min(io.dest_left() as u64) as usize;
        if consume_source {
            n = n.min(io.source_left());
        }
        let available = self.stream.literals.len() - self.literal_pos;
        if n > available {
            return Err(self.truncated("literal stream"));
        }

        let literals = &self.stream.literals[self.literal_pos..self.literal_pos + n];
        io.dest[io.dest_pos..io.dest_pos + n].copy_from_slice(literals);
        io.dest_pos += n;
        self.literal_pos += n;
        if consume_source {
            io.source_pos += n;
        }

        let pending = self.pending_mut();
        let counter = if consume_source { &mut pending.replace } else { &mut pending.insert };
        *counter -= n as u64;
        Ok(*counter == 0)
    }

    fn handle_copy(&mut self, io: &mut PatchIo<'_, '_>) -> Result<bool> {
        Ok(self.copy_source(io))
    }

    fn handle_skip(&mut self, io: &mut PatchIo<'_, '_>) -> Result<bool> {
        Ok(self.skip_source(io))
    }

    fn handle_insert(&mut self, io: &mut PatchIo<'_, '_>) -> Result<bool> {
        self.write_literals(io, false)
    }

    fn handle_replace(&mut self, io: &mut PatchIo<'_, '_>) -> Result<bool> {
        self.write_literals(io, true)
    }

    fn handle_replace_one_copy_three(&mut self, io: &mut PatchIo<'_, '_>) -> Result<bool> {
        self.replace_then_copy(io)
    }

    fn handle_replace_one_copy_seven(&mut self, io: &mut PatchIo<'_, '_>) -> Result<bool> {
        self.replace_then_copy(io)
    }

    fn handle_replace_two_copy_six(&mut self, io: &mut PatchIo<'_, '_>) -> Result<bool> {
        self.replace_then_copy(io)
    }

    fn replace_then_copy(&mut self, io: &mut PatchIo<'_, '_>) -> Result<bool> {
        if self.pending_mut().replace > 0 && !self.write_literals(io, true)? {
            return Ok(false);
        }
        Ok(self.copy_source(io))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::writer::EditStreamWriter;

    /// Run `stream` over `source`, feeding source in `src_chunk` pieces and
    /// destination windows of `dst_chunk` bytes, into a buffer of `dest_len`.
    fn run(stream: Vec<u8>, source: &[u8], dest_len: usize, src_chunk: usize, dst_chunk: usize) -> Result<Vec<u8>> {
        let mut engine = PatchEngine::new(EditStream::parse(&stream)?);
        let mut dest = vec![0u8; dest_len];
        let mut src_pos = 0;
        let mut dst_pos = 0;

        loop {
            let src_end = (src_pos + src_chunk).min(source.len());
            let dst_end = (dst_pos + dst_chunk).min(dest_len);
            let progress = engine.apply(&source[src_pos..src_end], &mut dest[dst_pos..dst_end])?;
            src_pos += progress.source_consumed;
            dst_pos += progress.dest_written;

            match progress.state {
                PatchState::Finished => {
                    if dst_pos < dest_len {
                        return Err(engine.incomplete_destination());
                    }
                    return Ok(dest);
                }
                PatchState::NeedSource if src_pos == source.len() => {
                    engine.finish_source()?;
                }
                PatchState::NeedDestination if dst_pos == dest_len => return Err(engine.overrun()),
                _ => {}
            }
        }
    }

    #[test]
    fn test_every_command() {
        let source = b"0123456789abcdefghijklmnopqrstuvwxyz";
        let mut writer = EditStreamWriter::new();
        writer.copy(4); //          0123
        writer.skip(2); //          drop 45
        writer.insert(b"++"); //    ++
        writer.replace(b"XY"); //   67 -> XY
        writer.replace_one_copy_three(b'!'); //   8 -> !, copy 9ab
        writer.replace_one_copy_seven(b'?'); //   c -> ?, copy defghij
        writer.replace_two_copy_six(*b"<>"); //   kl -> <>, copy mnopqr
        writer.copy(2); //          st

        let expected = b"0123++XY!9ab?defghij<>mnopqrst";
        let out = run(writer.finish(), source, expected.len(), 64, 64).unwrap();
        assert_eq!(out, expected);
    }

    #[test]
    fn test_resumes_across_tiny_windows() {
        let source: Vec<u8> = (0..200u8).collect();
        let mut target = source.clone();
        target[10] = 0xEE;
        target[50..60].copy_from_slice(&[0xAB; 10]);
        target.extend_from_slice(b"tail");

        let stream = EditStreamWriter::diff(&source, &target);
        for (src_chunk, dst_chunk) in [(1, 1), (3, 7), (200, 1), (1, 300)] {
            let out = run(stream.clone(), &source, target.len(), src_chunk, dst_chunk).unwrap();
            assert_eq!(out, target, "windows {src_chunk}/{dst_chunk}");
        }
    }

    #[test]
    fn test_truncated_command_stream() {
        let mut writer = EditStreamWriter::new();
        writer.copy(4);
        let mut stream = writer.finish();
        // Claim one more command than the bitstream holds.
        stream[0] = 2;

        let result = run(stream, b"abcdefgh", 8, 8, 8);
        assert!(matches!(
            result,
            Err(PatchError::Truncated { stream: "command stream", executed: 1, .. })
        ));
    }

    #[test]
    fn test_truncated_literal_stream() {
        let mut writer = EditStreamWriter::new();
        writer.insert(b"abcd");
        let mut stream = writer.finish();
        stream.truncate(stream.len() - 2);

        let result = run(stream, b"", 4, 1, 4);
        assert!(matches!(
            result,
            Err(PatchError::Truncated { stream: "literal stream", executed: 0, .. })
        ));
    }

    #[test]
    fn test_source_exhausted() {
        let mut writer = EditStreamWriter::new();
        writer.copy(10);
        let result = run(writer.finish(), b"short", 10, 2, 10);
        assert!(matches!(
            result,
            Err(PatchError::SourceExhausted { executed: 0, command_count: 1 })
        ));
    }

    #[test]
    fn test_destination_left_incomplete() {
        let mut writer = EditStreamWriter::new();
        writer.copy(3);
        let result = run(writer.finish(), b"abcdef", 6, 6, 6);
        assert!(matches!(result, Err(PatchError::Truncated { stream: "destination", .. })));
    }

    #[test]
    fn test_overrun() {
        let mut writer = EditStreamWriter::new();
        writer.copy(3);
        writer.insert(b"zz");
        let result = run(writer.finish(), b"abc", 3, 3, 3);
        assert!(matches!(result, Err(PatchError::Overrun { remaining: 1 })));
    }

    #[test]
    fn test_trailing_skip_needs_no_destination() {
        let mut writer = EditStreamWriter::new();
        writer.copy(2);
        writer.skip(4);
        let out = run(writer.finish(), b"abcdef", 2, 6, 2).unwrap();
        assert_eq!(out, b"ab");
    }
}
