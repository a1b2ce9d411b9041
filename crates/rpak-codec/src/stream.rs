//! Ring-buffered streaming decoder.

use log::{debug, trace};
use rpak_format::{Compression, PakHeader};

use crate::codec::{effective_compression, new_codec, Codec};
use crate::ring::RingBuffer;
use crate::{DecodeError, Result};

/// Window sizes for a decoder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DecoderConfig {
    pub input_window: usize,
    pub output_window: usize,
    /// Slack added to a payload size before rounding a shrunk window up.
    pub margin: usize,
}

impl Default for DecoderConfig {
    fn default() -> Self {
        Self {
            input_window: 4 << 20,
            output_window: 4 << 20,
            margin: 64,
        }
    }
}

/// Use `payload + margin` rounded to a power of two when that is smaller
/// than the default window.
pub fn window_for(payload: u64, default: usize, margin: usize) -> usize {
    let wanted = payload.saturating_add(margin as u64);
    if wanted < default as u64 {
        (wanted as usize).next_power_of_two()
    } else {
        default
    }
}

/// Decodes one container body through an input and an output ring.
///
/// Raw file bytes are pushed with [`push_input`](Self::push_input),
/// decoded by [`decode_step`](Self::decode_step) and drained with
/// [`output`](Self::output) / [`consume_output`](Self::consume_output).
/// Positions are relative to the start of the body, the first byte after
/// the header.
pub struct StreamDecoder {
    codec: Box<dyn Codec>,
    input: RingBuffer,
    output: RingBuffer,
    input_size: u64,
    expected: u64,
    finished: bool,
}

impl StreamDecoder {
    pub fn new(compression: Compression, input_size: u64, expected: u64, config: &DecoderConfig) -> Result<Self> {
        let input_window = window_for(input_size, config.input_window, config.margin);
        let output_window = window_for(expected, config.output_window, config.margin);
        trace!(
            "decoder: {} body, {input_size} -> {expected} bytes, windows {input_window}/{output_window}",
            compression.name()
        );

        Ok(Self {
            codec: new_codec(compression, expected)?,
            input: RingBuffer::new(input_window)?,
            output: RingBuffer::new(output_window)?,
            input_size,
            expected,
            finished: expected == 0,
        })
    }

    /// Decoder for the body described by a container header.
    pub fn for_header(header: &PakHeader, config: &DecoderConfig) -> Result<Self> {
        let compression = effective_compression(header);
        if compression != header.compression() {
            debug!("compressed body is as large as its decoded form, reading it as stored");
        }
        Self::new(
            compression,
            header.body_compressed_size(),
            header.body_decompressed_size(),
            config,
        )
    }

    pub fn compression(&self) -> Compression {
        self.codec.compression()
    }

    /// Free space in the input window.
    #[inline]
    pub fn input_free(&self) -> usize {
        self.input.free()
    }

    #[inline]
    pub fn input_window(&self) -> usize {
        self.input.capacity()
    }

    #[inline]
    pub fn output_window(&self) -> usize {
        self.output.capacity()
    }

    /// Body bytes pushed so far.
    #[inline]
    pub fn input_received(&self) -> u64 {
        self.input.write_position()
    }

    /// Body bytes still expected from the file.
    #[inline]
    pub fn input_outstanding(&self) -> u64 {
        self.input_size.saturating_sub(self.input.write_position())
    }

    /// Decoded bytes produced so far.
    #[inline]
    pub fn produced(&self) -> u64 {
        self.output.write_position()
    }

    #[inline]
    pub fn expected(&self) -> u64 {
        self.expected
    }

    /// All output has been produced. It may not all be drained yet.
    #[inline]
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Finished and fully drained.
    #[inline]
    pub fn is_drained(&self) -> bool {
        self.finished && self.output.is_empty()
    }

    /// Copy raw body bytes into the input window; returns how many fit.
    pub fn push_input(&mut self, bytes: &[u8]) -> usize {
        let room = self.input_outstanding().min(bytes.len() as u64) as usize;
        self.input.push(&bytes[..room])
    }

    /// Decode input up to the absolute body position `available_input_bytes`.
    ///
    /// Returns the number of bytes decoded by this call. Stops when input
    /// runs out, when the output window is full, or at end of stream.
    pub fn decode_step(&mut self, available_input_bytes: u64) -> Result<usize> {
        let mut decoded = 0;

        while !self.finished {
            let limit = available_input_bytes.min(self.input_size);
            let input = self.input.readable_until(limit);
            let input_len = input.len();
            let output = self.output.writable();
            if output.is_empty() {
                break;
            }
            let output_len = output.len();

            let step = self.codec.decode(input, output)?;
            self.input.consume(step.consumed);
            self.output.commit(step.produced);
            decoded += step.produced;

            if self.output.write_position() > self.expected {
                return Err(DecodeError::SizeMismatch {
                    expected: self.expected,
                    actual: self.output.write_position(),
                });
            }

            if step.finished {
                self.finish()?;
                break;
            }

            if step.consumed == 0 && step.produced == 0 {
                if input_len > 0 && output_len > 0 {
                    return Err(DecodeError::Stalled {
                        consumed: self.input.read_position(),
                        produced: self.output.write_position(),
                    });
                }
                if self.input.read_position() >= self.input_size {
                    // All input consumed and the codec wants more.
                    return Err(DecodeError::SizeMismatch {
                        expected: self.expected,
                        actual: self.output.write_position(),
                    });
                }
                break;
            }
        }

        Ok(decoded)
    }

    fn finish(&mut self) -> Result<()> {
        let actual = self.output.write_position();
        if actual != self.expected {
            return Err(DecodeError::SizeMismatch {
                expected: self.expected,
                actual,
            });
        }
        let slack = self.input_size - self.input.read_position();
        if slack > 0 {
            trace!("decoder: {slack} bytes of padding after end of stream");
        }
        self.finished = true;
        Ok(())
    }

    /// Decoded bytes ready to drain, contiguous up to the end of the window.
    #[inline]
    pub fn output(&self) -> &[u8] {
        self.output.readable()
    }

    #[inline]
    pub fn consume_output(&mut self, count: usize) {
        self.output.consume(count);
    }
}
