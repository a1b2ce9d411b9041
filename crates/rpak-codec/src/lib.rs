//! Streaming decoder and codecs for RPak container bodies.
//!
//! A container body is either stored, compressed with the primary codec
//! (raw DEFLATE) or with the alternate codec (Zstandard), as selected by the
//! header flags. [`StreamDecoder`] decodes a body incrementally through two
//! power-of-two ring buffers so that a loader can feed it file chunks as they
//! arrive and drain decoded bytes as it consumes them.
//!
//! # Example
//!
//! ```
//! use rpak_codec::{encode_body, DecoderConfig, StreamDecoder};
//! use rpak_format::Compression;
//!
//! let body = encode_body(Compression::Zstd, &[7u8; 1000], 3)?;
//! let mut decoder = StreamDecoder::new(Compression::Zstd, body.len() as u64, 1000, &DecoderConfig::default())?;
//!
//! decoder.push_input(&body);
//! decoder.decode_step(body.len() as u64)?;
//! assert_eq!(decoder.output(), &[7u8; 1000][..]);
//! # Ok::<(), rpak_codec::DecodeError>(())
//! ```

mod buffer;
mod codec;
mod error;
mod ring;
mod stream;

pub use buffer::{decode_container, encode_body, encode_container};
pub use codec::{effective_compression, new_codec, Codec, CodecStep, DeflateCodec, StoredCodec, ZstdCodec};
pub use error::{DecodeError, Result};
pub use ring::RingBuffer;
pub use stream::{window_for, DecoderConfig, StreamDecoder};
