//! Whole-buffer conversion between compressed and decoded containers.

use std::io::Write;

use flate2::write::DeflateEncoder;
use log::debug;
use rpak_format::{Compression, FormatError, FormatLimits, PakHeader};
use zerocopy::IntoBytes;

use crate::stream::{DecoderConfig, StreamDecoder};
use crate::{DecodeError, Result};

/// Compress a container body with `compression`.
pub fn encode_body(compression: Compression, data: &[u8], level: u32) -> Result<Vec<u8>> {
    let map_err = |codec: &'static str| {
        move |e: std::io::Error| DecodeError::Codec {
            codec,
            message: e.to_string(),
        }
    };

    match compression {
        Compression::Stored => Ok(data.to_vec()),
        Compression::Deflate => {
            let mut encoder = DeflateEncoder::new(Vec::new(), flate2::Compression::new(level.min(9)));
            encoder.write_all(data).map_err(map_err("deflate"))?;
            encoder.finish().map_err(map_err("deflate"))
        }
        Compression::Zstd => zstd::encode_all(data, level as i32).map_err(map_err("zstd")),
    }
}

/// Decode a whole container file into its uncompressed form.
///
/// The returned header has the compression flags cleared and its
/// compressed size set to the decompressed size. Embedded streaming data
/// after the body is carried over with its offsets adjusted.
pub fn decode_container(file: &[u8], limits: &FormatLimits, config: &DecoderConfig) -> Result<Vec<u8>> {
    let mut header = PakHeader::read(file)?;
    header.validate(limits)?;
    let body_end = checked_body_end(file, &header)?;

    let mut decoder = StreamDecoder::for_header(&header, config)?;
    let mut out = Vec::with_capacity(header.decompressed_size as usize + (file.len() - body_end));
    out.extend_from_slice(header.as_bytes());

    let body = &file[PakHeader::SIZE..body_end];
    let mut fed = 0;
    while !decoder.is_drained() {
        fed += decoder.push_input(&body[fed..]);
        let decoded = decoder.decode_step(fed as u64)?;

        let mut drained = 0;
        loop {
            let ready = decoder.output();
            if ready.is_empty() {
                break;
            }
            let len = ready.len();
            out.extend_from_slice(ready);
            decoder.consume_output(len);
            drained += len;
        }

        if decoded == 0 && drained == 0 && fed == body.len() && !decoder.is_finished() {
            return Err(DecodeError::SizeMismatch {
                expected: decoder.expected(),
                actual: decoder.produced(),
            });
        }
    }

    let decompressed_size = header.decompressed_size;
    rebase_embedded(&mut header, decompressed_size);
    header.set_compression(Compression::Stored);
    out[..PakHeader::SIZE].copy_from_slice(header.as_bytes());
    out.extend_from_slice(&file[body_end..]);

    debug!(
        "decoded container: {} -> {} bytes",
        file.len(),
        out.len()
    );
    Ok(out)
}

/// Compress the body of a decoded container.
///
/// A body that does not shrink is kept stored so the sizes stay
/// distinguishable from a compressed body.
pub fn encode_container(decoded: &[u8], compression: Compression, level: u32, limits: &FormatLimits) -> Result<Vec<u8>> {
    let mut header = PakHeader::read(decoded)?;
    header.validate(limits)?;
    if header.compression() != Compression::Stored || header.compressed_size != header.decompressed_size {
        return Err(DecodeError::Codec {
            codec: compression.name(),
            message: "input container is not in decoded form".to_string(),
        });
    }
    let body_end = checked_body_end(decoded, &header)?;
    let body = &decoded[PakHeader::SIZE..body_end];

    let mut encoded = encode_body(compression, body, level)?;
    let mut effective = compression;
    if encoded.len() >= body.len() {
        debug!("{} body did not shrink, storing it", compression.name());
        encoded = body.to_vec();
        effective = Compression::Stored;
    }

    let compressed_size = (PakHeader::SIZE + encoded.len()) as u64;
    rebase_embedded(&mut header, compressed_size);
    header.set_compression(effective);

    let mut out = Vec::with_capacity(compressed_size as usize + (decoded.len() - body_end));
    out.extend_from_slice(header.as_bytes());
    out.extend_from_slice(&encoded);
    out.extend_from_slice(&decoded[body_end..]);
    Ok(out)
}

fn checked_body_end(file: &[u8], header: &PakHeader) -> Result<usize> {
    if (file.len() as u64) < header.compressed_size {
        return Err(FormatError::SizeMismatch {
            what: "container file",
            expected: header.compressed_size,
            actual: file.len() as u64,
        }
        .into());
    }
    Ok(header.compressed_size as usize)
}

/// Move embedded streaming offsets so they follow a body ending at `body_end`.
fn rebase_embedded(header: &mut PakHeader, body_end: u64) {
    let old_end = header.compressed_size;
    if header.embedded_size > 0 {
        header.embedded_offset = header.embedded_offset - old_end + body_end;
    }
    if header.embedded_opt_size > 0 {
        header.embedded_opt_offset = header.embedded_opt_offset - old_end + body_end;
    }
    header.compressed_size = body_end;
}

#[cfg(test)]
mod tests {
    use super::*;
    use rpak_format::{PakBuilder, SegmentKind};

    fn sample_container() -> Vec<u8> {
        let mut builder = PakBuilder::new();
        let head = builder.add_segment(SegmentKind::Head, 8);
        let cpu = builder.add_segment(SegmentKind::Cpu, 8);
        builder.add_page(head, 8, b"asset header bytes ".repeat(40));
        builder.add_page(cpu, 8, vec![0x5A; 3000]);
        builder.embed_streaming(vec![1, 2, 3, 4], vec![5, 6]);
        builder.build()
    }

    #[test]
    fn test_container_round_trip_both_codecs() {
        let decoded = sample_container();
        let limits = FormatLimits::default();

        for compression in [Compression::Deflate, Compression::Zstd] {
            let encoded = encode_container(&decoded, compression, 6, &limits).unwrap();
            let header = PakHeader::read(&encoded).unwrap();
            assert_eq!(header.compression(), compression);
            assert!(header.compressed_size < header.decompressed_size);
            assert_eq!(&encoded[header.embedded_offset as usize..][..4], &[1, 2, 3, 4]);
            assert_eq!(&encoded[header.embedded_opt_offset as usize..][..2], &[5, 6]);

            let restored = decode_container(&encoded, &limits, &DecoderConfig::default()).unwrap();
            assert_eq!(restored, decoded);
        }
    }

    #[test]
    fn test_incompressible_body_stays_stored() {
        let mut builder = PakBuilder::new();
        let head = builder.add_segment(SegmentKind::Head, 1);
        let noise: Vec<u8> = (0..64u32).map(|i| (i.wrapping_mul(2654435761) >> 13) as u8).collect();
        builder.add_page(head, 1, noise);
        let decoded = builder.build();

        let encoded = encode_container(&decoded, Compression::Zstd, 3, &FormatLimits::default()).unwrap();
        let header = PakHeader::read(&encoded).unwrap();
        if header.compression() == Compression::Stored {
            assert_eq!(encoded, decoded);
        } else {
            assert!(header.compressed_size < header.decompressed_size);
        }
    }

    #[test]
    fn test_flagged_compressed_with_equal_sizes_decodes_as_stored() {
        let decoded = sample_container();
        let mut flagged = decoded.clone();
        let mut header = PakHeader::read(&flagged).unwrap();
        header.set_compression(Compression::Deflate);
        flagged[..PakHeader::SIZE].copy_from_slice(header.as_bytes());

        let restored = decode_container(&flagged, &FormatLimits::default(), &DecoderConfig::default()).unwrap();
        assert_eq!(restored, decoded);
    }

    #[test]
    fn test_truncated_file_is_rejected() {
        let decoded = sample_container();
        let encoded = encode_container(&decoded, Compression::Deflate, 6, &FormatLimits::default()).unwrap();
        let header = PakHeader::read(&encoded).unwrap();
        let cut = &encoded[..header.compressed_size as usize - 1];
        assert!(matches!(
            decode_container(cut, &FormatLimits::default(), &DecoderConfig::default()),
            Err(DecodeError::Format(FormatError::SizeMismatch { .. }))
        ));
    }
}
