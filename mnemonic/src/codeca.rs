//! CodecA (TLG) lossless image decoder. Only the TLG5 variant is implemented;
//! TLG6 is detected and rejected with [`Error::NotImplemented`].

use snafu::prelude::*;

use crate::lzss;

const TLG5_MAGIC: &[u8; 11] = b"TLG5.0\0raw\x1A";
const TLG6_MAGIC: &[u8; 11] = b"TLG6.0\0raw\x1A";
const HEADER_SIZE: usize = 24;

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("not a recognized CodecA stream (bad magic)"))]
    InvalidMagic,

    #[snafu(display("CodecA header invalid: {reason}"))]
    InvalidHeader { reason: String },

    #[snafu(display("CodecA input truncated"))]
    TruncatedInput,

    #[snafu(display("CodecA stream used an unsupported block-mark byte ({mark})"))]
    UnsupportedBlockMark { mark: u8 },

    #[snafu(display("TLG6 is not implemented"))]
    NotImplemented,

    #[snafu(display("failed to inflate block payload"), context(false))]
    Lzss { source: lzss::Error },
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Image {
    pub width: u32,
    pub height: u32,
    pub channels: u8,
    /// Interleaved RGB or RGBA samples, row-major.
    pub pixels: Vec<u8>,
}

struct Header {
    channels: u8,
    width: u32,
    height: u32,
    block_height: u32,
}

fn parse_header(input: &[u8]) -> Result<Header> {
    if input.len() < 11 {
        return TruncatedInputSnafu.fail();
    }
    if &input[0..11] == TLG6_MAGIC {
        return NotImplementedSnafu.fail();
    }
    if &input[0..11] != TLG5_MAGIC {
        return InvalidMagicSnafu.fail();
    }
    if input.len() < HEADER_SIZE {
        return TruncatedInputSnafu.fail();
    }

    let depth = input[11];
    let channels = if depth == 24 { 3 } else { 4 };
    let width = u32::from_le_bytes(input[12..16].try_into().unwrap());
    let height = u32::from_le_bytes(input[16..20].try_into().unwrap());
    let block_height = u32::from_le_bytes(input[20..24].try_into().unwrap());

    ensure!(
        width > 0 && height > 0,
        InvalidHeaderSnafu {
            reason: "zero width or height".to_string(),
        }
    );
    ensure!(
        block_height > 0,
        InvalidHeaderSnafu {
            reason: "zero block height".to_string(),
        }
    );

    Ok(Header {
        channels,
        width,
        height,
        block_height,
    })
}

/// Decodes a TLG5 ("CodecA") stream into an interleaved RGB/RGBA image.
pub fn decode(input: &[u8]) -> Result<Image> {
    let header = parse_header(input)?;
    let width = header.width as usize;
    let height = header.height as usize;
    let channels = header.channels as usize;
    let block_height = header.block_height as usize;

    let block_count = height.div_ceil(block_height);

    // One plane per channel, each holding `height` rows of `width` bytes.
    let mut planes: Vec<Vec<u8>> = vec![vec![0u8; width * height]; channels];

    let mut pos = HEADER_SIZE;
    let mut read = |pos: &mut usize, n: usize| -> Result<&[u8]> {
        let end = pos.checked_add(n).context(TruncatedInputSnafu)?;
        let slice = input.get(*pos..end).context(TruncatedInputSnafu)?;
        *pos = end;
        Ok(slice)
    };

    for b in 0..block_count {
        let row_start = b * block_height;
        let rows_in_block = block_height.min(height - row_start);

        for plane in planes.iter_mut().take(channels) {
            let mark = read(&mut pos, 1)?[0];
            ensure!(mark == 0, UnsupportedBlockMarkSnafu { mark });

            let size_bytes = read(&mut pos, 4)?;
            let size = u32::from_le_bytes(size_bytes.try_into().unwrap()) as usize;

            let payload = read(&mut pos, size)?;
            let decoded = lzss::decode(payload, width * rows_in_block)?;

            reverse_delta(plane, &decoded, width, row_start, rows_in_block);
        }
    }

    let mut pixels = Vec::with_capacity(width * height * channels);
    for i in 0..width * height {
        // Stored channel order is BGR(A); reassemble as RGB(A).
        pixels.push(planes[2][i]);
        pixels.push(planes[1][i]);
        pixels.push(planes[0][i]);
        if channels == 4 {
            pixels.push(planes[3][i]);
        }
    }

    Ok(Image {
        width: header.width,
        height: header.height,
        channels: header.channels,
        pixels,
    })
}

/// Reverses the per-row delta coding of one channel's block into `plane`,
/// which holds absolute sample values for the whole image.
fn reverse_delta(plane: &mut [u8], deltas: &[u8], width: usize, row_start: usize, rows: usize) {
    for r in 0..rows {
        let y = row_start + r;
        let row = &deltas[r * width..(r + 1) * width];
        for x in 0..width {
            let delta = row[x];
            let value = if x == 0 {
                if y == 0 {
                    delta
                } else {
                    let prev_row_first = plane[(y - 1) * width];
                    prev_row_first.wrapping_add(delta)
                }
            } else {
                let same_row_prev = plane[y * width + x - 1];
                same_row_prev.wrapping_add(delta)
            };
            plane[y * width + x] = value;
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn lzss_literal_stream(bytes: &[u8]) -> Vec<u8> {
        // Encodes `bytes` as all-literal LZSS groups (flag byte 0x00 per
        // group of up to 8 bytes), matching what a real encoder would need
        // to emit for our decoder to reproduce `bytes` unchanged.
        let mut out = Vec::new();
        for chunk in bytes.chunks(8) {
            out.push(0x00u8);
            out.extend_from_slice(chunk);
        }
        out
    }

    fn build_stream(width: u32, height: u32, channels: u8, block_height: u32, block_deltas: &[&[u8]]) -> Vec<u8> {
        let mut stream = Vec::new();
        stream.extend_from_slice(TLG5_MAGIC);
        stream.push(if channels == 3 { 24 } else { 32 });
        stream.extend_from_slice(&width.to_le_bytes());
        stream.extend_from_slice(&height.to_le_bytes());
        stream.extend_from_slice(&block_height.to_le_bytes());

        for deltas in block_deltas {
            let payload = lzss_literal_stream(deltas);
            stream.push(0); // block mark
            stream.extend_from_slice(&(payload.len() as u32).to_le_bytes());
            stream.extend_from_slice(&payload);
        }
        stream
    }

    #[test]
    fn rejects_bad_magic() {
        let err = decode(b"not a tlg stream at all!!").unwrap_err();
        assert!(matches!(err, Error::InvalidMagic));
    }

    #[test]
    fn rejects_tlg6_as_not_implemented() {
        let mut stream = Vec::new();
        stream.extend_from_slice(TLG6_MAGIC);
        stream.extend_from_slice(&[0u8; HEADER_SIZE - 11]);
        let err = decode(&stream).unwrap_err();
        assert!(matches!(err, Error::NotImplemented));
    }

    #[test]
    fn decodes_uniform_2x2_rgba() {
        // All samples identical (R=255,G=128,B=64,A=255); first row is
        // absolute, second row's deltas are zero (repeats first row).
        // Stored channel order is B, G, R, A.
        let b_block: &[u8] = &[64, 0, 64, 0];
        let g_block: &[u8] = &[128, 0, 128, 0];
        let r_block: &[u8] = &[255, 0, 255, 0];
        let a_block: &[u8] = &[255, 0, 255, 0];

        let stream = build_stream(2, 2, 4, 2, &[b_block, g_block, r_block, a_block]);
        let image = decode(&stream).unwrap();

        assert_eq!(image.width, 2);
        assert_eq!(image.height, 2);
        assert_eq!(image.channels, 4);
        for px in image.pixels.chunks(4) {
            assert_eq!(px, &[255, 128, 64, 255]);
        }
    }

    #[test]
    fn non_multiple_height_has_short_final_block() {
        // height=3, block_height=2 => blocks of 2 then 1 row.
        let b0: &[u8] = &[10, 0, 10, 0];
        let b1: &[u8] = &[10, 0];
        let stream = build_stream(2, 3, 3, 2, &[b0, b0, b0, b1, b1, b1]);
        let image = decode(&stream).unwrap();
        assert_eq!(image.height, 3);
        assert_eq!(image.pixels.len(), 2 * 3 * 3);
    }

    #[test]
    fn rejects_nonzero_block_mark() {
        let mut stream = Vec::new();
        stream.extend_from_slice(TLG5_MAGIC);
        stream.push(24);
        stream.extend_from_slice(&1u32.to_le_bytes());
        stream.extend_from_slice(&1u32.to_le_bytes());
        stream.extend_from_slice(&1u32.to_le_bytes());
        stream.push(1); // nonzero block mark
        stream.extend_from_slice(&0u32.to_le_bytes());
        let err = decode(&stream).unwrap_err();
        assert!(matches!(err, Error::UnsupportedBlockMark { mark: 1 }));
    }
}
