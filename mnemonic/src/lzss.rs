//! 4096-byte sliding-window LZSS decoder used by the CodecA block format.

use snafu::prelude::*;

const WINDOW_SIZE: usize = 4096;
const MIN_MATCH: usize = 3;
const MAX_MATCH: usize = 18;

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("lzss input truncated before {output_size} bytes of output were produced"))]
    TruncatedInput { output_size: usize },
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Decompresses `input` to exactly `output_size` bytes.
///
/// Stops reading as soon as `output_size` bytes have been produced; any
/// remaining bits in the current flag byte are ignored.
pub fn decode(input: &[u8], output_size: usize) -> Result<Vec<u8>> {
    let mut window = [0u8; WINDOW_SIZE];
    let mut write_pos: usize = 0;
    let mut output = Vec::with_capacity(output_size);
    let mut pos: usize = 0;

    let mut next_byte = |pos: &mut usize| -> Result<u8> {
        let byte = *input
            .get(*pos)
            .context(TruncatedInputSnafu { output_size })?;
        *pos += 1;
        Ok(byte)
    };

    'outer: while output.len() < output_size {
        let flags = next_byte(&mut pos)?;
        for bit in 0..8 {
            if output.len() >= output_size {
                break 'outer;
            }
            if flags & (1 << bit) == 0 {
                let byte = next_byte(&mut pos)?;
                output.push(byte);
                window[write_pos] = byte;
                write_pos = (write_pos + 1) % WINDOW_SIZE;
            } else {
                let l = next_byte(&mut pos)? as usize;
                let h = next_byte(&mut pos)? as usize;
                let offset = l | ((h & 0x0F) << 8);
                let mut length = ((h >> 4) & 0x0F) + MIN_MATCH;
                if length == MAX_MATCH {
                    length += next_byte(&mut pos)? as usize;
                }

                let mut read_pos = offset;
                for _ in 0..length {
                    if output.len() >= output_size {
                        break;
                    }
                    let byte = window[read_pos];
                    output.push(byte);
                    window[write_pos] = byte;
                    read_pos = (read_pos + 1) % WINDOW_SIZE;
                    write_pos = (write_pos + 1) % WINDOW_SIZE;
                }
            }
        }
    }

    Ok(output)
}

#[cfg(test)]
mod test {
    use super::*;

    macro_rules! assert_error {
        ($result:expr, $error:ident) => {
            match $result {
                Err(Error::$error { .. }) => {}
                other => panic!("expected Error::{}, got {:?}", stringify!($error), other),
            }
        };
    }

    #[test]
    fn zero_output_reads_nothing() {
        let out = decode(&[], 0).unwrap();
        assert!(out.is_empty());
    }

    #[test]
    fn all_literals() {
        // flag byte 0x00: eight literal bits
        let input = [0x00u8, b'a', b'b', b'c', b'd', b'e', b'f', b'g', b'h'];
        let out = decode(&input, 8).unwrap();
        assert_eq!(out, b"abcdefgh");
    }

    #[test]
    fn mixed_literal_groups() {
        // Two literal flag-bytes back to back; decoding stops mid-group
        // once output_size is reached.
        let mut input = vec![0x00u8];
        input.extend_from_slice(b"12345678");
        input.push(0x00u8);
        input.push(b'A');
        input.push(b'B');
        let out = decode(&input, 10).unwrap();
        assert_eq!(out, b"12345678AB");
    }

    #[test]
    fn truncated_input_errors() {
        let result = decode(&[0x00u8, b'a'], 4);
        assert_error!(result, TruncatedInput);
    }

    #[test]
    fn self_referential_run_length_expansion() {
        // Write one literal byte, then a match whose offset points at the
        // byte we just wrote (write_pos - 1), extending it several times.
        let mut input = vec![0x01u8]; // bit0 literal, bit1 match
        input.push(b'x');
        // offset = 0 (the byte just written sits at window[0]), length = 5
        let l = 0u8;
        let h = ((5 - MIN_MATCH as u8) << 4) & 0xF0;
        input.push(l);
        input.push(h);
        let out = decode(&input, 6).unwrap();
        assert_eq!(out, b"xxxxxx");
    }
}
