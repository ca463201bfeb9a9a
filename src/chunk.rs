use std::io::{self, BufRead};

use crate::error::HostCopyError;

// 16 hex digits already cover u64::MAX.
const MAX_CHUNK_SIZE_DIGITS: usize = 16;
const MAX_CHUNK_LINE_PADDING: usize = 64;

/// Reads one `<hex-size>\r\n` line and returns the size.
///
/// Trailing spaces or tabs before the CRLF are tolerated; chunk extensions are
/// not.
pub fn parse_chunk_size<R: BufRead + ?Sized>(source: &mut R) -> Result<u64, HostCopyError> {
    let mut size = 0_u64;
    let mut digits = 0_usize;
    let mut padding = 0_usize;

    loop {
        let byte = next_byte(source)?;
        match byte {
            b'\r' => break,
            b' ' | b'\t' if digits > 0 => {
                padding += 1;
                if padding > MAX_CHUNK_LINE_PADDING {
                    return Err(HostCopyError::invalid_chunk_size(
                        "too much whitespace after chunk size",
                    ));
                }
            }
            _ if padding > 0 => {
                return Err(HostCopyError::invalid_chunk_size(format!(
                    "unexpected byte {byte:#04x} after chunk size"
                )));
            }
            _ => {
                let Some(value) = (byte as char).to_digit(16) else {
                    return Err(HostCopyError::invalid_chunk_size(format!(
                        "unexpected byte {byte:#04x} in chunk size"
                    )));
                };
                digits += 1;
                if digits > MAX_CHUNK_SIZE_DIGITS {
                    return Err(HostCopyError::invalid_chunk_size("chunk size overflows u64"));
                }
                size = (size << 4) | u64::from(value);
            }
        }
    }

    if digits == 0 {
        return Err(HostCopyError::invalid_chunk_size("empty chunk size"));
    }
    match next_byte(source)? {
        b'\n' => Ok(size),
        other => Err(HostCopyError::invalid_chunk_size(format!(
            "expected lf after chunk size, found {other:#04x}"
        ))),
    }
}

fn next_byte<R: BufRead + ?Sized>(source: &mut R) -> Result<u8, HostCopyError> {
    loop {
        let next = match source.fill_buf() {
            Ok(buffer) => buffer.first().copied(),
            Err(error) if error.kind() == io::ErrorKind::Interrupted => continue,
            Err(source) => return Err(HostCopyError::ReadBody { source }),
        };
        let Some(byte) = next else {
            return Err(HostCopyError::ReadBody {
                source: io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "stream ended inside chunk size line",
                ),
            });
        };
        source.consume(1);
        return Ok(byte);
    }
}
