//! Base64 chunk lines: the body of a frame.

use std::io;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;

/// Maximum raw bytes carried by one chunk line.
pub const CHUNK_SIZE: usize = 90;

/// Splits `payload` into base64 chunk lines, each terminated by `\n`.
///
/// An empty payload yields no lines.
pub fn chunk_lines(payload: &[u8]) -> impl Iterator<Item = String> + '_ {
    payload.chunks(CHUNK_SIZE).map(|chunk| {
        let mut line = BASE64.encode(chunk);
        line.push('\n');
        line
    })
}

/// Decodes one chunk line, ignoring surrounding whitespace.
pub fn decode_line(line: &[u8]) -> io::Result<Vec<u8>> {
    BASE64
        .decode(line.trim_ascii())
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
}
