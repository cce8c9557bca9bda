//! Device side of the framed line codec.

use std::io::{self, BufRead, Write};

use tether_proto::{chunk_lines, decode_line, wire};

/// Sends `payload` as one frame. The host does not acknowledge.
pub fn send_frame(w: &mut impl Write, payload: &[u8]) -> io::Result<()> {
    w.write_all(wire::FRAME_START.as_bytes())?;
    w.write_all(b"\n")?;
    for line in chunk_lines(payload) {
        w.write_all(line.as_bytes())?;
    }
    w.write_all(wire::FRAME_END.as_bytes())?;
    w.write_all(b"\n")?;
    w.flush()
}

/// Receives one frame, acknowledging the start marker and every chunk with
/// `.` and the end marker with `\n`.
///
/// Each chunk is decoded before it is acknowledged. A chunk that fails to
/// decode is still acknowledged so the sender stays in step, and the whole
/// frame is reported as [`io::ErrorKind::InvalidData`] once its end marker
/// arrives. Lines before the start marker are ignored. End of input is
/// [`io::ErrorKind::UnexpectedEof`].
pub fn recv_frame(r: &mut impl BufRead, w: &mut impl Write) -> io::Result<Vec<u8>> {
    let mut line = Vec::new();
    loop {
        next_line(r, &mut line)?;
        if line.trim_ascii() == wire::FRAME_START.as_bytes() {
            ack(w, wire::ACK)?;
            break;
        }
    }
    let mut payload = Vec::new();
    let mut bad = None;
    loop {
        next_line(r, &mut line)?;
        let text = line.trim_ascii();
        if text == wire::FRAME_END.as_bytes() {
            ack(w, wire::ACK_END)?;
            return match bad {
                None => Ok(payload),
                Some(e) => Err(e),
            };
        }
        match decode_line(text) {
            Ok(chunk) => payload.extend_from_slice(&chunk),
            Err(e) => {
                bad.get_or_insert(e);
            }
        }
        ack(w, wire::ACK)?;
    }
}

fn next_line(r: &mut impl BufRead, line: &mut Vec<u8>) -> io::Result<()> {
    line.clear();
    if r.read_until(b'\n', line)? == 0 {
        return Err(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            "console closed",
        ));
    }
    Ok(())
}

fn ack(w: &mut impl Write, byte: u8) -> io::Result<()> {
    w.write_all(&[byte])?;
    w.flush()
}
