//! pkt-line helpers for the single command line of the daemon protocol.

use std::io::{self, Read, Write};

use gix_packetline_blocking as pkt;

pub use pkt::{PacketLineRef, StreamingPeekableIter as PktIter};

/// Read the one framed command line a daemon client sends first.
///
/// The trailing newline is removed and so is everything from the first NUL byte on, which is where
/// clients put the `host=` header and other extensions we do not interpret.
/// Returns `Ok(None)` if the client sent a flush packet, no valid UTF-8, or nothing at all.
pub fn read_command_line<R: Read>(input: R) -> io::Result<Option<String>> {
    let mut lines = PktIter::new(input, &[PacketLineRef::Flush], false);
    let line = match lines.read_line() {
        None => return Ok(None),
        Some(Err(err)) if err.kind() == io::ErrorKind::UnexpectedEof => return Ok(None),
        Some(Err(err)) => return Err(err),
        Some(Ok(Err(err))) => return Err(io::Error::new(io::ErrorKind::InvalidData, err)),
        Some(Ok(Ok(line))) => line,
    };
    let Some(data) = line.as_slice() else {
        return Ok(None);
    };
    let data = data.strip_suffix(b"\n").unwrap_or(data);
    let data = data.iter().position(|b| *b == 0).map_or(data, |nul| &data[..nul]);
    Ok(std::str::from_utf8(data).ok().map(ToOwned::to_owned))
}

/// Write `ERR <message>\n` as a single packet line and flush `out`.
pub fn write_error_line<W: Write>(mut out: W, message: &str) -> io::Result<()> {
    pkt::encode::error_to_write(format!("{message}\n").as_bytes(), &mut out)?;
    out.flush()
}
