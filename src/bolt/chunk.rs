// Bolt message framing: payloads are split into length-prefixed chunks
// and terminated by an empty chunk (00 00)

use std::io::{self, Read, Write};

pub const MAX_CHUNK_SIZE: usize = u16::MAX as usize;

/// Write one message as a sequence of chunks followed by the end marker
pub fn write_message<W: Write>(writer: &mut W, payload: &[u8]) -> io::Result<()> {
    let mut framed = Vec::with_capacity(payload.len() + 4 + 2 * (payload.len() / MAX_CHUNK_SIZE));

    for chunk in payload.chunks(MAX_CHUNK_SIZE) {
        framed.extend_from_slice(&(chunk.len() as u16).to_be_bytes());
        framed.extend_from_slice(chunk);
    }
    framed.extend_from_slice(&[0x00, 0x00]);

    writer.write_all(&framed)?;
    writer.flush()
}

/// Read one message, reassembling its chunks. Leading empty chunks are
/// NOOP keep-alives and are skipped.
pub fn read_message<R: Read>(reader: &mut R) -> io::Result<Vec<u8>> {
    let mut message = Vec::new();

    loop {
        let mut header = [0u8; 2];
        reader.read_exact(&mut header)?;
        let size = u16::from_be_bytes(header) as usize;

        if size == 0 {
            if message.is_empty() {
                continue;
            }
            return Ok(message);
        }

        let start = message.len();
        message.resize(start + size, 0);
        reader.read_exact(&mut message[start..])?;
    }
}
