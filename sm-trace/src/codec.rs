//! Trace frame codec
//!
//! Stateless routines that turn a byte stream into [`TraceEvent`]s and back.
//!
//! ## Wire format
//! - Every frame opens with two little-endian `u32`s: `type`, then `body_length`
//! - `body_length` counts the bytes after the 8-byte header
//! - Strings are a `u32` length followed by that many raw bytes; each byte is
//!   one character (no terminator, no charset decoding)
//!
//! ## Known Limitations
//! - The decoder reads exactly the fields a type defines and never consults
//!   `body_length`. A frame whose body does not match its type's fields (or a
//!   type outside the table) leaves the stream misaligned unless the caller
//!   skips the body itself (see [`skip_body`]).

use crate::types::{Address, FrameHeader, FrameType, Result, TraceError, TraceEvent};
use byteorder::{ByteOrder, LittleEndian, WriteBytesExt};
use std::io::{self, ErrorKind, Read, Write};

/// Size of the fixed frame header in bytes
pub const HEADER_LEN: usize = 8;

/// Fill `buf` completely, reporting how far we got if the stream ends early
///
/// Returns the number of bytes read, which is either `buf.len()` or less if
/// end-of-stream was reached first.
fn fill(reader: &mut impl Read, buf: &mut [u8]) -> io::Result<usize> {
    let mut got = 0;
    while got < buf.len() {
        match reader.read(&mut buf[got..]) {
            Ok(0) => break,
            Ok(n) => got += n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(got)
}

/// Read exactly `buf.len()` bytes or fail with `TruncatedFrame`
fn read_exact_or_truncated(reader: &mut impl Read, buf: &mut [u8]) -> Result<()> {
    let got = fill(reader, buf)?;
    if got < buf.len() {
        return Err(TraceError::TruncatedFrame {
            needed: buf.len(),
            got,
        });
    }
    Ok(())
}

/// Read one little-endian `u32` (byte 0 is least significant)
pub fn read_u32(reader: &mut impl Read) -> Result<u32> {
    let mut buf = [0u8; 4];
    read_exact_or_truncated(reader, &mut buf)?;
    Ok(LittleEndian::read_u32(&buf))
}

/// Read a length-prefixed string, one character per byte
///
/// The buffer only grows with the bytes that actually arrive.
pub fn read_string(reader: &mut impl Read) -> Result<String> {
    let len = read_u32(reader)?;
    let mut bytes = Vec::new();
    let got = reader.by_ref().take(u64::from(len)).read_to_end(&mut bytes)?;
    if got < len as usize {
        return Err(TraceError::TruncatedFrame {
            needed: len as usize,
            got,
        });
    }
    Ok(bytes.iter().map(|&b| char::from(b)).collect())
}

/// Read the next frame header
///
/// Returns `Ok(None)` if the stream ends cleanly before the first header byte,
/// which is how an orderly peer shutdown looks on the wire. A header cut off
/// part-way is a `TruncatedFrame`.
pub fn read_header(reader: &mut impl Read) -> Result<Option<FrameHeader>> {
    let mut buf = [0u8; HEADER_LEN];
    let got = fill(reader, &mut buf)?;
    if got == 0 {
        return Ok(None);
    }
    if got < HEADER_LEN {
        return Err(TraceError::TruncatedFrame {
            needed: HEADER_LEN,
            got,
        });
    }

    let header = FrameHeader {
        frame_type: LittleEndian::read_u32(&buf[0..4]),
        body_length: LittleEndian::read_u32(&buf[4..8]),
    };
    log::trace!(
        "Frame header: type={} body_length={}",
        header.frame_type,
        header.body_length
    );
    Ok(Some(header))
}

/// Decode the body of one frame given its header
///
/// Consumes exactly the fields defined for `header.frame_type`. Unknown types
/// consume nothing and decode to [`TraceEvent::Unknown`].
pub fn decode_body(header: FrameHeader, reader: &mut impl Read) -> Result<TraceEvent> {
    let Some(frame_type) = FrameType::from_u32(header.frame_type) else {
        return Ok(TraceEvent::Unknown {
            frame_type: header.frame_type,
            body_length: header.body_length,
        });
    };

    let event = match frame_type {
        FrameType::OpenConnection => TraceEvent::OpenConnection {
            hash: read_u32(reader)?,
            source_name: read_string(reader)?,
        },
        FrameType::InstanceCreated => TraceEvent::InstanceCreated {
            address: Address(read_u32(reader)?),
            type_name: read_string(reader)?,
        },
        FrameType::EventFired => TraceEvent::EventFired {
            address: Address(read_u32(reader)?),
            event_id: read_u32(reader)?,
        },
        FrameType::TransitionFired => TraceEvent::TransitionFired {
            address: Address(read_u32(reader)?),
            name: read_string(reader)?,
        },
        FrameType::ActionFired => TraceEvent::ActionFired {
            address: Address(read_u32(reader)?),
            name: read_string(reader)?,
        },
        FrameType::InstanceDeleted => TraceEvent::InstanceDeleted {
            address: Address(read_u32(reader)?),
        },
        FrameType::Heartbeat => TraceEvent::Heartbeat {
            counter: read_u32(reader)?,
        },
    };
    Ok(event)
}

/// Read and decode one complete frame
///
/// Returns `Ok(None)` on a clean end-of-stream at a frame boundary.
pub fn decode_frame(reader: &mut impl Read) -> Result<Option<(FrameHeader, TraceEvent)>> {
    match read_header(reader)? {
        Some(header) => {
            let event = decode_body(header, reader)?;
            Ok(Some((header, event)))
        }
        None => Ok(None),
    }
}

/// Discard exactly `len` bytes
pub fn skip_body(reader: &mut impl Read, len: u64) -> Result<()> {
    let skipped = io::copy(&mut reader.by_ref().take(len), &mut io::sink())?;
    if skipped < len {
        return Err(TraceError::TruncatedFrame {
            needed: len as usize,
            got: skipped as usize,
        });
    }
    Ok(())
}

/// Number of body bytes the fields of `event` occupy on the wire
///
/// For [`TraceEvent::Unknown`] this is zero: nothing is known about its body.
pub fn encoded_body_len(event: &TraceEvent) -> usize {
    let string_len = |s: &str| 4 + s.chars().count();
    match event {
        TraceEvent::OpenConnection { source_name, .. } => 4 + string_len(source_name),
        TraceEvent::InstanceCreated { type_name, .. } => 4 + string_len(type_name),
        TraceEvent::EventFired { .. } => 8,
        TraceEvent::TransitionFired { name, .. } | TraceEvent::ActionFired { name, .. } => {
            4 + string_len(name)
        }
        TraceEvent::InstanceDeleted { .. } | TraceEvent::Heartbeat { .. } => 4,
        TraceEvent::Unknown { .. } => 0,
    }
}

fn write_string(out: &mut Vec<u8>, s: &str) -> Result<()> {
    let bytes = s
        .chars()
        .map(|c| u8::try_from(u32::from(c)))
        .collect::<std::result::Result<Vec<u8>, _>>()
        .map_err(|_| TraceError::UnencodableString(s.to_string()))?;
    out.write_u32::<LittleEndian>(bytes.len() as u32)?;
    out.extend_from_slice(&bytes);
    Ok(())
}

/// Encode one event as a complete frame (the inverse of [`decode_frame`])
///
/// `body_length` is written as the exact size of the encoded fields. Unknown
/// events are written as a bare header carrying their declared length.
pub fn encode_frame(event: &TraceEvent) -> Result<Vec<u8>> {
    let mut body = Vec::with_capacity(encoded_body_len(event));
    match event {
        TraceEvent::OpenConnection { hash, source_name } => {
            body.write_u32::<LittleEndian>(*hash)?;
            write_string(&mut body, source_name)?;
        }
        TraceEvent::InstanceCreated { address, type_name } => {
            body.write_u32::<LittleEndian>(address.0)?;
            write_string(&mut body, type_name)?;
        }
        TraceEvent::EventFired { address, event_id } => {
            body.write_u32::<LittleEndian>(address.0)?;
            body.write_u32::<LittleEndian>(*event_id)?;
        }
        TraceEvent::TransitionFired { address, name }
        | TraceEvent::ActionFired { address, name } => {
            body.write_u32::<LittleEndian>(address.0)?;
            write_string(&mut body, name)?;
        }
        TraceEvent::InstanceDeleted { address } => {
            body.write_u32::<LittleEndian>(address.0)?;
        }
        TraceEvent::Heartbeat { counter } => {
            body.write_u32::<LittleEndian>(*counter)?;
        }
        TraceEvent::Unknown { .. } => {}
    }

    let body_length = match event {
        TraceEvent::Unknown { body_length, .. } => *body_length,
        _ => body.len() as u32,
    };

    let mut frame = Vec::with_capacity(HEADER_LEN + body.len());
    frame.write_u32::<LittleEndian>(event.frame_type())?;
    frame.write_u32::<LittleEndian>(body_length)?;
    frame.extend_from_slice(&body);
    Ok(frame)
}

/// Encode `event` and write it to `writer`
pub fn write_frame(writer: &mut impl Write, event: &TraceEvent) -> Result<()> {
    let frame = encode_frame(event)?;
    writer.write_all(&frame)?;
    Ok(())
}
