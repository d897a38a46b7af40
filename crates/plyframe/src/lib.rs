//! PLYFRAME: reader/writer for the packed point-cloud frame format used by the
//! dance player. One file holds one animation frame.
//!
//! File layout:
//!   text header, one declaration per line, terminated by the exact bytes
//!   `end_header\n`. The header must contain
//!     `format binary_little_endian 1.0`
//!     `element vertex <N>`
//!   Other lines (`ply`, `comment`, `property ...`) are accepted and ignored;
//!   the property layout is fixed.
//!
//! Payload (little-endian, no padding), immediately after the terminator:
//!   N records of 27 bytes:
//!   00 : f32 x, f32 y, f32 z      position (left-handed source convention)
//!   0C : u8 r, u8 g, u8 b         color
//!   0F : f32 vx, f32 vy, f32 vz   velocity (reserved, not rendered)
//!
//! Bytes after the N-th record are ignored.

use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::Path;

/// Size in bytes of one packed on-disk point record.
pub const RECORD_SIZE: usize = 27;

/// Exact byte sequence that ends the text header.
pub const HEADER_TERMINATOR: &[u8] = b"end_header\n";

/// The only payload encoding this crate reads.
pub const SUPPORTED_FORMAT: &str = "binary_little_endian";

/// One point as stored on disk. `repr(packed)` so the in-memory layout is the
/// 27-byte file record and a payload can be reinterpreted without unpacking.
#[repr(C, packed)]
#[derive(Clone, Copy, Debug, Default, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct PointRecord {
    pub position: [f32; 3],
    pub color: [u8; 3],
    pub velocity: [f32; 3],
}

const _: [(); RECORD_SIZE] = [(); core::mem::size_of::<PointRecord>()];

impl PointRecord {
    #[inline]
    pub fn new(position: [f32; 3], color: [u8; 3], velocity: [f32; 3]) -> Self {
        Self {
            position,
            color,
            velocity,
        }
    }
}

/// Reasons a frame file is rejected.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    #[error("header error: {0}")]
    Header(String),

    #[error("unsupported format: {0}")]
    Format(String),

    #[error("payload too short: expected {expected} bytes, found {actual}")]
    Size { expected: usize, actual: usize },
}

/// Errors from reading a frame file from disk.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Io(#[from] io::Error),

    #[error(transparent)]
    Decode(#[from] DecodeError),
}

/// One decoded frame: a point count plus the packed payload bytes.
///
/// The payload is kept in file layout (`point_count * RECORD_SIZE` bytes) so
/// it can be uploaded to the GPU verbatim. A frame is immutable once built.
#[derive(Clone, PartialEq)]
pub struct Frame {
    point_count: usize,
    payload: Vec<u8>,
}

impl std::fmt::Debug for Frame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Frame")
            .field("point_count", &self.point_count)
            .field("payload_len", &self.payload.len())
            .finish()
    }
}

impl Frame {
    /// Builds a frame from records, e.g. for tests and generators.
    pub fn from_points(points: &[PointRecord]) -> Self {
        Self {
            point_count: points.len(),
            payload: payload_bytes(points),
        }
    }

    #[inline]
    pub fn point_count(&self) -> usize {
        self.point_count
    }

    /// Packed little-endian payload, exactly `point_count * RECORD_SIZE` bytes.
    #[inline]
    pub fn as_bytes(&self) -> &[u8] {
        &self.payload
    }

    /// Zero-copy view of the payload as records.
    #[cfg(target_endian = "little")]
    #[inline]
    pub fn points(&self) -> &[PointRecord] {
        // PointRecord has alignment 1 and the payload length is a multiple of 27.
        bytemuck::cast_slice(&self.payload)
    }

    /// Portable per-field copy of the records.
    pub fn to_records(&self) -> Vec<PointRecord> {
        unpack_records(&self.payload)
    }
}

/// Parsed header fields the decoder cares about.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    /// Declared vertex count.
    pub vertex_count: usize,
    /// Header length in bytes including the terminator.
    pub len: usize,
}

#[inline]
fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

#[cold]
fn header_err(msg: impl Into<String>) -> DecodeError {
    DecodeError::Header(msg.into())
}

/// Parses and validates the text header. No payload bytes are inspected.
pub fn parse_header(bytes: &[u8]) -> Result<Header, DecodeError> {
    let marker = find(bytes, HEADER_TERMINATOR)
        .ok_or_else(|| header_err("missing `end_header` terminator"))?;
    let text = std::str::from_utf8(&bytes[..marker])
        .map_err(|_| header_err("header is not valid UTF-8"))?;

    // Format first: a non-binary file must never reach the payload stage.
    let supported = format!("format {SUPPORTED_FORMAT}");
    if !text.lines().any(|line| line.contains(&supported)) {
        let declared = text
            .lines()
            .map(str::trim)
            .find(|line| line.starts_with("format"))
            .unwrap_or("<no format line>");
        return Err(DecodeError::Format(declared.to_string()));
    }

    let mut vertex_count = None;
    for line in text.lines() {
        let mut tokens = line.split_whitespace();
        if tokens.next() != Some("element") || tokens.next() != Some("vertex") {
            continue;
        }
        let count = tokens
            .next()
            .ok_or_else(|| header_err("`element vertex` without a count"))?;
        let count: usize = count
            .parse()
            .map_err(|_| header_err(format!("non-numeric vertex count `{count}`")))?;
        vertex_count = Some(count);
        break;
    }

    let vertex_count =
        vertex_count.ok_or_else(|| header_err("missing `element vertex <N>` declaration"))?;
    if vertex_count == 0 {
        return Err(header_err("frame declares zero vertices"));
    }

    Ok(Header {
        vertex_count,
        len: marker + HEADER_TERMINATOR.len(),
    })
}

/// Validates the header and returns it with the exact payload slice.
fn split_payload(bytes: &[u8]) -> Result<(Header, &[u8]), DecodeError> {
    let header = parse_header(bytes)?;
    let expected = header
        .vertex_count
        .checked_mul(RECORD_SIZE)
        .ok_or_else(|| header_err("vertex count overflows payload size"))?;

    let body = &bytes[header.len..];
    if body.len() < expected {
        return Err(DecodeError::Size {
            expected,
            actual: body.len(),
        });
    }

    Ok((header, &body[..expected]))
}

/// Decode one frame. The payload is copied once, in bulk, and never unpacked.
pub fn decode_frame(bytes: &[u8]) -> Result<Frame, DecodeError> {
    let (header, payload) = split_payload(bytes)?;
    Ok(Frame {
        point_count: header.vertex_count,
        payload: payload.to_vec(),
    })
}

/// Decode one frame into individually unpacked records.
///
/// Slower than [`decode_frame`] but independent of the in-memory record
/// layout; both must agree bit for bit.
pub fn decode_frame_unpacked(bytes: &[u8]) -> Result<Vec<PointRecord>, DecodeError> {
    let (_, payload) = split_payload(bytes)?;
    Ok(unpack_records(payload))
}

#[inline(always)]
fn le_f32(b: &[u8]) -> f32 {
    f32::from_le_bytes([b[0], b[1], b[2], b[3]])
}

fn unpack_records(payload: &[u8]) -> Vec<PointRecord> {
    payload
        .chunks_exact(RECORD_SIZE)
        .map(|rec| PointRecord {
            position: [le_f32(&rec[0..4]), le_f32(&rec[4..8]), le_f32(&rec[8..12])],
            color: [rec[12], rec[13], rec[14]],
            velocity: [
                le_f32(&rec[15..19]),
                le_f32(&rec[19..23]),
                le_f32(&rec[23..27]),
            ],
        })
        .collect()
}

fn payload_bytes(points: &[PointRecord]) -> Vec<u8> {
    #[cfg(target_endian = "little")]
    {
        bytemuck::cast_slice(points).to_vec()
    }

    #[cfg(not(target_endian = "little"))]
    {
        let mut out = Vec::with_capacity(points.len() * RECORD_SIZE);
        for p in points {
            let (position, color, velocity) = (p.position, p.color, p.velocity);
            for v in position {
                out.extend_from_slice(&v.to_le_bytes());
            }
            out.extend_from_slice(&color);
            for v in velocity {
                out.extend_from_slice(&v.to_le_bytes());
            }
        }
        out
    }
}

/// Text header for a frame of `vertex_count` points, terminator included.
pub fn header_text(vertex_count: usize) -> String {
    format!(
        "ply\n\
         format {SUPPORTED_FORMAT} 1.0\n\
         element vertex {vertex_count}\n\
         property float x\n\
         property float y\n\
         property float z\n\
         property uchar red\n\
         property uchar green\n\
         property uchar blue\n\
         property float vx\n\
         property float vy\n\
         property float vz\n\
         end_header\n"
    )
}

/// Serialize records into a complete frame file image.
pub fn encode_frame(points: &[PointRecord]) -> Vec<u8> {
    let header = header_text(points.len());
    let mut out = Vec::with_capacity(header.len() + points.len() * RECORD_SIZE);
    out.extend_from_slice(header.as_bytes());
    out.extend_from_slice(&payload_bytes(points));
    out
}

/// Fast path: prefer mmap; the mapping is copied once into the frame payload.
#[cfg(feature = "mmap")]
pub fn read_file<P: AsRef<Path>>(path: P) -> Result<Frame, Error> {
    let file = File::open(path)?;
    let map = unsafe { memmap2::MmapOptions::new().map(&file)? };
    Ok(decode_frame(&map)?)
}

#[cfg(not(feature = "mmap"))]
pub fn read_file<P: AsRef<Path>>(path: P) -> Result<Frame, Error> {
    let bytes = std::fs::read(path)?;
    Ok(decode_frame(&bytes)?)
}

pub fn write_file<P: AsRef<Path>>(path: P, points: &[PointRecord]) -> io::Result<()> {
    let mut file = BufWriter::new(File::create(path)?);
    file.write_all(header_text(points.len()).as_bytes())?;
    file.write_all(&payload_bytes(points))?;
    file.flush()?;

    Ok(())
}
