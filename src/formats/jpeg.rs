//! JPEG segment scanning and the APP1 payload codecs
//!
//! A JPEG stream is SOI followed by marker segments (`FF`, type, big-endian
//! length including itself, payload) up to SOS, after which entropy-coded
//! scan data runs to EOI. Only the segment part is interpreted here.

use std::io::{Cursor, Read, Write};
use std::ops::Range;

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};

use crate::error::{Error, Result};

// JPEG markers
pub const MARKER_PREFIX: u8 = 0xFF;
pub const SOI: u8 = 0xD8; // Start of Image
pub const EOI: u8 = 0xD9; // End of Image
pub const SOS: u8 = 0xDA; // Start of Scan (image data follows)
pub const APP0: u8 = 0xE0; // JFIF
pub const APP1: u8 = 0xE1; // EXIF / XMP

const SOF0: u8 = 0xC0;
const SOF15: u8 = 0xCF;
const DHT: u8 = 0xC4;
const JPG: u8 = 0xC8;
const DAC: u8 = 0xCC;

pub const XMP_IDENTIFIER: &[u8] = b"http://ns.adobe.com/xap/1.0/\0";
pub const EXIF_IDENTIFIER: &[u8] = b"Exif\0\0";
/// Continuation packets of an XMP document too large for one segment
pub const XMP_EXTENSION_IDENTIFIER: &[u8] = b"http://ns.adobe.com/xmp/extension/\0";

/// Max payload of a marker segment (the length field counts itself)
pub const MAX_SEGMENT_PAYLOAD: usize = 65533;

/// Bytes appended after the extracted header so image tools still accept it
const TRAILING_BYTES: u64 = 12;

/// Read the metadata-bearing head of a JPEG stream.
///
/// Returns SOI, every segment before the first SOS or EOI marker (fill bytes
/// included), the SOS/EOI marker itself, and up to a dozen bytes after it.
/// The result is not a complete JPEG file.
pub fn extract_metadata_bytes<R: Read>(reader: &mut R) -> Result<Vec<u8>> {
    let mut magic = [0u8; 2];
    reader.read_exact(&mut magic)?;
    if magic != [MARKER_PREFIX, SOI] {
        return Err(Error::format("Not a JPEG file"));
    }

    let mut out = magic.to_vec();
    loop {
        let mut prefix = reader.read_u8()?;
        out.push(prefix);
        let mut marker = reader.read_u8()?;
        out.push(marker);

        // Fill bytes and stuffed zeros until a real marker shows up
        while prefix != MARKER_PREFIX || marker == MARKER_PREFIX || marker == 0 {
            prefix = marker;
            marker = reader.read_u8()?;
            out.push(marker);
        }

        if marker == SOS || marker == EOI {
            break;
        }

        let length = reader.read_u16::<BigEndian>()?;
        out.write_u16::<BigEndian>(length)?;
        let payload_length = length as i32 - 2;
        if payload_length <= 0 {
            return Err(Error::format(format!(
                "Invalid length {} for segment 0x{:02X}",
                length, marker
            )));
        }

        let start = out.len();
        out.resize(start + payload_length as usize, 0);
        reader.read_exact(&mut out[start..])?;
    }

    if let Err(e) = reader.take(TRAILING_BYTES).read_to_end(&mut out) {
        log::debug!("Could not read bytes after the JPEG header: {}", e);
    }
    Ok(out)
}

/// One marker segment
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JpegSegment {
    pub marker: u8,
    /// Raw bytes of the segment including leading fill bytes, marker and length
    pub range: Range<usize>,
    /// Payload after the length field
    pub payload: Range<usize>,
}

impl JpegSegment {
    pub fn payload<'a>(&self, bytes: &'a [u8]) -> &'a [u8] {
        &bytes[self.payload.clone()]
    }

    pub fn raw<'a>(&self, bytes: &'a [u8]) -> &'a [u8] {
        &bytes[self.range.clone()]
    }

    pub fn is_xmp(&self, bytes: &[u8]) -> bool {
        self.marker == APP1 && is_xmp_segment(self.payload(bytes))
    }

    pub fn is_extended_xmp(&self, bytes: &[u8]) -> bool {
        self.marker == APP1 && self.payload(bytes).starts_with(XMP_EXTENSION_IDENTIFIER)
    }

    pub fn is_exif(&self, bytes: &[u8]) -> bool {
        self.marker == APP1 && is_exif_segment(self.payload(bytes))
    }

    /// SOFn markers carrying frame dimensions
    pub fn is_start_of_frame(&self) -> bool {
        (SOF0..=SOF15).contains(&self.marker) && !matches!(self.marker, DHT | JPG | DAC)
    }
}

/// Segment layout of a JPEG stream
#[derive(Debug, Clone, Default)]
pub struct JpegSegments {
    pub segments: Vec<JpegSegment>,
    /// Offset where the segment list ends: SOS or EOI (with any fill bytes)
    pub scan_offset: usize,
}

impl JpegSegments {
    pub fn find_exif(&self, bytes: &[u8]) -> Option<usize> {
        self.segments.iter().position(|s| s.is_exif(bytes))
    }

    pub fn find_xmp(&self, bytes: &[u8]) -> Option<usize> {
        self.segments.iter().position(|s| s.is_xmp(bytes))
    }

    /// Width and height from the first SOFn segment
    pub fn frame_size(&self, bytes: &[u8]) -> Option<(u32, u32)> {
        let frame = self.segments.iter().find(|s| s.is_start_of_frame())?;
        let payload = frame.payload(bytes);
        if payload.len() < 5 {
            return None;
        }
        let height = u16::from_be_bytes([payload[1], payload[2]]);
        let width = u16::from_be_bytes([payload[3], payload[4]]);
        Some((width as u32, height as u32))
    }
}

/// Locate the marker segments of a JPEG held in memory.
///
/// Uses the same fill-byte rules as [`extract_metadata_bytes`]. Segments
/// tile the input from offset 2 up to `scan_offset`.
pub fn scan_segments(bytes: &[u8]) -> Result<JpegSegments> {
    let mut cursor = Cursor::new(bytes);
    let mut magic = [0u8; 2];
    cursor.read_exact(&mut magic)?;
    if magic != [MARKER_PREFIX, SOI] {
        return Err(Error::format("Not a JPEG file"));
    }

    let mut segments = Vec::new();
    loop {
        let start = cursor.position() as usize;
        let mut prefix = cursor.read_u8()?;
        let mut marker = cursor.read_u8()?;
        while prefix != MARKER_PREFIX || marker == MARKER_PREFIX || marker == 0 {
            prefix = marker;
            marker = cursor.read_u8()?;
        }

        if marker == SOS || marker == EOI {
            return Ok(JpegSegments {
                segments,
                scan_offset: start,
            });
        }

        let marker_offset = cursor.position();
        let length = cursor.read_u16::<BigEndian>()? as usize;
        if length <= 2 {
            return Err(Error::InvalidSegment {
                offset: marker_offset - 2,
                reason: format!("length {} for marker 0x{:02X}", length, marker),
            });
        }

        let payload_start = cursor.position() as usize;
        let payload_end = payload_start + length - 2;
        if payload_end > bytes.len() {
            return Err(Error::InvalidSegment {
                offset: marker_offset - 2,
                reason: format!("segment runs past end of file ({} bytes)", length),
            });
        }
        cursor.set_position(payload_end as u64);

        segments.push(JpegSegment {
            marker,
            range: start..payload_end,
            payload: payload_start..payload_end,
        });
    }
}

/// Whether an APP1 payload holds an XMP packet.
pub fn is_xmp_segment(payload: &[u8]) -> bool {
    payload.starts_with(XMP_IDENTIFIER)
}

/// Whether an APP1 payload holds an EXIF block.
pub fn is_exif_segment(payload: &[u8]) -> bool {
    payload.starts_with(EXIF_IDENTIFIER)
}

/// Decode the XMP packet of an APP1 payload.
pub fn parse_xmp_segment(payload: &[u8]) -> Result<String> {
    let xmp = payload
        .strip_prefix(XMP_IDENTIFIER)
        .ok_or_else(|| Error::format("Invalid JPEG XMP segment"))?;
    String::from_utf8(xmp.to_vec())
        .map_err(|e| Error::format(format!("XMP segment is not UTF-8: {}", e)))
}

/// Write a marker segment, rejecting payloads the length field cannot express.
pub fn write_segment<W: Write>(writer: &mut W, marker: u8, parts: &[&[u8]]) -> Result<()> {
    let size: usize = parts.iter().map(|p| p.len()).sum();
    if size > MAX_SEGMENT_PAYLOAD {
        return Err(Error::DataTooLarge {
            size,
            max: MAX_SEGMENT_PAYLOAD,
        });
    }
    writer.write_u8(MARKER_PREFIX)?;
    writer.write_u8(marker)?;
    writer.write_u16::<BigEndian>((size + 2) as u16)?;
    for part in parts {
        writer.write_all(part)?;
    }
    Ok(())
}
