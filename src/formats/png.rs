//! PNG chunk reading and text chunk decoding
//!
//! PNG Structure:
//! - 8-byte signature
//! - Chunks: length (4, big endian), type (4), data, CRC-32 over type and data
//! - IHDR first, IEND last
//!
//! Metadata lives in `eXIf` chunks and in text chunks (`tEXt`, `zTXt`,
//! `iTXt`) under a handful of well-known keywords.

use std::fmt;
use std::io::Read;

use byteorder::{BigEndian, ReadBytesExt};
use flate2::read::ZlibDecoder;

use crate::{
    crc,
    error::{Error, Result},
};

pub const PNG_SIGNATURE: [u8; 8] = [0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A];

/// Largest chunk length the format allows
pub const MAX_CHUNK_LENGTH: u32 = 0x7FFF_FFFF;

/// Upper bound for inflated text chunk content
pub const MAX_TEXT_SIZE: u64 = 16 * 1024 * 1024;

/// Keyword of the XMP packet iTXt chunk
pub const XMP_KEYWORD: &str = "XML:com.adobe.xmp";
/// Keyword of ImageMagick-style hex encoded EXIF
pub const EXIF_PROFILE_KEYWORD: &str = "Raw profile type exif";
/// Keyword of ImageMagick-style hex encoded IPTC
pub const IPTC_PROFILE_KEYWORD: &str = "Raw profile type iptc";

/// Four-character chunk type code
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ChunkType(pub [u8; 4]);

impl ChunkType {
    pub const IHDR: ChunkType = ChunkType(*b"IHDR");
    pub const IDAT: ChunkType = ChunkType(*b"IDAT");
    pub const IEND: ChunkType = ChunkType(*b"IEND");
    pub const TEXT: ChunkType = ChunkType(*b"tEXt");
    pub const ZTXT: ChunkType = ChunkType(*b"zTXt");
    pub const ITXT: ChunkType = ChunkType(*b"iTXt");
    pub const EXIF: ChunkType = ChunkType(*b"eXIf");

    pub fn bytes(&self) -> &[u8; 4] {
        &self.0
    }

    /// Lowercase first letter: not needed to display the image
    pub fn ancillary(&self) -> bool {
        self.0[0] & 0x20 != 0
    }

    /// Lowercase second letter: not registered with the PNG specification
    pub fn is_private(&self) -> bool {
        self.0[1] & 0x20 != 0
    }

    /// Lowercase third letter, which no valid chunk type has
    pub fn reserved(&self) -> bool {
        self.0[2] & 0x20 != 0
    }

    /// Lowercase fourth letter: editors may copy it without understanding it
    pub fn safe_to_copy(&self) -> bool {
        self.0[3] & 0x20 != 0
    }

    pub fn is_text(&self) -> bool {
        matches!(*self, ChunkType::TEXT | ChunkType::ZTXT | ChunkType::ITXT)
    }
}

impl fmt::Display for ChunkType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&String::from_utf8_lossy(&self.0))
    }
}

/// One chunk as read from the stream
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PngChunk {
    pub length: u32,
    pub chunk_type: ChunkType,
    /// CRC as stored in the file
    pub crc: u32,
    pub bytes: Vec<u8>,
}

impl PngChunk {
    /// Keyword of a text chunk, read without decoding the rest
    pub fn text_keyword(&self) -> Option<&[u8]> {
        if !self.chunk_type.is_text() {
            return None;
        }
        let end = self.bytes.iter().position(|&b| b == 0)?;
        Some(&self.bytes[..end])
    }

    pub fn has_keyword(&self, keyword: &str) -> bool {
        self.text_keyword() == Some(keyword.as_bytes())
    }

    /// Decode a text chunk; `None` for other chunk types.
    pub fn text(&self) -> Result<Option<PngTextChunk>> {
        Ok(match self.chunk_type {
            ChunkType::TEXT => Some(PngTextChunk::Text(PngChunkText::parse(&self.bytes)?)),
            ChunkType::ZTXT => Some(PngTextChunk::Ztxt(PngChunkZtxt::parse(&self.bytes)?)),
            ChunkType::ITXT => Some(PngTextChunk::Itxt(PngChunkItxt::parse(&self.bytes)?)),
            _ => None,
        })
    }
}

/// Latin-1 bytes to text; every byte maps to the code point of the same value.
pub fn decode_latin1(bytes: &[u8]) -> String {
    bytes.iter().map(|&b| b as char).collect()
}

fn decode_utf8(bytes: &[u8], what: &str) -> Result<String> {
    String::from_utf8(bytes.to_vec())
        .map_err(|e| Error::format(format!("PNG {} is not UTF-8: {}", what, e)))
}

/// Split at the next NUL, returning the field and the rest after it.
fn split_null<'a>(bytes: &'a [u8], what: &str) -> Result<(&'a [u8], &'a [u8])> {
    let end = bytes
        .iter()
        .position(|&b| b == 0)
        .ok_or_else(|| Error::format(format!("PNG text chunk: {} is not terminated", what)))?;
    Ok((&bytes[..end], &bytes[end + 1..]))
}

/// zlib inflate bounded by [`MAX_TEXT_SIZE`]
fn inflate(bytes: &[u8]) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    ZlibDecoder::new(bytes)
        .take(MAX_TEXT_SIZE + 1)
        .read_to_end(&mut out)
        .map_err(|e| Error::format(format!("Invalid compressed PNG text: {}", e)))?;
    if out.len() as u64 > MAX_TEXT_SIZE {
        return Err(Error::format(format!(
            "Compressed PNG text inflates past {} bytes",
            MAX_TEXT_SIZE
        )));
    }
    Ok(out)
}

/// `tEXt`: Latin-1 keyword and text
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PngChunkText {
    pub keyword: String,
    pub text: String,
}

impl PngChunkText {
    pub fn parse(bytes: &[u8]) -> Result<Self> {
        let (keyword, text) = split_null(bytes, "keyword")?;
        Ok(Self {
            keyword: decode_latin1(keyword),
            text: decode_latin1(text),
        })
    }
}

/// `zTXt`: Latin-1 keyword and zlib compressed Latin-1 text
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PngChunkZtxt {
    pub keyword: String,
    pub text: String,
}

impl PngChunkZtxt {
    pub fn parse(bytes: &[u8]) -> Result<Self> {
        let (keyword, rest) = split_null(bytes, "keyword")?;
        let (&method, compressed) = rest
            .split_first()
            .ok_or_else(|| Error::format("PNG zTXt chunk has no compression method"))?;
        if method != 0 {
            return Err(Error::format(format!(
                "Unknown PNG zTXt compression method {}",
                method
            )));
        }
        Ok(Self {
            keyword: decode_latin1(keyword),
            text: decode_latin1(&inflate(compressed)?),
        })
    }
}

/// `iTXt`: international text, optionally compressed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PngChunkItxt {
    pub keyword: String,
    pub compressed: bool,
    pub language_tag: String,
    pub translated_keyword: String,
    pub text: String,
}

impl PngChunkItxt {
    pub fn parse(bytes: &[u8]) -> Result<Self> {
        let (keyword, rest) = split_null(bytes, "keyword")?;
        let [flag, method, rest @ ..] = rest else {
            return Err(Error::format("PNG iTXt chunk is truncated"));
        };
        let compressed = match flag {
            0 => false,
            1 => true,
            other => {
                return Err(Error::format(format!(
                    "Invalid PNG iTXt compression flag {}",
                    other
                )))
            }
        };
        if compressed && *method != 0 {
            return Err(Error::format(format!(
                "Unknown PNG iTXt compression method {}",
                method
            )));
        }
        let (language_tag, rest) = split_null(rest, "language tag")?;
        let (translated_keyword, text) = split_null(rest, "translated keyword")?;

        let text = if compressed {
            decode_utf8(&inflate(text)?, "iTXt text")?
        } else {
            decode_utf8(text, "iTXt text")?
        };

        Ok(Self {
            keyword: decode_latin1(keyword),
            compressed,
            language_tag: decode_latin1(language_tag),
            translated_keyword: decode_utf8(translated_keyword, "translated keyword")?,
            text,
        })
    }

    /// Uncompressed chunk data with empty language tag and a translated
    /// keyword equal to the keyword.
    pub fn encode(keyword: &str, text: &str) -> Vec<u8> {
        let mut data = Vec::with_capacity(2 * keyword.len() + text.len() + 5);
        data.extend_from_slice(keyword.as_bytes());
        data.extend_from_slice(&[0, 0, 0, 0]);
        data.extend_from_slice(keyword.as_bytes());
        data.push(0);
        data.extend_from_slice(text.as_bytes());
        data
    }
}

/// Any decoded text chunk
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PngTextChunk {
    Text(PngChunkText),
    Ztxt(PngChunkZtxt),
    Itxt(PngChunkItxt),
}

impl PngTextChunk {
    pub fn keyword(&self) -> &str {
        match self {
            PngTextChunk::Text(chunk) => &chunk.keyword,
            PngTextChunk::Ztxt(chunk) => &chunk.keyword,
            PngTextChunk::Itxt(chunk) => &chunk.keyword,
        }
    }

    pub fn text(&self) -> &str {
        match self {
            PngTextChunk::Text(chunk) => &chunk.text,
            PngTextChunk::Ztxt(chunk) => &chunk.text,
            PngTextChunk::Itxt(chunk) => &chunk.text,
        }
    }
}

/// Read exactly `length` bytes, reporting a short stream as malformed input.
fn read_bytes<R: Read>(reader: &mut R, length: u64, what: &str) -> Result<Vec<u8>> {
    let mut bytes = Vec::new();
    reader.take(length).read_to_end(&mut bytes)?;
    if (bytes.len() as u64) < length {
        return Err(Error::format(format!(
            "Incomplete read of PNG {}: {} of {} bytes",
            what,
            bytes.len(),
            length
        )));
    }
    Ok(bytes)
}

/// Read the chunk list of a PNG stream up to IEND or end of input.
///
/// With a `filter`, only chunks of the listed types are kept. A CRC
/// mismatch is logged and the chunk kept.
pub fn read_chunks<R: Read>(reader: &mut R, filter: Option<&[ChunkType]>) -> Result<Vec<PngChunk>> {
    let signature = read_bytes(reader, PNG_SIGNATURE.len() as u64, "signature")?;
    if signature != PNG_SIGNATURE {
        return Err(Error::format("Not a PNG file"));
    }

    let mut chunks = Vec::new();
    loop {
        let mut length_bytes = Vec::with_capacity(4);
        reader.by_ref().take(4).read_to_end(&mut length_bytes)?;
        if length_bytes.is_empty() {
            // Input ended between chunks
            break;
        }
        if length_bytes.len() < 4 {
            return Err(Error::format(format!(
                "Incomplete read of PNG chunk length: {} of 4 bytes",
                length_bytes.len()
            )));
        }
        let length = u32::from_be_bytes([
            length_bytes[0],
            length_bytes[1],
            length_bytes[2],
            length_bytes[3],
        ]);
        if length > MAX_CHUNK_LENGTH {
            return Err(Error::format(format!("Invalid PNG chunk length {}", length)));
        }

        let type_bytes = read_bytes(reader, 4, "chunk type")?;
        let chunk_type = ChunkType([type_bytes[0], type_bytes[1], type_bytes[2], type_bytes[3]]);
        let bytes = read_bytes(reader, length as u64, "chunk data")?;
        let crc = read_bytes(reader, 4, "chunk CRC")?.as_slice().read_u32::<BigEndian>()?;

        let computed = crc::chunk_crc(chunk_type.bytes(), &bytes);
        if computed != crc {
            log::warn!(
                "CRC mismatch in PNG {} chunk: stored {:08X}, computed {:08X}",
                chunk_type,
                crc,
                computed
            );
        }

        let keep = filter.map_or(true, |types| types.contains(&chunk_type));
        let is_end = chunk_type == ChunkType::IEND;
        if keep {
            chunks.push(PngChunk {
                length,
                chunk_type,
                crc,
                bytes,
            });
        }
        if is_end {
            break;
        }
    }
    Ok(chunks)
}

/// Decode an ImageMagick raw profile: "\n<name>\n<size>\n<hex digits>".
pub fn decode_raw_profile(text: &str) -> Result<Vec<u8>> {
    let mut lines = text.trim_start_matches('\n').splitn(3, '\n');
    let _name = lines.next();
    let size: usize = lines
        .next()
        .and_then(|line| line.trim().parse().ok())
        .ok_or_else(|| Error::format("Raw profile has no valid size"))?;
    let hex = lines.next().unwrap_or_default();

    let digits: Vec<u8> = hex
        .bytes()
        .filter(|b| !b.is_ascii_whitespace())
        .map(|b| match b {
            b'0'..=b'9' => Ok(b - b'0'),
            b'a'..=b'f' => Ok(b - b'a' + 10),
            b'A'..=b'F' => Ok(b - b'A' + 10),
            other => Err(Error::format(format!(
                "Invalid hex digit '{}' in raw profile",
                other as char
            ))),
        })
        .take(size.saturating_mul(2))
        .collect::<Result<_>>()?;
    if digits.len() / 2 < size {
        return Err(Error::format(format!(
            "Raw profile holds {} of {} bytes",
            digits.len() / 2,
            size
        )));
    }
    Ok(digits.chunks(2).map(|pair| pair[0] << 4 | pair[1]).collect())
}

/// Encode bytes as an ImageMagick raw profile text.
pub fn encode_raw_profile(name: &str, bytes: &[u8]) -> String {
    let mut text = format!("\n{} profile\n{:>8}\n", name, bytes.len());
    for byte in bytes {
        text.push_str(&format!("{:02x}", byte));
    }
    text
}
