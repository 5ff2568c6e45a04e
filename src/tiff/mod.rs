//! TIFF/EXIF directory graph
//!
//! This module reads a TIFF byte stream (a bare TIFF file or the payload of
//! a JPEG `Exif` APP1 segment / PNG `eXIf` chunk) into a [`TiffContents`]
//! and writes an edited [`TiffOutputSet`] back out.
//!
//! TIFF Structure:
//! - Header: byte order (II/MM), version (42), offset of the first IFD
//! - IFD (Image File Directory): entry count, entries (12 bytes each), next IFD offset
//! - Entries: tag (2), type (2), count (4), value or offset (4)
//! - Sub-IFDs (EXIF, GPS, Interoperability) are reached through offset tags

pub mod directory;
pub mod field;
pub mod reader;
pub mod tags;
pub mod writer;

pub use directory::{ImageDataElement, JpegImageData, TiffDirectory};
pub use field::{FieldType, FieldValue, Rational, SRational, TiffField};
pub use reader::{read_tiff, read_tiff_bytes};
pub use writer::{TiffOutputDirectory, TiffOutputField, TiffOutputSet, TiffWriter};

use byteorder::{BigEndian, LittleEndian, ReadBytesExt, WriteBytesExt};
use std::fmt;
use std::io::{self, Read, Write};

/// The only TIFF version this crate accepts
pub const TIFF_VERSION: u16 = 42;

/// Size of the TIFF header in bytes
pub const TIFF_HEADER_SIZE: u32 = 8;

/// Size of one directory entry in bytes
pub const TIFF_ENTRY_SIZE: u32 = 12;

/// Values up to this many bytes are stored inline in the entry
pub const TIFF_ENTRY_MAX_VALUE_LENGTH: u64 = 4;

/// Byte order for reading and writing multi-byte values
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ByteOrder {
    /// `II`, Intel
    LittleEndian,
    /// `MM`, Motorola
    #[default]
    BigEndian,
}

impl ByteOrder {
    /// Parse the byte order from the first header byte.
    pub fn from_marker(byte: u8) -> Option<Self> {
        match byte {
            b'I' => Some(ByteOrder::LittleEndian),
            b'M' => Some(ByteOrder::BigEndian),
            _ => None,
        }
    }

    /// The two marker bytes that open a TIFF header.
    pub fn marker(self) -> [u8; 2] {
        match self {
            ByteOrder::LittleEndian => *b"II",
            ByteOrder::BigEndian => *b"MM",
        }
    }

    pub fn read_u16<R: Read + ?Sized>(self, r: &mut R) -> io::Result<u16> {
        match self {
            ByteOrder::LittleEndian => r.read_u16::<LittleEndian>(),
            ByteOrder::BigEndian => r.read_u16::<BigEndian>(),
        }
    }

    pub fn read_u32<R: Read + ?Sized>(self, r: &mut R) -> io::Result<u32> {
        match self {
            ByteOrder::LittleEndian => r.read_u32::<LittleEndian>(),
            ByteOrder::BigEndian => r.read_u32::<BigEndian>(),
        }
    }

    pub fn read_i16<R: Read + ?Sized>(self, r: &mut R) -> io::Result<i16> {
        match self {
            ByteOrder::LittleEndian => r.read_i16::<LittleEndian>(),
            ByteOrder::BigEndian => r.read_i16::<BigEndian>(),
        }
    }

    pub fn read_i32<R: Read + ?Sized>(self, r: &mut R) -> io::Result<i32> {
        match self {
            ByteOrder::LittleEndian => r.read_i32::<LittleEndian>(),
            ByteOrder::BigEndian => r.read_i32::<BigEndian>(),
        }
    }

    pub fn read_f32<R: Read + ?Sized>(self, r: &mut R) -> io::Result<f32> {
        match self {
            ByteOrder::LittleEndian => r.read_f32::<LittleEndian>(),
            ByteOrder::BigEndian => r.read_f32::<BigEndian>(),
        }
    }

    pub fn read_f64<R: Read + ?Sized>(self, r: &mut R) -> io::Result<f64> {
        match self {
            ByteOrder::LittleEndian => r.read_f64::<LittleEndian>(),
            ByteOrder::BigEndian => r.read_f64::<BigEndian>(),
        }
    }

    pub fn write_u16<W: Write + ?Sized>(self, w: &mut W, value: u16) -> io::Result<()> {
        match self {
            ByteOrder::LittleEndian => w.write_u16::<LittleEndian>(value),
            ByteOrder::BigEndian => w.write_u16::<BigEndian>(value),
        }
    }

    pub fn write_u32<W: Write + ?Sized>(self, w: &mut W, value: u32) -> io::Result<()> {
        match self {
            ByteOrder::LittleEndian => w.write_u32::<LittleEndian>(value),
            ByteOrder::BigEndian => w.write_u32::<BigEndian>(value),
        }
    }

    pub fn write_i16<W: Write + ?Sized>(self, w: &mut W, value: i16) -> io::Result<()> {
        match self {
            ByteOrder::LittleEndian => w.write_i16::<LittleEndian>(value),
            ByteOrder::BigEndian => w.write_i16::<BigEndian>(value),
        }
    }

    pub fn write_i32<W: Write + ?Sized>(self, w: &mut W, value: i32) -> io::Result<()> {
        match self {
            ByteOrder::LittleEndian => w.write_i32::<LittleEndian>(value),
            ByteOrder::BigEndian => w.write_i32::<BigEndian>(value),
        }
    }

    pub fn write_f32<W: Write + ?Sized>(self, w: &mut W, value: f32) -> io::Result<()> {
        match self {
            ByteOrder::LittleEndian => w.write_f32::<LittleEndian>(value),
            ByteOrder::BigEndian => w.write_f32::<BigEndian>(value),
        }
    }

    pub fn write_f64<W: Write + ?Sized>(self, w: &mut W, value: f64) -> io::Result<()> {
        match self {
            ByteOrder::LittleEndian => w.write_f64::<LittleEndian>(value),
            ByteOrder::BigEndian => w.write_f64::<BigEndian>(value),
        }
    }
}

/// Parsed TIFF header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TiffHeader {
    pub byte_order: ByteOrder,
    pub version: u16,
    pub offset_to_first_ifd: u32,
}

/// Role of a directory within the graph
///
/// Root-chain directories are numbered: IFD0 is `Root`, its successor
/// `Sub`, then `Thumbnail`, then `Unknown(3)` and onward for multi-page files.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DirectoryKind {
    Root,
    Sub,
    Thumbnail,
    Exif,
    Gps,
    Interoperability,
    Unknown(i32),
}

impl DirectoryKind {
    /// Numeric directory type: root chain counts up from 0, sub-directories are negative.
    pub fn type_code(self) -> i32 {
        match self {
            DirectoryKind::Root => 0,
            DirectoryKind::Sub => 1,
            DirectoryKind::Thumbnail => 2,
            DirectoryKind::Exif => -2,
            DirectoryKind::Gps => -3,
            DirectoryKind::Interoperability => -4,
            DirectoryKind::Unknown(code) => code,
        }
    }

    pub fn from_type_code(code: i32) -> Self {
        match code {
            0 => DirectoryKind::Root,
            1 => DirectoryKind::Sub,
            2 => DirectoryKind::Thumbnail,
            -2 => DirectoryKind::Exif,
            -3 => DirectoryKind::Gps,
            -4 => DirectoryKind::Interoperability,
            other => DirectoryKind::Unknown(other),
        }
    }

    /// Kind assigned to the next directory in the root chain.
    pub fn next_in_chain(self) -> Self {
        Self::from_type_code(self.type_code().saturating_add(1))
    }

    /// True for directories reached through an offset tag rather than the chain.
    pub fn is_sub_directory(self) -> bool {
        matches!(
            self,
            DirectoryKind::Exif | DirectoryKind::Gps | DirectoryKind::Interoperability
        )
    }

    pub fn description(self) -> &'static str {
        match self {
            DirectoryKind::Root => "IFD0",
            DirectoryKind::Sub => "Sub",
            DirectoryKind::Thumbnail => "Thumbnail",
            DirectoryKind::Exif => "ExifIFD",
            DirectoryKind::Gps => "GPS",
            DirectoryKind::Interoperability => "InteropIFD",
            DirectoryKind::Unknown(-1) => "Unknown",
            DirectoryKind::Unknown(_) => "Bad Type",
        }
    }
}

impl fmt::Display for DirectoryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.description())
    }
}

/// Everything discovered while traversing a TIFF stream
///
/// Never empty: the reader fails rather than return zero directories.
#[derive(Debug, Clone)]
pub struct TiffContents {
    pub header: TiffHeader,
    pub directories: Vec<TiffDirectory>,
}

impl TiffContents {
    /// First directory of the given kind.
    pub fn directory(&self, kind: DirectoryKind) -> Option<&TiffDirectory> {
        self.directories.iter().find(|dir| dir.kind == kind)
    }

    /// First field with `tag` in a directory of the given kind.
    pub fn find_field(&self, kind: DirectoryKind, tag: u16) -> Option<&TiffField> {
        self.directory(kind).and_then(|dir| dir.find_field(tag))
    }

    /// Embedded JPEG thumbnail, if any directory carries one.
    pub fn thumbnail(&self) -> Option<&[u8]> {
        self.directories
            .iter()
            .find_map(|dir| dir.jpeg_image_data.as_ref())
            .map(|data| data.data.as_slice())
    }
}

impl fmt::Display for TiffContents {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for dir in &self.directories {
            write!(f, "{}", dir)?;
        }
        Ok(())
    }
}
