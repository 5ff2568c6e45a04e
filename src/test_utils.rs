//! Test utilities: synthetic fixture builders.
//!
//! Every fixture is generated in memory, so tests never depend on files on
//! disk. The builders produce structurally valid containers (correct
//! lengths, CRCs and offsets) with dummy image payloads.
//!
//! # Usage
//!
//! ```
//! use image_meta_io::test_utils::*;
//!
//! # fn example() -> image_meta_io::Result<()> {
//! // Named fixtures
//! let jpeg = fixture_bytes(EXIF_JPEG)?;
//!
//! // Or build one by hand
//! let png = PngBuilder::new(16, 16).chunk(*b"tEXt", b"Title\0Hello".to_vec()).build();
//! # Ok(())
//! # }
//! ```

use std::io::Cursor;

use crate::{
    crc,
    tiff::{
        field::Rational, tags, ByteOrder, DirectoryKind, TiffOutputField, TiffOutputSet,
        TiffWriter, TIFF_HEADER_SIZE,
    },
    Error, Result,
};

/// Type alias for test stream tuples: (format, input_cursor, output_cursor)
pub type TestStreams = (&'static str, Cursor<Vec<u8>>, Cursor<Vec<u8>>);

macro_rules! define_fixtures {
    ($($name:ident => ($file:literal, $format:literal, $build:expr)),* $(,)?) => {
        $(
            #[allow(dead_code)]
            pub const $name: &str = $file;
        )*

        fn build_fixture(name: &str) -> Option<(Vec<u8>, &'static str)> {
            match name {
                $($file => Some(($build(), $format)),)*
                _ => None,
            }
        }

        /// List all defined fixtures
        pub fn list_all_fixtures() -> Vec<&'static str> {
            vec![$($file),*]
        }
    };
}

define_fixtures!(
    PLAIN_JPEG => ("plain.jpg", "image/jpeg", || JpegBuilder::new(64, 48).build()),
    EXIF_JPEG => ("exif.jpg", "image/jpeg", || {
        JpegBuilder::new(64, 48).exif(&sample_exif(ByteOrder::BigEndian)).build()
    }),
    XMP_JPEG => ("xmp.jpg", "image/jpeg", || {
        JpegBuilder::new(64, 48).xmp(SAMPLE_XMP).build()
    }),
    PLAIN_PNG => ("plain.png", "image/png", || PngBuilder::new(32, 24).build()),
    EXIF_PNG => ("exif.png", "image/png", || {
        PngBuilder::new(32, 24)
            .chunk(*b"eXIf", sample_exif(ByteOrder::LittleEndian))
            .build()
    }),
    XMP_PNG => ("xmp.png", "image/png", || {
        PngBuilder::new(32, 24).chunk(*b"iTXt", xmp_itxt(SAMPLE_XMP)).build()
    }),
);

/// Bytes of a named fixture
pub fn fixture_bytes(name: &str) -> Result<Vec<u8>> {
    build_fixture(name)
        .map(|(bytes, _)| bytes)
        .ok_or_else(|| Error::InvalidFormat(format!("Unknown fixture: {name}")))
}

/// Create test streams for a named fixture
///
/// Returns: (format, input_cursor, output_cursor)
pub fn create_test_streams(fixture_name: &str) -> Result<TestStreams> {
    let (bytes, format) = build_fixture(fixture_name)
        .ok_or_else(|| Error::InvalidFormat(format!("Unknown fixture: {fixture_name}")))?;
    Ok((format, Cursor::new(bytes), Cursor::new(Vec::new())))
}

/// XMP packet carrying a rating, keywords and a place
pub const SAMPLE_XMP: &str = r#"<?xpacket begin="﻿" id="W5M0MpCehiHzreSzNTczkc9d"?>
<x:xmpmeta xmlns:x="adobe:ns:meta/">
 <rdf:RDF xmlns:rdf="http://www.w3.org/1999/02/22-rdf-syntax-ns#">
  <rdf:Description rdf:about=""
    xmlns:xmp="http://ns.adobe.com/xap/1.0/"
    xmlns:dc="http://purl.org/dc/elements/1.1/"
    xmlns:photoshop="http://ns.adobe.com/photoshop/1.0/"
   xmp:Rating="3"
   photoshop:City="Oldenburg"
   photoshop:Country="Germany">
   <dc:subject>
    <rdf:Bag>
     <rdf:li>beach</rdf:li>
     <rdf:li>summer</rdf:li>
    </rdf:Bag>
   </dc:subject>
  </rdf:Description>
 </rdf:RDF>
</x:xmpmeta>
<?xpacket end="w"?>"#;

/// EXIF block with camera, orientation, capture time and a GPS position
///
/// Values: Canon / Canon EOS 90D, orientation 6, taken 2023:07:12 12:48:45
/// with offset +00:00, ISO 200, 1/125 s, f/5.6, 35 mm, 53°13'9.808"N
/// 8°14'22.780"E.
pub fn sample_exif(byte_order: ByteOrder) -> Vec<u8> {
    let mut set = TiffOutputSet::new(byte_order);

    let root = set.get_or_create_directory(DirectoryKind::Root);
    root.add(TiffOutputField::ascii(tags::MAKE, "Canon", byte_order));
    root.add(TiffOutputField::ascii(tags::MODEL, "Canon EOS 90D", byte_order));
    root.add(TiffOutputField::short(tags::ORIENTATION, 6, byte_order));

    let exif = set.get_or_create_directory(DirectoryKind::Exif);
    exif.add(TiffOutputField::rationals(
        tags::EXPOSURE_TIME,
        &[Rational::new(1, 125)],
        byte_order,
    ));
    exif.add(TiffOutputField::rationals(
        tags::F_NUMBER,
        &[Rational::new(56, 10)],
        byte_order,
    ));
    exif.add(TiffOutputField::short(tags::ISO, 200, byte_order));
    exif.add(TiffOutputField::ascii(
        tags::DATE_TIME_ORIGINAL,
        "2023:07:12 12:48:45",
        byte_order,
    ));
    exif.add(TiffOutputField::ascii(tags::OFFSET_TIME_ORIGINAL, "+00:00", byte_order));
    exif.add(TiffOutputField::rationals(
        tags::FOCAL_LENGTH,
        &[Rational::new(35, 1)],
        byte_order,
    ));

    let gps = set.get_or_create_directory(DirectoryKind::Gps);
    gps.add(TiffOutputField::ascii(tags::GPS_LATITUDE_REF, "N", byte_order));
    gps.add(TiffOutputField::rationals(
        tags::GPS_LATITUDE,
        &[Rational::new(53, 1), Rational::new(13, 1), Rational::new(9808, 1000)],
        byte_order,
    ));
    gps.add(TiffOutputField::ascii(tags::GPS_LONGITUDE_REF, "E", byte_order));
    gps.add(TiffOutputField::rationals(
        tags::GPS_LONGITUDE,
        &[Rational::new(8, 1), Rational::new(14, 1), Rational::new(22780, 1000)],
        byte_order,
    ));

    // The set is built above with a root directory, so writing cannot fail.
    TiffWriter::write(&set).unwrap_or_default()
}

enum EntryValue {
    Data(Vec<u8>),
    Offset(u32),
}

struct Entry {
    tag: u16,
    field_type: u16,
    count: u32,
    value: EntryValue,
}

/// Entries of a single directory, written in insertion order
#[derive(Default)]
pub struct DirectoryBuilder {
    entries: Vec<Entry>,
}

impl DirectoryBuilder {
    /// Add an entry whose value bytes are already encoded in the file's byte
    /// order. Values longer than four bytes are stored out of line.
    pub fn entry(mut self, tag: u16, field_type: u16, count: u32, value: &[u8]) -> Self {
        self.entries.push(Entry {
            tag,
            field_type,
            count,
            value: EntryValue::Data(value.to_vec()),
        });
        self
    }

    /// Add an entry with a literal value/offset slot, for malformed input.
    pub fn raw_entry(mut self, tag: u16, field_type: u16, count: u32, offset: u32) -> Self {
        self.entries.push(Entry {
            tag,
            field_type,
            count,
            value: EntryValue::Offset(offset),
        });
        self
    }

    fn data_len(&self) -> u32 {
        self.entries
            .iter()
            .map(|e| match &e.value {
                EntryValue::Data(d) if d.len() > 4 => d.len() as u32,
                _ => 0,
            })
            .sum()
    }

    fn table_len(entry_count: usize) -> u32 {
        2 + 12 * entry_count as u32 + 4
    }

    fn write(self, out: &mut Vec<u8>, byte_order: ByteOrder) {
        let start = out.len() as u32;
        let mut data_offset = start + Self::table_len(self.entries.len());
        let mut data = Vec::new();

        push_u16(out, byte_order, self.entries.len() as u16);
        for entry in self.entries {
            push_u16(out, byte_order, entry.tag);
            push_u16(out, byte_order, entry.field_type);
            push_u32(out, byte_order, entry.count);
            match entry.value {
                EntryValue::Offset(offset) => push_u32(out, byte_order, offset),
                EntryValue::Data(bytes) if bytes.len() <= 4 => {
                    let mut slot = [0u8; 4];
                    slot[..bytes.len()].copy_from_slice(&bytes);
                    out.extend_from_slice(&slot);
                }
                EntryValue::Data(bytes) => {
                    push_u32(out, byte_order, data_offset);
                    data_offset += bytes.len() as u32;
                    data.extend_from_slice(&bytes);
                }
            }
        }
        push_u32(out, byte_order, 0);
        out.extend_from_slice(&data);
    }
}

/// Builder for small TIFF/EXIF blocks
///
/// Layout: header, IFD0 at offset 8 with its out-of-line data, then the
/// EXIF and GPS directories, then the thumbnail bytes. Pointer entries for
/// the sub-directories and the thumbnail are appended to IFD0 after the
/// entries added by the caller.
pub struct TiffBuilder {
    byte_order: ByteOrder,
    root: DirectoryBuilder,
    exif: Option<DirectoryBuilder>,
    gps: Option<DirectoryBuilder>,
    thumbnail: Option<(Vec<u8>, u32)>,
}

impl TiffBuilder {
    pub fn new(byte_order: ByteOrder) -> Self {
        Self {
            byte_order,
            root: DirectoryBuilder::default(),
            exif: None,
            gps: None,
            thumbnail: None,
        }
    }

    pub fn entry(mut self, tag: u16, field_type: u16, count: u32, value: &[u8]) -> Self {
        self.root = self.root.entry(tag, field_type, count, value);
        self
    }

    pub fn raw_entry(mut self, tag: u16, field_type: u16, count: u32, offset: u32) -> Self {
        self.root = self.root.raw_entry(tag, field_type, count, offset);
        self
    }

    pub fn exif(mut self, build: impl FnOnce(DirectoryBuilder) -> DirectoryBuilder) -> Self {
        self.exif = Some(build(DirectoryBuilder::default()));
        self
    }

    pub fn gps(mut self, build: impl FnOnce(DirectoryBuilder) -> DirectoryBuilder) -> Self {
        self.gps = Some(build(DirectoryBuilder::default()));
        self
    }

    /// Attach thumbnail bytes; `declared_length` goes into the length tag as is.
    pub fn thumbnail(mut self, data: &[u8], declared_length: u32) -> Self {
        self.thumbnail = Some((data.to_vec(), declared_length));
        self
    }

    pub fn build(self) -> Vec<u8> {
        let order = self.byte_order;
        let extra = usize::from(self.exif.is_some())
            + usize::from(self.gps.is_some())
            + if self.thumbnail.is_some() { 2 } else { 0 };

        let root_end = TIFF_HEADER_SIZE
            + DirectoryBuilder::table_len(self.root.entries.len() + extra)
            + self.root.data_len();
        let exif_offset = root_end;
        let exif_end = exif_offset
            + self
                .exif
                .as_ref()
                .map_or(0, |d| DirectoryBuilder::table_len(d.entries.len()) + d.data_len());
        let gps_offset = exif_end;
        let thumb_offset = gps_offset
            + self
                .gps
                .as_ref()
                .map_or(0, |d| DirectoryBuilder::table_len(d.entries.len()) + d.data_len());

        let mut root = self.root;
        if self.exif.is_some() {
            root = root.raw_entry(tags::EXIF_OFFSET, 4, 1, exif_offset);
        }
        if self.gps.is_some() {
            root = root.raw_entry(tags::GPS_INFO, 4, 1, gps_offset);
        }
        if let Some((_, declared)) = &self.thumbnail {
            root = root
                .raw_entry(tags::JPEG_INTERCHANGE_FORMAT, 4, 1, thumb_offset)
                .raw_entry(tags::JPEG_INTERCHANGE_FORMAT_LENGTH, 4, 1, *declared);
        }

        let mut out = Vec::new();
        out.extend_from_slice(&order.marker());
        push_u16(&mut out, order, 42);
        push_u32(&mut out, order, TIFF_HEADER_SIZE);
        root.write(&mut out, order);
        if let Some(exif) = self.exif {
            exif.write(&mut out, order);
        }
        if let Some(gps) = self.gps {
            gps.write(&mut out, order);
        }
        if let Some((data, _)) = self.thumbnail {
            out.extend_from_slice(&data);
        }
        out
    }
}

fn push_u16(out: &mut Vec<u8>, byte_order: ByteOrder, value: u16) {
    // Writing into a Vec cannot fail.
    let _ = byte_order.write_u16(out, value);
}

fn push_u32(out: &mut Vec<u8>, byte_order: ByteOrder, value: u32) {
    let _ = byte_order.write_u32(out, value);
}

/// Builder for minimal baseline JPEG files
///
/// Produces SOI, a JFIF APP0, the caller's segments, SOF0, SOS with a few
/// bytes of scan data, and EOI.
pub struct JpegBuilder {
    width: u16,
    height: u16,
    segments: Vec<(u8, Vec<u8>)>,
}

impl JpegBuilder {
    pub fn new(width: u16, height: u16) -> Self {
        Self {
            width,
            height,
            segments: Vec::new(),
        }
    }

    pub fn segment(mut self, marker: u8, payload: Vec<u8>) -> Self {
        self.segments.push((marker, payload));
        self
    }

    /// Add an EXIF APP1 segment around a TIFF block.
    pub fn exif(self, tiff: &[u8]) -> Self {
        let mut payload = b"Exif\0\0".to_vec();
        payload.extend_from_slice(tiff);
        self.segment(0xE1, payload)
    }

    /// Add an XMP APP1 segment.
    pub fn xmp(self, xmp: &str) -> Self {
        let mut payload = b"http://ns.adobe.com/xap/1.0/\0".to_vec();
        payload.extend_from_slice(xmp.as_bytes());
        self.segment(0xE1, payload)
    }

    pub fn build(self) -> Vec<u8> {
        let mut out = vec![0xFF, 0xD8];
        push_segment(&mut out, 0xE0, b"JFIF\0\x01\x01\0\0\x01\0\x01\0\0");
        for (marker, payload) in &self.segments {
            push_segment(&mut out, *marker, payload);
        }

        let mut sof = vec![8];
        sof.extend_from_slice(&self.height.to_be_bytes());
        sof.extend_from_slice(&self.width.to_be_bytes());
        sof.extend_from_slice(&[1, 1, 0x11, 0]);
        push_segment(&mut out, 0xC0, &sof);

        push_segment(&mut out, 0xDA, &[1, 1, 0, 0, 0x3F, 0]);
        out.extend_from_slice(&[0x12, 0x34, 0xFF, 0x00, 0x56, 0x78]);
        out.extend_from_slice(&[0xFF, 0xD9]);
        out
    }
}

fn push_segment(out: &mut Vec<u8>, marker: u8, payload: &[u8]) {
    out.extend_from_slice(&[0xFF, marker]);
    out.extend_from_slice(&(payload.len() as u16 + 2).to_be_bytes());
    out.extend_from_slice(payload);
}

/// Builder for minimal PNG files
///
/// Produces the signature, IHDR, the caller's chunks, one IDAT and IEND,
/// all with valid CRCs.
pub struct PngBuilder {
    width: u32,
    height: u32,
    chunks: Vec<([u8; 4], Vec<u8>)>,
}

impl PngBuilder {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            chunks: Vec::new(),
        }
    }

    pub fn chunk(mut self, chunk_type: [u8; 4], data: Vec<u8>) -> Self {
        self.chunks.push((chunk_type, data));
        self
    }

    pub fn build(self) -> Vec<u8> {
        let mut out = b"\x89PNG\r\n\x1a\n".to_vec();

        let mut ihdr = Vec::with_capacity(13);
        ihdr.extend_from_slice(&self.width.to_be_bytes());
        ihdr.extend_from_slice(&self.height.to_be_bytes());
        ihdr.extend_from_slice(&[8, 2, 0, 0, 0]);
        out.extend(png_chunk(*b"IHDR", &ihdr));

        for (chunk_type, data) in &self.chunks {
            out.extend(png_chunk(*chunk_type, data));
        }
        out.extend(png_chunk(*b"IDAT", &[0x78, 0x9C, 0x03, 0x00, 0x00, 0x00, 0x00, 0x01]));
        out.extend(png_chunk(*b"IEND", &[]));
        out
    }
}

/// One serialized PNG chunk: length, type, data, CRC.
pub fn png_chunk(chunk_type: [u8; 4], data: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(12 + data.len());
    out.extend_from_slice(&(data.len() as u32).to_be_bytes());
    out.extend_from_slice(&chunk_type);
    out.extend_from_slice(data);
    out.extend_from_slice(&crc::chunk_crc(&chunk_type, data).to_be_bytes());
    out
}

/// Uncompressed iTXt payload carrying an XMP packet
pub fn xmp_itxt(xmp: &str) -> Vec<u8> {
    let mut data = b"XML:com.adobe.xmp\0".to_vec();
    data.extend_from_slice(&[0, 0, 0, 0]);
    data.extend_from_slice(xmp.as_bytes());
    data
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_list_all_fixtures() {
        let fixtures = list_all_fixtures();
        assert_eq!(fixtures.len(), 6);
        assert!(fixtures.contains(&EXIF_JPEG));
        assert!(fixtures.contains(&XMP_PNG));
    }

    #[test]
    fn test_fixture_signatures() {
        for name in list_all_fixtures() {
            let (format, input, _) = create_test_streams(name).unwrap();
            let bytes = input.into_inner();
            match format {
                "image/jpeg" => assert_eq!(&bytes[..2], &[0xFF, 0xD8], "{name}"),
                "image/png" => assert_eq!(&bytes[..8], b"\x89PNG\r\n\x1a\n", "{name}"),
                other => panic!("unexpected format {other}"),
            }
        }
        assert!(fixture_bytes("missing.gif").is_err());
    }

    #[test]
    fn test_tiff_builder_layout() {
        let bytes = TiffBuilder::new(ByteOrder::BigEndian)
            .entry(tags::MAKE, 2, 6, b"Canon\0")
            .build();
        assert_eq!(&bytes[..8], b"MM\x00\x2A\x00\x00\x00\x08");
        // one entry, its data follows the 18 byte table
        assert_eq!(&bytes[8..10], &[0, 1]);
        assert_eq!(&bytes[18..22], &[0, 0, 0, 26]);
        assert_eq!(&bytes[26..], b"Canon\0");
    }

    #[test]
    fn test_png_chunk_crc() {
        let chunk = png_chunk(*b"IEND", &[]);
        assert_eq!(chunk, [0, 0, 0, 0, b'I', b'E', b'N', b'D', 0xAE, 0x42, 0x60, 0x82]);
    }
}
