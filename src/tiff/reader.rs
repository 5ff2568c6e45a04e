//! TIFF directory graph reader
//!
//! Directories are addressed by offset from the TIFF header. Every offset is recorded in a
//! visited set before it is read, so cyclic chains and sub-directory pointers
//! terminate. Header corruption is fatal; corruption local to an entry or a
//! sub-directory is skipped and logged.

use super::{
    directory::{JpegImageData, TiffDirectory},
    field::{FieldType, TiffField},
    tags, ByteOrder, DirectoryKind, TiffContents, TiffHeader, TIFF_ENTRY_MAX_VALUE_LENGTH,
    TIFF_VERSION,
};
use crate::error::{Error, Result};
use std::collections::HashSet;
use std::io::{Cursor, Read, Seek, SeekFrom};

/// Maximum nesting of sub-directories (EXIF -> Interop -> ...)
pub const MAX_SUB_DIRECTORY_DEPTH: usize = 32;

/// Read a TIFF stream from an in-memory buffer.
pub fn read_tiff_bytes(bytes: &[u8]) -> Result<TiffContents> {
    read_tiff(&mut Cursor::new(bytes))
}

/// Read the header and every reachable directory.
///
/// The TIFF header is expected at the current stream position and every
/// offset is relative to it. The rest of the stream bounds every offset.
pub fn read_tiff<R: Read + Seek>(source: &mut R) -> Result<TiffContents> {
    let start = source.stream_position()?;
    let length = source.seek(SeekFrom::End(0))?.saturating_sub(start);
    source.seek(SeekFrom::Start(start))?;

    let header = read_header(source)?;

    let mut reader = TiffReader {
        source,
        start,
        length,
        byte_order: header.byte_order,
        visited: HashSet::new(),
        directories: Vec::new(),
    };
    reader.read_root_chain(header.offset_to_first_ifd as u64)?;

    if reader.directories.is_empty() {
        return Err(Error::format("Image did not contain any directories"));
    }

    Ok(TiffContents {
        header,
        directories: reader.directories,
    })
}

fn read_header<R: Read>(source: &mut R) -> Result<TiffHeader> {
    let mut marker = [0u8; 2];
    source.read_exact(&mut marker)?;
    if marker[0] != marker[1] {
        return Err(Error::format(format!(
            "Byte order bytes don't match ({}, {})",
            marker[0], marker[1]
        )));
    }
    let byte_order = ByteOrder::from_marker(marker[0])
        .ok_or_else(|| Error::format(format!("Invalid byte order marker: {}", marker[0])))?;

    let version = byte_order.read_u16(source)?;
    if version != TIFF_VERSION {
        return Err(Error::format(format!("Unknown TIFF version: {}", version)));
    }

    let offset_to_first_ifd = byte_order.read_u32(source)?;

    Ok(TiffHeader {
        byte_order,
        version,
        offset_to_first_ifd,
    })
}

/// Outcome of a single directory read
enum DirectoryRead {
    /// Offset already seen; nothing read
    Visited,
    /// Offset past the end or no entry count; treated as success
    Empty,
    Read { next_offset: u32 },
}

struct TiffReader<'a, R> {
    source: &'a mut R,
    /// Stream position of the TIFF header
    start: u64,
    /// Bytes from `start` to the end of the stream
    length: u64,
    byte_order: ByteOrder,
    visited: HashSet<u64>,
    directories: Vec<TiffDirectory>,
}

impl<R: Read + Seek> TiffReader<'_, R> {
    /// Walk IFD0 and its next-directory siblings.
    ///
    /// A broken first directory fails the parse. A broken sibling ends the
    /// chain but keeps what was read before it.
    fn read_root_chain(&mut self, first_offset: u64) -> Result<()> {
        let mut offset = first_offset;
        let mut kind = DirectoryKind::Root;

        loop {
            let outcome = match self.read_directory(offset, kind, 0) {
                Ok(outcome) => outcome,
                Err(e) if kind != DirectoryKind::Root => {
                    log::warn!("Ignoring broken {} directory at offset {}: {}", kind, offset, e);
                    return Ok(());
                }
                Err(e) => return Err(e),
            };

            match outcome {
                DirectoryRead::Read { next_offset } if next_offset > 0 => {
                    offset = next_offset as u64;
                    kind = kind.next_in_chain();
                }
                _ => return Ok(()),
            }
        }
    }

    fn read_directory(
        &mut self,
        offset: u64,
        kind: DirectoryKind,
        depth: usize,
    ) -> Result<DirectoryRead> {
        if !self.visited.insert(offset) {
            log::debug!("Directory offset {} already visited", offset);
            return Ok(DirectoryRead::Visited);
        }

        if offset >= self.length {
            return Ok(DirectoryRead::Empty);
        }

        self.seek_to(offset)?;

        let Ok(entry_count) = self.byte_order.read_u16(self.source) else {
            return Ok(DirectoryRead::Empty);
        };

        let mut entries = Vec::with_capacity(entry_count as usize);
        for index in 0..entry_count as usize {
            if let Some(field) = self.read_entry(kind, index)? {
                entries.push(field);
            }
        }

        let next_directory_offset = self.byte_order.read_u32(self.source)?;

        let mut directory = TiffDirectory {
            kind,
            entries,
            offset: offset as u32,
            next_directory_offset,
            byte_order: self.byte_order,
            jpeg_image_data: None,
        };

        if directory.has_jpeg_image_data() {
            directory.jpeg_image_data = Some(self.read_jpeg_image_data(&directory)?);
        }

        let index = self.directories.len();
        self.directories.push(directory);

        for (tag, sub_kind) in tags::SUB_DIRECTORY_TAGS {
            if self.directories[index].find_field(tag).is_none() {
                continue;
            }

            let read = if depth >= MAX_SUB_DIRECTORY_DEPTH {
                false
            } else {
                let sub_offset = self.directories[index].get_field_value_long(tag);
                match sub_offset.and_then(|o| self.read_directory(o as u64, sub_kind, depth + 1)) {
                    Ok(DirectoryRead::Visited) => false,
                    Ok(_) => true,
                    Err(e) => {
                        log::debug!("{} directory unreadable: {}", sub_kind, e);
                        false
                    }
                }
            };

            if !read {
                let parent = &mut self.directories[index];
                log::warn!(
                    "Removing {} from {}: sub-directory could not be read",
                    tags::tag_name(tag, parent.kind),
                    parent.description()
                );
                if let Some(pos) = parent.entries.iter().position(|f| f.tag == tag) {
                    parent.entries.remove(pos);
                }
            }
        }

        Ok(DirectoryRead::Read {
            next_offset: next_directory_offset,
        })
    }

    /// Read one 12-byte entry. Entries that cannot be interpreted safely yield `None`.
    fn read_entry(&mut self, kind: DirectoryKind, index: usize) -> Result<Option<TiffField>> {
        let order = self.byte_order;
        let tag = order.read_u16(self.source)?;
        let type_code = order.read_u16(self.source)?;
        let count = order.read_u32(self.source)?;
        let mut offset_bytes = [0u8; 4];
        self.source.read_exact(&mut offset_bytes)?;
        let offset = order.read_u32(&mut &offset_bytes[..])?;

        if tag == 0 {
            log::debug!("Skipping entry {} with tag 0 in {}", index, kind);
            return Ok(None);
        }

        let Some(field_type) = FieldType::from_code(type_code) else {
            log::debug!(
                "Skipping entry {} (tag 0x{:04x}) with unknown type {}",
                index,
                tag,
                type_code
            );
            return Ok(None);
        };

        let value_length = count as u64 * field_type.size() as u64;

        let value_bytes = if value_length > TIFF_ENTRY_MAX_VALUE_LENGTH {
            if offset as u64 + value_length > self.length {
                log::debug!(
                    "Skipping entry {} (tag 0x{:04x}): {} bytes at offset {} run past end of file",
                    index,
                    tag,
                    value_length,
                    offset
                );
                return Ok(None);
            }
            self.read_at(offset as u64, value_length as usize)?
        } else {
            offset_bytes[..value_length as usize].to_vec()
        };

        Ok(Some(TiffField {
            tag,
            directory_kind: kind,
            field_type,
            count,
            offset,
            value_bytes,
            byte_order: order,
            sort_hint: index,
        }))
    }

    fn read_jpeg_image_data(&mut self, directory: &TiffDirectory) -> Result<JpegImageData> {
        let element = directory.jpeg_image_data_element()?;
        let offset = element.offset as u64;
        if offset > self.length {
            return Err(Error::format(format!(
                "Thumbnail offset {} is beyond the end of file",
                offset
            )));
        }

        let mut length = element.length as u64;
        if offset + length > self.length {
            log::debug!(
                "Clamping thumbnail length {} to {}",
                length,
                self.length - offset
            );
            length = self.length - offset;
        }

        let data = self.read_at(offset, length as usize)?;
        Ok(JpegImageData {
            offset: element.offset,
            length: length as u32,
            data,
        })
    }

    fn seek_to(&mut self, offset: u64) -> Result<()> {
        self.source.seek(SeekFrom::Start(self.start + offset))?;
        Ok(())
    }

    /// Read `len` bytes at a TIFF offset, restoring the stream position.
    fn read_at(&mut self, offset: u64, len: usize) -> Result<Vec<u8>> {
        let position = self.source.stream_position()?;
        self.seek_to(offset)?;
        let mut buf = vec![0u8; len];
        self.source.read_exact(&mut buf)?;
        self.source.seek(SeekFrom::Start(position))?;
        Ok(buf)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::TiffBuilder;

    #[test]
    fn test_empty_root_directory() {
        // II, 42, offset 8, zero entries, next 0
        let bytes = [
            0x49, 0x49, 0x2A, 0x00, 0x08, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
        ];
        let contents = read_tiff_bytes(&bytes).unwrap();
        assert_eq!(contents.header.byte_order, ByteOrder::LittleEndian);
        assert_eq!(contents.header.offset_to_first_ifd, 8);
        assert_eq!(contents.directories.len(), 1);
        assert_eq!(contents.directories[0].kind, DirectoryKind::Root);
        assert!(contents.directories[0].entries.is_empty());
    }

    #[test]
    fn test_bad_header() {
        assert!(read_tiff_bytes(b"IM\x2A\x00\x08\x00\x00\x00").is_err());
        assert!(read_tiff_bytes(b"XX\x2A\x00\x08\x00\x00\x00").is_err());
        assert!(read_tiff_bytes(b"II\x2B\x00\x08\x00\x00\x00").is_err());
        assert!(read_tiff_bytes(b"MM\x00").is_err());
        let err = read_tiff_bytes(b"II\x2B\x00\x08\x00\x00\x00").unwrap_err();
        assert!(err.is_read_error());
    }

    #[test]
    fn test_first_directory_past_end_is_empty_result() {
        let err = read_tiff_bytes(b"MM\x00\x2A\x00\x00\x01\x00").unwrap_err();
        assert!(err.to_string().contains("did not contain any directories"));
    }

    #[test]
    fn test_entries_inline_and_out_of_line() {
        let bytes = TiffBuilder::new(ByteOrder::BigEndian)
            .entry(tags::ORIENTATION, 3, 1, &[0, 6])
            .entry(tags::MAKE, 2, 6, b"Canon\0")
            .build();
        let contents = read_tiff_bytes(&bytes).unwrap();
        let root = contents.directory(DirectoryKind::Root).unwrap();
        assert_eq!(root.find_field(tags::ORIENTATION).unwrap().int_value().unwrap(), 6);
        assert_eq!(
            root.find_field(tags::MAKE).unwrap().string_value().as_deref(),
            Some("Canon")
        );
        assert_eq!(root.find_field(tags::MAKE).unwrap().sort_hint, 1);
    }

    #[test]
    fn test_skips_tag_zero_unknown_type_and_bad_offsets() {
        let bytes = TiffBuilder::new(ByteOrder::LittleEndian)
            .entry(0, 3, 1, &[1, 0])
            .entry(tags::MAKE, 99, 1, &[1])
            .raw_entry(tags::MODEL, 2, 100, 0xFFFF_0000)
            .entry(tags::ORIENTATION, 3, 1, &[1, 0])
            .build();
        let contents = read_tiff_bytes(&bytes).unwrap();
        let root = &contents.directories[0];
        assert_eq!(root.entries.len(), 1);
        assert_eq!(root.entries[0].tag, tags::ORIENTATION);
        assert_eq!(root.entries[0].sort_hint, 3);
    }

    #[test]
    fn test_sub_directories() {
        let bytes = TiffBuilder::new(ByteOrder::BigEndian)
            .entry(tags::ORIENTATION, 3, 1, &[0, 1])
            .exif(|exif| exif.entry(tags::DATE_TIME_ORIGINAL, 2, 20, b"2023:07:12 12:48:45\0"))
            .gps(|gps| gps.entry(tags::GPS_LATITUDE_REF, 2, 2, b"N\0"))
            .build();
        let contents = read_tiff_bytes(&bytes).unwrap();
        assert_eq!(contents.directories.len(), 3);
        let exif = contents.directory(DirectoryKind::Exif).unwrap();
        assert_eq!(
            exif.find_field(tags::DATE_TIME_ORIGINAL).unwrap().string_value().as_deref(),
            Some("2023:07:12 12:48:45")
        );
        let gps = contents.directory(DirectoryKind::Gps).unwrap();
        assert_eq!(gps.find_field(tags::GPS_LATITUDE_REF).unwrap().directory_kind, DirectoryKind::Gps);
    }

    #[test]
    fn test_broken_sub_directory_removes_pointer() {
        // EXIF pointer aimed back at IFD0, GPS pointer of the wrong type
        let bytes = TiffBuilder::new(ByteOrder::BigEndian)
            .entry(tags::ORIENTATION, 3, 1, &[0, 1])
            .entry(tags::EXIF_OFFSET, 4, 1, &[0, 0, 0, 8])
            .entry(tags::GPS_INFO, 3, 1, &[0, 8])
            .build();
        let contents = read_tiff_bytes(&bytes).unwrap();
        let root = &contents.directories[0];
        assert!(root.find_field(tags::EXIF_OFFSET).is_none());
        assert!(root.find_field(tags::GPS_INFO).is_none());
        assert!(root.find_field(tags::ORIENTATION).is_some());
        assert_eq!(contents.directories.len(), 1);
    }

    #[test]
    fn test_cyclic_chain_terminates() {
        // IFD0 at 8 whose next pointer is 8 again
        let mut bytes = b"II\x2A\x00\x08\x00\x00\x00".to_vec();
        bytes.extend_from_slice(&[0, 0]);
        bytes.extend_from_slice(&8u32.to_le_bytes());
        let contents = read_tiff_bytes(&bytes).unwrap();
        assert_eq!(contents.directories.len(), 1);
    }

    #[test]
    fn test_chain_kinds_and_broken_sibling() {
        // IFD0 -> IFD1 -> truncated IFD2
        let mut bytes = b"MM\x00\x2A\x00\x00\x00\x08".to_vec();
        bytes.extend_from_slice(&[0, 0, 0, 0, 0, 14]);
        bytes.extend_from_slice(&[0, 0, 0, 0, 0, 20]);
        bytes.extend_from_slice(&[0, 5, 1]);
        let contents = read_tiff_bytes(&bytes).unwrap();
        assert_eq!(contents.directories.len(), 2);
        assert_eq!(contents.directories[1].kind, DirectoryKind::Sub);
    }

    #[test]
    fn test_thumbnail_length_clamped() {
        let jpeg = [0xFF, 0xD8, 0xFF, 0xD9];
        let bytes = TiffBuilder::new(ByteOrder::LittleEndian)
            .thumbnail(&jpeg, 1000)
            .build();
        let contents = read_tiff_bytes(&bytes).unwrap();
        let thumb = contents.directories[0].jpeg_image_data.as_ref().unwrap();
        assert_eq!(thumb.data, jpeg);
        assert_eq!(thumb.length, 4);
        assert_eq!(contents.thumbnail(), Some(&jpeg[..]));
    }

    #[test]
    fn test_offsets_relative_to_stream_position() {
        let tiff = crate::test_utils::sample_exif(ByteOrder::LittleEndian);
        let expected = read_tiff_bytes(&tiff).unwrap();

        let mut prefixed = b"JUNK".to_vec();
        prefixed.extend_from_slice(&tiff);
        let mut cursor = Cursor::new(prefixed);
        cursor.set_position(4);
        let contents = read_tiff(&mut cursor).unwrap();

        assert_eq!(contents.directories.len(), expected.directories.len());
        for (read, want) in contents.directories.iter().zip(&expected.directories) {
            assert_eq!(read.kind, want.kind);
            assert_eq!(read.entries.len(), want.entries.len());
        }
        let make = contents.directories[0].find_field(tags::MAKE).unwrap();
        assert_eq!(make.string_value().as_deref(), Some("Canon"));
    }
}
