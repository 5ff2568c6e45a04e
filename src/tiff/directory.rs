//! Image File Directory model

use super::{
    field::{FieldType, TiffField},
    tags,
    writer::{TiffOutputDirectory, TiffOutputField},
    ByteOrder, DirectoryKind, TIFF_ENTRY_MAX_VALUE_LENGTH, TIFF_ENTRY_SIZE,
};
use crate::error::{Error, Result};
use std::fmt;

/// Location of raster data inside the source stream
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageDataElement {
    pub offset: u32,
    pub length: u32,
}

/// Embedded JPEG thumbnail referenced by the JPEG-interchange tag pair
#[derive(Clone, PartialEq, Eq)]
pub struct JpegImageData {
    pub offset: u32,
    /// Clamped so that `offset + length` never exceeds the source length
    pub length: u32,
    pub data: Vec<u8>,
}

impl fmt::Debug for JpegImageData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JpegImageData")
            .field("offset", &self.offset)
            .field("length", &self.length)
            .finish()
    }
}

/// One directory as read from the stream
#[derive(Debug, Clone)]
pub struct TiffDirectory {
    pub kind: DirectoryKind,
    /// Fields in entry order; duplicate tags are kept as read
    pub entries: Vec<TiffField>,
    pub offset: u32,
    pub next_directory_offset: u32,
    pub byte_order: ByteOrder,
    pub jpeg_image_data: Option<JpegImageData>,
}

impl TiffDirectory {
    pub fn description(&self) -> &'static str {
        self.kind.description()
    }

    /// Size of the directory table itself: count, entries, next offset.
    pub fn length(&self) -> u32 {
        2 + self.entries.len() as u32 * TIFF_ENTRY_SIZE + 4
    }

    /// First field with the given tag.
    pub fn find_field(&self, tag: u16) -> Option<&TiffField> {
        self.entries.iter().find(|field| field.tag == tag)
    }

    /// Value of a single-element Long (or IFD) field.
    pub fn get_field_value_long(&self, tag: u16) -> Result<u32> {
        let field = self.find_field(tag).ok_or_else(|| {
            Error::format(format!(
                "Required field {} is missing",
                tags::tag_name(tag, self.kind)
            ))
        })?;
        if !matches!(field.field_type, FieldType::Long | FieldType::Ifd) {
            return Err(Error::format(format!(
                "Required field {} has incorrect type {:?}",
                field.tag_name(),
                field.field_type
            )));
        }
        field.int_value().map_err(|_| {
            Error::format(format!(
                "Field {} has wrong count {}",
                field.tag_name(),
                field.count
            ))
        })
    }

    /// Raw bytes of a Byte/Undefined field.
    ///
    /// A missing or wrongly typed field is an error only when `must_exist` is set.
    pub fn get_field_value_bytes(&self, tag: u16, must_exist: bool) -> Result<Option<&[u8]>> {
        let Some(field) = self.find_field(tag) else {
            if must_exist {
                return Err(Error::format(format!(
                    "Required field {} is missing",
                    tags::tag_name(tag, self.kind)
                )));
            }
            return Ok(None);
        };
        match field.field_type {
            FieldType::Byte | FieldType::Undefined => Ok(Some(&field.value_bytes)),
            other if must_exist => Err(Error::format(format!(
                "Required field {} has incorrect type {:?}",
                field.tag_name(),
                other
            ))),
            _ => Ok(None),
        }
    }

    /// True when both JPEG-interchange tags are present.
    pub fn has_jpeg_image_data(&self) -> bool {
        self.find_field(tags::JPEG_INTERCHANGE_FORMAT).is_some()
            && self.find_field(tags::JPEG_INTERCHANGE_FORMAT_LENGTH).is_some()
    }

    pub fn jpeg_image_data_element(&self) -> Result<ImageDataElement> {
        let (Some(format), Some(length)) = (
            self.find_field(tags::JPEG_INTERCHANGE_FORMAT),
            self.find_field(tags::JPEG_INTERCHANGE_FORMAT_LENGTH),
        ) else {
            return Err(Error::format("Couldn't find image data"));
        };
        let first = |field: &TiffField| -> Result<u32> {
            field
                .int_values()?
                .first()
                .copied()
                .ok_or_else(|| Error::format(format!("Field {} is empty", field.tag_name())))
        };
        Ok(ImageDataElement {
            offset: first(format)?,
            length: first(length)?,
        })
    }

    /// Convert into an output directory re-encoded for `byte_order`.
    ///
    /// The first field wins for duplicate tags, offset-holder fields are left
    /// for the writer to regenerate, and the embedded thumbnail is carried over.
    /// Failures here are internal inconsistencies and surface as write errors.
    pub fn get_output_directory(&self, byte_order: ByteOrder) -> Result<TiffOutputDirectory> {
        let mut output = TiffOutputDirectory::new(self.kind, byte_order);

        for entry in &self.entries {
            if output.find_field(entry.tag).is_some() || entry.is_offset() {
                continue;
            }
            let value = entry.value().map_err(|e| {
                Error::write(format!(
                    "Cannot re-encode {} in {}: {}",
                    entry.tag_name(),
                    self.description(),
                    e
                ))
            })?;
            let mut field = TiffOutputField::new(entry.tag, entry.field_type, &value, byte_order)?;
            field.sort_hint = Some(entry.sort_hint);
            if entry.value_bytes.len() > TIFF_ENTRY_MAX_VALUE_LENGTH as usize {
                field.source_offset = Some(entry.offset);
            }
            output.add(field);
        }

        output.set_jpeg_image_data(self.jpeg_image_data.clone());
        Ok(output)
    }
}

impl fmt::Display for TiffDirectory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "---- {} ----", self.description())?;
        for entry in &self.entries {
            writeln!(f, "{}", entry)?;
        }
        Ok(())
    }
}
