//! TIFF output model and serializer
//!
//! An output set is built from parsed contents (or from scratch), edited, and
//! serialized either with a fresh layout or over the stream it was read from,
//! keeping unchanged values where they were. Offset-holder fields
//! (sub-directory pointers and the thumbnail offset) are never copied; the
//! writer derives them from the layout it chooses.

use super::{
    directory::JpegImageData,
    field::{FieldType, FieldValue, Rational},
    tags, ByteOrder, DirectoryKind, TiffContents, TIFF_ENTRY_MAX_VALUE_LENGTH, TIFF_HEADER_SIZE,
    TIFF_VERSION,
};
use crate::error::{Error, Result};
use std::ops::Range;

/// A field ready for serialization
#[derive(Debug, Clone, PartialEq)]
pub struct TiffOutputField {
    pub tag: u16,
    pub field_type: FieldType,
    pub count: u32,
    /// Encoded value in the byte order of the owning directory
    pub bytes: Vec<u8>,
    /// Entry index in the source directory; `None` for new fields
    pub sort_hint: Option<usize>,
    /// Offset of an out-of-line value in the source stream
    pub source_offset: Option<u32>,
}

impl TiffOutputField {
    /// Encode `value` as a field of `field_type`.
    pub fn new(
        tag: u16,
        field_type: FieldType,
        value: &FieldValue,
        byte_order: ByteOrder,
    ) -> Result<Self> {
        if !value.fits(field_type) {
            return Err(Error::write(format!(
                "Value {:?} cannot be stored as {:?} (tag 0x{:04x})",
                value, field_type, tag
            )));
        }
        let bytes = value.encode(byte_order);
        Ok(Self {
            tag,
            field_type,
            count: bytes.len() as u32 / field_type.size(),
            bytes,
            sort_hint: None,
            source_offset: None,
        })
    }

    pub fn ascii(tag: u16, value: &str, byte_order: ByteOrder) -> Self {
        Self::infallible(tag, FieldType::Ascii, FieldValue::Ascii(vec![value.to_string()]), byte_order)
    }

    pub fn short(tag: u16, value: u16, byte_order: ByteOrder) -> Self {
        Self::infallible(tag, FieldType::Short, FieldValue::Shorts(vec![value]), byte_order)
    }

    pub fn long(tag: u16, value: u32, byte_order: ByteOrder) -> Self {
        Self::infallible(tag, FieldType::Long, FieldValue::Longs(vec![value]), byte_order)
    }

    pub fn rationals(tag: u16, values: &[Rational], byte_order: ByteOrder) -> Self {
        Self::infallible(
            tag,
            FieldType::Rational,
            FieldValue::Rationals(values.to_vec()),
            byte_order,
        )
    }

    pub fn bytes(tag: u16, field_type: FieldType, bytes: Vec<u8>) -> Self {
        Self {
            tag,
            field_type,
            count: bytes.len() as u32,
            bytes,
            sort_hint: None,
            source_offset: None,
        }
    }

    fn infallible(tag: u16, field_type: FieldType, value: FieldValue, order: ByteOrder) -> Self {
        let bytes = value.encode(order);
        Self {
            tag,
            field_type,
            count: bytes.len() as u32 / field_type.size(),
            bytes,
            sort_hint: None,
            source_offset: None,
        }
    }

    /// Decode the stored bytes again.
    pub fn value(&self, byte_order: ByteOrder) -> Result<FieldValue> {
        FieldValue::decode(self.field_type, &self.bytes, byte_order)
    }
}

/// A directory ready for serialization
#[derive(Debug, Clone)]
pub struct TiffOutputDirectory {
    pub kind: DirectoryKind,
    pub byte_order: ByteOrder,
    fields: Vec<TiffOutputField>,
    jpeg_image_data: Option<JpegImageData>,
}

impl TiffOutputDirectory {
    pub fn new(kind: DirectoryKind, byte_order: ByteOrder) -> Self {
        Self {
            kind,
            byte_order,
            fields: Vec::new(),
            jpeg_image_data: None,
        }
    }

    pub fn fields(&self) -> &[TiffOutputField] {
        &self.fields
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty() && self.jpeg_image_data.is_none()
    }

    pub fn find_field(&self, tag: u16) -> Option<&TiffOutputField> {
        self.fields.iter().find(|f| f.tag == tag)
    }

    /// Append a field without checking for an existing tag.
    pub fn add(&mut self, field: TiffOutputField) {
        self.fields.push(field);
    }

    /// Replace the field with the same tag, or add it.
    ///
    /// A replaced field keeps its position in the original ordering.
    pub fn set(&mut self, mut field: TiffOutputField) {
        if let Some(existing) = self.fields.iter_mut().find(|f| f.tag == field.tag) {
            if field.sort_hint.is_none() {
                field.sort_hint = existing.sort_hint;
            }
            *existing = field;
        } else {
            self.fields.push(field);
        }
    }

    /// Remove every field with the tag; returns whether one existed.
    pub fn remove_field(&mut self, tag: u16) -> bool {
        let before = self.fields.len();
        self.fields.retain(|f| f.tag != tag);
        before != self.fields.len()
    }

    pub fn jpeg_image_data(&self) -> Option<&JpegImageData> {
        self.jpeg_image_data.as_ref()
    }

    pub fn set_jpeg_image_data(&mut self, data: Option<JpegImageData>) {
        self.jpeg_image_data = data;
    }

    /// Fields in write order.
    ///
    /// Fields from the source keep their relative order. A new field goes in
    /// front of the first source field with a larger tag, so re-writing an
    /// already written directory reproduces the same order.
    pub fn sorted_fields(&self) -> Vec<&TiffOutputField> {
        let mut originals: Vec<&TiffOutputField> =
            self.fields.iter().filter(|f| f.sort_hint.is_some()).collect();
        originals.sort_by_key(|f| f.sort_hint);

        let mut keyed: Vec<((usize, u8, u16), &TiffOutputField)> = originals
            .iter()
            .enumerate()
            .map(|(rank, f)| ((rank, 1, 0), *f))
            .collect();

        for field in self.fields.iter().filter(|f| f.sort_hint.is_none()) {
            let rank = originals
                .iter()
                .position(|o| o.tag > field.tag)
                .unwrap_or(originals.len());
            keyed.push(((rank, 0, field.tag), field));
        }

        keyed.sort_by_key(|(key, _)| *key);
        keyed.into_iter().map(|(_, f)| f).collect()
    }
}

/// All directories of one TIFF stream
#[derive(Debug, Clone)]
pub struct TiffOutputSet {
    pub byte_order: ByteOrder,
    directories: Vec<TiffOutputDirectory>,
}

impl TiffOutputSet {
    pub fn new(byte_order: ByteOrder) -> Self {
        Self {
            byte_order,
            directories: Vec::new(),
        }
    }

    /// Convert parsed contents, keeping the first directory of each kind.
    pub fn from_contents(contents: &TiffContents, byte_order: ByteOrder) -> Result<Self> {
        let mut set = Self::new(byte_order);
        for dir in &contents.directories {
            if set.directory(dir.kind).is_some() {
                log::debug!("Dropping duplicate {} directory", dir.kind);
                continue;
            }
            set.directories.push(dir.get_output_directory(byte_order)?);
        }
        Ok(set)
    }

    pub fn directories(&self) -> &[TiffOutputDirectory] {
        &self.directories
    }

    pub fn directory(&self, kind: DirectoryKind) -> Option<&TiffOutputDirectory> {
        self.directories.iter().find(|d| d.kind == kind)
    }

    pub fn directory_mut(&mut self, kind: DirectoryKind) -> Option<&mut TiffOutputDirectory> {
        self.directories.iter_mut().find(|d| d.kind == kind)
    }

    pub fn get_or_create_directory(&mut self, kind: DirectoryKind) -> &mut TiffOutputDirectory {
        let index = match self.directories.iter().position(|d| d.kind == kind) {
            Some(index) => index,
            None => {
                self.directories
                    .push(TiffOutputDirectory::new(kind, self.byte_order));
                self.directories.len() - 1
            }
        };
        &mut self.directories[index]
    }

    pub fn remove_directory(&mut self, kind: DirectoryKind) -> Option<TiffOutputDirectory> {
        let index = self.directories.iter().position(|d| d.kind == kind)?;
        Some(self.directories.remove(index))
    }

    pub fn find_field(&self, kind: DirectoryKind, tag: u16) -> Option<&TiffOutputField> {
        self.directory(kind).and_then(|d| d.find_field(tag))
    }

    /// Remove a field from the directory of `kind`, if both exist.
    pub fn remove_field(&mut self, kind: DirectoryKind, tag: u16) -> bool {
        self.directory_mut(kind)
            .is_some_and(|directory| directory.remove_field(tag))
    }
}

/// Serializes an output set into a TIFF byte stream
pub struct TiffWriter;

struct PlannedDirectory<'a> {
    directory: &'a TiffOutputDirectory,
    fields: Vec<TiffOutputField>,
    offset: u32,
    value_offsets: Vec<Option<u32>>,
    thumbnail_offset: Option<u32>,
    next_offset: u32,
}

impl PlannedDirectory<'_> {
    /// Size of the directory table: count, entries, next offset.
    fn table_length(&self) -> u64 {
        2 + 12 * self.fields.len() as u64 + 4
    }
}

/// Directories in write order; offsets are filled in by the caller.
struct Layout<'a> {
    order: ByteOrder,
    plans: Vec<PlannedDirectory<'a>>,
    /// IFD0 followed by the rest of the root chain
    chain: Vec<DirectoryKind>,
    /// Directory holding the Interop pointer
    interop_holder: DirectoryKind,
}

impl<'a> Layout<'a> {
    fn new(set: &'a TiffOutputSet) -> Result<Self> {
        let order = set.byte_order;
        let root = set
            .directory(DirectoryKind::Root)
            .ok_or_else(|| Error::write("Output set has no root directory"))?;

        let exif = set.directory(DirectoryKind::Exif);
        let gps = set.directory(DirectoryKind::Gps);
        let interop = set.directory(DirectoryKind::Interoperability);

        let mut siblings: Vec<&TiffOutputDirectory> = set
            .directories
            .iter()
            .filter(|d| !d.kind.is_sub_directory() && d.kind != DirectoryKind::Root)
            .collect();
        siblings.sort_by_key(|d| d.kind.type_code());

        let mut ordered = vec![root];
        ordered.extend(exif);
        ordered.extend(gps);
        ordered.extend(interop);
        ordered.extend(siblings.iter().copied());

        // The Interop pointer lives in the EXIF directory when there is one.
        let interop_holder = if exif.is_some() {
            DirectoryKind::Exif
        } else {
            DirectoryKind::Root
        };

        let mut plans: Vec<PlannedDirectory> = Vec::with_capacity(ordered.len());
        for dir in &ordered {
            let mut fields: Vec<TiffOutputField> = dir
                .sorted_fields()
                .into_iter()
                .filter(|f| !tags::is_offset_tag(f.tag, dir.kind))
                .cloned()
                .collect();

            let mut pointers = Vec::new();
            if dir.kind == DirectoryKind::Root {
                if exif.is_some() {
                    pointers.push(tags::EXIF_OFFSET);
                }
                if gps.is_some() {
                    pointers.push(tags::GPS_INFO);
                }
            }
            if interop.is_some() && dir.kind == interop_holder {
                pointers.push(tags::INTEROP_OFFSET);
            }
            if dir.jpeg_image_data().is_some() {
                pointers.push(tags::JPEG_INTERCHANGE_FORMAT);
                fields.retain(|f| f.tag != tags::JPEG_INTERCHANGE_FORMAT_LENGTH);
                pointers.push(tags::JPEG_INTERCHANGE_FORMAT_LENGTH);
            }
            for tag in pointers {
                insert_by_tag(&mut fields, TiffOutputField::long(tag, 0, order));
            }

            plans.push(PlannedDirectory {
                directory: dir,
                value_offsets: vec![None; fields.len()],
                fields,
                offset: 0,
                thumbnail_offset: None,
                next_offset: 0,
            });
        }

        Ok(Self {
            order,
            plans,
            chain: std::iter::once(DirectoryKind::Root)
                .chain(siblings.iter().map(|d| d.kind))
                .collect(),
            interop_holder,
        })
    }

    /// Point offset-holder fields and next-directory links at the chosen offsets.
    fn resolve_pointers(&mut self) {
        let order = self.order;
        let exif_offset = offset_of(DirectoryKind::Exif, &self.plans);
        let gps_offset = offset_of(DirectoryKind::Gps, &self.plans);
        let interop_offset = offset_of(DirectoryKind::Interoperability, &self.plans);
        let chain_offsets: Vec<u32> = self
            .chain
            .iter()
            .map(|kind| offset_of(*kind, &self.plans))
            .collect();

        for plan in &mut self.plans {
            let kind = plan.directory.kind;
            if let Some(pos) = self.chain.iter().position(|k| *k == kind) {
                plan.next_offset = chain_offsets.get(pos + 1).copied().unwrap_or(0);
            }
            let thumbnail = plan
                .directory
                .jpeg_image_data()
                .map(|t| (plan.thumbnail_offset.unwrap_or(0), t.data.len() as u32));
            for field in &mut plan.fields {
                let value = match field.tag {
                    tags::EXIF_OFFSET if kind == DirectoryKind::Root => exif_offset,
                    tags::GPS_INFO if kind == DirectoryKind::Root => gps_offset,
                    tags::INTEROP_OFFSET if kind == self.interop_holder => interop_offset,
                    tags::JPEG_INTERCHANGE_FORMAT => match thumbnail {
                        Some((offset, _)) => offset,
                        None => continue,
                    },
                    tags::JPEG_INTERCHANGE_FORMAT_LENGTH => match thumbnail {
                        Some((_, len)) => len,
                        None => continue,
                    },
                    _ => continue,
                };
                *field = TiffOutputField {
                    sort_hint: field.sort_hint,
                    ..TiffOutputField::long(field.tag, value, order)
                };
            }
        }
    }

    /// Write header, directory tables, values and thumbnails at their offsets.
    fn emit(mut self, mut out: Vec<u8>) -> Result<Vec<u8>> {
        self.resolve_pointers();
        let order = self.order;

        let mut header = Vec::with_capacity(TIFF_HEADER_SIZE as usize);
        header.extend_from_slice(&order.marker());
        order.write_u16(&mut header, TIFF_VERSION)?;
        order.write_u32(&mut header, offset_of(DirectoryKind::Root, &self.plans))?;
        put(&mut out, 0, &header);

        for plan in &self.plans {
            let count = u16::try_from(plan.fields.len()).map_err(|_| {
                Error::write(format!(
                    "{} has {} fields, more than a directory can hold",
                    plan.directory.kind.description(),
                    plan.fields.len()
                ))
            })?;

            let mut table = Vec::with_capacity(plan.table_length() as usize);
            order.write_u16(&mut table, count)?;
            for (field, value_offset) in plan.fields.iter().zip(&plan.value_offsets) {
                order.write_u16(&mut table, field.tag)?;
                order.write_u16(&mut table, field.field_type.code())?;
                order.write_u32(&mut table, field.count)?;
                match value_offset {
                    Some(offset) => order.write_u32(&mut table, *offset)?,
                    None => {
                        let mut inline = [0u8; 4];
                        inline[..field.bytes.len()].copy_from_slice(&field.bytes);
                        table.extend_from_slice(&inline);
                    }
                }
            }
            order.write_u32(&mut table, plan.next_offset)?;
            put(&mut out, plan.offset, &table);

            for (field, value_offset) in plan.fields.iter().zip(&plan.value_offsets) {
                if let Some(offset) = value_offset {
                    put(&mut out, *offset, &field.bytes);
                }
            }
            if let (Some(offset), Some(thumb)) =
                (plan.thumbnail_offset, plan.directory.jpeg_image_data())
            {
                put(&mut out, offset, &thumb.data);
            }
        }

        Ok(out)
    }
}

impl TiffWriter {
    /// Write the set as a complete TIFF stream.
    ///
    /// Layout: header, IFD0, EXIF, GPS, Interop, then the remaining root-chain
    /// directories. Each directory is followed by its out-of-line values and
    /// thumbnail bytes, all starting on even offsets.
    pub fn write(set: &TiffOutputSet) -> Result<Vec<u8>> {
        let mut layout = Layout::new(set)?;

        let mut cursor = TIFF_HEADER_SIZE as u64;
        let mut next = |len: u64| -> Result<u32> {
            let offset = align(cursor);
            cursor = offset + len;
            to_offset(offset)
        };
        for plan in &mut layout.plans {
            plan.offset = next(plan.table_length())?;
            for (i, field) in plan.fields.iter().enumerate() {
                if field.bytes.len() > TIFF_ENTRY_MAX_VALUE_LENGTH as usize {
                    plan.value_offsets[i] = Some(next(field.bytes.len() as u64)?);
                }
            }
            if let Some(thumb) = plan.directory.jpeg_image_data() {
                plan.thumbnail_offset = Some(next(thumb.data.len() as u64)?);
            }
        }

        layout.emit(Vec::new())
    }

    /// Write the set over `source`, the stream `contents` was read from.
    ///
    /// Out-of-line values and the thumbnail stay at their source offsets
    /// while their bytes are unchanged, so data addressed from inside other
    /// values (MakerNote offsets) keeps pointing at the right bytes. Directory
    /// tables and new or changed values take the first free space left by
    /// the source structures, then go after the end of the stream. Space the
    /// source structures no longer use is zeroed; bytes no directory refers
    /// to are copied unchanged.
    pub fn write_over(set: &TiffOutputSet, contents: &TiffContents, source: &[u8]) -> Result<Vec<u8>> {
        let mut layout = Layout::new(set)?;

        let unchanged = |offset: u32, bytes: &[u8]| -> bool {
            let start = offset as usize;
            offset >= TIFF_HEADER_SIZE
                && start
                    .checked_add(bytes.len())
                    .and_then(|end| source.get(start..end))
                    == Some(bytes)
        };

        let mut kept = vec![0..TIFF_HEADER_SIZE as u64];
        for plan in &mut layout.plans {
            for (i, field) in plan.fields.iter().enumerate() {
                let Some(offset) = field.source_offset else {
                    continue;
                };
                if field.bytes.len() > TIFF_ENTRY_MAX_VALUE_LENGTH as usize
                    && unchanged(offset, &field.bytes)
                {
                    plan.value_offsets[i] = Some(offset);
                    kept.push(span(offset, field.bytes.len()));
                }
            }
            if let Some(thumb) = plan.directory.jpeg_image_data() {
                if !thumb.data.is_empty() && unchanged(thumb.offset, &thumb.data) {
                    plan.thumbnail_offset = Some(thumb.offset);
                    kept.push(span(thumb.offset, thumb.data.len()));
                }
            }
        }

        let mut used = Vec::new();
        for directory in &contents.directories {
            used.push(span(directory.offset, directory.length() as usize));
            for entry in &directory.entries {
                if entry.value_bytes.len() > TIFF_ENTRY_MAX_VALUE_LENGTH as usize {
                    used.push(span(entry.offset, entry.value_bytes.len()));
                }
            }
            if let Some(thumb) = &directory.jpeg_image_data {
                used.push(span(thumb.offset, thumb.data.len()));
            }
        }
        let mut space = FreeSpace::new(used, &kept, source.len() as u64);

        let mut out = source.to_vec();
        for range in &space.ranges {
            out[range.start as usize..range.end as usize].fill(0);
        }

        for plan in &mut layout.plans {
            plan.offset = to_offset(space.allocate(plan.table_length()))?;
            for (i, field) in plan.fields.iter().enumerate() {
                if field.bytes.len() > TIFF_ENTRY_MAX_VALUE_LENGTH as usize
                    && plan.value_offsets[i].is_none()
                {
                    plan.value_offsets[i] =
                        Some(to_offset(space.allocate(field.bytes.len() as u64))?);
                }
            }
            if let Some(thumb) = plan.directory.jpeg_image_data() {
                if plan.thumbnail_offset.is_none() {
                    plan.thumbnail_offset =
                        Some(to_offset(space.allocate(thumb.data.len() as u64))?);
                }
            }
        }
        log::debug!(
            "Rewrote TIFF over {} source bytes, {} values kept in place",
            source.len(),
            kept.len() - 1
        );

        layout.emit(out)
    }
}

/// Source byte ranges that may be overwritten, sorted and disjoint
struct FreeSpace {
    ranges: Vec<Range<u64>>,
    /// End of the stream; allocations that fit nowhere go here
    end: u64,
}

impl FreeSpace {
    /// Ranges covered by `used` but by none of `kept`, within `0..end`.
    fn new(mut used: Vec<Range<u64>>, kept: &[Range<u64>], end: u64) -> Self {
        used.sort_by_key(|r| r.start);
        let mut ranges: Vec<Range<u64>> = Vec::new();
        for range in used {
            let range = range.start.min(end)..range.end.min(end);
            if range.is_empty() {
                continue;
            }
            if let Some(last) = ranges.last_mut() {
                if range.start <= last.end {
                    last.end = last.end.max(range.end);
                    continue;
                }
            }
            ranges.push(range);
        }
        for keep in kept.iter().filter(|k| !k.is_empty()) {
            ranges = ranges
                .into_iter()
                .flat_map(|r| [r.start..r.end.min(keep.start), r.start.max(keep.end)..r.end])
                .filter(|r| !r.is_empty())
                .collect();
        }
        Self { ranges, end }
    }

    /// Even offset for `len` bytes: the first free range with room, else the end.
    fn allocate(&mut self, len: u64) -> u64 {
        let fit = self
            .ranges
            .iter()
            .position(|r| align(r.start) + len <= r.end);
        match fit {
            Some(index) => {
                let range = self.ranges[index].clone();
                let start = align(range.start);
                if start + len < range.end {
                    self.ranges[index] = start + len..range.end;
                } else {
                    self.ranges.remove(index);
                }
                start
            }
            None => {
                let start = align(self.end);
                self.end = start + len;
                start
            }
        }
    }
}

fn offset_of(kind: DirectoryKind, plans: &[PlannedDirectory<'_>]) -> u32 {
    plans
        .iter()
        .find(|p| p.directory.kind == kind)
        .map(|p| p.offset)
        .unwrap_or(0)
}

fn insert_by_tag(fields: &mut Vec<TiffOutputField>, field: TiffOutputField) {
    let pos = fields
        .iter()
        .position(|f| f.tag > field.tag)
        .unwrap_or(fields.len());
    fields.insert(pos, field);
}

fn align(offset: u64) -> u64 {
    (offset + 1) & !1
}

fn span(offset: u32, len: usize) -> Range<u64> {
    offset as u64..offset as u64 + len as u64
}

fn to_offset(offset: u64) -> Result<u32> {
    u32::try_from(offset).map_err(|_| Error::DataTooLarge {
        size: offset as usize,
        max: u32::MAX as usize,
    })
}

/// Copy `bytes` to `offset`, growing `out` with zeros as needed.
fn put(out: &mut Vec<u8>, offset: u32, bytes: &[u8]) {
    let start = offset as usize;
    let end = start + bytes.len();
    if out.len() < end {
        out.resize(end, 0);
    }
    out[start..end].copy_from_slice(bytes);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::TiffBuilder;
    use crate::tiff::read_tiff_bytes;

    fn field_with_hint(tag: u16, hint: Option<usize>) -> TiffOutputField {
        TiffOutputField {
            sort_hint: hint,
            ..TiffOutputField::short(tag, 1, ByteOrder::BigEndian)
        }
    }

    #[test]
    fn test_sort_keeps_original_order_and_slots_new_fields() {
        let mut dir = TiffOutputDirectory::new(DirectoryKind::Root, ByteOrder::BigEndian);
        dir.add(field_with_hint(0x0132, Some(0)));
        dir.add(field_with_hint(0x010F, Some(1)));
        dir.add(field_with_hint(0x0200, Some(2)));
        dir.add(field_with_hint(0x0112, None));
        dir.add(field_with_hint(0x0001, None));
        dir.add(field_with_hint(0x9999, None));

        let tags: Vec<u16> = dir.sorted_fields().iter().map(|f| f.tag).collect();
        assert_eq!(tags, vec![0x0001, 0x0112, 0x0132, 0x010F, 0x0200, 0x9999]);
    }

    #[test]
    fn test_set_keeps_position() {
        let mut dir = TiffOutputDirectory::new(DirectoryKind::Root, ByteOrder::BigEndian);
        dir.add(field_with_hint(0x0132, Some(0)));
        dir.add(field_with_hint(0x0112, Some(1)));
        dir.set(TiffOutputField::short(0x0112, 6, ByteOrder::BigEndian));
        assert_eq!(dir.fields().len(), 2);
        assert_eq!(dir.find_field(0x0112).unwrap().sort_hint, Some(1));
        assert_eq!(dir.find_field(0x0112).unwrap().bytes, [0, 6]);
        assert!(dir.remove_field(0x0132));
        assert!(!dir.remove_field(0x0132));
    }

    #[test]
    fn test_write_requires_root() {
        let mut set = TiffOutputSet::new(ByteOrder::BigEndian);
        set.get_or_create_directory(DirectoryKind::Exif);
        let err = TiffWriter::write(&set).unwrap_err();
        assert!(err.is_write_error());
    }

    #[test]
    fn test_too_many_fields_is_write_error() {
        let order = ByteOrder::BigEndian;
        let mut set = TiffOutputSet::new(order);
        set.get_or_create_directory(DirectoryKind::Root)
            .add(TiffOutputField::short(tags::ORIENTATION, 1, order));
        let exif = set.get_or_create_directory(DirectoryKind::Exif);
        for _ in 0..=u16::MAX as usize {
            exif.add(TiffOutputField::short(tags::ISO, 100, order));
        }
        let err = TiffWriter::write(&set).unwrap_err();
        assert!(err.is_write_error());
        assert!(err.to_string().contains("65536 fields"), "{err}");
    }

    #[test]
    fn test_free_space_first_fit() {
        let mut space = FreeSpace::new(vec![30..40, 8..20, 15..24], &[12..14], 50);
        assert_eq!(space.ranges, vec![8..12, 14..24, 30..40]);
        assert_eq!(space.allocate(6), 14);
        assert_eq!(space.allocate(3), 8);
        assert_eq!(space.allocate(10), 30);
        assert_eq!(space.allocate(4), 20);
        assert_eq!(space.allocate(1), 50, "nothing left before the end");
        assert_eq!(space.allocate(2), 52);
    }

    fn tiff_with_maker_note(order: ByteOrder) -> Vec<u8> {
        let maker_note = b"Nikon\0\x02\x10\0\0MM\0\x2A\0\0\0\x08";
        let mut source = TiffBuilder::new(order)
            .entry(tags::MAKE, 2, 6, b"Nikon\0")
            .entry(tags::ORIENTATION, 3, 1, &FieldValue::Shorts(vec![1]).encode(order))
            .exif(|e| {
                e.entry(tags::ISO, 3, 1, &FieldValue::Shorts(vec![100]).encode(order))
                    .entry(tags::MAKER_NOTE, 7, maker_note.len() as u32, maker_note)
            })
            .build();
        // Bytes nothing points at, as MakerNote-internal data would be
        source.extend_from_slice(b"private!");
        source
    }

    #[test]
    fn test_write_over_keeps_unchanged_values_in_place() {
        let order = ByteOrder::LittleEndian;
        let source = tiff_with_maker_note(order);
        let contents = read_tiff_bytes(&source).unwrap();
        let note = contents.find_field(DirectoryKind::Exif, tags::MAKER_NOTE).unwrap();
        let make = contents.find_field(DirectoryKind::Root, tags::MAKE).unwrap();

        let mut set = TiffOutputSet::from_contents(&contents, order).unwrap();
        set.get_or_create_directory(DirectoryKind::Root)
            .set(TiffOutputField::short(tags::ORIENTATION, 6, order));
        set.get_or_create_directory(DirectoryKind::Exif).set(TiffOutputField::ascii(
            tags::DATE_TIME_ORIGINAL,
            "2023:07:12 12:48:45",
            order,
        ));
        let written = TiffWriter::write_over(&set, &contents, &source).unwrap();

        let reread = read_tiff_bytes(&written).unwrap();
        let moved = reread.find_field(DirectoryKind::Exif, tags::MAKER_NOTE).unwrap();
        assert_eq!(moved.offset, note.offset);
        assert_eq!(moved.value_bytes, note.value_bytes);
        assert_eq!(
            reread.find_field(DirectoryKind::Root, tags::MAKE).unwrap().offset,
            make.offset
        );
        let end = source.len();
        assert_eq!(&written[end - 8..end], b"private!");

        let orientation = reread.find_field(DirectoryKind::Root, tags::ORIENTATION).unwrap();
        assert_eq!(orientation.int_value().unwrap(), 6);
        assert!(reread
            .find_field(DirectoryKind::Exif, tags::DATE_TIME_ORIGINAL)
            .is_some());
    }

    #[test]
    fn test_write_over_unchanged_set_is_identical() {
        for order in [ByteOrder::BigEndian, ByteOrder::LittleEndian] {
            let source = crate::test_utils::sample_exif(order);
            let contents = read_tiff_bytes(&source).unwrap();
            let set = TiffOutputSet::from_contents(&contents, order).unwrap();
            assert_eq!(TiffWriter::write_over(&set, &contents, &source).unwrap(), source);
        }

        let order = ByteOrder::BigEndian;
        let source = tiff_with_maker_note(order);
        let contents = read_tiff_bytes(&source).unwrap();
        let set = TiffOutputSet::from_contents(&contents, order).unwrap();
        let once = TiffWriter::write_over(&set, &contents, &source).unwrap();
        let reread = read_tiff_bytes(&once).unwrap();
        let set = TiffOutputSet::from_contents(&reread, order).unwrap();
        assert_eq!(TiffWriter::write_over(&set, &reread, &once).unwrap(), once);
    }

    #[test]
    fn test_write_over_zeroes_dropped_values() {
        let order = ByteOrder::BigEndian;
        let source = crate::test_utils::sample_exif(order);
        let latitude = TiffOutputField::rationals(
            tags::GPS_LATITUDE,
            &[Rational::new(53, 1), Rational::new(13, 1), Rational::new(9808, 1000)],
            order,
        )
        .bytes;
        let contains = |bytes: &[u8]| bytes.windows(latitude.len()).any(|w| w == latitude);
        assert!(contains(&source));

        let contents = read_tiff_bytes(&source).unwrap();
        let mut set = TiffOutputSet::from_contents(&contents, order).unwrap();
        set.remove_directory(DirectoryKind::Gps);
        let written = TiffWriter::write_over(&set, &contents, &source).unwrap();

        assert!(!contains(&written));
        assert!(written.len() <= source.len());
        let reread = read_tiff_bytes(&written).unwrap();
        assert!(reread.directory(DirectoryKind::Gps).is_none());
        assert!(reread.find_field(DirectoryKind::Root, tags::GPS_INFO).is_none());
        assert!(reread.find_field(DirectoryKind::Exif, tags::ISO).is_some());
    }

    #[test]
    fn test_new_field_type_mismatch_is_write_error() {
        let err = TiffOutputField::new(
            tags::ORIENTATION,
            FieldType::Short,
            &FieldValue::Longs(vec![1]),
            ByteOrder::BigEndian,
        )
        .unwrap_err();
        assert!(err.is_write_error());
    }

    #[test]
    fn test_write_then_read() {
        let order = ByteOrder::LittleEndian;
        let mut set = TiffOutputSet::new(order);
        let root = set.get_or_create_directory(DirectoryKind::Root);
        root.add(TiffOutputField::short(tags::ORIENTATION, 6, order));
        root.add(TiffOutputField::ascii(tags::MAKE, "Canon", order));
        let exif = set.get_or_create_directory(DirectoryKind::Exif);
        exif.add(TiffOutputField::ascii(tags::DATE_TIME_ORIGINAL, "2023:07:12 12:48:45", order));
        let gps = set.get_or_create_directory(DirectoryKind::Gps);
        gps.add(TiffOutputField::rationals(
            tags::GPS_LATITUDE,
            &[Rational::new(53, 1), Rational::new(13, 1), Rational::new(1000, 100)],
            order,
        ));

        let bytes = TiffWriter::write(&set).unwrap();
        assert_eq!(&bytes[..4], b"II\x2A\x00");

        let contents = read_tiff_bytes(&bytes).unwrap();
        assert_eq!(contents.directories.len(), 3);
        let root = contents.directory(DirectoryKind::Root).unwrap();
        let tags_in_root: Vec<u16> = root.entries.iter().map(|f| f.tag).collect();
        assert_eq!(
            tags_in_root,
            vec![tags::MAKE, tags::ORIENTATION, tags::EXIF_OFFSET, tags::GPS_INFO]
        );
        assert_eq!(
            contents
                .find_field(DirectoryKind::Gps, tags::GPS_LATITUDE)
                .unwrap()
                .rational_values()
                .unwrap()[2],
            Rational::new(1000, 100)
        );
        assert_eq!(bytes.len() % 2, 0);
    }

    #[test]
    fn test_round_trip_preserves_fields() {
        let source = TiffBuilder::new(ByteOrder::BigEndian)
            .entry(tags::MAKE, 2, 6, b"Canon\0")
            .entry(tags::ORIENTATION, 3, 1, &[0, 8])
            .exif(|e| {
                e.entry(tags::ISO, 3, 1, &[0, 100])
                    .entry(tags::EXPOSURE_TIME, 5, 1, &[0, 0, 0, 1, 0, 0, 0, 125])
            })
            .thumbnail(&[0xFF, 0xD8, 0xAA, 0xFF, 0xD9], 5)
            .build();

        let original = read_tiff_bytes(&source).unwrap();
        let set = TiffOutputSet::from_contents(&original, ByteOrder::LittleEndian).unwrap();
        let written = TiffWriter::write(&set).unwrap();
        let reread = read_tiff_bytes(&written).unwrap();

        for dir in &original.directories {
            let other = reread.directory(dir.kind).unwrap();
            let mine: Vec<_> = dir
                .entries
                .iter()
                .filter(|f| !f.is_offset())
                .map(|f| (f.tag, f.value().unwrap()))
                .collect();
            let theirs: Vec<_> = other
                .entries
                .iter()
                .filter(|f| !f.is_offset())
                .map(|f| (f.tag, f.value().unwrap()))
                .collect();
            assert_eq!(mine, theirs, "{}", dir.kind);
        }
        assert_eq!(reread.thumbnail(), Some(&[0xFF, 0xD8, 0xAA, 0xFF, 0xD9][..]));

        // A second pass is byte-identical.
        let set = TiffOutputSet::from_contents(&reread, ByteOrder::LittleEndian).unwrap();
        assert_eq!(TiffWriter::write(&set).unwrap(), written);
    }
}
