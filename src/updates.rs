//! Metadata edits and the options controlling how they are applied

use std::collections::BTreeSet;

use chrono::{DateTime, FixedOffset, Local, NaiveDateTime};

use crate::{
    error::{Error, Result},
    metadata::{GpsCoordinates, PhotoRating, TiffOrientation},
    tiff::ByteOrder,
};

/// One semantic edit
///
/// Every variant is handled by an exhaustive `match` wherever updates are
/// applied, so adding a kind forces each writer to decide what to do with it.
#[derive(Debug, Clone, PartialEq)]
pub enum MetadataUpdate {
    Orientation(TiffOrientation),
    /// Milliseconds since the Unix epoch; `None` clears the date
    TakenDate(Option<i64>),
    /// `None` clears the position
    GpsCoordinates(Option<GpsCoordinates>),
    Rating(PhotoRating),
    /// Replaces the whole keyword set; an empty set removes all keywords
    Keywords(BTreeSet<String>),
    /// Replaces the whole set of person names
    Persons(BTreeSet<String>),
}

impl MetadataUpdate {
    /// Whether this edit has an EXIF representation besides XMP.
    pub fn affects_exif(&self) -> bool {
        match self {
            MetadataUpdate::Orientation(_)
            | MetadataUpdate::TakenDate(_)
            | MetadataUpdate::GpsCoordinates(_) => true,
            MetadataUpdate::Rating(_)
            | MetadataUpdate::Keywords(_)
            | MetadataUpdate::Persons(_) => false,
        }
    }
}

/// Zone used to interpret and render EXIF local date/time strings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DateTimeZone {
    /// The host's local zone
    #[default]
    Local,
    Utc,
}

/// Options for reading and updating
///
/// The default reads dates in local time, writes new EXIF blocks big
/// endian, and mirrors orientation/date/GPS edits into EXIF.
///
/// # Example
///
/// ```
/// use image_meta_io::{DateTimeZone, Options};
///
/// let options = Options::new().time_zone(DateTimeZone::Utc).write_exif(false);
/// assert_eq!(options.zone(), DateTimeZone::Utc);
/// ```
#[derive(Debug, Clone)]
pub struct Options {
    pub(crate) time_zone: DateTimeZone,
    pub(crate) exif_byte_order: ByteOrder,
    pub(crate) write_exif: bool,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            time_zone: DateTimeZone::Local,
            exif_byte_order: ByteOrder::BigEndian,
            write_exif: true,
        }
    }
}

impl Options {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the zone for EXIF date/time strings without an offset tag
    pub fn time_zone(mut self, zone: DateTimeZone) -> Self {
        self.time_zone = zone;
        self
    }

    /// Set the byte order used when a new EXIF block has to be created
    ///
    /// Existing EXIF blocks keep their byte order.
    pub fn exif_byte_order(mut self, byte_order: ByteOrder) -> Self {
        self.exif_byte_order = byte_order;
        self
    }

    /// Mirror orientation, taken date and GPS edits into EXIF
    pub fn write_exif(mut self, enabled: bool) -> Self {
        self.write_exif = enabled;
        self
    }

    pub fn zone(&self) -> DateTimeZone {
        self.time_zone
    }

    pub fn byte_order(&self) -> ByteOrder {
        self.exif_byte_order
    }

    pub fn writes_exif(&self) -> bool {
        self.write_exif
    }

    /// A timestamp as wall-clock time in the configured zone.
    pub(crate) fn localize(&self, millis: i64) -> Result<DateTime<FixedOffset>> {
        let utc = DateTime::from_timestamp_millis(millis)
            .ok_or_else(|| Error::write(format!("Timestamp {} is out of range", millis)))?;
        Ok(match self.time_zone {
            DateTimeZone::Utc => utc.fixed_offset(),
            DateTimeZone::Local => utc.with_timezone(&Local).fixed_offset(),
        })
    }

    /// Milliseconds since the epoch of a wall-clock time without an offset,
    /// read in the configured zone. Ambiguous local times take the earlier
    /// instant; nonexistent ones yield `None`.
    pub(crate) fn timestamp_millis(&self, naive: NaiveDateTime) -> Option<i64> {
        match self.time_zone {
            DateTimeZone::Utc => Some(naive.and_utc().timestamp_millis()),
            DateTimeZone::Local => naive
                .and_local_timezone(Local)
                .earliest()
                .map(|date| date.timestamp_millis()),
        }
    }

    /// True when `updates` need the EXIF block rewritten under these options.
    pub(crate) fn needs_exif_rewrite(&self, updates: &[MetadataUpdate]) -> bool {
        self.write_exif && updates.iter().any(MetadataUpdate::affects_exif)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let options = Options::default();
        assert_eq!(options.zone(), DateTimeZone::Local);
        assert_eq!(options.byte_order(), ByteOrder::BigEndian);
        assert!(options.writes_exif());
    }

    #[test]
    fn test_builder() {
        let options = Options::new()
            .time_zone(DateTimeZone::Utc)
            .exif_byte_order(ByteOrder::LittleEndian)
            .write_exif(false);
        assert_eq!(options.zone(), DateTimeZone::Utc);
        assert_eq!(options.byte_order(), ByteOrder::LittleEndian);
        assert!(!options.needs_exif_rewrite(&[MetadataUpdate::TakenDate(None)]));
    }

    #[test]
    fn test_utc_conversions() {
        let options = Options::new().time_zone(DateTimeZone::Utc);
        let date = options.localize(1_689_166_125_401).unwrap();
        assert_eq!(date.to_rfc3339(), "2023-07-12T12:48:45.401+00:00");
        assert_eq!(
            options.timestamp_millis(date.naive_local()),
            Some(1_689_166_125_401)
        );
        assert!(options.localize(i64::MAX).unwrap_err().is_write_error());
    }

    #[test]
    fn test_local_round_trip() {
        let options = Options::default();
        let date = options.localize(1_689_166_125_401).unwrap();
        assert_eq!(
            options.timestamp_millis(date.naive_local()),
            Some(1_689_166_125_401)
        );
    }

    #[test]
    fn test_exif_relevance() {
        let options = Options::default();
        assert!(options.needs_exif_rewrite(&[
            MetadataUpdate::Rating(PhotoRating::OneStar),
            MetadataUpdate::Orientation(TiffOrientation::RotateLeft),
        ]));
        assert!(!options.needs_exif_rewrite(&[
            MetadataUpdate::Rating(PhotoRating::OneStar),
            MetadataUpdate::Keywords(BTreeSet::new()),
            MetadataUpdate::Persons(BTreeSet::new()),
        ]));
    }
}
