//! Translation between EXIF directories and [`PhotoMetadata`]
//!
//! Reading pulls the common camera fields out of IFD0, the EXIF
//! sub-directory and the GPS sub-directory. Writing applies orientation,
//! capture time and GPS edits onto a [`TiffOutputSet`]; rating, keywords and
//! persons have no EXIF home and are left to XMP.

use chrono::{FixedOffset, NaiveDateTime};

use crate::{
    error::{Error, Result},
    metadata::{GpsCoordinates, PhotoMetadata, TiffOrientation},
    tiff::{
        field::{FieldType, Rational}, read_tiff_bytes, tags, DirectoryKind, TiffContents, TiffOutputField,
        TiffOutputSet, TiffWriter,
    },
    updates::{MetadataUpdate, Options},
};

/// Layout of DateTime, DateTimeOriginal and DateTimeDigitized
pub const EXIF_DATE_FORMAT: &str = "%Y:%m:%d %H:%M:%S";

/// GPSVersionID written with new coordinates
const GPS_VERSION: [u8; 4] = [2, 3, 0, 0];

/// Extract metadata from parsed EXIF/TIFF contents.
pub fn photo_metadata(contents: &TiffContents, options: &Options) -> PhotoMetadata {
    let root_int = |tag| {
        contents
            .find_field(DirectoryKind::Root, tag)
            .and_then(|f| f.int_value().ok())
    };
    let exif_int = |tag| {
        contents
            .find_field(DirectoryKind::Exif, tag)
            .and_then(|f| f.int_values().ok())
            .and_then(|values| values.first().copied())
    };
    let string = |kind, tag| {
        contents
            .find_field(kind, tag)
            .and_then(|f| f.string_value())
            .filter(|s| !s.is_empty())
    };
    let rational = |tag| {
        contents
            .find_field(DirectoryKind::Exif, tag)
            .and_then(|f| f.rational_values())
            .and_then(|values| values.first().copied())
            .and_then(Rational::to_f64)
    };

    PhotoMetadata {
        width_px: exif_int(tags::EXIF_IMAGE_WIDTH).or_else(|| root_int(tags::IMAGE_WIDTH)),
        height_px: exif_int(tags::EXIF_IMAGE_HEIGHT).or_else(|| root_int(tags::IMAGE_LENGTH)),
        orientation: root_int(tags::ORIENTATION).and_then(TiffOrientation::from_value),
        taken_date: taken_date(contents, options),
        gps_coordinates: gps_coordinates(contents),
        camera_make: string(DirectoryKind::Root, tags::MAKE),
        camera_model: string(DirectoryKind::Root, tags::MODEL),
        lens_make: string(DirectoryKind::Exif, tags::LENS_MAKE),
        lens_model: string(DirectoryKind::Exif, tags::LENS_MODEL),
        iso: exif_int(tags::ISO),
        exposure_time: rational(tags::EXPOSURE_TIME),
        f_number: rational(tags::F_NUMBER),
        focal_length: rational(tags::FOCAL_LENGTH),
        ..Default::default()
    }
}

fn taken_date(contents: &TiffContents, options: &Options) -> Option<i64> {
    let field = |tag| {
        contents
            .find_field(DirectoryKind::Exif, tag)
            .and_then(|f| f.string_value())
    };

    let date_time = field(tags::DATE_TIME_ORIGINAL)?;
    let naive = match NaiveDateTime::parse_from_str(date_time.trim(), EXIF_DATE_FORMAT) {
        Ok(naive) => naive,
        Err(e) => {
            log::debug!("Ignoring unparsable DateTimeOriginal '{}': {}", date_time, e);
            return None;
        }
    };

    let millis = field(tags::SUB_SEC_TIME_ORIGINAL)
        .map(|s| sub_sec_millis(&s))
        .unwrap_or(0);

    let base = match field(tags::OFFSET_TIME_ORIGINAL).and_then(|s| parse_offset(&s)) {
        Some(offset) => naive.and_local_timezone(offset).single()?.timestamp_millis(),
        None => options.timestamp_millis(naive)?,
    };

    Some(base + millis)
}

/// Fraction digits of SubSecTime as milliseconds ("4" is 400, "40123" is 401).
fn sub_sec_millis(value: &str) -> i64 {
    let digits: String = value
        .trim()
        .chars()
        .take_while(char::is_ascii_digit)
        .take(3)
        .collect();
    if digits.is_empty() {
        return 0;
    }
    format!("{:0<3}", digits).parse().unwrap_or(0)
}

/// Parse an OffsetTime value such as "+02:00" or "-0530".
fn parse_offset(value: &str) -> Option<FixedOffset> {
    let value = value.trim();
    let (sign, rest) = match value.as_bytes().first().copied()? {
        b'+' => (1, &value[1..]),
        b'-' => (-1, &value[1..]),
        _ => return None,
    };
    let digits: String = rest.chars().filter(|c| *c != ':').collect();
    if digits.len() != 4 || !digits.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    let hours: i32 = digits[..2].parse().ok()?;
    let minutes: i32 = digits[2..].parse().ok()?;
    FixedOffset::east_opt(sign * (hours * 3600 + minutes * 60))
}

fn gps_coordinates(contents: &TiffContents) -> Option<GpsCoordinates> {
    let gps = contents.directory(DirectoryKind::Gps)?;
    let reference = |tag| gps.find_field(tag).and_then(|f| f.string_value());
    let degrees = |tag| {
        gps.find_field(tag)
            .and_then(|f| f.rational_values())
            .and_then(|values| dms_to_degrees(&values))
    };

    let mut latitude = degrees(tags::GPS_LATITUDE)?;
    let mut longitude = degrees(tags::GPS_LONGITUDE)?;
    if reference(tags::GPS_LATITUDE_REF).as_deref() == Some("S") {
        latitude = -latitude;
    }
    if reference(tags::GPS_LONGITUDE_REF).as_deref() == Some("W") {
        longitude = -longitude;
    }
    Some(GpsCoordinates::new(latitude, longitude))
}

fn dms_to_degrees(values: &[Rational]) -> Option<f64> {
    let [d, m, s] = values else {
        return None;
    };
    Some(d.to_f64()? + m.to_f64()? / 60.0 + s.to_f64()? / 3600.0)
}

/// Split decimal degrees into degree, minute and millisecond-precision
/// second rationals. The sign is dropped; it lives in the reference tag.
fn degrees_to_dms(value: f64) -> [Rational; 3] {
    let total_millis = (value.abs() * 3_600_000.0).round() as u64;
    let degrees = total_millis / 3_600_000;
    let minutes = (total_millis % 3_600_000) / 60_000;
    let second_millis = total_millis % 60_000;
    [
        Rational::new(degrees as u32, 1),
        Rational::new(minutes as u32, 1),
        Rational::new(second_millis as u32, 1000),
    ]
}

/// Format a timestamp the way EXIF stores it: local date/time, sub-second
/// milliseconds and the UTC offset.
pub fn format_taken_date(millis: i64, options: &Options) -> Result<(String, String, String)> {
    let date = options.localize(millis)?;
    Ok((
        date.format(EXIF_DATE_FORMAT).to_string(),
        format!("{:03}", date.timestamp_subsec_millis()),
        date.format("%:z").to_string(),
    ))
}

/// Apply one update to an EXIF output set.
pub fn apply_update(set: &mut TiffOutputSet, update: &MetadataUpdate, options: &Options) -> Result<()> {
    let order = set.byte_order;
    match update {
        MetadataUpdate::Orientation(orientation) => {
            set.get_or_create_directory(DirectoryKind::Root)
                .set(TiffOutputField::short(tags::ORIENTATION, orientation.value(), order));
        }
        MetadataUpdate::TakenDate(Some(millis)) => {
            let (date_time, sub_sec, offset) = format_taken_date(*millis, options)?;
            let exif = set.get_or_create_directory(DirectoryKind::Exif);
            exif.set(TiffOutputField::ascii(tags::DATE_TIME_ORIGINAL, &date_time, order));
            exif.set(TiffOutputField::ascii(tags::SUB_SEC_TIME_ORIGINAL, &sub_sec, order));
            exif.set(TiffOutputField::ascii(tags::OFFSET_TIME_ORIGINAL, &offset, order));
        }
        MetadataUpdate::TakenDate(None) => {
            for tag in [
                tags::DATE_TIME_ORIGINAL,
                tags::SUB_SEC_TIME_ORIGINAL,
                tags::OFFSET_TIME_ORIGINAL,
            ] {
                set.remove_field(DirectoryKind::Exif, tag);
            }
        }
        MetadataUpdate::GpsCoordinates(Some(gps)) => {
            if !gps.is_valid() {
                return Err(Error::write(format!("Invalid GPS coordinates: {}", gps)));
            }
            let directory = set.get_or_create_directory(DirectoryKind::Gps);
            directory.set(TiffOutputField::bytes(
                tags::GPS_VERSION_ID,
                FieldType::Byte,
                GPS_VERSION.to_vec(),
            ));
            let lat_ref = if gps.latitude < 0.0 { "S" } else { "N" };
            let lon_ref = if gps.longitude < 0.0 { "W" } else { "E" };
            directory.set(TiffOutputField::ascii(tags::GPS_LATITUDE_REF, lat_ref, order));
            directory.set(TiffOutputField::rationals(
                tags::GPS_LATITUDE,
                &degrees_to_dms(gps.latitude),
                order,
            ));
            directory.set(TiffOutputField::ascii(tags::GPS_LONGITUDE_REF, lon_ref, order));
            directory.set(TiffOutputField::rationals(
                tags::GPS_LONGITUDE,
                &degrees_to_dms(gps.longitude),
                order,
            ));
        }
        MetadataUpdate::GpsCoordinates(None) => {
            if let Some(directory) = set.directory_mut(DirectoryKind::Gps) {
                for tag in [
                    tags::GPS_VERSION_ID,
                    tags::GPS_LATITUDE_REF,
                    tags::GPS_LATITUDE,
                    tags::GPS_LONGITUDE_REF,
                    tags::GPS_LONGITUDE,
                ] {
                    directory.remove_field(tag);
                }
                if directory.is_empty() {
                    set.remove_directory(DirectoryKind::Gps);
                }
            }
        }
        MetadataUpdate::Rating(_) | MetadataUpdate::Keywords(_) | MetadataUpdate::Persons(_) => {}
    }
    Ok(())
}

/// Rewrite an EXIF block (or create one) with `updates` applied.
///
/// An existing block keeps its byte order and is rewritten in place, so
/// unchanged out-of-line values such as the MakerNote keep their offsets. A
/// new one uses the configured order. A block that fails to parse is an error
/// rather than being replaced.
pub fn update_exif(
    existing: Option<&[u8]>,
    updates: &[MetadataUpdate],
    options: &Options,
) -> Result<Vec<u8>> {
    let source = existing
        .map(|bytes| read_tiff_bytes(bytes).map(|contents| (contents, bytes)))
        .transpose()?;
    let mut set = match &source {
        Some((contents, _)) => TiffOutputSet::from_contents(contents, contents.header.byte_order)?,
        None => TiffOutputSet::new(options.exif_byte_order),
    };
    set.get_or_create_directory(DirectoryKind::Root);

    for update in updates {
        apply_update(&mut set, update, options)?;
    }
    match &source {
        Some((contents, bytes)) => TiffWriter::write_over(&set, contents, bytes),
        None => TiffWriter::write(&set),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        test_utils::{sample_exif, TiffBuilder},
        tiff::ByteOrder,
        updates::DateTimeZone,
    };

    fn utc() -> Options {
        Options::new().time_zone(DateTimeZone::Utc)
    }

    fn read(bytes: &[u8]) -> PhotoMetadata {
        photo_metadata(&read_tiff_bytes(bytes).unwrap(), &utc())
    }

    #[test]
    fn test_sample_exif_fields() {
        for order in [ByteOrder::BigEndian, ByteOrder::LittleEndian] {
            let metadata = read(&sample_exif(order));
            assert_eq!(metadata.camera_make.as_deref(), Some("Canon"));
            assert_eq!(metadata.camera_model.as_deref(), Some("Canon EOS 90D"));
            assert_eq!(metadata.orientation, Some(TiffOrientation::RotateRight));
            assert_eq!(metadata.iso, Some(200));
            assert_eq!(metadata.exposure_time, Some(1.0 / 125.0));
            assert_eq!(metadata.f_number, Some(5.6));
            assert_eq!(metadata.focal_length, Some(35.0));
            assert_eq!(metadata.taken_date, Some(1_689_166_125_000));
            let gps = metadata.gps_coordinates.unwrap();
            assert!((gps.latitude - 53.219391).abs() < 1e-5);
            assert!((gps.longitude - 8.239661).abs() < 1e-5);
        }
    }

    #[test]
    fn test_dimensions_fall_back_to_root() {
        let bytes = TiffBuilder::new(ByteOrder::BigEndian)
            .entry(tags::IMAGE_WIDTH, 4, 1, &[0, 0, 1, 0])
            .entry(tags::IMAGE_LENGTH, 3, 1, &[0, 200])
            .build();
        let metadata = read(&bytes);
        assert_eq!(metadata.width_px, Some(256));
        assert_eq!(metadata.height_px, Some(200));
    }

    #[test]
    fn test_southern_western_hemisphere() {
        let bytes = TiffBuilder::new(ByteOrder::BigEndian)
            .gps(|gps| {
                gps.entry(tags::GPS_LATITUDE_REF, 2, 2, b"S\0")
                    .entry(
                        tags::GPS_LATITUDE,
                        5,
                        3,
                        &[0, 0, 0, 33, 0, 0, 0, 1, 0, 0, 0, 30, 0, 0, 0, 1, 0, 0, 0, 0, 0, 0, 0, 1],
                    )
                    .entry(tags::GPS_LONGITUDE_REF, 2, 2, b"W\0")
                    .entry(
                        tags::GPS_LONGITUDE,
                        5,
                        3,
                        &[0, 0, 0, 70, 0, 0, 0, 1, 0, 0, 0, 15, 0, 0, 0, 1, 0, 0, 0, 0, 0, 0, 0, 1],
                    )
            })
            .build();
        let gps = read(&bytes).gps_coordinates.unwrap();
        assert_eq!(gps.latitude, -33.5);
        assert_eq!(gps.longitude, -70.25);
    }

    #[test]
    fn test_sub_sec_and_offset_parsing() {
        assert_eq!(sub_sec_millis("4"), 400);
        assert_eq!(sub_sec_millis("40123"), 401);
        assert_eq!(sub_sec_millis(" 07 "), 70);
        assert_eq!(sub_sec_millis("x"), 0);
        assert_eq!(parse_offset("+02:00"), FixedOffset::east_opt(7200));
        assert_eq!(parse_offset("-0530"), FixedOffset::east_opt(-19800));
        assert_eq!(parse_offset("Z"), None);
    }

    #[test]
    fn test_offset_wins_over_zone_option() {
        let bytes = TiffBuilder::new(ByteOrder::BigEndian)
            .exif(|exif| {
                exif.entry(tags::DATE_TIME_ORIGINAL, 2, 20, b"2023:07:12 14:48:45\0")
                    .entry(tags::OFFSET_TIME_ORIGINAL, 2, 7, b"+02:00\0")
            })
            .build();
        assert_eq!(read(&bytes).taken_date, Some(1_689_166_125_000));
    }

    #[test]
    fn test_degrees_to_dms() {
        let dms = degrees_to_dms(53.219391);
        assert_eq!(dms[0], Rational::new(53, 1));
        assert_eq!(dms[1], Rational::new(13, 1));
        assert_eq!(dms[2], Rational::new(9808, 1000));
        let back = dms_to_degrees(&dms).unwrap();
        assert!((back - 53.219391).abs() < 1e-6);
    }

    #[test]
    fn test_update_taken_date_round_trip() {
        let updated = update_exif(
            Some(sample_exif(ByteOrder::LittleEndian).as_slice()),
            &[MetadataUpdate::TakenDate(Some(1_689_166_125_401))],
            &utc(),
        )
        .unwrap();
        let contents = read_tiff_bytes(&updated).unwrap();
        assert_eq!(contents.header.byte_order, ByteOrder::LittleEndian);
        assert_eq!(
            contents
                .find_field(DirectoryKind::Exif, tags::SUB_SEC_TIME_ORIGINAL)
                .unwrap()
                .string_value()
                .as_deref(),
            Some("401")
        );
        let metadata = photo_metadata(&contents, &utc());
        assert_eq!(metadata.taken_date, Some(1_689_166_125_401));
        assert_eq!(metadata.camera_make.as_deref(), Some("Canon"));
    }

    #[test]
    fn test_update_creates_exif_block() {
        let options = utc().exif_byte_order(ByteOrder::LittleEndian);
        let updated = update_exif(
            None,
            &[
                MetadataUpdate::Orientation(TiffOrientation::RotateLeft),
                MetadataUpdate::GpsCoordinates(Some(GpsCoordinates::new(-12.5, 130.75))),
            ],
            &options,
        )
        .unwrap();
        assert_eq!(&updated[..2], b"II");
        let metadata = photo_metadata(&read_tiff_bytes(&updated).unwrap(), &options);
        assert_eq!(metadata.orientation, Some(TiffOrientation::RotateLeft));
        let gps = metadata.gps_coordinates.unwrap();
        assert!((gps.latitude + 12.5).abs() < 1e-6);
        assert!((gps.longitude - 130.75).abs() < 1e-6);
    }

    #[test]
    fn test_clearing_removes_fields_and_gps_directory() {
        let updated = update_exif(
            Some(sample_exif(ByteOrder::BigEndian).as_slice()),
            &[
                MetadataUpdate::TakenDate(None),
                MetadataUpdate::GpsCoordinates(None),
            ],
            &utc(),
        )
        .unwrap();
        let contents = read_tiff_bytes(&updated).unwrap();
        assert!(contents.directory(DirectoryKind::Gps).is_none());
        assert!(contents
            .find_field(DirectoryKind::Root, tags::GPS_INFO)
            .is_none());
        let metadata = photo_metadata(&contents, &utc());
        assert_eq!(metadata.taken_date, None);
        assert_eq!(metadata.gps_coordinates, None);
        assert_eq!(metadata.iso, Some(200));
    }

    #[test]
    fn test_update_is_idempotent() {
        let updates = [
            MetadataUpdate::Orientation(TiffOrientation::UpsideDown),
            MetadataUpdate::TakenDate(Some(1_689_166_125_401)),
            MetadataUpdate::GpsCoordinates(Some(GpsCoordinates::new(53.219391, 8.239661))),
        ];
        let once = update_exif(Some(sample_exif(ByteOrder::BigEndian).as_slice()), &updates, &utc()).unwrap();
        let twice = update_exif(Some(&once[..]), &updates, &utc()).unwrap();
        assert_eq!(once, twice);
    }

    #[test]
    fn test_update_keeps_maker_note_offset() {
        let order = ByteOrder::BigEndian;
        let maker_note = b"Canon\0\0\x01\x00\x07\x00\x02\x00\x00\x00\x34";
        let source = TiffBuilder::new(order)
            .entry(tags::MAKE, 2, 6, b"Canon\0")
            .exif(|e| e.entry(tags::MAKER_NOTE, 7, maker_note.len() as u32, maker_note))
            .build();
        let before = read_tiff_bytes(&source).unwrap();
        let note = before.find_field(DirectoryKind::Exif, tags::MAKER_NOTE).unwrap();

        let updated = update_exif(
            Some(source.as_slice()),
            &[
                MetadataUpdate::Orientation(TiffOrientation::RotateLeft),
                MetadataUpdate::TakenDate(Some(1_689_166_125_401)),
            ],
            &utc(),
        )
        .unwrap();

        let after = read_tiff_bytes(&updated).unwrap();
        let kept = after.find_field(DirectoryKind::Exif, tags::MAKER_NOTE).unwrap();
        assert_eq!(kept.offset, note.offset);
        assert_eq!(kept.value_bytes, maker_note);
        let metadata = photo_metadata(&after, &utc());
        assert_eq!(metadata.orientation, Some(TiffOrientation::RotateLeft));
        assert_eq!(metadata.taken_date, Some(1_689_166_125_401));
    }

    #[test]
    fn test_invalid_gps_is_write_error() {
        let err = update_exif(
            None,
            &[MetadataUpdate::GpsCoordinates(Some(GpsCoordinates::new(95.0, 0.0)))],
            &utc(),
        )
        .unwrap_err();
        assert!(err.is_write_error());
    }

    #[test]
    fn test_broken_exif_is_read_error() {
        let err = update_exif(Some(&b"XX\x00\x2A"[..]), &[], &utc()).unwrap_err();
        assert!(err.is_read_error());
    }
}
