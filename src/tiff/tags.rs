//! TIFF/EXIF tag dictionary
//!
//! One static table keyed by tag number. Tag numbers are only unique within a
//! directory family (GPS tags restart at zero), so lookups that care take the
//! directory kind into account.

use super::DirectoryKind;

// IFD0 (main image) tags
pub const IMAGE_WIDTH: u16 = 0x0100;
pub const IMAGE_LENGTH: u16 = 0x0101;
pub const IMAGE_DESCRIPTION: u16 = 0x010E;
pub const MAKE: u16 = 0x010F;
pub const MODEL: u16 = 0x0110;
pub const STRIP_OFFSETS: u16 = 0x0111;
pub const ORIENTATION: u16 = 0x0112;
pub const X_RESOLUTION: u16 = 0x011A;
pub const Y_RESOLUTION: u16 = 0x011B;
pub const RESOLUTION_UNIT: u16 = 0x0128;
pub const SOFTWARE: u16 = 0x0131;
pub const DATE_TIME: u16 = 0x0132;
pub const ARTIST: u16 = 0x013B;
pub const COPYRIGHT: u16 = 0x8298;
pub const EXIF_OFFSET: u16 = 0x8769;
pub const GPS_INFO: u16 = 0x8825;

// IFD1 (thumbnail) tags
pub const JPEG_INTERCHANGE_FORMAT: u16 = 0x0201;
pub const JPEG_INTERCHANGE_FORMAT_LENGTH: u16 = 0x0202;

// EXIF sub-IFD tags
pub const EXPOSURE_TIME: u16 = 0x829A;
pub const F_NUMBER: u16 = 0x829D;
pub const ISO: u16 = 0x8827;
pub const EXIF_VERSION: u16 = 0x9000;
pub const DATE_TIME_ORIGINAL: u16 = 0x9003;
pub const DATE_TIME_DIGITIZED: u16 = 0x9004;
pub const OFFSET_TIME: u16 = 0x9010;
pub const OFFSET_TIME_ORIGINAL: u16 = 0x9011;
pub const FOCAL_LENGTH: u16 = 0x920A;
pub const MAKER_NOTE: u16 = 0x927C;
pub const SUB_SEC_TIME: u16 = 0x9290;
pub const SUB_SEC_TIME_ORIGINAL: u16 = 0x9291;
pub const EXIF_IMAGE_WIDTH: u16 = 0xA002;
pub const EXIF_IMAGE_HEIGHT: u16 = 0xA003;
pub const INTEROP_OFFSET: u16 = 0xA005;
pub const LENS_MAKE: u16 = 0xA433;
pub const LENS_MODEL: u16 = 0xA434;

// GPS sub-IFD tags
pub const GPS_VERSION_ID: u16 = 0x0000;
pub const GPS_LATITUDE_REF: u16 = 0x0001;
pub const GPS_LATITUDE: u16 = 0x0002;
pub const GPS_LONGITUDE_REF: u16 = 0x0003;
pub const GPS_LONGITUDE: u16 = 0x0004;
pub const GPS_ALTITUDE_REF: u16 = 0x0005;
pub const GPS_ALTITUDE: u16 = 0x0006;
pub const GPS_TIME_STAMP: u16 = 0x0007;
pub const GPS_MAP_DATUM: u16 = 0x0012;
pub const GPS_DATE_STAMP: u16 = 0x001D;

// Interoperability sub-IFD tags
pub const INTEROP_INDEX: u16 = 0x0001;
pub const INTEROP_VERSION: u16 = 0x0002;

/// Static description of one tag
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TagInfo {
    pub tag: u16,
    pub name: &'static str,
    /// Directory family the tag belongs to; `None` for IFD0-style tags that
    /// may appear in any root-chain directory.
    pub directory: Option<DirectoryKind>,
    /// The value is an absolute offset that the writer regenerates.
    pub is_offset: bool,
}

const fn tag(tag: u16, name: &'static str, directory: Option<DirectoryKind>) -> TagInfo {
    TagInfo {
        tag,
        name,
        directory,
        is_offset: false,
    }
}

const fn offset(tag: u16, name: &'static str, directory: Option<DirectoryKind>) -> TagInfo {
    TagInfo {
        tag,
        name,
        directory,
        is_offset: true,
    }
}

const EXIF: Option<DirectoryKind> = Some(DirectoryKind::Exif);
const GPS: Option<DirectoryKind> = Some(DirectoryKind::Gps);
const INTEROP: Option<DirectoryKind> = Some(DirectoryKind::Interoperability);

pub static TAGS: &[TagInfo] = &[
    tag(IMAGE_WIDTH, "ImageWidth", None),
    tag(IMAGE_LENGTH, "ImageLength", None),
    tag(IMAGE_DESCRIPTION, "ImageDescription", None),
    tag(MAKE, "Make", None),
    tag(MODEL, "Model", None),
    tag(STRIP_OFFSETS, "StripOffsets", None),
    tag(ORIENTATION, "Orientation", None),
    tag(X_RESOLUTION, "XResolution", None),
    tag(Y_RESOLUTION, "YResolution", None),
    tag(RESOLUTION_UNIT, "ResolutionUnit", None),
    tag(SOFTWARE, "Software", None),
    tag(DATE_TIME, "DateTime", None),
    tag(ARTIST, "Artist", None),
    offset(JPEG_INTERCHANGE_FORMAT, "JPEGInterchangeFormat", None),
    tag(JPEG_INTERCHANGE_FORMAT_LENGTH, "JPEGInterchangeFormatLength", None),
    tag(COPYRIGHT, "Copyright", None),
    offset(EXIF_OFFSET, "ExifOffset", None),
    offset(GPS_INFO, "GPSInfo", None),
    tag(EXPOSURE_TIME, "ExposureTime", EXIF),
    tag(F_NUMBER, "FNumber", EXIF),
    tag(ISO, "ISO", EXIF),
    tag(EXIF_VERSION, "ExifVersion", EXIF),
    tag(DATE_TIME_ORIGINAL, "DateTimeOriginal", EXIF),
    tag(DATE_TIME_DIGITIZED, "DateTimeDigitized", EXIF),
    tag(OFFSET_TIME, "OffsetTime", EXIF),
    tag(OFFSET_TIME_ORIGINAL, "OffsetTimeOriginal", EXIF),
    tag(FOCAL_LENGTH, "FocalLength", EXIF),
    tag(MAKER_NOTE, "MakerNote", EXIF),
    tag(SUB_SEC_TIME, "SubSecTime", EXIF),
    tag(SUB_SEC_TIME_ORIGINAL, "SubSecTimeOriginal", EXIF),
    tag(EXIF_IMAGE_WIDTH, "ExifImageWidth", EXIF),
    tag(EXIF_IMAGE_HEIGHT, "ExifImageHeight", EXIF),
    offset(INTEROP_OFFSET, "InteropOffset", EXIF),
    tag(LENS_MAKE, "LensMake", EXIF),
    tag(LENS_MODEL, "LensModel", EXIF),
    tag(GPS_VERSION_ID, "GPSVersionID", GPS),
    tag(GPS_LATITUDE_REF, "GPSLatitudeRef", GPS),
    tag(GPS_LATITUDE, "GPSLatitude", GPS),
    tag(GPS_LONGITUDE_REF, "GPSLongitudeRef", GPS),
    tag(GPS_LONGITUDE, "GPSLongitude", GPS),
    tag(GPS_ALTITUDE_REF, "GPSAltitudeRef", GPS),
    tag(GPS_ALTITUDE, "GPSAltitude", GPS),
    tag(GPS_TIME_STAMP, "GPSTimeStamp", GPS),
    tag(GPS_MAP_DATUM, "GPSMapDatum", GPS),
    tag(GPS_DATE_STAMP, "GPSDateStamp", GPS),
    tag(INTEROP_INDEX, "InteropIndex", INTEROP),
    tag(INTEROP_VERSION, "InteropVersion", INTEROP),
];

/// Tags whose value points at a sub-directory, with the kind they point to.
pub const SUB_DIRECTORY_TAGS: [(u16, DirectoryKind); 3] = [
    (EXIF_OFFSET, DirectoryKind::Exif),
    (GPS_INFO, DirectoryKind::Gps),
    (INTEROP_OFFSET, DirectoryKind::Interoperability),
];

/// Look up a tag as it appears in a directory of the given kind.
///
/// GPS and Interoperability directories only match their own tables; other
/// directories match EXIF and IFD0-style entries.
pub fn lookup(tag: u16, kind: DirectoryKind) -> Option<&'static TagInfo> {
    let family = match kind {
        DirectoryKind::Gps | DirectoryKind::Interoperability => Some(kind),
        _ => None,
    };
    TAGS.iter().find(|info| {
        info.tag == tag
            && match family {
                Some(family) => info.directory == Some(family),
                None => !matches!(
                    info.directory,
                    Some(DirectoryKind::Gps) | Some(DirectoryKind::Interoperability)
                ),
            }
    })
}

/// True if the tag holds an offset regenerated by the writer.
pub fn is_offset_tag(tag: u16, kind: DirectoryKind) -> bool {
    lookup(tag, kind).is_some_and(|info| info.is_offset)
}

/// Human-readable tag name, or the hex number for unknown tags.
pub fn tag_name(tag: u16, kind: DirectoryKind) -> String {
    match lookup(tag, kind) {
        Some(info) => info.name.to_string(),
        None => format!("Unknown Tag (0x{:04x})", tag),
    }
}
