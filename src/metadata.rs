//! Format-independent photo metadata
//!
//! [`PhotoMetadata`] is what the readers produce. Each embedded source (EXIF,
//! XMP, the image frame itself) yields its own record; records are combined
//! with [`PhotoMetadata::merge`], richer sources first.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// The eight TIFF orientation values
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum TiffOrientation {
    #[default]
    Standard,
    MirrorHorizontal,
    UpsideDown,
    MirrorVertical,
    MirrorHorizontalAndRotateLeft,
    RotateRight,
    MirrorHorizontalAndRotateRight,
    RotateLeft,
}

impl TiffOrientation {
    pub fn from_value(value: u32) -> Option<Self> {
        Some(match value {
            1 => TiffOrientation::Standard,
            2 => TiffOrientation::MirrorHorizontal,
            3 => TiffOrientation::UpsideDown,
            4 => TiffOrientation::MirrorVertical,
            5 => TiffOrientation::MirrorHorizontalAndRotateLeft,
            6 => TiffOrientation::RotateRight,
            7 => TiffOrientation::MirrorHorizontalAndRotateRight,
            8 => TiffOrientation::RotateLeft,
            _ => return None,
        })
    }

    /// Value as stored in the Orientation tag
    pub fn value(self) -> u16 {
        match self {
            TiffOrientation::Standard => 1,
            TiffOrientation::MirrorHorizontal => 2,
            TiffOrientation::UpsideDown => 3,
            TiffOrientation::MirrorVertical => 4,
            TiffOrientation::MirrorHorizontalAndRotateLeft => 5,
            TiffOrientation::RotateRight => 6,
            TiffOrientation::MirrorHorizontalAndRotateRight => 7,
            TiffOrientation::RotateLeft => 8,
        }
    }
}

/// Star rating as used by `xmp:Rating`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum PhotoRating {
    Rejected,
    #[default]
    NoRating,
    OneStar,
    TwoStars,
    ThreeStars,
    FourStars,
    FiveStars,
}

impl PhotoRating {
    pub fn from_value(value: i32) -> Option<Self> {
        Some(match value {
            -1 => PhotoRating::Rejected,
            0 => PhotoRating::NoRating,
            1 => PhotoRating::OneStar,
            2 => PhotoRating::TwoStars,
            3 => PhotoRating::ThreeStars,
            4 => PhotoRating::FourStars,
            5 => PhotoRating::FiveStars,
            _ => return None,
        })
    }

    pub fn value(self) -> i32 {
        match self {
            PhotoRating::Rejected => -1,
            PhotoRating::NoRating => 0,
            PhotoRating::OneStar => 1,
            PhotoRating::TwoStars => 2,
            PhotoRating::ThreeStars => 3,
            PhotoRating::FourStars => 4,
            PhotoRating::FiveStars => 5,
        }
    }
}

/// Decimal-degree coordinates
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GpsCoordinates {
    pub latitude: f64,
    pub longitude: f64,
}

impl GpsCoordinates {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
        }
    }

    pub fn is_valid(&self) -> bool {
        (-90.0..=90.0).contains(&self.latitude) && (-180.0..=180.0).contains(&self.longitude)
    }

    /// Exactly (0, 0): usually a camera default rather than a real fix.
    pub fn is_null_island(&self) -> bool {
        self.latitude == 0.0 && self.longitude == 0.0
    }
}

impl fmt::Display for GpsCoordinates {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.6}, {:.6}", self.latitude, self.longitude)
    }
}

/// Place names, as found in IPTC/Photoshop XMP properties
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Location {
    pub city: Option<String>,
    pub state: Option<String>,
    pub country: Option<String>,
}

impl Location {
    pub fn is_empty(&self) -> bool {
        self.city.is_none() && self.state.is_none() && self.country.is_none()
    }
}

/// Face rectangle in normalized image coordinates, centered on (`x`, `y`)
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RegionArea {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

/// Commonly consumed metadata fields
#[derive(Debug, Clone, PartialEq, Default)]
pub struct PhotoMetadata {
    pub width_px: Option<u32>,
    pub height_px: Option<u32>,
    pub orientation: Option<TiffOrientation>,
    /// Capture time in milliseconds since the Unix epoch
    pub taken_date: Option<i64>,
    pub gps_coordinates: Option<GpsCoordinates>,
    pub location: Option<Location>,
    pub camera_make: Option<String>,
    pub camera_model: Option<String>,
    pub lens_make: Option<String>,
    pub lens_model: Option<String>,
    pub iso: Option<u32>,
    /// Seconds
    pub exposure_time: Option<f64>,
    pub f_number: Option<f64>,
    /// Millimetres
    pub focal_length: Option<f64>,
    pub rating: Option<PhotoRating>,
    pub keywords: BTreeSet<String>,
    pub persons_in_image: BTreeSet<String>,
    /// Named face regions from the MWG region list
    pub faces: BTreeMap<String, RegionArea>,
}

impl PhotoMetadata {
    /// Combine with a lower-priority record.
    ///
    /// Every field of `self` wins unless it is absent (or an empty set), in
    /// which case the value from `other` is used. `None` returns `self` as is.
    pub fn merge(self, other: Option<PhotoMetadata>) -> PhotoMetadata {
        let Some(other) = other else {
            return self;
        };

        PhotoMetadata {
            width_px: self.width_px.or(other.width_px),
            height_px: self.height_px.or(other.height_px),
            orientation: self.orientation.or(other.orientation),
            taken_date: self.taken_date.or(other.taken_date),
            gps_coordinates: self.gps_coordinates.or(other.gps_coordinates),
            location: self.location.or(other.location),
            camera_make: self.camera_make.or(other.camera_make),
            camera_model: self.camera_model.or(other.camera_model),
            lens_make: self.lens_make.or(other.lens_make),
            lens_model: self.lens_model.or(other.lens_model),
            iso: self.iso.or(other.iso),
            exposure_time: self.exposure_time.or(other.exposure_time),
            f_number: self.f_number.or(other.f_number),
            focal_length: self.focal_length.or(other.focal_length),
            rating: self.rating.or(other.rating),
            keywords: non_empty_or(self.keywords, other.keywords),
            persons_in_image: non_empty_or(self.persons_in_image, other.persons_in_image),
            faces: if self.faces.is_empty() {
                other.faces
            } else {
                self.faces
            },
        }
    }

    pub fn is_empty(&self) -> bool {
        *self == PhotoMetadata::default()
    }
}

fn non_empty_or(primary: BTreeSet<String>, secondary: BTreeSet<String>) -> BTreeSet<String> {
    if primary.is_empty() {
        secondary
    } else {
        primary
    }
}

/// Merge two optional records; an absent primary yields the secondary unchanged.
pub fn merge(primary: Option<PhotoMetadata>, secondary: Option<PhotoMetadata>) -> Option<PhotoMetadata> {
    match primary {
        Some(primary) => Some(primary.merge(secondary)),
        None => secondary,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn set(values: &[&str]) -> BTreeSet<String> {
        values.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_orientation_values() {
        for value in 1..=8 {
            assert_eq!(TiffOrientation::from_value(value).unwrap().value() as u32, value);
        }
        assert!(TiffOrientation::from_value(0).is_none());
        assert!(TiffOrientation::from_value(9).is_none());
        assert_eq!(TiffOrientation::RotateRight.value(), 6);
    }

    #[test]
    fn test_rating_values() {
        for value in -1..=5 {
            assert_eq!(PhotoRating::from_value(value).unwrap().value(), value);
        }
        assert!(PhotoRating::from_value(6).is_none());
    }

    #[test]
    fn test_merge_is_left_biased() {
        let xmp = PhotoMetadata {
            rating: Some(PhotoRating::FourStars),
            keywords: set(&["hello"]),
            taken_date: Some(1_000),
            ..Default::default()
        };
        let exif = PhotoMetadata {
            taken_date: Some(2_000),
            camera_make: Some("Canon".into()),
            keywords: set(&["ignored"]),
            persons_in_image: set(&["Dora"]),
            ..Default::default()
        };

        let merged = xmp.merge(Some(exif));
        assert_eq!(merged.taken_date, Some(1_000));
        assert_eq!(merged.rating, Some(PhotoRating::FourStars));
        assert_eq!(merged.camera_make.as_deref(), Some("Canon"));
        assert_eq!(merged.keywords, set(&["hello"]));
        assert_eq!(merged.persons_in_image, set(&["Dora"]));
    }

    #[test]
    fn test_merge_with_none() {
        let a = PhotoMetadata {
            iso: Some(100),
            ..Default::default()
        };
        assert_eq!(a.clone().merge(None), a);
        assert_eq!(merge(None, Some(a.clone())), Some(a.clone()));
        assert_eq!(merge(Some(a.clone()), None), Some(a));
        assert_eq!(merge(None, None), None);
    }

    #[test]
    fn test_merge_associative_per_field() {
        let a = PhotoMetadata {
            iso: Some(1),
            ..Default::default()
        };
        let b = PhotoMetadata {
            iso: Some(2),
            f_number: Some(2.8),
            ..Default::default()
        };
        let c = PhotoMetadata {
            f_number: Some(4.0),
            focal_length: Some(50.0),
            ..Default::default()
        };
        let left = a.clone().merge(Some(b.clone())).merge(Some(c.clone()));
        let right = a.merge(Some(b.merge(Some(c))));
        assert_eq!(left, right);
        assert_eq!(left.f_number, Some(2.8));
        assert_eq!(left.focal_length, Some(50.0));
    }

    #[test]
    fn test_merge_faces_non_empty_wins() {
        let face = |x: f64| RegionArea {
            x,
            y: 0.5,
            width: 0.1,
            height: 0.2,
        };
        let xmp = PhotoMetadata {
            faces: BTreeMap::from([("Swiper".to_string(), face(0.3))]),
            ..Default::default()
        };
        let other = PhotoMetadata {
            faces: BTreeMap::from([
                ("Swiper".to_string(), face(0.9)),
                ("Dora".to_string(), face(0.1)),
            ]),
            ..Default::default()
        };

        let merged = xmp.clone().merge(Some(other.clone()));
        assert_eq!(merged.faces.len(), 1, "maps are not combined key by key");
        assert_eq!(merged.faces["Swiper"].x, 0.3);

        let merged = PhotoMetadata::default().merge(Some(other.clone()));
        assert_eq!(merged.faces, other.faces);
        assert!(!merged.is_empty());
    }

    #[test]
    fn test_gps_checks() {
        assert!(GpsCoordinates::new(53.219391, 8.239661).is_valid());
        assert!(!GpsCoordinates::new(91.0, 0.0).is_valid());
        assert!(GpsCoordinates::new(0.0, 0.0).is_null_island());
        assert_eq!(
            GpsCoordinates::new(53.219391, 8.239661).to_string(),
            "53.219391, 8.239661"
        );
    }
}
