#![no_main]

use image_meta_io::{
    update_with, DateTimeZone, GpsCoordinates, MetadataUpdate, Options, PhotoRating,
    TiffOrientation,
};
use libfuzzer_sys::fuzz_target;
use std::collections::BTreeSet;

fuzz_target!(|data: &[u8]| {
    let options = Options::new().time_zone(DateTimeZone::Utc);

    // Each update on its own, then all together
    let updates = [
        MetadataUpdate::Orientation(TiffOrientation::RotateRight),
        MetadataUpdate::TakenDate(Some(1_689_166_125_401)),
        MetadataUpdate::TakenDate(None),
        MetadataUpdate::GpsCoordinates(Some(GpsCoordinates::new(-33.856159, 151.215256))),
        MetadataUpdate::GpsCoordinates(None),
        MetadataUpdate::Rating(PhotoRating::Rejected),
        MetadataUpdate::Keywords(["fuzz".to_string()].into_iter().collect()),
        MetadataUpdate::Persons(BTreeSet::new()),
    ];

    let _ = update_with(data, &[], &options);
    for update in &updates {
        let _ = update_with(data, std::slice::from_ref(update), &options);
    }
    if let Ok(once) = update_with(data, &updates, &options) {
        // A successful write must be readable and stable
        let _ = image_meta_io::read_metadata_with(&once, &options);
        let _ = update_with(&once, &updates, &options);
    }
    let _ = update_with(data, &updates, &options.clone().write_exif(false));
});
