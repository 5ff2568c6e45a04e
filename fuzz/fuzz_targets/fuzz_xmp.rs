#![no_main]

use image_meta_io::{xmp, DateTimeZone, MetadataUpdate, Options, PhotoRating};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let Ok(packet) = std::str::from_utf8(data) else {
        return;
    };
    let options = Options::new().time_zone(DateTimeZone::Utc);

    let _ = xmp::photo_metadata(packet, &options);

    let updates = [
        MetadataUpdate::Rating(PhotoRating::TwoStars),
        MetadataUpdate::TakenDate(Some(0)),
        MetadataUpdate::Keywords(["a".to_string(), "<&>".to_string()].into_iter().collect()),
    ];
    let _ = xmp::apply_updates(Some(packet), &[], &options);
    if let Ok(rewritten) = xmp::apply_updates(Some(packet), &updates, &options) {
        let _ = xmp::photo_metadata(&rewritten, &options);
    }
});
