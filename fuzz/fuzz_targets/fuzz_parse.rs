#![no_main]

use image_meta_io::formats::{jpeg, png};
use image_meta_io::{read_metadata_with, read_tiff_bytes, DateTimeZone, Options};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    // Every reader must return errors, never panic
    let options = Options::new().time_zone(DateTimeZone::Utc);
    let _ = read_metadata_with(data, &options);

    if let Ok(contents) = read_tiff_bytes(data) {
        let _ = contents.thumbnail();
        let _ = image_meta_io::exif::photo_metadata(&contents, &options);
        let _ = contents.to_string();
    }

    let _ = jpeg::extract_metadata_bytes(&mut &data[..]);
    if let Ok(layout) = jpeg::scan_segments(data) {
        let _ = layout.frame_size(data);
        if let Some(index) = layout.find_xmp(data) {
            let _ = jpeg::parse_xmp_segment(layout.segments[index].payload(data));
        }
    }

    if let Ok(chunks) = png::read_chunks(&mut &data[..], None) {
        for chunk in &chunks {
            let _ = chunk.text();
        }
    }
});
