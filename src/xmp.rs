//! XMP packet reading and rewriting
//!
//! Reading collects the properties this crate understands from every
//! top-level `rdf:Description`, whether written as attributes or as child
//! elements. The first occurrence of a property wins.
//!
//! Rewriting is a streaming pass with quick-xml: properties touched by an
//! update are removed from every top-level description (attribute and
//! element form), the new values are appended as elements to the first
//! description, and everything else passes through untouched. Running the
//! same updates over the output again produces the same bytes.
//!
//! XMP Structure:
//! - `x:xmpmeta` > `rdf:RDF` > one or more `rdf:Description`
//! - Simple properties are attributes or text elements
//! - Unordered lists are `rdf:Bag` elements holding `rdf:li` items
//!
//! Properties are matched by their conventional prefixes (`dc:`, `xmp:`...).
//! Face regions (`mwg-rs:RegionList`) are read but never written.

use std::borrow::Cow;
use std::collections::{BTreeMap, BTreeSet, HashMap};

use chrono::{DateTime, NaiveDateTime};
use quick_xml::{
    events::{attributes::Attribute, BytesEnd, BytesRef, BytesStart, BytesText, Event},
    Reader, Writer,
};

use crate::{
    error::{Error, Result},
    metadata::{GpsCoordinates, Location, PhotoMetadata, PhotoRating, RegionArea, TiffOrientation},
    updates::{MetadataUpdate, Options},
};

const RDF_RDF: &[u8] = b"rdf:RDF";
const RDF_DESCRIPTION: &[u8] = b"rdf:Description";
const RDF_BAG: &str = "rdf:Bag";
const RDF_LI: &[u8] = b"rdf:li";

pub const TIFF_ORIENTATION: &str = "tiff:Orientation";
pub const EXIF_DATE_TIME_ORIGINAL: &str = "exif:DateTimeOriginal";
pub const EXIF_GPS_LATITUDE: &str = "exif:GPSLatitude";
pub const EXIF_GPS_LONGITUDE: &str = "exif:GPSLongitude";
pub const XMP_RATING: &str = "xmp:Rating";
pub const DC_SUBJECT: &str = "dc:subject";
pub const PERSON_IN_IMAGE: &str = "Iptc4xmpExt:PersonInImage";
pub const PHOTOSHOP_CITY: &str = "photoshop:City";
pub const PHOTOSHOP_STATE: &str = "photoshop:State";
pub const PHOTOSHOP_COUNTRY: &str = "photoshop:Country";

const MWG_REGION_LIST: &[u8] = b"mwg-rs:RegionList";
const MWG_NAME: &str = "mwg-rs:Name";
const MWG_TYPE: &str = "mwg-rs:Type";
const AREA_X: &str = "stArea:x";
const AREA_Y: &str = "stArea:y";
const AREA_W: &str = "stArea:w";
const AREA_H: &str = "stArea:h";

const REGION_FIELDS: [&str; 6] = [MWG_NAME, MWG_TYPE, AREA_X, AREA_Y, AREA_W, AREA_H];

/// Namespace URIs for the prefixes this crate writes or reads
const NAMESPACES: [(&str, &str); 7] = [
    ("rdf", "http://www.w3.org/1999/02/22-rdf-syntax-ns#"),
    ("tiff", "http://ns.adobe.com/tiff/1.0/"),
    ("exif", "http://ns.adobe.com/exif/1.0/"),
    ("xmp", "http://ns.adobe.com/xap/1.0/"),
    ("dc", "http://purl.org/dc/elements/1.1/"),
    ("Iptc4xmpExt", "http://iptc.org/std/Iptc4xmpExt/2008-02-29/"),
    ("photoshop", "http://ns.adobe.com/photoshop/1.0/"),
];

const SIMPLE_PROPERTIES: [&str; 8] = [
    TIFF_ORIENTATION,
    EXIF_DATE_TIME_ORIGINAL,
    EXIF_GPS_LATITUDE,
    EXIF_GPS_LONGITUDE,
    XMP_RATING,
    PHOTOSHOP_CITY,
    PHOTOSHOP_STATE,
    PHOTOSHOP_COUNTRY,
];

const BAG_PROPERTIES: [&str; 2] = [DC_SUBJECT, PERSON_IN_IMAGE];

/// Packet used when an image has no XMP yet
pub const EMPTY_PACKET: &str = "<?xpacket begin=\"\u{feff}\" id=\"W5M0MpCehiHzreSzNTczkc9d\"?>
<x:xmpmeta xmlns:x=\"adobe:ns:meta/\">
 <rdf:RDF xmlns:rdf=\"http://www.w3.org/1999/02/22-rdf-syntax-ns#\">
  <rdf:Description rdf:about=\"\"/>
 </rdf:RDF>
</x:xmpmeta>
<?xpacket end=\"w\"?>";

/// XMP date with milliseconds and offset
const XMP_DATE_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.3f%:z";

fn is_known_simple(name: &str) -> bool {
    SIMPLE_PROPERTIES.contains(&name)
}

fn is_known_bag(name: &str) -> bool {
    BAG_PROPERTIES.contains(&name)
}

fn namespace_uri(prefix: &str) -> Option<&'static str> {
    NAMESPACES
        .iter()
        .find(|(p, _)| *p == prefix)
        .map(|(_, uri)| *uri)
}

fn prefix_of(name: &str) -> &str {
    name.split_once(':').map_or("", |(prefix, _)| prefix)
}

fn xml_error(e: impl Into<quick_xml::Error>) -> Error {
    Error::Xml(e.into())
}

fn attribute_value(attr: &Attribute<'_>) -> Result<String> {
    let raw = std::str::from_utf8(&attr.value)
        .map_err(|e| Error::format(format!("XMP attribute is not UTF-8: {}", e)))?;
    let value = quick_xml::escape::unescape(raw).map_err(xml_error)?;
    Ok(value.into_owned())
}

/// Text of a predefined entity or character reference.
fn resolve_reference(reference: &BytesRef<'_>) -> Result<String> {
    let name = reference.decode().map_err(xml_error)?;
    let resolved = match name.as_ref() {
        "amp" => Some('&'),
        "lt" => Some('<'),
        "gt" => Some('>'),
        "apos" => Some('\''),
        "quot" => Some('"'),
        other => {
            let code = if let Some(hex) = other.strip_prefix("#x") {
                u32::from_str_radix(hex, 16).ok()
            } else if let Some(dec) = other.strip_prefix('#') {
                dec.parse().ok()
            } else {
                None
            };
            code.and_then(char::from_u32)
        }
    };
    resolved
        .map(String::from)
        .ok_or_else(|| Error::format(format!("Unknown XML entity &{};", name)))
}

fn element_name<'a>(start: &'a BytesStart<'_>) -> Cow<'a, str> {
    String::from_utf8_lossy(start.name().into_inner())
}

/// Raw property values of an XMP packet, first occurrence wins
#[derive(Debug, Default)]
struct Properties {
    simple: HashMap<String, String>,
    bags: HashMap<String, Vec<String>>,
}

impl Properties {
    fn parse(xmp: &str) -> Result<Self> {
        let mut reader = Reader::from_str(xmp);
        reader.config_mut().trim_text(false);

        let mut properties = Properties::default();
        let mut stack: Vec<Vec<u8>> = Vec::new();
        // (property name, depth of its element)
        let mut current: Option<(String, usize)> = None;
        let mut text = String::new();
        let mut items: Vec<String> = Vec::new();
        let mut item: Option<String> = None;

        loop {
            match reader.read_event()? {
                Event::Start(e) => {
                    let parent_is_rdf = stack.last().is_some_and(|p| p == RDF_RDF);
                    let parent_is_description =
                        stack.last().is_some_and(|p| p == RDF_DESCRIPTION);
                    let name = e.name().as_ref().to_vec();

                    if name == RDF_DESCRIPTION && parent_is_rdf {
                        properties.read_attributes(&e)?;
                    } else if parent_is_description && current.is_none() {
                        let property = element_name(&e);
                        if is_known_simple(&property) || is_known_bag(&property) {
                            current = Some((property.into_owned(), stack.len() + 1));
                            text.clear();
                            items.clear();
                        }
                    } else if name == RDF_LI && current.is_some() {
                        item = Some(String::new());
                    }
                    stack.push(name);
                }
                Event::Empty(e) => {
                    if e.name().as_ref() == RDF_DESCRIPTION
                        && stack.last().is_some_and(|p| p == RDF_RDF)
                    {
                        properties.read_attributes(&e)?;
                    }
                }
                Event::Text(e) => {
                    let value = e.decode().map_err(xml_error)?;
                    if let Some(item) = item.as_mut() {
                        item.push_str(&value);
                    } else if current.is_some() {
                        text.push_str(&value);
                    }
                }
                Event::CData(e) => {
                    let value = String::from_utf8_lossy(&e);
                    if let Some(item) = item.as_mut() {
                        item.push_str(&value);
                    } else if current.is_some() {
                        text.push_str(&value);
                    }
                }
                Event::GeneralRef(e) => {
                    if item.is_some() || current.is_some() {
                        let value = resolve_reference(&e)?;
                        match item.as_mut() {
                            Some(item) => item.push_str(&value),
                            None => text.push_str(&value),
                        }
                    }
                }
                Event::End(e) => {
                    if e.name().as_ref() == RDF_LI {
                        if let Some(value) = item.take() {
                            let value = value.trim();
                            if !value.is_empty() {
                                items.push(value.to_string());
                            }
                        }
                    }
                    if let Some((property, depth)) = current.take() {
                        if depth == stack.len() {
                            if is_known_bag(&property) {
                                properties
                                    .bags
                                    .entry(property)
                                    .or_insert_with(|| std::mem::take(&mut items));
                            } else {
                                properties
                                    .simple
                                    .entry(property)
                                    .or_insert_with(|| text.trim().to_string());
                            }
                        } else {
                            current = Some((property, depth));
                        }
                    }
                    stack.pop();
                }
                Event::Eof => break,
                _ => {}
            }
        }
        Ok(properties)
    }

    fn read_attributes(&mut self, start: &BytesStart<'_>) -> Result<()> {
        for attr in start.attributes() {
            let attr = attr.map_err(xml_error)?;
            let key = String::from_utf8_lossy(attr.key.as_ref());
            if is_known_simple(&key) && !self.simple.contains_key(key.as_ref()) {
                let value = attribute_value(&attr)?;
                self.simple.insert(key.into_owned(), value.trim().to_string());
            }
        }
        Ok(())
    }

    fn get(&self, name: &str) -> Option<&str> {
        self.simple
            .get(name)
            .map(String::as_str)
            .filter(|value| !value.is_empty())
    }

    fn bag(&self, name: &str) -> BTreeSet<String> {
        self.bags
            .get(name)
            .map(|items| items.iter().cloned().collect())
            .unwrap_or_default()
    }
}

/// Values collected for one `rdf:li` of a region list
#[derive(Default)]
struct RegionBuilder {
    values: HashMap<&'static str, String>,
}

impl RegionBuilder {
    fn set(&mut self, key: &str, value: &str) {
        if let Some(field) = REGION_FIELDS.iter().find(|field| **field == key) {
            self.values
                .entry(*field)
                .or_insert_with(|| value.trim().to_string());
        }
    }

    fn read_attributes(&mut self, start: &BytesStart<'_>) -> Result<()> {
        for attr in start.attributes() {
            let attr = attr.map_err(xml_error)?;
            let key = String::from_utf8_lossy(attr.key.as_ref());
            if REGION_FIELDS.contains(&key.as_ref()) {
                let value = attribute_value(&attr)?;
                self.set(&key, &value);
            }
        }
        Ok(())
    }

    /// Named face with a complete area; other region types are dropped.
    fn finish(self) -> Option<(String, RegionArea)> {
        if self.values.get(MWG_TYPE).is_some_and(|t| t != "Face") {
            return None;
        }
        let name = self.values.get(MWG_NAME).filter(|n| !n.is_empty())?.clone();
        let number = |key: &str| self.values.get(key)?.parse::<f64>().ok();
        Some((
            name,
            RegionArea {
                x: number(AREA_X)?,
                y: number(AREA_Y)?,
                width: number(AREA_W)?,
                height: number(AREA_H)?,
            },
        ))
    }
}

/// Face regions of an `mwg-rs:RegionList`, keyed by name. The first region
/// with a given name wins.
fn parse_faces(xmp: &str) -> Result<BTreeMap<String, RegionArea>> {
    let mut reader = Reader::from_str(xmp);
    reader.config_mut().trim_text(false);

    let mut faces = BTreeMap::new();
    let mut depth = 0usize;
    let mut list: Option<usize> = None;
    // region being read and the depth of its rdf:li
    let mut region: Option<(RegionBuilder, usize)> = None;
    // region field written as an element, and its depth
    let mut field: Option<(String, usize)> = None;
    let mut text = String::new();

    let mut add = |builder: RegionBuilder| {
        if let Some((name, area)) = builder.finish() {
            faces.entry(name).or_insert(area);
        }
    };

    loop {
        match reader.read_event()? {
            Event::Start(e) => {
                depth += 1;
                let name = e.name().as_ref().to_vec();
                if let Some((builder, _)) = region.as_mut() {
                    builder.read_attributes(&e)?;
                    let key = element_name(&e);
                    if field.is_none() && REGION_FIELDS.contains(&key.as_ref()) {
                        field = Some((key.into_owned(), depth));
                        text.clear();
                    }
                } else if list.is_none() && name == MWG_REGION_LIST {
                    list = Some(depth);
                } else if list.is_some() && name == RDF_LI {
                    let mut builder = RegionBuilder::default();
                    builder.read_attributes(&e)?;
                    region = Some((builder, depth));
                }
            }
            Event::Empty(e) => match region.as_mut() {
                Some((builder, _)) => builder.read_attributes(&e)?,
                None if list.is_some() && e.name().as_ref() == RDF_LI => {
                    let mut builder = RegionBuilder::default();
                    builder.read_attributes(&e)?;
                    add(builder);
                }
                None => {}
            },
            Event::Text(e) => {
                if field.is_some() {
                    text.push_str(&e.decode().map_err(xml_error)?);
                }
            }
            Event::GeneralRef(e) => {
                if field.is_some() {
                    text.push_str(&resolve_reference(&e)?);
                }
            }
            Event::End(_) => {
                if field.as_ref().is_some_and(|(_, d)| *d == depth) {
                    if let (Some((key, _)), Some((builder, _))) = (field.take(), region.as_mut()) {
                        builder.set(&key, &text);
                    }
                }
                if region.as_ref().is_some_and(|(_, d)| *d == depth) {
                    if let Some((builder, _)) = region.take() {
                        add(builder);
                    }
                }
                if list == Some(depth) {
                    list = None;
                }
                depth = depth.saturating_sub(1);
            }
            Event::Eof => break,
            _ => {}
        }
    }
    Ok(faces)
}

/// Extract metadata from an XMP packet.
///
/// Values that do not parse are ignored; malformed XML is an error.
pub fn photo_metadata(xmp: &str, options: &Options) -> Result<PhotoMetadata> {
    let properties = Properties::parse(xmp)?;

    let gps = match (
        properties.get(EXIF_GPS_LATITUDE).and_then(parse_gps_coordinate),
        properties.get(EXIF_GPS_LONGITUDE).and_then(parse_gps_coordinate),
    ) {
        (Some(latitude), Some(longitude)) => Some(GpsCoordinates::new(latitude, longitude)),
        _ => None,
    };

    let location = Location {
        city: properties.get(PHOTOSHOP_CITY).map(str::to_string),
        state: properties.get(PHOTOSHOP_STATE).map(str::to_string),
        country: properties.get(PHOTOSHOP_COUNTRY).map(str::to_string),
    };

    Ok(PhotoMetadata {
        orientation: properties
            .get(TIFF_ORIENTATION)
            .and_then(|v| v.parse().ok())
            .and_then(TiffOrientation::from_value),
        taken_date: properties
            .get(EXIF_DATE_TIME_ORIGINAL)
            .and_then(|v| parse_date(v, options)),
        gps_coordinates: gps,
        location: (!location.is_empty()).then_some(location),
        rating: properties
            .get(XMP_RATING)
            .and_then(|v| v.parse::<f64>().ok())
            .and_then(|v| PhotoRating::from_value(v.round() as i32)),
        keywords: properties.bag(DC_SUBJECT),
        persons_in_image: properties.bag(PERSON_IN_IMAGE),
        faces: parse_faces(xmp)?,
        ..Default::default()
    })
}

/// Parse an XMP date. Values without an offset are read in the configured zone.
fn parse_date(value: &str, options: &Options) -> Option<i64> {
    if let Ok(date) = DateTime::parse_from_rfc3339(value) {
        return Some(date.timestamp_millis());
    }
    if let Ok(date) = DateTime::parse_from_str(value, "%Y-%m-%dT%H:%M%:z") {
        return Some(date.timestamp_millis());
    }
    for format in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%dT%H:%M"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(value, format) {
            return options.timestamp_millis(naive);
        }
    }
    log::debug!("Ignoring unparsable XMP date '{}'", value);
    None
}

/// Parse an XMP GPS coordinate: "DDD,MM.mmk", "DDD,MM,SSk" or plain decimal.
fn parse_gps_coordinate(value: &str) -> Option<f64> {
    let value = value.trim();
    let direction = value.chars().last()?;
    let (body, sign) = match direction.to_ascii_uppercase() {
        'N' | 'E' => (&value[..value.len() - 1], 1.0),
        'S' | 'W' => (&value[..value.len() - 1], -1.0),
        _ => return value.parse().ok(),
    };

    let parts: Vec<f64> = body
        .split(',')
        .map(|part| part.trim().parse::<f64>())
        .collect::<std::result::Result<_, _>>()
        .ok()?;
    let degrees = match parts.as_slice() {
        [d, m] => d + m / 60.0,
        [d, m, s] => d + m / 60.0 + s / 3600.0,
        _ => return None,
    };
    Some(sign * degrees)
}

/// Format a coordinate as "DDD,MM.mmmmmmmmK".
fn format_gps_coordinate(value: f64, positive: char, negative: char) -> String {
    let direction = if value < 0.0 { negative } else { positive };
    let value = value.abs();
    let mut degrees = value.trunc();
    let mut minutes = (value - degrees) * 60.0;
    if format!("{:.8}", minutes) == "60.00000000" {
        degrees += 1.0;
        minutes = 0.0;
    }
    format!("{},{:.8}{}", degrees as u32, minutes, direction)
}

enum PropertyValue {
    Simple(String),
    Bag(Vec<String>),
}

struct Property {
    name: &'static str,
    value: PropertyValue,
}

/// Properties to remove and to insert for a set of updates
struct Edit {
    targets: Vec<&'static str>,
    insertions: Vec<Property>,
}

impl Edit {
    fn new(updates: &[MetadataUpdate], options: &Options) -> Result<Self> {
        let mut targets = Vec::new();
        let mut insertions: Vec<Property> = Vec::new();

        let mut insert = |targets: &mut Vec<&'static str>,
                          name: &'static str,
                          value: Option<PropertyValue>| {
            targets.push(name);
            insertions.retain(|p| p.name != name);
            if let Some(value) = value {
                insertions.push(Property { name, value });
            }
        };

        for update in updates {
            match update {
                MetadataUpdate::Orientation(orientation) => insert(
                    &mut targets,
                    TIFF_ORIENTATION,
                    Some(PropertyValue::Simple(orientation.value().to_string())),
                ),
                MetadataUpdate::TakenDate(date) => {
                    let value = date
                        .map(|millis| options.localize(millis))
                        .transpose()?
                        .map(|date| PropertyValue::Simple(date.format(XMP_DATE_FORMAT).to_string()));
                    insert(&mut targets, EXIF_DATE_TIME_ORIGINAL, value);
                }
                MetadataUpdate::GpsCoordinates(gps) => {
                    if let Some(gps) = gps {
                        if !gps.is_valid() {
                            return Err(Error::write(format!("Invalid GPS coordinates: {}", gps)));
                        }
                    }
                    insert(
                        &mut targets,
                        EXIF_GPS_LATITUDE,
                        gps.map(|g| {
                            PropertyValue::Simple(format_gps_coordinate(g.latitude, 'N', 'S'))
                        }),
                    );
                    insert(
                        &mut targets,
                        EXIF_GPS_LONGITUDE,
                        gps.map(|g| {
                            PropertyValue::Simple(format_gps_coordinate(g.longitude, 'E', 'W'))
                        }),
                    );
                }
                MetadataUpdate::Rating(rating) => insert(
                    &mut targets,
                    XMP_RATING,
                    Some(PropertyValue::Simple(rating.value().to_string())),
                ),
                MetadataUpdate::Keywords(keywords) => insert(
                    &mut targets,
                    DC_SUBJECT,
                    (!keywords.is_empty())
                        .then(|| PropertyValue::Bag(keywords.iter().cloned().collect())),
                ),
                MetadataUpdate::Persons(persons) => insert(
                    &mut targets,
                    PERSON_IN_IMAGE,
                    (!persons.is_empty())
                        .then(|| PropertyValue::Bag(persons.iter().cloned().collect())),
                ),
            }
        }

        Ok(Self {
            targets,
            insertions,
        })
    }

    fn is_target(&self, name: &[u8]) -> bool {
        self.targets.iter().any(|t| t.as_bytes() == name)
    }

    /// Namespace prefixes the insertions rely on
    fn prefixes(&self) -> Vec<&'static str> {
        let mut prefixes: Vec<&'static str> = Vec::new();
        for property in &self.insertions {
            let prefix = prefix_of(property.name);
            if !prefixes.contains(&prefix) {
                prefixes.push(prefix);
            }
            if matches!(property.value, PropertyValue::Bag(_)) && !prefixes.contains(&"rdf") {
                prefixes.push("rdf");
            }
        }
        prefixes
    }
}

struct Frame {
    name: Vec<u8>,
    /// Namespace prefixes declared on this element
    declared: Vec<String>,
    top_level_description: bool,
    first_description: bool,
}

fn declared_prefixes(start: &BytesStart<'_>) -> Result<Vec<String>> {
    let mut prefixes = Vec::new();
    for attr in start.attributes() {
        let attr = attr.map_err(xml_error)?;
        if let Some(prefix) = attr.key.as_ref().strip_prefix(b"xmlns:") {
            prefixes.push(String::from_utf8_lossy(prefix).into_owned());
        }
    }
    Ok(prefixes)
}

/// Streaming rewriter state
struct Rewriter<'e> {
    edit: &'e Edit,
    writer: Writer<Vec<u8>>,
    stack: Vec<Frame>,
    /// Whitespace seen since the last written event
    pending: String,
    /// Stack depth of a removed element whose subtree is being skipped
    skip_until: Option<usize>,
    seen_description: bool,
}

impl Rewriter<'_> {
    fn write(&mut self, event: Event<'_>) -> Result<()> {
        self.writer.write_event(event)?;
        Ok(())
    }

    fn flush_pending(&mut self) -> Result<()> {
        if !self.pending.is_empty() {
            let pending = std::mem::take(&mut self.pending);
            self.write(Event::Text(BytesText::from_escaped(pending)))?;
        }
        Ok(())
    }

    fn in_top_level_description(&self) -> bool {
        self.stack.last().is_some_and(|f| f.top_level_description)
    }

    fn is_declared(&self, prefix: &str, own: &[String]) -> bool {
        own.iter().any(|p| p == prefix)
            || self
                .stack
                .iter()
                .any(|frame| frame.declared.iter().any(|p| p == prefix))
    }

    /// Copy of a top-level description with target attributes dropped and,
    /// for the first one, missing namespace declarations added. `None` when
    /// nothing changes.
    fn rewrite_description(&self, start: &BytesStart<'_>, first: bool) -> Result<Option<BytesStart<'static>>> {
        let own = declared_prefixes(start)?;
        let mut changed = false;
        let mut rebuilt = BytesStart::new(element_name(start).into_owned());

        for attr in start.attributes() {
            let attr = attr.map_err(xml_error)?;
            if self.edit.is_target(attr.key.as_ref()) {
                changed = true;
            } else {
                rebuilt.extend_attributes([attr]);
            }
        }

        if first {
            for prefix in self.edit.prefixes() {
                if self.is_declared(prefix, &own) {
                    continue;
                }
                if let Some(uri) = namespace_uri(prefix) {
                    rebuilt.push_attribute((format!("xmlns:{}", prefix).as_str(), uri));
                    changed = true;
                }
            }
        }

        Ok(changed.then_some(rebuilt))
    }

    fn write_insertions(&mut self) -> Result<()> {
        let edit = self.edit;
        for property in &edit.insertions {
            self.write(Event::Text(BytesText::from_escaped("\n   ")))?;
            self.write(Event::Start(BytesStart::new(property.name)))?;
            match &property.value {
                PropertyValue::Simple(value) => {
                    self.write(Event::Text(BytesText::new(value)))?;
                }
                PropertyValue::Bag(items) => {
                    self.write(Event::Text(BytesText::from_escaped("\n    ")))?;
                    self.write(Event::Start(BytesStart::new(RDF_BAG)))?;
                    for item in items {
                        self.write(Event::Text(BytesText::from_escaped("\n     ")))?;
                        self.write(Event::Start(BytesStart::new("rdf:li")))?;
                        self.write(Event::Text(BytesText::new(item)))?;
                        self.write(Event::End(BytesEnd::new("rdf:li")))?;
                    }
                    self.write(Event::Text(BytesText::from_escaped("\n    ")))?;
                    self.write(Event::End(BytesEnd::new(RDF_BAG)))?;
                    self.write(Event::Text(BytesText::from_escaped("\n   ")))?;
                }
            }
            self.write(Event::End(BytesEnd::new(property.name)))?;
        }
        Ok(())
    }

    /// A fresh description holding all insertions, for packets without one.
    fn write_new_description(&mut self) -> Result<()> {
        let mut start = BytesStart::new("rdf:Description");
        start.push_attribute(("rdf:about", ""));
        for prefix in self.edit.prefixes() {
            if self.is_declared(prefix, &[]) {
                continue;
            }
            if let Some(uri) = namespace_uri(prefix) {
                start.push_attribute((format!("xmlns:{}", prefix).as_str(), uri));
            }
        }
        self.write(Event::Text(BytesText::from_escaped("\n  ")))?;
        self.write(Event::Start(start))?;
        self.write_insertions()?;
        self.write(Event::Text(BytesText::from_escaped("\n  ")))?;
        self.write(Event::End(BytesEnd::new("rdf:Description")))
    }

    fn run(mut self, xmp: &str) -> Result<Vec<u8>> {
        let mut reader = Reader::from_str(xmp);
        reader.config_mut().trim_text(false);
        reader.config_mut().expand_empty_elements = false;
        let mut saw_rdf = false;

        loop {
            let event = reader.read_event()?;

            if let Some(depth) = self.skip_until {
                match event {
                    Event::Start(e) => self.stack.push(Frame {
                        name: e.name().as_ref().to_vec(),
                        declared: Vec::new(),
                        top_level_description: false,
                        first_description: false,
                    }),
                    Event::End(_) => {
                        self.stack.pop();
                        if self.stack.len() == depth {
                            self.skip_until = None;
                        }
                    }
                    Event::Eof => return Err(Error::format("XMP ended inside an element")),
                    _ => {}
                }
                continue;
            }

            match event {
                Event::Text(e) => {
                    let text = e.decode().map_err(xml_error)?.into_owned();
                    if text.trim().is_empty() {
                        self.pending.push_str(&text);
                    } else {
                        self.flush_pending()?;
                        self.write(Event::Text(e))?;
                    }
                }
                Event::Start(e) => {
                    let name = e.name().as_ref().to_vec();
                    if self.in_top_level_description() && self.edit.is_target(&name) {
                        self.pending.clear();
                        self.skip_until = Some(self.stack.len());
                        self.stack.push(Frame {
                            name,
                            declared: Vec::new(),
                            top_level_description: false,
                            first_description: false,
                        });
                        continue;
                    }

                    let top_level = name == RDF_DESCRIPTION
                        && self.stack.last().is_some_and(|f| f.name == RDF_RDF);
                    let first = top_level && !self.seen_description;
                    let declared = declared_prefixes(&e)?;
                    saw_rdf |= name == RDF_RDF;

                    self.flush_pending()?;
                    if top_level {
                        self.seen_description = true;
                        match self.rewrite_description(&e, first)? {
                            Some(rebuilt) => self.write(Event::Start(rebuilt))?,
                            None => self.write(Event::Start(e))?,
                        }
                    } else {
                        self.write(Event::Start(e))?;
                    }
                    self.stack.push(Frame {
                        name,
                        declared,
                        top_level_description: top_level,
                        first_description: first,
                    });
                }
                Event::Empty(e) => {
                    let name = e.name().as_ref().to_vec();
                    if self.in_top_level_description() && self.edit.is_target(&name) {
                        self.pending.clear();
                        continue;
                    }

                    let top_level = name == RDF_DESCRIPTION
                        && self.stack.last().is_some_and(|f| f.name == RDF_RDF);
                    self.flush_pending()?;
                    if !top_level {
                        self.write(Event::Empty(e))?;
                        continue;
                    }

                    let first = !self.seen_description;
                    self.seen_description = true;
                    let rebuilt = self.rewrite_description(&e, first)?;
                    if first && !self.edit.insertions.is_empty() {
                        let start = rebuilt.unwrap_or_else(|| e.clone().into_owned());
                        let end = BytesEnd::new(element_name(&start).into_owned());
                        self.write(Event::Start(start))?;
                        self.write_insertions()?;
                        self.write(Event::Text(BytesText::from_escaped("\n  ")))?;
                        self.write(Event::End(end))?;
                    } else {
                        match rebuilt {
                            Some(rebuilt) => self.write(Event::Empty(rebuilt))?,
                            None => self.write(Event::Empty(e))?,
                        }
                    }
                }
                Event::End(e) => {
                    let closes_first = self.stack.last().is_some_and(|f| f.first_description);
                    let closes_rdf = self.stack.last().is_some_and(|f| f.name == RDF_RDF);
                    if closes_first {
                        self.write_insertions()?;
                    } else if closes_rdf
                        && !self.seen_description
                        && !self.edit.insertions.is_empty()
                    {
                        self.write_new_description()?;
                        self.seen_description = true;
                    }
                    self.stack.pop();
                    self.flush_pending()?;
                    self.write(Event::End(e))?;
                }
                Event::Eof => break,
                other => {
                    self.flush_pending()?;
                    self.write(other)?;
                }
            }
        }
        self.flush_pending()?;

        if !saw_rdf && !self.edit.insertions.is_empty() {
            return Err(Error::format("XMP packet has no rdf:RDF element"));
        }
        Ok(self.writer.into_inner())
    }
}

/// Apply `updates` to an XMP packet, or to an empty packet when `xmp` is `None`.
pub fn apply_updates(xmp: Option<&str>, updates: &[MetadataUpdate], options: &Options) -> Result<String> {
    let edit = Edit::new(updates, options)?;
    let rewriter = Rewriter {
        edit: &edit,
        writer: Writer::new(Vec::new()),
        stack: Vec::new(),
        pending: String::new(),
        skip_until: None,
        seen_description: false,
    };
    let bytes = rewriter.run(xmp.unwrap_or(EMPTY_PACKET))?;
    String::from_utf8(bytes).map_err(|e| Error::format(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{test_utils::SAMPLE_XMP, updates::DateTimeZone};

    fn utc() -> Options {
        Options::new().time_zone(DateTimeZone::Utc)
    }

    fn set(values: &[&str]) -> BTreeSet<String> {
        values.iter().map(|s| s.to_string()).collect()
    }

    const ELEMENT_XMP: &str = r#"<x:xmpmeta xmlns:x="adobe:ns:meta/">
 <rdf:RDF xmlns:rdf="http://www.w3.org/1999/02/22-rdf-syntax-ns#">
  <rdf:Description rdf:about="" xmlns:tiff="http://ns.adobe.com/tiff/1.0/">
   <tiff:Orientation>8</tiff:Orientation>
  </rdf:Description>
  <rdf:Description rdf:about=""
    xmlns:exif="http://ns.adobe.com/exif/1.0/"
    xmlns:tiff="http://ns.adobe.com/tiff/1.0/"
    xmlns:Iptc4xmpExt="http://iptc.org/std/Iptc4xmpExt/2008-02-29/"
    exif:DateTimeOriginal="2023-07-12T14:48:45.401+02:00"
    exif:GPSLatitude="53,13.16346N"
    exif:GPSLongitude="8,14.37966E"
    tiff:Orientation="3">
   <Iptc4xmpExt:PersonInImage>
    <rdf:Bag>
     <rdf:li>Swiper</rdf:li>
     <rdf:li>Tom &amp; Jerry</rdf:li>
    </rdf:Bag>
   </Iptc4xmpExt:PersonInImage>
  </rdf:Description>
 </rdf:RDF>
</x:xmpmeta>"#;

    #[test]
    fn test_read_attributes_and_bags() {
        let metadata = photo_metadata(SAMPLE_XMP, &utc()).unwrap();
        assert_eq!(metadata.rating, Some(PhotoRating::ThreeStars));
        assert_eq!(metadata.keywords, set(&["beach", "summer"]));
        let location = metadata.location.unwrap();
        assert_eq!(location.city.as_deref(), Some("Oldenburg"));
        assert_eq!(location.state, None);
        assert_eq!(location.country.as_deref(), Some("Germany"));
    }

    #[test]
    fn test_read_elements_first_wins() {
        let metadata = photo_metadata(ELEMENT_XMP, &utc()).unwrap();
        assert_eq!(metadata.orientation, Some(TiffOrientation::RotateLeft));
        assert_eq!(metadata.taken_date, Some(1_689_166_125_401));
        assert_eq!(metadata.persons_in_image, set(&["Swiper", "Tom & Jerry"]));
        let gps = metadata.gps_coordinates.unwrap();
        assert!((gps.latitude - 53.219391).abs() < 1e-6);
        assert!((gps.longitude - 8.239661).abs() < 1e-6);
    }

    #[test]
    fn test_gps_coordinate_formats() {
        assert_eq!(parse_gps_coordinate("10,30.0S"), Some(-10.5));
        let west = parse_gps_coordinate("10,30,36W").unwrap();
        assert!((west + 10.51).abs() < 1e-9);
        assert_eq!(parse_gps_coordinate("12.25"), Some(12.25));
        assert_eq!(parse_gps_coordinate("x,yN"), None);
        assert_eq!(format_gps_coordinate(-10.5, 'N', 'S'), "10,30.00000000S");
        assert_eq!(format_gps_coordinate(8.239661, 'E', 'W'), "8,14.37966000E");
    }

    #[test]
    fn test_date_formats() {
        let options = utc();
        assert_eq!(parse_date("2023-07-12T12:48:45.401Z", &options), Some(1_689_166_125_401));
        assert_eq!(parse_date("2023-07-12T12:48:45", &options), Some(1_689_166_125_000));
        assert_eq!(parse_date("2023-07-12T14:48+02:00", &options), Some(1_689_166_080_000));
        assert_eq!(parse_date("yesterday", &options), None);
    }

    #[test]
    fn test_update_replaces_everywhere() {
        let updated = apply_updates(
            Some(ELEMENT_XMP),
            &[MetadataUpdate::Orientation(TiffOrientation::RotateRight)],
            &utc(),
        )
        .unwrap();
        assert_eq!(updated.matches("tiff:Orientation").count(), 2, "{updated}");
        assert!(updated.contains("<tiff:Orientation>6</tiff:Orientation>"));
        assert!(!updated.contains(r#"tiff:Orientation="3""#));
        let metadata = photo_metadata(&updated, &utc()).unwrap();
        assert_eq!(metadata.orientation, Some(TiffOrientation::RotateRight));
        assert_eq!(metadata.taken_date, Some(1_689_166_125_401));
        assert_eq!(metadata.persons_in_image.len(), 2);
    }

    #[test]
    fn test_update_from_empty_packet() {
        let updated = apply_updates(
            None,
            &[
                MetadataUpdate::Rating(PhotoRating::FourStars),
                MetadataUpdate::Keywords(set(&["hello", "test", "Äußerst öffentlich"])),
                MetadataUpdate::TakenDate(Some(1_689_166_125_401)),
            ],
            &utc(),
        )
        .unwrap();
        assert!(updated.contains(r#"xmlns:xmp="http://ns.adobe.com/xap/1.0/""#));
        assert!(updated.contains(r#"xmlns:dc="http://purl.org/dc/elements/1.1/""#));
        assert!(!updated.contains(r#"xmlns:rdf="http://www.w3.org/1999/02/22-rdf-syntax-ns#" xmlns:rdf"#));
        assert!(updated.contains("2023-07-12T12:48:45.401+00:00"));

        let metadata = photo_metadata(&updated, &utc()).unwrap();
        assert_eq!(metadata.rating, Some(PhotoRating::FourStars));
        assert_eq!(metadata.keywords, set(&["hello", "test", "Äußerst öffentlich"]));
        assert_eq!(metadata.taken_date, Some(1_689_166_125_401));
    }

    #[test]
    fn test_update_is_idempotent() {
        let updates = [
            MetadataUpdate::Keywords(set(&["a", "b"])),
            MetadataUpdate::Persons(set(&["Swiper", "Dora"])),
            MetadataUpdate::GpsCoordinates(Some(GpsCoordinates::new(53.219391, 8.239661))),
            MetadataUpdate::Rating(PhotoRating::FiveStars),
        ];
        for source in [None, Some(SAMPLE_XMP), Some(ELEMENT_XMP)] {
            let once = apply_updates(source, &updates, &utc()).unwrap();
            let twice = apply_updates(Some(once.as_str()), &updates, &utc()).unwrap();
            assert_eq!(once, twice);
        }
    }

    #[test]
    fn test_empty_keywords_removes_subject() {
        let updated =
            apply_updates(Some(SAMPLE_XMP), &[MetadataUpdate::Keywords(BTreeSet::new())], &utc())
                .unwrap();
        assert!(!updated.contains("dc:subject"));
        assert!(!updated.contains("beach"));
        let metadata = photo_metadata(&updated, &utc()).unwrap();
        assert!(metadata.keywords.is_empty());
        assert_eq!(metadata.rating, Some(PhotoRating::ThreeStars));
    }

    #[test]
    fn test_untouched_content_survives() {
        let updated =
            apply_updates(Some(SAMPLE_XMP), &[MetadataUpdate::Rating(PhotoRating::OneStar)], &utc())
                .unwrap();
        assert!(updated.starts_with("<?xpacket begin="));
        assert!(updated.ends_with("<?xpacket end=\"w\"?>"));
        assert!(updated.contains(r#"photoshop:City="Oldenburg""#));
        assert!(updated.contains("<rdf:li>summer</rdf:li>"));
        assert!(!updated.contains(r#"xmp:Rating="3""#));
        assert!(updated.contains("<xmp:Rating>1</xmp:Rating>"));
    }

    #[test]
    fn test_description_created_when_missing() {
        let xmp = r#"<x:xmpmeta xmlns:x="adobe:ns:meta/"><rdf:RDF xmlns:rdf="http://www.w3.org/1999/02/22-rdf-syntax-ns#">
 </rdf:RDF></x:xmpmeta>"#;
        let updates = [MetadataUpdate::Rating(PhotoRating::TwoStars)];
        let updated = apply_updates(Some(xmp), &updates, &utc()).unwrap();
        assert_eq!(
            photo_metadata(&updated, &utc()).unwrap().rating,
            Some(PhotoRating::TwoStars)
        );
        assert_eq!(apply_updates(Some(updated.as_str()), &updates, &utc()).unwrap(), updated);
    }

    const REGIONS_XMP: &str = r#"<x:xmpmeta xmlns:x="adobe:ns:meta/">
 <rdf:RDF xmlns:rdf="http://www.w3.org/1999/02/22-rdf-syntax-ns#">
  <rdf:Description rdf:about=""
    xmlns:mwg-rs="http://www.metadataworkinggroup.com/schemas/regions/"
    xmlns:stArea="http://ns.adobe.com/xmp/sType/Area#"
    xmlns:stDim="http://ns.adobe.com/xap/1.0/sType/Dimensions#">
   <mwg-rs:Regions rdf:parseType="Resource">
    <mwg-rs:AppliedToDimensions stDim:w="4000" stDim:h="3000" stDim:unit="pixel"/>
    <mwg-rs:RegionList>
     <rdf:Bag>
      <rdf:li>
       <rdf:Description mwg-rs:Name="Swiper" mwg-rs:Type="Face">
        <mwg-rs:Area stArea:x="0.5" stArea:y="0.25" stArea:w="0.1" stArea:h="0.2" stArea:unit="normalized"/>
       </rdf:Description>
      </rdf:li>
      <rdf:li rdf:parseType="Resource">
       <mwg-rs:Name>Tom &amp; Jerry</mwg-rs:Name>
       <mwg-rs:Area rdf:parseType="Resource">
        <stArea:x>0.125</stArea:x>
        <stArea:y>0.75</stArea:y>
        <stArea:w>0.05</stArea:w>
        <stArea:h>0.0625</stArea:h>
       </mwg-rs:Area>
      </rdf:li>
      <rdf:li>
       <rdf:Description mwg-rs:Name="Swiper" mwg-rs:Type="Face">
        <mwg-rs:Area stArea:x="0.9" stArea:y="0.9" stArea:w="0.1" stArea:h="0.1"/>
       </rdf:Description>
      </rdf:li>
      <rdf:li>
       <rdf:Description mwg-rs:Name="Sign" mwg-rs:Type="Focus">
        <mwg-rs:Area stArea:x="0.1" stArea:y="0.1" stArea:w="0.1" stArea:h="0.1"/>
       </rdf:Description>
      </rdf:li>
      <rdf:li>
       <rdf:Description mwg-rs:Name="Nobody" mwg-rs:Type="Face">
        <mwg-rs:Area stArea:x="0.1" stArea:y="0.1"/>
       </rdf:Description>
      </rdf:li>
     </rdf:Bag>
    </mwg-rs:RegionList>
   </mwg-rs:Regions>
  </rdf:Description>
 </rdf:RDF>
</x:xmpmeta>"#;

    #[test]
    fn test_read_face_regions() {
        let metadata = photo_metadata(REGIONS_XMP, &utc()).unwrap();
        assert_eq!(metadata.faces.len(), 2, "{:?}", metadata.faces);
        assert_eq!(
            metadata.faces["Swiper"],
            RegionArea {
                x: 0.5,
                y: 0.25,
                width: 0.1,
                height: 0.2
            }
        );
        assert_eq!(
            metadata.faces["Tom & Jerry"],
            RegionArea {
                x: 0.125,
                y: 0.75,
                width: 0.05,
                height: 0.0625
            }
        );
        assert!(photo_metadata(SAMPLE_XMP, &utc()).unwrap().faces.is_empty());
    }

    #[test]
    fn test_faces_survive_updates() {
        let updated = apply_updates(
            Some(REGIONS_XMP),
            &[MetadataUpdate::Persons(set(&["Swiper"]))],
            &utc(),
        )
        .unwrap();
        let metadata = photo_metadata(&updated, &utc()).unwrap();
        assert_eq!(metadata.faces.len(), 2);
        assert_eq!(metadata.persons_in_image, set(&["Swiper"]));
    }

    #[test]
    fn test_errors() {
        assert!(photo_metadata("<a><b></a>", &utc()).unwrap_err().is_read_error());
        let err = apply_updates(Some("<a/>"), &[MetadataUpdate::Rating(PhotoRating::OneStar)], &utc())
            .unwrap_err();
        assert!(err.is_read_error());
        let err = apply_updates(
            None,
            &[MetadataUpdate::GpsCoordinates(Some(GpsCoordinates::new(0.0, 200.0)))],
            &utc(),
        )
        .unwrap_err();
        assert!(err.is_write_error());
    }
}
