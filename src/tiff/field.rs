//! Field types and type-directed value decoding

use super::{tags, ByteOrder, DirectoryKind};
use crate::error::{Error, Result};
use std::fmt;
use std::io::Cursor;

/// TIFF field type codes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FieldType {
    Byte,
    Ascii,
    Short,
    Long,
    Rational,
    SByte,
    Undefined,
    SShort,
    SLong,
    SRational,
    Float,
    Double,
    Ifd,
}

impl FieldType {
    /// Map a type code to a field type; unknown codes yield `None`.
    pub fn from_code(code: u16) -> Option<Self> {
        Some(match code {
            1 => FieldType::Byte,
            2 => FieldType::Ascii,
            3 => FieldType::Short,
            4 => FieldType::Long,
            5 => FieldType::Rational,
            6 => FieldType::SByte,
            7 => FieldType::Undefined,
            8 => FieldType::SShort,
            9 => FieldType::SLong,
            10 => FieldType::SRational,
            11 => FieldType::Float,
            12 => FieldType::Double,
            13 => FieldType::Ifd,
            _ => return None,
        })
    }

    pub fn code(self) -> u16 {
        match self {
            FieldType::Byte => 1,
            FieldType::Ascii => 2,
            FieldType::Short => 3,
            FieldType::Long => 4,
            FieldType::Rational => 5,
            FieldType::SByte => 6,
            FieldType::Undefined => 7,
            FieldType::SShort => 8,
            FieldType::SLong => 9,
            FieldType::SRational => 10,
            FieldType::Float => 11,
            FieldType::Double => 12,
            FieldType::Ifd => 13,
        }
    }

    /// Size of one element in bytes
    pub fn size(self) -> u32 {
        match self {
            FieldType::Byte | FieldType::Ascii | FieldType::SByte | FieldType::Undefined => 1,
            FieldType::Short | FieldType::SShort => 2,
            FieldType::Long | FieldType::SLong | FieldType::Float | FieldType::Ifd => 4,
            FieldType::Rational | FieldType::SRational | FieldType::Double => 8,
        }
    }
}

/// Unsigned fraction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rational {
    pub numerator: u32,
    pub denominator: u32,
}

impl Rational {
    pub fn new(numerator: u32, denominator: u32) -> Self {
        Self {
            numerator,
            denominator,
        }
    }

    /// Value as a float; a zero denominator yields `None`.
    pub fn to_f64(self) -> Option<f64> {
        (self.denominator != 0).then(|| self.numerator as f64 / self.denominator as f64)
    }
}

/// Signed fraction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SRational {
    pub numerator: i32,
    pub denominator: i32,
}

impl SRational {
    pub fn to_f64(self) -> Option<f64> {
        (self.denominator != 0).then(|| self.numerator as f64 / self.denominator as f64)
    }
}

/// Decoded field value
///
/// ASCII values are split at NUL bytes and decoded as Latin-1 so that
/// decoding followed by encoding restores the original bytes.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Bytes(Vec<u8>),
    Ascii(Vec<String>),
    Shorts(Vec<u16>),
    SShorts(Vec<i16>),
    Longs(Vec<u32>),
    SLongs(Vec<i32>),
    Rationals(Vec<Rational>),
    SRationals(Vec<SRational>),
    Floats(Vec<f32>),
    Doubles(Vec<f64>),
}

impl FieldValue {
    /// Decode raw value bytes according to the field type.
    pub fn decode(field_type: FieldType, bytes: &[u8], byte_order: ByteOrder) -> Result<Self> {
        let size = field_type.size() as usize;
        if bytes.len() % size != 0 {
            return Err(Error::format(format!(
                "{} value bytes do not fit field type {:?}",
                bytes.len(),
                field_type
            )));
        }
        let count = bytes.len() / size;
        let mut cursor = Cursor::new(bytes);
        let cursor = &mut cursor;

        Ok(match field_type {
            FieldType::Byte | FieldType::SByte | FieldType::Undefined => {
                FieldValue::Bytes(bytes.to_vec())
            }
            FieldType::Ascii => FieldValue::Ascii(decode_ascii(bytes)),
            FieldType::Short => FieldValue::Shorts(
                (0..count)
                    .map(|_| byte_order.read_u16(&mut *cursor))
                    .collect::<std::io::Result<_>>()?,
            ),
            FieldType::SShort => FieldValue::SShorts(
                (0..count)
                    .map(|_| byte_order.read_i16(&mut *cursor))
                    .collect::<std::io::Result<_>>()?,
            ),
            FieldType::Long | FieldType::Ifd => FieldValue::Longs(
                (0..count)
                    .map(|_| byte_order.read_u32(&mut *cursor))
                    .collect::<std::io::Result<_>>()?,
            ),
            FieldType::SLong => FieldValue::SLongs(
                (0..count)
                    .map(|_| byte_order.read_i32(&mut *cursor))
                    .collect::<std::io::Result<_>>()?,
            ),
            FieldType::Rational => {
                let mut values = Vec::with_capacity(count);
                for _ in 0..count {
                    let numerator = byte_order.read_u32(cursor)?;
                    let denominator = byte_order.read_u32(cursor)?;
                    values.push(Rational::new(numerator, denominator));
                }
                FieldValue::Rationals(values)
            }
            FieldType::SRational => {
                let mut values = Vec::with_capacity(count);
                for _ in 0..count {
                    let numerator = byte_order.read_i32(cursor)?;
                    let denominator = byte_order.read_i32(cursor)?;
                    values.push(SRational {
                        numerator,
                        denominator,
                    });
                }
                FieldValue::SRationals(values)
            }
            FieldType::Float => FieldValue::Floats(
                (0..count)
                    .map(|_| byte_order.read_f32(&mut *cursor))
                    .collect::<std::io::Result<_>>()?,
            ),
            FieldType::Double => FieldValue::Doubles(
                (0..count)
                    .map(|_| byte_order.read_f64(&mut *cursor))
                    .collect::<std::io::Result<_>>()?,
            ),
        })
    }

    /// Encode the value in the given byte order.
    pub fn encode(&self, byte_order: ByteOrder) -> Vec<u8> {
        let mut out = Vec::new();
        // Writes into a Vec cannot fail.
        let _ = self.encode_into(&mut out, byte_order);
        out
    }

    fn encode_into(&self, out: &mut Vec<u8>, byte_order: ByteOrder) -> std::io::Result<()> {
        match self {
            FieldValue::Bytes(bytes) => out.extend_from_slice(bytes),
            FieldValue::Ascii(strings) => {
                for s in strings {
                    out.extend(s.chars().map(latin1_byte));
                    out.push(0);
                }
            }
            FieldValue::Shorts(values) => {
                for &v in values {
                    byte_order.write_u16(out, v)?;
                }
            }
            FieldValue::SShorts(values) => {
                for &v in values {
                    byte_order.write_i16(out, v)?;
                }
            }
            FieldValue::Longs(values) => {
                for &v in values {
                    byte_order.write_u32(out, v)?;
                }
            }
            FieldValue::SLongs(values) => {
                for &v in values {
                    byte_order.write_i32(out, v)?;
                }
            }
            FieldValue::Rationals(values) => {
                for r in values {
                    byte_order.write_u32(out, r.numerator)?;
                    byte_order.write_u32(out, r.denominator)?;
                }
            }
            FieldValue::SRationals(values) => {
                for r in values {
                    byte_order.write_i32(out, r.numerator)?;
                    byte_order.write_i32(out, r.denominator)?;
                }
            }
            FieldValue::Floats(values) => {
                for &v in values {
                    byte_order.write_f32(out, v)?;
                }
            }
            FieldValue::Doubles(values) => {
                for &v in values {
                    byte_order.write_f64(out, v)?;
                }
            }
        }
        Ok(())
    }

    /// Check that this value can be stored as `field_type`.
    pub fn fits(&self, field_type: FieldType) -> bool {
        matches!(
            (self, field_type),
            (
                FieldValue::Bytes(_),
                FieldType::Byte | FieldType::SByte | FieldType::Undefined
            ) | (FieldValue::Ascii(_), FieldType::Ascii)
                | (FieldValue::Shorts(_), FieldType::Short)
                | (FieldValue::SShorts(_), FieldType::SShort)
                | (FieldValue::Longs(_), FieldType::Long | FieldType::Ifd)
                | (FieldValue::SLongs(_), FieldType::SLong)
                | (FieldValue::Rationals(_), FieldType::Rational)
                | (FieldValue::SRationals(_), FieldType::SRational)
                | (FieldValue::Floats(_), FieldType::Float)
                | (FieldValue::Doubles(_), FieldType::Double)
        )
    }
}

fn decode_ascii(bytes: &[u8]) -> Vec<String> {
    let mut parts: Vec<String> = bytes
        .split(|&b| b == 0)
        .map(|part| part.iter().map(|&b| b as char).collect())
        .collect();
    // "abc\0" splits into ["abc", ""]; the trailing piece is the terminator.
    if parts.last().is_some_and(|s| s.is_empty()) {
        parts.pop();
    }
    parts
}

fn latin1_byte(c: char) -> u8 {
    u8::try_from(u32::from(c)).unwrap_or(b'?')
}

/// One directory entry
#[derive(Debug, Clone, PartialEq)]
pub struct TiffField {
    pub tag: u16,
    pub directory_kind: DirectoryKind,
    pub field_type: FieldType,
    pub count: u32,
    /// Raw value-or-offset word as stored in the entry
    pub offset: u32,
    /// `count * field_type.size()` bytes of value data
    pub value_bytes: Vec<u8>,
    pub byte_order: ByteOrder,
    /// Original entry index, used to keep field order on rewrite
    pub sort_hint: usize,
}

impl TiffField {
    pub fn value(&self) -> Result<FieldValue> {
        FieldValue::decode(self.field_type, &self.value_bytes, self.byte_order)
    }

    /// Single Short or Long value.
    pub fn int_value(&self) -> Result<u32> {
        if self.count != 1 {
            return Err(Error::format(format!(
                "Field {} has wrong count {}",
                self.tag_name(),
                self.count
            )));
        }
        self.int_values()?
            .first()
            .copied()
            .ok_or_else(|| Error::format(format!("Field {} has no value", self.tag_name())))
    }

    /// All elements of a Short or Long field widened to `u32`.
    pub fn int_values(&self) -> Result<Vec<u32>> {
        match self.value()? {
            FieldValue::Shorts(values) => Ok(values.into_iter().map(u32::from).collect()),
            FieldValue::Longs(values) => Ok(values),
            _ => Err(Error::format(format!(
                "Field {} has incorrect type {:?}",
                self.tag_name(),
                self.field_type
            ))),
        }
    }

    /// First string of an ASCII field, trimmed of trailing whitespace.
    pub fn string_value(&self) -> Option<String> {
        match self.value().ok()? {
            FieldValue::Ascii(strings) => strings
                .into_iter()
                .next()
                .map(|s| s.trim_end().to_string()),
            _ => None,
        }
    }

    pub fn rational_values(&self) -> Option<Vec<Rational>> {
        match self.value().ok()? {
            FieldValue::Rationals(values) => Some(values),
            _ => None,
        }
    }

    pub fn tag_info(&self) -> Option<&'static tags::TagInfo> {
        tags::lookup(self.tag, self.directory_kind)
    }

    pub fn tag_name(&self) -> String {
        tags::tag_name(self.tag, self.directory_kind)
    }

    /// True if the value is an offset regenerated on write.
    pub fn is_offset(&self) -> bool {
        self.tag_info().is_some_and(|info| info.is_offset)
    }
}

impl fmt::Display for TiffField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:04x} ({}): ", self.tag, self.tag_name())?;
        match self.value() {
            Ok(FieldValue::Ascii(strings)) => write!(f, "'{}'", strings.join("', '")),
            Ok(FieldValue::Bytes(bytes)) if bytes.len() > 16 => write!(f, "{} bytes", bytes.len()),
            Ok(value) => write!(f, "{:?}", value),
            Err(_) => write!(f, "<invalid>"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn field(field_type: FieldType, bytes: Vec<u8>, order: ByteOrder) -> TiffField {
        TiffField {
            tag: tags::ORIENTATION,
            directory_kind: DirectoryKind::Root,
            field_type,
            count: (bytes.len() / field_type.size() as usize) as u32,
            offset: 0,
            value_bytes: bytes,
            byte_order: order,
            sort_hint: 0,
        }
    }

    #[test]
    fn test_field_type_codes() {
        for code in 1..=13 {
            let ty = FieldType::from_code(code).unwrap();
            assert_eq!(ty.code(), code);
        }
        assert!(FieldType::from_code(0).is_none());
        assert!(FieldType::from_code(14).is_none());
        assert_eq!(FieldType::Rational.size(), 8);
        assert_eq!(FieldType::Short.size(), 2);
    }

    #[test]
    fn test_ascii_split() {
        let value = FieldValue::decode(FieldType::Ascii, b"Canon\0", ByteOrder::BigEndian).unwrap();
        assert_eq!(value, FieldValue::Ascii(vec!["Canon".into()]));
        assert_eq!(value.encode(ByteOrder::BigEndian), b"Canon\0");

        let value = FieldValue::decode(FieldType::Ascii, b"a\0b\0", ByteOrder::BigEndian).unwrap();
        assert_eq!(value, FieldValue::Ascii(vec!["a".into(), "b".into()]));

        let padded = b"abc\0\0";
        let value = FieldValue::decode(FieldType::Ascii, padded, ByteOrder::BigEndian).unwrap();
        assert_eq!(value.encode(ByteOrder::LittleEndian), padded);
    }

    #[test]
    fn test_latin1_ascii_preserved() {
        let bytes = [b'M', 0xFC, b'n', 0];
        let value = FieldValue::decode(FieldType::Ascii, &bytes, ByteOrder::BigEndian).unwrap();
        assert_eq!(value.encode(ByteOrder::BigEndian), bytes);
    }

    #[test]
    fn test_reencode_changes_byte_order() {
        let value = FieldValue::decode(
            FieldType::Rational,
            &[0, 0, 0, 1, 0, 0, 0, 2],
            ByteOrder::BigEndian,
        )
        .unwrap();
        assert_eq!(value, FieldValue::Rationals(vec![Rational::new(1, 2)]));
        assert_eq!(
            value.encode(ByteOrder::LittleEndian),
            [1, 0, 0, 0, 2, 0, 0, 0]
        );
    }

    #[test]
    fn test_int_value() {
        let f = field(FieldType::Short, vec![0, 6], ByteOrder::BigEndian);
        assert_eq!(f.int_value().unwrap(), 6);

        let f = field(FieldType::Long, vec![8, 0, 0, 0], ByteOrder::LittleEndian);
        assert_eq!(f.int_value().unwrap(), 8);

        let f = field(FieldType::Short, vec![0, 1, 0, 2], ByteOrder::BigEndian);
        assert!(f.int_value().is_err(), "count must be 1");
        assert_eq!(f.int_values().unwrap(), vec![1, 2]);

        let f = field(FieldType::Ascii, b"x\0".to_vec(), ByteOrder::BigEndian);
        assert!(f.int_value().is_err(), "ascii is not an integer");
    }

    #[test]
    fn test_bad_length() {
        let err = FieldValue::decode(FieldType::Long, &[1, 2, 3], ByteOrder::BigEndian);
        assert!(err.is_err());
    }

    #[test]
    fn test_fits() {
        assert!(FieldValue::Longs(vec![1]).fits(FieldType::Ifd));
        assert!(FieldValue::Bytes(vec![1]).fits(FieldType::Undefined));
        assert!(!FieldValue::Shorts(vec![1]).fits(FieldType::Long));
    }
}
