//! PNG metadata I/O implementation

use std::io::{Cursor, Read, Seek, Write};

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};

use crate::{
    crc::PartialCrc,
    error::{Error, Result},
    exif,
    formats::{
        png::{
            decode_raw_profile, encode_raw_profile, read_chunks, ChunkType, PngChunk,
            PngChunkItxt, EXIF_PROFILE_KEYWORD, IPTC_PROFILE_KEYWORD, MAX_CHUNK_LENGTH, PNG_SIGNATURE,
            XMP_KEYWORD,
        },
        ImageFormat, MetadataIO,
    },
    metadata::PhotoMetadata,
    tiff::read_tiff_bytes,
    updates::{MetadataUpdate, Options},
    xmp,
};

/// Prefix some writers put in front of the TIFF data of an EXIF profile
const EXIF_PREFIX: &[u8] = b"Exif\0\0";

/// Chunk types holding metadata this crate reads
const METADATA_CHUNKS: [ChunkType; 5] = [
    ChunkType::IHDR,
    ChunkType::EXIF,
    ChunkType::TEXT,
    ChunkType::ZTXT,
    ChunkType::ITXT,
];

/// Writes a PNG with its metadata chunks replaced
pub struct PngWriter;

impl PngWriter {
    /// Copy `original` to `writer`, swapping in the supplied metadata.
    ///
    /// For every block that is supplied, the chunks carrying the old one are
    /// dropped. The new chunks are placed right after IHDR in the order EXIF
    /// (`eXIf`), IPTC (hex `tEXt`), XMP (uncompressed `iTXt`). All other
    /// chunks keep their order and get their CRC recomputed.
    pub fn write_image<W: Write>(
        writer: &mut W,
        original: &[u8],
        exif: Option<&[u8]>,
        iptc: Option<&[u8]>,
        xmp: Option<&str>,
    ) -> Result<()> {
        let chunks = read_chunks(&mut Cursor::new(original), None)?;

        let retained = chunks.iter().filter(|chunk| {
            let replaced = (exif.is_some()
                && (chunk.chunk_type == ChunkType::EXIF || chunk.has_keyword(EXIF_PROFILE_KEYWORD)))
                || (iptc.is_some() && chunk.has_keyword(IPTC_PROFILE_KEYWORD))
                || (xmp.is_some() && chunk.has_keyword(XMP_KEYWORD));
            if replaced {
                log::debug!("Dropping PNG {} chunk ({} bytes)", chunk.chunk_type, chunk.length);
            }
            !replaced
        });

        writer.write_all(&PNG_SIGNATURE)?;
        for chunk in retained {
            write_chunk(writer, chunk.chunk_type, &chunk.bytes)?;
            if chunk.chunk_type != ChunkType::IHDR {
                continue;
            }

            if let Some(exif) = exif {
                write_chunk(writer, ChunkType::EXIF, exif)?;
            }
            if let Some(iptc) = iptc {
                let mut data = IPTC_PROFILE_KEYWORD.as_bytes().to_vec();
                data.push(0);
                data.extend_from_slice(encode_raw_profile("IPTC", iptc).as_bytes());
                write_chunk(writer, ChunkType::TEXT, &data)?;
            }
            if let Some(xmp) = xmp {
                write_chunk(writer, ChunkType::ITXT, &PngChunkItxt::encode(XMP_KEYWORD, xmp))?;
            }
        }
        Ok(())
    }
}

/// Write length, type, data and the CRC over type and data.
fn write_chunk<W: Write>(writer: &mut W, chunk_type: ChunkType, data: &[u8]) -> Result<()> {
    let length = u32::try_from(data.len())
        .ok()
        .filter(|&length| length <= MAX_CHUNK_LENGTH)
        .ok_or(Error::DataTooLarge {
            size: data.len(),
            max: MAX_CHUNK_LENGTH as usize,
        })?;

    let crc = PartialCrc::start(chunk_type.bytes());
    let crc = PartialCrc::continue_crc(crc, data);

    writer.write_u32::<BigEndian>(length)?;
    writer.write_all(chunk_type.bytes())?;
    writer.write_all(data)?;
    writer.write_u32::<BigEndian>(PartialCrc::finish(crc))?;
    Ok(())
}

/// EXIF and XMP found in a chunk list
#[derive(Default)]
struct PngMetadataBlocks {
    size: Option<(u32, u32)>,
    exif: Option<Vec<u8>>,
    xmp: Option<String>,
}

impl PngMetadataBlocks {
    /// The first `eXIf` chunk wins over a raw EXIF profile; the first XMP
    /// text chunk is used.
    fn collect(chunks: &[PngChunk]) -> Result<Self> {
        let mut blocks = Self::default();
        let mut profile_exif = None;

        for chunk in chunks {
            match chunk.chunk_type {
                ChunkType::IHDR if blocks.size.is_none() => {
                    if chunk.bytes.len() < 8 {
                        return Err(Error::format("PNG IHDR chunk is too short"));
                    }
                    let mut ihdr = chunk.bytes.as_slice();
                    let width = ihdr.read_u32::<BigEndian>()?;
                    let height = ihdr.read_u32::<BigEndian>()?;
                    blocks.size = Some((width, height));
                }
                ChunkType::EXIF if blocks.exif.is_none() => {
                    let data = chunk.bytes.strip_prefix(EXIF_PREFIX).unwrap_or(&chunk.bytes);
                    blocks.exif = Some(data.to_vec());
                }
                _ if chunk.has_keyword(EXIF_PROFILE_KEYWORD) && profile_exif.is_none() => {
                    if let Some(text) = chunk.text()? {
                        let data = decode_raw_profile(text.text())?;
                        profile_exif = Some(if data.starts_with(EXIF_PREFIX) {
                            data[EXIF_PREFIX.len()..].to_vec()
                        } else {
                            data
                        });
                    }
                }
                _ if chunk.has_keyword(XMP_KEYWORD) && blocks.xmp.is_none() => {
                    if let Some(text) = chunk.text()? {
                        blocks.xmp = Some(text.text().to_string());
                    }
                }
                _ => {}
            }
        }

        if blocks.exif.is_none() {
            blocks.exif = profile_exif;
        }
        Ok(blocks)
    }
}

/// PNG metadata I/O implementation
pub struct PngIO;

impl PngIO {
    /// Create a new PNG I/O implementation
    pub fn new() -> Self {
        Self
    }
}

impl Default for PngIO {
    fn default() -> Self {
        Self::new()
    }
}

impl MetadataIO for PngIO {
    fn format() -> ImageFormat {
        ImageFormat::Png
    }

    fn extensions() -> &'static [&'static str] {
        &["png"]
    }

    fn mime_types() -> &'static [&'static str] {
        &["image/png"]
    }

    fn detect(header: &[u8]) -> Option<ImageFormat> {
        header.starts_with(&PNG_SIGNATURE).then_some(ImageFormat::Png)
    }

    fn read_metadata<R: Read + Seek>(&self, source: &mut R, options: &Options) -> Result<PhotoMetadata> {
        let chunks = read_chunks(source, Some(&METADATA_CHUNKS))?;
        let blocks = PngMetadataBlocks::collect(&chunks)?;

        let mut header = PhotoMetadata::default();
        if let Some((width, height)) = blocks.size {
            header.width_px = Some(width);
            header.height_px = Some(height);
        }

        let exif = match &blocks.exif {
            Some(data) => Some(exif::photo_metadata(&read_tiff_bytes(data)?, options)),
            None => None,
        };
        let xmp = match &blocks.xmp {
            Some(packet) => Some(xmp::photo_metadata(packet, options)?),
            None => None,
        };

        let merged = crate::metadata::merge(xmp, exif);
        Ok(crate::metadata::merge(merged, Some(header)).unwrap_or_default())
    }

    fn update(&self, bytes: &[u8], updates: &[MetadataUpdate], options: &Options) -> Result<Vec<u8>> {
        if updates.is_empty() {
            return Ok(bytes.to_vec());
        }
        let chunks = read_chunks(&mut Cursor::new(bytes), Some(&METADATA_CHUNKS))?;
        let blocks = PngMetadataBlocks::collect(&chunks)?;

        let exif = if options.needs_exif_rewrite(updates) {
            Some(exif::update_exif(blocks.exif.as_deref(), updates, options)?)
        } else {
            None
        };
        let xmp = xmp::apply_updates(blocks.xmp.as_deref(), updates, options)?;

        let mut out = Vec::with_capacity(bytes.len() + xmp.len());
        PngWriter::write_image(&mut out, bytes, exif.as_deref(), None, Some(xmp.as_str()))?;
        Ok(out)
    }
}
