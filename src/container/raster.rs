//! PNG raster codec
//!
//! Writes 8-bit RGB/RGBA images with unfiltered scanlines and `iTXt` text
//! chunks. Reads back any non-interlaced 8-bit RGB/RGBA image, checking
//! chunk CRCs.

use crate::error::{Error, Result};
use crate::grid::sizer::MAX_GRID_SIZE;
use crate::grid::{EncodingMode, PixelGrid};
use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use flate2::Compression;
use std::collections::BTreeMap;
use std::io::{Read, Write};

const SIGNATURE: [u8; 8] = [0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A];
const COLOR_RGB: u8 = 2;
const COLOR_RGBA: u8 = 6;

/// Decoded image plus its text chunks
#[derive(Debug, Clone)]
pub struct RasterImage {
    pub grid: PixelGrid,
    pub texts: BTreeMap<String, String>,
}

fn write_chunk(out: &mut Vec<u8>, kind: &[u8; 4], data: &[u8]) {
    out.extend_from_slice(&(data.len() as u32).to_be_bytes());
    out.extend_from_slice(kind);
    out.extend_from_slice(data);
    let mut hasher = crc32fast::Hasher::new();
    hasher.update(kind);
    hasher.update(data);
    out.extend_from_slice(&hasher.finalize().to_be_bytes());
}

/// Serialize a grid with `(keyword, text)` chunks
pub fn encode_png(grid: &PixelGrid, texts: &[(&str, &str)]) -> Result<Vec<u8>> {
    let size = grid.size();
    let color = match grid.mode() {
        EncodingMode::Dense => COLOR_RGB,
        EncodingMode::Code => COLOR_RGBA,
    };

    let mut out = Vec::with_capacity(grid.as_bytes().len() / 2 + 1024);
    out.extend_from_slice(&SIGNATURE);

    let mut ihdr = Vec::with_capacity(13);
    ihdr.extend_from_slice(&size.to_be_bytes());
    ihdr.extend_from_slice(&size.to_be_bytes());
    ihdr.extend_from_slice(&[8, color, 0, 0, 0]);
    write_chunk(&mut out, b"IHDR", &ihdr);

    for (keyword, text) in texts {
        if keyword.is_empty() || keyword.len() > 79 || keyword.contains('\0') {
            return Err(Error::InvalidArgument(format!(
                "Invalid text chunk keyword: {:?}",
                keyword
            )));
        }
        // keyword, no compression, empty language and translated keyword
        let mut itxt = Vec::with_capacity(keyword.len() + text.len() + 5);
        itxt.extend_from_slice(keyword.as_bytes());
        itxt.extend_from_slice(&[0, 0, 0, 0, 0]);
        itxt.extend_from_slice(text.as_bytes());
        write_chunk(&mut out, b"iTXt", &itxt);
    }

    let stride = size as usize * grid.channels();
    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
    for row in grid.as_bytes().chunks(stride) {
        encoder
            .write_all(&[0])
            .and_then(|_| encoder.write_all(row))
            .map_err(|e| Error::Compression(format!("Failed to deflate scanline: {}", e)))?;
    }
    let idat = encoder
        .finish()
        .map_err(|e| Error::Compression(format!("Failed to finish image data: {}", e)))?;
    write_chunk(&mut out, b"IDAT", &idat);
    write_chunk(&mut out, b"IEND", &[]);

    Ok(out)
}

struct Header {
    size: u32,
    mode: EncodingMode,
}

fn parse_header(data: &[u8]) -> Result<Header> {
    if data.len() != 13 {
        return Err(Error::Format("Malformed IHDR chunk".to_string()));
    }
    let width = u32::from_be_bytes([data[0], data[1], data[2], data[3]]);
    let height = u32::from_be_bytes([data[4], data[5], data[6], data[7]]);
    let (depth, color, interlace) = (data[8], data[9], data[12]);

    if width != height {
        return Err(Error::Format(format!(
            "Grid must be square, got {}x{}",
            width, height
        )));
    }
    if depth != 8 || interlace != 0 {
        return Err(Error::Format(format!(
            "Unsupported raster: bit depth {}, interlace {}",
            depth, interlace
        )));
    }
    let mode = match color {
        COLOR_RGB => EncodingMode::Dense,
        COLOR_RGBA => EncodingMode::Code,
        other => {
            return Err(Error::Format(format!("Unsupported colour type {}", other)));
        }
    };
    Ok(Header { size: width, mode })
}

fn parse_text(kind: &[u8; 4], data: &[u8]) -> Result<Option<(String, String)>> {
    let split = |bytes: &[u8]| -> Option<(Vec<u8>, Vec<u8>)> {
        let nul = bytes.iter().position(|&b| b == 0)?;
        Some((bytes[..nul].to_vec(), bytes[nul + 1..].to_vec()))
    };
    let malformed = || Error::Format(format!("Malformed {} chunk", String::from_utf8_lossy(kind)));

    let (keyword, text) = match kind {
        b"tEXt" => split(data).ok_or_else(malformed)?,
        b"iTXt" => {
            let (keyword, rest) = split(data).ok_or_else(malformed)?;
            let (&compressed, rest) = rest.split_first().ok_or_else(malformed)?;
            let rest = rest.get(1..).ok_or_else(malformed)?;
            let (_language, rest) = split(rest).ok_or_else(malformed)?;
            let (_translated, text) = split(rest.as_slice()).ok_or_else(malformed)?;
            let text = if compressed == 1 {
                let mut inflated = Vec::new();
                ZlibDecoder::new(text.as_slice())
                    .read_to_end(&mut inflated)
                    .map_err(|e| Error::Format(format!("Corrupt iTXt text: {}", e)))?;
                inflated
            } else {
                text
            };
            (keyword, text)
        }
        _ => return Ok(None),
    };

    // Latin-1 and UTF-8 keywords both decode lossily here
    Ok(Some((
        String::from_utf8_lossy(&keyword).into_owned(),
        String::from_utf8(text)
            .map_err(|e| Error::Format(format!("Text chunk is not UTF-8: {}", e)))?,
    )))
}

fn paeth(a: u8, b: u8, c: u8) -> u8 {
    let p = a as i16 + b as i16 - c as i16;
    let pa = (p - a as i16).abs();
    let pb = (p - b as i16).abs();
    let pc = (p - c as i16).abs();
    if pa <= pb && pa <= pc {
        a
    } else if pb <= pc {
        b
    } else {
        c
    }
}

/// Row stride and filtered length (one filter byte per row) of a square image
fn scanline_layout(size: usize, channels: usize) -> Result<(usize, usize)> {
    size.checked_mul(channels)
        .and_then(|stride| Some((stride, size.checked_mul(stride.checked_add(1)?)?)))
        .ok_or_else(|| Error::Format(format!("{}x{} image is too large", size, size)))
}

fn unfilter(filtered: &[u8], size: usize, channels: usize) -> Result<Vec<u8>> {
    let (stride, expected) = scanline_layout(size, channels)?;
    if filtered.len() != expected {
        return Err(Error::Format(format!(
            "Image data holds {} bytes, expected {}",
            filtered.len(),
            expected
        )));
    }

    let mut out = vec![0u8; expected - size];
    let mut previous = vec![0u8; stride];
    for (y, line) in filtered.chunks(stride + 1).enumerate() {
        let (filter, line) = (line[0], &line[1..]);
        let mut row = line.to_vec();
        for i in 0..stride {
            let left = if i >= channels { row[i - channels] } else { 0 };
            let up = previous[i];
            let up_left = if i >= channels { previous[i - channels] } else { 0 };
            let predictor = match filter {
                0 => 0,
                1 => left,
                2 => up,
                3 => ((left as u16 + up as u16) / 2) as u8,
                4 => paeth(left, up, up_left),
                other => {
                    return Err(Error::Format(format!(
                        "Unknown scanline filter {} in row {}",
                        other, y
                    )));
                }
            };
            row[i] = row[i].wrapping_add(predictor);
        }
        out[y * stride..(y + 1) * stride].copy_from_slice(&row);
        previous = row;
    }
    Ok(out)
}

/// Checked chunks up to IEND, as `(type, data)`
fn read_chunks(bytes: &[u8]) -> Result<Vec<([u8; 4], &[u8])>> {
    let body = bytes
        .strip_prefix(SIGNATURE.as_slice())
        .ok_or_else(|| Error::Format("Not a PNG image".to_string()))?;
    let truncated = || Error::Format("Truncated PNG chunk".to_string());

    let mut chunks = Vec::new();
    let mut pos = 0;
    while pos < body.len() {
        let rest = &body[pos..];
        if rest.len() < 12 {
            return Err(truncated());
        }
        let len = u32::from_be_bytes([rest[0], rest[1], rest[2], rest[3]]) as usize;
        let kind: [u8; 4] = [rest[4], rest[5], rest[6], rest[7]];
        let data = rest.get(8..8 + len).ok_or_else(truncated)?;
        let crc_bytes = rest.get(8 + len..12 + len).ok_or_else(truncated)?;
        let stored_crc = u32::from_be_bytes([crc_bytes[0], crc_bytes[1], crc_bytes[2], crc_bytes[3]]);

        let mut hasher = crc32fast::Hasher::new();
        hasher.update(&kind);
        hasher.update(data);
        if hasher.finalize() != stored_crc {
            return Err(Error::Format(format!(
                "CRC mismatch in {} chunk",
                String::from_utf8_lossy(&kind)
            )));
        }

        if &kind == b"IEND" {
            return Ok(chunks);
        }
        chunks.push((kind, data));
        pos += 12 + len;
    }
    Err(Error::Format("PNG has no IEND chunk".to_string()))
}

/// Text chunks only; pixel data is not inflated
pub fn read_texts(bytes: &[u8]) -> Result<BTreeMap<String, String>> {
    let mut texts = BTreeMap::new();
    for (kind, data) in read_chunks(bytes)? {
        if let Some((keyword, text)) = parse_text(&kind, data)? {
            texts.insert(keyword, text);
        }
    }
    Ok(texts)
}

/// Parse a PNG into a grid and its text chunks
pub fn decode_png(bytes: &[u8]) -> Result<RasterImage> {
    let mut header = None;
    let mut idat = Vec::new();
    let mut texts = BTreeMap::new();

    for (kind, data) in read_chunks(bytes)? {
        match &kind {
            b"IHDR" => header = Some(parse_header(data)?),
            b"IDAT" => idat.extend_from_slice(data),
            other => {
                if let Some((keyword, text)) = parse_text(other, data)? {
                    texts.insert(keyword, text);
                }
            }
        }
    }

    let header = header.ok_or_else(|| Error::Format("PNG has no IHDR chunk".to_string()))?;
    if !header.size.is_power_of_two() || header.size > MAX_GRID_SIZE {
        return Err(Error::Format(format!(
            "Grid size must be a power of two up to {}, got {}",
            MAX_GRID_SIZE, header.size
        )));
    }

    // One byte past the expected length is enough to report a mismatch
    let (_, expected) = scanline_layout(header.size as usize, header.mode.bytes_per_pixel())?;
    let mut filtered = Vec::new();
    ZlibDecoder::new(idat.as_slice())
        .take(expected as u64 + 1)
        .read_to_end(&mut filtered)
        .map_err(|e| Error::Format(format!("Corrupt image data: {}", e)))?;

    let pixels = unfilter(&filtered, header.size as usize, header.mode.bytes_per_pixel())?;
    let grid = PixelGrid::from_raw(header.size, header.mode, pixels)?;
    Ok(RasterImage { grid, texts })
}
