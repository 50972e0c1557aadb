//! (De)compression support.

use crate::error::FormatError;
use crate::models::Compression;

use flate2::read::GzDecoder;
use flate2::write::{GzEncoder, ZlibEncoder};
use std::io::{Read, Write};
use zune_inflate::{DeflateDecoder, DeflateOptions};

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

/// Sniff the compression of a document from its leading bytes.
///
/// Returns `None` for uncompressed data.
pub fn detect(data: &[u8]) -> Option<Compression> {
    match data {
        [a, b, ..] if [*a, *b] == GZIP_MAGIC => Some(Compression::Gzip),
        // CMF must declare deflate and the header checksum must hold.
        [cmf, flg, ..] if cmf & 0x0f == 8 && ((u16::from(*cmf) << 8) | u16::from(*flg)) % 31 == 0 => {
            Some(Compression::Zlib)
        }
        _ => None,
    }
}

/// Decompresses some bytes and returns the uncompressed data.
///
/// # Arguments
///
/// * `compression`: Compression algorithm
/// * `data`: Compressed data
pub fn decompress(compression: Compression, data: &[u8]) -> Result<Vec<u8>, FormatError> {
    match compression {
        Compression::Gzip => decompress_flate2_gzip(data),
        Compression::Zlib => decompress_zune_zlib(data),
    }
}

fn decompress_flate2_gzip(data: &[u8]) -> Result<Vec<u8>, FormatError> {
    let mut decoder = GzDecoder::new(data);
    let mut buf = Vec::with_capacity(data.len() * 4);
    decoder.read_to_end(&mut buf)?;
    Ok(buf)
}

fn decompress_zune_zlib(data: &[u8]) -> Result<Vec<u8>, FormatError> {
    let options = DeflateOptions::default().set_size_hint(data.len());
    let mut decoder = DeflateDecoder::new_with_options(data, options);
    Ok(decoder.decode_zlib()?)
}

/// Compresses some bytes with the default level.
pub fn compress(compression: Compression, data: &[u8]) -> Result<Vec<u8>, FormatError> {
    match compression {
        Compression::Gzip => {
            let mut encoder = GzEncoder::new(Vec::new(), flate2::Compression::default());
            encoder.write_all(data)?;
            Ok(encoder.finish()?)
        }
        Compression::Zlib => {
            let mut encoder = ZlibEncoder::new(Vec::new(), flate2::Compression::default());
            encoder.write_all(data)?;
            Ok(encoder.finish()?)
        }
    }
}
