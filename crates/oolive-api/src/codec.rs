// ── Frame codec ──
//
// Outbound frames are UTF-8 JSON compressed with bzip2. Peers may answer
// with either a compressed frame or a plain JSON text frame, so decoding
// sniffs the bzip2 stream header before parsing.

use std::io::{self, Read, Write};

use bzip2::Compression;
use bzip2::read::BzDecoder;
use bzip2::write::BzEncoder;
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::error::Error;

/// Magic prefix of every bzip2 stream ("BZh").
const BZIP2_MAGIC: &[u8] = b"BZh";

/// Compress raw bytes into a bzip2 stream.
pub fn compress(data: &[u8]) -> Result<Vec<u8>, Error> {
    let mut encoder = BzEncoder::new(Vec::with_capacity(data.len() / 2), Compression::default());
    encoder.write_all(data)?;
    Ok(encoder.finish()?)
}

/// Largest payload a received frame may decompress to.
pub const MAX_DECODED: usize = 16 * 1024 * 1024;

/// Decompress a bzip2 stream of at most [`MAX_DECODED`] bytes.
pub fn decompress(data: &[u8]) -> Result<Vec<u8>, Error> {
    let limit = u64::try_from(MAX_DECODED + 1).unwrap_or(u64::MAX);
    let mut out = Vec::with_capacity(data.len().saturating_mul(4).min(MAX_DECODED));
    BzDecoder::new(data).take(limit).read_to_end(&mut out)?;
    if out.len() > MAX_DECODED {
        return Err(Error::Codec(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("frame decompresses to more than {MAX_DECODED} bytes"),
        )));
    }
    Ok(out)
}

/// Serialize a message to JSON and compress it into a frame payload.
pub fn encode<T: Serialize + ?Sized>(message: &T) -> Result<Vec<u8>, Error> {
    let json = serde_json::to_vec(message)?;
    compress(&json)
}

/// Decode a received frame: decompress if needed, then parse JSON.
pub fn decode<T: DeserializeOwned>(frame: &[u8]) -> Result<T, Error> {
    if frame.starts_with(BZIP2_MAGIC) {
        let json = decompress(frame)?;
        Ok(serde_json::from_slice(&json)?)
    } else {
        Ok(serde_json::from_slice(frame)?)
    }
}
