use std::io::{Read, Write};

use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;

pub const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

pub fn is_gzip(bytes: &[u8]) -> bool {
    bytes.starts_with(&GZIP_MAGIC)
}

pub fn gunzip(bytes: &[u8]) -> std::io::Result<Vec<u8>> {
    let mut decoder = GzDecoder::new(bytes);
    let mut out = Vec::new();
    decoder.read_to_end(&mut out)?;
    Ok(out)
}

/// Decompress when the magic bytes say so, otherwise hand the input back.
pub fn maybe_gunzip(bytes: Vec<u8>) -> std::io::Result<Vec<u8>> {
    if is_gzip(&bytes) { gunzip(&bytes) } else { Ok(bytes) }
}

pub fn gzip(bytes: &[u8]) -> std::io::Result<Vec<u8>> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(bytes)?;
    encoder.finish()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_and_inflates_gzip() {
        let packed = gzip(b"engine image").unwrap();
        assert!(is_gzip(&packed));
        assert_eq!(maybe_gunzip(packed).unwrap(), b"engine image");
    }

    #[test]
    fn raw_bytes_pass_through() {
        let raw = b"\x00asm\x01\x00\x00\x00".to_vec();
        assert!(!is_gzip(&raw));
        assert_eq!(maybe_gunzip(raw.clone()).unwrap(), raw);
    }

    #[test]
    fn corrupt_gzip_is_an_error() {
        assert!(gunzip(&[0x1f, 0x8b, 0x08, 0x00, 0x01]).is_err());
    }
}
