use std::io::Read;

use flate2::read::{DeflateDecoder, GzDecoder, ZlibDecoder};

use crate::error::InstallError;

/// Wraps a raw pack stream in the decoder named by the installer manifest.
pub fn pack_decoder<'a>(
    encoding: Option<&str>,
    raw: Box<dyn Read + Send + 'a>,
) -> Result<Box<dyn Read + Send + 'a>, InstallError> {
    match encoding.map(str::to_ascii_lowercase).as_deref() {
        None | Some("") | Some("none") => Ok(raw),
        Some("gzip") | Some("gz") => Ok(Box::new(GzDecoder::new(raw))),
        Some("deflate") => Ok(Box::new(DeflateDecoder::new(raw))),
        Some("zlib") => Ok(Box::new(ZlibDecoder::new(raw))),
        Some(other) => Err(InstallError::Decoder(other.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::read::GzEncoder;
    use flate2::Compression;

    fn gzip(data: &[u8]) -> Vec<u8> {
        let mut encoder = GzEncoder::new(data, Compression::new(6));
        let mut compressed = Vec::new();
        encoder.read_to_end(&mut compressed).unwrap();
        compressed
    }

    #[test]
    fn test_gzip_decoder() {
        let original = b"pack stream bytes, pack stream bytes";
        let compressed = gzip(original);
        let mut decoder =
            pack_decoder(Some("gzip"), Box::new(std::io::Cursor::new(compressed))).unwrap();
        let mut out = Vec::new();
        decoder.read_to_end(&mut out).unwrap();
        assert_eq!(out, original);
    }

    #[test]
    fn test_identity_decoder() {
        let mut decoder = pack_decoder(None, Box::new(&b"raw"[..])).unwrap();
        let mut out = Vec::new();
        decoder.read_to_end(&mut out).unwrap();
        assert_eq!(out, b"raw");
    }

    #[test]
    fn test_unknown_decoder() {
        let result = pack_decoder(Some("pack200"), Box::new(&b""[..]));
        assert!(matches!(result, Err(InstallError::Decoder(name)) if name == "pack200"));
    }
}
