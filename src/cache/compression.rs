//! Codecs for compressed on-disk cache bodies (§3 `CacheEntry.compression`).

use std::io::{Read, Write};

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression as GzLevel;

use crate::config::Compression;
use crate::error::{ProxyError, ProxyResult};

pub fn compress(codec: Compression, body: &[u8]) -> ProxyResult<Vec<u8>> {
    match codec {
        Compression::None => Ok(body.to_vec()),
        Compression::Gzip => {
            let mut enc = GzEncoder::new(Vec::new(), GzLevel::default());
            enc.write_all(body)
                .map_err(|e| ProxyError::Internal(format!("gzip compress: {e}")))?;
            enc.finish()
                .map_err(|e| ProxyError::Internal(format!("gzip finish: {e}")))
        }
        Compression::Brotli => {
            let mut out = Vec::new();
            let mut reader = body;
            brotli::BrotliCompress(&mut reader, &mut out, &brotli::enc::BrotliEncoderParams::default())
                .map_err(|e| ProxyError::Internal(format!("brotli compress: {e}")))?;
            Ok(out)
        }
    }
}

pub fn decompress(codec: Compression, body: &[u8]) -> ProxyResult<Vec<u8>> {
    match codec {
        Compression::None => Ok(body.to_vec()),
        Compression::Gzip => {
            let mut dec = GzDecoder::new(body);
            let mut out = Vec::new();
            dec.read_to_end(&mut out)
                .map_err(|e| ProxyError::Internal(format!("gzip decompress: {e}")))?;
            Ok(out)
        }
        Compression::Brotli => {
            let mut out = Vec::new();
            let mut reader = body;
            brotli::BrotliDecompress(&mut reader, &mut out)
                .map_err(|e| ProxyError::Internal(format!("brotli decompress: {e}")))?;
            Ok(out)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gzip_round_trips() {
        let body = b"the quick brown fox jumps over the lazy dog".repeat(8);
        let compressed = compress(Compression::Gzip, &body).unwrap();
        assert_ne!(compressed, body);
        let restored = decompress(Compression::Gzip, &compressed).unwrap();
        assert_eq!(restored, body);
    }

    #[test]
    fn brotli_round_trips() {
        let body = b"abcdefghijklmnopqrstuvwxyz".repeat(16);
        let compressed = compress(Compression::Brotli, &body).unwrap();
        let restored = decompress(Compression::Brotli, &compressed).unwrap();
        assert_eq!(restored, body);
    }

    #[test]
    fn none_is_identity() {
        let body = b"raw bytes".to_vec();
        let compressed = compress(Compression::None, &body).unwrap();
        assert_eq!(compressed, body);
        assert_eq!(decompress(Compression::None, &compressed).unwrap(), body);
    }
}
