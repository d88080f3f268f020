use std::io::{self, Read, Take};

use flate2::read::GzDecoder;

use crate::api::ProxyError;

/// Wraps `reader` in a streaming decoder for the given `Content-Encoding`.
///
/// Only `gzip` and `zstd` are decoded; every other token, including an
/// empty one, hands the reader back unchanged. Nothing is read up front:
/// decoding happens as the caller pulls bytes, so framing errors in the
/// compressed stream show up as I/O errors on read. So does producing more
/// than `limit` bytes.
pub fn decode<'a, R>(
    reader: R,
    encoding: &str,
    limit: u64,
) -> Result<Box<dyn Read + 'a>, ProxyError>
where
    R: Read + 'a,
{
    let decoded: Box<dyn Read + 'a> = match encoding.trim().to_ascii_lowercase().as_str() {
        "gzip" => Box::new(GzDecoder::new(reader)),
        "zstd" => {
            let decoder = zstd::stream::read::Decoder::new(reader).map_err(|e| {
                tracing::error!("failed to set up zstd decoder: {}", e);
                ProxyError::Decode(String::from("invalid zstd data"))
            })?;
            Box::new(decoder)
        }
        _ => Box::new(reader),
    };

    Ok(Box::new(Bounded::new(decoded, limit)))
}

/// Fails reads once more than `limit` bytes have come out of `inner`.
struct Bounded<R> {
    inner: Take<R>,
    limit: u64,
    read: u64,
}

impl<R: Read> Bounded<R> {
    fn new(inner: R, limit: u64) -> Self {
        Bounded {
            inner: inner.take(limit.saturating_add(1)),
            limit,
            read: 0,
        }
    }
}

impl<R: Read> Read for Bounded<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.inner.read(buf)?;
        self.read += n as u64;
        if self.read > self.limit {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("decoded body exceeds {} bytes", self.limit),
            ));
        }
        Ok(n)
    }
}

#[cfg(test)]
mod tests {
    use std::io::{Read, Write};

    use bytes::{Buf, Bytes};
    use flate2::write::GzEncoder;
    use flate2::Compression;

    use super::decode;

    const PAYLOAD: &[u8] = br#"{"service":"api","duration_ms":12}"#;
    const LIMIT: u64 = 1024;

    fn read_all(encoding: &str, body: Bytes) -> std::io::Result<Vec<u8>> {
        let mut out = Vec::new();
        decode(body.reader(), encoding, LIMIT)
            .expect("decoder")
            .read_to_end(&mut out)?;
        Ok(out)
    }

    fn gzip(data: &[u8]) -> Vec<u8> {
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(data).unwrap();
        encoder.finish().unwrap()
    }

    #[test]
    fn identity_passes_through() {
        for encoding in ["", "identity", "br", "deflate"] {
            let out = read_all(encoding, Bytes::from_static(PAYLOAD)).unwrap();
            assert_eq!(out, PAYLOAD, "encoding {encoding:?}");
        }
    }

    #[test]
    fn gzip_and_zstd_decode_to_the_same_bytes() {
        let gz = read_all("gzip", Bytes::from(gzip(PAYLOAD))).unwrap();
        let zs = read_all("zstd", Bytes::from(zstd::encode_all(PAYLOAD, 0).unwrap())).unwrap();

        assert_eq!(gz, PAYLOAD);
        assert_eq!(zs, PAYLOAD);
    }

    #[test]
    fn encoding_token_is_normalized() {
        let out = read_all(" GZIP ", Bytes::from(gzip(PAYLOAD))).unwrap();
        assert_eq!(out, PAYLOAD);
    }

    #[test]
    fn malformed_gzip_fails_on_read() {
        assert!(read_all("gzip", Bytes::from_static(b"definitely not gzip")).is_err());
    }

    #[test]
    fn malformed_zstd_fails_on_read() {
        assert!(read_all("zstd", Bytes::from_static(b"definitely not zstd")).is_err());
    }

    #[test]
    fn output_is_capped() {
        let inflated = vec![b' '; 4096];
        let err = read_all("gzip", Bytes::from(gzip(&inflated))).unwrap_err();
        assert_eq!(err.kind(), std::io::ErrorKind::InvalidData);
        assert!(err.to_string().contains("exceeds 1024 bytes"));

        let exact = vec![b' '; 1024];
        assert_eq!(read_all("", Bytes::from(exact.clone())).unwrap(), exact);
    }
}
