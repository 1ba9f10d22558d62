//! Response decompression for the hyper transport.

use async_compression::tokio::bufread::{BrotliDecoder, GzipDecoder, ZstdDecoder};
use bytes::Bytes;
use futures_util::TryStreamExt;
use http_body_util::BodyStream;
use hyper::body::Incoming;
use hyper::{HeaderMap, header, http};
use tokio::io::{AsyncBufRead, AsyncReadExt, BufReader};
use tokio_util::io::StreamReader;

use crate::common::transport::TransportError;

/// Supported `Content-Encoding` values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentEncoding {
    Identity,
    Br,
    Gzip,
    Zstd,
}

impl ContentEncoding {
    pub fn as_str(self) -> &'static str {
        match self {
            ContentEncoding::Identity => "identity",
            ContentEncoding::Br => "br",
            ContentEncoding::Gzip => "gzip",
            ContentEncoding::Zstd => "zstd",
        }
    }
}

/// Map the response `Content-Encoding` header to a [`ContentEncoding`].
///
/// Unknown or missing encodings fall back to `Identity`.
pub fn detect_encoding(headers: &HeaderMap) -> ContentEncoding {
    if let Some(val) = headers.get(header::CONTENT_ENCODING)
        && let Ok(s) = val.to_str()
    {
        let enc = s
            .split(',')
            .next()
            .map(|t| t.trim().to_ascii_lowercase())
            .unwrap_or_default();
        return match enc.as_str() {
            "br" => ContentEncoding::Br,
            "gzip" => ContentEncoding::Gzip,
            "zstd" | "zst" => ContentEncoding::Zstd,
            _ => ContentEncoding::Identity,
        };
    }
    ContentEncoding::Identity
}

/// Insert an `Accept-Encoding: br, zstd, gzip` header if not already present.
pub fn add_accept_encoding(h: &mut HeaderMap) {
    if !h.contains_key(http::header::ACCEPT_ENCODING) {
        h.insert(
            http::header::ACCEPT_ENCODING,
            http::HeaderValue::from_static("br, zstd, gzip"),
        );
    }
}

/// Stream-read a response body, decompressing on the fly, enforcing `limit`
/// on the *decompressed* size so a small compressed bomb cannot exhaust
/// memory.
pub async fn read_body_decompressed(
    body: Incoming,
    encoding: ContentEncoding,
    limit: usize,
) -> Result<Bytes, TransportError> {
    let stream = BodyStream::new(body)
        .map_ok(|frame| frame.into_data().unwrap_or_default())
        .map_err(std::io::Error::other);
    let reader = BufReader::new(StreamReader::new(stream));

    let mut reader: Box<dyn AsyncBufRead + Unpin + Send> = match encoding {
        ContentEncoding::Identity => Box::new(reader),
        ContentEncoding::Br => Box::new(BufReader::new(BrotliDecoder::new(reader))),
        ContentEncoding::Gzip => Box::new(BufReader::new(GzipDecoder::new(reader))),
        ContentEncoding::Zstd => Box::new(BufReader::new(ZstdDecoder::new(reader))),
    };

    let mut out = Vec::with_capacity(32 * 1024);
    let mut chunk = [0u8; 16 * 1024];
    loop {
        let n = reader
            .read(&mut chunk)
            .await
            .map_err(|e| TransportError::Network(format!("body read failed: {e}")))?;
        if n == 0 {
            break;
        }
        if out.len() + n > limit {
            return Err(TransportError::TooLarge { limit });
        }
        out.extend_from_slice(&chunk[..n]);
    }

    Ok(Bytes::from(out))
}
