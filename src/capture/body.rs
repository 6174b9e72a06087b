//! Body capture.
//!
//! A message body is a single-read stream. Capturing it means buffering a
//! copy for storage and putting back a body that yields exactly the same
//! bytes to whoever forwards it next.
//!
//! # Design Decisions
//! - Reads stop as soon as the limit is crossed; the unread tail is chained
//!   behind the buffered prefix so nothing is lost or reordered
//! - Decoding (gzip) only ever touches the stored copy, never the forwarded stream
//! - Trailers are not preserved

use std::collections::BTreeMap;
use std::io::Read;

use axum::body::Body;
use axum::http::{header, HeaderMap};
use bytes::{Bytes, BytesMut};
use flate2::read::GzDecoder;
use futures_util::StreamExt;
use http_body_util::BodyExt;

/// Decoded form or query values, keyed and sorted by name.
pub type FormValues = BTreeMap<String, Vec<String>>;

/// Outcome of capturing a body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Captured {
    /// The whole body, within the limit.
    Complete(Bytes),
    /// The body was longer than the limit. Nothing is kept.
    Oversized,
}

/// Errors while reading a body off the wire.
#[derive(Debug, thiserror::Error)]
pub enum CaptureError {
    #[error("failed to read body: {0}")]
    Read(#[from] axum::Error),
}

/// Buffer `body` up to `limit` bytes and restore it for the next reader.
///
/// On a read error the body is left holding whatever was read before the
/// failure; the exchange is broken at that point anyway.
pub async fn capture(body: &mut Body, limit: usize) -> Result<Captured, CaptureError> {
    let mut source = std::mem::take(body);
    let mut chunks: Vec<Bytes> = Vec::new();
    let mut seen = 0usize;

    while let Some(frame) = source.frame().await {
        let frame = match frame {
            Ok(frame) => frame,
            Err(e) => {
                *body = Body::from(concat(&chunks, seen));
                return Err(CaptureError::Read(e));
            }
        };
        let Ok(data) = frame.into_data() else {
            continue;
        };
        if data.is_empty() {
            continue;
        }
        seen += data.len();
        chunks.push(data);

        if seen > limit {
            let prefix = futures_util::stream::iter(chunks.into_iter().map(Ok::<Bytes, axum::Error>));
            *body = Body::from_stream(prefix.chain(source.into_data_stream()));
            return Ok(Captured::Oversized);
        }
    }

    let bytes = concat(&chunks, seen);
    *body = Body::from(bytes.clone());
    Ok(Captured::Complete(bytes))
}

fn concat(chunks: &[Bytes], len: usize) -> Bytes {
    match chunks {
        [] => Bytes::new(),
        [single] => single.clone(),
        _ => {
            let mut buf = BytesMut::with_capacity(len);
            for chunk in chunks {
                buf.extend_from_slice(chunk);
            }
            buf.freeze()
        }
    }
}

/// Declared `Content-Length`, if present and well-formed.
pub fn declared_length(headers: &HeaderMap) -> Option<u64> {
    headers
        .get(header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse().ok())
}

/// True when the message declares a gzip content-encoding.
pub fn is_gzip(headers: &HeaderMap) -> bool {
    headers
        .get(header::CONTENT_ENCODING)
        .and_then(|v| v.to_str().ok())
        .map(|v| {
            let v = v.trim();
            v.eq_ignore_ascii_case("gzip") || v.eq_ignore_ascii_case("x-gzip")
        })
        .unwrap_or(false)
}

/// A body prepared for storage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Decoded {
    pub bytes: Bytes,
    /// Set when decoding failed and the raw bytes were kept instead.
    pub note: Option<String>,
}

/// Decode a captured body for storage according to its content-encoding.
///
/// Returns `None` when the decoded body would be longer than `limit`;
/// decompression stops one byte past the limit.
pub fn decode_for_storage(bytes: Bytes, gzip: bool, limit: usize) -> Option<Decoded> {
    if bytes.len() > limit {
        return None;
    }
    if !gzip || bytes.is_empty() {
        return Some(Decoded { bytes, note: None });
    }

    let read_limit = u64::try_from(limit).unwrap_or(u64::MAX).saturating_add(1);
    let mut out = Vec::with_capacity(bytes.len().saturating_mul(2).min(limit));
    match GzDecoder::new(&bytes[..]).take(read_limit).read_to_end(&mut out) {
        Ok(_) if out.len() > limit => {
            tracing::warn!(len = bytes.len(), limit, "gzip body inflates past the limit, not stored");
            None
        }
        Ok(_) => Some(Decoded {
            bytes: Bytes::from(out),
            note: None,
        }),
        Err(e) => {
            tracing::warn!(error = %e, len = bytes.len(), "gzip decode failed, storing raw body");
            Some(Decoded {
                bytes,
                note: Some(format!("gzip decode failed: {e}")),
            })
        }
    }
}

/// Parse `application/x-www-form-urlencoded` content.
pub fn decode_form(input: &[u8]) -> FormValues {
    let mut values = FormValues::new();
    for (k, v) in url::form_urlencoded::parse(input) {
        values.entry(k.into_owned()).or_default().push(v.into_owned());
    }
    values
}

/// Serialize form values back to `application/x-www-form-urlencoded`.
pub fn encode_form(values: &FormValues) -> String {
    let mut serializer = url::form_urlencoded::Serializer::new(String::new());
    for (k, vs) in values {
        for v in vs {
            serializer.append_pair(k, v);
        }
    }
    serializer.finish()
}

/// True when the content-type announces a urlencoded form.
pub fn is_form(headers: &HeaderMap) -> bool {
    headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.contains("x-www-form-urlencoded"))
        .unwrap_or(false)
}
