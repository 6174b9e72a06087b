//! Raw wire-level renderings of captured messages.
//!
//! Requests are rendered with their body, responses head-only.

use std::io::Write;

use axum::http::{request, response, HeaderMap, Version};

/// What is known about a body at dump time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BodySnapshot {
    /// Fully captured bytes (as they travel on the wire).
    Bytes(bytes::Bytes),
    /// Not captured because it exceeded the limit.
    Skipped,
    /// Capture failed with the given reason.
    Failed(String),
}

#[derive(Debug, thiserror::Error)]
pub enum DumpError {
    #[error("body unavailable: {0}")]
    BodyUnavailable(String),
    #[error("write failed: {0}")]
    Io(#[from] std::io::Error),
}

fn version_str(version: Version) -> &'static str {
    match version {
        Version::HTTP_09 => "HTTP/0.9",
        Version::HTTP_10 => "HTTP/1.0",
        Version::HTTP_2 => "HTTP/2.0",
        Version::HTTP_3 => "HTTP/3.0",
        _ => "HTTP/1.1",
    }
}

fn write_headers(out: &mut Vec<u8>, headers: &HeaderMap) -> std::io::Result<()> {
    for (name, value) in headers {
        out.write_all(name.as_str().as_bytes())?;
        out.write_all(b": ")?;
        out.write_all(value.as_bytes())?;
        out.write_all(b"\r\n")?;
    }
    out.write_all(b"\r\n")
}

/// Render a request line, its headers and (when captured) its body.
///
/// A skipped body renders head-only; a failed body is an error.
pub fn dump_request(parts: &request::Parts, body: &BodySnapshot) -> Result<Vec<u8>, DumpError> {
    let mut out = Vec::new();
    let target = parts
        .uri
        .path_and_query()
        .map(|pq| pq.as_str())
        .unwrap_or("/");
    write!(out, "{} {} {}\r\n", parts.method, target, version_str(parts.version))?;

    if !parts.headers.contains_key(axum::http::header::HOST) {
        if let Some(authority) = parts.uri.authority() {
            write!(out, "host: {}\r\n", authority)?;
        }
    }
    write_headers(&mut out, &parts.headers)?;

    match body {
        BodySnapshot::Bytes(bytes) => out.write_all(bytes)?,
        BodySnapshot::Skipped => {}
        BodySnapshot::Failed(reason) => return Err(DumpError::BodyUnavailable(reason.clone())),
    }
    Ok(out)
}

/// Render a status line and headers.
pub fn dump_response_head(parts: &response::Parts) -> Result<Vec<u8>, DumpError> {
    let mut out = Vec::new();
    write!(
        out,
        "{} {} {}\r\n",
        version_str(parts.version),
        parts.status.as_u16(),
        parts.status.canonical_reason().unwrap_or("")
    )?;
    write_headers(&mut out, &parts.headers)?;
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::{Request, Response, StatusCode};

    #[test]
    fn test_request_dump_includes_body() {
        let (parts, _) = Request::builder()
            .method("POST")
            .uri("http://example.com/form?x=1")
            .header("content-type", "application/x-www-form-urlencoded")
            .body(())
            .unwrap()
            .into_parts();

        let dump = dump_request(&parts, &BodySnapshot::Bytes("a=1".into())).unwrap();
        let text = String::from_utf8(dump).unwrap();
        assert!(text.starts_with("POST /form?x=1 HTTP/1.1\r\n"));
        assert!(text.contains("host: example.com\r\n"));
        assert!(text.ends_with("\r\n\r\na=1"));
    }

    #[test]
    fn test_failed_body_is_an_error() {
        let (parts, _) = Request::builder().uri("/").body(()).unwrap().into_parts();
        assert!(dump_request(&parts, &BodySnapshot::Failed("reset".into())).is_err());
        assert!(dump_request(&parts, &BodySnapshot::Skipped).is_ok());
    }

    #[test]
    fn test_response_head() {
        let (parts, _) = Response::builder()
            .status(StatusCode::NOT_FOUND)
            .header("x-a", "b")
            .body(())
            .unwrap()
            .into_parts();
        let text = String::from_utf8(dump_response_head(&parts).unwrap()).unwrap();
        assert_eq!(text, "HTTP/1.1 404 Not Found\r\nx-a: b\r\n\r\n");
    }
}
