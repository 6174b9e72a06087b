//! Capture records and the builders that assemble them.
//!
//! Key names are part of the persisted format. Renaming one requires a bump
//! of [`FORMAT_VERSION`].

use std::collections::BTreeMap;

use axum::http::{header, request, response, HeaderMap};
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use serde::{Deserialize, Serialize};

use crate::capture::body::{decode_form, declared_length, FormValues};
use crate::capture::dump::{dump_request, dump_response_head, BodySnapshot};
use crate::intercept::context::RequestContext;

/// Version of the persisted record layout.
pub const FORMAT_VERSION: u32 = 1;

/// Stored in place of a body that was not captured.
pub const SKIP_SENTINEL: &[u8] = b"pproxy skip";

/// Stored in place of a dump that could not be rendered.
pub const DUMP_PLACEHOLDER: &[u8] = b"dump failed";

/// Header name to all of its values, in arrival order.
pub type HeaderValues = BTreeMap<String, Vec<String>>;

/// One cookie sent by the client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cookie {
    pub name: String,
    pub value: String,
}

/// Snapshot of a proxied request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestRecord {
    #[serde(default = "format_version")]
    pub format: u32,
    pub host: String,
    pub schema: String,
    pub url: String,
    pub url_origin: String,
    pub path: String,
    pub header: HeaderValues,
    pub cookies: Vec<Cookie>,
    /// Unix seconds.
    pub now: u64,
    pub session_id: i64,
    pub user: String,
    pub client_ip: String,
    pub method: String,
    pub form_get: FormValues,
    pub replay: bool,
    pub msg: String,
    /// Base64 of the full wire rendering, body included.
    pub dump: String,
    pub form_post: FormValues,
    /// Diagnostic annotations only.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub extra: BTreeMap<String, String>,
}

/// Snapshot of an upstream (or synthesized) response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResponseRecord {
    #[serde(default = "format_version")]
    pub format: u32,
    pub session_id: i64,
    pub now: u64,
    pub header: HeaderValues,
    pub status: u16,
    /// Declared length, -1 when unknown.
    pub content_length: i64,
    /// Base64 of the head-only rendering.
    pub dump: String,
    /// Base64 of the stored body, or of [`SKIP_SENTINEL`].
    pub body: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub extra: BTreeMap<String, String>,
}

fn format_version() -> u32 {
    FORMAT_VERSION
}

/// Any persisted record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum CaptureRecord {
    Request(RequestRecord),
    Response(ResponseRecord),
}

impl CaptureRecord {
    pub fn kind(&self) -> &'static str {
        match self {
            CaptureRecord::Request(_) => "request",
            CaptureRecord::Response(_) => "response",
        }
    }
}

impl ResponseRecord {
    /// True when the body was replaced by the skip sentinel.
    pub fn body_skipped(&self) -> bool {
        STANDARD
            .decode(&self.body)
            .map(|b| b == SKIP_SENTINEL)
            .unwrap_or(false)
    }
}

/// Host of a request: the `Host` header, else the URI authority.
pub fn request_host(parts: &request::Parts) -> String {
    parts
        .headers
        .get(header::HOST)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
        .or_else(|| parts.uri.authority().map(|a| a.to_string()))
        .unwrap_or_default()
}

/// Absolute URL of a request, reconstructing scheme and host for origin-form targets.
pub fn absolute_url(parts: &request::Parts) -> String {
    if parts.uri.scheme().is_some() {
        return parts.uri.to_string();
    }
    let target = parts
        .uri
        .path_and_query()
        .map(|pq| pq.as_str())
        .unwrap_or("/");
    format!("http://{}{}", request_host(parts), target)
}

/// Collect a header map into a multimap with lossy UTF-8 values.
pub fn header_values(headers: &HeaderMap) -> HeaderValues {
    let mut out = HeaderValues::new();
    for (name, value) in headers {
        out.entry(name.as_str().to_string())
            .or_default()
            .push(String::from_utf8_lossy(value.as_bytes()).into_owned());
    }
    out
}

fn cookies(headers: &HeaderMap) -> Vec<Cookie> {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(';'))
        .filter_map(|pair| {
            let (name, value) = pair.trim().split_once('=')?;
            let name = name.trim();
            if name.is_empty() {
                return None;
            }
            Some(Cookie {
                name: name.to_string(),
                value: value.trim().trim_matches('"').to_string(),
            })
        })
        .collect()
}

/// Build the record for a request as it is about to be forwarded (or rejected).
pub fn build_request_record(
    parts: &request::Parts,
    body: &BodySnapshot,
    ctx: &RequestContext,
    now: u64,
) -> RequestRecord {
    let mut extra = BTreeMap::new();
    let dump = match dump_request(parts, body) {
        Ok(raw) => raw,
        Err(e) => {
            tracing::warn!(docid = %ctx.document_id, error = %e, "Request dump failed");
            extra.insert("dump".to_string(), e.to_string());
            DUMP_PLACEHOLDER.to_vec()
        }
    };
    if *body == BodySnapshot::Skipped {
        extra.insert("body".to_string(), "skipped: body over limit".to_string());
    }

    RequestRecord {
        format: FORMAT_VERSION,
        host: request_host(parts),
        schema: parts.uri.scheme_str().unwrap_or("http").to_string(),
        url: absolute_url(parts),
        url_origin: ctx.origin_url.clone(),
        path: parts.uri.path().to_string(),
        header: header_values(&parts.headers),
        cookies: cookies(&parts.headers),
        now,
        session_id: ctx.session_id,
        user: ctx.user.name().to_string(),
        client_ip: ctx.remote_addr.clone(),
        method: parts.method.to_string(),
        form_get: parts
            .uri
            .query()
            .map(|q| decode_form(q.as_bytes()))
            .unwrap_or_default(),
        replay: ctx.is_replay,
        msg: ctx.message.clone(),
        dump: STANDARD.encode(dump),
        form_post: ctx.form_post.clone(),
        extra,
    }
}

/// Build the record for a response. `body` is the storage form (already decoded).
pub fn build_response_record(
    parts: &response::Parts,
    body: &BodySnapshot,
    ctx: &RequestContext,
    now: u64,
) -> ResponseRecord {
    let mut extra = BTreeMap::new();
    let dump = match dump_response_head(parts) {
        Ok(raw) => raw,
        Err(e) => {
            tracing::warn!(docid = %ctx.document_id, error = %e, "Response dump failed");
            extra.insert("dump".to_string(), e.to_string());
            DUMP_PLACEHOLDER.to_vec()
        }
    };

    let stored: &[u8] = match body {
        BodySnapshot::Bytes(bytes) => bytes,
        BodySnapshot::Skipped => SKIP_SENTINEL,
        BodySnapshot::Failed(reason) => {
            extra.insert("body".to_string(), reason.clone());
            SKIP_SENTINEL
        }
    };

    ResponseRecord {
        format: FORMAT_VERSION,
        session_id: ctx.session_id,
        now,
        header: header_values(&parts.headers),
        status: parts.status.as_u16(),
        content_length: declared_length(&parts.headers)
            .and_then(|n| i64::try_from(n).ok())
            .unwrap_or(-1),
        dump: STANDARD.encode(dump),
        body: STANDARD.encode(stored),
        extra,
    }
}
