//! Request rewrite hook.
//!
//! # Design Decisions
//! - Host matching is case-insensitive and ignores the port
//! - Path matching is a case-sensitive prefix match
//! - Rules are checked in configuration order; first match wins
//! - A returned status other than 200/304 rejects the request

use std::str::FromStr;

use axum::body::Body;
use axum::http::uri::{Authority, PathAndQuery, Scheme};
use axum::http::{header, HeaderValue, Request, StatusCode, Uri};

use crate::config::{RewriteConfig, RewriteRule};
use crate::intercept::context::RequestContext;

/// Rewrites a request in place and reports a status.
pub trait Rewriter: Send + Sync {
    fn rewrite(&self, request: &mut Request<Body>, ctx: &mut RequestContext) -> StatusCode;
}

/// Leaves every request untouched.
#[derive(Debug, Default, Clone, Copy)]
pub struct PassThrough;

impl Rewriter for PassThrough {
    fn rewrite(&self, _request: &mut Request<Body>, _ctx: &mut RequestContext) -> StatusCode {
        StatusCode::OK
    }
}

#[derive(Debug, Clone)]
struct CompiledRule {
    name: String,
    host: Option<String>,
    path_prefix: String,
    upstream: Option<Authority>,
    replace_prefix: Option<String>,
    status: StatusCode,
}

impl CompiledRule {
    fn compile(rule: &RewriteRule) -> Option<Self> {
        let upstream = match &rule.upstream {
            Some(raw) => match Authority::from_str(raw) {
                Ok(a) => Some(a),
                Err(e) => {
                    tracing::error!(rule = %rule.name, upstream = %raw, error = %e, "Invalid upstream, rule ignored");
                    return None;
                }
            },
            None => None,
        };
        let status = match rule.status {
            Some(code) => match StatusCode::from_u16(code) {
                Ok(s) => s,
                Err(_) => {
                    tracing::error!(rule = %rule.name, status = code, "Invalid status, rule ignored");
                    return None;
                }
            },
            None => StatusCode::OK,
        };
        Some(Self {
            name: rule.name.clone(),
            host: rule.host.as_ref().map(|h| strip_port(h).to_lowercase()),
            path_prefix: rule.path_prefix.clone(),
            upstream,
            replace_prefix: rule.replace_prefix.clone(),
            status,
        })
    }

    fn matches(&self, request: &Request<Body>) -> bool {
        if !request.uri().path().starts_with(&self.path_prefix) {
            return false;
        }
        match &self.host {
            None => true,
            Some(expected) => request_host(request)
                .map(|h| strip_port(&h).to_lowercase() == *expected)
                .unwrap_or(false),
        }
    }
}

fn strip_port(host: &str) -> &str {
    if let Some(rest) = host.strip_prefix('[') {
        // IPv6 literal
        return match rest.find(']') {
            Some(end) => &host[..end + 2],
            None => host,
        };
    }
    match host.rsplit_once(':') {
        Some((h, port)) if port.chars().all(|c| c.is_ascii_digit()) => h,
        _ => host,
    }
}

fn request_host(request: &Request<Body>) -> Option<String> {
    request
        .uri()
        .authority()
        .map(|a| a.to_string())
        .or_else(|| {
            request
                .headers()
                .get(header::HOST)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string)
        })
}

/// Config-driven rewriter.
#[derive(Debug, Clone, Default)]
pub struct RuleRewriter {
    rules: Vec<CompiledRule>,
}

impl RuleRewriter {
    pub fn from_config(config: &RewriteConfig) -> Self {
        Self {
            rules: config.rules.iter().filter_map(CompiledRule::compile).collect(),
        }
    }

    fn apply(rule: &CompiledRule, request: &mut Request<Body>) -> Result<(), axum::http::Error> {
        let uri = request.uri().clone();
        let mut parts = uri.clone().into_parts();

        if let Some(replacement) = &rule.replace_prefix {
            let rest = &uri.path()[rule.path_prefix.len()..];
            let mut target = format!("{replacement}{rest}");
            if !target.starts_with('/') {
                target.insert(0, '/');
            }
            if let Some(query) = uri.query() {
                target.push('?');
                target.push_str(query);
            }
            parts.path_and_query = Some(PathAndQuery::from_str(&target)?);
        }

        if let Some(upstream) = &rule.upstream {
            if parts.scheme.is_none() {
                parts.scheme = Some(Scheme::HTTP);
            }
            parts.authority = Some(upstream.clone());
            let host = HeaderValue::from_str(upstream.as_str())?;
            request.headers_mut().insert(header::HOST, host);
        }

        *request.uri_mut() = Uri::from_parts(parts)?;
        Ok(())
    }
}

impl Rewriter for RuleRewriter {
    fn rewrite(&self, request: &mut Request<Body>, ctx: &mut RequestContext) -> StatusCode {
        let Some(rule) = self.rules.iter().find(|r| r.matches(request)) else {
            return StatusCode::OK;
        };
        ctx.note("rewrite_rule", &rule.name);

        if rule.status != StatusCode::OK && rule.status != StatusCode::NOT_MODIFIED {
            return rule.status;
        }

        if let Err(e) = Self::apply(rule, request) {
            tracing::warn!(rule = %rule.name, error = %e, "Rewrite failed");
            return StatusCode::BAD_GATEWAY;
        }
        rule.status
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rule(name: &str, prefix: &str) -> RewriteRule {
        RewriteRule {
            name: name.into(),
            path_prefix: prefix.into(),
            host: None,
            upstream: None,
            replace_prefix: None,
            status: None,
        }
    }

    fn get(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    #[test]
    fn test_reroute_with_prefix_replacement() {
        let mut r = rule("napi", "/napi");
        r.upstream = Some("backend.internal:8080".into());
        r.replace_prefix = Some("/rds/napi".into());
        let rewriter = RuleRewriter::from_config(&RewriteConfig { rules: vec![r] });

        let mut req = get("http://example.com/napi/foo?x=1");
        let mut ctx = RequestContext::default();
        assert_eq!(rewriter.rewrite(&mut req, &mut ctx), StatusCode::OK);
        assert_eq!(req.uri().to_string(), "http://backend.internal:8080/rds/napi/foo?x=1");
        assert_eq!(req.headers()[header::HOST], "backend.internal:8080");
        assert_eq!(ctx.log_data["rewrite_rule"], "napi");
    }

    #[test]
    fn test_block_with_status() {
        let mut r = rule("deny", "/admin");
        r.status = Some(403);
        let rewriter = RuleRewriter::from_config(&RewriteConfig { rules: vec![r] });

        let mut req = get("http://example.com/admin/panel");
        let before = req.uri().clone();
        assert_eq!(rewriter.rewrite(&mut req, &mut RequestContext::default()), StatusCode::FORBIDDEN);
        assert_eq!(*req.uri(), before);
    }

    #[test]
    fn test_host_condition() {
        let mut r = rule("only-a", "/");
        r.host = Some("A.example.com".into());
        r.status = Some(451);
        let rewriter = RuleRewriter::from_config(&RewriteConfig { rules: vec![r] });

        let mut ctx = RequestContext::default();
        assert_eq!(rewriter.rewrite(&mut get("http://a.example.com:8080/x"), &mut ctx), StatusCode::UNAVAILABLE_FOR_LEGAL_REASONS);
        assert_eq!(rewriter.rewrite(&mut get("http://b.example.com/x"), &mut ctx), StatusCode::OK);
    }

    #[test]
    fn test_first_match_wins_and_no_match_passes() {
        let mut first = rule("first", "/api");
        first.status = Some(418);
        let mut second = rule("second", "/api/v2");
        second.status = Some(403);
        let rewriter = RuleRewriter::from_config(&RewriteConfig { rules: vec![first, second] });

        let mut ctx = RequestContext::default();
        assert_eq!(rewriter.rewrite(&mut get("http://h/api/v2/x"), &mut ctx), StatusCode::IM_A_TEAPOT);
        assert_eq!(rewriter.rewrite(&mut get("http://h/other"), &mut ctx), StatusCode::OK);
    }

    #[test]
    fn test_strip_port() {
        assert_eq!(strip_port("example.com:80"), "example.com");
        assert_eq!(strip_port("example.com"), "example.com");
        assert_eq!(strip_port("[::1]:8080"), "[::1]");
    }
}
