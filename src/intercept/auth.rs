//! Proxy authentication.

use std::collections::HashMap;

use axum::body::Body;
use axum::http::{header, HeaderMap, HeaderValue, Response, StatusCode};
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;

use crate::config::AuthConfig;
use crate::intercept::context::Identity;

/// Decides who a request comes from.
pub trait Authenticator: Send + Sync {
    /// `None` rejects the request.
    fn check(&self, headers: &HeaderMap) -> Option<Identity>;

    /// Realm announced in the challenge.
    fn realm(&self) -> &str;
}

/// Basic credentials checked against the configured users.
///
/// Looks at `Proxy-Authorization` first, then `Authorization` (observers
/// connect directly, not through the proxy). With no users configured every
/// request passes as anonymous.
pub struct BasicAuthenticator {
    realm: String,
    users: HashMap<String, String>,
}

impl BasicAuthenticator {
    pub fn from_config(config: &AuthConfig) -> Self {
        Self {
            realm: config.realm.clone(),
            users: config
                .users
                .iter()
                .map(|u| (u.name.clone(), u.password.clone()))
                .collect(),
        }
    }

    fn credentials(headers: &HeaderMap) -> Option<(String, String)> {
        let value = headers
            .get(header::PROXY_AUTHORIZATION)
            .or_else(|| headers.get(header::AUTHORIZATION))?
            .to_str()
            .ok()?;
        let (scheme, encoded) = value.trim().split_once(' ')?;
        if !scheme.eq_ignore_ascii_case("basic") {
            return None;
        }
        let decoded = STANDARD.decode(encoded.trim()).ok()?;
        let decoded = String::from_utf8(decoded).ok()?;
        let (name, password) = decoded.split_once(':')?;
        Some((name.to_string(), password.to_string()))
    }
}

impl Authenticator for BasicAuthenticator {
    fn check(&self, headers: &HeaderMap) -> Option<Identity> {
        if self.users.is_empty() {
            return Some(Identity::Anonymous);
        }
        let (name, password) = Self::credentials(headers)?;
        match self.users.get(&name) {
            Some(expected) if *expected == password => Some(Identity::User(name)),
            _ => None,
        }
    }

    fn realm(&self) -> &str {
        &self.realm
    }
}

/// `407 Proxy Authentication Required` with a Basic challenge.
pub fn proxy_auth_required(realm: &str) -> Response<Body> {
    let challenge = HeaderValue::from_str(&format!("Basic realm=\"{realm}\""))
        .unwrap_or_else(|_| HeaderValue::from_static("Basic"));
    let mut response = Response::new(Body::from("Proxy authentication required"));
    *response.status_mut() = StatusCode::PROXY_AUTHENTICATION_REQUIRED;
    response.headers_mut().insert(header::PROXY_AUTHENTICATE, challenge);
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::UserConfig;

    fn auth() -> BasicAuthenticator {
        BasicAuthenticator::from_config(&AuthConfig {
            realm: "test".into(),
            users: vec![UserConfig { name: "alice".into(), password: "s3cret".into() }],
        })
    }

    fn basic(name: &'static str, value: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        let encoded = STANDARD.encode(value);
        headers.insert(name, format!("Basic {encoded}").parse().unwrap());
        headers
    }

    #[test]
    fn test_valid_proxy_credentials() {
        let id = auth().check(&basic("proxy-authorization", "alice:s3cret"));
        assert_eq!(id, Some(Identity::User("alice".into())));
    }

    #[test]
    fn test_authorization_header_fallback() {
        let id = auth().check(&basic("authorization", "alice:s3cret"));
        assert_eq!(id, Some(Identity::User("alice".into())));
    }

    #[test]
    fn test_rejections() {
        let auth = auth();
        assert_eq!(auth.check(&HeaderMap::new()), None);
        assert_eq!(auth.check(&basic("proxy-authorization", "alice:wrong")), None);
        assert_eq!(auth.check(&basic("proxy-authorization", "bob:s3cret")), None);
        assert_eq!(auth.check(&basic("proxy-authorization", "no-colon")), None);
    }

    #[test]
    fn test_open_proxy() {
        let open = BasicAuthenticator::from_config(&AuthConfig::default());
        assert_eq!(open.check(&HeaderMap::new()), Some(Identity::Anonymous));
    }

    #[test]
    fn test_challenge() {
        let response = proxy_auth_required("test");
        assert_eq!(response.status(), StatusCode::PROXY_AUTHENTICATION_REQUIRED);
        assert_eq!(response.headers()[header::PROXY_AUTHENTICATE], "Basic realm=\"test\"");
    }
}
