//! Per-exchange request context.

use std::collections::BTreeMap;

use crate::capture::body::FormValues;
use crate::capture::DocumentId;

/// Name recorded for unauthenticated traffic.
pub const ANONYMOUS: &str = "guest";

/// Who sent a request.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Identity {
    #[default]
    Anonymous,
    User(String),
}

impl Identity {
    pub fn name(&self) -> &str {
        match self {
            Identity::Anonymous => ANONYMOUS,
            Identity::User(name) => name,
        }
    }
}

/// State carried through one exchange.
///
/// `document_id == DocumentId::NONE` means neither the request nor the
/// response of this exchange is persisted.
#[derive(Debug, Clone, Default)]
pub struct RequestContext {
    pub document_id: DocumentId,
    pub session_id: i64,
    pub user: Identity,
    pub remote_addr: String,
    /// URL as received, before any rewrite.
    pub origin_url: String,
    pub form_post: FormValues,
    pub has_broadcast: bool,
    pub is_replay: bool,
    /// Free-text annotation, e.g. "rewrite".
    pub message: String,
    /// Diagnostics, logged once when the request phase ends.
    pub log_data: BTreeMap<String, String>,
}

impl RequestContext {
    pub fn new(session_id: i64, remote_addr: String) -> Self {
        Self {
            session_id,
            remote_addr,
            ..Self::default()
        }
    }

    /// Add a diagnostic entry.
    pub fn note(&mut self, key: &str, value: impl ToString) {
        self.log_data.insert(key.to_string(), value.to_string());
    }

    /// Emit the collected diagnostics as one log line.
    pub fn emit_log(&self) {
        tracing::info!(
            session = self.session_id,
            docid = %self.document_id,
            user = %self.user.name(),
            client = %self.remote_addr,
            url = %self.origin_url,
            broadcast = self.has_broadcast,
            data = ?self.log_data,
            "request"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_context_is_untracked() {
        let ctx = RequestContext::new(7, "127.0.0.1:1".into());
        assert!(!ctx.document_id.is_tracked());
        assert_eq!(ctx.user.name(), ANONYMOUS);
        assert!(ctx.form_post.is_empty());
    }

    #[test]
    fn test_notes() {
        let mut ctx = RequestContext::default();
        ctx.note("js_rewrite_code", 200);
        assert_eq!(ctx.log_data["js_rewrite_code"], "200");
    }
}
