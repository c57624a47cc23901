use anyhow::Context;
use async_trait::async_trait;
use regex::Regex;
use tracing::debug;

use crate::handlers::{Handler, Interrupt, decode_uri};
use crate::http::{Request, Response};

/// Pattern anchored at the start of the request target, plus a replacement
/// that may reference capture groups (`$1`, `${name}`).
#[derive(Debug, Clone)]
pub struct RewriteRule {
    regex: Regex,
    replacement: String,
}

impl RewriteRule {
    pub fn new(pattern: &str, replacement: &str) -> anyhow::Result<Self> {
        let regex =
            Regex::new(pattern).with_context(|| format!("invalid rewrite pattern: {pattern}"))?;
        Ok(Self {
            regex,
            replacement: replacement.to_string(),
        })
    }

    /// The rewritten target, or `None` when the rule does not match at the
    /// beginning of `uri`.
    pub fn apply(&self, uri: &str) -> Option<String> {
        let captures = self.regex.captures(uri)?;
        if captures.get(0)?.start() != 0 {
            return None;
        }
        let mut out = String::new();
        captures.expand(&self.replacement, &mut out);
        Some(out)
    }
}

/// Replaces the request target using the first matching rule.
pub struct RewriteHandler {
    rules: Vec<RewriteRule>,
}

impl RewriteHandler {
    pub fn new(rules: Vec<RewriteRule>) -> Self {
        Self { rules }
    }
}

#[async_trait]
impl Handler for RewriteHandler {
    async fn handle(
        &self,
        request: &mut Request<'_>,
        _response: &mut Response<'_>,
    ) -> anyhow::Result<Option<Interrupt>> {
        let uri = decode_uri(&request.uri);
        if let Some(rewritten) = self.rules.iter().find_map(|rule| rule.apply(&uri)) {
            debug!(from = %request.uri, to = %rewritten, "Rewrote request target");
            request.uri = rewritten;
        }
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expands_captures() {
        let rule = RewriteRule::new(r"/old/(\w+)", "/new/$1").unwrap();
        assert_eq!(rule.apply("/old/page").as_deref(), Some("/new/page"));
    }

    #[test]
    fn match_must_start_at_beginning() {
        let rule = RewriteRule::new("/a", "/b").unwrap();
        assert_eq!(rule.apply("/x/a"), None);
    }

    #[test]
    fn rejects_bad_pattern() {
        assert!(RewriteRule::new("(", "x").is_err());
    }
}
