//! Compiles declarative per-resource grants into a deny-by-default
//! Content-Security-Policy string.

use html_escape::encode_safe;
use serde::{Deserialize, Serialize};

/// Declarative domain allow-lists for one guest resource. Each list is an
/// ordered set of origin strings; immutable once synthesized into a policy.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PolicyGrant {
    /// Origins reachable from fetch/XHR/WebSocket.
    #[serde(default)]
    pub connect: Vec<String>,
    /// Origins for static assets: scripts, styles, images, fonts, media.
    #[serde(default)]
    pub resource: Vec<String>,
    /// Origins embeddable in nested frames.
    #[serde(default)]
    pub frame: Vec<String>,
    /// Allowed document base URIs.
    #[serde(default)]
    pub base_uri: Vec<String>,
}

/// Sandbox permissions requested by the resource, echoed back verbatim in
/// the handshake. Deny-all by default.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PermissionGrant {
    #[serde(default)]
    pub camera: bool,
    #[serde(default)]
    pub microphone: bool,
    #[serde(default)]
    pub geolocation: bool,
    #[serde(default)]
    pub clipboard_write: bool,
}

/// Synthesize the complete policy string for a grant. Pure: same grant in,
/// same string out.
///
/// The baseline denies everything; guest code itself must be allowed to run,
/// so `script-src`/`style-src` carry self plus inline/eval allowances. Empty
/// grant lists degrade to `'self'`-only (or an explicit `'none'` for
/// `frame-src`), never to a wildcard.
pub fn synthesize(grant: &PolicyGrant) -> String {
    let resource = escaped_origins(&grant.resource);
    let connect = escaped_origins(&grant.connect);

    let mut directives = vec!["default-src 'none'".to_string()];
    directives.push(directive(
        "script-src",
        &["'self'", "'unsafe-inline'", "'unsafe-eval'"],
        &resource,
    ));
    directives.push(directive(
        "style-src",
        &["'self'", "'unsafe-inline'"],
        &resource,
    ));
    directives.push(directive("img-src", &["'self'", "data:", "blob:"], &resource));
    directives.push(directive("font-src", &["'self'", "data:"], &resource));
    directives.push(directive(
        "media-src",
        &["'self'", "data:", "blob:"],
        &resource,
    ));
    directives.push(directive("connect-src", &["'self'"], &connect));

    if grant.frame.is_empty() {
        directives.push("frame-src 'none'".to_string());
    } else {
        directives.push(directive("frame-src", &[], &escaped_origins(&grant.frame)));
    }

    if grant.base_uri.is_empty() {
        directives.push("base-uri 'self'".to_string());
    } else {
        directives.push(directive(
            "base-uri",
            &["'self'"],
            &escaped_origins(&grant.base_uri),
        ));
    }

    directives.push("form-action 'self'".to_string());
    directives.push("object-src 'none'".to_string());

    directives.join("; ")
}

fn directive(name: &str, fixed: &[&str], origins: &[String]) -> String {
    let mut parts = Vec::with_capacity(1 + fixed.len() + origins.len());
    parts.push(name.to_string());
    parts.extend(fixed.iter().map(|s| s.to_string()));
    parts.extend(origins.iter().cloned());
    parts.join(" ")
}

/// Escape each origin before interpolation (a malicious origin string must
/// not be able to break out of the policy declaration), deduplicating while
/// preserving order. A source token can never contain whitespace or a
/// directive separator; an origin carrying either would smuggle extra
/// directives into the joined policy, so it is discarded outright.
fn escaped_origins(origins: &[String]) -> Vec<String> {
    let mut seen = Vec::new();
    for origin in origins {
        let trimmed = origin.trim();
        if trimmed.is_empty()
            || trimmed
                .chars()
                .any(|c| c.is_whitespace() || c == ';' || c == ',')
        {
            continue;
        }
        let escaped = encode_safe(trimmed).to_string();
        if !seen.contains(&escaped) {
            seen.push(escaped);
        }
    }
    seen
}
