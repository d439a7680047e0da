#![forbid(unsafe_code)]

//! Stream reference classification and resolution.
//!
//! A stored reference names where a playable file lives in one of three
//! disjoint forms. Classification is order-sensitive and must stay that way:
//! the absolute check runs first so `https://cdn.example.com/uploads/x.mp4`
//! is never mistaken for a local upload, and the local-prefix check runs
//! before the CDN fallback so `/uploads/x.mp4` is never prefixed with the
//! CDN base.

use axum::http::{HeaderMap, header};
use url::Url;

/// Prefix marking files stored by the upload pipeline on the API host itself.
pub const LOCAL_UPLOAD_PREFIX: &str = "/uploads/";

const DEFAULT_PROTO: &str = "http";
const DEFAULT_HOST: &str = "localhost";

/// A classified stream reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamReference {
    /// Full `http(s)://` URL, used as-is.
    Absolute(String),
    /// Path under [`LOCAL_UPLOAD_PREFIX`], served by this API's own origin.
    LocalUpload(String),
    /// Anything else: a key relative to the configured CDN base.
    CdnRelative(String),
}

impl StreamReference {
    /// Classifies a raw stored reference. Total: every string maps to exactly
    /// one variant.
    pub fn classify(raw: &str) -> Self {
        if raw.starts_with("http://") || raw.starts_with("https://") {
            Self::Absolute(raw.to_owned())
        } else if raw.starts_with(LOCAL_UPLOAD_PREFIX) {
            Self::LocalUpload(raw.to_owned())
        } else {
            Self::CdnRelative(raw.to_owned())
        }
    }

    /// Produces the final fetchable URL. No I/O and no reachability check; a
    /// CDN-relative key with no configured base degrades to the bare key.
    pub fn resolve(&self, ctx: &RequestContext, cdn_base: Option<&str>) -> String {
        match self {
            Self::Absolute(url) => url.clone(),
            Self::LocalUpload(path) => format!("{}{}", ctx.origin(), path),
            Self::CdnRelative(key) => match cdn_base {
                Some(base) => format!("{}/{}", base.trim_end_matches('/'), key.trim_start_matches('/')),
                None => key.clone(),
            },
        }
    }
}

/// Forwarded-host/proto context of the current request, used both to resolve
/// local-upload references and to derive the API's own origin.
#[derive(Debug, Clone, Default)]
pub struct RequestContext {
    pub forwarded_proto: Option<String>,
    pub forwarded_host: Option<String>,
    pub host: Option<String>,
}

impl RequestContext {
    pub fn from_headers(headers: &HeaderMap) -> Self {
        let header_value = |name: &str| {
            headers
                .get(name)
                .and_then(|value| value.to_str().ok())
                .map(|value| value.trim())
                .filter(|value| !value.is_empty())
                .map(str::to_owned)
        };
        Self {
            forwarded_proto: header_value("x-forwarded-proto"),
            forwarded_host: header_value("x-forwarded-host"),
            host: headers
                .get(header::HOST)
                .and_then(|value| value.to_str().ok())
                .map(|value| value.trim())
                .filter(|value| !value.is_empty())
                .map(str::to_owned),
        }
    }

    /// `protocol://host` of the API as seen by the client. Priority is fixed:
    /// forwarded proto/host first, then the literal Host header, then the
    /// defaults.
    pub fn origin(&self) -> String {
        let proto = self.forwarded_proto.as_deref().unwrap_or(DEFAULT_PROTO);
        let host = self
            .forwarded_host
            .as_deref()
            .or(self.host.as_deref())
            .unwrap_or(DEFAULT_HOST);
        format!("{proto}://{host}")
    }
}

/// Normalized origin (`scheme://host[:port]`, default ports elided) of an
/// absolute URL, or `None` when the string does not parse as one.
pub fn origin_of(absolute_url: &str) -> Option<String> {
    let url = Url::parse(absolute_url).ok()?;
    let origin = url.origin();
    if !origin.is_tuple() {
        return None;
    }
    Some(origin.ascii_serialization())
}

/// Whether `resolved_url` lives on the API's own origin, in which case the
/// browser can embed it directly and no proxy is needed.
pub fn same_origin(resolved_url: &str, ctx: &RequestContext) -> bool {
    match (origin_of(resolved_url), origin_of(&ctx.origin())) {
        (Some(a), Some(b)) => a == b,
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx(proto: Option<&str>, fwd_host: Option<&str>, host: Option<&str>) -> RequestContext {
        RequestContext {
            forwarded_proto: proto.map(str::to_owned),
            forwarded_host: fwd_host.map(str::to_owned),
            host: host.map(str::to_owned),
        }
    }

    #[test]
    fn classification_is_order_sensitive() {
        assert_eq!(
            StreamReference::classify("https://cdn.example.com/uploads/a.mp4"),
            StreamReference::Absolute("https://cdn.example.com/uploads/a.mp4".into())
        );
        assert_eq!(
            StreamReference::classify("/uploads/a.mp4"),
            StreamReference::LocalUpload("/uploads/a.mp4".into())
        );
        assert_eq!(
            StreamReference::classify("movies/a.mp4"),
            StreamReference::CdnRelative("movies/a.mp4".into())
        );
    }

    #[test]
    fn classification_is_total() {
        for raw in ["", " ", "http:/almost", "uploads/x", "/upload/x", "ftp://h/x"] {
            // Exactly one branch fires for any input; none of these are
            // absolute or local uploads.
            assert_eq!(
                StreamReference::classify(raw),
                StreamReference::CdnRelative(raw.into())
            );
        }
    }

    #[test]
    fn local_upload_uses_forwarded_context_first() {
        let reference = StreamReference::classify("/uploads/a.mp4");
        let resolved = reference.resolve(
            &ctx(Some("https"), Some("public.example.com"), Some("internal:8080")),
            None,
        );
        assert_eq!(resolved, "https://public.example.com/uploads/a.mp4");
    }

    #[test]
    fn local_upload_falls_back_to_host_header_then_default() {
        let reference = StreamReference::classify("/uploads/a.mp4");
        assert_eq!(
            reference.resolve(&ctx(None, None, Some("api.example.com:3000")), None),
            "http://api.example.com:3000/uploads/a.mp4"
        );
        assert_eq!(
            reference.resolve(&ctx(None, None, None), None),
            "http://localhost/uploads/a.mp4"
        );
    }

    #[test]
    fn cdn_relative_is_prefixed_when_base_configured() {
        let reference = StreamReference::classify("movies/a.mp4");
        assert_eq!(
            reference.resolve(&ctx(None, None, None), Some("https://cdn.example.com/")),
            "https://cdn.example.com/movies/a.mp4"
        );
        // Misconfiguration degrades to a dead reference, never an error.
        assert_eq!(reference.resolve(&ctx(None, None, None), None), "movies/a.mp4");
    }

    #[test]
    fn local_prefix_wins_over_cdn_base() {
        let reference = StreamReference::classify("/uploads/a.mp4");
        let resolved = reference.resolve(
            &ctx(None, None, Some("api.example.com")),
            Some("https://cdn.example.com"),
        );
        assert_eq!(resolved, "http://api.example.com/uploads/a.mp4");
    }

    #[test]
    fn origin_comparison_normalizes_default_ports() {
        let context = ctx(Some("https"), Some("api.example.com"), None);
        assert!(same_origin("https://api.example.com:443/v/a.mp4", &context));
        assert!(same_origin("https://api.example.com/v/a.mp4", &context));
        assert!(!same_origin("https://cdn.example.com/v/a.mp4", &context));
        assert!(!same_origin("http://api.example.com/v/a.mp4", &context));
    }

    #[test]
    fn non_absolute_urls_are_never_same_origin() {
        assert!(!same_origin("movies/a.mp4", &ctx(None, None, Some("h"))));
    }
}
