//! Canonical URLs for stored media paths.
//!
//! The backend has stored media references in several shapes over time:
//! absolute URLs, Windows filesystem paths from an early deployment, and
//! relative `/uploads/...` paths. Every image and video goes through
//! [`normalize_asset_url`] before it is displayed or downloaded.

use reqwest::Url;

const LOCAL_HOSTS: [&str; 3] = ["localhost", "127.0.0.1", "0.0.0.0"];
const UPLOADS: &str = "uploads";

/// Resolves asset paths against one backend origin.
#[derive(Debug, Clone)]
pub struct AssetResolver {
    origin: String,
    cdn_hosts: Vec<String>,
}

impl AssetResolver {
    #[must_use]
    pub fn new(origin: &str, cdn_hosts: Vec<String>) -> Self {
        AssetResolver {
            origin: origin.trim_end_matches('/').to_string(),
            cdn_hosts,
        }
    }

    #[must_use]
    pub fn resolve(&self, raw: &str, fallback: &str) -> String {
        normalize_with_cdns(raw, &self.origin, &self.cdn_hosts, fallback)
    }

    #[must_use]
    pub fn resolve_opt(&self, raw: Option<&str>, fallback: &str) -> String {
        raw.map_or_else(|| fallback.to_string(), |raw| self.resolve(raw, fallback))
    }
}

/// Normalizes `raw` to a URL rooted at `origin`, returning `fallback` for
/// anything that cannot be resolved.
#[must_use]
pub fn normalize_asset_url(raw: &str, origin: &str, fallback: &str) -> String {
    normalize_with_cdns(raw, origin.trim_end_matches('/'), &[], fallback)
}

fn normalize_with_cdns(raw: &str, origin: &str, cdn_hosts: &[String], fallback: &str) -> String {
    let raw = raw.trim();
    if raw.is_empty() || raw.chars().any(char::is_whitespace) {
        return fallback.to_string();
    }
    if raw.starts_with("data:") || raw.starts_with("blob:") {
        return raw.to_string();
    }
    if let Some(rest) = raw.strip_prefix("//") {
        return absolute(&format!("https://{rest}"), origin, cdn_hosts, fallback);
    }
    if raw.starts_with("http://") || raw.starts_with("https://") {
        return absolute(raw, origin, cdn_hosts, fallback);
    }
    if is_windows_path(raw) {
        return windows_path(raw, origin, fallback);
    }
    relative(raw, origin, fallback)
}

fn absolute(raw: &str, origin: &str, cdn_hosts: &[String], fallback: &str) -> String {
    let Ok(url) = Url::parse(raw) else {
        return fallback.to_string();
    };
    let Some(host) = url.host_str() else {
        return fallback.to_string();
    };

    if cdn_hosts.iter().any(|cdn| host == cdn || host.ends_with(&format!(".{cdn}"))) {
        return raw.to_string();
    }

    // Uploads recorded against a developer machine are served by the real origin.
    if LOCAL_HOSTS.contains(&host) && url.path().contains("/uploads/") {
        let mut rebased = format!("{origin}{}", url.path());
        if let Some(query) = url.query() {
            rebased.push('?');
            rebased.push_str(query);
        }
        return rebased;
    }

    raw.to_string()
}

fn is_windows_path(raw: &str) -> bool {
    let bytes = raw.as_bytes();
    raw.contains('\\') || (bytes.len() > 2 && bytes[0].is_ascii_alphabetic() && bytes[1] == b':')
}

fn windows_path(raw: &str, origin: &str, fallback: &str) -> String {
    let unified = raw.replace('\\', "/");
    let segments: Vec<&str> = unified.split('/').filter(|s| !s.is_empty()).collect();

    match segments.iter().position(|s| s.eq_ignore_ascii_case(UPLOADS)) {
        Some(at) if at + 1 < segments.len() => join_checked(origin, &segments[at..], fallback),
        _ => fallback.to_string(),
    }
}

fn relative(raw: &str, origin: &str, fallback: &str) -> String {
    let path = raw.trim_start_matches("./");
    let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();

    match segments.as_slice() {
        [] => fallback.to_string(),
        [name] if !path.starts_with('/') => join_checked(origin, &[UPLOADS, *name], fallback),
        _ => join_checked(origin, &segments, fallback),
    }
}

fn join_checked(origin: &str, segments: &[&str], fallback: &str) -> String {
    if segments.iter().any(|s| *s == ".." || *s == ".") {
        return fallback.to_string();
    }
    format!("{origin}/{}", segments.join("/"))
}

#[cfg(test)]
mod tests {
    use super::*;

    const ORIGIN: &str = "https://api.reelio.app";
    const FALLBACK: &str = "/default-avatar.png";

    fn resolver() -> AssetResolver {
        AssetResolver::new("https://api.reelio.app/", vec!["res.cloudinary.com".to_string()])
    }

    #[test]
    fn test_relative_upload_paths() {
        for raw in ["/uploads/a.jpg", "uploads/a.jpg", "./uploads/a.jpg", "a.jpg"] {
            assert_eq!(
                normalize_asset_url(raw, ORIGIN, FALLBACK),
                "https://api.reelio.app/uploads/a.jpg",
                "input {raw}"
            );
        }
        assert_eq!(
            normalize_asset_url("/static/logo.svg", ORIGIN, FALLBACK),
            "https://api.reelio.app/static/logo.svg"
        );
    }

    #[test]
    fn test_legacy_windows_paths() {
        assert_eq!(
            normalize_asset_url(r"C:\Users\dev\reelio\server\uploads\reels\r1.mp4", ORIGIN, FALLBACK),
            "https://api.reelio.app/uploads/reels/r1.mp4"
        );
        assert_eq!(normalize_asset_url(r"D:\media\r1.mp4", ORIGIN, FALLBACK), FALLBACK);
        assert_eq!(normalize_asset_url(r"C:\srv\uploads\", ORIGIN, FALLBACK), FALLBACK);
    }

    #[test]
    fn test_cdn_urls_untouched() {
        let url = "https://res.cloudinary.com/reelio/image/upload/v1/x.jpg";
        assert_eq!(resolver().resolve(url, FALLBACK), url);
    }

    #[test]
    fn test_local_dev_urls_rebased() {
        assert_eq!(
            normalize_asset_url("http://localhost:5000/uploads/p.png?v=2", ORIGIN, FALLBACK),
            "https://api.reelio.app/uploads/p.png?v=2"
        );
        assert_eq!(
            normalize_asset_url("http://localhost:3000/other/p.png", ORIGIN, FALLBACK),
            "http://localhost:3000/other/p.png"
        );
    }

    #[test]
    fn test_protocol_relative_and_data_uris() {
        assert_eq!(
            normalize_asset_url("//images.example.com/p.png", ORIGIN, FALLBACK),
            "https://images.example.com/p.png"
        );
        assert_eq!(normalize_asset_url("data:image/png;base64,AAAA", ORIGIN, FALLBACK), "data:image/png;base64,AAAA");
    }

    #[test]
    fn test_malformed_inputs_use_fallback() {
        for raw in ["", "   ", "../etc/passwd", "/uploads/../secret", "http://", "https://exa mple.com/x.png"] {
            assert_eq!(normalize_asset_url(raw, ORIGIN, FALLBACK), FALLBACK, "input {raw:?}");
        }
        assert_eq!(resolver().resolve_opt(None, FALLBACK), FALLBACK);
    }

    #[test]
    fn test_normalize_is_idempotent() {
        let inputs = [
            "/uploads/a.jpg",
            "a.jpg",
            r"C:\srv\uploads\b.png",
            "http://localhost:5000/uploads/c.png",
            "https://res.cloudinary.com/reelio/v1/d.jpg",
            "//cdn.example.com/e.png",
        ];
        let resolver = resolver();
        for raw in inputs {
            let once = resolver.resolve(raw, FALLBACK);
            assert_eq!(resolver.resolve(&once, FALLBACK), once, "input {raw}");
        }
    }

    #[test]
    fn test_idempotent_for_local_origin() {
        let origin = "http://localhost:5000";
        let once = normalize_asset_url("/uploads/a.jpg", origin, FALLBACK);
        assert_eq!(once, "http://localhost:5000/uploads/a.jpg");
        assert_eq!(normalize_asset_url(&once, origin, FALLBACK), once);
    }
}
