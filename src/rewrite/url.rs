//! Mapping between origin URLs and proxied URLs

use std::borrow::Cow;

use percent_encoding::{percent_decode_str, utf8_percent_encode, AsciiSet, CONTROLS};
use url::Url;

/// Bytes escaped in the embedded URL.
///
/// Covers everything that would end a query value, a CSS `url()` token or a
/// `srcset` entry. `:` and `/` stay readable.
const EMBED: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b'#')
    .add(b'%')
    .add(b'&')
    .add(b'\'')
    .add(b'(')
    .add(b')')
    .add(b'+')
    .add(b',')
    .add(b';')
    .add(b'<')
    .add(b'=')
    .add(b'>')
    .add(b'?')
    .add(b'[')
    .add(b'\\')
    .add(b']')
    .add(b'^')
    .add(b'`')
    .add(b'{')
    .add(b'|')
    .add(b'}');

/// References that must reach the browser untouched
const EXCLUDED_PREFIXES: &[&str] = &["data:", "blob:", "javascript:", "mailto:", "tel:", "about:"];

/// Per-document rewriting parameters
#[derive(Debug, Clone)]
pub struct RewriteContext {
    /// URL relative references are resolved against
    pub base: Url,
    /// Proxy endpoint prefix, e.g. `/proxy?url=`
    pub prefix: String,
    /// Public origin of the proxy, e.g. `https://proxy.example`
    pub public_origin: Option<String>,
}

impl RewriteContext {
    pub fn new(base: Url, prefix: impl Into<String>) -> Self {
        Self {
            base,
            prefix: prefix.into(),
            public_origin: None,
        }
    }

    pub fn with_public_origin(mut self, origin: Option<String>) -> Self {
        self.public_origin = origin;
        self
    }

    pub fn to_proxied(&self, raw: &str) -> String {
        to_proxied_with_origin(raw, &self.base, &self.prefix, self.public_origin.as_deref())
    }

    pub fn to_direct(&self, raw: &str) -> String {
        to_direct(raw, &self.prefix, self.public_origin.as_deref())
    }
}

/// True for references that are never rewritten
pub fn is_excluded(raw: &str) -> bool {
    let raw = raw.trim();
    if raw.is_empty() || raw.starts_with('#') {
        return true;
    }
    EXCLUDED_PREFIXES.iter().any(|p| {
        raw.get(..p.len())
            .map(|head| head.eq_ignore_ascii_case(p))
            .unwrap_or(false)
    })
}

/// Resolve `raw` against `base` and route it through the proxy at `prefix`
///
/// Excluded references, unresolvable references, non-HTTP targets and URLs
/// that already point at the proxy are returned unchanged, so the mapping is
/// idempotent.
pub fn to_proxied(raw: &str, base: &Url, prefix: &str) -> String {
    to_proxied_with_origin(raw, base, prefix, None)
}

fn to_proxied_with_origin(raw: &str, base: &Url, prefix: &str, origin: Option<&str>) -> String {
    if is_excluded(raw) || strip_proxy_prefix(raw.trim(), prefix, origin).is_some() {
        return raw.to_string();
    }

    let absolute = match base.join(raw.trim()) {
        Ok(url) => url,
        Err(_) => return raw.to_string(),
    };

    if !matches!(absolute.scheme(), "http" | "https") {
        return raw.to_string();
    }
    if strip_proxy_prefix(absolute.as_str(), prefix, origin).is_some() {
        return raw.to_string();
    }

    format!("{}{}", prefix, utf8_percent_encode(absolute.as_str(), EMBED))
}

/// Recover the origin URL embedded in a proxied URL
///
/// `domain` is the proxy's public origin (`https://proxy.example`) or bare
/// authority (`proxy.example:8080`); it lets absolute proxied URLs, such as a
/// browser `Referer`, be recognised. Input that does not carry the prefix, or
/// whose payload does not decode to an absolute URL, is returned unchanged.
pub fn to_direct(proxied: &str, prefix: &str, domain: Option<&str>) -> String {
    let Some(encoded) = strip_proxy_prefix(proxied, prefix, domain) else {
        return proxied.to_string();
    };

    let decoded = match percent_decode_str(encoded).decode_utf8() {
        Ok(decoded) => decoded,
        Err(_) => return proxied.to_string(),
    };

    match Url::parse(&decoded) {
        Ok(_) => decoded.into_owned(),
        Err(_) => proxied.to_string(),
    }
}

/// Payload following the proxy prefix, if `raw` is a proxied URL
fn strip_proxy_prefix<'a>(raw: &'a str, prefix: &str, domain: Option<&str>) -> Option<&'a str> {
    if let Some(rest) = raw.strip_prefix(prefix) {
        return Some(rest);
    }

    let domain = domain?.trim_end_matches('/');
    if domain.is_empty() {
        return None;
    }

    let origins: Vec<Cow<'_, str>> = if domain.contains("://") {
        vec![Cow::Borrowed(domain)]
    } else {
        vec![
            Cow::Owned(format!("http://{}", domain)),
            Cow::Owned(format!("https://{}", domain)),
        ]
    };

    origins
        .iter()
        .find_map(|origin| raw.strip_prefix(origin.as_ref())?.strip_prefix(prefix))
}

#[cfg(test)]
mod tests {
    use super::*;

    const PREFIX: &str = "/proxy?url=";

    fn base() -> Url {
        Url::parse("http://example.com/dir/page.html").unwrap()
    }

    #[test]
    fn resolves_relative_references() {
        assert_eq!(
            to_proxied("/logo.png", &base(), PREFIX),
            "/proxy?url=http://example.com/logo.png"
        );
        assert_eq!(
            to_proxied("img/a.png", &base(), PREFIX),
            "/proxy?url=http://example.com/dir/img/a.png"
        );
        assert_eq!(
            to_proxied("//cdn.example.com/x.js", &base(), PREFIX),
            "/proxy?url=http://cdn.example.com/x.js"
        );
        assert_eq!(
            to_proxied("../up.css", &base(), PREFIX),
            "/proxy?url=http://example.com/up.css"
        );
    }

    #[test]
    fn escapes_query_delimiters() {
        assert_eq!(
            to_proxied("/search?q=a b&page=2#top", &base(), PREFIX),
            "/proxy?url=http://example.com/search%3Fq%3Da%2520b%26page%3D2%23top"
        );
    }

    #[test]
    fn leaves_excluded_references() {
        for raw in [
            "data:image/png;base64,AAAA",
            "#section",
            "blob:http://example.com/uuid",
            "javascript:void(0)",
            "MAILTO:someone@example.com",
            "",
            "   ",
        ] {
            assert_eq!(to_proxied(raw, &base(), PREFIX), raw);
        }
    }

    #[test]
    fn leaves_non_http_targets() {
        assert_eq!(
            to_proxied("ftp://files.example.com/a", &base(), PREFIX),
            "ftp://files.example.com/a"
        );
    }

    #[test]
    fn is_idempotent() {
        for raw in [
            "/logo.png",
            "https://other.example/a?b=c&d=e",
            "rel/path.css",
            "#frag",
        ] {
            let once = to_proxied(raw, &base(), PREFIX);
            let twice = to_proxied(&once, &base(), PREFIX);
            assert_eq!(once, twice, "input {raw}");
        }
    }

    #[test]
    fn idempotent_with_absolute_prefix() {
        let prefix = "https://proxy.example/proxy?url=";
        let once = to_proxied("/a.png", &base(), prefix);
        assert_eq!(once, "https://proxy.example/proxy?url=http://example.com/a.png");
        assert_eq!(to_proxied(&once, &base(), prefix), once);
    }

    #[test]
    fn round_trips_to_resolved_url() {
        for raw in [
            "/logo.png",
            "img/a b.png",
            "https://other.example/a?b=c&d=e#f",
            "//cdn.example.com/x.js?v=1,2",
            "/caf\u{e9}.html",
        ] {
            let proxied = to_proxied(raw, &base(), PREFIX);
            let resolved = base().join(raw).unwrap();
            assert_eq!(to_direct(&proxied, PREFIX, None), resolved.as_str());
        }
    }

    #[test]
    fn to_direct_leaves_foreign_urls() {
        assert_eq!(
            to_direct("http://example.com/a", PREFIX, None),
            "http://example.com/a"
        );
    }

    #[test]
    fn to_direct_never_fails() {
        // invalid UTF-8 after decoding
        assert_eq!(to_direct("/proxy?url=%FF%FE", PREFIX, None), "/proxy?url=%FF%FE");
        // not an absolute URL
        assert_eq!(to_direct("/proxy?url=relative", PREFIX, None), "/proxy?url=relative");
    }

    #[test]
    fn to_direct_with_domain() {
        let proxied = "https://proxy.example/proxy?url=http://example.com/page%3Fa%3D1";
        assert_eq!(
            to_direct(proxied, PREFIX, Some("https://proxy.example")),
            "http://example.com/page?a=1"
        );
        assert_eq!(
            to_direct(proxied, PREFIX, Some("proxy.example")),
            "http://example.com/page?a=1"
        );
        assert_eq!(to_direct(proxied, PREFIX, Some("other.example")), proxied);
    }

    #[test]
    fn context_uses_public_origin_for_idempotence() {
        let ctx = RewriteContext::new(base(), PREFIX)
            .with_public_origin(Some("https://proxy.example".to_string()));
        let already = "https://proxy.example/proxy?url=http://example.com/a.png";
        assert_eq!(ctx.to_proxied(already), already);
        assert_eq!(ctx.to_direct(already), "http://example.com/a.png");
    }
}
