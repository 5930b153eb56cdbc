//! Stylesheet rewriting
//!
//! A small scanner over the stylesheet text: comments and strings are copied
//! through, `url(...)` tokens and `@import "..."` strings are routed through
//! the proxy. An occurrence that cannot be parsed is copied verbatim.

use super::url::RewriteContext;

/// Rewrite every `url()` and `@import` reference in `css`
pub fn transform_css(css: &str, ctx: &RewriteContext) -> String {
    let bytes = css.as_bytes();
    let mut out = String::with_capacity(css.len() + css.len() / 8);
    let mut copied = 0;
    let mut i = 0;

    while i < bytes.len() {
        match bytes[i] {
            b'/' if bytes.get(i + 1) == Some(&b'*') => {
                i = css[i + 2..]
                    .find("*/")
                    .map(|p| i + 2 + p + 2)
                    .unwrap_or(bytes.len());
            }
            b'"' | b'\'' => {
                i = scan_string(bytes, i).0;
            }
            b'\\' => {
                i = (i + 2).min(bytes.len());
            }
            b'u' | b'U' if is_url_function(bytes, i) => match rewrite_url_function(css, i, ctx) {
                Some((replacement, end)) => {
                    out.push_str(&css[copied..i]);
                    out.push_str(&replacement);
                    copied = end;
                    i = end;
                }
                None => i += 4,
            },
            b'@' if starts_with_ignore_case(&bytes[i..], b"@import") => {
                let mut j = skip_whitespace(bytes, i + 7);
                if let Some((replacement, end)) = rewrite_string(css, j, ctx) {
                    out.push_str(&css[copied..j]);
                    out.push_str(&replacement);
                    copied = end;
                    j = end;
                }
                // `@import url(...)` is picked up by the url() arm
                i = j;
            }
            _ => i += 1,
        }
    }

    out.push_str(&css[copied..]);
    out
}

fn is_url_function(bytes: &[u8], i: usize) -> bool {
    if !starts_with_ignore_case(&bytes[i..], b"url(") {
        return false;
    }
    // `url(` must start a token, not end an identifier like `myurl(`
    i == 0 || !is_ident_byte(bytes[i - 1])
}

fn is_ident_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'-' || b == b'_' || b >= 0x80
}

fn starts_with_ignore_case(haystack: &[u8], needle: &[u8]) -> bool {
    haystack.len() >= needle.len() && haystack[..needle.len()].eq_ignore_ascii_case(needle)
}

fn skip_whitespace(bytes: &[u8], mut i: usize) -> usize {
    while i < bytes.len() && bytes[i].is_ascii_whitespace() {
        i += 1;
    }
    i
}

/// Scan a quoted string starting at `start`; returns the index after the
/// closing quote and whether the string was terminated.
fn scan_string(bytes: &[u8], start: usize) -> (usize, bool) {
    let quote = bytes[start];
    let mut i = start + 1;
    while i < bytes.len() {
        match bytes[i] {
            b'\\' => i += 2,
            b'\n' => return (i, false),
            b if b == quote => return (i + 1, true),
            _ => i += 1,
        }
    }
    (bytes.len(), false)
}

/// Rewrite a quoted string at `start`, keeping its quote character
fn rewrite_string(css: &str, start: usize, ctx: &RewriteContext) -> Option<(String, usize)> {
    let bytes = css.as_bytes();
    let quote = *bytes.get(start)?;
    if quote != b'"' && quote != b'\'' {
        return None;
    }

    let (end, terminated) = scan_string(bytes, start);
    if !terminated {
        return None;
    }

    let value = &css[start + 1..end - 1];
    let quote = quote as char;
    Some((format!("{}{}{}", quote, ctx.to_proxied(value), quote), end))
}

/// Rewrite the `url(...)` token at `start`
fn rewrite_url_function(css: &str, start: usize, ctx: &RewriteContext) -> Option<(String, usize)> {
    let bytes = css.as_bytes();
    let open = start + 4;
    let value_start = skip_whitespace(bytes, open);
    let head = &css[start..value_start];

    match bytes.get(value_start)? {
        b'"' | b'\'' => {
            let (quoted, string_end) = rewrite_string(css, value_start, ctx)?;
            let close = skip_whitespace(bytes, string_end);
            if bytes.get(close) != Some(&b')') {
                return None;
            }
            let tail = &css[string_end..close];
            Some((format!("{}{}{})", head, quoted, tail), close + 1))
        }
        _ => {
            let close = value_start + css[value_start..].find(')')?;
            let inner = &css[value_start..close];
            let value = inner.trim_end();
            // unquoted urls cannot contain quotes, parens or whitespace
            if value
                .bytes()
                .any(|b| matches!(b, b'"' | b'\'' | b'(') || b.is_ascii_whitespace())
            {
                return None;
            }
            let tail = &inner[value.len()..];
            Some((
                format!("{}{}{})", head, ctx.to_proxied(value), tail),
                close + 1,
            ))
        }
    }
}
