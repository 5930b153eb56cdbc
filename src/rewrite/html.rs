//! Document rewriting
//!
//! HTML goes through `lol_html`, which tokenizes the document and
//! re-serializes only the tags a handler touched. URL-bearing attributes are
//! listed in one table; a single handler rewrites each of them according to
//! its syntax.

use std::cell::RefCell;

use lol_html::html_content::{ContentType, Element};
use lol_html::{element, text, HtmlRewriter, Settings};
use tracing::debug;

use super::css::transform_css;
use super::url::RewriteContext;
use crate::error::{Result, ShroudError};

/// How an attribute value carries its URLs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum UrlSyntax {
    /// The whole value is one URL
    Single,
    /// `url [descriptor], url [descriptor], ...`
    SrcSet,
    /// CSS declarations
    InlineStyle,
}

const URL_ATTRIBUTES: &[(&str, &str, UrlSyntax)] = &[
    ("a[href]", "href", UrlSyntax::Single),
    ("area[href]", "href", UrlSyntax::Single),
    ("link[href]", "href", UrlSyntax::Single),
    ("img[src]", "src", UrlSyntax::Single),
    ("img[srcset]", "srcset", UrlSyntax::SrcSet),
    ("script[src]", "src", UrlSyntax::Single),
    ("iframe[src]", "src", UrlSyntax::Single),
    ("video[src]", "src", UrlSyntax::Single),
    ("video[poster]", "poster", UrlSyntax::Single),
    ("audio[src]", "src", UrlSyntax::Single),
    ("source[src]", "src", UrlSyntax::Single),
    ("source[srcset]", "srcset", UrlSyntax::SrcSet),
    ("track[src]", "src", UrlSyntax::Single),
    ("embed[src]", "src", UrlSyntax::Single),
    ("object[data]", "data", UrlSyntax::Single),
    ("input[src]", "src", UrlSyntax::Single),
    ("form[action]", "action", UrlSyntax::Single),
    ("[style]", "style", UrlSyntax::InlineStyle),
];

/// Rewrite every URL-bearing position of an HTML document
///
/// Individual attributes that cannot be rewritten are left as they are; an
/// error is returned only when the document as a whole cannot be processed.
pub fn transform_html(html: &[u8], ctx: &RewriteContext) -> Result<Vec<u8>> {
    let ctx = RefCell::new(ctx.clone());
    let style = RefCell::new(String::new());
    let mut output = Vec::with_capacity(html.len() + html.len() / 8);

    let mut handlers = vec![
        // Proxied URLs are absolute, so <base> only feeds resolution and is dropped
        element!("base[href]", |el| {
            if let Some(href) = el.get_attribute("href") {
                let mut ctx = ctx.borrow_mut();
                if let Ok(base) = ctx.base.join(href.trim()) {
                    ctx.base = base;
                }
            }
            el.remove();
            Ok(())
        }),
        element!("meta[http-equiv]", |el| {
            let is_refresh = el
                .get_attribute("http-equiv")
                .map(|v| v.trim().eq_ignore_ascii_case("refresh"))
                .unwrap_or(false);
            if !is_refresh {
                return Ok(());
            }
            if let Some(content) = el.get_attribute("content") {
                if let Some(rewritten) = rewrite_refresh(&content, &ctx.borrow()) {
                    set_or_skip(el, "content", &rewritten);
                }
            }
            Ok(())
        }),
        // <style> text can arrive in several chunks
        text!("style", |chunk| {
            let mut buffer = style.borrow_mut();
            buffer.push_str(chunk.as_str());
            if chunk.last_in_text_node() {
                let css = transform_css(&buffer, &ctx.borrow());
                chunk.replace(&css, ContentType::Html);
                buffer.clear();
            } else {
                chunk.remove();
            }
            Ok(())
        }),
    ];

    for &(selector, attribute, syntax) in URL_ATTRIBUTES {
        let ctx = &ctx;
        handlers.push(element!(selector, move |el| {
            rewrite_attribute(el, attribute, syntax, &ctx.borrow());
            Ok(())
        }));
    }

    let mut rewriter = HtmlRewriter::new(
        Settings {
            element_content_handlers: handlers,
            ..Settings::default()
        },
        |c: &[u8]| output.extend_from_slice(c),
    );

    rewriter
        .write(html)
        .map_err(|e| ShroudError::TransformFailure(e.to_string()))?;
    rewriter
        .end()
        .map_err(|e| ShroudError::TransformFailure(e.to_string()))?;

    Ok(output)
}

fn rewrite_attribute(el: &mut Element<'_, '_>, attribute: &str, syntax: UrlSyntax, ctx: &RewriteContext) {
    let Some(value) = el.get_attribute(attribute) else {
        return;
    };

    let rewritten = match syntax {
        UrlSyntax::Single => ctx.to_proxied(&value),
        UrlSyntax::SrcSet => rewrite_srcset(&value, ctx),
        UrlSyntax::InlineStyle => transform_css(&value, ctx),
    };

    if rewritten != value {
        set_or_skip(el, attribute, &rewritten);
    }
}

fn set_or_skip(el: &mut Element<'_, '_>, attribute: &str, value: &str) {
    if let Err(e) = el.set_attribute(attribute, value) {
        debug!(attribute, error = %e, "Leaving attribute unrewritten");
    }
}

/// Rewrite the URL of each `srcset` candidate, keeping descriptors verbatim
pub fn rewrite_srcset(value: &str, ctx: &RewriteContext) -> String {
    let mut candidates = Vec::new();
    let mut rest = value;

    loop {
        rest = rest.trim_start_matches(|c: char| c.is_ascii_whitespace() || c == ',');
        if rest.is_empty() {
            break;
        }

        let url_end = rest
            .find(|c: char| c.is_ascii_whitespace())
            .unwrap_or(rest.len());
        let url = &rest[..url_end];
        rest = &rest[url_end..];

        // `a.png, b.png 2x`: a trailing comma ends a candidate without descriptor
        if url.ends_with(',') {
            candidates.push(ctx.to_proxied(url.trim_end_matches(',')));
            continue;
        }

        let mut depth = 0usize;
        let mut descriptor_end = rest.len();
        for (i, c) in rest.char_indices() {
            match c {
                '(' => depth += 1,
                ')' => depth = depth.saturating_sub(1),
                ',' if depth == 0 => {
                    descriptor_end = i;
                    break;
                }
                _ => {}
            }
        }
        let descriptor = rest[..descriptor_end].trim();
        rest = &rest[descriptor_end..];

        let url = ctx.to_proxied(url);
        if descriptor.is_empty() {
            candidates.push(url);
        } else {
            candidates.push(format!("{} {}", url, descriptor));
        }
    }

    candidates.join(", ")
}

/// `5; url=/next` -> `5; url=<proxied>`
fn rewrite_refresh(content: &str, ctx: &RewriteContext) -> Option<String> {
    let (delay, target) = content.split_once(|c: char| c == ';' || c == ',')?;
    let target = target.trim_start();
    let target = match target.get(..4) {
        Some(head) if head.eq_ignore_ascii_case("url=") => &target[4..],
        _ => target,
    };
    let target = target.trim().trim_matches(|c: char| c == '\'' || c == '"');
    if target.is_empty() {
        return None;
    }

    Some(format!("{}; url={}", delay.trim(), ctx.to_proxied(target)))
}
