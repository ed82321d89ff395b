use std::collections::HashMap;
use std::ops::Range;

use regex::Regex;
use uuid::Uuid;

use crate::error::StoreError;
use crate::store::{TrackedLink, TrackedLinkStore};

/// Path segment under which tracked links are served: `<base>newsletterlinks/<token>`.
pub const TRACKED_LINK_PATH: &str = "newsletterlinks";

struct Anchor {
    markup: String,
    href_span: Range<usize>,
    href: String,
}

/// Anchors with a double-quoted `href`. The content part is lazy and may span
/// lines, so a match always ends at the first `</a>` after the opening tag.
/// This is a pattern scan, not an HTML parser: anchors without a closing tag
/// are left alone, and nested anchors end at the inner `</a>`.
fn find_anchors(html: &str) -> Vec<Anchor> {
    let re = Regex::new(r#"(?is)<a\s[^>]*?href="([^"]*)"[^>]*?>.*?</a>"#).expect("valid regex");
    re.captures_iter(html)
        .filter_map(|caps| {
            let whole = caps.get(0)?;
            let href = caps.get(1)?;
            Some(Anchor {
                markup: whole.as_str().to_string(),
                href_span: (href.start() - whole.start())..(href.end() - whole.start()),
                href: href.as_str().to_string(),
            })
        })
        .collect()
}

/// Replace the `href` of every anchor in `html` with the redirect URL of its
/// tracked link, creating tracked links for `newsletter_id` as needed.
///
/// Only the href value changes; link text and other attributes are kept.
/// Each rewritten anchor is substituted by exact string replacement of its
/// original markup, so byte-identical anchors are all rewritten at once and
/// already rewritten text is never scanned again. Hrefs in `excluded` and
/// empty hrefs are left untouched.
pub async fn track_links(
    html: &str,
    newsletter_id: Uuid,
    store: &dyn TrackedLinkStore,
    base_url: &str,
    excluded: &[&str],
) -> Result<String, StoreError> {
    let anchors = find_anchors(html);
    if anchors.is_empty() {
        return Ok(html.to_string());
    }

    let mut resolved: HashMap<String, String> = HashMap::new();
    let mut text = html.to_string();

    for anchor in anchors {
        if anchor.href.is_empty() || excluded.contains(&anchor.href.as_str()) {
            continue;
        }

        let redirect = if let Some(url) = resolved.get(&anchor.href) {
            url.clone()
        } else {
            let link = store.find_or_create(newsletter_id, &anchor.href).await?;
            let url = link.redirect_url(base_url);
            tracing::debug!("Tracking {} as {url}", anchor.href);
            resolved.insert(anchor.href.clone(), url.clone());
            url
        };

        let mut replacement = String::with_capacity(anchor.markup.len() + redirect.len());
        replacement.push_str(&anchor.markup[..anchor.href_span.start]);
        replacement.push_str(&redirect);
        replacement.push_str(&anchor.markup[anchor.href_span.end..]);

        text = text.replace(&anchor.markup, &replacement);
    }

    Ok(text)
}

/// Extract the token from a tracked-link path such as `/newsletterlinks/<token>`.
pub fn parse_tracked_link_path(path: &str) -> Option<&str> {
    let rest = path.trim_matches('/').strip_prefix(TRACKED_LINK_PATH)?;
    let token = rest.strip_prefix('/')?;
    if token.is_empty() || !token.chars().all(|c| c.is_ascii_alphanumeric()) {
        return None;
    }
    Some(token)
}

/// Look up the tracked link a redirect request points at.
pub async fn resolve_tracked_link(
    store: &dyn TrackedLinkStore,
    path: &str,
) -> Result<Option<TrackedLink>, StoreError> {
    let Some(token) = parse_tracked_link_path(path) else {
        return Ok(None);
    };
    store.find_by_token(token).await
}
