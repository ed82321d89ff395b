use regex::{Captures, Regex};
use url::Url;

use crate::config::with_trailing_slash;
use crate::error::AppError;

/// Rewrites relative URLs in a rendered body to absolute ones and closes
/// void elements so the markup survives strict mail clients.
pub struct AbsoluteLinkNormalizer {
    base: Url,
}

impl AbsoluteLinkNormalizer {
    pub fn new(base_url: &str) -> Result<Self, AppError> {
        let base = Url::parse(&with_trailing_slash(base_url))
            .map_err(|e| AppError::MalformedInput(format!("base URL {base_url:?}: {e}")))?;
        if base.cannot_be_a_base() {
            return Err(AppError::MalformedInput(format!(
                "base URL {base_url:?} cannot be a base"
            )));
        }
        Ok(Self { base })
    }

    /// Running this twice gives the same result as running it once.
    pub fn normalize(&self, html: &str) -> String {
        let text = html
            .replace(" src=\"assets/", " src=\"/assets/")
            .replace(" src='assets/", " src='/assets/");
        let text = self.absolutize(&text);
        close_void_elements(&text)
    }

    /// Resolve `href`, `src`, `background` and `action` values that have no
    /// scheme: `/path` against the base origin, `path` against the base URL.
    /// Values may be double- or single-quoted; the quote style is kept.
    fn absolutize(&self, html: &str) -> String {
        let re = Regex::new(
            r#"(?i)(\s(?:href|src|background|action)\s*=\s*)(?:"([^"]*)"|'([^']*)')"#,
        )
        .expect("valid regex");
        re.replace_all(html, |caps: &Captures| {
            let (quote, value) = match (caps.get(2), caps.get(3)) {
                (Some(value), _) => ('"', value.as_str()),
                (None, Some(value)) => ('\'', value.as_str()),
                (None, None) => return caps[0].to_string(),
            };
            if is_left_alone(value) {
                return caps[0].to_string();
            }
            match self.base.join(value) {
                Ok(absolute) => format!("{}{quote}{absolute}{quote}", &caps[1]),
                Err(e) => {
                    tracing::warn!("Leaving unresolvable URL {value:?} as is: {e}");
                    caps[0].to_string()
                }
            }
        })
        .into_owned()
    }
}

/// Shorthand for a one-off normalization.
pub fn normalize(html: &str, base_url: &str) -> Result<String, AppError> {
    Ok(AbsoluteLinkNormalizer::new(base_url)?.normalize(html))
}

fn is_left_alone(value: &str) -> bool {
    let value = value.trim_start();
    value.is_empty()
        || value.starts_with('#')
        || value.starts_with("//")
        || value.contains("{{")
        || value.contains("{%")
        || has_scheme(value)
}

/// `scheme:` prefix per RFC 3986 (`http:`, `mailto:`, `data:`, ...).
fn has_scheme(value: &str) -> bool {
    let Some((scheme, _)) = value.split_once(':') else {
        return false;
    };
    let mut chars = scheme.chars();
    chars.next().is_some_and(|c| c.is_ascii_alphabetic())
        && chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.'))
}

/// Give `<img>`, `<br>` and `<hr>` a ` />` ending unless they already have one.
fn close_void_elements(html: &str) -> String {
    let re = Regex::new(r"(?i)<(img|br|hr)\b([^>]*)>").expect("valid regex");
    re.replace_all(html, |caps: &Captures| {
        let attrs = caps[2].trim_end();
        if attrs.ends_with('/') {
            caps[0].to_string()
        } else {
            format!("<{}{attrs} />", &caps[1])
        }
    })
    .into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    const BASE: &str = "https://example.com/";

    fn run(html: &str) -> String {
        normalize(html, BASE).unwrap()
    }

    #[test]
    fn test_assets_src_becomes_absolute() {
        let result = run(r#"<p><img src="assets/logo.png" alt="logo"></p>"#);
        assert_eq!(
            result,
            r#"<p><img src="https://example.com/assets/logo.png" alt="logo" /></p>"#
        );
    }

    #[test]
    fn test_relative_href_resolved_against_base() {
        let normalizer = AbsoluteLinkNormalizer::new("https://example.com/site").unwrap();
        let result = normalizer.normalize(r#"<a href="about/team">Team</a> <a href="/root">Root</a>"#);
        assert_eq!(
            result,
            r#"<a href="https://example.com/site/about/team">Team</a> <a href="https://example.com/root">Root</a>"#
        );
    }

    #[test]
    fn test_single_quoted_urls_become_absolute() {
        let result = run("<img src='assets/logo.png'><a href='page'>p</a>");
        assert_eq!(
            result,
            "<img src='https://example.com/assets/logo.png' /><a href='https://example.com/page'>p</a>"
        );
    }

    #[test]
    fn test_mixed_quotes_keep_their_style() {
        let result = run(r#"<a href='it"s' title="x">a</a><img src="a.png" alt='b'>"#);
        assert_eq!(
            result,
            r#"<a href='https://example.com/it%22s' title="x">a</a><img src="https://example.com/a.png" alt='b' />"#
        );
    }

    #[test]
    fn test_absolute_urls_untouched() {
        let html = r##"<a href="https://other.org/x">A</a><a href="mailto:hi@example.com">M</a><a href="#top">T</a><img src="//cdn.example.org/i.png" /><a href="tel:+123">P</a>"##;
        assert_eq!(run(html), html);
    }

    #[test]
    fn test_template_placeholders_untouched() {
        let html = r#"<a href="{{ unsubscribe_link }}">Unsubscribe</a>"#;
        assert_eq!(run(html), html);
    }

    #[test]
    fn test_void_elements_closed() {
        assert_eq!(run("a<br>b"), "a<br />b");
        assert_eq!(run("<HR class=\"x\">"), "<HR class=\"x\" />");
        assert_eq!(run("<br >"), "<br />");
    }

    #[test]
    fn test_self_closed_void_elements_untouched() {
        assert_eq!(run("<br/><br />"), "<br/><br />");
        let html = r#"<img src="https://example.com/a.png" />"#;
        assert_eq!(run(html), html);
    }

    #[test]
    fn test_similar_tags_untouched() {
        let html = "<brand>x</brand><html><header></header></html>";
        assert_eq!(run(html), html);
    }

    #[test]
    fn test_normalize_idempotent() {
        let inputs = [
            "",
            "plain text",
            r#"<p><img src="assets/a.png"><br><hr><a href="page">p</a></p>"#,
            r#"<img src="/x.png" alt="a"><br/><img src="https://e.com/y.png">"#,
            "<table background=\"bg.png\"><tr><td><form action=\"submit\"></form></td></tr></table>",
            "<img src='assets/logo.png'><a href='page'>p</a><a href='#top'>t</a>",
        ];
        for html in inputs {
            let once = run(html);
            assert_eq!(run(&once), once, "not idempotent for {html:?}");
            assert!(!once.contains("//>"));
        }
    }

    #[test]
    fn test_invalid_base_url() {
        let err = AbsoluteLinkNormalizer::new("not a url").err().unwrap();
        assert!(matches!(err, AppError::MalformedInput(_)));
        assert!(AbsoluteLinkNormalizer::new("mailto:x@example.com").is_err());
    }

    #[test]
    fn test_has_scheme() {
        assert!(has_scheme("https://x"));
        assert!(has_scheme("data:image/png;base64,AAA"));
        assert!(!has_scheme("assets/a:b.png"));
        assert!(!has_scheme("/path"));
        assert!(!has_scheme("1http://x"));
    }
}
