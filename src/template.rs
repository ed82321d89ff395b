use regex::{NoExpand, Regex};
use serde::Serialize;

use crate::store::{ContentFormat, Newsletter, Recipient};

/// Values bound into a newsletter body before it is sent.
#[derive(Debug, Serialize)]
pub struct TemplateData<'a> {
    pub to: &'a str,
    pub from: &'a str,
    pub subject: &'a str,
    pub base_url: &'a str,
    pub unsubscribe_link: &'a str,
    pub is_email: bool,
    pub recipient: &'a Recipient,
}

pub trait TemplateEngine: Send + Sync {
    /// Turn a newsletter record into its raw HTML body.
    fn render_body(&self, newsletter: &Newsletter) -> Result<String, tera::Error>;

    /// Substitute placeholders such as `{{ recipient.first_name }}` or
    /// `{{ unsubscribe_link }}` in `html`.
    fn apply_template_data(&self, html: &str, data: &TemplateData<'_>)
        -> Result<String, tera::Error>;
}

/// Tera-backed engine. Markdown content goes through comrak first; the
/// optional layout receives the content in place of `{{ content }}`.
#[derive(Clone, Copy, Debug, Default)]
pub struct TeraTemplateEngine;

impl TemplateEngine for TeraTemplateEngine {
    fn render_body(&self, newsletter: &Newsletter) -> Result<String, tera::Error> {
        let content = match newsletter.content_format {
            ContentFormat::Html => newsletter.content.clone(),
            ContentFormat::Markdown => render_markdown(&newsletter.content),
        };

        Ok(match &newsletter.layout_html {
            Some(layout) => wrap_in_layout(layout, &content),
            None => content,
        })
    }

    fn apply_template_data(
        &self,
        html: &str,
        data: &TemplateData<'_>,
    ) -> Result<String, tera::Error> {
        let mut ctx = tera::Context::new();
        // recipient fields are subscriber input; the rest is trusted
        let recipient = escaped_recipient(data.recipient);
        ctx.insert("to", &tera::escape_html(data.to));
        ctx.insert("from", data.from);
        ctx.insert("subject", data.subject);
        ctx.insert("base_url", data.base_url);
        ctx.insert("unsubscribe_link", data.unsubscribe_link);
        ctx.insert("is_email", &data.is_email);
        ctx.insert("recipient", &recipient);
        // older templates address the recipient as `member`
        ctx.insert("member", &recipient);

        tera::Tera::one_off(html, &ctx, false)
    }
}

fn escaped_recipient(recipient: &Recipient) -> Recipient {
    Recipient {
        id: recipient.id,
        email: tera::escape_html(&recipient.email),
        first_name: tera::escape_html(&recipient.first_name),
        surname: tera::escape_html(&recipient.surname),
    }
}

/// Convert Markdown to HTML using comrak. Raw HTML in the source is kept.
pub fn render_markdown(md: &str) -> String {
    use comrak::{markdown_to_html, Options};
    let mut options = Options::default();
    options.extension.strikethrough = true;
    options.extension.table = true;
    options.extension.autolink = true;
    options.render.unsafe_ = true;
    markdown_to_html(md, &options)
}

/// Put `content` where the layout says `{{ content }}`. Other placeholders
/// stay for `apply_template_data`. A layout without the slot gets the
/// content appended.
fn wrap_in_layout(layout: &str, content: &str) -> String {
    let re = Regex::new(r"\{\{\s*content\s*\}\}").expect("valid regex");
    if re.is_match(layout) {
        re.replace_all(layout, NoExpand(content)).into_owned()
    } else {
        format!("{layout}{content}")
    }
}
