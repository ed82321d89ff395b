use std::sync::Arc;

use crate::config::{RenderConfig, SiteConfig};
use crate::error::AppError;
use crate::normalize::AbsoluteLinkNormalizer;
use crate::store::{Newsletter, Recipient, RecipientStore, TrackedLinkStore};
use crate::template::{TemplateData, TemplateEngine};
use crate::tracking::track_links;
use crate::unsubscribe::UnsubscribeLinkBuilder;

/// Pipeline stages, in the order they run.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RenderStage {
    Compose,
    InjectUnsubscribe,
    TrackLinks,
    Normalize,
    Done,
}

/// A message ready to hand to the mail transport.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RenderedEmail {
    /// `None` for previews rendered without a recipient.
    pub to: Option<String>,
    pub from: String,
    pub subject: String,
    pub html_body: String,
    pub unsubscribe_link: String,
    /// Stages that actually ran. Disabled stages are absent.
    pub stages: Vec<RenderStage>,
}

#[derive(Clone)]
pub struct NewsletterRenderer {
    config: RenderConfig,
    site: Arc<dyn SiteConfig>,
    templates: Arc<dyn TemplateEngine>,
    links: Arc<dyn TrackedLinkStore>,
    recipients: Arc<dyn RecipientStore>,
}

impl NewsletterRenderer {
    pub fn new(
        config: RenderConfig,
        site: Arc<dyn SiteConfig>,
        templates: Arc<dyn TemplateEngine>,
        links: Arc<dyn TrackedLinkStore>,
        recipients: Arc<dyn RecipientStore>,
    ) -> Self {
        Self {
            config,
            site,
            templates,
            links,
            recipients,
        }
    }

    pub fn config(&self) -> &RenderConfig {
        &self.config
    }

    /// Render `newsletter` for `recipient`.
    ///
    /// With `fake` set (previews and test sends) no recipient state is
    /// touched and links are not tracked; `recipient` may then be `None`.
    /// A real render without a recipient is a contract violation.
    pub async fn render(
        &self,
        newsletter: &Newsletter,
        recipient: Option<&Recipient>,
        fake: bool,
    ) -> Result<RenderedEmail, AppError> {
        if !fake && recipient.is_none() {
            return Err(AppError::ContractViolation(format!(
                "newsletter {} rendered for a real send without a recipient",
                newsletter.id
            )));
        }

        let mut stages = vec![RenderStage::Compose];
        let body = self.templates.render_body(newsletter)?;
        let base_url = self.site.base_url();

        let unsubscribe_link =
            UnsubscribeLinkBuilder::new(self.recipients.as_ref(), self.site.as_ref())
                .build_link(
                    recipient,
                    &newsletter.mailing_lists,
                    fake,
                    self.config.static_base_url.as_deref(),
                )
                .await?;

        let blank = Recipient::default();
        let recipient = recipient.unwrap_or(&blank);
        let to = (!recipient.email.is_empty()).then(|| recipient.email.clone());
        let mut html = self.templates.apply_template_data(
            &body,
            &TemplateData {
                to: &recipient.email,
                from: &newsletter.send_from,
                subject: &newsletter.subject,
                base_url: &base_url,
                unsubscribe_link: &unsubscribe_link,
                is_email: true,
                recipient,
            },
        )?;
        stages.push(RenderStage::InjectUnsubscribe);

        if self.config.link_tracking_enabled && !fake {
            html = track_links(
                &html,
                newsletter.id,
                self.links.as_ref(),
                &base_url,
                &[unsubscribe_link.as_str()],
            )
            .await?;
            stages.push(RenderStage::TrackLinks);
        }

        if self.config.convert_to_absolute_links {
            html = AbsoluteLinkNormalizer::new(&base_url)?.normalize(&html);
            stages.push(RenderStage::Normalize);
        }

        stages.push(RenderStage::Done);
        tracing::debug!(
            "Rendered newsletter {} for {:?} ({} stages)",
            newsletter.id,
            to,
            stages.len()
        );

        Ok(RenderedEmail {
            to,
            from: newsletter.send_from.clone(),
            subject: newsletter.subject.clone(),
            html_body: html,
            unsubscribe_link,
            stages,
        })
    }
}

#[cfg(test)]
pub mod tests {
    use super::*;
    use crate::config::tests::FixedSite;
    use crate::store::memory::tests::recipient;
    use crate::store::memory::MemoryStore;
    use crate::store::{ContentFormat, ListId};
    use crate::template::TeraTemplateEngine;
    use std::collections::BTreeSet;
    use uuid::Uuid;

    pub const BASE: &str = "https://example.com/";

    pub fn renderer(store: &Arc<MemoryStore>, config: RenderConfig) -> NewsletterRenderer {
        NewsletterRenderer::new(
            config,
            Arc::new(FixedSite::new(BASE)),
            Arc::new(TeraTemplateEngine),
            store.clone(),
            store.clone(),
        )
    }

    pub fn newsletter(content: &str, lists: &[ListId]) -> Newsletter {
        Newsletter {
            id: Uuid::new_v4(),
            subject: "Monthly news".to_string(),
            send_from: "news@example.com".to_string(),
            content: content.to_string(),
            content_format: ContentFormat::Html,
            layout_html: None,
            mailing_lists: lists.iter().copied().collect(),
        }
    }

    fn tracking_only() -> RenderConfig {
        RenderConfig {
            convert_to_absolute_links: false,
            ..RenderConfig::default()
        }
    }

    #[tokio::test]
    async fn test_end_to_end_scenario() {
        let store = Arc::new(MemoryStore::new());
        let r = recipient("reader@example.com");
        store.add_recipient(r.clone(), [1]);
        let n = newsletter(
            r#"<p>See <a href="assets/promo.png">this</a> and <a href="http://ext.com">ext</a></p><p><img src="assets/banner.png"></p>"#,
            &[1],
        );

        let email = renderer(&store, RenderConfig::default())
            .render(&n, Some(&r), false)
            .await
            .unwrap();

        let links = store.tracked_links(n.id);
        assert_eq!(links.len(), 2);
        assert_ne!(links[0].token, links[1].token);
        for link in &links {
            assert!(email
                .html_body
                .contains(&format!("href=\"{}\"", link.redirect_url(BASE))));
        }
        assert!(!email.html_body.contains("href=\"assets/promo.png\""));
        assert!(!email.html_body.contains("href=\"http://ext.com\""));
        assert!(email
            .html_body
            .contains(r#"<img src="https://example.com/assets/banner.png" />"#));
        assert!(email.html_body.contains(">this</a>"));
        assert!(email.html_body.contains(">ext</a>"));
        assert_eq!(
            email.stages,
            vec![
                RenderStage::Compose,
                RenderStage::InjectUnsubscribe,
                RenderStage::TrackLinks,
                RenderStage::Normalize,
                RenderStage::Done,
            ]
        );
        assert_eq!(email.to.as_deref(), Some("reader@example.com"));
        assert_eq!(email.subject, "Monthly news");
    }

    #[tokio::test]
    async fn test_fake_render_mutates_nothing() {
        let store = Arc::new(MemoryStore::new());
        let r = recipient("reader@example.com");
        store.add_recipient(r.clone(), [1]);
        let n = newsletter(r#"<a href="https://x.com">X</a>"#, &[1, 2]);

        let email = renderer(&store, RenderConfig::default())
            .render(&n, Some(&r), true)
            .await
            .unwrap();

        assert!(store.tracked_links(n.id).is_empty());
        assert!(!store.get_hash(r.id).await.unwrap().has_hash());
        assert!(email.html_body.contains(r#"href="https://x.com""#));
        assert_eq!(
            email.unsubscribe_link,
            "https://example.com/unsubscribe/index/fackedvalidatehash/1,2"
        );
        assert!(!email.stages.contains(&RenderStage::TrackLinks));
    }

    #[tokio::test]
    async fn test_fake_render_without_recipient() {
        let store = Arc::new(MemoryStore::new());
        let n = newsletter("<p>Hello {{ recipient.first_name }}</p>", &[1]);

        let email = renderer(&store, RenderConfig::default())
            .render(&n, None, true)
            .await
            .unwrap();
        assert_eq!(email.to, None);
        assert_eq!(email.html_body, "<p>Hello </p>");
    }

    #[tokio::test]
    async fn test_real_render_without_recipient_is_contract_violation() {
        let store = Arc::new(MemoryStore::new());
        let n = newsletter("<p>Hi</p>", &[1]);

        let err = renderer(&store, RenderConfig::default())
            .render(&n, None, false)
            .await
            .unwrap_err();
        assert!(err.is_contract_violation());
    }

    #[tokio::test]
    async fn test_unsubscribe_link_is_never_tracked() {
        let store = Arc::new(MemoryStore::new());
        let r = recipient("reader@example.com");
        store.add_recipient(r.clone(), [1, 2]);
        let mut n = newsletter(r#"<p><a href="https://x.com">X</a></p>"#, &[2, 3]);
        n.layout_html = Some(
            r#"{{ content }}<footer><a href="{{ unsubscribe_link }}">Unsubscribe</a></footer>"#
                .to_string(),
        );

        let email = renderer(&store, tracking_only())
            .render(&n, Some(&r), false)
            .await
            .unwrap();

        let hash = store.get_hash(r.id).await.unwrap().hash;
        let expected = format!("https://example.com/unsubscribe/index/{hash}/2");
        assert_eq!(email.unsubscribe_link, expected);
        assert!(email
            .html_body
            .contains(&format!(r#"<a href="{expected}">Unsubscribe</a>"#)));

        let links = store.tracked_links(n.id);
        assert_eq!(links.len(), 1);
        assert_eq!(links[0].original, "https://x.com");
    }

    #[tokio::test]
    async fn test_markup_in_recipient_name_is_escaped_and_not_tracked() {
        let store = Arc::new(MemoryStore::new());
        let r = Recipient {
            first_name: r#"<a href="https://evil.example/phish">claim prize</a>"#.to_string(),
            ..recipient("reader@example.com")
        };
        store.add_recipient(r.clone(), [1]);
        let n = newsletter("<p>Hi {{ recipient.first_name }}</p>", &[1]);

        let email = renderer(&store, RenderConfig::default())
            .render(&n, Some(&r), false)
            .await
            .unwrap();

        assert!(email.html_body.starts_with("<p>Hi &lt;a href="));
        assert!(!email.html_body.contains("<a "));
        assert!(store.tracked_links(n.id).is_empty());
    }

    #[tokio::test]
    async fn test_disabled_stages_are_skipped() {
        let store = Arc::new(MemoryStore::new());
        let r = recipient("reader@example.com");
        store.add_recipient(r.clone(), [1]);
        let html = r#"<p><a href="page">P</a><br></p>"#;
        let n = newsletter(html, &[1]);
        let config = RenderConfig {
            link_tracking_enabled: false,
            convert_to_absolute_links: false,
            static_base_url: None,
        };

        let email = renderer(&store, config)
            .render(&n, Some(&r), false)
            .await
            .unwrap();

        assert_eq!(email.html_body, html);
        assert!(store.tracked_links(n.id).is_empty());
        assert_eq!(
            email.stages,
            vec![
                RenderStage::Compose,
                RenderStage::InjectUnsubscribe,
                RenderStage::Done,
            ]
        );
        // the unsubscribe hash is still issued
        assert!(store.get_hash(r.id).await.unwrap().has_hash());
    }

    #[tokio::test]
    async fn test_shortcodes_and_static_base_url() {
        let store = Arc::new(MemoryStore::new());
        let r = recipient("reader@example.com");
        store.add_recipient(r.clone(), [1]);
        let n = newsletter(
            "<p>Dear {{ recipient.first_name }}, see {{ base_url }}</p><p>{{ unsubscribe_link }}</p>",
            &[1],
        );
        let config = RenderConfig {
            static_base_url: Some("https://pinned.example.org/".to_string()),
            ..RenderConfig::default()
        };

        let email = renderer(&store, config)
            .render(&n, Some(&r), false)
            .await
            .unwrap();

        assert!(email.html_body.contains("Dear Ada, see https://example.com/"));
        assert!(email
            .unsubscribe_link
            .starts_with("https://pinned.example.org/unsubscribe/index/"));
        assert!(email.html_body.contains(&email.unsubscribe_link));
    }

    #[tokio::test]
    async fn test_two_recipients_share_tracked_links() {
        let store = Arc::new(MemoryStore::new());
        let a = recipient("a@example.com");
        let b = recipient("b@example.com");
        store.add_recipient(a.clone(), [1]);
        store.add_recipient(b.clone(), [1]);
        let n = newsletter(r#"<a href="https://x.com">X</a>"#, &[1]);
        let renderer = renderer(&store, RenderConfig::default());

        let first = renderer.render(&n, Some(&a), false).await.unwrap();
        let second = renderer.render(&n, Some(&b), false).await.unwrap();

        assert_eq!(first.html_body, second.html_body);
        assert_ne!(first.unsubscribe_link, second.unsubscribe_link);
        assert_eq!(store.tracked_links(n.id).len(), 1);
    }

    #[tokio::test]
    async fn test_concurrent_renders_create_one_link() {
        let store = Arc::new(MemoryStore::new());
        let n = newsletter(r#"<a href="https://x.com">X</a>"#, &[1]);
        let renderer = renderer(&store, RenderConfig::default());
        let mut handles = Vec::new();
        for i in 0..8 {
            let r = recipient(&format!("r{i}@example.com"));
            store.add_recipient(r.clone(), [1]);
            let renderer = renderer.clone();
            let n = n.clone();
            handles.push(tokio::spawn(async move {
                renderer.render(&n, Some(&r), false).await.unwrap()
            }));
        }
        let mut bodies = BTreeSet::new();
        for handle in handles {
            bodies.insert(handle.await.unwrap().html_body);
        }
        assert_eq!(bodies.len(), 1);
        assert_eq!(store.tracked_links(n.id).len(), 1);
    }

    #[tokio::test]
    async fn test_markdown_newsletter() {
        let store = Arc::new(MemoryStore::new());
        let r = recipient("reader@example.com");
        store.add_recipient(r.clone(), [1]);
        let mut n = newsletter("Read [the post](blog/post) ![logo](assets/logo.png)", &[1]);
        n.content_format = ContentFormat::Markdown;

        let email = renderer(&store, RenderConfig::default())
            .render(&n, Some(&r), false)
            .await
            .unwrap();

        let links = store.tracked_links(n.id);
        assert_eq!(links.len(), 1);
        assert_eq!(links[0].original, "blog/post");
        assert!(email
            .html_body
            .contains(r#"src="https://example.com/assets/logo.png""#));
    }
}
