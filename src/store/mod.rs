use std::collections::BTreeSet;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::error::StoreError;
use crate::tracking::TRACKED_LINK_PATH;

pub mod memory;
pub mod postgres;

pub type ListId = i64;

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct Recipient {
    pub id: Uuid,
    pub email: String,
    pub first_name: String,
    pub surname: String,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ContentFormat {
    #[default]
    Html,
    Markdown,
}

impl ContentFormat {
    pub fn parse(value: &str) -> Self {
        if value.eq_ignore_ascii_case("markdown") {
            Self::Markdown
        } else {
            Self::Html
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Html => "html",
            Self::Markdown => "markdown",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Newsletter {
    pub id: Uuid,
    pub subject: String,
    pub send_from: String,
    pub content: String,
    pub content_format: ContentFormat,
    /// Optional layout wrapped around the content; it receives `{{ content }}`.
    pub layout_html: Option<String>,
    pub mailing_lists: BTreeSet<ListId>,
}

/// One distinct URL appearing in one newsletter's content.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TrackedLink {
    pub newsletter_id: Uuid,
    pub original: String,
    pub token: String,
}

impl TrackedLink {
    /// Public redirect URL for this link. `base_url` ends with `/`.
    pub fn redirect_url(&self, base_url: &str) -> String {
        format!("{base_url}{TRACKED_LINK_PATH}/{}", self.token)
    }
}

/// A recipient's standing permission to unsubscribe.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct UnsubscribeToken {
    pub hash: String,
    pub expires_at: Option<DateTime<Utc>>,
}

impl UnsubscribeToken {
    pub fn has_hash(&self) -> bool {
        !self.hash.is_empty()
    }

    pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        self.has_hash() && self.expires_at.is_some_and(|expires_at| now < expires_at)
    }
}

#[async_trait]
pub trait TrackedLinkStore: Send + Sync {
    /// Return the link for `(newsletter_id, original)`, creating it if needed.
    /// Must be atomic: concurrent callers get the same record.
    async fn find_or_create(
        &self,
        newsletter_id: Uuid,
        original: &str,
    ) -> Result<TrackedLink, StoreError>;

    async fn find_by_token(&self, token: &str) -> Result<Option<TrackedLink>, StoreError>;
}

#[async_trait]
pub trait RecipientStore: Send + Sync {
    async fn list_memberships(&self, recipient_id: Uuid) -> Result<BTreeSet<ListId>, StoreError>;

    async fn get_hash(&self, recipient_id: Uuid) -> Result<UnsubscribeToken, StoreError>;

    /// Store `candidate` unless the recipient already holds a non-empty hash,
    /// and move the expiry to `expires_at` (never backwards for a kept hash).
    /// Returns the token as persisted. Must be a single atomic update.
    async fn issue_or_extend_hash(
        &self,
        recipient_id: Uuid,
        candidate: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<UnsubscribeToken, StoreError>;

    async fn find_by_hash(
        &self,
        hash: &str,
    ) -> Result<Option<(Uuid, UnsubscribeToken)>, StoreError>;
}

#[async_trait]
pub trait NewsletterStore: Send + Sync {
    async fn get_newsletter(&self, id: Uuid) -> Result<Option<Newsletter>, StoreError>;

    /// Distinct recipients subscribed to at least one of `lists`.
    async fn recipients_for_lists(
        &self,
        lists: &BTreeSet<ListId>,
    ) -> Result<Vec<Recipient>, StoreError>;
}
