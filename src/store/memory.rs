use std::collections::{BTreeSet, HashMap};
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use super::{
    ListId, Newsletter, NewsletterStore, Recipient, RecipientStore, TrackedLink,
    TrackedLinkStore, UnsubscribeToken,
};
use crate::error::StoreError;
use crate::security;

struct RecipientRow {
    recipient: Recipient,
    lists: BTreeSet<ListId>,
    token: UnsubscribeToken,
}

#[derive(Default)]
struct Inner {
    links: HashMap<(Uuid, String), TrackedLink>,
    recipients: HashMap<Uuid, RecipientRow>,
    newsletters: HashMap<Uuid, Newsletter>,
}

/// Process-local store. Every operation runs inside one lock, which makes
/// `find_or_create` and `issue_or_extend_hash` atomic.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn add_recipient(&self, recipient: Recipient, lists: impl IntoIterator<Item = ListId>) {
        self.lock().recipients.insert(
            recipient.id,
            RecipientRow {
                recipient,
                lists: lists.into_iter().collect(),
                token: UnsubscribeToken::default(),
            },
        );
    }

    pub fn add_newsletter(&self, newsletter: Newsletter) {
        self.lock().newsletters.insert(newsletter.id, newsletter);
    }

    pub fn tracked_links(&self, newsletter_id: Uuid) -> Vec<TrackedLink> {
        let mut links: Vec<TrackedLink> = self
            .lock()
            .links
            .values()
            .filter(|link| link.newsletter_id == newsletter_id)
            .cloned()
            .collect();
        links.sort_by(|a, b| a.original.cmp(&b.original));
        links
    }
}

#[async_trait]
impl TrackedLinkStore for MemoryStore {
    async fn find_or_create(
        &self,
        newsletter_id: Uuid,
        original: &str,
    ) -> Result<TrackedLink, StoreError> {
        let mut inner = self.lock();
        let link = inner
            .links
            .entry((newsletter_id, original.to_string()))
            .or_insert_with(|| TrackedLink {
                newsletter_id,
                original: original.to_string(),
                token: security::generate_link_token(),
            });
        Ok(link.clone())
    }

    async fn find_by_token(&self, token: &str) -> Result<Option<TrackedLink>, StoreError> {
        Ok(self
            .lock()
            .links
            .values()
            .find(|link| link.token == token)
            .cloned())
    }
}

#[async_trait]
impl RecipientStore for MemoryStore {
    async fn list_memberships(&self, recipient_id: Uuid) -> Result<BTreeSet<ListId>, StoreError> {
        self.lock()
            .recipients
            .get(&recipient_id)
            .map(|row| row.lists.clone())
            .ok_or_else(|| StoreError::NotFound(format!("recipient {recipient_id}")))
    }

    async fn get_hash(&self, recipient_id: Uuid) -> Result<UnsubscribeToken, StoreError> {
        self.lock()
            .recipients
            .get(&recipient_id)
            .map(|row| row.token.clone())
            .ok_or_else(|| StoreError::NotFound(format!("recipient {recipient_id}")))
    }

    async fn issue_or_extend_hash(
        &self,
        recipient_id: Uuid,
        candidate: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<UnsubscribeToken, StoreError> {
        let mut inner = self.lock();
        let row = inner
            .recipients
            .get_mut(&recipient_id)
            .ok_or_else(|| StoreError::NotFound(format!("recipient {recipient_id}")))?;

        if row.token.has_hash() {
            row.token.expires_at = Some(row.token.expires_at.map_or(expires_at, |current| {
                current.max(expires_at)
            }));
        } else {
            row.token = UnsubscribeToken {
                hash: candidate.to_string(),
                expires_at: Some(expires_at),
            };
        }
        Ok(row.token.clone())
    }

    async fn find_by_hash(
        &self,
        hash: &str,
    ) -> Result<Option<(Uuid, UnsubscribeToken)>, StoreError> {
        if hash.is_empty() {
            return Ok(None);
        }
        Ok(self
            .lock()
            .recipients
            .values()
            .find(|row| row.token.hash == hash)
            .map(|row| (row.recipient.id, row.token.clone())))
    }
}

#[async_trait]
impl NewsletterStore for MemoryStore {
    async fn get_newsletter(&self, id: Uuid) -> Result<Option<Newsletter>, StoreError> {
        Ok(self.lock().newsletters.get(&id).cloned())
    }

    async fn recipients_for_lists(
        &self,
        lists: &BTreeSet<ListId>,
    ) -> Result<Vec<Recipient>, StoreError> {
        let mut recipients: Vec<Recipient> = self
            .lock()
            .recipients
            .values()
            .filter(|row| !row.lists.is_disjoint(lists))
            .map(|row| row.recipient.clone())
            .collect();
        recipients.sort_by(|a, b| a.email.cmp(&b.email));
        Ok(recipients)
    }
}
