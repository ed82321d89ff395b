use std::collections::BTreeSet;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use super::{
    ContentFormat, ListId, Newsletter, NewsletterStore, Recipient, RecipientStore, TrackedLink,
    TrackedLinkStore, UnsubscribeToken,
};
use crate::error::StoreError;
use crate::security;

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl TrackedLinkStore for PgStore {
    async fn find_or_create(
        &self,
        newsletter_id: Uuid,
        original: &str,
    ) -> Result<TrackedLink, StoreError> {
        // The no-op update makes RETURNING yield the existing row on conflict.
        let (newsletter_id, original, token) = sqlx::query_as::<_, (Uuid, String, String)>(
            "INSERT INTO newsletter_tracked_links (newsletter_id, original, token) VALUES ($1, $2, $3) \
             ON CONFLICT (newsletter_id, original) DO UPDATE SET original = EXCLUDED.original \
             RETURNING newsletter_id, original, token",
        )
        .bind(newsletter_id)
        .bind(original)
        .bind(security::generate_link_token())
        .fetch_one(&self.pool)
        .await?;

        Ok(TrackedLink {
            newsletter_id,
            original,
            token,
        })
    }

    async fn find_by_token(&self, token: &str) -> Result<Option<TrackedLink>, StoreError> {
        let row = sqlx::query_as::<_, (Uuid, String, String)>(
            "SELECT newsletter_id, original, token FROM newsletter_tracked_links WHERE token = $1",
        )
        .bind(token)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|(newsletter_id, original, token)| TrackedLink {
            newsletter_id,
            original,
            token,
        }))
    }
}

#[async_trait]
impl RecipientStore for PgStore {
    async fn list_memberships(&self, recipient_id: Uuid) -> Result<BTreeSet<ListId>, StoreError> {
        let ids = sqlx::query_scalar::<_, i64>(
            "SELECT mailing_list_id FROM recipient_mailing_lists WHERE recipient_id = $1 ORDER BY mailing_list_id",
        )
        .bind(recipient_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(ids.into_iter().collect())
    }

    async fn get_hash(&self, recipient_id: Uuid) -> Result<UnsubscribeToken, StoreError> {
        let (hash, expires_at) = sqlx::query_as::<_, (Option<String>, Option<DateTime<Utc>>)>(
            "SELECT validate_hash, validate_hash_expires_at FROM recipients WHERE id = $1",
        )
        .bind(recipient_id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| StoreError::NotFound(format!("recipient {recipient_id}")))?;

        Ok(UnsubscribeToken {
            hash: hash.unwrap_or_default(),
            expires_at,
        })
    }

    async fn issue_or_extend_hash(
        &self,
        recipient_id: Uuid,
        candidate: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<UnsubscribeToken, StoreError> {
        let (hash, expires_at) = sqlx::query_as::<_, (Option<String>, Option<DateTime<Utc>>)>(
            "UPDATE recipients SET \
                 validate_hash = CASE WHEN COALESCE(validate_hash, '') = '' THEN $2 ELSE validate_hash END, \
                 validate_hash_expires_at = CASE WHEN COALESCE(validate_hash, '') = '' THEN $3 \
                     ELSE GREATEST(COALESCE(validate_hash_expires_at, $3), $3) END \
             WHERE id = $1 \
             RETURNING validate_hash, validate_hash_expires_at",
        )
        .bind(recipient_id)
        .bind(candidate)
        .bind(expires_at)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| StoreError::NotFound(format!("recipient {recipient_id}")))?;

        Ok(UnsubscribeToken {
            hash: hash.unwrap_or_default(),
            expires_at,
        })
    }

    async fn find_by_hash(
        &self,
        hash: &str,
    ) -> Result<Option<(Uuid, UnsubscribeToken)>, StoreError> {
        if hash.is_empty() {
            return Ok(None);
        }

        let row = sqlx::query_as::<_, (Uuid, String, Option<DateTime<Utc>>)>(
            "SELECT id, validate_hash, validate_hash_expires_at FROM recipients WHERE validate_hash = $1",
        )
        .bind(hash)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|(id, hash, expires_at)| (id, UnsubscribeToken { hash, expires_at })))
    }
}

#[async_trait]
impl NewsletterStore for PgStore {
    async fn get_newsletter(&self, id: Uuid) -> Result<Option<Newsletter>, StoreError> {
        let row = sqlx::query_as::<_, (Uuid, String, String, String, String, Option<String>)>(
            "SELECT id, subject, send_from, content, content_format, layout_html FROM newsletters WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        let Some((id, subject, send_from, content, content_format, layout_html)) = row else {
            return Ok(None);
        };

        let mailing_lists = sqlx::query_scalar::<_, i64>(
            "SELECT mailing_list_id FROM newsletter_mailing_lists WHERE newsletter_id = $1 ORDER BY mailing_list_id",
        )
        .bind(id)
        .fetch_all(&self.pool)
        .await?;

        Ok(Some(Newsletter {
            id,
            subject,
            send_from,
            content,
            content_format: ContentFormat::parse(&content_format),
            layout_html,
            mailing_lists: mailing_lists.into_iter().collect(),
        }))
    }

    async fn recipients_for_lists(
        &self,
        lists: &BTreeSet<ListId>,
    ) -> Result<Vec<Recipient>, StoreError> {
        let ids: Vec<i64> = lists.iter().copied().collect();
        let rows = sqlx::query_as::<_, (Uuid, String, String, String)>(
            "SELECT DISTINCT r.id, r.email, r.first_name, r.surname FROM recipients r \
             JOIN recipient_mailing_lists m ON m.recipient_id = r.id \
             WHERE m.mailing_list_id = ANY($1) \
             ORDER BY r.email",
        )
        .bind(&ids)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|(id, email, first_name, surname)| Recipient {
                id,
                email,
                first_name,
                surname,
            })
            .collect())
    }
}
