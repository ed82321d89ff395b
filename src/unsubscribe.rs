use std::collections::BTreeSet;

use chrono::{DateTime, Duration, Utc};
use uuid::Uuid;

use crate::config::{with_trailing_slash, SiteConfig};
use crate::error::AppError;
use crate::security;
use crate::store::{ListId, Recipient, RecipientStore};

/// Path under which unsubscribe links are served:
/// `<base>unsubscribe/index/<hash>/<comma-separated list ids>`.
pub const UNSUBSCRIBE_PATH: &str = "unsubscribe/index";

/// Placeholder hash carried by preview links. It never matches a recipient.
pub const FAKE_VALIDATE_HASH: &str = "fackedvalidatehash";

fn unsubscribe_url<'a>(
    base: &str,
    hash: &str,
    lists: impl Iterator<Item = &'a ListId>,
) -> String {
    let ids = lists.map(ToString::to_string).collect::<Vec<_>>().join(",");
    format!("{base}{UNSUBSCRIBE_PATH}/{hash}/{ids}")
}

pub struct UnsubscribeLinkBuilder<'a> {
    recipients: &'a dyn RecipientStore,
    site: &'a dyn SiteConfig,
}

impl<'a> UnsubscribeLinkBuilder<'a> {
    pub fn new(recipients: &'a dyn RecipientStore, site: &'a dyn SiteConfig) -> Self {
        Self { recipients, site }
    }

    pub async fn build_link(
        &self,
        recipient: Option<&Recipient>,
        sent_to_lists: &BTreeSet<ListId>,
        fake: bool,
        base_url_override: Option<&str>,
    ) -> Result<String, AppError> {
        self.build_link_at(recipient, sent_to_lists, fake, base_url_override, Utc::now())
            .await
    }

    /// Build the unsubscribe link as of `now`.
    ///
    /// A fake (preview) link carries [`FAKE_VALIDATE_HASH`] and every list of
    /// the send, always points at the site's own base URL, and touches no
    /// state. A real link is scoped to the lists both
    /// the recipient and the send share, and issues the recipient's hash or
    /// slides its expiry to `now` plus the configured lifetime.
    pub async fn build_link_at(
        &self,
        recipient: Option<&Recipient>,
        sent_to_lists: &BTreeSet<ListId>,
        fake: bool,
        base_url_override: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<String, AppError> {
        if fake {
            return Ok(unsubscribe_url(
                &self.site.base_url(),
                FAKE_VALIDATE_HASH,
                sent_to_lists.iter(),
            ));
        }

        let base = base_url_override.map_or_else(|| self.site.base_url(), with_trailing_slash);

        let recipient = recipient.ok_or_else(|| {
            AppError::ContractViolation(
                "unsubscribe link requested for a real send without a recipient".to_string(),
            )
        })?;

        let days = self.site.unsubscribe_link_alive_days();
        if days <= 0 {
            return Err(AppError::ContractViolation(format!(
                "unsubscribe link lifetime must be positive, got {days} days"
            )));
        }

        let memberships = self.recipients.list_memberships(recipient.id).await?;
        let scope: Vec<ListId> = memberships.intersection(sent_to_lists).copied().collect();

        let expires_at = now + Duration::days(days);
        let current = self.recipients.get_hash(recipient.id).await?;
        let candidate = if current.has_hash() {
            current.hash.clone()
        } else {
            security::generate_validate_hash()
        };
        let token = self
            .recipients
            .issue_or_extend_hash(recipient.id, &candidate, expires_at)
            .await?;

        if current.has_hash() {
            tracing::debug!(
                "Extended unsubscribe hash of {} until {expires_at}",
                recipient.email
            );
        } else {
            tracing::info!(
                "Issued unsubscribe hash for {} until {expires_at}",
                recipient.email
            );
        }

        Ok(unsubscribe_url(&base, &token.hash, scope.iter()))
    }
}

/// An unsubscribe link as received back from a recipient.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UnsubscribeRequest {
    pub hash: String,
    pub lists: BTreeSet<ListId>,
}

impl UnsubscribeRequest {
    pub fn is_preview(&self) -> bool {
        self.hash == FAKE_VALIDATE_HASH
    }
}

/// Permission to remove `recipient_id` from `lists`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UnsubscribeGrant {
    pub recipient_id: Uuid,
    pub lists: BTreeSet<ListId>,
}

/// Parse `unsubscribe/index/<hash>/<ids>` (leading and trailing slashes allowed).
pub fn parse_unsubscribe_path(path: &str) -> Result<UnsubscribeRequest, AppError> {
    let malformed = || AppError::MalformedInput(format!("unsubscribe path {path:?}"));

    let rest = path
        .trim_matches('/')
        .strip_prefix(UNSUBSCRIBE_PATH)
        .and_then(|rest| rest.strip_prefix('/'))
        .ok_or_else(malformed)?;
    let (hash, ids) = rest.split_once('/').unwrap_or((rest, ""));

    if hash.is_empty() || !hash.chars().all(|c| c.is_ascii_alphanumeric()) {
        return Err(malformed());
    }

    let lists = ids
        .split(',')
        .filter(|id| !id.is_empty())
        .map(|id| id.parse::<ListId>().map_err(|_| malformed()))
        .collect::<Result<BTreeSet<_>, _>>()?;

    Ok(UnsubscribeRequest {
        hash: hash.to_string(),
        lists,
    })
}

/// Check a received unsubscribe link. Returns `None` for previews, unknown
/// or expired hashes. Lists the recipient is not on are dropped.
pub async fn resolve_unsubscribe(
    recipients: &dyn RecipientStore,
    request: &UnsubscribeRequest,
    now: DateTime<Utc>,
) -> Result<Option<UnsubscribeGrant>, AppError> {
    if request.is_preview() {
        return Ok(None);
    }

    let Some((recipient_id, token)) = recipients.find_by_hash(&request.hash).await? else {
        return Ok(None);
    };

    if !security::verify_hash(&request.hash, &token.hash) || !token.is_valid_at(now) {
        tracing::info!("Rejected unsubscribe hash for recipient {recipient_id}");
        return Ok(None);
    }

    let memberships = recipients.list_memberships(recipient_id).await?;
    Ok(Some(UnsubscribeGrant {
        recipient_id,
        lists: memberships.intersection(&request.lists).copied().collect(),
    }))
}
