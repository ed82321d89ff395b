use uuid::Uuid;

use crate::email::EmailService;
use crate::error::{AppError, StoreError};
use crate::newsletter::{NewsletterRenderer, RenderedEmail};
use crate::store::{NewsletterStore, Recipient};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SendSummary {
    pub sent: usize,
    pub failed: usize,
}

/// Render and send a newsletter to every recipient of its mailing lists.
///
/// A recipient whose render or delivery fails is logged and counted, and the
/// loop moves on; nothing is retried. Contract violations abort the send.
pub async fn send_newsletter(
    renderer: &NewsletterRenderer,
    newsletters: &dyn NewsletterStore,
    mailer: &dyn EmailService,
    newsletter_id: Uuid,
    rate_limit_ms: u64,
) -> Result<SendSummary, AppError> {
    let newsletter = newsletters
        .get_newsletter(newsletter_id)
        .await?
        .ok_or_else(|| StoreError::NotFound(format!("newsletter {newsletter_id}")))?;

    let recipients = newsletters
        .recipients_for_lists(&newsletter.mailing_lists)
        .await?;
    tracing::info!(
        "Sending newsletter {newsletter_id} to {} recipients",
        recipients.len()
    );

    let mut summary = SendSummary::default();

    for recipient in &recipients {
        let email = match renderer.render(&newsletter, Some(recipient), false).await {
            Ok(email) => email,
            Err(e) if e.is_contract_violation() => return Err(e),
            Err(e) => {
                tracing::error!("Failed to render newsletter for {}: {e}", recipient.email);
                summary.failed += 1;
                continue;
            }
        };

        match mailer.send(&email).await {
            Ok(()) => summary.sent += 1,
            Err(e) => {
                tracing::error!("Failed to send to {}: {e}", recipient.email);
                summary.failed += 1;
            }
        }

        if rate_limit_ms > 0 {
            tokio::time::sleep(std::time::Duration::from_millis(rate_limit_ms)).await;
        }
    }

    tracing::info!(
        "Newsletter {newsletter_id} send complete: {} sent, {} failed",
        summary.sent,
        summary.failed
    );

    Ok(summary)
}

/// Render a newsletter in preview mode. With `to` set the preview is also
/// mailed to that address.
pub async fn send_preview(
    renderer: &NewsletterRenderer,
    newsletters: &dyn NewsletterStore,
    mailer: &dyn EmailService,
    newsletter_id: Uuid,
    to: Option<&str>,
) -> Result<RenderedEmail, AppError> {
    let newsletter = newsletters
        .get_newsletter(newsletter_id)
        .await?
        .ok_or_else(|| StoreError::NotFound(format!("newsletter {newsletter_id}")))?;

    let preview_recipient = to.map(|email| Recipient {
        email: email.to_string(),
        ..Recipient::default()
    });
    let email = renderer
        .render(&newsletter, preview_recipient.as_ref(), true)
        .await?;

    if email.to.is_some() {
        mailer.send(&email).await?;
        tracing::info!("Sent preview of newsletter {newsletter_id} to {to:?}");
    }

    Ok(email)
}
