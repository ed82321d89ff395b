use async_trait::async_trait;

use crate::newsletter::RenderedEmail;

#[async_trait]
pub trait EmailService: Send + Sync {
    async fn send(&self, email: &RenderedEmail) -> Result<(), EmailError>;
}

#[derive(Debug, thiserror::Error)]
pub enum EmailError {
    #[error("Failed to send email: {0}")]
    SendFailed(String),

    #[error("Email has no recipient address")]
    NoRecipient,
}

pub struct SmtpEmailService {
    transport: lettre::AsyncSmtpTransport<lettre::Tokio1Executor>,
    from_email: String,
}

impl SmtpEmailService {
    pub fn new(
        host: &str,
        port: u16,
        username: Option<&str>,
        password: Option<&str>,
        use_tls: bool,
        from_email: String,
    ) -> Result<Self, EmailError> {
        use lettre::transport::smtp::authentication::Credentials;
        use lettre::AsyncSmtpTransport;

        let mut builder = if use_tls {
            AsyncSmtpTransport::<lettre::Tokio1Executor>::relay(host)
                .map_err(|e| EmailError::SendFailed(e.to_string()))?
                .port(port)
        } else {
            AsyncSmtpTransport::<lettre::Tokio1Executor>::builder_dangerous(host).port(port)
        };

        if let (Some(user), Some(pass)) = (username, password) {
            builder = builder.credentials(Credentials::new(user.to_string(), pass.to_string()));
        }

        let transport = builder.build();
        Ok(Self {
            transport,
            from_email,
        })
    }
}

#[async_trait]
impl EmailService for SmtpEmailService {
    async fn send(&self, email: &RenderedEmail) -> Result<(), EmailError> {
        use lettre::message::header::ContentType;
        use lettre::{AsyncTransport, Message};

        let to = email.to.as_deref().ok_or(EmailError::NoRecipient)?;
        // a newsletter without its own sender falls back to the configured one
        let from = if email.from.is_empty() {
            self.from_email.as_str()
        } else {
            email.from.as_str()
        };

        let message = Message::builder()
            .from(from.parse().map_err(|e: lettre::address::AddressError| {
                EmailError::SendFailed(e.to_string())
            })?)
            .to(to.parse().map_err(|e: lettre::address::AddressError| {
                EmailError::SendFailed(e.to_string())
            })?)
            .subject(email.subject.as_str())
            .header(ContentType::TEXT_HTML)
            .body(email.html_body.clone())
            .map_err(|e| EmailError::SendFailed(e.to_string()))?;

        self.transport
            .send(message)
            .await
            .map_err(|e| EmailError::SendFailed(e.to_string()))?;

        Ok(())
    }
}
