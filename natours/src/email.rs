//! Outgoing transactional email.
//!
//! Every message is rendered into an [`EmailMessage`] by the default trait
//! methods; providers only implement [`EmailProvider::deliver`].

use crate::config::EmailConfig;
use crate::models::{Booking, Refund};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use lettre::message::header::ContentType;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use tracing::info;

/// Email delivery errors
#[derive(Debug, thiserror::Error)]
pub enum EmailError {
    /// Sender or recipient address rejected
    #[error("invalid address: {0}")]
    InvalidAddress(String),
    /// Message could not be assembled
    #[error("failed to build email: {0}")]
    Build(String),
    /// Relay refused or unreachable
    #[error("failed to send email: {0}")]
    Transport(String),
}

/// A rendered plain-text email.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EmailMessage {
    /// Recipient address
    pub to: String,
    /// Subject line
    pub subject: String,
    /// Plain-text body
    pub body: String,
    /// Primary call-to-action link, if any
    pub link: Option<String>,
}

/// Sends the emails Natours needs.
#[async_trait]
pub trait EmailProvider: Send + Sync {
    /// Hand a rendered message to the transport.
    ///
    /// # Errors
    ///
    /// Returns [`EmailError`] when the message cannot be delivered.
    async fn deliver(&self, message: EmailMessage) -> Result<(), EmailError>;

    /// Passwordless sign-in link.
    async fn send_magic_link(
        &self,
        to: &str,
        link: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<(), EmailError> {
        let minutes = (expires_at - Utc::now()).num_minutes().max(1);
        self.deliver(EmailMessage {
            to: to.to_string(),
            subject: "Your Natours sign-in link".into(),
            body: format!(
                "Click the link below to sign in to Natours:\n\n{link}\n\n\
                 The link expires in {minutes} minutes. If you did not ask for it, ignore this email."
            ),
            link: Some(link.to_string()),
        })
        .await
    }

    /// Greeting for a new account.
    async fn send_welcome(&self, to: &str, name: &str, account_url: &str) -> Result<(), EmailError> {
        let first_name = name.split_whitespace().next().unwrap_or(name);
        self.deliver(EmailMessage {
            to: to.to_string(),
            subject: "Welcome to the Natours family!".into(),
            body: format!(
                "Hi {first_name},\n\nWelcome to Natours, we're glad to have you. \
                 Your account lives at {account_url}."
            ),
            link: Some(account_url.to_string()),
        })
        .await
    }

    /// Receipt after a booking is recorded.
    async fn send_booking_confirmation(
        &self,
        to: &str,
        tour_name: &str,
        booking: &Booking,
    ) -> Result<(), EmailError> {
        self.deliver(EmailMessage {
            to: to.to_string(),
            subject: format!("Your booking for {tour_name}"),
            body: format!(
                "You're going on {tour_name}!\n\nDeparture: {}\nTravelers: {}\nTotal paid: {}\nBooking: {}",
                booking.start_date.format("%B %-d, %Y"),
                booking.num_participants,
                booking.price,
                booking.id,
            ),
            link: None,
        })
        .await
    }

    /// Notice that a refund was processed or rejected.
    async fn send_refund_update(&self, to: &str, refund: &Refund) -> Result<(), EmailError> {
        self.deliver(EmailMessage {
            to: to.to_string(),
            subject: format!("Your refund request was {}", refund.status),
            body: format!(
                "Your refund of {} for booking {} is now {}.",
                refund.amount, refund.booking, refund.status
            ),
            link: None,
        })
        .await
    }
}

/// Console email provider (logs instead of sending)
#[derive(Debug, Clone, Default)]
pub struct ConsoleEmailProvider;

#[async_trait]
impl EmailProvider for ConsoleEmailProvider {
    async fn deliver(&self, message: EmailMessage) -> Result<(), EmailError> {
        info!(
            to = %message.to,
            subject = %message.subject,
            "\n\n{}\n",
            message.body
        );
        Ok(())
    }
}

/// SMTP email provider using Lettre.
#[derive(Clone)]
pub struct SmtpEmailProvider {
    mailer: AsyncSmtpTransport<Tokio1Executor>,
    from: String,
}

impl SmtpEmailProvider {
    /// Build a STARTTLS relay transport from configuration.
    ///
    /// # Errors
    ///
    /// Returns error if the relay host is missing or invalid.
    pub fn from_config(config: &EmailConfig) -> Result<Self, EmailError> {
        let host = config
            .smtp_host
            .as_deref()
            .ok_or_else(|| EmailError::Transport("SMTP_HOST not set".into()))?;

        let mut builder = AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(host)
            .map_err(|e| EmailError::Transport(format!("SMTP relay error: {e}")))?
            .port(config.smtp_port);
        if let (Some(user), Some(password)) = (&config.smtp_username, &config.smtp_password) {
            builder = builder.credentials(Credentials::new(user.clone(), password.clone()));
        }

        Ok(Self {
            mailer: builder.build(),
            from: format!("{} <{}>", config.from_name, config.from_address),
        })
    }
}

#[async_trait]
impl EmailProvider for SmtpEmailProvider {
    async fn deliver(&self, message: EmailMessage) -> Result<(), EmailError> {
        let email = Message::builder()
            .from(
                self.from
                    .parse()
                    .map_err(|e| EmailError::InvalidAddress(format!("{}: {e}", self.from)))?,
            )
            .to(message
                .to
                .parse()
                .map_err(|e| EmailError::InvalidAddress(format!("{}: {e}", message.to)))?)
            .subject(message.subject)
            .header(ContentType::TEXT_PLAIN)
            .body(message.body)
            .map_err(|e| EmailError::Build(e.to_string()))?;

        self.mailer
            .send(email)
            .await
            .map_err(|e| EmailError::Transport(e.to_string()))?;
        Ok(())
    }
}
