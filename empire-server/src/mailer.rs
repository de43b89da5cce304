//! Outbound email seam
//!
//! The newsletter engine hands every message to a [`Mailer`]. The default
//! [`LogMailer`] only records deliveries in the log; a real SMTP or provider
//! backend plugs in behind the same trait.

use async_trait::async_trait;
use empire_common::Result;
use tracing::info;

#[derive(Debug, Clone, PartialEq)]
pub struct OutgoingEmail {
    pub to: String,
    pub subject: String,
    pub html: String,
}

#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send(&self, email: &OutgoingEmail) -> Result<()>;
}

/// Mailer that logs each delivery and always succeeds
#[derive(Debug, Default, Clone, Copy)]
pub struct LogMailer;

#[async_trait]
impl Mailer for LogMailer {
    async fn send(&self, email: &OutgoingEmail) -> Result<()> {
        info!(to = %email.to, subject = %email.subject, bytes = email.html.len(), "Email delivered");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_log_mailer_accepts_everything() {
        let email = OutgoingEmail {
            to: "reader@example.com".to_string(),
            subject: "Hello".to_string(),
            html: "<p>hi</p>".to_string(),
        };
        assert!(LogMailer.send(&email).await.is_ok());
    }
}
