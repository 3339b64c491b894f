//! Send verification emails to users.

use std::sync::Arc;

use lettre::message::{Mailbox, Message, header};
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Tokio1Executor};
use url::Url;

use crate::config::Mail;
use crate::error::{Result, ServerError};

const VERIFY_PATH: &str = "auth/verify-email";

/// SMTP mail sender. Without SMTP configuration it runs in no-op mode
/// and only logs, which keeps local development mail-server free.
#[derive(Clone, Default)]
pub struct Mailer {
    pub(crate) transport: Option<Arc<AsyncSmtpTransport<Tokio1Executor>>>,
    pub(crate) from: Option<Mailbox>,
    pub(crate) base_url: String,
}

impl Mailer {
    /// Create a new [`Mailer`].
    pub fn new(config: &Mail, base_url: &str) -> Result<Self> {
        let from = config.from.parse::<Mailbox>().map_err(|err| {
            ServerError::Config(format!("invalid mail `from` address: {err}"))
        })?;

        let mut builder =
            AsyncSmtpTransport::<Tokio1Executor>::relay(&config.host)
                .map_err(|err| {
                    ServerError::Config(format!(
                        "cannot configure SMTP relay: {err}"
                    ))
                })?;

        if let Some(port) = config.port {
            builder = builder.port(port);
        }
        if let (Some(username), Some(password)) =
            (&config.username, &config.password)
        {
            builder = builder
                .credentials(Credentials::new(username.clone(), password.clone()));
        }

        tracing::info!(host = config.host, "smtp transport configured");

        Ok(Self {
            transport: Some(Arc::new(builder.build())),
            from: Some(from),
            base_url: base_url.to_owned(),
        })
    }

    /// Build the link a mail client opens to verify an address. The
    /// raw code only ever travels inside this link.
    fn verification_link(&self, email: &str, raw_code: &str) -> Result<Url> {
        let mut url = Url::parse(&self.base_url)
            .and_then(|base| base.join(VERIFY_PATH))
            .map_err(|err| {
                ServerError::Config(format!("invalid instance url: {err}"))
            })?;

        url.query_pairs_mut()
            .append_pair("email", email)
            .append_pair("code", raw_code);

        Ok(url)
    }

    /// Deliver the email-verification message for a freshly issued
    /// code. Delivery failure is an infrastructure fault, not a user
    /// error.
    pub async fn send_verification(
        &self,
        email: &str,
        raw_code: &str,
    ) -> Result<()> {
        let link = self.verification_link(email, raw_code)?;

        let (Some(transport), Some(from)) = (&self.transport, &self.from)
        else {
            tracing::info!(to = email, "mailer in no-op mode, skipping send");
            return Ok(());
        };

        let to = email.parse::<Mailbox>().map_err(|err| {
            ServerError::BadRequest(format!("invalid recipient address: {err}"))
        })?;

        let body = format!(
            "Welcome!\n\n\
            Please open the following link to verify your email address:\n\
            {link}\n\n\
            The link expires in 24 hours. If you did not create an account, \
            you can ignore this email."
        );

        let message = Message::builder()
            .from(from.clone())
            .to(to)
            .subject("Verify your email address")
            .header(header::ContentType::TEXT_PLAIN)
            .body(body)
            .map_err(|err| ServerError::Mail {
                details: format!("cannot build message: {err}"),
            })?;

        transport
            .send(message)
            .await
            .map_err(|err| ServerError::Mail {
                details: err.to_string(),
            })?;

        tracing::debug!(to = email, "verification mail accepted by relay");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_verification_link_carries_code() {
        let mailer = Mailer {
            base_url: "https://auth.example.com/".into(),
            ..Default::default()
        };

        let link = mailer
            .verification_link("jane@example.com", "deadbeef")
            .unwrap();

        assert_eq!(link.path(), "/auth/verify-email");
        let pairs: Vec<(String, String)> = link
            .query_pairs()
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect();
        assert!(pairs.contains(&("email".into(), "jane@example.com".into())));
        assert!(pairs.contains(&("code".into(), "deadbeef".into())));
    }

    #[tokio::test]
    async fn test_noop_mode_swallows_send() {
        let mailer = Mailer {
            base_url: "https://auth.example.com/".into(),
            ..Default::default()
        };

        assert!(
            mailer
                .send_verification("jane@example.com", "deadbeef")
                .await
                .is_ok()
        );
    }
}
