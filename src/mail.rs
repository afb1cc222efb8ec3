//! Outgoing mail
//!
//! Handlers only talk to the [Mailer] trait. Without a configured mail API
//! every mail ends up in the log via [LogMailer].

use async_trait::async_trait;
use color_eyre::{
    eyre::{eyre, Context},
    Report,
};
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::Serialize;
use tracing::{info, instrument};
use url::Url;

use crate::{database::User, settings::MailConfig, types::Password};

/// A plain text mail
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Message {
    #[allow(missing_docs)]
    pub to: String,
    #[allow(missing_docs)]
    pub subject: String,
    #[allow(missing_docs)]
    pub text: String,
}

/// Something that can deliver a [Message]
#[async_trait]
pub trait Mailer: Send + Sync + 'static {
    #[allow(missing_docs)]
    async fn send(&self, message: Message) -> Result<(), Report>;
}

/// Welcome mail after signing up
pub(crate) fn new_user(user: &User, email: &str, login_url: &Url) -> Message {
    Message {
        to: email.to_owned(),
        subject: "Welcome to the forum!".to_owned(),
        text: format!(
            "Hi {},\n\nyour account has been created. You can log in at\n{login_url}\n",
            user.username
        ),
    }
}

/// Mail with a freshly generated password
pub(crate) fn password_reminder(
    user: &User,
    email: &str,
    password: &Password,
    login_url: &Url,
) -> Message {
    Message {
        to: email.to_owned(),
        subject: "Your new password".to_owned(),
        text: format!(
            "Hi {},\n\nyour new password is: {}\n\nLog in at\n{login_url}\n",
            user.username,
            password.expose()
        ),
    }
}

/// Mail carrying the signup link of an invite
pub(crate) fn invite(inviter: &User, email: &str, message: Option<&str>, signup_url: &Url) -> Message {
    let personal = message
        .map(|message| format!("{} writes:\n\n{message}\n\n", inviter.username))
        .unwrap_or_default();
    Message {
        to: email.to_owned(),
        subject: format!("{} has invited you to the forum", inviter.username),
        text: format!("{personal}Sign up here:\n{signup_url}\n"),
    }
}

/// Only logs the mails, for development and when no API is configured
#[derive(Debug, Default)]
pub struct LogMailer;

#[async_trait]
impl Mailer for LogMailer {
    async fn send(&self, message: Message) -> Result<(), Report> {
        info!(to = %message.to, subject = %message.subject, "Not delivering mail, no mail API configured");
        Ok(())
    }
}

#[derive(Serialize)]
struct SendEmail<'a> {
    from: &'a str,
    to: Vec<&'a str>,
    subject: &'a str,
    text: &'a str,
}

/// Posts mails as JSON to a mail API
#[derive(Debug)]
pub struct HttpMailer {
    client: Client,
    api_url: Url,
    api_key: Option<SecretString>,
    from: String,
}

impl HttpMailer {
    /// `None` if the config has no API URL
    pub fn from_config(config: &MailConfig) -> Result<Option<Self>, Report> {
        let Some(api_url) = config.api_url.clone() else {
            return Ok(None);
        };
        let client = Client::builder()
            .user_agent(concat!("pfoertner/", env!("CARGO_PKG_VERSION")))
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .wrap_err("Building mail client")?;

        Ok(Some(Self {
            client,
            api_url,
            api_key: config.api_key.clone().map(SecretString::new),
            from: config.from.clone(),
        }))
    }
}

#[async_trait]
impl Mailer for HttpMailer {
    #[instrument(skip(self, message), fields(to = %message.to))]
    async fn send(&self, message: Message) -> Result<(), Report> {
        let payload = SendEmail {
            from: &self.from,
            to: vec![&message.to],
            subject: &message.subject,
            text: &message.text,
        };

        let mut request = self.client.post(self.api_url.clone()).json(&payload);
        if let Some(api_key) = &self.api_key {
            request = request.bearer_auth(api_key.expose_secret());
        }

        let response = request.send().await.wrap_err("Sending mail")?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(eyre!("Mail API error: HTTP {status}: {body}"));
        }

        info!("Mail delivered");
        Ok(())
    }
}
