//! Email transport — SMTP via lettre for delivery, IMAP for reply lookup.

use async_trait::async_trait;
use lettre::message::header::ContentType;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{SmtpTransport, Transport as _};
use mail_parser::{MessageParser, MimeHeaders};
use secrecy::{ExposeSecret, SecretString};

use super::Transport;
use super::imap::{ImapError, ImapSession};
use crate::error::{ConfigError, TransportError};

// ── Configuration ───────────────────────────────────────────────────

/// Mail account configuration, built from environment variables.
#[derive(Debug, Clone)]
pub struct EmailConfig {
    pub imap_host: String,
    pub imap_port: u16,
    pub smtp_host: String,
    pub smtp_port: u16,
    /// Login account name.
    pub account: String,
    /// Display name on outgoing mail.
    pub username: String,
    pub password: SecretString,
    pub from_address: String,
    /// Send bodies as HTML with explicit line breaks.
    pub html: bool,
}

impl EmailConfig {
    /// Build config from `AUTOMAIL_*` environment variables, with Gmail
    /// hosts as defaults.
    pub fn from_env() -> Self {
        let imap_host =
            std::env::var("AUTOMAIL_IMAP_HOST").unwrap_or_else(|_| "imap.gmail.com".to_string());

        let imap_port: u16 = std::env::var("AUTOMAIL_IMAP_PORT")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(993);

        let smtp_host = std::env::var("AUTOMAIL_SMTP_HOST")
            .unwrap_or_else(|_| imap_host.replace("imap", "smtp"));

        let smtp_port: u16 = std::env::var("AUTOMAIL_SMTP_PORT")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(587);

        let account = std::env::var("AUTOMAIL_ACCOUNT").unwrap_or_default();
        let username = std::env::var("AUTOMAIL_USERNAME").unwrap_or_default();
        let password = SecretString::from(std::env::var("AUTOMAIL_PASSWORD").unwrap_or_default());
        let from_address = std::env::var("AUTOMAIL_FROM_ADDRESS").unwrap_or_default();
        let html = std::env::var("AUTOMAIL_HTML")
            .map(|v| matches!(v.as_str(), "1" | "true" | "yes"))
            .unwrap_or(false);

        Self {
            imap_host,
            imap_port,
            smtp_host,
            smtp_port,
            account,
            username,
            password,
            from_address,
            html,
        }
    }

    /// Sender address: the configured one, or the account, completed with
    /// `@gmail.com` when it is a bare name.
    pub fn sender_address(&self) -> String {
        if !self.from_address.is_empty() {
            self.from_address.clone()
        } else if self.account.contains('@') {
            self.account.clone()
        } else {
            format!("{}@gmail.com", self.account)
        }
    }

    /// `From:` header value.
    pub fn mailbox(&self) -> String {
        if self.username.is_empty() {
            self.sender_address()
        } else {
            format!("{} <{}>", self.username, self.sender_address())
        }
    }

    /// Check that the credentials needed to talk to the server are present.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.account.is_empty() {
            return Err(ConfigError::MissingRequired {
                key: "account".into(),
                hint: "Pass --account or set AUTOMAIL_ACCOUNT.".into(),
            });
        }
        if self.password.expose_secret().is_empty() {
            return Err(ConfigError::MissingRequired {
                key: "password".into(),
                hint: "Pass --password, --passvar NAME, or set AUTOMAIL_PASSWORD.".into(),
            });
        }
        Ok(())
    }
}

// ── Transport ───────────────────────────────────────────────────────

/// SMTP + IMAP mail transport.
pub struct EmailTransport {
    config: EmailConfig,
}

impl EmailTransport {
    pub fn new(config: EmailConfig) -> Self {
        Self { config }
    }

    /// Send an email via SMTP (blocking).
    fn send_email(config: &EmailConfig, to: &str, subject: &str, body: &str) -> Result<(), String> {
        if to.trim().is_empty() {
            return Err("empty recipient".into());
        }

        let creds = Credentials::new(
            config.account.clone(),
            config.password.expose_secret().to_string(),
        );
        let transport = SmtpTransport::starttls_relay(&config.smtp_host)
            .map_err(|e| format!("SMTP relay error: {e}"))?
            .port(config.smtp_port)
            .credentials(creds)
            .build();

        let (content_type, body) = if config.html {
            (ContentType::TEXT_HTML, html_body(body))
        } else {
            (ContentType::TEXT_PLAIN, body.to_string())
        };

        let email = lettre::Message::builder()
            .from(
                config
                    .mailbox()
                    .parse()
                    .map_err(|e| format!("Invalid from address: {e}"))?,
            )
            .to(to.parse().map_err(|e| format!("Invalid to address: {e}"))?)
            .subject(subject)
            .header(content_type)
            .body(body)
            .map_err(|e| format!("Failed to build email: {e}"))?;

        transport
            .send(&email)
            .map_err(|e| format!("SMTP send failed: {e}"))?;
        Ok(())
    }
}

#[async_trait]
impl Transport for EmailTransport {
    fn name(&self) -> &str {
        "email"
    }

    async fn deliver(
        &self,
        recipient: &str,
        subject: &str,
        body: &str,
    ) -> Result<(), TransportError> {
        let config = self.config.clone();
        let (to, subject, body) = (recipient.to_string(), subject.to_string(), body.to_string());

        tokio::task::spawn_blocking(move || Self::send_email(&config, &to, &subject, &body))
            .await
            .map_err(|e| TransportError::Delivery {
                reason: format!("SMTP task panicked: {e}"),
            })?
            .map_err(|reason| TransportError::Delivery { reason })?;

        tracing::info!(to = %recipient, "Email sent");
        Ok(())
    }

    async fn find_and_archive(
        &self,
        from_address: &str,
        subject_contains: &str,
        archive_folder: &str,
    ) -> Result<String, TransportError> {
        let config = self.config.clone();
        let (from, subject, folder) = (
            from_address.to_string(),
            subject_contains.to_string(),
            archive_folder.to_string(),
        );

        tokio::task::spawn_blocking(move || fetch_replies_imap(&config, &from, &subject, &folder))
            .await
            .map_err(|e| TransportError::Fetch {
                reason: format!("IMAP task panicked: {e}"),
            })?
            .map_err(|e| TransportError::Fetch {
                reason: e.to_string(),
            })
    }
}

// ── Helpers (public for testing) ────────────────────────────────────

/// Wrap a plain-text body as HTML, keeping its line breaks.
pub fn html_body(body: &str) -> String {
    let escaped = body
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;");
    format!("<body>{}</body>", escaped.replace('\n', "<br>\n"))
}

/// Strip HTML tags from content (basic).
pub fn strip_html(html: &str) -> String {
    let mut result = String::new();
    let mut in_tag = false;
    for ch in html.chars() {
        match ch {
            '<' => in_tag = true,
            '>' => in_tag = false,
            _ if !in_tag => result.push(ch),
            _ => {}
        }
    }
    result
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

/// Extract readable text from a parsed email.
fn extract_text(parsed: &mail_parser::Message) -> String {
    if let Some(text) = parsed.body_text(0) {
        return text.to_string();
    }
    if let Some(html) = parsed.body_html(0) {
        return strip_html(html.as_ref());
    }
    for part in parsed.attachments() {
        if let Some(ct) = MimeHeaders::content_type(part)
            && ct.ctype() == "text"
            && let Ok(text) = std::str::from_utf8(part.contents())
        {
            return text.to_string();
        }
    }
    String::new()
}

/// Render one fetched reply in the envelope format used for templates.
pub fn format_reply(from: &str, subject: &str, body: &str) -> String {
    format!("From: {from}\nSubject: {subject}\nBody:\n{body}\n")
}

/// Search the inbox for replies and move them to `folder` (blocking).
fn fetch_replies_imap(
    config: &EmailConfig,
    from: &str,
    subject: &str,
    folder: &str,
) -> Result<String, ImapError> {
    let mut session = ImapSession::connect(&config.imap_host, config.imap_port)?;
    session.login(&config.account, config.password.expose_secret())?;

    if !session.folder_exists(folder)? {
        tracing::info!(folder, "Creating archive folder");
        session.create_folder(folder)?;
    }

    session.select("INBOX")?;
    let uids = session.search_from_subject(from, subject)?;

    let mut replies = String::new();
    for uid in &uids {
        let Some(raw) = session.fetch_rfc822(uid)? else {
            tracing::warn!(uid = %uid, "Server returned no message body");
            continue;
        };
        if let Some(parsed) = MessageParser::default().parse(raw.as_slice()) {
            let reply_subject = parsed.subject().unwrap_or(subject);
            replies.push_str(&format_reply(from, reply_subject, &extract_text(&parsed)));
        }
        session.copy(uid, folder)?;
        session.mark_deleted(uid)?;
    }
    if !uids.is_empty() {
        session.expunge()?;
    }
    session.logout();

    tracing::debug!(from, matches = uids.len(), "Reply search finished");
    Ok(replies)
}

// ── Tests ───────────────────────────────────────────────────────────
