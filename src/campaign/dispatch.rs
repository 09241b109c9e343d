//! The Send, Check and Remind batch operations.
//!
//! Every batch walks its addressees or log entries in order, one transport
//! call at a time. A transport failure only skips that item; template and
//! log errors abort the batch.

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::campaign::log::{CampaignLog, ReplyPolicy, fields, timestamp};
use crate::config::CampaignConfig;
use crate::directory::Attributes;
use crate::error::Result;
use crate::message::{Message, build_entry};
use crate::template::Renderer;
use crate::transport::Transport;

/// Outcome of a Send batch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SendReport {
    pub delivered: usize,
    pub failed: usize,
    /// Rendered messages, filled only in debug mode.
    pub previews: Vec<String>,
}

/// A reply found during a Check batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FoundReply {
    pub address: String,
    pub subject: String,
    pub text: String,
}

/// Outcome of a Check batch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CheckReport {
    pub checked: usize,
    pub replied: usize,
    pub failed: usize,
    pub skipped: usize,
    pub replies: Vec<FoundReply>,
    /// Correlation keys that would be queried, filled only in debug mode.
    pub previews: Vec<String>,
}

/// Outcome of a Remind batch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RemindReport {
    pub reminded: usize,
    pub failed: usize,
    /// Rendered reminders, filled only in debug mode.
    pub previews: Vec<String>,
}

/// Runs campaign batches against a transport.
pub struct Dispatcher {
    transport: Arc<dyn Transport>,
    config: CampaignConfig,
    renderer: Renderer,
}

impl Dispatcher {
    pub fn new(transport: Arc<dyn Transport>, config: CampaignConfig) -> Self {
        let renderer = match &config.include_dir {
            Some(dir) => Renderer::new().with_include_dir(dir),
            None => Renderer::new(),
        };
        Self {
            transport,
            config,
            renderer,
        }
    }

    pub fn config(&self) -> &CampaignConfig {
        &self.config
    }

    /// Render `template` for each addressee and deliver it, logging every
    /// successful delivery.
    ///
    /// The log is persisted after each new entry so a delivered message is
    /// never left unrecorded.
    pub async fn send(
        &self,
        template: &str,
        addressees: &[Attributes],
        log: &mut CampaignLog,
    ) -> Result<SendReport> {
        let mut report = SendReport::default();

        for addressee in addressees {
            let rendered = self.renderer.render(template, addressee)?;
            if self.config.debug {
                report.previews.push(rendered);
                continue;
            }

            let msg = Message::parse(&rendered);
            if msg.recipient.is_empty() {
                warn!(subject = %msg.subject, "Rendered message has no recipient, skipping");
                report.failed += 1;
                continue;
            }

            match self
                .transport
                .deliver(&msg.recipient, &msg.subject, &msg.body)
                .await
            {
                Ok(()) => {
                    log.append(build_entry(&rendered, addressee));
                    log.persist().await?;
                    report.delivered += 1;
                }
                Err(e) => {
                    warn!(address = %msg.recipient, error = %e, "Send failed, not logged");
                    report.failed += 1;
                }
            }
        }

        info!(
            delivered = report.delivered,
            failed = report.failed,
            transport = self.transport.name(),
            "Send batch finished"
        );
        Ok(report)
    }

    /// Look for replies to logged messages and record their time.
    ///
    /// The log is written once at the end, and only if an entry changed.
    pub async fn check(&self, log: &mut CampaignLog, policy: ReplyPolicy) -> Result<CheckReport> {
        let mut report = CheckReport::default();
        let mut changed = false;

        for index in log.select(policy) {
            let entry = &log.entries()[index];
            let (address, subject) = (entry.address().to_string(), entry.subject().to_string());

            if address.is_empty() {
                warn!(index, "Log entry has no address, skipping");
                report.skipped += 1;
                continue;
            }
            if self.config.debug {
                report.previews.push(format!("{address}: {subject}"));
                continue;
            }

            report.checked += 1;
            let found = self
                .transport
                .find_and_archive(&address, &subject, &self.config.archive_folder)
                .await;

            match found {
                Ok(text) if text.is_empty() => {
                    debug!(address = %address, subject = %subject, "No reply");
                }
                Ok(text) => {
                    if log.update_reply(index, &timestamp(), policy) {
                        changed = true;
                        report.replied += 1;
                        info!(address = %address, subject = %subject, "Reply recorded");
                    }
                    report.replies.push(FoundReply {
                        address,
                        subject,
                        text,
                    });
                }
                Err(e) => {
                    warn!(address = %address, error = %e, "Reply check failed, skipping");
                    report.failed += 1;
                }
            }
        }

        if changed {
            log.persist().await?;
        }
        info!(
            checked = report.checked,
            replied = report.replied,
            failed = report.failed,
            "Check batch finished"
        );
        Ok(report)
    }

    /// Send `template` again to every entry still awaiting a reply, with
    /// `Re: ` prefixed to the stored subject.
    ///
    /// The log is written once at the end, and only if an entry changed.
    pub async fn remind(&self, template: &str, log: &mut CampaignLog) -> Result<RemindReport> {
        let mut report = RemindReport::default();
        let mut changed = false;

        for index in log.awaiting_reply() {
            let entry = &log.entries()[index];
            let mut vars = entry.attributes().clone();
            vars.set(fields::SUBJECT, format!("Re: {}", entry.subject()));

            let rendered = self.renderer.render(template, &vars)?;
            if self.config.debug {
                report.previews.push(rendered);
                continue;
            }

            let msg = Message::parse(&rendered);
            if msg.recipient.is_empty() {
                warn!(index, "Reminder has no recipient, skipping");
                report.failed += 1;
                continue;
            }

            match self
                .transport
                .deliver(&msg.recipient, &msg.subject, &msg.body)
                .await
            {
                Ok(()) => {
                    log.update_remind(index, &timestamp());
                    changed = true;
                    report.reminded += 1;
                }
                Err(e) => {
                    warn!(address = %msg.recipient, error = %e, "Reminder failed, skipping");
                    report.failed += 1;
                }
            }
        }

        if changed {
            log.persist().await?;
        }
        info!(
            reminded = report.reminded,
            failed = report.failed,
            "Remind batch finished"
        );
        Ok(report)
    }
}
