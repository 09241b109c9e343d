//! Campaign log: one record per delivered message, persisted as JSON.
//!
//! The whole log is loaded before an operation and rewritten in full after
//! it. Writes go to a temporary file in the same directory which is synced
//! and then renamed over the log, so a failed write leaves the previous
//! log intact.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Local};
use serde::Serialize;
use tokio::fs;
use tokio::io::AsyncWriteExt;

use crate::directory::{Attributes, parse_records};
use crate::error::LogError;

/// Reserved log entry fields.
pub mod fields {
    pub const ADDRESS: &str = "address";
    pub const SUBJECT: &str = "subject";
    pub const SENT: &str = "sent";
    pub const REPLY: &str = "reply";
    pub const REMIND: &str = "remind";
}

/// Timestamp format for `sent`, `reply` and `remind` fields.
const TIME_FORMAT: &str = "%-m/%-d/%y %H:%M";

/// Current local time as a log timestamp.
pub fn timestamp() -> String {
    format_timestamp(&Local::now())
}

pub fn format_timestamp(at: &DateTime<Local>) -> String {
    at.format(TIME_FORMAT).to_string()
}

/// Which entries a reply check looks at, and how a match is recorded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReplyPolicy {
    /// Only entries without a reply; the first match is final.
    #[default]
    FirstMatchOnly,
    /// Every entry; each match appends another reply timestamp.
    Recheck,
}

/// Reply state of a log entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryState {
    AwaitingReply,
    Replied,
}

/// One delivered message: the addressee's attributes plus the reserved
/// correlation and bookkeeping fields.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct LogEntry {
    fields: Attributes,
}

impl LogEntry {
    /// New entry for a message sent to `source` at `sent`, with no reply.
    pub fn new(source: &Attributes, address: &str, subject: &str, sent: &str) -> Self {
        let mut attrs = source.clone();
        attrs.set(fields::ADDRESS, address);
        attrs.set(fields::SUBJECT, subject);
        attrs.set(fields::SENT, sent);
        attrs.set(fields::REPLY, "");
        Self { fields: attrs }
    }

    pub fn from_attributes(fields: Attributes) -> Self {
        Self { fields }
    }

    /// All fields, including the reserved ones.
    pub fn attributes(&self) -> &Attributes {
        &self.fields
    }

    pub fn address(&self) -> &str {
        self.fields.get_or_empty(fields::ADDRESS)
    }

    pub fn subject(&self) -> &str {
        self.fields.get_or_empty(fields::SUBJECT)
    }

    pub fn sent(&self) -> &str {
        self.fields.get_or_empty(fields::SENT)
    }

    pub fn reply(&self) -> &str {
        self.fields.get_or_empty(fields::REPLY)
    }

    pub fn remind(&self) -> &str {
        self.fields.get_or_empty(fields::REMIND)
    }

    pub fn state(&self) -> EntryState {
        if self.reply().is_empty() {
            EntryState::AwaitingReply
        } else {
            EntryState::Replied
        }
    }

    pub fn reply_count(&self) -> usize {
        stamp_count(self.reply())
    }

    pub fn remind_count(&self) -> usize {
        stamp_count(self.remind())
    }

    fn append_stamp(&mut self, field: &str, at: &str) {
        let current = self.fields.get_or_empty(field);
        let value = if current.is_empty() {
            at.to_string()
        } else {
            format!("{current},{at}")
        };
        self.fields.set(field, value);
    }
}

fn io_error(path: &Path) -> impl FnOnce(std::io::Error) -> LogError {
    let path = path.to_path_buf();
    move |source| LogError::Io { path, source }
}

fn stamp_count(value: &str) -> usize {
    if value.is_empty() {
        0
    } else {
        value.split(',').count()
    }
}

/// The persisted collection of log entries.
#[derive(Debug)]
pub struct CampaignLog {
    path: PathBuf,
    entries: Vec<LogEntry>,
}

impl CampaignLog {
    /// An empty, not yet persisted log at `path`.
    pub fn empty(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            entries: Vec::new(),
        }
    }

    /// Load the log at `path`. A missing file yields an empty log; a file
    /// that cannot be parsed is an error.
    pub async fn load(path: impl Into<PathBuf>) -> Result<Self, LogError> {
        let path = path.into();
        let text = match fs::read_to_string(&path).await {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!(path = %path.display(), "Log file not found, will create");
                return Ok(Self::empty(path));
            }
            Err(source) => return Err(LogError::Io { path, source }),
        };

        let entries = parse_records(&text)
            .map_err(|reason| LogError::Corrupt {
                path: path.clone(),
                reason,
            })?
            .into_iter()
            .map(LogEntry::from_attributes)
            .collect();
        Ok(Self { path, entries })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn entries(&self) -> &[LogEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn append(&mut self, entry: LogEntry) {
        self.entries.push(entry);
    }

    /// Indices of the entries a reply check should query under `policy`.
    pub fn select(&self, policy: ReplyPolicy) -> Vec<usize> {
        self.entries
            .iter()
            .enumerate()
            .filter(|(_, e)| policy == ReplyPolicy::Recheck || e.state() == EntryState::AwaitingReply)
            .map(|(i, _)| i)
            .collect()
    }

    /// Indices of entries still waiting for a reply.
    pub fn awaiting_reply(&self) -> Vec<usize> {
        self.select(ReplyPolicy::FirstMatchOnly)
    }

    /// Record a reply at `at`. Returns whether the entry changed.
    ///
    /// Under [`ReplyPolicy::FirstMatchOnly`] an entry that already has a
    /// reply is left alone.
    pub fn update_reply(&mut self, index: usize, at: &str, policy: ReplyPolicy) -> bool {
        let Some(entry) = self.entries.get_mut(index) else {
            return false;
        };
        if policy == ReplyPolicy::FirstMatchOnly && entry.state() == EntryState::Replied {
            return false;
        }
        entry.append_stamp(fields::REPLY, at);
        true
    }

    /// Record a reminder sent at `at`. Returns whether the entry changed.
    pub fn update_remind(&mut self, index: usize, at: &str) -> bool {
        match self.entries.get_mut(index) {
            Some(entry) => {
                entry.append_stamp(fields::REMIND, at);
                true
            }
            None => false,
        }
    }

    pub fn to_json(&self) -> Result<String, LogError> {
        let mut json = serde_json::to_string_pretty(&self.entries)?;
        json.push('\n');
        Ok(json)
    }

    /// Rewrite the whole log: write a temp file, sync it, rename it over
    /// the log.
    pub async fn persist(&self) -> Result<(), LogError> {
        let json = self.to_json()?;
        let tmp = self.tmp_path();

        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent).await.map_err(io_error(parent))?;
        }

        {
            let mut file = fs::File::create(&tmp).await.map_err(io_error(&tmp))?;
            file.write_all(json.as_bytes()).await.map_err(io_error(&tmp))?;
            file.sync_all().await.map_err(io_error(&tmp))?;
        }

        if let Err(source) = fs::rename(&tmp, &self.path).await {
            let _ = fs::remove_file(&tmp).await;
            return Err(LogError::Io {
                path: self.path.clone(),
                source,
            });
        }

        tracing::debug!(path = %self.path.display(), entries = self.entries.len(), "Campaign log written");
        Ok(())
    }

    fn tmp_path(&self) -> PathBuf {
        let name = self
            .path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("log.json");
        self.path.with_file_name(format!(".{name}.tmp"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn entry(address: &str, subject: &str) -> LogEntry {
        let source: Attributes = [("email", address), ("firstname", "Ann")].into_iter().collect();
        LogEntry::new(&source, address, subject, "1/2/26 09:30")
    }

    #[test]
    fn new_entry_awaits_reply() {
        let e = entry("a@x.com", "Hello");
        assert_eq!(e.state(), EntryState::AwaitingReply);
        assert_eq!(e.reply(), "");
        assert_eq!(e.remind_count(), 0);
    }

    #[test]
    fn first_match_only_is_terminal() {
        let mut log = CampaignLog::empty("unused.json");
        log.append(entry("a@x.com", "Hello"));

        assert!(log.update_reply(0, "1/3/26 10:00", ReplyPolicy::FirstMatchOnly));
        assert!(!log.update_reply(0, "1/4/26 10:00", ReplyPolicy::FirstMatchOnly));
        assert_eq!(log.entries()[0].reply(), "1/3/26 10:00");
        assert_eq!(log.entries()[0].state(), EntryState::Replied);
    }

    #[test]
    fn recheck_appends_reply_stamps() {
        let mut log = CampaignLog::empty("unused.json");
        log.append(entry("a@x.com", "Hello"));

        assert!(log.update_reply(0, "1/3/26 10:00", ReplyPolicy::Recheck));
        assert!(log.update_reply(0, "1/4/26 11:00", ReplyPolicy::Recheck));
        assert_eq!(log.entries()[0].reply(), "1/3/26 10:00,1/4/26 11:00");
        assert_eq!(log.entries()[0].reply_count(), 2);
    }

    #[test]
    fn reminders_accumulate_in_order() {
        let mut log = CampaignLog::empty("unused.json");
        log.append(entry("a@x.com", "Hello"));
        for stamp in ["1/3/26 10:00", "1/4/26 10:00", "1/5/26 10:00"] {
            assert!(log.update_remind(0, stamp));
        }
        assert_eq!(log.entries()[0].remind(), "1/3/26 10:00,1/4/26 10:00,1/5/26 10:00");
        assert_eq!(log.entries()[0].remind_count(), 3);
    }

    #[test]
    fn select_respects_policy() {
        let mut log = CampaignLog::empty("unused.json");
        log.append(entry("a@x.com", "One"));
        log.append(entry("b@x.com", "Two"));
        log.update_reply(0, "1/3/26 10:00", ReplyPolicy::FirstMatchOnly);

        assert_eq!(log.select(ReplyPolicy::FirstMatchOnly), vec![1]);
        assert_eq!(log.select(ReplyPolicy::Recheck), vec![0, 1]);
        assert_eq!(log.awaiting_reply(), vec![1]);
    }

    #[test]
    fn out_of_range_updates_are_ignored() {
        let mut log = CampaignLog::empty("unused.json");
        assert!(!log.update_reply(3, "x", ReplyPolicy::Recheck));
        assert!(!log.update_remind(3, "x"));
    }

    #[tokio::test]
    async fn missing_file_loads_empty() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("log.json");
        let log = CampaignLog::load(&path).await.unwrap();
        assert!(log.is_empty());
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn corrupt_file_is_an_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("log.json");
        std::fs::write(&path, "[{\"address\": ").unwrap();
        let err = CampaignLog::load(&path).await.unwrap_err();
        assert!(matches!(err, LogError::Corrupt { .. }));
    }

    #[tokio::test]
    async fn persist_then_load_round_trips() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("log.json");

        let source: Attributes = [
            ("email", "o'brien@x.com"),
            ("note", "quotes \" and <tags> & ampersands"),
            ("greeting", "Grüß dich, 你好\nsecond line\ttab"),
            ("Custom_Field", "kept"),
        ]
        .into_iter()
        .collect();
        let mut log = CampaignLog::empty(&path);
        log.append(LogEntry::new(&source, "o'brien@x.com", "Hi, \"you\"", "1/2/26 09:30"));
        log.append(entry("b@x.com", "Second"));
        log.update_remind(1, "1/3/26 10:00");
        log.persist().await.unwrap();

        let loaded = CampaignLog::load(&path).await.unwrap();
        assert_eq!(loaded.entries(), log.entries());
        let keys: Vec<&str> = loaded.entries()[0].attributes().iter().map(|(k, _)| k).collect();
        assert_eq!(
            keys,
            vec!["email", "note", "greeting", "Custom_Field", "address", "subject", "sent", "reply"]
        );
    }

    #[tokio::test]
    async fn persist_leaves_no_temp_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("log.json");
        let mut log = CampaignLog::empty(&path);
        log.append(entry("a@x.com", "Hello"));
        log.persist().await.unwrap();

        let names: Vec<String> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().to_string())
            .collect();
        assert_eq!(names, vec!["log.json".to_string()]);
    }

    #[tokio::test]
    async fn loaded_entry_missing_reserved_fields_reads_empty() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("log.json");
        std::fs::write(&path, r#"[{"address": "a@x.com", "subject": "Hi"}]"#).unwrap();
        let log = CampaignLog::load(&path).await.unwrap();
        assert_eq!(log.entries()[0].reply(), "");
        assert_eq!(log.entries()[0].state(), EntryState::AwaitingReply);
    }

    #[test]
    fn timestamps_have_no_commas() {
        assert!(!timestamp().contains(','));
    }
}
