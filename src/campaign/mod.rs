//! Campaign log, reply state and the dispatch driver.

pub mod dispatch;
pub mod log;

pub use dispatch::{CheckReport, Dispatcher, FoundReply, RemindReport, SendReport};
pub use log::{CampaignLog, EntryState, LogEntry, ReplyPolicy};
