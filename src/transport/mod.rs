//! Mail transport: delivers messages and retrieves replies.

pub mod email;
pub mod imap;

use async_trait::async_trait;

use crate::error::TransportError;

pub use email::{EmailConfig, EmailTransport};

/// Mail transport used by the dispatcher.
///
/// Calls are awaited one at a time; implementations may block internally.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Short name for diagnostics.
    fn name(&self) -> &str;

    /// Send one plain-text message.
    async fn deliver(&self, recipient: &str, subject: &str, body: &str)
    -> Result<(), TransportError>;

    /// Find inbox messages from `from_address` whose subject contains
    /// `subject_contains`, move them into `archive_folder` and return their
    /// text. An empty string means nothing matched.
    async fn find_and_archive(
        &self,
        from_address: &str,
        subject_contains: &str,
        archive_folder: &str,
    ) -> Result<String, TransportError>;
}
