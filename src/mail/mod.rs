//! Mail collaborator.
//!
//! Probes travel as mail: queued locally, pushed over RF through the node
//! under test, and picked up again over the internet. [`MailClient`] is the
//! seam; [`PatClient`] drives the real Pat binary.

mod mailbox;
mod pat;

pub use mailbox::*;
pub use pat::*;

#[cfg(test)]
pub use fake::FakeMail;

use std::collections::HashSet;
use std::future::Future;
use std::io;
use thiserror::Error;

/// Mail error types.
#[derive(Error, Debug)]
pub enum MailError {
    #[error("{operation} failed: {detail}")]
    ToolFailed {
        operation: &'static str,
        detail: String,
    },
    #[error("failed to run {program}: {source}")]
    Spawn {
        program: String,
        source: io::Error,
    },
    #[error("outbox holds {count} unsent message(s)")]
    MailboxNotEmpty { count: usize },
    #[error("mailbox I/O error: {0}")]
    Io(#[from] io::Error),
}

/// A message to queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Outgoing {
    pub subject: String,
    pub to: String,
    pub reply_to: String,
    pub body: String,
}

pub trait MailClient: Send + Sync {
    /// Queue a message in the outbox.
    fn compose(&self, message: &Outgoing) -> impl Future<Output = Result<(), MailError>> + Send;

    /// Push everything queued over RF to `peer`.
    fn send_over_rf(&self, peer: &str) -> impl Future<Output = Result<(), MailError>> + Send;

    /// Pull pending inbound mail over the internet path.
    fn fetch(&self) -> impl Future<Output = Result<(), MailError>> + Send;

    /// Subjects of everything in the local inbox.
    fn inbound_subjects(&self) -> Result<HashSet<String>, MailError>;

    fn outbox_len(&self) -> Result<usize, MailError>;

    fn clear_outbox(&self) -> Result<(), MailError>;

    fn clear_inbox(&self) -> Result<(), MailError>;

    fn clear_sent(&self) -> Result<(), MailError>;
}
