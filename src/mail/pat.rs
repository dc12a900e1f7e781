//! Pat (Winlink client) driven as a subprocess.

use std::collections::HashSet;
use std::process::Stdio;

use tokio::io::AsyncWriteExt;
use tokio::process::Command;

use super::mailbox::{Folder, Mailbox};
use super::{MailClient, MailError, Outgoing};
use crate::config::MailConfig;

/// Pat only honours the auxiliary call for sends with this set.
const AUX_ONLY_ENV: (&str, &str) = ("FW_AUX_ONLY_EXPERIMENT", "1");

pub struct PatClient {
    binary: String,
    rf_transport: String,
    mailbox: Mailbox,
}

impl PatClient {
    pub fn new(cfg: &MailConfig) -> Self {
        Self {
            binary: cfg.pat_bin.clone(),
            rf_transport: cfg.rf_transport.clone(),
            mailbox: Mailbox::new(&cfg.mailbox_base),
        }
    }

    async fn run(
        &self,
        operation: &'static str,
        args: &[&str],
        stdin: Option<&[u8]>,
    ) -> Result<(), MailError> {
        tracing::debug!("Running {} {:?}", self.binary, args);

        let mut child = Command::new(&self.binary)
            .args(args)
            .env(AUX_ONLY_ENV.0, AUX_ONLY_ENV.1)
            .stdin(if stdin.is_some() { Stdio::piped() } else { Stdio::null() })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| MailError::Spawn {
                program: self.binary.clone(),
                source,
            })?;

        if let (Some(input), Some(mut pipe)) = (stdin, child.stdin.take()) {
            pipe.write_all(input).await?;
            // Dropping the pipe sends EOF
        }

        let output = child.wait_with_output().await?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(MailError::ToolFailed {
                operation,
                detail: format!("{} ({})", output.status, stderr.trim()),
            });
        }

        tracing::debug!(
            "{} finished: {}",
            operation,
            String::from_utf8_lossy(&output.stdout).trim()
        );
        Ok(())
    }
}

impl MailClient for PatClient {
    async fn compose(&self, message: &Outgoing) -> Result<(), MailError> {
        self.run(
            "compose",
            &[
                "compose",
                "-s",
                &message.subject,
                &message.to,
                "-r",
                &message.reply_to,
            ],
            Some(message.body.as_bytes()),
        )
        .await
    }

    async fn send_over_rf(&self, peer: &str) -> Result<(), MailError> {
        let url = format!("{}:///{}", self.rf_transport, peer);
        self.run("RF send", &["-s", "connect", &url], None).await
    }

    async fn fetch(&self) -> Result<(), MailError> {
        self.run("telnet fetch", &["connect", "telnet"], None).await
    }

    fn inbound_subjects(&self) -> Result<HashSet<String>, MailError> {
        Ok(self.mailbox.subjects(Folder::In)?)
    }

    fn outbox_len(&self) -> Result<usize, MailError> {
        Ok(self.mailbox.count(Folder::Out)?)
    }

    fn clear_outbox(&self) -> Result<(), MailError> {
        self.mailbox.clear(Folder::Out)?;
        Ok(())
    }

    fn clear_inbox(&self) -> Result<(), MailError> {
        self.mailbox.clear(Folder::In)?;
        Ok(())
    }

    fn clear_sent(&self) -> Result<(), MailError> {
        self.mailbox.clear(Folder::Sent)?;
        Ok(())
    }
}
