use crate::layers::execution::command::CommandResult;
use anyhow::Context;
use async_trait::async_trait;
use protocol::config::NotifyConfig;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tokio::sync::mpsc;

const QUEUE_DEPTH: usize = 64;
const SUBJECT_PREVIEW_CHARS: usize = 48;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub recipients: Vec<String>,
    pub subject: String,
    pub body: String,
}

#[async_trait]
pub trait MailSender: Send + Sync {
    async fn send(&self, notification: &Notification) -> anyhow::Result<()>;
}

/// Hands mail to a sendmail-compatible binary.
pub struct SendmailSender {
    path: PathBuf,
    from: String,
}

impl SendmailSender {
    pub fn new(config: &NotifyConfig) -> Self {
        Self {
            path: config.sendmail_path.clone(),
            from: config.from.clone(),
        }
    }
}

#[async_trait]
impl MailSender for SendmailSender {
    async fn send(&self, notification: &Notification) -> anyhow::Result<()> {
        let mut child = Command::new(&self.path)
            .arg("-t")
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .with_context(|| format!("spawn {}", self.path.display()))?;
        let message = format!(
            "From: {}\r\nTo: {}\r\nSubject: {}\r\nContent-Type: text/plain; charset=utf-8\r\n\r\n{}\r\n",
            self.from,
            notification.recipients.join(", "),
            notification.subject,
            notification.body
        );
        let mut stdin = child.stdin.take().context("missing sendmail stdin")?;
        stdin.write_all(message.as_bytes()).await?;
        drop(stdin);
        let status = child.wait().await.context("wait on sendmail")?;
        if !status.success() {
            anyhow::bail!("sendmail exited with {status}");
        }
        Ok(())
    }
}

/// Mails every result to the configured recipients without holding up the caller.
#[derive(Debug, Clone)]
pub struct NotifyViaEmail {
    recipients: Vec<String>,
    queue: mpsc::Sender<Notification>,
}

impl NotifyViaEmail {
    /// Must be called inside a tokio runtime; the delivery task ends once
    /// every clone of the filter is dropped.
    pub fn spawn(recipients: Vec<String>, sender: Arc<dyn MailSender>) -> Self {
        let (queue, rx) = mpsc::channel(QUEUE_DEPTH);
        tokio::spawn(deliver(rx, sender));
        Self { recipients, queue }
    }

    pub fn transform(&self, result: &CommandResult) {
        if self.recipients.is_empty() {
            return;
        }
        if result.error.as_ref().is_some_and(|err| err.is_framework()) {
            return;
        }
        let mut preview = result.command.content.clone();
        protocol::truncate_chars(&mut preview, SUBJECT_PREVIEW_CHARS);
        let notification = Notification {
            recipients: self.recipients.clone(),
            subject: format!("app-gateway result: {}", preview.replace(['\r', '\n'], " ")),
            body: format!(
                "Client: {} via {}\nCommand: {}\n\n{}",
                result.command.client_id,
                result.command.daemon_name,
                result.command.content,
                result.combined_output
            ),
        };
        if let Err(err) = self.queue.try_send(notification) {
            tracing::warn!(event = "notify.dropped", error = %err, "notification queue unavailable");
        }
    }
}

async fn deliver(mut rx: mpsc::Receiver<Notification>, sender: Arc<dyn MailSender>) {
    while let Some(notification) = rx.recv().await {
        match sender.send(&notification).await {
            Ok(()) => tracing::info!(
                event = "notify.sent",
                recipients = notification.recipients.len()
            ),
            Err(err) => tracing::warn!(event = "notify.failed", error = %err),
        }
    }
}
