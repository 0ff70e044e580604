//! Failure emails through the local `sendmail`.

use std::process::Stdio;

use tokio::io::AsyncWriteExt;
use tracing::debug;

use super::{FailureReport, Mailer, NotifyError};

/// Render the full message, headers included, for `sendmail -t`.
pub fn render_email(from: &str, to: &str, report: &FailureReport) -> String {
    format!(
        "From: {from}\n\
         To: {to}\n\
         Subject: [unilog] {name} could not {action}\n\
         \n\
         Hi there,\n\
         \n\
         This is unilog reporting from {hostname}. I'm sad to report that\n\
         {name} is having some troubles writing to its log. I got caught up\n\
         trying to log a line to {target}.\n\
         \n\
         To avoid spamming you, I'm going to shut up for an hour. Please fix me.\n\
         \n\
         {error}\n\
         --\n\
         Sent from unilog {version}\n",
        name = report.name,
        action = report.action,
        hostname = report.hostname,
        target = report.target,
        error = report.error,
        version = report.version,
    )
}

/// Pipes rendered emails into `sendmail -t`.
#[derive(Debug, Clone)]
pub struct SendmailMailer {
    from: String,
    to: String,
    program: String,
}

impl SendmailMailer {
    /// Mailer sending from `from` to `to`.
    pub fn new(from: impl Into<String>, to: impl Into<String>) -> Self {
        Self {
            from: from.into(),
            to: to.into(),
            program: "sendmail".to_owned(),
        }
    }

    /// Use `program` instead of `sendmail`. It is invoked with `-t`.
    #[must_use]
    pub fn with_program(mut self, program: impl Into<String>) -> Self {
        self.program = program.into();
        self
    }

    /// Render and deliver one message, waiting for the command to finish.
    ///
    /// # Errors
    ///
    /// Returns [`NotifyError::Io`] if the command cannot be run or fed, and
    /// [`NotifyError::Sendmail`] if it exits unsuccessfully.
    pub async fn deliver(&self, report: &FailureReport) -> Result<(), NotifyError> {
        let message = render_email(&self.from, &self.to, report);

        let mut child = tokio::process::Command::new(&self.program)
            .arg("-t")
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin.write_all(message.as_bytes()).await?;
            stdin.shutdown().await?;
        }

        let status = child.wait().await?;
        if !status.success() {
            return Err(NotifyError::Sendmail(status));
        }
        Ok(())
    }
}

impl Mailer for SendmailMailer {
    fn send(&self, report: &FailureReport) {
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            debug!("no runtime, dropping failure email");
            return;
        };
        let mailer = self.clone();
        let report = report.clone();
        runtime.spawn(async move {
            if let Err(e) = mailer.deliver(&report).await {
                debug!(error = %e, "failed to send failure email");
            }
        });
    }
}
