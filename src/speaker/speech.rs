//! Speech output: the external command that actually utters text.

use std::future::Future;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use thiserror::Error;
use tokio::process::Command;
use tracing::debug;

use crate::config::SpeechConfig;

#[derive(Debug, Error)]
pub enum SpeechError {
    #[error("failed to start speech command `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },
    #[error("speech command `{command}` exited with {status}")]
    ExitStatus { command: String, status: ExitStatus },
    #[error("speech playback exceeded {0:?}")]
    Timeout(Duration),
    #[error("speech failed: {0}")]
    Other(String),
}

/// Anything that can speak a line of text, completing when playback ends.
pub trait Speaker: Send + Sync + 'static {
    fn speak(&self, text: &str) -> impl Future<Output = Result<(), SpeechError>> + Send;
}

/// Runs a configured command with the text as its final argument.
#[derive(Debug, Clone)]
pub struct CommandSpeaker {
    command: String,
    args: Vec<String>,
}

impl CommandSpeaker {
    pub fn new(config: &SpeechConfig) -> Self {
        Self {
            command: config.command.clone(),
            args: config.args.clone(),
        }
    }

    fn build(&self, text: &str) -> Command {
        let mut cmd = Command::new(&self.command);
        cmd.args(&self.args)
            .arg(text)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null());
        cmd
    }

    /// Start the command and return without waiting for it. The child keeps
    /// running after this process exits.
    pub fn spawn_detached(&self, text: &str) -> Result<(), SpeechError> {
        self.build(text)
            .spawn()
            .map(|_child| ())
            .map_err(|source| SpeechError::Spawn {
                command: self.command.clone(),
                source,
            })
    }
}

impl Speaker for CommandSpeaker {
    async fn speak(&self, text: &str) -> Result<(), SpeechError> {
        debug!("Running `{}` for {} chars", self.command, text.len());
        // Dropping the future (timeout, shutdown) kills the child.
        let status = self
            .build(text)
            .kill_on_drop(true)
            .status()
            .await
            .map_err(|source| SpeechError::Spawn {
                command: self.command.clone(),
                source,
            })?;

        if status.success() {
            Ok(())
        } else {
            Err(SpeechError::ExitStatus {
                command: self.command.clone(),
                status,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn speaker(command: &str, args: &[&str]) -> CommandSpeaker {
        CommandSpeaker::new(&SpeechConfig {
            command: command.into(),
            args: args.iter().map(|a| a.to_string()).collect(),
        })
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn successful_command_is_ok() {
        let s = speaker("true", &[]);
        assert!(s.speak("hello").await.is_ok());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn failing_command_reports_exit_status() {
        let s = speaker("false", &[]);
        let err = s.speak("hello").await.expect_err("should fail");
        assert!(matches!(err, SpeechError::ExitStatus { .. }), "{err}");
    }

    #[tokio::test]
    async fn missing_command_reports_spawn_error() {
        let s = speaker("definitely-not-a-speech-binary-7f3a", &[]);
        let err = s.speak("hello").await.expect_err("should fail");
        assert!(matches!(err, SpeechError::Spawn { .. }), "{err}");
        assert!(s.spawn_detached("hello").is_err());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn text_is_passed_as_last_argument() {
        let dir = tempfile::TempDir::new().unwrap();
        let out = dir.path().join("spoken.txt");
        let script = format!("printf '%s' \"$0\" > {}", out.display());
        let s = speaker("sh", &["-c", &script]);

        s.speak("Build failed").await.expect("script runs");
        assert_eq!(std::fs::read_to_string(&out).unwrap(), "Build failed");
    }
}
