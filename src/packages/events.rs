use std::time::Duration;

use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Progress notification pushed to the install stream consumer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum InstallEvent {
    Start {
        message: String,
        packages: Vec<String>,
    },
    Status {
        message: String,
    },
    Info {
        message: String,
    },
    Warning {
        message: String,
    },
    Output {
        message: String,
    },
    Error {
        message: String,
    },
    #[serde(rename_all = "camelCase")]
    Success {
        message: String,
        installed_packages: Vec<String>,
        #[serde(skip_serializing_if = "Vec::is_empty")]
        already_installed: Vec<String>,
    },
    #[serde(rename_all = "camelCase")]
    Complete {
        message: String,
        installed_packages: Vec<String>,
    },
}

impl InstallEvent {
    pub fn status(message: impl Into<String>) -> Self {
        Self::Status {
            message: message.into(),
        }
    }

    pub fn info(message: impl Into<String>) -> Self {
        Self::Info {
            message: message.into(),
        }
    }

    pub fn warning(message: impl Into<String>) -> Self {
        Self::Warning {
            message: message.into(),
        }
    }

    pub fn output(message: impl Into<String>) -> Self {
        Self::Output {
            message: message.into(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            message: message.into(),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Start { .. } => "start",
            Self::Status { .. } => "status",
            Self::Info { .. } => "info",
            Self::Warning { .. } => "warning",
            Self::Output { .. } => "output",
            Self::Error { .. } => "error",
            Self::Success { .. } => "success",
            Self::Complete { .. } => "complete",
        }
    }
}

/// Sending half of an install event stream.
///
/// Each send waits at most `send_timeout`. Once the receiver is gone every
/// later emit is a no-op.
pub struct EventEmitter {
    tx: Option<mpsc::Sender<InstallEvent>>,
    send_timeout: Duration,
}

impl EventEmitter {
    pub fn channel(buffer: usize, send_timeout: Duration) -> (Self, mpsc::Receiver<InstallEvent>) {
        let (tx, rx) = mpsc::channel(buffer.max(1));
        (
            Self {
                tx: Some(tx),
                send_timeout,
            },
            rx,
        )
    }

    pub async fn emit(&mut self, event: InstallEvent) {
        let Some(tx) = self.tx.as_ref() else {
            return;
        };

        match tx.send_timeout(event, self.send_timeout).await {
            Ok(()) => {}
            Err(mpsc::error::SendTimeoutError::Timeout(event)) => {
                warn!(kind = event.kind(), "Dropped install event after send timeout");
            }
            Err(mpsc::error::SendTimeoutError::Closed(_)) => {
                debug!("Install event consumer disconnected");
                self.tx = None;
            }
        }
    }

    #[cfg(test)]
    pub fn is_connected(&self) -> bool {
        self.tx.as_ref().is_some_and(|tx| !tx.is_closed())
    }

    /// Ends the stream for the consumer.
    pub fn close(&mut self) {
        self.tx = None;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputStream {
    Stdout,
    Stderr,
}

/// Map one line of installer output to an event; blank lines yield nothing.
pub fn classify_install_line(stream: OutputStream, line: &str) -> Option<InstallEvent> {
    let line = line.trim_end();
    if line.trim().is_empty() {
        return None;
    }

    if line.contains("ERESOLVE") {
        return Some(InstallEvent::warning(format!(
            "Dependency conflict resolved with --legacy-peer-deps: {line}"
        )));
    }
    if line.to_lowercase().contains("npm warn") {
        return Some(InstallEvent::warning(line));
    }

    Some(match stream {
        OutputStream::Stdout => InstallEvent::output(line),
        OutputStream::Stderr => InstallEvent::error(line),
    })
}
