//! Progress event bus.
//!
//! Components report coarse status messages and raw git output through a
//! [`Progress`] handle. Whatever presentation layer is attached receives the
//! events through a callback; with no callback attached events are dropped
//! (they are also mirrored to `tracing` at debug level).

use std::sync::Arc;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GitStream {
    Stdout,
    Stderr,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ProgressEvent {
    Status {
        message: String,
    },
    Git {
        command: String,
        stream: GitStream,
        text: String,
    },
}

pub type ProgressCallback = Arc<dyn Fn(&ProgressEvent) + Send + Sync>;

/// Cheap, clonable emitter handed to every pipeline component.
#[derive(Clone, Default)]
pub struct Progress {
    callback: Option<ProgressCallback>,
}

impl Progress {
    pub fn new(callback: ProgressCallback) -> Self {
        Self {
            callback: Some(callback),
        }
    }

    pub fn silent() -> Self {
        Self::default()
    }

    pub fn from_option(callback: Option<ProgressCallback>) -> Self {
        Self { callback }
    }

    pub fn emit(&self, event: ProgressEvent) {
        match &event {
            ProgressEvent::Status { message } => tracing::debug!(target: "progress", "{message}"),
            ProgressEvent::Git {
                command,
                stream,
                text,
            } => tracing::trace!(target: "progress", %command, ?stream, "{text}"),
        }
        if let Some(callback) = &self.callback {
            callback(&event);
        }
    }

    pub fn status(&self, message: impl Into<String>) {
        self.emit(ProgressEvent::Status {
            message: message.into(),
        });
    }

    pub fn git(&self, command: &str, stream: GitStream, text: impl Into<String>) {
        self.emit(ProgressEvent::Git {
            command: command.to_string(),
            stream,
            text: text.into(),
        });
    }
}

impl std::fmt::Debug for Progress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Progress")
            .field("attached", &self.callback.is_some())
            .finish()
    }
}

/// Consumer-side helper that coalesces consecutive git output from the same
/// command under a single header line.
#[derive(Debug, Default)]
pub struct GitOutputCoalescer {
    current_command: Option<String>,
}

impl GitOutputCoalescer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Render one event into zero or more display lines.
    pub fn render(&mut self, event: &ProgressEvent) -> Vec<String> {
        match event {
            ProgressEvent::Status { message } => {
                self.current_command = None;
                vec![format!("» {message}")]
            }
            ProgressEvent::Git { command, text, .. } => {
                let mut lines = Vec::with_capacity(2);
                if self.current_command.as_deref() != Some(command.as_str()) {
                    lines.push(format!("$ {command}"));
                    self.current_command = Some(command.clone());
                }
                let text = text.trim_end();
                if !text.is_empty() {
                    lines.push(format!("  {text}"));
                }
                lines
            }
        }
    }
}
