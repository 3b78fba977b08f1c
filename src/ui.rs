//! Status sink for human-readable progress messages.

use tracing::{error, info};

/// Progress/log collaborator supplied by the host.
pub trait Ui: Send + Sync {
    /// Emits a prominent status line.
    fn say(&self, message: &str);

    /// Emits a secondary informational line.
    fn message(&self, message: &str);

    /// Emits an error line.
    fn error(&self, message: &str);
}

/// `Ui` that forwards every message to `tracing`.
#[derive(Debug, Default, Clone)]
pub struct TracingUi {
    prefix: Option<String>,
}

impl TracingUi {
    /// Creates a `Ui` that prefixes messages with `prefix`, e.g. the build name.
    pub fn with_prefix(prefix: impl Into<String>) -> Self {
        Self {
            prefix: Some(prefix.into()),
        }
    }

    fn format(&self, message: &str) -> String {
        match &self.prefix {
            Some(prefix) => format!("{}: {}", prefix, message),
            None => message.to_string(),
        }
    }
}

impl Ui for TracingUi {
    fn say(&self, message: &str) {
        info!("==> {}", self.format(message));
    }

    fn message(&self, message: &str) {
        info!("    {}", self.format(message));
    }

    fn error(&self, message: &str) {
        error!("{}", self.format(message));
    }
}
