//! Sensitive value redaction for log output.
//!
//! The provisioner registers credential values with a [`SecretFilter`] during
//! `prepare`. [`LogSecretFilter`] keeps those values in a shared set and the
//! [`RedactingMakeWriter`] plugs it into `tracing-subscriber` so registered
//! values are replaced with [`REDACTED`] before a log line reaches stderr.

use std::collections::BTreeSet;
use std::io::{self, Write};
use std::sync::{Arc, RwLock};

use tracing_subscriber::fmt::MakeWriter;

/// Replacement text for redacted values.
pub const REDACTED: &str = "<sensitive>";

/// Collaborator that receives values which must never appear in logs.
///
/// Registration is append-only and may happen concurrently from several
/// provisioners.
pub trait SecretFilter: Send + Sync {
    /// Registers a value for redaction. Empty values are ignored.
    fn register_sensitive_value(&self, value: &str);
}

/// In-process redaction registry shared between provisioners and the log writer.
#[derive(Debug, Default, Clone)]
pub struct LogSecretFilter {
    values: Arc<RwLock<BTreeSet<String>>>,
}

impl LogSecretFilter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of distinct registered values.
    pub fn len(&self) -> usize {
        self.values.read().map(|v| v.len()).unwrap_or_default()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Replaces every registered value in `message` with [`REDACTED`].
    ///
    /// Values are also matched in their `Debug`-escaped form, so a secret
    /// containing quotes or backslashes is masked when logged with `?`.
    /// Longer patterns are replaced first so a secret that contains another
    /// secret is masked as a whole.
    pub fn redact(&self, message: &str) -> String {
        let Ok(values) = self.values.read() else {
            return message.to_string();
        };
        let mut patterns: Vec<String> = Vec::with_capacity(values.len());
        for value in values.iter() {
            let escaped = value.escape_debug().to_string();
            if escaped != *value {
                patterns.push(escaped);
            }
            patterns.push(value.clone());
        }
        patterns.sort_by_key(|p| std::cmp::Reverse(p.len()));

        let mut out = message.to_string();
        for pattern in &patterns {
            if out.contains(pattern.as_str()) {
                out = out.replace(pattern.as_str(), REDACTED);
            }
        }
        out
    }
}

impl SecretFilter for LogSecretFilter {
    fn register_sensitive_value(&self, value: &str) {
        if value.is_empty() {
            return;
        }
        match self.values.write() {
            Ok(mut values) => {
                values.insert(value.to_string());
            }
            Err(poisoned) => {
                poisoned.into_inner().insert(value.to_string());
            }
        }
    }
}

/// `MakeWriter` that redacts registered values from formatted log events.
#[derive(Clone)]
pub struct RedactingMakeWriter<M> {
    filter: LogSecretFilter,
    inner: M,
}

impl<M> RedactingMakeWriter<M> {
    pub fn new(filter: LogSecretFilter, inner: M) -> Self {
        Self { filter, inner }
    }
}

impl<'a, M> MakeWriter<'a> for RedactingMakeWriter<M>
where
    M: MakeWriter<'a>,
{
    type Writer = RedactingWriter<M::Writer>;

    fn make_writer(&'a self) -> Self::Writer {
        RedactingWriter {
            filter: self.filter.clone(),
            inner: self.inner.make_writer(),
            buf: Vec::new(),
        }
    }
}

/// Buffers one formatted event and writes it redacted on flush or drop.
pub struct RedactingWriter<W: Write> {
    filter: LogSecretFilter,
    inner: W,
    buf: Vec<u8>,
}

impl<W: Write> RedactingWriter<W> {
    fn flush_buffer(&mut self) -> io::Result<()> {
        if self.buf.is_empty() {
            return Ok(());
        }
        let text = String::from_utf8_lossy(&self.buf);
        let redacted = self.filter.redact(&text);
        self.buf.clear();
        self.inner.write_all(redacted.as_bytes())
    }
}

impl<W: Write> Write for RedactingWriter<W> {
    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        self.buf.extend_from_slice(data);
        Ok(data.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.flush_buffer()?;
        self.inner.flush()
    }
}

impl<W: Write> Drop for RedactingWriter<W> {
    fn drop(&mut self) {
        let _ = self.flush();
    }
}
