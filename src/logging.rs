/// Logging Module
///
/// Sets up tracing with a console layer and a capture layer. The capture
/// layer accumulates the run log that is stored with every terminal run
/// record and printed when the process exits.
use std::io;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing_subscriber::{fmt, fmt::MakeWriter, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Shared in-memory buffer of formatted log lines
#[derive(Debug, Clone, Default)]
pub struct RunLog {
    buffer: Arc<Mutex<Vec<u8>>>,
}

impl RunLog {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<u8>> {
        self.buffer.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Everything logged so far
    pub fn contents(&self) -> String {
        String::from_utf8_lossy(&self.lock()).into_owned()
    }
}

pub struct RunLogWriter {
    buffer: Arc<Mutex<Vec<u8>>>,
}

impl io::Write for RunLogWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut guard = self.buffer.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        guard.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl<'a> MakeWriter<'a> for RunLog {
    type Writer = RunLogWriter;

    fn make_writer(&'a self) -> Self::Writer {
        RunLogWriter { buffer: Arc::clone(&self.buffer) }
    }
}

/// Install the global subscriber: console output on stderr plus capture into `run_log`.
///
/// `RUST_LOG` overrides `default_filter`.
pub fn init_tracing(default_filter: &str, run_log: &RunLog) -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(io::stderr).with_target(false))
        .with(fmt::layer().with_writer(run_log.clone()).with_ansi(false).with_target(false))
        .try_init()
        .map_err(|e| anyhow::anyhow!("failed to initialize tracing: {}", e))
}
