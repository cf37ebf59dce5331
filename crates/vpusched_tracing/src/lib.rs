use std::{
    fs::File,
    path::{Path, PathBuf},
};

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

pub struct TraceOptions {
    log_file: Option<PathBuf>,
    pub env_filter: Option<String>,
}

/// This is a convenience tracing subscriber with some opinionated defaults.
pub fn subscriber() -> TraceOptions {
    TraceOptions {
        log_file: None,
        env_filter: None,
    }
}

impl TraceOptions {
    /// Write events to `path` through a background writer instead of stdout.
    pub fn log_file(mut self, path: impl AsRef<Path>) -> Self {
        self.log_file = Some(path.as_ref().to_path_buf());
        self
    }

    pub fn env_filter(mut self, env_filter: impl ToString) -> Self {
        self.env_filter = Some(env_filter.to_string());
        self
    }

    fn filter(&self) -> EnvFilter {
        match &self.env_filter {
            Some(f) => EnvFilter::builder()
                .parse(f)
                .expect("Invalid tracing env filter"),
            None => EnvFilter::from_default_env(),
        }
    }

    /// Install as the global tracing subscriber
    pub fn init(self) -> TraceSession {
        self.try_init()
            .expect("A global tracing subscriber is already installed")
    }

    /// Like [`TraceOptions::init`], but returns `None` if another subscriber
    /// got there first.
    pub fn try_init(self) -> Option<TraceSession> {
        let filter = self.filter();
        match self.log_file {
            Some(path) => {
                let file = File::create(&path).expect("Failed to create log file");
                let (writer, guard) = tracing_appender::non_blocking(file);
                tracing_subscriber::registry()
                    .with(filter)
                    .with(fmt::layer().with_ansi(false).with_writer(writer))
                    .try_init()
                    .ok()?;
                Some(TraceSession {
                    _guard: Some(guard),
                    log_path: Some(path),
                })
            }
            None => {
                tracing_subscriber::registry()
                    .with(filter)
                    .with(fmt::layer())
                    .try_init()
                    .ok()?;
                Some(TraceSession {
                    _guard: None,
                    log_path: None,
                })
            }
        }
    }
}

/// Keeps the background log writer alive. Dropping it flushes pending events.
pub struct TraceSession {
    _guard: Option<WorkerGuard>,
    pub log_path: Option<PathBuf>,
}

impl TraceSession {
    pub fn log_path(&self) -> Option<&Path> {
        self.log_path.as_deref()
    }
}
