//! Log and lifecycle hooks
//!
//! The engine never writes output itself: every message goes through one of
//! four log hooks, which default to `tracing`.

use std::fmt;
use std::sync::Arc;

use tracing::{debug, error, info, warn};

pub type LogFn = Arc<dyn Fn(&str) + Send + Sync>;
pub type Hook = Arc<dyn Fn() + Send + Sync>;

/// Independent sinks for each log level
#[derive(Clone)]
pub struct LogHooks {
    pub debug: LogFn,
    pub info: LogFn,
    pub warn: LogFn,
    pub error: LogFn,
}

impl LogHooks {
    /// Hooks that forward to the `tracing` macros
    pub fn tracing() -> Self {
        Self {
            debug: Arc::new(|msg: &str| debug!("{}", msg)),
            info: Arc::new(|msg: &str| info!("{}", msg)),
            warn: Arc::new(|msg: &str| warn!("{}", msg)),
            error: Arc::new(|msg: &str| error!("{}", msg)),
        }
    }

    /// Route every level through one function tagged with the level
    pub fn from_fn<F>(f: F) -> Self
    where
        F: Fn(LogLevel, &str) + Send + Sync + 'static,
    {
        let f = Arc::new(f);
        let at = |level: LogLevel| -> LogFn {
            let f = f.clone();
            Arc::new(move |msg: &str| f(level, msg))
        };
        Self {
            debug: at(LogLevel::Debug),
            info: at(LogLevel::Info),
            warn: at(LogLevel::Warn),
            error: at(LogLevel::Error),
        }
    }

    pub fn debug(&self, msg: &str) {
        (self.debug)(msg)
    }

    pub fn info(&self, msg: &str) {
        (self.info)(msg)
    }

    pub fn warn(&self, msg: &str) {
        (self.warn)(msg)
    }

    pub fn error(&self, msg: &str) {
        (self.error)(msg)
    }
}

impl Default for LogHooks {
    fn default() -> Self {
        Self::tracing()
    }
}

impl fmt::Debug for LogHooks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LogHooks").finish_non_exhaustive()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

/// Callbacks around each run
#[derive(Clone, Default)]
pub struct LifecycleHooks {
    pub start: Option<Hook>,
    pub finish: Option<Hook>,
}

impl fmt::Debug for LifecycleHooks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LifecycleHooks")
            .field("start", &self.start.is_some())
            .field("finish", &self.finish.is_some())
            .finish()
    }
}
