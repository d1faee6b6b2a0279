//! Named, level-filtered loggers shared by every component of the crate.
//!
//! Each component owns a `static LOGGER: LazyLock<Logger>`; the global level and the
//! optional user handler apply to every logger created so far and to the ones created later.

use chrono::{SecondsFormat, Utc};
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, LazyLock, Mutex, RwLock, Weak};

use crate::util::sync::{lock, read, write};

static GLOBAL_LOG_LEVEL: AtomicU8 = AtomicU8::new(LogLevel::Info as u8);
static INSTANCES: LazyLock<Mutex<Vec<Weak<LoggerInner>>>> =
    LazyLock::new(|| Mutex::new(Vec::new()));

type SharedLogHandler = Arc<dyn Fn(&Logger, LogLevel, &str) + Send + Sync + 'static>;

/// Callback installed through [`set_user_log_handler`].
pub type LogCallback = Arc<dyn Fn(LogCallbackParams) + Send + Sync + 'static>;

#[derive(Clone)]
pub struct Logger {
    inner: Arc<LoggerInner>,
}

struct LoggerInner {
    name: String,
    log_level: AtomicU8,
    log_handler: RwLock<SharedLogHandler>,
    user_log_handler: RwLock<Option<SharedLogHandler>>,
}

impl Logger {
    pub fn new(name: impl Into<String>) -> Self {
        let inner = Arc::new(LoggerInner {
            name: name.into(),
            log_level: AtomicU8::new(GLOBAL_LOG_LEVEL.load(Ordering::SeqCst)),
            log_handler: RwLock::new(Arc::new(default_log_handler)),
            user_log_handler: RwLock::new(None),
        });
        lock(&INSTANCES).push(Arc::downgrade(&inner));
        Self { inner }
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn log_level(&self) -> LogLevel {
        LogLevel::from_u8(self.inner.log_level.load(Ordering::SeqCst))
    }

    pub fn set_log_level(&self, level: LogLevel) {
        self.inner.log_level.store(level as u8, Ordering::SeqCst);
    }

    /// Replaces the sink that writes records out. The handler is responsible for its own
    /// level filtering.
    pub fn set_log_handler<F>(&self, handler: F)
    where
        F: Fn(&Logger, LogLevel, &str) + Send + Sync + 'static,
    {
        *write(&self.inner.log_handler) = Arc::new(handler);
    }

    pub fn reset_log_handler(&self) {
        *write(&self.inner.log_handler) = Arc::new(default_log_handler);
    }

    pub fn has_user_log_handler(&self) -> bool {
        read(&self.inner.user_log_handler).is_some()
    }

    pub fn debug(&self, message: impl Into<String>) {
        self.dispatch(LogLevel::Debug, message.into());
    }

    pub fn log(&self, message: impl Into<String>) {
        self.dispatch(LogLevel::Verbose, message.into());
    }

    pub fn info(&self, message: impl Into<String>) {
        self.dispatch(LogLevel::Info, message.into());
    }

    pub fn warn(&self, message: impl Into<String>) {
        self.dispatch(LogLevel::Warn, message.into());
    }

    pub fn error(&self, message: impl Into<String>) {
        self.dispatch(LogLevel::Error, message.into());
    }

    fn dispatch(&self, level: LogLevel, message: String) {
        let user_handler = read(&self.inner.user_log_handler).clone();
        if let Some(handler) = user_handler {
            handler(self, level, &message);
        }
        let handler = read(&self.inner.log_handler).clone();
        handler(self, level, &message);
    }
}

impl fmt::Debug for Logger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Logger")
            .field("name", &self.inner.name)
            .field("level", &self.log_level())
            .finish()
    }
}

fn default_log_handler(logger: &Logger, level: LogLevel, message: &str) {
    if level < logger.log_level() || level == LogLevel::Silent {
        return;
    }

    let now = Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true);
    let header = format!("[{}]  {}:", now, logger.name());

    match level {
        LogLevel::Warn | LogLevel::Error => eprintln!("{header} {message}"),
        _ => println!("{header} {message}"),
    }
}

fn with_instances<F>(mut f: F)
where
    F: FnMut(Logger),
{
    let mut instances = lock(&INSTANCES);
    instances.retain(|weak| match weak.upgrade() {
        Some(inner) => {
            f(Logger { inner });
            true
        }
        None => false,
    });
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum LogLevel {
    Debug = 0,
    Verbose = 1,
    Info = 2,
    Warn = 3,
    Error = 4,
    Silent = 5,
}

impl LogLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            LogLevel::Debug => "debug",
            LogLevel::Verbose => "verbose",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
            LogLevel::Silent => "silent",
        }
    }

    fn from_u8(value: u8) -> Self {
        match value {
            0 => LogLevel::Debug,
            1 => LogLevel::Verbose,
            2 => LogLevel::Info,
            3 => LogLevel::Warn,
            4 => LogLevel::Error,
            _ => LogLevel::Silent,
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.as_str().to_ascii_uppercase())
    }
}

impl FromStr for LogLevel {
    type Err = LogError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "debug" => Ok(LogLevel::Debug),
            "verbose" => Ok(LogLevel::Verbose),
            "info" => Ok(LogLevel::Info),
            "warn" | "warning" => Ok(LogLevel::Warn),
            "error" => Ok(LogLevel::Error),
            "silent" => Ok(LogLevel::Silent),
            other => Err(LogError::InvalidLogLevel(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct LogOptions {
    pub level: Option<LogLevel>,
}

#[derive(Debug, Clone)]
pub struct LogCallbackParams {
    pub level: LogLevel,
    pub message: String,
    pub logger_type: String,
}

#[derive(Debug, Clone)]
pub enum LogError {
    InvalidLogLevel(String),
}

impl fmt::Display for LogError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LogError::InvalidLogLevel(level) => {
                write!(f, "Invalid value \"{level}\" assigned to `logLevel`")
            }
        }
    }
}

impl std::error::Error for LogError {}

/// Sets the level of every logger, accepting either a [`LogLevel`] or its name.
pub fn set_log_level(level: impl AsRef<str>) -> Result<(), LogError> {
    let level = LogLevel::from_str(level.as_ref())?;
    GLOBAL_LOG_LEVEL.store(level as u8, Ordering::SeqCst);
    with_instances(|logger| logger.set_log_level(level));
    Ok(())
}

impl AsRef<str> for LogLevel {
    fn as_ref(&self) -> &str {
        self.as_str()
    }
}

/// Installs (or clears, with `None`) a callback receiving the records of every logger.
pub fn set_user_log_handler(callback: Option<LogCallback>, options: Option<LogOptions>) {
    let options = options.unwrap_or_default();
    with_instances(|logger| {
        let handler = callback.clone().map(|cb| {
            let custom_level = options.level;
            Arc::new(move |instance: &Logger, level: LogLevel, message: &str| {
                let threshold = custom_level.unwrap_or_else(|| instance.log_level());
                if level < threshold {
                    return;
                }
                cb(LogCallbackParams {
                    level,
                    message: message.to_owned(),
                    logger_type: instance.name().to_owned(),
                });
            }) as SharedLogHandler
        });
        *write(&logger.inner.user_log_handler) = handler;
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    static TEST_GUARD: LazyLock<Mutex<()>> = LazyLock::new(|| Mutex::new(()));

    fn reset_logging() {
        set_log_level(LogLevel::Info).unwrap();
        set_user_log_handler(None, None);
    }

    #[test]
    fn log_level_string_filtering() {
        let _guard = TEST_GUARD.lock().unwrap();
        reset_logging();
        let logger = Logger::new("@firebase/database-logger-level");
        set_log_level("warn").unwrap();

        let records = Arc::new(Mutex::new(Vec::new()));
        let handler_records = Arc::clone(&records);
        logger.set_log_handler(move |instance, level, message| {
            if level < instance.log_level() {
                return;
            }
            handler_records
                .lock()
                .unwrap()
                .push((level, message.to_owned()));
        });

        logger.debug("debug message");
        logger.info("info message");
        logger.warn("warn message");
        logger.error("error message");

        let stored = records.lock().unwrap();
        let levels: Vec<_> = stored.iter().map(|(level, _)| *level).collect();
        assert_eq!(levels, [LogLevel::Warn, LogLevel::Error]);
        assert_eq!(stored[0].1, "warn message");
        drop(stored);
        reset_logging();
    }

    #[test]
    fn user_handler_respects_custom_level() {
        let _guard = TEST_GUARD.lock().unwrap();
        reset_logging();
        let logger = Logger::new("@firebase/database-logger-user");
        let logger_name = logger.name().to_owned();

        let captured = Arc::new(Mutex::new(Vec::new()));
        let captured_cb = Arc::clone(&captured);
        set_user_log_handler(
            Some(Arc::new(move |params: LogCallbackParams| {
                if params.logger_type == logger_name {
                    captured_cb.lock().unwrap().push(params.level);
                }
            })),
            Some(LogOptions {
                level: Some(LogLevel::Warn),
            }),
        );

        assert!(logger.has_user_log_handler());
        logger.info("info message");
        logger.warn("warn message");
        logger.error("error message");

        assert_eq!(
            captured.lock().unwrap().as_slice(),
            &[LogLevel::Warn, LogLevel::Error]
        );
        reset_logging();
    }

    #[test]
    fn rejects_unknown_level_names() {
        let err = LogLevel::from_str("chatty").unwrap_err();
        assert!(err.to_string().contains("chatty"));
    }
}
