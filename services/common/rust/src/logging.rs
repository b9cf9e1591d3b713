use std::collections::HashMap;
use std::io::stdout;
use std::path::{Path, PathBuf};

use tracing::dispatcher::Dispatch;
use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::fmt::Layer as FmtLayer;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::{Layer, Registry};

use crate::config::{AppBasepathCfg, AppLogHandlerCfg, AppLoggerCfg, AppLoggingCfg};
use crate::constant::logging::{Destination, Level};
use crate::AppLogAlias;

pub type AppLogLevel = Level;

const MODPATH_SEPARATOR: &str = "::";
const DEFAULT_LOG_FILENAME: &str = "app.log";

// the level mapping is also needed in const context of `app_log_event!`
// expanded in other crates, so it stays a macro
#[macro_export]
macro_rules! to_3rdparty_level {
    ($lvlin:expr) => {
        match $lvlin {
            $crate::logging::AppLogLevel::FATAL | $crate::logging::AppLogLevel::ERROR => {
                tracing::Level::ERROR
            }
            $crate::logging::AppLogLevel::WARNING => tracing::Level::WARN,
            $crate::logging::AppLogLevel::INFO => tracing::Level::INFO,
            $crate::logging::AppLogLevel::DEBUG => tracing::Level::DEBUG,
            $crate::logging::AppLogLevel::TRACE => tracing::Level::TRACE,
        }
    };
}

/// one output of log events, the worker guard flushes pending events to
/// the destination when dropped
struct LogSink {
    writer: NonBlocking,
    min_level: tracing::Level,
    _guard: WorkerGuard,
}

impl LogSink {
    fn new(basepath: &AppBasepathCfg, cfg: &AppLogHandlerCfg) -> Self {
        let (writer, _guard) = match (&cfg.destination, cfg.path.as_ref()) {
            (Destination::LOCALFS, Some(rpath)) => {
                let fullpath: PathBuf = Path::new(basepath.system.as_str()).join(rpath);
                let dir = fullpath.parent().unwrap_or(Path::new("."));
                let fname = fullpath
                    .file_name()
                    .and_then(|f| f.to_str())
                    .unwrap_or(DEFAULT_LOG_FILENAME);
                let appender = RollingFileAppender::new(Rotation::DAILY, dir, fname);
                tracing_appender::non_blocking(appender)
            }
            // validated config never reaches here with a file handler
            // lacking path
            (Destination::LOCALFS, None) | (Destination::CONSOLE, _) => {
                tracing_appender::non_blocking(stdout())
            }
        };
        Self {
            writer,
            min_level: to_3rdparty_level!(&cfg.min_level),
            _guard,
        }
    }
}

fn build_dispatch(cfg: &AppLoggerCfg, sinks: &HashMap<AppLogAlias, LogSink>) -> Dispatch {
    let override_lvl = cfg.level.as_ref().map(|l| to_3rdparty_level!(l));
    let layers = cfg
        .handlers
        .iter()
        .filter_map(|alias| sinks.get(alias))
        .map(|sink| {
            let lvl = override_lvl.unwrap_or(sink.min_level);
            FmtLayer::new()
                .with_writer(sink.writer.clone())
                .with_file(false)
                .with_line_number(true)
                .with_thread_ids(true)
                .with_target(true)
                .with_filter(LevelFilter::from_level(lvl))
        })
        .collect::<Vec<_>>();
    Dispatch::new(Registry::default().with(layers))
}

/// Holds one `tracing` dispatcher per configured logger alias. A logger alias
/// is a module path, events emitted from a module are routed to the logger
/// registered at the closest enclosing module path.
pub struct AppLogContext {
    loggers: HashMap<AppLogAlias, Dispatch>,
    _sinks: Vec<LogSink>,
}

impl AppLogContext {
    pub fn new(basepath: &AppBasepathCfg, cfg: &AppLoggingCfg) -> Self {
        let sinks: HashMap<AppLogAlias, LogSink> = cfg
            .handlers
            .iter()
            .map(|h| (h.alias.clone(), LogSink::new(basepath, h)))
            .collect();
        let loggers = cfg
            .loggers
            .iter()
            .map(|l| (l.alias.clone(), build_dispatch(l, &sinks)))
            .collect();
        Self {
            loggers,
            _sinks: sinks.into_values().collect(),
        }
    }

    /// dispatcher of `modpath`, or of the closest parent module which has
    /// a logger configured
    pub fn get_assigner(&self, modpath: &str) -> Option<&Dispatch> {
        let mut key = modpath;
        loop {
            if let Some(found) = self.loggers.get(&key.to_string()) {
                return Some(found);
            }
            key = key.rsplit_once(MODPATH_SEPARATOR)?.0;
        }
    }
}

#[macro_export]
macro_rules! app_log_event {
    ( $ctx:ident, $lvl:expr, $($arg:tt)+ ) => {{
        const MOD_PATH: &str = module_path!();
        match $ctx.get_assigner(MOD_PATH) {
            Some(assigner) => {
                const LVL_INNER: tracing::Level = $crate::logging::to_3rdparty_level!($lvl);
                tracing::dispatcher::with_default(assigner, || {
                    tracing::event!(LVL_INNER, $($arg)+);
                });
            }
            None => println!("[{}] {}", MOD_PATH, format!($($arg)+)),
        }
    }};
}

pub use app_log_event;
pub use to_3rdparty_level;
