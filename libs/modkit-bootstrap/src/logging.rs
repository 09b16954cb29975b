//! Subscriber setup: human console output on stderr plus optional JSON
//! files routed by target prefix, each with its own level rules.

use std::io::{IsTerminal, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};

use file_rotate::{
    compression::Compression,
    suffix::{AppendTimestamp, FileLimit},
    ContentLimit, FileRotate,
};
use parking_lot::Mutex;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::filter::Targets;
use tracing_subscriber::fmt::{self, MakeWriter};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer, Registry};

use crate::config::{LoggingConfig, Section};

const DEFAULT_SECTION: &str = "default";
const DEFAULT_MAX_SIZE_MB: u64 = 100;

// Flushes the non-blocking console writer on process exit.
static CONSOLE_GUARD: OnceLock<tracing_appender::non_blocking::WorkerGuard> = OnceLock::new();

/// Install the global subscriber. Relative log files resolve against
/// `base_dir`. `RUST_LOG`, when set, caps every sink. Calling this twice is
/// harmless: the second subscriber is discarded.
pub fn init_logging(cfg: &LoggingConfig, base_dir: &Path) {
    if let Err(e) = tracing_log::LogTracer::init() {
        eprintln!("log bridge not installed: {e}");
    }

    let plan = LogPlan::from_config(cfg);
    if plan.is_empty() {
        init_minimal();
        return;
    }

    let router = plan.file_router(base_dir);
    let console_targets = plan.targets(Sink::Console);
    let file_targets = plan.targets(Sink::File {
        has_default_file: router.default.is_some(),
    });

    let (stderr, guard) = tracing_appender::non_blocking(std::io::stderr());
    let _ = CONSOLE_GUARD.set(guard);

    let console = fmt::layer()
        .with_writer(stderr)
        .with_ansi(std::io::stderr().is_terminal())
        .with_target(true)
        .with_timer(fmt::time::UtcTime::rfc_3339())
        .with_filter(console_targets);

    let files = (!router.is_empty()).then(|| {
        fmt::layer()
            .json()
            .with_ansi(false)
            .with_target(true)
            .with_timer(fmt::time::UtcTime::rfc_3339())
            .with_writer(router)
            .with_filter(file_targets)
    });

    let _ = Registry::default()
        .with(EnvFilter::try_from_default_env().ok())
        .with(console)
        .with(files)
        .try_init();
}

fn init_minimal() {
    let console = fmt::layer()
        .with_target(true)
        .with_timer(fmt::time::UtcTime::rfc_3339());
    let _ = Registry::default()
        .with(EnvFilter::try_from_default_env().ok())
        .with(console)
        .try_init();
}

/// `None` for an empty value (inherit), `INFO` for anything unrecognised.
fn parse_level(raw: &str) -> Option<LevelFilter> {
    let level = match raw.trim().to_ascii_lowercase().as_str() {
        "" => return None,
        "trace" => LevelFilter::TRACE,
        "debug" => LevelFilter::DEBUG,
        "info" => LevelFilter::INFO,
        "warn" | "warning" => LevelFilter::WARN,
        "error" => LevelFilter::ERROR,
        "off" | "none" => LevelFilter::OFF,
        _ => LevelFilter::INFO,
    };
    Some(level)
}

/// `target` is `prefix` itself or lives under `prefix::`.
fn matches_prefix(target: &str, prefix: &str) -> bool {
    target
        .strip_prefix(prefix)
        .is_some_and(|rest| rest.is_empty() || rest.starts_with("::"))
}

enum Sink {
    Console,
    File { has_default_file: bool },
}

struct LogPlan<'a> {
    default: Option<&'a Section>,
    // longest prefix first so nested targets win over their parents
    targets: Vec<(&'a str, &'a Section)>,
}

impl<'a> LogPlan<'a> {
    fn from_config(cfg: &'a LoggingConfig) -> Self {
        let mut targets: Vec<_> = cfg
            .iter()
            .filter(|(name, _)| name.as_str() != DEFAULT_SECTION)
            .map(|(name, section)| (name.as_str(), section))
            .collect();
        targets.sort_by(|a, b| b.0.len().cmp(&a.0.len()).then(a.0.cmp(b.0)));
        Self {
            default: cfg.get(DEFAULT_SECTION),
            targets,
        }
    }

    fn is_empty(&self) -> bool {
        self.default.is_none() && self.targets.is_empty()
    }

    fn targets(&self, sink: Sink) -> Targets {
        match sink {
            Sink::Console => {
                let default = self
                    .default
                    .and_then(|s| parse_level(&s.console_level))
                    .unwrap_or(LevelFilter::INFO);
                self.targets
                    .iter()
                    .filter_map(|(name, s)| parse_level(&s.console_level).map(|l| (*name, l)))
                    .fold(Targets::new().with_default(default), |t, (name, level)| {
                        t.with_target(name, level)
                    })
            }
            Sink::File { has_default_file } => {
                let fallback = if has_default_file {
                    LevelFilter::INFO
                } else {
                    LevelFilter::OFF
                };
                let default = self
                    .default
                    .filter(|_| has_default_file)
                    .and_then(|s| parse_level(&s.file_level))
                    .unwrap_or(fallback);
                self.targets
                    .iter()
                    .filter(|(_, s)| !s.file.trim().is_empty())
                    .map(|(name, s)| (*name, parse_level(&s.file_level).unwrap_or(LevelFilter::INFO)))
                    .fold(Targets::new().with_default(default), |t, (name, level)| {
                        t.with_target(name, level)
                    })
            }
        }
    }

    fn file_router(&self, base_dir: &Path) -> FileRouter {
        let default = self
            .default
            .and_then(|section| open_section_file(DEFAULT_SECTION, section, base_dir));
        let by_prefix = self
            .targets
            .iter()
            .filter_map(|(name, section)| {
                open_section_file(name, section, base_dir).map(|w| (name.to_string(), w))
            })
            .collect();
        FileRouter { default, by_prefix }
    }
}

fn resolve_log_path(file: &str, base_dir: &Path) -> PathBuf {
    let path = Path::new(file);
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base_dir.join(path)
    }
}

fn open_section_file(name: &str, section: &Section, base_dir: &Path) -> Option<RotatingFile> {
    if section.file.trim().is_empty() {
        return None;
    }
    let path = resolve_log_path(section.file.trim(), base_dir);
    match RotatingFile::open(&path, section) {
        Ok(file) => Some(file),
        Err(e) => {
            // the subscriber is not installed yet
            eprintln!("log file for '{name}' disabled: {} ({e})", path.display());
            None
        }
    }
}

/// Size-rotated log file shared by every writer handle.
#[derive(Clone)]
struct RotatingFile(Arc<Mutex<FileRotate<AppendTimestamp>>>);

impl RotatingFile {
    fn open(path: &Path, section: &Section) -> std::io::Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let max_bytes = section.max_size_mb.unwrap_or(DEFAULT_MAX_SIZE_MB) as usize * 1024 * 1024;
        // a backup count takes precedence over age-based retention
        let limit = match section.max_backups {
            Some(n) => FileLimit::MaxFiles(n),
            None => FileLimit::Age(chrono::Duration::days(
                i64::from(section.max_age_days.unwrap_or(1)),
            )),
        };
        let rotate = FileRotate::new(
            path,
            AppendTimestamp::default(limit),
            ContentLimit::BytesSurpassed(max_bytes),
            Compression::None,
            None,
        );
        Ok(Self(Arc::new(Mutex::new(rotate))))
    }
}

impl Write for RotatingFile {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().write(buf)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.0.lock().flush()
    }
}

/// Writer for one record; discards output when no file claims the target.
struct RoutedWriter(Option<RotatingFile>);

impl Write for RoutedWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        match &mut self.0 {
            Some(file) => file.write(buf),
            None => Ok(buf.len()),
        }
    }

    fn flush(&mut self) -> std::io::Result<()> {
        match &mut self.0 {
            Some(file) => file.flush(),
            None => Ok(()),
        }
    }
}

/// Picks the file for a record by its target.
struct FileRouter {
    default: Option<RotatingFile>,
    by_prefix: Vec<(String, RotatingFile)>,
}

impl FileRouter {
    fn resolve(&self, target: &str) -> Option<RotatingFile> {
        self.by_prefix
            .iter()
            .find(|(prefix, _)| matches_prefix(target, prefix))
            .map(|(_, file)| file)
            .or(self.default.as_ref())
            .cloned()
    }

    fn is_empty(&self) -> bool {
        self.default.is_none() && self.by_prefix.is_empty()
    }
}

impl<'a> MakeWriter<'a> for FileRouter {
    type Writer = RoutedWriter;

    fn make_writer(&'a self) -> Self::Writer {
        RoutedWriter(self.default.clone())
    }

    fn make_writer_for(&'a self, meta: &tracing::Metadata<'_>) -> Self::Writer {
        RoutedWriter(self.resolve(meta.target()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tracing::Level;

    fn section(console: &str, file: &str, file_level: &str) -> Section {
        Section {
            console_level: console.into(),
            file: file.into(),
            file_level: file_level.into(),
            max_age_days: None,
            max_backups: Some(2),
            max_size_mb: Some(1),
        }
    }

    #[test]
    fn level_parsing() {
        assert_eq!(parse_level("DEBUG"), Some(LevelFilter::DEBUG));
        assert_eq!(parse_level(" warn "), Some(LevelFilter::WARN));
        assert_eq!(parse_level("off"), Some(LevelFilter::OFF));
        assert_eq!(parse_level("verbose"), Some(LevelFilter::INFO));
        assert_eq!(parse_level(""), None);
    }

    #[test]
    fn prefix_matching_respects_path_boundaries() {
        assert!(matches_prefix("modkit", "modkit"));
        assert!(matches_prefix("modkit::events::bus", "modkit"));
        assert!(!matches_prefix("modkit_bootstrap", "modkit"));
        assert!(!matches_prefix("mod", "modkit"));
    }

    #[test]
    fn console_targets_follow_sections() {
        let cfg: LoggingConfig = HashMap::from([
            ("default".to_string(), section("warn", "", "")),
            ("modkit::events".to_string(), section("debug", "", "")),
            ("task_events".to_string(), section("off", "", "")),
        ]);
        let targets = LogPlan::from_config(&cfg).targets(Sink::Console);

        assert!(targets.would_enable("modkit::events::bus", &Level::DEBUG));
        assert!(!targets.would_enable("modkit::registry", &Level::INFO));
        assert!(targets.would_enable("modkit::registry", &Level::WARN));
        assert!(!targets.would_enable("task_events", &Level::ERROR));
    }

    #[test]
    fn file_targets_are_off_without_any_file() {
        let cfg: LoggingConfig =
            HashMap::from([("default".to_string(), section("info", "", "debug"))]);
        let targets = LogPlan::from_config(&cfg).targets(Sink::File {
            has_default_file: false,
        });
        assert!(!targets.would_enable("anything", &Level::ERROR));
    }

    #[test]
    fn router_sends_records_to_the_most_specific_file() {
        let tmp = tempfile::tempdir().unwrap();
        let cfg: LoggingConfig = HashMap::from([
            ("default".to_string(), section("info", "logs/taskhub.log", "info")),
            ("modkit".to_string(), section("info", "logs/modkit.log", "debug")),
            ("modkit::events".to_string(), section("info", "logs/events.log", "trace")),
        ]);
        let router = LogPlan::from_config(&cfg).file_router(tmp.path());

        for (target, line) in [
            ("modkit::events::bus", "bus\n"),
            ("modkit::registry", "registry\n"),
            ("taskhub_server", "server\n"),
        ] {
            let mut w = RoutedWriter(router.resolve(target));
            w.write_all(line.as_bytes()).unwrap();
            w.flush().unwrap();
        }

        let read = |name: &str| std::fs::read_to_string(tmp.path().join("logs").join(name)).unwrap();
        assert_eq!(read("events.log"), "bus\n");
        assert_eq!(read("modkit.log"), "registry\n");
        assert_eq!(read("taskhub.log"), "server\n");
    }

    #[test]
    fn unrouted_records_are_discarded() {
        let tmp = tempfile::tempdir().unwrap();
        let cfg: LoggingConfig =
            HashMap::from([("modkit".to_string(), section("info", "modkit.log", "info"))]);
        let router = LogPlan::from_config(&cfg).file_router(tmp.path());

        assert!(router.resolve("taskhub_server").is_none());
        let mut w = RoutedWriter(None);
        assert_eq!(w.write(b"dropped").unwrap(), 7);
    }
}
