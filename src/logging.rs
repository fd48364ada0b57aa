use anyhow::{Context, Result};
use log::{LevelFilter, Log, Metadata, Record};
use std::fs;
use std::io::Write;
use std::path::Path;
use std::sync::{Arc, Mutex};
use tracing_appender::rolling::{RollingFileAppender, Rotation};

/// Logger that writes to a rotating file and echoes to stderr
struct SchemerLogger {
    file_writer: Arc<Mutex<RollingFileAppender>>,
    file_level: LevelFilter,
    echo_level: LevelFilter,
}

impl Log for SchemerLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= self.file_level || metadata.level() <= self.echo_level
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }

        let level = record.level();
        let line = format!(
            "{} [{}] {}: {}",
            chrono::Local::now().format("%Y-%m-%d %H:%M:%S"),
            level,
            record.target(),
            record.args()
        );

        if level <= self.file_level {
            if let Ok(mut writer) = self.file_writer.lock() {
                let _ = writeln!(writer, "{}", line);
            }
        }

        if level <= self.echo_level {
            eprintln!("{}", line);
        }
    }

    fn flush(&self) {
        if let Ok(mut writer) = self.file_writer.lock() {
            let _ = writer.flush();
        }
    }
}

/// Parse log level string to LevelFilter
pub fn parse_level(level_str: &str) -> LevelFilter {
    match level_str.trim().to_lowercase().as_str() {
        "off" => LevelFilter::Off,
        "error" => LevelFilter::Error,
        "warn" | "warning" => LevelFilter::Warn,
        "info" => LevelFilter::Info,
        "debug" => LevelFilter::Debug,
        "trace" => LevelFilter::Trace,
        _ => LevelFilter::Info,
    }
}

/// Initialize the global logger
///
/// Records at `file_level` or above go to a daily-rotated file next to
/// `log_file_path` (three files kept); records at `echo_level` or above
/// are also printed to stderr.
pub fn init_logger(log_file_path: &Path, file_level: &str, echo_level: &str) -> Result<()> {
    let dir = log_file_path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or(Path::new("."));
    fs::create_dir_all(dir)
        .with_context(|| format!("Failed to create log directory {:?}", dir))?;

    let file_appender = RollingFileAppender::builder()
        .rotation(Rotation::DAILY)
        .max_log_files(3)
        .filename_prefix(
            log_file_path
                .file_stem()
                .and_then(|s| s.to_str())
                .unwrap_or("schemer"),
        )
        .filename_suffix(
            log_file_path
                .extension()
                .and_then(|s| s.to_str())
                .unwrap_or("log"),
        )
        .build(dir)
        .context("Failed to create rotating file appender")?;

    let file_level = parse_level(file_level);
    let echo_level = parse_level(echo_level);

    let logger = SchemerLogger {
        file_writer: Arc::new(Mutex::new(file_appender)),
        file_level,
        echo_level,
    };

    log::set_boxed_logger(Box::new(logger)).context("Failed to set global logger")?;
    log::set_max_level(file_level.max(echo_level));

    Ok(())
}
