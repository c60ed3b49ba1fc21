//! provides logging helpers

use std::path::Path;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::RollingFileAppender;
use tracing_appender::rolling::Rotation;
use tracing_subscriber::filter::{self};
use tracing_subscriber::fmt::layer;
use tracing_subscriber::prelude::*;
use tracing_subscriber::registry;

/// Number of rotated log files kept on disk.
const MAX_LOG_FILES: usize = 3;

fn env_filter() -> filter::EnvFilter {
    filter::EnvFilter::builder()
        .with_default_directive(filter::LevelFilter::INFO.into())
        .from_env_lossy()
}

/// Splits a log file path into the directory the appender writes to and the
/// file name prefix it rotates under.
fn appender_target(log_file: &Path) -> Option<(&Path, &str)> {
    let file = log_file.file_name()?.to_str()?;
    let dir = match log_file.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    Some((dir, file))
}

/// initiate the global tracing subscriber
///
/// Events always go to stderr. When `log_file` is set, they are mirrored to a
/// daily rotated file; the returned guard must be kept alive for the lifetime
/// of the process so buffered lines are flushed.
pub fn init<P: AsRef<Path>>(log_file: Option<P>) -> Option<WorkerGuard> {
    let stderr_layer = layer()
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_filter(env_filter());

    let file = log_file.as_ref().and_then(|path| {
        let path = path.as_ref();
        let Some((dir, prefix)) = appender_target(path) else {
            eprintln!("ignoring invalid log file path {}", path.display());
            return None;
        };
        match RollingFileAppender::builder()
            .rotation(Rotation::DAILY)
            .filename_prefix(prefix)
            .max_log_files(MAX_LOG_FILES)
            .build(dir)
        {
            Ok(appender) => Some(tracing_appender::non_blocking(appender)),
            Err(e) => {
                eprintln!("failed to create rolling file appender: {e}");
                None
            }
        }
    });

    match file {
        Some((writer, guard)) => {
            let file_layer = layer()
                .with_writer(writer)
                .with_ansi(false)
                .with_filter(env_filter());
            registry().with(stderr_layer).with(file_layer).init();
            Some(guard)
        }
        None => {
            registry().with(stderr_layer).init();
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use similar_asserts::assert_eq;

    use super::*;

    #[test]
    fn appender_target_splits_dir_and_prefix() {
        let target = appender_target(Path::new("/var/log/device-plugin.log"));
        assert_eq!(
            target,
            Some((Path::new("/var/log"), "device-plugin.log"))
        );
    }

    #[test]
    fn appender_target_defaults_to_current_dir() {
        let target = appender_target(Path::new("plugin.log"));
        assert_eq!(target, Some((Path::new("."), "plugin.log")));
    }

    #[test]
    fn appender_target_rejects_directory_like_paths() {
        assert_eq!(appender_target(Path::new("/")), None);
    }
}
