use snapvault_core::AppConfig;
use std::env;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use tracing::info;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, EnvFilter};

/// Install stdout and file logging for the run.
///
/// `TRACING_LEVEL` and `LOG_FILE_PATH` take precedence over the configured
/// `log_level` and `log_file`. Keep the returned guard alive until exit.
pub fn init_logger(config: &AppConfig) -> impl Drop {
    let filter = env::var("TRACING_LEVEL").unwrap_or_else(|_| config.log_level.clone());
    let filter_layer = EnvFilter::try_new(&filter).unwrap_or_else(|_| EnvFilter::new("info"));

    let log_file_path = env::var("LOG_FILE_PATH")
        .map(PathBuf::from)
        .unwrap_or_else(|_| config.log_file_path());
    let (directory, file_name) = split_log_path(&log_file_path);

    let file_appender = tracing_appender::rolling::never(directory, file_name);
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    tracing_subscriber::registry()
        .with(
            fmt::layer()
                .with_writer(std::io::stdout)
                .pretty()
                .with_file(false)
                .without_time()
                .with_ansi(true),
        )
        .with(fmt::layer().with_writer(non_blocking).with_ansi(false))
        .with(filter_layer)
        .init();

    info!("Logging to stdout and {}", log_file_path.display());

    guard
}

fn split_log_path(path: &Path) -> (PathBuf, OsString) {
    let directory = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };
    let file_name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_else(|| OsString::from("snapvault.log"));
    (directory, file_name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_log_path() {
        assert_eq!(
            split_log_path(Path::new("./logs/snapvault.log")),
            (PathBuf::from("./logs"), OsString::from("snapvault.log"))
        );
        assert_eq!(
            split_log_path(Path::new("run.log")),
            (PathBuf::from("."), OsString::from("run.log"))
        );
    }
}
