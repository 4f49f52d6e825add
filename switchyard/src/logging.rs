//! Logging and environment bootstrap.
//!
//! Stderr always gets a sink. When `GRIZZLY_EXTRAS_LOGLEVEL` is `DEBUG`,
//! a second sink writes to
//! `${GRIZZLY_CONTEXT_ROOT}/logs/async-messaged.<hostname>.log`.

use std::fs;
use std::io;
use std::path::Path;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Log directory root.
pub const CONTEXT_ROOT_ENV: &str = "GRIZZLY_CONTEXT_ROOT";
/// `INFO` by default; `DEBUG` enables the file sink.
pub const LOG_LEVEL_ENV: &str = "GRIZZLY_EXTRAS_LOGLEVEL";

#[derive(Clone)]
struct FileWriter(Arc<Mutex<fs::File>>);

impl io::Write for FileWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.0.lock().flush()
    }
}

/// Install the subscriber. Safe to call more than once; later calls are
/// no-ops.
pub fn configure() {
    let level = std::env::var(LOG_LEVEL_ENV).unwrap_or_else(|_| "INFO".to_string());
    let filter = EnvFilter::try_new(level.to_ascii_lowercase())
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let file_layer = level
        .eq_ignore_ascii_case("debug")
        .then(open_log_file)
        .flatten()
        .map(|writer| {
            fmt::layer()
                .with_ansi(false)
                .with_writer(move || writer.clone())
        });

    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(io::stderr))
        .with(file_layer)
        .try_init();
}

fn open_log_file() -> Option<FileWriter> {
    let root = std::env::var(CONTEXT_ROOT_ENV).ok()?;
    let dir = Path::new(&root).join("logs");
    fs::create_dir_all(&dir).ok()?;

    let host = hostname::get().ok()?.to_string_lossy().into_owned();
    let path = dir.join(format!("async-messaged.{host}.log"));

    let file = fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .ok()?;
    Some(FileWriter(Arc::new(Mutex::new(file))))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_file_name_follows_hostname() {
        let dir = std::env::temp_dir().join(format!("switchyard-logtest-{}", std::process::id()));
        std::env::set_var(CONTEXT_ROOT_ENV, &dir);

        let writer = open_log_file();
        assert!(writer.is_some());

        let host = hostname::get().unwrap().to_string_lossy().into_owned();
        let expected = dir.join("logs").join(format!("async-messaged.{host}.log"));
        assert!(expected.exists());

        std::env::remove_var(CONTEXT_ROOT_ENV);
        let _ = fs::remove_dir_all(&dir);
    }
}
