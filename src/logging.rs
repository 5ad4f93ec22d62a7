//! Tracing/logging initialization for the CLI.

use tracing_subscriber::EnvFilter;

/// Wrapper type to write logs to file or stderr.
struct FileOrStderr {
    file: Option<std::sync::Mutex<std::fs::File>>,
}

impl<'a> tracing_subscriber::fmt::MakeWriter<'a> for FileOrStderr {
    type Writer = Box<dyn std::io::Write + 'a>;

    fn make_writer(&'a self) -> Self::Writer {
        self.file
            .as_ref()
            .and_then(|mutex| mutex.lock().ok())
            .and_then(|file| file.try_clone().ok())
            .map_or_else(
                || Box::new(std::io::stderr()) as Self::Writer,
                |cloned| Box::new(cloned) as Self::Writer,
            )
    }
}

/// Map a user-facing log level name onto a tracing filter directive.
fn filter_for_level(loglevel: &str) -> &'static str {
    match loglevel.to_uppercase().as_str() {
        "DEBUG" => "debug",
        "WARNING" => "warn",
        "ERROR" => "error",
        // tracing has no CRITICAL; error is the closest severity
        "CRITICAL" => "error",
        _ => "info",
    }
}

/// Initialize tracing-subscriber for the orchestrator.
///
/// `logfile` of `"stderr"` (or an unopenable path) falls back to stderr.
pub fn init_logging(logfile: &str, loglevel: &str) {
    use std::fs::OpenOptions;
    use std::sync::Mutex;

    let env_filter = EnvFilter::try_new(filter_for_level(loglevel))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let writer = if logfile == "stderr" {
        FileOrStderr { file: None }
    } else {
        match OpenOptions::new().create(true).append(true).open(logfile) {
            Ok(file) => FileOrStderr {
                file: Some(Mutex::new(file)),
            },
            Err(e) => {
                // Tracing is not yet initialized; eprintln! is the only output channel available.
                eprintln!("Warning: Could not open log file '{logfile}': {e}. Using stderr.");
                FileOrStderr { file: None }
            }
        }
    };

    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_writer(writer)
        .try_init();
}
