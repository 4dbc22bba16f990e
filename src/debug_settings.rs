use std::fs::OpenOptions;
use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use once_cell::sync::Lazy;
use regex::Regex;
use tracing_subscriber::fmt::MakeWriter;

const DEBUG_LOG_FILENAME: &str = "cursorbar-debug.log";

static FILE_LOGGING_ENABLED: AtomicBool = AtomicBool::new(false);

static DEBUG_LOG_FILE: Lazy<Option<Arc<Mutex<std::fs::File>>>> = Lazy::new(|| {
    open_debug_log_file()
        .or_else(|_| open_fallback_log_file())
        .ok()
        .map(|file| Arc::new(Mutex::new(file)))
});

static EMAIL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}").expect("valid email pattern"));
static JWT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"eyJ[A-Za-z0-9_-]+\.[A-Za-z0-9_-]+\.[A-Za-z0-9_-]*").expect("valid jwt pattern")
});
static USER_ID: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"user_[A-Za-z0-9]+").expect("valid user id pattern"));

pub fn set_file_logging(enabled: bool) {
    FILE_LOGGING_ENABLED.store(enabled, Ordering::Relaxed);
}

pub fn file_logging_enabled() -> bool {
    FILE_LOGGING_ENABLED.load(Ordering::Relaxed)
}

pub fn file_writer() -> DebugFileWriter {
    DebugFileWriter {
        file: DEBUG_LOG_FILE.clone(),
    }
}

/// Mask identities and tokens in a raw API payload before logging it.
pub fn redact_value(raw: &str) -> String {
    let masked = JWT.replace_all(raw, "<token>");
    let masked = EMAIL.replace_all(&masked, "<email>");
    USER_ID.replace_all(&masked, "user_***").into_owned()
}

pub fn redact_option(value: Option<&str>) -> String {
    match value {
        None => "<none>".to_string(),
        Some(value) if value.chars().count() <= 4 => "***".to_string(),
        Some(value) => {
            let prefix: String = value.chars().take(4).collect();
            format!("{prefix}***")
        }
    }
}

fn log_dir() -> io::Result<PathBuf> {
    let data_dir = dirs::data_dir()
        .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "Missing data directory"))?;
    Ok(data_dir.join(crate::APP_DIR_NAME))
}

fn open_debug_log_file() -> io::Result<std::fs::File> {
    let log_dir = log_dir()?;
    std::fs::create_dir_all(&log_dir)?;
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(log_dir.join(DEBUG_LOG_FILENAME))
}

fn open_fallback_log_file() -> io::Result<std::fs::File> {
    let path = std::env::temp_dir().join(DEBUG_LOG_FILENAME);
    OpenOptions::new().create(true).append(true).open(path)
}

#[derive(Clone)]
pub struct DebugFileWriter {
    file: Option<Arc<Mutex<std::fs::File>>>,
}

impl<'a> MakeWriter<'a> for DebugFileWriter {
    type Writer = DebugFileWriterGuard;

    fn make_writer(&'a self) -> Self::Writer {
        DebugFileWriterGuard {
            file: self.file.clone(),
        }
    }
}

pub struct DebugFileWriterGuard {
    file: Option<Arc<Mutex<std::fs::File>>>,
}

impl Write for DebugFileWriterGuard {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let Some(file) = self.file.as_ref().filter(|_| file_logging_enabled()) else {
            return Ok(buf.len());
        };

        match file.lock() {
            Ok(mut file) => file.write(buf),
            Err(_) => Ok(buf.len()),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        let Some(file) = self.file.as_ref().filter(|_| file_logging_enabled()) else {
            return Ok(());
        };
        match file.lock() {
            Ok(mut file) => file.flush(),
            Err(_) => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn redacts_tokens_emails_and_user_ids() {
        let raw = r#"{"email":"dev@example.com","sub":"auth0|user_01HX9","token":"eyJhbGci.eyJzdWIi.sig"}"#;
        let masked = redact_value(raw);
        assert!(!masked.contains("dev@example.com"));
        assert!(!masked.contains("user_01HX9"));
        assert!(!masked.contains("eyJhbGci"));
        assert!(masked.contains("<email>"));
        assert!(masked.contains("user_***"));
        assert!(masked.contains("<token>"));
    }

    #[test]
    fn redacts_optional_values() {
        assert_eq!(redact_option(None), "<none>");
        assert_eq!(redact_option(Some("abc")), "***");
        assert_eq!(redact_option(Some("user_01HX9")), "user***");
    }

    #[test]
    fn disabled_writer_swallows_output() {
        set_file_logging(false);
        let writer = file_writer();
        let mut guard = writer.make_writer();
        assert_eq!(guard.write(b"hello").unwrap(), 5);
        guard.flush().unwrap();
    }
}
