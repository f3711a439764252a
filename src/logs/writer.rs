use crate::error::{CorePoolError, Result};
use crate::logs::{LogSink, Severity};
use chrono::{DateTime, Local};
use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// Default maximum log file size before rotation (10MB)
const DEFAULT_MAX_LOG_SIZE: u64 = 10 * 1024 * 1024;

/// Open log file for a single tag
struct TagLog {
    path: PathBuf,
    file: File,
    size: u64,
}

/// FileSink appends core output to `<log_dir>/<tag>.log`
/// with automatic rotation based on file size
pub struct FileSink {
    /// Directory where log files are stored
    log_dir: PathBuf,
    /// Maximum size in bytes before rotation
    max_size: u64,
    /// Open files keyed by tag
    files: Mutex<HashMap<String, TagLog>>,
}

impl FileSink {
    /// Create a new FileSink writing into `log_dir`
    ///
    /// # Arguments
    /// * `log_dir` - Directory where log files will be stored
    ///
    /// # Returns
    /// * `Ok(FileSink)` - Directory exists or was created
    /// * `Err(CorePoolError)` - Failed to create the directory
    pub fn new<P: AsRef<Path>>(log_dir: P) -> Result<Self> {
        Self::with_max_size(log_dir, DEFAULT_MAX_LOG_SIZE)
    }

    /// Create a new FileSink with custom maximum log size
    pub fn with_max_size<P: AsRef<Path>>(log_dir: P, max_size: u64) -> Result<Self> {
        let log_dir = log_dir.as_ref().to_path_buf();

        std::fs::create_dir_all(&log_dir)
            .map_err(|e| CorePoolError::LogError(format!("Failed to create log directory: {}", e)))?;

        Ok(Self {
            log_dir,
            max_size,
            files: Mutex::new(HashMap::new()),
        })
    }

    /// Path of the active log file for a tag
    pub fn path_for(&self, tag: &str) -> PathBuf {
        self.log_dir.join(format!("{}.log", sanitize(tag)))
    }

    pub fn log_dir(&self) -> &Path {
        &self.log_dir
    }

    pub fn max_size(&self) -> u64 {
        self.max_size
    }

    fn append(&self, severity: Severity, tag: &str, message: &str) -> Result<()> {
        let mut files = self.files.lock().unwrap_or_else(|e| e.into_inner());

        if !files.contains_key(tag) {
            let path = self.path_for(tag);
            let (file, size) = open_append(&path)?;
            files.insert(tag.to_string(), TagLog { path, file, size });
        }
        let log = files
            .get_mut(tag)
            .ok_or_else(|| CorePoolError::LogError(format!("No log file for {}", tag)))?;

        // Check if rotation is needed before writing
        if log.size >= self.max_size {
            rotate_log(&log.path)?;
            let (file, size) = open_append(&log.path)?;
            log.file = file;
            log.size = size;
        }

        let entry = format_log_entry(&Local::now(), severity, message);

        log.file
            .write_all(&entry)
            .map_err(|e| CorePoolError::LogError(format!("Failed to write to log: {}", e)))?;

        log.size += entry.len() as u64;

        Ok(())
    }
}

impl LogSink for FileSink {
    fn write(&self, severity: Severity, tag: &str, message: &str) {
        if let Err(e) = self.append(severity, tag, message) {
            tracing::warn!("Dropping log line for {}: {}", tag, e);
        }
    }
}

/// Format: [YYYY-MM-DD HH:MM:SS.mmm] [L] <message>
fn format_log_entry(timestamp: &DateTime<Local>, severity: Severity, message: &str) -> Vec<u8> {
    let timestamp_str = timestamp.format("%Y-%m-%d %H:%M:%S%.3f").to_string();
    format!("[{}] [{}] {}\n", timestamp_str, severity.label(), message).into_bytes()
}

fn open_append(path: &Path) -> Result<(File, u64)> {
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|e| CorePoolError::LogFileError(format!("{}: {}", path.display(), e)))?;

    let size = file.metadata().map(|m| m.len()).unwrap_or(0);

    Ok((file, size))
}

/// Rotate a log file by renaming it with a timestamp
fn rotate_log(file_path: &Path) -> Result<()> {
    let timestamp = Local::now().format("%Y%m%d-%H%M%S%.3f").to_string();
    let parent = file_path
        .parent()
        .ok_or_else(|| CorePoolError::LogRotationError("Invalid log file path".to_string()))?;

    let file_stem = file_path
        .file_stem()
        .and_then(|s| s.to_str())
        .ok_or_else(|| CorePoolError::LogRotationError("Invalid log file name".to_string()))?;

    let rotated_path = parent.join(format!("{}-{}.log", file_stem, timestamp));

    std::fs::rename(file_path, &rotated_path)
        .map_err(|e| CorePoolError::LogRotationError(format!("Failed to rotate log: {}", e)))?;

    Ok(())
}

/// Tags come from executable names; keep them to a single path component
fn sanitize(tag: &str) -> String {
    let cleaned: String = tag
        .chars()
        .map(|c| if c == '/' || c == '\\' { '_' } else { c })
        .collect();

    if cleaned.is_empty() || cleaned == "." || cleaned == ".." {
        "core".to_string()
    } else {
        cleaned
    }
}
