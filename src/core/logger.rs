//! Rotating, redacted sync-run logger, grounded on the teacher's
//! `EnhancedDebugLogger`/`RotatingLogger` (size-capped gzip rotation via
//! `flate2`, cross-process locking via `fs2`, regex redaction).

use chrono::Local;
use flate2::write::GzEncoder;
use flate2::Compression;
use fs2::FileExt;
use regex::Regex;
use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{BufReader, Write};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;
use uuid::Uuid;

const LOG_ROTATION_SIZE_MB: u64 = 8;
const MAX_ARCHIVES: u32 = 5;
const ROTATION_CHECK_INTERVAL: u32 = 200;

struct RotatingLogger {
    log_path: PathBuf,
    write_count: AtomicU32,
}

impl RotatingLogger {
    fn new(log_path: PathBuf) -> Self {
        if let Some(parent) = log_path.parent() {
            let _ = std::fs::create_dir_all(parent);
        }
        Self {
            log_path,
            write_count: AtomicU32::new(0),
        }
    }

    fn write_with_rotation(&self, line: &str) -> std::io::Result<()> {
        if self.write_count.fetch_add(1, Ordering::Relaxed) % ROTATION_CHECK_INTERVAL == 0 {
            let _ = self.rotate_if_needed();
        }

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.log_path)?;
        writeln!(file, "{line}")
    }

    fn rotate_if_needed(&self) -> std::io::Result<()> {
        if !self.needs_rotation()? {
            return Ok(());
        }

        let lock_path = self.log_path.with_extension("lock");
        let lock_file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&lock_path)?;

        match lock_file.try_lock_exclusive() {
            Ok(()) => {
                if self.needs_rotation()? {
                    self.perform_rotation()?;
                }
                let _ = std::fs::remove_file(&lock_path);
                Ok(())
            }
            Err(_) => Ok(()),
        }
    }

    fn needs_rotation(&self) -> std::io::Result<bool> {
        if !self.log_path.exists() {
            return Ok(false);
        }
        Ok(std::fs::metadata(&self.log_path)?.len() >= LOG_ROTATION_SIZE_MB * 1024 * 1024)
    }

    fn perform_rotation(&self) -> std::io::Result<()> {
        let timestamp = Local::now().format("%Y%m%d_%H%M%S");
        let filename = self.log_path.file_name().unwrap().to_str().unwrap();
        let archive_path = self
            .log_path
            .parent()
            .unwrap()
            .join(format!("{filename}.{timestamp}.gz"));

        let temp_path = self.log_path.with_extension("rotating");
        std::fs::rename(&self.log_path, &temp_path)?;

        let source_file = File::open(&temp_path)?;
        let target_file = File::create(&archive_path)?;
        let mut encoder = GzEncoder::new(target_file, Compression::default());
        std::io::copy(&mut BufReader::new(source_file), &mut encoder)?;
        encoder.finish()?;
        std::fs::remove_file(&temp_path)?;

        let _ = self.cleanup_old_archives();
        Ok(())
    }

    fn cleanup_old_archives(&self) -> std::io::Result<()> {
        let log_dir = self.log_path.parent().unwrap();
        let filename = self.log_path.file_name().unwrap().to_str().unwrap();

        let mut archives = Vec::new();
        for entry in std::fs::read_dir(log_dir)? {
            let entry = entry?;
            let name = entry.file_name().to_string_lossy().to_string();
            if name.starts_with(&format!("{filename}.")) && name.ends_with(".gz") {
                archives.push((entry.path(), entry.metadata()?.modified()?));
            }
        }
        archives.sort_by_key(|(_, modified)| *modified);
        if archives.len() > MAX_ARCHIVES as usize {
            for (path, _) in archives.iter().take(archives.len() - MAX_ARCHIVES as usize) {
                let _ = std::fs::remove_file(path);
            }
        }
        Ok(())
    }
}

/// Gated by `SYNCENGINE_DEBUG` (checked via [`parse_env_bool`]) or an
/// explicit constructor flag for embedders that don't want env coupling.
pub fn parse_env_bool(env_var: &str) -> bool {
    std::env::var(env_var)
        .map(|v| v.trim().eq_ignore_ascii_case("true"))
        .unwrap_or(false)
}

pub struct SyncLogger {
    enabled: bool,
    logger: Mutex<RotatingLogger>,
    correlation_id: String,
    redaction_patterns: Vec<Regex>,
}

impl SyncLogger {
    pub fn new(log_path: PathBuf, enabled: bool) -> Self {
        Self {
            enabled,
            logger: Mutex::new(RotatingLogger::new(log_path)),
            correlation_id: Uuid::new_v4().to_string()[..8].to_string(),
            redaction_patterns: Self::compile_redaction_patterns(),
        }
    }

    pub fn from_env(log_path: PathBuf) -> Self {
        Self::new(log_path, parse_env_bool("SYNCENGINE_DEBUG"))
    }

    pub fn default_log_path() -> PathBuf {
        let mut path = dirs::home_dir().unwrap_or_else(|| PathBuf::from("."));
        path.push(".syncengine");
        path.push("syncengine-debug.log");
        path
    }

    fn compile_redaction_patterns() -> Vec<Regex> {
        [
            r"(?i)authorization[:\s]+[^\s\n]+",
            r"(?i)bearer[:\s]+[^\s\n]+",
            r"(?i)token[:\s]+[^\s\n]+",
            r"(?i)api[_-]?key[:\s]+[^\s\n]+",
        ]
        .iter()
        .filter_map(|pattern| Regex::new(pattern).ok())
        .collect()
    }

    fn redact(&self, text: &str) -> String {
        let mut redacted = text.to_string();
        for pattern in &self.redaction_patterns {
            redacted = pattern.replace_all(&redacted, "[REDACTED]").to_string();
        }
        redacted
    }

    fn log(&self, component: &str, event: &str, message: &str, fields: HashMap<String, String>) {
        if !self.enabled {
            return;
        }
        let timestamp = Local::now().to_rfc3339();
        let redacted = self.redact(message);
        let mut line = format!(
            "{timestamp} [{component}] \"{event}\",\"{redacted}\",\"{}\"",
            self.correlation_id
        );
        if !fields.is_empty() {
            let kv: Vec<String> = fields.iter().map(|(k, v)| format!("{k}={v}")).collect();
            line.push_str(&format!(" [{}]", kv.join(" ")));
        }
        if let Ok(logger) = self.logger.lock() {
            let _ = logger.write_with_rotation(&line);
        }
    }

    pub fn run_start(&self, server_id: &str, url: &str) {
        let mut fields = HashMap::new();
        fields.insert("server_id".to_string(), server_id.to_string());
        self.log("Engine", "run_start", url, fields);
    }

    pub fn phase_complete(&self, phase: &str, elapsed_ms: u64) {
        let mut fields = HashMap::new();
        fields.insert("elapsed_ms".to_string(), elapsed_ms.to_string());
        self.log("Engine", "phase_complete", phase, fields);
    }

    pub fn probe_retry(&self, phase: &str, reason: &str) {
        self.log("Probe", "retry", reason, {
            let mut f = HashMap::new();
            f.insert("phase".to_string(), phase.to_string());
            f
        });
    }

    /// Advisory-only: a probe's response headers carried a recognizable
    /// CDN/edge-proxy signature (spec §4.3). Never affects whether the
    /// sample is accepted.
    pub fn cdn_signature_detected(&self, server_id: &str) {
        let mut fields = HashMap::new();
        fields.insert("server_id".to_string(), server_id.to_string());
        self.log(
            "Probe",
            "cdn_signature_detected",
            "response carried a CDN/edge-proxy signature",
            fields,
        );
    }

    pub fn run_error(&self, message: &str) {
        self.log("Engine", "run_error", message, HashMap::new());
    }

    pub fn correlation_id(&self) -> &str {
        &self.correlation_id
    }
}
