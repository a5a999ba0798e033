//! 日志模块 - 提供文件日志和大小管理功能

use serde::{Deserialize, Serialize};
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tracing_subscriber::fmt::MakeWriter;

/// 日志配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogConfig {
    /// 是否启用文件日志
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// 最大日志文件大小（MB）
    #[serde(default = "default_max_size_mb")]
    pub max_size_mb: u32,
    /// 日志级别: "error", "warn", "info", "debug", "trace"
    #[serde(default = "default_level")]
    pub level: String,
}

fn default_enabled() -> bool {
    true
}

fn default_max_size_mb() -> u32 {
    5 // 默认 5MB
}

fn default_level() -> String {
    "info".to_string()
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            max_size_mb: default_max_size_mb(),
            level: default_level(),
        }
    }
}

impl LogConfig {
    /// 将配置的日志级别转换为 tracing Level
    pub fn tracing_level(&self) -> tracing::Level {
        match self.level.to_lowercase().as_str() {
            "error" => tracing::Level::ERROR,
            "warn" => tracing::Level::WARN,
            "debug" => tracing::Level::DEBUG,
            "trace" => tracing::Level::TRACE,
            _ => tracing::Level::INFO,
        }
    }
}

/// 带大小限制的日志写入器
pub struct SizeRotatingWriter {
    file_path: PathBuf,
    max_size: u64,
    writer: Arc<Mutex<Option<BufWriter<File>>>>,
}

impl SizeRotatingWriter {
    pub fn new(log_dir: &Path, max_size_mb: u32) -> io::Result<Self> {
        fs::create_dir_all(log_dir)?;

        let file_path = log_dir.join("casesync.log");
        let max_size = (max_size_mb as u64) * 1024 * 1024;

        let writer = Self::open_file(&file_path, max_size)?;

        Ok(Self {
            file_path,
            max_size,
            writer: Arc::new(Mutex::new(Some(writer))),
        })
    }

    fn open_file(file_path: &Path, max_size: u64) -> io::Result<BufWriter<File>> {
        // 检查现有文件大小，如果超过限制则轮转
        if file_path.exists() {
            if let Ok(metadata) = fs::metadata(file_path) {
                if metadata.len() > max_size {
                    Self::rotate_log(file_path)?;
                }
            }
        }

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(file_path)?;

        Ok(BufWriter::new(file))
    }

    /// 轮转日志文件：当前日志改名为 .old，旧备份被替换
    fn rotate_log(file_path: &Path) -> io::Result<()> {
        let backup_path = file_path.with_extension("log.old");

        if backup_path.exists() {
            fs::remove_file(&backup_path)?;
        }

        fs::rename(file_path, &backup_path)?;

        Ok(())
    }
}

/// 日志写入器包装
pub struct LogWriter {
    inner: Arc<Mutex<Option<BufWriter<File>>>>,
    file_path: PathBuf,
    max_size: u64,
}

impl Write for LogWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut guard = self.inner.lock().unwrap();

        if let Some(ref mut writer) = *guard {
            let result = writer.write(buf)?;
            writer.flush()?;

            // 检查文件大小，超限则轮转
            drop(guard);
            if self.file_path.exists() {
                if let Ok(metadata) = fs::metadata(&self.file_path) {
                    if metadata.len() > self.max_size {
                        let mut guard = self.inner.lock().unwrap();
                        if let Some(mut w) = guard.take() {
                            let _ = w.flush();
                        }

                        let _ = SizeRotatingWriter::rotate_log(&self.file_path);

                        if let Ok(new_writer) =
                            SizeRotatingWriter::open_file(&self.file_path, self.max_size)
                        {
                            *guard = Some(new_writer);
                        }
                    }
                }
            }

            Ok(result)
        } else {
            Err(io::Error::new(io::ErrorKind::Other, "Writer not available"))
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        let mut guard = self.inner.lock().unwrap();
        if let Some(ref mut writer) = *guard {
            writer.flush()
        } else {
            Ok(())
        }
    }
}

impl<'a> MakeWriter<'a> for SizeRotatingWriter {
    type Writer = LogWriter;

    fn make_writer(&'a self) -> Self::Writer {
        LogWriter {
            inner: self.writer.clone(),
            file_path: self.file_path.clone(),
            max_size: self.max_size,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_level_mapping_defaults_to_info() {
        let config = LogConfig {
            level: "nonsense".to_string(),
            ..LogConfig::default()
        };
        assert_eq!(config.tracing_level(), tracing::Level::INFO);

        let config = LogConfig {
            level: "DEBUG".to_string(),
            ..LogConfig::default()
        };
        assert_eq!(config.tracing_level(), tracing::Level::DEBUG);
    }

    #[test]
    fn test_writer_creates_log_file() {
        let dir = tempfile::tempdir().unwrap();
        let writer = SizeRotatingWriter::new(dir.path(), 1).unwrap();

        let mut w = writer.make_writer();
        w.write_all(b"hello\n").unwrap();
        w.flush().unwrap();

        let content = fs::read_to_string(dir.path().join("casesync.log")).unwrap();
        assert!(content.contains("hello"));
    }
}
