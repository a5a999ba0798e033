use super::{FileInfo, FileMeta, Storage, UploadMetadata};
use crate::error::StorageError;
use async_trait::async_trait;
use std::path::PathBuf;
use tokio::fs;
use walkdir::WalkDir;

/// 本地文件系统后端（本地镜像目标，也用于测试）
pub struct LocalStorage {
    base_path: PathBuf,
    name: String,
}

impl LocalStorage {
    pub fn new(path: &str) -> anyhow::Result<Self> {
        let base_path = PathBuf::from(path);
        if !base_path.exists() {
            std::fs::create_dir_all(&base_path)?;
        }
        let name = format!("local:{}", path);
        Ok(Self { base_path, name })
    }

    fn resolve_path(&self, path: &str) -> PathBuf {
        let path = path.trim_start_matches('/').trim_start_matches('\\');
        if path.is_empty() {
            self.base_path.clone()
        } else {
            self.base_path.join(path)
        }
    }

    /// 规范化路径分隔符（统一使用 /）
    fn normalize_path(path: &str) -> String {
        path.replace('\\', "/")
    }
}

#[async_trait]
impl Storage for LocalStorage {
    async fn list_files(&self, prefix: Option<&str>) -> Result<Vec<FileInfo>, StorageError> {
        let base = prefix.map_or_else(|| self.base_path.clone(), |p| self.resolve_path(p));

        if !base.exists() {
            return Ok(Vec::new());
        }

        let base_path = self.base_path.clone();

        // 使用 spawn_blocking 避免阻塞 async runtime
        let entries: Vec<_> = tokio::task::spawn_blocking(move || {
            WalkDir::new(&base)
                .follow_links(false)
                .into_iter()
                .filter_map(|e| e.ok())
                .filter_map(|entry| {
                    let path = entry.path();
                    let metadata = entry.metadata().ok()?;

                    let relative_path = path.strip_prefix(&base_path).ok()?.to_str()?.to_string();

                    // 跳过根目录本身
                    if relative_path.is_empty() {
                        return None;
                    }

                    let modified = metadata
                        .modified()
                        .ok()?
                        .duration_since(std::time::UNIX_EPOCH)
                        .ok()?
                        .as_secs() as i64;

                    Some(FileInfo {
                        path: Self::normalize_path(&relative_path),
                        size: if metadata.is_dir() { 0 } else { metadata.len() },
                        modified_time: modified,
                        is_dir: metadata.is_dir(),
                        checksum: None,
                    })
                })
                .collect()
        })
        .await
        .map_err(|e| StorageError::Permanent(format!("列目录任务失败: {}", e)))?;

        Ok(entries)
    }

    async fn stat(&self, path: &str) -> Result<Option<FileMeta>, StorageError> {
        let full_path = self.resolve_path(path);

        match fs::metadata(&full_path).await {
            Ok(metadata) => {
                let modified = metadata
                    .modified()
                    .ok()
                    .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
                    .map_or(0, |d| d.as_secs() as i64);

                Ok(Some(FileMeta {
                    size: if metadata.is_dir() { 0 } else { metadata.len() },
                    modified_time: modified,
                    is_dir: metadata.is_dir(),
                    etag: None,
                }))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn read(&self, path: &str) -> Result<Vec<u8>, StorageError> {
        let data = fs::read(self.resolve_path(path)).await?;
        Ok(data)
    }

    async fn write(
        &self,
        path: &str,
        data: Vec<u8>,
        _meta: Option<&UploadMetadata>,
    ) -> Result<(), StorageError> {
        let full_path = self.resolve_path(path);

        if let Some(parent) = full_path.parent() {
            fs::create_dir_all(parent).await?;
        }

        // 使用临时文件写入，然后原子重命名
        let temp_path = full_path.with_extension("tmp");
        fs::write(&temp_path, data).await?;
        fs::rename(&temp_path, &full_path).await?;

        Ok(())
    }

    async fn delete(&self, path: &str) -> Result<(), StorageError> {
        let full_path = self.resolve_path(path);

        if !full_path.exists() {
            return Ok(());
        }

        if full_path.is_dir() {
            fs::remove_dir_all(&full_path).await?;
        } else {
            fs::remove_file(&full_path).await?;
        }

        Ok(())
    }

    fn name(&self) -> &str {
        &self.name
    }
}
