pub mod local;
pub mod memory;
pub mod s3;
pub mod webdav;

use crate::config::{StorageConfig, StorageType};
use crate::error::StorageError;
use async_trait::async_trait;
use bytes::Bytes;
use futures::Stream;
use serde::{Deserialize, Serialize};
use std::pin::Pin;

pub use local::LocalStorage;
pub use memory::MemoryStorage;
pub use s3::S3Storage;
pub use webdav::WebDavStorage;

// ============ 公共常量 ============

/// 非 IO 操作超时（秒）- stat, delete 等
pub const OP_TIMEOUT_SECS: u64 = 60;
/// IO 操作超时（秒）- read, write 等
pub const IO_TIMEOUT_SECS: u64 = 300;

/// 分块写入的字节流
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes, StorageError>> + Send>>;

/// 远程对象信息
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileInfo {
    pub path: String,
    pub size: u64,
    pub modified_time: i64,
    pub is_dir: bool,
    pub checksum: Option<String>,
}

/// 对象元数据（用于快速检查）
#[derive(Debug, Clone)]
pub struct FileMeta {
    pub size: u64,
    pub modified_time: i64,
    pub is_dir: bool,
    pub etag: Option<String>,
}

/// 上传时附加到对象上的描述性元数据
#[derive(Debug, Clone)]
pub struct UploadMetadata {
    pub original_name: String,
    pub uploaded_at: String,
    pub uploader: String,
    pub checksum: String,
    pub content_type: Option<String>,
}

impl UploadMetadata {
    /// 转成键值对，键名沿用原上传工具的约定
    pub fn to_pairs(&self) -> Vec<(String, String)> {
        vec![
            ("original-filename".to_string(), self.original_name.clone()),
            ("upload-timestamp".to_string(), self.uploaded_at.clone()),
            ("uploader".to_string(), self.uploader.clone()),
            ("content-checksum".to_string(), self.checksum.clone()),
        ]
    }
}

/// 存储抽象接口
///
/// 每个目标后端实现同一能力集：列举、读写、删除、访问探测。
/// 删除不存在的对象视为成功；错误按可重试性分类（见 [`StorageError`]）。
#[async_trait]
pub trait Storage: Send + Sync {
    /// 递归列出所有对象（分页由实现内部处理，调用方拿到完整列表）
    async fn list_files(&self, prefix: Option<&str>) -> Result<Vec<FileInfo>, StorageError>;

    /// 获取对象元数据，不存在返回 None
    async fn stat(&self, path: &str) -> Result<Option<FileMeta>, StorageError>;

    /// 读取整个对象
    async fn read(&self, path: &str) -> Result<Vec<u8>, StorageError>;

    /// 写入整个对象，可附带描述性元数据
    async fn write(
        &self,
        path: &str,
        data: Vec<u8>,
        meta: Option<&UploadMetadata>,
    ) -> Result<(), StorageError>;

    /// 分块写入（用于大对象）；所有分块作为一个逻辑对象原子落盘，
    /// 任一分块失败时整个对象不可见
    async fn write_stream(
        &self,
        path: &str,
        mut stream: ByteStream,
        _total_size: Option<u64>,
        meta: Option<&UploadMetadata>,
    ) -> Result<(), StorageError> {
        // 默认实现：收集所有分块后整体写入
        use futures::StreamExt;
        let mut data = Vec::new();
        while let Some(chunk) = stream.next().await {
            data.extend_from_slice(&chunk?);
        }
        self.write(path, data, meta).await
    }

    /// 删除对象；对象不存在视为成功
    async fn delete(&self, path: &str) -> Result<(), StorageError>;

    /// 检查对象是否存在
    async fn exists(&self, path: &str) -> Result<bool, StorageError> {
        Ok(self.stat(path).await?.is_some())
    }

    /// 访问探测：验证凭证与连通性，失败时整个运行中止
    async fn verify_access(&self) -> Result<(), StorageError> {
        self.list_files(None).await.map(|_| ())
    }

    /// 获取存储名称（用于日志）
    fn name(&self) -> &str;
}

/// 根据配置创建存储实例
pub async fn create_storage(
    config: &StorageConfig,
) -> anyhow::Result<std::sync::Arc<dyn Storage>> {
    match config.typ {
        StorageType::Local => {
            let path = config
                .path
                .as_ref()
                .ok_or_else(|| anyhow::anyhow!("Local storage requires path"))?;
            tracing::info!("初始化本地存储: {}", path);
            Ok(std::sync::Arc::new(LocalStorage::new(path)?) as std::sync::Arc<dyn Storage>)
        }
        StorageType::S3 => {
            let bucket = config
                .bucket
                .as_ref()
                .ok_or_else(|| anyhow::anyhow!("S3 storage requires bucket"))?;
            let region = config
                .region
                .as_ref()
                .ok_or_else(|| anyhow::anyhow!("S3 storage requires region"))?;
            tracing::info!(
                "初始化S3存储: bucket={}, region={}, prefix={:?}",
                bucket,
                region,
                config.prefix
            );
            Ok(std::sync::Arc::new(
                S3Storage::new(
                    bucket,
                    region,
                    config.access_key.as_deref(),
                    config.secret_key.as_deref(),
                    config.session_token.as_deref(),
                    config.endpoint.clone(),
                    config.prefix.clone(),
                )
                .await?,
            ) as std::sync::Arc<dyn Storage>)
        }
        StorageType::WebDav => {
            let endpoint = config
                .webdav_endpoint
                .as_ref()
                .ok_or_else(|| anyhow::anyhow!("WebDAV storage requires endpoint"))?;
            let username = config
                .username
                .as_ref()
                .ok_or_else(|| anyhow::anyhow!("WebDAV storage requires username"))?;
            let password = config
                .password
                .as_ref()
                .ok_or_else(|| anyhow::anyhow!("WebDAV storage requires password"))?;
            tracing::info!(
                "初始化WebDAV存储: endpoint={}, root={:?}",
                endpoint,
                config.root
            );
            Ok(std::sync::Arc::new(
                WebDavStorage::new(endpoint, username, password, config.root.clone()).await?,
            ) as std::sync::Arc<dyn Storage>)
        }
    }
}
