use super::{
    ByteStream, FileInfo, FileMeta, Storage, UploadMetadata, IO_TIMEOUT_SECS, OP_TIMEOUT_SECS,
};
use crate::error::StorageError;
use async_trait::async_trait;
use futures::{StreamExt, TryStreamExt};
use opendal::{layers::TimeoutLayer, Metakey, Operator};
use std::time::Duration;

/// 分块上传的单块大小
const MULTIPART_CHUNK_SIZE: usize = 5 * 1024 * 1024;

/// 对象存储型后端（S3 兼容），operator 以命名空间前缀为根
pub struct S3Storage {
    operator: Operator,
    name: String,
}

impl S3Storage {
    pub async fn new(
        bucket: &str,
        region: &str,
        access_key: Option<&str>,
        secret_key: Option<&str>,
        session_token: Option<&str>,
        endpoint: Option<String>,
        prefix: Option<String>,
    ) -> anyhow::Result<Self> {
        use opendal::services::S3;

        let mut builder = S3::default().bucket(bucket).region(region);

        // 未显式配置凭证时走默认凭证链（IAM 角色、profile 等）
        match (access_key, secret_key) {
            (Some(ak), Some(sk)) => {
                builder = builder.access_key_id(ak).secret_access_key(sk);
                if let Some(token) = session_token {
                    builder = builder.session_token(token);
                }
                tracing::info!("使用环境提供的 AWS 凭证");
            }
            _ => {
                tracing::info!("使用默认 AWS 凭证链");
            }
        }

        if let Some(ref ep) = endpoint {
            builder = builder.endpoint(ep);
        }

        if let Some(ref p) = prefix {
            builder = builder.root(p);
        }

        // 添加超时层
        let operator = Operator::new(builder)?
            .layer(
                TimeoutLayer::default()
                    .with_timeout(Duration::from_secs(OP_TIMEOUT_SECS))
                    .with_io_timeout(Duration::from_secs(IO_TIMEOUT_SECS)),
            )
            .finish();

        let name = format!(
            "s3://{}{}",
            bucket,
            prefix
                .as_deref()
                .map(|p| format!("/{}", p.trim_matches('/')))
                .unwrap_or_default()
        );

        Ok(Self { operator, name })
    }
}

#[async_trait]
impl Storage for S3Storage {
    async fn list_files(&self, prefix: Option<&str>) -> Result<Vec<FileInfo>, StorageError> {
        let mut files = Vec::new();
        let path = prefix.unwrap_or("");

        // lister 内部透明处理分页，这里拿到的是完整列表
        let mut lister = self
            .operator
            .lister_with(path)
            .recursive(true)
            .metakey(Metakey::ContentLength | Metakey::LastModified | Metakey::Mode)
            .await?;

        while let Some(entry) = lister.try_next().await? {
            let path_str = entry.path().to_string();

            // 跳过根目录
            if path_str.is_empty() || path_str == "/" {
                continue;
            }

            let meta = entry.metadata();

            files.push(FileInfo {
                path: path_str.trim_start_matches('/').to_string(),
                size: meta.content_length(),
                modified_time: meta.last_modified().map_or(0, |t| t.timestamp()),
                is_dir: meta.is_dir(),
                checksum: meta.etag().map(|s| s.trim_matches('"').to_string()),
            });
        }

        Ok(files)
    }

    async fn stat(&self, path: &str) -> Result<Option<FileMeta>, StorageError> {
        match self.operator.stat(path).await {
            Ok(meta) => Ok(Some(FileMeta {
                size: meta.content_length(),
                modified_time: meta.last_modified().map_or(0, |t| t.timestamp()),
                is_dir: meta.is_dir(),
                etag: meta.etag().map(|s| s.trim_matches('"').to_string()),
            })),
            Err(e) if e.kind() == opendal::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn read(&self, path: &str) -> Result<Vec<u8>, StorageError> {
        let data = self.operator.read(path).await?;
        Ok(data.to_vec())
    }

    async fn write(
        &self,
        path: &str,
        data: Vec<u8>,
        meta: Option<&UploadMetadata>,
    ) -> Result<(), StorageError> {
        let mut write = self.operator.write_with(path, data);
        if let Some(m) = meta {
            if let Some(ct) = &m.content_type {
                write = write.content_type(ct);
            }
            write = write.user_metadata(m.to_pairs());
        }
        write.await?;
        Ok(())
    }

    async fn write_stream(
        &self,
        path: &str,
        mut stream: ByteStream,
        _total_size: Option<u64>,
        meta: Option<&UploadMetadata>,
    ) -> Result<(), StorageError> {
        let mut init = self.operator.writer_with(path).chunk(MULTIPART_CHUNK_SIZE);
        if let Some(m) = meta {
            if let Some(ct) = &m.content_type {
                init = init.content_type(ct);
            }
            init = init.user_metadata(m.to_pairs());
        }
        let mut writer = init.await?;

        while let Some(chunk) = stream.next().await {
            let chunk = match chunk {
                Ok(c) => c,
                Err(e) => {
                    // 分块失败，放弃整个对象，半成品不可见
                    let _ = writer.abort().await;
                    return Err(e);
                }
            };
            if let Err(e) = writer.write(chunk).await {
                let _ = writer.abort().await;
                return Err(e.into());
            }
        }

        writer.close().await?;
        Ok(())
    }

    async fn delete(&self, path: &str) -> Result<(), StorageError> {
        // S3 删除不存在的对象不会报错
        self.operator.delete(path).await?;
        Ok(())
    }

    async fn verify_access(&self) -> Result<(), StorageError> {
        self.operator.check().await?;
        Ok(())
    }

    fn name(&self) -> &str {
        &self.name
    }
}
