//! 传输执行
//!
//! 严格按计划顺序执行：所有删除先于任何上传（清空后重传的屏障）。
//! 每个任务带重试；临时失败按退避延迟重试，永久失败立即终止该任务；
//! 单个任务的失败不影响其余任务。取消只在任务之间生效，
//! 进行中的传输让它自然结束，避免远程留下写了一半的对象。

use crate::config::TransferSettings;
use crate::core::planner::{TaskFailure, TaskStatus, TransferTask};
use crate::core::progress::{ProgressTracker, RunPhase, SyncProgress};
use crate::error::{FailureKind, StorageError};
use crate::storage::{ByteStream, Storage, UploadMetadata};
use bytes::Bytes;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::AsyncReadExt;
use tokio::sync::{mpsc, Semaphore};
use tracing::{debug, error, info, warn};

/// 重试退避：base * 2^(attempt-1)，base 为 0 时不等待（测试用）
#[derive(Debug, Clone, Copy)]
pub struct Backoff {
    base_delay_ms: u64,
}

impl Backoff {
    pub fn exponential(base_delay_ms: u64) -> Self {
        Self { base_delay_ms }
    }

    /// 零延迟退避，用于单元测试
    pub fn none() -> Self {
        Self { base_delay_ms: 0 }
    }

    /// 第 attempt 次尝试失败后的等待时长
    pub fn delay(&self, attempt: u32) -> Duration {
        let factor = 2u64.saturating_pow(attempt.saturating_sub(1));
        Duration::from_millis(self.base_delay_ms.saturating_mul(factor))
    }
}

/// 执行器配置
#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    /// 每个任务的最大尝试次数（含首次），至少为 1
    pub max_attempts: u32,
    pub backoff: Backoff,
    /// 达到该大小的文件走分块上传
    pub multipart_threshold: u64,
    /// 分块大小（字节）
    pub chunk_size: u64,
    /// 最大并发上传数，1 表示顺序执行
    pub max_concurrent_uploads: usize,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff: Backoff::exponential(2000),
            multipart_threshold: 10 * 1024 * 1024, // 10MB
            chunk_size: 5 * 1024 * 1024,           // 5MB
            max_concurrent_uploads: 1,
        }
    }
}

impl From<&TransferSettings> for ExecutorConfig {
    fn from(settings: &TransferSettings) -> Self {
        Self {
            max_attempts: settings.max_attempts.max(1),
            backoff: Backoff::exponential(settings.retry_base_delay_ms),
            multipart_threshold: settings.multipart_threshold,
            chunk_size: settings.chunk_size,
            max_concurrent_uploads: settings.max_concurrent_uploads.max(1),
        }
    }
}

/// 执行结果：所有任务（含因中止未执行的）加上中止原因
#[derive(Debug)]
pub struct ExecutionOutcome {
    pub tasks: Vec<TransferTask>,
    /// Some 表示队列被中止（取消或本地环境错误），剩余任务保持 Pending
    pub aborted: Option<String>,
}

/// 单次尝试的参数集
#[derive(Clone)]
struct AttemptParams {
    max_attempts: u32,
    backoff: Backoff,
    multipart_threshold: u64,
    chunk_size: u64,
    uploader_tag: String,
}

/// 单次上传尝试的结果
struct UploadDone {
    bytes: u64,
    checksum: String,
    metadata_warning: Option<String>,
}

/// 尝试级错误：环境错误中止整个队列，存储错误只影响当前任务
enum AttemptError {
    Environment(String),
    Storage(StorageError),
}

/// 传输执行器
pub struct TransferExecutor {
    storage: Arc<dyn Storage>,
    config: ExecutorConfig,
    cancelled: Arc<AtomicBool>,
}

impl TransferExecutor {
    pub fn new(
        storage: Arc<dyn Storage>,
        config: ExecutorConfig,
        cancelled: Arc<AtomicBool>,
    ) -> Self {
        Self {
            storage,
            config,
            cancelled,
        }
    }

    fn params(&self) -> AttemptParams {
        AttemptParams {
            max_attempts: self.config.max_attempts.max(1),
            backoff: self.config.backoff,
            multipart_threshold: self.config.multipart_threshold,
            chunk_size: self.config.chunk_size,
            uploader_tag: format!("casesync/{}", env!("CARGO_PKG_VERSION")),
        }
    }

    /// 执行一批任务：先全部删除，再上传
    pub async fn execute(
        &self,
        deletes: Vec<TransferTask>,
        uploads: Vec<TransferTask>,
        tracker: Arc<ProgressTracker>,
        progress_tx: Option<mpsc::Sender<SyncProgress>>,
    ) -> ExecutionOutcome {
        let params = self.params();
        let total = (deletes.len() + uploads.len()) as u32;
        let bytes_total: u64 = uploads.iter().map(|t| t.size).sum();

        let mut finished: Vec<TransferTask> = Vec::new();
        let mut aborted: Option<String> = None;
        let mut leftovers: Vec<TransferTask> = Vec::new();

        // 删除屏障：本轮全部删除完成之前不开始任何上传
        let mut deletes_iter = deletes.into_iter();
        for mut task in deletes_iter.by_ref() {
            if self.cancelled.load(Ordering::SeqCst) {
                aborted = Some("操作已取消".to_string());
                leftovers.push(task);
                break;
            }

            Self::run_delete(self.storage.as_ref(), &mut task, &params).await;
            tracker.record(&task);
            Self::send_progress(&progress_tx, &tracker, total, bytes_total, &task.identity).await;
            finished.push(task);
        }
        leftovers.extend(deletes_iter);

        let mut uploads_iter = uploads.into_iter();
        if aborted.is_none() {
            if self.config.max_concurrent_uploads <= 1 {
                // 顺序执行（默认）：结果顺序与计划顺序一致
                for mut task in uploads_iter.by_ref() {
                    if self.cancelled.load(Ordering::SeqCst) {
                        aborted = Some("操作已取消".to_string());
                        leftovers.push(task);
                        break;
                    }

                    let env_error =
                        Self::run_upload(self.storage.as_ref(), &mut task, &params).await;
                    tracker.record(&task);
                    Self::send_progress(&progress_tx, &tracker, total, bytes_total, &task.identity)
                        .await;
                    finished.push(task);

                    if let Some(msg) = env_error {
                        // 本地环境不可用，放弃剩余队列，保留已完成的记录
                        error!("本地环境错误，中止剩余任务: {}", msg);
                        aborted = Some(msg);
                        break;
                    }
                }
            } else {
                // 有界并发：任务彼此独立，一个失败不取消其它任务
                let semaphore = Arc::new(Semaphore::new(self.config.max_concurrent_uploads));
                let env_abort = Arc::new(AtomicBool::new(false));
                let mut handles = Vec::new();

                for task in uploads_iter.by_ref() {
                    if self.cancelled.load(Ordering::SeqCst) || env_abort.load(Ordering::SeqCst) {
                        leftovers.push(task);
                        continue;
                    }

                    let permit = match semaphore.clone().acquire_owned().await {
                        Ok(p) => p,
                        Err(_) => {
                            leftovers.push(task);
                            continue;
                        }
                    };
                    let storage = self.storage.clone();
                    let params = params.clone();
                    let tracker = tracker.clone();
                    let progress_tx = progress_tx.clone();
                    let env_abort = env_abort.clone();

                    let handle = tokio::spawn(async move {
                        let mut task = task;
                        let env_error =
                            Self::run_upload(storage.as_ref(), &mut task, &params).await;
                        tracker.record(&task);
                        Self::send_progress(
                            &progress_tx,
                            &tracker,
                            total,
                            bytes_total,
                            &task.identity,
                        )
                        .await;
                        if let Some(msg) = env_error {
                            error!("本地环境错误，停止调度新任务: {}", msg);
                            env_abort.store(true, Ordering::SeqCst);
                            return (task, Some(msg));
                        }
                        drop(permit);
                        (task, None)
                    });
                    handles.push(handle);
                }

                for handle in handles {
                    if let Ok((task, env_error)) = handle.await {
                        if let Some(msg) = env_error {
                            aborted.get_or_insert(msg);
                        }
                        finished.push(task);
                    }
                }

                if aborted.is_none() && self.cancelled.load(Ordering::SeqCst) {
                    aborted = Some("操作已取消".to_string());
                }
            }
        }
        leftovers.extend(uploads_iter);

        finished.extend(leftovers);
        ExecutionOutcome {
            tasks: finished,
            aborted,
        }
    }

    /// 带重试的删除
    async fn run_delete(storage: &dyn Storage, task: &mut TransferTask, params: &AttemptParams) {
        let start = Instant::now();
        task.status = TaskStatus::InProgress;

        for attempt in 1..=params.max_attempts {
            task.attempts = attempt;

            match storage.delete(&task.identity).await {
                Ok(()) => {
                    debug!("已删除: {}", task.identity);
                    task.status = TaskStatus::Succeeded;
                    break;
                }
                Err(e) if e.is_transient() && attempt < params.max_attempts => {
                    let delay = params.backoff.delay(attempt);
                    warn!(
                        "删除失败，{}ms 后重试 ({}/{}): {}: {}",
                        delay.as_millis(),
                        attempt,
                        params.max_attempts,
                        task.identity,
                        e
                    );
                    if !delay.is_zero() {
                        tokio::time::sleep(delay).await;
                    }
                }
                Err(e) if e.is_transient() => {
                    error!(
                        "删除最终失败 (已尝试{}次): {}: {}",
                        params.max_attempts, task.identity, e
                    );
                    task.status = TaskStatus::Failed;
                    // 重试耗尽后按永久失败记入报告
                    task.failure = Some(TaskFailure {
                        kind: FailureKind::Permanent,
                        message: format!("重试 {} 次后仍失败: {}", params.max_attempts, e),
                    });
                    break;
                }
                Err(e) => {
                    error!("删除失败（不重试）: {}: {}", task.identity, e);
                    task.status = TaskStatus::Failed;
                    task.failure = Some(TaskFailure {
                        kind: FailureKind::Permanent,
                        message: e.to_string(),
                    });
                    break;
                }
            }
        }

        task.duration_ms = start.elapsed().as_millis() as u64;
    }

    /// 带重试的上传；返回 Some 表示本地环境错误，应中止剩余队列
    async fn run_upload(
        storage: &dyn Storage,
        task: &mut TransferTask,
        params: &AttemptParams,
    ) -> Option<String> {
        let start = Instant::now();
        task.status = TaskStatus::InProgress;

        let local_path = match task.local_path.clone() {
            Some(p) => p,
            None => {
                task.status = TaskStatus::Failed;
                task.failure = Some(TaskFailure {
                    kind: FailureKind::Permanent,
                    message: "上传任务缺少本地路径".to_string(),
                });
                task.duration_ms = start.elapsed().as_millis() as u64;
                return None;
            }
        };

        let mut env_error = None;

        for attempt in 1..=params.max_attempts {
            task.attempts = attempt;

            match Self::attempt_upload(storage, task, &local_path, params).await {
                Ok(done) => {
                    if let Some(w) = done.metadata_warning {
                        // 字节是正确性关键，元数据尽力而为
                        warn!("元数据附加失败（忽略）: {}: {}", task.identity, w);
                    }
                    info!(
                        "上传成功: {} ({} 字节, 第 {} 次尝试)",
                        task.identity, done.bytes, attempt
                    );
                    task.status = TaskStatus::Succeeded;
                    task.bytes_transferred = done.bytes;
                    task.checksum = Some(done.checksum);
                    break;
                }
                Err(AttemptError::Environment(msg)) => {
                    task.status = TaskStatus::Failed;
                    task.failure = Some(TaskFailure {
                        kind: FailureKind::Permanent,
                        message: msg.clone(),
                    });
                    env_error = Some(msg);
                    break;
                }
                Err(AttemptError::Storage(e)) if e.is_transient() && attempt < params.max_attempts => {
                    let delay = params.backoff.delay(attempt);
                    warn!(
                        "上传失败，{}ms 后重试 ({}/{}): {}: {}",
                        delay.as_millis(),
                        attempt,
                        params.max_attempts,
                        task.identity,
                        e
                    );
                    if !delay.is_zero() {
                        tokio::time::sleep(delay).await;
                    }
                }
                Err(AttemptError::Storage(e)) if e.is_transient() => {
                    error!(
                        "上传最终失败 (已尝试{}次): {}: {}",
                        params.max_attempts, task.identity, e
                    );
                    task.status = TaskStatus::Failed;
                    task.failure = Some(TaskFailure {
                        kind: FailureKind::Permanent,
                        message: format!("重试 {} 次后仍失败: {}", params.max_attempts, e),
                    });
                    break;
                }
                Err(AttemptError::Storage(e)) => {
                    error!("上传失败（不重试）: {}: {}", task.identity, e);
                    task.status = TaskStatus::Failed;
                    task.failure = Some(TaskFailure {
                        kind: FailureKind::Permanent,
                        message: e.to_string(),
                    });
                    break;
                }
            }
        }

        task.duration_ms = start.elapsed().as_millis() as u64;
        env_error
    }

    /// 单次上传尝试；分块上传失败时整个对象从头重试，不按分块续传
    async fn attempt_upload(
        storage: &dyn Storage,
        task: &TransferTask,
        local_path: &Path,
        params: &AttemptParams,
    ) -> Result<UploadDone, AttemptError> {
        if task.size >= params.multipart_threshold {
            debug!(
                "分块上传: {} ({} 字节, 块 {} 字节)",
                task.identity, task.size, params.chunk_size
            );

            let checksum = Self::hash_file(local_path).await.map_err(|e| {
                AttemptError::Environment(format!(
                    "读取本地文件失败: {}: {}",
                    local_path.display(),
                    e
                ))
            })?;
            let meta = Self::build_metadata(task, &checksum, params);

            let stream = Self::file_chunk_stream(local_path, params.chunk_size)
                .await
                .map_err(|e| {
                    AttemptError::Environment(format!(
                        "读取本地文件失败: {}: {}",
                        local_path.display(),
                        e
                    ))
                })?;

            match storage
                .write_stream(&task.identity, stream, Some(task.size), Some(&meta))
                .await
            {
                Ok(()) => Ok(UploadDone {
                    bytes: task.size,
                    checksum,
                    metadata_warning: None,
                }),
                Err(StorageError::Metadata(msg)) => Ok(UploadDone {
                    bytes: task.size,
                    checksum,
                    metadata_warning: Some(msg),
                }),
                Err(e) => Err(AttemptError::Storage(e)),
            }
        } else {
            let data = tokio::fs::read(local_path).await.map_err(|e| {
                AttemptError::Environment(format!(
                    "读取本地文件失败: {}: {}",
                    local_path.display(),
                    e
                ))
            })?;
            let bytes = data.len() as u64;
            let checksum = blake3::hash(&data).to_hex().to_string();
            let meta = Self::build_metadata(task, &checksum, params);

            match storage.write(&task.identity, data, Some(&meta)).await {
                Ok(()) => Ok(UploadDone {
                    bytes,
                    checksum,
                    metadata_warning: None,
                }),
                Err(StorageError::Metadata(msg)) => Ok(UploadDone {
                    bytes,
                    checksum,
                    metadata_warning: Some(msg),
                }),
                Err(e) => Err(AttemptError::Storage(e)),
            }
        }
    }

    fn build_metadata(task: &TransferTask, checksum: &str, params: &AttemptParams) -> UploadMetadata {
        let original_name = task
            .identity
            .rsplit('/')
            .next()
            .unwrap_or(&task.identity)
            .to_string();
        UploadMetadata {
            original_name,
            uploaded_at: chrono::Utc::now().to_rfc3339(),
            uploader: params.uploader_tag.clone(),
            checksum: checksum.to_string(),
            content_type: task.content_type.clone(),
        }
    }

    /// 流式计算本地文件的 blake3 校验和
    async fn hash_file(path: &Path) -> std::io::Result<String> {
        let mut file = tokio::fs::File::open(path).await?;
        let mut hasher = blake3::Hasher::new();
        let mut buf = vec![0u8; 64 * 1024];

        loop {
            let n = file.read(&mut buf).await?;
            if n == 0 {
                break;
            }
            hasher.update(&buf[..n]);
        }

        Ok(hasher.finalize().to_hex().to_string())
    }

    /// 把本地文件切成固定大小的分块流
    async fn file_chunk_stream(path: &Path, chunk_size: u64) -> std::io::Result<ByteStream> {
        let file = tokio::fs::File::open(path).await?;
        let chunk = chunk_size.max(1) as usize;

        let stream = futures::stream::unfold(file, move |mut f| async move {
            let mut buf = vec![0u8; chunk];
            match f.read(&mut buf).await {
                Ok(0) => None,
                Ok(n) => {
                    buf.truncate(n);
                    Some((Ok(Bytes::from(buf)), f))
                }
                Err(e) => Some((Err(StorageError::from(e)), f)),
            }
        });

        Ok(Box::pin(stream))
    }

    async fn send_progress(
        tx: &Option<mpsc::Sender<SyncProgress>>,
        tracker: &ProgressTracker,
        total: u32,
        bytes_total: u64,
        identity: &str,
    ) {
        if let Some(tx) = tx {
            let (completed, failed) = tracker.counts();
            let _ = tx
                .send(SyncProgress {
                    phase: RunPhase::Transferring,
                    message: format!("[{}/{}] {}", completed + failed, total, identity),
                    completed: completed as u32,
                    failed: failed as u32,
                    total,
                    bytes_transferred: tracker.bytes_transferred(),
                    bytes_total,
                })
                .await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::inventory::RemoteObject;
    use crate::core::planner::TaskKind;
    use crate::core::source::Artifact;
    use crate::storage::MemoryStorage;

    fn test_config() -> ExecutorConfig {
        ExecutorConfig {
            max_attempts: 3,
            backoff: Backoff::none(),
            multipart_threshold: 10 * 1024 * 1024,
            chunk_size: 1024,
            max_concurrent_uploads: 1,
        }
    }

    fn executor(storage: Arc<MemoryStorage>, config: ExecutorConfig) -> TransferExecutor {
        TransferExecutor::new(storage, config, Arc::new(AtomicBool::new(false)))
    }

    fn upload_task(dir: &Path, identity: &str, content: &[u8]) -> TransferTask {
        let path = dir.join(identity);
        std::fs::write(&path, content).unwrap();
        TransferTask::upload(&Artifact {
            identity: identity.to_string(),
            size: content.len() as u64,
            local_path: path,
            content_type: "application/vnd.ms-excel".to_string(),
        })
    }

    fn delete_task(identity: &str) -> TransferTask {
        TransferTask::delete(&RemoteObject {
            identity: identity.to_string(),
            size: 0,
            last_modified: 0,
        })
    }

    #[tokio::test]
    async fn test_upload_writes_bytes_and_metadata() {
        let dir = tempfile::tempdir().unwrap();
        let storage = Arc::new(MemoryStorage::new("mem"));
        let exec = executor(storage.clone(), test_config());
        let tracker = Arc::new(ProgressTracker::new(1));

        let task = upload_task(dir.path(), "a.xlsx", b"payload");
        let outcome = exec.execute(vec![], vec![task], tracker.clone(), None).await;

        assert!(outcome.aborted.is_none());
        assert_eq!(outcome.tasks[0].status, TaskStatus::Succeeded);
        assert_eq!(outcome.tasks[0].bytes_transferred, 7);
        assert_eq!(storage.object("a.xlsx").unwrap(), b"payload");

        let meta = storage.metadata_of("a.xlsx").unwrap();
        assert_eq!(meta.get("original-filename").unwrap(), "a.xlsx");
        assert!(meta.contains_key("upload-timestamp"));
        assert!(meta.contains_key("content-checksum"));
    }

    #[tokio::test]
    async fn test_deletes_run_before_uploads() {
        let dir = tempfile::tempdir().unwrap();
        let storage = Arc::new(MemoryStorage::new("mem"));
        storage.insert("old.xlsx", b"old".to_vec());
        let exec = executor(storage.clone(), test_config());
        let tracker = Arc::new(ProgressTracker::new(2));

        let upload = upload_task(dir.path(), "new.xlsx", b"new");
        let outcome = exec
            .execute(vec![delete_task("old.xlsx")], vec![upload], tracker, None)
            .await;

        assert!(outcome.aborted.is_none());
        // 操作日志验证屏障：删除在前，写入在后
        assert_eq!(
            storage.op_log(),
            vec!["delete:old.xlsx".to_string(), "write:new.xlsx".to_string()]
        );
    }

    #[tokio::test]
    async fn test_transient_failure_retries_until_success() {
        let dir = tempfile::tempdir().unwrap();
        let storage = Arc::new(MemoryStorage::new("mem"));
        storage.fail_writes("a.xlsx", 2, true);
        let exec = executor(storage.clone(), test_config());
        let tracker = Arc::new(ProgressTracker::new(1));

        let task = upload_task(dir.path(), "a.xlsx", b"x");
        let outcome = exec.execute(vec![], vec![task], tracker, None).await;

        let task = &outcome.tasks[0];
        assert_eq!(task.status, TaskStatus::Succeeded);
        assert_eq!(task.attempts, 3);
        assert_eq!(storage.object("a.xlsx").unwrap(), b"x");
    }

    #[tokio::test]
    async fn test_retry_exhaustion_becomes_permanent_failure() {
        let dir = tempfile::tempdir().unwrap();
        let storage = Arc::new(MemoryStorage::new("mem"));
        storage.fail_writes("a.xlsx", 99, true);
        let exec = executor(storage.clone(), test_config());
        let tracker = Arc::new(ProgressTracker::new(1));

        let task = upload_task(dir.path(), "a.xlsx", b"x");
        let outcome = exec.execute(vec![], vec![task], tracker, None).await;

        let task = &outcome.tasks[0];
        assert_eq!(task.status, TaskStatus::Failed);
        assert_eq!(task.attempts, 3);
        let failure = task.failure.as_ref().unwrap();
        assert_eq!(failure.kind, FailureKind::Permanent);
        assert!(failure.message.contains("重试 3 次"));
    }

    #[tokio::test]
    async fn test_permanent_failure_is_not_retried() {
        let dir = tempfile::tempdir().unwrap();
        let storage = Arc::new(MemoryStorage::new("mem"));
        storage.fail_writes("a.xlsx", 1, false);
        let exec = executor(storage.clone(), test_config());
        let tracker = Arc::new(ProgressTracker::new(1));

        let task = upload_task(dir.path(), "a.xlsx", b"x");
        let outcome = exec.execute(vec![], vec![task], tracker, None).await;

        let task = &outcome.tasks[0];
        assert_eq!(task.status, TaskStatus::Failed);
        assert_eq!(task.attempts, 1);
    }

    #[tokio::test]
    async fn test_metadata_failure_still_counts_as_success() {
        let dir = tempfile::tempdir().unwrap();
        let storage = Arc::new(MemoryStorage::new("mem"));
        storage.fail_metadata("a.xlsx");
        let exec = executor(storage.clone(), test_config());
        let tracker = Arc::new(ProgressTracker::new(1));

        let task = upload_task(dir.path(), "a.xlsx", b"bytes");
        let outcome = exec.execute(vec![], vec![task], tracker, None).await;

        let task = &outcome.tasks[0];
        assert_eq!(task.status, TaskStatus::Succeeded);
        assert!(task.failure.is_none());
        assert_eq!(storage.object("a.xlsx").unwrap(), b"bytes");
    }

    #[tokio::test]
    async fn test_one_failure_does_not_stop_remaining_tasks() {
        let dir = tempfile::tempdir().unwrap();
        let storage = Arc::new(MemoryStorage::new("mem"));
        storage.fail_writes("a.xlsx", 99, false);
        let exec = executor(storage.clone(), test_config());
        let tracker = Arc::new(ProgressTracker::new(2));

        let tasks = vec![
            upload_task(dir.path(), "a.xlsx", b"x"),
            upload_task(dir.path(), "b.xlsx", b"y"),
        ];
        let outcome = exec.execute(vec![], tasks, tracker.clone(), None).await;

        assert!(outcome.aborted.is_none());
        let (ok, failed) = tracker.counts();
        assert_eq!((ok, failed), (1, 1));
        assert_eq!(storage.object("b.xlsx").unwrap(), b"y");
    }

    #[tokio::test]
    async fn test_missing_local_file_aborts_remaining_queue() {
        let dir = tempfile::tempdir().unwrap();
        let storage = Arc::new(MemoryStorage::new("mem"));
        let exec = executor(storage.clone(), test_config());
        let tracker = Arc::new(ProgressTracker::new(2));

        let mut gone = upload_task(dir.path(), "gone.xlsx", b"x");
        std::fs::remove_file(gone.local_path.as_ref().unwrap()).unwrap();
        gone.identity = "a_gone.xlsx".to_string();
        let survivor = upload_task(dir.path(), "b.xlsx", b"y");

        let outcome = exec.execute(vec![], vec![gone, survivor], tracker, None).await;

        assert!(outcome.aborted.is_some());
        assert_eq!(outcome.tasks[0].status, TaskStatus::Failed);
        // 后续任务未被执行
        assert_eq!(outcome.tasks[1].status, TaskStatus::Pending);
        assert!(storage.object("b.xlsx").is_none());
    }

    #[tokio::test]
    async fn test_cancellation_between_tasks() {
        let dir = tempfile::tempdir().unwrap();
        let storage = Arc::new(MemoryStorage::new("mem"));
        let cancelled = Arc::new(AtomicBool::new(true));
        let exec = TransferExecutor::new(storage.clone(), test_config(), cancelled);
        let tracker = Arc::new(ProgressTracker::new(1));

        let task = upload_task(dir.path(), "a.xlsx", b"x");
        let outcome = exec.execute(vec![], vec![task], tracker, None).await;

        assert_eq!(outcome.aborted.as_deref(), Some("操作已取消"));
        assert_eq!(outcome.tasks[0].status, TaskStatus::Pending);
        assert!(storage.object("a.xlsx").is_none());
    }

    #[tokio::test]
    async fn test_multipart_threshold_uses_stream_path() {
        let dir = tempfile::tempdir().unwrap();
        let storage = Arc::new(MemoryStorage::new("mem"));
        let mut config = test_config();
        config.multipart_threshold = 8;
        config.chunk_size = 4;
        let exec = executor(storage.clone(), config);
        let tracker = Arc::new(ProgressTracker::new(1));

        let content = b"0123456789abcdef";
        let task = upload_task(dir.path(), "big.xlsx", content);
        let outcome = exec.execute(vec![], vec![task], tracker, None).await;

        let task = &outcome.tasks[0];
        assert_eq!(task.status, TaskStatus::Succeeded);
        assert_eq!(task.bytes_transferred, content.len() as u64);
        // 分块流最终落成一个完整对象
        assert_eq!(storage.object("big.xlsx").unwrap(), content);
    }

    #[tokio::test]
    async fn test_concurrent_uploads_all_complete() {
        let dir = tempfile::tempdir().unwrap();
        let storage = Arc::new(MemoryStorage::new("mem"));
        let mut config = test_config();
        config.max_concurrent_uploads = 4;
        let exec = executor(storage.clone(), config);
        let tracker = Arc::new(ProgressTracker::new(8));

        let tasks: Vec<_> = (0..8)
            .map(|i| upload_task(dir.path(), &format!("f{}.xlsx", i), b"data"))
            .collect();
        let outcome = exec.execute(vec![], tasks, tracker.clone(), None).await;

        assert!(outcome.aborted.is_none());
        let (ok, failed) = tracker.counts();
        assert_eq!((ok, failed), (8, 0));
        assert_eq!(storage.contents().len(), 8);
    }

    #[test]
    fn test_backoff_grows_exponentially() {
        let backoff = Backoff::exponential(100);
        assert_eq!(backoff.delay(1), Duration::from_millis(100));
        assert_eq!(backoff.delay(2), Duration::from_millis(200));
        assert_eq!(backoff.delay(3), Duration::from_millis(400));
        assert!(Backoff::none().delay(5).is_zero());
    }

    #[tokio::test]
    async fn test_delete_task_kind_preserved() {
        let storage = Arc::new(MemoryStorage::new("mem"));
        storage.insert("x.xlsx", b"x".to_vec());
        let exec = executor(storage.clone(), test_config());
        let tracker = Arc::new(ProgressTracker::new(1));

        let outcome = exec
            .execute(vec![delete_task("x.xlsx")], vec![], tracker, None)
            .await;

        assert_eq!(outcome.tasks[0].kind, TaskKind::Delete);
        assert_eq!(outcome.tasks[0].status, TaskStatus::Succeeded);
        assert!(storage.object("x.xlsx").is_none());
    }
}
