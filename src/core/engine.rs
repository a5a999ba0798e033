//! 同步编排
//!
//! 按固定顺序驱动一次运行：
//! 发现 → 访问探测 → 远程清单 → (清除+选择) 计划 → 传输 → 汇总。
//! 致命错误（发现失败、访问失败）直接中止并返回带错误信息的报告；
//! 单个任务的失败只进入报告，不中止运行。

use crate::core::executor::{ExecutorConfig, TransferExecutor};
use crate::core::inventory::RemoteInventory;
use crate::core::planner::ReconciliationPlanner;
use crate::core::progress::{ProgressTracker, RunPhase, RunReport, RunStatus, SyncProgress};
use crate::core::source::{ArtifactSource, SearchRoot};
use crate::error::SyncError;
use crate::storage::Storage;
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

/// 一次运行的全部输入；核心不读任何全局状态，不做交互
#[derive(Debug, Clone)]
pub struct RunOptions {
    /// 按顺序扫描的搜索根
    pub roots: Vec<SearchRoot>,
    /// 文件名通配模式
    pub patterns: Vec<String>,
    /// true 时先清空远程命名空间再整体重传
    pub clear_existing: bool,
    /// 只上传这些 identity（None 为全部）；由调用方预先确定，核心不提示
    pub selection: Option<BTreeSet<String>>,
    /// true 时只算计划，不触碰远程
    pub dry_run: bool,
    /// true 时发现零个构件视为失败；默认零构件是无事可做的成功
    pub fail_when_empty: bool,
    pub executor: ExecutorConfig,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            roots: Vec::new(),
            patterns: ArtifactSource::default_patterns(),
            clear_existing: false,
            selection: None,
            dry_run: false,
            fail_when_empty: false,
            executor: ExecutorConfig::default(),
        }
    }
}

/// 同步编排器
pub struct SyncOrchestrator {
    storage: Arc<dyn Storage>,
    cancelled: Arc<AtomicBool>,
    progress_tx: Option<mpsc::Sender<SyncProgress>>,
}

impl SyncOrchestrator {
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self {
            storage,
            cancelled: Arc::new(AtomicBool::new(false)),
            progress_tx: None,
        }
    }

    pub fn with_progress(mut self, tx: mpsc::Sender<SyncProgress>) -> Self {
        self.progress_tx = Some(tx);
        self
    }

    /// 取消信号句柄，供调用方（如 Ctrl-C 处理）使用
    pub fn cancel_flag(&self) -> Arc<AtomicBool> {
        self.cancelled.clone()
    }

    /// 请求取消；只在任务边界生效
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    /// 执行一次完整同步，总是返回报告（致命错误映射为 Aborted 报告）
    pub async fn run(&self, options: &RunOptions) -> RunReport {
        // 重置取消标志，允许同一实例复用
        self.cancelled.store(false, Ordering::SeqCst);

        info!(
            "开始同步: 目标 {}, clear={}, dry_run={}",
            self.storage.name(),
            options.clear_existing,
            options.dry_run
        );

        // ---- 发现 ----
        self.send_phase(RunPhase::Discovering, "正在扫描本地构件...")
            .await;

        let source = ArtifactSource::new(&options.patterns);
        let artifacts = match source.discover(&options.roots).await {
            Ok(a) => a,
            Err(e) => return self.aborted_report(e).await,
        };

        if artifacts.is_empty() {
            if options.fail_when_empty {
                return self
                    .aborted_report(SyncError::Discovery {
                        path: "<roots>".to_string(),
                        reason: "未发现任何构件".to_string(),
                    })
                    .await;
            }
            // 零构件默认是无事可做的成功，不触碰远程
            info!("未发现任何构件，本次运行无事可做");
            let tracker = ProgressTracker::new(0);
            self.send_phase(RunPhase::Done, "无事可做").await;
            return tracker.summary(RunStatus::Success);
        }

        // ---- 访问探测 ----
        self.send_phase(RunPhase::VerifyingAccess, "正在检测远程存储访问...")
            .await;

        let inventory = RemoteInventory::new(self.storage.clone());
        if let Err(e) = inventory.verify_access().await {
            error!("访问探测失败: {}", e);
            return self.aborted_report(e).await;
        }

        // ---- 远程清单 ----
        self.send_phase(RunPhase::Inventorying, "正在列举远程对象...")
            .await;

        let remotes = match inventory.list().await {
            Ok(r) => r,
            Err(e) => {
                error!("列举远程对象失败: {}", e);
                return self.aborted_report(e).await;
            }
        };

        // ---- 计划（清除 + 选择）----
        self.send_phase(RunPhase::Selecting, "正在生成传输计划...")
            .await;

        let plan = ReconciliationPlanner::plan(
            &artifacts,
            &remotes,
            options.clear_existing,
            options.selection.as_ref(),
        );

        if plan.dropped_selections > 0 {
            warn!("{} 个选择项没有对应的本地构件，被忽略", plan.dropped_selections);
        }

        info!(
            "计划: {} 个删除, {} 个上传, 共 {} 字节",
            plan.deletes.len(),
            plan.uploads.len(),
            plan.upload_bytes()
        );

        // ---- dry-run: 返回计划，不触碰远程 ----
        if options.dry_run {
            let tracker = ProgressTracker::new(0);
            let mut report = tracker.summary(RunStatus::Success);
            report.dropped_selections = plan.dropped_selections;
            report.planned_deletes = plan.deletes.iter().map(|t| t.identity.clone()).collect();
            report.planned_uploads = plan.uploads.iter().map(|t| t.identity.clone()).collect();
            self.send_phase(RunPhase::Done, "dry-run 完成").await;
            return report;
        }

        // ---- 传输（清除屏障在执行器内保证）----
        if !plan.deletes.is_empty() {
            self.send_phase(
                RunPhase::Clearing,
                &format!("清除远程 {} 个对象...", plan.deletes.len()),
            )
            .await;
        }
        self.send_phase(
            RunPhase::Transferring,
            &format!("开始传输 {} 个任务...", plan.total()),
        )
        .await;

        let tracker = Arc::new(ProgressTracker::new(plan.total()));
        let executor = TransferExecutor::new(
            self.storage.clone(),
            options.executor.clone(),
            self.cancelled.clone(),
        );

        let dropped_selections = plan.dropped_selections;
        let outcome = executor
            .execute(
                plan.deletes,
                plan.uploads,
                tracker.clone(),
                self.progress_tx.clone(),
            )
            .await;

        // ---- 汇总 ----
        self.send_phase(RunPhase::Reporting, "正在生成报告...").await;

        let (succeeded, failed) = tracker.counts();
        let status = if let Some(ref reason) = outcome.aborted {
            warn!("运行中止: {}", reason);
            RunStatus::Aborted
        } else if failed > 0 {
            RunStatus::PartialFailure
        } else {
            RunStatus::Success
        };

        let mut report = tracker.summary(status);
        report.dropped_selections = dropped_selections;
        if let Some(reason) = outcome.aborted {
            report.errors.push(reason);
        }

        info!(
            "同步完成: 状态 {:?}, 成功 {}, 失败 {}, 共 {} 字节, 耗时 {}s",
            report.status,
            succeeded,
            failed,
            report.total_bytes,
            report.duration_secs()
        );
        for item in &report.failed {
            warn!("失败: {} [{}] {}", item.identity, item.category, item.message);
        }

        self.send_phase(
            if report.status == RunStatus::Aborted {
                RunPhase::Aborted
            } else {
                RunPhase::Done
            },
            "同步完成",
        )
        .await;

        report
    }

    /// 致命错误报告：计划内的工作一项都没做
    async fn aborted_report(&self, error: SyncError) -> RunReport {
        error!("运行中止: {}", error);
        let tracker = ProgressTracker::new(0);
        let mut report = tracker.summary(RunStatus::Aborted);
        report.errors.push(error.to_string());
        self.send_phase(RunPhase::Aborted, "运行中止").await;
        report
    }

    async fn send_phase(&self, phase: RunPhase, message: &str) {
        if let Some(tx) = &self.progress_tx {
            let _ = tx
                .send(SyncProgress {
                    phase,
                    message: message.to_string(),
                    completed: 0,
                    failed: 0,
                    total: 0,
                    bytes_transferred: 0,
                    bytes_total: 0,
                })
                .await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStorage;
    use std::fs;
    use std::path::Path;

    fn touch(path: &Path, content: &[u8]) {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(path, content).unwrap();
    }

    fn options_for(dir: &Path) -> RunOptions {
        RunOptions {
            roots: vec![SearchRoot::required(dir)],
            executor: ExecutorConfig {
                max_attempts: 2,
                backoff: crate::core::executor::Backoff::none(),
                ..ExecutorConfig::default()
            },
            ..RunOptions::default()
        }
    }

    #[tokio::test]
    async fn test_clear_before_repopulate_removes_orphans() {
        let dir = tempfile::tempdir().unwrap();
        touch(&dir.path().join("a.xlsx"), b"aa");

        let storage = Arc::new(MemoryStorage::new("mem"));
        storage.insert("orphan.xlsx", b"stale".to_vec());

        let mut options = options_for(dir.path());
        options.clear_existing = true;

        let report = SyncOrchestrator::new(storage.clone()).run(&options).await;

        assert_eq!(report.status, RunStatus::Success);
        let remote = storage.contents();
        assert!(!remote.contains_key("orphan.xlsx"));
        assert_eq!(remote.get("a.xlsx").unwrap(), b"aa");
    }

    #[tokio::test]
    async fn test_rerun_with_clear_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        touch(&dir.path().join("a.xlsx"), b"aa");
        touch(&dir.path().join("b.xlsx"), b"bbbb");

        let storage = Arc::new(MemoryStorage::new("mem"));
        let mut options = options_for(dir.path());
        options.clear_existing = true;

        let orchestrator = SyncOrchestrator::new(storage.clone());
        let first = orchestrator.run(&options).await;
        let after_first = storage.contents();
        let second = orchestrator.run(&options).await;
        let after_second = storage.contents();

        assert_eq!(first.status, RunStatus::Success);
        assert_eq!(second.status, RunStatus::Success);
        // 两次运行后的远程状态完全一致
        assert_eq!(after_first, after_second);
        assert_eq!(after_second.len(), 2);
    }

    #[tokio::test]
    async fn test_no_clear_overwrites_same_identity() {
        let dir = tempfile::tempdir().unwrap();
        touch(&dir.path().join("a.xlsx"), b"new50bytes");

        let storage = Arc::new(MemoryStorage::new("mem"));
        storage.insert("a.xlsx", vec![0u8; 100]);

        let report = SyncOrchestrator::new(storage.clone())
            .run(&options_for(dir.path()))
            .await;

        assert_eq!(report.status, RunStatus::Success);
        // 覆盖而不是并存
        assert_eq!(storage.contents().len(), 1);
        assert_eq!(storage.object("a.xlsx").unwrap(), b"new50bytes");
    }

    #[tokio::test]
    async fn test_count_invariant_holds() {
        let dir = tempfile::tempdir().unwrap();
        touch(&dir.path().join("ok.xlsx"), b"fine");
        touch(&dir.path().join("bad.xlsx"), b"fail");

        let storage = Arc::new(MemoryStorage::new("mem"));
        storage.fail_writes("bad.xlsx", 99, true);

        let report = SyncOrchestrator::new(storage.clone())
            .run(&options_for(dir.path()))
            .await;

        assert_eq!(report.status, RunStatus::PartialFailure);
        assert_eq!(
            report.succeeded.len() + report.failed.len(),
            report.total_planned
        );
    }

    #[tokio::test]
    async fn test_retry_exhaustion_is_partial_failure_not_abort() {
        let dir = tempfile::tempdir().unwrap();
        touch(&dir.path().join("bad.xlsx"), b"x");

        let storage = Arc::new(MemoryStorage::new("mem"));
        storage.fail_writes("bad.xlsx", 99, true);

        let report = SyncOrchestrator::new(storage)
            .run(&options_for(dir.path()))
            .await;

        assert_eq!(report.status, RunStatus::PartialFailure);
        assert_eq!(report.failed.len(), 1);
        assert_eq!(
            report.failed[0].category,
            crate::error::FailureKind::Permanent
        );
        assert!(report.failed[0].message.contains("重试"));
    }

    #[tokio::test]
    async fn test_access_error_aborts_with_empty_report() {
        let dir = tempfile::tempdir().unwrap();
        touch(&dir.path().join("a.xlsx"), b"a");

        let storage = Arc::new(MemoryStorage::new("mem"));
        storage.deny_access();

        let report = SyncOrchestrator::new(storage.clone())
            .run(&options_for(dir.path()))
            .await;

        assert_eq!(report.status, RunStatus::Aborted);
        assert!(report.succeeded.is_empty());
        assert!(report.failed.is_empty());
        assert!(!report.errors.is_empty());
    }

    #[tokio::test]
    async fn test_missing_required_root_aborts() {
        let storage = Arc::new(MemoryStorage::new("mem"));
        let mut options = RunOptions::default();
        options.roots = vec![SearchRoot::required("/no/such/dir")];

        let report = SyncOrchestrator::new(storage).run(&options).await;

        assert_eq!(report.status, RunStatus::Aborted);
        assert_eq!(report.status.exit_code(), 2);
    }

    #[tokio::test]
    async fn test_zero_artifacts_is_noop_success() {
        let dir = tempfile::tempdir().unwrap();

        let storage = Arc::new(MemoryStorage::new("mem"));
        storage.insert("existing.xlsx", b"keep".to_vec());

        let mut options = options_for(dir.path());
        options.clear_existing = true;

        let report = SyncOrchestrator::new(storage.clone()).run(&options).await;

        assert_eq!(report.status, RunStatus::Success);
        assert_eq!(report.total_planned, 0);
        // 无事可做时不触碰远程
        assert_eq!(storage.contents().len(), 1);
    }

    #[tokio::test]
    async fn test_zero_artifacts_fails_when_configured() {
        let dir = tempfile::tempdir().unwrap();
        let storage = Arc::new(MemoryStorage::new("mem"));

        let mut options = options_for(dir.path());
        options.fail_when_empty = true;

        let report = SyncOrchestrator::new(storage).run(&options).await;
        assert_eq!(report.status, RunStatus::Aborted);
    }

    #[tokio::test]
    async fn test_selection_filters_uploads_and_reports_drops() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["a.xlsx", "b.xlsx", "c.xlsx", "d.xlsx", "e.xlsx"] {
            touch(&dir.path().join(name), b"x");
        }

        let storage = Arc::new(MemoryStorage::new("mem"));
        let mut options = options_for(dir.path());
        options.selection = Some(
            ["b.xlsx", "d.xlsx", "ghost.xlsx"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
        );

        let report = SyncOrchestrator::new(storage.clone()).run(&options).await;

        assert_eq!(report.status, RunStatus::Success);
        assert_eq!(report.succeeded.len(), 2);
        assert_eq!(report.dropped_selections, 1);
        assert_eq!(storage.contents().len(), 2);
    }

    #[tokio::test]
    async fn test_dry_run_mutates_nothing() {
        let dir = tempfile::tempdir().unwrap();
        touch(&dir.path().join("a.xlsx"), b"a");

        let storage = Arc::new(MemoryStorage::new("mem"));
        storage.insert("orphan.xlsx", b"stale".to_vec());
        let before = storage.contents();

        let mut options = options_for(dir.path());
        options.clear_existing = true;
        options.dry_run = true;

        let report = SyncOrchestrator::new(storage.clone()).run(&options).await;

        assert_eq!(report.status, RunStatus::Success);
        assert_eq!(report.planned_deletes, vec!["orphan.xlsx"]);
        assert_eq!(report.planned_uploads, vec!["a.xlsx"]);
        // 远程状态未被触碰，也没有任何写删操作
        assert_eq!(storage.contents(), before);
        assert!(storage.op_log().is_empty());
    }
}
