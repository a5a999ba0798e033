//! 进度累计与运行报告
//!
//! 追踪器只做加法：每个任务到达终态时记录一次，
//! `summary()` 幂等，随时可取当前汇总。

use crate::core::planner::{TaskStatus, TransferTask};
use crate::error::FailureKind;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

/// 运行阶段
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RunPhase {
    Init,
    Discovering,
    VerifyingAccess,
    Inventorying,
    Clearing,
    Selecting,
    Transferring,
    Reporting,
    Done,
    Aborted,
}

/// 运行最终状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    /// 所有任务成功
    Success,
    /// 部分任务失败，运行本身完成
    PartialFailure,
    /// 致命错误或取消，计划中的大部分工作未能执行
    Aborted,
}

impl RunStatus {
    /// CLI 退出码映射
    pub fn exit_code(&self) -> i32 {
        match self {
            RunStatus::Success => 0,
            RunStatus::PartialFailure => 1,
            RunStatus::Aborted => 2,
        }
    }
}

/// 进度事件，发给调用方做终端展示
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncProgress {
    pub phase: RunPhase,
    pub message: String,
    pub completed: u32,
    pub failed: u32,
    pub total: u32,
    pub bytes_transferred: u64,
    pub bytes_total: u64,
}

/// 成功条目
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CompletedItem {
    pub identity: String,
    pub bytes: u64,
    pub duration_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub checksum: Option<String>,
}

/// 失败条目，带错误类别和原因
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FailedItem {
    pub identity: String,
    pub category: FailureKind,
    pub message: String,
}

/// 一次运行的汇总报告
///
/// 运行正常完成时 `succeeded.len() + failed.len() == total_planned`。
/// 报告归本次运行独占，引擎跨运行不保留任何状态。
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunReport {
    pub run_id: String,
    pub status: RunStatus,
    pub started_at: i64,
    pub ended_at: i64,
    pub total_planned: usize,
    pub succeeded: Vec<CompletedItem>,
    pub failed: Vec<FailedItem>,
    pub total_bytes: u64,
    pub dropped_selections: usize,
    /// 仅 dry-run 时填充：计划中的删除 identity 列表
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub planned_deletes: Vec<String>,
    /// 仅 dry-run 时填充：计划中的上传 identity 列表
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub planned_uploads: Vec<String>,
    /// 致命错误信息（中止的运行）
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<String>,
}

impl RunReport {
    pub fn duration_secs(&self) -> i64 {
        self.ended_at - self.started_at
    }
}

/// 进度追踪器；record 在并发上传下也安全
pub struct ProgressTracker {
    run_id: String,
    started_at: i64,
    total_planned: usize,
    succeeded: Mutex<Vec<CompletedItem>>,
    failed: Mutex<Vec<FailedItem>>,
    bytes: AtomicU64,
}

impl ProgressTracker {
    pub fn new(total_planned: usize) -> Self {
        Self {
            run_id: uuid::Uuid::new_v4().to_string(),
            started_at: chrono::Utc::now().timestamp(),
            total_planned,
            succeeded: Mutex::new(Vec::new()),
            failed: Mutex::new(Vec::new()),
            bytes: AtomicU64::new(0),
        }
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn started_at(&self) -> i64 {
        self.started_at
    }

    /// 按完成顺序记录一个到达终态的任务
    pub fn record(&self, task: &TransferTask) {
        match task.status {
            TaskStatus::Succeeded => {
                self.bytes.fetch_add(task.bytes_transferred, Ordering::Relaxed);
                let mut succeeded = self.succeeded.lock().unwrap();
                succeeded.push(CompletedItem {
                    identity: task.identity.clone(),
                    bytes: task.bytes_transferred,
                    duration_ms: task.duration_ms,
                    checksum: task.checksum.clone(),
                });
            }
            TaskStatus::Failed => {
                let failure = task.failure.clone().unwrap_or(super::planner::TaskFailure {
                    kind: FailureKind::Permanent,
                    message: "unknown failure".to_string(),
                });
                let mut failed = self.failed.lock().unwrap();
                failed.push(FailedItem {
                    identity: task.identity.clone(),
                    category: failure.kind,
                    message: failure.message,
                });
            }
            // 未到终态的任务不记录
            TaskStatus::Pending | TaskStatus::InProgress => {}
        }
    }

    /// (成功数, 失败数)
    pub fn counts(&self) -> (usize, usize) {
        (
            self.succeeded.lock().unwrap().len(),
            self.failed.lock().unwrap().len(),
        )
    }

    pub fn bytes_transferred(&self) -> u64 {
        self.bytes.load(Ordering::Relaxed)
    }

    /// 生成汇总；可重复调用，始终与已记录的任务一致
    pub fn summary(&self, status: RunStatus) -> RunReport {
        RunReport {
            run_id: self.run_id.clone(),
            status,
            started_at: self.started_at,
            ended_at: chrono::Utc::now().timestamp(),
            total_planned: self.total_planned,
            succeeded: self.succeeded.lock().unwrap().clone(),
            failed: self.failed.lock().unwrap().clone(),
            total_bytes: self.bytes.load(Ordering::Relaxed),
            dropped_selections: 0,
            planned_deletes: Vec::new(),
            planned_uploads: Vec::new(),
            errors: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::planner::{TaskFailure, TaskKind};
    use std::path::PathBuf;

    fn finished_task(identity: &str, status: TaskStatus, bytes: u64) -> TransferTask {
        TransferTask {
            kind: TaskKind::Upload,
            identity: identity.to_string(),
            size: bytes,
            local_path: Some(PathBuf::from(identity)),
            content_type: None,
            attempts: 1,
            status,
            failure: if status == TaskStatus::Failed {
                Some(TaskFailure {
                    kind: FailureKind::Permanent,
                    message: "boom".to_string(),
                })
            } else {
                None
            },
            bytes_transferred: bytes,
            duration_ms: 5,
            checksum: None,
        }
    }

    #[test]
    fn test_record_accumulates_and_summary_is_idempotent() {
        let tracker = ProgressTracker::new(3);
        tracker.record(&finished_task("a.xlsx", TaskStatus::Succeeded, 10));
        tracker.record(&finished_task("b.xlsx", TaskStatus::Failed, 0));
        tracker.record(&finished_task("c.xlsx", TaskStatus::Succeeded, 7));

        let first = tracker.summary(RunStatus::PartialFailure);
        let second = tracker.summary(RunStatus::PartialFailure);

        assert_eq!(first.succeeded.len(), 2);
        assert_eq!(first.failed.len(), 1);
        assert_eq!(first.total_bytes, 17);
        assert_eq!(first.succeeded.len(), second.succeeded.len());
        assert_eq!(first.total_bytes, second.total_bytes);
        // 计数不变式
        assert_eq!(
            first.succeeded.len() + first.failed.len(),
            first.total_planned
        );
    }

    #[test]
    fn test_pending_tasks_are_not_recorded() {
        let tracker = ProgressTracker::new(1);
        tracker.record(&finished_task("a.xlsx", TaskStatus::Pending, 0));
        let (ok, failed) = tracker.counts();
        assert_eq!((ok, failed), (0, 0));
    }

    #[test]
    fn test_exit_codes() {
        assert_eq!(RunStatus::Success.exit_code(), 0);
        assert_eq!(RunStatus::PartialFailure.exit_code(), 1);
        assert_eq!(RunStatus::Aborted.exit_code(), 2);
    }
}
