//! 传输计划
//!
//! 由本地构件和远程清单推导出删除/上传任务列表。
//! 清除策略是"清空命名空间再整体重传"，不做差异补丁：
//! 牺牲传输效率，换取同步后远程状态与本地选集完全一致的保证。

use crate::core::inventory::RemoteObject;
use crate::core::source::Artifact;
use crate::error::FailureKind;
use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;
use tracing::{debug, warn};

/// 任务类型
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskKind {
    Delete,
    Upload,
}

/// 任务状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskStatus {
    Pending,
    InProgress,
    Succeeded,
    Failed,
}

/// 任务的终态失败信息
#[derive(Debug, Clone)]
pub struct TaskFailure {
    pub kind: FailureKind,
    pub message: String,
}

/// 一个计划中的传输单元，由计划器创建、执行器独占修改
#[derive(Debug, Clone)]
pub struct TransferTask {
    pub kind: TaskKind,
    pub identity: String,
    pub size: u64,
    pub local_path: Option<PathBuf>,
    pub content_type: Option<String>,
    pub attempts: u32,
    pub status: TaskStatus,
    pub failure: Option<TaskFailure>,
    pub bytes_transferred: u64,
    pub duration_ms: u64,
    pub checksum: Option<String>,
}

impl TransferTask {
    pub fn upload(artifact: &Artifact) -> Self {
        Self {
            kind: TaskKind::Upload,
            identity: artifact.identity.clone(),
            size: artifact.size,
            local_path: Some(artifact.local_path.clone()),
            content_type: Some(artifact.content_type.clone()),
            attempts: 0,
            status: TaskStatus::Pending,
            failure: None,
            bytes_transferred: 0,
            duration_ms: 0,
            checksum: None,
        }
    }

    pub fn delete(object: &RemoteObject) -> Self {
        Self {
            kind: TaskKind::Delete,
            identity: object.identity.clone(),
            size: object.size,
            local_path: None,
            content_type: None,
            attempts: 0,
            status: TaskStatus::Pending,
            failure: None,
            bytes_transferred: 0,
            duration_ms: 0,
            checksum: None,
        }
    }
}

/// 一次运行的完整计划
#[derive(Debug, Clone, Default)]
pub struct SyncPlan {
    /// 删除任务，按 identity 升序，全部先于上传执行
    pub deletes: Vec<TransferTask>,
    /// 上传任务，按 identity 升序
    pub uploads: Vec<TransferTask>,
    /// 选择集中没有对应构件、被静默丢弃的条目数
    pub dropped_selections: usize,
    /// 多个搜索根产生同名 identity 时被舍弃的构件数
    pub identity_collisions: usize,
}

impl SyncPlan {
    pub fn total(&self) -> usize {
        self.deletes.len() + self.uploads.len()
    }

    pub fn upload_bytes(&self) -> u64 {
        self.uploads.iter().map(|t| t.size).sum()
    }
}

/// 计划器
pub struct ReconciliationPlanner;

impl ReconciliationPlanner {
    /// 由本地构件和远程清单生成计划
    ///
    /// - `clear_existing` 为 true 时对远程每个对象发一个删除任务，
    ///   无论本地是否有同名构件
    /// - 上传集为 `selection` 命中的构件（缺省为全部），
    ///   与远程是否已有同名对象无关（后写覆盖）
    pub fn plan(
        locals: &[Artifact],
        remotes: &[RemoteObject],
        clear_existing: bool,
        selection: Option<&BTreeSet<String>>,
    ) -> SyncPlan {
        let mut plan = SyncPlan::default();

        if clear_existing {
            // 远程清单是集合；逐个 identity 去重后生成删除任务
            let mut seen: BTreeMap<&str, &RemoteObject> = BTreeMap::new();
            for obj in remotes {
                seen.entry(obj.identity.as_str()).or_insert(obj);
            }
            plan.deletes = seen.values().map(|obj| TransferTask::delete(obj)).collect();
        }

        // identity 冲突（多个根下的同名文件）：保留先发现的那个
        let mut by_identity: BTreeMap<&str, &Artifact> = BTreeMap::new();
        for artifact in locals {
            if by_identity.contains_key(artifact.identity.as_str()) {
                plan.identity_collisions += 1;
                warn!("identity 冲突，保留先发现的构件: {}", artifact.identity);
                continue;
            }
            by_identity.insert(artifact.identity.as_str(), artifact);
        }

        match selection {
            Some(selected) => {
                for identity in selected {
                    match by_identity.get(identity.as_str()) {
                        Some(artifact) => plan.uploads.push(TransferTask::upload(artifact)),
                        None => {
                            // 选择集按可用性过滤，不提前校验；只记数供上层展示
                            plan.dropped_selections += 1;
                            debug!("选择的构件不存在，忽略: {}", identity);
                        }
                    }
                }
            }
            None => {
                plan.uploads = by_identity
                    .values()
                    .map(|artifact| TransferTask::upload(artifact))
                    .collect();
            }
        }

        plan.uploads.sort_by(|a, b| a.identity.cmp(&b.identity));

        debug!(
            "计划完成: {} 个删除, {} 个上传, {} 个选择项被丢弃",
            plan.deletes.len(),
            plan.uploads.len(),
            plan.dropped_selections
        );

        plan
    }
}
