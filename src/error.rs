//! 错误类型定义
//!
//! 致命错误（发现失败、远程访问失败）中止整个运行；
//! 单个任务的传输错误只记录到报告中，不会向外传播。

use serde::Serialize;
use thiserror::Error;

/// 运行级致命错误
#[derive(Debug, Error)]
pub enum SyncError {
    /// 必需的本地目录缺失或不可读
    #[error("本地目录不可用: {path}: {reason}")]
    Discovery { path: String, reason: String },

    /// 远程存储无法连接或凭证被拒绝
    #[error("远程存储无法访问: {0}")]
    Access(String),
}

/// 存储操作错误，按可重试性分类
#[derive(Debug, Error)]
pub enum StorageError {
    /// 临时性失败（网络超时、限流、服务端暂时不可用），可重试
    #[error("临时错误: {0}")]
    Transient(String),

    /// 永久性失败（权限拒绝、非法对象标识、不支持的负载），不重试
    #[error("永久错误: {0}")]
    Permanent(String),

    /// 对象字节已写入，但附加元数据失败
    #[error("元数据附加失败: {0}")]
    Metadata(String),
}

impl StorageError {
    pub fn is_transient(&self) -> bool {
        matches!(self, StorageError::Transient(_))
    }
}

impl From<opendal::Error> for StorageError {
    fn from(e: opendal::Error) -> Self {
        use opendal::ErrorKind;
        match e.kind() {
            ErrorKind::PermissionDenied
            | ErrorKind::NotFound
            | ErrorKind::Unsupported
            | ErrorKind::ConfigInvalid
            | ErrorKind::IsADirectory
            | ErrorKind::NotADirectory => StorageError::Permanent(e.to_string()),
            ErrorKind::RateLimited => StorageError::Transient(e.to_string()),
            // 其余错误按临时处理，交给重试机制
            _ => StorageError::Transient(e.to_string()),
        }
    }
}

impl From<std::io::Error> for StorageError {
    fn from(e: std::io::Error) -> Self {
        use std::io::ErrorKind;
        match e.kind() {
            ErrorKind::NotFound | ErrorKind::PermissionDenied | ErrorKind::InvalidInput => {
                StorageError::Permanent(e.to_string())
            }
            ErrorKind::TimedOut | ErrorKind::Interrupted | ErrorKind::WouldBlock => {
                StorageError::Transient(e.to_string())
            }
            _ => StorageError::Transient(e.to_string()),
        }
    }
}

/// 任务失败分类，写入最终报告
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FailureKind {
    Transient,
    Permanent,
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FailureKind::Transient => write!(f, "transient"),
            FailureKind::Permanent => write!(f, "permanent"),
        }
    }
}
