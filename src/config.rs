//! 配置模块
//!
//! 运行配置从 JSON 文件读取；AWS 凭证可由环境变量覆盖
//! （AWS_ACCESS_KEY_ID / AWS_SECRET_ACCESS_KEY / AWS_SESSION_TOKEN）。

use crate::logging::LogConfig;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// 存储类型
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StorageType {
    Local,
    S3,
    WebDav,
}

/// 目标存储配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StorageConfig {
    #[serde(rename = "type")]
    pub typ: StorageType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bucket: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secret_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
    /// 远程命名空间前缀，所有对象都在该前缀之下
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prefix: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub webdav_endpoint: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub root: Option<String>,
}

impl StorageConfig {
    /// 用环境变量覆盖凭证（未设置的保持原值）
    pub fn apply_env_overrides(&mut self) {
        if let Ok(key) = std::env::var("AWS_ACCESS_KEY_ID") {
            if !key.is_empty() {
                self.access_key = Some(key);
            }
        }
        if let Ok(secret) = std::env::var("AWS_SECRET_ACCESS_KEY") {
            if !secret.is_empty() {
                self.secret_key = Some(secret);
            }
        }
        if let Ok(token) = std::env::var("AWS_SESSION_TOKEN") {
            if !token.is_empty() {
                self.session_token = Some(token);
            }
        }
    }
}

/// 传输调优参数
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferSettings {
    /// 每个任务的最大尝试次数（含首次）
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// 重试基础延迟（毫秒），按尝试次数指数递增
    #[serde(default = "default_retry_base_delay_ms")]
    pub retry_base_delay_ms: u64,
    /// 分块传输阈值（字节），达到该大小的文件走分块上传
    #[serde(default = "default_multipart_threshold")]
    pub multipart_threshold: u64,
    /// 分块大小（字节）
    #[serde(default = "default_chunk_size")]
    pub chunk_size: u64,
    /// 最大并发上传数，1 表示顺序执行
    #[serde(default = "default_max_concurrent_uploads")]
    pub max_concurrent_uploads: usize,
}

fn default_max_attempts() -> u32 {
    3
}

fn default_retry_base_delay_ms() -> u64 {
    2000
}

fn default_multipart_threshold() -> u64 {
    10 * 1024 * 1024 // 10MB
}

fn default_chunk_size() -> u64 {
    5 * 1024 * 1024 // 5MB
}

fn default_max_concurrent_uploads() -> usize {
    1
}

impl Default for TransferSettings {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            retry_base_delay_ms: default_retry_base_delay_ms(),
            multipart_threshold: default_multipart_threshold(),
            chunk_size: default_chunk_size(),
            max_concurrent_uploads: default_max_concurrent_uploads(),
        }
    }
}

/// 顶层配置文件
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Settings {
    pub storage: StorageConfig,
    #[serde(default)]
    pub transfer: TransferSettings,
    #[serde(default)]
    pub log: LogConfig,
}

impl Settings {
    /// 从配置文件加载并应用环境变量覆盖
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content = fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("读取配置文件失败 {:?}: {}", path, e))?;
        let mut settings: Settings = serde_json::from_str(&content)
            .map_err(|e| anyhow::anyhow!("解析配置文件失败 {:?}: {}", path, e))?;
        settings.storage.apply_env_overrides();
        Ok(settings)
    }
}
