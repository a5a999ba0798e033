//! 远程清单
//!
//! 访问探测 + 命名空间下现有对象的完整列举。
//! 列举结果是集合语义：identity 在命名空间内唯一。

use crate::error::SyncError;
use crate::storage::Storage;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info};

/// 命名空间下已存在的远程对象
#[derive(Debug, Clone)]
pub struct RemoteObject {
    pub identity: String,
    pub size: u64,
    pub last_modified: i64,
}

/// 远程清单查询
pub struct RemoteInventory {
    storage: Arc<dyn Storage>,
}

impl RemoteInventory {
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self { storage }
    }

    /// 访问探测；失败时任何后续步骤都不可信
    pub async fn verify_access(&self) -> Result<(), SyncError> {
        info!("检测远程存储访问: {}", self.storage.name());
        self.storage
            .verify_access()
            .await
            .map_err(|e| SyncError::Access(e.to_string()))
    }

    /// 列出命名空间下的全部对象，按 identity 升序
    pub async fn list(&self) -> Result<Vec<RemoteObject>, SyncError> {
        let files = self
            .storage
            .list_files(None)
            .await
            .map_err(|e| SyncError::Access(e.to_string()))?;

        // BTreeMap 去重兼排序：清单是集合，不是多重集合
        let mut objects: BTreeMap<String, RemoteObject> = BTreeMap::new();
        for file in files {
            if file.is_dir {
                continue;
            }
            objects.insert(
                file.path.clone(),
                RemoteObject {
                    identity: file.path,
                    size: file.size,
                    last_modified: file.modified_time,
                },
            );
        }

        let objects: Vec<RemoteObject> = objects.into_values().collect();

        info!("远程已有 {} 个对象", objects.len());
        for obj in objects.iter().take(10) {
            debug!("  - {} ({} 字节)", obj.identity, obj.size);
        }
        if objects.len() > 10 {
            debug!("  ... 以及另外 {} 个对象", objects.len() - 10);
        }

        Ok(objects)
    }
}
