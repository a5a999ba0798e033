use super::{FileInfo, FileMeta, Storage, UploadMetadata};
use crate::error::StorageError;
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::sync::RwLock;

/// 内存中的对象
#[derive(Debug, Clone)]
struct StoredObject {
    data: Vec<u8>,
    metadata: Option<HashMap<String, String>>,
    modified_time: i64,
}

/// 预设的失败注入
#[derive(Debug, Clone)]
enum Fault {
    /// 后续 n 次写入失败（transient 决定分类）
    FailWrites { remaining: u32, transient: bool },
    /// 字节落盘但元数据附加失败
    FailMetadata,
}

/// 内存后端，主要用于测试：可注入失败、记录操作顺序
pub struct MemoryStorage {
    name: String,
    objects: RwLock<BTreeMap<String, StoredObject>>,
    faults: RwLock<HashMap<String, Fault>>,
    deny_access: RwLock<bool>,
    /// 操作日志（"delete:a" / "write:b"），用于断言执行顺序
    op_log: RwLock<Vec<String>>,
}

impl MemoryStorage {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            objects: RwLock::new(BTreeMap::new()),
            faults: RwLock::new(HashMap::new()),
            deny_access: RwLock::new(false),
            op_log: RwLock::new(Vec::new()),
        }
    }

    /// 预置一个远程对象
    pub fn insert(&self, path: &str, data: Vec<u8>) {
        let mut objects = self.objects.write().unwrap();
        objects.insert(
            path.to_string(),
            StoredObject {
                data,
                metadata: None,
                modified_time: chrono::Utc::now().timestamp(),
            },
        );
    }

    /// 当前所有对象的内容快照
    pub fn contents(&self) -> BTreeMap<String, Vec<u8>> {
        let objects = self.objects.read().unwrap();
        objects
            .iter()
            .map(|(k, v)| (k.clone(), v.data.clone()))
            .collect()
    }

    pub fn object(&self, path: &str) -> Option<Vec<u8>> {
        let objects = self.objects.read().unwrap();
        objects.get(path).map(|o| o.data.clone())
    }

    pub fn metadata_of(&self, path: &str) -> Option<HashMap<String, String>> {
        let objects = self.objects.read().unwrap();
        objects.get(path).and_then(|o| o.metadata.clone())
    }

    /// 注入写入失败：对 path 的后续 count 次写入报错
    pub fn fail_writes(&self, path: &str, count: u32, transient: bool) {
        let mut faults = self.faults.write().unwrap();
        faults.insert(
            path.to_string(),
            Fault::FailWrites {
                remaining: count,
                transient,
            },
        );
    }

    /// 注入元数据失败：字节写入成功但元数据附加报错
    pub fn fail_metadata(&self, path: &str) {
        let mut faults = self.faults.write().unwrap();
        faults.insert(path.to_string(), Fault::FailMetadata);
    }

    /// 拒绝一切访问（模拟凭证失效）
    pub fn deny_access(&self) {
        *self.deny_access.write().unwrap() = true;
    }

    pub fn op_log(&self) -> Vec<String> {
        self.op_log.read().unwrap().clone()
    }

    fn check_access(&self) -> Result<(), StorageError> {
        if *self.deny_access.read().unwrap() {
            return Err(StorageError::Permanent("access denied".to_string()));
        }
        Ok(())
    }

    fn log_op(&self, op: &str, path: &str) {
        self.op_log.write().unwrap().push(format!("{}:{}", op, path));
    }

    /// 消耗一次写入失败注入，返回要报的错
    fn take_write_fault(&self, path: &str) -> Option<StorageError> {
        let mut faults = self.faults.write().unwrap();
        match faults.get_mut(path) {
            Some(Fault::FailWrites {
                remaining,
                transient,
            }) => {
                if *remaining == 0 {
                    faults.remove(path);
                    return None;
                }
                *remaining -= 1;
                let err = if *transient {
                    StorageError::Transient(format!("simulated transient failure: {}", path))
                } else {
                    StorageError::Permanent(format!("simulated permanent failure: {}", path))
                };
                if *remaining == 0 {
                    faults.remove(path);
                }
                Some(err)
            }
            Some(Fault::FailMetadata) => None,
            None => None,
        }
    }

    fn has_metadata_fault(&self, path: &str) -> bool {
        let faults = self.faults.read().unwrap();
        matches!(faults.get(path), Some(Fault::FailMetadata))
    }
}

#[async_trait]
impl Storage for MemoryStorage {
    async fn list_files(&self, prefix: Option<&str>) -> Result<Vec<FileInfo>, StorageError> {
        self.check_access()?;
        let prefix = prefix.unwrap_or("");
        let objects = self.objects.read().unwrap();

        Ok(objects
            .iter()
            .filter(|(path, _)| path.starts_with(prefix))
            .map(|(path, obj)| FileInfo {
                path: path.clone(),
                size: obj.data.len() as u64,
                modified_time: obj.modified_time,
                is_dir: false,
                checksum: None,
            })
            .collect())
    }

    async fn stat(&self, path: &str) -> Result<Option<FileMeta>, StorageError> {
        self.check_access()?;
        let objects = self.objects.read().unwrap();
        Ok(objects.get(path).map(|obj| FileMeta {
            size: obj.data.len() as u64,
            modified_time: obj.modified_time,
            is_dir: false,
            etag: None,
        }))
    }

    async fn read(&self, path: &str) -> Result<Vec<u8>, StorageError> {
        self.check_access()?;
        let objects = self.objects.read().unwrap();
        objects
            .get(path)
            .map(|o| o.data.clone())
            .ok_or_else(|| StorageError::Permanent(format!("对象不存在: {}", path)))
    }

    async fn write(
        &self,
        path: &str,
        data: Vec<u8>,
        meta: Option<&UploadMetadata>,
    ) -> Result<(), StorageError> {
        self.check_access()?;

        if let Some(err) = self.take_write_fault(path) {
            return Err(err);
        }

        let metadata_fault = self.has_metadata_fault(path);

        self.log_op("write", path);
        let mut objects = self.objects.write().unwrap();
        objects.insert(
            path.to_string(),
            StoredObject {
                data,
                metadata: if metadata_fault {
                    None
                } else {
                    meta.map(|m| m.to_pairs().into_iter().collect())
                },
                modified_time: chrono::Utc::now().timestamp(),
            },
        );
        drop(objects);

        if metadata_fault {
            return Err(StorageError::Metadata(format!(
                "simulated metadata failure: {}",
                path
            )));
        }
        Ok(())
    }

    async fn delete(&self, path: &str) -> Result<(), StorageError> {
        self.check_access()?;

        if let Some(err) = self.take_write_fault(path) {
            return Err(err);
        }

        self.log_op("delete", path);
        let mut objects = self.objects.write().unwrap();
        // 删除不存在的对象视为成功
        objects.remove(path);
        Ok(())
    }

    async fn verify_access(&self) -> Result<(), StorageError> {
        self.check_access()
    }

    fn name(&self) -> &str {
        &self.name
    }
}
