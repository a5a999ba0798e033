//! 本地构件发现
//!
//! 按顺序扫描多个搜索根，用通配模式筛选文件，
//! 同一物理文件（从多个根都能到达）只计一次。

use crate::error::SyncError;
use regex::Regex;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

/// 一个搜索根；必选根缺失时整个运行失败，可选根缺失时产出为空
#[derive(Debug, Clone)]
pub struct SearchRoot {
    pub path: PathBuf,
    pub required: bool,
}

impl SearchRoot {
    pub fn required(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            required: true,
        }
    }

    pub fn optional(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            required: false,
        }
    }
}

/// 待传输的本地构件
#[derive(Debug, Clone)]
pub struct Artifact {
    /// 相对搜索根的路径，运行内唯一，跨运行稳定
    pub identity: String,
    pub size: u64,
    pub local_path: PathBuf,
    pub content_type: String,
}

/// 根据扩展名推断内容类型
pub fn content_type_for(name: &str) -> String {
    let ext = Path::new(name)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_lowercase())
        .unwrap_or_default();

    match ext.as_str() {
        "xlsx" => "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
        "xls" => "application/vnd.ms-excel",
        "csv" => "text/csv",
        "json" => "application/json",
        _ => "application/octet-stream",
    }
    .to_string()
}

/// 构件发现器
pub struct ArtifactSource {
    patterns: Vec<String>,
    matchers: Vec<Regex>,
}

impl ArtifactSource {
    /// 默认模式：按套件导出的 Excel 文件
    pub fn default_patterns() -> Vec<String> {
        vec!["*.xlsx".to_string(), "*.xls".to_string()]
    }

    pub fn new(patterns: &[String]) -> Self {
        let mut matchers = Vec::new();
        for pattern in patterns {
            match glob_to_regex(pattern) {
                Ok(re) => matchers.push(re),
                Err(e) => warn!("忽略无效模式 {}: {}", pattern, e),
            }
        }
        Self {
            patterns: patterns.to_vec(),
            matchers,
        }
    }

    /// 文件名是否匹配任一模式
    fn matches(&self, file_name: &str) -> bool {
        let name = file_name.to_lowercase();
        self.matchers.iter().any(|re| re.is_match(&name))
    }

    /// 扫描所有搜索根，返回按 identity 升序的构件列表
    pub async fn discover(&self, roots: &[SearchRoot]) -> Result<Vec<Artifact>, SyncError> {
        info!("开始扫描 {} 个目录, 模式: {:?}", roots.len(), self.patterns);

        let mut artifacts: Vec<Artifact> = Vec::new();
        let mut seen_paths: HashSet<PathBuf> = HashSet::new();

        for root in roots {
            if !root.path.exists() {
                if root.required {
                    return Err(SyncError::Discovery {
                        path: root.path.display().to_string(),
                        reason: "目录不存在".to_string(),
                    });
                }
                debug!("可选目录不存在，跳过: {:?}", root.path);
                continue;
            }

            let found = self.scan_root(&root.path).await?;
            info!("目录 {:?}: 找到 {} 个文件", root.path, found.len());

            for artifact in found {
                // 按规范化绝对路径去重，同一文件只计一次
                let canonical = std::fs::canonicalize(&artifact.local_path)
                    .unwrap_or_else(|_| artifact.local_path.clone());
                if seen_paths.insert(canonical) {
                    artifacts.push(artifact);
                }
            }
        }

        artifacts.sort_by(|a, b| a.identity.cmp(&b.identity));

        info!("扫描完成: 共 {} 个构件", artifacts.len());
        for artifact in artifacts.iter().take(10) {
            debug!("  - {} ({} 字节)", artifact.identity, artifact.size);
        }

        Ok(artifacts)
    }

    /// 扫描单个根目录
    async fn scan_root(&self, root: &Path) -> Result<Vec<Artifact>, SyncError> {
        let root = root.to_path_buf();
        let patterns = self.patterns.clone();
        let matchers = self.matchers.clone();

        // 使用 spawn_blocking 避免阻塞 async runtime
        let scanned = tokio::task::spawn_blocking(move || {
            let source = ArtifactSource { patterns, matchers };
            let mut found = Vec::new();

            for entry in WalkDir::new(&root).follow_links(false) {
                let entry = match entry {
                    Ok(e) => e,
                    Err(e) => {
                        return Err(SyncError::Discovery {
                            path: root.display().to_string(),
                            reason: e.to_string(),
                        })
                    }
                };

                if !entry.file_type().is_file() {
                    continue;
                }

                let file_name = entry.file_name().to_string_lossy();
                if !source.matches(&file_name) {
                    continue;
                }

                let relative = match entry.path().strip_prefix(&root) {
                    Ok(r) => r,
                    Err(_) => continue,
                };
                let identity = relative.to_string_lossy().replace('\\', "/");

                let size = entry.metadata().map(|m| m.len()).map_err(|e| {
                    SyncError::Discovery {
                        path: entry.path().display().to_string(),
                        reason: e.to_string(),
                    }
                })?;

                found.push(Artifact {
                    content_type: content_type_for(&identity),
                    identity,
                    size,
                    local_path: entry.path().to_path_buf(),
                });
            }

            Ok(found)
        })
        .await
        .map_err(|e| SyncError::Discovery {
            path: "<scan task>".to_string(),
            reason: e.to_string(),
        })??;

        Ok(scanned)
    }
}

/// 把 glob 模式翻译成锚定的正则（只支持 * 和 ?，够用）
fn glob_to_regex(pattern: &str) -> Result<Regex, regex::Error> {
    let mut regex_pattern = String::from("^");
    for ch in pattern.to_lowercase().chars() {
        match ch {
            '*' => regex_pattern.push_str(".*"),
            '?' => regex_pattern.push('.'),
            c => regex_pattern.push_str(&regex::escape(&c.to_string())),
        }
    }
    regex_pattern.push('$');
    Regex::new(&regex_pattern)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn touch(path: &Path, content: &[u8]) {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(path, content).unwrap();
    }

    #[tokio::test]
    async fn test_discover_filters_and_sorts() {
        let dir = tempfile::tempdir().unwrap();
        touch(&dir.path().join("b_suite.xlsx"), b"bb");
        touch(&dir.path().join("a_suite.xls"), b"a");
        touch(&dir.path().join("notes.txt"), b"skip");
        touch(&dir.path().join("nested/c_suite.xlsx"), b"ccc");

        let source = ArtifactSource::new(&ArtifactSource::default_patterns());
        let artifacts = source
            .discover(&[SearchRoot::required(dir.path())])
            .await
            .unwrap();

        let identities: Vec<_> = artifacts.iter().map(|a| a.identity.clone()).collect();
        assert_eq!(
            identities,
            vec!["a_suite.xls", "b_suite.xlsx", "nested/c_suite.xlsx"]
        );
        assert_eq!(artifacts[1].size, 2);
        assert_eq!(
            artifacts[0].content_type,
            "application/vnd.ms-excel"
        );
    }

    #[tokio::test]
    async fn test_missing_required_root_fails() {
        let source = ArtifactSource::new(&ArtifactSource::default_patterns());
        let result = source
            .discover(&[SearchRoot::required("/definitely/not/here")])
            .await;
        assert!(matches!(result, Err(SyncError::Discovery { .. })));
    }

    #[tokio::test]
    async fn test_missing_optional_root_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        touch(&dir.path().join("a.xlsx"), b"a");

        let source = ArtifactSource::new(&ArtifactSource::default_patterns());
        let artifacts = source
            .discover(&[
                SearchRoot::required(dir.path()),
                SearchRoot::optional(dir.path().join("no_such_subdir")),
            ])
            .await
            .unwrap();

        assert_eq!(artifacts.len(), 1);
    }

    #[tokio::test]
    async fn test_duplicate_roots_deduplicate() {
        let dir = tempfile::tempdir().unwrap();
        touch(&dir.path().join("a.xlsx"), b"a");

        let source = ArtifactSource::new(&ArtifactSource::default_patterns());
        let artifacts = source
            .discover(&[
                SearchRoot::required(dir.path()),
                SearchRoot::optional(dir.path()),
            ])
            .await
            .unwrap();

        assert_eq!(artifacts.len(), 1);
    }

    #[test]
    fn test_glob_matching_is_case_insensitive() {
        let source = ArtifactSource::new(&["*.XLSX".to_string()]);
        assert!(source.matches("Report.xlsx"));
        assert!(!source.matches("report.xls"));
    }
}
