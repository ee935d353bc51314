//! 配置模块，负责加载JSON配置文件并维护数据源目录

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::time::Duration;

use tracing::{debug, info};

use crate::collaborators::{SourceMetadata, SourceMetadataProvider};
use crate::error::ConfigError;

fn default_limit() -> u64 {
    100
}

fn default_debounce_ms() -> u64 {
    300
}

/// 引擎配置
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// 新建查询状态时的默认行数限制
    #[serde(default = "default_limit")]
    pub default_limit: u64,
    /// 时间范围或行数变更后重新计算SQL的防抖延迟
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,
    /// 启动时选中的数据源
    #[serde(default)]
    pub default_source: Option<String>,
    /// 数据源名到表坐标的映射
    #[serde(default)]
    pub sources: BTreeMap<String, SourceMetadata>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            default_limit: default_limit(),
            debounce_ms: default_debounce_ms(),
            default_source: None,
            sources: BTreeMap::new(),
        }
    }
}

impl EngineConfig {
    /// 从JSON文件加载配置
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path_ref = path.as_ref();
        let path_display = path_ref.display().to_string();

        if !path_ref.exists() {
            return Err(ConfigError::NotFound(path_display));
        }

        let content = fs::read_to_string(path_ref).map_err(|source| ConfigError::Read {
            path: path_display.clone(),
            source,
        })?;

        let config = Self::from_json_str(&content).map_err(|e| match e {
            ConfigError::Parse { source, .. } => ConfigError::Parse { path: path_display.clone(), source },
            other => other,
        })?;

        info!(path = %path_display, sources = config.sources.len(), "loaded engine config");
        Ok(config)
    }

    pub fn from_json_str(content: &str) -> Result<Self, ConfigError> {
        let config: EngineConfig = serde_json::from_str(content).map_err(|source| ConfigError::Parse {
            path: "<inline>".to_string(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.default_limit == 0 {
            return Err(ConfigError::Invalid("default_limit 必须大于0".to_string()));
        }
        if let Some(name) = &self.default_source {
            if !self.sources.contains_key(name) {
                return Err(ConfigError::Invalid(format!("默认数据源 '{}' 未定义", name)));
            }
        }
        for (name, source) in &self.sources {
            if source.table.trim().is_empty() {
                return Err(ConfigError::Invalid(format!("数据源 '{}' 缺少表名", name)));
            }
        }
        Ok(())
    }

    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }
}

/// 数据源目录，记录当前选中的数据源
#[derive(Debug, Clone, Default)]
pub struct SourceCatalog {
    sources: BTreeMap<String, SourceMetadata>,
    selected: Option<String>,
}

impl SourceCatalog {
    pub fn new(sources: BTreeMap<String, SourceMetadata>, selected: Option<String>) -> Self {
        let selected = selected.filter(|name| sources.contains_key(name));
        Self { sources, selected }
    }

    pub fn from_config(config: &EngineConfig) -> Self {
        Self::new(config.sources.clone(), config.default_source.clone())
    }

    /// 切换数据源，未知名称返回错误且不改变当前选择
    pub fn select(&mut self, name: &str) -> Result<&SourceMetadata, ConfigError> {
        let (key, source) = self
            .sources
            .get_key_value(name)
            .ok_or_else(|| ConfigError::Invalid(format!("未知数据源 '{}'", name)))?;
        debug!(source = %key, "selected source");
        self.selected = Some(key.clone());
        Ok(source)
    }

    pub fn clear_selection(&mut self) {
        self.selected = None;
    }

    pub fn selected_name(&self) -> Option<&str> {
        self.selected.as_deref()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.sources.keys().map(String::as_str)
    }
}

impl SourceMetadataProvider for SourceCatalog {
    fn current_source(&self) -> Option<SourceMetadata> {
        self.selected
            .as_ref()
            .and_then(|name| self.sources.get(name))
            .cloned()
    }
}
