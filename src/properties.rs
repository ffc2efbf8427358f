//! 包元数据
//!
//! 名称、版本、路径等信息，可以直接构造，也可以从 TOML 文件加载。

use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// 覆盖 `debug` 字段的环境变量
pub const DEBUG_ENV_VAR: &str = "MODULARITY_DEBUG";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read file '{0}': {1}")]
    FileRead(String, #[source] std::io::Error),
    #[error("Failed to parse TOML from '{0}': {1}")]
    TomlParse(String, #[source] toml::de::Error),
    #[error("Required configuration field '{0}' is missing or invalid")]
    FieldMissing(String),
}

/// 包元数据
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Properties {
    base_name: String,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    version: Option<String>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    author: Option<String>,
    #[serde(default)]
    base_path: Option<PathBuf>,
    #[serde(default)]
    base_url: Option<String>,
    #[serde(default)]
    debug: bool,
}

impl Properties {
    /// 以 `base_name` 创建元数据，其余字段为空
    pub fn new(base_name: impl Into<String>) -> Self {
        Self {
            base_name: base_name.into().trim().to_string(),
            name: None,
            version: None,
            description: None,
            author: None,
            base_path: None,
            base_url: None,
            debug: false,
        }
    }

    pub fn with_debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = Some(version.into());
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_author(mut self, author: impl Into<String>) -> Self {
        self.author = Some(author.into());
        self
    }

    pub fn with_base_path(mut self, base_path: impl Into<PathBuf>) -> Self {
        self.base_path = Some(base_path.into());
        self
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = Some(base_url.into());
        self
    }

    /// 从 TOML 文本解析
    pub fn from_toml_str(source: &str) -> Result<Self, ConfigError> {
        Self::parse(source, "<inline>")
    }

    /// 从 TOML 文件加载，并应用 [`DEBUG_ENV_VAR`] 覆盖
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let display = path.display().to_string();
        let content =
            fs::read_to_string(path).map_err(|e| ConfigError::FileRead(display.clone(), e))?;

        let mut properties = Self::parse(&content, &display)?;
        if properties.base_path.is_none() {
            properties.base_path = path.parent().map(Path::to_path_buf);
        }
        if let Some(enabled) = env::var(DEBUG_ENV_VAR).ok().as_deref().and_then(parse_flag) {
            tracing::debug!(enabled, "debug mode overridden by {}", DEBUG_ENV_VAR);
            properties.debug = enabled;
        }
        Ok(properties)
    }

    fn parse(source: &str, origin: &str) -> Result<Self, ConfigError> {
        let mut properties: Properties =
            toml::from_str(source).map_err(|e| ConfigError::TomlParse(origin.to_string(), e))?;
        properties.base_name = properties.base_name.trim().to_string();
        if properties.base_name.is_empty() {
            return Err(ConfigError::FieldMissing("base_name".to_string()));
        }
        Ok(properties)
    }

    pub fn base_name(&self) -> &str {
        &self.base_name
    }

    /// 显示名称，未设置时回退到 `base_name`
    pub fn name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.base_name)
    }

    pub fn version(&self) -> Option<&str> {
        self.version.as_deref()
    }

    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    pub fn author(&self) -> Option<&str> {
        self.author.as_deref()
    }

    pub fn base_path(&self) -> Option<&Path> {
        self.base_path.as_deref()
    }

    pub fn base_url(&self) -> Option<&str> {
        self.base_url.as_deref()
    }

    pub fn is_debug(&self) -> bool {
        self.debug
    }
}

/// 解析布尔型开关，无法识别时返回 `None`
fn parse_flag(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
