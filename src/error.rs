//! 配置加载错误
//!
//! 所有 schema / loader / factory 操作统一返回 [`ConfigError`]，
//! 调用方可以根据错误类型决定是否重试

use serde_json::Value as JsonValue;
use std::fmt;
use thiserror::Error;

/// 单条校验违规信息
#[derive(Debug, Clone, PartialEq)]
pub struct Violation {
    /// 违规字段在实例中的 JSON Pointer 路径（根为空字符串）
    pub path: String,
    /// 触发违规的 schema 约束路径，例如 `/properties/port/exclusiveMinimum`
    pub constraint: String,
    /// 可读的错误描述
    pub message: String,
    /// 实际值
    pub actual: Option<JsonValue>,
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let path = if self.path.is_empty() { "(root)" } else { &self.path };
        write!(f, "{}: {} [{}]", path, self.message, self.constraint)
    }
}

/// 一次校验产生的全部违规
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Violations(Vec<Violation>);

impl Violations {
    pub fn new(violations: Vec<Violation>) -> Self {
        Self(violations)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Violation> {
        self.0.iter()
    }

    /// 是否存在路径为 `path` 或位于其下的违规
    pub fn touches(&self, path: &str) -> bool {
        self.0.iter().any(|v| {
            v.path == path || v.path.starts_with(&format!("{}/", path))
        })
    }

    pub fn into_inner(self) -> Vec<Violation> {
        self.0
    }
}

impl fmt::Display for Violations {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, v) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, "; ")?;
            }
            write!(f, "{}", v)?;
        }
        Ok(())
    }
}

impl<'a> IntoIterator for &'a Violations {
    type Item = &'a Violation;
    type IntoIter = std::slice::Iter<'a, Violation>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

/// 配置管理错误类型
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Schema invalid [{schema}]: {reason}")]
    SchemaInvalid { schema: String, reason: String },

    #[error("Schema not found: {schema}")]
    SchemaNotFound { schema: String },

    #[error("Schema name already registered: {name}")]
    SchemaNameExists { name: String },

    #[error("Schema id already registered: {id}")]
    SchemaIdExists { id: String },

    #[error("Validation failed against schema [{schema}] for source [{}]: {violations}", .source_id.as_deref().unwrap_or("-"))]
    ValidationFailed {
        schema: String,
        source_id: Option<String>,
        violations: Violations,
    },

    #[error("Parse error [{source_id}] as {format}: {reason}")]
    ParseError {
        source_id: String,
        format: String,
        reason: String,
    },

    #[error("Source missing: {source_id}")]
    SourceMissing { source_id: String },

    #[error("Load error [{source_id}]: {cause}")]
    LoadError {
        source_id: String,
        #[source]
        cause: anyhow::Error,
    },

    #[error("Watch error [{source_id}]: {reason}")]
    WatchError { source_id: String, reason: String },
}

impl ConfigError {
    /// 是否值得重试：源缺失、IO 异常、监听失败可以在运维修复后重试，
    /// schema 相关错误属于编程错误
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ConfigError::SourceMissing { .. }
                | ConfigError::LoadError { .. }
                | ConfigError::WatchError { .. }
        )
    }

    /// 校验失败时返回违规列表
    pub fn violations(&self) -> Option<&Violations> {
        match self {
            ConfigError::ValidationFailed { violations, .. } => Some(violations),
            _ => None,
        }
    }

    /// 为校验错误补充来源标识，其他错误原样返回
    pub(crate) fn with_source(self, source: &str) -> Self {
        match self {
            ConfigError::ValidationFailed {
                schema,
                source_id: None,
                violations,
            } => ConfigError::ValidationFailed {
                schema,
                source_id: Some(source.to_string()),
                violations,
            },
            other => other,
        }
    }
}
