use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value as JsonValue;
use std::sync::Arc;

use crate::error::ConfigError;

/// 校验通过的配置
///
/// 一旦返回给调用方就不再变化，重新加载会产生新的 Configuration
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Configuration {
    #[serde(rename = "type")]
    type_name: String,
    version: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    schema_version: Option<String>,
    value: JsonValue,
}

impl Configuration {
    pub fn new(
        type_name: impl Into<String>,
        version: impl Into<String>,
        schema_version: Option<String>,
        value: JsonValue,
    ) -> Self {
        Self {
            type_name: type_name.into(),
            version: version.into(),
            schema_version,
            value,
        }
    }

    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn schema_version(&self) -> Option<&str> {
        self.schema_version.as_deref()
    }

    pub fn as_value(&self) -> &JsonValue {
        &self.value
    }

    pub fn into_value(self) -> JsonValue {
        self.value
    }

    /// 转换为指定类型
    ///
    /// # 示例
    /// ```no_run
    /// # use cfgx::loader::Configuration;
    /// #[derive(serde::Deserialize)]
    /// struct App { port: u16 }
    ///
    /// # let config = Configuration::new("app", "1.0", None, serde_json::json!({"port": 8080}));
    /// let app: App = config.as_type().unwrap();
    /// ```
    pub fn as_type<T: DeserializeOwned>(&self) -> anyhow::Result<T> {
        Ok(T::deserialize(&self.value)?)
    }

    pub fn into_type<T: DeserializeOwned>(self) -> anyhow::Result<T> {
        Ok(serde_json::from_value(self.value)?)
    }
}

/// 配置变更事件：两次都校验通过、且内容不同的加载结果
#[derive(Debug, Clone)]
pub struct ChangeEvent {
    pub previous: Configuration,
    pub current: Configuration,
    pub timestamp: DateTime<Utc>,
    /// 来源标识，与 [`Loader::id`] 一致
    pub source: String,
}

/// 变更回调
pub type ChangeListener = Arc<dyn Fn(&ChangeEvent) + Send + Sync>;

/// 监听触发的重新加载失败时的回调
pub type ErrorListener = Arc<dyn Fn(&ConfigError) + Send + Sync>;

/// 配置加载器
///
/// 每个 Loader 对应一个物理来源（文件、环境变量），负责读取、解析、校验并记住最近一次成功的结果
pub trait Loader: Send + Sync {
    /// 来源标识，用于事件、错误信息和缓存 key
    fn id(&self) -> &str;

    /// 读取并校验配置，只有成功时才会更新当前配置
    fn load(&self) -> Result<Configuration, ConfigError>;

    /// 注册变更回调，第一次注册时启动变化检测
    fn watch(&self, listener: ChangeListener) -> Result<(), ConfigError>;

    /// 注册错误回调，监听触发的重新加载失败会通知到这里
    fn on_error(&self, listener: ErrorListener);

    /// 停止变化检测并清空所有回调；没有 watch 过或重复调用都是安全的
    fn unwatch(&self);

    /// 最近一次成功加载的配置
    fn current(&self) -> Option<Configuration>;
}

impl<L: Loader + ?Sized> Loader for Arc<L> {
    fn id(&self) -> &str {
        (**self).id()
    }

    fn load(&self) -> Result<Configuration, ConfigError> {
        (**self).load()
    }

    fn watch(&self, listener: ChangeListener) -> Result<(), ConfigError> {
        (**self).watch(listener)
    }

    fn on_error(&self, listener: ErrorListener) {
        (**self).on_error(listener)
    }

    fn unwatch(&self) {
        (**self).unwatch()
    }

    fn current(&self) -> Option<Configuration> {
        (**self).current()
    }
}
