//! 加载器工厂
//!
//! 按 `<base_path>/<type>-<version>.<ext>` 的约定定位配置，注册 schema，
//! 构造加载器并套上共享缓存

use garde::Validate;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use serde_with::serde_as;
use smart_default::SmartDefault;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use crate::cache::{register_caches, CachedLoader, ConfigCache, MemoryCache};
use crate::cfg::duration::positive_duration;
use crate::cfg::{create_trait_from_type_options, HumanDur, TypeOptions};
use crate::error::ConfigError;
use crate::fs::FileWatcherConfig;
use crate::loader::{EnvLoader, EnvLoaderConfig, FileLoader, FileLoaderConfig, Loader};
use crate::schema::{SchemaRegistry, SchemaValidator, Validator};

const FACTORY_SOURCE: &str = "factory";

/// 工厂配置
#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize, SmartDefault, Validate)]
#[serde(default)]
pub struct LoaderFactoryConfig {
    /// 配置文件根目录
    #[default = "config"]
    #[garde(length(min = 1))]
    pub base_path: String,

    /// 文件加载器使用的扩展名
    #[default = "json"]
    #[garde(pattern(r"^(json|json5|yaml|yml|toml)$"))]
    pub extension: String,

    /// 环境变量加载器的定时刷新间隔
    #[serde_as(as = "Option<HumanDur>")]
    #[garde(custom(positive_duration))]
    pub refresh_interval: Option<Duration>,

    /// 环境变量加载器是否合并进程环境变量
    #[default = true]
    #[garde(skip)]
    pub include_process_env: bool,

    /// 环境变量加载器中 env 文件是否覆盖进程环境变量
    #[serde(rename = "override")]
    #[garde(skip)]
    pub override_existing: bool,

    /// 缓存后端，缺省为 MemoryCache
    #[garde(skip)]
    pub cache: Option<TypeOptions>,

    #[garde(dive)]
    pub watcher: FileWatcherConfig,
}

/// 加载器种类
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LoaderKind {
    #[default]
    File,
    Env,
}

/// 创建加载器的参数
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoaderDescriptor {
    #[serde(rename = "type")]
    pub type_name: String,
    pub version: String,
    pub schema: JsonValue,
    #[serde(default)]
    pub kind: LoaderKind,
}

impl LoaderDescriptor {
    pub fn new(
        type_name: impl Into<String>,
        version: impl Into<String>,
        schema: JsonValue,
        kind: LoaderKind,
    ) -> Self {
        Self {
            type_name: type_name.into(),
            version: version.into(),
            schema,
            kind,
        }
    }
}

/// 加载器工厂
///
/// 所有加载器共享同一个 schema 注册表和缓存
///
/// # 示例
///
/// ```no_run
/// use cfgx::factory::{LoaderFactory, LoaderFactoryConfig, LoaderKind, LoaderDescriptor};
/// use cfgx::loader::Loader;
/// use serde_json::json;
///
/// let factory = LoaderFactory::new(LoaderFactoryConfig::default()).unwrap();
/// let loader = factory
///     .create_loader(LoaderDescriptor::new(
///         "app",
///         "1.0",
///         json!({"type": "object", "required": ["port"]}),
///         LoaderKind::File,
///     ))
///     .unwrap();
/// // 读取 config/app-1.0.json
/// let config = loader.load().unwrap();
/// ```
pub struct LoaderFactory {
    config: LoaderFactoryConfig,
    registry: Arc<SchemaRegistry>,
    cache: Arc<dyn ConfigCache>,
}

impl LoaderFactory {
    pub fn new(config: LoaderFactoryConfig) -> Result<Self, ConfigError> {
        Self::with_registry(config, Arc::new(SchemaRegistry::new()))
    }

    /// 使用已有的 schema 注册表
    pub fn with_registry(
        config: LoaderFactoryConfig,
        registry: Arc<SchemaRegistry>,
    ) -> Result<Self, ConfigError> {
        config.validate().map_err(|e| ConfigError::LoadError {
            source_id: FACTORY_SOURCE.to_string(),
            cause: anyhow::anyhow!("invalid factory config: {}", e),
        })?;

        let cache: Arc<dyn ConfigCache> = match &config.cache {
            Some(options) => {
                let cache = register_caches()
                    .and_then(|_| create_trait_from_type_options::<dyn ConfigCache>(options))
                    .map_err(|e| ConfigError::LoadError {
                        source_id: FACTORY_SOURCE.to_string(),
                        cause: e.context(format!("failed to create cache {}", options.type_name)),
                    })?;
                Arc::from(cache)
            }
            None => Arc::new(MemoryCache::default()),
        };

        log::debug!(
            "loader factory created, base_path: {}, extension: {}",
            config.base_path,
            config.extension
        );

        Ok(Self {
            config,
            registry,
            cache,
        })
    }

    pub fn registry(&self) -> &Arc<SchemaRegistry> {
        &self.registry
    }

    pub fn cache(&self) -> &Arc<dyn ConfigCache> {
        &self.cache
    }

    /// 配置来源的位置：`<base_path>/<type>-<version>.<ext>`，环境变量加载器的扩展名为 env
    pub fn location(&self, type_name: &str, version: &str, kind: LoaderKind) -> PathBuf {
        let extension = match kind {
            LoaderKind::File => self.config.extension.as_str(),
            LoaderKind::Env => "env",
        };
        Path::new(&self.config.base_path).join(format!("{}-{}.{}", type_name, version, extension))
    }

    /// 注册 schema（同名已注册时跳过），构造加载器并套上缓存
    pub fn create_loader(&self, descriptor: LoaderDescriptor) -> Result<CachedLoader, ConfigError> {
        match self.registry.register_schema(&descriptor.type_name, descriptor.schema) {
            Ok(()) => log::debug!("schema registered: {}", descriptor.type_name),
            Err(ConfigError::SchemaNameExists { .. }) => {}
            Err(e) => return Err(e),
        }

        let location = self
            .location(&descriptor.type_name, &descriptor.version, descriptor.kind)
            .to_string_lossy()
            .to_string();
        let validator = Arc::clone(&self.registry) as Arc<dyn SchemaValidator>;

        let loader: Arc<dyn Loader> = match descriptor.kind {
            LoaderKind::File => Arc::new(FileLoader::new(
                FileLoaderConfig {
                    type_name: descriptor.type_name,
                    version: descriptor.version,
                    path: Some(location),
                    watcher: self.config.watcher.clone(),
                    ..Default::default()
                },
                validator,
            )?),
            LoaderKind::Env => Arc::new(EnvLoader::new(
                EnvLoaderConfig {
                    type_name: descriptor.type_name,
                    version: descriptor.version,
                    primary_file: Some(location),
                    required: true,
                    override_existing: self.config.override_existing,
                    include_process_env: self.config.include_process_env,
                    refresh_interval: self.config.refresh_interval,
                    watcher: self.config.watcher.clone(),
                    ..Default::default()
                },
                validator,
            )?),
        };

        log::debug!("loader created: {}", loader.id());
        Ok(CachedLoader::new(loader, Arc::clone(&self.cache)))
    }

    /// 绑定单个 schema 的独立校验器，不进入注册表
    pub fn create_validator(&self, schema: JsonValue) -> Result<Validator, ConfigError> {
        Validator::new(schema)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::fs;
    use tempfile::TempDir;

    fn app_schema() -> JsonValue {
        json!({
            "type": "object",
            "properties": {
                "app": {"type": "string"},
                "port": {"type": "integer", "minimum": 1}
            },
            "required": ["app", "port"]
        })
    }

    fn factory(dir: &TempDir) -> LoaderFactory {
        LoaderFactory::new(LoaderFactoryConfig {
            base_path: dir.path().to_string_lossy().to_string(),
            ..Default::default()
        })
        .unwrap()
    }

    #[test]
    fn test_config_default_and_deserialize() {
        let config = LoaderFactoryConfig::default();
        assert_eq!(config.base_path, "config");
        assert_eq!(config.extension, "json");
        assert!(config.include_process_env);
        assert!(config.cache.is_none());

        let config: LoaderFactoryConfig = serde_yaml::from_str(
            r#"
base_path: /etc/app
extension: yaml
refresh_interval: 1m
override: true
cache:
  type: MemoryCache
  options:
    ttl: 10m
"#,
        )
        .unwrap();
        assert_eq!(config.base_path, "/etc/app");
        assert_eq!(config.refresh_interval, Some(Duration::from_secs(60)));
        assert!(config.override_existing);
        assert_eq!(config.cache.unwrap().type_name, "MemoryCache");
    }

    #[test]
    fn test_location() {
        let factory = LoaderFactory::new(LoaderFactoryConfig::default()).unwrap();
        assert_eq!(
            factory.location("app", "1.0", LoaderKind::File),
            Path::new("config").join("app-1.0.json")
        );
        assert_eq!(
            factory.location("db", "2", LoaderKind::Env),
            Path::new("config").join("db-2.env")
        );
    }

    #[test]
    fn test_invalid_config() {
        let result = LoaderFactory::new(LoaderFactoryConfig {
            extension: "ini".to_string(),
            ..Default::default()
        });
        assert!(matches!(result, Err(ConfigError::LoadError { .. })));

        let result = LoaderFactory::new(LoaderFactoryConfig {
            cache: Some(TypeOptions::new("RedisCache", json!({}))),
            ..Default::default()
        });
        assert!(matches!(result, Err(ConfigError::LoadError { .. })));

        let config: LoaderFactoryConfig =
            serde_json::from_value(json!({"refresh_interval": "0s"})).unwrap();
        let result = LoaderFactory::new(config);
        assert!(matches!(result, Err(ConfigError::LoadError { .. })));

        let config: LoaderFactoryConfig =
            serde_json::from_value(json!({"watcher": {"debounce_delay_ms": 0}})).unwrap();
        let result = LoaderFactory::new(config);
        assert!(matches!(result, Err(ConfigError::LoadError { .. })));
    }

    #[test]
    fn test_create_loader_registers_schema_once() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("app-1.0.json"), r#"{"app": "demo", "port": 8080}"#).unwrap();
        fs::write(dir.path().join("app-2.0.json"), r#"{"app": "demo", "port": 9090}"#).unwrap();
        let factory = factory(&dir);

        let v1 = factory
            .create_loader(LoaderDescriptor::new("app", "1.0", app_schema(), LoaderKind::File))
            .unwrap();
        let v2 = factory
            .create_loader(LoaderDescriptor::new("app", "2.0", app_schema(), LoaderKind::File))
            .unwrap();
        assert!(factory.registry().has_schema("app"));
        assert_eq!(factory.registry().schema_names(), vec!["app".to_string()]);

        assert_eq!(v1.load().unwrap().as_value()["port"], 8080);
        assert_eq!(v2.load().unwrap().as_value()["port"], 9090);
        assert_ne!(v1.id(), v2.id());
    }

    #[test]
    fn test_create_loader_invalid_schema() {
        let dir = TempDir::new().unwrap();
        let factory = factory(&dir);
        let result = factory.create_loader(LoaderDescriptor::new(
            "broken",
            "1.0",
            json!({"type": "no-such-type"}),
            LoaderKind::File,
        ));
        assert!(matches!(result, Err(ConfigError::SchemaInvalid { .. })));
        assert!(!factory.registry().has_schema("broken"));
    }

    #[test]
    fn test_create_loader_uses_shared_cache() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("app-1.0.json");
        fs::write(&path, r#"{"app": "demo", "port": 8080}"#).unwrap();
        let factory = factory(&dir);

        let loader = factory
            .create_loader(LoaderDescriptor::new("app", "1.0", app_schema(), LoaderKind::File))
            .unwrap();
        loader.load().unwrap();
        assert!(factory.cache().get(loader.cache_key()).unwrap().is_some());

        // 缓存命中时不会读取已经变化的文件
        fs::write(&path, r#"{"app": "demo", "port": 9090}"#).unwrap();
        assert_eq!(loader.load().unwrap().as_value()["port"], 8080);

        loader.invalidate();
        assert_eq!(loader.load().unwrap().as_value()["port"], 9090);
    }

    #[test]
    fn test_create_validator() {
        let factory = LoaderFactory::new(LoaderFactoryConfig::default()).unwrap();
        let validator = factory.create_validator(app_schema()).unwrap();
        assert!(validator.is_valid(&json!({"app": "demo", "port": 1})));
        assert!(!validator.is_valid(&json!({"app": "demo", "port": 0})));
        assert!(factory.registry().schema_names().is_empty());

        let result = factory.create_validator(json!("not a schema"));
        assert!(matches!(result, Err(ConfigError::SchemaInvalid { .. })));
    }
}
