use garde::Validate;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use smart_default::SmartDefault;
use std::io::ErrorKind;
use std::path::PathBuf;
use std::sync::Arc;

use super::core::{ChangeListener, Configuration, ErrorListener, Loader};
use super::notifier::{Detection, Notifier};
use super::parser::Format;
use crate::error::ConfigError;
use crate::fs::{FileEvent, FileWatcher, FileWatcherConfig};
use crate::schema::SchemaValidator;

/// 文件加载器配置
///
/// `path` 与 `value` 二选一：`value` 表示内存中的配置，跳过读取和解析，但仍然做校验
#[derive(Debug, Clone, Serialize, Deserialize, SmartDefault, Validate)]
#[serde(default)]
pub struct FileLoaderConfig {
    #[serde(rename = "type")]
    #[garde(length(min = 1))]
    pub type_name: String,

    #[garde(length(min = 1))]
    pub version: String,

    /// 校验用的 schema 名称或 $id，缺省时使用 type
    #[garde(skip)]
    pub schema: Option<String>,

    #[garde(skip)]
    pub schema_version: Option<String>,

    #[garde(skip)]
    pub path: Option<String>,

    #[garde(skip)]
    pub value: Option<JsonValue>,

    /// 显式指定格式，缺省时按扩展名识别
    #[garde(skip)]
    pub format: Option<String>,

    #[garde(dive)]
    pub watcher: FileWatcherConfig,
}

enum FileSource {
    Path(PathBuf),
    Inline(JsonValue),
}

struct FileLoaderInner {
    id: String,
    type_name: String,
    version: String,
    schema: String,
    schema_version: Option<String>,
    source: FileSource,
    format: Option<String>,
    validator: Arc<dyn SchemaValidator>,
}

impl FileLoaderInner {
    fn read(&self) -> Result<Configuration, ConfigError> {
        let value = match &self.source {
            FileSource::Inline(value) => value.clone(),
            FileSource::Path(path) => {
                let content = std::fs::read_to_string(path).map_err(|e| match e.kind() {
                    ErrorKind::NotFound => ConfigError::SourceMissing {
                        source_id: self.id.clone(),
                    },
                    _ => ConfigError::LoadError {
                        source_id: self.id.clone(),
                        cause: anyhow::Error::new(e)
                            .context(format!("failed to read {}", path.display())),
                    },
                })?;
                self.format_of(path)?.parse(&self.id, &content)?
            }
        };

        self.validator
            .validate(&value, &self.schema)
            .map_err(|e| e.with_source(&self.id))?;

        Ok(Configuration::new(
            self.type_name.clone(),
            self.version.clone(),
            self.schema_version.clone(),
            value,
        ))
    }

    fn format_of(&self, path: &std::path::Path) -> Result<Format, ConfigError> {
        let unknown = |name: String| ConfigError::ParseError {
            source_id: self.id.clone(),
            format: name.clone(),
            reason: format!("不支持的文件格式: {}", name),
        };

        match &self.format {
            Some(name) => name.parse().map_err(|_| unknown(name.clone())),
            None => Format::from_path(path).ok_or_else(|| {
                unknown(
                    path.extension()
                        .map(|ext| ext.to_string_lossy().to_string())
                        .unwrap_or_default(),
                )
            }),
        }
    }
}

/// 文件配置加载器
///
/// 支持 json / json5 / yaml / toml，watch 时监听文件所在目录，
/// 文件被修改或删除后重新创建都会触发重新加载
///
/// # 示例
///
/// ```no_run
/// use cfgx::loader::{FileLoader, FileLoaderConfig, Loader};
/// use cfgx::schema::SchemaRegistry;
/// use std::sync::Arc;
///
/// let registry = Arc::new(SchemaRegistry::new());
/// registry.register_schema("app", serde_json::json!({"type": "object"})).unwrap();
///
/// let loader = FileLoader::new(
///     FileLoaderConfig {
///         type_name: "app".to_string(),
///         version: "1.0".to_string(),
///         path: Some("config/app-1.0.json".to_string()),
///         ..Default::default()
///     },
///     registry,
/// ).unwrap();
/// let config = loader.load().unwrap();
/// ```
pub struct FileLoader {
    inner: Arc<FileLoaderInner>,
    notifier: Arc<Notifier>,
    watcher_config: FileWatcherConfig,
}

impl FileLoader {
    pub fn new(
        config: FileLoaderConfig,
        validator: Arc<dyn SchemaValidator>,
    ) -> Result<Self, ConfigError> {
        let id = match (&config.path, &config.value) {
            (Some(path), _) => format!("file:{}", path),
            (None, _) => format!("inline:{}@{}", config.type_name, config.version),
        };

        config.validate().map_err(|e| ConfigError::LoadError {
            source_id: id.clone(),
            cause: anyhow::anyhow!("invalid file loader config: {}", e),
        })?;

        let source = match (config.path, config.value) {
            (Some(path), None) => FileSource::Path(PathBuf::from(path)),
            (None, Some(value)) => FileSource::Inline(value),
            (Some(_), Some(_)) => {
                return Err(ConfigError::LoadError {
                    source_id: id,
                    cause: anyhow::anyhow!("path and value are mutually exclusive"),
                })
            }
            (None, None) => {
                return Err(ConfigError::LoadError {
                    source_id: id,
                    cause: anyhow::anyhow!("either path or value is required"),
                })
            }
        };

        let schema = config
            .schema
            .unwrap_or_else(|| config.type_name.clone());

        Ok(Self {
            notifier: Arc::new(Notifier::new(id.clone())),
            inner: Arc::new(FileLoaderInner {
                id,
                type_name: config.type_name,
                version: config.version,
                schema,
                schema_version: config.schema_version,
                source,
                format: config.format,
                validator,
            }),
            watcher_config: config.watcher,
        })
    }

    /// 文件路径，内存配置返回 None
    pub fn path(&self) -> Option<&std::path::Path> {
        match &self.inner.source {
            FileSource::Path(path) => Some(path),
            FileSource::Inline(_) => None,
        }
    }

    fn arm(&self, generation: u64) -> Result<Detection, ConfigError> {
        let path = match &self.inner.source {
            FileSource::Path(path) => path.clone(),
            FileSource::Inline(_) => {
                log::debug!("inline config never changes [{}]", self.inner.id);
                return Ok(Detection::default());
            }
        };

        let watch_error = |e: anyhow::Error| ConfigError::WatchError {
            source_id: self.inner.id.clone(),
            reason: e.to_string(),
        };

        let watcher = FileWatcher::new(self.watcher_config.clone()).map_err(watch_error)?;
        let inner = Arc::clone(&self.inner);
        let notifier = Arc::clone(&self.notifier);
        watcher
            .watch(&path, move |event| match event {
                FileEvent::Created(_) | FileEvent::Modified(_) => {
                    notifier.reload(generation, || inner.read());
                }
                FileEvent::Deleted(path) => {
                    log::warn!(
                        "config file deleted, keep last good config [{}]: {}",
                        inner.id,
                        path.display()
                    );
                }
                FileEvent::Error(e) => {
                    log::error!("file watch error [{}]: {}", inner.id, e);
                }
            })
            .map_err(watch_error)?;

        Ok(Detection {
            file_watcher: Some(watcher),
            ticker: None,
        })
    }
}

impl Loader for FileLoader {
    fn id(&self) -> &str {
        &self.inner.id
    }

    fn load(&self) -> Result<Configuration, ConfigError> {
        self.notifier.load(|| self.inner.read())
    }

    fn watch(&self, listener: ChangeListener) -> Result<(), ConfigError> {
        self.notifier
            .subscribe(listener, |generation| self.arm(generation))
    }

    fn on_error(&self, listener: ErrorListener) {
        self.notifier.on_error(listener);
    }

    fn unwatch(&self) {
        self.notifier.unsubscribe_all();
    }

    fn current(&self) -> Option<Configuration> {
        self.notifier.current()
    }
}

impl Drop for FileLoader {
    fn drop(&mut self) {
        self.notifier.unsubscribe_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loader::ChangeEvent;
    use crate::schema::SchemaRegistry;
    use serde_json::json;
    use std::fs;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::thread;
    use std::time::Duration;
    use tempfile::TempDir;

    fn registry() -> Arc<SchemaRegistry> {
        let registry = SchemaRegistry::new();
        registry
            .register_schema(
                "app",
                json!({
                    "type": "object",
                    "properties": {
                        "app": {"type": "string"},
                        "port": {"type": "integer", "minimum": 1}
                    },
                    "required": ["app", "port"]
                }),
            )
            .unwrap();
        Arc::new(registry)
    }

    fn file_config(path: &std::path::Path) -> FileLoaderConfig {
        FileLoaderConfig {
            type_name: "app".to_string(),
            version: "1.0".to_string(),
            path: Some(path.to_string_lossy().to_string()),
            ..Default::default()
        }
    }

    #[test]
    fn test_load_formats() {
        let dir = TempDir::new().unwrap();
        let files = [
            ("app.json", r#"{"app": "demo", "port": 8080}"#),
            ("app.json5", "{app: 'demo', port: 8080}"),
            ("app.yaml", "app: demo\nport: 8080\n"),
            ("app.toml", "app = \"demo\"\nport = 8080\n"),
        ];

        for (name, content) in files {
            let path = dir.path().join(name);
            fs::write(&path, content).unwrap();
            let loader = FileLoader::new(file_config(&path), registry()).unwrap();
            let config = loader.load().unwrap();
            assert_eq!(config.as_value(), &json!({"app": "demo", "port": 8080}), "{}", name);
            assert_eq!(config.type_name(), "app");
            assert_eq!(config.version(), "1.0");
        }
    }

    #[test]
    fn test_load_twice_is_equal() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("app-1.0.json");
        fs::write(&path, r#"{"app": "demo", "port": 8080}"#).unwrap();

        let loader = FileLoader::new(file_config(&path), registry()).unwrap();
        let first = loader.load().unwrap();
        let second = loader.load().unwrap();
        assert_eq!(first, second);
        assert_eq!(loader.current(), Some(second));
    }

    #[test]
    fn test_load_errors() {
        let dir = TempDir::new().unwrap();

        let missing = dir.path().join("missing.json");
        let loader = FileLoader::new(file_config(&missing), registry()).unwrap();
        assert!(matches!(loader.load(), Err(ConfigError::SourceMissing { .. })));

        let malformed = dir.path().join("malformed.json");
        fs::write(&malformed, r#"{"app": "demo", "port": "#).unwrap();
        let loader = FileLoader::new(file_config(&malformed), registry()).unwrap();
        assert!(matches!(loader.load(), Err(ConfigError::ParseError { .. })));

        let invalid = dir.path().join("invalid.json");
        fs::write(&invalid, r#"{"app": "demo", "port": 0}"#).unwrap();
        let loader = FileLoader::new(file_config(&invalid), registry()).unwrap();
        let err = loader.load().unwrap_err();
        let violations = err.violations().unwrap();
        assert!(!violations.is_empty());
        assert!(violations.touches("/port"));
        match err {
            ConfigError::ValidationFailed { source_id, .. } => {
                assert_eq!(source_id.as_deref(), Some(loader.id()));
            }
            other => panic!("unexpected error: {:?}", other),
        }
        assert!(loader.current().is_none());

        let unknown = dir.path().join("app.ini");
        fs::write(&unknown, "port=1").unwrap();
        let loader = FileLoader::new(file_config(&unknown), registry()).unwrap();
        assert!(matches!(loader.load(), Err(ConfigError::ParseError { .. })));
    }

    #[test]
    fn test_explicit_format() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("app.conf");
        fs::write(&path, "app: demo\nport: 8080\n").unwrap();

        let loader = FileLoader::new(
            FileLoaderConfig {
                format: Some("yaml".to_string()),
                ..file_config(&path)
            },
            registry(),
        )
        .unwrap();
        assert_eq!(loader.load().unwrap().as_value()["port"], 8080);
    }

    #[test]
    fn test_inline_value() {
        let loader = FileLoader::new(
            FileLoaderConfig {
                type_name: "app".to_string(),
                version: "1.0".to_string(),
                value: Some(json!({"app": "demo", "port": 8080})),
                ..Default::default()
            },
            registry(),
        )
        .unwrap();
        assert_eq!(loader.id(), "inline:app@1.0");
        assert!(loader.path().is_none());
        assert_eq!(loader.load().unwrap().as_value()["app"], "demo");

        // 内存配置也要校验
        let loader = FileLoader::new(
            FileLoaderConfig {
                type_name: "app".to_string(),
                version: "1.0".to_string(),
                value: Some(json!({"app": "demo"})),
                ..Default::default()
            },
            registry(),
        )
        .unwrap();
        assert!(matches!(loader.load(), Err(ConfigError::ValidationFailed { .. })));

        // watch 内存配置不会启动任何检测
        loader.watch(Arc::new(|_event: &ChangeEvent| {})).unwrap();
        loader.unwatch();
    }

    #[test]
    fn test_invalid_config() {
        let result = FileLoader::new(
            FileLoaderConfig {
                type_name: "".to_string(),
                version: "1.0".to_string(),
                path: Some("app.json".to_string()),
                ..Default::default()
            },
            registry(),
        );
        assert!(matches!(result, Err(ConfigError::LoadError { .. })));

        let result = FileLoader::new(
            FileLoaderConfig {
                type_name: "app".to_string(),
                version: "1.0".to_string(),
                ..Default::default()
            },
            registry(),
        );
        assert!(matches!(result, Err(ConfigError::LoadError { .. })));

        let result = FileLoader::new(
            FileLoaderConfig {
                type_name: "app".to_string(),
                version: "1.0".to_string(),
                path: Some("app.json".to_string()),
                value: Some(json!({})),
                ..Default::default()
            },
            registry(),
        );
        assert!(matches!(result, Err(ConfigError::LoadError { .. })));

        let mut config = file_config(std::path::Path::new("app.json"));
        config.watcher.debounce_delay_ms = 0;
        let result = FileLoader::new(config, registry());
        assert!(matches!(result, Err(ConfigError::LoadError { .. })));
    }

    #[test]
    fn test_config_deserialize() {
        let config: FileLoaderConfig = serde_json::from_value(json!({
            "type": "app",
            "version": "1.0",
            "path": "config/app-1.0.yaml",
            "watcher": {"debounce_delay_ms": 50}
        }))
        .unwrap();
        assert_eq!(config.type_name, "app");
        assert_eq!(config.path.as_deref(), Some("config/app-1.0.yaml"));
        assert_eq!(config.watcher.debounce_delay_ms, 50);
        assert_eq!(config.watcher.worker_threads, 1);
        assert!(config.schema.is_none());
    }

    #[test]
    fn test_watch_reports_change_once() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("app-1.0.json");
        fs::write(&path, r#"{"app": "demo", "port": 8080}"#).unwrap();

        let loader = FileLoader::new(file_config(&path), registry()).unwrap();
        loader.load().unwrap();

        let events = Arc::new(Mutex::new(Vec::<ChangeEvent>::new()));
        {
            let events = Arc::clone(&events);
            loader
                .watch(Arc::new(move |event: &ChangeEvent| {
                    events.lock().unwrap().push(event.clone());
                }))
                .unwrap();
        }

        thread::sleep(Duration::from_millis(100));
        fs::write(&path, r#"{"app": "demo", "port": 9090}"#).unwrap();
        thread::sleep(Duration::from_millis(500));

        let events = events.lock().unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].previous.as_value()["port"], 8080);
        assert_eq!(events[0].current.as_value()["port"], 9090);
        assert_eq!(events[0].source, loader.id());
        assert_eq!(loader.current().unwrap().as_value()["port"], 9090);
    }

    #[test]
    fn test_watch_invalid_rewrite_keeps_last_good() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("app-1.0.json");
        fs::write(&path, r#"{"app": "demo", "port": 8080}"#).unwrap();

        let loader = FileLoader::new(file_config(&path), registry()).unwrap();
        loader.load().unwrap();

        let changes = Arc::new(AtomicUsize::new(0));
        let errors = Arc::new(AtomicUsize::new(0));
        {
            let changes = Arc::clone(&changes);
            loader
                .watch(Arc::new(move |_event: &ChangeEvent| {
                    changes.fetch_add(1, Ordering::SeqCst);
                }))
                .unwrap();
            let errors = Arc::clone(&errors);
            loader.on_error(Arc::new(move |e: &ConfigError| {
                assert!(matches!(e, ConfigError::ValidationFailed { .. }));
                errors.fetch_add(1, Ordering::SeqCst);
            }));
        }

        thread::sleep(Duration::from_millis(100));
        fs::write(&path, r#"{"app": "demo", "port": -1}"#).unwrap();
        thread::sleep(Duration::from_millis(500));

        assert_eq!(changes.load(Ordering::SeqCst), 0);
        assert!(errors.load(Ordering::SeqCst) >= 1);
        assert_eq!(loader.current().unwrap().as_value()["port"], 8080);
    }

    #[test]
    fn test_watch_after_delete_and_recreate() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("app-1.0.json");
        fs::write(&path, r#"{"app": "demo", "port": 8080}"#).unwrap();

        let loader = FileLoader::new(file_config(&path), registry()).unwrap();
        loader.load().unwrap();
        loader.watch(Arc::new(|_event: &ChangeEvent| {})).unwrap();
        loader.unwatch();

        fs::remove_file(&path).unwrap();
        thread::sleep(Duration::from_millis(100));
        fs::write(&path, r#"{"app": "demo", "port": 8081}"#).unwrap();

        let ports = Arc::new(Mutex::new(Vec::new()));
        {
            let ports = Arc::clone(&ports);
            loader
                .watch(Arc::new(move |event: &ChangeEvent| {
                    ports.lock().unwrap().push(event.current.as_value()["port"].clone());
                }))
                .unwrap();
        }

        thread::sleep(Duration::from_millis(100));
        fs::write(&path, r#"{"app": "demo", "port": 8082}"#).unwrap();
        thread::sleep(Duration::from_millis(500));

        let ports = ports.lock().unwrap();
        assert_eq!(ports.last(), Some(&json!(8082)));
    }

    #[test]
    fn test_no_callback_after_unwatch() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("app-1.0.json");
        fs::write(&path, r#"{"app": "demo", "port": 8080}"#).unwrap();

        let loader = FileLoader::new(file_config(&path), registry()).unwrap();
        loader.load().unwrap();

        let counter = Arc::new(AtomicUsize::new(0));
        {
            let counter = Arc::clone(&counter);
            loader
                .watch(Arc::new(move |_event: &ChangeEvent| {
                    counter.fetch_add(1, Ordering::SeqCst);
                }))
                .unwrap();
        }
        loader.unwatch();
        // 重复调用是安全的
        loader.unwatch();

        fs::write(&path, r#"{"app": "demo", "port": 9090}"#).unwrap();
        thread::sleep(Duration::from_millis(500));
        assert_eq!(counter.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_watch_missing_directory() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("missing").join("app-1.0.json");
        let loader = FileLoader::new(file_config(&path), registry()).unwrap();
        let result = loader.watch(Arc::new(|_event: &ChangeEvent| {}));
        assert!(matches!(result, Err(ConfigError::WatchError { .. })));
    }
}
