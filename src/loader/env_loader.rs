use garde::Validate;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};
use serde_with::serde_as;
use smart_default::SmartDefault;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use super::core::{ChangeListener, Configuration, ErrorListener, Loader};
use super::notifier::{Detection, Notifier, Ticker};
use crate::cfg::duration::positive_duration;
use crate::cfg::HumanDur;
use crate::error::ConfigError;
use crate::fs::{FileEvent, FileWatcher, FileWatcherConfig};
use crate::schema::SchemaValidator;

/// 环境变量加载器配置
///
/// 合并顺序：进程环境变量 -> primary_file -> secondary_files。
/// `override = false` 时先写入的值优先，`override = true` 时后写入的值覆盖前面的值
#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize, SmartDefault, Validate)]
#[serde(default)]
pub struct EnvLoaderConfig {
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
    pub primary_file: Option<String>,

    /// primary_file 缺省时，从 `<profile_dir>/<$profile_var 或 default>.env` 推导
    #[garde(skip)]
    pub profile_dir: Option<String>,

    #[default = "ENV"]
    #[garde(length(min = 1))]
    pub profile_var: String,

    /// primary_file 不存在时是否报错
    #[garde(skip)]
    pub required: bool,

    #[garde(skip)]
    pub secondary_files: Vec<String>,

    #[serde(rename = "override")]
    #[garde(skip)]
    pub override_existing: bool,

    #[default = true]
    #[garde(skip)]
    pub include_process_env: bool,

    /// 只保留带该前缀的变量，并去掉前缀
    #[garde(skip)]
    pub prefix: Option<String>,

    /// 将 true/false 和数字字面量转换为对应的 JSON 类型
    #[garde(skip)]
    pub parse_values: bool,

    /// 定时刷新间隔，例如 "30s"
    #[serde_as(as = "Option<HumanDur>")]
    #[garde(custom(positive_duration))]
    pub refresh_interval: Option<Duration>,

    #[garde(dive)]
    pub watcher: FileWatcherConfig,
}

struct EnvLoaderInner {
    id: String,
    type_name: String,
    version: String,
    schema: String,
    schema_version: Option<String>,
    primary_file: Option<PathBuf>,
    required: bool,
    secondary_files: Vec<PathBuf>,
    override_existing: bool,
    include_process_env: bool,
    prefix: Option<String>,
    parse_values: bool,
    validator: Arc<dyn SchemaValidator>,
}

impl EnvLoaderInner {
    fn read(&self) -> Result<Configuration, ConfigError> {
        let mut merged = BTreeMap::new();

        if self.include_process_env {
            let process_env = std::env::vars_os()
                .filter_map(|(k, v)| Some((k.into_string().ok()?, v.into_string().ok()?)));
            self.merge(&mut merged, process_env);
        }

        if let Some(primary) = &self.primary_file {
            match self.read_env_file(primary)? {
                Some(entries) => self.merge(&mut merged, entries),
                None if self.required => {
                    return Err(ConfigError::SourceMissing {
                        source_id: format!("{} ({})", self.id, primary.display()),
                    })
                }
                None => log::debug!("optional env file not found: {}", primary.display()),
            }
        }

        for secondary in &self.secondary_files {
            match self.read_env_file(secondary)? {
                Some(entries) => self.merge(&mut merged, entries),
                None => log::debug!("secondary env file not found: {}", secondary.display()),
            }
        }

        let value = JsonValue::Object(self.to_object(merged));
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

    fn merge(
        &self,
        merged: &mut BTreeMap<String, String>,
        entries: impl IntoIterator<Item = (String, String)>,
    ) {
        for (key, value) in entries {
            if self.override_existing || !merged.contains_key(&key) {
                merged.insert(key, value);
            }
        }
    }

    /// 文件不存在返回 None
    fn read_env_file(&self, path: &Path) -> Result<Option<Vec<(String, String)>>, ConfigError> {
        if !path.exists() {
            return Ok(None);
        }

        let iter = dotenvy::from_path_iter(path).map_err(|e| self.file_error(path, e))?;
        let entries = iter
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| self.file_error(path, e))?;
        Ok(Some(entries))
    }

    fn file_error(&self, path: &Path, e: dotenvy::Error) -> ConfigError {
        match e {
            dotenvy::Error::LineParse(line, index) => ConfigError::ParseError {
                source_id: format!("{} ({})", self.id, path.display()),
                format: "env".to_string(),
                reason: format!("invalid line at {}: {}", index, line),
            },
            dotenvy::Error::Io(e) if e.kind() == std::io::ErrorKind::NotFound => {
                ConfigError::SourceMissing {
                    source_id: format!("{} ({})", self.id, path.display()),
                }
            }
            other => ConfigError::LoadError {
                source_id: self.id.clone(),
                cause: anyhow::Error::new(other)
                    .context(format!("failed to read {}", path.display())),
            },
        }
    }

    fn to_object(&self, merged: BTreeMap<String, String>) -> Map<String, JsonValue> {
        merged
            .into_iter()
            .filter_map(|(key, value)| {
                let key = match &self.prefix {
                    Some(prefix) => key.strip_prefix(prefix.as_str())?.to_string(),
                    None => key,
                };
                if key.is_empty() {
                    return None;
                }
                let value = if self.parse_values {
                    parse_value(&value)
                } else {
                    JsonValue::String(value)
                };
                Some((key, value))
            })
            .collect()
    }

    fn files(&self) -> impl Iterator<Item = &PathBuf> {
        self.primary_file.iter().chain(self.secondary_files.iter())
    }
}

/// 字符串按字面量转换为 bool / 整数 / 浮点数，其他保持字符串
fn parse_value(value: &str) -> JsonValue {
    match value {
        "true" => return JsonValue::Bool(true),
        "false" => return JsonValue::Bool(false),
        _ => {}
    }
    if let Ok(n) = value.parse::<i64>() {
        return JsonValue::from(n);
    }
    if let Ok(f) = value.parse::<f64>() {
        if f.is_finite() {
            return JsonValue::from(f);
        }
    }
    JsonValue::String(value.to_string())
}

/// 环境变量配置加载器
///
/// 进程环境变量与 env 文件合并后作为一个扁平的 JSON 对象校验，不会修改进程环境变量。
/// watch 时监听所有 env 文件，配置了 refresh_interval 时还会定时重新加载
pub struct EnvLoader {
    inner: Arc<EnvLoaderInner>,
    notifier: Arc<Notifier>,
    refresh_interval: Option<Duration>,
    watcher_config: FileWatcherConfig,
}

impl EnvLoader {
    pub fn new(
        config: EnvLoaderConfig,
        validator: Arc<dyn SchemaValidator>,
    ) -> Result<Self, ConfigError> {
        let primary_file = match (&config.primary_file, &config.profile_dir) {
            (Some(path), _) => Some(PathBuf::from(path)),
            (None, Some(dir)) => {
                let profile =
                    std::env::var(&config.profile_var).unwrap_or_else(|_| "default".to_string());
                Some(Path::new(dir).join(format!("{}.env", profile)))
            }
            (None, None) => None,
        };

        let id = match &primary_file {
            Some(path) => format!(
                "env:{}@{}:{}",
                config.type_name,
                config.version,
                path.display()
            ),
            None => format!("env:{}@{}", config.type_name, config.version),
        };

        config.validate().map_err(|e| ConfigError::LoadError {
            source_id: id.clone(),
            cause: anyhow::anyhow!("invalid env loader config: {}", e),
        })?;

        let schema = config
            .schema
            .unwrap_or_else(|| config.type_name.clone());

        Ok(Self {
            notifier: Arc::new(Notifier::new(id.clone())),
            inner: Arc::new(EnvLoaderInner {
                id,
                type_name: config.type_name,
                version: config.version,
                schema,
                schema_version: config.schema_version,
                primary_file,
                required: config.required,
                secondary_files: config.secondary_files.into_iter().map(PathBuf::from).collect(),
                override_existing: config.override_existing,
                include_process_env: config.include_process_env,
                prefix: config.prefix,
                parse_values: config.parse_values,
                validator,
            }),
            refresh_interval: config.refresh_interval,
            watcher_config: config.watcher,
        })
    }

    /// 实际使用的 primary 文件
    pub fn primary_file(&self) -> Option<&Path> {
        self.inner.primary_file.as_deref()
    }

    fn arm(&self, generation: u64) -> Result<Detection, ConfigError> {
        let watch_error = |reason: String| ConfigError::WatchError {
            source_id: self.inner.id.clone(),
            reason,
        };

        let mut detection = Detection::default();

        let files: Vec<&PathBuf> = self.inner.files().collect();
        if !files.is_empty() {
            let watcher = FileWatcher::new(self.watcher_config.clone())
                .map_err(|e| watch_error(e.to_string()))?;
            for (i, file) in files.into_iter().enumerate() {
                let inner = Arc::clone(&self.inner);
                let notifier = Arc::clone(&self.notifier);
                let result = watcher.watch(file, move |event| match event {
                    FileEvent::Created(_) | FileEvent::Modified(_) | FileEvent::Deleted(_) => {
                        notifier.reload(generation, || inner.read());
                    }
                    FileEvent::Error(e) => {
                        log::error!("env file watch error [{}]: {}", inner.id, e);
                    }
                });
                match result {
                    Ok(()) => {}
                    // primary 文件必须能监听，secondary 文件所在目录不存在时跳过
                    Err(e) if i == 0 && self.inner.primary_file.is_some() => {
                        return Err(watch_error(e.to_string()))
                    }
                    Err(e) => log::warn!(
                        "skip watching env file [{}] {}: {}",
                        self.inner.id,
                        file.display(),
                        e
                    ),
                }
            }
            detection.file_watcher = Some(watcher);
        }

        if let Some(interval) = self.refresh_interval {
            let inner = Arc::clone(&self.inner);
            let notifier = Arc::clone(&self.notifier);
            let ticker = Ticker::spawn("cfgx-env-refresh", interval, move || {
                notifier.reload(generation, || inner.read());
            })
            .map_err(watch_error)?;
            detection.ticker = Some(ticker);
        }

        if detection.file_watcher.is_none() && detection.ticker.is_none() {
            log::debug!(
                "no env file or refresh interval, nothing to watch [{}]",
                self.inner.id
            );
        }

        Ok(detection)
    }
}

impl Loader for EnvLoader {
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

impl Drop for EnvLoader {
    fn drop(&mut self) {
        self.notifier.unsubscribe_all();
    }
}
