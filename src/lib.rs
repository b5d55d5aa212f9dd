//! cfgx - 带 schema 校验的配置加载库
//!
//! 配置从文件或环境变量读取，按注册的 JSON Schema 校验后才会交给调用方，
//! 来源变化时通知订阅者，并可以通过缓存装饰器避免重复读取。
//!
//! ## 模块
//!
//! - **schema**: schema 注册表与校验器
//! - **loader**: 文件 / 环境变量加载器，变化检测与订阅
//! - **cache**: 缓存装饰器与内存缓存
//! - **factory**: 按约定路径创建加载器
//! - **cfg**: TypeOptions、trait 注册表、人性化时长等组件配置基础设施
//! - **fs**: 文件监听
//!
//! ## 示例
//!
//! ```no_run
//! use cfgx::{Loader, LoaderFactory, LoaderFactoryConfig, LoaderKind, LoaderDescriptor};
//! use serde_json::json;
//! use std::sync::Arc;
//!
//! let factory = LoaderFactory::new(LoaderFactoryConfig::default()).unwrap();
//! let loader = factory
//!     .create_loader(LoaderDescriptor::new(
//!         "app",
//!         "1.0",
//!         json!({
//!             "type": "object",
//!             "properties": {"port": {"type": "integer", "minimum": 1}},
//!             "required": ["port"]
//!         }),
//!         LoaderKind::File,
//!     ))
//!     .unwrap();
//!
//! let config = loader.load().unwrap();
//! loader
//!     .watch(Arc::new(|event: &cfgx::ChangeEvent| {
//!         println!("{} changed: {:?}", event.source, event.current);
//!     }))
//!     .unwrap();
//! ```

pub mod cfg;
pub mod error;
pub mod fs;
pub mod schema;
pub mod loader;
pub mod cache;
pub mod factory;

// 重新导出主要的公共 API
pub use cfg::{create_trait_from_type_options, register_trait, HumanDur, TypeOptions};

pub use error::{ConfigError, Violation, Violations};

pub use fs::{FileEvent, FileWatcher, FileWatcherConfig};

pub use schema::{SchemaRegistry, SchemaValidator, Validator};

pub use loader::{
    ChangeEvent, ChangeListener, Configuration, EnvLoader, EnvLoaderConfig, ErrorListener,
    FileLoader, FileLoaderConfig, Format, Loader,
};

pub use cache::{register_caches, CacheError, CachedLoader, ConfigCache, MemoryCache, MemoryCacheConfig};

pub use factory::{LoaderFactory, LoaderFactoryConfig, LoaderKind, LoaderDescriptor};
