//! loader 模块 - 配置来源加载器
//!
//! 每个 [`Loader`] 负责一个物理来源：读取、解析、按 schema 校验，并在来源变化时通知订阅者
//!
//! - [`FileLoader`]：json / json5 / yaml / toml 文件，或内存中的配置
//! - [`EnvLoader`]：进程环境变量与 env 文件合并

mod core;
mod env_loader;
mod file_loader;
mod notifier;
mod parser;

pub use self::core::{ChangeEvent, ChangeListener, Configuration, ErrorListener, Loader};
pub use env_loader::{EnvLoader, EnvLoaderConfig};
pub use file_loader::{FileLoader, FileLoaderConfig};
pub use parser::Format;

pub(crate) use notifier::dispatch;
