//! cfg 模块 - 组件配置基础设施
//!
//! TypeOptions、trait 注册表、人性化时长以及构造宏，供 loader / cache / factory 使用

#[macro_use]
pub mod macros;
pub mod duration;
pub mod registry;
pub mod type_options;

pub use duration::HumanDur;
pub use registry::{create_trait_from_type_options, register_trait};
pub use type_options::TypeOptions;
