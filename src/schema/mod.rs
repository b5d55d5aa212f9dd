//! schema 模块 - 配置校验
//!
//! 提供 schema 注册表和校验能力抽象，底层使用 jsonschema 引擎

pub mod registry;
pub mod validator;

pub use registry::SchemaRegistry;
pub use validator::{SchemaValidator, Validator};
