//! cache 模块 - 配置缓存
//!
//! [`CachedLoader`] 装饰任意 [`Loader`](crate::loader::Loader)，缓存后端实现 [`ConfigCache`]

pub mod cached_loader;
pub mod core;
pub mod memory_cache;
pub mod register;

pub use cached_loader::CachedLoader;
pub use self::core::{CacheError, ConfigCache};
pub use memory_cache::{EvictionListener, MemoryCache, MemoryCacheConfig};
pub use register::register_caches;
