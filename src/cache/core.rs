use std::sync::Arc;
use thiserror::Error;

use crate::loader::Configuration;

/// 缓存相关错误类型
#[derive(Error, Debug)]
pub enum CacheError {
    #[error("Cache unavailable: {0}")]
    Unavailable(String),
    #[error("Other error: {0}")]
    Other(String),
}

/// 配置缓存
///
/// key 由被装饰加载器的 id 决定，实现需要线程安全
pub trait ConfigCache: Send + Sync {
    /// 获取缓存的配置，不存在或已过期时返回 None
    fn get(&self, key: &str) -> Result<Option<Configuration>, CacheError>;

    /// 写入配置，已存在时覆盖
    fn set(&self, key: &str, config: &Configuration) -> Result<(), CacheError>;

    /// 删除缓存，不存在时也返回成功
    fn del(&self, key: &str) -> Result<(), CacheError>;
}

impl<C: ConfigCache + ?Sized> ConfigCache for Arc<C> {
    fn get(&self, key: &str) -> Result<Option<Configuration>, CacheError> {
        (**self).get(key)
    }

    fn set(&self, key: &str, config: &Configuration) -> Result<(), CacheError> {
        (**self).set(key, config)
    }

    fn del(&self, key: &str) -> Result<(), CacheError> {
        (**self).del(key)
    }
}

impl<C: ConfigCache + ?Sized> ConfigCache for Box<C> {
    fn get(&self, key: &str) -> Result<Option<Configuration>, CacheError> {
        (**self).get(key)
    }

    fn set(&self, key: &str, config: &Configuration) -> Result<(), CacheError> {
        (**self).set(key, config)
    }

    fn del(&self, key: &str) -> Result<(), CacheError> {
        (**self).del(key)
    }
}
