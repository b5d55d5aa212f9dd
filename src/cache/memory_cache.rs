use dashmap::DashMap;
use garde::Validate;
use serde::{Deserialize, Serialize};
use serde_with::serde_as;
use smart_default::SmartDefault;
use std::sync::Arc;
use std::time::{Duration, Instant};

use super::core::{CacheError, ConfigCache};
use crate::cfg::HumanDur;
use crate::loader::Configuration;

/// MemoryCache 配置结构体
#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, SmartDefault, Validate)]
#[serde(default)]
pub struct MemoryCacheConfig {
    /// 初始容量（可选）
    #[garde(skip)]
    pub initial_capacity: Option<usize>,

    /// 过期时间，缺省时永不过期，例如 "10m"
    #[serde_as(as = "Option<HumanDur>")]
    #[garde(skip)]
    pub ttl: Option<Duration>,
}

/// 淘汰回调：过期或被删除时以 key 和被淘汰的配置调用
pub type EvictionListener = Arc<dyn Fn(&str, &Configuration) + Send + Sync>;

struct CacheEntry {
    config: Configuration,
    expires_at: Option<Instant>,
}

impl CacheEntry {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

/// 基于 DashMap 的内存缓存，过期的条目在访问时惰性淘汰
pub struct MemoryCache {
    map: DashMap<String, CacheEntry>,
    ttl: Option<Duration>,
    eviction_listener: Option<EvictionListener>,
}

impl MemoryCache {
    pub fn new(config: MemoryCacheConfig) -> Self {
        let map = match config.initial_capacity {
            Some(capacity) => DashMap::with_capacity(capacity),
            None => DashMap::new(),
        };

        Self {
            map,
            ttl: config.ttl,
            eviction_listener: None,
        }
    }

    pub fn with_eviction_listener<F>(mut self, listener: F) -> Self
    where
        F: Fn(&str, &Configuration) + Send + Sync + 'static,
    {
        self.eviction_listener = Some(Arc::new(listener));
        self
    }

    /// 条目数量，包含尚未淘汰的过期条目
    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// 主动清理所有过期条目，返回清理的数量
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let expired: Vec<String> = self
            .map
            .iter()
            .filter(|entry| entry.value().is_expired(now))
            .map(|entry| entry.key().clone())
            .collect();

        expired
            .into_iter()
            .filter(|key| self.evict_if(key, |entry| entry.is_expired(now)))
            .count()
    }

    // 回调在释放分片锁之后执行
    fn evict_if(&self, key: &str, predicate: impl FnOnce(&CacheEntry) -> bool) -> bool {
        match self.map.remove_if(key, |_, entry| predicate(entry)) {
            Some((key, entry)) => {
                log::debug!("cache entry evicted: {}", key);
                if let Some(listener) = &self.eviction_listener {
                    listener(&key, &entry.config);
                }
                true
            }
            None => false,
        }
    }
}

impl Default for MemoryCache {
    fn default() -> Self {
        Self::new(MemoryCacheConfig::default())
    }
}

impl ConfigCache for MemoryCache {
    fn get(&self, key: &str) -> Result<Option<Configuration>, CacheError> {
        let now = Instant::now();
        match self.map.get(key) {
            Some(entry) if !entry.is_expired(now) => return Ok(Some(entry.config.clone())),
            Some(_) => {}
            None => return Ok(None),
        }

        self.evict_if(key, |entry| entry.is_expired(now));
        Ok(None)
    }

    fn set(&self, key: &str, config: &Configuration) -> Result<(), CacheError> {
        let entry = CacheEntry {
            config: config.clone(),
            expires_at: self.ttl.map(|ttl| Instant::now() + ttl),
        };
        self.map.insert(key.to_string(), entry);
        Ok(())
    }

    fn del(&self, key: &str) -> Result<(), CacheError> {
        self.evict_if(key, |_| true);
        Ok(())
    }
}
