use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use super::core::ConfigCache;
use crate::error::ConfigError;
use crate::loader::{dispatch, ChangeEvent, ChangeListener, Configuration, ErrorListener, Loader};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// 带缓存的加载器
///
/// - load 优先读缓存，未命中时委托给内部加载器并写回缓存
/// - watch 只在内部加载器上注册一次，收到变更后先刷新缓存再分别派发给每个回调
/// - 缓存读写失败只记录日志，不影响加载结果
pub struct CachedLoader {
    inner: Arc<dyn Loader>,
    cache: Arc<dyn ConfigCache>,
    key: String,
    listeners: Arc<Mutex<Vec<ChangeListener>>>,
    generation: Arc<AtomicU64>,
    armed: Mutex<bool>,
}

impl CachedLoader {
    pub fn new(inner: Arc<dyn Loader>, cache: Arc<dyn ConfigCache>) -> Self {
        let key = inner.id().to_string();
        Self {
            inner,
            cache,
            key,
            listeners: Arc::new(Mutex::new(Vec::new())),
            generation: Arc::new(AtomicU64::new(0)),
            armed: Mutex::new(false),
        }
    }

    /// 缓存 key，即内部加载器的 id
    pub fn cache_key(&self) -> &str {
        &self.key
    }

    pub fn inner(&self) -> &Arc<dyn Loader> {
        &self.inner
    }

    /// 删除缓存，下一次 load 会重新读取来源
    pub fn invalidate(&self) {
        if let Err(e) = self.cache.del(&self.key) {
            log::warn!("cache del failed [{}]: {}", self.key, e);
        }
    }

    // load 命中共享缓存时内部加载器没有当前配置，
    // 没有当前配置的加载器不会为第一次变化产生事件，所以 watch 前先加载一次
    fn prime(&self) {
        if self.inner.current().is_some() {
            return;
        }
        match self.inner.load() {
            Ok(config) => {
                if let Err(e) = self.cache.set(&self.key, &config) {
                    log::warn!("cache set failed [{}]: {}", self.key, e);
                }
            }
            Err(e) => log::warn!("load before watch failed [{}]: {}", self.key, e),
        }
    }

    fn fan_out(&self) -> ChangeListener {
        let cache = Arc::clone(&self.cache);
        let listeners = Arc::clone(&self.listeners);
        let current_generation = Arc::clone(&self.generation);
        let generation = self.generation.load(Ordering::SeqCst);
        let key = self.key.clone();
        Arc::new(move |event: &ChangeEvent| {
            if current_generation.load(Ordering::SeqCst) != generation {
                return;
            }
            if let Err(e) = cache.set(&key, &event.current) {
                log::warn!("cache refresh failed [{}]: {}", key, e);
            }

            let event = Arc::new(event.clone());
            for listener in lock(&listeners).iter().cloned() {
                let event = Arc::clone(&event);
                let current_generation = Arc::clone(&current_generation);
                let key = key.clone();
                dispatch(move || {
                    if current_generation.load(Ordering::SeqCst) != generation {
                        return;
                    }
                    if catch_unwind(AssertUnwindSafe(|| listener(&event))).is_err() {
                        log::error!("change listener panicked [{}]", key);
                    }
                });
            }
        })
    }
}

impl Loader for CachedLoader {
    fn id(&self) -> &str {
        &self.key
    }

    fn load(&self) -> Result<Configuration, ConfigError> {
        match self.cache.get(&self.key) {
            Ok(Some(config)) => {
                log::debug!("cache hit [{}]", self.key);
                return Ok(config);
            }
            Ok(None) => {}
            Err(e) => log::warn!("cache get failed [{}]: {}", self.key, e),
        }

        let config = self.inner.load()?;
        if let Err(e) = self.cache.set(&self.key, &config) {
            log::warn!("cache set failed [{}]: {}", self.key, e);
        }
        Ok(config)
    }

    fn watch(&self, listener: ChangeListener) -> Result<(), ConfigError> {
        let mut armed = lock(&self.armed);
        lock(&self.listeners).push(listener);
        if *armed {
            return Ok(());
        }

        self.prime();
        match self.inner.watch(self.fan_out()) {
            Ok(()) => {
                *armed = true;
                Ok(())
            }
            Err(e) => {
                lock(&self.listeners).clear();
                Err(e)
            }
        }
    }

    fn on_error(&self, listener: ErrorListener) {
        self.inner.on_error(listener);
    }

    fn unwatch(&self) {
        let mut armed = lock(&self.armed);
        self.generation.fetch_add(1, Ordering::SeqCst);
        self.inner.unwatch();
        lock(&self.listeners).clear();
        *armed = false;
    }

    fn current(&self) -> Option<Configuration> {
        self.inner.current()
    }
}
