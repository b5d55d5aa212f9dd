// 加载器公共部分：当前配置、回调列表、变化检测的启停

use arc_swap::ArcSwapOption;
use chrono::Utc;
use crossbeam::channel::{self, Sender};
use once_cell::sync::Lazy;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use super::core::{ChangeEvent, ChangeListener, Configuration, ErrorListener};
use crate::error::ConfigError;
use crate::fs::FileWatcher;

// 回调专用线程池，与文件监听的线程池分开，回调里调用 unwatch 不会互相等待
static DISPATCH_POOL: Lazy<Option<rayon::ThreadPool>> = Lazy::new(|| {
    rayon::ThreadPoolBuilder::new()
        .num_threads(thread::available_parallelism().map_or(4, |n| n.get().max(4)))
        .thread_name(|i| format!("cfgx-dispatch-{}", i))
        .build()
        .map_err(|e| log::error!("failed to create dispatch pool, fallback to global pool: {}", e))
        .ok()
});

pub(crate) fn dispatch<F: FnOnce() + Send + 'static>(job: F) {
    match DISPATCH_POOL.as_ref() {
        Some(pool) => pool.spawn(job),
        None => rayon::spawn(job),
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// 定时刷新句柄，drop 时发送停止信号并等待线程退出
pub(crate) struct Ticker {
    stop_sender: Option<Sender<()>>,
    thread_handle: Option<JoinHandle<()>>,
}

impl Ticker {
    pub(crate) fn spawn<F>(name: &str, interval: Duration, on_tick: F) -> Result<Self, String>
    where
        F: Fn() + Send + 'static,
    {
        if interval.is_zero() {
            return Err("refresh interval must be positive".to_string());
        }
        let (stop_tx, stop_rx) = channel::bounded::<()>(1);
        let thread_handle = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || loop {
                crossbeam::select! {
                    recv(stop_rx) -> _ => break,
                    default(interval) => on_tick(),
                }
            })
            .map_err(|e| e.to_string())?;

        Ok(Self {
            stop_sender: Some(stop_tx),
            thread_handle: Some(thread_handle),
        })
    }
}

impl Drop for Ticker {
    fn drop(&mut self) {
        if let Some(sender) = self.stop_sender.take() {
            let _ = sender.send(());
        }
        if let Some(handle) = self.thread_handle.take() {
            let _ = handle.join();
        }
    }
}

/// 一次 watch 启动的全部检测资源，drop 即停止
#[derive(Default)]
pub(crate) struct Detection {
    pub(crate) file_watcher: Option<FileWatcher>,
    pub(crate) ticker: Option<Ticker>,
}

/// 加载器共享的状态
///
/// - 最近一次成功的配置（只在成功时替换）
/// - 变更回调与错误回调
/// - generation：每次 unwatch 加一，检测线程和已派发的回调都会比对，
///   保证 unwatch 返回之后不会再有回调执行
/// - reload_lock：同一个加载器的加载串行执行，事件顺序与加载顺序一致
pub(crate) struct Notifier {
    source: String,
    current: ArcSwapOption<Configuration>,
    listeners: Mutex<Vec<ChangeListener>>,
    error_listeners: Mutex<Vec<ErrorListener>>,
    generation: Arc<AtomicU64>,
    reload_lock: Mutex<()>,
    detection: Mutex<Option<Detection>>,
}

impl Notifier {
    pub(crate) fn new(source: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            current: ArcSwapOption::empty(),
            listeners: Mutex::new(Vec::new()),
            error_listeners: Mutex::new(Vec::new()),
            generation: Arc::new(AtomicU64::new(0)),
            reload_lock: Mutex::new(()),
            detection: Mutex::new(None),
        }
    }

    pub(crate) fn current(&self) -> Option<Configuration> {
        self.current.load_full().map(|config| (*config).clone())
    }

    pub(crate) fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    /// 直接加载：成功时替换当前配置，不产生变更事件
    pub(crate) fn load<F>(&self, read: F) -> Result<Configuration, ConfigError>
    where
        F: FnOnce() -> Result<Configuration, ConfigError>,
    {
        let _guard = lock(&self.reload_lock);
        let config = read()?;
        self.current.store(Some(Arc::new(config.clone())));
        Ok(config)
    }

    /// 检测到变化后的重新加载
    ///
    /// generation 不一致说明已经 unwatch，直接丢弃。成功且内容变化时派发变更事件，
    /// 失败时保留旧配置并通知错误回调
    pub(crate) fn reload<F>(&self, generation: u64, read: F)
    where
        F: FnOnce() -> Result<Configuration, ConfigError>,
    {
        let _guard = lock(&self.reload_lock);
        if self.generation() != generation {
            return;
        }

        match read() {
            Ok(config) => {
                let previous = self.current.swap(Some(Arc::new(config.clone())));
                match previous {
                    Some(previous) if *previous != config => {
                        log::info!("config changed [{}]", self.source);
                        self.publish(ChangeEvent {
                            previous: (*previous).clone(),
                            current: config,
                            timestamp: Utc::now(),
                            source: self.source.clone(),
                        });
                    }
                    Some(_) => log::debug!("config unchanged [{}]", self.source),
                    None => log::debug!("first successful load via watch [{}]", self.source),
                }
            }
            Err(e) => {
                log::warn!("reload failed, keep last good config [{}]: {}", self.source, e);
                self.publish_error(e);
            }
        }
    }

    /// 注册回调，第一次注册时调用 arm 启动检测；启动失败会回滚这次注册
    pub(crate) fn subscribe<F>(&self, listener: ChangeListener, arm: F) -> Result<(), ConfigError>
    where
        F: FnOnce(u64) -> Result<Detection, ConfigError>,
    {
        let mut detection = lock(&self.detection);
        lock(&self.listeners).push(listener);
        if detection.is_some() {
            return Ok(());
        }

        match arm(self.generation()) {
            Ok(armed) => {
                log::debug!("change detection armed [{}]", self.source);
                *detection = Some(armed);
                Ok(())
            }
            Err(e) => {
                lock(&self.listeners).clear();
                Err(e)
            }
        }
    }

    pub(crate) fn on_error(&self, listener: ErrorListener) {
        lock(&self.error_listeners).push(listener);
    }

    /// 停止检测并清空回调
    pub(crate) fn unsubscribe_all(&self) {
        let detection = {
            let mut detection = lock(&self.detection);
            self.generation.fetch_add(1, Ordering::SeqCst);
            lock(&self.listeners).clear();
            lock(&self.error_listeners).clear();
            detection.take()
        };
        // 在锁外停止检测线程，检测线程里的 reload 不需要 detection 锁
        if detection.is_some() {
            drop(detection);
            log::debug!("change detection stopped [{}]", self.source);
        }
    }

    // 回调在 dispatch 线程池中执行，不阻塞检测线程；回调 panic 只记录日志
    fn publish(&self, event: ChangeEvent) {
        let event = Arc::new(event);
        let generation = self.generation();
        for listener in lock(&self.listeners).iter().cloned() {
            let event = Arc::clone(&event);
            let current_generation = Arc::clone(&self.generation);
            let source = self.source.clone();
            dispatch(move || {
                if current_generation.load(Ordering::SeqCst) != generation {
                    return;
                }
                if catch_unwind(AssertUnwindSafe(|| listener(&event))).is_err() {
                    log::error!("change listener panicked [{}]", source);
                }
            });
        }
    }

    fn publish_error(&self, error: ConfigError) {
        let error = Arc::new(error);
        let generation = self.generation();
        for listener in lock(&self.error_listeners).iter().cloned() {
            let error = Arc::clone(&error);
            let current_generation = Arc::clone(&self.generation);
            let source = self.source.clone();
            dispatch(move || {
                if current_generation.load(Ordering::SeqCst) != generation {
                    return;
                }
                if catch_unwind(AssertUnwindSafe(|| listener(&error))).is_err() {
                    log::error!("error listener panicked [{}]", source);
                }
            });
        }
    }
}
