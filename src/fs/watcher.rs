//! 文件监听器
//!
//! 监听文件系统事件，当文件变化时触发回调

use anyhow::{anyhow, Result};
use crossbeam::channel::{bounded, unbounded, Receiver, Sender};
use garde::Validate;
use notify::{RecursiveMode, Watcher};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use smart_default::SmartDefault;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant};

/// 文件事件
#[derive(Debug, Clone, PartialEq)]
pub enum FileEvent {
    /// 文件被创建
    Created(PathBuf),
    /// 文件被修改
    Modified(PathBuf),
    /// 文件被删除
    Deleted(PathBuf),
    /// 发生错误
    Error(String),
}

/// 文件监听器配置
#[derive(Debug, Clone, Serialize, Deserialize, SmartDefault, Validate)]
#[serde(default)]
pub struct FileWatcherConfig {
    /// 执行 handler 的工作线程数
    #[default = 1]
    #[garde(range(min = 1))]
    pub worker_threads: usize,
    /// 事件防抖延迟（同一文件的多次修改只处理最后一次），单位：毫秒，必须大于 0
    #[default = 100]
    #[garde(range(min = 1))]
    pub debounce_delay_ms: u64,
}

impl FileWatcherConfig {
    pub fn debounce_delay(&self) -> Duration {
        Duration::from_millis(self.debounce_delay_ms)
    }
}

type HandlerFn = dyn Fn(FileEvent) + Send + Sync;

/// 监听请求，事件循环处理完后通过 reply 返回结果
struct WatchRequest {
    path: PathBuf,
    handler: Box<HandlerFn>,
    reply: Sender<Result<()>>,
}

/// 文件监听器
///
/// - 一个 notify watcher + 一个事件循环线程，事件按文件防抖后交给 rayon 线程池执行 handler
/// - 监听的是文件所在目录，按路径过滤，所以文件被删除后重新创建依然能收到事件
/// - drop（或 [`FileWatcher::close`]）时关闭通道、等待事件循环退出并释放文件句柄
///
/// # 示例
///
/// ```no_run
/// use cfgx::fs::{FileEvent, FileWatcher, FileWatcherConfig};
///
/// let watcher = FileWatcher::new(FileWatcherConfig::default()).unwrap();
/// watcher.watch("config/app-1.0.json", |event| {
///     if let FileEvent::Modified(path) = event {
///         println!("文件修改: {:?}", path);
///     }
/// }).unwrap();
/// ```
pub struct FileWatcher {
    watch_request_tx: Option<Sender<WatchRequest>>,
    event_thread: Option<thread::JoinHandle<()>>,
}

impl FileWatcher {
    pub fn new(config: FileWatcherConfig) -> Result<Self> {
        config
            .validate()
            .map_err(|e| anyhow!("invalid file watcher config: {}", e))?;
        let (watch_request_tx, watch_request_rx) = unbounded::<WatchRequest>();
        let debounce_delay = config.debounce_delay();

        let thread_pool = rayon::ThreadPoolBuilder::new()
            .num_threads(config.worker_threads)
            .build()
            .map_err(|e| anyhow!("failed to create watcher thread pool: {}", e))?;

        let (notify_tx, notify_rx) = unbounded();
        let watcher = notify::recommended_watcher(move |res: notify::Result<notify::Event>| {
            let _ = notify_tx.send(res);
        })
        .map_err(|e| anyhow!("failed to create notify watcher: {}", e))?;

        let event_thread = thread::Builder::new()
            .name("cfgx-file-watcher".to_string())
            .spawn(move || {
                event_loop(
                    watcher,
                    watch_request_rx,
                    notify_rx,
                    thread_pool,
                    debounce_delay,
                )
            })
            .map_err(|e| anyhow!("failed to spawn watcher thread: {}", e))?;

        Ok(Self {
            watch_request_tx: Some(watch_request_tx),
            event_thread: Some(event_thread),
        })
    }

    /// 监听指定文件，文件可以暂时不存在，但父目录必须存在
    pub fn watch<F>(&self, filepath: impl AsRef<Path>, handler: F) -> Result<()>
    where
        F: Fn(FileEvent) + Send + Sync + 'static,
    {
        let filepath = filepath.as_ref();
        if filepath.exists() && !filepath.is_file() {
            return Err(anyhow!("路径不是一个文件: {}", filepath.display()));
        }
        let path = normalize(filepath)?;

        let sender = self
            .watch_request_tx
            .as_ref()
            .ok_or_else(|| anyhow!("watcher already closed"))?;
        let (reply_tx, reply_rx) = bounded(1);
        sender
            .send(WatchRequest {
                path,
                handler: Box::new(handler),
                reply: reply_tx,
            })
            .map_err(|e| anyhow!("发送监听请求失败: {}", e))?;

        reply_rx
            .recv_timeout(Duration::from_secs(5))
            .map_err(|e| anyhow!("等待监听结果失败: {}", e))?
    }

    /// 停止所有监听并等待事件循环退出，可以重复调用
    pub fn close(&mut self) {
        // 关闭请求通道后事件循环会退出
        self.watch_request_tx.take();
        if let Some(handle) = self.event_thread.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for FileWatcher {
    fn drop(&mut self) {
        self.close();
    }
}

/// 规范化路径：canonicalize 父目录后拼接文件名，文件是否存在都得到同一个 key
fn normalize(path: &Path) -> Result<PathBuf> {
    let file_name = path
        .file_name()
        .ok_or_else(|| anyhow!("无法获取文件名: {}", path.display()))?;
    let parent = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    };
    let parent = dunce::canonicalize(&parent)
        .map_err(|e| anyhow!("父目录不存在: {}: {}", parent.display(), e))?;
    Ok(parent.join(file_name))
}

fn event_loop(
    mut watcher: notify::RecommendedWatcher,
    watch_request_rx: Receiver<WatchRequest>,
    notify_rx: Receiver<notify::Result<notify::Event>>,
    thread_pool: rayon::ThreadPool,
    debounce_delay: Duration,
) {
    let mut handlers: HashMap<PathBuf, Box<HandlerFn>> = HashMap::new();
    // path -> (最后一次事件, 时间)
    let mut pending_events: HashMap<PathBuf, (FileEvent, Instant)> = HashMap::new();

    loop {
        crossbeam::select! {
            recv(watch_request_rx) -> request => {
                let Ok(req) = request else { break };
                let result = match req.path.parent() {
                    Some(dir) => watcher
                        .watch(dir, RecursiveMode::NonRecursive)
                        .map_err(|e| anyhow!("添加监听失败: {}, 路径: {:?}", e, req.path)),
                    None => Err(anyhow!("无法获取文件的父目录: {}", req.path.display())),
                };
                if result.is_ok() {
                    handlers.insert(req.path, req.handler);
                }
                let _ = req.reply.send(result);
            }
            recv(notify_rx) -> result => {
                match result {
                    Ok(Ok(event)) => {
                        for path in &event.paths {
                            let Ok(key) = normalize(path) else { continue };
                            if !handlers.contains_key(&key) {
                                continue;
                            }
                            let file_event = if event.kind.is_create() {
                                FileEvent::Created(key.clone())
                            } else if event.kind.is_modify() {
                                FileEvent::Modified(key.clone())
                            } else if event.kind.is_remove() {
                                FileEvent::Deleted(key.clone())
                            } else {
                                continue;
                            };
                            pending_events.insert(key, (file_event, Instant::now()));
                        }
                    }
                    Ok(Err(e)) => {
                        log::warn!("notify error: {}", e);
                        for handler in handlers.values() {
                            handler(FileEvent::Error(e.to_string()));
                        }
                    }
                    Err(_) => break,
                }
            }
            default(debounce_delay / 2) => {}
        }

        if pending_events.is_empty() {
            continue;
        }

        // 只处理超过防抖延迟没有新事件的文件，每个文件只处理最后一个事件
        let now = Instant::now();
        let mut events_to_process = Vec::new();
        pending_events.retain(|path, (event, time)| {
            if now.duration_since(*time) >= debounce_delay {
                events_to_process.push((path.clone(), event.clone()));
                false
            } else {
                true
            }
        });

        if !events_to_process.is_empty() {
            thread_pool.install(|| {
                events_to_process.into_par_iter().for_each(|(path, event)| {
                    if let Some(handler) = handlers.get(&path) {
                        handler(event);
                    }
                });
            });
        }
    }

    // 显式 drop watcher 以释放文件句柄
    drop(watcher);
}
