use crate::mip_source::MipSource;
use anyhow::Context;
use crossbeam_channel::Sender;
use crossbeam_utils::sync::WaitGroup;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use truvis_asset_update::profile_span;

pub type MipLoadCallback = Box<dyn FnOnce(LoadResult) + Send + 'static>;

pub struct MipLoadRequest {
    pub texture: Arc<str>,
    pub level: u32,
    /// 置位后尚未开始的读取会被跳过
    pub abort: Arc<AtomicBool>,
    /// 在 loader 的线程上调用，恰好一次
    pub on_complete: MipLoadCallback,
}

pub enum LoadResult {
    Loaded(Vec<u8>),
    Skipped,
    Failed(String),
}

#[derive(Clone, Debug)]
pub struct MipLoaderConfig {
    /// 0 表示使用 rayon 的默认值
    pub threads: usize,
    pub thread_name_prefix: String,
}

impl Default for MipLoaderConfig {
    fn default() -> Self {
        Self {
            threads: 0,
            thread_name_prefix: "Mip-Loader".to_string(),
        }
    }
}

/// 负责管理后台 mip 读取任务。
///
/// ## 架构设计
/// - 内部的 `dispatch-thread` 负责调度：接收读取请求，分发任务到 worker
/// - rayon 提供 worker 线程池
/// - crossbeam 提供外部线程和 dispatch-thread 之间的 channel
/// - 读取结果不回传 channel，而是直接调用请求自带的回调 (通常是递减任务的 gate)
///
/// ## 线程生命周期
/// dispatch-thread 的生命周期与 `MipLoader` 绑定，Drop 时:
/// 1. `request_sender` 被销毁，channel 断开，dispatch-thread 退出接收循环
/// 2. dispatch-thread 通过 `WaitGroup` 等待所有已分发的读取完成
/// 3. `MipLoader::drop` join dispatch-thread
///
/// 因此每个请求的回调都保证被调用。
///
/// 回调闭包可能持有最后一个 `MipLoader` 引用。在 loader 自己的 worker 线程上 drop 时，
/// dispatch-thread 还在等待这个 worker 上的任务，所以不 join，由 dispatch-thread 自行退出。
pub struct MipLoader {
    request_sender: Option<Sender<MipLoadRequest>>,
    dispatch_thread: Option<thread::JoinHandle<()>>,
    pool: Arc<rayon::ThreadPool>,
}

impl MipLoader {
    pub fn new(source: Arc<dyn MipSource>, config: MipLoaderConfig) -> anyhow::Result<Self> {
        let (req_tx, req_rx) = crossbeam_channel::unbounded::<MipLoadRequest>();

        let prefix = config.thread_name_prefix.clone();
        let mut builder = rayon::ThreadPoolBuilder::new().thread_name(move |index| format!("{}-{}", prefix, index));
        if config.threads > 0 {
            builder = builder.num_threads(config.threads);
        }
        let pool = Arc::new(builder.build().context("Failed to create mip loader thread pool")?);
        let dispatch_pool = pool.clone();

        let dispatch_thread = thread::Builder::new()
            .name(format!("{}-Dispatch", config.thread_name_prefix))
            .spawn(move || {
                let wait_group = WaitGroup::new();

                while let Ok(req) = req_rx.recv() {
                    let _span = profile_span!("MipLoader::dispatch");

                    let source = source.clone();
                    // 任务结束时闭包销毁，wg_task 随之 drop
                    let wg_task = wait_group.clone();
                    dispatch_pool.spawn(move || {
                        load_mip_task(source.as_ref(), req);
                        drop(wg_task);
                    });
                }

                // 等待所有任务完成
                wait_group.wait();
            })
            .context("Failed to spawn mip loader dispatch thread")?;

        Ok(Self {
            request_sender: Some(req_tx),
            dispatch_thread: Some(dispatch_thread),
            pool,
        })
    }

    pub fn request_load(&self, req: MipLoadRequest) {
        let Some(sender) = &self.request_sender else {
            (req.on_complete)(LoadResult::Skipped);
            return;
        };
        if let Err(e) = sender.send(req) {
            // dispatch-thread 已经退出，回调仍然必须被调用
            log::error!("Failed to send mip load request, loader is shut down");
            let req = e.into_inner();
            (req.on_complete)(LoadResult::Skipped);
        }
    }
}

impl Drop for MipLoader {
    fn drop(&mut self) {
        // 必须先 drop sender，否则 recv 会一直阻塞，导致 join 死锁
        self.request_sender = None;

        if self.pool.current_thread_index().is_some() {
            log::warn!("MipLoader dropped on one of its own workers, remaining loads finish in the background");
            self.dispatch_thread.take();
            return;
        }

        log::info!("MipLoader is being dropped, waiting for loads to complete...");
        if let Some(thread) = self.dispatch_thread.take()
            && thread.join().is_err()
        {
            log::error!("Failed to join mip loader dispatch thread");
        }
        log::info!("All mip loads completed, MipLoader dropped.");
    }
}

/// 实际的读取任务 (运行在 rayon 线程池中)
fn load_mip_task(source: &dyn MipSource, req: MipLoadRequest) {
    let _span = profile_span!("load_mip_task");

    let result = if req.abort.load(Ordering::SeqCst) {
        log::debug!("Skipping aborted load of mip {} of {}", req.level, req.texture);
        LoadResult::Skipped
    } else {
        match source.read_mip(&req.texture, req.level) {
            Ok(bytes) => {
                log::trace!("Loaded mip {} of {} ({} bytes)", req.level, req.texture, bytes.len());
                LoadResult::Loaded(bytes)
            }
            Err(e) => {
                log::error!("Failed to load mip {} of {}: {:#}", req.level, req.texture, e);
                LoadResult::Failed(e.to_string())
            }
        }
    };

    (req.on_complete)(result);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mip_source::SyntheticMipSource;
    use std::sync::Mutex;
    use std::time::Duration;

    fn loader(source: SyntheticMipSource) -> MipLoader {
        let config = MipLoaderConfig {
            threads: 2,
            ..Default::default()
        };
        MipLoader::new(Arc::new(source), config).unwrap()
    }

    #[test]
    fn test_loads_complete_before_drop() {
        let results = Arc::new(Mutex::new(Vec::new()));
        let loader = loader(SyntheticMipSource::new(4).with_failing_level("rock", 2));

        for level in 0..4 {
            let results = results.clone();
            loader.request_load(MipLoadRequest {
                texture: Arc::from("rock"),
                level,
                abort: Arc::new(AtomicBool::new(false)),
                on_complete: Box::new(move |result| {
                    let ok = matches!(result, LoadResult::Loaded(_));
                    results.lock().unwrap().push((level, ok));
                }),
            });
        }
        drop(loader);

        let mut results = results.lock().unwrap().clone();
        results.sort();
        assert_eq!(results, vec![(0, true), (1, true), (2, false), (3, true)]);
    }

    #[test]
    fn test_last_reference_dropped_in_callback() {
        let loader = Arc::new(loader(SyntheticMipSource::new(4).with_latency(Duration::from_millis(50))));
        let (done_tx, done_rx) = crossbeam_channel::bounded::<bool>(1);

        // 回调运行时，这里是唯一剩下的引用
        let keep_alive = Arc::new(Mutex::new(Some(loader.clone())));
        let slot = keep_alive.clone();
        loader.request_load(MipLoadRequest {
            texture: Arc::from("rock"),
            level: 0,
            abort: Arc::new(AtomicBool::new(false)),
            on_complete: Box::new(move |result| {
                let last = slot.lock().unwrap().take();
                drop(last);
                let _ = done_tx.send(matches!(result, LoadResult::Loaded(_)));
            }),
        });
        drop(loader);
        drop(keep_alive);

        assert_eq!(done_rx.recv_timeout(Duration::from_secs(10)), Ok(true));
    }

    #[test]
    fn test_aborted_request_is_skipped() {
        let skipped = Arc::new(AtomicBool::new(false));
        let loader = loader(SyntheticMipSource::new(4));

        let flag = skipped.clone();
        loader.request_load(MipLoadRequest {
            texture: Arc::from("grass"),
            level: 0,
            abort: Arc::new(AtomicBool::new(true)),
            on_complete: Box::new(move |result| {
                flag.store(matches!(result, LoadResult::Skipped), Ordering::SeqCst);
            }),
        });
        drop(loader);

        assert!(skipped.load(Ordering::SeqCst));
    }
}
