mod primary_queue;
pub mod worker;

use crate::context::{ExecutionContext, PrimaryToken};
use crate::scheduler::primary_queue::PrimaryQueue;
use crate::scheduler::worker::WorkerPool;
use crate::task::AssetUpdateTask;
use anyhow::Context;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};
use std::thread::ThreadId;

/// 调度器配置
#[derive(Clone, Debug)]
pub struct SchedulerConfig {
    /// worker 线程数量，0 表示使用 rayon 的默认值 (CPU 核数)
    pub worker_threads: usize,
    pub thread_name_prefix: String,
    /// worker unit 归还时如果有挂起的 worker 请求，直接在同一个线程上处理，
    /// 而不是重新提交到线程池
    pub inline_worker_rearm: bool,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            worker_threads: 0,
            thread_name_prefix: "Asset-Update".to_string(),
            inline_worker_rearm: true,
        }
    }
}

impl SchedulerConfig {
    pub fn with_worker_threads(mut self, worker_threads: usize) -> Self {
        self.worker_threads = worker_threads;
        self
    }

    pub fn with_thread_name_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.thread_name_prefix = prefix.into();
        self
    }

    pub fn with_inline_worker_rearm(mut self, inline: bool) -> Self {
        self.inline_worker_rearm = inline;
        self
    }
}

/// 调度适配层
///
/// 任务与两个外部调度者交互的唯一位置:
/// - Primary: 请求放入队列，由 Primary 线程每帧调用 [`TaskScheduler::pump_primary`] 消费
/// - Worker: 把 worker unit 提交给线程池，unit 执行完 `tick(Worker)` 后归还给任务
///
/// 两种请求发出时都会增加任务的 in-flight 计数，对应的 tick 返回后立即减少。
pub struct TaskScheduler {
    config: SchedulerConfig,

    primary_queue: PrimaryQueue,
    worker_pool: Arc<dyn WorkerPool>,

    suspended: [AtomicBool; ExecutionContext::COUNT],
    primary_thread: OnceLock<ThreadId>,
}

// new & init
impl TaskScheduler {
    /// 创建调度器，worker 使用一个专用的 rayon 线程池
    pub fn new(config: SchedulerConfig) -> anyhow::Result<Arc<Self>> {
        let prefix = config.thread_name_prefix.clone();
        let mut builder = rayon::ThreadPoolBuilder::new().thread_name(move |index| format!("{}-{}", prefix, index));
        if config.worker_threads > 0 {
            builder = builder.num_threads(config.worker_threads);
        }
        let pool = builder.build().context("Failed to create asset update worker pool")?;

        log::info!(
            "asset update scheduler created with {} worker threads",
            pool.current_num_threads()
        );
        Ok(Self::with_worker_pool(config, Arc::new(pool)))
    }

    /// 使用外部提供的线程池
    pub fn with_worker_pool(config: SchedulerConfig, worker_pool: Arc<dyn WorkerPool>) -> Arc<Self> {
        Arc::new(Self {
            config,
            primary_queue: PrimaryQueue::new(),
            worker_pool,
            suspended: [AtomicBool::new(false), AtomicBool::new(false)],
            primary_thread: OnceLock::new(),
        })
    }

    /// 把调用线程登记为 Primary 上下文，并返回凭证
    ///
    /// 第一个调用的线程成为 Primary，之后同一线程可以重复获取，其他线程会得到错误。
    pub fn claim_primary(&self) -> anyhow::Result<PrimaryToken> {
        let current = std::thread::current().id();
        let owner = *self.primary_thread.get_or_init(|| current);
        if owner != current {
            anyhow::bail!(
                "primary context is already owned by thread {:?}, cannot claim it from {:?}",
                owner,
                current
            );
        }
        Ok(PrimaryToken::new())
    }

    /// 调用线程是否为 Primary 线程；还没有线程认领时，调用线程成为 Primary
    pub(crate) fn is_primary_thread(&self) -> bool {
        let current = std::thread::current().id();
        *self.primary_thread.get_or_init(|| current) == current
    }
}
// suspension
impl TaskScheduler {
    /// 挂起一个上下文: 目标为该上下文的 step 停留在 Pending，不会被执行或调度
    pub fn suspend(&self, context: ExecutionContext) {
        if !self.suspended[context.index()].swap(true, Ordering::SeqCst) {
            log::info!("{} context suspended for asset updates", context);
        }
    }

    /// 恢复之后，停留在 Pending 的任务会在下一次 tick 时重新调度
    pub fn resume(&self, context: ExecutionContext) {
        if self.suspended[context.index()].swap(false, Ordering::SeqCst) {
            log::info!("{} context resumed for asset updates", context);
        }
    }

    #[inline]
    pub fn is_suspended(&self, context: ExecutionContext) -> bool {
        self.suspended[context.index()].load(Ordering::SeqCst)
    }
}
// requests
impl TaskScheduler {
    pub(crate) fn request_primary(&self, task: Arc<AssetUpdateTask>) {
        log::trace!("task #{} scheduled on Primary", task.id());
        self.primary_queue.push(task);
    }

    /// 在 Primary 线程上执行本次调用前已入队的请求，返回执行的数量
    ///
    /// 执行过程中新产生的请求留到下一次 pump。
    pub fn pump_primary(&self, _token: &PrimaryToken) -> usize {
        self.primary_queue.pump()
    }

    #[inline]
    pub fn pending_primary_requests(&self) -> usize {
        self.primary_queue.len()
    }
}
// getters
impl TaskScheduler {
    #[inline]
    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    #[inline]
    pub fn worker_pool(&self) -> &Arc<dyn WorkerPool> {
        &self.worker_pool
    }
}
