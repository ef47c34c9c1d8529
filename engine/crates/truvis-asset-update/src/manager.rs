use crate::context::PrimaryToken;
use crate::profile_span;
use crate::scheduler::TaskScheduler;
use crate::step::Step;
use crate::task::AssetUpdateTask;
use slotmap::{SlotMap, new_key_type};
use std::sync::Arc;
use std::time::{Duration, Instant};

new_key_type! { pub struct UpdateHandle; }

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum UpdateOutcome {
    Succeeded,
    Cancelled,
}

/// 已经结束并被回收的任务
#[derive(Clone, Copy, Debug)]
pub struct FinishedUpdate {
    pub handle: UpdateHandle,
    pub requested_level: u32,
    pub outcome: UpdateOutcome,
}

/// 资产更新管理器 (Facade)
///
/// 运行在 Primary 线程上，持有 Primary 凭证，每帧调用一次 [`AssetUpdateManager::update`]:
/// 1. 轮询所有任务，gate 已经打开 (或上下文已恢复) 的 Pending 任务会被重新调度
/// 2. 执行 Primary 队列中的请求
/// 3. 回收 `is_done()` 的任务
pub struct AssetUpdateManager {
    scheduler: Arc<TaskScheduler>,
    token: PrimaryToken,

    tasks: SlotMap<UpdateHandle, Arc<AssetUpdateTask>>,
}
// new & init
impl AssetUpdateManager {
    /// 调用线程会成为调度器的 Primary 线程
    pub fn new(scheduler: Arc<TaskScheduler>) -> anyhow::Result<Self> {
        let token = scheduler.claim_primary()?;
        Ok(Self {
            scheduler,
            token,
            tasks: SlotMap::with_key(),
        })
    }
}
// tools
impl AssetUpdateManager {
    /// 创建任务并注册第一个 step
    ///
    /// 第一个 step 不会立即执行，下一次 `update` 时才被调度。
    pub fn start(&mut self, requested_level: u32, success: Option<Step>, cancel: Option<Step>) -> UpdateHandle {
        self.start_with(requested_level, move |task| {
            task.defer_step(success, cancel);
        })
    }

    /// 创建任务，由 `prepare` 负责设置 gate 并注册第一个 step
    pub fn start_with(&mut self, requested_level: u32, prepare: impl FnOnce(&Arc<AssetUpdateTask>)) -> UpdateHandle {
        let task = AssetUpdateTask::new(requested_level, self.scheduler.clone());
        prepare(&task);

        let task_id = task.id();
        let handle = self.tasks.insert(task);
        log::debug!("asset update {:?} started: task #{}, level {}", handle, task_id, requested_level);
        handle
    }

    /// 驱动所有任务 (每帧调用)，返回本帧结束的任务
    pub fn update(&mut self) -> Vec<FinishedUpdate> {
        let _span = profile_span!("AssetUpdateManager::update");

        for task in self.tasks.values() {
            task.tick(None);
        }
        self.scheduler.pump_primary(&self.token);

        let done = self
            .tasks
            .iter()
            .filter(|(_, task)| task.is_done())
            .map(|(handle, _)| handle)
            .collect::<Vec<_>>();

        done.into_iter()
            .filter_map(|handle| {
                let task = self.tasks.remove(handle)?;
                let outcome = if task.is_cancelled() {
                    UpdateOutcome::Cancelled
                } else {
                    UpdateOutcome::Succeeded
                };
                log::debug!("asset update {:?} (task #{}) finished: {:?}", handle, task.id(), outcome);
                Some(FinishedUpdate {
                    handle,
                    requested_level: task.requested_level(),
                    outcome,
                })
            })
            .collect()
    }

    /// 请求取消一个任务，任务仍然需要若干帧才能走完取消链
    pub fn cancel(&self, handle: UpdateHandle) -> bool {
        match self.tasks.get(handle) {
            Some(task) => {
                task.request_cancel();
                true
            }
            None => false,
        }
    }

    pub fn cancel_all(&self) {
        if !self.tasks.is_empty() {
            log::info!("cancelling {} pending asset updates", self.tasks.len());
        }
        for task in self.tasks.values() {
            task.request_cancel();
        }
    }

    /// 阻塞当前 (Primary) 线程，持续驱动直到所有任务结束
    pub fn block_till_idle(&mut self, timeout: Duration) -> anyhow::Result<Vec<FinishedUpdate>> {
        let _span = profile_span!("AssetUpdateManager::block_till_idle");
        let deadline = Instant::now() + timeout;

        let mut finished = Vec::new();
        loop {
            finished.extend(self.update());
            if self.is_idle() {
                return Ok(finished);
            }
            if Instant::now() >= deadline {
                anyhow::bail!("{} asset updates still in flight after {:?}", self.tasks.len(), timeout);
            }
            std::thread::sleep(Duration::from_micros(200));
        }
    }
}
// getters
impl AssetUpdateManager {
    #[inline]
    pub fn task(&self, handle: UpdateHandle) -> Option<&Arc<AssetUpdateTask>> {
        self.tasks.get(handle)
    }

    #[inline]
    pub fn contains(&self, handle: UpdateHandle) -> bool {
        self.tasks.contains_key(handle)
    }

    #[inline]
    pub fn pending_count(&self) -> usize {
        self.tasks.len()
    }

    #[inline]
    pub fn is_idle(&self) -> bool {
        self.tasks.is_empty()
    }

    #[inline]
    pub fn token(&self) -> &PrimaryToken {
        &self.token
    }

    #[inline]
    pub fn scheduler(&self) -> &Arc<TaskScheduler> {
        &self.scheduler
    }
}

impl Drop for AssetUpdateManager {
    fn drop(&mut self) {
        if self.is_idle() {
            return;
        }

        // 调度请求持有任务的引用，必须等它们全部执行完
        self.cancel_all();
        if let Err(e) = self.block_till_idle(Duration::from_secs(5)) {
            log::error!("AssetUpdateManager dropped with unfinished updates: {}", e);
        }
    }
}
