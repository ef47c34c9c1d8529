use crate::context::ExecutionContext;
use crate::gate::ReadinessGate;
use crate::profile_span;
use crate::scheduler::TaskScheduler;
use crate::scheduler::worker::{self, WorkerUnit};
use crate::step::{Step, StepContext};
use std::sync::atomic::{AtomicBool, AtomicI32, AtomicU8, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

static NEXT_TASK_ID: AtomicU64 = AtomicU64::new(1);

/// 任务状态
///
/// 状态流转: None -> (push) -> Pending / Scheduled -> Locked -> None / Pending / Scheduled
#[repr(u8)]
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum TaskState {
    /// 没有注册任何 step
    None = 0,
    /// 注册了 step，但 gate 未打开 (或目标上下文被挂起)，也没有发出调度请求
    Pending = 1,
    /// 已经向 Primary 队列或 Worker 线程池发出了调度请求
    Scheduled = 2,
    /// 某个 step 正在执行，它拥有修改 step 字段的权利
    Locked = 3,
}

impl TaskState {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => Self::Pending,
            2 => Self::Scheduled,
            3 => Self::Locked,
            _ => Self::None,
        }
    }
}

/// 锁内做出的决定，锁释放之后再执行
enum Decision {
    /// gate 未打开
    Wait,
    /// 目标上下文被挂起
    Suspended(ExecutionContext),
    /// 没有可执行的 step 了
    Retire,
    /// 在当前线程上同步执行
    Run(Step),
    /// 交给调度器
    Schedule(ExecutionContext),
}

enum Request {
    Primary,
    Worker(WorkerUnit),
    /// worker unit 还没有归还，等它归还时再发出
    Parked,
}

struct TaskInner {
    state: TaskState,
    /// 处于 Scheduled 时，调度请求的目标上下文
    scheduled_on: Option<ExecutionContext>,

    success: Option<Step>,
    cancel: Option<Step>,

    /// 每个任务只有一个 worker unit，unit 在线程池里时这里为 None
    worker_unit: Option<WorkerUnit>,
    worker_request_parked: bool,
}

/// 资产更新任务
///
/// 一次多步骤资源变更的状态机。step 在 Primary 与 Worker 之间交替执行，
/// 每个 step 在返回前注册下一个 step，直到注册 `(None, None)`。
///
/// # 生命周期
/// 任务被 `Arc` 持有；调度请求和 worker unit 都会持有一份引用。
/// 所有者只应在 [`AssetUpdateTask::is_done`] 为 true 之后才认为任务结束。
pub struct AssetUpdateTask {
    id: u64,
    /// 本次变更的目标等级 (例如常驻 mip 数量)，构造后不再改变
    requested_level: u32,
    scheduler: Arc<TaskScheduler>,

    inner: Mutex<TaskInner>,
    /// `inner.state` 的镜像，用于不加锁的快速路径
    state: AtomicU8,

    gate: ReadinessGate,
    cancelled: AtomicBool,
    /// 已发出但还没有执行完 tick 的调度请求数量
    in_flight: AtomicI32,
}

// new & init
impl AssetUpdateTask {
    pub fn new(requested_level: u32, scheduler: Arc<TaskScheduler>) -> Arc<Self> {
        let id = NEXT_TASK_ID.fetch_add(1, Ordering::Relaxed);
        Arc::new(Self {
            id,
            requested_level,
            scheduler,
            inner: Mutex::new(TaskInner {
                state: TaskState::None,
                scheduled_on: None,
                success: None,
                cancel: None,
                worker_unit: Some(WorkerUnit::new(id)),
                worker_request_parked: false,
            }),
            state: AtomicU8::new(TaskState::None as u8),
            gate: ReadinessGate::default(),
            cancelled: AtomicBool::new(false),
            in_flight: AtomicI32::new(0),
        })
    }
}
// state machine
impl AssetUpdateTask {
    /// 驱动状态机
    ///
    /// `current` 是调用者所在的上下文；`None` 表示只是轮询，不希望在当前线程上执行 step。
    /// 不会阻塞: 要么在当前线程上同步执行一个 step，要么发出调度请求后立即返回。
    pub fn tick(self: &Arc<Self>, current: Option<ExecutionContext>) -> TaskState {
        let current = self.verify_context(current);

        // 快速路径，不加锁
        let observed = self.state();
        if observed == TaskState::None {
            return TaskState::None;
        }
        if current.is_none() && !self.gate.is_open() {
            return observed;
        }

        let mut inner = self.lock_inner();
        match inner.state {
            TaskState::None | TaskState::Locked => return inner.state,
            // 只有与请求匹配的 tick 才能处理已调度的 step，防止重复调度
            TaskState::Scheduled if inner.scheduled_on != current => return TaskState::Scheduled,
            TaskState::Scheduled | TaskState::Pending => {}
        }
        inner.scheduled_on = None;

        let decision = self.decide(&mut inner, current);
        self.apply(inner, current, decision)
    }

    /// 注册下一个 step 和与之配对的取消 step，整体替换之前注册的 step
    ///
    /// 只能由正在执行的 step (通过 [`StepContext::push_step`]) 或者在状态机启动前调用，
    /// 其他情况属于使用错误。`issuer` 是调用者所在的上下文:
    /// gate 已经打开且目标上下文与之相同时，下一个 step 会在这次调用里同步执行。
    pub fn push_step(
        self: &Arc<Self>,
        issuer: Option<ExecutionContext>,
        success: Option<Step>,
        cancel: Option<Step>,
    ) -> TaskState {
        let issuer = self.verify_context(issuer);
        let mut inner = self.lock_inner();
        debug_assert!(
            matches!(inner.state, TaskState::None | TaskState::Locked),
            "push_step on task #{} while {:?}, steps may only be pushed from a running step",
            self.id,
            inner.state
        );

        inner.success = success;
        inner.cancel = cancel;

        let decision = self.decide(&mut inner, issuer);
        self.apply(inner, issuer, decision)
    }

    /// 注册第一个 step，但不立即调度
    ///
    /// 任务进入 Pending，由之后第一个到来的 tick 决定 step 在哪里执行:
    /// 上下文匹配就地执行，否则发出调度请求。
    pub fn defer_step(&self, success: Option<Step>, cancel: Option<Step>) -> TaskState {
        let mut inner = self.lock_inner();
        debug_assert!(
            inner.state == TaskState::None,
            "defer_step on task #{} which is already running ({:?})",
            self.id,
            inner.state
        );

        let state = if success.is_none() && cancel.is_none() {
            TaskState::None
        } else {
            TaskState::Pending
        };
        inner.success = success;
        inner.cancel = cancel;
        self.set_state(&mut inner, state);
        state
    }

    /// 请求取消，任何线程任何时刻都可以调用，多次调用没有额外效果
    ///
    /// 不会打断正在执行的 step，只影响下一个决策点选择成功链还是取消链。
    pub fn request_cancel(&self) {
        if !self.cancelled.swap(true, Ordering::SeqCst) {
            log::debug!("task #{} cancel requested (state: {:?})", self.id, self.state());
        }
    }

    /// Primary 的 step 会拿到 [`crate::context::PrimaryToken`]，只有 Primary 线程能以 Primary 身份进入；
    /// 其他线程声称自己是 Primary 时降级为轮询
    fn verify_context(&self, current: Option<ExecutionContext>) -> Option<ExecutionContext> {
        if current == Some(ExecutionContext::Primary) && !self.scheduler.is_primary_thread() {
            log::error!(
                "task #{} entered as Primary from non-primary thread {:?}, treated as a poll",
                self.id,
                std::thread::current().id()
            );
            return None;
        }
        current
    }

    fn decide(&self, inner: &mut TaskInner, current: Option<ExecutionContext>) -> Decision {
        if !self.gate.is_open() {
            return Decision::Wait;
        }

        // 取消在执行时刻检查，而不是注册时刻
        let cancelled = self.is_cancelled();
        let relevant = if cancelled { inner.cancel.take() } else { inner.success.take() };

        let Some(step) = relevant else {
            inner.success = None;
            inner.cancel = None;
            return Decision::Retire;
        };

        let context = step.context();
        if current == Some(context) && !self.scheduler.is_suspended(context) {
            inner.success = None;
            inner.cancel = None;
            return Decision::Run(step);
        }

        // 放回原处，等待下一次决策
        if cancelled {
            inner.cancel = Some(step);
        } else {
            inner.success = Some(step);
        }

        if self.scheduler.is_suspended(context) {
            Decision::Suspended(context)
        } else {
            Decision::Schedule(context)
        }
    }

    fn apply(
        self: &Arc<Self>,
        mut inner: MutexGuard<'_, TaskInner>,
        current: Option<ExecutionContext>,
        decision: Decision,
    ) -> TaskState {
        match decision {
            Decision::Wait => {
                self.set_state(&mut inner, TaskState::Pending);
                TaskState::Pending
            }
            Decision::Suspended(context) => {
                log::trace!("task #{} waiting for suspended {} context", self.id, context);
                self.set_state(&mut inner, TaskState::Pending);
                TaskState::Pending
            }
            Decision::Retire => {
                self.set_state(&mut inner, TaskState::None);
                drop(inner);
                log::debug!(
                    "task #{} (level {}) reached its terminal step, {}",
                    self.id,
                    self.requested_level,
                    if self.is_cancelled() { "cancelled" } else { "succeeded" }
                );
                TaskState::None
            }
            Decision::Schedule(context) => {
                self.set_state(&mut inner, TaskState::Scheduled);
                inner.scheduled_on = Some(context);
                self.in_flight.fetch_add(1, Ordering::SeqCst);

                let request = match context {
                    ExecutionContext::Primary => Request::Primary,
                    ExecutionContext::Worker => match inner.worker_unit.take() {
                        Some(unit) => Request::Worker(unit),
                        None => {
                            inner.worker_request_parked = true;
                            Request::Parked
                        }
                    },
                };
                drop(inner);

                match request {
                    Request::Primary => self.scheduler.request_primary(self.clone()),
                    Request::Worker(unit) => worker::submit_unit(self.clone(), unit),
                    Request::Parked => {
                        log::trace!("task #{} worker unit still in flight, request parked", self.id);
                    }
                }
                TaskState::Scheduled
            }
            Decision::Run(step) => {
                self.set_state(&mut inner, TaskState::Locked);
                drop(inner);

                // decide 只会在 current 与 step 上下文相同时给出 Run
                let context = current.unwrap_or(step.context());
                self.run_step(step, context);
                self.state()
            }
        }
    }

    /// 执行 step 时不持有锁: step 自己会调用 push_step 重新进入状态机
    fn run_step(self: &Arc<Self>, step: Step, context: ExecutionContext) {
        let _span = profile_span!("AssetUpdateTask::run_step");
        log::trace!("task #{} running step on {}", self.id, context);

        let func = step.into_fn();
        func(StepContext::new(self.clone(), context));
    }
}
// worker unit & in-flight bookkeeping
impl AssetUpdateTask {
    /// 线程池把 unit 归还给任务
    ///
    /// 如果 unit 不在时有 worker 请求被挂起，unit 原样返回给调用者以便立刻处理该请求。
    pub(crate) fn return_worker_unit(&self, unit: WorkerUnit) -> Option<WorkerUnit> {
        let mut inner = self.lock_inner();
        if inner.worker_request_parked {
            inner.worker_request_parked = false;
            Some(unit)
        } else {
            inner.worker_unit = Some(unit);
            None
        }
    }

    /// 一个调度请求的 tick 已经返回
    pub(crate) fn finish_request(&self) {
        let prev = self.in_flight.fetch_sub(1, Ordering::SeqCst);
        debug_assert!(prev > 0, "task #{} finished more requests than it issued", self.id);
    }
}
// getters
impl AssetUpdateTask {
    #[inline]
    pub fn id(&self) -> u64 {
        self.id
    }

    #[inline]
    pub fn requested_level(&self) -> u32 {
        self.requested_level
    }

    #[inline]
    pub fn gate(&self) -> &ReadinessGate {
        &self.gate
    }

    #[inline]
    pub fn scheduler(&self) -> &Arc<TaskScheduler> {
        &self.scheduler
    }

    #[inline]
    pub fn state(&self) -> TaskState {
        TaskState::from_u8(self.state.load(Ordering::SeqCst))
    }

    #[inline]
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// 某个 step 正在执行
    #[inline]
    pub fn is_locked(&self) -> bool {
        self.state() == TaskState::Locked
    }

    #[inline]
    pub fn in_flight_count(&self) -> i32 {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// 任务已经走到终止 step，并且所有调度请求都已经执行完毕
    ///
    /// 这是判断任务可以被释放的唯一安全方式。
    #[inline]
    pub fn is_done(&self) -> bool {
        self.in_flight_count() <= 0 && self.state() == TaskState::None
    }

    /// worker unit 被执行过的次数；unit 在线程池中时返回 None
    pub fn worker_unit_runs(&self) -> Option<u64> {
        self.lock_inner().worker_unit.as_ref().map(WorkerUnit::runs)
    }
}
// tools
impl AssetUpdateTask {
    fn lock_inner(&self) -> MutexGuard<'_, TaskInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    #[inline]
    fn set_state(&self, inner: &mut TaskInner, state: TaskState) {
        inner.state = state;
        self.state.store(state as u8, Ordering::SeqCst);
    }
}

impl Drop for AssetUpdateTask {
    fn drop(&mut self) {
        if self.state() != TaskState::None {
            log::warn!("task #{} dropped before reaching its terminal step ({:?})", self.id, self.state());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::SchedulerConfig;
    use crate::test_utils::ManualWorkerPool;
    use std::sync::atomic::AtomicUsize;

    fn manual_scheduler() -> (Arc<TaskScheduler>, Arc<ManualWorkerPool>) {
        let pool = Arc::new(ManualWorkerPool::default());
        let scheduler = TaskScheduler::with_worker_pool(SchedulerConfig::default(), pool.clone());
        (scheduler, pool)
    }

    fn marker() -> Arc<AtomicUsize> {
        Arc::new(AtomicUsize::new(0))
    }

    fn mark(marker: &Arc<AtomicUsize>) -> Step {
        let marker = marker.clone();
        Step::primary(move |ctx| {
            marker.fetch_add(1, Ordering::SeqCst);
            ctx.finish();
        })
    }

    #[test]
    fn test_push_terminal_retires_immediately() {
        let (scheduler, _pool) = manual_scheduler();
        let task = AssetUpdateTask::new(1, scheduler);

        assert_eq!(task.push_step(None, None, None), TaskState::None);
        assert!(task.is_done());
        assert_eq!(task.tick(Some(ExecutionContext::Primary)), TaskState::None);
    }

    #[test]
    fn test_deferred_step_runs_on_first_matching_tick() {
        let (scheduler, _pool) = manual_scheduler();
        let task = AssetUpdateTask::new(1, scheduler);
        let ran = marker();

        assert_eq!(task.defer_step(Some(mark(&ran)), None), TaskState::Pending);
        assert!(!task.is_done());

        assert_eq!(task.tick(Some(ExecutionContext::Primary)), TaskState::None);
        assert_eq!(ran.load(Ordering::SeqCst), 1);
        assert!(task.is_done());
    }

    #[test]
    fn test_issue_from_other_context_schedules() {
        let (scheduler, _pool) = manual_scheduler();
        let token = scheduler.claim_primary().unwrap();
        let task = AssetUpdateTask::new(1, scheduler.clone());
        let ran = marker();

        assert_eq!(task.push_step(None, Some(mark(&ran)), None), TaskState::Scheduled);
        assert_eq!(task.in_flight_count(), 1);
        assert!(!task.is_done());

        // 轮询不会重复调度
        assert_eq!(task.tick(None), TaskState::Scheduled);
        assert_eq!(task.in_flight_count(), 1);
        assert_eq!(scheduler.pending_primary_requests(), 1);

        assert_eq!(scheduler.pump_primary(&token), 1);
        assert_eq!(scheduler.pending_primary_requests(), 0);
        assert_eq!(ran.load(Ordering::SeqCst), 1);
        assert!(task.is_done());
    }

    #[test]
    fn test_cancel_before_execution_runs_cancel_step() {
        let (scheduler, _pool) = manual_scheduler();
        let token = scheduler.claim_primary().unwrap();
        let task = AssetUpdateTask::new(1, scheduler.clone());
        let success = marker();
        let cancel = marker();

        // gate 已经打开，step 已经被调度
        task.push_step(None, Some(mark(&success)), Some(mark(&cancel)));
        task.request_cancel();
        scheduler.pump_primary(&token);

        assert_eq!(success.load(Ordering::SeqCst), 0);
        assert_eq!(cancel.load(Ordering::SeqCst), 1);
        assert!(task.is_done());
    }

    #[test]
    fn test_cancel_deferred_pair() {
        let (scheduler, _pool) = manual_scheduler();
        let task = AssetUpdateTask::new(1, scheduler);
        let success = marker();
        let cancel = marker();

        task.defer_step(Some(mark(&success)), Some(mark(&cancel)));
        task.request_cancel();
        task.tick(Some(ExecutionContext::Primary));

        assert_eq!(success.load(Ordering::SeqCst), 0);
        assert_eq!(cancel.load(Ordering::SeqCst), 1);
        assert!(task.is_done());
    }

    #[test]
    fn test_cancel_without_cancel_step_retires() {
        let (scheduler, _pool) = manual_scheduler();
        let task = AssetUpdateTask::new(1, scheduler);
        let success = marker();

        task.defer_step(Some(mark(&success)), None);
        task.request_cancel();
        assert_eq!(task.tick(Some(ExecutionContext::Primary)), TaskState::None);
        assert_eq!(success.load(Ordering::SeqCst), 0);
        assert!(task.is_done());
    }

    #[test]
    fn test_request_cancel_is_idempotent() {
        let (scheduler, _pool) = manual_scheduler();
        let task = AssetUpdateTask::new(1, scheduler);
        let cancel = marker();

        task.defer_step(None, Some(mark(&cancel)));
        task.request_cancel();
        task.request_cancel();
        task.tick(Some(ExecutionContext::Primary));
        task.request_cancel();

        assert_eq!(cancel.load(Ordering::SeqCst), 1);
        assert!(task.is_cancelled());
        assert!(task.is_done());
    }

    #[test]
    fn test_cancellation_sticks_for_the_rest_of_the_chain() {
        let (scheduler, _pool) = manual_scheduler();
        let task = AssetUpdateTask::new(1, scheduler);
        let success = marker();
        let cancel = marker();

        let (success_2, cancel_2) = (success.clone(), cancel.clone());
        let first_cancel = Step::primary(move |ctx| {
            cancel_2.fetch_add(1, Ordering::SeqCst);
            // 取消链中继续注册成功 / 取消配对，仍然只会走取消 step
            ctx.push_step(Some(mark(&success_2)), Some(mark(&cancel_2)));
        });

        task.defer_step(Some(mark(&success)), Some(first_cancel));
        task.request_cancel();
        task.tick(Some(ExecutionContext::Primary));

        assert_eq!(success.load(Ordering::SeqCst), 0);
        assert_eq!(cancel.load(Ordering::SeqCst), 2);
        assert!(task.is_done());
    }

    #[test]
    fn test_gate_blocks_until_open() {
        let (scheduler, _pool) = manual_scheduler();
        let task = AssetUpdateTask::new(1, scheduler);
        let ran = marker();

        task.gate().set(2);
        task.defer_step(Some(mark(&ran)), None);

        assert_eq!(task.tick(None), TaskState::Pending);
        assert_eq!(task.tick(Some(ExecutionContext::Primary)), TaskState::Pending);
        task.gate().decrement();
        assert_eq!(task.tick(Some(ExecutionContext::Primary)), TaskState::Pending);
        assert_eq!(ran.load(Ordering::SeqCst), 0);

        task.gate().decrement();
        assert_eq!(task.tick(Some(ExecutionContext::Primary)), TaskState::None);
        assert_eq!(ran.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_synchronous_chain_runs_in_one_call() {
        let (scheduler, _pool) = manual_scheduler();
        let task = AssetUpdateTask::new(3, scheduler);
        let order = Arc::new(Mutex::new(Vec::new()));

        let (o1, o2, o3) = (order.clone(), order.clone(), order.clone());
        let third = Step::primary(move |ctx| {
            o3.lock().unwrap().push(3);
            ctx.finish();
        });
        let second = Step::primary(move |ctx| {
            o2.lock().unwrap().push(2);
            ctx.push_step(Some(third), None);
        });
        let first = Step::primary(move |ctx| {
            o1.lock().unwrap().push(1);
            ctx.push_step(Some(second), None);
        });

        task.defer_step(Some(first), None);
        assert_eq!(task.tick(Some(ExecutionContext::Primary)), TaskState::None);
        assert_eq!(*order.lock().unwrap(), vec![1, 2, 3]);
        assert!(task.is_done());
    }

    #[test]
    fn test_worker_step_runs_on_pool() {
        let (scheduler, pool) = manual_scheduler();
        let token = scheduler.claim_primary().unwrap();
        let task = AssetUpdateTask::new(1, scheduler.clone());
        let contexts = Arc::new(Mutex::new(Vec::new()));

        let (c1, c2) = (contexts.clone(), contexts.clone());
        let finalize = Step::primary(move |ctx| {
            c2.lock().unwrap().push(ctx.context());
            assert!(ctx.primary().is_some());
            ctx.finish();
        });
        let load = Step::worker(move |ctx| {
            c1.lock().unwrap().push(ctx.context());
            assert!(ctx.primary().is_none());
            ctx.push_step(Some(finalize), None);
        });

        task.defer_step(Some(load), None);
        assert_eq!(task.tick(Some(ExecutionContext::Primary)), TaskState::Scheduled);
        assert_eq!(pool.len(), 1);
        assert_eq!(task.worker_unit_runs(), None);
        assert_eq!(pool.run_all(), 1);
        assert_eq!(task.state(), TaskState::Scheduled);
        assert_eq!(scheduler.pump_primary(&token), 1);

        assert_eq!(
            *contexts.lock().unwrap(),
            vec![ExecutionContext::Worker, ExecutionContext::Primary]
        );
        assert!(task.is_done());
        assert_eq!(task.worker_unit_runs(), Some(1));
    }

    #[test]
    fn test_primary_entry_from_foreign_thread_only_polls() {
        let (scheduler, _pool) = manual_scheduler();
        let token = scheduler.claim_primary().unwrap();
        let primary_thread = std::thread::current().id();
        let seen: Arc<Mutex<Vec<(std::thread::ThreadId, bool)>>> = Arc::default();

        let observe = |seen: &Arc<Mutex<Vec<(std::thread::ThreadId, bool)>>>| {
            let seen = seen.clone();
            Step::primary(move |ctx| {
                seen.lock().unwrap().push((std::thread::current().id(), ctx.primary().is_some()));
                ctx.finish();
            })
        };

        let ticked = AssetUpdateTask::new(1, scheduler.clone());
        ticked.defer_step(Some(observe(&seen)), None);
        let pushed = AssetUpdateTask::new(1, scheduler.clone());

        let (remote_ticked, remote_pushed, step) = (ticked.clone(), pushed.clone(), observe(&seen));
        let states = std::thread::spawn(move || {
            (
                remote_ticked.tick(Some(ExecutionContext::Primary)),
                remote_pushed.push_step(Some(ExecutionContext::Primary), Some(step), None),
            )
        })
        .join()
        .unwrap();

        // 外部线程上没有执行任何 step，两个任务都排进了 Primary 队列
        assert_eq!(states, (TaskState::Scheduled, TaskState::Scheduled));
        assert!(seen.lock().unwrap().is_empty());

        assert_eq!(scheduler.pump_primary(&token), 2);
        assert_eq!(*seen.lock().unwrap(), vec![(primary_thread, true), (primary_thread, true)]);
        assert!(ticked.is_done() && pushed.is_done());
    }

    #[test]
    fn test_running_step_holds_the_lock() {
        let (scheduler, _pool) = manual_scheduler();
        let task = AssetUpdateTask::new(1, scheduler);
        let locked = Arc::new(AtomicBool::new(false));

        let flag = locked.clone();
        task.defer_step(
            Some(Step::primary(move |ctx| {
                flag.store(ctx.task().is_locked(), Ordering::SeqCst);
                // step 正在执行时，其他 tick 不会进入
                assert_eq!(ctx.task().tick(Some(ExecutionContext::Primary)), TaskState::Locked);
                ctx.finish();
            })),
            None,
        );
        assert!(!task.is_locked());
        task.tick(Some(ExecutionContext::Primary));

        assert!(locked.load(Ordering::SeqCst));
        assert!(!task.is_locked());
        assert!(task.is_done());
    }

    #[test]
    fn test_dropped_step_context_terminates_task() {
        let (scheduler, _pool) = manual_scheduler();
        let task = AssetUpdateTask::new(1, scheduler);

        task.defer_step(Some(Step::primary(|_ctx| {})), None);
        assert_eq!(task.tick(Some(ExecutionContext::Primary)), TaskState::None);
        assert!(task.is_done());
    }

    #[test]
    fn test_suspended_context_keeps_task_pending() {
        let (scheduler, _pool) = manual_scheduler();
        let token = scheduler.claim_primary().unwrap();
        let task = AssetUpdateTask::new(1, scheduler.clone());
        let ran = marker();

        scheduler.suspend(ExecutionContext::Primary);
        task.defer_step(Some(mark(&ran)), None);
        assert_eq!(task.tick(Some(ExecutionContext::Primary)), TaskState::Pending);
        assert_eq!(task.tick(None), TaskState::Pending);
        assert_eq!(scheduler.pump_primary(&token), 0);

        scheduler.resume(ExecutionContext::Primary);
        assert_eq!(task.tick(None), TaskState::Scheduled);
        scheduler.pump_primary(&token);
        assert_eq!(ran.load(Ordering::SeqCst), 1);
        assert!(task.is_done());
    }

    #[test]
    fn test_done_stays_done() {
        let (scheduler, _pool) = manual_scheduler();
        let token = scheduler.claim_primary().unwrap();
        let task = AssetUpdateTask::new(1, scheduler.clone());
        let ran = marker();

        task.push_step(None, Some(mark(&ran)), None);
        assert!(!task.is_done());
        scheduler.pump_primary(&token);
        assert!(task.is_done());

        for _ in 0..3 {
            task.tick(None);
            task.tick(Some(ExecutionContext::Primary));
            task.request_cancel();
            assert!(task.is_done());
        }
        assert_eq!(ran.load(Ordering::SeqCst), 1);
    }
}
