use crate::context::{ExecutionContext, PrimaryToken};
use crate::task::AssetUpdateTask;
use std::fmt;
use std::sync::Arc;

pub type StepFn = Box<dyn FnOnce(StepContext) + Send + 'static>;

/// 一个注册在特定上下文上的 step
///
/// "没有 step" 用 `Option<Step>::None` 表示。
pub struct Step {
    context: ExecutionContext,
    func: StepFn,
}

// new & init
impl Step {
    pub fn on(context: ExecutionContext, func: impl FnOnce(StepContext) + Send + 'static) -> Self {
        Self {
            context,
            func: Box::new(func),
        }
    }

    pub fn primary(func: impl FnOnce(StepContext) + Send + 'static) -> Self {
        Self::on(ExecutionContext::Primary, func)
    }

    pub fn worker(func: impl FnOnce(StepContext) + Send + 'static) -> Self {
        Self::on(ExecutionContext::Worker, func)
    }
}
// getters
impl Step {
    #[inline]
    pub fn context(&self) -> ExecutionContext {
        self.context
    }

    pub(crate) fn into_fn(self) -> StepFn {
        self.func
    }
}

impl fmt::Debug for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Step").field("context", &self.context).finish_non_exhaustive()
    }
}

/// 传给正在执行的 step 的上下文
///
/// step 在返回前必须通过 [`StepContext::push_step`] (或 [`StepContext::finish`])
/// 注册下一个 step。`push_step` 会消耗 `self`，所以一个 step 最多只能注册一次。
/// 如果 step 什么都没注册就把上下文丢掉了，任务会被当作终止处理。
pub struct StepContext {
    task: Arc<AssetUpdateTask>,
    current: ExecutionContext,
    primary: Option<PrimaryToken>,
    pushed: bool,
}

impl StepContext {
    pub(crate) fn new(task: Arc<AssetUpdateTask>, current: ExecutionContext) -> Self {
        let primary = (current == ExecutionContext::Primary).then(PrimaryToken::new);
        Self {
            task,
            current,
            primary,
            pushed: false,
        }
    }

    /// 当前 step 所在的上下文，step 可以用它断言自己被调度到了预期的地方
    #[inline]
    pub fn context(&self) -> ExecutionContext {
        self.current
    }

    #[inline]
    pub fn task(&self) -> &Arc<AssetUpdateTask> {
        &self.task
    }

    #[inline]
    pub fn requested_level(&self) -> u32 {
        self.task.requested_level()
    }

    #[inline]
    pub fn is_cancelled(&self) -> bool {
        self.task.is_cancelled()
    }

    /// 设置下一个 step 需要等待的子操作数量，必须在 `push_step` 之前调用
    #[inline]
    pub fn set_gate(&self, count: i32) {
        self.task.gate().set(count);
    }

    /// 仅当 step 运行在 Primary 上时可用
    #[inline]
    pub fn primary(&self) -> Option<&PrimaryToken> {
        self.primary.as_ref()
    }

    /// 注册下一个 step 以及与之配对的取消 step
    ///
    /// 如果 gate 已经打开并且目标上下文就是当前上下文，下一个 step 会在这次调用中同步执行。
    pub fn push_step(mut self, success: Option<Step>, cancel: Option<Step>) {
        self.pushed = true;
        self.task.push_step(Some(self.current), success, cancel);
    }

    /// 终止任务: 成功链和取消链都不再有 step
    pub fn finish(self) {
        self.push_step(None, None);
    }
}

impl Drop for StepContext {
    fn drop(&mut self) {
        if !self.pushed {
            log::error!(
                "step on {} of task #{} returned without registering a next step, terminating task",
                self.current,
                self.task.id()
            );
            self.pushed = true;
            self.task.push_step(Some(self.current), None, None);
        }
    }
}
