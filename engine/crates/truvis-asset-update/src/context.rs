use std::fmt;
use std::marker::PhantomData;

/// step 可以运行的执行上下文
///
/// 只有两种：单线程的 `Primary` 和线程池中的 `Worker`。
/// "没有上下文" 统一用 `Option::None` 表示 (终止 step，或者只做轮询的 tick)。
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub enum ExecutionContext {
    /// 拥有资源对外可见状态的单线程上下文，由每帧的 pump 驱动
    Primary,
    /// 线程池中任意一个可互换的线程
    Worker,
}

impl ExecutionContext {
    pub const COUNT: usize = 2;

    #[inline]
    pub const fn index(self) -> usize {
        match self {
            Self::Primary => 0,
            Self::Worker => 1,
        }
    }
}

impl fmt::Display for ExecutionContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Primary => write!(f, "Primary"),
            Self::Worker => write!(f, "Worker"),
        }
    }
}

/// 持有者正运行在 Primary 上下文的凭证
///
/// 没有公开的构造函数，只能通过:
/// - [`crate::scheduler::TaskScheduler::claim_primary`]
/// - 运行在 Primary 上的 step: [`crate::step::StepContext::primary`]
///
/// 类型本身是 `!Send` 的，拿到之后无法被带到其他线程。
pub struct PrimaryToken {
    _not_send: PhantomData<*const ()>,
}

impl PrimaryToken {
    pub(crate) fn new() -> Self {
        Self { _not_send: PhantomData }
    }
}

impl fmt::Debug for PrimaryToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("PrimaryToken")
    }
}
