use std::sync::atomic::{AtomicI32, Ordering};

/// step 的就绪计数
///
/// 约定:
/// - 发起 N 个异步子操作的 step，在注册下一个 step 之前把计数设为 N
/// - 每个子操作完成时 (通常在 worker 线程上) 调用一次 [`ReadinessGate::decrement`]
/// - 计数归零是下一个 step 可以执行的唯一条件，与它的目标上下文无关
///
/// 只做同步准备工作的 step 把计数设为 0，这样下一个 step 可以直接串联执行。
#[derive(Debug, Default)]
pub struct ReadinessGate {
    count: AtomicI32,
}

impl ReadinessGate {
    pub fn new(count: i32) -> Self {
        Self {
            count: AtomicI32::new(count),
        }
    }

    #[inline]
    pub fn set(&self, count: i32) {
        self.count.store(count, Ordering::SeqCst);
    }

    /// 完成一个子操作，返回剩余的计数
    ///
    /// 对已经打开的 gate 继续递减属于使用错误，计数停在 0 并打印警告。
    pub fn decrement(&self) -> i32 {
        let prev = self
            .count
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |count| if count > 0 { Some(count - 1) } else { None });

        match prev {
            Ok(prev) => prev - 1,
            Err(current) => {
                log::warn!("ReadinessGate decremented while already open (count = {})", current);
                current.min(0)
            }
        }
    }

    #[inline]
    pub fn count(&self) -> i32 {
        self.count.load(Ordering::SeqCst)
    }

    #[inline]
    pub fn is_open(&self) -> bool {
        self.count() <= 0
    }
}
