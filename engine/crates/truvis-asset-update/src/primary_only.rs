use crate::context::PrimaryToken;
use std::sync::{Mutex, PoisonError};

/// 只能在 Primary 上下文访问的共享数据
///
/// 自身是 `Send + Sync` 的，可以被 worker 线程上的闭包持有 (例如放在 `Arc` 里)，
/// 但读写都需要 [`PrimaryToken`]，而 token 无法离开 Primary 线程。
/// 于是 "只有 Primary 会修改资源对外可见的状态" 由类型保证。
#[derive(Debug, Default)]
pub struct PrimaryOnly<T> {
    // 只有 Primary 线程会加锁，锁永远不会竞争；用 Mutex 只是为了得到 Sync
    value: Mutex<T>,
}

impl<T> PrimaryOnly<T> {
    pub fn new(value: T) -> Self {
        Self {
            value: Mutex::new(value),
        }
    }

    pub fn with<R>(&self, _token: &PrimaryToken, f: impl FnOnce(&T) -> R) -> R {
        let guard = self.value.lock().unwrap_or_else(PoisonError::into_inner);
        f(&guard)
    }

    pub fn with_mut<R>(&self, _token: &PrimaryToken, f: impl FnOnce(&mut T) -> R) -> R {
        let mut guard = self.value.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut guard)
    }

    pub fn into_inner(self) -> T {
        self.value.into_inner().unwrap_or_else(PoisonError::into_inner)
    }
}
