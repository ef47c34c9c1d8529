use crate::context::ExecutionContext;
use crate::profile_span;
use crate::task::AssetUpdateTask;
use crossbeam_channel::{Receiver, Sender};
use std::sync::Arc;

/// Primary 上下文的请求队列
///
/// 任意线程都可以入队；只有 Primary 线程在每帧的 pump 中出队并执行 `tick(Primary)`。
pub(crate) struct PrimaryQueue {
    sender: Sender<Arc<AssetUpdateTask>>,
    receiver: Receiver<Arc<AssetUpdateTask>>,
}

impl PrimaryQueue {
    pub fn new() -> Self {
        let (sender, receiver) = crossbeam_channel::unbounded();
        Self { sender, receiver }
    }

    pub fn push(&self, task: Arc<AssetUpdateTask>) {
        // receiver 与 sender 同生命周期，发送不会失败
        if let Err(e) = self.sender.send(task) {
            log::error!("Failed to enqueue primary request for task #{}", e.0.id());
        }
    }

    pub fn pump(&self) -> usize {
        let _span = profile_span!("PrimaryQueue::pump");

        let pending = self.receiver.len();
        let mut executed = 0;
        for _ in 0..pending {
            let Ok(task) = self.receiver.try_recv() else {
                break;
            };

            // 无论 tick 走了哪个分支 (甚至 step panic)，都要结束这次请求
            let task = scopeguard::guard(task, |task| task.finish_request());
            task.tick(Some(ExecutionContext::Primary));
            executed += 1;
        }
        executed
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.receiver.len()
    }
}
