use crate::context::PrimaryToken;
use crate::scheduler::TaskScheduler;
use crate::scheduler::worker::WorkerPool;
use crate::task::AssetUpdateTask;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

type Work = Box<dyn FnOnce() + Send + 'static>;

/// 只在显式调用 `run_all` 时才执行的线程池，用于确定性的单线程测试
#[derive(Default)]
pub(crate) struct ManualWorkerPool {
    queue: Mutex<VecDeque<Work>>,
}

impl WorkerPool for ManualWorkerPool {
    fn submit(&self, work: Work) {
        self.queue.lock().unwrap().push_back(work);
    }
}

impl ManualWorkerPool {
    /// 在当前线程上执行所有排队的工作 (包括执行过程中新提交的)
    pub fn run_all(&self) -> usize {
        let mut executed = 0;
        loop {
            let work = self.queue.lock().unwrap().pop_front();
            match work {
                Some(work) => {
                    work();
                    executed += 1;
                }
                None => return executed,
            }
        }
    }

    pub fn len(&self) -> usize {
        self.queue.lock().unwrap().len()
    }
}

/// 扮演 Primary 线程的每帧循环，直到所有任务结束
pub(crate) fn drive_until_done(
    scheduler: &TaskScheduler,
    token: &PrimaryToken,
    tasks: &[Arc<AssetUpdateTask>],
    timeout: Duration,
) {
    let deadline = Instant::now() + timeout;
    loop {
        scheduler.pump_primary(token);
        for task in tasks {
            task.tick(None);
        }
        if tasks.iter().all(|task| task.is_done()) {
            return;
        }
        assert!(Instant::now() < deadline, "tasks did not finish within {:?}", timeout);
        std::thread::sleep(Duration::from_micros(100));
    }
}
