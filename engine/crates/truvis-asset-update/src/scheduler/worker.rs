use crate::context::ExecutionContext;
use crate::profile_span;
use crate::task::AssetUpdateTask;
use std::sync::Arc;

/// 外部线程池
///
/// 接受自包含的工作单元，在任意线程上、任意时刻恰好执行一次。
pub trait WorkerPool: Send + Sync {
    fn submit(&self, work: Box<dyn FnOnce() + Send + 'static>);
}

impl WorkerPool for rayon::ThreadPool {
    fn submit(&self, work: Box<dyn FnOnce() + Send + 'static>) {
        self.spawn(work);
    }
}

/// 任务在线程池中的执行单元
///
/// 每个任务只有一个 unit，同一时刻最多只有一个在线程池中。
/// 线程池执行完毕后总是把 unit 归还给任务，由任务决定复用还是保留。
#[derive(Debug)]
pub struct WorkerUnit {
    task_id: u64,
    runs: u64,
}

impl WorkerUnit {
    pub(crate) fn new(task_id: u64) -> Self {
        Self { task_id, runs: 0 }
    }

    #[inline]
    pub fn runs(&self) -> u64 {
        self.runs
    }
}

pub(crate) fn submit_unit(task: Arc<AssetUpdateTask>, unit: WorkerUnit) {
    log::trace!("task #{} scheduled on Worker", unit.task_id);
    let pool = task.scheduler().worker_pool().clone();
    pool.submit(Box::new(move || run_unit(task, unit)));
}

fn run_unit(task: Arc<AssetUpdateTask>, mut unit: WorkerUnit) {
    let _span = profile_span!("WorkerUnit::run");

    loop {
        unit.runs += 1;

        let rearm = {
            // 先归还 unit 再结束请求: is_done 为 true 时 unit 一定已经回到任务手里
            let task = scopeguard::guard(&task, |task| task.finish_request());
            task.tick(Some(ExecutionContext::Worker));
            task.return_worker_unit(unit)
        };

        let Some(returned) = rearm else {
            return;
        };

        if task.scheduler().config().inline_worker_rearm {
            log::trace!("task #{} handling parked worker request inline", returned.task_id);
            unit = returned;
        } else {
            submit_unit(task, returned);
            return;
        }
    }
}
