//! 资产更新任务调度
//!
//! 把一次资产的渐进式变更 (例如纹理常驻 mip 数量的增减) 拆成若干 step，
//! 每个 step 只能运行在两种上下文之一:
//! - `Primary`: 单线程，拥有资源对外可见的状态 (渲染线程的每帧 pump)
//! - `Worker`: 可互换的线程池，执行可并行的慢速工作
//!
//! # 保证
//! - 同一个任务同一时刻最多只有一个 step 在执行，且按注册顺序执行
//! - 取消是单向的标志位，在下一个决策点 (push_step / tick) 生效，
//!   此后总是走取消链
//! - `is_done()` 为 true 之后任务不会再被任何线程触碰，可以安全释放
//!
//! # 结构
//! - [`task::AssetUpdateTask`]: 状态机本体
//! - [`gate::ReadinessGate`]: step 的就绪计数
//! - [`scheduler::TaskScheduler`]: 与 Primary 队列 / Worker 线程池交互的唯一位置
//! - [`manager::AssetUpdateManager`]: 每帧驱动所有任务的 facade

pub mod context;
pub mod gate;
pub mod manager;
pub mod primary_only;
pub mod profile;
pub mod scheduler;
pub mod step;
pub mod task;

#[cfg(test)]
pub(crate) mod test_utils;

#[doc(hidden)]
pub use tracy_client;
