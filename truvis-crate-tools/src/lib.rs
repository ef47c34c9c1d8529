//! Truvis 工具集
//!
//! 提供日志初始化等通用工具。
//!
//! # 日志
//! 每一行都带有线程名：资产更新的 step 会在 Primary 线程与 worker 线程之间切换，
//! 线程名是区分它们的最直接方式。

pub mod init_log;
