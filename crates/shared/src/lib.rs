//! 共享库
//!
//! 包含各 crate 共用的配置、错误处理、数据库连接、日志初始化与
//! 电话号码标准化等基础设施代码。

pub mod config;
pub mod database;
pub mod error;
pub mod observability;
pub mod phone;
