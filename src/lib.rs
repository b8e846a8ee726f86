//! 工作日历调度服务的进程装配：存储选择、调度循环、API服务与优雅关闭。

pub mod app;
pub mod shutdown;

pub use app::{build_repositories, Application};
pub use shutdown::ShutdownManager;
