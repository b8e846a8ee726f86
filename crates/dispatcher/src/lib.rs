pub mod calendar_resolver;
pub mod completion;
pub mod dispatcher;
pub mod health_monitor;
pub mod retry_policy;
pub mod service;
pub mod strategies;

pub use calendar_resolver::CalendarResolver;
pub use completion::CompletionHandler;
pub use dispatcher::{AssignmentOutcome, DispatchReport, Dispatcher};
pub use health_monitor::{HealthMonitor, SweepReport};
pub use retry_policy::RetryPolicy;
pub use service::{CalendarDefinition, HeartbeatAck, SchedulerService};
pub use strategies::{
    strategy_for, LeastLoadedStrategy, MostAvailableStrategy, RoundRobinStrategy,
    WorkerSelectionStrategy,
};

/// 读-改-写操作遇到版本冲突时的最大尝试次数
pub const MAX_CONFLICT_RETRIES: u32 = 5;
