use std::cmp::Ordering;
use std::sync::atomic::{AtomicUsize, Ordering as AtomicOrdering};
use std::sync::Arc;

use scheduler_config::DispatchStrategyKind;
use scheduler_domain::{Job, Worker};
use tracing::debug;

/// Worker选择策略
///
/// 传入的候选Worker已经过准入过滤（在线、有空闲槽位、能力匹配），
/// 策略只负责在其中挑选一个。
pub trait WorkerSelectionStrategy: Send + Sync {
    fn select_worker<'a>(&self, job: &Job, candidates: &[&'a Worker]) -> Option<&'a Worker>;

    fn name(&self) -> &str;
}

/// 按配置构造策略
pub fn strategy_for(kind: DispatchStrategyKind) -> Arc<dyn WorkerSelectionStrategy> {
    match kind {
        DispatchStrategyKind::MostAvailable => Arc::new(MostAvailableStrategy::new()),
        DispatchStrategyKind::LeastLoaded => Arc::new(LeastLoadedStrategy::new()),
        DispatchStrategyKind::RoundRobin => Arc::new(RoundRobinStrategy::new()),
    }
}

fn compare_utilization(a: &Worker, b: &Worker) -> Ordering {
    a.utilization_percentage()
        .partial_cmp(&b.utilization_percentage())
        .unwrap_or(Ordering::Equal)
}

/// 空闲槽位最多优先，其次利用率最低，最后按id升序
pub struct MostAvailableStrategy;

impl MostAvailableStrategy {
    pub fn new() -> Self {
        Self
    }
}

impl Default for MostAvailableStrategy {
    fn default() -> Self {
        Self::new()
    }
}

impl WorkerSelectionStrategy for MostAvailableStrategy {
    fn select_worker<'a>(&self, job: &Job, candidates: &[&'a Worker]) -> Option<&'a Worker> {
        let selected = candidates.iter().copied().min_by(|a, b| {
            b.available_slots()
                .cmp(&a.available_slots())
                .then_with(|| compare_utilization(a, b))
                .then_with(|| a.id().cmp(b.id()))
        })?;

        debug!(
            "空闲优先策略为任务 {} 选择Worker: {} (空闲槽位: {})",
            job.id,
            selected.id(),
            selected.available_slots()
        );
        Some(selected)
    }

    fn name(&self) -> &str {
        "MostAvailable"
    }
}

/// 利用率最低优先，其次按id升序
pub struct LeastLoadedStrategy;

impl LeastLoadedStrategy {
    pub fn new() -> Self {
        Self
    }
}

impl Default for LeastLoadedStrategy {
    fn default() -> Self {
        Self::new()
    }
}

impl WorkerSelectionStrategy for LeastLoadedStrategy {
    fn select_worker<'a>(&self, job: &Job, candidates: &[&'a Worker]) -> Option<&'a Worker> {
        let selected = candidates
            .iter()
            .copied()
            .min_by(|a, b| compare_utilization(a, b).then_with(|| a.id().cmp(b.id())))?;

        debug!(
            "负载均衡策略为任务 {} 选择Worker: {} (负载: {:.1}%)",
            job.id,
            selected.id(),
            selected.utilization_percentage()
        );
        Some(selected)
    }

    fn name(&self) -> &str {
        "LeastLoaded"
    }
}

/// 按id排序后轮询
pub struct RoundRobinStrategy {
    counter: AtomicUsize,
}

impl RoundRobinStrategy {
    pub fn new() -> Self {
        Self {
            counter: AtomicUsize::new(0),
        }
    }
}

impl Default for RoundRobinStrategy {
    fn default() -> Self {
        Self::new()
    }
}

impl WorkerSelectionStrategy for RoundRobinStrategy {
    fn select_worker<'a>(&self, job: &Job, candidates: &[&'a Worker]) -> Option<&'a Worker> {
        if candidates.is_empty() {
            return None;
        }
        let mut ordered: Vec<&'a Worker> = candidates.to_vec();
        ordered.sort_by(|a, b| a.id().cmp(b.id()));

        let index = self.counter.fetch_add(1, AtomicOrdering::Relaxed) % ordered.len();
        let selected = ordered[index];

        debug!(
            "轮询策略为任务 {} 选择Worker: {} (索引: {}/{})",
            job.id,
            selected.id(),
            index,
            ordered.len()
        );
        Some(selected)
    }

    fn name(&self) -> &str {
        "RoundRobin"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use scheduler_testing_utils::{JobBuilder, WorkerBuilder};

    fn pick<'a>(strategy: &dyn WorkerSelectionStrategy, workers: &'a [Worker]) -> Option<&'a str> {
        let job = JobBuilder::new().with_id(1).build();
        let candidates: Vec<&Worker> = workers.iter().collect();
        strategy.select_worker(&job, &candidates).map(|w| w.id())
    }

    #[test]
    fn test_most_available_prefers_free_slots() {
        let workers = vec![
            WorkerBuilder::new().with_id("a").with_max_parallel(2).build(),
            WorkerBuilder::new().with_id("b").with_max_parallel(4).with_current_jobs(1).build(),
            WorkerBuilder::new().with_id("c").with_max_parallel(1).build(),
        ];
        assert_eq!(pick(&MostAvailableStrategy::new(), &workers), Some("b"));
    }

    #[test]
    fn test_most_available_breaks_ties_by_utilization_then_id() {
        // 两个都剩2个槽位，c 的利用率更低
        let workers = vec![
            WorkerBuilder::new().with_id("b").with_max_parallel(4).with_current_jobs(2).build(),
            WorkerBuilder::new().with_id("c").with_max_parallel(2).build(),
        ];
        assert_eq!(pick(&MostAvailableStrategy::new(), &workers), Some("c"));

        let workers = vec![
            WorkerBuilder::new().with_id("z").with_max_parallel(2).build(),
            WorkerBuilder::new().with_id("m").with_max_parallel(2).build(),
        ];
        assert_eq!(pick(&MostAvailableStrategy::new(), &workers), Some("m"));
    }

    #[test]
    fn test_least_loaded() {
        let workers = vec![
            WorkerBuilder::new().with_id("a").with_max_parallel(10).with_current_jobs(5).build(),
            WorkerBuilder::new().with_id("b").with_max_parallel(2).with_current_jobs(0).build(),
        ];
        assert_eq!(pick(&LeastLoadedStrategy::new(), &workers), Some("b"));
    }

    #[test]
    fn test_round_robin_cycles_in_id_order() {
        let workers = vec![
            WorkerBuilder::new().with_id("w2").build(),
            WorkerBuilder::new().with_id("w1").build(),
        ];
        let strategy = RoundRobinStrategy::new();
        assert_eq!(pick(&strategy, &workers), Some("w1"));
        assert_eq!(pick(&strategy, &workers), Some("w2"));
        assert_eq!(pick(&strategy, &workers), Some("w1"));
    }

    #[test]
    fn test_empty_candidates() {
        for kind in [
            DispatchStrategyKind::MostAvailable,
            DispatchStrategyKind::LeastLoaded,
            DispatchStrategyKind::RoundRobin,
        ] {
            assert!(pick(strategy_for(kind).as_ref(), &[]).is_none());
        }
    }
}
