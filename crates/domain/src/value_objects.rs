//! Worker能力声明
//!
//! 队列与任务类型两个维度各自要么接受任意值，要么只接受显式列出的集合。

use std::collections::BTreeSet;
use std::fmt;

use scheduler_errors::{SchedulerError, SchedulerResult};
use serde::{Deserialize, Serialize};

/// 单一维度的能力集合
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CapabilitySet {
    /// 接受该维度上的任意取值
    Any,
    /// 只接受集合中的取值
    Only(BTreeSet<String>),
}

impl CapabilitySet {
    pub fn any() -> Self {
        CapabilitySet::Any
    }

    pub fn only<I, S>(values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        CapabilitySet::Only(values.into_iter().map(Into::into).collect())
    }

    pub fn matches(&self, value: &str) -> bool {
        match self {
            CapabilitySet::Any => true,
            CapabilitySet::Only(values) => values.contains(value),
        }
    }

    /// 空集合意味着Worker永远无法接收任务，属于配置错误
    pub fn validate(&self, field_name: &str) -> SchedulerResult<()> {
        if let CapabilitySet::Only(values) = self {
            if values.is_empty() {
                return Err(SchedulerError::config_error(format!(
                    "{field_name} 不能为空集合"
                )));
            }
            if values.iter().any(|v| v.trim().is_empty()) {
                return Err(SchedulerError::validation_error(format!(
                    "{field_name} 包含空白名称"
                )));
            }
        }
        Ok(())
    }
}

impl fmt::Display for CapabilitySet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CapabilitySet::Any => write!(f, "*"),
            CapabilitySet::Only(values) => {
                let joined: Vec<&str> = values.iter().map(String::as_str).collect();
                write!(f, "[{}]", joined.join(", "))
            }
        }
    }
}

/// Worker声明的能力范围
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerCapabilities {
    pub queues: CapabilitySet,
    pub job_keys: CapabilitySet,
}

impl WorkerCapabilities {
    pub fn new(queues: CapabilitySet, job_keys: CapabilitySet) -> Self {
        Self { queues, job_keys }
    }

    pub fn accept_all() -> Self {
        Self::new(CapabilitySet::Any, CapabilitySet::Any)
    }

    pub fn validate(&self) -> SchedulerResult<()> {
        self.queues.validate("capabilities.queues")?;
        self.job_keys.validate("capabilities.job_keys")?;
        Ok(())
    }
}
