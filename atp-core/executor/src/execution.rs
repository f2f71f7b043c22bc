//! 执行记录
//!
//! 场景、步骤与动作/结果的执行记录。场景结束后这些记录只读，供报告与统计使用。

use std::cmp::Ordering;
use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use atp_common::{ErrorRef, ExecutionStatus};

use crate::scenario::ScenarioDefinition;

/// 时间区间
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeStats {
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
}

impl TimeStats {
    /// 从当前时间开始的区间
    pub fn started() -> Self {
        Self {
            start: Some(Utc::now()),
            end: None,
        }
    }

    pub fn set_start_time(&mut self) {
        self.start = Some(Utc::now());
    }

    pub fn set_end_time(&mut self) {
        self.end = Some(Utc::now());
    }

    pub fn elapsed(&self) -> Option<chrono::Duration> {
        match (self.start, self.end) {
            (Some(start), Some(end)) => Some(end - start),
            _ => None,
        }
    }

    /// 耗时 (秒)
    pub fn elapsed_secs(&self) -> Option<f64> {
        self.elapsed()
            .map(|elapsed| elapsed.num_microseconds().unwrap_or(i64::MAX) as f64 / 1_000_000.0)
    }
}

/// 已执行数 / 总数
///
/// 已执行数按执行次数累计，跳转重入的步骤每次都计入。
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecTotalStats {
    pub executed: usize,
    pub total: usize,
}

impl ExecTotalStats {
    pub fn new(executed: usize, total: usize) -> Self {
        Self { executed, total }
    }

    pub fn count(&mut self, executions: usize) {
        self.total += 1;
        self.executed += executions;
    }

    pub fn add(&mut self, other: ExecTotalStats) {
        self.executed += other.executed;
        self.total += other.total;
    }
}

impl fmt::Display for ExecTotalStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.executed, self.total)
    }
}

/// 同一个错误只记录一次
pub(crate) fn push_unique(errors: &mut Vec<ErrorRef>, error: &ErrorRef) -> bool {
    if contains_error(errors, error) {
        return false;
    }
    errors.push(Arc::clone(error));
    true
}

pub(crate) fn contains_error(errors: &[ErrorRef], error: &ErrorRef) -> bool {
    errors.iter().any(|known| Arc::ptr_eq(known, error))
}

/// 动作/结果的一次执行
#[derive(Debug, Clone, Default)]
pub struct ActionResultExecution {
    pub time: TimeStats,
    pub evidence: Vec<String>,
    pub errors: Vec<ErrorRef>,
    pub warnings: Vec<ErrorRef>,

    /// 在此动作/结果中执行的子场景
    pub subscenarios: Vec<ScenarioDefinition>,
}

impl ActionResultExecution {
    pub fn new() -> Self {
        Self {
            time: TimeStats::started(),
            ..Default::default()
        }
    }
}

/// 步骤的一次执行
#[derive(Debug, Clone)]
pub struct StepExecution {
    /// 执行编号，在整个场景内从 1 开始递增 (跳转重入也继续递增)
    pub number: usize,
    pub time: TimeStats,
    pub errors: Vec<ErrorRef>,
    pub warnings: Vec<ErrorRef>,

    /// 已推进到的动作/结果定义位置
    action_result_index: Option<usize>,

    /// 当前打开的动作/结果定义
    current_action_result: Option<usize>,
}

impl StepExecution {
    pub fn new(number: usize) -> Self {
        Self {
            number,
            time: TimeStats::started(),
            errors: Vec::new(),
            warnings: Vec::new(),
            action_result_index: None,
            current_action_result: None,
        }
    }

    /// 推进到下一个动作/结果定义，并将其设为当前定义
    pub fn next_action_result(&mut self) -> usize {
        let next = self.action_result_index.map_or(0, |index| index + 1);
        self.action_result_index = Some(next);
        self.current_action_result = Some(next);
        next
    }

    pub fn current_action_result(&self) -> Option<usize> {
        self.current_action_result
    }

    pub fn close_action_result(&mut self) -> Option<usize> {
        self.current_action_result.take()
    }
}

/// 严重程度排序键
///
/// 依次比较: 状态、无级别错误数、错误最高级别、无级别警告数、警告最高级别。
pub type CriticityKey = (u8, usize, Option<i64>, usize, Option<i64>);

/// 场景的一次执行
#[derive(Debug, Clone, Default)]
pub struct ScenarioExecution {
    pub time: TimeStats,
    pub errors: Vec<ErrorRef>,
    pub warnings: Vec<ErrorRef>,

    /// 当前步骤 (索引)
    current_step: Option<usize>,

    /// 跳转设置的下一步 (索引)
    next_step: Option<usize>,
}

impl ScenarioExecution {
    pub fn new() -> Self {
        Self::default()
    }

    /// 初始化步骤游标
    pub fn start_step_list(&mut self, step_count: usize) {
        self.next_step = None;
        self.current_step = if step_count > 0 { Some(0) } else { None };
    }

    /// 推进步骤游标，优先消费跳转目标
    pub fn next_step(&mut self, step_count: usize) -> bool {
        let Some(current) = self.current_step else {
            tracing::warn!("没有当前步骤，无法推进到下一步");
            return false;
        };

        if let Some(target) = self.next_step.take() {
            tracing::debug!("跳转到步骤索引 {}", target);
            self.current_step = Some(target);
            return true;
        }

        self.current_step = if current + 1 < step_count {
            Some(current + 1)
        } else {
            None
        };
        self.current_step.is_some()
    }

    /// 设置下一步 (跳转)
    pub fn set_next_step(&mut self, index: usize) {
        self.next_step = Some(index);
    }

    pub fn current_step(&self) -> Option<usize> {
        self.current_step
    }

    pub fn pending_next_step(&self) -> Option<usize> {
        self.next_step
    }

    pub fn status(&self) -> ExecutionStatus {
        if !self.errors.is_empty() {
            ExecutionStatus::Fail
        } else if !self.warnings.is_empty() {
            ExecutionStatus::Warnings
        } else if self.time.end.is_some() {
            ExecutionStatus::Success
        } else {
            ExecutionStatus::Unknown
        }
    }

    /// 是否记录了非已知问题的错误
    pub fn has_unexpected_error(&self) -> bool {
        self.errors.iter().any(|error| !error.is_known_issue())
    }

    pub fn criticity_key(&self) -> CriticityKey {
        fn summary(errors: &[ErrorRef]) -> (usize, Option<i64>) {
            let unleveled = errors.iter().filter(|error| error.level().is_none()).count();
            let highest = errors.iter().filter_map(|error| error.level()).max();
            (unleveled, highest)
        }

        let (errors, error_level) = summary(&self.errors);
        let (warnings, warning_level) = summary(&self.warnings);
        (
            self.status().criticity(),
            errors,
            error_level,
            warnings,
            warning_level,
        )
    }

    /// 按严重程度比较，越严重越大
    pub fn cmp_criticity(&self, other: &Self) -> Ordering {
        self.criticity_key().cmp(&other.criticity_key())
    }
}
