//! 多场景运行结果汇总

use std::cmp::Reverse;

use tracing::{error, info, warn};

use atp_common::{ErrorCode, ExecutionStatus};

use crate::execution::CriticityKey;
use crate::scenario::ScenarioDefinition;

/// 单个主场景的结果
#[derive(Debug, Clone, PartialEq)]
pub struct ScenarioResult {
    pub name: String,
    pub status: ExecutionStatus,
    pub code: ErrorCode,
    pub errors: usize,
    pub warnings: usize,

    /// 耗时 (秒)
    pub elapsed: Option<f64>,

    criticity: CriticityKey,
}

impl ScenarioResult {
    /// 由结束的场景与执行器返回码生成结果
    ///
    /// 记录了错误的场景返回码至少为 TEST_ERROR。
    pub fn from_definition(definition: &ScenarioDefinition, code: ErrorCode) -> Self {
        let status = definition.status();
        let code = if status == ExecutionStatus::Fail {
            code.max(ErrorCode::TestError)
        } else {
            code
        };
        let criticity = definition
            .execution
            .as_ref()
            .map_or((status.criticity(), 0, None, 0, None), |execution| execution.criticity_key());

        Self {
            name: definition.name.clone(),
            status,
            code,
            errors: definition.errors().len(),
            warnings: definition.warnings().len(),
            elapsed: definition
                .execution
                .as_ref()
                .and_then(|execution| execution.time.elapsed_secs()),
            criticity,
        }
    }

    /// 没有执行完成的场景 (构建失败、上下文错误等)
    pub fn failed(name: impl Into<String>, code: ErrorCode) -> Self {
        let status = ExecutionStatus::Fail;
        Self {
            name: name.into(),
            status,
            code,
            errors: 1,
            warnings: 0,
            elapsed: None,
            criticity: (status.criticity(), usize::MAX, None, 0, None),
        }
    }

    pub fn criticity_key(&self) -> CriticityKey {
        self.criticity
    }
}

/// 多场景运行结果
#[derive(Debug, Clone, Default)]
pub struct ScenarioResults {
    results: Vec<ScenarioResult>,
}

impl ScenarioResults {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, result: ScenarioResult) {
        self.results.push(result);
    }

    pub fn len(&self) -> usize {
        self.results.len()
    }

    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }

    /// 按运行顺序
    pub fn iter(&self) -> impl Iterator<Item = &ScenarioResult> {
        self.results.iter()
    }

    /// 整个运行的退出码
    pub fn worst_code(&self) -> ErrorCode {
        ErrorCode::worst(self.results.iter().map(|result| result.code))
    }

    pub fn count(&self, status: ExecutionStatus) -> usize {
        self.results.iter().filter(|result| result.status == status).count()
    }

    /// 按严重程度从高到低排序，相同时保持运行顺序
    pub fn sorted_by_criticity(&self) -> Vec<&ScenarioResult> {
        let mut sorted: Vec<&ScenarioResult> = self.results.iter().collect();
        sorted.sort_by_key(|result| Reverse(result.criticity));
        sorted
    }

    /// 输出汇总
    pub fn log_summary(&self) {
        info!("{}", "=".repeat(60));
        info!(
            "场景汇总: 共 {} 个, 成功 {}, 警告 {}, 失败 {}",
            self.len(),
            self.count(ExecutionStatus::Success),
            self.count(ExecutionStatus::Warnings),
            self.count(ExecutionStatus::Fail)
        );
        for result in self.sorted_by_criticity() {
            match result.status {
                ExecutionStatus::Fail => error!("  {} - {} ({})", result.status, result.name, result.code),
                ExecutionStatus::Warnings => warn!("  {} - {}", result.status, result.name),
                _ => info!("  {} - {}", result.status, result.name),
            }
        }
        info!("退出码: {}", self.worst_code());
        info!("{}", "=".repeat(60));
    }
}
