//! 场景控制台输出
//!
//! 通过 tracing 输出场景、步骤、动作/结果、证据与错误。
//! 嵌套子场景按栈深度缩进。

use tracing::{error, info, warn};

use atp_common::TestError;

use crate::scenario::{ActionResultDefinition, ActionResultType, ScenarioDefinition};

const INDENT: &str = "      | ";

/// 场景控制台输出
#[derive(Debug, Clone, Default)]
pub struct ScenarioLogging;

impl ScenarioLogging {
    pub fn new() -> Self {
        Self
    }

    /// 深度为 1 的主场景不缩进
    pub fn indentation(depth: usize) -> String {
        INDENT.repeat(depth.saturating_sub(1))
    }

    pub fn begin_scenario(&self, depth: usize, definition: &ScenarioDefinition) {
        let indent = Self::indentation(depth);
        info!("{}{}", indent, "=".repeat(60));
        info!("{}SCENARIO '{}'", indent, definition.name);
        info!("{}{}", indent, "=".repeat(60));
    }

    pub fn attributes(&self, depth: usize, definition: &ScenarioDefinition) {
        let indent = Self::indentation(depth);
        for (name, value) in definition.attributes.iter().filter(|(_, value)| !value.is_empty()) {
            info!("{}{}: {}", indent, name, value);
        }
    }

    pub fn section(&self, depth: usize, description: &str) {
        let indent = Self::indentation(depth);
        info!("{}{}", indent, "-".repeat(60));
        info!("{}  {}", indent, description.to_uppercase());
        info!("{}{}", indent, "-".repeat(60));
    }

    pub fn step_description(&self, depth: usize, number: usize, description: Option<&str>) {
        info!(
            "{}STEP#{}: {}",
            Self::indentation(depth),
            number,
            description.unwrap_or("(无描述)")
        );
    }

    pub fn action_result(&self, depth: usize, definition: &ActionResultDefinition) {
        let indent = Self::indentation(depth);
        match definition.kind {
            ActionResultType::Action => info!("{}    ACTION: {}", indent, definition.description),
            ActionResultType::Result => info!("{}    RESULT: {}", indent, definition.description),
        }
    }

    pub fn evidence(&self, depth: usize, evidence: &str) {
        info!("{}      EVIDENCE: {}", Self::indentation(depth), evidence);
    }

    /// 已知问题按分类显示; 其它错误总是错误
    pub fn error(&self, depth: usize, error: &TestError, is_error: bool) {
        let indent = Self::indentation(depth);
        match (error, is_error) {
            (TestError::KnownIssue(issue), false) => warn!("{}{}", indent, issue),
            (TestError::KnownIssue(issue), true) => error!("{}{}", indent, issue),
            (TestError::Exception(exception), _) => {
                error!("{}{}", indent, exception);
                for cause in &exception.chain {
                    error!("{}  原因: {}", indent, cause);
                }
                if let Some(location) = &exception.location {
                    error!("{}  位置: {}", indent, location);
                }
            }
            (TestError::Error { message, location }, _) => match location {
                Some(location) => error!("{}{} ({})", indent, message, location),
                None => error!("{}{}", indent, message),
            },
        }
    }

    pub fn end_scenario(&self, depth: usize, definition: &ScenarioDefinition) {
        info!("{}END OF '{}'", Self::indentation(depth), definition.name);
    }

    /// 主场景结束时的统计信息
    pub fn statistics(&self, definition: &ScenarioDefinition) {
        info!("{}", "-".repeat(60));
        info!("状态: {}", definition.status());
        for error in definition.errors() {
            error!("  错误: {}", error);
        }
        for warning in definition.warnings() {
            warn!("  警告: {}", warning);
        }
        info!("步骤: {}", definition.step_stats());
        info!("动作: {}", definition.action_stats());
        info!("结果: {}", definition.result_stats());
        if let Some(elapsed) = definition
            .execution
            .as_ref()
            .and_then(|execution| execution.time.elapsed_secs())
        {
            info!("耗时: {:.3}s", elapsed);
        }
        info!("{}", "-".repeat(60));
    }
}
