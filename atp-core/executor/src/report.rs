//! 执行报告
//!
//! 把结束的场景定义及其执行记录转换为可序列化的报告 (JSON / YAML)。
//! 子场景报告嵌套在调用它的动作/结果执行中。

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::info;

use atp_common::{ErrorRef, ExecutionStatus, TestError};

use crate::execution::{ActionResultExecution, ExecTotalStats, StepExecution, TimeStats};
use crate::scenario::{ActionResultDefinition, ActionResultType, ScenarioDefinition, StepDefinition};
use crate::Result;

/// 场景报告
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScenarioReport {
    pub name: String,

    #[serde(default)]
    pub attributes: BTreeMap<String, String>,

    pub status: ExecutionStatus,

    #[serde(default)]
    pub time: TimeStats,

    /// 耗时 (秒)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub elapsed: Option<f64>,

    #[serde(default)]
    pub errors: Vec<TestError>,

    #[serde(default)]
    pub warnings: Vec<TestError>,

    pub stats: StatsReport,

    #[serde(default)]
    pub steps: Vec<StepReport>,
}

/// 步骤、动作与结果的执行统计
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatsReport {
    pub steps: ExecTotalStats,
    pub actions: ExecTotalStats,
    pub results: ExecTotalStats,
}

/// 步骤报告
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepReport {
    /// 步骤编号，分节标记没有编号
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub number: Option<usize>,

    pub name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub section: bool,

    /// 定义级已知问题
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub known_issues: Vec<TestError>,

    #[serde(default)]
    pub executions: Vec<StepExecutionReport>,

    #[serde(default)]
    pub actions_results: Vec<ActionResultReport>,
}

/// 步骤执行报告
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepExecutionReport {
    pub number: usize,
    pub time: TimeStats,

    #[serde(default)]
    pub errors: Vec<TestError>,

    #[serde(default)]
    pub warnings: Vec<TestError>,
}

/// 动作/结果报告
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionResultReport {
    #[serde(rename = "type")]
    pub kind: ActionResultType,

    pub description: String,

    #[serde(default)]
    pub executions: Vec<ActionResultExecutionReport>,
}

/// 动作/结果执行报告
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionResultExecutionReport {
    pub time: TimeStats,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub evidence: Vec<String>,

    #[serde(default)]
    pub errors: Vec<TestError>,

    #[serde(default)]
    pub warnings: Vec<TestError>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub subscenarios: Vec<ScenarioReport>,
}

fn unshare(errors: &[ErrorRef]) -> Vec<TestError> {
    errors.iter().map(|error| error.as_ref().clone()).collect()
}

impl ScenarioReport {
    pub fn from_definition(definition: &ScenarioDefinition) -> Self {
        let time = definition
            .execution
            .as_ref()
            .map(|execution| execution.time.clone())
            .unwrap_or_default();

        Self {
            name: definition.name.clone(),
            attributes: definition.attributes.clone(),
            status: definition.status(),
            elapsed: time.elapsed_secs(),
            time,
            errors: unshare(definition.errors()),
            warnings: unshare(definition.warnings()),
            stats: StatsReport {
                steps: definition.step_stats(),
                actions: definition.action_stats(),
                results: definition.result_stats(),
            },
            steps: definition.steps.iter().map(StepReport::from_definition).collect(),
        }
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn to_yaml(&self) -> Result<String> {
        Ok(serde_yaml::to_string(self)?)
    }

    /// 写入 JSON 报告文件，目录不存在时创建
    pub fn write_json(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, self.to_json()?)?;
        info!("报告已写入: {:?}", path);
        Ok(())
    }

    pub fn from_json_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }

    /// 报告文件名 (场景名称中的路径分隔符与空白替换为下划线)
    pub fn file_name(&self) -> String {
        let name: String = self
            .name
            .chars()
            .map(|c| if c.is_alphanumeric() || c == '-' || c == '_' || c == '.' { c } else { '_' })
            .collect();
        format!("{}.json", name)
    }

    /// 包含嵌套子场景在内的证据总数
    pub fn evidence_count(&self) -> usize {
        self.steps
            .iter()
            .flat_map(|step| &step.actions_results)
            .flat_map(|action_result| &action_result.executions)
            .map(|execution| {
                execution.evidence.len()
                    + execution
                        .subscenarios
                        .iter()
                        .map(ScenarioReport::evidence_count)
                        .sum::<usize>()
            })
            .sum()
    }
}

impl StepReport {
    pub fn from_definition(step: &StepDefinition) -> Self {
        Self {
            number: step.number(),
            name: step.name().to_string(),
            description: step.description.clone(),
            section: step.is_section(),
            known_issues: unshare(&step.known_issues),
            executions: step.executions.iter().map(StepExecutionReport::from_execution).collect(),
            actions_results: step
                .actions_results
                .iter()
                .map(ActionResultReport::from_definition)
                .collect(),
        }
    }
}

impl StepExecutionReport {
    fn from_execution(execution: &StepExecution) -> Self {
        Self {
            number: execution.number,
            time: execution.time.clone(),
            errors: unshare(&execution.errors),
            warnings: unshare(&execution.warnings),
        }
    }
}

impl ActionResultReport {
    fn from_definition(definition: &ActionResultDefinition) -> Self {
        Self {
            kind: definition.kind,
            description: definition.description.clone(),
            executions: definition
                .executions
                .iter()
                .map(ActionResultExecutionReport::from_execution)
                .collect(),
        }
    }
}

impl ActionResultExecutionReport {
    fn from_execution(execution: &ActionResultExecution) -> Self {
        Self {
            time: execution.time.clone(),
            evidence: execution.evidence.clone(),
            errors: unshare(&execution.errors),
            warnings: unshare(&execution.warnings),
            subscenarios: execution
                .subscenarios
                .iter()
                .map(ScenarioReport::from_definition)
                .collect(),
        }
    }
}
