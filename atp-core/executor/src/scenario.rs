//! 测试场景定义
//!
//! 场景由有序的步骤 (或分节标记) 组成; 步骤在构建遍历时生成动作/结果定义，
//! 每次执行追加一条执行记录。

use std::collections::BTreeMap;
use std::fmt;
use std::rc::Rc;

use serde::{Deserialize, Serialize};

use atp_common::{ErrorRef, ExecutionStatus, KnownIssue, TestError};

use crate::context::{StepContext, StepFlow};
use crate::execution::{ActionResultExecution, ExecTotalStats, ScenarioExecution, StepExecution};
use crate::section::{self, SectionSkip};

/// 步骤的用户代码
pub type StepBody = Rc<dyn Fn(&mut StepContext<'_>) -> anyhow::Result<StepFlow>>;

/// 动作或预期结果
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ActionResultType {
    Action,
    Result,
}

impl fmt::Display for ActionResultType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Action => f.write_str("ACTION"),
            Self::Result => f.write_str("RESULT"),
        }
    }
}

/// 动作/结果定义
#[derive(Debug, Clone)]
pub struct ActionResultDefinition {
    pub kind: ActionResultType,
    pub description: String,

    /// 所属步骤编号，挂接到步骤时设置
    step_number: Option<usize>,

    pub executions: Vec<ActionResultExecution>,
}

impl ActionResultDefinition {
    pub fn new(kind: ActionResultType, description: impl Into<String>) -> Self {
        Self {
            kind,
            description: description.into(),
            step_number: None,
            executions: Vec::new(),
        }
    }

    pub fn step_number(&self) -> Option<usize> {
        self.step_number
    }

    pub fn matches(&self, kind: ActionResultType, description: &str) -> bool {
        self.kind == kind && self.description == description
    }
}

impl fmt::Display for ActionResultDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {:?}", self.kind, self.description)
    }
}

#[derive(Clone)]
enum StepKind {
    Regular(StepBody),
    Section,
}

/// 步骤定义
#[derive(Clone)]
pub struct StepDefinition {
    name: String,
    kind: StepKind,
    pub description: Option<String>,

    /// 在场景中的编号 (不计分节标记)，挂接到场景时设置
    number: Option<usize>,

    pub actions_results: Vec<ActionResultDefinition>,

    /// 定义级已知问题
    pub known_issues: Vec<ErrorRef>,

    /// 构建遍历前已登记的已知问题数量
    init_known_issues: usize,

    pub executions: Vec<StepExecution>,
}

impl StepDefinition {
    pub fn new<F>(name: impl Into<String>, body: F) -> Self
    where
        F: Fn(&mut StepContext<'_>) -> anyhow::Result<StepFlow> + 'static,
    {
        Self::with_kind(name.into(), StepKind::Regular(Rc::new(body)))
    }

    /// 分节标记: 只显示标题，不执行
    pub fn section(description: impl Into<String>) -> Self {
        let description = description.into();
        let mut step = Self::with_kind(description.clone(), StepKind::Section);
        step.description = Some(description);
        step
    }

    fn with_kind(name: String, kind: StepKind) -> Self {
        Self {
            name,
            kind,
            description: None,
            number: None,
            actions_results: Vec::new(),
            known_issues: Vec::new(),
            init_known_issues: 0,
            executions: Vec::new(),
        }
    }

    /// 登记初始化已知问题 (构建遍历之前)
    pub fn with_known_issue(mut self, issue: KnownIssue) -> Self {
        self.known_issues.push(TestError::from(issue).into_ref());
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn number(&self) -> Option<usize> {
        self.number
    }

    pub fn is_section(&self) -> bool {
        matches!(self.kind, StepKind::Section)
    }

    pub(crate) fn body(&self) -> Option<StepBody> {
        match &self.kind {
            StepKind::Regular(body) => Some(Rc::clone(body)),
            StepKind::Section => None,
        }
    }

    /// 追加动作/结果定义并挂接到本步骤
    pub fn add_action_result(&mut self, mut definition: ActionResultDefinition) -> &mut ActionResultDefinition {
        definition.step_number = self.number;
        self.actions_results.push(definition);
        let last = self.actions_results.len() - 1;
        &mut self.actions_results[last]
    }

    /// 保存构建遍历前登记的已知问题
    pub(crate) fn save_init_known_issues(&mut self) {
        self.init_known_issues = self.known_issues.len();
    }

    pub(crate) fn init_known_issues(&self) -> &[ErrorRef] {
        &self.known_issues[..self.init_known_issues.min(self.known_issues.len())]
    }

    pub(crate) fn later_known_issues(&self) -> &[ErrorRef] {
        &self.known_issues[self.init_known_issues.min(self.known_issues.len())..]
    }
}

impl fmt::Debug for StepDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StepDefinition")
            .field("name", &self.name)
            .field("section", &self.is_section())
            .field("number", &self.number)
            .field("description", &self.description)
            .field("actions_results", &self.actions_results)
            .field("known_issues", &self.known_issues)
            .field("executions", &self.executions)
            .finish()
    }
}

impl fmt::Display for StepDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.number {
            Some(number) => write!(f, "step#{} ({})", number, self.name),
            None => write!(f, "section ({})", self.name),
        }
    }
}

/// 场景定义
#[derive(Debug, Clone)]
pub struct ScenarioDefinition {
    pub name: String,

    /// 场景属性 (用于报告)
    pub attributes: BTreeMap<String, String>,

    /// 出错后是否继续执行后续步骤
    pub continue_on_error: bool,

    pub steps: Vec<StepDefinition>,

    /// 场景定义级已知问题
    pub known_issues: Vec<ErrorRef>,

    /// 执行记录，构建阶段创建
    pub execution: Option<ScenarioExecution>,
}

impl ScenarioDefinition {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            attributes: BTreeMap::new(),
            continue_on_error: false,
            steps: Vec::new(),
            known_issues: Vec::new(),
            execution: None,
        }
    }

    pub fn with_attribute(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(name.into(), value.into());
        self
    }

    pub fn with_continue_on_error(mut self, continue_on_error: bool) -> Self {
        self.continue_on_error = continue_on_error;
        self
    }

    pub fn with_known_issue(mut self, issue: KnownIssue) -> Self {
        self.known_issues.push(TestError::from(issue).into_ref());
        self
    }

    pub fn with_step(mut self, step: StepDefinition) -> Self {
        self.add_step(step);
        self
    }

    pub fn with_section(self, description: impl Into<String>) -> Self {
        self.with_step(StepDefinition::section(description))
    }

    /// 可跳过的分节: 开始步骤运行检查，需要跳过时直接跳到结束步骤
    pub fn with_skippable_section<F>(mut self, title: impl Into<String>, check: F, steps: Vec<StepDefinition>) -> Self
    where
        F: Fn(&mut StepContext<'_>) -> anyhow::Result<Option<SectionSkip>> + 'static,
    {
        let title = title.into();
        let (begin, end) = section::section_steps(&title, check);
        self.add_step(begin);
        for step in steps {
            self.add_step(step);
        }
        self.add_step(end);
        self
    }

    /// 追加步骤并设置其编号
    pub fn add_step(&mut self, mut step: StepDefinition) -> &mut StepDefinition {
        if !step.is_section() {
            let number = self.steps.iter().filter(|s| !s.is_section()).count() + 1;
            step.number = Some(number);
            for action_result in &mut step.actions_results {
                action_result.step_number = Some(number);
            }
        }
        self.steps.push(step);
        let last = self.steps.len() - 1;
        &mut self.steps[last]
    }

    pub fn step(&self, index: usize) -> Option<&StepDefinition> {
        self.steps.get(index)
    }

    /// 按编号查找步骤 (不计分节标记)
    pub fn step_by_number(&self, number: usize) -> Option<&StepDefinition> {
        self.steps.iter().find(|step| step.number == Some(number))
    }

    pub fn current_step_index(&self) -> Option<usize> {
        self.execution.as_ref().and_then(ScenarioExecution::current_step)
    }

    /// 场景内所有步骤执行次数之和 (不计分节标记)
    pub fn step_execution_count(&self) -> usize {
        self.steps
            .iter()
            .filter(|step| !step.is_section())
            .map(|step| step.executions.len())
            .sum()
    }

    pub fn status(&self) -> ExecutionStatus {
        self.execution
            .as_ref()
            .map_or(ExecutionStatus::Unknown, ScenarioExecution::status)
    }

    pub fn errors(&self) -> &[ErrorRef] {
        self.execution.as_ref().map_or(&[], |execution| &execution.errors)
    }

    pub fn warnings(&self) -> &[ErrorRef] {
        self.execution.as_ref().map_or(&[], |execution| &execution.warnings)
    }

    pub fn step_stats(&self) -> ExecTotalStats {
        let mut stats = ExecTotalStats::default();
        for step in self.steps.iter().filter(|step| !step.is_section()) {
            stats.count(step.executions.len());
        }
        stats
    }

    pub fn action_stats(&self) -> ExecTotalStats {
        self.action_result_stats(ActionResultType::Action)
    }

    pub fn result_stats(&self) -> ExecTotalStats {
        self.action_result_stats(ActionResultType::Result)
    }

    fn action_result_stats(&self, kind: ActionResultType) -> ExecTotalStats {
        let mut stats = ExecTotalStats::default();
        for step in self.steps.iter().filter(|step| !step.is_section()) {
            for action_result in step.actions_results.iter().filter(|ar| ar.kind == kind) {
                stats.count(action_result.executions.len());
            }
        }
        stats
    }
}

impl fmt::Display for ScenarioDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "scenario '{}'", self.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn noop(_ctx: &mut StepContext<'_>) -> anyhow::Result<StepFlow> {
        Ok(StepFlow::Continue)
    }

    #[test]
    fn test_step_numbering_skips_sections() {
        let scenario = ScenarioDefinition::new("numbering")
            .with_section("准备")
            .with_step(StepDefinition::new("first", noop))
            .with_section("验证")
            .with_step(StepDefinition::new("second", noop));

        assert_eq!(scenario.steps.len(), 4);
        assert_eq!(scenario.steps[0].number(), None);
        assert!(scenario.steps[0].is_section());
        assert_eq!(scenario.steps[1].number(), Some(1));
        assert_eq!(scenario.steps[3].number(), Some(2));
        assert_eq!(scenario.step_by_number(2).unwrap().name(), "second");
        assert_eq!(scenario.steps[3].to_string(), "step#2 (second)");
    }

    #[test]
    fn test_action_result_attached_to_step() {
        let mut scenario = ScenarioDefinition::new("attach");
        let step = scenario.add_step(StepDefinition::new("only", noop));
        let definition = step.add_action_result(ActionResultDefinition::new(ActionResultType::Action, "do X"));
        assert_eq!(definition.step_number(), Some(1));
        assert!(definition.matches(ActionResultType::Action, "do X"));
        assert!(!definition.matches(ActionResultType::Result, "do X"));
        assert_eq!(definition.to_string(), "ACTION \"do X\"");
    }

    #[test]
    fn test_stats_before_execution() {
        let mut scenario = ScenarioDefinition::new("stats").with_section("s");
        let step = scenario.add_step(StepDefinition::new("one", noop));
        step.add_action_result(ActionResultDefinition::new(ActionResultType::Action, "a"));
        step.add_action_result(ActionResultDefinition::new(ActionResultType::Result, "r"));
        step.add_action_result(ActionResultDefinition::new(ActionResultType::Result, "r2"));

        assert_eq!(scenario.step_stats(), ExecTotalStats::new(0, 1));
        assert_eq!(scenario.action_stats(), ExecTotalStats::new(0, 1));
        assert_eq!(scenario.result_stats(), ExecTotalStats::new(0, 2));
        assert_eq!(scenario.status(), ExecutionStatus::Unknown);
        assert!(scenario.errors().is_empty());
    }

    #[test]
    fn test_init_known_issues_split() {
        let mut step = StepDefinition::new("issues", noop).with_known_issue(KnownIssue::new("init"));
        step.save_init_known_issues();
        step.known_issues
            .push(TestError::from(KnownIssue::new("later")).into_ref());

        assert_eq!(step.init_known_issues().len(), 1);
        assert_eq!(step.init_known_issues()[0].message(), "init");
        assert_eq!(step.later_known_issues().len(), 1);
        assert_eq!(step.later_known_issues()[0].message(), "later");
    }
}
