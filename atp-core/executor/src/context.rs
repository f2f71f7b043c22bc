//! 步骤回调上下文
//!
//! 步骤用户代码通过 [`StepContext`] 回调执行器: 描述步骤、声明动作与预期结果、
//! 记录证据、通知已知问题、跳转以及执行子场景。

use atp_common::{ErrorCode, KnownIssue, TestError};

use crate::runner::{ExecutionMode, ScenarioRunner};
use crate::scenario::{ActionResultType, ScenarioDefinition};
use crate::stack::Originator;
use crate::step_spec::StepSpec;
use crate::{ExecutorError, Result};

/// 跳转目标 (已解析的步骤索引)，只能由 [`StepContext::goto`] 生成
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StepTarget(pub(crate) usize);

impl StepTarget {
    pub fn index(self) -> usize {
        self.0
    }
}

/// 步骤执行结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepFlow {
    /// 按顺序继续下一步
    Continue,

    /// 跳转到指定步骤
    Goto(StepTarget),
}

/// 步骤回调上下文
pub struct StepContext<'r> {
    runner: &'r mut ScenarioRunner,
    mode: ExecutionMode,
    step: usize,
}

impl<'r> StepContext<'r> {
    pub(crate) fn new(runner: &'r mut ScenarioRunner, mode: ExecutionMode, step: usize) -> Self {
        Self { runner, mode, step }
    }

    pub fn mode(&self) -> ExecutionMode {
        self.mode
    }

    /// 是否真正执行测试动作 (构建与仅文档模式下为 false)
    pub fn do_execute(&self) -> bool {
        self.mode.do_execute()
    }

    /// 当前步骤在场景中的索引
    pub fn step_index(&self) -> usize {
        self.step
    }

    pub fn scenario_name(&self) -> Option<&str> {
        self.runner.walked_scenario(self.mode).map(|definition| definition.name.as_str())
    }

    pub fn runner(&self) -> &ScenarioRunner {
        &*self.runner
    }

    /// 步骤描述 (STEP)
    pub fn step(&mut self, description: impl Into<String>) -> Result<()> {
        self.runner.on_step_description(self.mode, description.into())
    }

    /// 声明动作 (ACTION)，返回是否应真正执行
    pub fn action(&mut self, description: impl Into<String>) -> Result<bool> {
        self.runner
            .on_action_result(self.mode, ActionResultType::Action, description.into())
    }

    /// 声明预期结果 (RESULT)，返回是否应真正执行
    pub fn result(&mut self, description: impl Into<String>) -> Result<bool> {
        self.runner
            .on_action_result(self.mode, ActionResultType::Result, description.into())
    }

    /// 为当前动作/结果记录证据
    pub fn evidence(&mut self, evidence: impl Into<String>) -> Result<()> {
        self.runner.on_evidence(self.mode, evidence.into())
    }

    /// 通知已知问题
    ///
    /// 构建遍历时登记到步骤定义，执行时按阈值记录为错误或警告。
    pub fn known_issue(&mut self, issue: KnownIssue) -> Result<()> {
        let issue = self.runner.prepare_known_issue(issue);
        self.runner.on_error(
            self.mode,
            TestError::from(issue).into_ref(),
            Some(Originator::Step(self.step)),
        )
    }

    /// 跳转到另一个步骤，步骤代码应直接返回该结果
    pub fn goto(&mut self, spec: impl Into<StepSpec>) -> Result<StepFlow> {
        self.runner.goto(self.mode, spec.into())
    }

    /// 执行子场景
    ///
    /// 子场景记录了错误时返回 [`ExecutorError::SubScenarioFailed`]，
    /// 携带子场景的最后一个错误，使调用步骤同样失败。
    pub fn execute_scenario(&mut self, definition: ScenarioDefinition) -> Result<ErrorCode> {
        if self.mode.is_building() {
            return Err(self
                .runner
                .stack()
                .context_error(format!("构建模式下不能执行子场景 '{}'", definition.name))
                .into());
        }

        let name = definition.name.clone();
        let finished = self.runner.run_scenario(definition, None, self.mode)?;
        self.runner.attach_subscenario(finished.definition);

        match finished.reraise {
            Some(error) => Err(ExecutorError::SubScenarioFailed {
                scenario: name,
                error,
            }),
            None => Ok(finished.code),
        }
    }
}
