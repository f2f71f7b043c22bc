//! 场景栈
//!
//! 两个相互独立的栈:
//! - 执行栈: 正在执行的场景 (栈底为主场景，其上为嵌套的子场景)
//! - 构建上下文: 正在构建遍历的场景定义
//!
//! 场景定义在入栈期间由栈持有，出栈时交还给调用者。

use thiserror::Error;
use tracing::{debug, error};

use crate::execution::{ActionResultExecution, ScenarioExecution, StepExecution};
use crate::scenario::{ActionResultDefinition, ScenarioDefinition, StepDefinition};

/// 上下文错误: 框架不变量被破坏 (例如没有当前步骤时记录动作)
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{message}")]
pub struct ContextError {
    pub message: String,

    /// 出错时两个栈的状态
    pub diagnostics: Vec<String>,
}

impl ContextError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            diagnostics: Vec::new(),
        }
    }
}

/// 已知问题的来源
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Originator {
    Scenario,

    /// 步骤索引
    Step(usize),
}

/// 构建上下文
#[derive(Debug, Default)]
pub struct BuildingContext {
    scenario_definitions: Vec<ScenarioDefinition>,
}

impl BuildingContext {
    pub fn push_scenario_definition(&mut self, definition: ScenarioDefinition) {
        debug!("构建上下文入栈: {}", definition);
        self.scenario_definitions.push(definition);
    }

    pub fn pop_scenario_definition(&mut self) -> Option<ScenarioDefinition> {
        let definition = self.scenario_definitions.pop();
        if let Some(definition) = &definition {
            debug!("构建上下文出栈: {}", definition);
        }
        definition
    }

    pub fn is_empty(&self) -> bool {
        self.scenario_definitions.is_empty()
    }

    pub fn len(&self) -> usize {
        self.scenario_definitions.len()
    }

    /// 正在构建的场景定义
    pub fn scenario_definition(&self) -> Option<&ScenarioDefinition> {
        self.scenario_definitions.last()
    }

    pub fn scenario_definition_mut(&mut self) -> Option<&mut ScenarioDefinition> {
        self.scenario_definitions.last_mut()
    }

    /// 正在构建的步骤索引 (由构建中场景的步骤游标得出)
    pub fn step_index(&self) -> Option<usize> {
        self.scenario_definition()
            .and_then(ScenarioDefinition::current_step_index)
    }

    pub fn step_definition(&self) -> Option<&StepDefinition> {
        let index = self.step_index()?;
        self.scenario_definition()?.steps.get(index)
    }

    pub fn step_definition_mut(&mut self) -> Option<&mut StepDefinition> {
        let index = self.step_index()?;
        self.scenario_definition_mut()?.steps.get_mut(index)
    }

    /// 把模糊的来源解析为实际正在构建的对象
    ///
    /// 场景来源在某个步骤正在构建时指向该步骤。
    pub fn from_originator(&self, originator: Originator) -> Originator {
        match originator {
            Originator::Scenario => self
                .step_index()
                .map_or(Originator::Scenario, Originator::Step),
            step => step,
        }
    }
}

/// 场景栈
#[derive(Debug, Default)]
pub struct ScenarioStack {
    pub building: BuildingContext,

    /// 执行栈 (栈顶为当前场景)
    scenario_definitions: Vec<ScenarioDefinition>,

    /// 已结束的主场景 (按时间顺序)
    history: Vec<ScenarioDefinition>,
}

impl ScenarioStack {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn size(&self) -> usize {
        self.scenario_definitions.len()
    }

    pub fn push_scenario_definition(&mut self, definition: ScenarioDefinition) {
        debug!("场景入栈: {} (深度 {})", definition, self.size() + 1);
        self.scenario_definitions.push(definition);
    }

    pub fn pop_scenario_definition(&mut self) -> Option<ScenarioDefinition> {
        let definition = self.scenario_definitions.pop();
        if let Some(definition) = &definition {
            debug!("场景出栈: {} (深度 {})", definition, self.size());
        }
        definition
    }

    pub fn history(&self) -> &[ScenarioDefinition] {
        &self.history
    }

    pub(crate) fn push_history(&mut self, definition: ScenarioDefinition) {
        self.history.push(definition);
    }

    pub fn take_history(&mut self) -> Vec<ScenarioDefinition> {
        std::mem::take(&mut self.history)
    }

    // ---- 主场景 (栈底) ----

    pub fn main_scenario_definition(&self) -> Option<&ScenarioDefinition> {
        self.scenario_definitions.first()
    }

    pub fn main_scenario_execution(&self) -> Option<&ScenarioExecution> {
        self.main_scenario_definition()?.execution.as_ref()
    }

    pub fn is_main_scenario(&self) -> bool {
        self.size() == 1
    }

    // ---- 当前场景 (栈顶) ----

    pub fn current_scenario_definition(&self) -> Option<&ScenarioDefinition> {
        self.scenario_definitions.last()
    }

    pub fn current_scenario_definition_mut(&mut self) -> Option<&mut ScenarioDefinition> {
        self.scenario_definitions.last_mut()
    }

    pub fn current_scenario_execution(&self) -> Option<&ScenarioExecution> {
        self.current_scenario_definition()?.execution.as_ref()
    }

    pub fn current_scenario_execution_mut(&mut self) -> Option<&mut ScenarioExecution> {
        self.current_scenario_definition_mut()?.execution.as_mut()
    }

    pub fn current_step_index(&self) -> Option<usize> {
        self.current_scenario_definition()
            .and_then(ScenarioDefinition::current_step_index)
    }

    pub fn current_step_definition(&self) -> Option<&StepDefinition> {
        let index = self.current_step_index()?;
        self.current_scenario_definition()?.steps.get(index)
    }

    pub fn current_step_definition_mut(&mut self) -> Option<&mut StepDefinition> {
        let index = self.current_step_index()?;
        self.current_scenario_definition_mut()?.steps.get_mut(index)
    }

    pub fn current_step_execution(&self) -> Option<&StepExecution> {
        self.current_step_definition()?.executions.last()
    }

    pub fn current_step_execution_mut(&mut self) -> Option<&mut StepExecution> {
        self.current_step_definition_mut()?.executions.last_mut()
    }

    pub fn current_action_result_definition(&self) -> Option<&ActionResultDefinition> {
        let index = self.current_step_execution()?.current_action_result()?;
        self.current_step_definition()?.actions_results.get(index)
    }

    /// 当前打开的动作/结果执行记录
    pub fn current_action_result_execution(&self) -> Option<&ActionResultExecution> {
        self.current_action_result_definition()?.executions.last()
    }

    pub fn current_action_result_execution_mut(&mut self) -> Option<&mut ActionResultExecution> {
        let step = self.current_step_definition_mut()?;
        let index = step.executions.last()?.current_action_result()?;
        step.actions_results.get_mut(index)?.executions.last_mut()
    }

    // ---- 诊断 ----

    /// 两个栈当前状态的描述
    pub fn diagnostics(&self) -> Vec<String> {
        let mut lines = Vec::new();

        lines.push(format!("执行栈 (深度 {}):", self.size()));
        for (depth, definition) in self.scenario_definitions.iter().enumerate() {
            let step = definition
                .current_step_index()
                .and_then(|index| definition.steps.get(index))
                .map_or_else(|| "-".to_string(), ToString::to_string);
            lines.push(format!("  [{}] {} 当前步骤: {}", depth, definition, step));
        }
        if let Some(step_execution) = self.current_step_execution() {
            lines.push(format!("  当前步骤执行: #{}", step_execution.number));
        }
        if let Some(action_result) = self.current_action_result_definition() {
            lines.push(format!("  当前动作/结果: {}", action_result));
        }

        lines.push(format!("构建上下文 (深度 {}):", self.building.len()));
        if let Some(definition) = self.building.scenario_definition() {
            let step = self
                .building
                .step_definition()
                .map_or_else(|| "-".to_string(), ToString::to_string);
            lines.push(format!("  {} 当前步骤: {}", definition, step));
        }

        lines
    }

    /// 记录栈状态并生成上下文错误
    pub fn context_error(&self, message: impl Into<String>) -> ContextError {
        let message = message.into();
        let diagnostics = self.diagnostics();

        error!("上下文错误: {}", message);
        for line in &diagnostics {
            error!("{}", line);
        }

        ContextError {
            message,
            diagnostics,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::{StepContext, StepFlow};
    use crate::scenario::ActionResultType;

    fn noop(_ctx: &mut StepContext<'_>) -> anyhow::Result<StepFlow> {
        Ok(StepFlow::Continue)
    }

    fn started(name: &str) -> ScenarioDefinition {
        let mut definition = ScenarioDefinition::new(name)
            .with_step(StepDefinition::new("first", noop))
            .with_step(StepDefinition::new("second", noop));
        let mut execution = ScenarioExecution::new();
        execution.start_step_list(definition.steps.len());
        definition.execution = Some(execution);
        definition
    }

    #[test]
    fn test_push_pop() {
        let mut stack = ScenarioStack::new();
        assert_eq!(stack.size(), 0);
        assert!(stack.current_scenario_definition().is_none());

        stack.push_scenario_definition(started("main"));
        stack.push_scenario_definition(started("sub"));
        assert_eq!(stack.size(), 2);
        assert_eq!(stack.main_scenario_definition().unwrap().name, "main");
        assert_eq!(stack.current_scenario_definition().unwrap().name, "sub");
        assert!(!stack.is_main_scenario());

        assert_eq!(stack.pop_scenario_definition().unwrap().name, "sub");
        assert!(stack.is_main_scenario());
        assert_eq!(stack.pop_scenario_definition().unwrap().name, "main");
        assert!(stack.pop_scenario_definition().is_none());
    }

    #[test]
    fn test_current_accessors_follow_cursor() {
        let mut stack = ScenarioStack::new();
        stack.push_scenario_definition(started("main"));
        assert_eq!(stack.current_step_definition().unwrap().name(), "first");
        assert!(stack.current_step_execution().is_none());

        let step = stack.current_step_definition_mut().unwrap();
        step.add_action_result(ActionResultDefinition::new(ActionResultType::Action, "do X"));
        step.executions.push(StepExecution::new(1));
        assert!(stack.current_action_result_definition().is_none());

        let step_execution = stack.current_step_execution_mut().unwrap();
        step_execution.next_action_result();
        assert_eq!(stack.current_action_result_definition().unwrap().description, "do X");
        assert!(stack.current_action_result_execution().is_none());

        stack.current_step_definition_mut().unwrap().actions_results[0]
            .executions
            .push(ActionResultExecution::new());
        assert!(stack.current_action_result_execution().is_some());

        stack.current_step_execution_mut().unwrap().close_action_result();
        assert!(stack.current_action_result_execution().is_none());

        stack.current_scenario_execution_mut().unwrap().next_step(2);
        assert_eq!(stack.current_step_definition().unwrap().name(), "second");
    }

    #[test]
    fn test_building_context_from_originator() {
        let mut building = BuildingContext::default();
        assert_eq!(building.from_originator(Originator::Scenario), Originator::Scenario);

        let mut definition = ScenarioDefinition::new("build").with_step(StepDefinition::new("only", noop));
        definition.execution = Some(ScenarioExecution::new());
        building.push_scenario_definition(definition);
        // 游标尚未开始
        assert_eq!(building.from_originator(Originator::Scenario), Originator::Scenario);

        building
            .scenario_definition_mut()
            .unwrap()
            .execution
            .as_mut()
            .unwrap()
            .start_step_list(1);
        assert_eq!(building.step_definition().unwrap().name(), "only");
        assert_eq!(building.from_originator(Originator::Scenario), Originator::Step(0));
        assert_eq!(building.from_originator(Originator::Step(0)), Originator::Step(0));

        assert!(building.pop_scenario_definition().is_some());
        assert!(building.is_empty());
    }

    #[test]
    fn test_context_error_carries_diagnostics() {
        let mut stack = ScenarioStack::new();
        stack.push_scenario_definition(started("main"));
        let error = stack.context_error("没有当前动作/结果");
        assert_eq!(error.to_string(), "没有当前动作/结果");
        assert!(error.diagnostics.iter().any(|line| line.contains("scenario 'main'")));
        assert!(error.diagnostics.iter().any(|line| line.contains("构建上下文")));
    }

    #[test]
    fn test_history() {
        let mut stack = ScenarioStack::new();
        stack.push_history(ScenarioDefinition::new("a"));
        stack.push_history(ScenarioDefinition::new("b"));
        assert_eq!(stack.history().len(), 2);
        let history = stack.take_history();
        assert_eq!(history[1].name, "b");
        assert!(stack.history().is_empty());
    }
}
