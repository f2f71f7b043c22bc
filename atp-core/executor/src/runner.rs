//! 场景执行器
//!
//! 一次场景执行分两个阶段:
//! 1. 构建遍历: 以构建模式运行每个步骤，生成动作/结果定义并登记定义级已知问题
//! 2. 真正执行 (或仅文档模式): 按步骤游标遍历，处理跳转、错误与事件处理器
//!
//! 子场景通过同一个执行器递归执行，执行栈在任何退出路径上都恢复到入栈前的深度。
//!
//! 中断标志在步骤边界检查: 被中断时记录 `KeyboardInterrupt` 错误，
//! 停止剩余步骤，场景照常结束并保留执行记录。

use std::any::Any;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;

use chrono::{DateTime, Utc};
use tracing::{debug, error, info, warn};

use atp_common::{ErrorCode, ErrorRef, ExceptionError, IssuePolicy, KnownIssue, TestError};

use crate::config::ScenarioConfig;
use crate::context::{StepContext, StepFlow, StepTarget};
use crate::execution::{contains_error, push_unique, ActionResultExecution, ScenarioExecution, StepExecution};
use crate::handlers::{EventData, HandlerControl, Handlers, ScenarioEvent};
use crate::logging::ScenarioLogging;
use crate::scenario::{ActionResultDefinition, ActionResultType, ScenarioDefinition, StepDefinition};
use crate::stack::{ContextError, Originator, ScenarioStack};
use crate::step_spec::StepSpec;
use crate::{ExecutorError, Result};

/// 执行模式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionMode {
    /// 构建遍历: 只生成定义，不执行测试动作
    BuildObjects,

    /// 仅文档: 遍历并输出步骤与动作/结果，不执行测试动作
    DocOnly,

    /// 真正执行
    Execute,
}

impl ExecutionMode {
    pub fn do_execute(self) -> bool {
        matches!(self, Self::Execute)
    }

    pub fn is_building(self) -> bool {
        matches!(self, Self::BuildObjects)
    }
}

impl fmt::Display for ExecutionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::BuildObjects => "build-objects",
            Self::DocOnly => "doc-only",
            Self::Execute => "execute",
        };
        f.write_str(name)
    }
}

/// 已出栈的场景
pub(crate) struct FinishedScenario {
    pub code: ErrorCode,
    pub definition: ScenarioDefinition,

    /// 子场景的最后一个错误，需要在父步骤中重新抛出
    pub reraise: Option<ErrorRef>,
}

/// 步骤用户代码失败的分类
enum StepFailure {
    Test(ErrorRef),
    Fatal(ExecutorError),
}

/// 场景执行器
pub struct ScenarioRunner {
    config: ScenarioConfig,

    /// 已知问题分类阈值
    policy: IssuePolicy,

    stack: ScenarioStack,
    handlers: Handlers,
    logging: ScenarioLogging,

    /// 中断标志，可与信号处理器共享
    interrupt: Arc<AtomicBool>,

    /// 本次中断记录的错误，同一次中断只记录一个实例
    interrupt_error: Option<ErrorRef>,
}

impl ScenarioRunner {
    pub fn new(config: ScenarioConfig) -> Result<Self> {
        let policy = config.issue_policy()?;
        config
            .validate()
            .map_err(|e| ExecutorError::ConfigError(format!("{:#}", e)))?;
        debug!(
            "创建场景执行器: 错误阈值 {:?}, 忽略阈值 {:?}",
            policy.error_threshold, policy.ignored_threshold
        );

        Ok(Self {
            config,
            policy,
            stack: ScenarioStack::new(),
            handlers: Handlers::new(),
            logging: ScenarioLogging::new(),
            interrupt: Arc::new(AtomicBool::new(false)),
            interrupt_error: None,
        })
    }

    /// 使用外部的中断标志 (例如 Ctrl+C 处理器设置的标志)
    pub fn with_interrupt_flag(mut self, flag: Arc<AtomicBool>) -> Self {
        self.interrupt = flag;
        self
    }

    pub fn interrupt_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.interrupt)
    }

    /// 请求中断，在下一个步骤边界生效
    pub fn interrupt(&self) {
        self.interrupt.store(true, Ordering::SeqCst);
    }

    pub fn is_interrupted(&self) -> bool {
        self.interrupt.load(Ordering::SeqCst)
    }

    pub fn config(&self) -> &ScenarioConfig {
        &self.config
    }

    pub fn issue_policy(&self) -> &IssuePolicy {
        &self.policy
    }

    pub fn stack(&self) -> &ScenarioStack {
        &self.stack
    }

    pub fn handlers(&self) -> &Handlers {
        &self.handlers
    }

    pub fn handlers_mut(&mut self) -> &mut Handlers {
        &mut self.handlers
    }

    /// 已结束的主场景
    pub fn history(&self) -> &[ScenarioDefinition] {
        self.stack.history()
    }

    pub fn take_history(&mut self) -> Vec<ScenarioDefinition> {
        self.stack.take_history()
    }

    /// 由配置决定的运行模式
    pub fn run_mode(&self) -> ExecutionMode {
        if self.config.scenario.doc_only {
            ExecutionMode::DocOnly
        } else {
            ExecutionMode::Execute
        }
    }

    pub fn do_execute(&self) -> bool {
        self.run_mode().do_execute()
    }

    // ========================================
    // 场景执行
    // ========================================

    /// 执行主场景
    ///
    /// 场景结束后记录到历史中。测试失败不影响返回码，由场景状态体现;
    /// 只有输入格式问题 (缺少必需属性) 返回非成功码。
    pub fn execute_scenario(&mut self, definition: ScenarioDefinition) -> Result<ErrorCode> {
        self.execute_scenario_at(definition, None)
    }

    /// 执行主场景并覆盖开始时间
    pub fn execute_scenario_at(
        &mut self,
        definition: ScenarioDefinition,
        start_time: Option<DateTime<Utc>>,
    ) -> Result<ErrorCode> {
        let mode = self.run_mode();
        info!("开始执行场景: {} (模式 {})", definition.name, mode);

        let finished = self.run_scenario(definition, start_time, mode)?;
        let code = finished.code;
        self.stack.push_history(finished.definition);
        Ok(code)
    }

    /// 构建并执行一个场景 (主场景或子场景)
    pub(crate) fn run_scenario(
        &mut self,
        definition: ScenarioDefinition,
        start_time: Option<DateTime<Utc>>,
        mode: ExecutionMode,
    ) -> Result<FinishedScenario> {
        let definition = self.build_scenario(definition)?;

        let depth = self.stack.size();
        self.stack.push_scenario_definition(definition);

        match panic::catch_unwind(AssertUnwindSafe(|| self.drive_scenario(start_time, mode))) {
            Ok(Ok(finished)) => Ok(finished),
            Ok(Err(e)) => {
                self.unwind_to(depth);
                Err(e)
            }
            Err(payload) => {
                self.unwind_to(depth);
                panic::resume_unwind(payload)
            }
        }
    }

    fn drive_scenario(
        &mut self,
        start_time: Option<DateTime<Utc>>,
        mode: ExecutionMode,
    ) -> Result<FinishedScenario> {
        if let Some(code) = self.begin_scenario(mode)? {
            let definition = self.pop_current_scenario()?;
            return Ok(FinishedScenario {
                code,
                definition,
                reraise: None,
            });
        }

        if let Some(start_time) = start_time {
            if let Some(execution) = self.stack.current_scenario_execution_mut() {
                execution.time.start = Some(start_time);
            }
        }

        self.walk_steps(mode)?;
        self.end_scenario(mode)
    }

    /// 执行栈恢复到指定深度
    fn unwind_to(&mut self, depth: usize) {
        while self.stack.size() > depth {
            if let Some(definition) = self.stack.pop_scenario_definition() {
                warn!("场景 '{}' 异常结束，已出栈", definition.name);
            }
        }
    }

    fn pop_current_scenario(&mut self) -> Result<ScenarioDefinition> {
        match self.stack.pop_scenario_definition() {
            Some(definition) => Ok(definition),
            None => Err(self.stack.context_error("执行栈为空，无法出栈").into()),
        }
    }

    // ========================================
    // 构建遍历
    // ========================================

    fn build_scenario(&mut self, mut definition: ScenarioDefinition) -> Result<ScenarioDefinition> {
        debug!("构建场景 '{}'", definition.name);
        self.prepare_definition_issues(&mut definition);
        definition.execution = Some(ScenarioExecution::new());

        self.stack.building.push_scenario_definition(definition);
        let walked = panic::catch_unwind(AssertUnwindSafe(|| self.walk_build()));
        let definition = self.stack.building.pop_scenario_definition();

        match walked {
            Ok(Ok(())) => {}
            Ok(Err(e)) => return Err(e),
            Err(payload) => panic::resume_unwind(payload),
        }

        definition.ok_or_else(|| ExecutorError::Context(ContextError::new("构建上下文为空")))
    }

    fn walk_build(&mut self) -> Result<()> {
        let step_count = match self.stack.building.scenario_definition_mut() {
            Some(definition) => {
                let step_count = definition.steps.len();
                if let Some(execution) = definition.execution.as_mut() {
                    execution.start_step_list(step_count);
                }
                step_count
            }
            None => return Err(self.stack.context_error("没有正在构建的场景").into()),
        };

        while let Some(index) = self.stack.building.step_index() {
            if let Some(step) = self.stack.building.step_definition_mut() {
                step.save_init_known_issues();
            }

            self.exec_step(index, ExecutionMode::BuildObjects)?;

            if let Some(execution) = self
                .stack
                .building
                .scenario_definition_mut()
                .and_then(|definition| definition.execution.as_mut())
            {
                execution.next_step(step_count);
            }
        }
        Ok(())
    }

    /// 构建前补全定义中已知问题的级别名称与 URL
    fn prepare_definition_issues(&self, definition: &mut ScenarioDefinition) {
        let prepare = |error: &mut ErrorRef| {
            *error = self.prepare_error(Arc::clone(error));
        };

        definition.known_issues.iter_mut().for_each(&prepare);
        for step in &mut definition.steps {
            step.known_issues.iter_mut().for_each(&prepare);
        }
    }

    // ========================================
    // 场景开始 / 遍历 / 结束
    // ========================================

    /// 返回 `Some(code)` 时场景不再执行
    fn begin_scenario(&mut self, mode: ExecutionMode) -> Result<Option<ErrorCode>> {
        let depth = self.stack.size();
        let is_main = self.stack.is_main_scenario();

        let (name, missing, known_issues) = {
            let Some(definition) = self.stack.current_scenario_definition() else {
                return Err(self.stack.context_error("没有当前场景").into());
            };

            self.logging.begin_scenario(depth, definition);
            let mut missing = Vec::new();
            if is_main {
                self.logging.attributes(depth, definition);
                missing = self
                    .config
                    .scenario
                    .expected_attributes
                    .iter()
                    .filter(|name| !definition.attributes.contains_key(name.as_str()))
                    .cloned()
                    .collect::<Vec<_>>();
            }
            (definition.name.clone(), missing, definition.known_issues.clone())
        };

        if !missing.is_empty() {
            for attribute in &missing {
                error!("场景 '{}' 缺少必需属性 '{}'", name, attribute);
            }
            return Ok(Some(ErrorCode::InputFormatError));
        }

        if let Some(execution) = self.stack.current_scenario_execution_mut() {
            execution.time.set_start_time();
        }

        self.call_handlers(mode, ScenarioEvent::BeforeTest, EventData::Scenario { name, depth })?;
        self.notify_known_issues(&known_issues, Originator::Scenario, mode)?;
        Ok(None)
    }

    fn current_step_count(&self) -> usize {
        self.stack
            .current_scenario_definition()
            .map_or(0, |definition| definition.steps.len())
    }

    fn walk_steps(&mut self, mode: ExecutionMode) -> Result<()> {
        let step_count = self.current_step_count();
        match self.stack.current_scenario_execution_mut() {
            Some(execution) => execution.start_step_list(step_count),
            None => return Err(self.stack.context_error("当前场景没有执行记录").into()),
        }

        loop {
            if self.is_interrupted() {
                self.on_interrupt(mode)?;
                break;
            }
            if self.should_stop() {
                debug!("出现非预期错误，停止执行剩余步骤");
                break;
            }
            let Some(index) = self.stack.current_step_index() else {
                break;
            };

            self.exec_step(index, mode)?;

            if let Some(execution) = self.stack.current_scenario_execution_mut() {
                if execution.current_step().is_some() {
                    execution.next_step(step_count);
                }
            }
        }
        Ok(())
    }

    fn end_scenario(&mut self, mode: ExecutionMode) -> Result<FinishedScenario> {
        // 未执行步骤的已知问题同样需要通知
        let step_count = self.current_step_count();
        while let Some(index) = self.stack.current_step_index() {
            let known_issues = self
                .stack
                .current_step_definition()
                .map(|step| step.known_issues.clone())
                .unwrap_or_default();
            self.notify_known_issues(&known_issues, Originator::Step(index), mode)?;

            if let Some(execution) = self.stack.current_scenario_execution_mut() {
                execution.next_step(step_count);
            }
        }

        let (name, known_issues) = match self.stack.current_scenario_definition() {
            Some(definition) => (definition.name.clone(), definition.known_issues.clone()),
            None => return Err(self.stack.context_error("没有当前场景").into()),
        };
        self.notify_known_issues(&known_issues, Originator::Scenario, mode)?;

        let depth = self.stack.size();
        self.call_handlers(mode, ScenarioEvent::AfterTest, EventData::Scenario { name, depth })?;

        if let Some(execution) = self.stack.current_scenario_execution_mut() {
            execution.time.set_end_time();
        }
        if let Some(definition) = self.stack.current_scenario_definition() {
            self.logging.end_scenario(depth, definition);
            if depth == 1 {
                self.logging.statistics(definition);
            }
        }

        let definition = self.pop_current_scenario()?;
        let reraise = if self.stack.size() > 0 {
            definition.errors().last().cloned()
        } else {
            None
        };
        if let Some(error) = &reraise {
            debug!("子场景 '{}' 失败，向父步骤抛出: {}", definition.name, error);
        }

        Ok(FinishedScenario {
            code: ErrorCode::Success,
            definition,
            reraise,
        })
    }

    // ========================================
    // 步骤执行
    // ========================================

    fn exec_step(&mut self, index: usize, mode: ExecutionMode) -> Result<()> {
        let depth = self.stack.size();

        let (body, number, step_name, scenario_name, init_known_issues) = {
            let Some(scenario) = self.walked_scenario(mode) else {
                return Err(self.stack.context_error("没有正在遍历的场景").into());
            };
            let Some(step) = scenario.steps.get(index) else {
                return Err(self
                    .stack
                    .context_error(format!("步骤索引 {} 超出范围", index))
                    .into());
            };
            let Some(body) = step.body() else {
                if !mode.is_building() {
                    self.logging
                        .section(depth, step.description.as_deref().unwrap_or(step.name()));
                }
                return Ok(());
            };

            (
                body,
                scenario.step_execution_count() + 1,
                step.name().to_string(),
                scenario.name.clone(),
                step.init_known_issues().to_vec(),
            )
        };

        if !mode.is_building() {
            let cancelled = self.call_handlers(
                mode,
                ScenarioEvent::BeforeStep,
                EventData::Step {
                    scenario: scenario_name.clone(),
                    number,
                    name: step_name.clone(),
                },
            )?;
            if cancelled || self.should_stop() {
                debug!("步骤 #{} 在执行前被取消", number);
                return Ok(());
            }

            let step = self.walked_step_mut(mode, index)?;
            step.executions.push(StepExecution::new(number));
            let description = step.description.clone();
            self.logging.step_description(depth, number, description.as_deref());
        }

        self.notify_known_issues(&init_known_issues, Originator::Step(index), mode)?;

        let outcome = {
            let mut context = StepContext::new(self, mode, index);
            panic::catch_unwind(AssertUnwindSafe(|| body(&mut context)))
        };

        let handled = match outcome {
            Ok(Ok(StepFlow::Continue)) => Ok(()),
            Ok(Ok(StepFlow::Goto(target))) => self.jump_to(target, mode),
            Ok(Err(e)) => match Self::classify_failure(e) {
                StepFailure::Fatal(e) => Err(e),
                StepFailure::Test(error) => {
                    let error = self.prepare_error(error);
                    self.on_error(mode, error, Some(Originator::Step(index)))
                }
            },
            Err(payload) => {
                let error = panic_error(payload.as_ref()).into_ref();
                self.on_error(mode, error, Some(Originator::Step(index)))
            }
        };
        self.end_current_action_result(mode);
        handled?;

        if !mode.is_building() && self.is_interrupted() {
            self.on_interrupt(mode)?;
        }

        let later_known_issues = self.walked_step_mut(mode, index)?.later_known_issues().to_vec();
        self.notify_known_issues(&later_known_issues, Originator::Step(index), mode)?;

        match mode {
            ExecutionMode::BuildObjects => return Ok(()),
            ExecutionMode::DocOnly => {
                self.walked_step_mut(mode, index)?.executions.pop();
            }
            ExecutionMode::Execute => {
                if let Some(execution) = self.walked_step_mut(mode, index)?.executions.last_mut() {
                    execution.time.set_end_time();
                }
            }
        }

        self.call_handlers(
            mode,
            ScenarioEvent::AfterStep,
            EventData::Step {
                scenario: scenario_name,
                number,
                name: step_name,
            },
        )?;

        if mode.do_execute() {
            let delay = self.config.step_delay()?;
            if !delay.is_zero() {
                debug!("步骤间等待 {:.3}s", delay.as_secs_f64());
                thread::sleep(delay);
            }
        }
        Ok(())
    }

    /// 把步骤用户代码返回的错误分类为测试错误或致命错误
    fn classify_failure(e: anyhow::Error) -> StepFailure {
        let e = match e.downcast::<ExecutorError>() {
            Ok(ExecutorError::Context(e)) => return StepFailure::Fatal(ExecutorError::Context(e)),
            Ok(ExecutorError::Build { error, .. })
            | Ok(ExecutorError::SubScenarioFailed { error, .. }) => return StepFailure::Test(error),
            Ok(other) => {
                let exception = ExceptionError::new("ExecutorError", other.to_string());
                return StepFailure::Test(TestError::from(exception).into_ref());
            }
            Err(e) => e,
        };

        let e = match e.downcast::<ContextError>() {
            Ok(e) => return StepFailure::Fatal(ExecutorError::Context(e)),
            Err(e) => e,
        };

        let e = match e.downcast::<ErrorRef>() {
            Ok(error) => return StepFailure::Test(error),
            Err(e) => e,
        };

        match e.downcast::<TestError>() {
            Ok(error) => StepFailure::Test(Arc::new(error)),
            Err(e) => {
                let exception = ExceptionError::new("Error", e.to_string())
                    .with_chain(e.chain().skip(1).map(ToString::to_string));
                StepFailure::Test(TestError::from(exception).into_ref())
            }
        }
    }

    fn jump_to(&mut self, target: StepTarget, mode: ExecutionMode) -> Result<()> {
        if mode.is_building() {
            debug!("构建遍历忽略跳转到步骤索引 {}", target.index());
            return Ok(());
        }

        let step_count = self.current_step_count();
        if target.index() >= step_count {
            return Err(self
                .stack
                .context_error(format!("跳转目标 {} 超出步骤范围", target.index()))
                .into());
        }
        if let Some(execution) = self.stack.current_scenario_execution_mut() {
            execution.set_next_step(target.index());
        }
        Ok(())
    }

    /// 关闭当前动作/结果
    fn end_current_action_result(&mut self, mode: ExecutionMode) {
        if mode.is_building() {
            return;
        }
        let Some(step) = self.stack.current_step_definition_mut() else {
            return;
        };
        let Some(execution) = step.executions.last_mut() else {
            return;
        };
        let Some(index) = execution.current_action_result() else {
            return;
        };

        if mode.do_execute() {
            if let Some(action_result) = step
                .actions_results
                .get_mut(index)
                .and_then(|definition| definition.executions.last_mut())
            {
                action_result.time.set_end_time();
            }
        }
        execution.close_action_result();
    }

    // ========================================
    // 步骤回调
    // ========================================

    /// 步骤描述: 构建遍历时记录到步骤定义
    pub fn on_step_description(&mut self, mode: ExecutionMode, description: String) -> Result<()> {
        if !mode.is_building() {
            return Ok(());
        }
        if self.stack.building.step_definition().is_none() {
            return Err(self.stack.context_error("没有正在构建的步骤").into());
        }
        if let Some(step) = self.stack.building.step_definition_mut() {
            step.description = Some(description);
        }
        Ok(())
    }

    /// 动作或预期结果
    ///
    /// 构建遍历时生成定义; 执行时按顺序与定义比对，不一致为上下文错误。
    /// 返回是否应真正执行。
    pub fn on_action_result(
        &mut self,
        mode: ExecutionMode,
        kind: ActionResultType,
        description: String,
    ) -> Result<bool> {
        debug!("on_action_result({}, {:?})", kind, description);

        if mode.is_building() {
            if self.stack.building.step_definition().is_none() {
                return Err(self.stack.context_error("没有正在构建的步骤").into());
            }
            if let Some(step) = self.stack.building.step_definition_mut() {
                step.add_action_result(ActionResultDefinition::new(kind, description));
            }
            return Ok(false);
        }

        if self.stack.current_step_execution().is_none() {
            return Err(self.stack.context_error("没有当前步骤执行").into());
        }
        self.end_current_action_result(mode);

        let depth = self.stack.size();
        let mismatch = match self.stack.current_step_definition_mut() {
            Some(step) => {
                let next = match step.executions.last_mut() {
                    Some(execution) => execution.next_action_result(),
                    None => return Err(ContextError::new("没有当前步骤执行").into()),
                };
                match step.actions_results.get_mut(next) {
                    Some(definition) if definition.matches(kind, &description) => {
                        self.logging.action_result(depth, definition);
                        if mode.do_execute() {
                            definition.executions.push(ActionResultExecution::new());
                        }
                        None
                    }
                    Some(definition) => Some(format!(
                        "动作/结果与构建时不一致: 定义为 {}, 执行时为 {} {:?}",
                        definition, kind, description
                    )),
                    None => Some(format!("构建时没有对应的动作/结果: {} {:?}", kind, description)),
                }
            }
            None => Some("没有当前步骤".to_string()),
        };

        match mismatch {
            Some(message) => Err(self.stack.context_error(message).into()),
            None => Ok(mode.do_execute()),
        }
    }

    /// 为当前动作/结果记录证据
    pub fn on_evidence(&mut self, mode: ExecutionMode, evidence: String) -> Result<()> {
        if mode.is_building() {
            return Err(self.stack.context_error("构建模式下不能记录证据").into());
        }

        let depth = self.stack.size();
        match self.stack.current_action_result_execution_mut() {
            Some(execution) => {
                self.logging.evidence(depth, &evidence);
                execution.evidence.push(evidence);
                Ok(())
            }
            None => Err(self.stack.context_error("没有当前动作/结果").into()),
        }
    }

    /// 错误与已知问题
    ///
    /// 构建遍历时已知问题登记到定义，其它错误使构建失败;
    /// 执行时按阈值记录为错误或警告，被忽略的已知问题直接丢弃。
    pub fn on_error(
        &mut self,
        mode: ExecutionMode,
        error: ErrorRef,
        originator: Option<Originator>,
    ) -> Result<()> {
        self.record_error(mode, error, originator, true)
    }

    /// `notify` 为 false 时不调用错误事件处理器 (错误来自错误事件处理器本身)
    fn record_error(
        &mut self,
        mode: ExecutionMode,
        error: ErrorRef,
        originator: Option<Originator>,
        notify: bool,
    ) -> Result<()> {
        if error.is_ignored(&self.policy) {
            debug!("忽略已知问题: {}", error);
            return Ok(());
        }
        if mode.is_building() {
            return self.register_build_issue(error, originator);
        }

        let error = self.canonical_error(error, originator);
        let Some(execution) = self.stack.current_scenario_execution() else {
            return Err(self.stack.context_error("没有当前场景执行").into());
        };
        if contains_error(&execution.errors, &error) || contains_error(&execution.warnings, &error) {
            debug!("错误已记录: {}", error);
            return Ok(());
        }

        let is_error = error.is_error(&self.policy);
        if !self.should_stop() {
            self.logging.error(self.stack.size(), &error, is_error);
        }
        if let Some(definition) = self.stack.current_scenario_definition_mut() {
            store_error(definition, &error, is_error);
        }
        if is_error && notify {
            self.call_handlers(mode, ScenarioEvent::Error, EventData::Error(error))?;
        }
        Ok(())
    }

    /// 中断: 记录 `KeyboardInterrupt` 错误
    fn on_interrupt(&mut self, mode: ExecutionMode) -> Result<()> {
        let error = match &self.interrupt_error {
            Some(error) => Arc::clone(error),
            None => {
                warn!("收到中断请求，停止执行");
                let exception = ExceptionError::new("KeyboardInterrupt", "执行被中断");
                let error = TestError::from(exception).into_ref();
                self.interrupt_error = Some(Arc::clone(&error));
                error
            }
        };
        self.on_error(mode, error, None)
    }

    fn register_build_issue(&mut self, error: ErrorRef, originator: Option<Originator>) -> Result<()> {
        if !error.is_known_issue() {
            let scenario = self
                .stack
                .building
                .scenario_definition()
                .map(|definition| definition.name.clone())
                .unwrap_or_default();
            return Err(ExecutorError::Build { scenario, error });
        }

        let Some(originator) = originator else {
            return Err(self.stack.context_error(format!("已知问题没有来源: {}", error)).into());
        };
        let target = self.stack.building.from_originator(originator);

        let known_issues = match (self.stack.building.scenario_definition_mut(), target) {
            (Some(definition), Originator::Scenario) => Some(&mut definition.known_issues),
            (Some(definition), Originator::Step(index)) => {
                definition.steps.get_mut(index).map(|step| &mut step.known_issues)
            }
            (None, _) => None,
        };
        match known_issues {
            Some(known_issues) => {
                if !known_issues.iter().any(|known| **known == *error) {
                    debug!("登记已知问题: {}", error);
                    known_issues.push(error);
                }
                Ok(())
            }
            None => Err(self.stack.context_error("没有正在构建的对象").into()),
        }
    }

    /// 结构上相同的已知问题复用已有的错误实例
    fn canonical_error(&self, error: ErrorRef, originator: Option<Originator>) -> ErrorRef {
        let Some(issue) = error.known_issue() else {
            return error;
        };

        let mut candidates: Vec<&ErrorRef> = Vec::new();
        if let Some(Originator::Step(_)) = originator {
            if let Some(step) = self.stack.current_step_definition() {
                candidates.extend(step.known_issues.iter());
            }
        }
        if let Some(definition) = self.stack.current_scenario_definition() {
            candidates.extend(definition.known_issues.iter());
            if let Some(execution) = &definition.execution {
                candidates.extend(execution.errors.iter());
                candidates.extend(execution.warnings.iter());
            }
        }

        let found = candidates
            .into_iter()
            .find(|candidate| candidate.known_issue() == Some(issue))
            .cloned();
        found.unwrap_or(error)
    }

    /// 当前场景是否应停止执行剩余步骤
    ///
    /// 中断总是停止，不受 continue_on_error 影响。
    pub fn should_stop(&self) -> bool {
        if self.is_interrupted() {
            return true;
        }
        let Some(definition) = self.stack.current_scenario_definition() else {
            return false;
        };
        let Some(execution) = &definition.execution else {
            return false;
        };
        if !execution.has_unexpected_error() {
            return false;
        }
        if definition.continue_on_error || self.config.scenario.continue_on_error {
            debug!("出现非预期错误，但配置为继续执行");
            return false;
        }
        true
    }

    /// 解析跳转目标，执行模式下要求唯一匹配
    pub fn goto(&mut self, mode: ExecutionMode, spec: StepSpec) -> Result<StepFlow> {
        if mode.is_building() {
            return Err(self
                .stack
                .context_error(format!("构建模式下不能跳转到 {}", spec))
                .into());
        }
        let Some(definition) = self.stack.current_scenario_definition() else {
            return Err(self.stack.context_error("没有当前场景").into());
        };

        let index = spec.resolve(definition, mode.do_execute())?;
        debug!("跳转到 {} (索引 {})", spec, index);
        Ok(StepFlow::Goto(StepTarget(index)))
    }

    /// 把结束的子场景挂接到父场景当前的动作/结果
    pub(crate) fn attach_subscenario(&mut self, definition: ScenarioDefinition) {
        match self.stack.current_action_result_execution_mut() {
            Some(execution) => execution.subscenarios.push(definition),
            None => debug!("没有当前动作/结果，不保留子场景 '{}' 的记录", definition.name),
        }
    }

    /// 补全已知问题的级别名称与 URL
    pub fn prepare_known_issue(&self, mut issue: KnownIssue) -> KnownIssue {
        issue.name_level(&self.config.issues.levels);
        if let Some(template) = &self.config.issues.url_template {
            issue.fill_url(template);
        }
        issue
    }

    /// 已知问题补全后与原来不同时替换为新实例，否则保留原实例
    fn prepare_error(&self, error: ErrorRef) -> ErrorRef {
        let Some(issue) = error.known_issue() else {
            return error;
        };
        let prepared = self.prepare_known_issue(issue.clone());
        let level_name = |issue: &KnownIssue| issue.level.as_ref().and_then(|level| level.name.clone());
        if prepared.url == issue.url && level_name(&prepared) == level_name(issue) {
            error
        } else {
            TestError::from(prepared).into_ref()
        }
    }

    // ========================================
    // 内部辅助
    // ========================================

    /// 正在遍历的场景: 构建模式下为构建上下文，否则为执行栈顶
    pub(crate) fn walked_scenario(&self, mode: ExecutionMode) -> Option<&ScenarioDefinition> {
        if mode.is_building() {
            self.stack.building.scenario_definition()
        } else {
            self.stack.current_scenario_definition()
        }
    }

    fn walked_step_mut(&mut self, mode: ExecutionMode, index: usize) -> Result<&mut StepDefinition> {
        let exists = self
            .walked_scenario(mode)
            .is_some_and(|definition| index < definition.steps.len());
        if !exists {
            return Err(self
                .stack
                .context_error(format!("步骤索引 {} 超出范围", index))
                .into());
        }

        let definition = if mode.is_building() {
            self.stack.building.scenario_definition_mut()
        } else {
            self.stack.current_scenario_definition_mut()
        };
        definition
            .and_then(|definition| definition.steps.get_mut(index))
            .ok_or_else(|| ExecutorError::Context(ContextError::new("步骤不存在")))
    }

    fn notify_known_issues(
        &mut self,
        known_issues: &[ErrorRef],
        originator: Originator,
        mode: ExecutionMode,
    ) -> Result<()> {
        if mode.is_building() {
            return Ok(());
        }
        for issue in known_issues {
            self.on_error(mode, Arc::clone(issue), Some(originator))?;
        }
        Ok(())
    }

    /// 调用事件处理器并处理它们的请求，返回当前步骤是否被取消
    fn call_handlers(&mut self, mode: ExecutionMode, event: ScenarioEvent, data: EventData) -> Result<bool> {
        let current = self
            .stack
            .current_scenario_definition()
            .map(|definition| definition.name.clone());
        let control = self.handlers.call_handlers(event, &data, current.as_deref());
        self.apply_handler_control(mode, event, control)
    }

    fn apply_handler_control(
        &mut self,
        mode: ExecutionMode,
        event: ScenarioEvent,
        control: HandlerControl,
    ) -> Result<bool> {
        if control.is_empty() {
            return Ok(false);
        }
        let (cancel_step, goto, errors) = control.into_parts();
        let notify = event != ScenarioEvent::Error;

        for error in errors {
            self.record_error(mode, error, None, notify)?;
        }

        if let Some(spec) = goto {
            match event {
                ScenarioEvent::BeforeStep | ScenarioEvent::AfterStep | ScenarioEvent::Error => {
                    let resolved = match self.stack.current_scenario_definition() {
                        Some(definition) => spec.resolve(definition, mode.do_execute()),
                        None => return Err(self.stack.context_error("没有当前场景").into()),
                    };
                    match resolved {
                        Ok(index) => {
                            debug!("事件处理器请求跳转到 {} (索引 {})", spec, index);
                            self.jump_to(StepTarget(index), mode)?;
                        }
                        Err(e) => {
                            let exception = ExceptionError::new("ExecutorError", e.to_string());
                            self.record_error(mode, TestError::from(exception).into_ref(), None, notify)?;
                        }
                    }
                }
                _ => warn!("{} 事件处理器不能跳转，忽略跳转到 {}", event, spec),
            }
        }

        if cancel_step && event != ScenarioEvent::BeforeStep {
            warn!("{} 事件处理器不能取消步骤，忽略", event);
        }
        Ok(cancel_step && event == ScenarioEvent::BeforeStep)
    }
}

impl fmt::Debug for ScenarioRunner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScenarioRunner")
            .field("config", &self.config)
            .field("stack_size", &self.stack.size())
            .field("handlers", &self.handlers)
            .finish()
    }
}

/// 记录到场景、当前步骤与当前动作/结果的执行记录
fn store_error(definition: &mut ScenarioDefinition, error: &ErrorRef, is_error: bool) {
    let select = |errors: &mut Vec<ErrorRef>, warnings: &mut Vec<ErrorRef>| {
        if is_error {
            push_unique(errors, error);
        } else {
            push_unique(warnings, error);
        }
    };

    let current_step = definition.current_step_index();
    if let Some(execution) = definition.execution.as_mut() {
        select(&mut execution.errors, &mut execution.warnings);
    }

    let Some(step) = current_step.and_then(|index| definition.steps.get_mut(index)) else {
        return;
    };
    let is_step_issue = contains_error(&step.known_issues, error);
    // 已结束的步骤执行不再追加错误
    let Some(step_execution) = step.executions.last_mut().filter(|execution| execution.time.end.is_none()) else {
        return;
    };
    select(&mut step_execution.errors, &mut step_execution.warnings);

    // 步骤级已知问题不记录到动作/结果
    if is_step_issue {
        return;
    }
    if let Some(action_result) = step_execution
        .current_action_result()
        .and_then(|index| step.actions_results.get_mut(index))
        .and_then(|definition| definition.executions.last_mut())
    {
        select(&mut action_result.errors, &mut action_result.warnings);
    }
}

fn panic_error(payload: &(dyn Any + Send)) -> TestError {
    let message = payload
        .downcast_ref::<&str>()
        .map(|message| message.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "未知 panic".to_string());
    TestError::from(ExceptionError::new("panic", message))
}
