//! 场景事件处理器
//!
//! 处理器按安装顺序同步调用。处理器失败 (返回错误或 panic) 只记录警告，
//! 不影响其它处理器，也不影响场景执行。
//!
//! 处理器通过 [`HandlerControl`] 向执行器提出请求 (记录错误、跳转、取消步骤)，
//! 全部处理器返回后由执行器统一处理。

use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::rc::Rc;

use tracing::{debug, warn};

use atp_common::{ErrorRef, TestError};

use crate::step_spec::StepSpec;

/// 场景事件
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScenarioEvent {
    BeforeTest,
    BeforeStep,
    Error,
    AfterStep,
    AfterTest,
}

impl fmt::Display for ScenarioEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::BeforeTest => "scenario.before-test",
            Self::BeforeStep => "scenario.before-step",
            Self::Error => "scenario.error",
            Self::AfterStep => "scenario.after-step",
            Self::AfterTest => "scenario.after-test",
        };
        f.write_str(name)
    }
}

/// 事件数据
#[derive(Debug, Clone)]
pub enum EventData {
    Scenario { name: String, depth: usize },
    Step { scenario: String, number: usize, name: String },
    Error(ErrorRef),
}

/// 处理器对执行器的请求
///
/// 失败的处理器提出的请求被丢弃。
#[derive(Debug, Default)]
pub struct HandlerControl {
    cancel_step: bool,
    goto: Option<StepSpec>,
    errors: Vec<ErrorRef>,
}

impl HandlerControl {
    pub fn new() -> Self {
        Self::default()
    }

    /// 取消即将执行的步骤，只对 before-step 事件有效
    pub fn cancel_step(&mut self) {
        self.cancel_step = true;
    }

    /// 跳转到指定步骤，只对步骤事件与错误事件有效; 多次请求时最后一次生效
    pub fn goto(&mut self, spec: impl Into<StepSpec>) {
        self.goto = Some(spec.into());
    }

    /// 为当前场景记录错误
    pub fn error(&mut self, error: impl Into<TestError>) {
        let error: TestError = error.into();
        self.errors.push(error.into_ref());
    }

    /// 记录已有的错误实例
    pub fn error_ref(&mut self, error: ErrorRef) {
        self.errors.push(error);
    }

    pub fn is_step_cancelled(&self) -> bool {
        self.cancel_step
    }

    pub fn goto_target(&self) -> Option<&StepSpec> {
        self.goto.as_ref()
    }

    pub fn errors(&self) -> &[ErrorRef] {
        &self.errors
    }

    pub fn is_empty(&self) -> bool {
        !self.cancel_step && self.goto.is_none() && self.errors.is_empty()
    }

    fn merge(&mut self, other: HandlerControl) {
        self.cancel_step |= other.cancel_step;
        if other.goto.is_some() {
            self.goto = other.goto;
        }
        self.errors.extend(other.errors);
    }

    pub(crate) fn into_parts(self) -> (bool, Option<StepSpec>, Vec<ErrorRef>) {
        (self.cancel_step, self.goto, self.errors)
    }
}

type HandlerFn = Rc<dyn Fn(ScenarioEvent, &EventData, &mut HandlerControl) -> anyhow::Result<()>>;

/// 处理器标识
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HandlerId(u64);

/// 安装选项
#[derive(Debug, Clone, Default)]
pub struct HandlerOptions {
    /// 只在该场景为当前场景时调用
    pub scenario: Option<String>,

    /// 插入到已有处理器之前
    pub first: bool,

    /// 第一次调用后自动卸载
    pub once: bool,
}

impl HandlerOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_scenario(mut self, scenario: impl Into<String>) -> Self {
        self.scenario = Some(scenario.into());
        self
    }

    pub fn first(mut self) -> Self {
        self.first = true;
        self
    }

    pub fn once(mut self) -> Self {
        self.once = true;
        self
    }
}

struct Handler {
    id: HandlerId,
    event: ScenarioEvent,
    callback: HandlerFn,
    scenario: Option<String>,
    once: bool,
}

/// 处理器注册表
#[derive(Default)]
pub struct Handlers {
    handlers: Vec<Handler>,
    next_id: u64,
}

impl Handlers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn install<F>(&mut self, event: ScenarioEvent, callback: F) -> HandlerId
    where
        F: Fn(ScenarioEvent, &EventData, &mut HandlerControl) -> anyhow::Result<()> + 'static,
    {
        self.install_with(event, callback, HandlerOptions::default())
    }

    pub fn install_with<F>(&mut self, event: ScenarioEvent, callback: F, options: HandlerOptions) -> HandlerId
    where
        F: Fn(ScenarioEvent, &EventData, &mut HandlerControl) -> anyhow::Result<()> + 'static,
    {
        self.next_id += 1;
        let id = HandlerId(self.next_id);
        let handler = Handler {
            id,
            event,
            callback: Rc::new(callback),
            scenario: options.scenario,
            once: options.once,
        };

        if options.first {
            self.handlers.insert(0, handler);
        } else {
            self.handlers.push(handler);
        }
        debug!("安装事件处理器 {:?}: {}", id, event);
        id
    }

    pub fn uninstall(&mut self, id: HandlerId) -> bool {
        let before = self.handlers.len();
        self.handlers.retain(|handler| handler.id != id);
        before != self.handlers.len()
    }

    /// 卸载某个事件的全部处理器
    pub fn uninstall_event(&mut self, event: ScenarioEvent) -> usize {
        let before = self.handlers.len();
        self.handlers.retain(|handler| handler.event != event);
        before - self.handlers.len()
    }

    pub fn count(&self, event: ScenarioEvent) -> usize {
        self.handlers.iter().filter(|handler| handler.event == event).count()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    /// 调用事件处理器
    ///
    /// `current_scenario` 为当前场景名称，用于过滤绑定到场景的处理器。
    /// 返回成功返回的处理器提出的请求。
    pub fn call_handlers(
        &mut self,
        event: ScenarioEvent,
        data: &EventData,
        current_scenario: Option<&str>,
    ) -> HandlerControl {
        let mut control = HandlerControl::new();
        let selected: Vec<(HandlerId, HandlerFn, bool)> = self
            .handlers
            .iter()
            .filter(|handler| handler.event == event)
            .filter(|handler| match &handler.scenario {
                Some(scenario) => current_scenario == Some(scenario.as_str()),
                None => true,
            })
            .map(|handler| (handler.id, Rc::clone(&handler.callback), handler.once))
            .collect();

        if selected.is_empty() {
            return control;
        }
        debug!("调用 {} 个 {} 事件处理器", selected.len(), event);

        // once 处理器在调用前卸载
        for (id, _, once) in &selected {
            if *once {
                self.uninstall(*id);
            }
        }

        for (id, callback, _) in selected {
            let mut requests = HandlerControl::new();
            match panic::catch_unwind(AssertUnwindSafe(|| callback(event, data, &mut requests))) {
                Ok(Ok(())) => control.merge(requests),
                Ok(Err(e)) => warn!("事件处理器 {:?} ({}) 失败: {:#}", id, event, e),
                Err(_) => warn!("事件处理器 {:?} ({}) 发生 panic", id, event),
            }
        }
        control
    }
}

impl fmt::Debug for Handlers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Handlers")
            .field("count", &self.handlers.len())
            .finish()
    }
}
