//! ATP 执行器
//!
//! 测试场景执行引擎: 把声明式的场景定义 (步骤、动作、预期结果) 变成一次可重入的执行。
//!
//! 一次执行分为构建遍历 (生成动作/结果定义与定义级已知问题) 与真正执行 (或仅文档模式) 两个阶段，
//! 嵌套的子场景通过同一个 [`ScenarioRunner`] 递归执行。

pub mod config;
pub mod context;
pub mod execution;
pub mod handlers;
pub mod logging;
pub mod report;
pub mod results;
pub mod runner;
pub mod scenario;
pub mod section;
pub mod stack;
pub mod step_spec;

pub use atp_common::{
    CodeLocation, ErrorCode, ErrorRef, ExceptionError, ExecutionStatus, IssueLevel, IssueLevelSpec,
    IssueLevels, IssuePolicy, KnownIssue, TestError,
};
pub use config::{DebugClass, ScenarioConfig};
pub use context::{StepContext, StepFlow, StepTarget};
pub use execution::{
    ActionResultExecution, CriticityKey, ExecTotalStats, ScenarioExecution, StepExecution,
    TimeStats,
};
pub use handlers::{EventData, HandlerControl, HandlerId, HandlerOptions, Handlers, ScenarioEvent};
pub use logging::ScenarioLogging;
pub use report::{ScenarioReport, StepReport};
pub use results::{ScenarioResult, ScenarioResults};
pub use runner::{ExecutionMode, ScenarioRunner};
pub use scenario::{
    ActionResultDefinition, ActionResultType, ScenarioDefinition, StepBody, StepDefinition,
};
pub use section::SectionSkip;
pub use stack::{BuildingContext, ContextError, Originator, ScenarioStack};
pub use step_spec::StepSpec;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ExecutorError {
    #[error("上下文错误: {0}")]
    Context(#[from] ContextError),

    #[error("场景 '{scenario}' 构建失败: {error}")]
    Build { scenario: String, error: ErrorRef },

    #[error("子场景 '{scenario}' 失败: {error}")]
    SubScenarioFailed { scenario: String, error: ErrorRef },

    #[error("找不到步骤: {0}")]
    StepNotFound(String),

    #[error("步骤规格 {spec} 匹配到 {count} 个步骤")]
    AmbiguousStep { spec: String, count: usize },

    #[error("配置错误: {0}")]
    ConfigError(String),

    #[error("问题级别错误: {0}")]
    LevelError(#[from] atp_common::CommonError),

    #[error("IO 错误: {0}")]
    IoError(#[from] std::io::Error),

    #[error("序列化错误: {0}")]
    SerdeError(#[from] serde_json::Error),

    #[error("YAML 序列化错误: {0}")]
    YamlError(#[from] serde_yaml::Error),
}

impl ExecutorError {
    /// 上下文错误表示框架不变量被破坏，总是终止整个运行
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Context(_))
    }

    /// 对应的进程退出码
    pub fn error_code(&self) -> ErrorCode {
        match self {
            Self::ConfigError(_) | Self::LevelError(_) => ErrorCode::ArgumentsError,
            Self::IoError(_) => ErrorCode::EnvironmentError,
            Self::SerdeError(_) | Self::YamlError(_) => ErrorCode::InputFormatError,
            Self::SubScenarioFailed { .. } => ErrorCode::TestError,
            _ => ErrorCode::InternalError,
        }
    }
}

pub type Result<T> = std::result::Result<T, ExecutorError>;
