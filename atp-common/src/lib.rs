//! ATP 通用类型定义
//!
//! 此 crate 包含场景执行引擎、报告与命令行之间共享的类型:
//! - 测试错误 (`TestError`)、已知问题 (`KnownIssue`) 与异常错误 (`ExceptionError`)
//! - 问题级别 (`IssueLevel`)、命名级别表 (`IssueLevels`) 与阈值策略 (`IssuePolicy`)
//! - 执行状态 (`ExecutionStatus`) 与进程退出码 (`ErrorCode`)

mod error_code;
mod issue_level;
mod known_issue;
mod status;
mod test_error;

pub use error_code::ErrorCode;
pub use issue_level::{IssueLevel, IssueLevelSpec, IssueLevels, IssuePolicy};
pub use known_issue::{CodeLocation, KnownIssue};
pub use status::ExecutionStatus;
pub use test_error::{ErrorRef, ExceptionError, TestError};

use thiserror::Error;

/// 通用类型错误
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CommonError {
    #[error("未知的问题级别名称: {0}")]
    UnknownLevelName(String),

    #[error("无效的问题级别: {0}")]
    InvalidLevel(String),

    #[error("无效的已知问题文本: {0}")]
    InvalidKnownIssue(String),
}

pub type Result<T> = std::result::Result<T, CommonError>;
