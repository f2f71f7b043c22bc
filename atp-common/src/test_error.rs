//! 测试错误

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{CodeLocation, IssuePolicy, KnownIssue};

/// 共享的错误句柄
///
/// 同一个错误可以同时出现在场景、步骤与动作/结果的执行记录中，
/// 是否为同一个错误按指针比较 (`Arc::ptr_eq`)。
pub type ErrorRef = Arc<TestError>;

/// 测试用户代码抛出的未预料错误
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExceptionError {
    /// 错误类型名称
    pub exception_type: String,

    pub message: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<CodeLocation>,

    /// 错误原因链
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub chain: Vec<String>,
}

impl ExceptionError {
    pub fn new(exception_type: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            exception_type: exception_type.into(),
            message: message.into(),
            location: None,
            chain: Vec::new(),
        }
    }

    pub fn with_location(mut self, location: CodeLocation) -> Self {
        self.location = Some(location);
        self
    }

    pub fn with_chain<I, S>(mut self, chain: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.chain = chain.into_iter().map(Into::into).collect();
        self
    }
}

impl fmt::Display for ExceptionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.exception_type, self.message)
    }
}

/// 测试错误
///
/// 普通错误与异常错误总是错误; 已知问题按 [`IssuePolicy`] 分类为错误、警告或忽略。
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum TestError {
    #[error("{message}")]
    Error {
        message: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        location: Option<CodeLocation>,
    },

    #[error("{0}")]
    KnownIssue(KnownIssue),

    #[error("{0}")]
    Exception(ExceptionError),
}

impl TestError {
    /// 创建普通测试错误，记录调用位置
    #[track_caller]
    pub fn new(message: impl Into<String>) -> Self {
        Self::Error {
            message: message.into(),
            location: Some(CodeLocation::caller()),
        }
    }

    pub fn message(&self) -> &str {
        match self {
            Self::Error { message, .. } => message,
            Self::KnownIssue(issue) => &issue.message,
            Self::Exception(exception) => &exception.message,
        }
    }

    pub fn location(&self) -> Option<&CodeLocation> {
        match self {
            Self::Error { location, .. } => location.as_ref(),
            Self::KnownIssue(issue) => issue.location.as_ref(),
            Self::Exception(exception) => exception.location.as_ref(),
        }
    }

    pub fn known_issue(&self) -> Option<&KnownIssue> {
        match self {
            Self::KnownIssue(issue) => Some(issue),
            _ => None,
        }
    }

    pub fn is_known_issue(&self) -> bool {
        matches!(self, Self::KnownIssue(_))
    }

    /// 问题级别数值，普通错误没有级别
    pub fn level(&self) -> Option<i64> {
        self.known_issue().and_then(KnownIssue::level_value)
    }

    pub fn is_error(&self, policy: &IssuePolicy) -> bool {
        match self {
            Self::KnownIssue(issue) => issue.is_error(policy),
            _ => true,
        }
    }

    pub fn is_ignored(&self, policy: &IssuePolicy) -> bool {
        match self {
            Self::KnownIssue(issue) => issue.is_ignored(policy),
            _ => false,
        }
    }

    pub fn is_warning(&self, policy: &IssuePolicy) -> bool {
        match self {
            Self::KnownIssue(issue) => issue.is_warning(policy),
            _ => false,
        }
    }

    pub fn into_ref(self) -> ErrorRef {
        Arc::new(self)
    }
}

impl From<KnownIssue> for TestError {
    fn from(issue: KnownIssue) -> Self {
        Self::KnownIssue(issue)
    }
}

impl From<ExceptionError> for TestError {
    fn from(exception: ExceptionError) -> Self {
        Self::Exception(exception)
    }
}
