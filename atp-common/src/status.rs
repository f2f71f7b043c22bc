//! 执行状态

use std::fmt;

use serde::{Deserialize, Serialize};

/// 场景执行状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExecutionStatus {
    Success,
    Warnings,
    Fail,
    Skipped,
    Unknown,
}

impl ExecutionStatus {
    /// 严重程度评分，用于按严重程度排序
    pub fn criticity(self) -> u8 {
        match self {
            Self::Success => 0,
            Self::Skipped => 1,
            Self::Warnings => 2,
            Self::Unknown => 3,
            Self::Fail => 4,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Success => "SUCCESS",
            Self::Warnings => "WARNINGS",
            Self::Fail => "FAIL",
            Self::Skipped => "SKIPPED",
            Self::Unknown => "UNKNOWN",
        }
    }
}

impl fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
