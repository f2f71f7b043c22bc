//! 已知问题

use std::fmt;
use std::panic::Location;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::{CommonError, IssueLevel, IssueLevels, IssuePolicy, Result};

/// 源代码位置
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CodeLocation {
    pub file: String,
    pub line: u32,
    pub column: u32,
}

impl CodeLocation {
    pub fn new(file: impl Into<String>, line: u32, column: u32) -> Self {
        Self {
            file: file.into(),
            line,
            column,
        }
    }

    /// 调用者所在位置
    #[track_caller]
    pub fn caller() -> Self {
        Location::caller().into()
    }
}

impl From<&Location<'_>> for CodeLocation {
    fn from(location: &Location<'_>) -> Self {
        Self::new(location.file(), location.line(), location.column())
    }
}

impl fmt::Display for CodeLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.file, self.line, self.column)
    }
}

// 固定的模式，编译失败只可能是代码错误
static ISSUE_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^Issue(\((?:([^=()]+)=)?(-?\d+)\))? *(.*)! (.*)$").expect("已知问题正则表达式无效")
});

/// 已知问题
///
/// 相等性是结构化的: 级别数值、标识、消息与位置都相同即视为同一个问题。
/// URL 不参与比较。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KnownIssue {
    pub message: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub level: Option<IssueLevel>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<CodeLocation>,
}

impl KnownIssue {
    /// 创建已知问题，记录调用位置
    #[track_caller]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            level: None,
            id: None,
            url: None,
            location: Some(CodeLocation::caller()),
        }
    }

    pub fn with_level(mut self, level: impl Into<IssueLevel>) -> Self {
        self.level = Some(level.into());
        self
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    pub fn with_location(mut self, location: Option<CodeLocation>) -> Self {
        self.location = location;
        self
    }

    pub fn level_value(&self) -> Option<i64> {
        self.level.as_ref().map(|level| level.value)
    }

    /// 用命名级别表补全级别名称
    pub fn name_level(&mut self, levels: &IssueLevels) {
        if let Some(level) = &self.level {
            if level.name.is_none() {
                self.level = Some(levels.level(level.value));
            }
        }
    }

    /// 按 URL 模板补全 URL (`{id}` 替换为问题标识)
    pub fn fill_url(&mut self, template: &str) {
        if self.url.is_none() {
            if let Some(id) = &self.id {
                self.url = Some(template.replace("{id}", id));
            }
        }
    }

    pub fn is_error(&self, policy: &IssuePolicy) -> bool {
        policy.is_error(self.level_value())
    }

    pub fn is_ignored(&self, policy: &IssuePolicy) -> bool {
        policy.is_ignored(self.level_value())
    }

    pub fn is_warning(&self, policy: &IssuePolicy) -> bool {
        policy.is_warning(self.level_value())
    }

    /// 解析 `Issue(NAME=10) ID! message` 形式的文本
    pub fn parse(text: &str) -> Result<Self> {
        let captures = ISSUE_PATTERN
            .captures(text.trim())
            .ok_or_else(|| CommonError::InvalidKnownIssue(text.to_string()))?;

        let level = match captures.get(3) {
            Some(value) => {
                let value: i64 = value
                    .as_str()
                    .parse()
                    .map_err(|_| CommonError::InvalidLevel(value.as_str().to_string()))?;
                Some(match captures.get(2) {
                    Some(name) => IssueLevel::named(name.as_str(), value),
                    None => IssueLevel::new(value),
                })
            }
            None => None,
        };
        let id = captures
            .get(4)
            .map(|id| id.as_str().trim())
            .filter(|id| !id.is_empty())
            .map(str::to_string);

        Ok(Self {
            message: captures.get(5).map(|m| m.as_str().to_string()).unwrap_or_default(),
            level,
            id,
            url: None,
            location: None,
        })
    }
}

impl PartialEq for KnownIssue {
    fn eq(&self, other: &Self) -> bool {
        self.level == other.level
            && self.id == other.id
            && self.message == other.message
            && self.location == other.location
    }
}

impl Eq for KnownIssue {}

impl fmt::Display for KnownIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Issue")?;
        if let Some(level) = &self.level {
            write!(f, "({})", level)?;
        }
        if let Some(id) = &self.id {
            write!(f, " {}", id)?;
        }
        write!(f, "! {}", self.message)
    }
}
