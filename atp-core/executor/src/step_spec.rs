//! 步骤规格: 按编号、名称或 (名称, 序号) 指定步骤

use std::fmt;

use crate::scenario::{ScenarioDefinition, StepDefinition};
use crate::{ExecutorError, Result};

/// 步骤规格
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepSpec {
    /// 步骤编号，从 1 开始，不计分节标记
    Number(usize),

    /// 步骤名称 (后缀匹配)
    Name(String),

    /// 名称匹配结果中的第几个 (从 0 开始)
    NameAt(String, usize),
}

impl StepSpec {
    pub fn matches(&self, step: &StepDefinition) -> bool {
        match self {
            Self::Number(number) => step.number() == Some(*number),
            Self::Name(name) | Self::NameAt(name, _) => step.name().ends_with(name.as_str()),
        }
    }

    /// 在场景中解析步骤索引
    ///
    /// 严格模式下名称匹配到多个步骤是错误，否则取最后一个。
    pub fn resolve(&self, scenario: &ScenarioDefinition, strict: bool) -> Result<usize> {
        let matches: Vec<usize> = scenario
            .steps
            .iter()
            .enumerate()
            .filter(|(_, step)| self.matches(step))
            .map(|(index, _)| index)
            .collect();

        let found = match self {
            Self::NameAt(_, position) => matches.get(*position).copied(),
            _ => {
                if strict && matches.len() > 1 {
                    return Err(ExecutorError::AmbiguousStep {
                        spec: self.to_string(),
                        count: matches.len(),
                    });
                }
                matches.last().copied()
            }
        };

        found.ok_or_else(|| ExecutorError::StepNotFound(format!("{} (场景 '{}')", self, scenario.name)))
    }
}

impl fmt::Display for StepSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Number(number) => write!(f, "step#{}", number),
            Self::Name(name) => write!(f, "{:?}", name),
            Self::NameAt(name, position) => write!(f, "{:?}[{}]", name, position),
        }
    }
}

impl From<usize> for StepSpec {
    fn from(number: usize) -> Self {
        Self::Number(number)
    }
}

impl From<&str> for StepSpec {
    fn from(name: &str) -> Self {
        Self::Name(name.to_string())
    }
}

impl From<String> for StepSpec {
    fn from(name: String) -> Self {
        Self::Name(name)
    }
}

impl From<(&str, usize)> for StepSpec {
    fn from((name, position): (&str, usize)) -> Self {
        Self::NameAt(name.to_string(), position)
    }
}
