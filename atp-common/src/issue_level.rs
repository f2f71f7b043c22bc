//! 问题级别与阈值策略

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::{CommonError, Result};

/// 问题级别
///
/// 数值决定比较结果，名称只用于显示。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IssueLevel {
    /// 级别数值
    pub value: i64,

    /// 级别名称 (可选)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl IssueLevel {
    pub fn new(value: i64) -> Self {
        Self { value, name: None }
    }

    pub fn named(name: impl Into<String>, value: i64) -> Self {
        Self {
            value,
            name: Some(name.into()),
        }
    }
}

impl From<i64> for IssueLevel {
    fn from(value: i64) -> Self {
        Self::new(value)
    }
}

impl PartialEq for IssueLevel {
    fn eq(&self, other: &Self) -> bool {
        self.value == other.value
    }
}

impl Eq for IssueLevel {}

impl PartialOrd for IssueLevel {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for IssueLevel {
    fn cmp(&self, other: &Self) -> Ordering {
        self.value.cmp(&other.value)
    }
}

impl fmt::Display for IssueLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.name {
            Some(name) => write!(f, "{}={}", name, self.value),
            None => write!(f, "{}", self.value),
        }
    }
}

/// 配置中的级别写法: 数值或名称
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum IssueLevelSpec {
    Value(i64),
    Name(String),
}

impl FromStr for IssueLevelSpec {
    type Err = CommonError;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        if s.is_empty() {
            return Err(CommonError::InvalidLevel(s.to_string()));
        }
        Ok(match s.parse::<i64>() {
            Ok(value) => Self::Value(value),
            Err(_) => Self::Name(s.to_string()),
        })
    }
}

impl From<i64> for IssueLevelSpec {
    fn from(value: i64) -> Self {
        Self::Value(value)
    }
}

impl fmt::Display for IssueLevelSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Value(value) => write!(f, "{}", value),
            Self::Name(name) => f.write_str(name),
        }
    }
}

/// 命名问题级别表 (名称 -> 数值)
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct IssueLevels {
    names: BTreeMap<String, i64>,
}

impl IssueLevels {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_level(mut self, name: impl Into<String>, value: i64) -> Self {
        self.define(name, value);
        self
    }

    /// 定义 (或重新定义) 一个命名级别
    pub fn define(&mut self, name: impl Into<String>, value: i64) {
        self.names.insert(name.into(), value);
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    /// 按名称查找数值 (忽略大小写)
    pub fn value_of(&self, name: &str) -> Option<i64> {
        self.names.get(name).copied().or_else(|| {
            self.names
                .iter()
                .find(|(known, _)| known.eq_ignore_ascii_case(name))
                .map(|(_, value)| *value)
        })
    }

    /// 按数值查找名称
    pub fn name_of(&self, value: i64) -> Option<&str> {
        self.names
            .iter()
            .find(|(_, known)| **known == value)
            .map(|(name, _)| name.as_str())
    }

    /// 由数值构造级别，已命名的数值带上名称
    pub fn level(&self, value: i64) -> IssueLevel {
        match self.name_of(value) {
            Some(name) => IssueLevel::named(name, value),
            None => IssueLevel::new(value),
        }
    }

    /// 解析配置中的级别写法
    pub fn resolve(&self, spec: &IssueLevelSpec) -> Result<IssueLevel> {
        match spec {
            IssueLevelSpec::Value(value) => Ok(self.level(*value)),
            IssueLevelSpec::Name(name) => match name.parse::<i64>() {
                Ok(value) => Ok(self.level(value)),
                Err(_) => self
                    .value_of(name)
                    .map(|value| self.level(value))
                    .ok_or_else(|| CommonError::UnknownLevelName(name.clone())),
            },
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, i64)> {
        self.names.iter().map(|(name, value)| (name.as_str(), *value))
    }
}

/// 问题级别阈值策略
///
/// 分类在读取时计算，同一个已知问题在阈值改变后可能得到不同的分类。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IssuePolicy {
    /// 错误阈值: 级别 >= 阈值 视为错误
    pub error_threshold: Option<i64>,

    /// 忽略阈值: 级别 <= 阈值 视为忽略
    pub ignored_threshold: Option<i64>,

    /// 设置了错误阈值时，无级别的已知问题是否视为错误
    pub unleveled_is_error: bool,
}

impl Default for IssuePolicy {
    fn default() -> Self {
        Self {
            error_threshold: None,
            ignored_threshold: None,
            unleveled_is_error: true,
        }
    }
}

impl IssuePolicy {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_error_threshold(mut self, threshold: i64) -> Self {
        self.error_threshold = Some(threshold);
        self
    }

    pub fn with_ignored_threshold(mut self, threshold: i64) -> Self {
        self.ignored_threshold = Some(threshold);
        self
    }

    pub fn with_unleveled_is_error(mut self, unleveled_is_error: bool) -> Self {
        self.unleveled_is_error = unleveled_is_error;
        self
    }

    pub fn is_error(&self, level: Option<i64>) -> bool {
        match (self.error_threshold, level) {
            (None, _) => false,
            (Some(_), None) => self.unleveled_is_error,
            (Some(threshold), Some(level)) => level >= threshold,
        }
    }

    pub fn is_ignored(&self, level: Option<i64>) -> bool {
        if self.is_error(level) {
            return false;
        }
        match (self.ignored_threshold, level) {
            (Some(threshold), Some(level)) => level <= threshold,
            _ => false,
        }
    }

    pub fn is_warning(&self, level: Option<i64>) -> bool {
        !self.is_error(level) && !self.is_ignored(level)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_level_display() {
        assert_eq!(IssueLevel::new(5).to_string(), "5");
        assert_eq!(IssueLevel::named("SUT", 40).to_string(), "SUT=40");
        assert_eq!(IssueLevel::named("SUT", 40), IssueLevel::new(40));
    }

    #[test]
    fn test_level_spec_parse() {
        assert_eq!("12".parse::<IssueLevelSpec>().unwrap(), IssueLevelSpec::Value(12));
        assert_eq!(
            "context".parse::<IssueLevelSpec>().unwrap(),
            IssueLevelSpec::Name("context".to_string())
        );
        assert!("  ".parse::<IssueLevelSpec>().is_err());
    }

    #[test]
    fn test_named_levels_resolve() {
        let levels = IssueLevels::new().with_level("SUT", 40).with_level("CONTEXT", 10);

        assert_eq!(levels.value_of("sut"), Some(40));
        assert_eq!(levels.name_of(10), Some("CONTEXT"));

        let level = levels.resolve(&IssueLevelSpec::Name("SUT".to_string())).unwrap();
        assert_eq!(level.value, 40);
        assert_eq!(level.name.as_deref(), Some("SUT"));

        let level = levels.resolve(&IssueLevelSpec::Value(10)).unwrap();
        assert_eq!(level.to_string(), "CONTEXT=10");

        let err = levels.resolve(&IssueLevelSpec::Name("UNKNOWN".to_string()));
        assert_eq!(err, Err(CommonError::UnknownLevelName("UNKNOWN".to_string())));
    }

    #[test]
    fn test_policy_without_thresholds() {
        let policy = IssuePolicy::default();
        for level in [None, Some(-5), Some(0), Some(100)] {
            assert!(!policy.is_error(level));
            assert!(!policy.is_ignored(level));
            assert!(policy.is_warning(level));
        }
    }

    #[test]
    fn test_policy_unleveled_issue_is_error_once_threshold_set() {
        let policy = IssuePolicy::new().with_error_threshold(20);
        assert!(policy.is_error(None));

        let relaxed = policy.clone().with_unleveled_is_error(false);
        assert!(!relaxed.is_error(None));
        assert!(relaxed.is_warning(None));
    }

    #[test]
    fn test_policy_thresholds() {
        let policy = IssuePolicy::new()
            .with_error_threshold(20)
            .with_ignored_threshold(10);

        assert!(policy.is_error(Some(20)));
        assert!(policy.is_error(Some(30)));
        assert!(policy.is_warning(Some(15)));
        assert!(policy.is_ignored(Some(10)));
        assert!(policy.is_ignored(Some(5)));
    }

    #[test]
    fn test_policy_partition_is_total() {
        let thresholds = [None, Some(-10), Some(0), Some(10), Some(50)];
        let levels = [None, Some(-20), Some(-10), Some(0), Some(5), Some(10), Some(49), Some(50), Some(99)];

        for error_threshold in thresholds {
            for ignored_threshold in thresholds {
                for unleveled_is_error in [true, false] {
                    let policy = IssuePolicy {
                        error_threshold,
                        ignored_threshold,
                        unleveled_is_error,
                    };
                    for level in levels {
                        let flags = [
                            policy.is_error(level),
                            policy.is_ignored(level),
                            policy.is_warning(level),
                        ];
                        assert_eq!(
                            flags.iter().filter(|f| **f).count(),
                            1,
                            "policy={:?} level={:?}",
                            policy,
                            level
                        );
                    }
                }
            }
        }
    }
}
