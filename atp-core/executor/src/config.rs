//! 场景执行配置
//!
//! 支持从多个源加载配置:
//! - 环境变量 (优先级最高)
//! - 配置文件 (TOML/YAML/JSON)
//! - 默认值 (优先级最低)
//!
//! 配置文件搜索路径 (按优先级):
//! 1. `ATP_SCENARIO_CONFIG` 环境变量指定的路径
//! 2. `./scenario.toml` / `./scenario.yaml` / `./scenario.json` (当前目录)
//! 3. `./tests/scenario.toml` / `./tests/scenario.yaml` (tests 目录)
//! 4. `~/.config/atp/scenario.toml` (用户配置目录)
//! 5. `/etc/atp/scenario.toml` (系统配置目录)

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::env;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use atp_common::{IssueLevelSpec, IssueLevels, IssuePolicy};

use crate::ExecutorError;

// ============================================
// 核心配置结构
// ============================================

/// 场景执行配置 (顶层)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScenarioConfig {
    /// 环境配置
    #[serde(default)]
    pub environment: EnvironmentConfig,

    /// 场景执行行为
    #[serde(default)]
    pub scenario: ScenarioBehaviorConfig,

    /// 已知问题分类
    #[serde(default)]
    pub issues: IssuesConfig,

    /// 调试输出
    #[serde(default)]
    pub debug: DebugConfig,
}

/// 环境配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnvironmentConfig {
    /// 日志级别 (trace/debug/info/warn/error)
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

/// 场景执行行为配置
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScenarioBehaviorConfig {
    /// 出现非预期错误后继续执行剩余步骤
    #[serde(default)]
    pub continue_on_error: bool,

    /// 步骤之间的等待时间 (秒)
    #[serde(default)]
    pub delay_between_steps: f64,

    /// 主场景必须定义的属性
    #[serde(default)]
    pub expected_attributes: Vec<String>,

    /// 仅输出文档，不执行测试动作
    #[serde(default)]
    pub doc_only: bool,
}

/// 已知问题配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IssuesConfig {
    /// 命名级别 (名称 -> 数值)
    #[serde(default)]
    pub levels: IssueLevels,

    /// 错误阈值 (数值或级别名称)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_threshold: Option<IssueLevelSpec>,

    /// 忽略阈值 (数值或级别名称)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ignored_threshold: Option<IssueLevelSpec>,

    /// 设置错误阈值时，无级别的已知问题视为错误
    #[serde(default = "default_unleveled_is_error")]
    pub unleveled_is_error: bool,

    /// 问题 URL 模板，`{id}` 替换为问题标识
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url_template: Option<String>,
}

/// 调试输出配置
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DebugConfig {
    /// 开启调试日志的模块
    #[serde(default)]
    pub classes: Vec<DebugClass>,
}

/// 可单独开启调试日志的模块
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DebugClass {
    ScenarioRunner,
    ScenarioStack,
    Handlers,
    Execution,
    Config,
}

impl DebugClass {
    pub const ALL: [DebugClass; 5] = [
        Self::ScenarioRunner,
        Self::ScenarioStack,
        Self::Handlers,
        Self::Execution,
        Self::Config,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::ScenarioRunner => "scenario-runner",
            Self::ScenarioStack => "scenario-stack",
            Self::Handlers => "handlers",
            Self::Execution => "execution",
            Self::Config => "config",
        }
    }

    /// 对应的 tracing target
    pub fn target(self) -> &'static str {
        match self {
            Self::ScenarioRunner => "atp_executor::runner",
            Self::ScenarioStack => "atp_executor::stack",
            Self::Handlers => "atp_executor::handlers",
            Self::Execution => "atp_executor::execution",
            Self::Config => "atp_executor::config",
        }
    }
}

impl fmt::Display for DebugClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DebugClass {
    type Err = ExecutorError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|class| class.as_str() == s.trim())
            .ok_or_else(|| ExecutorError::ConfigError(format!("未知的调试模块: {}", s)))
    }
}

// ============================================
// 默认值函数
// ============================================

fn default_log_level() -> String {
    "info".to_string()
}

fn default_unleveled_is_error() -> bool {
    true
}

const LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

// ============================================
// Default 实现
// ============================================

impl Default for EnvironmentConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
        }
    }
}

impl Default for IssuesConfig {
    fn default() -> Self {
        Self {
            levels: IssueLevels::default(),
            error_threshold: None,
            ignored_threshold: None,
            unleveled_is_error: default_unleveled_is_error(),
            url_template: None,
        }
    }
}

// ============================================
// 配置加载实现
// ============================================

impl ScenarioConfig {
    /// 从多个源加载配置 (优先级: 环境变量 > 配置文件 > 默认值)
    pub fn load() -> Result<Self> {
        let mut config = match Self::find_config_file() {
            Some(path) => {
                tracing::debug!("加载配置文件: {:?}", path);
                Self::load_from_file(&path)?
            }
            None => {
                tracing::debug!("未找到配置文件，使用默认配置");
                Self::default()
            }
        };

        config.apply_env_vars()?;
        Ok(config)
    }

    /// 从指定文件加载配置
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;

        let config = match path.extension().and_then(|s| s.to_str()) {
            Some("toml") => toml::from_str(&content)
                .with_context(|| format!("Failed to parse TOML config: {:?}", path))?,
            Some("yaml") | Some("yml") => serde_yaml::from_str(&content)
                .with_context(|| format!("Failed to parse YAML config: {:?}", path))?,
            Some("json") => serde_json::from_str(&content)
                .with_context(|| format!("Failed to parse JSON config: {:?}", path))?,
            _ => anyhow::bail!("Unsupported config file format: {:?}", path),
        };

        Ok(config)
    }

    /// 从指定路径字符串加载配置
    pub fn load_from_path(path: &str) -> Result<Self> {
        Self::load_from_file(Path::new(path))
    }

    /// 查找配置文件 (按优先级搜索)
    fn find_config_file() -> Option<PathBuf> {
        if let Ok(path) = env::var("ATP_SCENARIO_CONFIG") {
            let p = PathBuf::from(path);
            if p.exists() {
                return Some(p);
            }
        }

        let mut paths = vec![
            PathBuf::from("./scenario.toml"),
            PathBuf::from("./scenario.yaml"),
            PathBuf::from("./scenario.json"),
            PathBuf::from("./tests/scenario.toml"),
            PathBuf::from("./tests/scenario.yaml"),
        ];

        if let Some(home) = dirs::home_dir() {
            paths.push(home.join(".config/atp/scenario.toml"));
            paths.push(home.join(".config/atp/scenario.yaml"));
        }

        #[cfg(target_os = "linux")]
        paths.push(PathBuf::from("/etc/atp/scenario.toml"));

        paths.into_iter().find(|path| path.exists())
    }

    /// 从环境变量覆盖配置
    fn apply_env_vars(&mut self) -> Result<()> {
        self.apply_overrides(|key| env::var(key).ok())
    }

    /// 按变量名读取覆盖值
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        // Environment
        if let Some(level) = lookup("ATP_LOG_LEVEL") {
            self.environment.log_level = level;
        }

        // Scenario
        if let Some(value) = lookup("ATP_CONTINUE_ON_ERROR") {
            self.scenario.continue_on_error = parse_bool(&value);
        }
        if let Some(value) = lookup("ATP_DELAY_BETWEEN_STEPS") {
            self.scenario.delay_between_steps = value
                .parse()
                .context("Invalid ATP_DELAY_BETWEEN_STEPS value")?;
        }
        if let Some(value) = lookup("ATP_DOC_ONLY") {
            self.scenario.doc_only = parse_bool(&value);
        }
        if let Some(value) = lookup("ATP_EXPECTED_ATTRIBUTES") {
            self.scenario.expected_attributes = split_list(&value);
        }

        // Issues
        if let Some(value) = lookup("ATP_ISSUE_LEVEL_ERROR") {
            self.issues.error_threshold = Some(value.parse()?);
        }
        if let Some(value) = lookup("ATP_ISSUE_LEVEL_IGNORED") {
            self.issues.ignored_threshold = Some(value.parse()?);
        }
        if let Some(value) = lookup("ATP_ISSUE_URL_TEMPLATE") {
            self.issues.url_template = Some(value);
        }

        // Debug
        if let Some(value) = lookup("ATP_DEBUG_CLASSES") {
            self.debug.classes = split_list(&value)
                .iter()
                .map(|class| class.parse())
                .collect::<std::result::Result<_, _>>()?;
        }

        Ok(())
    }

    /// 验证配置
    pub fn validate(&self) -> Result<()> {
        if !LOG_LEVELS.contains(&self.environment.log_level.to_lowercase().as_str()) {
            anyhow::bail!("Invalid log level: {}", self.environment.log_level);
        }

        self.step_delay()?;

        if self.scenario.expected_attributes.iter().any(|name| name.trim().is_empty()) {
            anyhow::bail!("expected_attributes cannot contain empty names");
        }

        let policy = self.issue_policy()?;
        if let (Some(error), Some(ignored)) = (policy.error_threshold, policy.ignored_threshold) {
            if ignored >= error {
                anyhow::bail!(
                    "ignored threshold ({}) must be lower than error threshold ({})",
                    ignored,
                    error
                );
            }
        }

        Ok(())
    }

    /// 步骤间等待时间，负数、NaN 或超出 `Duration` 范围的值是配置错误
    pub fn step_delay(&self) -> crate::Result<Duration> {
        let delay = self.scenario.delay_between_steps;
        Duration::try_from_secs_f64(delay).map_err(|e| {
            ExecutorError::ConfigError(format!(
                "delay_between_steps must be a non-negative number of seconds: {} ({})",
                delay, e
            ))
        })
    }

    /// 保存配置到文件
    pub fn save_to_file(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory: {:?}", parent))?;
        }

        let content = match path.extension().and_then(|s| s.to_str()) {
            Some("toml") => toml::to_string_pretty(self).context("Failed to serialize to TOML")?,
            Some("yaml") | Some("yml") => {
                serde_yaml::to_string(self).context("Failed to serialize to YAML")?
            }
            Some("json") => {
                serde_json::to_string_pretty(self).context("Failed to serialize to JSON")?
            }
            _ => anyhow::bail!("Unsupported config file format: {:?}", path),
        };

        fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {:?}", path))?;

        Ok(())
    }
}

// ============================================
// 派生配置
// ============================================

impl ScenarioConfig {
    /// 解析阈值后的分类策略
    pub fn issue_policy(&self) -> crate::Result<IssuePolicy> {
        let mut policy = IssuePolicy::new().with_unleveled_is_error(self.issues.unleveled_is_error);
        if let Some(spec) = &self.issues.error_threshold {
            policy = policy.with_error_threshold(self.issues.levels.resolve(spec)?.value);
        }
        if let Some(spec) = &self.issues.ignored_threshold {
            policy = policy.with_ignored_threshold(self.issues.levels.resolve(spec)?.value);
        }
        Ok(policy)
    }

    /// tracing-subscriber EnvFilter 指令
    pub fn log_filter_directives(&self) -> String {
        let mut directives = vec![self.environment.log_level.to_lowercase()];
        directives.extend(
            self.debug
                .classes
                .iter()
                .map(|class| format!("{}=debug", class.target())),
        );
        directives.join(",")
    }

    pub fn with_continue_on_error(mut self, continue_on_error: bool) -> Self {
        self.scenario.continue_on_error = continue_on_error;
        self
    }

    pub fn with_doc_only(mut self, doc_only: bool) -> Self {
        self.scenario.doc_only = doc_only;
        self
    }

    pub fn with_delay_between_steps(mut self, seconds: f64) -> Self {
        self.scenario.delay_between_steps = seconds;
        self
    }

    pub fn with_expected_attribute(mut self, name: impl Into<String>) -> Self {
        self.scenario.expected_attributes.push(name.into());
        self
    }

    pub fn with_issue_level(mut self, name: impl Into<String>, value: i64) -> Self {
        self.issues.levels.define(name, value);
        self
    }

    pub fn with_error_threshold(mut self, threshold: impl Into<IssueLevelSpec>) -> Self {
        self.issues.error_threshold = Some(threshold.into());
        self
    }

    pub fn with_ignored_threshold(mut self, threshold: impl Into<IssueLevelSpec>) -> Self {
        self.issues.ignored_threshold = Some(threshold.into());
        self
    }

    pub fn with_unleveled_is_error(mut self, unleveled_is_error: bool) -> Self {
        self.issues.unleveled_is_error = unleveled_is_error;
        self
    }

    pub fn with_url_template(mut self, template: impl Into<String>) -> Self {
        self.issues.url_template = Some(template.into());
        self
    }
}

fn parse_bool(value: &str) -> bool {
    matches!(
        value.trim().to_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(String::from)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(key, value)| (key.to_string(), value.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn test_default_config() {
        let config = ScenarioConfig::default();
        assert_eq!(config.environment.log_level, "info");
        assert!(!config.scenario.continue_on_error);
        assert!(!config.scenario.doc_only);
        assert_eq!(config.scenario.delay_between_steps, 0.0);
        assert!(config.issues.unleveled_is_error);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_serialization() {
        let config = ScenarioConfig::default().with_issue_level("minor", 10);

        let toml = toml::to_string_pretty(&config).unwrap();
        assert!(toml.contains("log_level = \"info\""));
        assert!(toml.contains("minor = 10"));

        let json = serde_json::to_string_pretty(&config).unwrap();
        assert!(json.contains("\"log_level\": \"info\""));

        let yaml = serde_yaml::to_string(&config).unwrap();
        assert!(yaml.contains("log_level: info"));
    }

    #[test]
    fn test_issue_policy_resolves_names() {
        let config = ScenarioConfig::default()
            .with_issue_level("minor", 10)
            .with_issue_level("major", 30)
            .with_error_threshold(IssueLevelSpec::Name("major".to_string()))
            .with_ignored_threshold(IssueLevelSpec::Value(5));

        let policy = config.issue_policy().unwrap();
        assert_eq!(policy.error_threshold, Some(30));
        assert_eq!(policy.ignored_threshold, Some(5));
        assert!(policy.unleveled_is_error);
    }

    #[test]
    fn test_issue_policy_unknown_name() {
        let config = ScenarioConfig::default().with_error_threshold(IssueLevelSpec::Name("nope".to_string()));
        assert!(matches!(config.issue_policy(), Err(ExecutorError::LevelError(_))));
    }

    #[test]
    fn test_config_validation() {
        assert!(ScenarioConfig::default().with_delay_between_steps(-1.0).validate().is_err());
        assert!(ScenarioConfig::default().with_delay_between_steps(f64::NAN).validate().is_err());
        assert!(ScenarioConfig::default().with_delay_between_steps(1e300).validate().is_err());
        assert!(matches!(
            ScenarioConfig::default().with_delay_between_steps(1e300).step_delay(),
            Err(ExecutorError::ConfigError(_))
        ));
        assert_eq!(
            ScenarioConfig::default().with_delay_between_steps(0.25).step_delay().unwrap(),
            Duration::from_millis(250)
        );

        let mut config = ScenarioConfig::default();
        config.environment.log_level = "loud".to_string();
        assert!(config.validate().is_err());

        let inverted = ScenarioConfig::default()
            .with_error_threshold(IssueLevelSpec::Value(10))
            .with_ignored_threshold(IssueLevelSpec::Value(20));
        assert!(inverted.validate().is_err());

        let ok = ScenarioConfig::default()
            .with_error_threshold(IssueLevelSpec::Value(20))
            .with_ignored_threshold(IssueLevelSpec::Value(10))
            .with_expected_attribute("TESTID");
        assert!(ok.validate().is_ok());
    }

    #[test]
    fn test_apply_overrides() {
        let mut config = ScenarioConfig::default().with_issue_level("minor", 10);
        config
            .apply_overrides(lookup(&[
                ("ATP_LOG_LEVEL", "debug"),
                ("ATP_CONTINUE_ON_ERROR", "yes"),
                ("ATP_DELAY_BETWEEN_STEPS", "0.5"),
                ("ATP_DOC_ONLY", "0"),
                ("ATP_EXPECTED_ATTRIBUTES", "TESTID, TITLE"),
                ("ATP_ISSUE_LEVEL_ERROR", "minor"),
                ("ATP_ISSUE_LEVEL_IGNORED", "3"),
                ("ATP_DEBUG_CLASSES", "scenario-runner,handlers"),
            ]))
            .unwrap();

        assert_eq!(config.environment.log_level, "debug");
        assert!(config.scenario.continue_on_error);
        assert!(!config.scenario.doc_only);
        assert_eq!(config.scenario.delay_between_steps, 0.5);
        assert_eq!(config.scenario.expected_attributes, vec!["TESTID", "TITLE"]);
        assert_eq!(config.issue_policy().unwrap().error_threshold, Some(10));
        assert_eq!(config.issue_policy().unwrap().ignored_threshold, Some(3));
        assert_eq!(
            config.debug.classes,
            vec![DebugClass::ScenarioRunner, DebugClass::Handlers]
        );
    }

    #[test]
    fn test_apply_overrides_invalid_values() {
        let mut config = ScenarioConfig::default();
        assert!(config
            .apply_overrides(lookup(&[("ATP_DELAY_BETWEEN_STEPS", "soon")]))
            .is_err());
        assert!(config
            .apply_overrides(lookup(&[("ATP_DEBUG_CLASSES", "everything")]))
            .is_err());
    }

    #[test]
    fn test_log_filter_directives() {
        let mut config = ScenarioConfig::default();
        assert_eq!(config.log_filter_directives(), "info");

        config.debug.classes = vec![DebugClass::ScenarioStack];
        assert_eq!(config.log_filter_directives(), "info,atp_executor::stack=debug");
    }

    #[test]
    fn test_save_and_load_roundtrip_formats() {
        let dir = tempfile::tempdir().unwrap();
        let config = ScenarioConfig::default()
            .with_issue_level("minor", 10)
            .with_error_threshold(IssueLevelSpec::Value(20))
            .with_url_template("https://bugs.example.com/{id}")
            .with_expected_attribute("TESTID");

        for name in ["scenario.toml", "scenario.yaml", "scenario.json"] {
            let path = dir.path().join(name);
            config.save_to_file(&path).unwrap();
            let loaded = ScenarioConfig::load_from_file(&path).unwrap();
            assert_eq!(loaded.issues.levels.value_of("minor"), Some(10));
            assert_eq!(loaded.issue_policy().unwrap().error_threshold, Some(20));
            assert_eq!(
                loaded.issues.url_template.as_deref(),
                Some("https://bugs.example.com/{id}")
            );
            assert_eq!(loaded.scenario.expected_attributes, vec!["TESTID"]);
        }
    }

    #[test]
    fn test_unsupported_format() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("scenario.ini");
        assert!(ScenarioConfig::default().save_to_file(&path).is_err());
        fs::write(&path, "x").unwrap();
        assert!(ScenarioConfig::load_from_file(&path).is_err());
    }
}
