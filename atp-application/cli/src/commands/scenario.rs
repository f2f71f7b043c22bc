//! Scenario 命令处理

use std::path::{Path, PathBuf};
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use anyhow::{Context, Result};
use colored::Colorize;
use serde::Serialize;
use tracing::{error, warn};

use atp_executor::{
    ErrorCode, ExecutionStatus, IssueLevelSpec, ScenarioConfig, ScenarioReport, ScenarioResult,
    ScenarioResults, ScenarioRunner,
};
use atp_scenarios::BuiltinScenario;

use super::output::{self, TableRow};
use crate::{RunArgs, ScenarioAction};

pub fn handle(action: ScenarioAction, config: ScenarioConfig, interrupted: Arc<AtomicBool>) -> Result<ErrorCode> {
    match action {
        ScenarioAction::List { format } => {
            list_scenarios(&format)?;
            Ok(ErrorCode::Success)
        }
        ScenarioAction::Run(args) => run_scenarios(&args, config, interrupted),
    }
}

#[derive(Serialize)]
struct ScenarioRow {
    name: &'static str,
    description: &'static str,
}

impl TableRow for ScenarioRow {
    fn headers() -> Vec<&'static str> {
        vec!["NAME", "DESCRIPTION"]
    }

    fn row(&self) -> Vec<String> {
        vec![self.name.to_string(), self.description.to_string()]
    }
}

fn list_scenarios(format: &str) -> Result<()> {
    let rows: Vec<ScenarioRow> = atp_scenarios::list()
        .iter()
        .map(|scenario| ScenarioRow {
            name: scenario.name,
            description: scenario.description,
        })
        .collect();
    output::output_formatted(&rows, format)
}

/// 命令行参数覆盖配置
fn apply_run_args(mut config: ScenarioConfig, args: &RunArgs) -> Result<ScenarioConfig> {
    if args.doc_only {
        config = config.with_doc_only(true);
    }
    if args.continue_on_error {
        config = config.with_continue_on_error(true);
    }
    if let Some(delay) = args.delay_between_steps {
        config = config.with_delay_between_steps(delay);
    }
    if let Some(level) = &args.issue_level_error {
        let spec: IssueLevelSpec = level.parse().with_context(|| format!("无效的错误级别: {}", level))?;
        config = config.with_error_threshold(spec);
    }
    if let Some(level) = &args.issue_level_ignored {
        let spec: IssueLevelSpec = level.parse().with_context(|| format!("无效的忽略级别: {}", level))?;
        config = config.with_ignored_threshold(spec);
    }
    for attribute in &args.expected_attributes {
        config = config.with_expected_attribute(attribute.clone());
    }

    config.validate()?;
    Ok(config)
}

fn select_scenarios(args: &RunArgs) -> Result<Vec<&'static BuiltinScenario>> {
    if args.all {
        return Ok(atp_scenarios::list().iter().collect());
    }
    args.names
        .iter()
        .map(|name| {
            atp_scenarios::find(name)
                .with_context(|| format!("未知场景: {} (使用 `atp scenario list` 查看)", name))
        })
        .collect()
}

/// 依次执行场景
///
/// 中断后当前场景照常结束并写出报告，剩余场景不再执行。
fn run_scenarios(args: &RunArgs, config: ScenarioConfig, interrupted: Arc<AtomicBool>) -> Result<ErrorCode> {
    let config = apply_run_args(config, args)?;
    let scenarios = select_scenarios(args)?;
    let report_dir = args.json_report.as_deref().map(PathBuf::from);

    let mut runner = ScenarioRunner::new(config)?.with_interrupt_flag(interrupted);
    let mut results = ScenarioResults::new();

    for scenario in scenarios {
        println!("\n{} {}", "▶".cyan().bold(), scenario.name.bold());

        match runner.execute_scenario(scenario.build()) {
            Ok(code) => {
                for definition in runner.take_history() {
                    let result = ScenarioResult::from_definition(&definition, code);
                    if let Some(dir) = &report_dir {
                        write_report(dir, &ScenarioReport::from_definition(&definition))?;
                    }
                    print_result(&result);
                    results.add(result);
                }
            }
            Err(err) => {
                error!("场景 '{}' 执行失败: {}", scenario.name, err);
                let result = ScenarioResult::failed(scenario.name, err.error_code());
                print_result(&result);
                results.add(result);

                if err.is_fatal() {
                    warn!("上下文错误，终止剩余场景");
                    break;
                }
            }
        }

        if runner.is_interrupted() {
            warn!("执行被中断，跳过剩余场景");
            break;
        }
    }

    results.log_summary();
    print_summary(&results);
    Ok(results.worst_code())
}

fn write_report(dir: &Path, report: &ScenarioReport) -> Result<()> {
    let path = dir.join(report.file_name());
    report
        .write_json(&path)
        .with_context(|| format!("写入报告失败: {:?}", path))?;
    println!("  报告: {}", path.display().to_string().bright_black());
    Ok(())
}

fn status_label(status: ExecutionStatus) -> colored::ColoredString {
    match status {
        ExecutionStatus::Success => status.as_str().green().bold(),
        ExecutionStatus::Warnings => status.as_str().yellow().bold(),
        ExecutionStatus::Fail => status.as_str().red().bold(),
        _ => status.as_str().normal(),
    }
}

fn print_result(result: &ScenarioResult) {
    let elapsed = result
        .elapsed
        .map(|secs| format!("{:.3}s", secs))
        .unwrap_or_else(|| "-".to_string());
    println!(
        "  {} {} (错误 {}, 警告 {}, 耗时 {})",
        status_label(result.status),
        result.name,
        result.errors.to_string().red(),
        result.warnings.to_string().yellow(),
        elapsed
    );
}

#[derive(Serialize)]
struct ResultRow {
    name: String,
    status: String,
    errors: usize,
    warnings: usize,
    code: String,
}

impl TableRow for ResultRow {
    fn headers() -> Vec<&'static str> {
        vec!["场景", "状态", "错误", "警告", "退出码"]
    }

    fn widths() -> Vec<usize> {
        vec![28, 10, 6, 6, 24]
    }

    fn row(&self) -> Vec<String> {
        vec![
            self.name.clone(),
            self.status.clone(),
            self.errors.to_string(),
            self.warnings.to_string(),
            self.code.clone(),
        ]
    }
}

fn print_summary(results: &ScenarioResults) {
    let rows: Vec<ResultRow> = results
        .sorted_by_criticity()
        .into_iter()
        .map(|result| ResultRow {
            name: result.name.clone(),
            status: result.status.to_string(),
            errors: result.errors,
            warnings: result.warnings,
            code: result.code.to_string(),
        })
        .collect();

    println!("\n{}", "=".repeat(60));
    println!("{}", "执行汇总".bold());
    println!("{}", "=".repeat(60));
    output::print_table(&rows);

    let worst = results.worst_code();
    let verdict = if worst.is_success() {
        worst.to_string().green().bold()
    } else {
        worst.to_string().red().bold()
    };
    println!("\n退出码: {}", verdict);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(names: &[&str]) -> RunArgs {
        RunArgs {
            names: names.iter().map(|name| name.to_string()).collect(),
            all: false,
            doc_only: false,
            continue_on_error: false,
            delay_between_steps: None,
            issue_level_error: None,
            issue_level_ignored: None,
            expected_attributes: Vec::new(),
            json_report: None,
        }
    }

    #[test]
    fn test_apply_run_args() {
        let mut run_args = args(&["demo/login"]);
        run_args.doc_only = true;
        run_args.issue_level_error = Some("20".to_string());
        run_args.expected_attributes = vec!["TESTID".to_string()];

        let config = apply_run_args(ScenarioConfig::default(), &run_args).unwrap();
        assert!(config.scenario.doc_only);
        assert_eq!(config.scenario.expected_attributes, vec!["TESTID"]);
        assert_eq!(config.issue_policy().unwrap().error_threshold, Some(20));
    }

    #[test]
    fn test_negative_delay_rejected() {
        let mut run_args = args(&["demo/login"]);
        run_args.delay_between_steps = Some(-1.0);
        assert!(apply_run_args(ScenarioConfig::default(), &run_args).is_err());
    }

    #[test]
    fn test_select_scenarios() {
        assert_eq!(select_scenarios(&args(&["demo/login", "demo/retry"])).unwrap().len(), 2);
        assert!(select_scenarios(&args(&["demo/missing"])).is_err());

        let mut all = args(&[]);
        all.all = true;
        assert_eq!(select_scenarios(&all).unwrap().len(), atp_scenarios::list().len());
    }

    #[test]
    fn test_run_writes_reports_and_returns_worst_code() {
        let dir = tempfile::tempdir().unwrap();
        let mut run_args = args(&["demo/login", "demo/failing"]);
        run_args.json_report = Some(dir.path().to_string_lossy().to_string());

        let code = run_scenarios(&run_args, ScenarioConfig::default(), Arc::new(AtomicBool::new(false))).unwrap();
        assert_eq!(code, ErrorCode::TestError);

        let report = ScenarioReport::from_json_file(&dir.path().join("demo_login.json")).unwrap();
        assert_eq!(report.status, ExecutionStatus::Success);
        assert!(dir.path().join("demo_failing.json").exists());
    }

    #[test]
    fn test_interrupted_run_reports_current_scenario_and_stops() {
        let dir = tempfile::tempdir().unwrap();
        let mut run_args = args(&["demo/login", "demo/failing"]);
        run_args.json_report = Some(dir.path().to_string_lossy().to_string());

        let code = run_scenarios(&run_args, ScenarioConfig::default(), Arc::new(AtomicBool::new(true))).unwrap();
        assert_eq!(code, ErrorCode::TestError);

        let report = ScenarioReport::from_json_file(&dir.path().join("demo_login.json")).unwrap();
        assert_eq!(report.status, ExecutionStatus::Fail);
        assert!(!dir.path().join("demo_failing.json").exists());
    }
}
