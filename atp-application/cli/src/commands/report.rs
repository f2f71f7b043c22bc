//! 测试报告管理命令

use std::path::Path;

use anyhow::{Context, Result};
use chrono::Local;
use colored::Colorize;

use atp_executor::{ErrorCode, ExecutionStatus, ScenarioReport, StepReport, TestError};

use super::output;
use crate::ReportAction;

pub fn handle(action: ReportAction) -> Result<ErrorCode> {
    match action {
        ReportAction::Show { file, format } => show_report(Path::new(&file), &format)?,
    }
    Ok(ErrorCode::Success)
}

fn show_report(path: &Path, format: &str) -> Result<()> {
    let report =
        ScenarioReport::from_json_file(path).with_context(|| format!("读取报告失败: {:?}", path))?;

    match format {
        "json" => output::print_json(&report)?,
        "yaml" => output::print_yaml(&report)?,
        "text" => {
            let mut lines = Vec::new();
            render_scenario(&report, 0, &mut lines);
            for line in lines {
                println!("{}", line);
            }
        }
        other => anyhow::bail!("不支持的输出格式: {}，可选 text/json/yaml", other),
    }
    Ok(())
}

fn status_text(status: ExecutionStatus) -> String {
    match status {
        ExecutionStatus::Success => status.as_str().green().to_string(),
        ExecutionStatus::Warnings => status.as_str().yellow().to_string(),
        ExecutionStatus::Fail => status.as_str().red().to_string(),
        _ => status.as_str().to_string(),
    }
}

fn error_line(error: &TestError, is_error: bool) -> String {
    let label = match (error.is_known_issue(), is_error) {
        (true, true) => "已知问题 (错误)",
        (true, false) => "已知问题",
        (false, _) => "错误",
    };
    let mut line = format!("{}: {}", label, error.message());
    if let Some(issue) = error.known_issue() {
        if let Some(id) = &issue.id {
            line.push_str(&format!(" [{}]", id));
        }
        if let Some(url) = &issue.url {
            line.push_str(&format!(" {}", url));
        }
    }
    if is_error {
        line.red().to_string()
    } else {
        line.yellow().to_string()
    }
}

/// 以缩进树形式渲染报告，子场景嵌套在调用它的动作下
fn render_scenario(report: &ScenarioReport, depth: usize, lines: &mut Vec<String>) {
    let indent = "  ".repeat(depth);

    lines.push(format!(
        "{}{} {} [{}]",
        indent,
        "场景".bold(),
        report.name.cyan().bold(),
        status_text(report.status)
    ));
    if let Some(start) = report.time.start {
        let elapsed = report
            .elapsed
            .map(|secs| format!(", 耗时 {:.3}s", secs))
            .unwrap_or_default();
        lines.push(format!(
            "{}  开始: {}{}",
            indent,
            start.with_timezone(&Local).format("%Y-%m-%d %H:%M:%S"),
            elapsed
        ));
    }
    for (name, value) in &report.attributes {
        lines.push(format!("{}  {}: {}", indent, name, value));
    }
    lines.push(format!(
        "{}  步骤 {}/{}, 动作 {}/{}, 结果 {}/{}",
        indent,
        report.stats.steps.executed,
        report.stats.steps.total,
        report.stats.actions.executed,
        report.stats.actions.total,
        report.stats.results.executed,
        report.stats.results.total
    ));

    for step in &report.steps {
        render_step(step, depth + 1, lines);
    }

    for error in &report.errors {
        lines.push(format!("{}  {}", indent, error_line(error, true)));
    }
    for warning in &report.warnings {
        lines.push(format!("{}  {}", indent, error_line(warning, false)));
    }
}

fn render_step(step: &StepReport, depth: usize, lines: &mut Vec<String>) {
    let indent = "  ".repeat(depth);

    if step.section {
        lines.push(format!("{}== {} ==", indent, step.name.bold()));
        return;
    }

    let number = step.number.map(|n| n.to_string()).unwrap_or_default();
    let description = step.description.as_deref().unwrap_or(&step.name);
    let marker = if step.executions.is_empty() {
        "-".bright_black()
    } else if step.executions.iter().any(|execution| !execution.errors.is_empty()) {
        "✗".red()
    } else {
        "✓".green()
    };
    lines.push(format!("{}{} STEP {}: {}", indent, marker, number, description));

    for action_result in &step.actions_results {
        lines.push(format!(
            "{}  {} {}",
            indent,
            action_result.kind.to_string().blue(),
            action_result.description
        ));
        for execution in &action_result.executions {
            for evidence in &execution.evidence {
                lines.push(format!("{}    > {}", indent, evidence.bright_black()));
            }
            for error in &execution.errors {
                lines.push(format!("{}    {}", indent, error_line(error, true)));
            }
            for subscenario in &execution.subscenarios {
                render_scenario(subscenario, depth + 2, lines);
            }
        }
    }
}
