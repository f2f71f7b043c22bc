//! ATP CLI 应用

use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, Subcommand};
use colored::Colorize;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use atp_executor::{ErrorCode, ExecutorError, ScenarioConfig};

mod commands;

#[derive(Parser)]
#[command(name = "atp")]
#[command(about = "OCloudView ATP - 测试场景执行工具", long_about = None)]
#[command(version)]
struct Cli {
    /// 日志级别 (覆盖配置文件中的 environment.log_level)
    #[arg(short, long)]
    log_level: Option<String>,

    /// 场景配置文件 (TOML/YAML/JSON)
    #[arg(short, long, global = true)]
    config: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// 场景管理
    Scenario {
        #[command(subcommand)]
        action: ScenarioAction,
    },

    /// 测试报告管理
    Report {
        #[command(subcommand)]
        action: ReportAction,
    },
}

#[derive(Subcommand)]
pub enum ScenarioAction {
    /// 运行场景
    Run(RunArgs),

    /// 列出内置场景
    List {
        /// 输出格式 (table/json/yaml)
        #[arg(short, long, default_value = "table")]
        format: String,
    },
}

#[derive(clap::Args)]
pub struct RunArgs {
    /// 场景名称，可以指定多个
    #[arg(required_unless_present = "all")]
    pub names: Vec<String>,

    /// 运行所有内置场景
    #[arg(long)]
    pub all: bool,

    /// 仅文档模式: 遍历步骤但不执行动作
    #[arg(long)]
    pub doc_only: bool,

    /// 出现错误后继续执行剩余步骤
    #[arg(long)]
    pub continue_on_error: bool,

    /// 步骤间延迟 (秒)
    #[arg(long)]
    pub delay_between_steps: Option<f64>,

    /// 达到该级别的已知问题视为错误 (数值或级别名称)
    #[arg(long)]
    pub issue_level_error: Option<String>,

    /// 低于该级别的已知问题被忽略 (数值或级别名称)
    #[arg(long)]
    pub issue_level_ignored: Option<String>,

    /// 场景必须定义的属性
    #[arg(long = "expected-attribute")]
    pub expected_attributes: Vec<String>,

    /// JSON 报告输出目录
    #[arg(long)]
    pub json_report: Option<String>,
}

#[derive(Subcommand)]
pub enum ReportAction {
    /// 显示报告详情
    Show {
        /// 报告文件 (JSON)
        file: String,

        /// 输出格式 (text/json/yaml)
        #[arg(short, long, default_value = "text")]
        format: String,
    },
}

fn load_config(cli: &Cli) -> Result<ScenarioConfig> {
    let mut config = match &cli.config {
        Some(path) => {
            let mut config = ScenarioConfig::load_from_path(path)?;
            config.apply_overrides(|key| std::env::var(key).ok())?;
            config
        }
        None => ScenarioConfig::load()?,
    };
    if let Some(level) = &cli.log_level {
        config.environment.log_level = level.clone();
    }
    config.validate()?;
    Ok(config)
}

/// 错误对应的退出码
fn exit_code_of(error: &anyhow::Error) -> ErrorCode {
    match error.downcast_ref::<ExecutorError>() {
        Some(error) => error.error_code(),
        None => ErrorCode::ArgumentsError,
    }
}

fn run(cli: Cli) -> Result<ErrorCode> {
    let config = load_config(&cli)?;

    let filter = EnvFilter::try_new(config.log_filter_directives())
        .unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!("ATP CLI 启动");

    let interrupted = Arc::new(AtomicBool::new(false));
    {
        let interrupted = Arc::clone(&interrupted);
        if let Err(e) = ctrlc::set_handler(move || interrupted.store(true, Ordering::SeqCst)) {
            warn!("无法安装 Ctrl+C 处理器: {}", e);
        }
    }

    match cli.command {
        Commands::Scenario { action } => commands::scenario::handle(action, config, interrupted),
        Commands::Report { action } => commands::report::handle(action),
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let code = match run(cli) {
        Ok(code) => code,
        Err(error) => {
            eprintln!("{} {:#}", "✗".red().bold(), error);
            exit_code_of(&error)
        }
    };
    ExitCode::from(code.code() as u8)
}
