//! 可跳过的步骤分节
//!
//! 分节由开始步骤、若干普通步骤与结束步骤组成。开始步骤运行检查，
//! 检查要求跳过时记录原因并直接跳到结束步骤。

use tracing::info;

use atp_common::{IssueLevel, KnownIssue};

use crate::context::{StepContext, StepFlow, StepTarget};
use crate::scenario::StepDefinition;

/// 跳过分节的原因
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SectionSkip {
    pub message: String,

    /// 指定级别或标识时以已知问题记录，否则只输出信息
    pub issue_level: Option<IssueLevel>,
    pub issue_id: Option<String>,
}

impl SectionSkip {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            issue_level: None,
            issue_id: None,
        }
    }

    pub fn with_issue_level(mut self, level: impl Into<IssueLevel>) -> Self {
        self.issue_level = Some(level.into());
        self
    }

    pub fn with_issue_id(mut self, id: impl Into<String>) -> Self {
        self.issue_id = Some(id.into());
        self
    }

    fn is_known_issue(&self) -> bool {
        self.issue_level.is_some() || self.issue_id.is_some()
    }
}

pub(crate) fn begin_step_name(title: &str) -> String {
    format!("section-begin: {}", title)
}

pub(crate) fn end_step_name(title: &str) -> String {
    format!("section-end: {}", title)
}

/// 生成分节的开始与结束步骤
pub(crate) fn section_steps<F>(title: &str, check: F) -> (StepDefinition, StepDefinition)
where
    F: Fn(&mut StepContext<'_>) -> anyhow::Result<Option<SectionSkip>> + 'static,
{
    let begin_description = format!("Beginning of section '{}'", title);
    let end_name = end_step_name(title);
    let begin = StepDefinition::new(begin_step_name(title), move |ctx| {
        ctx.step(begin_description.clone())?;
        if ctx.mode().is_building() {
            return Ok(StepFlow::Continue);
        }

        let Some(skip) = check(ctx)? else {
            return Ok(StepFlow::Continue);
        };

        let (target, begin_number, end_number) = locate_end(ctx, &end_name)?;
        let message = format!(
            "{}. Steps skipped from {} to {}.",
            skip.message,
            begin_number + 1,
            end_number.saturating_sub(1)
        );
        if skip.is_known_issue() {
            let mut issue = KnownIssue::new(message);
            if let Some(level) = skip.issue_level {
                issue = issue.with_level(level);
            }
            if let Some(id) = skip.issue_id {
                issue = issue.with_id(id);
            }
            ctx.known_issue(issue)?;
        } else {
            info!("{}", message);
        }

        Ok(StepFlow::Goto(target))
    });

    let end_description = format!("End of section '{}'", title);
    let end = StepDefinition::new(end_step_name(title), move |ctx| {
        ctx.step(end_description.clone())?;
        Ok(StepFlow::Continue)
    });

    (begin, end)
}

/// 在开始步骤之后查找对应的结束步骤
fn locate_end(ctx: &StepContext<'_>, end_name: &str) -> anyhow::Result<(StepTarget, usize, usize)> {
    let begin_index = ctx.step_index();
    let definition = ctx
        .runner()
        .stack()
        .current_scenario_definition()
        .ok_or_else(|| anyhow::anyhow!("没有当前场景"))?;

    let begin_number = definition
        .step(begin_index)
        .and_then(StepDefinition::number)
        .unwrap_or_default();
    let (end_index, end_step) = definition
        .steps
        .iter()
        .enumerate()
        .skip(begin_index + 1)
        .find(|(_, step)| step.name() == end_name)
        .ok_or_else(|| anyhow::anyhow!("找不到分节结束步骤 '{}'", end_name))?;

    Ok((
        StepTarget(end_index),
        begin_number,
        end_step.number().unwrap_or_default(),
    ))
}
