//! ATP 内置场景库
//!
//! 一组演示执行引擎能力的场景: 动作与预期结果、证据、已知问题、
//! 步骤跳转、可跳过分节以及嵌套子场景。CLI 通过名称查找并运行它们。

use std::cell::Cell;
use std::path::Path;
use std::rc::Rc;

use tracing::debug;

use atp_executor::{
    IssueLevel, KnownIssue, ScenarioDefinition, SectionSkip, StepDefinition, StepFlow, TestError,
};

/// 内置场景条目
#[derive(Debug, Clone, Copy)]
pub struct BuiltinScenario {
    pub name: &'static str,
    pub description: &'static str,
    build: fn() -> ScenarioDefinition,
}

impl BuiltinScenario {
    /// 生成一个新的场景定义 (每次调用都是独立的执行状态)
    pub fn build(&self) -> ScenarioDefinition {
        (self.build)()
    }
}

const BUILTIN: &[BuiltinScenario] = &[
    BuiltinScenario {
        name: "demo/login",
        description: "打开登录页并提交凭据",
        build: login,
    },
    BuiltinScenario {
        name: "demo/known-issue",
        description: "带有已知问题的步骤",
        build: known_issue,
    },
    BuiltinScenario {
        name: "demo/retry",
        description: "通过步骤跳转重试连接",
        build: retry,
    },
    BuiltinScenario {
        name: "demo/gpu-section",
        description: "没有 GPU 设备时跳过渲染分节",
        build: gpu_section,
    },
    BuiltinScenario {
        name: "demo/nested",
        description: "在动作中执行登录子场景",
        build: nested,
    },
    BuiltinScenario {
        name: "demo/failing",
        description: "预期结果不满足的场景",
        build: failing,
    },
];

/// 所有内置场景
pub fn list() -> &'static [BuiltinScenario] {
    BUILTIN
}

/// 按名称查找内置场景
pub fn find(name: &str) -> Option<&'static BuiltinScenario> {
    BUILTIN.iter().find(|scenario| scenario.name == name)
}

/// 按名称生成场景定义
pub fn get(name: &str) -> Option<ScenarioDefinition> {
    find(name).map(BuiltinScenario::build)
}

// ============================================
// 场景定义
// ============================================

fn login() -> ScenarioDefinition {
    ScenarioDefinition::new("demo/login")
        .with_attribute("TESTID", "DEMO-001")
        .with_section("Login")
        .with_step(StepDefinition::new("open_page", |ctx| {
            ctx.step("Open the login page")?;
            if ctx.action("Navigate to /login")? {
                ctx.evidence("GET /login -> 200")?;
            }
            if ctx.result("The login form is displayed")? {
                ctx.evidence("form#login found")?;
            }
            Ok(StepFlow::Continue)
        }))
        .with_step(StepDefinition::new("submit", |ctx| {
            ctx.step("Submit valid credentials")?;
            if ctx.action("Fill in user and password, then submit")? {
                ctx.evidence("POST /login -> 302")?;
            }
            if ctx.result("The home page is displayed")? {
                ctx.evidence("title: Home")?;
            }
            Ok(StepFlow::Continue)
        }))
}

fn known_issue() -> ScenarioDefinition {
    ScenarioDefinition::new("demo/known-issue")
        .with_attribute("TESTID", "DEMO-002")
        .with_step(StepDefinition::new("query", |ctx| {
            ctx.step("Query the inventory service")?;
            ctx.known_issue(
                KnownIssue::new("Inventory service responds slowly")
                    .with_id("PERF-12")
                    .with_level(IssueLevel::new(10)),
            )?;
            if ctx.action("Request the VM list")? {
                ctx.evidence("12 VMs listed")?;
            }
            Ok(StepFlow::Continue)
        }))
        .with_step(StepDefinition::new("cleanup", |ctx| {
            ctx.step("Close the session")?;
            ctx.action("Log out")?;
            Ok(StepFlow::Continue)
        }))
}

fn retry() -> ScenarioDefinition {
    const ATTEMPTS: u32 = 3;
    let attempts = Rc::new(Cell::new(0u32));
    let counter = Rc::clone(&attempts);

    ScenarioDefinition::new("demo/retry")
        .with_attribute("TESTID", "DEMO-003")
        .with_step(StepDefinition::new("attempt", move |ctx| {
            ctx.step("Try to connect to the agent")?;
            if ctx.action("Open the connection")? {
                counter.set(counter.get() + 1);
                ctx.evidence(format!("attempt #{}", counter.get()))?;
            }
            Ok(StepFlow::Continue)
        }))
        .with_step(StepDefinition::new("check", move |ctx| {
            ctx.step("Check that the agent answered")?;
            if ctx.result("The agent answered")? {
                if attempts.get() < ATTEMPTS {
                    debug!("代理未响应，第 {} 次重试", attempts.get());
                    ctx.evidence("no answer yet")?;
                    return Ok(ctx.goto("attempt")?);
                }
                ctx.evidence(format!("answered after {} attempts", attempts.get()))?;
            }
            Ok(StepFlow::Continue)
        }))
}

fn gpu_section() -> ScenarioDefinition {
    ScenarioDefinition::new("demo/gpu-section")
        .with_attribute("TESTID", "DEMO-004")
        .with_step(StepDefinition::new("boot", |ctx| {
            ctx.step("Boot the guest")?;
            ctx.action("Start the VM")?;
            Ok(StepFlow::Continue)
        }))
        .with_skippable_section(
            "GPU rendering",
            |_ctx| {
                if Path::new("/dev/dri").exists() {
                    return Ok(None);
                }
                Ok(Some(SectionSkip::new("No GPU device").with_issue_id("ENV-GPU")))
            },
            vec![
                StepDefinition::new("render", |ctx| {
                    ctx.step("Render a test scene")?;
                    ctx.action("Run the renderer")?;
                    Ok(StepFlow::Continue)
                }),
                StepDefinition::new("compare", |ctx| {
                    ctx.step("Compare the frame")?;
                    ctx.result("The frame matches the reference")?;
                    Ok(StepFlow::Continue)
                }),
            ],
        )
        .with_step(StepDefinition::new("shutdown", |ctx| {
            ctx.step("Shut down the guest")?;
            ctx.action("Stop the VM")?;
            Ok(StepFlow::Continue)
        }))
}

fn nested() -> ScenarioDefinition {
    ScenarioDefinition::new("demo/nested")
        .with_attribute("TESTID", "DEMO-005")
        .with_step(StepDefinition::new("login_first", |ctx| {
            ctx.step("Log in through the login scenario")?;
            if ctx.action("Run demo/login")? {
                ctx.execute_scenario(login())?;
            }
            if ctx.result("The user is logged in")? {
                ctx.evidence("session cookie present")?;
            }
            Ok(StepFlow::Continue)
        }))
}

fn failing() -> ScenarioDefinition {
    ScenarioDefinition::new("demo/failing")
        .with_attribute("TESTID", "DEMO-006")
        .with_step(StepDefinition::new("check_quota", |ctx| {
            ctx.step("Check the disk quota")?;
            if ctx.result("The quota is below 90%")? {
                ctx.evidence("usage: 97%")?;
                return Err(TestError::new("Disk quota exceeded: 97%").into());
            }
            Ok(StepFlow::Continue)
        }))
        .with_step(StepDefinition::new("report", |ctx| {
            ctx.step("Report the quota")?;
            ctx.action("Send the report")?;
            Ok(StepFlow::Continue)
        }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_names_are_unique_and_match_definitions() {
        let names: HashSet<&str> = list().iter().map(|scenario| scenario.name).collect();
        assert_eq!(names.len(), list().len());

        for scenario in list() {
            assert_eq!(scenario.build().name, scenario.name);
            assert!(scenario.build().attributes.contains_key("TESTID"));
        }
    }

    #[test]
    fn test_get_unknown() {
        assert!(get("demo/unknown").is_none());
        assert!(find("demo/login").is_some());
    }
}
