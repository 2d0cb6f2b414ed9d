//! Task registration and post-deploy hooks.
//!
//! The host deploy tool reports finished tasks; every task registered to run
//! after it is executed in registration order. The mail notifier registers
//! `deploy:notify:mail` after `deploy:restart`.

use anyhow::{Context, Result};
use std::io::Write;

use crate::config::{Config, DeliveryMethod};
use crate::error::NotifyError;
use crate::notifications::{DeploymentFacts, DispatchReport, Dispatcher};

pub const RESTART_TASK: &str = "deploy:restart";
pub const NOTIFY_MAIL_TASK: &str = "deploy:notify:mail";
pub const NOTIFY_MAIL_DESCRIPTION: &str = "Send a deployment notification via email.";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Task {
    pub name: String,
    pub description: String,
}

#[derive(Debug, Default)]
pub struct TaskRegistry {
    tasks: Vec<Task>,
    /// (trigger, follower) pairs
    after: Vec<(String, String)>,
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the built-in notifier tasks loaded
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        load_into(&mut registry);
        registry
    }

    pub fn register(&mut self, name: &str, description: &str) {
        if self.task(name).is_some() {
            return;
        }
        self.tasks.push(Task {
            name: name.to_string(),
            description: description.to_string(),
        });
    }

    /// Run `task` whenever `trigger` completes
    pub fn after(&mut self, trigger: &str, task: &str) {
        let pair = (trigger.to_string(), task.to_string());
        if !self.after.contains(&pair) {
            self.after.push(pair);
        }
    }

    pub fn task(&self, name: &str) -> Option<&Task> {
        self.tasks.iter().find(|t| t.name == name)
    }

    pub fn tasks(&self) -> &[Task] {
        &self.tasks
    }

    /// Tasks to run after `trigger`, in registration order
    pub fn followers(&self, trigger: &str) -> Vec<&Task> {
        self.after
            .iter()
            .filter(|(t, _)| t == trigger)
            .filter_map(|(_, follower)| self.task(follower))
            .collect()
    }
}

/// Register the mail notification task and wire it after `deploy:restart`
pub fn load_into(registry: &mut TaskRegistry) {
    registry.register(NOTIFY_MAIL_TASK, NOTIFY_MAIL_DESCRIPTION);
    registry.after(RESTART_TASK, NOTIFY_MAIL_TASK);
}

/// Run one registered task by name.
///
/// In test mode the captured messages are written to `out`.
pub async fn run_task(
    name: &str,
    config: &Config,
    facts: &DeploymentFacts,
    out: &mut (dyn Write + Send),
) -> Result<()> {
    match name {
        NOTIFY_MAIL_TASK => {
            let report = match notify_mail(config, facts).await {
                Ok(report) => report,
                Err(e) if e.is_configuration() => {
                    tracing::error!(error = %e, "Mail notifier is misconfigured, nothing was sent");
                    return Err(e.into());
                }
                Err(e) => {
                    tracing::error!(
                        method = %config.notifier.mail.method,
                        error = %e,
                        "Mail transport rejected the deployment notification"
                    );
                    return Err(e.into());
                }
            };
            if config.notifier.mail.method == DeliveryMethod::Test {
                for mail in &report.captured {
                    writeln!(out, "{}", mail)?;
                }
            }
            Ok(())
        }
        other => anyhow::bail!("Unknown task: {}", other),
    }
}

/// Run every task registered after `trigger`. Stops at the first failure.
pub async fn run_after(
    registry: &TaskRegistry,
    trigger: &str,
    config: &Config,
    facts: &DeploymentFacts,
    out: &mut (dyn Write + Send),
) -> Result<usize> {
    let followers = registry.followers(trigger);
    if followers.is_empty() {
        tracing::debug!(trigger = %trigger, "No tasks registered after trigger");
        return Ok(0);
    }

    for task in &followers {
        tracing::info!(task = %task.name, trigger = %trigger, "Running hook");
        run_task(&task.name, config, facts, out)
            .await
            .with_context(|| format!("Hook {} failed after {}", task.name, trigger))?;
    }

    Ok(followers.len())
}

async fn notify_mail(
    config: &Config,
    facts: &DeploymentFacts,
) -> Result<DispatchReport, NotifyError> {
    let dispatcher = Dispatcher::new(config.notifier.mail.clone())?;
    dispatcher.dispatch(facts).await
}
