//! Command handlers for the `budget-monitor` CLI.
//!
//! Thin wrappers over the tiergate public API. Every handler writes to a
//! caller-supplied writer and returns the process exit code.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tiergate::budget::{BudgetHealth, BudgetStatus, Clock};
use tiergate::router::classify_with_rule;
use tiergate::router::policy::DEFAULT_MID_RESOURCE;
use tiergate::{
    select, AdmissionEngine, AdmissionError, EngineConfig, FailureDescriptor, TaskCategory,
    TaskMeta,
};
use tracing::debug;

pub const CONFIG_FILE_NAME: &str = "tiergate.toml";
pub const AUDIT_LOG_FILE_NAME: &str = "audit_log.jsonl";
pub const STATE_FILE_NAME: &str = "budget-state.json";

#[derive(Parser, Debug)]
#[command(author, version, about = "Budget tracking for tiered model routing", long_about = None)]
pub struct Cli {
    /// Config file (defaults to ~/.openclaw/tiergate.toml when present)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Print machine-readable JSON instead of text
    #[arg(long, global = true, default_value_t = false)]
    pub json: bool,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum Command {
    /// Show current budget status (default)
    Status,
    /// Exit 1 if the daily alert threshold or limit has been reached
    Check,
    /// Reset the daily spend counter
    Reset,
    /// Check whether a task would be admitted, without recording anything
    Simulate {
        #[arg(default_value = "write")]
        category: TaskCategory,
        #[arg(default_value = DEFAULT_MID_RESOURCE)]
        resource: String,
        #[arg(default_value_t = 10_000)]
        units: u64,
    },
    /// Show which category a request classifies as
    Classify {
        text: String,
        #[arg(long)]
        trigger: Option<String>,
    },
    /// Show which resource a request routes to
    Route {
        text: String,
        #[arg(long)]
        trigger: Option<String>,
        #[arg(long, default_value_t = 0)]
        attempt: u32,
        /// Failure on the previous attempt (validation, tool_error, uncertainty)
        #[arg(long)]
        failure: Option<tiergate::FailureKind>,
        /// How many times the failure occurred
        #[arg(long, default_value_t = 1)]
        count: u32,
    },
}

/// `$HOME/.openclaw`
pub fn default_state_dir() -> PathBuf {
    std::env::var_os("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("/home/node"))
        .join(".openclaw")
}

/// Load config, apply env overrides, and fill in default storage paths
pub fn load_config(path: Option<&Path>) -> Result<EngineConfig> {
    let dir = default_state_dir();
    let implicit = dir.join(CONFIG_FILE_NAME);
    let path = match path {
        Some(path) => Some(path.to_path_buf()),
        None if implicit.exists() => Some(implicit),
        None => None,
    };

    let mut config = EngineConfig::load(path.as_deref()).with_context(|| match &path {
        Some(p) => format!("Failed to load config from {}", p.display()),
        None => "Failed to load default config".to_string(),
    })?;
    config
        .audit_log_path
        .get_or_insert_with(|| dir.join(AUDIT_LOG_FILE_NAME));
    config
        .state_path
        .get_or_insert_with(|| dir.join(STATE_FILE_NAME));
    debug!(
        audit_log = ?config.audit_log_path,
        state = ?config.state_path,
        "Resolved storage paths"
    );
    Ok(config)
}

/// Run one command. Returns the exit code.
pub async fn run(cli: &Cli, clock: Arc<dyn Clock>, out: &mut dyn Write) -> Result<i32> {
    let config = load_config(cli.config.as_deref())?;
    let command = cli.command.clone().unwrap_or(Command::Status);

    match command {
        Command::Classify { text, trigger } => classify_cmd(&text, trigger, cli.json, out),
        Command::Route {
            text,
            trigger,
            attempt,
            failure,
            count,
        } => {
            let failure = failure.map(|kind| FailureDescriptor::new(kind, count));
            route_cmd(&config, &text, trigger, attempt, failure, cli.json, out)
        }
        Command::Status => status_cmd(&open_engine(&config, clock).await?, cli.json, out).await,
        Command::Check => check_cmd(&open_engine(&config, clock).await?, cli.json, out).await,
        Command::Reset => {
            let engine = open_engine(&config, clock).await?;
            engine.gate().reset_daily().await;
            if !cli.json {
                writeln!(out, "Daily budget reset")?;
            }
            status_cmd(&engine, cli.json, out).await
        }
        Command::Simulate {
            category,
            resource,
            units,
        } => {
            let engine = open_engine(&config, clock).await?;
            simulate_cmd(&engine, category, &resource, units, cli.json, out).await
        }
    }
}

/// Open the gate; this runs recovery and writes the snapshot
async fn open_engine(config: &EngineConfig, clock: Arc<dyn Clock>) -> Result<AdmissionEngine> {
    AdmissionEngine::from_config_with_clock(config, clock)
        .await
        .context("Failed to open budget gate")
}

fn print_json<T: Serialize>(value: &T, out: &mut dyn Write) -> Result<()> {
    writeln!(out, "{}", serde_json::to_string_pretty(value)?)?;
    Ok(())
}

fn health_line(status: &BudgetStatus) -> String {
    match status.health() {
        BudgetHealth::Warning => format!("WARNING: Budget usage at {:.1}%", status.percent_used),
        BudgetHealth::Caution => format!("CAUTION: Budget usage at {:.1}%", status.percent_used),
        BudgetHealth::Healthy => "Budget healthy".to_string(),
    }
}

async fn status_cmd(engine: &AdmissionEngine, json: bool, out: &mut dyn Write) -> Result<i32> {
    let status = engine.gate().status().await;
    if json {
        print_json(&status, out)?;
        return Ok(0);
    }

    writeln!(out, "Budget Status")?;
    writeln!(out, "Date: {}", status.period_key)?;
    writeln!(out, "Today's Spend: ${:.4}", status.cumulative_spend_usd)?;
    writeln!(out, "Daily Limit: ${:.2}", status.daily_limit)?;
    writeln!(out, "Remaining: ${:.4}", status.remaining)?;
    writeln!(out, "Used: {:.1}%", status.percent_used)?;
    writeln!(out)?;
    writeln!(out, "Limits:")?;
    writeln!(out, "  Max Units/Task: {}", status.limits.max_units_per_task)?;
    writeln!(out, "  Max Cost/Task: ${:.2}", status.limits.max_cost_per_task_usd)?;
    writeln!(out, "  Max Daily Cost: ${:.2}", status.limits.max_daily_cost_usd)?;
    writeln!(out)?;
    writeln!(out, "{}", health_line(&status))?;
    Ok(0)
}

async fn check_cmd(engine: &AdmissionEngine, json: bool, out: &mut dyn Write) -> Result<i32> {
    let alerts = engine.gate().threshold_alerts().await;
    let code = if alerts.is_empty() { 0 } else { 1 };

    if json {
        print_json(&serde_json::json!({ "ok": alerts.is_empty(), "alerts": alerts }), out)?;
    } else if alerts.is_empty() {
        writeln!(out, "All thresholds OK")?;
    } else {
        for alert in &alerts {
            writeln!(out, "{}", alert)?;
        }
    }
    Ok(code)
}

async fn simulate_cmd(
    engine: &AdmissionEngine,
    category: TaskCategory,
    resource: &str,
    units: u64,
    json: bool,
    out: &mut dyn Write,
) -> Result<i32> {
    let check = engine.gate().check_budget(category, resource, units).await;
    if json {
        print_json(&check, out)?;
        return Ok(0);
    }

    writeln!(out, "Simulating Task")?;
    writeln!(out, "Task Type: {}", category)?;
    writeln!(out, "Model: {}", resource)?;
    writeln!(out, "Estimated Units: {}", units)?;
    writeln!(out)?;

    if check.allowed {
        writeln!(out, "Task would be ALLOWED")?;
        writeln!(out, "Estimated Cost: ${:.4}", check.estimated_cost_usd)?;
        writeln!(out, "Today's Spend: ${:.4}", check.cumulative_spend_usd)?;
        writeln!(out, "Projected Spend: ${:.4}", check.projected_spend_usd)?;
        if !check.warnings.is_empty() {
            writeln!(out, "Warnings:")?;
            for warning in &check.warnings {
                writeln!(out, "  - {}", warning)?;
            }
        }
    } else {
        writeln!(out, "Task would be BLOCKED")?;
        writeln!(out, "Reason: {}", check.reason.unwrap_or_default())?;
    }
    Ok(0)
}

fn meta_for(trigger: Option<String>) -> TaskMeta {
    TaskMeta {
        trigger_source: trigger,
        session_key: None,
    }
}

fn classify_cmd(
    text: &str,
    trigger: Option<String>,
    json: bool,
    out: &mut dyn Write,
) -> Result<i32> {
    let (category, rule) = classify_with_rule(text, &meta_for(trigger));
    if json {
        print_json(
            &serde_json::json!({
                "category": category,
                "rule": rule,
                "description": category.description(),
                "recommended_tier": category.recommended_tier(),
            }),
            out,
        )?;
        return Ok(0);
    }

    writeln!(out, "Category: {} ({})", category, category.description())?;
    writeln!(out, "Matched rule: {}", rule.unwrap_or("fallback"))?;
    writeln!(out, "Recommended tier: {}", category.recommended_tier())?;
    Ok(0)
}

fn route_cmd(
    config: &EngineConfig,
    text: &str,
    trigger: Option<String>,
    attempt: u32,
    failure: Option<FailureDescriptor>,
    json: bool,
    out: &mut dyn Write,
) -> Result<i32> {
    let category = tiergate::classify(text, &meta_for(trigger));
    let selection = match select(category, attempt, failure.as_ref(), &config.routing) {
        Ok(selection) => selection,
        Err(e) => {
            let err = AdmissionError::from(e);
            if json {
                print_json(
                    &serde_json::json!({
                        "error": err.to_string(),
                        "class": err.class(),
                        "recovery_action": err.recovery_action(),
                    }),
                    out,
                )?;
            } else {
                writeln!(out, "Routing failed: {}", err)?;
                writeln!(out, "{}", err.recovery_action())?;
            }
            return Ok(1);
        }
    };

    if json {
        print_json(&selection, out)?;
        return Ok(0);
    }

    writeln!(out, "{}", selection.reason)?;
    writeln!(
        out,
        "Resource: {}",
        selection.resource.as_deref().unwrap_or("none (no model needed)")
    )?;
    Ok(0)
}
