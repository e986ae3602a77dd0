//! Courier CLI - command-line client for the Courier job engine

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tabled::{Table, Tabled};

const DEFAULT_RPC_URL: &str = "http://127.0.0.1:9627";

#[derive(Parser)]
#[command(name = "courier")]
#[command(about = "Courier job engine CLI", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// RPC server URL
    #[arg(long, env = "COURIER_RPC_URL", default_value = DEFAULT_RPC_URL)]
    rpc_url: String,
}

#[derive(Subcommand)]
enum Commands {
    /// Submit a new job
    Submit {
        /// Registered task name (e.g. send_email)
        task_name: String,

        /// Payload as a JSON object
        #[arg(long, default_value = "{}")]
        payload: String,

        /// Priority in [-100, 100] (higher = more urgent)
        #[arg(short, long, default_value = "0", allow_hyphen_values = true)]
        priority: i32,

        /// Total attempts before the job is dead
        #[arg(long, default_value = "5")]
        max_attempts: i32,

        /// Delay before the first attempt
        #[arg(long, default_value = "0")]
        delay: i64,

        /// Idempotency key
        #[arg(long)]
        dedup_key: Option<String>,
    },

    /// Show a job's status
    Status {
        /// Job ID
        job_id: String,
    },

    /// Cancel a pending or scheduled job
    Cancel {
        /// Job ID
        job_id: String,
    },

    /// Manage recurring schedules
    Schedule {
        #[command(subcommand)]
        command: ScheduleCommands,
    },

    /// Show job counts and database size
    Stats,

    /// Run maintenance operations
    Maintenance {
        /// Force VACUUM even if not needed
        #[arg(long)]
        force_vacuum: bool,

        /// Override the retention window (days)
        #[arg(long)]
        retention_days: Option<i64>,
    },
}

#[derive(Subcommand)]
enum ScheduleCommands {
    /// Register a recurring schedule
    Add {
        /// Unique schedule name
        name: String,

        /// Task to run on each occurrence
        task_name: String,

        /// 5-field cron expression, evaluated in UTC
        #[arg(long, conflicts_with = "every", required_unless_present = "every")]
        cron: Option<String>,

        /// Fixed interval in seconds
        #[arg(long)]
        every: Option<u64>,

        /// Payload as a JSON object
        #[arg(long, default_value = "{}")]
        payload: String,
    },

    /// List recurring schedules
    List,

    /// Remove a recurring schedule
    Remove {
        /// Schedule name
        name: String,
    },
}

#[derive(Serialize)]
struct JsonRpcRequest {
    jsonrpc: String,
    method: String,
    params: Value,
    id: u64,
}

#[derive(Deserialize)]
struct JsonRpcResponse {
    result: Option<Value>,
    error: Option<JsonRpcError>,
}

#[derive(Deserialize)]
struct JsonRpcError {
    code: i32,
    message: String,
}

#[derive(Deserialize, Tabled)]
struct SubmitResult {
    job_id: String,
    state: String,
    deduplicated: bool,
}

#[derive(Tabled)]
struct ScheduleRow {
    name: String,
    cadence: String,
    task_name: String,
    next_run_at: String,
}

async fn call_rpc(url: &str, method: &str, params: Value) -> Result<Value> {
    let request = JsonRpcRequest {
        jsonrpc: "2.0".to_string(),
        method: method.to_string(),
        params,
        id: 1,
    };

    let client = reqwest::Client::new();
    let response: JsonRpcResponse = client
        .post(url)
        .json(&request)
        .send()
        .await
        .context("Failed to connect to daemon")?
        .json()
        .await
        .context("Failed to parse response")?;

    if let Some(error) = response.error {
        anyhow::bail!("RPC error ({}): {}", error.code, error.message);
    }

    response
        .result
        .ok_or_else(|| anyhow::anyhow!("No result in response"))
}

fn parse_payload(raw: &str) -> Result<Value> {
    let value: Value = serde_json::from_str(raw).context("Invalid JSON payload")?;
    if !value.is_object() {
        anyhow::bail!("Payload must be a JSON object");
    }
    Ok(value)
}

fn describe_cadence(cadence: &Value) -> String {
    match cadence["type"].as_str() {
        Some("cron") => format!("cron {}", cadence["expression"].as_str().unwrap_or("?")),
        Some("interval") => format!("every {}s", cadence["seconds"]),
        _ => cadence.to_string(),
    }
}

fn to_mb(bytes: &Value) -> f64 {
    bytes.as_i64().unwrap_or(0) as f64 / (1024.0 * 1024.0)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Submit {
            task_name,
            payload,
            priority,
            max_attempts,
            delay,
            dedup_key,
        } => {
            let params = json!({
                "task_name": task_name,
                "payload": parse_payload(&payload)?,
                "priority": priority,
                "max_attempts": max_attempts,
                "delay_seconds": delay,
                "dedup_key": dedup_key,
            });

            let result = call_rpc(&cli.rpc_url, "jobs.submit.v1", params).await?;
            let submitted: SubmitResult = serde_json::from_value(result)?;

            if submitted.deduplicated {
                println!("{}", "○ Existing job returned (dedup key)".yellow().bold());
            } else {
                println!("{}", "✓ Job submitted".green().bold());
            }
            println!();
            println!("{}", Table::new(vec![submitted]));
        }

        Commands::Status { job_id } => {
            let status = call_rpc(&cli.rpc_url, "jobs.status.v1", json!({ "job_id": job_id }))
                .await?;

            println!("{}", format!("Job {}", job_id).cyan().bold());
            println!();
            println!("  {} {}", "Task:".bold(), status["task_name"]);
            println!("  {} {}", "State:".bold(), status["state"]);
            println!(
                "  {} {}/{}",
                "Attempts:".bold(),
                status["attempt_count"],
                status["max_attempts"]
            );
            if !status["last_error"].is_null() {
                println!(
                    "  {} [{}] {}",
                    "Last error:".bold(),
                    status["last_error_kind"],
                    status["last_error"]
                );
            }
            if !status["progress"].is_null() {
                println!("  {} {}%", "Progress:".bold(), status["progress"]["percent"]);
            }
            if !status["result"].is_null() {
                println!("  {} {}", "Result:".bold(), status["result"]);
            }
        }

        Commands::Cancel { job_id } => {
            let result =
                call_rpc(&cli.rpc_url, "jobs.cancel.v1", json!({ "job_id": job_id })).await?;

            if result["cancelled"].as_bool().unwrap_or(false) {
                println!("{}", format!("✓ Job {} cancelled", job_id).green().bold());
            } else {
                println!(
                    "{}",
                    format!("✗ Job {} not cancellable (state {})", job_id, result["state"])
                        .red()
                        .bold()
                );
            }
        }

        Commands::Schedule { command } => match command {
            ScheduleCommands::Add {
                name,
                task_name,
                cron,
                every,
                payload,
            } => {
                let params = json!({
                    "name": name,
                    "task_name": task_name,
                    "cron": cron,
                    "interval_seconds": every,
                    "payload": parse_payload(&payload)?,
                });
                let result = call_rpc(&cli.rpc_url, "schedules.register.v1", params).await?;
                println!(
                    "{}",
                    format!("✓ Schedule {} registered ({})", name, result["schedule_id"])
                        .green()
                        .bold()
                );
            }

            ScheduleCommands::List => {
                let result = call_rpc(&cli.rpc_url, "schedules.list.v1", json!({})).await?;
                let rows: Vec<ScheduleRow> = result["schedules"]
                    .as_array()
                    .map(|schedules| {
                        schedules
                            .iter()
                            .map(|s| ScheduleRow {
                                name: s["name"].as_str().unwrap_or_default().to_string(),
                                cadence: describe_cadence(&s["cadence"]),
                                task_name: s["task_name"].as_str().unwrap_or_default().to_string(),
                                next_run_at: s["next_run_at"].to_string(),
                            })
                            .collect()
                    })
                    .unwrap_or_default();

                if rows.is_empty() {
                    println!("{}", "No recurring schedules".yellow());
                } else {
                    println!("{}", Table::new(rows));
                }
            }

            ScheduleCommands::Remove { name } => {
                let result =
                    call_rpc(&cli.rpc_url, "schedules.unregister.v1", json!({ "name": name }))
                        .await?;
                if result["removed"].as_bool().unwrap_or(false) {
                    println!("{}", format!("✓ Schedule {} removed", name).green().bold());
                } else {
                    println!("{}", format!("○ No schedule named {}", name).yellow());
                }
            }
        },

        Commands::Stats => {
            println!("{}", "System Status".cyan().bold());
            println!();

            match call_rpc(&cli.rpc_url, "admin.stats.v1", json!({})).await {
                Ok(stats) => {
                    println!("  {} {}", "RPC URL:".bold(), cli.rpc_url);
                    println!("  {} {}", "Status:".bold(), "ONLINE".green());
                    println!();
                    println!("  {} {}", "Total Jobs:".bold(), stats["total_jobs"]);
                    if let Some(by_state) = stats["jobs_by_state"].as_object() {
                        for (state, count) in by_state {
                            println!("    {:<10} {}", state, count);
                        }
                    }
                    println!("  {} {}", "Schedules:".bold(), stats["schedule_count"]);
                    println!();
                    println!(
                        "  {} {:.2} MB",
                        "DB Size:".bold(),
                        to_mb(&stats["db_size_bytes"])
                    );
                    println!("  {} {} seconds", "Uptime:".bold(), stats["uptime_seconds"]);
                }
                Err(e) => {
                    println!("  {} {}", "Status:".bold(), "ERROR".red());
                    println!("  {} {}", "Error:".bold(), e);
                }
            }
        }

        Commands::Maintenance {
            force_vacuum,
            retention_days,
        } => {
            println!("{}", "Running maintenance...".cyan().bold());
            println!();

            let params = json!({
                "force_vacuum": force_vacuum,
                "retention_days": retention_days,
            });

            match call_rpc(&cli.rpc_url, "admin.maintenance.v1", params).await {
                Ok(result) => {
                    if result["vacuum_run"].as_bool().unwrap_or(false) {
                        println!("  {} VACUUM executed", "✓".green());
                    } else {
                        println!("  ○ VACUUM skipped (not needed)");
                    }
                    println!("  {} {} jobs deleted", "✓".green(), result["jobs_deleted"]);
                    println!(
                        "  {} {:.2} MB → {:.2} MB",
                        "DB Size:".bold(),
                        to_mb(&result["db_size_before"]),
                        to_mb(&result["db_size_after"])
                    );
                }
                Err(e) => {
                    println!("  {} Maintenance failed: {}", "✗".red(), e);
                }
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_submit_args() {
        let cli = Cli::try_parse_from([
            "courier",
            "submit",
            "send_email",
            "--payload",
            r#"{"to_email":"a@b.c"}"#,
            "--priority",
            "-5",
            "--dedup-key",
            "order-1",
        ])
        .unwrap();
        match cli.command {
            Commands::Submit {
                task_name,
                priority,
                max_attempts,
                dedup_key,
                ..
            } => {
                assert_eq!(task_name, "send_email");
                assert_eq!(priority, -5);
                assert_eq!(max_attempts, 5);
                assert_eq!(dedup_key.as_deref(), Some("order-1"));
            }
            _ => panic!("expected submit"),
        }
    }

    #[test]
    fn test_schedule_add_needs_one_cadence() {
        assert!(Cli::try_parse_from(["courier", "schedule", "add", "nightly", "report"]).is_err());
        assert!(Cli::try_parse_from([
            "courier", "schedule", "add", "nightly", "report", "--cron", "0 2 * * *", "--every",
            "60",
        ])
        .is_err());
        assert!(Cli::try_parse_from([
            "courier", "schedule", "add", "nightly", "report", "--every", "60",
        ])
        .is_ok());
    }

    #[test]
    fn test_payload_must_be_object() {
        assert!(parse_payload(r#"{"a":1}"#).is_ok());
        assert!(parse_payload("[1,2]").is_err());
        assert!(parse_payload("not json").is_err());
    }

    #[test]
    fn test_describe_cadence() {
        assert_eq!(
            describe_cadence(&json!({"type": "cron", "expression": "* * * * *"})),
            "cron * * * * *"
        );
        assert_eq!(
            describe_cadence(&json!({"type": "interval", "seconds": 60})),
            "every 60s"
        );
    }
}
