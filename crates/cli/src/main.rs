//! Courier CLI - operator command line for the Courier job queue
//!
//! Talks JSON-RPC to a running daemon.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use colored::Colorize;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tabled::{Table, Tabled};

const DEFAULT_RPC_URL: &str = "http://127.0.0.1:7600";

#[derive(Parser)]
#[command(name = "courier")]
#[command(about = "Courier job queue CLI", long_about = None)]
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
    /// Enqueue a new job
    Enqueue {
        /// Task type (e.g. create_order, tracking_number)
        #[arg(short, long)]
        task_type: String,

        /// Payload as JSON string
        #[arg(short, long)]
        payload: String,

        /// Seconds before the job becomes claimable
        #[arg(short, long, default_value = "0")]
        delay: u64,

        /// Attempt budget (daemon default when omitted)
        #[arg(short, long)]
        max_attempts: Option<i32>,
    },

    /// Show one job
    Job {
        /// Job ID
        job_id: i64,
    },

    /// Show job counts and worker utilization
    Stats,
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
struct EnqueueResult {
    job_id: i64,
    status: String,
}

#[derive(Deserialize)]
struct JobView {
    id: i64,
    task_type: String,
    status: String,
    payload: Value,
    result: Option<Value>,
    attempts: i32,
    max_attempts: i32,
    available_at: i64,
    started_at: Option<i64>,
    completed_at: Option<i64>,
    error_message: Option<String>,
    created_at: i64,
}

#[derive(Tabled)]
struct Field {
    field: &'static str,
    value: String,
}

#[derive(Deserialize, Tabled)]
struct StatusCountRow {
    task_type: String,
    status: String,
    count: i64,
}

#[derive(Deserialize, Tabled)]
struct WorkerRow {
    name: String,
    #[tabled(display_with = "display_list")]
    task_types: Vec<String>,
    concurrency_limit: usize,
    active_count: usize,
    free_slots: usize,
    running: bool,
}

#[derive(Deserialize)]
struct Stats {
    jobs: Vec<StatusCountRow>,
    workers: Vec<WorkerRow>,
    total_active: usize,
    uptime_seconds: u64,
}

fn display_list(items: &[String]) -> String {
    items.join(", ")
}

fn format_millis(millis: i64) -> String {
    DateTime::<Utc>::from_timestamp_millis(millis)
        .map(|t| t.to_rfc3339())
        .unwrap_or_else(|| millis.to_string())
}

fn format_optional_millis(millis: Option<i64>) -> String {
    millis.map(format_millis).unwrap_or_else(|| "-".to_string())
}

fn colored_status(status: &str) -> String {
    match status {
        "completed" => status.green().to_string(),
        "failed" => status.red().to_string(),
        "in_progress" => status.cyan().to_string(),
        _ => status.yellow().to_string(),
    }
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

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Enqueue {
            task_type,
            payload,
            delay,
            max_attempts,
        } => {
            let payload_json: Value =
                serde_json::from_str(&payload).context("Invalid JSON payload")?;

            let mut params = json!({
                "task_type": task_type,
                "payload": payload_json,
                "delay_seconds": delay,
            });
            if let Some(max_attempts) = max_attempts {
                params["max_attempts"] = json!(max_attempts);
            }

            let result = call_rpc(&cli.rpc_url, "jobs.enqueue.v1", params).await?;
            let enqueue_result: EnqueueResult = serde_json::from_value(result)?;

            println!("{}", "✓ Job enqueued".green().bold());
            println!();
            println!("{}", Table::new(vec![enqueue_result]));
        }

        Commands::Job { job_id } => {
            let result = call_rpc(&cli.rpc_url, "jobs.get.v1", json!({ "job_id": job_id })).await?;
            let job: JobView = serde_json::from_value(result).context("Unexpected job format")?;

            println!("{}", format!("Job {}", job.id).cyan().bold());
            println!();

            let fields = vec![
                Field { field: "task_type", value: job.task_type },
                Field { field: "status", value: colored_status(&job.status) },
                Field {
                    field: "attempts",
                    value: format!("{}/{}", job.attempts, job.max_attempts),
                },
                Field { field: "created_at", value: format_millis(job.created_at) },
                Field { field: "available_at", value: format_millis(job.available_at) },
                Field { field: "started_at", value: format_optional_millis(job.started_at) },
                Field { field: "completed_at", value: format_optional_millis(job.completed_at) },
                Field {
                    field: "error",
                    value: job.error_message.unwrap_or_else(|| "-".to_string()),
                },
                Field { field: "payload", value: job.payload.to_string() },
                Field {
                    field: "result",
                    value: job.result.map(|r| r.to_string()).unwrap_or_else(|| "-".to_string()),
                },
            ];
            println!("{}", Table::new(fields));
        }

        Commands::Stats => {
            println!("{}", "Queue Status".cyan().bold());
            println!();

            match call_rpc(&cli.rpc_url, "admin.stats.v1", json!({})).await {
                Ok(result) => {
                    let stats: Stats =
                        serde_json::from_value(result).context("Unexpected stats format")?;

                    println!("  {} {}", "RPC URL:".bold(), cli.rpc_url);
                    println!("  {} {}", "Status:".bold(), "ONLINE".green());
                    println!("  {} {}", "In flight:".bold(), stats.total_active);
                    println!("  {} {} seconds", "Uptime:".bold(), stats.uptime_seconds);
                    println!();

                    if stats.jobs.is_empty() {
                        println!("  {}", "No jobs".yellow());
                    } else {
                        println!("{}", Table::new(stats.jobs));
                    }
                    println!();

                    if stats.workers.is_empty() {
                        println!("  {}", "No workers running".yellow());
                    } else {
                        println!("{}", Table::new(stats.workers));
                    }
                }
                Err(e) => {
                    println!("  {} {}", "Status:".bold(), "ERROR".red());
                    println!("  {} {}", "Error:".bold(), e);
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
    fn test_cli_parses_enqueue() {
        let cli = Cli::try_parse_from([
            "courier",
            "enqueue",
            "--task-type",
            "create_order",
            "--payload",
            r#"{"order_id":7}"#,
            "--max-attempts",
            "3",
        ])
        .unwrap();

        match cli.command {
            Commands::Enqueue {
                task_type,
                delay,
                max_attempts,
                ..
            } => {
                assert_eq!(task_type, "create_order");
                assert_eq!(delay, 0);
                assert_eq!(max_attempts, Some(3));
            }
            _ => panic!("expected enqueue"),
        }
    }

    #[test]
    fn test_format_millis() {
        assert_eq!(format_millis(0), "1970-01-01T00:00:00+00:00");
        assert_eq!(format_optional_millis(None), "-");
    }
}
