//! CFDP CLI - thin client over the server's HTTP API

use anyhow::Result;
use clap::{Parser, Subcommand};
use serde_json::{json, Value};
use uuid::Uuid;

use cfdp_common::types::{Cycle, DataType};

mod api;

use api::ApiClient;

#[derive(Parser)]
#[command(name = "cfdp", about = "Campaign finance data platform CLI", version)]
struct Cli {
    /// Server base URL
    #[arg(long, env = "CFDP_SERVER_URL", default_value = "http://127.0.0.1:8000")]
    server_url: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Launch an import job
    Import {
        /// Data type (candidates, committees, contributions); omit for all
        #[arg(long)]
        data_type: Option<DataType>,
        /// Reporting cycle (even year), e.g. 2024
        #[arg(long)]
        cycle: Option<Cycle>,
        /// Multiple cycles; every data type is imported for each
        #[arg(long, value_delimiter = ',')]
        cycles: Option<Vec<Cycle>>,
        /// Re-import even when the source file is unchanged
        #[arg(long)]
        force: bool,
        /// Delete existing rows for the (type, cycle) first
        #[arg(long)]
        cleanup: bool,
    },
    /// Inspect and manage jobs
    Jobs {
        #[command(subcommand)]
        command: JobsCommand,
    },
    /// Verify stored counts against the source files for a cycle
    Verify {
        cycle: Cycle,
        /// Also run a random sample check for this data type
        #[arg(long)]
        sample: Option<DataType>,
        #[arg(long, default_value_t = 100)]
        sample_size: usize,
    },
    /// Fill missing candidate ids on contributions
    Backfill {
        #[arg(long, default_value_t = 50)]
        batch_size: usize,
        #[arg(long, default_value_t = 1000)]
        limit: usize,
    },
    /// Server row-count summary
    Stats,
}

#[derive(Subcommand)]
enum JobsCommand {
    /// Recent jobs
    List {
        #[arg(long, default_value_t = 20)]
        limit: i64,
    },
    /// Jobs that have not reached a terminal state
    Incomplete,
    /// One job
    Get { job_id: Uuid },
    /// Request cancellation
    Cancel { job_id: Uuid },
    /// Resume a failed or cancelled job
    Resume { job_id: Uuid },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let client = ApiClient::new(&cli.server_url)?;

    let output = match cli.command {
        Commands::Import { data_type, cycle, cycles, force, cleanup } => {
            let body = json!({
                "data_type": data_type,
                "cycle": cycle,
                "cycles": cycles,
                "force": force,
                "cleanup": cleanup,
            });
            client.post("/api/v1/imports", &body).await?
        }
        Commands::Jobs { command } => match command {
            JobsCommand::List { limit } => {
                client.get(&format!("/api/v1/jobs?limit={limit}")).await?
            }
            JobsCommand::Incomplete => client.get("/api/v1/jobs/incomplete").await?,
            JobsCommand::Get { job_id } => client.get(&format!("/api/v1/jobs/{job_id}")).await?,
            JobsCommand::Cancel { job_id } => {
                client
                    .post(&format!("/api/v1/jobs/{job_id}/cancel"), &json!({}))
                    .await?
            }
            JobsCommand::Resume { job_id } => {
                client
                    .post(&format!("/api/v1/jobs/{job_id}/resume"), &json!({}))
                    .await?
            }
        },
        Commands::Verify { cycle, sample, sample_size } => {
            let report = client.post(&format!("/api/v1/verify/{cycle}"), &json!({})).await?;
            match sample {
                Some(data_type) => {
                    let sample_report = client
                        .post(
                            &format!(
                                "/api/v1/verify/{cycle}/sample?data_type={data_type}&sample_size={sample_size}"
                            ),
                            &json!({}),
                        )
                        .await?;
                    json!({ "counts": report, "sample": sample_report })
                }
                None => report,
            }
        }
        Commands::Backfill { batch_size, limit } => {
            let body = json!({ "batch_size": batch_size, "limit": limit });
            client.post("/api/v1/backfill/candidate-ids", &body).await?
        }
        Commands::Stats => client.get("/stats").await?,
    };

    print_value(&output);
    Ok(())
}

fn print_value(value: &Value) {
    match serde_json::to_string_pretty(value) {
        Ok(pretty) => println!("{pretty}"),
        Err(_) => println!("{value}"),
    }
}
