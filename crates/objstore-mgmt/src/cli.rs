//! Command-line interface of the `objstore` binary.

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use serde::Serialize;

use crate::api::{AdminService, TriggerSyncRequest};
use crate::config::ObjstoreConfig;

/// Parsed command line.
#[derive(Parser)]
#[command(name = "objstore")]
#[command(about = "objstore lifecycle and replication service", long_about = None)]
pub struct Cli {
    /// Config file (TOML or JSON); defaults apply when it does not exist.
    #[arg(short, long, env = "OBJSTORE_CONFIG", default_value = "/etc/objstore/objstore.toml")]
    pub config: PathBuf,

    /// Subcommand to run.
    #[command(subcommand)]
    pub command: Command,
}

/// Subcommands.
#[derive(Subcommand)]
pub enum Command {
    /// Run the admin API, the replication scheduler and periodic lifecycle sweeps.
    Serve,
    /// Apply lifecycle policies once.
    Sweep,
    /// Run replication once: one policy, or every enabled policy.
    Sync {
        /// Policy id; every enabled policy when absent.
        #[arg(short, long)]
        policy: Option<String>,
        /// Copies in flight; zero runs sequentially.
        #[arg(short, long, default_value = "0")]
        workers: usize,
        /// Apply the policy's pending change log entries instead of listing the source.
        #[arg(long, requires = "policy")]
        incremental: bool,
    },
    /// Show a replication policy and when it last synced.
    Status {
        /// Policy id.
        policy_id: String,
    },
    /// List lifecycle and replication policies.
    Policies,
}

#[derive(Serialize)]
struct PolicySummary<'a, L: Serialize, R: Serialize> {
    lifecycle: &'a L,
    replication: &'a R,
}

impl Cli {
    /// Loads the config file named by `--config`.
    pub fn load_config(&self) -> Result<ObjstoreConfig> {
        ObjstoreConfig::load_or_default(&self.config)
    }

    /// Runs a one-shot subcommand against `config` and prints its result as JSON.
    pub async fn run(self, config: ObjstoreConfig) -> Result<()> {
        let service = AdminService::from_config(&config).await?;

        match self.command {
            Command::Serve => anyhow::bail!("serve is handled by the binary entry point"),
            Command::Sweep => {
                let report = service.apply_lifecycle_policies().await?;
                print_json(&report)
            }
            Command::Sync {
                policy,
                workers,
                incremental,
            } => {
                let result = service
                    .trigger_sync(TriggerSyncRequest {
                        policy_id: policy,
                        parallel_workers: Some(workers),
                        incremental,
                    })
                    .await?;
                print_json(&result)?;
                if result.failed > 0 {
                    anyhow::bail!("{} object(s) failed to sync", result.failed);
                }
                Ok(())
            }
            Command::Status { policy_id } => {
                let policy = service.get_replication_policy(&policy_id)?;
                print_json(&serde_json::json!({
                    "policy_id": policy.id,
                    "source_backend": policy.source_backend,
                    "destination_backend": policy.destination_backend,
                    "enabled": policy.enabled,
                    "replication_mode": policy.replication_mode,
                    "last_sync_time": policy.last_sync_time,
                }))
            }
            Command::Policies => print_json(&PolicySummary {
                lifecycle: &service.list_lifecycle_policies(),
                replication: &service.list_replication_policies(),
            }),
        }
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
