//!
//! # CLI for the Tempo operator
//!
//! `run` starts the controller against the current cluster, `generate` prints the
//! objects of one instance without touching a cluster.
//!
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use tracing::info;

use tempo_operator_metadata::operator_version;

use crate::config;
use crate::controller::{self, WatchScope};
use crate::generate;
use crate::logging::{self, LogFormat};
use crate::platform::K8Platform;
use crate::reconcile::Reconciler;

/// cli options
#[derive(Debug, Parser)]
#[command(name = "tempo-operator", about = "Tempo operator", version = operator_version())]
pub struct OperatorOpt {
    #[command(subcommand)]
    command: OperatorCmd,
}

#[derive(Debug, Subcommand)]
pub enum OperatorCmd {
    /// Reconcile TempoStack instances on the current cluster
    Run(RunOpt),
    /// Print the objects of a TempoStack as YAML
    Generate(GenerateOpt),
}

#[derive(Debug, Args)]
pub struct RunOpt {
    /// operator configuration file
    #[arg(long, value_name = "path", env = "TEMPO_OPERATOR_CONFIG")]
    config: Option<PathBuf>,

    /// watch only this namespace
    #[arg(short = 'n', long = "namespace", value_name = "namespace")]
    namespace: Option<String>,

    /// instances reconciled concurrently
    #[arg(long, default_value_t = 4)]
    workers: u16,

    /// text or json
    #[arg(long, default_value_t = LogFormat::Text)]
    log_format: LogFormat,
}

#[derive(Debug, Args)]
pub struct GenerateOpt {
    /// TempoStack file, standard input when omitted
    #[arg(long, value_name = "path")]
    cr: Option<PathBuf>,

    /// operator configuration file
    #[arg(long, value_name = "path")]
    config: Option<PathBuf>,
}

impl OperatorOpt {
    pub async fn process(self) -> Result<()> {
        match self.command {
            OperatorCmd::Run(opt) => opt.process().await,
            OperatorCmd::Generate(opt) => opt.process(),
        }
    }
}

impl RunOpt {
    async fn process(self) -> Result<()> {
        logging::init(self.log_format);
        info!(version = operator_version(), "starting tempo operator");

        let config = config::load(self.config.as_deref())?;
        let gates = config.gates.clone();
        let client = kube::Client::try_default()
            .await
            .context("failed to create cluster client")?;
        let platform = Arc::new(K8Platform::new(client.clone()));
        let reconciler = Arc::new(Reconciler::new(platform, config)?);

        let scope = WatchScope {
            namespace: self.namespace,
            workers: self.workers,
            gates,
        };
        controller::run(client, reconciler, scope).await;
        Ok(())
    }
}

impl GenerateOpt {
    fn process(self) -> Result<()> {
        logging::init(LogFormat::Text);

        let config = config::load(self.config.as_deref())?;
        let stack = generate::read_stack(self.cr.as_deref())?;
        let output = generate::generate(stack, &config)?;

        let mut stdout = std::io::stdout().lock();
        stdout
            .write_all(output.as_bytes())
            .context("failed to write manifests")?;
        stdout.flush()?;
        Ok(())
    }
}
