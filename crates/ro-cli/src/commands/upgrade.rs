use std::io::Write;

use clap::Args;

use ro_core::services::orchestrator::{Deployer, UpgradeRequest};
use ro_core::Result;

use super::{definition_source, Context};

#[derive(Debug, Args)]
pub struct UpgradeArgs {
    /// Cluster the service runs in.
    pub cluster: String,

    /// Service name or ARN.
    pub service: String,

    /// Task definition document to register.
    pub path: Option<String>,

    /// Use an already registered task definition instead of a document.
    #[arg(long, value_name = "ARN")]
    pub task_definition_arn: Option<String>,

    /// Return the service to its previous task definition if it fails to stabilize.
    #[arg(long)]
    pub rollback: bool,

    /// Deregister the previous task definition once the upgrade is stable.
    #[arg(long)]
    pub deregister: bool,
}

pub async fn execute(args: &UpgradeArgs, ctx: &Context<'_>, out: &mut dyn Write) -> Result<()> {
    let definition =
        definition_source(args.path.as_deref(), args.task_definition_arn.as_deref()).await?;
    let options = ctx
        .options
        .clone()
        .with_rollback(args.rollback)
        .with_deregister(args.deregister);
    let deployer = Deployer::new(ctx.gateway, ctx.progress, options);
    let outcome = deployer
        .upgrade(&UpgradeRequest {
            cluster: args.cluster.clone(),
            service: args.service.clone(),
            definition,
        })
        .await?;
    match outcome.previous_task_definition {
        Some(previous) if previous != outcome.task_definition_arn => writeln!(
            out,
            "Service {} upgraded from {previous} to {}",
            outcome.service.service_name, outcome.task_definition_arn
        )?,
        _ => writeln!(
            out,
            "Service {} is stable on {}",
            outcome.service.service_name, outcome.task_definition_arn
        )?,
    }
    Ok(())
}
