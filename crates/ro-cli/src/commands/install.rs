use std::io::Write;

use clap::Args;

use ro_core::services::orchestrator::{Deployer, InstallRequest};
use ro_core::Result;

use super::{definition_source, Context};

#[derive(Debug, Args)]
pub struct InstallArgs {
    /// Cluster to create the service in.
    pub cluster: String,

    /// Task definition document to register.
    pub path: Option<String>,

    /// Name of the service to create.
    #[arg(long, short)]
    pub name: String,

    /// Use an already registered task definition instead of a document.
    #[arg(long, value_name = "ARN")]
    pub task_definition_arn: Option<String>,

    /// Delete the service and its new task definition if it fails to stabilize.
    #[arg(long)]
    pub rollback: bool,
}

pub async fn execute(args: &InstallArgs, ctx: &Context<'_>, out: &mut dyn Write) -> Result<()> {
    let definition =
        definition_source(args.path.as_deref(), args.task_definition_arn.as_deref()).await?;
    let options = ctx.options.clone().with_rollback(args.rollback);
    let deployer = Deployer::new(ctx.gateway, ctx.progress, options);
    let outcome = deployer
        .install(&InstallRequest {
            cluster: args.cluster.clone(),
            service: args.name.clone(),
            definition,
        })
        .await?;
    writeln!(
        out,
        "Service {} is stable on {}",
        outcome.service.service_name, outcome.task_definition_arn
    )?;
    Ok(())
}
