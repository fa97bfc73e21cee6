use std::io::Write;

use clap::Args;

use ro_core::models::DefinitionSource;
use ro_core::services::document;
use ro_core::services::orchestrator::{Deployer, TaskRunRequest};
use ro_core::{DeployError, Result};

use super::Context;

#[derive(Debug, Args)]
pub struct TaskArgs {
    /// Run-task input document (cluster, taskDefinition, count and any other run-task fields).
    pub run_task: String,

    /// Override the cluster named in the input.
    #[arg(long)]
    pub cluster: Option<String>,

    /// Override the task definition named in the input.
    #[arg(long, value_name = "ARN")]
    pub task_definition_arn: Option<String>,

    /// Register this task definition document and run it.
    #[arg(long, value_name = "DOCUMENT")]
    pub register: Option<String>,

    /// Number of tasks to start.
    #[arg(long)]
    pub count: Option<u32>,
}

pub async fn execute(args: &TaskArgs, ctx: &Context<'_>, out: &mut dyn Write) -> Result<()> {
    let definition = match (&args.register, &args.task_definition_arn) {
        (Some(_), Some(_)) => {
            return Err(DeployError::Usage(
                "supply either --register or --task-definition-arn, not both".into(),
            ))
        }
        (Some(path), None) => Some(DefinitionSource::Document(
            document::load_definition(path).await?,
        )),
        (None, Some(arn)) => Some(DefinitionSource::Existing(arn.clone())),
        (None, None) => None,
    };

    let mut request = document::load_run_task(&args.run_task).await?;
    if let Some(cluster) = &args.cluster {
        request.cluster = cluster.clone();
    }
    if args.count.is_some() {
        request.count = args.count;
    }

    let deployer = Deployer::new(ctx.gateway, ctx.progress, ctx.options.clone());
    let outcome = deployer
        .run_task(&TaskRunRequest {
            request,
            definition,
        })
        .await?;
    for task in &outcome.tasks {
        writeln!(out, "Task {} stopped", task.id())?;
    }
    writeln!(
        out,
        "All {} task(s) of {} exited successfully",
        outcome.tasks.len(),
        outcome.task_definition_arn
    )?;
    Ok(())
}
