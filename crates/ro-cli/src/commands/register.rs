use std::io::Write;

use clap::Args;

use ro_core::services::document;
use ro_core::services::orchestrator::Deployer;
use ro_core::Result;

use super::Context;

#[derive(Debug, Args)]
pub struct RegisterArgs {
    /// Task definition document: a file, a directory holding `rollout.json`, or an http(s) URL.
    pub document: String,

    /// Validate and print the document without registering it.
    #[arg(long)]
    pub dry_run: bool,
}

pub async fn execute(args: &RegisterArgs, ctx: &Context<'_>, out: &mut dyn Write) -> Result<()> {
    let doc = document::load_definition(&args.document).await?;
    if args.dry_run {
        writeln!(out, "{}", doc.to_pretty_json()?)?;
        return Ok(());
    }
    let deployer = Deployer::new(ctx.gateway, ctx.progress, ctx.options.clone());
    let definition = deployer.register(&doc).await?;
    writeln!(out, "{}", definition.task_definition_arn)?;
    Ok(())
}
