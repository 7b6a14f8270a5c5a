use clap::Args;
use serde::Serialize;

use packline::pipeline::PipelinePlan;

use super::{load_context, CmdResult, GlobalArgs};

#[derive(Args, Debug, Default)]
pub struct PlanArgs {
    /// Stages to plan, in order (default: the configured sequence)
    pub stages: Vec<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanOutput {
    pub work_dir: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub env_file: Option<String>,
    /// Variable names only; values never leave the stage processes.
    pub env_keys: Vec<String>,
    #[serde(flatten)]
    pub plan: PipelinePlan,
}

pub(crate) fn run(args: PlanArgs, global: &GlobalArgs) -> CmdResult<PlanOutput> {
    let ctx = load_context(global)?;
    let plan = ctx.pipeline.plan(&args.stages)?;
    let env = ctx.environment()?;
    let env_file = ctx
        .config
        .env_file_path()?
        .filter(|path| path.is_file())
        .map(|path| path.to_string_lossy().to_string());

    Ok((
        PlanOutput {
            work_dir: ctx.config.work_dir.to_string_lossy().to_string(),
            env_file,
            env_keys: env.keys(),
            plan,
        },
        0,
    ))
}
