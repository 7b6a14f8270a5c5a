use clap::Args;

use packline::PipelineRunResult;

use super::{load_context, CmdResult, GlobalArgs};

#[derive(Args, Debug, Default)]
pub struct RunArgs {
    /// Stages to run, in order (default: the configured sequence, lock -> build -> package -> deploy)
    pub stages: Vec<String>,
}

pub(crate) fn run(args: RunArgs, global: &GlobalArgs) -> CmdResult<PipelineRunResult> {
    let ctx = load_context(global)?;
    let names = ctx.pipeline.resolve_names(&args.stages)?;
    let env = ctx.environment()?;

    let result = ctx.pipeline.run(&names, &env)?;

    match &result.error {
        Some(err) if !result.succeeded() => {
            let report = serde_json::to_value(&result).map_err(|e| {
                packline::Error::internal_json(e.to_string(), Some("serialize run".to_string()))
            })?;
            Err(err.clone().with_detail("run", report))
        }
        _ => Ok((result, 0)),
    }
}
