use clap::Args;
use serde::Serialize;

use packline::pipeline::PipelinePlan;
use packline::StageRunResult;

use super::{load_context, CmdResult, GlobalArgs};

#[derive(Args, Debug, Default)]
pub struct StageArgs {
    /// Render the command and check inputs without running it
    #[arg(long)]
    pub dry_run: bool,
}

#[derive(Args, Debug)]
pub struct NamedStageArgs {
    /// Stage name, including stages added in packline.toml
    pub name: String,

    #[command(flatten)]
    pub options: StageArgs,
}

pub struct Invocation {
    name: String,
    args: StageArgs,
}

impl Invocation {
    pub fn new(name: &str, args: StageArgs) -> Self {
        Self {
            name: name.to_string(),
            args,
        }
    }
}

impl From<NamedStageArgs> for Invocation {
    fn from(args: NamedStageArgs) -> Self {
        Self {
            name: args.name,
            args: args.options,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
pub enum StageOutput {
    Ran(StageRunResult),
    Planned(PipelinePlan),
}

pub(crate) fn run(invocation: Invocation, global: &GlobalArgs) -> CmdResult<StageOutput> {
    let ctx = load_context(global)?;
    let names = ctx.pipeline.resolve_names(&[invocation.name])?;

    if invocation.args.dry_run {
        let plan = ctx.pipeline.plan(&names)?;
        return Ok((StageOutput::Planned(plan), 0));
    }

    let env = ctx.environment()?;
    let result = ctx.pipeline.run_stage(&names[0], &env)?;
    Ok((StageOutput::Ran(result), 0))
}
