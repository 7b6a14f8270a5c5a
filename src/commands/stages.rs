use clap::Args;
use serde::Serialize;

use packline::Stage;

use super::{load_context, CmdResult, GlobalArgs};

#[derive(Args, Debug, Default)]
pub struct StagesArgs {}

#[derive(Debug, Serialize)]
pub struct StagesOutput {
    pub stages: Vec<Stage>,
    pub sequence: Vec<String>,
}

pub(crate) fn run(_args: StagesArgs, global: &GlobalArgs) -> CmdResult<StagesOutput> {
    let ctx = load_context(global)?;
    let registry = ctx.pipeline.runner().registry();

    Ok((
        StagesOutput {
            stages: registry.stages().to_vec(),
            sequence: registry.default_sequence().to_vec(),
        },
        0,
    ))
}
