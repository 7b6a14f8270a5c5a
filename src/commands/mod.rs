use std::path::PathBuf;
use std::sync::Arc;

use clap::Args;
use packline::config::PipelineConfig;
use packline::{Environment, Pipeline, ProcessExecutor, StageRunner};

pub type CmdResult<T> = packline::Result<(T, i32)>;

/// Options shared by every subcommand.
#[derive(Args, Debug, Default, Clone)]
pub(crate) struct GlobalArgs {
    /// Pipeline config file (default: packline.toml in the working directory)
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Environment file with credentials and region (default: .env when present)
    #[arg(long, global = true, value_name = "PATH")]
    pub env_file: Option<String>,

    /// Template variable override, repeatable: --var bucket=my-artifacts
    #[arg(long = "var", global = true, value_name = "KEY=VALUE")]
    pub vars: Vec<String>,

    /// Working directory for stages and artifacts
    #[arg(long, global = true, value_name = "PATH")]
    pub dir: Option<PathBuf>,
}

/// Resolved configuration plus the pipeline built from it.
pub(crate) struct Context {
    pub config: PipelineConfig,
    pub pipeline: Pipeline,
}

impl Context {
    pub fn environment(&self) -> packline::Result<Environment> {
        self.config.load_environment()
    }
}

pub(crate) fn load_context(global: &GlobalArgs) -> packline::Result<Context> {
    let work_dir = match &global.dir {
        Some(dir) => dir.clone(),
        None => std::env::current_dir().map_err(|e| {
            packline::Error::internal_io(e.to_string(), Some("resolve working directory".into()))
        })?,
    };

    let mut config = PipelineConfig::load(work_dir, global.config.as_deref())?;
    if let Some(env_file) = &global.env_file {
        config.set_env_file(env_file.clone());
    }
    config.apply_var_overrides(&global.vars)?;

    let runner = StageRunner::new(
        config.registry()?,
        config.vars.clone(),
        config.work_dir.clone(),
        Arc::new(ProcessExecutor::new()),
    );

    Ok(Context {
        config,
        pipeline: Pipeline::new(runner),
    })
}

pub mod plan;
pub mod run;
pub mod stage;
pub mod stages;

/// Dispatch a command to its handler and map result to JSON.
macro_rules! dispatch {
    ($args:expr, $global:expr, $module:ident) => {
        crate::output::map_cmd_result_to_json($module::run($args, $global))
    };
}

pub(crate) fn run_json(
    command: crate::Commands,
    global: &GlobalArgs,
) -> (packline::Result<serde_json::Value>, i32) {
    use packline::defaults::{BUILD, CLEAN, DEPLOY, LOCK, PACKAGE, TEST};

    match command {
        crate::Commands::Lock(args) => dispatch!(stage::Invocation::new(LOCK, args), global, stage),
        crate::Commands::Build(args) => {
            dispatch!(stage::Invocation::new(BUILD, args), global, stage)
        }
        crate::Commands::Package(args) => {
            dispatch!(stage::Invocation::new(PACKAGE, args), global, stage)
        }
        crate::Commands::Deploy(args) => {
            dispatch!(stage::Invocation::new(DEPLOY, args), global, stage)
        }
        crate::Commands::Test(args) => dispatch!(stage::Invocation::new(TEST, args), global, stage),
        crate::Commands::Clean(args) => {
            dispatch!(stage::Invocation::new(CLEAN, args), global, stage)
        }
        crate::Commands::Stage(args) => dispatch!(args.into(), global, stage),
        crate::Commands::Run(args) => dispatch!(args, global, run),
        crate::Commands::Plan(args) => dispatch!(args, global, plan),
        crate::Commands::Stages(args) => dispatch!(args, global, stages),
    }
}
