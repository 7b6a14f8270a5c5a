use clap::{Parser, Subcommand};

use commands::GlobalArgs;

mod commands;
mod output;

use commands::{plan, run, stage, stages};

const VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Parser)]
#[command(name = "packline")]
#[command(version = VERSION)]
#[command(about = "Lock, build, package and deploy Python serverless functions in containers")]
struct Cli {
    #[command(flatten)]
    global: GlobalArgs,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Lock Python dependencies
    Lock(stage::StageArgs),
    /// Install locked dependencies into the build directory
    Build(stage::StageArgs),
    /// Archive the dependency layer and function code
    Package(stage::StageArgs),
    /// Upload packaged archives to object storage
    Deploy(stage::StageArgs),
    /// Run the test suite in the runtime image
    Test(stage::StageArgs),
    /// Remove containers, volumes and build output
    Clean(stage::StageArgs),
    /// Run any registered stage by name
    Stage(stage::NamedStageArgs),
    /// Run stages in order, stopping at the first failure
    Run(run::RunArgs),
    /// Show rendered commands and input readiness without running anything
    Plan(plan::PlanArgs),
    /// List registered stages and the default sequence
    Stages(stages::StagesArgs),
}

fn main() -> std::process::ExitCode {
    let cli = Cli::parse();

    let (json_result, exit_code) = commands::run_json(cli.command, &cli.global);

    if let Err(err) = output::print_json_result(json_result) {
        eprintln!("{}", err);
        return std::process::ExitCode::from(1);
    }

    std::process::ExitCode::from(exit_code_to_u8(exit_code))
}

fn exit_code_to_u8(code: i32) -> u8 {
    if code <= 0 {
        0
    } else if code >= 255 {
        255
    } else {
        code as u8
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    const FAILING_BUILD: &str = r#"
[[stages]]
name = "lock"
command = "true"

[[stages]]
name = "build"
command = "echo 'pip install failed' >&2; exit 5"
after = ["lock"]

[[stages]]
name = "package"
command = "touch packaged"
after = ["build"]

[[stages]]
name = "deploy"
command = "touch deployed"
after = ["package"]
"#;

    #[test]
    fn failed_run_propagates_stage_exit_code() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("packline.toml"), FAILING_BUILD).unwrap();
        let global = GlobalArgs {
            dir: Some(dir.path().to_path_buf()),
            ..Default::default()
        };

        let (result, exit_code) =
            commands::run_json(Commands::Run(run::RunArgs::default()), &global);

        assert_eq!(exit_code, 5);
        assert_eq!(exit_code_to_u8(exit_code), 5);
        let err = result.unwrap_err();
        assert_eq!(err.code.as_str(), "stage.execution_failed");
        assert_eq!(err.details["exitCode"], 5);
        assert_eq!(err.details["run"]["status"], "failed");
        assert_eq!(err.details["run"]["summary"]["failedStage"], "build");
        assert_eq!(err.details["run"]["stages"][2]["status"], "skipped");
        assert!(!dir.path().join("packaged").exists());
        assert!(!dir.path().join("deployed").exists());
    }

    #[test]
    fn successful_run_exits_zero() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join("packline.toml"),
            FAILING_BUILD.replace("exit 5", "exit 0"),
        )
        .unwrap();
        let global = GlobalArgs {
            dir: Some(dir.path().to_path_buf()),
            ..Default::default()
        };

        let (result, exit_code) =
            commands::run_json(Commands::Run(run::RunArgs::default()), &global);

        assert_eq!(exit_code, 0);
        assert_eq!(result.unwrap()["summary"]["succeeded"], 4);
        assert!(dir.path().join("deployed").exists());
    }

    #[test]
    fn exit_codes_clamp_to_u8() {
        assert_eq!(exit_code_to_u8(-1), 0);
        assert_eq!(exit_code_to_u8(137), 137);
        assert_eq!(exit_code_to_u8(300), 255);
    }
}
