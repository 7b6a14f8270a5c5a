//! Stage execution: render, check inputs, launch one process, report.
//!
//! Commands run through `sh -c` because stage templates chain tools with
//! `&&` and rely on shell globbing. The stage environment is layered over the
//! inherited process environment.

use std::collections::BTreeMap;
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::process::{Command, ExitStatus, Stdio};
use std::sync::Arc;
use std::thread;
use std::time::Instant;

use serde::Serialize;

use crate::artifact::{self, ArtifactChange};
use crate::environment::Environment;
use crate::error::{Error, Result, StageExecutionFailedDetails};
use crate::stage::{Stage, StageRegistry};
use crate::utils::command::CapturedOutput;
use crate::utils::template;

/// Result of one external process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutput {
    pub output: CapturedOutput,
    pub success: bool,
    pub exit_code: i32,
}

impl CommandOutput {
    pub fn spawn_failure(message: String) -> Self {
        Self {
            output: CapturedOutput::new(String::new(), message),
            success: false,
            exit_code: -1,
        }
    }
}

/// Launches exactly one external command per call.
pub trait CommandExecutor: Send + Sync {
    fn execute(&self, command: &str, work_dir: &Path, env: &Environment) -> CommandOutput;
}

/// Runs commands with `sh -c`, echoing their output to stderr while capturing it.
#[derive(Debug, Clone)]
pub struct ProcessExecutor {
    echo: bool,
}

impl ProcessExecutor {
    pub fn new() -> Self {
        Self { echo: true }
    }

    /// Capture output without echoing it.
    pub fn quiet() -> Self {
        Self { echo: false }
    }
}

impl Default for ProcessExecutor {
    fn default() -> Self {
        Self::new()
    }
}

impl CommandExecutor for ProcessExecutor {
    fn execute(&self, command: &str, work_dir: &Path, env: &Environment) -> CommandOutput {
        #[cfg(windows)]
        let mut cmd = {
            let mut cmd = Command::new("cmd");
            cmd.args(["/C", command]);
            cmd
        };

        #[cfg(not(windows))]
        let mut cmd = {
            let mut cmd = Command::new("sh");
            cmd.args(["-c", command]);
            cmd
        };

        cmd.current_dir(work_dir)
            .envs(env.iter())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        let mut child = match cmd.spawn() {
            Ok(child) => child,
            Err(e) => return CommandOutput::spawn_failure(format!("Command error: {}", e)),
        };

        let echo = self.echo;
        let stdout = child.stdout.take();
        let stderr = child.stderr.take();

        let (stdout, stderr) = thread::scope(|scope| {
            let out = scope.spawn(move || stdout.map(|r| pump(r, echo)).unwrap_or_default());
            let err = scope.spawn(move || stderr.map(|r| pump(r, echo)).unwrap_or_default());
            (
                out.join().unwrap_or_default(),
                err.join().unwrap_or_default(),
            )
        });

        match child.wait() {
            Ok(status) => CommandOutput {
                output: CapturedOutput::from_bytes(&stdout, &stderr),
                success: status.success(),
                exit_code: exit_code_of(status),
            },
            Err(e) => CommandOutput::spawn_failure(format!("Command error: {}", e)),
        }
    }
}

fn snapshot_warning(when: &str, err: &Error) -> String {
    let reason = err
        .details
        .get("error")
        .and_then(|v| v.as_str())
        .unwrap_or(err.message.as_str());
    format!("Could not fingerprint outputs {} run: {}", when, reason)
}

/// Exit code as a shell reports it: `128 + signal` for a killed process.
fn exit_code_of(status: ExitStatus) -> i32 {
    if let Some(code) = status.code() {
        return code;
    }

    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return 128 + signal;
        }
    }

    -1
}

/// Copy a child stream into a buffer, echoing each chunk to stderr.
fn pump<R: Read>(mut reader: R, echo: bool) -> Vec<u8> {
    let mut captured = Vec::new();
    let mut buf = [0u8; 8192];
    loop {
        match reader.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => {
                if echo {
                    let mut handle = io::stderr().lock();
                    let _ = handle.write_all(&buf[..n]);
                    let _ = handle.flush();
                }
                captured.extend_from_slice(&buf[..n]);
            }
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(_) => break,
        }
    }
    captured
}

/// A stage with its command and artifact paths rendered.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PreparedStage {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    pub command: String,
    pub needs: Vec<String>,
    pub produces: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StageRunResult {
    pub stage: String,
    pub command: String,
    pub success: bool,
    pub exit_code: i32,
    pub started_at: String,
    pub duration_ms: u64,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub artifacts: Vec<ArtifactChange>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
    #[serde(skip)]
    pub output: CapturedOutput,
}

pub struct StageRunner {
    registry: StageRegistry,
    vars: BTreeMap<String, String>,
    work_dir: PathBuf,
    executor: Arc<dyn CommandExecutor>,
}

impl StageRunner {
    pub fn new(
        registry: StageRegistry,
        vars: BTreeMap<String, String>,
        work_dir: impl Into<PathBuf>,
        executor: Arc<dyn CommandExecutor>,
    ) -> Self {
        Self {
            registry,
            vars,
            work_dir: work_dir.into(),
            executor,
        }
    }

    pub fn registry(&self) -> &StageRegistry {
        &self.registry
    }

    pub fn work_dir(&self) -> &Path {
        &self.work_dir
    }

    /// Render a stage's command and artifact paths.
    pub fn prepare(&self, stage: &Stage) -> Result<PreparedStage> {
        let command = template::render_shell(&stage.command, &self.vars)?;
        let needs = self.render_paths(&stage.needs)?;
        let produces = self.render_paths(&stage.produces)?;

        Ok(PreparedStage {
            name: stage.name.clone(),
            label: stage.label.clone(),
            command,
            needs,
            produces,
        })
    }

    fn render_paths(&self, paths: &[String]) -> Result<Vec<String>> {
        paths
            .iter()
            .map(|path| template::render(path, &self.vars))
            .collect()
    }

    /// Name of the stage producing a rendered artifact path.
    pub fn producer_of(&self, path: &str) -> Option<String> {
        self.registry
            .producers(|p| template::render(p, &self.vars).ok())
            .ok()?
            .remove(path)
    }

    /// Fail with MissingDependency on the first absent input.
    pub fn check_inputs(&self, prepared: &PreparedStage) -> Result<()> {
        for path in &prepared.needs {
            if !artifact::is_present(&self.work_dir, path)? {
                return Err(Error::missing_dependency(
                    &prepared.name,
                    path,
                    self.producer_of(path),
                ));
            }
        }
        Ok(())
    }

    /// Look up a stage by name and run it.
    pub fn run(&self, name: &str, env: &Environment) -> Result<StageRunResult> {
        let stage = self.registry.get(name)?;
        self.run_stage(stage, env)
    }

    /// Run one stage. Nothing is launched unless the command renders and every
    /// input artifact is present. A non-zero exit is returned as an error
    /// carrying the unchanged exit code and the captured output.
    pub fn run_stage(&self, stage: &Stage, env: &Environment) -> Result<StageRunResult> {
        let prepared = self.prepare(stage)?;
        self.check_inputs(&prepared)?;

        let mut warnings = Vec::new();
        let before = match artifact::snapshot(&self.work_dir, &prepared.produces) {
            Ok(states) => states,
            Err(err) => {
                warnings.push(snapshot_warning("before", &err));
                Vec::new()
            }
        };

        log_status!("stage", "{} :: {}", prepared.name, prepared.command);
        let started_at = chrono::Utc::now().to_rfc3339();
        let clock = Instant::now();
        let result = self
            .executor
            .execute(&prepared.command, &self.work_dir, env);
        let duration_ms = clock.elapsed().as_millis() as u64;

        if !result.success {
            log_status!(
                "stage",
                "{} failed with exit code {}",
                prepared.name,
                result.exit_code
            );
            let reason = result.output.error_text().lines().last().unwrap_or("").to_string();
            let mut err = Error::stage_execution_failed(StageExecutionFailedDetails {
                stage: prepared.name,
                command: prepared.command,
                exit_code: result.exit_code,
                stdout: result.output.stdout,
                stderr: result.output.stderr,
            });
            if !reason.is_empty() {
                err.message = format!("{}: {}", err.message, reason);
            }
            return Err(err);
        }

        let artifacts = match artifact::snapshot(&self.work_dir, &prepared.produces) {
            Ok(after) => artifact::diff(&before, &after),
            Err(err) => {
                warnings.push(snapshot_warning("after", &err));
                Vec::new()
            }
        };
        warnings.extend(
            artifacts
                .iter()
                .filter(|a| !a.present)
                .map(|a| format!("Declared artifact '{}' was not produced", a.path)),
        );

        log_status!("stage", "{} finished in {}ms", prepared.name, duration_ms);

        Ok(StageRunResult {
            stage: prepared.name,
            command: prepared.command,
            success: true,
            exit_code: result.exit_code,
            started_at,
            duration_ms,
            artifacts,
            warnings,
            output: result.output,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stage::Stage;
    use std::fs;

    fn runner(dir: &Path, stages: Vec<Stage>) -> StageRunner {
        let mut vars = BTreeMap::new();
        vars.insert("out".to_string(), "dist".to_string());
        StageRunner::new(
            StageRegistry::new(stages).unwrap(),
            vars,
            dir,
            Arc::new(ProcessExecutor::quiet()),
        )
    }

    #[test]
    fn success_returns_exit_code_and_output() {
        let dir = tempfile::tempdir().unwrap();
        let runner = runner(dir.path(), vec![Stage::new("hello", "echo hello")]);
        let result = runner.run("hello", &Environment::new()).unwrap();
        assert!(result.success);
        assert_eq!(result.exit_code, 0);
        assert_eq!(result.output.stdout.trim(), "hello");
    }

    #[test]
    fn failure_keeps_exit_code_unchanged() {
        let dir = tempfile::tempdir().unwrap();
        let runner = runner(
            dir.path(),
            vec![Stage::new("fail", "echo broken >&2; exit 7")],
        );
        let err = runner.run("fail", &Environment::new()).unwrap_err();
        assert_eq!(err.code.as_str(), "stage.execution_failed");
        assert_eq!(err.stage_exit_code(), Some(7));
        assert_eq!(err.details["stderr"].as_str().unwrap().trim(), "broken");
        assert_eq!(err.message, "Stage 'fail' failed with exit code 7: broken");
    }

    #[cfg(unix)]
    #[test]
    fn killed_stage_reports_signal_exit_code() {
        let dir = tempfile::tempdir().unwrap();
        let runner = runner(dir.path(), vec![Stage::new("oom", "kill -9 $$")]);
        let err = runner.run("oom", &Environment::new()).unwrap_err();
        assert_eq!(err.stage_exit_code(), Some(137));
    }

    #[cfg(unix)]
    #[test]
    fn dangling_output_link_is_a_warning() {
        let dir = tempfile::tempdir().unwrap();
        let runner = runner(
            dir.path(),
            vec![Stage::new("package", "mkdir -p dist && ln -sf nowhere dist/app.zip; exit 0")
                .produces(&["dist/*.zip"])],
        );
        let result = runner.run("package", &Environment::new()).unwrap();
        assert!(result.success);
        assert!(!result.artifacts[0].present);
        assert_eq!(
            result.warnings,
            vec!["Declared artifact 'dist/*.zip' was not produced".to_string()]
        );
    }

    #[cfg(unix)]
    #[test]
    fn unreadable_output_is_a_warning() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let runner = runner(
            dir.path(),
            vec![Stage::new("lock", "echo x > secret.lock && chmod 000 secret.lock")
                .produces(&["secret.lock"])],
        );
        let result = runner.run("lock", &Environment::new());
        let lock = dir.path().join("secret.lock");
        let readable = fs::read(&lock).is_ok();
        fs::set_permissions(&lock, fs::Permissions::from_mode(0o644)).unwrap();

        let result = result.unwrap();
        assert!(result.success);
        if !readable {
            assert!(result.artifacts.is_empty());
            assert!(result.warnings[0].starts_with("Could not fingerprint outputs after run"));
        }
    }

    #[test]
    fn environment_is_applied() {
        let dir = tempfile::tempdir().unwrap();
        let runner = runner(
            dir.path(),
            vec![Stage::new("region", "printf %s \"$AWS_DEFAULT_REGION\"")],
        );
        let env = Environment::from_pairs([("AWS_DEFAULT_REGION", "ap-south-1")]);
        let result = runner.run("region", &env).unwrap();
        assert_eq!(result.output.stdout, "ap-south-1");
    }

    #[test]
    fn runs_in_work_dir() {
        let dir = tempfile::tempdir().unwrap();
        let runner = runner(
            dir.path(),
            vec![Stage::new("touch", "mkdir -p {{out}} && echo x > {{out}}/marker")
                .produces(&["{{out}}/marker"])],
        );
        let result = runner.run("touch", &Environment::new()).unwrap();
        assert!(dir.path().join("dist/marker").exists());
        assert_eq!(result.artifacts[0].path, "dist/marker");
        assert!(result.artifacts[0].changed);
        assert!(result.warnings.is_empty());
    }

    #[test]
    fn missing_output_is_a_warning() {
        let dir = tempfile::tempdir().unwrap();
        let runner = runner(
            dir.path(),
            vec![Stage::new("noop", "true").produces(&["never.txt"])],
        );
        let result = runner.run("noop", &Environment::new()).unwrap();
        assert_eq!(result.warnings.len(), 1);
    }

    #[test]
    fn missing_input_fails_before_launch() {
        let dir = tempfile::tempdir().unwrap();
        let runner = runner(
            dir.path(),
            vec![
                Stage::new("lock", "true").produces(&["requirements.txt"]),
                Stage::new("build", "touch launched").needs(&["requirements.txt"]),
            ],
        );
        let err = runner.run("build", &Environment::new()).unwrap_err();
        assert_eq!(err.code.as_str(), "stage.missing_dependency");
        assert_eq!(err.details["producedBy"], "lock");
        assert!(!dir.path().join("launched").exists());
    }

    #[test]
    fn unresolved_placeholder_fails_before_launch() {
        let dir = tempfile::tempdir().unwrap();
        let runner = runner(
            dir.path(),
            vec![Stage::new("deploy", "touch launched && echo {{bucket}}")],
        );
        let err = runner.run("deploy", &Environment::new()).unwrap_err();
        assert_eq!(err.code.as_str(), "config.missing_key");
        assert!(!dir.path().join("launched").exists());
    }

    #[test]
    fn spawn_in_missing_dir_reports_failure() {
        let dir = tempfile::tempdir().unwrap();
        let gone = dir.path().join("gone");
        let runner = runner(&gone, vec![Stage::new("x", "true")]);
        let err = runner.run("x", &Environment::new()).unwrap_err();
        assert_eq!(err.stage_exit_code(), Some(-1));
    }

    #[test]
    fn prepare_renders_paths_verbatim() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir(dir.path().join("dist")).unwrap();
        let runner = runner(
            dir.path(),
            vec![Stage::new("p", "ls {{out}}").needs(&["{{out}}"])],
        );
        let prepared = runner.prepare(runner.registry().get("p").unwrap()).unwrap();
        assert_eq!(prepared.command, "ls dist");
        assert_eq!(prepared.needs, vec!["dist"]);
        assert!(runner.check_inputs(&prepared).is_ok());
    }

    #[test]
    fn missing_input_names_producer_through_variables() {
        let dir = tempfile::tempdir().unwrap();
        let runner = runner(
            dir.path(),
            vec![
                Stage::new("package", "true").produces(&["{{out}}/app.zip"]),
                Stage::new("deploy", "touch launched").needs(&["dist/app.zip"]),
            ],
        );
        let err = runner.run("deploy", &Environment::new()).unwrap_err();
        assert_eq!(err.details["producedBy"], "package");
    }
}
