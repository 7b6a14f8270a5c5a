//! Sequential pipeline driver.
//!
//! Stages run strictly one after another. The first failure halts the run;
//! stages after it are reported as skipped and never launched.

use serde::Serialize;

use crate::artifact;
use crate::environment::Environment;
use crate::error::{Error, Result};
use crate::runner::{StageRunResult, StageRunner};

/// `Idle -> Running(i) -> { Running(i + 1) | Failed(i) | Completed }`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "state", content = "stage", rename_all = "snake_case")]
pub enum PipelineState {
    Idle,
    Running(usize),
    Failed(usize),
    Completed,
}

impl PipelineState {
    /// Begin a run of `total` stages.
    pub fn start(self, total: usize) -> Self {
        match self {
            PipelineState::Idle if total == 0 => PipelineState::Completed,
            PipelineState::Idle => PipelineState::Running(0),
            other => other,
        }
    }

    /// Record the outcome of the running stage.
    pub fn advance(self, succeeded: bool, total: usize) -> Self {
        match self {
            PipelineState::Running(i) if !succeeded => PipelineState::Failed(i),
            PipelineState::Running(i) if i + 1 >= total => PipelineState::Completed,
            PipelineState::Running(i) => PipelineState::Running(i + 1),
            other => other,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineRunStatus {
    Completed,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    Succeeded,
    Failed,
    Skipped,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StageReport {
    pub stage: String,
    pub status: StageStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<StageRunResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineRunSummary {
    pub total_stages: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub skipped: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failed_stage: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub next_actions: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineRunResult {
    pub run_id: String,
    pub status: PipelineRunStatus,
    pub state: PipelineState,
    pub stages: Vec<StageReport>,
    pub summary: PipelineRunSummary,
    /// Error that halted the run, surfaced verbatim by the CLI.
    #[serde(skip)]
    pub error: Option<Error>,
}

impl PipelineRunResult {
    pub fn succeeded(&self) -> bool {
        self.status == PipelineRunStatus::Completed
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanStepStatus {
    /// All inputs exist now.
    Ready,
    /// Some inputs are missing but an earlier planned stage produces them.
    Pending,
    /// Some inputs are missing and nothing in the plan produces them.
    Blocked,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanStep {
    pub stage: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    pub command: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub needs: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub produces: Vec<String>,
    pub status: PlanStepStatus,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub missing: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelinePlan {
    pub steps: Vec<PlanStep>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
}

pub struct Pipeline {
    runner: StageRunner,
}

impl Pipeline {
    pub fn new(runner: StageRunner) -> Self {
        Self { runner }
    }

    pub fn runner(&self) -> &StageRunner {
        &self.runner
    }

    /// Requested names, or the registry's default sequence when none are given.
    /// Every name is validated before anything runs.
    pub fn resolve_names(&self, names: &[String]) -> Result<Vec<String>> {
        let registry = self.runner.registry();
        if names.is_empty() {
            return Ok(registry.default_sequence().to_vec());
        }
        for name in names {
            registry.get(name)?;
        }
        Ok(names.to_vec())
    }

    /// Run one stage in isolation.
    pub fn run_stage(&self, name: &str, env: &Environment) -> Result<StageRunResult> {
        self.runner.run(name, env)
    }

    /// Run stages in order, halting at the first failure.
    ///
    /// Returns `Err` only when the request itself is invalid (an unknown stage
    /// name); stage failures are reported in the result.
    pub fn run(&self, names: &[String], env: &Environment) -> Result<PipelineRunResult> {
        let names = self.resolve_names(names)?;
        let total = names.len();
        let run_id = uuid::Uuid::new_v4().to_string();

        log_status!("pipeline", "Run {} :: {}", run_id, names.join(" -> "));

        let mut state = PipelineState::Idle.start(total);
        let mut reports = Vec::with_capacity(total);
        let mut halt: Option<Error> = None;

        while let PipelineState::Running(i) = state {
            let name = &names[i];
            match self.runner.run(name, env) {
                Ok(result) => {
                    reports.push(StageReport {
                        stage: name.clone(),
                        status: StageStatus::Succeeded,
                        warnings: result.warnings.clone(),
                        result: Some(result),
                        error: None,
                    });
                    state = state.advance(true, total);
                }
                Err(err) => {
                    reports.push(StageReport {
                        stage: name.clone(),
                        status: StageStatus::Failed,
                        result: None,
                        error: Some(err.message.clone()),
                        warnings: Vec::new(),
                    });
                    halt = Some(err);
                    state = state.advance(false, total);
                }
            }
        }

        let failed_stage = match state {
            PipelineState::Failed(i) => Some(names[i].clone()),
            _ => None,
        };

        if let Some(failed) = &failed_stage {
            for name in names.iter().skip(reports.len()) {
                reports.push(StageReport {
                    stage: name.clone(),
                    status: StageStatus::Skipped,
                    result: None,
                    error: None,
                    warnings: vec![format!("Skipped because '{}' did not succeed", failed)],
                });
            }
            log_status!("pipeline", "Halted at '{}'", failed);
        } else {
            log_status!("pipeline", "Completed {} stage(s)", total);
        }

        let status = if failed_stage.is_some() {
            PipelineRunStatus::Failed
        } else {
            PipelineRunStatus::Completed
        };
        let summary = build_summary(&reports, failed_stage);

        Ok(PipelineRunResult {
            run_id,
            status,
            state,
            stages: reports,
            summary,
            error: halt,
        })
    }

    /// Render every requested stage and report input readiness, without
    /// launching anything. Inputs produced by an earlier planned stage count
    /// as pending rather than blocked.
    pub fn plan(&self, names: &[String]) -> Result<PipelinePlan> {
        let names = self.resolve_names(names)?;
        let registry = self.runner.registry();
        let work_dir = self.runner.work_dir();

        let mut steps = Vec::with_capacity(names.len());
        let mut planned_outputs: Vec<String> = Vec::new();
        let mut warnings = Vec::new();

        for name in &names {
            let prepared = self.runner.prepare(registry.get(name)?)?;

            let mut missing = Vec::new();
            let mut blocked = false;
            for need in &prepared.needs {
                if artifact::is_present(work_dir, need)? {
                    continue;
                }
                if !planned_outputs.contains(need) {
                    blocked = true;
                }
                missing.push(need.clone());
            }

            let status = if missing.is_empty() {
                PlanStepStatus::Ready
            } else if blocked {
                warnings.push(format!("Stage '{}' is blocked by missing inputs", name));
                PlanStepStatus::Blocked
            } else {
                PlanStepStatus::Pending
            };

            planned_outputs.extend(prepared.produces.iter().cloned());
            steps.push(PlanStep {
                stage: prepared.name,
                label: prepared.label,
                command: prepared.command,
                needs: prepared.needs,
                produces: prepared.produces,
                status,
                missing,
            });
        }

        Ok(PipelinePlan { steps, warnings })
    }
}

fn build_summary(reports: &[StageReport], failed_stage: Option<String>) -> PipelineRunSummary {
    let count = |status: StageStatus| reports.iter().filter(|r| r.status == status).count();

    let next_actions = match &failed_stage {
        Some(stage) => vec![format!(
            "Fix the issue and re-run with 'packline run {}' to resume from the failed stage",
            stage
        )],
        None => Vec::new(),
    };

    PipelineRunSummary {
        total_stages: reports.len(),
        succeeded: count(StageStatus::Succeeded),
        failed: count(StageStatus::Failed),
        skipped: count(StageStatus::Skipped),
        failed_stage,
        next_actions,
    }
}
