//! Stage definitions and the registry that validates and orders them.

use std::collections::{BTreeMap, HashMap, VecDeque};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// One named step of the pipeline: an external command plus the artifacts it
/// reads and writes. Commands and artifact paths may contain `{{var}}`
/// placeholders.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Stage {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    pub command: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub needs: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub produces: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub after: Vec<String>,
    /// Standalone stages are invocable by name but not part of the default sequence.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub standalone: bool,
}

impl Stage {
    pub fn new(name: impl Into<String>, command: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            label: None,
            command: command.into(),
            needs: Vec::new(),
            produces: Vec::new(),
            after: Vec::new(),
            standalone: false,
        }
    }

    pub fn label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    pub fn needs(mut self, paths: &[&str]) -> Self {
        self.needs = paths.iter().map(|p| p.to_string()).collect();
        self
    }

    pub fn produces(mut self, paths: &[&str]) -> Self {
        self.produces = paths.iter().map(|p| p.to_string()).collect();
        self
    }

    pub fn after(mut self, stages: &[&str]) -> Self {
        self.after = stages.iter().map(|s| s.to_string()).collect();
        self
    }

    pub fn standalone(mut self) -> Self {
        self.standalone = true;
        self
    }
}

#[derive(Debug, Clone)]
pub struct StageRegistry {
    stages: Vec<Stage>,
    sequence: Vec<String>,
}

impl StageRegistry {
    /// Build a registry, rejecting duplicate names, artifacts with more than
    /// one producer, unknown `after` references and ordering cycles.
    ///
    /// Producers are compared as written here; [`StageRegistry::producers`]
    /// repeats the check once variables are known.
    pub fn new(stages: Vec<Stage>) -> Result<Self> {
        for stage in &stages {
            if stage.name.trim().is_empty() {
                return Err(Error::validation_invalid_argument(
                    "stages",
                    "Stage name cannot be empty",
                    None,
                    None,
                ));
            }
            if stage.command.trim().is_empty() {
                return Err(Error::validation_invalid_argument(
                    "stages",
                    format!("Stage '{}' has an empty command", stage.name),
                    Some(stage.name.clone()),
                    None,
                ));
            }
        }

        let order = order_stages(&stages)?;
        let sequence = order
            .into_iter()
            .filter(|&idx| !stages[idx].standalone)
            .map(|idx| stages[idx].name.clone())
            .collect();

        let registry = Self { stages, sequence };
        registry.producers(|path| Some(path.to_string()))?;
        Ok(registry)
    }

    /// Map each produced artifact path, as `render` resolves it, to the stage
    /// producing it. Paths `render` cannot resolve are left out. Fails when two
    /// stages produce the same path.
    pub fn producers<F>(&self, render: F) -> Result<BTreeMap<String, String>>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut producers: BTreeMap<String, String> = BTreeMap::new();
        for stage in &self.stages {
            for path in stage.produces.iter().filter_map(|p| render(p)) {
                match producers.get(&path) {
                    Some(existing) if existing != &stage.name => {
                        return Err(Error::validation_invalid_argument(
                            "stages",
                            format!(
                                "Artifact '{}' is produced by both '{}' and '{}'",
                                path, existing, stage.name
                            ),
                            Some(path.clone()),
                            None,
                        ));
                    }
                    Some(_) => {}
                    None => {
                        producers.insert(path, stage.name.clone());
                    }
                }
            }
        }
        Ok(producers)
    }

    pub fn get(&self, name: &str) -> Result<&Stage> {
        self.stages
            .iter()
            .find(|stage| stage.name == name)
            .ok_or_else(|| Error::unknown_stage(name, self.names()))
    }

    /// Stage names in declaration order.
    pub fn names(&self) -> Vec<String> {
        self.stages.iter().map(|stage| stage.name.clone()).collect()
    }

    pub fn stages(&self) -> &[Stage] {
        &self.stages
    }

    /// Non-standalone stages ordered by `after`, ties kept in declaration order.
    pub fn default_sequence(&self) -> &[String] {
        &self.sequence
    }
}

fn order_stages(stages: &[Stage]) -> Result<Vec<usize>> {
    let mut name_index = HashMap::new();
    for (idx, stage) in stages.iter().enumerate() {
        if name_index.insert(stage.name.as_str(), idx).is_some() {
            return Err(Error::validation_invalid_argument(
                "stages",
                format!("Duplicate stage name '{}'", stage.name),
                Some(stage.name.clone()),
                None,
            ));
        }
    }

    let mut indegree = vec![0usize; stages.len()];
    let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); stages.len()];

    for (idx, stage) in stages.iter().enumerate() {
        for parent in &stage.after {
            let Some(&parent_idx) = name_index.get(parent.as_str()) else {
                return Err(Error::validation_invalid_argument(
                    "stages",
                    format!("Stage '{}' runs after unknown stage '{}'", stage.name, parent),
                    Some(stage.name.clone()),
                    None,
                ));
            };
            indegree[idx] += 1;
            dependents[parent_idx].push(idx);
        }
    }

    let mut queue: VecDeque<usize> = indegree
        .iter()
        .enumerate()
        .filter(|(_, count)| **count == 0)
        .map(|(idx, _)| idx)
        .collect();

    let mut ordered = Vec::with_capacity(stages.len());
    while let Some(idx) = queue.pop_front() {
        ordered.push(idx);
        for &child in &dependents[idx] {
            indegree[child] -= 1;
            if indegree[child] == 0 {
                queue.push_back(child);
            }
        }
    }

    if ordered.len() != stages.len() {
        let pending: Vec<String> = stages
            .iter()
            .enumerate()
            .filter(|(idx, _)| indegree[*idx] > 0)
            .map(|(_, stage)| stage.name.clone())
            .collect();
        return Err(Error::validation_invalid_argument(
            "stages",
            "Stage ordering contains a cycle",
            None,
            Some(pending),
        ));
    }

    Ok(ordered)
}
