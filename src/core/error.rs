use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    ConfigMissingKey,
    ConfigInvalidToml,
    ConfigInvalidValue,
    ConfigEnvFileNotFound,

    ValidationInvalidArgument,

    StageUnknown,
    StageExecutionFailed,
    StageMissingDependency,

    InternalIoError,
    InternalJsonError,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::ConfigMissingKey => "config.missing_key",
            ErrorCode::ConfigInvalidToml => "config.invalid_toml",
            ErrorCode::ConfigInvalidValue => "config.invalid_value",
            ErrorCode::ConfigEnvFileNotFound => "config.env_file_not_found",

            ErrorCode::ValidationInvalidArgument => "validation.invalid_argument",

            ErrorCode::StageUnknown => "stage.unknown",
            ErrorCode::StageExecutionFailed => "stage.execution_failed",
            ErrorCode::StageMissingDependency => "stage.missing_dependency",

            ErrorCode::InternalIoError => "internal.io_error",
            ErrorCode::InternalJsonError => "internal.json_error",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Hint {
    pub message: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigMissingKeyDetails {
    pub key: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigInvalidTomlDetails {
    pub path: String,
    pub error: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigInvalidValueDetails {
    pub key: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    pub problem: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InvalidArgumentDetails {
    pub field: String,
    pub problem: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tried: Option<Vec<String>>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UnknownStageDetails {
    pub stage: String,
    pub known: Vec<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StageExecutionFailedDetails {
    pub stage: String,
    pub command: String,
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MissingDependencyDetails {
    pub stage: String,
    pub artifact: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub produced_by: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InternalIoErrorDetails {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
}

#[derive(Debug, Clone)]
pub struct Error {
    pub code: ErrorCode,
    pub message: String,
    pub details: Value,
    pub hints: Vec<Hint>,
}

pub type Result<T> = std::result::Result<T, Error>;

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for Error {}

fn to_details<T: Serialize>(details: T) -> Value {
    serde_json::to_value(details).unwrap_or_else(|_| Value::Object(serde_json::Map::new()))
}

impl Error {
    pub fn new(code: ErrorCode, message: impl Into<String>, details: Value) -> Self {
        Self {
            code,
            message: message.into(),
            details,
            hints: Vec::new(),
        }
    }

    pub fn validation_invalid_argument(
        field: impl Into<String>,
        problem: impl Into<String>,
        id: Option<String>,
        tried: Option<Vec<String>>,
    ) -> Self {
        let problem = problem.into();
        let details = to_details(InvalidArgumentDetails {
            field: field.into(),
            problem: problem.clone(),
            id,
            tried,
        });

        Self::new(
            ErrorCode::ValidationInvalidArgument,
            format!("Invalid argument: {}", problem),
            details,
        )
    }

    pub fn unknown_stage(stage: impl Into<String>, known: Vec<String>) -> Self {
        let stage = stage.into();
        let hint = format!("Known stages: {}", known.join(", "));
        let details = to_details(UnknownStageDetails {
            stage: stage.clone(),
            known,
        });

        Self::new(
            ErrorCode::StageUnknown,
            format!("Unknown stage '{}'", stage),
            details,
        )
        .with_hint(hint)
        .with_hint("Run 'packline stages' to see the registry")
    }

    pub fn stage_execution_failed(details: StageExecutionFailedDetails) -> Self {
        let message = format!(
            "Stage '{}' failed with exit code {}",
            details.stage, details.exit_code
        );

        Self::new(
            ErrorCode::StageExecutionFailed,
            message,
            to_details(details),
        )
    }

    pub fn missing_dependency(
        stage: impl Into<String>,
        artifact: impl Into<String>,
        produced_by: Option<String>,
    ) -> Self {
        let stage = stage.into();
        let artifact = artifact.into();
        let err = Self::new(
            ErrorCode::StageMissingDependency,
            format!("Stage '{}' requires missing artifact '{}'", stage, artifact),
            to_details(MissingDependencyDetails {
                stage,
                artifact,
                produced_by: produced_by.clone(),
            }),
        );

        match produced_by {
            Some(producer) => {
                err.with_hint(format!("Run 'packline {}' to produce it", producer))
            }
            None => err,
        }
    }

    pub fn config_missing_key(key: impl Into<String>, context: Option<String>) -> Self {
        let key = key.into();
        let hint = format!("Set it in [vars] or pass --var {}=<value>", key);
        Self::new(
            ErrorCode::ConfigMissingKey,
            format!("Missing configuration value '{}'", key),
            to_details(ConfigMissingKeyDetails { key, context }),
        )
        .with_hint(hint)
    }

    pub fn config_invalid_toml(path: impl Into<String>, err: impl std::fmt::Display) -> Self {
        Self::new(
            ErrorCode::ConfigInvalidToml,
            "Invalid TOML in configuration",
            to_details(ConfigInvalidTomlDetails {
                path: path.into(),
                error: err.to_string(),
            }),
        )
    }

    pub fn config_invalid_value(
        key: impl Into<String>,
        value: Option<String>,
        problem: impl Into<String>,
    ) -> Self {
        Self::new(
            ErrorCode::ConfigInvalidValue,
            "Invalid configuration value",
            to_details(ConfigInvalidValueDetails {
                key: key.into(),
                value,
                problem: problem.into(),
            }),
        )
    }

    pub fn config_env_file_not_found(path: impl Into<String>) -> Self {
        Self::new(
            ErrorCode::ConfigEnvFileNotFound,
            "Environment file not found",
            serde_json::json!({ "path": path.into() }),
        )
        .with_hint("Create the file or point --env-file at an existing one")
    }

    pub fn internal_io(error: impl Into<String>, context: Option<String>) -> Self {
        Self::new(
            ErrorCode::InternalIoError,
            "IO error",
            to_details(InternalIoErrorDetails {
                error: error.into(),
                context,
            }),
        )
    }

    pub fn internal_json(error: impl Into<String>, context: Option<String>) -> Self {
        Self::new(
            ErrorCode::InternalJsonError,
            "JSON error",
            serde_json::json!({ "error": error.into(), "context": context }),
        )
    }

    pub fn with_hint(mut self, message: impl Into<String>) -> Self {
        self.hints.push(Hint {
            message: message.into(),
        });
        self
    }

    /// Attach an extra field to the error details.
    pub fn with_detail(mut self, key: impl Into<String>, value: Value) -> Self {
        if !self.details.is_object() {
            self.details = Value::Object(serde_json::Map::new());
        }
        if let Value::Object(map) = &mut self.details {
            map.insert(key.into(), value);
        }
        self
    }

    /// Exit code reported by a failed stage, if this error carries one.
    pub fn stage_exit_code(&self) -> Option<i32> {
        if self.code != ErrorCode::StageExecutionFailed {
            return None;
        }
        self.details
            .get("exitCode")
            .and_then(Value::as_i64)
            .map(|code| code as i32)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_stage_lists_known_names() {
        let err = Error::unknown_stage("bulid", vec!["lock".into(), "build".into()]);
        assert_eq!(err.code.as_str(), "stage.unknown");
        assert_eq!(err.details["stage"], "bulid");
        assert!(err.hints[0].message.contains("lock, build"));
    }

    #[test]
    fn execution_failure_keeps_exit_code() {
        let err = Error::stage_execution_failed(StageExecutionFailedDetails {
            stage: "build".into(),
            command: "false".into(),
            exit_code: 42,
            stdout: String::new(),
            stderr: "boom".into(),
        });
        assert_eq!(err.stage_exit_code(), Some(42));
        assert_eq!(err.details["stderr"], "boom");
    }

    #[test]
    fn with_detail_extends_details() {
        let err = Error::missing_dependency("build", "requirements.txt", None)
            .with_detail("run", serde_json::json!({"status": "failed"}));
        assert_eq!(err.details["run"]["status"], "failed");
        assert_eq!(err.details["stage"], "build");
    }

    #[test]
    fn stage_exit_code_is_none_for_other_errors() {
        let err = Error::internal_json("eof", None);
        assert_eq!(err.stage_exit_code(), None);
    }

    #[test]
    fn missing_dependency_hints_producer() {
        let err = Error::missing_dependency("build", "requirements.txt", Some("lock".into()));
        assert_eq!(err.details["producedBy"], "lock");
        assert_eq!(err.hints[0].message, "Run 'packline lock' to produce it");
    }
}
