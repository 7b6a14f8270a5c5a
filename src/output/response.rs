//! CLI response formatting and output.
//!
//! Provides JSON envelope, printing, and exit code mapping.

use packline::error::Hint;
use packline::{Error, ErrorCode, Result};
use serde::Serialize;

#[derive(Debug, Serialize)]
pub struct CliResponse<T: Serialize> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<CliError>,
}

#[derive(Debug, Serialize)]
pub struct CliError {
    pub code: String,
    pub message: String,
    pub details: serde_json::Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hints: Option<Vec<Hint>>,
}

impl<T: Serialize> CliResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).map_err(|e| {
            Error::internal_json(e.to_string(), Some("serialize response".to_string()))
        })
    }
}

impl CliResponse<()> {
    pub fn from_error(err: &Error) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(CliError {
                code: err.code.as_str().to_string(),
                message: err.message.clone(),
                details: err.details.clone(),
                hints: if err.hints.is_empty() {
                    None
                } else {
                    Some(err.hints.clone())
                },
            }),
        }
    }
}

fn print_response<T: Serialize>(response: &CliResponse<T>) -> Result<()> {
    use std::io::{self, Write};

    let payload = response.to_json()?;
    let stdout = io::stdout();
    let mut handle = stdout.lock();
    if let Err(e) = writeln!(handle, "{}", payload) {
        if e.kind() == io::ErrorKind::BrokenPipe {
            return Ok(()); // Exit gracefully on SIGPIPE
        }
        return Err(Error::internal_io(
            e.to_string(),
            Some("write stdout".to_string()),
        ));
    }
    Ok(())
}

pub fn print_json_result(result: Result<serde_json::Value>) -> Result<()> {
    match result {
        Ok(data) => print_response(&CliResponse::success(data)),
        Err(err) => print_response(&CliResponse::<()>::from_error(&err)),
    }
}

pub fn map_cmd_result_to_json<T: Serialize>(
    result: Result<(T, i32)>,
) -> (Result<serde_json::Value>, i32) {
    match result {
        Ok((data, exit_code)) => match serde_json::to_value(data) {
            Ok(value) => (Ok(value), exit_code),
            Err(err) => (
                Err(Error::internal_json(
                    err.to_string(),
                    Some("serialize response".to_string()),
                )),
                1,
            ),
        },
        Err(err) => {
            let exit_code = exit_code_for_error(&err);
            (Err(err), exit_code)
        }
    }
}

/// Failed stages propagate the wrapped command's exit code; a command that
/// could not be launched maps to 127 like a shell would.
pub fn exit_code_for_error(err: &Error) -> i32 {
    if let Some(code) = err.stage_exit_code() {
        return match code {
            c if c < 0 => 127,
            0 => 1,
            c if c > 255 => 255,
            c => c,
        };
    }

    match err.code {
        ErrorCode::ConfigMissingKey
        | ErrorCode::ConfigInvalidToml
        | ErrorCode::ConfigInvalidValue
        | ErrorCode::ConfigEnvFileNotFound
        | ErrorCode::ValidationInvalidArgument => 2,

        ErrorCode::StageMissingDependency => 3,

        ErrorCode::StageUnknown => 4,

        ErrorCode::StageExecutionFailed
        | ErrorCode::InternalIoError
        | ErrorCode::InternalJsonError => 1,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use packline::error::StageExecutionFailedDetails;

    fn failed(exit_code: i32) -> Error {
        Error::stage_execution_failed(StageExecutionFailedDetails {
            stage: "build".to_string(),
            command: "docker compose run --rm build".to_string(),
            exit_code,
            stdout: "some stdout".to_string(),
            stderr: "some stderr".to_string(),
        })
    }

    #[test]
    fn execution_failure_serializes_output_and_exit_code() {
        let json = CliResponse::<()>::from_error(&failed(17)).to_json().unwrap();
        assert!(json.contains("\"code\": \"stage.execution_failed\""));
        assert!(json.contains("some stdout"));
        assert!(json.contains("some stderr"));
        assert!(json.contains("\"exitCode\": 17"));
    }

    #[test]
    fn stage_exit_code_is_propagated() {
        assert_eq!(exit_code_for_error(&failed(17)), 17);
        assert_eq!(exit_code_for_error(&failed(-1)), 127);
        assert_eq!(exit_code_for_error(&failed(300)), 255);
    }

    #[test]
    fn taxonomy_exit_codes() {
        assert_eq!(exit_code_for_error(&Error::unknown_stage("x", vec![])), 4);
        assert_eq!(
            exit_code_for_error(&Error::missing_dependency("build", "a", None)),
            3
        );
        assert_eq!(exit_code_for_error(&Error::config_missing_key("bucket", None)), 2);
        assert_eq!(exit_code_for_error(&Error::internal_json("eof", None)), 1);
    }

    #[test]
    fn map_success_keeps_exit_code() {
        let (value, code) = map_cmd_result_to_json(Ok((serde_json::json!({"a": 1}), 0)));
        assert_eq!(value.unwrap()["a"], 1);
        assert_eq!(code, 0);
    }

    #[test]
    fn hints_are_omitted_when_empty() {
        let json = CliResponse::<()>::from_error(&failed(1)).to_json().unwrap();
        assert!(!json.contains("hints"));
    }
}
