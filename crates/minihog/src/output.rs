//! JSON response envelope

use minihog_analytics::AnalyticsError;
use minihog_flags::FlagError;
use serde::Serialize;
use serde_json::Value;

/// Exit code when the request itself was bad
pub const EXIT_INVALID_INPUT: i32 = 2;
/// Exit code for every other failure
pub const EXIT_FAILURE: i32 = 1;

/// What every command prints
#[derive(Debug, Serialize)]
pub struct Envelope {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl From<anyhow::Result<Value>> for Envelope {
    fn from(outcome: anyhow::Result<Value>) -> Self {
        match outcome {
            Ok(data) => Self {
                success: true,
                data: Some(data),
                error: None,
            },
            Err(e) => Self {
                success: false,
                data: None,
                // Include the context chain
                error: Some(format!("{:#}", e)),
            },
        }
    }
}

/// Print the envelope and return the process exit code
pub fn emit(outcome: anyhow::Result<Value>) -> i32 {
    let code = match &outcome {
        Ok(_) => 0,
        Err(e) => exit_code(e),
    };

    match serde_json::to_string_pretty(&Envelope::from(outcome)) {
        Ok(json) => println!("{}", json),
        Err(e) => {
            println!(r#"{{"success": false, "error": "failed to render response: {}"}}"#, e);
            return EXIT_FAILURE;
        }
    }

    code
}

/// Caller mistakes exit with [`EXIT_INVALID_INPUT`], store failures with [`EXIT_FAILURE`]
fn exit_code(err: &anyhow::Error) -> i32 {
    let invalid_input = err.chain().any(|cause| {
        cause
            .downcast_ref::<AnalyticsError>()
            .is_some_and(AnalyticsError::is_client_error)
            || cause
                .downcast_ref::<FlagError>()
                .is_some_and(FlagError::is_client_error)
    });

    if invalid_input {
        EXIT_INVALID_INPUT
    } else {
        EXIT_FAILURE
    }
}

/// Serialize a response for the envelope
pub fn to_data<T: Serialize>(value: &T) -> anyhow::Result<Value> {
    Ok(serde_json::to_value(value)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Context;
    use serde_json::json;

    #[test]
    fn test_success_envelope() {
        let envelope = Envelope::from(Ok(json!({"dau": 3})));
        let rendered = serde_json::to_value(&envelope).unwrap();
        assert_eq!(rendered, json!({"success": true, "data": {"dau": 3}}));
    }

    #[test]
    fn test_failure_envelope_keeps_context() {
        let outcome: anyhow::Result<Value> = Err(anyhow::anyhow!("no such table"))
            .context("query execution failed");
        let rendered = serde_json::to_value(Envelope::from(outcome)).unwrap();
        assert_eq!(
            rendered,
            json!({"success": false, "error": "query execution failed: no such table"})
        );
    }

    #[test]
    fn test_exit_codes() {
        let bad_period = anyhow::Error::new(AnalyticsError::InvalidPeriodFormat("7x".into()));
        assert_eq!(exit_code(&bad_period), EXIT_INVALID_INPUT);

        let missing_flag =
            anyhow::Error::new(FlagError::NotFound("beta".into())).context("flags get");
        assert_eq!(exit_code(&missing_flag), EXIT_INVALID_INPUT);

        let store_down = anyhow::Error::new(FlagError::Database("locked".into()));
        assert_eq!(exit_code(&store_down), EXIT_FAILURE);
    }
}
