use crate::{DataType, Error};
use thiserror::Error as ThisError;

/// Typed failures raised by the mapping compiler and the execution engine.
///
/// They travel inside [`anyhow::Error`] (usually attached as context), use
/// [`error_kind`] to get them back.
#[derive(Debug, ThisError)]
pub enum DredgeError {
    #[error("`{shape}` cannot be materialized from a row: {reason}")]
    UnsupportedShape { shape: &'static str, reason: String },

    #[error(
        "Member `{shape}::{member}` ({expected}) cannot be read from column `{column}` ({found})"
    )]
    TypeMismatch {
        shape: &'static str,
        member: String,
        column: String,
        expected: DataType,
        found: DataType,
    },

    #[error("Value {value} of column `{column}` does not fit into `{shape}::{member}`")]
    ValueOutOfRange {
        shape: &'static str,
        member: String,
        column: String,
        value: String,
    },

    #[error("Member `{shape}::{member}` does not match any column")]
    UnmappedMember { shape: &'static str, member: String },

    #[error("The query returned no rows, expected one `{shape}`")]
    EmptyResult { shape: &'static str },

    #[error("The query returned more than one row, expected a single `{shape}`")]
    MultipleResults { shape: &'static str },

    #[error("Error while executing the command: {command}")]
    CommandExecution { command: String },

    #[error("Could not open a connection using the {driver} driver")]
    ConnectionFailed { driver: &'static str },

    #[error("Expected {expected} branches, the configuration produced {found}")]
    BranchCount { expected: usize, found: usize },
}

/// The [`DredgeError`] carried by `error`, if any.
pub fn error_kind(error: &Error) -> Option<&DredgeError> {
    error.downcast_ref::<DredgeError>()
}

#[cfg(test)]
mod tests {
    use super::{DredgeError, error_kind};
    use crate::{Context, Error, Result};

    #[test]
    fn kind_survives_context() {
        let result: Result<()> = Err(Error::msg("disk I/O error"))
            .context(DredgeError::CommandExecution {
                command: "SELECT 1".into(),
            })
            .context("While running the job `report`");
        let error = result.unwrap_err();
        assert!(matches!(
            error_kind(&error),
            Some(DredgeError::CommandExecution { command }) if command == "SELECT 1"
        ));
        assert_eq!(error.root_cause().to_string(), "disk I/O error");
    }

    #[test]
    fn messages() {
        let error = DredgeError::EmptyResult { shape: "i32" };
        assert_eq!(
            error.to_string(),
            "The query returned no rows, expected one `i32`"
        );
    }
}
