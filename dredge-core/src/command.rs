use crate::{AsValue, Value, truncate_long};
use std::{
    fmt::{self, Display},
    time::Duration,
};

#[derive(Default, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommandKind {
    /// Query text executed verbatim.
    #[default]
    Text,
    /// Name of a stored procedure.
    StoredProcedure,
}

/// A unit of work sent to a connection: text plus positional parameters.
#[derive(Default, Debug, Clone, PartialEq)]
pub struct Command {
    pub text: String,
    pub kind: CommandKind,
    pub timeout: Option<Duration>,
    pub params: Vec<Value>,
}

impl Command {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Default::default()
        }
    }
    pub fn procedure(name: impl Into<String>) -> Self {
        Self {
            text: name.into(),
            kind: CommandKind::StoredProcedure,
            ..Default::default()
        }
    }
    /// Appends a positional parameter.
    pub fn bind(mut self, value: impl AsValue) -> Self {
        self.params.push(value.as_value());
        self
    }
    pub fn bind_mut(&mut self, value: impl AsValue) -> &mut Self {
        self.params.push(value.as_value());
        self
    }
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
    /// True for the empty placeholder command.
    pub fn is_empty(&self) -> bool {
        self.text.trim().is_empty()
    }
}

impl From<&str> for Command {
    fn from(value: &str) -> Self {
        Command::new(value)
    }
}

impl From<String> for Command {
    fn from(value: String) -> Self {
        Command::new(value)
    }
}

impl Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", truncate_long!(self.text))
    }
}

#[cfg(test)]
mod tests {
    use super::{Command, CommandKind};
    use crate::Value;
    use std::time::Duration;

    #[test]
    fn builder() {
        let command = Command::new("SELECT * FROM person WHERE id = ? AND name = ?")
            .bind(5i64)
            .bind("Ann".to_string())
            .bind(Option::<i32>::None)
            .timeout(Duration::from_secs(3));
        assert_eq!(command.kind, CommandKind::Text);
        assert_eq!(
            command.params,
            [
                Value::Int64(Some(5)),
                Value::Varchar(Some("Ann".into())),
                Value::Int32(None)
            ]
        );
        assert_eq!(command.timeout, Some(Duration::from_secs(3)));
        assert!(Command::default().is_empty());
        assert_eq!(
            Command::procedure("refresh").kind,
            CommandKind::StoredProcedure
        );
    }
}
