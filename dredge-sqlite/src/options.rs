use dredge_core::{Context, Error, Result};
use libsqlite3_sys::{
    SQLITE_OPEN_CREATE, SQLITE_OPEN_FULLMUTEX, SQLITE_OPEN_MEMORY, SQLITE_OPEN_READONLY,
    SQLITE_OPEN_READWRITE,
};
use std::{borrow::Cow, ffi::c_int, time::Duration};

/// How the database file is opened, from the `mode` query parameter.
#[derive(Default, Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenMode {
    ReadOnly,
    ReadWrite,
    /// Read and write, creating the file when missing.
    #[default]
    ReadWriteCreate,
    /// Private in-memory database, the path is ignored.
    Memory,
}

/// Connection parameters parsed from a `sqlite://` url.
///
/// ```text
/// sqlite://<path>?mode=ro|rw|rwc|memory&busy_timeout=<milliseconds>
/// ```
/// The path is percent decoded, `sqlite://:memory:` is a shortcut for `mode=memory`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SqliteOptions {
    pub path: String,
    pub mode: OpenMode,
    pub busy_timeout: Option<Duration>,
}

impl SqliteOptions {
    pub const PREFIX: &'static str = "sqlite://";

    pub fn parse(url: &str) -> Result<Self> {
        let Some(rest) = url.strip_prefix(Self::PREFIX) else {
            return Err(Error::msg(format!(
                "SQLite connection url must start with `{}`",
                Self::PREFIX
            )));
        };
        let (path, query) = rest.split_once('?').unwrap_or((rest, ""));
        let path = urlencoding::decode(path)
            .with_context(|| format!("Invalid path in the SQLite url `{url}`"))?;
        let mut result = Self {
            path: path.into_owned(),
            mode: OpenMode::default(),
            busy_timeout: None,
        };
        for (key, value) in url::form_urlencoded::parse(query.as_bytes()) {
            match key.as_ref() {
                "mode" => {
                    result.mode = match value.as_ref() {
                        "ro" => OpenMode::ReadOnly,
                        "rw" => OpenMode::ReadWrite,
                        "rwc" => OpenMode::ReadWriteCreate,
                        "memory" => OpenMode::Memory,
                        _ => {
                            return Err(Error::msg(format!(
                                "Unknown SQLite open mode `{value}`, expected one of ro, rw, rwc, memory"
                            )));
                        }
                    }
                }
                "busy_timeout" => {
                    let millis = value
                        .parse::<u64>()
                        .with_context(|| format!("Invalid busy_timeout `{value}`"))?;
                    result.busy_timeout = Some(Duration::from_millis(millis));
                }
                _ => log::warn!("Ignoring unknown SQLite url parameter `{key}`"),
            }
        }
        if result.path == ":memory:" {
            result.mode = OpenMode::Memory;
        }
        if result.path.is_empty() && result.mode != OpenMode::Memory {
            return Err(Error::msg(format!(
                "The SQLite url `{url}` does not name a database file"
            )));
        }
        Ok(result)
    }

    pub(crate) fn filename(&self) -> Cow<'_, str> {
        match self.mode {
            OpenMode::Memory => Cow::Borrowed(":memory:"),
            _ => Cow::Borrowed(&self.path),
        }
    }

    pub(crate) fn flags(&self) -> c_int {
        SQLITE_OPEN_FULLMUTEX
            | match self.mode {
                OpenMode::ReadOnly => SQLITE_OPEN_READONLY,
                OpenMode::ReadWrite => SQLITE_OPEN_READWRITE,
                OpenMode::ReadWriteCreate => SQLITE_OPEN_READWRITE | SQLITE_OPEN_CREATE,
                OpenMode::Memory => SQLITE_OPEN_READWRITE | SQLITE_OPEN_CREATE | SQLITE_OPEN_MEMORY,
            }
    }
}

#[cfg(test)]
mod tests {
    use super::{OpenMode, SqliteOptions};
    use std::time::Duration;

    #[test]
    fn parses_path_and_parameters() {
        let options =
            SqliteOptions::parse("sqlite://../target/my%20db.sqlite?mode=rw&busy_timeout=250")
                .expect("valid url");
        assert_eq!(options.path, "../target/my db.sqlite");
        assert_eq!(options.mode, OpenMode::ReadWrite);
        assert_eq!(options.busy_timeout, Some(Duration::from_millis(250)));
    }

    #[test]
    fn defaults() {
        let options = SqliteOptions::parse("sqlite://data.sqlite").expect("valid url");
        assert_eq!(options.mode, OpenMode::ReadWriteCreate);
        assert_eq!(options.busy_timeout, None);
        let options = SqliteOptions::parse("sqlite://:memory:").expect("valid url");
        assert_eq!(options.mode, OpenMode::Memory);
        assert_eq!(options.filename(), ":memory:");
    }

    #[test]
    fn rejects_invalid_urls() {
        assert!(SqliteOptions::parse("postgres://localhost/db").is_err());
        assert!(SqliteOptions::parse("sqlite://data.sqlite?mode=append").is_err());
        assert!(SqliteOptions::parse("sqlite://data.sqlite?busy_timeout=soon").is_err());
        assert!(SqliteOptions::parse("sqlite://").is_err());
    }
}
