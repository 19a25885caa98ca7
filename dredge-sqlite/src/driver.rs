use crate::SqliteConnection;
use dredge_core::{Driver, Result};

#[derive(Default, Debug, Clone, Copy)]
pub struct SqliteDriver {}

impl SqliteDriver {
    pub const fn new() -> Self {
        Self {}
    }
}

impl Driver for SqliteDriver {
    type Connection = SqliteConnection;

    const NAME: &'static str = "sqlite";

    /// Opens `sqlite://<path>?mode=rwc&busy_timeout=5000`, see [`SqliteOptions`](crate::SqliteOptions).
    fn connect(&self, url: &str) -> Result<SqliteConnection> {
        SqliteConnection::connect(url)
    }
}
