#[cfg(test)]
mod tests {
    use dredge::ConnectionSource;
    use dredge_sqlite::SqliteDriver;
    use dredge_tests::{execute_tests, init_logs};
    use std::{path::Path, sync::Mutex};
    use tokio::fs;

    static MUTEX: Mutex<()> = Mutex::new(());

    #[tokio::test]
    async fn sqlite() {
        init_logs();
        const DB_PATH: &str = "../target/debug/tests.sqlite";
        let _guard = MUTEX.lock().unwrap();
        if Path::new(DB_PATH).exists() {
            fs::remove_file(DB_PATH).await.unwrap_or_else(|_| {
                panic!("Failed to remove existing test database file {DB_PATH}")
            });
        }
        assert!(
            !Path::new(DB_PATH).exists(),
            "Database file should not exist before test"
        );
        let source = ConnectionSource::new(
            SqliteDriver::new(),
            format!("sqlite://{DB_PATH}?mode=rwc&busy_timeout=5000"),
        );
        let connection = source.connect().expect("Could not open the database");
        assert!(
            Path::new(DB_PATH).exists(),
            "Database file should be created after connection"
        );
        drop(connection);
        execute_tests(source).await;
    }
}
