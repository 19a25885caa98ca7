mod batch;
mod multiple;
mod people;
mod stream;
#[cfg(not(feature = "disable-transactions"))]
mod transaction;

use crate::{
    batch::batch,
    multiple::multiple,
    people::{people, setup_people},
    stream::stream,
};
use dredge::{ConnectionSource, Driver};
use log::LevelFilter;
use std::env;

pub use people::{Address, Person, Status};

pub fn init_logs() {
    let mut logger = env_logger::builder();
    logger
        .is_test(true)
        .format_file(true)
        .format_line_number(true);
    if env::var("RUST_LOG").is_err() {
        logger.filter_level(LevelFilter::Warn);
    }
    let _ = logger.try_init();
}

/// Runs every scenario against the database reached through `source`.
///
/// The scenarios create and drop their own tables, the database must be
/// persistent: each job may open a new connection.
pub async fn execute_tests<D: Driver>(source: ConnectionSource<D>) {
    setup_people(&source);
    people(&source).await;
    #[cfg(not(feature = "disable-transactions"))]
    transaction::transaction(&source);
    multiple(&source);
    batch(&source);
    stream(&source);
}

#[macro_export]
macro_rules! silent_logs {
    ($($code:tt)+) => {{
        let level = log::max_level();
        log::set_max_level(log::LevelFilter::Off);
        $($code)+
        log::set_max_level(level);
    }};
}
