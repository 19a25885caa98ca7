//! Typed query jobs for relational backends.
//!
//! A job runs parameterized commands on a connection and materializes the rows
//! into scalars, records (`#[derive(FromRow)]`), enums (`#[derive(DbEnum)]`),
//! tuples of sub-reads or schema-less maps. Backends implement [`Driver`] and
//! [`Connection`], see `dredge-sqlite`.
//!
//! ```rust,ignore
//! use dredge::{FromRow, JobBuilder};
//!
//! #[derive(Default, FromRow)]
//! struct Person {
//!     id: i64,
//!     name: String,
//! }
//!
//! let people = JobBuilder::query("SELECT id, name FROM person")
//!     .connect(SqliteDriver::new(), "sqlite://people.db")
//!     .to_list::<Person>()
//!     .execute_owned()?;
//! ```

pub use dredge_core::*;
pub use dredge_macros::*;
