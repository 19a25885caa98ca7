#[cfg(test)]
#[macro_use]
mod testing;

mod as_value;
mod batch;
mod cache;
mod cancellation;
mod command;
mod compile;
mod connection;
mod context;
mod cursor;
mod engine;
mod error;
mod job;
mod mapping;
mod multi;
mod projection;
mod schema;
mod settings;
mod stream;
mod util;
mod value;

pub use ::anyhow::Context;
pub use as_value::*;
pub use batch::*;
pub use cache::*;
pub use cancellation::*;
pub use command::*;
pub use compile::*;
pub use connection::*;
pub use context::*;
pub use cursor::*;
pub use engine::Handled;
pub use error::*;
pub use job::*;
pub use mapping::*;
pub use multi::*;
pub use projection::{Projection, first, first_or_default, single, single_or_default, to_list};
pub use schema::*;
pub use settings::*;
pub use stream::*;
pub use util::*;
pub use value::*;

pub type Result<T> = anyhow::Result<T>;
pub type Error = anyhow::Error;
