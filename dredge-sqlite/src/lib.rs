mod bind;
mod cbox;
mod connection;
mod cursor;
mod driver;
mod extract;
mod options;

use std::ffi::{CStr, c_char};

pub(crate) use cbox::*;
pub use connection::*;
pub use cursor::*;
pub use driver::*;
pub use options::*;

pub(crate) fn error_message_from_ptr<'a>(ptr: *const c_char) -> &'a str {
    unsafe {
        if !ptr.is_null() {
            CStr::from_ptr(ptr)
                .to_str()
                .unwrap_or("Unknown error (the error message was not a valid C string)")
        } else {
            "Unknown error (could not extract the error message)"
        }
    }
}

pub(crate) fn last_error(connection: *mut libsqlite3_sys::sqlite3) -> dredge_core::Error {
    dredge_core::Error::msg(
        error_message_from_ptr(unsafe { libsqlite3_sys::sqlite3_errmsg(connection) }).to_string(),
    )
}
