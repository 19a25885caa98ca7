mod db_enum;
mod decode;
mod from_row;

use db_enum::db_enum;
use from_row::from_row;
use proc_macro::TokenStream;
use syn::{ItemEnum, ItemStruct, parse_macro_input};

/// Implements `Record`, `Nested` and `FromRow` for a struct with named fields.
///
/// Container attributes: `#[dredge(rename_all = "camelCase")]`.
/// Field attributes: `#[dredge(column = "name")]`, `#[dredge(nested)]`, `#[dredge(skip)]`.
#[proc_macro_derive(FromRow, attributes(dredge))]
pub fn derive_from_row(input: TokenStream) -> TokenStream {
    let item = parse_macro_input!(input as ItemStruct);
    from_row(&item).into()
}

/// Implements `DbEnum`, `AsValue` and `FromRow` for a fieldless enum.
///
/// Container attributes: `#[dredge(rename_all = "snake_case")]`.
/// Variant attributes: `#[dredge(rename = "name")]`.
#[proc_macro_derive(DbEnum, attributes(dredge))]
pub fn derive_db_enum(input: TokenStream) -> TokenStream {
    let item = parse_macro_input!(input as ItemEnum);
    db_enum(&item).into()
}
