use convert_case::{Case, Casing};
use quote::ToTokens;
use syn::{Attribute, Field, LitStr, meta::ParseNestedMeta, parse::ParseBuffer};

/// How a struct field takes part in the mapping.
pub(crate) enum FieldKind {
    Value,
    Nested,
    Skip,
}

pub(crate) struct FieldMetadata {
    pub(crate) column: String,
    pub(crate) kind: FieldKind,
}

/// Visits every argument of the `#[dredge(..)]` attributes.
fn for_each_argument(
    attrs: &[Attribute],
    mut f: impl FnMut(&ParseNestedMeta) -> syn::Result<()>,
) {
    for attr in attrs {
        let meta = &attr.meta;
        if !meta.path().is_ident("dredge") {
            continue;
        }
        let Ok(list) = meta.require_list() else {
            panic!(
                "Error while parsing `dredge`, use it like: `#[dredge(attribute = value, ...)]`"
            );
        };
        if let Err(e) = list.parse_nested_meta(|arg| f(&arg)) {
            panic!("Error while parsing `dredge`: {e}");
        }
    }
}

fn string_argument(arg: &ParseNestedMeta, usage: &str) -> String {
    let Ok(v) = arg.value().and_then(ParseBuffer::parse::<LitStr>) else {
        panic!(
            "Error while parsing `{}`, use it like: `{usage}`",
            arg.path.to_token_stream()
        );
    };
    v.value()
}

fn flag_argument(arg: &ParseNestedMeta, usage: &str) {
    // value() is Err for a bare path
    if arg.value().is_ok() {
        panic!(
            "Error while parsing `{}`, use it like: `{usage}`",
            arg.path.to_token_stream()
        );
    }
}

fn unknown_argument(arg: &ParseNestedMeta) -> ! {
    panic!(
        "Unknown attribute `{}` inside dredge macro",
        arg.path.to_token_stream()
    );
}

/// The `rename_all` case of a struct or enum.
pub(crate) fn decode_rename_all(attrs: &[Attribute]) -> Option<Case> {
    let mut result = None;
    for_each_argument(attrs, |arg| {
        if arg.path.is_ident("rename_all") {
            let value = string_argument(arg, "#[dredge(rename_all = \"snake_case\")]");
            result = Some(match value.as_str() {
                "lowercase" => Case::Flat,
                "UPPERCASE" => Case::UpperFlat,
                "snake_case" => Case::Snake,
                "SCREAMING_SNAKE_CASE" => Case::UpperSnake,
                "camelCase" => Case::Camel,
                "PascalCase" => Case::Pascal,
                "kebab-case" => Case::Kebab,
                _ => panic!(
                    "Unknown case `{value}` in `rename_all`, expected one of: lowercase, UPPERCASE, snake_case, SCREAMING_SNAKE_CASE, camelCase, PascalCase, kebab-case"
                ),
            });
        } else {
            unknown_argument(arg);
        }
        Ok(())
    });
    result
}

pub(crate) fn decode_field(field: &Field, rename_all: Option<Case>) -> FieldMetadata {
    let ident = field
        .ident
        .as_ref()
        .expect("Field is expected to have a name");
    let mut name = ident.to_string();
    if let Some(stripped) = name.strip_prefix("r#") {
        name = stripped.to_string();
    }
    if name.starts_with('_') {
        name.remove(0);
    }
    let mut metadata = FieldMetadata {
        column: match rename_all {
            Some(case) => name.to_case(case),
            None => name,
        },
        kind: FieldKind::Value,
    };
    for_each_argument(&field.attrs, |arg| {
        if arg.path.is_ident("column") {
            metadata.column = string_argument(arg, "#[dredge(column = \"my_column\")]");
        } else if arg.path.is_ident("nested") {
            flag_argument(arg, "#[dredge(nested)]");
            metadata.kind = FieldKind::Nested;
        } else if arg.path.is_ident("skip") {
            flag_argument(arg, "#[dredge(skip)]");
            metadata.kind = FieldKind::Skip;
        } else {
            unknown_argument(arg);
        }
        Ok(())
    });
    metadata
}

/// Variant name as stored in the database.
pub(crate) fn decode_variant(
    attrs: &[Attribute],
    ident: &syn::Ident,
    rename_all: Option<Case>,
) -> String {
    let name = ident.to_string();
    let mut result = match rename_all {
        Some(case) => name.to_case(case),
        None => name,
    };
    for_each_argument(attrs, |arg| {
        if arg.path.is_ident("rename") {
            result = string_argument(arg, "#[dredge(rename = \"name\")]");
        } else {
            unknown_argument(arg);
        }
        Ok(())
    });
    result
}
