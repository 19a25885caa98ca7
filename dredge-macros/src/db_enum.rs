use crate::decode::{decode_rename_all, decode_variant};
use proc_macro2::TokenStream;
use quote::quote;
use syn::{Fields, ItemEnum, spanned::Spanned};

pub(crate) fn db_enum(item: &ItemEnum) -> TokenStream {
    let name = &item.ident;
    if !item.generics.params.is_empty() {
        return syn::Error::new(
            item.generics.span(),
            "`DbEnum` cannot be derived for generic enums",
        )
        .to_compile_error();
    }
    if item.variants.is_empty() {
        return syn::Error::new(item.span(), "`DbEnum` needs at least one variant")
            .to_compile_error();
    }
    if let Some(variant) = item
        .variants
        .iter()
        .find(|v| !matches!(v.fields, Fields::Unit))
    {
        return syn::Error::new(
            variant.fields.span(),
            "`DbEnum` can only be derived for fieldless enums",
        )
        .to_compile_error();
    }
    let rename_all = decode_rename_all(&item.attrs);
    let variants = item.variants.iter().map(|v| &v.ident).collect::<Vec<_>>();
    let names = item
        .variants
        .iter()
        .map(|v| decode_variant(&v.attrs, &v.ident, rename_all))
        .collect::<Vec<_>>();
    quote! {
        const _: () = {
            trait __DefaultTrait {
                fn fallback() -> Option<fn() -> #name>;
            }
            struct __DefaultFactory<T>(::std::marker::PhantomData<T>);
            impl<T: Default + Into<#name>> __DefaultFactory<T> {
                #[allow(dead_code)]
                fn fallback() -> Option<fn() -> #name> {
                    Some(|| T::default().into())
                }
            }
            impl<T> __DefaultTrait for __DefaultFactory<T> {
                fn fallback() -> Option<fn() -> #name> {
                    None
                }
            }

            impl ::dredge::DbEnum for #name {
                fn from_name(name: &str) -> Option<Self> {
                    #(
                        if name.eq_ignore_ascii_case(#names) {
                            return Some(Self::#variants);
                        }
                    )*
                    None
                }
                fn from_discriminant(value: i128) -> Option<Self> {
                    #(
                        if value == Self::#variants as i128 {
                            return Some(Self::#variants);
                        }
                    )*
                    None
                }
                fn name(&self) -> &'static str {
                    match self {
                        #(Self::#variants => #names,)*
                    }
                }
                fn discriminant(&self) -> i128 {
                    match self {
                        #(Self::#variants => Self::#variants as i128,)*
                    }
                }
            }

            impl ::dredge::AsValue for #name {
                fn as_empty_value() -> ::dredge::Value {
                    ::dredge::Value::Int64(None)
                }
                fn as_value(self) -> ::dredge::Value {
                    ::dredge::enum_as_value(&self)
                }
                fn try_from_value(value: ::dredge::Value) -> ::dredge::Result<Self> {
                    ::dredge::enum_try_from_value(value)
                }
                fn accepts(column: ::dredge::DataType) -> bool {
                    ::dredge::enum_accepts(column)
                }
                fn from_column(value: ::dredge::Value) -> ::dredge::Result<Option<Self>> {
                    ::dredge::enum_from_column(value)
                }
            }

            impl ::dredge::FromRow for #name {
                fn compile(
                    schema: &::dredge::Schema,
                    _settings: &::dredge::MappingSettings,
                ) -> ::dredge::Result<::dredge::Materializer<Self>> {
                    match __DefaultFactory::<#name>::fallback() {
                        Some(fallback) => ::dredge::compile_scalar(schema, fallback),
                        None => Err(::dredge::DredgeError::UnsupportedShape {
                            shape: ::std::any::type_name::<#name>(),
                            reason: "the enum has no default variant (implement `Default`)".into(),
                        }
                        .into()),
                    }
                }
            }
        };
    }
}
