use crate::decode::{FieldKind, decode_field, decode_rename_all};
use proc_macro2::TokenStream;
use quote::quote;
use syn::{Fields, Ident, ItemStruct, LitStr, spanned::Spanned};

pub(crate) fn from_row(item: &ItemStruct) -> TokenStream {
    let name = &item.ident;
    if !item.generics.params.is_empty() {
        return syn::Error::new(
            item.generics.span(),
            "`FromRow` cannot be derived for generic structs, implement `Record` manually",
        )
        .to_compile_error();
    }
    let Fields::Named(fields) = &item.fields else {
        return syn::Error::new(
            item.fields.span(),
            "`FromRow` can only be derived for structs with named fields",
        )
        .to_compile_error();
    };
    let rename_all = decode_rename_all(&item.attrs);
    let members = fields
        .named
        .iter()
        .filter_map(|field| {
            let metadata = decode_field(field, rename_all);
            let ident = field.ident.as_ref()?;
            let ty = &field.ty;
            let field_name = LitStr::new(
                ident.to_string().trim_start_matches("r#"),
                ident.span(),
            );
            let column = &metadata.column;
            let kind = match metadata.kind {
                FieldKind::Skip => return None,
                FieldKind::Value => quote! {
                    ::dredge::MemberKind::Value(::dredge::ValueMember {
                        data_type: ::dredge::member_data_type::<#ty>,
                        accepts: <#ty as ::dredge::AsValue>::accepts,
                        assign: |target: &mut #name, value: ::dredge::Value| {
                            ::dredge::assign_member(&mut target.#ident, value)
                        },
                    })
                },
                FieldKind::Nested => quote! {
                    ::dredge::MemberKind::Nested(::dredge::NestedMember {
                        shape: ::dredge::ShapeId::of::<<#ty as ::dredge::Nested>::Inner>,
                        compile: |schema: &::dredge::Schema,
                                  settings: &::dredge::MappingSettings,
                                  scope: &mut ::dredge::CompileScope| {
                            ::dredge::compile_nested::<#name, #ty>(
                                schema,
                                settings,
                                scope,
                                #field_name,
                                #column,
                                |target: &mut #name, value: #ty| target.#ident = value,
                            )
                        },
                    })
                },
            };
            Some(quote! {
                ::dredge::Member {
                    field: #field_name,
                    column: #column,
                    kind: #kind,
                }
            })
        })
        .collect::<Vec<_>>();
    let count = members.len();
    let construct = construct_factory(name);
    quote! {
        const _: () = {
            #construct

            impl ::dredge::Record for #name {
                fn construct() -> Option<Self> {
                    __ConstructFactory::<#name>::construct()
                }
                fn members() -> &'static [::dredge::Member<Self>] {
                    static MEMBERS: [::dredge::Member<#name>; #count] = [#(#members),*];
                    &MEMBERS
                }
            }

            impl ::dredge::Nested for #name {
                type Inner = Self;
                fn wrap(inner: Option<Self>) -> Option<Self> {
                    inner
                }
            }

            impl ::dredge::FromRow for #name {
                fn compile(
                    schema: &::dredge::Schema,
                    settings: &::dredge::MappingSettings,
                ) -> ::dredge::Result<::dredge::Materializer<Self>> {
                    ::dredge::compile_record(schema, settings)
                }
            }
        };
    }
}

/// `__ConstructFactory::<T>::construct()` is `Some(T::default())` when `T`
/// implements `Default`: the inherent function shadows the trait one.
pub(crate) fn construct_factory(name: &Ident) -> TokenStream {
    quote! {
        trait __ConstructTrait {
            fn construct() -> Option<#name>;
        }
        struct __ConstructFactory<T>(::std::marker::PhantomData<T>);
        impl<T: Default + Into<#name>> __ConstructFactory<T> {
            #[allow(dead_code)]
            fn construct() -> Option<#name> {
                Some(T::default().into())
            }
        }
        impl<T> __ConstructTrait for __ConstructFactory<T> {
            fn construct() -> Option<#name> {
                None
            }
        }
    }
}
