//! Expansion of `#[derive(BinaryCodec)]`.
//!
//! Layout produced by the generated code:
//! - struct fields are written in declaration order, skipped fields are omitted
//! - enums write a `u8` tag (explicit discriminants are honored) followed by
//!   the variant's fields
//!
//! The generated impls refer to `crate::types::encoding`, so the derive is
//! only usable from inside the `ledger_node` crate.

use proc_macro::TokenStream;
use proc_macro2::TokenStream as TokenStream2;
use quote::{format_ident, quote};
use syn::spanned::Spanned;
use syn::{Data, DataEnum, DeriveInput, Field, Fields, parse_macro_input};

pub fn expand(input: TokenStream) -> TokenStream {
    let input = parse_macro_input!(input as DeriveInput);
    match expand_derive(&input) {
        Ok(tokens) => tokens.into(),
        Err(err) => err.to_compile_error().into(),
    }
}

fn expand_derive(input: &DeriveInput) -> syn::Result<TokenStream2> {
    let name = &input.ident;
    let (impl_generics, ty_generics, where_clause) = input.generics.split_for_impl();

    let (encode_body, decode_body) = match &input.data {
        Data::Struct(data) => {
            let bindings = bindings_for(&data.fields);
            let encode = encode_fields(&data.fields, &bindings)?;
            let construct = construct(quote!(Self), &data.fields, &bindings)?;
            let pattern = destructure(quote!(Self), &data.fields, &bindings);
            (
                quote! {
                    let #pattern = self;
                    #encode
                },
                quote! { Ok(#construct) },
            )
        }
        Data::Enum(data) => expand_enum(data)?,
        Data::Union(_) => {
            return Err(syn::Error::new(
                input.span(),
                "BinaryCodec cannot be derived for unions",
            ));
        }
    };

    Ok(quote! {
        impl #impl_generics crate::types::encoding::Encode for #name #ty_generics #where_clause {
            #[allow(unused_variables)]
            fn encode<S: crate::types::encoding::EncodeSink>(&self, out: &mut S) {
                #encode_body
            }
        }

        impl #impl_generics crate::types::encoding::Decode for #name #ty_generics #where_clause {
            #[allow(unused_variables)]
            fn decode(input: &mut &[u8]) -> ::std::result::Result<Self, crate::types::encoding::DecodeError> {
                #decode_body
            }
        }
    })
}

fn expand_enum(data: &DataEnum) -> syn::Result<(TokenStream2, TokenStream2)> {
    let tags = discriminants(data)?;
    let mut encode_arms = Vec::with_capacity(tags.len());
    let mut decode_arms = Vec::with_capacity(tags.len());

    for (variant, tag) in data.variants.iter().zip(tags) {
        let ident = &variant.ident;
        let bindings = bindings_for(&variant.fields);
        let pattern = destructure(quote!(Self::#ident), &variant.fields, &bindings);
        let encode = encode_fields(&variant.fields, &bindings)?;
        let construct = construct(quote!(Self::#ident), &variant.fields, &bindings)?;

        encode_arms.push(quote! {
            #pattern => {
                crate::types::encoding::Encode::encode(&#tag, out);
                #encode
            }
        });
        decode_arms.push(quote! {
            #tag => Ok(#construct),
        });
    }

    let encode = quote! {
        match self {
            #(#encode_arms)*
        }
    };
    let decode = quote! {
        let tag: u8 = crate::types::encoding::Decode::decode(input)?;
        match tag {
            #(#decode_arms)*
            _ => Err(crate::types::encoding::DecodeError::InvalidValue),
        }
    };
    Ok((encode, decode))
}

/// Local names used to bind every field when destructuring `self`.
fn bindings_for(fields: &Fields) -> Vec<syn::Ident> {
    fields
        .iter()
        .enumerate()
        .map(|(i, field)| match &field.ident {
            Some(ident) => format_ident!("__{}", ident),
            None => format_ident!("__f{}", i),
        })
        .collect()
}

fn destructure(path: TokenStream2, fields: &Fields, bindings: &[syn::Ident]) -> TokenStream2 {
    match fields {
        Fields::Named(named) => {
            let names = named.named.iter().map(|f| &f.ident);
            quote!(#path { #(#names: #bindings),* })
        }
        Fields::Unnamed(_) => quote!(#path(#(#bindings),*)),
        Fields::Unit => quote!(#path),
    }
}

fn encode_fields(fields: &Fields, bindings: &[syn::Ident]) -> syn::Result<TokenStream2> {
    let mut out = TokenStream2::new();
    for (field, binding) in fields.iter().zip(bindings) {
        if !is_skipped(field)? {
            out.extend(quote! {
                crate::types::encoding::Encode::encode(#binding, out);
            });
        }
    }
    Ok(out)
}

fn construct(path: TokenStream2, fields: &Fields, bindings: &[syn::Ident]) -> syn::Result<TokenStream2> {
    let mut values = Vec::with_capacity(bindings.len());
    for field in fields.iter() {
        values.push(if is_skipped(field)? {
            quote!(::std::default::Default::default())
        } else {
            quote!(crate::types::encoding::Decode::decode(input)?)
        });
    }

    Ok(match fields {
        Fields::Named(named) => {
            let names = named.named.iter().map(|f| &f.ident);
            quote!(#path { #(#names: #values),* })
        }
        Fields::Unnamed(_) => quote!(#path(#(#values),*)),
        Fields::Unit => quote!(#path),
    })
}

/// Returns true for fields carrying `#[binary_codec(skip)]`.
fn is_skipped(field: &Field) -> syn::Result<bool> {
    let mut skip = false;
    for attr in &field.attrs {
        if !attr.path().is_ident("binary_codec") {
            continue;
        }
        attr.parse_nested_meta(|meta| {
            if meta.path.is_ident("skip") {
                skip = true;
                Ok(())
            } else {
                Err(meta.error("unsupported binary_codec attribute"))
            }
        })?;
    }
    Ok(skip)
}

/// Tags follow Rust's discriminant rules: an explicit `= N` resets the
/// counter, otherwise the previous tag plus one.
fn discriminants(data: &DataEnum) -> syn::Result<Vec<u8>> {
    let mut tags = Vec::with_capacity(data.variants.len());
    let mut next: u16 = 0;

    for variant in &data.variants {
        let tag = match &variant.discriminant {
            Some((_, expr)) => literal_u8(expr)?,
            None => u8::try_from(next)
                .map_err(|_| syn::Error::new(variant.span(), "enum has more than 256 variants"))?,
        };
        tags.push(tag);
        next = u16::from(tag) + 1;
    }

    Ok(tags)
}

fn literal_u8(expr: &syn::Expr) -> syn::Result<u8> {
    match expr {
        syn::Expr::Lit(syn::ExprLit {
            lit: syn::Lit::Int(lit),
            ..
        }) => lit.base10_parse::<u8>(),
        _ => Err(syn::Error::new(
            expr.span(),
            "discriminant must be an integer literal that fits in a u8",
        )),
    }
}
