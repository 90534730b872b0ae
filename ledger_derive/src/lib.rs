//! Derive macros for the ledger node.
//!
//! `#[derive(BinaryCodec)]` implements the crate's `Encode` and `Decode`
//! traits field by field, in declaration order.

mod binary_codec;

use proc_macro::TokenStream;

/// Implements `Encode` and `Decode` for a struct or enum.
///
/// Fields annotated with `#[binary_codec(skip)]` are not written and are
/// restored with `Default::default()` on decode.
#[proc_macro_derive(BinaryCodec, attributes(binary_codec))]
pub fn derive_binary_codec(input: TokenStream) -> TokenStream {
    binary_codec::expand(input)
}
