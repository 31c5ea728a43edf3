extern crate proc_macro;

macro_rules! bail {
    ($item:expr, $fmt:literal $($tts:tt)*) => {
        return Err(Error::new_spanned(
            &$item,
            format!(concat!("memoria: ", $fmt) $($tts)*)
        ))
    }
}

mod memoize;

use proc_macro::TokenStream;
use quote::quote;
use syn::{Error, Result, parse_quote};

/// Memoize a function.
///
/// The function's results are kept in a cache that is private to the
/// function and lives as long as the program. Arguments are compared by their
/// normalized key, so they must implement `Clone` and `memoria::ToValue`.
///
/// If the declared return type is `Option<T>`, a `None` result is never
/// cached and the function runs again on the next call. The same holds for
/// results that are `memoria::Nullish`, such as `Value::Null`. The result
/// type must implement that trait.
///
/// ```ignore
/// #[memoize]
/// fn describe(width: u32, height: u32) -> String {
///     format!("The image is {width}x{height} pixels.")
/// }
///
/// #[memoize]
/// fn find(haystack: String, needle: char) -> Option<usize> {
///     haystack.find(needle)
/// }
/// ```
///
/// Only free functions without generics are supported.
#[proc_macro_attribute]
pub fn memoize(_: TokenStream, stream: TokenStream) -> TokenStream {
    let func = syn::parse_macro_input!(stream as syn::ItemFn);
    memoize::expand(func)
        .unwrap_or_else(|err| err.to_compile_error())
        .into()
}
