use super::*;

/// Memoize a function.
pub fn expand(mut func: syn::ItemFn) -> Result<proc_macro2::TokenStream> {
    if let Some(asyncness) = &func.sig.asyncness {
        bail!(asyncness, "async functions are not supported");
    }

    if !func.sig.generics.params.is_empty() {
        bail!(func.sig.generics, "generic functions are not supported");
    }

    let mut args = vec![];
    let mut types = vec![];
    for input in &func.sig.inputs {
        let typed = match input {
            syn::FnArg::Typed(typed) => typed,
            syn::FnArg::Receiver(_) => {
                bail!(input, "methods are not supported")
            }
        };

        let name = match typed.pat.as_ref() {
            syn::Pat::Ident(syn::PatIdent {
                by_ref: None,
                mutability: None,
                ident,
                subpat: None,
                ..
            }) => ident,
            pat => bail!(pat, "only simple identifiers are supported"),
        };

        let ty = typed.ty.as_ref();
        if let syn::Type::ImplTrait(_) = ty {
            bail!(ty, "`impl Trait` arguments are not supported");
        }

        args.push(name);
        types.push(ty);
    }

    let output: syn::Type = match &func.sig.output {
        syn::ReturnType::Default => parse_quote! { () },
        syn::ReturnType::Type(_, ty) => ty.as_ref().clone(),
    };

    // Only a declared `Option<T>` has a nullish result.
    let (value, helper) = match option_inner(&output) {
        Some(inner) => (inner.clone(), quote! { cached_option }),
        None => (output.clone(), quote! { cached }),
    };

    // Construct a tuple from all arguments.
    let arg_tuple = quote! { (#(#args,)*) };
    let type_tuple = quote! { (#(#types,)*) };

    // Construct assertions that the arguments fulfill the necessary bounds.
    let bounds = types.iter().map(|ty| {
        quote! {
            ::memoria::internal::assert_key::<#ty>();
        }
    });

    // Move the original body into an inner function.
    let mut inner = func.clone();
    inner.attrs.clear();
    inner.vis = syn::Visibility::Inherited;
    inner.sig.ident = syn::Ident::new("__memoria_inner", func.sig.ident.span());

    // Adjust the function's body.
    func.block = parse_quote! { {
        #inner

        static __MEMORIA_CACHE: ::std::sync::LazyLock<::memoria::MemoryCache<#value>> =
            ::std::sync::LazyLock::new(::memoria::MemoryCache::new);

        #(#bounds)*
        ::memoria::internal::#helper(
            &*__MEMORIA_CACHE,
            #arg_tuple,
            |#arg_tuple: #type_tuple| __memoria_inner(#(#args),*),
        )
    } };

    Ok(quote! { #func })
}

/// Extract `T` from a type spelled `Option<T>`.
fn option_inner(ty: &syn::Type) -> Option<&syn::Type> {
    let syn::Type::Path(syn::TypePath { qself: None, path }) = ty else {
        return None;
    };

    let segment = path.segments.last()?;
    if segment.ident != "Option" {
        return None;
    }

    let syn::PathArguments::AngleBracketed(generics) = &segment.arguments else {
        return None;
    };

    match generics.args.first() {
        Some(syn::GenericArgument::Type(inner)) if generics.args.len() == 1 => Some(inner),
        _ => None,
    }
}
