//! Derive macro for the `Traverse` trait.

use proc_macro2::TokenStream;
use quote::{format_ident, quote, quote_spanned};
use syn::{
    parse_macro_input, parse_quote, spanned::Spanned, Data, DeriveInput, Field, Fields,
    GenericParam, Generics, Ident, Index, Path,
};

#[proc_macro_derive(Traverse, attributes(crossgc))]
pub fn derive_traverse(input: proc_macro::TokenStream) -> proc_macro::TokenStream {
    let input = parse_macro_input!(input as DeriveInput);
    let mut crossgc: Path = parse_quote!(::crossgc);

    for attr in &input.attrs {
        if !attr.path().is_ident("crossgc") {
            continue;
        }

        let result = attr.parse_nested_meta(|meta| {
            if meta.path.is_ident("crate") {
                crossgc = meta.value()?.parse()?;
                Ok(())
            } else {
                Err(meta.error("unsupported attribute"))
            }
        });

        if let Err(err) = result {
            return err.into_compile_error().into();
        }
    }

    let name = &input.ident;
    let generics = add_trait_bounds(&crossgc, input.generics);
    let (impl_generics, ty_generics, where_clause) = generics.split_for_impl();
    let bodies = match &input.data {
        Data::Struct(data) => generate_struct_bodies(&crossgc, &data.fields),
        Data::Enum(data) => generate_enum_bodies(&crossgc, name, data),
        Data::Union(u) => {
            return quote_spanned! {
                u.union_token.span => compile_error!("`Traverse` must be manually implemented for unions");
            }
            .into();
        }
    };
    let (traverse_body, drain_body) = match bodies {
        Ok(bodies) => bodies,
        Err(err) => return err.into_compile_error().into(),
    };

    let generated = quote! {
        impl #impl_generics #crossgc::Traverse for #name #ty_generics #where_clause {
            #[inline]
            fn traverse(&self, visitor: &mut dyn #crossgc::Visitor) {
                #traverse_body
            }

            #[inline]
            fn drain_refs(&mut self, out: &mut ::std::vec::Vec<#crossgc::ObjRef>) {
                #drain_body
            }
        }
    };

    generated.into()
}

fn add_trait_bounds(crossgc: &Path, mut generics: Generics) -> Generics {
    for param in &mut generics.params {
        if let GenericParam::Type(ref mut type_param) = *param {
            let has_traverse = type_param.bounds.iter().any(|b| {
                if let syn::TypeParamBound::Trait(t) = b {
                    t.path.segments.last().is_some_and(|s| s.ident == "Traverse")
                } else {
                    false
                }
            });

            if !has_traverse {
                type_param.bounds.push(parse_quote!(#crossgc::Traverse));
            }
        }
    }
    generics
}

/// Returns `true` when the field carries `#[crossgc(skip)]`.
fn is_skipped(field: &Field) -> syn::Result<bool> {
    let mut skip = false;
    for attr in &field.attrs {
        if !attr.path().is_ident("crossgc") {
            continue;
        }
        attr.parse_nested_meta(|meta| {
            if meta.path.is_ident("skip") {
                skip = true;
                Ok(())
            } else {
                Err(meta.error("unsupported field attribute"))
            }
        })?;
    }
    Ok(skip)
}

fn generate_struct_bodies(
    crossgc: &Path,
    fields: &Fields,
) -> syn::Result<(TokenStream, TokenStream)> {
    let mut traverse_calls = Vec::new();
    let mut drain_calls = Vec::new();

    match fields {
        Fields::Named(f) => {
            for field in &f.named {
                if is_skipped(field)? {
                    continue;
                }
                let name = &field.ident;
                traverse_calls.push(quote_spanned! {field.span() =>
                    #crossgc::Traverse::traverse(&self.#name, visitor);
                });
                drain_calls.push(quote_spanned! {field.span() =>
                    #crossgc::Traverse::drain_refs(&mut self.#name, out);
                });
            }
        }
        Fields::Unnamed(f) => {
            for (i, field) in f.unnamed.iter().enumerate() {
                if is_skipped(field)? {
                    continue;
                }
                let index = Index::from(i);
                traverse_calls.push(quote_spanned! {field.span() =>
                    #crossgc::Traverse::traverse(&self.#index, visitor);
                });
                drain_calls.push(quote_spanned! {field.span() =>
                    #crossgc::Traverse::drain_refs(&mut self.#index, out);
                });
            }
        }
        Fields::Unit => {}
    }

    if traverse_calls.is_empty() {
        return Ok((quote! { let _ = visitor; }, quote! { let _ = out; }));
    }

    Ok((quote! { #(#traverse_calls)* }, quote! { #(#drain_calls)* }))
}

fn generate_enum_bodies(
    crossgc: &Path,
    name: &Ident,
    data: &syn::DataEnum,
) -> syn::Result<(TokenStream, TokenStream)> {
    let mut traverse_arms = Vec::new();
    let mut drain_arms = Vec::new();

    for variant in &data.variants {
        let var_name = &variant.ident;
        match &variant.fields {
            Fields::Named(f) => {
                let mut bindings = Vec::new();
                let mut visited = Vec::new();
                for (i, field) in f.named.iter().enumerate() {
                    let ident = field.ident.as_ref().ok_or_else(|| {
                        syn::Error::new_spanned(field, "named field without identifier")
                    })?;
                    let binding = format_ident!("field{}", i);
                    if is_skipped(field)? {
                        bindings.push(quote! { #ident: _ });
                    } else {
                        bindings.push(quote! { #ident: #binding });
                        visited.push(binding);
                    }
                }

                let traverse_calls = visited.iter().map(|field| {
                    quote! { #crossgc::Traverse::traverse(#field, visitor); }
                });
                let drain_calls = visited.iter().map(|field| {
                    quote! { #crossgc::Traverse::drain_refs(#field, out); }
                });

                traverse_arms.push(quote! {
                    #name::#var_name { #(#bindings),* } => {
                        #(#traverse_calls)*
                    }
                });
                drain_arms.push(quote! {
                    #name::#var_name { #(#bindings),* } => {
                        #(#drain_calls)*
                    }
                });
            }
            Fields::Unnamed(f) => {
                let mut bindings = Vec::new();
                let mut visited = Vec::new();
                for (i, field) in f.unnamed.iter().enumerate() {
                    let binding = format_ident!("field{}", i);
                    if is_skipped(field)? {
                        bindings.push(quote! { _ });
                    } else {
                        bindings.push(quote! { #binding });
                        visited.push(binding);
                    }
                }

                let traverse_calls = visited.iter().map(|field| {
                    quote! { #crossgc::Traverse::traverse(#field, visitor); }
                });
                let drain_calls = visited.iter().map(|field| {
                    quote! { #crossgc::Traverse::drain_refs(#field, out); }
                });

                traverse_arms.push(quote! {
                    #name::#var_name(#(#bindings),*) => {
                        #(#traverse_calls)*
                    }
                });
                drain_arms.push(quote! {
                    #name::#var_name(#(#bindings),*) => {
                        #(#drain_calls)*
                    }
                });
            }
            Fields::Unit => {
                traverse_arms.push(quote! { #name::#var_name => {} });
                drain_arms.push(quote! { #name::#var_name => {} });
            }
        }
    }

    if traverse_arms.is_empty() {
        return Ok((quote! { let _ = visitor; }, quote! { let _ = out; }));
    }

    Ok((
        quote! {
            #[allow(unused_variables)]
            match self {
                #(#traverse_arms)*
            }
        },
        quote! {
            #[allow(unused_variables)]
            match self {
                #(#drain_arms)*
            }
        },
    ))
}
