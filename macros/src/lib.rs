use proc_macro::TokenStream;
use quote::quote;
use syn::{Expr, ExprLit, ItemFn, Lit, MetaNameValue, parse_macro_input, spanned::Spanned};

/// Test attribute for the rxflow suite.
///
/// `#[rxflow_macro::test]` expands to a plain `#[test]`.
/// `#[rxflow_macro::test(repeat = N)]` runs the body `N` times, which is how the
/// concurrency races are shaken out.
#[proc_macro_attribute]
pub fn test(attr: TokenStream, item: TokenStream) -> TokenStream {
  let input = parse_macro_input!(item as ItemFn);

  if input.sig.asyncness.is_some() {
    return TokenStream::from(
      syn::Error::new(
        input.sig.fn_token.span(),
        "rxflow_macro::test does not support async tests: the protocol is driven by plain \
         threads",
      )
      .to_compile_error(),
    );
  }

  let raw_args = proc_macro2::TokenStream::from(attr);
  if raw_args.is_empty() {
    return TokenStream::from(quote! {
      #[test]
      #input
    });
  }

  let repeat = match syn::parse2::<MetaNameValue>(raw_args.clone()) {
    Ok(meta) if meta.path.is_ident("repeat") => match meta.value {
      Expr::Lit(ExprLit { lit: Lit::Int(n), .. }) => match n.base10_parse::<u32>() {
        Ok(n) if n > 0 => n,
        _ => {
          return TokenStream::from(
            syn::Error::new(n.span(), "repeat must be a positive integer").to_compile_error(),
          );
        }
      },
      other => {
        return TokenStream::from(
          syn::Error::new(other.span(), "repeat expects an integer literal").to_compile_error(),
        );
      }
    },
    _ => {
      return TokenStream::from(
        syn::Error::new(
          raw_args.span(),
          "rxflow_macro::test only accepts: #[rxflow_macro::test] or \
           #[rxflow_macro::test(repeat = N)]",
        )
        .to_compile_error(),
      );
    }
  };

  let attrs = &input.attrs;
  let vis = &input.vis;
  let sig = &input.sig;
  let body = &input.block;

  let expanded = quote! {
    #[test]
    #(#attrs)*
    #vis #sig {
      fn __round() #body
      for _ in 0..#repeat {
        __round();
      }
    }
  };

  TokenStream::from(expanded)
}
