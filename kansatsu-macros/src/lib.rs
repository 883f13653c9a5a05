//! Procedural macros for the Kansatsu observability agent
//!
//! This crate provides the `#[monitor]` attribute that routes every call of a
//! function through a `Kansatsu` agent's instrumentation.

use proc_macro::TokenStream;
use proc_macro2::TokenStream as TokenStream2;
use quote::quote;
use syn::{
    parse_macro_input, punctuated::Punctuated, Attribute, Expr, ExprLit, FnArg, ItemFn, Lit,
    LitStr, Meta, Pat, ReturnType, Token, Type,
};

/// Longest accepted span name, matching the runtime check
const MAX_NAME_LEN: usize = 256;

/// The `#[monitor]` procedural macro
///
/// Instruments a sync or async function: each call is timed, traced and
/// recorded in the agent's registry. The function keeps its name,
/// visibility, signature, attributes and doc comments. Its return type must
/// implement `kansatsu::CallOutcome`. Repeating the attribute on one
/// function instruments it once, with the outermost arguments.
///
/// # Arguments
///
/// - `agent = EXPR` (required) - anything that derefs to `&Kansatsu`
/// - `span_name = "..."` - record under this name instead of the function name
/// - `track_tokens` - extract token usage and cost from the result
/// - `log_io` - record Debug-formatted arguments and the output text
///
/// # Example
///
/// ```rust,ignore
/// use kansatsu::monitor;
///
/// #[monitor(agent = AGENT, span_name = "llm.generate", track_tokens)]
/// /// Ask the model
/// async fn generate(prompt: &str) -> Result<serde_json::Value, ApiError> {
///     client.generate(prompt).await
/// }
/// ```
#[proc_macro_attribute]
pub fn monitor(args: TokenStream, input: TokenStream) -> TokenStream {
    let args = parse_macro_input!(args with Punctuated::<Meta, Token![,]>::parse_terminated);
    let input_fn = parse_macro_input!(input as ItemFn);

    match generate_monitor_impl(args, input_fn) {
        Ok(tokens) => tokens.into(),
        Err(err) => err.to_compile_error().into(),
    }
}

/// Configuration for the monitor macro
#[derive(Debug)]
struct MonitorConfig {
    agent: Expr,
    span_name: Option<LitStr>,
    track_tokens: bool,
    log_io: bool,
}

fn generate_monitor_impl(
    args: Punctuated<Meta, Token![,]>,
    input_fn: ItemFn,
) -> syn::Result<TokenStream2> {
    let config = parse_monitor_args(&args)?;
    expand(&config, input_fn)
}

/// Parse monitor macro arguments
fn parse_monitor_args(args: &Punctuated<Meta, Token![,]>) -> syn::Result<MonitorConfig> {
    let mut agent = None;
    let mut span_name = None;
    let mut track_tokens = false;
    let mut log_io = false;

    for arg in args {
        match arg {
            Meta::NameValue(nv) if nv.path.is_ident("agent") => {
                agent = Some(nv.value.clone());
            }
            Meta::NameValue(nv) if nv.path.is_ident("span_name") => match &nv.value {
                Expr::Lit(ExprLit {
                    lit: Lit::Str(lit_str),
                    ..
                }) => {
                    validate_span_name(lit_str)?;
                    span_name = Some(lit_str.clone());
                }
                other => {
                    return Err(syn::Error::new_spanned(
                        other,
                        "`span_name` must be a string literal",
                    ))
                }
            },
            Meta::Path(path) if path.is_ident("track_tokens") => track_tokens = true,
            Meta::Path(path) if path.is_ident("log_io") => log_io = true,
            Meta::NameValue(nv) if nv.path.is_ident("track_tokens") => {
                track_tokens = bool_value(&nv.value)?;
            }
            Meta::NameValue(nv) if nv.path.is_ident("log_io") => {
                log_io = bool_value(&nv.value)?;
            }
            _ => {
                return Err(syn::Error::new_spanned(
                    arg,
                    "Unsupported monitor attribute. Use `agent`, `span_name`, `track_tokens` or `log_io`",
                ));
            }
        }
    }

    let agent = agent.ok_or_else(|| {
        syn::Error::new(
            proc_macro2::Span::call_site(),
            "missing `agent = ...` argument naming the Kansatsu agent",
        )
    })?;

    Ok(MonitorConfig {
        agent,
        span_name,
        track_tokens,
        log_io,
    })
}

fn bool_value(expr: &Expr) -> syn::Result<bool> {
    match expr {
        Expr::Lit(ExprLit {
            lit: Lit::Bool(value),
            ..
        }) => Ok(value.value),
        other => Err(syn::Error::new_spanned(other, "expected `true` or `false`")),
    }
}

fn validate_span_name(lit: &LitStr) -> syn::Result<()> {
    let name = lit.value();
    if name.trim().is_empty() {
        return Err(syn::Error::new_spanned(lit, "span name must not be empty"));
    }
    if name.chars().count() > MAX_NAME_LEN {
        return Err(syn::Error::new_spanned(
            lit,
            format!("span name must be at most {} characters", MAX_NAME_LEN),
        ));
    }
    if name.chars().any(char::is_control) {
        return Err(syn::Error::new_spanned(
            lit,
            "span name must not contain control characters",
        ));
    }
    Ok(())
}

/// Check if a type mentions `impl Trait` anywhere
fn contains_impl_trait(ty: &Type) -> bool {
    quote!(#ty).to_string().split_whitespace().any(|token| token == "impl")
}

/// `#[monitor]` or `#[kansatsu::monitor]`
fn is_monitor_attr(attr: &Attribute) -> bool {
    let segments: Vec<_> = attr
        .path()
        .segments
        .iter()
        .map(|segment| segment.ident.to_string())
        .collect();
    matches!(
        segments.iter().map(String::as_str).collect::<Vec<_>>().as_slice(),
        ["monitor"] | ["kansatsu", "monitor"]
    )
}

/// Rebuild the function with an instrumented body
fn expand(config: &MonitorConfig, input_fn: ItemFn) -> syn::Result<TokenStream2> {
    let ItemFn {
        attrs,
        vis,
        sig,
        block,
    } = input_fn;
    let attrs: Vec<_> = attrs
        .into_iter()
        .filter(|attr| !is_monitor_attr(attr))
        .collect();

    let fn_name = sig.ident.to_string();
    let agent = &config.agent;
    let track_tokens = config.track_tokens;
    let log_io = config.log_io;
    let span_name = match &config.span_name {
        Some(lit) => quote! { ::core::option::Option::Some(::std::string::String::from(#lit)) },
        None => quote! { ::core::option::Option::None },
    };

    let input = if config.log_io {
        let idents: Vec<_> = sig
            .inputs
            .iter()
            .filter_map(|arg| match arg {
                FnArg::Typed(pat_type) => match pat_type.pat.as_ref() {
                    Pat::Ident(pat_ident) => Some(pat_ident.ident.clone()),
                    _ => None,
                },
                FnArg::Receiver(_) => None,
            })
            .collect();
        quote! { __kansatsu_site.capture_input(&(#(&#idents,)*)) }
    } else {
        quote! { ::core::option::Option::None }
    };

    let return_type = match &sig.output {
        ReturnType::Default => Some(quote! { () }),
        ReturnType::Type(_, ty) if !contains_impl_trait(ty) => Some(quote! { #ty }),
        ReturnType::Type(_, _) => None,
    };

    let call = if sig.asyncness.is_some() {
        // Gives `?` and `return` inside the async block a known output type
        let return_hint = return_type.map(|ty| {
            quote! {
                #[allow(unreachable_code)]
                if false {
                    let __kansatsu_return: #ty = loop {};
                    return __kansatsu_return;
                }
            }
        });
        quote! {
            __kansatsu_site
                .run_async(__kansatsu_input, async move {
                    #return_hint
                    #block
                })
                .await
        }
    } else {
        // Elided lifetimes cannot be named in a closure's return type
        let closure = match return_type.filter(|ty| !ty.to_string().contains('&')) {
            Some(ty) => quote! { move || -> #ty #block },
            None => quote! { move || #block },
        };
        quote! { __kansatsu_site.run(__kansatsu_input, #closure) }
    };

    Ok(quote! {
        #(#attrs)*
        #vis #sig {
            let __kansatsu_site = ::kansatsu::Kansatsu::monitor_site(
                &#agent,
                #fn_name,
                ::kansatsu::InstrumentConfig {
                    track_tokens: #track_tokens,
                    log_io: #log_io,
                    span_name: #span_name,
                },
            );
            let __kansatsu_input = #input;
            #call
        }
    })
}
