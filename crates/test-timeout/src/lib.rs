//! Attribute macros that run a test body on a watchdog thread and fail the
//! test once the wall-clock budget is exhausted.
//!
//! `#[test_timeout::timeout]` wraps a synchronous test, and
//! `#[test_timeout::tokio_timeout_test]` wraps an `async fn` on a fresh
//! current-thread Tokio runtime. Both accept an optional budget in seconds:
//! `#[test_timeout::tokio_timeout_test(5)]`.

use proc_macro::TokenStream;
use proc_macro2::TokenStream as TokenStream2;
use quote::quote;
use syn::{Attribute, ItemFn, LitInt, parse_macro_input};

const DEFAULT_BUDGET_SECS: u64 = 30;

#[proc_macro_attribute]
pub fn tokio_timeout_test(attr: TokenStream, item: TokenStream) -> TokenStream {
    let budget = match parse_budget(attr) {
        Ok(secs) => secs,
        Err(err) => return err.to_compile_error().into(),
    };
    let ItemFn {
        attrs,
        vis,
        mut sig,
        block,
    } = parse_macro_input!(item as ItemFn);

    if sig.asyncness.take().is_none() {
        return syn::Error::new_spanned(&sig.fn_token, "tokio_timeout_test expects an async fn")
            .to_compile_error()
            .into();
    }

    let body = quote! {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .expect("build tokio runtime for test");
        runtime.block_on(async move {
            if tokio::time::timeout(budget, async move #block).await.is_err() {
                panic!("test exceeded {:?}", budget);
            }
        });
    };

    let attrs = strip_attrs(attrs, &["tokio", "test"]);
    harness(attrs, vis, sig, budget, body).into()
}

#[proc_macro_attribute]
pub fn timeout(attr: TokenStream, item: TokenStream) -> TokenStream {
    let budget = match parse_budget(attr) {
        Ok(secs) => secs,
        Err(err) => return err.to_compile_error().into(),
    };
    let ItemFn {
        attrs,
        vis,
        sig,
        block,
    } = parse_macro_input!(item as ItemFn);

    if let Some(token) = sig.asyncness {
        return syn::Error::new_spanned(token, "use tokio_timeout_test for async tests")
            .to_compile_error()
            .into();
    }

    let body = quote! {
        let _ = budget;
        #block
    };

    let attrs = strip_attrs(attrs, &["test"]);
    harness(attrs, vis, sig, budget, body).into()
}

fn parse_budget(attr: TokenStream) -> syn::Result<u64> {
    if attr.is_empty() {
        return Ok(DEFAULT_BUDGET_SECS);
    }
    let lit: LitInt = syn::parse(attr)?;
    let secs: u64 = lit.base10_parse()?;
    if secs == 0 {
        return Err(syn::Error::new_spanned(lit, "timeout budget must be non-zero"));
    }
    Ok(secs)
}

/// Drops `#[test]` / `#[tokio::test]` so the generated `#[test]` is the only one.
fn strip_attrs(attrs: Vec<Attribute>, path: &[&str]) -> Vec<Attribute> {
    attrs
        .into_iter()
        .filter(|attr| {
            let segments: Vec<String> = attr
                .path()
                .segments
                .iter()
                .map(|segment| segment.ident.to_string())
                .collect();
            segments != path
        })
        .collect()
}

fn harness(
    attrs: Vec<Attribute>,
    vis: syn::Visibility,
    sig: syn::Signature,
    budget_secs: u64,
    body: TokenStream2,
) -> TokenStream2 {
    quote! {
        #[test]
        #(#attrs)*
        #vis #sig {
            let budget = std::time::Duration::from_secs(#budget_secs);
            let (done_tx, done_rx) = std::sync::mpsc::channel();
            let worker = std::thread::Builder::new()
                .name("test-timeout".into())
                .spawn(move || {
                    let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(move || {
                        #body
                    }));
                    let _ = done_tx.send(outcome);
                })
                .expect("spawn test worker thread");
            match done_rx.recv_timeout(budget) {
                Ok(Ok(())) => {
                    let _ = worker.join();
                }
                Ok(Err(payload)) => std::panic::resume_unwind(payload),
                Err(std::sync::mpsc::RecvTimeoutError::Timeout) => {
                    panic!("test exceeded {:?}", budget)
                }
                Err(std::sync::mpsc::RecvTimeoutError::Disconnected) => {
                    panic!("test worker exited without reporting")
                }
            }
        }
    }
}
