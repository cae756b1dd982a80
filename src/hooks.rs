//! Extension points around the uploader pipeline and attacher operations.
//!
//! Two kinds of hooks compose here:
//!
//! - **Effect hooks** (`before_*` / `after_*`): side-effect-only callbacks
//!   invoked in registration order.
//! - **Around interceptors**: wrappers with an explicit [`Next`]
//!   continuation. The most recently registered interceptor is the
//!   outermost; an interceptor that does not invoke `next` short-circuits
//!   everything inside it (soft delete relies on this).
//!
//! Registration happens once on the class builder; invocation order is
//! fixed thereafter.

use std::sync::Arc;

use async_trait::async_trait;
use futures::future::BoxFuture;

use crate::error::{AttachResult, ValidationIssue};
use crate::types::{ContentStream, FileRef, OpContext};
use crate::uploader::{Processed, StoreRequest};

/// Boxed future returned by hooks and pipeline steps
pub type OpFuture<'a, T> = BoxFuture<'a, AttachResult<T>>;

/// Side-effect-only hook, invoked before or after a pipeline step
#[async_trait]
pub trait EffectHook: Send + Sync {
    async fn call(&self, ctx: &OpContext) -> AttachResult<()>;
}

struct FnEffect<F>(F);

#[async_trait]
impl<F> EffectHook for FnEffect<F>
where
    F: Fn(&OpContext) -> AttachResult<()> + Send + Sync,
{
    async fn call(&self, ctx: &OpContext) -> AttachResult<()> {
        (self.0)(ctx)
    }
}

/// Adapt a plain closure into an [`EffectHook`]
pub fn effect_fn<F>(f: F) -> Arc<dyn EffectHook>
where
    F: Fn(&OpContext) -> AttachResult<()> + Send + Sync + 'static,
{
    Arc::new(FnEffect(f))
}

pub(crate) async fn run_effects(
    hooks: &[Arc<dyn EffectHook>],
    ctx: &OpContext,
) -> AttachResult<()> {
    for hook in hooks {
        hook.call(ctx).await?;
    }
    Ok(())
}

/// Wrapping interceptor for one operation, from input `I` to output `O`
pub trait Around<I: Send, O>: Send + Sync {
    fn around<'a>(&'a self, input: I, ctx: &'a OpContext, next: Next<'a, I, O>) -> OpFuture<'a, O>
    where
        I: 'a,
        O: 'a;
}

impl<I: Send, O, T: Around<I, O> + ?Sized> Around<I, O> for Arc<T> {
    fn around<'a>(&'a self, input: I, ctx: &'a OpContext, next: Next<'a, I, O>) -> OpFuture<'a, O>
    where
        I: 'a,
        O: 'a,
    {
        (**self).around(input, ctx, next)
    }
}

/// Innermost step of an around chain
pub trait Terminal<I: Send, O>: Send + Sync {
    fn call<'a>(&'a self, input: I, ctx: &'a OpContext) -> OpFuture<'a, O>
    where
        I: 'a,
        O: 'a;
}

/// Continuation handed to an [`Around`] interceptor. Calling
/// [`Next::run`] invokes the rest of the chain down to the terminal.
pub struct Next<'a, I: Send, O> {
    chain: &'a [Arc<dyn Around<I, O>>],
    terminal: &'a dyn Terminal<I, O>,
}

impl<'a, I: Send + 'a, O: 'a> Next<'a, I, O> {
    pub fn new(chain: &'a [Arc<dyn Around<I, O>>], terminal: &'a dyn Terminal<I, O>) -> Self {
        Self { chain, terminal }
    }

    /// Run the remaining chain. The last registered interceptor wraps all
    /// previously registered ones.
    pub fn run(self, input: I, ctx: &'a OpContext) -> OpFuture<'a, O> {
        match self.chain.split_last() {
            Some((outermost, inner)) => outermost.around(
                input,
                ctx,
                Next {
                    chain: inner,
                    terminal: self.terminal,
                },
            ),
            None => self.terminal.call(input, ctx),
        }
    }
}

/// Validation rule run against a candidate reference before assignment.
/// Issues are collected on the attacher, not raised.
#[async_trait]
pub trait Validator: Send + Sync {
    async fn validate(&self, candidate: &FileRef, ctx: &OpContext) -> Vec<ValidationIssue>;
}

struct FnValidator<F>(F);

#[async_trait]
impl<F> Validator for FnValidator<F>
where
    F: Fn(&FileRef, &OpContext) -> Vec<ValidationIssue> + Send + Sync,
{
    async fn validate(&self, candidate: &FileRef, ctx: &OpContext) -> Vec<ValidationIssue> {
        (self.0)(candidate, ctx)
    }
}

/// Adapt a plain closure into a [`Validator`]
pub fn validator_fn<F>(f: F) -> Arc<dyn Validator>
where
    F: Fn(&FileRef, &OpContext) -> Vec<ValidationIssue> + Send + Sync + 'static,
{
    Arc::new(FnValidator(f))
}

/// Rejects files larger than a byte limit
pub struct MaxSize {
    pub bytes: u64,
}

#[async_trait]
impl Validator for MaxSize {
    async fn validate(&self, candidate: &FileRef, _ctx: &OpContext) -> Vec<ValidationIssue> {
        match candidate.size() {
            Some(size) if size > self.bytes => vec![ValidationIssue::new(format!(
                "file is too large ({size} bytes, max {})",
                self.bytes
            ))],
            _ => Vec::new(),
        }
    }
}

/// Registered hooks for one attachment class. Append-only at configuration
/// time, immutable during request processing.
#[derive(Default)]
pub struct HookRegistry {
    pub(crate) before_process: Vec<Arc<dyn EffectHook>>,
    pub(crate) after_process: Vec<Arc<dyn EffectHook>>,
    pub(crate) before_store: Vec<Arc<dyn EffectHook>>,
    pub(crate) after_store: Vec<Arc<dyn EffectHook>>,
    pub(crate) before_delete: Vec<Arc<dyn EffectHook>>,
    pub(crate) after_delete: Vec<Arc<dyn EffectHook>>,
    pub(crate) around_process: Vec<Arc<dyn Around<ContentStream, Processed>>>,
    pub(crate) around_store: Vec<Arc<dyn Around<StoreRequest, FileRef>>>,
    pub(crate) around_delete: Vec<Arc<dyn Around<FileRef, FileRef>>>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Action;

    type Trace = Vec<String>;

    fn test_ctx() -> OpContext {
        OpContext::new(serde_json::Value::Null, "file", Action::Cache, "cache")
    }

    struct Tag(&'static str);

    impl Around<Trace, Trace> for Tag {
        fn around<'a>(
            &'a self,
            mut input: Trace,
            ctx: &'a OpContext,
            next: Next<'a, Trace, Trace>,
        ) -> OpFuture<'a, Trace>
        where
            Trace: 'a,
        {
            Box::pin(async move {
                input.push(format!("{}:enter", self.0));
                let mut out = next.run(input, ctx).await?;
                out.push(format!("{}:exit", self.0));
                Ok(out)
            })
        }
    }

    struct Suppress;

    impl Around<Trace, Trace> for Suppress {
        fn around<'a>(
            &'a self,
            mut input: Trace,
            _ctx: &'a OpContext,
            _next: Next<'a, Trace, Trace>,
        ) -> OpFuture<'a, Trace>
        where
            Trace: 'a,
        {
            Box::pin(async move {
                input.push("suppressed".to_string());
                Ok(input)
            })
        }
    }

    struct Echo;

    impl Terminal<Trace, Trace> for Echo {
        fn call<'a>(&'a self, mut input: Trace, _ctx: &'a OpContext) -> OpFuture<'a, Trace>
        where
            Trace: 'a,
        {
            Box::pin(async move {
                input.push("terminal".to_string());
                Ok(input)
            })
        }
    }

    #[tokio::test]
    async fn last_registered_wraps_all_previous() {
        let chain: Vec<Arc<dyn Around<Trace, Trace>>> =
            vec![Arc::new(Tag("inner")), Arc::new(Tag("outer"))];
        let ctx = test_ctx();

        let out = Next::new(&chain, &Echo).run(Vec::new(), &ctx).await.unwrap();

        assert_eq!(
            out,
            vec![
                "outer:enter",
                "inner:enter",
                "terminal",
                "inner:exit",
                "outer:exit"
            ]
        );
    }

    #[tokio::test]
    async fn skipping_next_short_circuits_inner_chain() {
        let chain: Vec<Arc<dyn Around<Trace, Trace>>> =
            vec![Arc::new(Tag("inner")), Arc::new(Suppress)];
        let ctx = test_ctx();

        let out = Next::new(&chain, &Echo).run(Vec::new(), &ctx).await.unwrap();

        // Neither the inner interceptor nor the terminal ran
        assert_eq!(out, vec!["suppressed"]);
    }

    #[tokio::test]
    async fn effect_hooks_run_in_registration_order() {
        use parking_lot::Mutex;

        let seen = Arc::new(Mutex::new(Vec::new()));
        let hooks: Vec<Arc<dyn EffectHook>> = ["first", "second"]
            .into_iter()
            .map(|label| {
                let seen = seen.clone();
                effect_fn(move |_ctx| {
                    seen.lock().push(label);
                    Ok(())
                })
            })
            .collect();

        run_effects(&hooks, &test_ctx()).await.unwrap();
        assert_eq!(*seen.lock(), vec!["first", "second"]);
    }
}
