//! Local tool objects built from closures

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::BoxFuture;
use futures::FutureExt;
use serde_json::Value;

use crate::error::Result;
use crate::tools::{Arguments, KeywordCallable, ToolObject};

type ToolFn = dyn Fn(Arguments) -> BoxFuture<'static, Result<Value>> + Send + Sync;

/// A directly callable tool backed by an async closure.
///
/// # Examples
///
/// ```
/// use pgmcp_harness::tools::{invoke, FnTool, ToolRef};
///
/// # #[tokio::main]
/// # async fn main() -> anyhow::Result<()> {
/// let ping = ToolRef::local(FnTool::new("ping", |_args| async {
///     Ok(serde_json::json!({"ok": true}))
/// }));
/// let out = invoke(&ping, serde_json::Map::new()).await?;
/// assert_eq!(out["ok"], true);
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct FnTool {
    name: String,
    func: Arc<ToolFn>,
}

impl FnTool {
    /// Wrap `func` as a tool named `name`.
    pub fn new<F, Fut>(name: impl Into<String>, func: F) -> Self
    where
        F: Fn(Arguments) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value>> + Send + 'static,
    {
        Self {
            name: name.into(),
            func: Arc::new(move |args| func(args).boxed()),
        }
    }
}

impl fmt::Debug for FnTool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnTool").field("name", &self.name).finish()
    }
}

#[async_trait]
impl KeywordCallable for FnTool {
    async fn call(&self, arguments: Arguments) -> Result<Value> {
        (self.func)(arguments).await
    }
}

impl ToolObject for FnTool {
    fn name(&self) -> &str {
        &self.name
    }

    fn as_callable(&self) -> Option<&dyn KeywordCallable> {
        Some(self)
    }
}

/// A tool object that is not callable itself but exposes an inner callable
/// under a named attribute.
#[derive(Debug, Clone)]
pub struct WrappedTool {
    name: String,
    attribute: String,
    inner: FnTool,
}

impl WrappedTool {
    /// Expose `inner` under `attribute`.
    pub fn new(name: impl Into<String>, attribute: impl Into<String>, inner: FnTool) -> Self {
        Self {
            name: name.into(),
            attribute: attribute.into(),
            inner,
        }
    }
}

impl ToolObject for WrappedTool {
    fn name(&self) -> &str {
        &self.name
    }

    fn attribute(&self, attribute: &str) -> Option<&dyn KeywordCallable> {
        (attribute == self.attribute).then_some(&self.inner as &dyn KeywordCallable)
    }
}
