//! Tool invocation adapter
//!
//! Test code calls "a tool" the same way whether the tool is a local object
//! or a named tool on the remote server. A local tool's invocable shape is not
//! known in advance, so [`probe`] inspects its capabilities in a fixed order
//! and returns a [`Resolution`] naming the strategy [`invoke`] will use:
//!
//! 1. [`Resolution::DirectCallable`] -- the object itself takes keyword
//!    arguments.
//! 2. [`Resolution::WrappedCallable`] -- the object exposes an inner callable
//!    under one of [`WRAPPER_ATTRIBUTES`], probed in that order.
//! 3. [`Resolution::RunnableWithKeywords`] -- the object has a generic `run`.
//!    If the keyword form is rejected with
//!    [`HarnessError::SignatureMismatch`], the call is retried as
//!    [`Resolution::RunnableWithPositionalStruct`].
//! 4. [`Resolution::Unresolvable`] -- [`HarnessError::NotInvocable`].
//!
//! Remote tools are always `DirectCallable`.

pub mod local;
pub mod remote;

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Map, Value};

use crate::error::{HarnessError, Result};

pub use local::{FnTool, WrappedTool};
pub use remote::{normalize_tool_result, RemoteTool};

/// Keyword arguments passed to a tool.
pub type Arguments = Map<String, Value>;

/// Inner attribute names probed for a wrapped callable, in order.
pub const WRAPPER_ATTRIBUTES: [&str; 5] = ["fn", "func", "function", "_fn", "callable"];

/// Something that can be called with keyword arguments.
#[async_trait]
pub trait KeywordCallable: Send + Sync {
    /// Call with keyword arguments and return the raw result.
    async fn call(&self, arguments: Arguments) -> Result<Value>;
}

/// A generic `run` entry point.
#[async_trait]
pub trait Runnable: Send + Sync {
    /// Run with keyword arguments.
    ///
    /// Implementations that only accept a single positional input return
    /// [`HarnessError::SignatureMismatch`] here.
    async fn run_keywords(&self, arguments: Arguments) -> Result<Value>;

    /// Run with the arguments passed as one positional JSON object.
    async fn run_positional(&self, input: Value) -> Result<Value>;
}

/// A local tool object whose invocable shape is discovered at call time.
///
/// Every capability defaults to absent; implementors override the ones they
/// support.
pub trait ToolObject: Send + Sync + fmt::Debug {
    /// Tool name, used in diagnostics.
    fn name(&self) -> &str;

    /// The object itself, if it is keyword-callable.
    fn as_callable(&self) -> Option<&dyn KeywordCallable> {
        None
    }

    /// An inner callable exposed under `attribute`.
    fn attribute(&self, _attribute: &str) -> Option<&dyn KeywordCallable> {
        None
    }

    /// A generic `run` entry point.
    fn as_runnable(&self) -> Option<&dyn Runnable> {
        None
    }
}

/// A reference to a tool, local or remote.
#[derive(Debug, Clone)]
pub enum ToolRef {
    /// A local invocable object.
    Local(Arc<dyn ToolObject>),
    /// A named tool reached through an active client session.
    Remote(RemoteTool),
}

impl ToolRef {
    /// Wrap a local tool object.
    pub fn local(tool: impl ToolObject + 'static) -> Self {
        Self::Local(Arc::new(tool))
    }

    /// Tool name.
    pub fn name(&self) -> &str {
        match self {
            Self::Local(tool) => tool.name(),
            Self::Remote(tool) => tool.name(),
        }
    }
}

/// The strategy chosen to invoke a tool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    /// The tool object is itself callable.
    DirectCallable,
    /// An inner callable found under `attribute`.
    WrappedCallable {
        /// Which of [`WRAPPER_ATTRIBUTES`] matched.
        attribute: &'static str,
    },
    /// Generic `run` with keyword arguments.
    RunnableWithKeywords,
    /// Generic `run` with one positional JSON object (retry path).
    RunnableWithPositionalStruct,
    /// No strategy applies.
    Unresolvable,
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DirectCallable => write!(f, "direct"),
            Self::WrappedCallable { attribute } => write!(f, "wrapped .{attribute}"),
            Self::RunnableWithKeywords => write!(f, "run(**kwargs)"),
            Self::RunnableWithPositionalStruct => write!(f, "run(args)"),
            Self::Unresolvable => write!(f, "unresolvable"),
        }
    }
}

/// The result of a successful invocation plus the strategy that produced it.
#[derive(Debug, Clone, PartialEq)]
pub struct Invocation {
    /// Strategy actually used.
    pub resolution: Resolution,
    /// Value returned by the tool.
    pub value: Value,
}

/// Decide how a tool would be invoked, without invoking it.
///
/// [`Resolution::RunnableWithPositionalStruct`] is never returned here; it is
/// reached only through the retry in [`invoke`].
///
/// # Examples
///
/// ```
/// use pgmcp_harness::tools::{probe, FnTool, Resolution, ToolRef};
///
/// let tool = ToolRef::local(FnTool::new("ping", |_args| async {
///     Ok(serde_json::json!({"ok": true}))
/// }));
/// assert_eq!(probe(&tool), Resolution::DirectCallable);
/// ```
pub fn probe(tool: &ToolRef) -> Resolution {
    match tool {
        ToolRef::Remote(_) => Resolution::DirectCallable,
        ToolRef::Local(obj) => probe_local(obj.as_ref()),
    }
}

fn probe_local(obj: &dyn ToolObject) -> Resolution {
    if obj.as_callable().is_some() {
        return Resolution::DirectCallable;
    }
    for attribute in WRAPPER_ATTRIBUTES {
        if obj.attribute(attribute).is_some() {
            return Resolution::WrappedCallable { attribute };
        }
    }
    if obj.as_runnable().is_some() {
        return Resolution::RunnableWithKeywords;
    }
    Resolution::Unresolvable
}

/// Invoke a tool with keyword arguments.
///
/// # Errors
///
/// Returns [`HarnessError::NotInvocable`] if no strategy applies, or the
/// tool's own error unchanged.
pub async fn invoke(tool: &ToolRef, arguments: Arguments) -> Result<Value> {
    Ok(invoke_traced(tool, arguments).await?.value)
}

/// Like [`invoke`], but also reports which strategy was used.
pub async fn invoke_traced(tool: &ToolRef, arguments: Arguments) -> Result<Invocation> {
    let obj = match tool {
        ToolRef::Remote(remote) => {
            let value = remote.call(arguments).await?;
            return Ok(Invocation {
                resolution: Resolution::DirectCallable,
                value,
            });
        }
        ToolRef::Local(obj) => obj.as_ref(),
    };

    let resolution = probe_local(obj);
    tracing::debug!("invoking {} via {resolution}", obj.name());

    let callable = match resolution {
        Resolution::DirectCallable => obj.as_callable(),
        Resolution::WrappedCallable { attribute } => obj.attribute(attribute),
        _ => None,
    };
    if let Some(callable) = callable {
        let value = callable.call(arguments).await?;
        return Ok(Invocation { resolution, value });
    }

    let runnable = match obj.as_runnable() {
        Some(runnable) if resolution == Resolution::RunnableWithKeywords => runnable,
        _ => return Err(HarnessError::NotInvocable(obj.name().to_string()).into()),
    };

    match runnable.run_keywords(arguments.clone()).await {
        Ok(value) => Ok(Invocation { resolution, value }),
        Err(e) if is_signature_mismatch(&e) => {
            tracing::debug!("{}: keyword run rejected ({e}); retrying positionally", obj.name());
            let value = runnable.run_positional(Value::Object(arguments)).await?;
            Ok(Invocation {
                resolution: Resolution::RunnableWithPositionalStruct,
                value,
            })
        }
        Err(e) => Err(e),
    }
}

fn is_signature_mismatch(err: &anyhow::Error) -> bool {
    matches!(
        err.downcast_ref::<HarnessError>(),
        Some(HarnessError::SignatureMismatch(_))
    )
}

/// Named collection of tool references.
///
/// The scenario runner resolves tools by name through a registry so the same
/// tool menu can run against local objects or a remote session.
#[derive(Debug, Clone, Default)]
pub struct ToolRegistry {
    tools: BTreeMap<String, ToolRef>,
}

impl ToolRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tool under its own name, replacing any previous entry.
    pub fn register(&mut self, tool: ToolRef) {
        self.tools.insert(tool.name().to_string(), tool);
    }

    /// Look up a tool by name.
    pub fn get(&self, name: &str) -> Option<&ToolRef> {
        self.tools.get(name)
    }

    /// Invoke a registered tool by name.
    ///
    /// # Errors
    ///
    /// Returns [`HarnessError::NotInvocable`] if no tool has that name.
    pub async fn invoke(&self, name: &str, arguments: Arguments) -> Result<Value> {
        let tool = self
            .get(name)
            .ok_or_else(|| HarnessError::NotInvocable(name.to_string()))?;
        invoke(tool, arguments).await
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<&str> {
        self.tools.keys().map(String::as_str).collect()
    }

    /// Number of registered tools.
    pub fn len(&self) -> usize {
        self.tools.len()
    }

    /// Whether the registry is empty.
    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}
