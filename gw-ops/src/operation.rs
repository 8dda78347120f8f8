//! The `Operation` contract and the built-in registry that locates an
//! implementation by `"module.Class"` name.
//!
//! Grounded in `examples/original_source/redpepper/operations/__init__.py`'s
//! `Operation` base class (`test`/`run`/`ensure`, with the default
//! `ensure` calling `test` then `run` only if needed). Per §9's guidance
//! for a systems-language port ("prefer a plug-in table... refuse unknown
//! type"), the registry here is a closed, compiled-in map rather than a
//! dynamic module loader.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::{Map, Value};

use crate::error::{OpError, Result};
use crate::result::OpResult;

/// What an operation needs from its environment to run. Kept minimal and
/// free of any data-resolution dependency (`gw-data` depends on `gw-ops`,
/// not the other way around) — the agent command runtime fills this in
/// per dispatch.
pub struct AgentContext {
    pub agent_id: String,
}

pub trait Operation: Send + Sync {
    /// `module.Class` this operation answers to, e.g. `"echo.Echo"`.
    fn type_name(&self) -> &'static str;

    /// Returns true if the operation's desired state already holds (no
    /// work needed). Operations with no natural test (e.g. `command.Run`)
    /// should return `Ok(false)` so `ensure` always calls `run`.
    fn test(&self, ctx: &AgentContext) -> Result<bool>;

    /// Perform the work unconditionally.
    fn run(&self, ctx: &AgentContext) -> Result<OpResult>;

    /// Default composition: skip `run` if `test` already holds.
    fn ensure(&self, ctx: &AgentContext) -> Result<OpResult> {
        if self.test(ctx)? {
            Ok(OpResult::success(self.type_name(), "already satisfied", false))
        } else {
            self.run(ctx)
        }
    }
}

type Constructor = Arc<dyn Fn(Vec<Value>, Map<String, Value>) -> Result<Box<dyn Operation>> + Send + Sync>;

/// A closed registry of built-in operation constructors, keyed by
/// `"module.Class"`. See `crate::builtin::register_all` for the shipped
/// set.
#[derive(Clone)]
pub struct OperationRegistry {
    constructors: HashMap<&'static str, Constructor>,
}

impl Default for OperationRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}

impl OperationRegistry {
    pub fn empty() -> Self {
        Self {
            constructors: HashMap::new(),
        }
    }

    pub fn builtin() -> Self {
        let mut registry = Self::empty();
        crate::builtin::register_all(&mut registry);
        registry
    }

    pub fn register<F>(&mut self, type_name: &'static str, constructor: F)
    where
        F: Fn(Vec<Value>, Map<String, Value>) -> Result<Box<dyn Operation>> + Send + Sync + 'static,
    {
        self.constructors.insert(type_name, Arc::new(constructor));
    }

    pub fn contains(&self, type_name: &str) -> bool {
        self.constructors.contains_key(type_name)
    }

    pub fn construct(&self, type_name: &str, args: Vec<Value>, kwargs: Map<String, Value>) -> Result<Box<dyn Operation>> {
        let constructor = self
            .constructors
            .get(type_name)
            .ok_or_else(|| OpError::UnknownType(type_name.to_string()))?;
        constructor(args, kwargs)
    }
}

/// Pull a required string keyword argument, falling back to the first
/// positional argument if no keyword was given — several built-in
/// operations accept either calling convention, matching the Python
/// operations' `(*args, **kwargs)` flexibility.
pub fn required_string(args: &[Value], kwargs: &Map<String, Value>, key: &str) -> Result<String> {
    if let Some(v) = kwargs.get(key) {
        return v
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| OpError::InvalidArgs(format!("{key} must be a string")));
    }
    args.first()
        .and_then(|v| v.as_str())
        .map(str::to_string)
        .ok_or_else(|| OpError::InvalidArgs(format!("missing required argument: {key}")))
}
