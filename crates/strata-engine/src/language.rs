//! Guest language collaborator interface.
//!
//! The core never implements a language; it calls into one through this
//! trait. A language supplies initialization and parsing; the result of a
//! parse is a [`CallTarget`] the engine can invoke any number of times.

use crate::context::Context;
use crate::error::GuestError;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use strata_sdk::Value;

/// A unit of parsed, executable guest code.
pub struct CallTarget {
    name: String,
    callable: Arc<dyn Fn(&[Value]) -> Result<Value, GuestError> + Send + Sync>,
}

impl CallTarget {
    /// Wrap a callable produced by a language's parser.
    pub fn new<F>(name: &str, callable: F) -> Arc<Self>
    where
        F: Fn(&[Value]) -> Result<Value, GuestError> + Send + Sync + 'static,
    {
        Arc::new(Self {
            name: name.to_string(),
            callable: Arc::new(callable),
        })
    }

    /// Diagnostic name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Execute with the given arguments.
    pub fn call(&self, args: &[Value]) -> Result<Value, GuestError> {
        (self.callable)(args)
    }
}

/// A guest source unit with a stable identity.
///
/// Identity, not text equality, keys the parse cache: two sources with the
/// same text are distinct cache entries.
pub struct Source {
    id: u64,
    name: String,
    text: String,
}

static NEXT_SOURCE_ID: AtomicU64 = AtomicU64::new(1);

impl Source {
    /// Create a source unit.
    pub fn new(name: &str, text: &str) -> Arc<Self> {
        Arc::new(Self {
            id: NEXT_SOURCE_ID.fetch_add(1, Ordering::Relaxed),
            name: name.to_string(),
            text: text.to_string(),
        })
    }

    /// Stable identity token
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Source name (file name, eval tag, ...)
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Source text
    pub fn text(&self) -> &str {
        &self.text
    }
}

/// A hosted guest language runtime.
pub trait Language: Send + Sync {
    /// Language identifier (e.g. "js", "toy")
    fn name(&self) -> &str;

    /// Called once per context before the first parse for that context.
    fn initialize(&self, context: &Arc<Context>) -> Result<(), GuestError>;

    /// Parse a source into an executable call target.
    ///
    /// `arg_names` declares the names under which call arguments are
    /// visible to the parsed code; an empty list means none.
    fn parse(
        &self,
        source: &Arc<Source>,
        arg_names: &[String],
    ) -> Result<Arc<CallTarget>, GuestError>;
}
