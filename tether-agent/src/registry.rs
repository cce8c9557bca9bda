//! Closed table of callable operations.

use std::collections::BTreeMap;
use std::fmt;

use tether_proto::Value;

use crate::ops::{self, Session};

/// What an operation produces.
pub enum Output {
    /// A single value.
    Scalar(Value),
    /// Values produced one at a time. An `Err` item ends the stream.
    Stream(Box<dyn Iterator<Item = Result<Value, String>> + Send>),
}

impl fmt::Debug for Output {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Scalar(v) => f.debug_tuple("Scalar").field(v).finish(),
            Self::Stream(_) => f.write_str("Stream(..)"),
        }
    }
}

/// Result of an operation: its output or an error message for the host.
pub type OpResult = Result<Output, String>;

/// A callable operation.
pub type Operation = Box<dyn Fn(&mut Session, Vec<Value>) -> OpResult + Send + Sync>;

/// Named operations, grouped by module.
///
/// Names are either bare (`echo`) or qualified by exactly one module
/// (`os.listdir`). The table is assembled at build time; the wire protocol
/// has no way to add to it.
#[derive(Default)]
pub struct Registry {
    modules: BTreeMap<String, BTreeMap<String, Operation>>,
}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registry")
            .field("names", &self.names())
            .finish()
    }
}

impl Registry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// The standard set of filesystem and diagnostic operations.
    pub fn builtin() -> Self {
        Self::new()
            .with("echo", ops::echo)
            .with("os.listdir", ops::listdir)
            .with("os.listdir_long", ops::listdir_long)
            .with("os.unlink", ops::unlink)
            .with("os.mkdir", ops::mkdir)
            .with("os.rmdir", ops::rmdir)
            .with("os.uname", ops::uname)
            .with("file.open", ops::file_open)
            .with("file.read", ops::file_read)
            .with("file.write", ops::file_write)
            .with("file.close", ops::file_close)
            .with("file.read_all", ops::file_read_all)
            .with("file.checksum", ops::file_checksum)
    }

    /// Adds or replaces `name`.
    ///
    /// # Panics
    ///
    /// Panics if `name` has more than one module qualifier; the table is
    /// built from literals, so this is a programming error.
    #[must_use]
    #[allow(clippy::panic)]
    pub fn with(
        mut self,
        name: &str,
        op: impl Fn(&mut Session, Vec<Value>) -> OpResult + Send + Sync + 'static,
    ) -> Self {
        let Some((module, function)) = split(name) else {
            panic!("operation name {name:?} has more than one module qualifier");
        };
        self.modules
            .entry(module.to_owned())
            .or_default()
            .insert(function.to_owned(), Box::new(op));
        self
    }

    /// Looks up `name`.
    pub fn resolve(&self, name: &str) -> Option<&Operation> {
        let (module, function) = split(name)?;
        self.modules.get(module)?.get(function)
    }

    /// Resolves and invokes `name`.
    pub fn invoke(&self, session: &mut Session, name: &str, args: Vec<Value>) -> OpResult {
        let op = self
            .resolve(name)
            .ok_or_else(|| format!("no such function: {name}"))?;
        op(session, args)
    }

    /// Every registered name, qualified.
    pub fn names(&self) -> Vec<String> {
        self.modules
            .iter()
            .flat_map(|(module, ops)| {
                ops.keys().map(move |f| {
                    if module.is_empty() {
                        f.clone()
                    } else {
                        format!("{module}.{f}")
                    }
                })
            })
            .collect()
    }
}

/// Splits `os.listdir` into `("os", "listdir")` and `echo` into `("", "echo")`.
fn split(name: &str) -> Option<(&str, &str)> {
    match name.split_once('.') {
        None => Some(("", name)),
        Some((_, rest)) if rest.contains('.') => None,
        Some(pair) => Some(pair),
    }
}
