//! Lifecycle handlers.
//!
//! Handlers perform side effects at fixed container phases:
//! - `on_create`: only for a freshly created container
//! - `on_open`: every time a session starts, after `on_create`
//! - `on_close`: when the session ends
//!
//! The chain order is fixed: checksums, mapping, then custom handlers in
//! registration order.

mod checksum;
mod mapping;

use std::fmt;

use thiserror::Error;
use tracing::{debug, warn};

use crate::format::FormatParameters;
use crate::storage::{Directory, ReadOnly, StorageError};

pub use checksum::{ChecksumHandler, ChecksumMismatch, ChecksumRecord};
pub use mapping::{MappingHandler, Reference, ReferenceType};

/// Result type for handler operations.
pub type HandlerResult<T> = Result<T, HandlerError>;

/// Errors raised by lifecycle handlers.
#[derive(Debug, Error)]
pub enum HandlerError {
    /// Storage layer error.
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// A persisted record could not be encoded or decoded.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The standard path already has a reference.
    #[error("there is already a reference for file '{0}'")]
    DuplicateReference(String),

    /// A custom handler failed.
    #[error("handler '{handler}' failed: {reason}")]
    Failed { handler: String, reason: String },
}

/// What a handler sees of the container.
#[derive(Debug)]
pub struct HandlerContext<'a> {
    root: &'a Directory,
    parameters: &'a FormatParameters,
    writable: bool,
}

impl<'a> HandlerContext<'a> {
    pub fn new(root: &'a Directory, parameters: &'a FormatParameters, writable: bool) -> Self {
        Self {
            root,
            parameters,
            writable,
        }
    }

    /// The container root, read-only.
    pub fn root(&self) -> Directory<ReadOnly> {
        self.root.clone().into_read_only()
    }

    /// The container root, `None` in read-only sessions.
    pub fn writable_root(&self) -> Option<&Directory> {
        self.writable.then_some(self.root)
    }

    pub fn parameters(&self) -> &FormatParameters {
        self.parameters
    }

    pub fn is_writable(&self) -> bool {
        self.writable
    }
}

/// A participant in the container lifecycle.
pub trait LifecycleHandler: fmt::Debug + Send {
    fn name(&self) -> &str;

    fn on_create(&mut self, _ctx: &HandlerContext<'_>) -> HandlerResult<()> {
        Ok(())
    }

    fn on_open(&mut self, _ctx: &HandlerContext<'_>) -> HandlerResult<()> {
        Ok(())
    }

    fn on_close(&mut self, _ctx: &HandlerContext<'_>) -> HandlerResult<()> {
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Create,
    Open,
    Close,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Phase::Create => write!(f, "create"),
            Phase::Open => write!(f, "open"),
            Phase::Close => write!(f, "close"),
        }
    }
}

/// Ordered handler chain of one container.
#[derive(Debug, Default)]
pub struct HandlerChain {
    checksum: ChecksumHandler,
    mapping: MappingHandler,
    custom: Vec<Box<dyn LifecycleHandler>>,
}

impl HandlerChain {
    pub fn new(custom: Vec<Box<dyn LifecycleHandler>>) -> Self {
        Self {
            checksum: ChecksumHandler::default(),
            mapping: MappingHandler::default(),
            custom,
        }
    }

    pub fn mapping(&self) -> &MappingHandler {
        &self.mapping
    }

    pub fn mapping_mut(&mut self) -> &mut MappingHandler {
        &mut self.mapping
    }

    /// Names in invocation order.
    pub fn names(&self) -> Vec<&str> {
        let mut names = vec![self.checksum.name(), self.mapping.name()];
        names.extend(self.custom.iter().map(|h| h.name()));
        names
    }

    fn handlers_mut(&mut self) -> Vec<&mut (dyn LifecycleHandler + 'static)> {
        let mut all: Vec<&mut (dyn LifecycleHandler + 'static)> = Vec::new();
        all.push(&mut self.checksum);
        all.push(&mut self.mapping);
        for handler in &mut self.custom {
            all.push(handler.as_mut());
        }
        all
    }

    fn run(&mut self, phase: Phase, ctx: &HandlerContext<'_>) -> HandlerResult<()> {
        let mut first_error = None;
        for handler in self.handlers_mut() {
            debug!(handler = handler.name(), %phase, "running handler");
            let result = match phase {
                Phase::Create => handler.on_create(ctx),
                Phase::Open => handler.on_open(ctx),
                Phase::Close => handler.on_close(ctx),
            };
            if let Err(e) = result {
                // on close every handler still gets its chance to flush
                if phase != Phase::Close {
                    return Err(e);
                }
                warn!(handler = handler.name(), error = %e, "handler failed on close");
                if first_error.is_none() {
                    first_error = Some(e);
                }
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    pub fn on_create(&mut self, ctx: &HandlerContext<'_>) -> HandlerResult<()> {
        self.run(Phase::Create, ctx)
    }

    pub fn on_open(&mut self, ctx: &HandlerContext<'_>) -> HandlerResult<()> {
        self.run(Phase::Open, ctx)
    }

    /// Run every handler; the first failure is returned after all ran.
    pub fn on_close(&mut self, ctx: &HandlerContext<'_>) -> HandlerResult<()> {
        self.run(Phase::Close, ctx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStorage;
    use parking_lot::Mutex;
    use std::sync::Arc;

    #[derive(Debug)]
    struct Recorder {
        name: &'static str,
        log: Arc<Mutex<Vec<String>>>,
        fail_on_close: bool,
    }

    impl LifecycleHandler for Recorder {
        fn name(&self) -> &str {
            self.name
        }

        fn on_open(&mut self, _ctx: &HandlerContext<'_>) -> HandlerResult<()> {
            self.log.lock().push(format!("{}:open", self.name));
            Ok(())
        }

        fn on_close(&mut self, _ctx: &HandlerContext<'_>) -> HandlerResult<()> {
            self.log.lock().push(format!("{}:close", self.name));
            if self.fail_on_close {
                return Err(HandlerError::Failed {
                    handler: self.name.to_string(),
                    reason: "disk full".to_string(),
                });
            }
            Ok(())
        }
    }

    fn recorder(name: &'static str, log: &Arc<Mutex<Vec<String>>>, fail: bool) -> Box<dyn LifecycleHandler> {
        Box::new(Recorder {
            name,
            log: log.clone(),
            fail_on_close: fail,
        })
    }

    #[test]
    fn test_chain_order() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let chain = HandlerChain::new(vec![recorder("a", &log, false), recorder("b", &log, false)]);
        assert_eq!(chain.names(), vec!["checksum", "mapping", "a", "b"]);
    }

    #[test]
    fn test_close_runs_all_and_reports_first_failure() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut chain = HandlerChain::new(vec![recorder("a", &log, true), recorder("b", &log, false)]);
        let root = Directory::root(Arc::new(MemoryStorage::new()));
        let parameters = FormatParameters::new();
        let ctx = HandlerContext::new(&root, &parameters, true);

        chain.on_open(&ctx).unwrap();
        let err = chain.on_close(&ctx).unwrap_err();
        assert!(matches!(err, HandlerError::Failed { ref handler, .. } if handler == "a"));
        assert_eq!(*log.lock(), vec!["a:open", "b:open", "a:close", "b:close"]);
    }

    #[test]
    fn test_read_only_context() {
        let root = Directory::root(Arc::new(MemoryStorage::new()));
        let parameters = FormatParameters::new();
        let ctx = HandlerContext::new(&root, &parameters, false);
        assert!(ctx.writable_root().is_none());
        assert!(ctx.root().make_directory("x").unwrap_err().is_access_denied());
    }
}
