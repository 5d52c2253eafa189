use std::{
    collections::HashMap,
    sync::{Arc, PoisonError, RwLock},
};

use tracing::{instrument, trace};
use zpm_model::Command;

use crate::{
    CoreError, PidTable, Process, ProcessFactory,
    process::{Builtin, BuiltinWithCtx, InternalProcess},
};

/// Registry of process factories keyed by command name.
#[derive(Default)]
pub struct ProcessRouter {
    factories: RwLock<HashMap<String, ProcessFactory>>,
}

impl ProcessRouter {
    #[inline]
    pub fn new() -> Self {
        Self {
            factories: RwLock::new(HashMap::new()),
        }
    }

    /// Registers `factory` under `name`.
    ///
    /// # Panics
    /// If `name` is already registered; registering twice is a wiring bug.
    pub fn register(&self, name: impl Into<String>, factory: ProcessFactory) {
        let name = name.into();
        if let Err(e) = self.try_register(name, factory) {
            panic!("{e}");
        }
    }

    /// Registers `factory` under `name`, failing on a duplicate name.
    pub fn try_register(&self, name: impl Into<String>, factory: ProcessFactory) -> Result<(), CoreError> {
        let name = name.into();
        let mut map = self.factories.write().unwrap_or_else(PoisonError::into_inner);
        if map.contains_key(&name) {
            return Err(CoreError::DuplicateFactory(name));
        }
        trace!(target: "zpm.core.router", %name, "factory registered");
        map.insert(name, factory);
        Ok(())
    }

    /// Registers a synchronous in-runtime function.
    pub fn register_builtin(&self, name: impl Into<String>, builtin: Builtin) {
        let factory: ProcessFactory = Arc::new(move |_table: Arc<dyn PidTable>, cmd: Command| {
            Arc::new(InternalProcess::new(cmd, Arc::clone(&builtin))) as Arc<dyn Process>
        });
        self.register(name, factory);
    }

    /// Registers an asynchronous in-runtime function that observes cancellation.
    pub fn register_builtin_with_ctx(&self, name: impl Into<String>, builtin: BuiltinWithCtx) {
        let factory: ProcessFactory = Arc::new(move |_table: Arc<dyn PidTable>, cmd: Command| {
            Arc::new(InternalProcess::with_ctx(cmd, Arc::clone(&builtin))) as Arc<dyn Process>
        });
        self.register(name, factory);
    }

    #[instrument(level = "trace", skip(self))]
    pub fn get(&self, name: &str) -> Option<ProcessFactory> {
        let map = self.factories.read().unwrap_or_else(PoisonError::into_inner);
        map.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        let map = self.factories.read().unwrap_or_else(PoisonError::into_inner);
        map.contains_key(name)
    }
}
