//! Exclusive-lease pool of interpreters.
//!
//! Interpreters are created lazily when no idle one is available, initialised
//! once against the script root, and handed out wrapped in a [`Lease`]. The
//! lease owns its interpreter, so two holders can never share one; dropping
//! the lease puts the interpreter back on the idle list.

use std::collections::BTreeMap;
use std::fmt;
use std::ops::{Deref, DerefMut};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::{debug, error};

use super::{Interpreter, InterpreterError, InterpreterId};

/// Builds a fresh, uninitialised interpreter.
pub type InterpreterFactory =
    Arc<dyn Fn() -> Result<Box<dyn Interpreter>, InterpreterError> + Send + Sync>;

/// Everything the pool needs to create interpreters, supplied up front.
#[derive(Clone)]
pub struct PoolConfig {
    pub script_root: PathBuf,
    pub factory: InterpreterFactory,
}

impl PoolConfig {
    pub fn new<F>(script_root: impl Into<PathBuf>, factory: F) -> Self
    where
        F: Fn() -> Result<Box<dyn Interpreter>, InterpreterError> + Send + Sync + 'static,
    {
        Self {
            script_root: script_root.into(),
            factory: Arc::new(factory),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum PoolError {
    #[error("Interpreter pool is closed")]
    Closed,

    #[error("Failed to create {id}: {source}")]
    Create {
        id: InterpreterId,
        #[source]
        source: InterpreterError,
    },
}

/// Teardown failures collected by [`InterpreterPool::free`], keyed by interpreter.
#[derive(Debug, Default)]
pub struct TeardownErrors(pub BTreeMap<InterpreterId, InterpreterError>);

impl TeardownErrors {
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn get(&self, id: InterpreterId) -> Option<&InterpreterError> {
        self.0.get(&id)
    }
}

impl fmt::Display for TeardownErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (id, err) in &self.0 {
            writeln!(f, "[{}]: {}", id, err)?;
        }
        Ok(())
    }
}

impl std::error::Error for TeardownErrors {}

struct Slot {
    id: InterpreterId,
    interpreter: Box<dyn Interpreter>,
}

#[derive(Default)]
struct PoolState {
    idle: Vec<Slot>,
    closed: bool,
}

pub struct InterpreterPool {
    config: PoolConfig,
    state: Mutex<PoolState>,
    next_id: AtomicU64,
    created: AtomicU64,
}

impl InterpreterPool {
    pub fn new(config: PoolConfig) -> Arc<Self> {
        Arc::new(Self {
            config,
            state: Mutex::new(PoolState::default()),
            next_id: AtomicU64::new(1),
            created: AtomicU64::new(0),
        })
    }

    /// Leases an idle interpreter, creating and initialising one if none is idle.
    pub fn get(self: &Arc<Self>) -> Result<Lease, PoolError> {
        {
            let mut state = self.lock();
            if state.closed {
                return Err(PoolError::Closed);
            }
            if let Some(slot) = state.idle.pop() {
                debug!("Leasing idle {}", slot.id);
                return Ok(Lease::new(Arc::clone(self), slot));
            }
        }

        // Factory and init run without the lock held.
        let slot = self.create()?;
        Ok(Lease::new(Arc::clone(self), slot))
    }

    /// Returns a leased interpreter to the idle set.
    pub fn put(&self, lease: Lease) {
        drop(lease);
    }

    /// Tears down every idle interpreter and closes the pool.
    ///
    /// Interpreters still leased are torn down when their lease is dropped;
    /// those failures are logged rather than reported here. Calling `free`
    /// again returns an empty set.
    pub fn free(&self) -> TeardownErrors {
        let idle = {
            let mut state = self.lock();
            state.closed = true;
            std::mem::take(&mut state.idle)
        };

        let mut failures = TeardownErrors::default();
        for mut slot in idle {
            if let Err(e) = slot.interpreter.close() {
                failures.0.insert(slot.id, e);
            }
        }
        failures
    }

    /// Number of interpreters waiting to be leased.
    pub fn idle_count(&self) -> usize {
        self.lock().idle.len()
    }

    /// Number of interpreters created and initialised so far; failed creations
    /// are not counted.
    pub fn created_count(&self) -> u64 {
        self.created.load(Ordering::SeqCst)
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    fn create(&self) -> Result<Slot, PoolError> {
        let id = InterpreterId(self.next_id.fetch_add(1, Ordering::SeqCst));
        let mut interpreter =
            (self.config.factory)().map_err(|source| PoolError::Create { id, source })?;

        if let Err(source) = interpreter.init(&self.config.script_root) {
            if let Err(e) = interpreter.close() {
                error!("Teardown of {} after failed init: {}", id, e);
            }
            return Err(PoolError::Create { id, source });
        }

        self.created.fetch_add(1, Ordering::SeqCst);
        debug!("Created {} from {:?}", id, self.config.script_root);
        Ok(Slot { id, interpreter })
    }

    fn release(&self, mut slot: Slot) {
        {
            let mut state = self.lock();
            if !state.closed {
                debug!("Returning {} to idle set", slot.id);
                state.idle.push(slot);
                return;
            }
        }

        debug!("Pool closed, tearing down returned {}", slot.id);
        if let Err(e) = slot.interpreter.close() {
            error!("Teardown of {} failed: {}", slot.id, e);
        }
    }

    fn lock(&self) -> MutexGuard<'_, PoolState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Exclusive ownership of one interpreter until dropped.
pub struct Lease {
    pool: Arc<InterpreterPool>,
    slot: Option<Slot>,
}

impl Lease {
    fn new(pool: Arc<InterpreterPool>, slot: Slot) -> Self {
        Self {
            pool,
            slot: Some(slot),
        }
    }

    pub fn id(&self) -> InterpreterId {
        self.slot().id
    }

    fn slot(&self) -> &Slot {
        // Only `Drop` takes the slot out.
        self.slot.as_ref().expect("lease holds its interpreter until dropped")
    }
}

impl Deref for Lease {
    type Target = dyn Interpreter;

    fn deref(&self) -> &Self::Target {
        self.slot().interpreter.as_ref()
    }
}

impl DerefMut for Lease {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.slot
            .as_mut()
            .expect("lease holds its interpreter until dropped")
            .interpreter
            .as_mut()
    }
}

impl Drop for Lease {
    fn drop(&mut self) {
        if let Some(slot) = self.slot.take() {
            self.pool.release(slot);
        }
    }
}
