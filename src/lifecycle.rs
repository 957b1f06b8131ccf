//! Lifecycle controller: registers and tears down the whole probe set.
//!
//! State machine:
//!
//! ```text
//! Inactive --start ok--> Active --stop--> Inactive
//! Inactive --start err-> Inactive   (every registration of the call rolled back)
//! ```

use alloc::sync::Arc;
use alloc::vec::Vec;
use spin::Mutex;

use crate::dispatch::Dispatcher;
use crate::probe::registry::{self, PartialFailure, ProbeBackend, ProbeRegistry};

/// Activation state of the probe set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Inactive,
    Active,
}

/// `start` failed; nothing registered by that call remains armed.
#[derive(Debug)]
pub struct StartError {
    /// Location whose registration failed.
    pub symbol: &'static str,
    pub source: registry::Error,
}

impl StartError {
    pub fn is_already_registered(&self) -> bool {
        matches!(self.source, registry::Error::AlreadyRegistered(_))
    }
}

impl core::fmt::Display for StartError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "Failed to start module hooks at {}: {}", self.symbol, self.source)
    }
}

impl core::error::Error for StartError {
    fn source(&self) -> Option<&(dyn core::error::Error + 'static)> {
        Some(&self.source)
    }
}

/// `stop` could not tear down every location.
#[derive(Debug)]
pub struct StopError {
    pub source: PartialFailure,
}

impl StopError {
    /// Symbols whose teardown failed, in table order.
    pub fn failed(&self) -> &[&'static str] {
        &self.source.failed
    }
}

impl From<PartialFailure> for StopError {
    fn from(source: PartialFailure) -> Self {
        Self { source }
    }
}

impl core::fmt::Display for StopError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "Failed to stop module hooks: {}", self.source)
    }
}

impl core::error::Error for StopError {
    fn source(&self) -> Option<&(dyn core::error::Error + 'static)> {
        Some(&self.source)
    }
}

struct Inner {
    registry: ProbeRegistry,
    state: State,
}

/// Serializes `start` and `stop` behind one lock.
pub struct Controller {
    inner: Mutex<Inner>,
}

impl Controller {
    pub fn new(backend: Arc<dyn ProbeBackend>) -> Self {
        Self {
            inner: Mutex::new(Inner {
                registry: ProbeRegistry::new(backend),
                state: State::Inactive,
            }),
        }
    }

    pub fn state(&self) -> State {
        self.inner.lock().state
    }

    /// Register every location of the dispatcher's table.
    pub fn start(&self, dispatcher: &Dispatcher) -> Result<(), StartError> {
        let mut inner = self.inner.lock();
        let table = dispatcher.probes();
        let mut done = Vec::new();

        for probe in table.iter() {
            if let Err(source) = inner.registry.register(probe) {
                for prev in done.iter().rev() {
                    if let Err(e) = inner.registry.unregister(*prev) {
                        log::error!("modhook: rollback of {} failed: {}", prev.symbol(), e);
                    }
                }
                log::warn!(
                    "modhook: start failed at {}, rolled back {} probe(s)",
                    probe.symbol(),
                    done.len()
                );
                return Err(StartError {
                    symbol: probe.symbol(),
                    source,
                });
            }
            done.push(probe);
        }

        inner.state = State::Active;
        log::info!(
            "modhook: watching module {} ({} probes)",
            dispatcher.rule().target(),
            done.len()
        );
        Ok(())
    }

    /// Tear down every location, attempting all of them.
    ///
    /// Armed contexts are discarded since their exits can no longer fire.
    pub fn stop(&self, dispatcher: &Dispatcher) -> Result<(), StopError> {
        let mut inner = self.inner.lock();
        let result = inner.registry.unregister_all(dispatcher.probes());
        inner.state = State::Inactive;
        dispatcher.discard_all();

        match result {
            Ok(()) => {
                log::info!("modhook: stopped");
                Ok(())
            }
            Err(failure) => Err(failure.into()),
        }
    }
}
