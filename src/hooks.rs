//! Module hook facade and the process-wide instance.
//!
//! [`ModuleHooks`] ties the dispatcher and lifecycle controller together.
//! Kernel glue works with the global instance through [`init`], [`global`] and the
//! dispatch functions at the bottom of this module; tests build their own instances.

use alloc::sync::Arc;
use alloc::vec::Vec;
use spin::Once;

use crate::config::{self, HookConfig};
use crate::correlation::{self, InvocationId};
use crate::descriptor::CallArgs;
use crate::dispatch::{Dispatcher, EntryVerdict, ExitStatus, Payload};
use crate::lifecycle::{Controller, StartError, State, StopError};
use crate::platform;
use crate::probe::registry::ProbeBackend;
use crate::probe::{Location, ProbeInfo};

/// Selective load/unload hooks for one target module.
pub struct ModuleHooks {
    dispatcher: Dispatcher,
    controller: Controller,
}

impl ModuleHooks {
    pub fn new(
        config: &HookConfig,
        backend: Arc<dyn ProbeBackend>,
        payload: Arc<dyn Payload>,
    ) -> Result<Self, config::Error> {
        let rule = config.validate()?;
        Ok(Self {
            dispatcher: Dispatcher::new(
                rule,
                config.max_active,
                config.context_timeout_ns,
                payload,
            ),
            controller: Controller::new(backend),
        })
    }

    pub fn target(&self) -> &str {
        self.dispatcher.rule().target()
    }

    /// Register the load and unload probes.
    pub fn start(&self) -> Result<(), StartError> {
        self.controller.start(&self.dispatcher)
    }

    /// Remove the load and unload probes.
    pub fn stop(&self) -> Result<(), StopError> {
        self.controller.stop(&self.dispatcher)
    }

    pub fn state(&self) -> State {
        self.controller.state()
    }

    /// Whether the probe on `symbol` is currently registered.
    pub fn is_active(&self, symbol: &str) -> bool {
        Location::from_symbol(symbol)
            .is_some_and(|loc| self.dispatcher.probes().get(loc).is_active())
    }

    /// Whether monitoring was installed for `module` by a confirmed load and
    /// not yet removed by a confirmed unload.
    pub fn has_module_hooks(&self, module: &str) -> bool {
        self.dispatcher.is_monitored(module)
    }

    pub fn list_probes(&self) -> Vec<ProbeInfo> {
        self.dispatcher.probes().list()
    }

    pub fn in_flight(&self) -> usize {
        self.dispatcher.in_flight()
    }

    /// Entry trap of a watched call.
    pub fn dispatch_entry(
        &self,
        location: Location,
        id: InvocationId,
        args: &dyn CallArgs,
    ) -> EntryVerdict {
        self.dispatcher.entry(location, id, args)
    }

    /// Exit trap of an invocation whose entry returned [`EntryVerdict::Arm`].
    pub fn dispatch_exit(
        &self,
        location: Location,
        id: InvocationId,
        status: ExitStatus,
    ) -> Result<(), correlation::Error> {
        self.dispatcher.exit(location, id, status)
    }

    /// The runtime gave up on an armed invocation before its exit.
    pub fn abort(&self, location: Location, id: InvocationId) -> bool {
        self.dispatcher.abort(location, id)
    }

    /// Reap contexts that outlived the configured timeout as of `now_ns`.
    pub fn reap_expired(&self, now_ns: u64) -> usize {
        self.dispatcher.reap_expired(now_ns)
    }

    /// Reap against the platform clock.
    pub fn reap(&self) -> usize {
        self.reap_expired(platform::time_ns())
    }
}

// === Process-wide instance ===

/// Error returned by [`init`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InitError {
    AlreadyInitialized,
    Config(config::Error),
}

impl core::fmt::Display for InitError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::AlreadyInitialized => write!(f, "Module hooks already initialized"),
            Self::Config(e) => write!(f, "Invalid module hook configuration: {}", e),
        }
    }
}

impl core::error::Error for InitError {}

impl From<config::Error> for InitError {
    fn from(e: config::Error) -> Self {
        Self::Config(e)
    }
}

static HOOKS: Once<ModuleHooks> = Once::new();

/// Build the global instance. The target is fixed for the process lifetime.
pub fn init(
    config: &HookConfig,
    backend: Arc<dyn ProbeBackend>,
    payload: Arc<dyn Payload>,
) -> Result<&'static ModuleHooks, InitError> {
    if HOOKS.is_completed() {
        return Err(InitError::AlreadyInitialized);
    }
    let hooks = ModuleHooks::new(config, backend, payload)?;

    let mut fresh = false;
    let installed = HOOKS.call_once(|| {
        fresh = true;
        hooks
    });
    if !fresh {
        return Err(InitError::AlreadyInitialized);
    }

    log::info!("modhook: initialized for module {}", installed.target());
    Ok(installed)
}

/// The global instance, if [`init`] has run.
pub fn global() -> Option<&'static ModuleHooks> {
    HOOKS.get()
}

/// Kretprobe entry handler body.
pub fn dispatch_entry(location: Location, id: InvocationId, args: &dyn CallArgs) -> EntryVerdict {
    match global() {
        Some(hooks) => hooks.dispatch_entry(location, id, args),
        None => EntryVerdict::Skip,
    }
}

/// Kretprobe return handler body.
///
/// Before [`init`] no entry can have been armed, so any exit is inconsistent.
pub fn dispatch_exit(
    location: Location,
    id: InvocationId,
    status: ExitStatus,
) -> Result<(), correlation::Error> {
    match global() {
        Some(hooks) => hooks.dispatch_exit(location, id, status),
        None => Err(correlation::Error::InternalConsistency { location, id }),
    }
}
