//! Probe registration against the kernel's probing backend.
//!
//! The registry is the only writer of the descriptors' active flags. It is
//! always reached through the lifecycle controller's lock, so registration
//! and teardown never interleave.

use alloc::collections::BTreeMap;
use alloc::sync::Arc;
use alloc::vec::Vec;
use axerrno::{AxError, AxResult};

use super::{ProbeDescriptor, ProbeTable};
use crate::platform;

/// Installs and removes the return probe behind a descriptor.
///
/// The embedding kernel implements this on top of its kretprobe layer and
/// routes entry and return traps to [`crate::ModuleHooks::dispatch_entry`]
/// and [`crate::ModuleHooks::dispatch_exit`].
pub trait ProbeBackend: Send + Sync {
    fn arm(&self, probe: &ProbeDescriptor) -> AxResult<()>;

    fn disarm(&self, probe: &ProbeDescriptor) -> AxResult<()>;
}

/// Error types for registry operations.
#[derive(Debug)]
pub enum Error {
    /// The location is already registered.
    AlreadyRegistered(&'static str),
    /// The location was never registered.
    NotRegistered(&'static str),
    /// The backend refused to arm or disarm the probe.
    Backend { symbol: &'static str, err: AxError },
}

impl Error {
    pub fn symbol(&self) -> &'static str {
        match self {
            Self::AlreadyRegistered(s) | Self::NotRegistered(s) => *s,
            Self::Backend { symbol, .. } => *symbol,
        }
    }
}

impl core::fmt::Display for Error {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::AlreadyRegistered(s) => write!(f, "Probe already registered: {}", s),
            Self::NotRegistered(s) => write!(f, "Probe not registered: {}", s),
            Self::Backend { symbol, err } => {
                write!(f, "Probe backend failed for {}: {:?}", symbol, err)
            }
        }
    }
}

impl core::error::Error for Error {}

/// Some locations could not be torn down.
#[derive(Debug, Default)]
pub struct PartialFailure {
    /// Symbols whose unregistration failed.
    pub failed: Vec<&'static str>,
    /// The individual failures, in the order they occurred.
    pub errors: Vec<Error>,
}

impl core::fmt::Display for PartialFailure {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "Failed to unregister {} probe(s): ", self.failed.len())?;
        for (i, symbol) in self.failed.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}", symbol)?;
        }
        Ok(())
    }
}

impl core::error::Error for PartialFailure {}

struct Registration {
    registered_at_ns: u64,
}

/// Registration bookkeeping for the probe table.
pub struct ProbeRegistry {
    backend: Arc<dyn ProbeBackend>,
    registered: BTreeMap<&'static str, Registration>,
}

impl ProbeRegistry {
    pub fn new(backend: Arc<dyn ProbeBackend>) -> Self {
        Self {
            backend,
            registered: BTreeMap::new(),
        }
    }

    /// Arm one location.
    pub fn register(&mut self, probe: &ProbeDescriptor) -> Result<(), Error> {
        let symbol = probe.symbol();
        if self.registered.contains_key(symbol) {
            log::warn!("modhook: {} already registered", symbol);
            return Err(Error::AlreadyRegistered(symbol));
        }

        if let Err(err) = self.backend.arm(probe) {
            log::warn!("modhook: failed to arm {}: {:?}", symbol, err);
            return Err(Error::Backend { symbol, err });
        }

        self.registered.insert(
            symbol,
            Registration {
                registered_at_ns: platform::time_ns(),
            },
        );
        probe.set_active(true);
        log::info!(
            "modhook: registered {} ({})",
            symbol,
            probe.location().label()
        );
        Ok(())
    }

    /// Disarm one location.
    ///
    /// The registration is dropped even when the backend fails: the probe is
    /// either gone already or beyond our reach, and retrying is the caller's
    /// decision.
    pub fn unregister(&mut self, probe: &ProbeDescriptor) -> Result<(), Error> {
        let symbol = probe.symbol();
        let Some(reg) = self.registered.remove(symbol) else {
            return Err(Error::NotRegistered(symbol));
        };
        probe.set_active(false);

        if let Err(err) = self.backend.disarm(probe) {
            log::warn!("modhook: failed to disarm {}: {:?}", symbol, err);
            return Err(Error::Backend { symbol, err });
        }

        log::info!(
            "modhook: unregistered {} (armed for {} ns)",
            symbol,
            platform::time_ns().saturating_sub(reg.registered_at_ns)
        );
        Ok(())
    }

    /// Disarm every location in `table`, attempting all of them.
    pub fn unregister_all(&mut self, table: &ProbeTable) -> Result<(), PartialFailure> {
        let mut failure = PartialFailure::default();
        for probe in table.iter() {
            if let Err(e) = self.unregister(probe) {
                failure.failed.push(probe.symbol());
                failure.errors.push(e);
            }
        }

        if failure.failed.is_empty() {
            Ok(())
        } else {
            log::warn!("modhook: {}", failure);
            Err(failure)
        }
    }
}
