//! Watched locations and their probe descriptors.
//!
//! The set of locations is fixed: module initialization (`do_init_module`)
//! and module teardown (`free_module`). Each gets one [`ProbeDescriptor`]
//! built once into a [`ProbeTable`].

extern crate alloc;

pub mod registry;
pub mod stats;

use alloc::vec::Vec;
use core::sync::atomic::{AtomicBool, Ordering};

use crate::correlation::{CorrelationContext, InvocationId};
use crate::descriptor::CallArgs;
use crate::dispatch::{self, Dispatcher, EntryVerdict, ExitStatus};

use self::stats::{ProbeStats, StatsSnapshot};

/// Watched location.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Location {
    /// Module initialization; exit observes the init result.
    Load = 0,
    /// Module teardown. The exit fires when `free_module` returns, after the
    /// module is gone, so it works from the name captured at entry.
    Unload = 1,
}

impl Location {
    pub const ALL: [Location; 2] = [Location::Load, Location::Unload];

    /// Kernel symbol probed for this location.
    pub fn symbol(&self) -> &'static str {
        match self {
            Location::Load => "do_init_module",
            Location::Unload => "free_module",
        }
    }

    /// Short label for display.
    pub fn label(&self) -> &'static str {
        match self {
            Location::Load => "load",
            Location::Unload => "unload",
        }
    }

    /// Location probed on `symbol`, if any.
    pub fn from_symbol(symbol: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|loc| loc.symbol() == symbol)
    }
}

/// Handler run at function entry. Returns whether the exit must be delivered
/// for this invocation.
pub type EntryHandler =
    fn(&Dispatcher, &ProbeDescriptor, InvocationId, &dyn CallArgs) -> EntryVerdict;

/// Handler run at the exit of an armed invocation, consuming its context.
pub type ExitHandler = fn(&Dispatcher, &ProbeDescriptor, CorrelationContext, ExitStatus);

/// One interceptable location.
pub struct ProbeDescriptor {
    location: Location,
    symbol: &'static str,
    entry: EntryHandler,
    exit: Option<ExitHandler>,
    /// Written only by the registry under the lifecycle lock.
    active: AtomicBool,
    stats: ProbeStats,
}

impl ProbeDescriptor {
    pub fn new(location: Location, entry: EntryHandler, exit: Option<ExitHandler>) -> Self {
        Self {
            location,
            symbol: location.symbol(),
            entry,
            exit,
            active: AtomicBool::new(false),
            stats: ProbeStats::new(),
        }
    }

    /// Location this descriptor watches.
    pub fn location(&self) -> Location {
        self.location
    }

    /// Kernel symbol the probe is attached to.
    pub fn symbol(&self) -> &'static str {
        self.symbol
    }

    /// Handler run at every entry while the probe is active.
    pub fn entry_handler(&self) -> EntryHandler {
        self.entry
    }

    /// Handler run at the exit of an armed invocation.
    pub fn exit_handler(&self) -> Option<ExitHandler> {
        self.exit
    }

    /// Whether this location is a return probe.
    pub fn is_ret(&self) -> bool {
        self.exit.is_some()
    }

    /// Whether the probe is currently registered with the backend.
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    pub(crate) fn set_active(&self, active: bool) {
        self.active.store(active, Ordering::Release);
    }

    /// Live counters for this location.
    pub fn stats(&self) -> &ProbeStats {
        &self.stats
    }

    /// Point-in-time view for listings.
    pub fn info(&self) -> ProbeInfo {
        ProbeInfo {
            symbol: self.symbol,
            location: self.location,
            active: self.is_active(),
            is_ret: self.is_ret(),
            stats: self.stats.snapshot(),
        }
    }
}

impl core::fmt::Debug for ProbeDescriptor {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("ProbeDescriptor")
            .field("location", &self.location)
            .field("symbol", &self.symbol)
            .field("is_ret", &self.is_ret())
            .field("active", &self.is_active())
            .finish()
    }
}

/// Display view of one probe.
#[derive(Debug, Clone)]
pub struct ProbeInfo {
    pub symbol: &'static str,
    pub location: Location,
    pub active: bool,
    pub is_ret: bool,
    pub stats: StatsSnapshot,
}

/// The fixed set of descriptors, indexed by [`Location`].
#[derive(Debug)]
pub struct ProbeTable {
    probes: [ProbeDescriptor; 2],
}

impl ProbeTable {
    /// Table wired to the module load/unload handlers.
    pub fn new() -> Self {
        Self {
            probes: [
                ProbeDescriptor::new(
                    Location::Load,
                    dispatch::match_entry,
                    Some(dispatch::load_exit),
                ),
                ProbeDescriptor::new(
                    Location::Unload,
                    dispatch::match_entry,
                    Some(dispatch::unload_exit),
                ),
            ],
        }
    }

    pub fn get(&self, location: Location) -> &ProbeDescriptor {
        &self.probes[location as usize]
    }

    pub fn iter(&self) -> impl Iterator<Item = &ProbeDescriptor> {
        self.probes.iter()
    }

    pub fn list(&self) -> Vec<ProbeInfo> {
        self.probes.iter().map(ProbeDescriptor::info).collect()
    }
}

impl Default for ProbeTable {
    fn default() -> Self {
        Self::new()
    }
}
