//! Per-invocation correlation state.
//!
//! A kretprobe fires its entry and return handlers on the same probe object
//! for every concurrent call of the watched function. Whether a particular
//! call should be acted on at return is therefore recorded here, keyed by the
//! identity of the call itself, and never on the shared probe descriptor.
//!
//! Invariants:
//! - at most one context per `(location, invocation)` key;
//! - a context is removed exactly once: by exit, abort, reaping or `clear`;
//! - the table never holds more than `capacity` contexts.

use alloc::string::String;
use hashbrown::HashMap;
use spin::Mutex;

use crate::probe::Location;

/// Opaque identity of one in-flight call, supplied by the runtime.
///
/// For kretprobes this is the address of the `kretprobe_instance` that
/// carries the call from entry to return.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct InvocationId(usize);

impl InvocationId {
    #[inline(always)]
    pub const fn new(raw: usize) -> Self {
        Self(raw)
    }

    #[inline(always)]
    pub const fn raw(&self) -> usize {
        self.0
    }
}

impl core::fmt::Display for InvocationId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

/// Error types for correlation operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// Exit fired for an invocation with no live context (never armed,
    /// already exited, or reaped).
    InternalConsistency {
        location: Location,
        id: InvocationId,
    },
    /// `capacity` invocations are already armed.
    TableFull { capacity: usize },
    /// Capturing the context failed to allocate.
    OutOfMemory,
}

impl core::fmt::Display for Error {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::InternalConsistency { location, id } => write!(
                f,
                "No correlation context for {} invocation {}",
                location.label(),
                id
            ),
            Self::TableFull { capacity } => {
                write!(f, "Correlation table full ({} armed)", capacity)
            }
            Self::OutOfMemory => write!(f, "Out of memory capturing correlation context"),
        }
    }
}

impl core::error::Error for Error {}

/// State carried from the entry of one matching call to its exit.
#[derive(Debug)]
pub struct CorrelationContext {
    location: Location,
    id: InvocationId,
    matched: bool,
    component: String,
    armed_at_ns: u64,
}

impl CorrelationContext {
    pub fn location(&self) -> Location {
        self.location
    }

    pub fn id(&self) -> InvocationId {
        self.id
    }

    /// Always true for contexts handed out by the table; only matching
    /// entries are armed.
    pub fn matched(&self) -> bool {
        self.matched
    }

    /// Component name captured at entry.
    pub fn component(&self) -> &str {
        &self.component
    }

    pub fn armed_at_ns(&self) -> u64 {
        self.armed_at_ns
    }

    /// Release the context, keeping only the captured name.
    pub fn into_component(self) -> String {
        self.component
    }

    fn expired(&self, now_ns: u64, timeout_ns: u64) -> bool {
        now_ns.saturating_sub(self.armed_at_ns) >= timeout_ns
    }
}

type Key = (Location, InvocationId);

/// Bounded map from invocation identity to its armed context.
pub struct CorrelationTable {
    slots: Mutex<HashMap<Key, CorrelationContext>>,
    capacity: usize,
    timeout_ns: u64,
}

impl CorrelationTable {
    /// Create an empty table holding at most `capacity` contexts, each
    /// considered abandoned `timeout_ns` after it was armed.
    pub fn new(capacity: usize, timeout_ns: u64) -> Self {
        Self {
            slots: Mutex::new(HashMap::new()),
            capacity,
            timeout_ns,
        }
    }

    /// Arm a matched invocation.
    ///
    /// Returns the context previously stored under the same key, if any. That
    /// only happens when the runtime recycled an identity whose call never
    /// reached its exit; the old context is stale and is replaced.
    pub fn arm(
        &self,
        location: Location,
        id: InvocationId,
        component: &str,
        now_ns: u64,
    ) -> Result<Option<CorrelationContext>, Error> {
        let mut name = String::new();
        name.try_reserve_exact(component.len())
            .map_err(|_| Error::OutOfMemory)?;
        name.push_str(component);

        let ctx = CorrelationContext {
            location,
            id,
            matched: true,
            component: name,
            armed_at_ns: now_ns,
        };

        let mut slots = self.slots.lock();
        if let Some(stale) = slots.remove(&(location, id)) {
            slots.insert((location, id), ctx);
            return Ok(Some(stale));
        }
        if slots.len() >= self.capacity {
            return Err(Error::TableFull {
                capacity: self.capacity,
            });
        }
        slots.try_reserve(1).map_err(|_| Error::OutOfMemory)?;
        slots.insert((location, id), ctx);
        Ok(None)
    }

    /// Remove and return the context of an invocation reaching its exit.
    pub fn take(&self, location: Location, id: InvocationId) -> Result<CorrelationContext, Error> {
        self.slots
            .lock()
            .remove(&(location, id))
            .ok_or(Error::InternalConsistency { location, id })
    }

    /// Release the context of an invocation that will never reach its exit.
    pub fn abort(&self, location: Location, id: InvocationId) -> Option<CorrelationContext> {
        self.slots.lock().remove(&(location, id))
    }

    /// Remove every context armed at least `timeout_ns` before `now_ns`,
    /// handing each one to `on_reaped`. Returns how many were removed.
    ///
    /// `on_reaped` runs with the table locked and must not call back into it.
    pub fn reap_expired(&self, now_ns: u64, mut on_reaped: impl FnMut(CorrelationContext)) -> usize {
        let timeout_ns = self.timeout_ns;
        let mut slots = self.slots.lock();
        let mut count = 0;
        for (_, ctx) in slots.extract_if(|_, ctx| ctx.expired(now_ns, timeout_ns)) {
            on_reaped(ctx);
            count += 1;
        }
        count
    }

    /// Drop every context, returning how many were discarded.
    pub fn clear(&self) -> usize {
        let mut slots = self.slots.lock();
        let count = slots.len();
        slots.clear();
        count
    }

    /// Number of armed contexts.
    pub fn len(&self) -> usize {
        self.slots.lock().len()
    }
}
