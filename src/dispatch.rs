//! Entry and exit dispatch for the watched locations.
//!
//! Entry runs for every call of an active location and decides, from the
//! module descriptor alone, whether this particular call is the target. Only
//! then is a correlation context armed, and only armed calls ever reach the
//! exit handlers, which run the payload and release the context.

use alloc::string::String;
use alloc::sync::Arc;
use hashbrown::HashSet;
use spin::Mutex;

use crate::config::MatchRule;
use crate::correlation::{self, CorrelationContext, CorrelationTable, InvocationId};
use crate::descriptor::CallArgs;
use crate::platform;
use crate::probe::{Location, ProbeDescriptor, ProbeTable};

/// Actions run once a target module's load or unload is confirmed.
///
/// Called at most once per matching invocation, outside of any lock held by
/// the dispatcher. Implementations handle their own failures.
pub trait Payload: Send + Sync {
    /// The target finished initializing successfully.
    fn on_confirmed_load(&self, component: &str);

    /// The target is being torn down.
    fn on_confirmed_unload(&self, component: &str);
}

/// Entry decision for one invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryVerdict {
    /// Deliver the exit of this invocation.
    Arm,
    /// Let the invocation run unobserved.
    Skip,
}

impl EntryVerdict {
    /// Value for a kretprobe `entry_handler`: zero keeps the return handler
    /// armed for this instance, non-zero drops it.
    pub fn as_entry_ret(&self) -> i32 {
        match self {
            EntryVerdict::Arm => 0,
            EntryVerdict::Skip => 1,
        }
    }
}

/// Return value of the watched call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExitStatus(i64);

impl ExitStatus {
    pub const SUCCESS: ExitStatus = ExitStatus(0);

    pub const fn new(raw: i64) -> Self {
        Self(raw)
    }

    pub const fn raw(&self) -> i64 {
        self.0
    }

    /// `do_init_module` returns 0 on success and a negative errno otherwise.
    pub const fn is_success(&self) -> bool {
        self.0 == 0
    }
}

/// Shared dispatch state: the match rule, the probe table, armed contexts
/// and the set of modules with installed monitoring.
pub struct Dispatcher {
    rule: MatchRule,
    probes: ProbeTable,
    contexts: CorrelationTable,
    payload: Arc<dyn Payload>,
    monitored: Mutex<HashSet<String>>,
}

impl Dispatcher {
    pub fn new(
        rule: MatchRule,
        max_active: usize,
        context_timeout_ns: u64,
        payload: Arc<dyn Payload>,
    ) -> Self {
        Self {
            rule,
            probes: ProbeTable::new(),
            contexts: CorrelationTable::new(max_active, context_timeout_ns),
            payload,
            monitored: Mutex::new(HashSet::new()),
        }
    }

    pub fn rule(&self) -> &MatchRule {
        &self.rule
    }

    pub fn probes(&self) -> &ProbeTable {
        &self.probes
    }

    /// Number of armed invocations that have not reached their exit yet.
    pub fn in_flight(&self) -> usize {
        self.contexts.len()
    }

    /// Run the entry handler of `location` for one invocation.
    pub fn entry(&self, location: Location, id: InvocationId, args: &dyn CallArgs) -> EntryVerdict {
        let probe = self.probes.get(location);
        if !probe.is_active() {
            log::trace!("modhook: {} entry {} while inactive", location.label(), id);
            return EntryVerdict::Skip;
        }
        probe.stats().record_hit();
        (probe.entry_handler())(self, probe, id, args)
    }

    /// Run the exit handler of `location` for an armed invocation.
    ///
    /// An exit without a live context means entry and exit went out of sync;
    /// nothing is run for it and the error is returned to the caller.
    pub fn exit(
        &self,
        location: Location,
        id: InvocationId,
        status: ExitStatus,
    ) -> Result<(), correlation::Error> {
        let probe = self.probes.get(location);
        let ctx = self.contexts.take(location, id).inspect_err(|e| {
            log::error!("modhook: {} exit out of sync: {}", probe.symbol(), e);
        })?;

        let Some(exit) = probe.exit_handler() else {
            log::error!("modhook: {} armed without an exit handler", probe.symbol());
            return Err(correlation::Error::InternalConsistency { location, id });
        };

        probe
            .stats()
            .record_completed(platform::time_ns().saturating_sub(ctx.armed_at_ns()));
        exit(self, probe, ctx, status);
        Ok(())
    }

    /// Release the context of an invocation that will never reach its exit.
    pub fn abort(&self, location: Location, id: InvocationId) -> bool {
        match self.contexts.abort(location, id) {
            Some(ctx) => {
                log::debug!(
                    "modhook: aborted {} invocation {} of {}",
                    location.label(),
                    id,
                    ctx.component()
                );
                self.probes.get(location).stats().record_reaped(1);
                true
            }
            None => false,
        }
    }

    /// Release every context older than the configured timeout.
    pub fn reap_expired(&self, now_ns: u64) -> usize {
        self.contexts.reap_expired(now_ns, |ctx| {
            log::warn!(
                "modhook: reaped {} invocation {} of {} armed at {} ns",
                ctx.location().label(),
                ctx.id(),
                ctx.component(),
                ctx.armed_at_ns()
            );
            self.probes.get(ctx.location()).stats().record_reaped(1);
        })
    }

    /// Drop every armed context, e.g. after the probes were removed.
    pub fn discard_all(&self) -> usize {
        let count = self.contexts.clear();
        if count > 0 {
            log::warn!("modhook: discarded {} in-flight context(s)", count);
        }
        count
    }

    /// Whether monitoring is currently installed for `component`.
    pub fn is_monitored(&self, component: &str) -> bool {
        self.monitored.lock().contains(component)
    }

    fn arm(&self, probe: &ProbeDescriptor, id: InvocationId, component: &str) -> EntryVerdict {
        let location = probe.location();
        let now = platform::time_ns();

        let mut result = self.contexts.arm(location, id, component, now);
        if let Err(correlation::Error::TableFull { .. }) = result
            && self.reap_expired(now) > 0
        {
            result = self.contexts.arm(location, id, component, now);
        }

        match result {
            Ok(stale) => {
                if let Some(stale) = stale {
                    log::warn!(
                        "modhook: {} invocation {} re-entered, dropping stale context from {} ns",
                        location.label(),
                        id,
                        stale.armed_at_ns()
                    );
                    probe.stats().record_reaped(1);
                }
                probe.stats().record_armed();
                EntryVerdict::Arm
            }
            Err(e) => {
                log::warn!(
                    "modhook: cannot arm {} of {}: {}",
                    location.label(),
                    component,
                    e
                );
                probe.stats().record_missed();
                EntryVerdict::Skip
            }
        }
    }
}

/// Entry handler shared by both locations: arm on exact name match.
pub fn match_entry(
    d: &Dispatcher,
    probe: &ProbeDescriptor,
    id: InvocationId,
    args: &dyn CallArgs,
) -> EntryVerdict {
    let name = match args.component_name() {
        Ok(name) => name,
        Err(e) => {
            log::debug!("modhook: {} entry {}: {}", probe.symbol(), id, e);
            return EntryVerdict::Skip;
        }
    };

    if !d.rule.matches(name) {
        log::debug!(
            "modhook: {} entry {}: module {} does not match {}",
            probe.symbol(),
            id,
            name,
            d.rule.target()
        );
        return EntryVerdict::Skip;
    }

    log::info!(
        "modhook: target module {} entering {} ({})",
        name,
        probe.symbol(),
        id
    );
    d.arm(probe, id, name)
}

/// Exit handler for module initialization.
pub fn load_exit(d: &Dispatcher, probe: &ProbeDescriptor, ctx: CorrelationContext, status: ExitStatus) {
    if !status.is_success() {
        log::warn!(
            "modhook: {} of {} failed: {}",
            probe.symbol(),
            ctx.component(),
            status.raw()
        );
        return;
    }

    log::info!("modhook: target module {} loaded", ctx.component());
    d.payload.on_confirmed_load(ctx.component());

    let mut monitored = d.monitored.lock();
    if monitored.try_reserve(1).is_err() {
        log::error!(
            "modhook: out of memory tracking {}, has_module_hooks will report false",
            ctx.component()
        );
        return;
    }
    monitored.insert(ctx.into_component());
}

/// Exit handler for module teardown. Runs the payload regardless of status.
pub fn unload_exit(
    d: &Dispatcher,
    _probe: &ProbeDescriptor,
    ctx: CorrelationContext,
    status: ExitStatus,
) {
    log::info!(
        "modhook: target module {} unloading (status {})",
        ctx.component(),
        status.raw()
    );
    d.payload.on_confirmed_unload(ctx.component());
    d.monitored.lock().remove(ctx.component());
}
