//! Kernel module load/unload hooks.
//!
//! Watches `do_init_module` and `free_module` with return probes and acts only
//! on the configured target module: once its initialization returns success
//! the install payload runs, and when it is torn down the uninstall payload
//! runs. Every other module passes through unobserved.
//!
//! The decision taken at function entry is carried to the matching return
//! through a per-invocation correlation context keyed by the runtime's
//! invocation identity, so concurrent loads and unloads never see each
//! other's state.
//!
//! # Quick Start
//!
//! ```ignore
//! use modhook::{HookConfig, Location, InvocationId, ExitStatus};
//!
//! let hooks = modhook::init(&HookConfig::new("foo"), backend, payload)?;
//! hooks.start()?;
//!
//! // From the kretprobe entry handler:
//! let verdict = modhook::dispatch_entry(Location::Load, InvocationId::new(ri), &args);
//! // From the kretprobe return handler, for armed instances only:
//! modhook::dispatch_exit(Location::Load, InvocationId::new(ri), ExitStatus::new(ret))?;
//! ```

#![no_std]

extern crate alloc;

// =============================================================================
// Platform Abstraction (for testing support)
// =============================================================================

pub mod platform;

// =============================================================================
// Configuration & Arguments
// =============================================================================

pub mod config;
pub mod descriptor;

// =============================================================================
// Probes & Dispatch
// =============================================================================

pub mod correlation;
pub mod dispatch;
pub mod hooks;
pub mod lifecycle;
pub mod probe;

// Re-export key types for convenience
pub use config::{HookConfig, MatchRule};
pub use correlation::{CorrelationContext, InvocationId};
pub use descriptor::{ArgumentUnreadable, CallArgs, ModuleArgs};
pub use dispatch::{EntryVerdict, ExitStatus, Payload};
pub use hooks::{InitError, ModuleHooks, dispatch_entry, dispatch_exit, global, init};
pub use lifecycle::{StartError, State, StopError};
pub use probe::registry::{PartialFailure, ProbeBackend};
pub use probe::{Location, ProbeDescriptor, ProbeInfo};
