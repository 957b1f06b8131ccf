//! Hook configuration and the target match rule.

use alloc::string::String;

use crate::descriptor::MODULE_NAME_LEN;

/// Default number of invocations that may be armed at once.
///
/// Same bound the kretprobe layer uses for `maxactive`.
pub const DEFAULT_MAX_ACTIVE: usize = 16;

/// Default lifetime of an armed context before it is considered abandoned.
pub const DEFAULT_CONTEXT_TIMEOUT_NS: u64 = 5_000_000_000;

/// Error types for configuration validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// Target component name is empty.
    EmptyTarget,
    /// Target name does not fit in a module name field.
    TargetTooLong(usize),
    /// Target name contains a NUL byte.
    InvalidTarget,
    /// `max_active` is zero.
    ZeroCapacity,
    /// `context_timeout_ns` is zero.
    ZeroTimeout,
}

impl core::fmt::Display for Error {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::EmptyTarget => write!(f, "Target module name is empty"),
            Self::TargetTooLong(len) => write!(
                f,
                "Target module name too long: {} bytes (max {})",
                len,
                MODULE_NAME_LEN - 1
            ),
            Self::InvalidTarget => write!(f, "Target module name contains NUL"),
            Self::ZeroCapacity => write!(f, "max_active must be at least 1"),
            Self::ZeroTimeout => write!(f, "context timeout must be non-zero"),
        }
    }
}

impl core::error::Error for Error {}

/// The component name every invocation is compared against.
///
/// Built once from a validated [`HookConfig`] and never mutated afterwards.
#[derive(Debug, Clone)]
pub struct MatchRule {
    target: String,
}

impl MatchRule {
    /// Configured target name.
    pub fn target(&self) -> &str {
        &self.target
    }

    /// Exact, case-sensitive comparison.
    #[inline]
    pub fn matches(&self, name: &str) -> bool {
        self.target == name
    }
}

/// Startup configuration.
#[derive(Debug, Clone)]
pub struct HookConfig {
    /// Name of the module whose load/unload should be acted on.
    pub target: String,
    /// Upper bound on simultaneously armed invocations.
    pub max_active: usize,
    /// Armed contexts older than this are reaped.
    pub context_timeout_ns: u64,
}

impl HookConfig {
    /// Configuration for `target` with default bounds.
    pub fn new(target: &str) -> Self {
        Self {
            target: String::from(target),
            max_active: DEFAULT_MAX_ACTIVE,
            context_timeout_ns: DEFAULT_CONTEXT_TIMEOUT_NS,
        }
    }

    /// Bound the number of simultaneously armed invocations.
    pub fn with_max_active(mut self, max_active: usize) -> Self {
        self.max_active = max_active;
        self
    }

    /// Age after which an armed context is reaped.
    pub fn with_context_timeout_ns(mut self, timeout_ns: u64) -> Self {
        self.context_timeout_ns = timeout_ns;
        self
    }

    /// Check the configuration and build the match rule from it.
    pub fn validate(&self) -> Result<MatchRule, Error> {
        if self.target.is_empty() {
            return Err(Error::EmptyTarget);
        }
        if self.target.len() >= MODULE_NAME_LEN {
            return Err(Error::TargetTooLong(self.target.len()));
        }
        if self.target.as_bytes().contains(&0) {
            return Err(Error::InvalidTarget);
        }
        if self.max_active == 0 {
            return Err(Error::ZeroCapacity);
        }
        if self.context_timeout_ns == 0 {
            return Err(Error::ZeroTimeout);
        }
        Ok(MatchRule {
            target: self.target.clone(),
        })
    }
}
