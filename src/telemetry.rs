//! Structured reporting for protocol and state-machine irregularities.
//!
//! A duel session never fails because of what the remote side sends: malformed frames,
//! messages that arrive in the wrong state, and clicks on a locked grid are all dropped.
//! Each drop is turned into a [`Violation`] and handed to a [`ViolationObserver`].
//!
//! - [`TracingObserver`] logs through `tracing` and is used when nothing else is configured.
//! - [`CollectingObserver`] stores violations so tests can assert on them.
//!
//! # Example
//!
//! ```
//! use captcha_duel::telemetry::{CollectingObserver, ViolationKind};
//! use captcha_duel::SessionBuilder;
//! use std::sync::Arc;
//! use web_time::Instant;
//!
//! let observer = Arc::new(CollectingObserver::new());
//! let mut session = SessionBuilder::new()
//!     .with_violation_observer(observer.clone())
//!     .build()?;
//!
//! // A game result arriving before any match was joined is dropped and reported.
//! session.handle_frame(
//!     r#"{"type":"GAME_FINISHED","payload":{"winner_id":"p_2"}}"#,
//!     Instant::now(),
//! );
//! assert!(observer.has_violation(ViolationKind::StateMachine));
//! # Ok::<(), captcha_duel::DuelError>(())
//! ```

use parking_lot::Mutex;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// Severity of a violation, ordered from least to most severe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ViolationSeverity {
    /// Expected noise on a real network: stale or duplicated input that was ignored.
    Warning,
    /// Input that should never arrive from a well-behaved peer.
    Error,
    /// Internal bookkeeping is inconsistent.
    Critical,
}

impl ViolationSeverity {
    /// Returns a string representation suitable for logging labels.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Warning => "warning",
            Self::Error => "error",
            Self::Critical => "critical",
        }
    }
}

impl fmt::Display for ViolationSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Subsystem a violation was detected in.
///
/// # Forward Compatibility
///
/// This enum is marked `#[non_exhaustive]`. Always include a wildcard arm when matching.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
#[non_exhaustive]
pub enum ViolationKind {
    /// A frame could not be decoded or had an unknown type.
    Protocol,
    /// A message or intent arrived in a state that does not accept it.
    StateMachine,
    /// A puzzle was malformed or an index pointed outside the grid.
    Puzzle,
    /// A score update contradicted what the session already knew.
    Scoring,
    /// An obstruction named an unknown effect or victim.
    Obstruction,
    /// A configuration value had to be adjusted.
    Configuration,
    /// The message channel misbehaved.
    Channel,
}

impl ViolationKind {
    /// Returns a string representation suitable for logging labels.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Protocol => "protocol",
            Self::StateMachine => "state_machine",
            Self::Puzzle => "puzzle",
            Self::Scoring => "scoring",
            Self::Obstruction => "obstruction",
            Self::Configuration => "configuration",
            Self::Channel => "channel",
        }
    }
}

impl fmt::Display for ViolationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A recorded irregularity with enough context to diagnose it.
///
/// ```
/// use captcha_duel::telemetry::{Violation, ViolationKind, ViolationSeverity};
///
/// let violation = Violation::new(
///     ViolationSeverity::Warning,
///     ViolationKind::StateMachine,
///     "GAME_START ignored",
///     "duel_session.rs:10",
/// )
/// .with_context("state", "RESULT");
///
/// let json = violation.to_json().unwrap();
/// assert!(json.contains(r#""kind":"state_machine""#));
/// assert!(json.contains(r#""state":"RESULT""#));
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Violation {
    /// How bad it is.
    pub severity: ViolationSeverity,
    /// Where it was detected.
    pub kind: ViolationKind,
    /// Human-readable description.
    pub message: String,
    /// Source location (file:line).
    pub location: &'static str,
    /// Additional key-value context.
    pub context: BTreeMap<String, String>,
}

impl Violation {
    /// Creates a violation without context.
    #[must_use]
    pub fn new(
        severity: ViolationSeverity,
        kind: ViolationKind,
        message: impl Into<String>,
        location: &'static str,
    ) -> Self {
        Self {
            severity,
            kind,
            message: message.into(),
            location,
            context: BTreeMap::new(),
        }
    }

    /// Adds a context key-value pair.
    #[must_use]
    pub fn with_context(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.context.insert(key.into(), value.into());
        self
    }

    /// Serializes this violation to a JSON string. Returns `None` if serialization fails.
    #[must_use]
    pub fn to_json(&self) -> Option<String> {
        serde_json::to_string(self).ok()
    }
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}/{}] {} (at {}",
            self.severity, self.kind, self.message, self.location
        )?;
        if !self.context.is_empty() {
            write!(f, ", context={:?}", self.context)?;
        }
        f.write_str(")")
    }
}

/// Receives violations. Implementations should return quickly.
pub trait ViolationObserver: Send + Sync {
    /// Called once per detected violation.
    fn on_violation(&self, violation: &Violation);
}

/// Logs violations through `tracing`.
///
/// `Warning` maps to `warn!`, `Error` and `Critical` map to `error!`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingObserver;

impl TracingObserver {
    /// Creates a new tracing observer.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    fn format_context(context: &BTreeMap<String, String>) -> String {
        let pairs: Vec<String> = context.iter().map(|(k, v)| format!("{k}={v}")).collect();
        format!("{{{}}}", pairs.join(", "))
    }
}

impl ViolationObserver for TracingObserver {
    fn on_violation(&self, violation: &Violation) {
        let severity = violation.severity.as_str();
        let kind = violation.kind.as_str();
        let location = violation.location;
        let context = Self::format_context(&violation.context);

        match violation.severity {
            ViolationSeverity::Warning => {
                tracing::warn!(severity, kind, location, context = %context, "{}", violation.message);
            },
            ViolationSeverity::Error | ViolationSeverity::Critical => {
                tracing::error!(severity, kind, location, context = %context, "{}", violation.message);
            },
        }
    }
}

/// Stores every violation it sees. Meant for tests.
///
/// ```
/// use captcha_duel::telemetry::{
///     CollectingObserver, Violation, ViolationKind, ViolationObserver, ViolationSeverity,
/// };
///
/// let observer = CollectingObserver::new();
/// observer.on_violation(&Violation::new(
///     ViolationSeverity::Error,
///     ViolationKind::Protocol,
///     "bad frame",
///     "test.rs:1",
/// ));
/// assert_eq!(observer.len(), 1);
/// assert!(observer.has_violation(ViolationKind::Protocol));
/// ```
#[derive(Debug, Default)]
pub struct CollectingObserver {
    violations: Mutex<Vec<Violation>>,
}

impl CollectingObserver {
    /// Creates an empty collector.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a copy of everything collected so far.
    #[must_use]
    pub fn violations(&self) -> Vec<Violation> {
        self.violations.lock().clone()
    }

    /// Number of collected violations.
    #[must_use]
    pub fn len(&self) -> usize {
        self.violations.lock().len()
    }

    /// Returns `true` if nothing was collected.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.violations.lock().is_empty()
    }

    /// Returns `true` if at least one violation of `kind` was collected.
    #[must_use]
    pub fn has_violation(&self, kind: ViolationKind) -> bool {
        self.violations.lock().iter().any(|v| v.kind == kind)
    }

    /// Returns the collected violations of `kind`.
    #[must_use]
    pub fn violations_of_kind(&self, kind: ViolationKind) -> Vec<Violation> {
        self.violations
            .lock()
            .iter()
            .filter(|v| v.kind == kind)
            .cloned()
            .collect()
    }

    /// Drops everything collected so far.
    pub fn clear(&self) {
        self.violations.lock().clear();
    }
}

impl ViolationObserver for CollectingObserver {
    fn on_violation(&self, violation: &Violation) {
        self.violations.lock().push(violation.clone());
    }
}

/// Reports to `observer`, falling back to [`TracingObserver`] when there is none.
pub fn report_to_observer(observer: Option<&Arc<dyn ViolationObserver>>, violation: &Violation) {
    match observer {
        Some(obs) => obs.on_violation(violation),
        None => TracingObserver.on_violation(violation),
    }
}

/// Reports a violation straight to [`TracingObserver`], tagging it with the call site.
///
/// ```
/// use captcha_duel::report_violation;
/// use captcha_duel::telemetry::{ViolationKind, ViolationSeverity};
///
/// report_violation!(ViolationSeverity::Warning, ViolationKind::Channel,
///     "dropped {} frames", 3);
/// ```
#[macro_export]
macro_rules! report_violation {
    ($severity:expr, $kind:expr, $msg:literal) => {{
        use $crate::telemetry::ViolationObserver as _;
        let violation = $crate::telemetry::Violation::new(
            $severity,
            $kind,
            $msg,
            concat!(file!(), ":", line!()),
        );
        $crate::telemetry::TracingObserver.on_violation(&violation);
    }};

    ($severity:expr, $kind:expr, $fmt:literal, $($arg:tt)+) => {{
        use $crate::telemetry::ViolationObserver as _;
        let violation = $crate::telemetry::Violation::new(
            $severity,
            $kind,
            format!($fmt, $($arg)+),
            concat!(file!(), ":", line!()),
        );
        $crate::telemetry::TracingObserver.on_violation(&violation);
    }};
}

/// Reports a violation through an `Option<Arc<dyn ViolationObserver>>`.
#[macro_export]
macro_rules! report_violation_to {
    ($observer:expr, $severity:expr, $kind:expr, $msg:literal) => {{
        let violation = $crate::telemetry::Violation::new(
            $severity,
            $kind,
            $msg,
            concat!(file!(), ":", line!()),
        );
        $crate::telemetry::report_to_observer($observer.as_ref(), &violation);
    }};

    ($observer:expr, $severity:expr, $kind:expr, $fmt:literal, $($arg:tt)+) => {{
        let violation = $crate::telemetry::Violation::new(
            $severity,
            $kind,
            format!($fmt, $($arg)+),
            concat!(file!(), ":", line!()),
        );
        $crate::telemetry::report_to_observer($observer.as_ref(), &violation);
    }};
}

/// Asserts that an observer collected nothing.
#[macro_export]
macro_rules! assert_no_violations {
    ($observer:expr) => {{
        let violations = $observer.violations();
        assert!(
            violations.is_empty(),
            "Expected no violations, but found {}:\n{:#?}",
            violations.len(),
            violations
        );
    }};
}

/// A broken internal invariant, returned by [`InvariantChecker::check_invariants`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InvariantViolation {
    /// Type whose invariant failed.
    pub type_name: &'static str,
    /// What failed.
    pub invariant: String,
}

impl InvariantViolation {
    /// Creates a new invariant violation.
    #[must_use]
    pub fn new(type_name: &'static str, invariant: impl Into<String>) -> Self {
        Self {
            type_name,
            invariant: invariant.into(),
        }
    }
}

impl fmt::Display for InvariantViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invariant violated in {}: {}", self.type_name, self.invariant)
    }
}

impl std::error::Error for InvariantViolation {}

/// Types that can verify their own internal consistency.
pub trait InvariantChecker {
    /// Returns `Ok(())` if every invariant holds.
    ///
    /// # Errors
    ///
    /// Returns the first invariant found broken.
    fn check_invariants(&self) -> Result<(), InvariantViolation>;
}
