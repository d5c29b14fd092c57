//! Engine-wide constants.
//!
//! These participate in the definition hash and in loop-termination
//! guidelines; changes here are observable by callers and should be treated
//! like any other wire-contract change.

/// Logical engine version. Folded into `MachineDefinition::definition_hash`
/// so a version bump is visible even when the compiled tree's shape is
/// unchanged.
pub const ENGINE_VERSION: &str = "HSM1.0";

/// Reserved event-type key for eventless ("@always") transitions.
pub const ALWAYS_EVENT: &str = "@always";

/// Maximum number of consecutive eventless transitions the fixpoint loop
/// will run before aborting with `CoreError::AlwaysLoopBound`. Chosen and
/// documented here rather than left unbounded.
pub const ALWAYS_LOOP_BOUND: usize = 64;

/// Default exclusive-lock acquisition timeout for the concurrency gate, in
/// seconds.
pub const DEFAULT_LOCK_TIMEOUT_SECS: u64 = 60;

/// Default zlib compression level used by the archive service when the
/// caller does not specify one.
pub const DEFAULT_ARCHIVE_LEVEL: u32 = 6;

/// Default byte threshold below which an archived blob is stored
/// uncompressed.
pub const DEFAULT_ARCHIVE_THRESHOLD: usize = 1000;

/// Default inactivity window, in days, after which an instance becomes
/// archival-eligible.
pub const DEFAULT_DAYS_INACTIVE: i64 = 30;

/// Default cooldown window, in hours, during which a just-restored instance
/// may not be re-archived.
pub const DEFAULT_RESTORE_COOLDOWN_HOURS: i64 = 24;
