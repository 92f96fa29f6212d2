/// Maximum iteration count a `repeat` loop may unroll to at graph-build time.
/// Loops whose compile-time count exceeds this are reported as
/// `invalid_loop_count` rather than silently truncated.
pub const MAX_REPEAT_COUNT: u64 = 10_000;

/// Safety cap on optimizer fixed-point iterations (dead-node removal +
/// rewriting + dedup). A real bug in a rewrite rule could otherwise loop
/// forever; hitting this is always a compiler bug, never a user error.
pub const MAX_OPTIMIZER_PASSES: usize = 10_000;

/// Sentinel output index used for the `remain_active` output of a graph, as
/// opposed to the dense `0..n` indices used for ordinary outputs.
pub const REMAIN_ACTIVE_OUTPUT_INDEX: u32 = u32::MAX;

/// The magic bytes and version word written at the start of a serialized
/// instrument (see `spec.md` §6).
pub const INSTRUMENT_MAGIC: &[u8; 8] = b"wavelang";
pub const INSTRUMENT_VERSION: u32 = 1;

/// Recognized entry-point module names.
pub const VOICE_ENTRY_POINT: &str = "voice_main";
pub const FX_ENTRY_POINT: &str = "fx_main";
