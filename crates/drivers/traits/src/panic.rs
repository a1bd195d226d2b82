//! Fatal-invariant-violation hook.
//!
//! Cache exhaustion, a sleep-lock released twice, an end-of-chain reached
//! where the caller promised it couldn't be — these indicate a bug in the
//! kernel, not a recoverable condition, so the right response is a panic. Host
//! tests want to assert on the code path that *would* have paniced without
//! aborting the test process, so the actual panic is indirected through a
//! `PanicHook` instead of calling `core::panic!` directly.

pub trait PanicHook: Sync {
    fn panic(&self, msg: &str) -> !;
}

/// Calls `core::panic!`. The default when no embedder-supplied hook is wired
/// up, and the only sensible behavior under `std` host tests that aren't
/// specifically exercising the fatal path.
pub struct CorePanicHook;

impl PanicHook for CorePanicHook {
    fn panic(&self, msg: &str) -> ! {
        panic!("{msg}");
    }
}

/// Expands to a `PanicHook::panic` call with a static message. Kept
/// allocation-free (no `format!`) so the cache crates that use it don't need
/// to depend on `alloc`.
///
/// ```ignore
/// fatal!(hook, "bget: no buffers");
/// ```
#[macro_export]
macro_rules! fatal {
    ($hook:expr, $msg:expr) => {
        $crate::PanicHook::panic($hook, $msg)
    };
}
