//! MMU Simulator Macros
//!
//! Levelled debug output for the simulator core. Every message goes through
//! the `log` facade under the `mmu_sim` target, so the embedding front end
//! decides where (and whether) it is shown. Nothing is printed when no
//! logger is installed.

#![deny(missing_docs)]

/// Emit a levelled diagnostic message.
///
/// The first token selects the level: `ERROR`, `WARN`, `INFO`, `DEBUG` or
/// `TRACE`. The rest is a regular format string with arguments.
///
/// ```
/// # use mmu_sim::debug_print;
/// debug_print!(DEBUG, "mapped page {} to frame {}", 1, 7);
/// ```
#[macro_export]
macro_rules! debug_print {
    (ERROR, $($arg:tt)*) => {
        $crate::__log::error!(target: "mmu_sim", $($arg)*)
    };
    (WARN, $($arg:tt)*) => {
        $crate::__log::warn!(target: "mmu_sim", $($arg)*)
    };
    (INFO, $($arg:tt)*) => {
        $crate::__log::info!(target: "mmu_sim", $($arg)*)
    };
    (DEBUG, $($arg:tt)*) => {
        $crate::__log::debug!(target: "mmu_sim", $($arg)*)
    };
    (TRACE, $($arg:tt)*) => {
        $crate::__log::trace!(target: "mmu_sim", $($arg)*)
    };
}
