/// Macro for prefixed status logging to stderr (only when stderr is a terminal).
///
/// Usage:
/// ```ignore
/// log_status!("stage", "Running {} ({})", stage.name, command);
/// log_status!("pipeline", "Completed {} stages", count);
/// ```
///
/// Never pass environment values to this macro.
#[macro_export]
macro_rules! log_status {
    ($prefix:expr, $($arg:tt)*) => {
        if ::std::io::IsTerminal::is_terminal(&::std::io::stderr()) {
            eprintln!(concat!("[", $prefix, "] {}"), format_args!($($arg)*));
        }
    };
}

pub mod core;
pub mod utils;

// Re-export everything from core for ergonomic library use
// Users can write `packline::stage` instead of `packline::core::stage`
pub use self::core::*;
pub use self::utils::*;
