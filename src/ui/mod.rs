//! Terminal output for the CLI
//!
//! Uses `cliclack` for steps and prompts, falling back to plain lines when
//! not attached to a terminal. Generated program output always goes to
//! stdout unadorned; everything decorative is driven by [`UiContext`].

mod context;
mod output;
mod progress;
mod prompts;
mod theme;

pub use context::UiContext;
pub use output::{key_value, key_value_status, remark, section, step_ok_detail, step_warn_hint};
pub use progress::{TaskSpinner, WaitSpinner};
pub use prompts::confirm;
pub use theme::{init_theme, KilnTheme};
