//! cliclack theme

use cliclack::ThemeState;
use console::Style;

/// Warm yellow accents, red on error
#[derive(Debug, Clone, Default)]
pub struct KilnTheme;

impl cliclack::Theme for KilnTheme {
    fn bar_color(&self, state: &ThemeState) -> Style {
        match state {
            ThemeState::Active => Style::new().yellow(),
            ThemeState::Error(_) => Style::new().red(),
            ThemeState::Cancel => Style::new().dim(),
            ThemeState::Submit => Style::new().yellow().dim(),
        }
    }

    fn state_symbol_color(&self, state: &ThemeState) -> Style {
        match state {
            ThemeState::Active => Style::new().yellow(),
            ThemeState::Error(_) => Style::new().red(),
            ThemeState::Cancel => Style::new().dim(),
            ThemeState::Submit => Style::new().green(),
        }
    }
}

/// Install the theme for all cliclack output
pub fn init_theme() {
    cliclack::set_theme(KilnTheme);
}
