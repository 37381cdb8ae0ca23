use clap::builder::styling::{AnsiColor, Effects, Style, Styles};

//--------------------------------------------------------------------------------------------------
// Constants
//--------------------------------------------------------------------------------------------------

#[cfg(not(test))]
/// Global flag indicating whether we're in an ANSI-capable interactive terminal
static IS_ANSI_TERMINAL: std::sync::LazyLock<bool> =
    std::sync::LazyLock::new(crate::utils::is_ansi_interactive_terminal);

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

/// Returns a `Styles` object with the default styles for the CLI.
pub fn styles() -> Styles {
    Styles::styled()
        .header(AnsiColor::Yellow.on_default() | Effects::BOLD)
        .usage(AnsiColor::Yellow.on_default() | Effects::BOLD)
        .literal(AnsiColor::Blue.on_default() | Effects::BOLD)
        .placeholder(AnsiColor::Green.on_default())
        .error(AnsiColor::Red.on_default() | Effects::BOLD)
        .valid(AnsiColor::Green.on_default() | Effects::BOLD)
        .invalid(AnsiColor::Red.on_default() | Effects::BOLD)
}

fn apply_style(text: &str, style: &Style) -> String {
    #[cfg(not(test))]
    if !*IS_ANSI_TERMINAL {
        return text.to_string();
    }

    #[cfg(test)]
    if std::env::var("TERM").unwrap_or_default() == "dumb" {
        return text.to_string();
    }

    format!("{}{}{}", style.render(), text, style.render_reset())
}

//--------------------------------------------------------------------------------------------------
// Traits
//--------------------------------------------------------------------------------------------------

/// Styles terminal output with the colors of [`styles`]. Plain text when stdout is not an
/// interactive terminal.
pub trait AnsiStyles {
    /// Column headers and field labels.
    fn header(&self) -> String;

    /// Names and values the operator typed or can type back.
    fn literal(&self) -> String;

    /// Statuses with nothing to report.
    fn placeholder(&self) -> String;

    /// Warnings and failed statuses.
    fn error(&self) -> String;

    /// Healthy statuses.
    fn valid(&self) -> String;
}

//--------------------------------------------------------------------------------------------------
// Trait Implementations
//--------------------------------------------------------------------------------------------------

impl<T: AsRef<str> + ?Sized> AnsiStyles for T {
    fn header(&self) -> String {
        apply_style(self.as_ref(), styles().get_header())
    }

    fn literal(&self) -> String {
        apply_style(self.as_ref(), styles().get_literal())
    }

    fn placeholder(&self) -> String {
        apply_style(self.as_ref(), styles().get_placeholder())
    }

    fn error(&self) -> String {
        apply_style(self.as_ref(), styles().get_error())
    }

    fn valid(&self) -> String {
        apply_style(self.as_ref(), styles().get_valid())
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------
