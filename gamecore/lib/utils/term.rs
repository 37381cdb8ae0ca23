use std::io::IsTerminal;

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

/// Returns true if stdout is a terminal that understands ANSI escape codes.
pub fn is_ansi_interactive_terminal() -> bool {
    let is_tty = std::io::stdout().is_terminal();
    let term = std::env::var("TERM").unwrap_or_default();
    if is_tty && term.is_empty() {
        tracing::debug!("detected TTY without TERM environment variable");
    }

    is_tty && term != "dumb" && std::env::var_os("NO_COLOR").is_none()
}
