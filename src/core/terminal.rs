use console::Term;

pub const DEFAULT_WIDTH: u16 = 80;
pub const DEFAULT_HEIGHT: u16 = 25;

/// Returns `(width, height)` of the attached terminal.
///
/// Tries stdout, then stderr, then the `COLUMNS`/`LINES` environment
/// variables, then falls back to 80x25. Never fails.
pub fn terminal_size() -> (u16, u16) {
    [Term::stdout(), Term::stderr()]
        .iter()
        .filter_map(|term| term.size_checked())
        .find(|(rows, cols)| *rows > 0 && *cols > 0)
        .map(|(rows, cols)| (cols, rows))
        .unwrap_or_else(|| size_from_env(|key| std::env::var(key).ok()))
}

fn size_from_env<F>(lookup: F) -> (u16, u16)
where
    F: Fn(&str) -> Option<String>,
{
    let read = |key: &str, default: u16| {
        lookup(key)
            .and_then(|value| value.trim().parse::<u16>().ok())
            .filter(|value| *value > 0)
            .unwrap_or(default)
    };

    (read("COLUMNS", DEFAULT_WIDTH), read("LINES", DEFAULT_HEIGHT))
}
