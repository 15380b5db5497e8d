//! Single-line terminal progress bar.
//!
//! Rendering is a pure function of the label, counts and terminal width
//! ([`render_bar`]); [`ProgressReporter`] only decides *when* to paint and
//! owns the output handle.

use crate::core::terminal;
use std::io::{self, Write};
use std::time::{Duration, Instant};
use tracing::debug;

/// Minimum time between two non-forced repaints.
pub const RENDER_INTERVAL: Duration = Duration::from_secs(1);

const FILL: &str = "█";
const EMPTY: &str = "-";
const DECIMALS: usize = 1;
// Keeps the cursor off the last column so the line never wraps.
const MARGIN: usize = 1;

fn format_line(label: &str, bar: &str, percent: &str) -> String {
    format!("{label} |{bar}| {percent}%")
}

/// Width available to the bar itself once label, brackets and percentage
/// are accounted for. Clamped to zero on very narrow terminals.
pub fn bar_width(label: &str, percent: &str, width: usize) -> usize {
    let overhead = format_line(label, "", percent).chars().count() + MARGIN;
    width.saturating_sub(overhead)
}

/// Renders one progress line, or `None` when `total` is zero.
///
/// `completed` is clamped to `total`.
pub fn render_bar(label: &str, completed: u64, total: u64, width: usize) -> Option<String> {
    if total == 0 {
        return None;
    }
    let completed = completed.min(total);

    let percent = format!("{:.*}", DECIMALS, 100.0 * completed as f64 / total as f64);
    let length = bar_width(label, &percent, width);
    let filled = (length as u128 * completed as u128 / total as u128) as usize;
    let bar = FILL.repeat(filled) + &EMPTY.repeat(length - filled);

    Some(format_line(label, &bar, &percent))
}

pub struct ProgressReporter<W: Write = io::Stdout> {
    out: W,
    width: usize,
    interval: Duration,
    last_render: Instant,
}

impl ProgressReporter<io::Stdout> {
    /// Reporter painting on stdout, sized to the current terminal.
    pub fn stdout() -> Self {
        let (width, _) = terminal::terminal_size();
        Self::new(io::stdout(), usize::from(width))
    }
}

impl<W: Write> ProgressReporter<W> {
    pub fn new(out: W, width: usize) -> Self {
        Self {
            out,
            width,
            interval: RENDER_INTERVAL,
            last_render: Instant::now(),
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn get_ref(&self) -> &W {
        &self.out
    }

    /// Repaints the bar if the throttle allows it.
    ///
    /// `force` and `completed == total` bypass the throttle; the latter also
    /// ends the line with a newline. Write failures are logged and dropped.
    pub fn update(&mut self, label: &str, completed: u64, total: u64, force: bool) {
        if total == 0 {
            return;
        }

        let finished = completed >= total;
        if !force && !finished && self.last_render.elapsed() < self.interval {
            return;
        }

        let Some(line) = render_bar(label, completed, total, self.width) else {
            return;
        };

        if let Err(e) = self.paint(&line, finished) {
            debug!("progress output failed: {e}");
        }
        self.last_render = Instant::now();
    }

    fn paint(&mut self, line: &str, finished: bool) -> io::Result<()> {
        write!(self.out, "{line}\r")?;
        if finished {
            writeln!(self.out)?;
        }
        self.out.flush()
    }
}
