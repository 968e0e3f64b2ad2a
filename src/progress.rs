use indicatif::{ProgressBar, ProgressStyle};

const TICK_CHARS: &str = "█▉▊▋▌▍▎▏ ";

/// Bar style shared by the long-running loops, prefixed with `label`.
pub(crate) fn bar_style(label: &str) -> ProgressStyle {
    ProgressStyle::default_bar()
        .template(&format!(
            "{label}: {{spinner:.green}} [{{bar:40.cyan/blue}}] {{pos}}/{{len}} | {{elapsed}}/{{eta}} | {{msg}}"
        ))
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars(TICK_CHARS)
}

/// A styled bar of `len` steps, or a hidden one when progress display is off.
pub(crate) fn progress_bar(label: &str, len: u64, visible: bool) -> ProgressBar {
    if !visible {
        return ProgressBar::hidden();
    }
    let bar = ProgressBar::new(len);
    bar.set_style(bar_style(label));
    bar
}
