//! Formatting helpers shared by logging and the CLI.

use std::borrow::Cow;

/// Longest command rendering emitted in logs and error messages.
const MAX_COMMAND_DISPLAY: usize = 512;

/// Formats a byte count into a human-readable string with appropriate units.
///
/// # Examples
///
/// ```
/// use singularity_conn::utils::format_bytes;
///
/// assert_eq!(format_bytes(500), "500 B");
/// assert_eq!(format_bytes(1536), "1.5 KB");
/// assert_eq!(format_bytes(1073741824), "1.0 GB");
/// ```
pub fn format_bytes(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    if bytes >= GB {
        format!("{:.1} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.1} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.1} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} B", bytes)
    }
}

/// Truncates a string to at most `max_len` characters, appending "..." if truncated.
///
/// # Examples
///
/// ```
/// use singularity_conn::utils::truncate;
///
/// assert_eq!(truncate("hello", 10), "hello");
/// assert_eq!(truncate("hello world", 8), "hello...");
/// ```
pub fn truncate(s: &str, max_len: usize) -> Cow<'_, str> {
    if s.chars().count() <= max_len {
        Cow::Borrowed(s)
    } else if max_len <= 3 {
        Cow::Owned(s.chars().take(max_len).collect())
    } else {
        let head: String = s.chars().take(max_len - 3).collect();
        Cow::Owned(format!("{}...", head))
    }
}

/// Renders an argument vector the way a shell user would type it.
///
/// Only used for display; commands are always spawned with discrete arguments.
///
/// ```
/// use singularity_conn::utils::display_command;
///
/// let argv = vec!["echo".to_string(), "hello world".to_string()];
/// assert_eq!(display_command(&argv), "echo 'hello world'");
/// ```
pub fn display_command(argv: &[String]) -> String {
    let rendered = argv
        .iter()
        .map(|arg| quote_arg(arg))
        .collect::<Vec<_>>()
        .join(" ");
    truncate(&rendered, MAX_COMMAND_DISPLAY).into_owned()
}

fn quote_arg(arg: &str) -> Cow<'_, str> {
    let plain = !arg.is_empty()
        && arg
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "-_./=:@%+,".contains(c));

    if plain {
        Cow::Borrowed(arg)
    } else {
        Cow::Owned(format!("'{}'", arg.replace('\'', "'\\''")))
    }
}
