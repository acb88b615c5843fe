//! Formatting utilities for displaying snapshot times and command failures

use chrono::NaiveDateTime;

/// Format a snapshot date as `dd/mm/YYYY`
///
/// # Examples
/// ```
/// use chrono::NaiveDateTime;
/// use snapshot_restore_common::format::format_snapshot_date;
/// let t = NaiveDateTime::parse_from_str("2025-08-11_23-00-00", "%Y-%m-%d_%H-%M-%S").unwrap();
/// assert_eq!(format_snapshot_date(&t), "11/08/2025");
/// ```
pub fn format_snapshot_date(taken_at: &NaiveDateTime) -> String {
    taken_at.format("%d/%m/%Y").to_string()
}

/// Format a snapshot time of day as `HH:MM:SS`
pub fn format_snapshot_time(taken_at: &NaiveDateTime) -> String {
    taken_at.format("%H:%M:%S").to_string()
}

/// Reduce captured process output to something fit for a one-line message
///
/// Keeps the last non-empty lines, since tools like timeshift print the
/// actual failure reason at the end.
pub fn summarize_output(output: &str, max_lines: usize) -> String {
    let lines: Vec<&str> = output
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .collect();

    let start = lines.len().saturating_sub(max_lines);
    lines[start..].join(" ")
}
