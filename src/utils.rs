//! Formatting and arithmetic helpers shared by the pipeline, the statistics
//! summary and the CLI.

use std::time::Duration;

/// Format file size in human-readable format
///
/// # Arguments
/// * `bytes` - Size in bytes
///
/// # Returns
/// * Human-readable size string (e.g., "1.2 MB", "512 KB")
pub fn format_file_size(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB"];
    const THRESHOLD: f64 = 1024.0;

    if bytes == 0 {
        return "0 B".to_string();
    }

    let mut size = bytes as f64;
    let mut unit_index = 0;

    while size >= THRESHOLD && unit_index < UNITS.len() - 1 {
        size /= THRESHOLD;
        unit_index += 1;
    }

    if unit_index == 0 {
        format!("{} {}", bytes, UNITS[unit_index])
    } else {
        format!("{:.1} {}", size, UNITS[unit_index])
    }
}

/// Percentage of the original size that compression removed
///
/// # Returns
/// * Positive when the file shrank, negative when it grew, 0 for empty input
pub fn percent_saved(original_size: u64, compressed_size: u64) -> f64 {
    if original_size == 0 {
        return 0.0;
    }
    ((original_size as f64 - compressed_size as f64) / original_size as f64) * 100.0
}

/// Whether `compressed_size` is small enough to replace `original_size`.
///
/// Requires a strict reduction and `compressed <= original * (1 - min_percent / 100)`.
pub fn meets_saving_threshold(original_size: u64, compressed_size: u64, min_percent: f64) -> bool {
    if compressed_size >= original_size {
        return false;
    }
    let saved = (original_size - compressed_size) as f64;
    saved * 100.0 >= min_percent * original_size as f64
}

/// Format a duration as "42.0s", "3m 12s" or "1h 05m"
pub fn format_duration(duration: Duration) -> String {
    let seconds = duration.as_secs_f64();
    if seconds < 60.0 {
        return format!("{:.1}s", seconds);
    }

    let total = duration.as_secs();
    let minutes = total / 60;
    if minutes < 60 {
        return format!("{}m {:02}s", minutes, total % 60);
    }

    format!("{}h {:02}m", minutes / 60, minutes % 60)
}
