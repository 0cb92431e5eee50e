use base64::{Engine as _, engine::general_purpose};

/// Human-readable size using 1024-based units, e.g. `"1.5 KB"`.
///
/// Values below 1 KB are printed as whole bytes. Larger values keep at most
/// two decimals with trailing zeros dropped, and GB is the largest unit.
pub fn format_bytes(bytes: usize) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB"];
    const THRESHOLD: f64 = 1024.0;

    if bytes < 1024 {
        return format!("{} B", bytes);
    }

    let bytes_f = bytes as f64;
    let mut unit_index = 0;
    let mut size = bytes_f;
    while size >= THRESHOLD && unit_index < UNITS.len() - 1 {
        size /= THRESHOLD;
        unit_index += 1;
    }

    let rounded = format!("{:.2}", size);
    let trimmed = rounded.trim_end_matches('0').trim_end_matches('.');

    format!("{} {}", trimmed, UNITS[unit_index])
}

/// `original / compressed` rounded to three decimals, absent for empty output.
pub fn round_ratio(original_size: usize, compressed_size: usize) -> Option<f64> {
    if compressed_size == 0 {
        return None;
    }

    let ratio = original_size as f64 / compressed_size as f64;
    Some((ratio * 1000.0).round() / 1000.0)
}

pub fn data_url(mime: &str, bytes: &[u8]) -> String {
    format!("data:{};base64,{}", mime, general_purpose::STANDARD.encode(bytes))
}
