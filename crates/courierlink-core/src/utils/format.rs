use std::time::Duration;

/// Truncate a string to a maximum length, adding ellipsis if needed
pub fn truncate_string(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else if max_len <= 3 {
        s.chars().take(max_len).collect()
    } else {
        let truncated: String = s.chars().take(max_len - 3).collect();
        format!("{}...", truncated)
    }
}

/// Show only the head and tail of a bearer token, for logs and terminal output
pub fn mask_token(token: &str) -> String {
    let len = token.chars().count();
    if len <= 12 {
        return "*".repeat(len);
    }
    let head: String = token.chars().take(6).collect();
    let tail: String = token.chars().skip(len - 4).collect();
    format!("{}…{}", head, tail)
}

/// Format a wall-clock duration as seconds with millisecond precision
pub fn format_elapsed(elapsed: Duration) -> String {
    format!("{:.3}s", elapsed.as_secs_f64())
}
