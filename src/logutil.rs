//! Log helpers for text that arrives over the mesh.
//! Radio payloads are untrusted and frequently multi-line (menus, alerts with a bell
//! character), so everything is flattened to one escaped line before it is logged.

/// Longest preview written for a single payload.
const MAX_PREVIEW: usize = 240;

/// Escape a payload for single-line logging, capped at [`MAX_PREVIEW`] chars.
pub fn escape_log(s: &str) -> String {
    escape_log_with_limit(s, MAX_PREVIEW)
}

/// Escape `s` for single-line logging:
/// - `\n`, `\r`, `\t` become their two-character escapes
/// - backslash is doubled
/// - any other control character (e.g. the alert bell `\x07`) becomes `\xNN`
///
/// Output stops after `max_chars` input characters with a trailing `…`.
pub fn escape_log_with_limit(s: &str, max_chars: usize) -> String {
    use std::fmt::Write;
    let mut out = String::with_capacity(s.len().min(max_chars) + 8);
    for (count, ch) in s.chars().enumerate() {
        if count >= max_chars {
            out.push('…');
            break;
        }
        match ch {
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if c.is_control() => {
                let _ = write!(&mut out, "\\x{:02X}", c as u32);
            }
            c => out.push(c),
        }
    }
    out
}
