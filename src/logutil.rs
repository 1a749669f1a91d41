//! Logging utilities for node-supplied strings.
//!
//! Long and short names come straight off the mesh, so anything a node puts in
//! them (newlines, escape sequences) is escaped before it reaches a log line.

/// Escape a string for single-line logging:
/// - `\n` => `\\n`
/// - `\r` => `\\r`
/// - `\t` => `\\t`
/// - backslash => `\\\\`
///   Truncates names over `MAX_PREVIEW` chars with an ellipsis.
pub fn escape_log(s: &str) -> String {
    const MAX_PREVIEW: usize = 64; // node names are short; anything longer is noise
    let mut out = String::with_capacity(s.len().min(MAX_PREVIEW) + 8);
    for (count, ch) in s.chars().enumerate() {
        if count >= MAX_PREVIEW {
            out.push('…');
            break;
        }
        match ch {
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if c.is_control() => {
                use std::fmt::Write;
                let _ = write!(&mut out, "\\x{:02X}", c as u32);
            }
            c => out.push(c),
        }
    }
    out
}

/// `"!a1b2c3d4 (Base Camp)"` style label for log lines.
pub fn node_label(node_id: &str, long_name: &str) -> String {
    format!("{} ({})", escape_log(node_id), escape_log(long_name))
}
