//! POSIX shell quoting for commands sent to workloads

/// Wrap `s` in single quotes so a POSIX shell reads it as one literal word.
///
/// Embedded single quotes become `'\''`. Applying this twice yields a string
/// that survives two rounds of shell parsing (e.g. `su -c '<...>'`).
pub fn quote(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    out.push('\'');
    for c in s.chars() {
        if c == '\'' {
            out.push_str("'\\''");
        } else {
            out.push(c);
        }
    }
    out.push('\'');
    out
}
