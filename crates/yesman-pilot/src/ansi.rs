//! Terminal escape removal for captured pane text.
//!
//! `capture-pane` normally returns plain text, but panes captured with
//! escapes enabled (or programs that print raw sequences) leave color codes
//! and cursor movement behind. Detection and snapshot diffing both work on
//! the cleaned text.

/// Remove ANSI escape sequences and carriage returns from `input`.
///
/// Handles CSI (`ESC [ ... final`), OSC (`ESC ] ... BEL` or `ESC ] ... ESC \`),
/// two-character escapes such as `ESC 7`, and the single-character CSI `\u{9b}`.
pub fn strip_ansi(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '\u{1b}' => match chars.next() {
                Some('[') => skip_csi(&mut chars),
                Some(']') => {
                    while let Some(c) = chars.next() {
                        if c == '\u{07}' {
                            break;
                        }
                        if c == '\u{1b}' && chars.peek() == Some(&'\\') {
                            chars.next();
                            break;
                        }
                    }
                }
                // Two-character escape or truncated input.
                _ => {}
            },
            '\u{9b}' => skip_csi(&mut chars),
            '\r' => {}
            other => out.push(other),
        }
    }

    out
}

fn skip_csi(chars: &mut std::iter::Peekable<std::str::Chars<'_>>) {
    while let Some(&c) = chars.peek() {
        if ('\u{20}'..='\u{3f}').contains(&c) {
            chars.next();
        } else {
            break;
        }
    }
    if let Some(&c) = chars.peek() {
        if ('\u{40}'..='\u{7e}').contains(&c) {
            chars.next();
        }
    }
}

/// Strip escapes, trailing whitespace on each line, and trailing blank lines.
///
/// tmux pads a capture with empty rows up to the pane height; those rows
/// are not content and would otherwise make every capture look different.
pub fn clean_capture(input: &str) -> String {
    let stripped = strip_ansi(input);
    let lines: Vec<&str> = stripped.lines().map(str::trim_end).collect();
    let end = lines
        .iter()
        .rposition(|l| !l.is_empty())
        .map(|i| i + 1)
        .unwrap_or(0);
    lines[..end].join("\n")
}
