//! XML escaping
//!
//! Message bodies may contain arbitrary bytes. Valid UTF-8 is kept as is
//! (with markup characters escaped); bytes that cannot be shown are written
//! as `&lt;0xNN&gt;` so the report stays well-formed and nothing is lost.

/// Appends `bytes` as XML character data
///
/// `\n` becomes `<br/>`, and a `\r` directly after `\n` is dropped.
pub fn escape_text_into(out: &mut String, bytes: &[u8]) {
    let mut prev_newline = false;
    for chunk in bytes.utf8_chunks() {
        for ch in chunk.valid().chars() {
            match ch {
                '\n' => out.push_str("<br/>"),
                '\r' if prev_newline => {}
                '\r' => out.push_str("<br/>"),
                '<' => out.push_str("&lt;"),
                '>' => out.push_str("&gt;"),
                '&' => out.push_str("&amp;"),
                '\t' => out.push('\t'),
                c if (c as u32) < 0x20 || c as u32 == 0x7f => {
                    out.push_str(&format!("&lt;0x{:02x}&gt;", c as u32));
                }
                c => out.push(c),
            }
            prev_newline = ch == '\n';
        }
        for byte in chunk.invalid() {
            out.push_str(&format!("&lt;0x{:02x}&gt;", byte));
            prev_newline = false;
        }
    }
}

pub fn escape_text(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len());
    escape_text_into(&mut out, bytes);
    out
}

/// Escapes a string for use inside a double-quoted attribute
pub fn escape_attr(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for ch in text.chars() {
        match ch {
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '&' => out.push_str("&amp;"),
            '"' => out.push_str("&quot;"),
            '\n' => out.push_str("&#10;"),
            c if (c as u32) < 0x20 && c != '\t' => {
                out.push_str(&format!("&#{};", c as u32));
            }
            c => out.push(c),
        }
    }
    out
}

/// Escapes markup characters only; newlines are kept
pub fn escape_plain(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for ch in text.chars() {
        match ch {
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '&' => out.push_str("&amp;"),
            c => out.push(c),
        }
    }
    out
}
