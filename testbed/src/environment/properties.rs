//! Properties-file overlay parsing
//!
//! Override files use the classic properties format: one `key=value` or
//! `key: value` pair per line, `#` or `!` comment lines, blank lines
//! ignored. Keys and values are trimmed. A line without a separator maps
//! the whole line to the empty string.

use std::collections::HashMap;

/// Parse properties-file text into a key/value map.
///
/// Later lines win on duplicate keys, matching overlay semantics.
pub(crate) fn parse(contents: &str) -> HashMap<String, String> {
    let mut properties = HashMap::new();

    for line in contents.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') || line.starts_with('!') {
            continue;
        }

        match line.find(['=', ':']) {
            Some(idx) => {
                let key = line[..idx].trim();
                let value = line[idx + 1..].trim();
                if !key.is_empty() {
                    properties.insert(key.to_string(), value.to_string());
                }
            }
            None => {
                properties.insert(line.to_string(), String::new());
            }
        }
    }

    properties
}
