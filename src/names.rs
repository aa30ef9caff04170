//! Field name mapping between declared schema names and the text form
//!
//! Schemas declare fields in snake_case; the text form uses camelCase:
//! the first word is kept as-is, every following word is capitalized
//! (first letter upper-cased, remainder lower-cased) and the words are
//! joined without separators.

/// Text-form name for a declared field name
pub fn json_name(field_name: &str) -> String {
    if !field_name.contains('_') {
        return field_name.to_string();
    }

    let mut words = field_name.split('_');
    let mut result = words.next().unwrap_or_default().to_string();
    for word in words {
        result.push_str(&capitalize(word));
    }
    result
}

fn capitalize(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first
            .to_uppercase()
            .chain(chars.flat_map(char::to_lowercase))
            .collect(),
        None => String::new(),
    }
}
