//! Identifier derivation for tables and columns.
//!
//! Two policies are kept apart: table names come
//! from file names and are restricted to `[A-Za-z0-9_]` one character at a
//! time, while column names come from headers and only have surrounding
//! whitespace trimmed and inner whitespace mapped to `_`. Column sets are
//! then made unique, since two headers may collapse to the same identifier.
use std::collections::HashSet;
use std::path::Path;

/// Map every character outside `[A-Za-z0-9_]` to `_`. Total and idempotent.
pub fn sanitize_table_name(name: &str) -> String {
    name.chars()
        .map(|ch| {
            if ch.is_ascii_alphanumeric() || ch == '_' {
                ch
            } else {
                '_'
            }
        })
        .collect()
}

/// Table name for a file: its stem (last extension removed), sanitized.
pub fn table_name_from_path(path: impl AsRef<Path>) -> String {
    let path = path.as_ref();
    let stem = path
        .file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_default();
    sanitize_table_name(&stem)
}

pub fn sanitize_header(header: &str) -> String {
    header
        .trim()
        .chars()
        .map(|ch| if ch.is_whitespace() { '_' } else { ch })
        .collect()
}

/// Sanitize every header and make the result usable as a column list:
/// empty names become `column_<n>` and repeats get `_2`, `_3`, ...
pub fn column_names(headers: &[String]) -> Vec<String> {
    let mut taken: HashSet<String> = HashSet::with_capacity(headers.len());
    let mut names = Vec::with_capacity(headers.len());
    for (idx, header) in headers.iter().enumerate() {
        let mut base = sanitize_header(header);
        if base.is_empty() {
            base = format!("column_{}", idx + 1);
        }
        let mut name = base.clone();
        let mut suffix = 2usize;
        // SQLite compares identifiers case-insensitively for ASCII.
        while taken.contains(&name.to_ascii_lowercase()) {
            name = format!("{base}_{suffix}");
            suffix += 1;
        }
        taken.insert(name.to_ascii_lowercase());
        names.push(name);
    }
    names
}

/// Double-quote an identifier, doubling embedded quotes.
pub fn quote_ident(ident: &str) -> String {
    format!("\"{}\"", ident.replace('"', "\"\""))
}

#[cfg(test)]
mod tests {
    use super::{
        column_names, quote_ident, sanitize_header, sanitize_table_name, table_name_from_path,
    };

    fn headers(values: &[&str]) -> Vec<String> {
        values.iter().map(|value| value.to_string()).collect()
    }

    #[test]
    fn table_name_maps_each_char() {
        assert_eq!(sanitize_table_name("sales-2024 q1"), "sales_2024_q1");
        assert_eq!(sanitize_table_name("naïve"), "na_ve");
        assert_eq!(sanitize_table_name(""), "");
    }

    #[test]
    fn table_name_is_idempotent_and_restricted() {
        for input in ["a b-c", "ünï.cødé", "__x__", "123", "\"quoted\""] {
            let once = sanitize_table_name(input);
            assert_eq!(sanitize_table_name(&once), once);
            assert!(
                once.chars()
                    .all(|ch| ch.is_ascii_alphanumeric() || ch == '_')
            );
            assert_eq!(once.chars().count(), input.chars().count());
        }
    }

    #[test]
    fn table_name_from_path_drops_last_extension() {
        assert_eq!(table_name_from_path("/tmp/users.csv"), "users");
        assert_eq!(table_name_from_path("data/my orders.v2.json"), "my_orders_v2");
        assert_eq!(table_name_from_path("Book1.xlsx"), "Book1");
    }

    #[test]
    fn header_sanitizer_only_touches_whitespace() {
        assert_eq!(sanitize_header("First Name"), "First_Name");
        assert_eq!(sanitize_header("  padded\tvalue "), "padded_value");
        assert_eq!(sanitize_header("price($)"), "price($)");
    }

    #[test]
    fn column_names_dedupe_and_fill_blanks() {
        let names = column_names(&headers(&["A B", "A_B", "", "a_b", " "]));
        assert_eq!(names, vec!["A_B", "A_B_2", "column_3", "a_b_3", "column_5"]);
    }

    #[test]
    fn quote_ident_escapes_quotes() {
        assert_eq!(quote_ident("plain"), "\"plain\"");
        assert_eq!(quote_ident("say \"hi\""), "\"say \"\"hi\"\"\"");
    }
}
