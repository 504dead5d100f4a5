//! Purpose: Render JSON with optional ANSI colorization for CLI output.
//! Exports: colorize_json, colorize_records.
//! Role: Small, pure formatters used by CLI emission paths.
//! Invariants: When color is disabled, pretty output equals serde_json::to_string_pretty.
//! Invariants: Record objects keep result-column order; keys are never re-sorted.
//! Invariants: ANSI escapes appear only when explicitly enabled.
use runsql::api::{Row, Scalar};
use serde_json::Value;

const INDENT: &str = "  ";

// Conservative 8/16-color palette for broad terminal compatibility.
// Avoid bright variants that can lose contrast on themes like Solarized.
const COLOR_KEY: &str = "36";
const COLOR_STRING: &str = "32";
const COLOR_NUMBER: &str = "33";
const COLOR_BOOL: &str = "35";
const COLOR_NULL: &str = "39";
const COLOR_PUNCT: &str = "39";

pub fn colorize_json(value: &Value, use_color: bool) -> String {
    let mut out = String::new();
    write_value(value, 0, use_color, &mut out);
    out
}

fn write_value(value: &Value, indent: usize, use_color: bool, out: &mut String) {
    match value {
        Value::Null => push_colored("null", COLOR_NULL, use_color, out),
        Value::Bool(val) => {
            let text = if *val { "true" } else { "false" };
            push_colored(text, COLOR_BOOL, use_color, out);
        }
        Value::Number(num) => push_colored(&num.to_string(), COLOR_NUMBER, use_color, out),
        Value::String(text) => {
            let encoded = serde_json::to_string(text).unwrap_or_else(|_| "\"\"".to_string());
            push_colored(&encoded, COLOR_STRING, use_color, out);
        }
        Value::Array(items) => write_array(items, indent, use_color, out),
        Value::Object(map) => write_object(map, indent, use_color, out),
    }
}

fn write_array(items: &[Value], indent: usize, use_color: bool, out: &mut String) {
    if items.is_empty() {
        push_colored("[]", COLOR_PUNCT, use_color, out);
        return;
    }
    push_colored("[", COLOR_PUNCT, use_color, out);
    out.push('\n');
    for (idx, item) in items.iter().enumerate() {
        push_indent(indent + 1, out);
        write_value(item, indent + 1, use_color, out);
        if idx + 1 < items.len() {
            push_colored(",", COLOR_PUNCT, use_color, out);
        }
        out.push('\n');
    }
    push_indent(indent, out);
    push_colored("]", COLOR_PUNCT, use_color, out);
}

fn write_object(
    map: &serde_json::Map<String, Value>,
    indent: usize,
    use_color: bool,
    out: &mut String,
) {
    if map.is_empty() {
        push_colored("{}", COLOR_PUNCT, use_color, out);
        return;
    }
    push_colored("{", COLOR_PUNCT, use_color, out);
    out.push('\n');
    let len = map.len();
    for (idx, (key, value)) in map.iter().enumerate() {
        push_indent(indent + 1, out);
        let encoded = serde_json::to_string(key).unwrap_or_else(|_| "\"\"".to_string());
        push_colored(&encoded, COLOR_KEY, use_color, out);
        push_colored(":", COLOR_PUNCT, use_color, out);
        out.push(' ');
        write_value(value, indent + 1, use_color, out);
        if idx + 1 < len {
            push_colored(",", COLOR_PUNCT, use_color, out);
        }
        out.push('\n');
    }
    push_indent(indent, out);
    push_colored("}", COLOR_PUNCT, use_color, out);
}

/// Query rows as a JSON array of objects keyed by column name.
pub fn colorize_records(columns: &[String], rows: &[Row], pretty: bool, use_color: bool) -> String {
    let mut out = String::new();
    if rows.is_empty() {
        push_colored("[]", COLOR_PUNCT, use_color, &mut out);
        return out;
    }
    push_colored("[", COLOR_PUNCT, use_color, &mut out);
    for (idx, row) in rows.iter().enumerate() {
        if pretty {
            out.push('\n');
            push_indent(1, &mut out);
        }
        write_record(columns, row, pretty, use_color, &mut out);
        if idx + 1 < rows.len() {
            push_colored(",", COLOR_PUNCT, use_color, &mut out);
        }
    }
    if pretty {
        out.push('\n');
    }
    push_colored("]", COLOR_PUNCT, use_color, &mut out);
    out
}

fn write_record(columns: &[String], row: &Row, pretty: bool, use_color: bool, out: &mut String) {
    if columns.is_empty() {
        push_colored("{}", COLOR_PUNCT, use_color, out);
        return;
    }
    push_colored("{", COLOR_PUNCT, use_color, out);
    for (idx, column) in columns.iter().enumerate() {
        if pretty {
            out.push('\n');
            push_indent(2, out);
        }
        let encoded = serde_json::to_string(column).unwrap_or_else(|_| "\"\"".to_string());
        push_colored(&encoded, COLOR_KEY, use_color, out);
        push_colored(":", COLOR_PUNCT, use_color, out);
        if pretty {
            out.push(' ');
        }
        write_scalar(row.get(idx).unwrap_or(&Scalar::Null), use_color, out);
        if idx + 1 < columns.len() {
            push_colored(",", COLOR_PUNCT, use_color, out);
        }
    }
    if pretty {
        out.push('\n');
        push_indent(1, out);
    }
    push_colored("}", COLOR_PUNCT, use_color, out);
}

fn write_scalar(value: &Scalar, use_color: bool, out: &mut String) {
    let color = match value {
        Scalar::Null => COLOR_NULL,
        Scalar::Integer(_) => COLOR_NUMBER,
        // Non-finite reals serialize as null.
        Scalar::Real(real) if !real.is_finite() => COLOR_NULL,
        Scalar::Real(_) => COLOR_NUMBER,
        Scalar::Text(_) => COLOR_STRING,
    };
    let encoded = serde_json::to_string(value).unwrap_or_else(|_| "null".to_string());
    push_colored(&encoded, color, use_color, out);
}

fn push_indent(level: usize, out: &mut String) {
    for _ in 0..level {
        out.push_str(INDENT);
    }
}

fn push_colored(text: &str, color: &str, use_color: bool, out: &mut String) {
    if !use_color {
        out.push_str(text);
        return;
    }
    out.push_str("\u{1b}[");
    out.push_str(color);
    out.push('m');
    out.push_str(text);
    out.push_str("\u{1b}[0m");
}

#[cfg(test)]
mod tests {
    use super::{colorize_json, colorize_records};
    use runsql::api::Scalar;
    use serde_json::json;

    #[test]
    fn colorize_json_matches_pretty_when_disabled() {
        let value = json!({
            "arr": [1, true, null],
            "nested": { "x": "y" }
        });
        let plain = colorize_json(&value, false);
        let pretty = serde_json::to_string_pretty(&value).expect("pretty");
        assert_eq!(plain, pretty);
    }

    #[test]
    fn colorize_json_emits_ansi_when_enabled() {
        let value = json!({"k":"v","n":1,"b":true,"z":null});
        let colored = colorize_json(&value, true);
        assert!(colored.contains("\u{1b}["));
        assert!(colored.contains("\u{1b}[36m\"k\"\u{1b}[0m"));
        assert!(colored.contains("\u{1b}[32m\"v\"\u{1b}[0m"));
        assert!(colored.contains("\u{1b}[33m1\u{1b}[0m"));
        assert!(colored.contains("\u{1b}[35mtrue\u{1b}[0m"));
        assert!(colored.contains("\u{1b}[39mnull\u{1b}[0m"));
    }

    #[test]
    fn records_keep_column_order() {
        let columns = vec!["zeta".to_string(), "alpha".to_string()];
        let rows = vec![
            vec![Scalar::Integer(1), Scalar::from("a")],
            vec![Scalar::Real(2.5), Scalar::Null],
        ];
        let compact = colorize_records(&columns, &rows, false, false);
        assert_eq!(
            compact,
            r#"[{"zeta":1,"alpha":"a"},{"zeta":2.5,"alpha":null}]"#
        );

        let pretty = colorize_records(&columns, &rows, true, false);
        let expected = "[\n  {\n    \"zeta\": 1,\n    \"alpha\": \"a\"\n  },\n  {\n    \"zeta\": 2.5,\n    \"alpha\": null\n  }\n]";
        assert_eq!(pretty, expected);
        let parsed: serde_json::Value = serde_json::from_str(&pretty).expect("valid json");
        assert_eq!(parsed[1]["zeta"], 2.5);
    }

    #[test]
    fn empty_result_is_an_empty_array() {
        let columns = vec!["id".to_string()];
        assert_eq!(colorize_records(&columns, &[], true, false), "[]");
        let colored = colorize_records(&columns, &[vec![Scalar::from("x")]], false, true);
        assert!(colored.contains("\u{1b}[36m\"id\"\u{1b}[0m"));
        assert!(colored.contains("\u{1b}[32m\"x\"\u{1b}[0m"));
    }
}
