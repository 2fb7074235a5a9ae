//! Response body formatters for the non-JSON paths (spec.md §6): `/toon`,
//! `/txt` & `/text`, `/csv`, `/html`. Out of scope per spec.md §1 ("response
//! format rendering... treated as an interface consumed or produced by the
//! core") — best-effort renderings over the same `serde_json::Value`, not
//! styled output.

use serde_json::Value;

/// Token-oriented textual encoding: `key=value` pairs, one per line, nested
/// objects dotted. Not a standardized "TOON" — a minimal token-oriented
/// rendering in that spirit, since no TOON crate exists in this stack.
pub fn to_toon(value: &Value) -> String {
    let mut out = String::new();
    flatten(value, "", &mut |path, v| {
        out.push_str(path);
        out.push('=');
        out.push_str(&scalar_to_string(v));
        out.push('\n');
    });
    out
}

/// Indented human-readable key/value text (`/txt`, `/text`).
pub fn to_text(value: &Value) -> String {
    let mut out = String::new();
    write_indented(value, 0, &mut out);
    out
}

fn write_indented(value: &Value, depth: usize, out: &mut String) {
    let pad = "  ".repeat(depth);
    match value {
        Value::Object(map) => {
            for (k, v) in map {
                match v {
                    Value::Object(_) => {
                        out.push_str(&format!("{pad}{k}:\n"));
                        write_indented(v, depth + 1, out);
                    }
                    other => out.push_str(&format!("{pad}{k}: {}\n", scalar_to_string(other))),
                }
            }
        }
        other => out.push_str(&format!("{pad}{}\n", scalar_to_string(other))),
    }
}

/// Flattened CSV with dotted-path headers — a single data row per response.
pub fn to_csv(value: &Value) -> String {
    let mut headers = Vec::new();
    let mut values = Vec::new();
    flatten(value, "", &mut |path, v| {
        headers.push(path.to_string());
        values.push(csv_escape(&scalar_to_string(v)));
    });
    format!("{}\n{}\n", headers.join(","), values.join(","))
}

/// Templated HTML with a sidebar — minimal inline rendering (no external
/// template engine in this stack; spec.md §1 scopes out format rendering
/// generally, including styled HTML).
pub fn to_html(value: &Value) -> String {
    let mut rows = String::new();
    flatten(value, "", &mut |path, v| {
        rows.push_str(&format!(
            "<tr><td>{}</td><td>{}</td></tr>\n",
            html_escape(path),
            html_escape(&scalar_to_string(v))
        ));
    });
    format!(
        "<!doctype html><html><body><nav id=\"sidebar\"></nav><table>\n{rows}</table></body></html>"
    )
}

fn flatten(value: &Value, prefix: &str, emit: &mut impl FnMut(&str, &Value)) {
    match value {
        Value::Object(map) => {
            for (k, v) in map {
                let path = if prefix.is_empty() {
                    k.clone()
                } else {
                    format!("{prefix}.{k}")
                };
                flatten(v, &path, emit);
            }
        }
        Value::Array(items) => {
            for (i, v) in items.iter().enumerate() {
                let path = format!("{prefix}[{i}]");
                flatten(v, &path, emit);
            }
        }
        other => emit(prefix, other),
    }
}

fn scalar_to_string(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        other => other.to_string(),
    }
}

fn csv_escape(s: &str) -> String {
    if s.contains(',') || s.contains('"') || s.contains('\n') {
        format!("\"{}\"", s.replace('"', "\"\""))
    } else {
        s.to_string()
    }
}

fn html_escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn csv_has_matching_header_and_value_counts() {
        let v = json!({"ip": "8.8.8.8", "is_bogon": false});
        let csv = to_csv(&v);
        let mut lines = csv.lines();
        let headers = lines.next().unwrap().split(',').count();
        let values = lines.next().unwrap().split(',').count();
        assert_eq!(headers, values);
    }

    #[test]
    fn text_indents_nested_objects() {
        let v = json!({"location": {"city": "NYC"}});
        let text = to_text(&v);
        assert!(text.contains("location:\n"));
        assert!(text.contains("  city: NYC"));
    }

    #[test]
    fn toon_emits_dotted_keys() {
        let v = json!({"a": {"b": 1}});
        let toon = to_toon(&v);
        assert_eq!(toon.trim(), "a.b=1");
    }
}
