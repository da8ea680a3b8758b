//! Text shaping helpers for query results and model output.

use serde_json::Value;

/// Rows per markdown table chunk. Large results split into multiple tables
/// so each list element stays independently renderable.
const ROWS_PER_CHUNK: usize = 50;

/// Render a JSON array of row objects as markdown tables.
///
/// Column order follows the first row's keys. Returns one string per chunk
/// of [`ROWS_PER_CHUNK`] rows; an empty or non-array input yields no chunks.
pub fn rows_to_markdown(rows: &Value) -> Vec<String> {
    let Some(rows) = rows.as_array() else {
        return Vec::new();
    };
    if rows.is_empty() {
        return Vec::new();
    }

    let columns: Vec<String> = match rows[0].as_object() {
        Some(first) => first.keys().cloned().collect(),
        None => return Vec::new(),
    };
    if columns.is_empty() {
        return Vec::new();
    }

    rows.chunks(ROWS_PER_CHUNK)
        .map(|chunk| render_table(&columns, chunk))
        .collect()
}

fn render_table(columns: &[String], rows: &[Value]) -> String {
    let mut out = String::new();
    out.push_str("| ");
    out.push_str(&columns.join(" | "));
    out.push_str(" |\n|");
    for _ in columns {
        out.push_str(" --- |");
    }
    out.push('\n');

    for row in rows {
        out.push_str("| ");
        let cells: Vec<String> = columns
            .iter()
            .map(|col| render_cell(row.get(col.as_str())))
            .collect();
        out.push_str(&cells.join(" | "));
        out.push_str(" |\n");
    }
    out
}

fn render_cell(value: Option<&Value>) -> String {
    let rendered = match value {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
    };
    // Pipes would break the table row.
    rendered.replace('|', "\\|")
}

/// Convert LaTeX bracket delimiters to dollar delimiters.
///
/// Models emit `\[...\]` and `\(...\)` math blocks; the chat frontend only
/// renders the `$$...$$` / `$...$` forms.
pub fn normalize_latex(text: &str) -> String {
    text.replace("\\[", "$$")
        .replace("\\]", "$$")
        .replace("\\(", "$")
        .replace("\\)", "$")
}

/// Strip a surrounding markdown code fence, if present.
///
/// Accepts both tagged fences (```sql) and bare ones. Untagged input comes
/// back trimmed but otherwise unchanged, so callers can apply this
/// unconditionally to model output.
pub fn strip_code_fence(text: &str) -> String {
    let trimmed = text.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed.to_string();
    };
    // Drop the language tag line.
    let body = match rest.split_once('\n') {
        Some((_tag, body)) => body,
        None => rest,
    };
    let body = body.strip_suffix("```").unwrap_or(body);
    body.trim().to_string()
}
