use serde::{Deserialize, Serialize};
use serde_yaml::Value;

pub const DELIMITER: &str = "---";

/// Characters that make a plain YAML scalar ambiguous or structurally invalid.
const SIGNIFICANT: &[char] = &[
    ':', '{', '}', '[', ']', ',', '&', '*', '#', '?', '|', '<', '>', '=', '!', '%', '@', '`',
];

/// Metadata block of an article file. Absent keys read as empty strings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FrontMatter {
    pub title: String,
    pub description: String,
    pub date: String,
    pub category: String,
    pub category_name: String,
    pub slug: String,
    pub last_modified: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Document {
    pub metadata: FrontMatter,
    pub body: String,
}

/// Splits a leading `---` block off `document` and reads its fields.
///
/// Never fails: a missing or unreadable block yields default metadata, and
/// in the missing case the whole input is the body.
pub fn parse(document: &str) -> Document {
    let document = document.trim_start_matches('\u{feff}');
    let Some((yaml, body)) = split_block(document) else {
        return Document {
            metadata: FrontMatter::default(),
            body: document.to_string(),
        };
    };

    Document {
        metadata: read_fields(yaml),
        body: body.to_string(),
    }
}

/// Emits the metadata block followed by `body`, quoting values that would
/// otherwise not read back as the same string.
pub fn serialize(body: &str, metadata: &FrontMatter) -> String {
    let fields = [
        ("title", &metadata.title),
        ("description", &metadata.description),
        ("date", &metadata.date),
        ("category", &metadata.category),
        ("categoryName", &metadata.category_name),
        ("slug", &metadata.slug),
        ("lastModified", &metadata.last_modified),
    ];

    let mut out = String::with_capacity(body.len() + 256);
    out.push_str(DELIMITER);
    out.push('\n');
    for (key, value) in fields {
        out.push_str(key);
        out.push_str(": ");
        out.push_str(&yaml_scalar(value));
        out.push('\n');
    }
    out.push_str(DELIMITER);
    out.push('\n');
    out.push_str(body);
    out
}

fn split_block(document: &str) -> Option<(&str, &str)> {
    let rest = document.strip_prefix(DELIMITER)?;
    let rest = rest
        .strip_prefix("\r\n")
        .or_else(|| rest.strip_prefix('\n'))?;

    let mut offset = 0;
    for line in rest.split_inclusive('\n') {
        if line.trim_end_matches(&['\r', '\n'][..]) == DELIMITER {
            return Some((&rest[..offset], &rest[offset + line.len()..]));
        }
        offset += line.len();
    }
    None
}

fn read_fields(yaml: &str) -> FrontMatter {
    let Ok(Value::Mapping(map)) = serde_yaml::from_str::<Value>(yaml) else {
        return FrontMatter::default();
    };

    let field = |key: &str| map.get(key).map(scalar_to_string).unwrap_or_default();
    FrontMatter {
        title: field("title"),
        description: field("description"),
        date: field("date"),
        category: field("category"),
        category_name: field("categoryName"),
        slug: field("slug"),
        last_modified: field("lastModified"),
    }
}

fn scalar_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Tagged(tagged) => scalar_to_string(&tagged.value),
        Value::Null | Value::Sequence(_) | Value::Mapping(_) => String::new(),
    }
}

fn yaml_scalar(value: &str) -> String {
    if reads_back_plain(value) {
        value.to_string()
    } else {
        quote(value)
    }
}

fn reads_back_plain(value: &str) -> bool {
    if value.is_empty() || value.starts_with('-') || value.contains(SIGNIFICANT) {
        return false;
    }
    if value
        .chars()
        .any(|c| needs_escape(c) || c == '"' || c == '\'' || c == '\\')
    {
        return false;
    }
    // Catches booleans, nulls, numbers and surrounding whitespace.
    matches!(serde_yaml::from_str::<Value>(value), Ok(Value::String(s)) if s == value)
}

/// Characters the YAML reader rejects in raw input or treats as line breaks.
fn needs_escape(c: char) -> bool {
    c.is_control() || matches!(c, '\u{2028}' | '\u{2029}' | '\u{FEFF}' | '\u{FFFE}' | '\u{FFFF}')
}

fn quote(value: &str) -> String {
    let mut out = String::with_capacity(value.len() + 2);
    out.push('"');
    for c in value.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if needs_escape(c) => out.push_str(&format!("\\u{:04X}", c as u32)),
            c => out.push(c),
        }
    }
    out.push('"');
    out
}
