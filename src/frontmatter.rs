use chrono::NaiveDate;
use serde_json::{Map, Value as Json};

/// Structured header block ("frontmatter") support. The block is delimited
/// by a line of exactly three hyphens at byte 0 and again at the end.
/// Between the delimiters: `key: value` lines, with list items on indented
/// `- ` lines. A note without a valid opening delimiter at byte 0 has no
/// header block at all.

pub const DELIMITER: &str = "---";

/// Scalar or list value of a header entry.
#[derive(Debug, Clone, PartialEq)]
pub enum HeaderValue {
    Str(String),
    Int(i64),
    Float(f64),
    Bool(bool),
    Date(NaiveDate),
    List(Vec<String>),
}

impl HeaderValue {
    fn parse_scalar(raw: &str) -> HeaderValue {
        let trimmed = raw.trim();
        match trimmed {
            "true" => return HeaderValue::Bool(true),
            "false" => return HeaderValue::Bool(false),
            _ => {}
        }
        if let Ok(i) = trimmed.parse::<i64>() {
            return HeaderValue::Int(i);
        }
        if let Ok(f) = trimmed.parse::<f64>() {
            return HeaderValue::Float(f);
        }
        if let Ok(d) = NaiveDate::parse_from_str(trimmed, "%Y-%m-%d") {
            return HeaderValue::Date(d);
        }
        let unquoted = trimmed
            .strip_prefix('"')
            .and_then(|s| s.strip_suffix('"'))
            .or_else(|| trimmed.strip_prefix('\'').and_then(|s| s.strip_suffix('\'')))
            .unwrap_or(trimmed);
        HeaderValue::Str(unquoted.to_string())
    }

    pub fn as_date(&self) -> Option<NaiveDate> {
        match self {
            HeaderValue::Date(d) => Some(*d),
            HeaderValue::Str(s) => NaiveDate::parse_from_str(s, "%Y-%m-%d").ok(),
            _ => None,
        }
    }

    pub fn to_json(&self) -> Json {
        match self {
            HeaderValue::Str(s) => Json::String(s.clone()),
            HeaderValue::Int(i) => Json::from(*i),
            HeaderValue::Float(f) => {
                serde_json::Number::from_f64(*f).map(Json::Number).unwrap_or(Json::Null)
            }
            HeaderValue::Bool(b) => Json::Bool(*b),
            HeaderValue::Date(d) => Json::String(d.format("%Y-%m-%d").to_string()),
            HeaderValue::List(items) => {
                Json::Array(items.iter().map(|i| Json::String(i.clone())).collect())
            }
        }
    }

    fn render(&self) -> String {
        match self {
            HeaderValue::Str(s) => s.clone(),
            HeaderValue::Int(i) => i.to_string(),
            HeaderValue::Float(f) => f.to_string(),
            HeaderValue::Bool(b) => b.to_string(),
            HeaderValue::Date(d) => d.format("%Y-%m-%d").to_string(),
            HeaderValue::List(_) => unreachable!("lists render multi-line"),
        }
    }
}

/// An order-preserving header block. Updates keep the original key order so
/// a rewrite of the note does not shuffle the header.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HeaderBlock {
    entries: Vec<(String, HeaderValue)>,
}

impl HeaderBlock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, key: &str) -> Option<&HeaderValue> {
        self.entries.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    /// Insert or replace, preserving position on replace.
    pub fn set(&mut self, key: impl Into<String>, value: HeaderValue) {
        let key = key.into();
        match self.entries.iter_mut().find(|(k, _)| *k == key) {
            Some((_, v)) => *v = value,
            None => self.entries.push((key, value)),
        }
    }

    pub fn remove(&mut self, key: &str) {
        self.entries.retain(|(k, _)| k != key);
    }

    pub fn iter(&self) -> impl Iterator<Item = &(String, HeaderValue)> {
        self.entries.iter()
    }

    pub fn to_json(&self) -> Map<String, Json> {
        self.entries
            .iter()
            .map(|(k, v)| (k.clone(), v.to_json()))
            .collect()
    }

    /// Serialize back to wire form, trailing newline included.
    pub fn render(&self) -> String {
        let mut out = String::new();
        out.push_str(DELIMITER);
        out.push('\n');
        for (key, value) in &self.entries {
            match value {
                HeaderValue::List(items) => {
                    out.push_str(key);
                    out.push_str(":\n");
                    for item in items {
                        out.push_str("  - ");
                        out.push_str(item);
                        out.push('\n');
                    }
                }
                scalar => {
                    out.push_str(key);
                    out.push_str(": ");
                    out.push_str(&scalar.render());
                    out.push('\n');
                }
            }
        }
        out.push_str(DELIMITER);
        out.push('\n');
        out
    }
}

fn valid_key(key: &str) -> bool {
    let mut chars = key.chars();
    match chars.next() {
        Some(c) if c.is_ascii_lowercase() => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-' || c == '_')
}

/// Parse the header block at the top of `content`. Returns the block and
/// the byte offset where the body starts. `None` when there is no opening
/// delimiter at byte 0 or no closing delimiter at all - in both cases the
/// whole input is body.
pub fn parse(content: &str) -> Option<(HeaderBlock, usize)> {
    let mut offset = match content.strip_prefix(DELIMITER) {
        Some(rest) if rest.starts_with('\n') => DELIMITER.len() + 1,
        Some(rest) if rest.starts_with("\r\n") => DELIMITER.len() + 2,
        _ => return None,
    };

    let mut block = HeaderBlock::new();
    let mut open_list: Option<(String, Vec<String>)> = None;

    loop {
        let rest = &content[offset..];
        if rest.is_empty() {
            // Ran out of input without a closing delimiter.
            return None;
        }
        let (line, advance) = match rest.find('\n') {
            Some(pos) => (&rest[..pos], pos + 1),
            None => (rest, rest.len()),
        };
        offset += advance;
        let line = line.strip_suffix('\r').unwrap_or(line);

        if line == DELIMITER {
            if let Some((key, items)) = open_list.take() {
                block.set(key, HeaderValue::List(items));
            }
            return Some((block, offset));
        }

        // Indented `- ` lines continue the current list.
        if let Some(item) = list_item(line) {
            if let Some((_, items)) = open_list.as_mut() {
                items.push(item.to_string());
            }
            continue;
        }

        if let Some((key, items)) = open_list.take() {
            block.set(key, HeaderValue::List(items));
        }

        let Some((key, raw_value)) = line.split_once(':') else {
            // Not part of the grammar; tolerated and skipped.
            continue;
        };
        let key = key.trim_end();
        if !valid_key(key) {
            continue;
        }

        if raw_value.trim().is_empty() {
            open_list = Some((key.to_string(), Vec::new()));
        } else {
            block.set(key.to_string(), HeaderValue::parse_scalar(raw_value));
        }
    }
}

fn list_item(line: &str) -> Option<&str> {
    if !line.starts_with(' ') && !line.starts_with('\t') {
        return None;
    }
    line.trim_start().strip_prefix("- ").map(str::trim)
}

/// Split a note into its header block and body.
pub fn split(content: &str) -> (Option<HeaderBlock>, &str) {
    match parse(content) {
        Some((block, body_start)) => (Some(block), &content[body_start..]),
        None => (None, content),
    }
}

/// Header extraction over a byte-limited prefix, for lazy enrichment. The
/// cut lands on a char boundary; a block truncated past its closing
/// delimiter parses as absent.
pub fn parse_prefix(content: &str, max_bytes: usize) -> Option<HeaderBlock> {
    let mut end = max_bytes.min(content.len());
    while end > 0 && !content.is_char_boundary(end) {
        end -= 1;
    }
    parse(&content[..end]).map(|(block, _)| block)
}
