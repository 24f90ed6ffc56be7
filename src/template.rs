use chrono::{DateTime, Datelike, Local, NaiveDate};

use crate::frontmatter::{self, HeaderBlock, HeaderValue};
use crate::paths;

/// Template handling for note writes: selection by path prefix, header
/// synthesis on create, and the format-preserving merge on update.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TemplateKind {
    Daily,
    Project,
    Area,
}

impl TemplateKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TemplateKind::Daily => "daily",
            TemplateKind::Project => "project",
            TemplateKind::Area => "area",
        }
    }

    /// Header template for this kind. Tokens are resolved at creation time.
    fn header_template(&self) -> &'static str {
        match self {
            TemplateKind::Daily => {
                "---\ncreation-date: {{date:YYYY-MM-DD}}\ntype: daily-note\n---\n"
            }
            TemplateKind::Project => {
                "---\nstatus: active\ncreated: {{date:YYYY-MM-DD}}\ntype: project\n---\n"
            }
            TemplateKind::Area => "---\nreview-frequency: monthly\ntype: area\n---\n",
        }
    }
}

/// Selection table, first match wins. An `NN_` ordering prefix on the top
/// folder ("01_projects") selects the same template as the bare name.
const SELECTION: &[(&str, TemplateKind)] = &[
    ("daily-notes", TemplateKind::Daily),
    ("projects", TemplateKind::Project),
    ("areas", TemplateKind::Area),
];

fn strip_order_prefix(segment: &str) -> &str {
    match segment.split_once('_') {
        Some((digits, rest))
            if !digits.is_empty() && digits.chars().all(|c| c.is_ascii_digit()) =>
        {
            rest
        }
        _ => segment,
    }
}

/// Which template, if any, governs this path.
pub fn select(path: &str) -> Option<TemplateKind> {
    let first = path.split('/').next()?;
    let base = strip_order_prefix(first);
    SELECTION
        .iter()
        .find(|(prefix, _)| *prefix == base)
        .map(|(_, kind)| *kind)
}

fn resolve_token(token: &str, now: DateTime<Local>) -> Option<String> {
    let (kind, fmt) = token.split_once(':')?;
    match (kind.trim(), fmt.trim()) {
        ("date", "YYYY-MM-DD") => Some(now.format("%Y-%m-%d").to_string()),
        ("date", "YYYY") => Some(now.format("%Y").to_string()),
        ("time", "HH:mm") => Some(now.format("%H:%M").to_string()),
        _ => None,
    }
}

/// Single substitution pass over the `{{...}}` token vocabulary. Tokens
/// outside the vocabulary are removed rather than persisted literally.
pub fn substitute_tokens(input: &str, now: DateTime<Local>) -> String {
    let mut out = String::with_capacity(input.len());
    let mut rest = input;
    while let Some(start) = rest.find("{{") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        match after.find("}}") {
            Some(end) => {
                if let Some(value) = resolve_token(after[..end].trim(), now) {
                    out.push_str(&value);
                }
                rest = &after[end + 2..];
            }
            None => {
                // Unclosed braces are plain text, not a token.
                out.push_str(&rest[start..]);
                return out;
            }
        }
    }
    out.push_str(rest);
    out
}

/// Create-path templating. Returns the content to persist and the template
/// that was actually applied. The template header is only prepended when
/// the caller's body does not already begin with a header block.
pub fn apply_create(
    path: &str,
    content: &str,
    use_template: bool,
    now: DateTime<Local>,
) -> (String, Option<TemplateKind>) {
    if !use_template {
        return (content.to_string(), None);
    }
    let Some(kind) = select(path) else {
        return (content.to_string(), None);
    };
    if frontmatter::parse(content).is_some() {
        return (content.to_string(), None);
    }

    let header = substitute_tokens(kind.header_template(), now);
    (format!("{header}\n{content}"), Some(kind))
}

fn drop_broken_tokens(block: &HeaderBlock) -> HeaderBlock {
    let mut cleaned = HeaderBlock::new();
    for (key, value) in block.iter() {
        match value {
            HeaderValue::Str(s) if s.contains("{{") => continue,
            HeaderValue::List(items) => {
                let kept: Vec<String> = items
                    .iter()
                    .filter(|item| !item.contains("{{"))
                    .cloned()
                    .collect();
                cleaned.set(key.clone(), HeaderValue::List(kept));
            }
            other => cleaned.set(key.clone(), other.clone()),
        }
    }
    cleaned
}

/// Format-preserving update: the existing header survives, keys present in
/// the incoming content override, broken template tokens are dropped, and
/// the body is replaced wholesale with the incoming body.
pub fn merge_preserving(existing: &str, incoming: &str) -> String {
    let (old_block, _) = frontmatter::split(existing);
    let (new_block, new_body) = frontmatter::split(incoming);

    let mut merged = old_block.unwrap_or_default();
    if let Some(new_block) = new_block {
        for (key, value) in new_block.iter() {
            merged.set(key.clone(), value.clone());
        }
    }
    let merged = drop_broken_tokens(&merged);

    if merged.is_empty() {
        new_body.to_string()
    } else {
        format!("{}{}", merged.render(), new_body)
    }
}

/// Date carried by a daily note's filename, when the path is governed by
/// the daily template.
pub fn daily_file_date(path: &str) -> Option<NaiveDate> {
    if select(path) != Some(TemplateKind::Daily) {
        return None;
    }
    let stem = paths::name_of(path).strip_suffix(".md")?;
    NaiveDate::parse_from_str(stem, "%Y-%m-%d").ok()
}

fn first_heading_year(body: &str) -> Option<i32> {
    let heading = body.lines().find(|line| line.starts_with("# "))?;
    let mut run = String::new();
    for c in heading.chars() {
        if c.is_ascii_digit() {
            run.push(c);
        } else {
            if run.len() == 4 {
                break;
            }
            run.clear();
        }
    }
    if run.len() >= 4 {
        run[..4].parse().ok()
    } else {
        None
    }
}

/// Advisory date-mismatch check for updates to daily notes. The write
/// proceeds either way; disagreements surface as envelope warnings.
pub fn daily_date_warnings(path: &str, incoming: &str) -> Vec<String> {
    let Some(file_date) = daily_file_date(path) else {
        return Vec::new();
    };

    let mut warnings = Vec::new();
    let (block, body) = frontmatter::split(incoming);

    if let Some(creation) = block
        .as_ref()
        .and_then(|b| b.get("creation-date"))
        .and_then(|v| v.as_date())
        && creation != file_date
    {
        warnings.push(format!(
            "creation-date {creation} disagrees with the filename date {file_date}"
        ));
    }

    if let Some(year) = first_heading_year(body)
        && year != file_date.year()
    {
        warnings.push(format!(
            "first heading year {year} disagrees with the filename date {file_date}"
        ));
    }

    warnings
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(y: i32, m: u32, d: u32) -> DateTime<Local> {
        Local.with_ymd_and_hms(y, m, d, 9, 30, 0).unwrap()
    }

    #[test]
    fn selection_by_first_segment() {
        assert_eq!(select("daily-notes/2025-02-04.md"), Some(TemplateKind::Daily));
        assert_eq!(select("01_daily-notes/2025-02-04.md"), Some(TemplateKind::Daily));
        assert_eq!(select("02_projects/gateway.md"), Some(TemplateKind::Project));
        assert_eq!(select("areas/health.md"), Some(TemplateKind::Area));
        assert_eq!(select("inbox/todo.md"), None);
        // A note at the vault root never matches a folder prefix.
        assert_eq!(select("projects.md"), None);
        // The ordering prefix must be purely numeric.
        assert_eq!(select("x_projects/a.md"), None);
    }

    #[test]
    fn token_substitution() {
        let now = at(2025, 2, 4);
        assert_eq!(
            substitute_tokens("on {{date:YYYY-MM-DD}} at {{time:HH:mm}}", now),
            "on 2025-02-04 at 09:30"
        );
        assert_eq!(substitute_tokens("year {{date:YYYY}}", now), "year 2025");
    }

    #[test]
    fn unresolved_tokens_are_removed_not_persisted() {
        let now = at(2025, 2, 4);
        assert_eq!(substitute_tokens("a {{title}} b", now), "a  b");
        assert_eq!(substitute_tokens("a {{date:MM/DD}} b", now), "a  b");
        // Unclosed braces are not a token.
        assert_eq!(substitute_tokens("a {{oops", now), "a {{oops");
    }

    #[test]
    fn create_prepends_daily_header() {
        let (content, kind) =
            apply_create("daily-notes/2025-02-04.md", "# day", true, at(2025, 2, 4));
        assert_eq!(kind, Some(TemplateKind::Daily));
        assert!(content.starts_with("---\ncreation-date: 2025-02-04\ntype: daily-note\n---\n"));
        assert!(content.contains("# day"));
    }

    #[test]
    fn create_respects_existing_header_and_opt_out() {
        let body = "---\ntype: custom\n---\nx";
        let (content, kind) =
            apply_create("daily-notes/2025-02-04.md", body, true, at(2025, 2, 4));
        assert_eq!(kind, None);
        assert_eq!(content, body);

        let (content, kind) = apply_create("daily-notes/2025-02-04.md", "x", false, at(2025, 2, 4));
        assert_eq!(kind, None);
        assert_eq!(content, "x");
    }

    #[test]
    fn merge_keeps_existing_keys_and_takes_caller_values() {
        let existing = "---\nstatus: active\ncreated: 2025-01-01\ntype: project\n---\nold body\n";
        let incoming = "---\nstatus: done\n---\nnew body\n";
        let merged = merge_preserving(existing, incoming);
        assert_eq!(
            merged,
            "---\nstatus: done\ncreated: 2025-01-01\ntype: project\n---\nnew body\n"
        );
    }

    #[test]
    fn merge_drops_broken_tokens() {
        let existing = "---\ncreated: {{date:YYYY-MM-DD}}\ntype: project\n---\nb\n";
        let incoming = "body only\n";
        let merged = merge_preserving(existing, incoming);
        assert_eq!(merged, "---\ntype: project\n---\nbody only\n");
    }

    #[test]
    fn merge_without_any_header_is_body_only() {
        assert_eq!(merge_preserving("plain old", "plain new"), "plain new");
    }

    #[test]
    fn daily_warnings_name_both_dates() {
        let warnings = daily_date_warnings(
            "daily-notes/2025-02-04.md",
            "---\ncreation-date: 2026-02-04\n---\n# 2026",
        );
        assert_eq!(warnings.len(), 2);
        assert!(warnings[0].contains("2026-02-04"));
        assert!(warnings[0].contains("2025-02-04"));
        assert!(warnings[1].contains("2026"));
        assert!(warnings[1].contains("2025-02-04"));
    }

    #[test]
    fn daily_warnings_quiet_when_dates_agree() {
        let warnings = daily_date_warnings(
            "daily-notes/2025-02-04.md",
            "---\ncreation-date: 2025-02-04\n---\n# 2025-02-04",
        );
        assert!(warnings.is_empty());
        assert!(daily_date_warnings("notes/a.md", "# 1999").is_empty());
    }
}
