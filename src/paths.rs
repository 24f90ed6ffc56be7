use crate::error::GatewayError;

/// Vault path policy. Paths are vault-relative, forward-slash separated,
/// and notes carry a `.md` suffix. Everything that touches the upstream
/// plugin goes through here first, so traversal is rejected before any I/O.

fn err(msg: impl Into<String>) -> GatewayError {
    GatewayError::InvalidArgs(msg.into())
}

/// Collapse `//`, strip a leading `./`, and reject anything that could
/// escape the vault. Returns the canonical form.
pub fn canonicalize(path: &str) -> Result<String, GatewayError> {
    if path.is_empty() {
        return Err(err("path cannot be empty"));
    }
    if path.contains('\0') {
        return Err(err("path cannot contain null bytes"));
    }
    if path.contains('\\') {
        return Err(err("path must use forward slashes"));
    }
    if path.starts_with('/') {
        return Err(err("path must be vault-relative, not absolute"));
    }

    let mut trimmed = path;
    while let Some(rest) = trimmed.strip_prefix("./") {
        trimmed = rest;
    }

    let segments: Vec<&str> = trimmed.split('/').filter(|s| !s.is_empty()).collect();
    if segments.is_empty() {
        return Err(err("path cannot be empty"));
    }
    if segments.iter().any(|s| *s == "." || *s == "..") {
        return Err(err("path cannot contain '.' or '..' segments"));
    }

    Ok(segments.join("/"))
}

/// Canonical note path: everything `canonicalize` enforces, plus the `.md`
/// suffix.
pub fn note_path(path: &str) -> Result<String, GatewayError> {
    let canonical = canonicalize(path)?;
    if !canonical.ends_with(".md") {
        return Err(err("note path must end with .md"));
    }
    Ok(canonical)
}

/// Canonical folder path. Empty input means the vault root. A trailing
/// slash is tolerated and stripped.
pub fn folder_path(path: &str) -> Result<String, GatewayError> {
    let stripped = path.trim_end_matches('/');
    if stripped.is_empty() {
        return Ok(String::new());
    }
    canonicalize(stripped)
}

/// Percent-encode each segment independently. The `/` separators are never
/// encoded.
pub fn encode(path: &str) -> String {
    path.split('/')
        .map(|seg| urlencoding::encode(seg).into_owned())
        .collect::<Vec<_>>()
        .join("/")
}

/// Final path segment (the note or folder name).
pub fn name_of(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

/// Parent folder of a path, or `None` at the vault root.
pub fn parent_of(path: &str) -> Option<&str> {
    path.rsplit_once('/').map(|(parent, _)| parent)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_traversal_before_io() {
        assert!(note_path("../etc/passwd.md").is_err());
        assert!(note_path("a/../b.md").is_err());
        assert!(note_path("/abs/a.md").is_err());
        assert!(note_path("a\\b.md").is_err());
        assert!(note_path("a\0b.md").is_err());
        assert!(note_path("").is_err());
    }

    #[test]
    fn canonicalizes_noise() {
        assert_eq!(note_path("./t/a.md").unwrap(), "t/a.md");
        assert_eq!(note_path("t//a.md").unwrap(), "t/a.md");
        assert_eq!(canonicalize("a/b/c").unwrap(), "a/b/c");
    }

    #[test]
    fn notes_need_md_suffix() {
        assert!(note_path("t/a").is_err());
        assert!(note_path("t/a.md").is_ok());
    }

    #[test]
    fn folder_paths() {
        assert_eq!(folder_path("").unwrap(), "");
        assert_eq!(folder_path("projects/").unwrap(), "projects");
        assert_eq!(folder_path("a/b").unwrap(), "a/b");
        assert!(folder_path("../up").is_err());
    }

    #[test]
    fn encodes_segments_not_separators() {
        assert_eq!(encode("a b/c.md"), "a%20b/c.md");
        assert_eq!(encode("daily-notes/2025-02-04.md"), "daily-notes/2025-02-04.md");
    }

    #[test]
    fn name_and_parent() {
        assert_eq!(name_of("a/b/c.md"), "c.md");
        assert_eq!(name_of("c.md"), "c.md");
        assert_eq!(parent_of("a/b/c.md"), Some("a/b"));
        assert_eq!(parent_of("c.md"), None);
    }
}
