use serde::Serialize;
use serde_json::Value as Json;

use crate::error::GatewayError;
use crate::frontmatter;
use crate::paths;
use crate::tools::Gateway;

/// Read-only URI-addressed view of the vault. The scheme string is a
/// deployment constant; the grammar is `vault://notes/` for the root
/// listing, a trailing slash for folders, anything else for a note body.

const ROOT_URI: &str = "vault://notes/";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResourceTarget {
    /// Empty string means the vault root.
    Folder(String),
    Note(String),
}

fn bad(uri: &str, why: &str) -> GatewayError {
    GatewayError::BadUri(format!("{uri}: {why}"))
}

fn decode_segments(uri: &str, raw: &str) -> Result<String, GatewayError> {
    let segments: Result<Vec<String>, _> = raw
        .split('/')
        .map(|seg| urlencoding::decode(seg).map(|c| c.into_owned()))
        .collect();
    segments
        .map(|s| s.join("/"))
        .map_err(|_| bad(uri, "invalid percent-encoding"))
}

pub fn parse_uri(uri: &str) -> Result<ResourceTarget, GatewayError> {
    let rest = uri
        .strip_prefix("vault://")
        .ok_or_else(|| bad(uri, "unknown scheme"))?;
    let rest = rest
        .strip_prefix("notes")
        .ok_or_else(|| bad(uri, "unknown resource root"))?;

    if rest.is_empty() || rest == "/" {
        return Ok(ResourceTarget::Folder(String::new()));
    }
    let Some(rest) = rest.strip_prefix('/') else {
        return Err(bad(uri, "unknown resource root"));
    };

    let decoded = decode_segments(uri, rest)?;
    if decoded.ends_with('/') {
        let folder = paths::folder_path(&decoded).map_err(|_| bad(uri, "path escapes the vault"))?;
        Ok(ResourceTarget::Folder(folder))
    } else {
        let note = paths::note_path(&decoded).map_err(|_| bad(uri, "path escapes the vault"))?;
        Ok(ResourceTarget::Note(note))
    }
}

pub fn note_uri(path: &str) -> String {
    format!("{ROOT_URI}{}", paths::encode(path))
}

pub fn folder_uri(path: &str) -> String {
    if path.is_empty() {
        ROOT_URI.to_string()
    } else {
        format!("{ROOT_URI}{}/", paths::encode(path))
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ResourceEntry {
    pub uri: String,
    pub name: String,
    #[serde(rename = "mimeType")]
    pub mime_type: String,
}

/// A resolved resource: the body plus a parallel metadata block.
#[derive(Debug, Clone, Serialize)]
pub struct ResourceContent {
    pub uri: String,
    #[serde(rename = "mimeType")]
    pub mime_type: String,
    pub text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Json>,
}

/// The vault root plus one entry per discovered folder and note. Served
/// from the structure cache when fresh.
pub async fn list(gateway: &Gateway) -> Result<Vec<ResourceEntry>, GatewayError> {
    let structure = gateway.vault.structure(true).await?;

    let mut entries = vec![ResourceEntry {
        uri: ROOT_URI.to_string(),
        name: "Vault root".to_string(),
        mime_type: "application/json".to_string(),
    }];
    entries.extend(structure.folders.iter().map(|folder| ResourceEntry {
        uri: folder_uri(&folder.path),
        name: folder.name.clone(),
        mime_type: "application/json".to_string(),
    }));
    entries.extend(structure.notes.iter().map(|note| ResourceEntry {
        uri: note_uri(&note.path),
        name: note.name.clone(),
        mime_type: "text/markdown".to_string(),
    }));
    Ok(entries)
}

pub async fn read(gateway: &Gateway, uri: &str) -> Result<ResourceContent, GatewayError> {
    match parse_uri(uri)? {
        ResourceTarget::Folder(folder) => read_folder(gateway, uri, &folder).await,
        ResourceTarget::Note(note) => read_note(gateway, uri, &note).await,
    }
}

async fn read_folder(
    gateway: &Gateway,
    uri: &str,
    folder: &str,
) -> Result<ResourceContent, GatewayError> {
    let structure = gateway.vault.structure(true).await?;

    if !folder.is_empty() && !structure.folders.iter().any(|f| f.path == folder) {
        return Err(GatewayError::NotFound(format!("folder {folder}")));
    }

    let folders: Vec<Json> = structure
        .folders
        .iter()
        .filter(|f| f.parent.as_deref().unwrap_or("") == folder)
        .map(|f| {
            serde_json::json!({
                "uri": folder_uri(&f.path),
                "name": f.name,
                "path": f.path,
                "notes_count": f.notes_count,
                "subfolders_count": f.subfolders_count,
            })
        })
        .collect();
    let notes: Vec<Json> = structure
        .notes
        .iter()
        .filter(|n| paths::parent_of(&n.path).unwrap_or("") == folder)
        .map(|n| {
            serde_json::json!({
                "uri": note_uri(&n.path),
                "name": n.name,
                "path": n.path,
                "size_bytes": n.size_bytes,
                "modified_at": n.modified_at,
            })
        })
        .collect();

    let body = serde_json::json!({
        "folder_path": folder,
        "total_items": folders.len() + notes.len(),
        "folders": folders,
        "notes": notes,
    });

    Ok(ResourceContent {
        uri: uri.to_string(),
        mime_type: "application/json".to_string(),
        text: serde_json::to_string_pretty(&body).unwrap_or_default(),
        metadata: None,
    })
}

async fn read_note(
    gateway: &Gateway,
    uri: &str,
    path: &str,
) -> Result<ResourceContent, GatewayError> {
    let body = gateway.vault.read_note(path).await?;
    let stat = gateway.vault.note_stat(path).await?;
    let (headers, _) = frontmatter::split(&body);

    Ok(ResourceContent {
        uri: uri.to_string(),
        mime_type: "text/markdown".to_string(),
        text: body,
        metadata: Some(serde_json::json!({
            "path": path,
            "size_bytes": stat.size,
            "modified_at": stat.modified,
            "headers": headers.map(|h| h.to_json()),
        })),
    })
}
