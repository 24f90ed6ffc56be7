use chrono::Local;
use serde::Deserialize;
use serde_json::Value as Json;

use super::{Envelope, Gateway, bind};
use crate::error::GatewayError;
use crate::frontmatter;
use crate::paths;
use crate::template;

/// Note CRUD handlers. Every path is canonicalized and policy-checked
/// before the first upstream call.

fn default_true() -> bool {
    true
}

fn default_separator() -> String {
    "\n\n".to_string()
}

#[derive(Debug, Deserialize, schemars::JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct ReadNoteRequest {
    #[schemars(description = "Vault-relative note path, e.g. 'projects/gateway.md'")]
    pub path: String,
}

pub async fn read_note(gateway: &Gateway, args: Json) -> Result<Envelope, GatewayError> {
    let req: ReadNoteRequest = bind(args)?;
    let path = paths::note_path(&req.path)?;

    let body = gateway.vault.read_note(&path).await?;
    let stat = gateway.vault.note_stat(&path).await?;
    let (headers, _) = frontmatter::split(&body);

    let metadata = serde_json::json!({
        "path": path,
        "name": paths::name_of(&path),
        "size_bytes": stat.size,
        "modified_at": stat.modified,
        "created_at": stat.created,
        "headers": headers.map(|h| h.to_json()),
    });
    Ok(Envelope::text(body).with_metadata(metadata))
}

#[derive(Debug, Deserialize, schemars::JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct CreateNoteRequest {
    #[schemars(description = "Vault-relative path for the new note")]
    pub path: String,
    #[schemars(description = "Markdown body of the note")]
    pub content: String,
    #[serde(default = "default_true")]
    #[schemars(description = "Apply the path-matched header template (default true)")]
    pub use_template: bool,
    #[serde(default = "default_true")]
    #[schemars(description = "Create missing parent folders (default true)")]
    pub create_folders: bool,
}

pub async fn create_note(gateway: &Gateway, args: Json) -> Result<Envelope, GatewayError> {
    let req: CreateNoteRequest = bind(args)?;
    let path = paths::note_path(&req.path)?;

    // Creating over an existing note is a conflict, not an overwrite.
    match gateway.vault.note_stat(&path).await {
        Ok(_) => return Err(GatewayError::Conflict(format!("{path} already exists"))),
        Err(GatewayError::NotFound(_)) => {}
        Err(e) => return Err(e),
    }

    let (content, applied) =
        template::apply_create(&path, &req.content, req.use_template, Local::now());
    gateway
        .vault
        .put_note(&path, &content, req.create_folders)
        .await?;

    let metadata = serde_json::json!({
        "path": path,
        "template": applied.map(|kind| kind.as_str()),
    });
    Ok(Envelope::text(format!("Created {path}")).with_metadata(metadata))
}

#[derive(Debug, Deserialize, schemars::JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct UpdateNoteRequest {
    #[schemars(description = "Vault-relative path of the note to update")]
    pub path: String,
    #[schemars(description = "New content for the note")]
    pub content: String,
    #[serde(default = "default_true")]
    #[schemars(
        description = "Keep the existing header block, merging in keys from the new content (default true)"
    )]
    pub preserve_format: bool,
}

pub async fn update_note(gateway: &Gateway, args: Json) -> Result<Envelope, GatewayError> {
    let req: UpdateNoteRequest = bind(args)?;
    let path = paths::note_path(&req.path)?;

    let existing = gateway.vault.read_note(&path).await?;

    let content = if req.preserve_format {
        template::merge_preserving(&existing, &req.content)
    } else {
        req.content.clone()
    };

    // Advisory only: a disagreeing date never blocks the write.
    let warnings = template::daily_date_warnings(&path, &req.content);

    gateway.vault.put_note(&path, &content, true).await?;

    Ok(Envelope::text(format!("Updated {path}"))
        .with_metadata(serde_json::json!({ "path": path }))
        .with_warnings(warnings))
}

#[derive(Debug, Deserialize, schemars::JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct AppendNoteRequest {
    #[schemars(description = "Vault-relative path of the note to append to")]
    pub path: String,
    #[schemars(description = "Content to append")]
    pub content: String,
    #[serde(default = "default_separator")]
    #[schemars(description = "Separator between the current body and the appended content")]
    pub separator: String,
}

pub async fn append_note(gateway: &Gateway, args: Json) -> Result<Envelope, GatewayError> {
    let req: AppendNoteRequest = bind(args)?;
    let path = paths::note_path(&req.path)?;

    let existing = gateway.vault.read_note(&path).await?;
    let combined = format!("{existing}{}{}", req.separator, req.content);
    gateway.vault.put_note(&path, &combined, false).await?;

    Ok(Envelope::text(format!("Appended to {path}"))
        .with_metadata(serde_json::json!({ "path": path })))
}

#[derive(Debug, Deserialize, schemars::JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct DeleteNoteRequest {
    #[schemars(description = "Vault-relative path of the note to delete")]
    pub path: String,
}

pub async fn delete_note(gateway: &Gateway, args: Json) -> Result<Envelope, GatewayError> {
    let req: DeleteNoteRequest = bind(args)?;
    let path = paths::note_path(&req.path)?;

    gateway.vault.delete_note(&path).await?;

    Ok(Envelope::text(format!("Deleted {path}"))
        .with_metadata(serde_json::json!({ "path": path })))
}

#[derive(Debug, Deserialize, schemars::JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct CheckNoteExistsRequest {
    #[schemars(description = "Vault-relative note path to check")]
    pub path: String,
}

pub async fn check_note_exists(gateway: &Gateway, args: Json) -> Result<Envelope, GatewayError> {
    let req: CheckNoteExistsRequest = bind(args)?;
    let path = paths::note_path(&req.path)?;

    let data = match gateway.vault.note_stat(&path).await {
        Ok(stat) => serde_json::json!({
            "path": path,
            "exists": true,
            "modified": stat.modified,
        }),
        Err(GatewayError::NotFound(_)) => serde_json::json!({
            "path": path,
            "exists": false,
        }),
        Err(e) => return Err(e),
    };
    Ok(Envelope::json(data))
}
