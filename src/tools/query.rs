use chrono::{NaiveDate, Utc};
use serde::Deserialize;
use serde_json::Value as Json;

use super::{Envelope, Gateway, bind};
use crate::error::GatewayError;
use crate::paths;

/// Search, listing, and vault-wide query handlers.

#[derive(Debug, Deserialize, schemars::JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct PingRequest {}

pub async fn ping(_gateway: &Gateway, args: Json) -> Result<Envelope, GatewayError> {
    let _: PingRequest = bind(args)?;
    Ok(Envelope::json(serde_json::json!({
        "text": "pong",
        "timestamp": Utc::now().to_rfc3339(),
    })))
}

fn optional_folder(folder: &Option<String>) -> Result<Option<String>, GatewayError> {
    match folder {
        None => Ok(None),
        Some(folder) => {
            let canonical = paths::folder_path(folder)?;
            Ok(if canonical.is_empty() {
                None
            } else {
                Some(canonical)
            })
        }
    }
}

#[derive(Debug, Deserialize, schemars::JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct SearchNotesRequest {
    #[schemars(description = "Search query for the plugin's simple search")]
    pub query: String,
    #[schemars(description = "Optional folder to scope the search to")]
    pub folder: Option<String>,
}

pub async fn search_notes(gateway: &Gateway, args: Json) -> Result<Envelope, GatewayError> {
    let req: SearchNotesRequest = bind(args)?;
    if req.query.trim().is_empty() {
        return Err(GatewayError::InvalidArgs("query cannot be empty".into()));
    }
    let folder = optional_folder(&req.folder)?;

    let hits = gateway.vault.search(&req.query, folder.as_deref()).await?;
    let count = hits.len();
    Ok(Envelope::json(serde_json::to_value(hits).unwrap_or_default())
        .with_metadata(serde_json::json!({ "count": count, "query": req.query })))
}

#[derive(Debug, Deserialize, schemars::JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct ListNotesRequest {
    #[schemars(description = "Optional folder to list (default: whole vault)")]
    pub folder: Option<String>,
    #[serde(default)]
    #[schemars(description = "Also extract each note's header block (default false)")]
    pub include_headers: bool,
}

pub async fn list_notes(gateway: &Gateway, args: Json) -> Result<Envelope, GatewayError> {
    let req: ListNotesRequest = bind(args)?;
    let folder = optional_folder(&req.folder)?;

    let notes = gateway
        .vault
        .list_notes(folder.as_deref(), req.include_headers)
        .await?;
    let count = notes.len();
    Ok(
        Envelope::json(serde_json::to_value(notes).unwrap_or_default())
            .with_metadata(serde_json::json!({ "count": count })),
    )
}

#[derive(Debug, Deserialize, schemars::JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct VaultStructureRequest {
    #[serde(default = "default_true")]
    #[schemars(description = "Serve from the structure cache when fresh (default true)")]
    pub use_cache: bool,
}

fn default_true() -> bool {
    true
}

pub async fn get_vault_structure(gateway: &Gateway, args: Json) -> Result<Envelope, GatewayError> {
    let req: VaultStructureRequest = bind(args)?;
    let structure = gateway.vault.structure(req.use_cache).await?;
    let metadata = serde_json::json!({
        "total_notes": structure.total_notes,
        "total_folders": structure.total_folders,
    });
    Ok(
        Envelope::json(serde_json::to_value(structure).unwrap_or_default())
            .with_metadata(metadata),
    )
}

#[derive(Debug, Deserialize, schemars::JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct ExecuteCommandRequest {
    #[schemars(description = "Name of the upstream command to run")]
    pub command: String,
    #[schemars(description = "Optional command parameters, passed through opaquely")]
    pub parameters: Option<Json>,
}

pub async fn execute_command(gateway: &Gateway, args: Json) -> Result<Envelope, GatewayError> {
    let req: ExecuteCommandRequest = bind(args)?;
    if req.command.trim().is_empty() {
        return Err(GatewayError::InvalidArgs("command cannot be empty".into()));
    }

    let result = gateway
        .vault
        .execute_command(&req.command, req.parameters.as_ref())
        .await?;
    Ok(Envelope::json(result).with_metadata(serde_json::json!({ "command": req.command })))
}

#[derive(Debug, Deserialize, schemars::JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct KeywordSearchRequest {
    #[schemars(description = "Keyword to scan note bodies for")]
    pub keyword: String,
    #[schemars(description = "Optional folder to scope the scan to")]
    pub folder: Option<String>,
    #[serde(default)]
    #[schemars(description = "Match case exactly (default false)")]
    pub case_sensitive: bool,
    #[schemars(description = "Stop after this many hits")]
    pub limit: Option<usize>,
}

pub async fn keyword_search(gateway: &Gateway, args: Json) -> Result<Envelope, GatewayError> {
    let req: KeywordSearchRequest = bind(args)?;
    if req.keyword.is_empty() {
        return Err(GatewayError::InvalidArgs("keyword cannot be empty".into()));
    }
    let folder = optional_folder(&req.folder)?;

    let hits = gateway
        .vault
        .keyword_search(
            &req.keyword,
            folder.as_deref(),
            req.case_sensitive,
            req.limit,
        )
        .await?;
    let count = hits.len();
    Ok(Envelope::json(serde_json::to_value(hits).unwrap_or_default())
        .with_metadata(serde_json::json!({ "count": count, "keyword": req.keyword })))
}

#[derive(Debug, Deserialize, schemars::JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct ListDailyNotesRequest {
    #[schemars(description = "Inclusive range start, YYYY-MM-DD")]
    pub start_date: String,
    #[schemars(description = "Inclusive range end, YYYY-MM-DD")]
    pub end_date: String,
}

fn parse_date(field: &str, value: &str) -> Result<NaiveDate, GatewayError> {
    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .map_err(|_| GatewayError::InvalidArgs(format!("{field} must be YYYY-MM-DD, got '{value}'")))
}

pub async fn list_daily_notes(gateway: &Gateway, args: Json) -> Result<Envelope, GatewayError> {
    let req: ListDailyNotesRequest = bind(args)?;
    let start = parse_date("start_date", &req.start_date)?;
    let end = parse_date("end_date", &req.end_date)?;
    if start > end {
        return Err(GatewayError::InvalidArgs(
            "start_date is after end_date".into(),
        ));
    }

    let notes = gateway.vault.daily_notes_between(start, end).await?;
    let count = notes.len();
    Ok(
        Envelope::json(serde_json::to_value(notes).unwrap_or_default())
            .with_metadata(serde_json::json!({ "count": count })),
    )
}
