mod notes;
mod query;

use futures::future::BoxFuture;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value as Json;

use crate::error::GatewayError;
use crate::vault::Vault;

/// Shared state handed to every tool handler. Immutable after startup
/// apart from what the vault's own caches manage internally.
pub struct Gateway {
    pub vault: Vault,
}

/// One part of a tool result: prose or structured data.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ContentPart {
    Text { text: String },
    Json { data: Json },
}

/// The uniform result every tool returns. Handlers never emit raw strings;
/// anything user-visible goes through here.
#[derive(Debug, Clone, Default, Serialize)]
pub struct Envelope {
    pub content: Vec<ContentPart>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Json>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
}

impl Envelope {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            content: vec![ContentPart::Text { text: text.into() }],
            ..Self::default()
        }
    }

    pub fn json(data: Json) -> Self {
        Self {
            content: vec![ContentPart::Json { data }],
            ..Self::default()
        }
    }

    pub fn with_metadata(mut self, metadata: Json) -> Self {
        self.metadata = Some(metadata);
        self
    }

    pub fn with_warnings(mut self, warnings: Vec<String>) -> Self {
        self.warnings = warnings;
        self
    }
}

pub type HandlerFuture<'a> = BoxFuture<'a, Result<Envelope, GatewayError>>;
type Handler = for<'a> fn(&'a Gateway, Json) -> HandlerFuture<'a>;

pub struct ToolDef {
    /// Registered (prefixed) name.
    pub name: String,
    pub description: &'static str,
    pub schema: Json,
    handler: Handler,
}

/// Deserialize the arguments object into a typed request. Unknown keys are
/// rejected by `deny_unknown_fields` on every request struct, matching the
/// `additionalProperties: false` the published schemas advertise.
fn bind<T: DeserializeOwned>(args: Json) -> Result<T, GatewayError> {
    serde_json::from_value(args).map_err(|e| GatewayError::InvalidArgs(e.to_string()))
}

fn schema_value<T: schemars::JsonSchema>() -> Json {
    serde_json::to_value(schemars::schema_for!(T))
        .unwrap_or_else(|_| serde_json::json!({ "type": "object" }))
}

macro_rules! tool {
    ($name:literal, $desc:literal, $req:ty, $f:path) => {{
        fn call(gateway: &Gateway, args: Json) -> HandlerFuture<'_> {
            Box::pin($f(gateway, args))
        }
        (
            $name,
            ToolDef {
                name: String::new(),
                description: $desc,
                schema: schema_value::<$req>(),
                handler: call,
            },
        )
    }};
}

/// The tool catalogue. Populated once at startup, read-only after.
pub struct ToolRegistry {
    tools: Vec<ToolDef>,
}

impl ToolRegistry {
    /// Registers the full catalogue. Every tool name carries the
    /// configured namespace prefix except the system-level `ping`.
    pub fn new(prefix: &str) -> Self {
        let defs = [
            tool!("ping", "Liveness check. Returns pong and the server time.", query::PingRequest, query::ping),
            tool!(
                "search_notes",
                "Search the vault via the note plugin's simple search. Hits carry size and mtime metadata.",
                query::SearchNotesRequest,
                query::search_notes
            ),
            tool!(
                "read_note",
                "Read a note's body plus its stat metadata and parsed header block.",
                notes::ReadNoteRequest,
                notes::read_note
            ),
            tool!(
                "create_note",
                "Create a new note. Applies the path-matched header template unless told not to.",
                notes::CreateNoteRequest,
                notes::create_note
            ),
            tool!(
                "update_note",
                "Replace a note's content. By default the existing header block is preserved and merged.",
                notes::UpdateNoteRequest,
                notes::update_note
            ),
            tool!(
                "append_note",
                "Append content to an existing note, separated from the current body.",
                notes::AppendNoteRequest,
                notes::append_note
            ),
            tool!(
                "delete_note",
                "Delete a note from the vault.",
                notes::DeleteNoteRequest,
                notes::delete_note
            ),
            tool!(
                "list_notes",
                "List notes, optionally scoped to a folder and enriched with header blocks.",
                query::ListNotesRequest,
                query::list_notes
            ),
            tool!(
                "get_vault_structure",
                "Full folder/note tree of the vault with per-folder child counts.",
                query::VaultStructureRequest,
                query::get_vault_structure
            ),
            tool!(
                "execute_command",
                "Run a named command on the upstream note plugin.",
                query::ExecuteCommandRequest,
                query::execute_command
            ),
            tool!(
                "keyword_search",
                "Linear scan of note bodies for a keyword, with surrounding context per hit.",
                query::KeywordSearchRequest,
                query::keyword_search
            ),
            tool!(
                "check_note_exists",
                "Whether a note exists, and its mtime when it does.",
                notes::CheckNoteExistsRequest,
                notes::check_note_exists
            ),
            tool!(
                "list_daily_notes",
                "Daily notes whose filename date falls inside an inclusive range.",
                query::ListDailyNotesRequest,
                query::list_daily_notes
            ),
        ];

        let tools = defs
            .into_iter()
            .map(|(base, mut def)| {
                def.name = if base == "ping" {
                    base.to_string()
                } else {
                    format!("{prefix}{base}")
                };
                def
            })
            .collect();

        Self { tools }
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    /// Exact-name lookup and dispatch. Arguments are bound against the
    /// tool's schema inside the handler before any I/O happens.
    pub async fn dispatch(
        &self,
        gateway: &Gateway,
        name: &str,
        args: Json,
    ) -> Result<Envelope, GatewayError> {
        let def = self
            .tools
            .iter()
            .find(|def| def.name == name)
            .ok_or_else(|| GatewayError::UnknownTool(name.to_string()))?;
        (def.handler)(gateway, args).await
    }

    pub fn describe(&self) -> Vec<Json> {
        self.tools
            .iter()
            .map(|def| {
                serde_json::json!({
                    "name": def.name,
                    "description": def.description,
                    "inputSchema": def.schema,
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn catalogue_is_prefixed_except_ping() {
        let registry = ToolRegistry::new("obs_");
        assert_eq!(registry.len(), 13);

        let names: Vec<&str> = registry.tools.iter().map(|d| d.name.as_str()).collect();
        assert!(names.contains(&"ping"));
        assert!(names.contains(&"obs_read_note"));
        assert!(names.contains(&"obs_list_daily_notes"));
        assert!(!names.contains(&"read_note"));
        assert!(!names.contains(&"obs_ping"));
    }

    #[test]
    fn schemas_reject_extra_keys() {
        let registry = ToolRegistry::new("obs_");
        for def in &registry.tools {
            // Request structs all carry deny_unknown_fields; the published
            // schema must say so too.
            assert_eq!(
                def.schema.get("additionalProperties"),
                Some(&serde_json::json!(false)),
                "tool {} schema allows extra keys",
                def.name
            );
        }
    }

    #[test]
    fn envelope_serialization_shape() {
        let envelope = Envelope::text("pong")
            .with_metadata(serde_json::json!({ "k": 1 }))
            .with_warnings(vec!["careful".into()]);
        let value = serde_json::to_value(&envelope).unwrap();
        assert_eq!(value["content"][0]["type"], "text");
        assert_eq!(value["content"][0]["text"], "pong");
        assert_eq!(value["metadata"]["k"], 1);
        assert_eq!(value["warnings"][0], "careful");

        // Empty warnings and metadata stay off the wire.
        let bare = serde_json::to_value(Envelope::text("x")).unwrap();
        assert!(bare.get("metadata").is_none());
        assert!(bare.get("warnings").is_none());
    }
}
