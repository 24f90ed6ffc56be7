use serde::Deserialize;
use serde_json::Value as Json;

use crate::error::GatewayError;
use crate::resources;
use crate::tools::{ContentPart, Envelope, Gateway, ToolRegistry};

/// JSON-RPC 2.0 envelope handling and the streaming policy: what streams,
/// how text is chunked, and what a frame looks like. The transport half
/// (HTTP, SSE) lives in `server.rs`.

const SERVER_NAME: &str = env!("CARGO_PKG_NAME");
const SERVER_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Unary responses are allowed up to these sizes; past them the server
/// must stream.
pub const TEXT_STREAM_THRESHOLD: usize = 1024;
pub const LIST_STREAM_THRESHOLD: usize = 10;

/// Text payloads are chunked at this many bytes per frame.
pub const CHUNK_BYTES: usize = 512;

/// Sentinel closing every event stream, after the completion frame.
pub const DONE_SENTINEL: &str = "[DONE]";

#[derive(Debug, Deserialize)]
pub struct RpcRequest {
    pub jsonrpc: Option<String>,
    pub method: Option<String>,
    #[serde(default)]
    pub params: Json,
    #[serde(default)]
    pub id: Json,
}

/// Parse the raw body into a request. Malformed JSON is a parse error;
/// a well-formed object with the wrong shape is an invalid request.
pub fn parse_request(body: &[u8]) -> Result<RpcRequest, GatewayError> {
    let value: Json =
        serde_json::from_slice(body).map_err(|e| GatewayError::Parse(e.to_string()))?;
    let request: RpcRequest =
        serde_json::from_value(value).map_err(|e| GatewayError::InvalidRequest(e.to_string()))?;

    if request.jsonrpc.as_deref() != Some("2.0") {
        return Err(GatewayError::InvalidRequest(
            "jsonrpc must be \"2.0\"".into(),
        ));
    }
    if request.method.is_none() {
        return Err(GatewayError::InvalidRequest("method is required".into()));
    }
    Ok(request)
}

/// What a response would stream, if streamed.
#[derive(Debug, Clone)]
pub enum StreamPayload {
    Text(String),
    Items(Vec<Json>),
    Opaque,
}

#[derive(Debug)]
pub struct MethodOutcome {
    pub result: Json,
    pub payload: StreamPayload,
}

fn payload_of(envelope: &Envelope) -> StreamPayload {
    for part in &envelope.content {
        match part {
            ContentPart::Text { text } => return StreamPayload::Text(text.clone()),
            ContentPart::Json { data } => {
                if let Some(items) = data.as_array() {
                    return StreamPayload::Items(items.clone());
                }
            }
        }
    }
    StreamPayload::Opaque
}

fn envelope_outcome(envelope: Envelope) -> MethodOutcome {
    let payload = payload_of(&envelope);
    MethodOutcome {
        result: serde_json::to_value(envelope).unwrap_or_default(),
        payload,
    }
}

#[derive(Debug, Deserialize)]
struct CallParams {
    name: String,
    #[serde(default = "empty_object")]
    arguments: Json,
}

#[derive(Debug, Deserialize)]
struct ReadParams {
    uri: String,
}

fn empty_object() -> Json {
    Json::Object(serde_json::Map::new())
}

fn bind_params<T: serde::de::DeserializeOwned>(params: Json) -> Result<T, GatewayError> {
    serde_json::from_value(params).map_err(|e| GatewayError::InvalidArgs(e.to_string()))
}

/// Method router. Everything here returns either a result value plus its
/// stream payload, or a typed error for the transport to render.
pub async fn handle(
    gateway: &Gateway,
    registry: &ToolRegistry,
    method: &str,
    params: Json,
) -> Result<MethodOutcome, GatewayError> {
    match method {
        "ping" => {
            let envelope = registry.dispatch(gateway, "ping", empty_object()).await?;
            Ok(envelope_outcome(envelope))
        }
        "initialize" => {
            let result = serde_json::json!({
                "server": { "name": SERVER_NAME, "version": SERVER_VERSION },
                "protocols": {
                    "jsonrpc": "2.0",
                    "streaming": "text/event-stream",
                },
                "capabilities": {
                    "tools": { "count": registry.len() },
                    "resources": { "count": 1, "roots": ["vault://notes/"] },
                },
            });
            Ok(MethodOutcome {
                result,
                payload: StreamPayload::Opaque,
            })
        }
        "tools/list" => {
            let tools = registry.describe();
            Ok(MethodOutcome {
                result: serde_json::json!({ "tools": tools }),
                payload: StreamPayload::Items(tools),
            })
        }
        "tools/call" => {
            let call: CallParams = bind_params(params)?;
            let envelope = registry.dispatch(gateway, &call.name, call.arguments).await?;
            Ok(envelope_outcome(envelope))
        }
        "resources/list" => {
            let entries = resources::list(gateway).await?;
            let items: Vec<Json> = entries
                .iter()
                .map(|e| serde_json::to_value(e).unwrap_or_default())
                .collect();
            Ok(MethodOutcome {
                result: serde_json::json!({ "resources": items }),
                payload: StreamPayload::Items(items),
            })
        }
        "resources/read" => {
            let read: ReadParams = bind_params(params)?;
            let content = resources::read(gateway, &read.uri).await?;
            let payload = StreamPayload::Text(content.text.clone());
            Ok(MethodOutcome {
                result: serde_json::json!({
                    "contents": [serde_json::to_value(&content).unwrap_or_default()],
                }),
                payload,
            })
        }
        other => Err(GatewayError::UnknownMethod(other.to_string())),
    }
}

/// Whether the response is past the unary limits and must stream.
pub fn must_stream(payload: &StreamPayload) -> bool {
    match payload {
        StreamPayload::Text(text) => text.len() > TEXT_STREAM_THRESHOLD,
        StreamPayload::Items(items) => items.len() > LIST_STREAM_THRESHOLD,
        StreamPayload::Opaque => false,
    }
}

/// Split text at [`CHUNK_BYTES`] boundaries without cutting a UTF-8
/// character in half.
pub fn chunk_utf8(text: &str, max_bytes: usize) -> Vec<String> {
    let mut chunks = Vec::new();
    let mut current = String::new();
    for ch in text.chars() {
        if current.len() + ch.len_utf8() > max_bytes && !current.is_empty() {
            chunks.push(std::mem::take(&mut current));
        }
        current.push(ch);
    }
    if !current.is_empty() {
        chunks.push(current);
    }
    chunks
}

/// Frame sequence for a streamed response: the chunked payload, then one
/// completion frame. The transport appends the `[DONE]` sentinel.
pub fn frames(outcome: &MethodOutcome, id: &Json) -> Vec<Json> {
    let mut frames = Vec::new();
    match &outcome.payload {
        StreamPayload::Text(text) => {
            for chunk in chunk_utf8(text, CHUNK_BYTES) {
                frames.push(serde_json::json!({ "type": "content", "text": chunk }));
            }
        }
        StreamPayload::Items(items) => {
            for item in items {
                frames.push(serde_json::json!({ "type": "item", "data": item }));
            }
        }
        StreamPayload::Opaque => {
            frames.push(serde_json::json!({ "type": "result", "data": outcome.result }));
        }
    }

    let mut complete = serde_json::json!({ "type": "complete", "id": id });
    if let Some(metadata) = outcome.result.get("metadata") {
        complete["metadata"] = metadata.clone();
    }
    if let Some(warnings) = outcome.result.get("warnings") {
        complete["warnings"] = warnings.clone();
    }
    frames.push(complete);
    frames
}

pub fn result_body(id: &Json, result: &Json) -> Json {
    serde_json::json!({
        "jsonrpc": "2.0",
        "id": id,
        "result": result,
    })
}

pub fn error_body(id: &Json, error: &GatewayError) -> Json {
    let mut body = serde_json::json!({
        "jsonrpc": "2.0",
        "id": id,
        "error": {
            "code": error.rpc_code(),
            "message": error.to_string(),
        },
    });
    if let Some(data) = error.rpc_data() {
        body["error"]["data"] = data;
    }
    body
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::VaultCaches;
    use crate::tools::ToolRegistry;
    use crate::upstream::VaultApi;
    use crate::vault::{Vault, VaultConfig};
    use std::time::Duration;

    /// A gateway whose upstream is unreachable; fine for everything that
    /// fails before I/O.
    fn offline_gateway() -> Gateway {
        let api = VaultApi::new("http://127.0.0.1:1", "test-key").unwrap();
        let caches = VaultCaches::new(Duration::from_secs(300), Duration::from_secs(180));
        let vault = Vault::new(
            api,
            caches,
            VaultConfig {
                fs_root: None,
                batch_size: 15,
                snippet_radius: 80,
            },
        );
        Gateway { vault }
    }

    #[test]
    fn parse_distinguishes_parse_and_invalid() {
        assert!(matches!(
            parse_request(b"{nope"),
            Err(GatewayError::Parse(_))
        ));
        assert!(matches!(
            parse_request(br#"{"method":"ping","id":1}"#),
            Err(GatewayError::InvalidRequest(_))
        ));
        assert!(matches!(
            parse_request(br#"{"jsonrpc":"1.0","method":"ping","id":1}"#),
            Err(GatewayError::InvalidRequest(_))
        ));
        let ok = parse_request(br#"{"jsonrpc":"2.0","method":"ping","id":7}"#).unwrap();
        assert_eq!(ok.method.as_deref(), Some("ping"));
        assert_eq!(ok.id, serde_json::json!(7));
    }

    #[test]
    fn chunking_is_byte_bounded_and_char_safe() {
        let text = "a".repeat(2048);
        let chunks = chunk_utf8(&text, CHUNK_BYTES);
        assert_eq!(chunks.len(), 4);
        assert!(chunks.iter().all(|c| c.len() == 512));
        assert_eq!(chunks.concat(), text);

        // 3-byte chars never split; chunks stay under the limit.
        let text = "€".repeat(400);
        let chunks = chunk_utf8(&text, CHUNK_BYTES);
        assert!(chunks.iter().all(|c| c.len() <= 512));
        assert_eq!(chunks.concat(), text);

        assert!(chunk_utf8("", CHUNK_BYTES).is_empty());
    }

    #[test]
    fn stream_thresholds() {
        assert!(!must_stream(&StreamPayload::Text("x".repeat(1024))));
        assert!(must_stream(&StreamPayload::Text("x".repeat(1025))));
        let ten: Vec<Json> = (0..10).map(|i| serde_json::json!(i)).collect();
        assert!(!must_stream(&StreamPayload::Items(ten)));
        let eleven: Vec<Json> = (0..11).map(|i| serde_json::json!(i)).collect();
        assert!(must_stream(&StreamPayload::Items(eleven)));
        assert!(!must_stream(&StreamPayload::Opaque));
    }

    #[test]
    fn frame_count_matches_chunk_count_plus_completion() {
        let outcome = MethodOutcome {
            result: serde_json::json!({}),
            payload: StreamPayload::Text("x".repeat(2048)),
        };
        let frames = frames(&outcome, &serde_json::json!(1));
        // ceil(2048 / 512) content frames + 1 completion.
        assert_eq!(frames.len(), 5);
        assert_eq!(frames[0]["type"], "content");
        assert_eq!(frames[4]["type"], "complete");
    }

    #[test]
    fn completion_frame_carries_metadata_and_warnings() {
        let outcome = MethodOutcome {
            result: serde_json::json!({
                "content": [],
                "metadata": { "path": "a.md" },
                "warnings": ["dates disagree"],
            }),
            payload: StreamPayload::Text("body".into()),
        };
        let frames = frames(&outcome, &serde_json::json!("req-1"));
        let complete = frames.last().unwrap();
        assert_eq!(complete["metadata"]["path"], "a.md");
        assert_eq!(complete["warnings"][0], "dates disagree");
        assert_eq!(complete["id"], "req-1");
    }

    #[tokio::test]
    async fn unknown_method_and_tool_map_to_32601() {
        let gateway = offline_gateway();
        let registry = ToolRegistry::new("obs_");

        let err = handle(&gateway, &registry, "nope/nope", Json::Null)
            .await
            .unwrap_err();
        assert_eq!(err.rpc_code(), -32601);

        let err = handle(
            &gateway,
            &registry,
            "tools/call",
            serde_json::json!({ "name": "obs_nope", "arguments": {} }),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, GatewayError::UnknownTool(_)));
        assert_eq!(err.rpc_code(), -32601);
    }

    #[tokio::test]
    async fn schema_violations_map_to_32602() {
        let gateway = offline_gateway();
        let registry = ToolRegistry::new("obs_");

        // Unknown argument key, rejected before any upstream I/O.
        let err = handle(
            &gateway,
            &registry,
            "tools/call",
            serde_json::json!({
                "name": "obs_read_note",
                "arguments": { "path": "a.md", "bogus": true },
            }),
        )
        .await
        .unwrap_err();
        assert_eq!(err.rpc_code(), -32602);

        // Empty query fails validation, not upstream.
        let err = handle(
            &gateway,
            &registry,
            "tools/call",
            serde_json::json!({
                "name": "obs_search_notes",
                "arguments": { "query": "" },
            }),
        )
        .await
        .unwrap_err();
        assert_eq!(err.rpc_code(), -32602);

        // Traversal is rejected by path policy before I/O.
        let err = handle(
            &gateway,
            &registry,
            "tools/call",
            serde_json::json!({
                "name": "obs_read_note",
                "arguments": { "path": "../outside.md" },
            }),
        )
        .await
        .unwrap_err();
        assert_eq!(err.rpc_code(), -32602);
    }

    #[tokio::test]
    async fn keyword_limit_zero_needs_no_upstream() {
        // The upstream is unreachable, so a zero limit only passes if no
        // I/O happens.
        let gateway = offline_gateway();
        let registry = ToolRegistry::new("obs_");
        let outcome = handle(
            &gateway,
            &registry,
            "tools/call",
            serde_json::json!({
                "name": "obs_keyword_search",
                "arguments": { "keyword": "x", "limit": 0 },
            }),
        )
        .await
        .unwrap();
        assert_eq!(outcome.result["content"][0]["data"], serde_json::json!([]));
    }

    #[tokio::test]
    async fn initialize_and_tools_list_are_io_free() {
        let gateway = offline_gateway();
        let registry = ToolRegistry::new("obs_");

        let outcome = handle(&gateway, &registry, "initialize", Json::Null)
            .await
            .unwrap();
        assert_eq!(outcome.result["capabilities"]["tools"]["count"], 13);
        assert_eq!(outcome.result["server"]["name"], "vaultgate");

        let outcome = handle(&gateway, &registry, "tools/list", Json::Null)
            .await
            .unwrap();
        let StreamPayload::Items(items) = &outcome.payload else {
            panic!("tools/list should carry a list payload");
        };
        assert_eq!(items.len(), 13);
        // 13 tools exceed the unary list limit, so tools/list streams.
        assert!(must_stream(&outcome.payload));
    }

    #[tokio::test]
    async fn ping_envelope_shape() {
        let gateway = offline_gateway();
        let registry = ToolRegistry::new("obs_");
        let outcome = handle(&gateway, &registry, "ping", Json::Null).await.unwrap();
        assert_eq!(outcome.result["content"][0]["type"], "json");
        assert_eq!(outcome.result["content"][0]["data"]["text"], "pong");
        assert!(outcome.result["content"][0]["data"]["timestamp"].is_string());
    }

    #[test]
    fn error_body_shape() {
        let body = error_body(
            &serde_json::json!(3),
            &GatewayError::NotFound("t/a.md".into()),
        );
        assert_eq!(body["jsonrpc"], "2.0");
        assert_eq!(body["id"], 3);
        assert_eq!(body["error"]["code"], -32603);
        assert_eq!(body["error"]["data"]["kind"], "not_found");

        let body = error_body(&Json::Null, &GatewayError::Parse("bad".into()));
        assert_eq!(body["error"]["code"], -32700);
        assert!(body["error"]["data"].is_null());
    }
}
