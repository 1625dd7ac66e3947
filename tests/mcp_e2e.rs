//! End-to-end MCP protocol tests

mod common;

use common::Harness;
use mcp_tollgate::protocol::PROTOCOL_VERSION;
use reqwest::StatusCode;
use serde_json::json;

#[tokio::test]
async fn initialize_echoes_supported_version() {
    let h = Harness::start().await;

    let (status, _, body) = h
        .rpc(
            &h.token("alice"),
            "initialize",
            json!({
                "protocolVersion": "2025-03-26",
                "capabilities": {},
                "clientInfo": {"name": "e2e", "version": "1.0"}
            }),
        )
        .await;

    assert_eq!(status, StatusCode::OK);
    let result = &body["result"];
    assert_eq!(result["protocolVersion"], "2025-03-26");
    assert_eq!(result["serverInfo"]["name"], "mcp-tollgate");
    assert!(result["capabilities"]["tools"].is_object());
    assert!(result["capabilities"]["resources"].is_object());
}

#[tokio::test]
async fn initialize_with_unknown_version_gets_latest() {
    let h = Harness::start().await;

    let (_, _, body) = h
        .rpc(&h.token("alice"), "initialize", json!({"protocolVersion": "1999-01-01"}))
        .await;

    assert_eq!(body["result"]["protocolVersion"], PROTOCOL_VERSION);
}

#[tokio::test]
async fn notification_is_acknowledged() {
    let h = Harness::start().await;

    let (status, _, body) = h
        .post_raw(
            &h.token("alice"),
            None,
            json!({"jsonrpc": "2.0", "method": "notifications/initialized"}).to_string(),
        )
        .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({"jsonrpc": "2.0", "id": null, "result": null}));
}

#[tokio::test]
async fn ping_returns_empty_object() {
    let h = Harness::start().await;

    let (_, _, body) = h.rpc(&h.token("alice"), "ping", json!({})).await;

    assert_eq!(body, json!({"jsonrpc": "2.0", "id": 1, "result": {}}));
}

#[tokio::test]
async fn tools_list_carries_schemas() {
    let h = Harness::start().await;

    let (_, _, body) = h.rpc(&h.token("alice"), "tools/list", json!({})).await;

    let tools = body["result"]["tools"].as_array().unwrap();
    let image = tools.iter().find(|t| t["name"] == "generate_image").unwrap();
    assert_eq!(image["inputSchema"]["required"], json!(["prompt"]));
    assert_eq!(image["outputSchema"]["required"], json!(["imageUrl"]));
}

#[tokio::test]
async fn unknown_tool_is_invalid_params() {
    let h = Harness::start().await;

    let body = h
        .call_tool(&h.token("alice"), "get_stock_price", json!({}))
        .await;

    assert_eq!(body["error"]["code"], -32602);
    assert_eq!(body["error"]["message"], "Unknown tool: get_stock_price");
}

#[tokio::test]
async fn bad_arguments_are_a_tool_error() {
    let h = Harness::start().await;

    let body = h.call_tool(&h.token("alice"), "get_weather", json!({})).await;

    assert_eq!(body["result"]["isError"], json!(true));
}

#[tokio::test]
async fn resources_are_listed_and_read() {
    let h = Harness::start().await;
    let alice = h.token("alice");

    let (_, _, listed) = h.rpc(&alice, "resources/list", json!({})).await;
    let (_, _, read) = h
        .rpc(&alice, "resources/read", json!({"uri": "file:///main.py"}))
        .await;
    let (_, _, missing) = h
        .rpc(&alice, "resources/read", json!({"uri": "file:///nope"}))
        .await;

    assert_eq!(listed["result"]["resources"][0]["uri"], "file:///main.py");
    assert_eq!(read["result"]["contents"][0]["text"], "print('hello')");
    assert_eq!(missing["error"]["code"], -32602);
}

#[tokio::test]
async fn unknown_method_is_not_found() {
    let h = Harness::start().await;

    let (status, _, body) = h.rpc(&h.token("alice"), "prompts/list", json!({})).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["error"]["code"], -32601);
}

#[tokio::test]
async fn malformed_json_is_a_parse_error() {
    let h = Harness::start().await;

    let (status, _, body) = h
        .post_raw(&h.token("alice"), None, "{not json".to_string())
        .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], -32700);
    assert_eq!(body["id"], json!(null));
}
