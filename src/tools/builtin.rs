//! Demonstration tools shipped with the binary

use async_trait::async_trait;
use serde_json::{Value, json};

use super::{ToolError, ToolHandler, string_arg};
use crate::auth::AuthContext;
use crate::protocol::Tool;

/// Free tool: canned weather report for a location
pub struct GetWeather;

#[async_trait]
impl ToolHandler for GetWeather {
    fn definition(&self) -> Tool {
        Tool {
            name: "get_weather".to_string(),
            title: Some("Weather".to_string()),
            description: Some("Get the current weather for a location".to_string()),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "location": {"type": "string", "description": "City or place name"}
                },
                "required": ["location"]
            }),
            output_schema: Some(json!({
                "type": "object",
                "properties": {"report": {"type": "string"}},
                "required": ["report"]
            })),
        }
    }

    async fn call(&self, _caller: &AuthContext, arguments: Value) -> Result<Value, ToolError> {
        let location = string_arg(&arguments, "location")?;
        Ok(json!({ "report": format!("The weather in {location} is sunny.") }))
    }
}

/// Priced tool: deterministic image URL for a prompt
pub struct GenerateImage;

/// Prompt words joined by `-`, lowercase, non-alphanumerics dropped
fn slug(prompt: &str) -> String {
    prompt
        .split_whitespace()
        .map(|w| {
            w.chars()
                .filter(char::is_ascii_alphanumeric)
                .collect::<String>()
                .to_ascii_lowercase()
        })
        .filter(|w| !w.is_empty())
        .collect::<Vec<_>>()
        .join("-")
}

#[async_trait]
impl ToolHandler for GenerateImage {
    fn definition(&self) -> Tool {
        Tool {
            name: "generate_image".to_string(),
            title: Some("Image generation".to_string()),
            description: Some("Generate an image from a text prompt (paid)".to_string()),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "prompt": {"type": "string", "description": "What to draw"}
                },
                "required": ["prompt"]
            }),
            output_schema: Some(json!({
                "type": "object",
                "properties": {"imageUrl": {"type": "string"}},
                "required": ["imageUrl"]
            })),
        }
    }

    async fn call(&self, _caller: &AuthContext, arguments: Value) -> Result<Value, ToolError> {
        let prompt = string_arg(&arguments, "prompt")?;
        let slug = slug(prompt);
        if slug.is_empty() {
            return Err(ToolError::InvalidArguments(
                "'prompt' must contain letters or digits".to_string(),
            ));
        }
        Ok(json!({ "imageUrl": format!("https://images.example.com/{slug}.png") }))
    }
}
