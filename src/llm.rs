//! GPT chat-completion client. One-shot request/response over `reqwest`,
//! replacing the original's raw-socket HTTP/1.1 framing.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

const TARGET_HOST: &str = "api.openai.com";
const MODEL: &str = "gpt-3.5-turbo-0613";

#[derive(Debug, Error)]
pub enum LlmError {
    #[error("request to {TARGET_HOST} failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("response carried no message choice")]
    NoChoice,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationItem {
    pub role: String,
    pub content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub function_call: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl ConversationItem {
    pub fn user(content: impl Into<String>) -> Self {
        Self { role: "user".to_string(), content: Some(content.into()), function_call: None, name: None }
    }

    pub fn assistant_text(content: impl Into<String>) -> Self {
        Self { role: "assistant".to_string(), content: Some(content.into()), function_call: None, name: None }
    }

    pub fn function_result(name: impl Into<String>, content: impl Into<String>) -> Self {
        Self { role: "function".to_string(), content: Some(content.into()), function_call: None, name: Some(name.into()) }
    }
}

#[derive(Debug, Clone)]
pub enum AssistantReply {
    Text(String),
    FunctionCall { name: String, arguments: Value },
}

pub struct GptClient {
    client: reqwest::Client,
    api_key: String,
    physical_location: String,
}

impl GptClient {
    pub fn new(client: reqwest::Client, api_key: impl Into<String>, physical_location: impl Into<String>) -> Self {
        Self { client, api_key: api_key.into(), physical_location: physical_location.into() }
    }

    fn system_prompt(&self) -> String {
        let now = Utc::now();
        format!(
            "You are a phone agent living in an old rotary phone, acting as a smart home assistant. \
             Keep your responses short and casual. Oh, you have a German accent. Today's date is {} (UTC). \
             You are physically located in {}.",
            now.format("%Y-%m-%d, %A"),
            self.physical_location,
        )
    }

    pub async fn complete(
        &self,
        function_definitions: &[Value],
        conversation_items: &[ConversationItem],
    ) -> Result<AssistantReply, LlmError> {
        let mut messages = Vec::with_capacity(conversation_items.len() + 1);
        messages.push(serde_json::json!({ "role": "system", "content": self.system_prompt() }));
        for item in conversation_items {
            messages.push(serde_json::to_value(item).expect("ConversationItem always serializes"));
        }

        let response = self
            .client
            .post(format!("https://{TARGET_HOST}/v1/chat/completions"))
            .bearer_auth(&self.api_key)
            .json(&serde_json::json!({
                "model": MODEL,
                "messages": messages,
                "functions": function_definitions,
            }))
            .send()
            .await?
            .error_for_status()?
            .json::<Value>()
            .await?;

        let message = response["choices"][0]["message"].clone();
        if message.is_null() {
            return Err(LlmError::NoChoice);
        }

        if let Some(call) = message.get("function_call") {
            let name = call["name"].as_str().unwrap_or_default().to_string();
            let arguments_raw = call["arguments"].as_str().unwrap_or("{}");
            let arguments: Value = serde_json::from_str(arguments_raw).unwrap_or(Value::Null);
            return Ok(AssistantReply::FunctionCall { name, arguments });
        }

        let content = message["content"].as_str().unwrap_or_default().to_string();
        Ok(AssistantReply::Text(content))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_system_prompt_mentions_location() {
        let client = GptClient::new(reqwest::Client::new(), "key", "Barcelona");
        assert!(client.system_prompt().contains("Barcelona"));
        assert!(client.system_prompt().contains("German accent"));
    }

    #[test]
    fn test_conversation_item_user_has_no_function_fields() {
        let item = ConversationItem::user("hello");
        assert_eq!(item.role, "user");
        assert!(item.function_call.is_none());
        assert!(item.name.is_none());
    }

    #[test]
    fn test_conversation_item_function_result_carries_name() {
        let item = ConversationItem::function_result("weather__get_weather_today", "sunny");
        assert_eq!(item.role, "function");
        assert_eq!(item.name.as_deref(), Some("weather__get_weather_today"));
    }
}
