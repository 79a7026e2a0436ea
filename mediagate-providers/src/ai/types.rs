//! AI Provider wire types (OpenAI-compatible)

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize)]
pub struct ChatMessage {
    pub role: &'static str,
    pub content: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ChatRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    pub temperature: f64,
    pub response_format: ResponseFormat,
}

#[derive(Debug, Clone, Serialize)]
pub struct ResponseFormat {
    #[serde(rename = "type")]
    pub format_type: &'static str,
}

impl ResponseFormat {
    #[must_use]
    pub const fn json_object() -> Self {
        Self {
            format_type: "json_object",
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChatResponse {
    pub choices: Vec<ChatChoice>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChatChoice {
    pub message: ChatResponseMessage,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChatResponseMessage {
    pub content: Option<String>,
}

/// One recommendation returned by the LLM.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct RecommendedTitle {
    pub title: String,
    pub original_title: Option<String>,
    pub year: Option<i32>,
    #[serde(rename = "type")]
    pub media_type: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct EmbeddingRequest {
    pub model: String,
    pub input: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EmbeddingResponse {
    pub data: Vec<EmbeddingData>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EmbeddingData {
    pub index: usize,
    pub embedding: Vec<f32>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recommended_title_tolerates_partial_objects() {
        let full: RecommendedTitle = serde_json::from_str(
            r#"{"title": "流浪地球", "original_title": "The Wandering Earth", "year": 2019, "type": "Movie"}"#,
        )
        .expect("valid");
        assert_eq!(full.year, Some(2019));

        let bare: RecommendedTitle =
            serde_json::from_str(r#"{"title": "隐秘的角落"}"#).expect("valid");
        assert!(bare.media_type.is_none());
    }
}
