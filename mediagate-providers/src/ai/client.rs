//! AI Provider HTTP client
//!
//! Chat completions run in JSON mode; every prompt instructs the model to
//! answer with a single JSON object so responses parse without scraping.
//! Fenced code blocks are tolerated because some deployments wrap JSON
//! anyway.

use std::collections::HashMap;
use std::time::Duration;

use reqwest::Client;
use serde_json::Value;

use crate::error::{check_response, ProviderError};
use crate::http::{build_client, AI_RECOMMENDATION_TIMEOUT, AI_TIMEOUT};

use super::types::{
    ChatMessage, ChatRequest, ChatResponse, EmbeddingRequest, EmbeddingResponse, RecommendedTitle,
    ResponseFormat,
};

/// Translation prompt mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TranslateMode {
    /// Direct batch translation, one shot.
    Fast,
    /// Context-aware translation given the work's title and year.
    Quality,
    /// Person-name transliteration.
    Transliterate,
}

#[derive(Clone)]
pub struct AiClient {
    base_url: String,
    api_key: String,
    model: String,
    embedding_model: String,
    client: Client,
    long_client: Client,
}

impl AiClient {
    pub fn new(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        model: impl Into<String>,
        embedding_model: impl Into<String>,
    ) -> Result<Self, ProviderError> {
        let api_key = api_key.into();
        if api_key.is_empty() {
            return Err(ProviderError::InvalidConfig(
                "ai provider api key is empty".to_string(),
            ));
        }
        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key,
            model: model.into(),
            embedding_model: embedding_model.into(),
            client: build_client(AI_TIMEOUT)?,
            long_client: build_client(AI_RECOMMENDATION_TIMEOUT)?,
        })
    }

    async fn chat_json(
        &self,
        client: &Client,
        system: String,
        user: String,
        temperature: f64,
    ) -> Result<Value, ProviderError> {
        let url = format!("{}/chat/completions", self.base_url);
        let request = ChatRequest {
            model: self.model.clone(),
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: system,
                },
                ChatMessage {
                    role: "user",
                    content: user,
                },
            ],
            temperature,
            response_format: ResponseFormat::json_object(),
        };

        let resp = client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await?;
        let resp = check_response(resp)?;
        let body: ChatResponse = resp.json().await?;
        let content = body
            .choices
            .first()
            .and_then(|c| c.message.content.as_deref())
            .ok_or_else(|| ProviderError::Parse("chat response has no content".to_string()))?;
        parse_loose_json(content)
    }

    /// Batch-translate phrases; returns `source → translation` for the
    /// entries the model answered. Missing keys mean the model declined.
    pub async fn translate_batch(
        &self,
        texts: &[String],
        mode: TranslateMode,
        title: Option<&str>,
        year: Option<i32>,
    ) -> Result<HashMap<String, String>, ProviderError> {
        if texts.is_empty() {
            return Ok(HashMap::new());
        }

        let system = match mode {
            TranslateMode::Fast => {
                "You are a translation engine for media metadata. Translate each \
                 input phrase into Simplified Chinese. Reply with one JSON object \
                 mapping every original phrase to its translation."
                    .to_string()
            }
            TranslateMode::Quality => format!(
                "You are translating cast and role names for the work \"{}\" ({}). \
                 Prefer established Chinese translations used by film databases. \
                 Reply with one JSON object mapping every original phrase to its \
                 translation.",
                title.unwrap_or("unknown"),
                year.map_or_else(|| "unknown year".to_string(), |y| y.to_string()),
            ),
            TranslateMode::Transliterate => {
                "You are transliterating person names into Simplified Chinese \
                 using standard transliteration conventions. Reply with one JSON \
                 object mapping every original name to its transliteration."
                    .to_string()
            }
        };
        let user = serde_json::to_string(texts)?;

        let value = self.chat_json(&self.client, system, user, 0.2).await?;
        let map = value
            .as_object()
            .ok_or_else(|| ProviderError::Parse("translation reply is not an object".into()))?;

        Ok(map
            .iter()
            .filter_map(|(k, v)| v.as_str().map(|s| (k.clone(), s.to_string())))
            .collect())
    }

    /// Single-phrase convenience over [`Self::translate_batch`].
    pub async fn translate(&self, text: &str) -> Result<Option<String>, ProviderError> {
        let map = self
            .translate_batch(&[text.to_string()], TranslateMode::Fast, None, None)
            .await?;
        Ok(map.get(text).cloned())
    }

    /// Translate a plot overview, keeping tone.
    pub async fn translate_overview(
        &self,
        overview: &str,
        title: &str,
    ) -> Result<Option<String>, ProviderError> {
        let system = format!(
            "Translate the following plot overview of \"{title}\" into fluent \
             Simplified Chinese. Reply with a JSON object {{\"translation\": \"...\"}}."
        );
        let value = self
            .chat_json(&self.client, system, overview.to_string(), 0.3)
            .await?;
        Ok(value
            .get("translation")
            .and_then(Value::as_str)
            .map(str::to_string))
    }

    /// Translate a work title.
    pub async fn translate_title(
        &self,
        title: &str,
        media_type: &str,
        year: Option<i32>,
    ) -> Result<Option<String>, ProviderError> {
        let system = format!(
            "Give the established Simplified Chinese title of the {media_type} \
             \"{title}\"{}. Reply with a JSON object {{\"translation\": \"...\"}}.",
            year.map(|y| format!(" ({y})")).unwrap_or_default()
        );
        let value = self
            .chat_json(&self.client, system, "Translate this title.".to_string(), 0.3)
            .await?;
        Ok(value
            .get("translation")
            .and_then(Value::as_str)
            .map(str::to_string))
    }

    /// Ask for viewing recommendations from a taste history.
    pub async fn recommendations(
        &self,
        history_titles: &[String],
        instruction: &str,
    ) -> Result<Vec<RecommendedTitle>, ProviderError> {
        let system = format!(
            "You are a film and television recommendation engine. Based on the \
             user's favorably rated history, recommend works they have not seen. \
             {instruction} Reply with a JSON object \
             {{\"recommendations\": [{{\"title\", \"original_title\", \"year\", \"type\"}}]}} \
             where type is \"Movie\" or \"Series\"."
        );
        let user = serde_json::to_string(history_titles)?;

        let value = self.chat_json(&self.long_client, system, user, 0.7).await?;
        let list = value
            .get("recommendations")
            .cloned()
            .unwrap_or(Value::Array(vec![]));
        Ok(serde_json::from_value(list)?)
    }

    /// Secondary filter over imported list entries: returns the IDs to keep.
    pub async fn filter_items(
        &self,
        items: &Value,
        instruction: &str,
    ) -> Result<Vec<String>, ProviderError> {
        let system = format!(
            "You are filtering a media list. Keep only the entries matching this \
             instruction: {instruction}. Reply with a JSON object \
             {{\"keep\": [\"id\", ...]}} listing the ids to keep."
        );
        let user = serde_json::to_string(items)?;

        let value = self.chat_json(&self.long_client, system, user, 0.2).await?;
        let keep = value
            .get("keep")
            .and_then(Value::as_array)
            .ok_or_else(|| ProviderError::Parse("filter reply missing keep array".into()))?;
        Ok(keep
            .iter()
            .filter_map(|v| match v {
                Value::String(s) => Some(s.clone()),
                Value::Number(n) => Some(n.to_string()),
                _ => None,
            })
            .collect())
    }

    /// Compute embeddings for overview texts, in input order.
    pub async fn embeddings(&self, inputs: Vec<String>) -> Result<Vec<Vec<f32>>, ProviderError> {
        if inputs.is_empty() {
            return Ok(Vec::new());
        }
        let url = format!("{}/embeddings", self.base_url);
        let count = inputs.len();
        let request = EmbeddingRequest {
            model: self.embedding_model.clone(),
            input: inputs,
        };

        let resp = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await?;
        let resp = check_response(resp)?;
        let body: EmbeddingResponse = resp.json().await?;

        let mut ordered: Vec<Vec<f32>> = vec![Vec::new(); count];
        for item in body.data {
            if item.index < count {
                ordered[item.index] = item.embedding;
            }
        }
        Ok(ordered)
    }
}

/// Parse model output that should be JSON but may be fenced.
fn parse_loose_json(content: &str) -> Result<Value, ProviderError> {
    let trimmed = content.trim();
    if let Ok(v) = serde_json::from_str(trimmed) {
        return Ok(v);
    }
    // Strip a ```json ... ``` fence if present.
    let stripped = trimmed
        .trim_start_matches("```json")
        .trim_start_matches("```")
        .trim_end_matches("```")
        .trim();
    if let Ok(v) = serde_json::from_str(stripped) {
        return Ok(v);
    }
    // Last resort: the outermost braces.
    if let (Some(start), Some(end)) = (trimmed.find('{'), trimmed.rfind('}')) {
        if start < end {
            if let Ok(v) = serde_json::from_str(&trimmed[start..=end]) {
                return Ok(v);
            }
        }
    }
    let preview: String = trimmed.chars().take(120).collect();
    Err(ProviderError::Parse(format!(
        "model reply is not JSON: {preview}"
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn test_parse_loose_json_plain() {
        let v = parse_loose_json(r#"{"a": 1}"#).expect("parses");
        assert_eq!(v["a"], 1);
    }

    #[test]
    fn test_parse_loose_json_fenced() {
        let v = parse_loose_json("```json\n{\"a\": 1}\n```").expect("parses");
        assert_eq!(v["a"], 1);
    }

    #[test]
    fn test_parse_loose_json_with_prose() {
        let v = parse_loose_json("Sure! Here it is: {\"a\": 1} Hope that helps.")
            .expect("parses");
        assert_eq!(v["a"], 1);
    }

    #[test]
    fn test_parse_loose_json_garbage_fails() {
        assert!(parse_loose_json("no json here").is_err());
    }

    fn chat_body(content: &str) -> serde_json::Value {
        serde_json::json!({
            "choices": [{"message": {"role": "assistant", "content": content}}]
        })
    }

    #[tokio::test]
    async fn test_translate_batch_maps_answers() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(200).set_body_json(chat_body(
                r#"{"Tony Leung": "梁朝伟", "Maggie Cheung": "张曼玉"}"#,
            )))
            .mount(&server)
            .await;

        let client = AiClient::new(server.uri(), "k", "gpt", "embed").expect("client builds");
        let map = client
            .translate_batch(
                &["Tony Leung".into(), "Maggie Cheung".into()],
                TranslateMode::Fast,
                None,
                None,
            )
            .await
            .expect("translated");
        assert_eq!(map["Tony Leung"], "梁朝伟");
        assert_eq!(map.len(), 2);
    }

    #[tokio::test]
    async fn test_recommendations_parse() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(200).set_body_json(chat_body(
                r#"{"recommendations": [{"title": "隐秘的角落", "year": 2020, "type": "Series"}]}"#,
            )))
            .mount(&server)
            .await;

        let client = AiClient::new(server.uri(), "k", "gpt", "embed").expect("client builds");
        let recs = client
            .recommendations(&["漫长的季节 (2023)".into()], "mainland crime dramas")
            .await
            .expect("recommended");
        assert_eq!(recs[0].title, "隐秘的角落");
        assert_eq!(recs[0].media_type.as_deref(), Some("Series"));
    }

    #[tokio::test]
    async fn test_embeddings_reordered_by_index() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/embeddings"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "data": [
                    {"index": 1, "embedding": [0.2]},
                    {"index": 0, "embedding": [0.1]}
                ]
            })))
            .mount(&server)
            .await;

        let client = AiClient::new(server.uri(), "k", "gpt", "embed").expect("client builds");
        let out = client
            .embeddings(vec!["a".into(), "b".into()])
            .await
            .expect("embedded");
        assert_eq!(out[0], vec![0.1]);
        assert_eq!(out[1], vec![0.2]);
    }
}
