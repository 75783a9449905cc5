//! OpenAI embeddings wire types.

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingsRequest {
    pub model: String,
    pub input: EmbeddingsInput,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub encoding_format: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dimensions: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
}

/// Text, a batch of texts, or pre-tokenized input.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum EmbeddingsInput {
    Text(String),
    Texts(Vec<String>),
    Tokens(Vec<i64>),
    TokenBatches(Vec<Vec<i64>>),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingsResponse {
    pub object: String,
    pub data: Vec<Embedding>,
    pub model: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub usage: Option<EmbeddingsUsage>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Embedding {
    pub object: String,
    pub index: u32,
    /// Float array, or a base64 string when `encoding_format = "base64"`.
    pub embedding: JsonValue,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EmbeddingsUsage {
    pub prompt_tokens: u64,
    pub total_tokens: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn input_forms_parse() {
        let single: EmbeddingsInput = serde_json::from_str(r#""hello""#).unwrap();
        assert!(matches!(single, EmbeddingsInput::Text(_)));
        let batch: EmbeddingsInput = serde_json::from_str(r#"["a", "b"]"#).unwrap();
        assert!(matches!(batch, EmbeddingsInput::Texts(_)));
        let tokens: EmbeddingsInput = serde_json::from_str("[1, 2, 3]").unwrap();
        assert!(matches!(tokens, EmbeddingsInput::Tokens(_)));
    }
}
