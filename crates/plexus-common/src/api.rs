use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Wire dialect spoken on an interface, client- or provider-side.
///
/// The string forms double as keys in provider `api_base_url` maps and in
/// `access_via` lists, so the serde names are part of the config contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApiType {
    /// OpenAI chat completions.
    Chat,
    /// Anthropic messages.
    Messages,
    /// Gemini generateContent / streamGenerateContent.
    Gemini,
    /// OpenAI Responses.
    Responses,
    Embeddings,
    Images,
    Speech,
    Transcriptions,
    Oauth,
}

impl ApiType {
    pub const ALL: [ApiType; 9] = [
        ApiType::Chat,
        ApiType::Messages,
        ApiType::Gemini,
        ApiType::Responses,
        ApiType::Embeddings,
        ApiType::Images,
        ApiType::Speech,
        ApiType::Transcriptions,
        ApiType::Oauth,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ApiType::Chat => "chat",
            ApiType::Messages => "messages",
            ApiType::Gemini => "gemini",
            ApiType::Responses => "responses",
            ApiType::Embeddings => "embeddings",
            ApiType::Images => "images",
            ApiType::Speech => "speech",
            ApiType::Transcriptions => "transcriptions",
            ApiType::Oauth => "oauth",
        }
    }

    /// Dialects that carry chat-style generation (as opposed to one-shot
    /// media or vector operations). Streaming translation only exists
    /// between these.
    pub fn is_generation(&self) -> bool {
        matches!(
            self,
            ApiType::Chat | ApiType::Messages | ApiType::Gemini | ApiType::Responses
        )
    }
}

impl fmt::Display for ApiType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, thiserror::Error)]
#[error("unknown api type: {0}")]
pub struct UnknownApiType(pub String);

impl FromStr for ApiType {
    type Err = UnknownApiType;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "chat" => Ok(ApiType::Chat),
            "messages" => Ok(ApiType::Messages),
            "gemini" => Ok(ApiType::Gemini),
            "responses" => Ok(ApiType::Responses),
            "embeddings" => Ok(ApiType::Embeddings),
            "images" => Ok(ApiType::Images),
            "speech" => Ok(ApiType::Speech),
            "transcriptions" => Ok(ApiType::Transcriptions),
            "oauth" => Ok(ApiType::Oauth),
            other => Err(UnknownApiType(other.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_str() {
        for api in ApiType::ALL {
            assert_eq!(api.as_str().parse::<ApiType>().unwrap(), api);
        }
    }

    #[test]
    fn generation_dialects() {
        assert!(ApiType::Chat.is_generation());
        assert!(ApiType::Messages.is_generation());
        assert!(!ApiType::Embeddings.is_generation());
        assert!(!ApiType::Speech.is_generation());
    }
}
