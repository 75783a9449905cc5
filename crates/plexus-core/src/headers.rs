use std::collections::BTreeMap;

use plexus_common::ApiType;

/// Headers the dialect requires, plus auth, plus configured extras (which
/// win on conflict).
pub fn build_headers(
    api_type: ApiType,
    api_key: Option<&str>,
    stream: bool,
    custom: &BTreeMap<String, String>,
) -> Vec<(String, String)> {
    let mut headers: Vec<(String, String)> = Vec::new();
    headers.push(("content-type".to_string(), "application/json".to_string()));
    if stream {
        headers.push(("accept".to_string(), "text/event-stream".to_string()));
    }

    if let Some(key) = api_key {
        match api_type {
            ApiType::Messages => {
                headers.push(("x-api-key".to_string(), key.to_string()));
                headers.push(("anthropic-version".to_string(), "2023-06-01".to_string()));
            }
            ApiType::Gemini => {
                headers.push(("x-goog-api-key".to_string(), key.to_string()));
            }
            _ => {
                headers.push(("authorization".to_string(), format!("Bearer {key}")));
            }
        }
    } else if api_type == ApiType::Messages {
        headers.push(("anthropic-version".to_string(), "2023-06-01".to_string()));
    }

    for (name, value) in custom {
        let lower = name.to_ascii_lowercase();
        headers.retain(|(existing, _)| *existing != lower);
        headers.push((lower, value.clone()));
    }
    headers
}

const SENSITIVE: [&str; 3] = ["x-api-key", "authorization", "x-goog-api-key"];

/// Copy of the headers with credentials masked to `<first4>...<last4>`,
/// `Bearer ` prefix preserved. Safe for logs and error contexts.
pub fn sanitize_headers(headers: &[(String, String)]) -> Vec<(String, String)> {
    headers
        .iter()
        .map(|(name, value)| {
            if SENSITIVE.contains(&name.to_ascii_lowercase().as_str()) {
                (name.clone(), mask_value(value))
            } else {
                (name.clone(), value.clone())
            }
        })
        .collect()
}

fn mask_value(value: &str) -> String {
    let (prefix, secret) = match value.strip_prefix("Bearer ") {
        Some(rest) => ("Bearer ", rest),
        None => ("", value),
    };
    if secret.len() <= 8 {
        return format!("{prefix}***");
    }
    format!(
        "{prefix}{}...{}",
        &secret[..4],
        &secret[secret.len() - 4..]
    )
}
