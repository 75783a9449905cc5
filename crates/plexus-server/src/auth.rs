use axum::http::HeaderMap;

use plexus_config::ConfigSnapshot;

/// Outcome of key validation: the matched key's name, or `None` when the
/// deployment runs with no keys configured (open access).
pub enum AuthOutcome {
    Authorized(Option<String>),
    Denied,
}

/// Accepts `Authorization: Bearer <key>`, `x-api-key`, or `x-goog-api-key`
/// (Gemini SDKs), plus an optional `key` query parameter.
pub fn authenticate(
    snapshot: &ConfigSnapshot,
    headers: &HeaderMap,
    query_key: Option<&str>,
) -> AuthOutcome {
    if snapshot.api_keys.is_empty() {
        return AuthOutcome::Authorized(None);
    }

    let presented = bearer(headers)
        .or_else(|| header_value(headers, "x-api-key"))
        .or_else(|| header_value(headers, "x-goog-api-key"))
        .or(query_key);

    match presented.and_then(|secret| snapshot.api_key_by_secret(secret)) {
        Some(key) => AuthOutcome::Authorized(Some(key.name.clone())),
        None => AuthOutcome::Denied,
    }
}

fn bearer(headers: &HeaderMap) -> Option<&str> {
    header_value(headers, "authorization")?.strip_prefix("Bearer ")
}

fn header_value<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|value| value.to_str().ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn snapshot() -> ConfigSnapshot {
        ConfigSnapshot::from_yaml(
            r#"
apiKeys:
  - { name: dev, secret: pk-dev }
  - { name: off, secret: pk-off, enabled: false }
"#,
        )
        .unwrap()
    }

    #[test]
    fn bearer_and_x_api_key_both_work() {
        let snapshot = snapshot();
        let mut headers = HeaderMap::new();
        headers.insert("authorization", HeaderValue::from_static("Bearer pk-dev"));
        assert!(matches!(
            authenticate(&snapshot, &headers, None),
            AuthOutcome::Authorized(Some(ref name)) if name == "dev"
        ));

        let mut headers = HeaderMap::new();
        headers.insert("x-api-key", HeaderValue::from_static("pk-dev"));
        assert!(matches!(
            authenticate(&snapshot, &headers, None),
            AuthOutcome::Authorized(Some(_))
        ));
    }

    #[test]
    fn disabled_and_unknown_keys_are_denied() {
        let snapshot = snapshot();
        let mut headers = HeaderMap::new();
        headers.insert("x-api-key", HeaderValue::from_static("pk-off"));
        assert!(matches!(
            authenticate(&snapshot, &headers, None),
            AuthOutcome::Denied
        ));
        assert!(matches!(
            authenticate(&snapshot, &HeaderMap::new(), None),
            AuthOutcome::Denied
        ));
    }

    #[test]
    fn query_key_supports_gemini_sdks() {
        let snapshot = snapshot();
        assert!(matches!(
            authenticate(&snapshot, &HeaderMap::new(), Some("pk-dev")),
            AuthOutcome::Authorized(Some(_))
        ));
    }

    #[test]
    fn no_configured_keys_means_open_access() {
        let snapshot = ConfigSnapshot::default();
        assert!(matches!(
            authenticate(&snapshot, &HeaderMap::new(), None),
            AuthOutcome::Authorized(None)
        ));
    }
}
