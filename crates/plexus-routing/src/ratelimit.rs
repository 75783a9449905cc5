use std::collections::HashMap;
use std::sync::Arc;
use std::time::SystemTime;

/// Extracts a cooldown duration from an upstream error payload.
pub trait RateLimitParser: Send + Sync {
    fn parse(&self, body: &str) -> Option<u64>;
}

/// Parsers keyed by provider name, with a shared default.
pub struct RateLimitParserRegistry {
    by_provider: HashMap<String, Arc<dyn RateLimitParser>>,
    default: Arc<dyn RateLimitParser>,
}

impl RateLimitParserRegistry {
    pub fn new() -> Self {
        Self {
            by_provider: HashMap::new(),
            default: Arc::new(ResetAfterParser),
        }
    }

    pub fn register(&mut self, provider: impl Into<String>, parser: Arc<dyn RateLimitParser>) {
        self.by_provider.insert(provider.into(), parser);
    }

    pub fn parse(&self, provider: &str, body: &str) -> Option<u64> {
        self.by_provider
            .get(provider)
            .unwrap_or(&self.default)
            .parse(body)
    }
}

impl Default for RateLimitParserRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Recognises `reset after N<unit>` forms, case-insensitive, optional
/// whitespace between number and unit. Seconds are tried before minutes
/// before hours, so `"s"` wins over a longer unit starting with the same
/// letter sequence.
pub struct ResetAfterParser;

const SECOND_UNITS: [&str; 4] = ["s", "sec", "second", "seconds"];
const MINUTE_UNITS: [&str; 5] = ["m", "min", "mins", "minute", "minutes"];
const HOUR_UNITS: [&str; 5] = ["h", "hr", "hrs", "hour", "hours"];

impl RateLimitParser for ResetAfterParser {
    fn parse(&self, body: &str) -> Option<u64> {
        let lower = body.to_ascii_lowercase();
        let mut search_from = 0;
        while let Some(relative) = lower[search_from..].find("reset after") {
            let after = search_from + relative + "reset after".len();
            if let Some(duration) = parse_amount(&lower[after..]) {
                return Some(duration);
            }
            search_from = after;
        }
        None
    }
}

fn parse_amount(rest: &str) -> Option<u64> {
    let rest = rest.trim_start();
    let digits_end = rest
        .char_indices()
        .take_while(|(_, c)| c.is_ascii_digit() || *c == '.')
        .map(|(i, c)| i + c.len_utf8())
        .last()?;
    let value: f64 = rest[..digits_end].parse().ok()?;

    let unit: String = rest[digits_end..]
        .trim_start()
        .chars()
        .take_while(|c| c.is_ascii_alphabetic())
        .collect();

    let multiplier_ms = if SECOND_UNITS.contains(&unit.as_str()) {
        1_000.0
    } else if MINUTE_UNITS.contains(&unit.as_str()) {
        60_000.0
    } else if HOUR_UNITS.contains(&unit.as_str()) {
        3_600_000.0
    } else {
        return None;
    };

    Some((value * multiplier_ms) as u64)
}

/// Parse an HTTP `Retry-After` header: delta-seconds or an HTTP-date.
/// Returns milliseconds from now.
pub fn parse_retry_after(value: &str) -> Option<u64> {
    let value = value.trim();
    if let Ok(seconds) = value.parse::<u64>() {
        return Some(seconds * 1_000);
    }
    let when = httpdate::parse_http_date(value).ok()?;
    when.duration_since(SystemTime::now())
        .ok()
        .map(|d| d.as_millis() as u64)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(body: &str) -> Option<u64> {
        ResetAfterParser.parse(body)
    }

    #[test]
    fn second_forms() {
        assert_eq!(parse("rate limited, reset after 20s"), Some(20_000));
        assert_eq!(parse("Reset After 5 seconds"), Some(5_000));
        assert_eq!(parse("RESET AFTER 3 SEC"), Some(3_000));
    }

    #[test]
    fn minute_and_hour_forms() {
        assert_eq!(parse("reset after 2 minutes"), Some(120_000));
        assert_eq!(parse("reset after 1m"), Some(60_000));
        assert_eq!(parse("reset after 1 hour"), Some(3_600_000));
        assert_eq!(parse("reset after 2hrs"), Some(7_200_000));
    }

    #[test]
    fn fractional_values() {
        assert_eq!(parse("reset after 1.5s"), Some(1_500));
        assert_eq!(parse("reset after 0.5 min"), Some(30_000));
    }

    #[test]
    fn no_match_returns_none() {
        assert_eq!(parse("try again later"), None);
        assert_eq!(parse("reset after soon"), None);
        assert_eq!(parse("reset after 10 fortnights"), None);
    }

    #[test]
    fn second_occurrence_recovers_from_bad_first() {
        assert_eq!(
            parse("reset after maintenance; reset after 30s"),
            Some(30_000)
        );
    }

    #[test]
    fn registry_prefers_provider_parser() {
        struct Fixed(u64);
        impl RateLimitParser for Fixed {
            fn parse(&self, _body: &str) -> Option<u64> {
                Some(self.0)
            }
        }
        let mut registry = RateLimitParserRegistry::new();
        registry.register("special", Arc::new(Fixed(7)));
        assert_eq!(registry.parse("special", "anything"), Some(7));
        assert_eq!(registry.parse("other", "reset after 2s"), Some(2_000));
        assert_eq!(registry.parse("other", "nothing"), None);
    }

    #[test]
    fn retry_after_delta_seconds() {
        assert_eq!(parse_retry_after("120"), Some(120_000));
        assert_eq!(parse_retry_after(" 1 "), Some(1_000));
        assert_eq!(parse_retry_after("not-a-number"), None);
    }

    #[test]
    fn retry_after_http_date_in_past_is_none() {
        assert_eq!(parse_retry_after("Wed, 21 Oct 2015 07:28:00 GMT"), None);
    }
}
