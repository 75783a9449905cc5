use plexus_transform::UnifiedRequest;

/// Complexity tier for `auto` routing, cheapest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ComplexityTier {
    Heartbeat,
    Simple,
    Medium,
    Complex,
    Reasoning,
}

impl ComplexityTier {
    /// One tier up; `Reasoning` is the ceiling.
    pub fn promoted(self) -> ComplexityTier {
        match self {
            ComplexityTier::Heartbeat => ComplexityTier::Simple,
            ComplexityTier::Simple => ComplexityTier::Medium,
            ComplexityTier::Medium => ComplexityTier::Complex,
            ComplexityTier::Complex | ComplexityTier::Reasoning => ComplexityTier::Reasoning,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Classification {
    pub tier: ComplexityTier,
    pub score: f64,
    pub confidence: f64,
    pub agentic_score: f64,
    pub has_structured_output: bool,
    pub signals: Vec<String>,
    pub reasoning: String,
}

/// Pluggable request scorer for the `auto` alias. Must be synchronous, do
/// no IO, and finish in bounded microseconds.
pub trait Classifier: Send + Sync {
    fn classify(&self, request: &UnifiedRequest) -> Classification;
}

/// Deterministic signal-counting classifier.
///
/// Scores on prompt size, tool surface, structured output, and a few
/// reasoning keywords. Crude by design; the contract allows swapping in a
/// smarter scorer without touching the router.
pub struct HeuristicClassifier;

const REASONING_MARKERS: [&str; 6] = [
    "step by step",
    "prove",
    "derive",
    "chain of thought",
    "think carefully",
    "formal proof",
];

impl Classifier for HeuristicClassifier {
    fn classify(&self, request: &UnifiedRequest) -> Classification {
        let mut signals = Vec::new();
        let prompt = request.prompt_text();
        // Rough token estimate; enough for tiering.
        let approx_tokens = prompt.len() / 4;

        let mut score = match approx_tokens {
            0..=8 => 0.05,
            9..=200 => 0.25,
            201..=2_000 => 0.5,
            2_001..=10_000 => 0.7,
            _ => 0.85,
        };
        signals.push(format!("approx_tokens={approx_tokens}"));

        if !request.tools.is_empty() {
            score += 0.1;
            signals.push(format!("tools={}", request.tools.len()));
        }

        let has_structured_output = request.response_format.is_some();
        if has_structured_output {
            score += 0.05;
            signals.push("structured_output".to_string());
        }

        let lower = prompt.to_ascii_lowercase();
        let marker_hits = REASONING_MARKERS
            .iter()
            .filter(|m| lower.contains(*m))
            .count();
        if marker_hits > 0 {
            score += 0.15 * marker_hits as f64;
            signals.push(format!("reasoning_markers={marker_hits}"));
        }

        let mut agentic_score: f64 = 0.0;
        if !request.tools.is_empty() {
            agentic_score += 0.5;
        }
        if request.has_tool_traffic() {
            agentic_score += 0.5;
            signals.push("tool_traffic".to_string());
        }

        let score = score.min(1.0);
        let tier = if marker_hits > 0 && score >= 0.6 {
            ComplexityTier::Reasoning
        } else if score < 0.1 {
            ComplexityTier::Heartbeat
        } else if score < 0.35 {
            ComplexityTier::Simple
        } else if score < 0.6 {
            ComplexityTier::Medium
        } else {
            ComplexityTier::Complex
        };

        Classification {
            tier,
            score,
            confidence: 0.6,
            agentic_score,
            has_structured_output,
            reasoning: format!("score {score:.2} from {} signals", signals.len()),
            signals,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use plexus_transform::{Role, UnifiedMessage};

    #[test]
    fn tiny_prompt_is_heartbeat() {
        let mut request = UnifiedRequest::default();
        request
            .messages
            .push(UnifiedMessage::text(Role::User, "ping"));
        let result = HeuristicClassifier.classify(&request);
        assert_eq!(result.tier, ComplexityTier::Heartbeat);
    }

    #[test]
    fn long_prompt_with_markers_is_reasoning() {
        let mut request = UnifiedRequest::default();
        let text = format!("prove this step by step: {}", "x".repeat(4000));
        request.messages.push(UnifiedMessage::text(Role::User, text));
        let result = HeuristicClassifier.classify(&request);
        assert_eq!(result.tier, ComplexityTier::Reasoning);
    }

    #[test]
    fn tool_traffic_raises_agentic_score() {
        let mut request = UnifiedRequest::default();
        request.messages.push(UnifiedMessage {
            role: Role::Assistant,
            parts: vec![plexus_transform::ContentPart::ToolCall {
                id: "c".into(),
                name: "f".into(),
                arguments: serde_json::json!({}),
            }],
        });
        request.tools.push(plexus_transform::ToolDefinition {
            name: "f".into(),
            description: None,
            parameters: None,
        });
        let result = HeuristicClassifier.classify(&request);
        assert!(result.agentic_score >= 1.0);
    }

    #[test]
    fn promotion_saturates_at_reasoning() {
        assert_eq!(ComplexityTier::Heartbeat.promoted(), ComplexityTier::Simple);
        assert_eq!(ComplexityTier::Reasoning.promoted(), ComplexityTier::Reasoning);
    }
}
