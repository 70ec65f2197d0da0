//! Resilience & control primitives: context-budget estimation, the
//! completion-signal parser, the error classifier/retry planner, and the
//! freshness evaluator. These are pure, deterministic functions wherever
//! possible so they are trivially unit- and property-testable.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::messages::Message;

// ---------------------------------------------------------------------
// Context budget
// ---------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BudgetStatus {
    Ok,
    Warning,
    Block,
    Overflow,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ContextBudget {
    pub estimated_tokens: usize,
    pub context_limit: usize,
    pub usage_ratio: f64,
    pub status: BudgetStatus,
    #[serde(default)]
    pub compaction_count: u32,
}

/// Per-model context window table. Unknown models fall back to a
/// conservative default.
fn context_limit_for_model(model_name: &str) -> usize {
    let m = model_name.to_lowercase();
    if m.contains("claude-3-5") || m.contains("claude-3.5") {
        200_000
    } else if m.contains("claude") {
        200_000
    } else if m.contains("gpt-4o") || m.contains("gpt-4-turbo") {
        128_000
    } else if m.contains("gpt-4") {
        8_192
    } else if m.contains("gpt-3.5") {
        16_385
    } else if m.contains("gemini-1.5") || m.contains("gemini-2") {
        1_000_000
    } else {
        8_192
    }
}

/// `chars/4` character-based heuristic. The estimate is advisory, not
/// wire-exact; what's normative is the status-band thresholds below.
fn estimate_tokens(messages: &[Message]) -> usize {
    let total_chars: usize = messages
        .iter()
        .map(|m| m.text().unwrap_or("").len())
        .sum();
    (total_chars as f64 / 4.0).ceil() as usize
}

fn status_for_ratio(ratio: f64) -> BudgetStatus {
    if ratio >= 1.00 {
        BudgetStatus::Overflow
    } else if ratio >= 0.90 {
        BudgetStatus::Block
    } else if ratio >= 0.75 {
        BudgetStatus::Warning
    } else {
        BudgetStatus::Ok
    }
}

/// Compute a [`ContextBudget`] for a message list under a given model's
/// context window. `prior_compaction_count` carries forward the advisory
/// counter so callers (e.g. `context_guard`) can increment it themselves
/// when `status` lands in `{block, overflow}`.
pub fn estimate_context_budget(
    messages: &[Message],
    model_name: &str,
    prior_compaction_count: u32,
) -> ContextBudget {
    let estimated_tokens = estimate_tokens(messages);
    let context_limit = context_limit_for_model(model_name);
    let usage_ratio = estimated_tokens as f64 / context_limit as f64;
    let status = status_for_ratio(usage_ratio);
    ContextBudget {
        estimated_tokens,
        context_limit,
        usage_ratio,
        status,
        compaction_count: prior_compaction_count,
    }
}

// ---------------------------------------------------------------------
// Completion-signal parser
// ---------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum CompletionSignal {
    #[default]
    None,
    Continue,
    Complete,
    Blocked,
    Error,
}

/// Parse bracket markers out of model text, case-insensitive, first-match-wins
/// when multiple are present. Pure and deterministic.
pub fn parse_completion_signal(text: &str) -> (CompletionSignal, Option<String>) {
    let lower = text.to_lowercase();

    let markers: [(&str, bool); 4] = [
        ("[task_complete]", false),
        ("[blocked:", true),
        ("[error:", true),
        ("[continue:", true),
    ];

    let mut best: Option<(usize, &str, bool)> = None;
    for (marker, has_detail) in markers {
        if let Some(pos) = lower.find(marker) {
            if best.is_none() || pos < best.unwrap().0 {
                best = Some((pos, marker, has_detail));
            }
        }
    }

    let Some((pos, marker, has_detail)) = best else {
        return (CompletionSignal::None, None);
    };

    let signal = match marker {
        "[task_complete]" => CompletionSignal::Complete,
        "[blocked:" => CompletionSignal::Blocked,
        "[error:" => CompletionSignal::Error,
        "[continue:" => CompletionSignal::Continue,
        _ => unreachable!(),
    };

    let detail = if has_detail {
        let rest = &text[pos + marker.len()..];
        rest.find(']').map(|end| rest[..end].trim().to_string())
    } else {
        None
    };

    (signal, detail)
}

// ---------------------------------------------------------------------
// Error classifier
// ---------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureReason {
    RateLimited,
    Overloaded,
    Timeout,
    NetworkError,
    Auth,
    InvalidInput,
    Internal,
    Unknown,
}

impl FailureReason {
    pub fn is_recoverable(self) -> bool {
        matches!(
            self,
            FailureReason::RateLimited
                | FailureReason::Overloaded
                | FailureReason::Timeout
                | FailureReason::NetworkError
        )
    }

    fn base_backoff(self) -> Duration {
        match self {
            FailureReason::RateLimited => Duration::from_secs(5),
            FailureReason::Overloaded => Duration::from_secs(3),
            _ => Duration::from_secs(2),
        }
    }
}

/// Map an opaque model-adapter error message/kind to a [`FailureReason`] via
/// substring classification, mirroring `orchestrator::executor::retry::classify_error`
/// but against the spec's specific reason set.
pub fn classify_failure(message: &str) -> FailureReason {
    let m = message.to_lowercase();
    if m.contains("rate limit") || m.contains("429") || m.contains("too many requests") {
        FailureReason::RateLimited
    } else if m.contains("overloaded") || m.contains("503") || m.contains("capacity") {
        FailureReason::Overloaded
    } else if m.contains("timeout") || m.contains("timed out") {
        FailureReason::Timeout
    } else if m.contains("connection") || m.contains("network") || m.contains("dns") {
        FailureReason::NetworkError
    } else if m.contains("unauthorized") || m.contains("401") || m.contains("auth") {
        FailureReason::Auth
    } else if m.contains("invalid") || m.contains("400") || m.contains("bad request") {
        FailureReason::InvalidInput
    } else if m.contains("internal") || m.contains("500") {
        FailureReason::Internal
    } else {
        FailureReason::Unknown
    }
}

/// A decision produced for one retry attempt.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPlan {
    pub reason: FailureReason,
    pub should_retry: bool,
    pub delay: Duration,
}

/// Maximum retries after the first attempt (3 total attempts).
pub const MAX_RETRIES: u32 = 2;

/// Compute the retry plan for attempt number `attempt` (1-based, i.e. this is
/// the attempt that just failed). Delay scales linearly with attempt number.
pub fn plan_retry(reason: FailureReason, attempt: u32) -> RetryPlan {
    let should_retry = reason.is_recoverable() && attempt <= MAX_RETRIES;
    let delay = reason.base_backoff() * attempt;
    RetryPlan {
        reason,
        should_retry,
        delay,
    }
}

// ---------------------------------------------------------------------
// Freshness evaluator
// ---------------------------------------------------------------------

/// Configurable freshness thresholds. The spec leaves exact numbers
/// unspecified; these are conservative defaults, not normative constants.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct FreshnessConfig {
    pub max_age: Duration,
    pub max_idle: Duration,
    pub max_iterations_per_session: i64,
    pub max_messages: usize,
}

impl Default for FreshnessConfig {
    fn default() -> Self {
        Self {
            max_age: Duration::from_secs(24 * 3600),
            max_idle: Duration::from_secs(2 * 3600),
            max_iterations_per_session: 500,
            max_messages: 2_000,
        }
    }
}

impl tooling::config::ConfigBuilder for FreshnessConfig {
    fn validate(&self) -> tooling::Result<()> {
        if self.max_iterations_per_session <= 0 {
            return Err(tooling::ToolingError::General(
                "FreshnessConfig.max_iterations_per_session must be positive".to_string(),
            ));
        }
        if self.max_messages == 0 {
            return Err(tooling::ToolingError::General(
                "FreshnessConfig.max_messages must be positive".to_string(),
            ));
        }
        Ok(())
    }

    fn from_env(prefix: &str) -> tooling::Result<Self> {
        use tooling::config::get_env_parse_or;

        let defaults = Self::default();
        let max_age_secs: u64 =
            get_env_parse_or(&format!("{prefix}MAX_AGE_SECS"), defaults.max_age.as_secs())?;
        let max_idle_secs: u64 =
            get_env_parse_or(&format!("{prefix}MAX_IDLE_SECS"), defaults.max_idle.as_secs())?;
        let max_iterations_per_session: i64 = get_env_parse_or(
            &format!("{prefix}MAX_ITERATIONS_PER_SESSION"),
            defaults.max_iterations_per_session,
        )?;
        let max_messages: usize =
            get_env_parse_or(&format!("{prefix}MAX_MESSAGES"), defaults.max_messages)?;

        Ok(Self {
            max_age: Duration::from_secs(max_age_secs),
            max_idle: Duration::from_secs(max_idle_secs),
            max_iterations_per_session,
            max_messages,
        })
    }

    fn merge(&mut self, other: Self) -> &mut Self {
        self.max_age = other.max_age;
        self.max_idle = other.max_idle;
        self.max_iterations_per_session = other.max_iterations_per_session;
        self.max_messages = other.max_messages;
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FreshnessVerdict {
    pub should_reset: bool,
    pub reason: Option<String>,
}

/// Evaluate whether a session should be reset (marked stale) given its age,
/// idle time, iteration count, and message count against `config`'s
/// thresholds. Checked in a fixed order; the first tripped threshold names
/// the reason.
pub fn evaluate_freshness(
    age: Duration,
    idle: Duration,
    iterations: i64,
    message_count: usize,
    config: &FreshnessConfig,
) -> FreshnessVerdict {
    if age > config.max_age {
        return FreshnessVerdict {
            should_reset: true,
            reason: Some(format!("age {:?} exceeds max_age {:?}", age, config.max_age)),
        };
    }
    if idle > config.max_idle {
        return FreshnessVerdict {
            should_reset: true,
            reason: Some(format!("idle {:?} exceeds max_idle {:?}", idle, config.max_idle)),
        };
    }
    if iterations > config.max_iterations_per_session {
        return FreshnessVerdict {
            should_reset: true,
            reason: Some(format!(
                "iterations {} exceed max_iterations_per_session {}",
                iterations, config.max_iterations_per_session
            )),
        };
    }
    if message_count > config.max_messages {
        return FreshnessVerdict {
            should_reset: true,
            reason: Some(format!(
                "message_count {} exceeds max_messages {}",
                message_count, config.max_messages
            )),
        };
    }
    FreshnessVerdict {
        should_reset: false,
        reason: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn budget_status_bands() {
        assert_eq!(status_for_ratio(0.5), BudgetStatus::Ok);
        assert_eq!(status_for_ratio(0.75), BudgetStatus::Warning);
        assert_eq!(status_for_ratio(0.90), BudgetStatus::Block);
        assert_eq!(status_for_ratio(1.0), BudgetStatus::Overflow);
    }

    #[test]
    fn completion_signal_first_match_wins() {
        let (signal, detail) =
            parse_completion_signal("hold on [CONTINUE: still working] then [TASK_COMPLETE]");
        assert_eq!(signal, CompletionSignal::Continue);
        assert_eq!(detail.as_deref(), Some("still working"));
    }

    #[test]
    fn completion_signal_case_insensitive() {
        let (signal, detail) = parse_completion_signal("[Blocked: waiting on user]");
        assert_eq!(signal, CompletionSignal::Blocked);
        assert_eq!(detail.as_deref(), Some("waiting on user"));
    }

    #[test]
    fn completion_signal_none_when_absent() {
        let (signal, detail) = parse_completion_signal("just a normal response");
        assert_eq!(signal, CompletionSignal::None);
        assert_eq!(detail, None);
    }

    #[test]
    fn classify_maps_common_substrings() {
        assert_eq!(classify_failure("429 Too Many Requests"), FailureReason::RateLimited);
        assert_eq!(classify_failure("connection reset by peer"), FailureReason::NetworkError);
        assert_eq!(classify_failure("401 unauthorized"), FailureReason::Auth);
    }

    #[test]
    fn retry_plan_caps_at_max_retries() {
        let plan = plan_retry(FailureReason::RateLimited, 3);
        assert!(!plan.should_retry);
        let plan = plan_retry(FailureReason::RateLimited, 1);
        assert!(plan.should_retry);
        assert_eq!(plan.delay, Duration::from_secs(5));
    }

    #[test]
    fn non_recoverable_never_retries() {
        let plan = plan_retry(FailureReason::Auth, 1);
        assert!(!plan.should_retry);
    }

    #[test]
    fn freshness_trips_on_idle() {
        let config = FreshnessConfig {
            max_idle: Duration::from_secs(60),
            ..Default::default()
        };
        let verdict = evaluate_freshness(Duration::from_secs(10), Duration::from_secs(120), 0, 0, &config);
        assert!(verdict.should_reset);
        assert!(verdict.reason.unwrap().contains("idle"));
    }

    #[test]
    fn freshness_ok_within_thresholds() {
        let config = FreshnessConfig::default();
        let verdict = evaluate_freshness(Duration::from_secs(10), Duration::from_secs(10), 1, 1, &config);
        assert!(!verdict.should_reset);
    }

    #[test]
    fn freshness_config_builder_rejects_zero_messages() {
        use tooling::config::ConfigBuilder;

        let mut config = FreshnessConfig::default();
        config.max_messages = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn freshness_config_builder_from_env_falls_back_to_defaults() {
        use tooling::config::ConfigBuilder;

        let config = FreshnessConfig::from_env("ACOLIB_TEST_FRESHNESS_UNSET_").unwrap();
        assert_eq!(config.max_messages, FreshnessConfig::default().max_messages);
    }

    proptest::proptest! {
        #[test]
        fn blocked_marker_round_trips_its_detail(detail in "[a-zA-Z0-9 ]{0,40}") {
            let text = format!("[blocked: {detail}]");
            let (signal, parsed) = parse_completion_signal(&text);
            proptest::prop_assert_eq!(signal, CompletionSignal::Blocked);
            proptest::prop_assert_eq!(parsed.as_deref(), Some(detail.trim()));
        }

        #[test]
        fn task_complete_marker_is_found_anywhere_in_text(
            prefix in "[a-zA-Z0-9 ]{0,20}",
            suffix in "[a-zA-Z0-9 ]{0,20}",
        ) {
            let text = format!("{prefix}[task_complete]{suffix}");
            let (signal, detail) = parse_completion_signal(&text);
            proptest::prop_assert_eq!(signal, CompletionSignal::Complete);
            proptest::prop_assert_eq!(detail, None);
        }
    }
}
