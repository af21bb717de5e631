//! Conversational agent engine
//!
//! Request variants are a tagged enum, each with its own prompt preamble
//! and reply validation; an unknown variant is unrepresentable and rejected
//! at the boundary. Conversation history is explicit per-request context
//! passed by the caller; the engine keeps no process-wide chat state.

use std::sync::Arc;

use chrono::{Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::history::{HistoryFetcher, HistoryRequest};
use crate::insight::{parse, CompletionClient, CompletionError, RetryPolicy};
use crate::stats;
use crate::trend;
use crate::types::{MetricSample, TimeWindow};

const SYSTEM_PROMPT: &str = "You are an expert assistant for the Cloud Pulse monitoring \
application. You help users understand their monitoring data: cost analysis, infrastructure \
metrics, and synthetic URL monitors. Only answer questions about the application's data; \
politely decline anything else.";

const SRE_PROMPT: &str = "You are acting as an SRE analyst. Diagnose resource behavior from \
the metrics provided, identify likely root causes, and propose concrete remediation steps. \
Base your analysis strictly on the data in this prompt; do not invent hypothetical numbers.";

const MONITOR_PROMPT: &str = "You are acting as a monitor-configuration assistant. Help the \
user define HTTP, AWS, or Azure monitors: which fields to set, sensible thresholds, and \
check intervals.";

const AUTOMATION_PROMPT: &str = "You are acting as an automation assistant. Suggest \
automation rules that react to monitoring signals, including their trigger conditions and \
actions.";

const KNOWLEDGE_PROMPT: &str = "You are acting as a product knowledge assistant. Answer \
questions about the monitoring application's features and how to use them.";

/// Window of history pulled into an SRE prompt.
const SRE_LOOKBACK_HOURS: i64 = 2;

/// The typed request variants the agent accepts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentVariant {
    /// Root-cause analysis for a resource; enriched with historical metrics.
    Sre {
        /// Resource under investigation. When absent, the engine falls back
        /// to scanning the prompt for an instance-id pattern.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        resource_id: Option<String>,
    },
    /// Monitor-configuration help.
    Monitor,
    /// Automation-rule suggestions.
    Automation,
    /// Product knowledge questions.
    Knowledge,
}

impl AgentVariant {
    /// Tag used in replies for this variant.
    pub fn tag(&self) -> &'static str {
        match self {
            AgentVariant::Sre { .. } => "sre",
            AgentVariant::Monitor => "monitor",
            AgentVariant::Automation => "automation",
            AgentVariant::Knowledge => "knowledge",
        }
    }

    fn preamble(&self) -> &'static str {
        match self {
            AgentVariant::Sre { .. } => SRE_PROMPT,
            AgentVariant::Monitor => MONITOR_PROMPT,
            AgentVariant::Automation => AUTOMATION_PROMPT,
            AgentVariant::Knowledge => KNOWLEDGE_PROMPT,
        }
    }
}

/// One prior conversation turn, supplied by the caller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatTurn {
    pub role: ChatRole,
    pub content: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChatRole {
    User,
    Assistant,
}

/// Structured agent reply. Error replies are well-formed too: the engine is
/// total over the happy/error space, mirroring the insight synthesizer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentReply {
    #[serde(rename = "type", default)]
    pub kind: String,

    #[serde(default)]
    pub summary: String,

    #[serde(default)]
    pub answer: String,

    #[serde(default)]
    pub error: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl AgentReply {
    fn failure(kind: &str, summary: &str, answer: String, details: Option<String>) -> Self {
        Self {
            kind: kind.to_string(),
            summary: summary.to_string(),
            answer,
            error: true,
            details,
        }
    }
}

/// The agent engine.
pub struct AgentEngine {
    client: Option<Arc<dyn CompletionClient>>,
    retry: RetryPolicy,
    fetcher: Option<Arc<dyn HistoryFetcher>>,
}

impl AgentEngine {
    pub fn new(
        client: Option<Arc<dyn CompletionClient>>,
        retry: RetryPolicy,
        fetcher: Option<Arc<dyn HistoryFetcher>>,
    ) -> Self {
        Self {
            client,
            retry,
            fetcher,
        }
    }

    /// Run one agent request. Never fails: completion and parsing problems
    /// come back as error-shaped replies.
    pub async fn run(
        &self,
        prompt: &str,
        variant: &AgentVariant,
        history: &[ChatTurn],
    ) -> AgentReply {
        info!(
            variant = variant.tag(),
            history_turns = history.len(),
            "running agent request"
        );

        let Some(client) = &self.client else {
            return AgentReply::failure(
                variant.tag(),
                "AI Service Not Configured",
                "The completion API key is not configured. Set it in the environment to enable \
                 the assistant."
                    .to_string(),
                None,
            );
        };

        let mut full_prompt = String::with_capacity(2048);
        full_prompt.push_str(SYSTEM_PROMPT);
        full_prompt.push_str("\n\n");
        full_prompt.push_str(variant.preamble());

        if let AgentVariant::Sre { resource_id } = variant {
            let resource = resource_id
                .clone()
                .or_else(|| extract_resource_id(prompt));
            match resource {
                Some(resource) => {
                    let section = self.sre_history_section(&resource).await;
                    full_prompt.push_str(&section);
                }
                None => debug!("no resource id in SRE request, skipping history enrichment"),
            }
        }

        full_prompt.push_str(&conversation_context(history));
        full_prompt.push_str(&format!("\n\nUser Query: \"{prompt}\"\n\n"));
        full_prompt.push_str(
            "Remember: return ONLY a valid JSON object with 'type', 'summary', and 'answer' \
             fields, no markdown formatting.",
        );

        let outcome = self
            .retry
            .run(None, CompletionError::is_transient, |attempt| {
                let client = Arc::clone(client);
                let full_prompt = full_prompt.clone();
                async move {
                    if attempt > 0 {
                        debug!(attempt, "retrying agent completion");
                    }
                    client.complete(&full_prompt).await
                }
            })
            .await;

        let raw = match outcome {
            Ok(raw) => raw,
            Err(err) => {
                warn!(error = %err, "agent completion failed");
                return AgentReply::failure(
                    variant.tag(),
                    "AI Service Error",
                    "Failed to communicate with the AI service. Please try again.".to_string(),
                    Some(err.to_string()),
                );
            }
        };

        self.parse_reply(variant, &raw)
    }

    /// Parse and validate a raw completion reply for this variant.
    fn parse_reply(&self, variant: &AgentVariant, raw: &str) -> AgentReply {
        let cleaned = parse::strip_code_fences(raw);

        let parsed = serde_json::from_str::<AgentReply>(cleaned).ok().or_else(|| {
            parse::extract_json_object(raw)
                .and_then(|candidate| serde_json::from_str::<AgentReply>(candidate).ok())
        });

        match parsed {
            Some(mut reply) if !reply.answer.is_empty() => {
                // Replies carry the variant they were produced for.
                reply.kind = variant.tag().to_string();
                reply
            }
            Some(_) => AgentReply::failure(
                variant.tag(),
                "Response Parsing Error",
                truncate_answer(raw),
                Some("The AI reply was valid JSON but had no answer field.".to_string()),
            ),
            None => AgentReply::failure(
                variant.tag(),
                "Response Parsing Error",
                truncate_answer(raw),
                Some("The AI returned a response in an unexpected format.".to_string()),
            ),
        }
    }

    /// Historical-metrics prompt section for the SRE variant.
    async fn sre_history_section(&self, resource_id: &str) -> String {
        let Some(fetcher) = &self.fetcher else {
            return String::new();
        };

        let end = Utc::now();
        let window = TimeWindow {
            start: end - ChronoDuration::hours(SRE_LOOKBACK_HOURS),
            end,
        };

        let mut section = String::new();
        for metric_name in ["CPUUtilization", "MemoryUtilization"] {
            let request = HistoryRequest {
                resource_id: resource_id.to_string(),
                metric_name: metric_name.to_string(),
                window,
            };
            match fetcher.fetch(&request).await {
                Ok(samples) if !samples.is_empty() => {
                    section.push_str(&metric_analysis_section(resource_id, metric_name, &samples));
                }
                Ok(_) => debug!(metric = metric_name, "no historical samples for resource"),
                Err(err) => {
                    warn!(metric = metric_name, error = %err, "history fetch for agent failed")
                }
            }
        }

        if section.is_empty() {
            format!(
                "\n\nNote: no historical metrics found for {resource_id}. This may be a new \
                 resource or metrics collection has not started yet.\n"
            )
        } else {
            format!(
                "\n\n=== REAL HISTORICAL DATA ===\n{section}=== END HISTORICAL DATA ===\n\
                 \nBase your root cause analysis on the actual metrics shown above.\n"
            )
        }
    }
}

/// Instance-id pattern the SRE variant falls back to when no explicit
/// resource is given.
fn extract_resource_id(prompt: &str) -> Option<String> {
    use regex::Regex;
    use std::sync::OnceLock;

    static RESOURCE_RE: OnceLock<Regex> = OnceLock::new();
    let re = RESOURCE_RE.get_or_init(|| Regex::new(r"(?i)i-[a-z0-9]+").expect("valid regex"));
    re.find(prompt).map(|m| m.as_str().to_string())
}

/// Render one metric's history as prompt text.
fn metric_analysis_section(resource_id: &str, metric_name: &str, samples: &[MetricSample]) -> String {
    let mut sorted = samples.to_vec();
    sorted.sort_by_key(|s| s.timestamp);

    // Non-empty by construction of the caller.
    let summary = match stats::summarize(&sorted) {
        Ok(summary) => summary,
        Err(_) => return String::new(),
    };
    let trend_result = trend::analyze_trend(&sorted);

    let values: Vec<f64> = sorted.iter().map(|s| s.value).collect();
    let cutoff = summary.mean * 1.5;
    let spike_count = values.iter().filter(|&&v| v > cutoff).count();
    let has_spikes = spike_count as f64 > values.len() as f64 * 0.1;

    let mut section = String::new();
    section.push_str(&format!("\n## {metric_name} analysis for {resource_id}\n"));
    section.push_str(&format!("- Data points: {}\n", sorted.len()));
    section.push_str(&format!(
        "- Time range: {} to {}\n",
        sorted[0].timestamp.to_rfc3339(),
        sorted[sorted.len() - 1].timestamp.to_rfc3339()
    ));
    section.push_str(&format!(
        "- Current value: {:.2}\n",
        sorted[sorted.len() - 1].value
    ));
    section.push_str(&format!("- Average: {:.2}\n", summary.mean));
    section.push_str(&format!(
        "- Min/Max: {:.2} / {:.2}\n",
        summary.min, summary.max
    ));
    section.push_str(&format!("- Trend: {}\n", trend_result.direction.as_str()));
    section.push_str(&format!(
        "- Has anomalies: {has_spikes} ({spike_count} spikes detected)\n"
    ));
    section
}

/// Conversation history rendered the way the model sees it.
fn conversation_context(history: &[ChatTurn]) -> String {
    if history.is_empty() {
        return String::new();
    }

    let mut context = String::from("\n\n=== CONVERSATION HISTORY ===\n");
    for turn in history {
        match turn.role {
            ChatRole::User => {
                context.push_str(&format!("User: {}\n", turn.content));
            }
            ChatRole::Assistant => {
                // Assistant turns may be stored as serialized replies.
                let text = serde_json::from_str::<AgentReply>(&turn.content)
                    .ok()
                    .map(|r| if r.answer.is_empty() { r.summary } else { r.answer })
                    .unwrap_or_else(|| truncate_chars(&turn.content, 150));
                context.push_str(&format!("Assistant: {text}\n"));
            }
        }
    }
    context.push_str("=== END HISTORY ===\n");
    context
}

fn truncate_answer(raw: &str) -> String {
    if raw.chars().count() > 500 {
        let cut: String = raw.chars().take(500).collect();
        format!("{cut}...")
    } else {
        raw.to_string()
    }
}

fn truncate_chars(text: &str, limit: usize) -> String {
    text.chars().take(limit).collect()
}
