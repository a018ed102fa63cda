//! Thought signatures — lightweight reasoning continuity across loop
//! iterations.

use chrono::{DateTime, Utc};
use uuid::Uuid;

/// How much deliberation a task deserves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThinkingLevel {
    Minimal,
    Low,
    Medium,
    High,
}

/// Heuristic level from message keywords.
pub fn determine_thinking_level(message: &str) -> ThinkingLevel {
    let lower = message.to_lowercase();

    const HIGH: &[&str] = &[
        "architect", "design", "refactor", "complex", "system", "rewrite", "optimize",
        "infrastructure", "migration",
    ];
    if HIGH.iter().any(|k| lower.contains(k)) {
        return ThinkingLevel::High;
    }

    const LOW: &[&str] = &[
        "fix", "typo", "simple", "quick", "rename", "update", "change", "small", "minor",
    ];
    if LOW.iter().any(|k| lower.contains(k)) {
        return ThinkingLevel::Low;
    }

    const MINIMAL: &[&str] = &["hello", "hi", "help", "what", "how"];
    if lower.len() < 20 && MINIMAL.iter().any(|k| lower.contains(k)) {
        return ThinkingLevel::Minimal;
    }

    ThinkingLevel::Medium
}

/// One link in the reasoning chain.
#[derive(Debug, Clone)]
pub struct ThoughtSignature {
    pub signature_id: String,
    pub reasoning_summary: String,
    pub insights: Vec<String>,
    pub next_action: String,
    pub thinking_level: ThinkingLevel,
    pub created_at: DateTime<Utc>,
}

/// Builds successive signatures for one reasoning chain, keeping the most
/// recent insights.
#[derive(Debug)]
pub struct SignatureChain {
    level: ThinkingLevel,
    insights: Vec<String>,
    latest: Option<ThoughtSignature>,
}

/// Insights retained across signature refreshes.
const KEPT_INSIGHTS: usize = 5;

impl SignatureChain {
    pub fn new(level: ThinkingLevel) -> Self {
        Self {
            level,
            insights: Vec::new(),
            latest: None,
        }
    }

    pub fn add_insight(&mut self, insight: impl Into<String>) {
        self.insights.push(insight.into());
    }

    /// Create the next signature in the chain.
    pub fn refresh(
        &mut self,
        reasoning: impl Into<String>,
        next_action: impl Into<String>,
    ) -> &ThoughtSignature {
        let tail = self
            .insights
            .iter()
            .rev()
            .take(KEPT_INSIGHTS)
            .rev()
            .cloned()
            .collect();
        self.latest = Some(ThoughtSignature {
            signature_id: Uuid::new_v4().to_string(),
            reasoning_summary: reasoning.into(),
            insights: tail,
            next_action: next_action.into(),
            thinking_level: self.level,
            created_at: Utc::now(),
        });
        self.latest.as_ref().unwrap_or_else(|| unreachable!())
    }

    pub fn latest(&self) -> Option<&ThoughtSignature> {
        self.latest.as_ref()
    }
}
