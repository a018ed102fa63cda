//! Intent router: weighted-regex scoring over a data-driven pattern table.
//!
//! The table carries English and Portuguese variants.  Adding an agent or a
//! language means extending the table; the scoring code never changes.

use regex::Regex;
use serde::Serialize;

use crate::config::RouterConfig;

/// A confident routing decision.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RouteDecision {
    pub agent: String,
    pub confidence: f32,
}

/// Weighted pattern set for one agent.
pub struct AgentPatterns {
    pub agent: &'static str,
    /// `(pattern, weight)` rows; an agent's score is the max weight of any
    /// matching pattern.
    pub patterns: &'static [(&'static str, f32)],
}

/// Built-in routing table (EN + PT-BR variants).
pub fn builtin_table() -> Vec<AgentPatterns> {
    vec![
        AgentPatterns {
            agent: "reviewer",
            patterns: &[
                (r"\b(review|revis[ae]|code\s*review)\b", 0.9),
                (r"\b(audit|auditoria|lint|grade)\b", 0.85),
                (r"\b(qualidade|quality|best\s*practice|boas\s*pr[aá]ticas)\b", 0.8),
                (r"\b(pr\s*review|pull\s*request|merge\s*request)\b", 0.95),
                (r"\b(code\s*smell|technical\s*debt|d[ií]vida\s*t[eé]cnica)\b", 0.85),
            ],
        },
        AgentPatterns {
            agent: "planner",
            patterns: &[
                (r"\b(plan[oe]?|planeja[r]?|planejamento|cri[ae]\s*(um\s*)?plano)\b", 0.9),
                (r"\b(break\s*down|decompo[ns]|roadmap|estrat[eé]gia)\b", 0.9),
                (r"\b(how\s*(to|do\s*i|should)|como\s*(fa[zç]o|implement|come[çc])|steps?\s*to)\b", 0.75),
                (r"\b(preciso\s*(de\s*)?(um\s*)?plano|help\s*me\s*plan)\b", 0.8),
                (r"\b(design\s*doc|architecture|arquitetura)\b", 0.72),
            ],
        },
        AgentPatterns {
            agent: "executor",
            patterns: &[
                (r"\b(execut[ae]|run|roda[r]?|bash|shell|terminal)\b", 0.9),
                (r"\b(comando?s?|command)\b", 0.75),
                (r"\b(pip\s+install|npm\s+(install|run)|make|cargo|go\s+(run|build))\b", 0.95),
                (r"\b(git\s+(status|diff|add|commit|push|pull|clone|log))\b", 0.9),
                (r"\b(pytest|unittest|jest|npm\s+test)\b", 0.85),
            ],
        },
    ]
}

/// Patterns that indicate the message is general chat, not a task.
const NO_ROUTE_PATTERNS: &[&str] = &[
    r"^(oi|ol[aá]|hi|hello|hey|e\s*a[ií])\b",
    r"^(obrigad[oa]|thanks?|valeu|vlw)\b",
    r"^(ok|certo|entend[io]|got\s*it)\b",
];

/// Minimum message length worth routing.
const MIN_ROUTABLE_LEN: usize = 5;

struct CompiledAgent {
    agent: String,
    patterns: Vec<(Regex, f32)>,
}

/// Scores an input against the pattern table and picks the best agent.
pub struct IntentRouter {
    agents: Vec<CompiledAgent>,
    no_route: Vec<Regex>,
    config: RouterConfig,
}

impl IntentRouter {
    pub fn new(table: Vec<AgentPatterns>, config: RouterConfig) -> Self {
        let agents = table
            .into_iter()
            .map(|entry| CompiledAgent {
                agent: entry.agent.to_string(),
                patterns: entry
                    .patterns
                    .iter()
                    .filter_map(|(pattern, weight)| {
                        match Regex::new(&format!("(?i){pattern}")) {
                            Ok(re) => Some((re, *weight)),
                            Err(e) => {
                                tracing::error!("invalid router pattern '{pattern}': {e}");
                                None
                            }
                        }
                    })
                    .collect(),
            })
            .collect();
        let no_route = NO_ROUTE_PATTERNS
            .iter()
            .filter_map(|p| Regex::new(&format!("(?i){p}")).ok())
            .collect();
        Self {
            agents,
            no_route,
            config,
        }
    }

    pub fn with_builtin_table(config: RouterConfig) -> Self {
        Self::new(builtin_table(), config)
    }

    fn should_route(&self, message: &str) -> bool {
        let trimmed = message.trim();
        if trimmed.len() < MIN_ROUTABLE_LEN {
            return false;
        }
        !self.no_route.iter().any(|p| p.is_match(trimmed))
    }

    /// All agents with a non-zero score, sorted by confidence descending.
    /// Ties keep table order, so scoring is deterministic.
    pub fn detect(&self, message: &str) -> Vec<RouteDecision> {
        if !self.should_route(message) {
            return Vec::new();
        }
        let mut scores: Vec<RouteDecision> = self
            .agents
            .iter()
            .filter_map(|agent| {
                let best = agent
                    .patterns
                    .iter()
                    .filter(|(re, _)| re.is_match(message))
                    .map(|(_, w)| *w)
                    .fold(0.0f32, f32::max);
                (best > 0.0).then(|| RouteDecision {
                    agent: agent.agent.clone(),
                    confidence: best,
                })
            })
            .collect();
        scores.sort_by(|a, b| {
            b.confidence
                .partial_cmp(&a.confidence)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        scores
    }

    /// The best agent, when its confidence clears the acceptance floor.
    pub fn route(&self, message: &str) -> Option<RouteDecision> {
        let decisions = self.detect(message);
        decisions
            .into_iter()
            .next()
            .filter(|d| d.confidence >= self.config.min_confidence)
    }

    /// A disambiguation message when several agents could plausibly handle
    /// the request (top 3 above the ambiguity floor).
    pub fn suggestion(&self, message: &str) -> Option<String> {
        let high: Vec<RouteDecision> = self
            .detect(message)
            .into_iter()
            .filter(|d| d.confidence >= self.config.ambiguity_threshold)
            .take(3)
            .collect();
        if high.len() < 2 {
            return None;
        }
        let lines: Vec<String> = high
            .iter()
            .map(|d| format!("- `/{}` ({}%)", d.agent, (d.confidence * 100.0) as u32))
            .collect();
        Some(format!(
            "🤔 Multiple agents could help:\n{}\n\nType one of the commands or ask naturally.",
            lines.join("\n")
        ))
    }
}

// ─── Tests ────────────────────────────────────────────────────────────────────
