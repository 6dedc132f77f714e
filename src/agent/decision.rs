//! Pattern-table classification of whether a message needs tools.
//!
//! Every rule is a `{pattern, weight, category}` tuple. A message's score
//! per category is the sum of the weights of its matching rules. The
//! highest-scoring category that reaches its activation threshold wins;
//! ties go to the category listed first in [`CATEGORY_PRIORITY`].

use regex::Regex;
use std::collections::HashMap;
use std::sync::LazyLock;
use tracing::debug;

use super::{Complexity, DetectedType, ToolDecision};
use crate::error::ClassificationError;
use crate::tools::{
    detect_github_request, GITHUB_REPO, JIRA_SEARCH, KNOWLEDGE_SEARCH, WEB_SCRAPE, WEB_SEARCH,
};

/// Longest message the analyzer accepts, in characters.
pub const MAX_MESSAGE_CHARS: usize = 10_000;

/// Upper bound confidence approaches but never reaches.
pub const MAX_CONFIDENCE: f64 = 0.95;
/// Score at which confidence reaches ~63% of its maximum.
pub const CONFIDENCE_SCALE: f64 = 2.0;
/// Confidence of a decision that matched no category.
pub const NO_MATCH_CONFIDENCE: f64 = 0.5;

pub const GITHUB_ACTIVATION: f64 = 1.5;
pub const JIRA_ACTIVATION: f64 = 2.0;
pub const KNOWLEDGE_ACTIVATION: f64 = 1.0;
pub const SEARCH_ACTIVATION: f64 = 1.0;

/// Extra github score when repository coordinates were extracted.
pub const COORDINATES_WEIGHT: f64 = 2.0;

/// Messages shorter than this are simple.
pub const SIMPLE_MAX_CHARS: usize = 50;
/// Messages shorter than this (and not simple) are moderate.
pub const MODERATE_MAX_CHARS: usize = 200;

/// Tie-break order, highest priority first.
pub const CATEGORY_PRIORITY: [DetectedType; 4] = [
    DetectedType::Github,
    DetectedType::Jira,
    DetectedType::Knowledge,
    DetectedType::Search,
];

struct PatternRule {
    pattern: &'static str,
    weight: f64,
    category: DetectedType,
}

const PATTERN_TABLE: &[PatternRule] = &[
    // github
    PatternRule {
        pattern: r"(?i)github\.com[/:][\w.-]+/[\w.-]+",
        weight: 3.0,
        category: DetectedType::Github,
    },
    PatternRule {
        pattern: r"(?i)\bgithub\b",
        weight: 1.5,
        category: DetectedType::Github,
    },
    PatternRule {
        pattern: r"(?i)\b(repo|repos|repository|repositories)\b",
        weight: 1.0,
        category: DetectedType::Github,
    },
    PatternRule {
        pattern: r"(?i)\b(pull requests?|commits?|stars|forks?|contributors?|readme)\b",
        weight: 0.5,
        category: DetectedType::Github,
    },
    // jira
    PatternRule {
        pattern: r"(?i)\bjira\b",
        weight: 2.0,
        category: DetectedType::Jira,
    },
    PatternRule {
        pattern: r"\b[A-Z][A-Z0-9]{1,9}-\d+\b",
        weight: 1.5,
        category: DetectedType::Jira,
    },
    PatternRule {
        pattern: r"(?i)\b(tickets?|sprints?|backlog|epics?|story points)\b",
        weight: 1.0,
        category: DetectedType::Jira,
    },
    PatternRule {
        pattern: r"(?i)\b(bugs?|issues?|assigned to)\b",
        weight: 0.5,
        category: DetectedType::Jira,
    },
    // knowledge
    PatternRule {
        pattern: r"(?i)\bknowledge\s*base\b",
        weight: 2.0,
        category: DetectedType::Knowledge,
    },
    PatternRule {
        pattern: r"(?i)\b(our|internal|company|team)\s+(docs?|documentation|wiki|polic(y|ies)|handbook|guidelines?|knowledge)\b",
        weight: 2.0,
        category: DetectedType::Knowledge,
    },
    PatternRule {
        pattern: r"(?i)\b(documents?|docs|documentation|uploaded|files?)\b",
        weight: 0.8,
        category: DetectedType::Knowledge,
    },
    PatternRule {
        pattern: r"(?i)\b(polic(y|ies)|procedures?|guidelines?|onboarding|handbook)\b",
        weight: 0.7,
        category: DetectedType::Knowledge,
    },
    PatternRule {
        pattern: r"(?i)\b(remember|stored|saved|my notes)\b",
        weight: 0.5,
        category: DetectedType::Knowledge,
    },
    // search
    PatternRule {
        pattern: r"(?i)\b(search|google|look\s*up|browse)\b",
        weight: 1.0,
        category: DetectedType::Search,
    },
    PatternRule {
        pattern: r"(?i)\b(latest|current|recent|today|news|trending|this week|this year)\b",
        weight: 1.0,
        category: DetectedType::Search,
    },
    PatternRule {
        pattern: r"(?i)\b(price|weather|stock|release date|score)\b",
        weight: 0.8,
        category: DetectedType::Search,
    },
    PatternRule {
        pattern: r"(?i)\bhttps?://",
        weight: 0.8,
        category: DetectedType::Search,
    },
    PatternRule {
        pattern: r"(?i)\b(find|who is|what happened)\b",
        weight: 0.5,
        category: DetectedType::Search,
    },
];

struct CompiledRule {
    regex: Regex,
    weight: f64,
    category: DetectedType,
}

static RULES: LazyLock<Vec<CompiledRule>> = LazyLock::new(|| {
    PATTERN_TABLE
        .iter()
        .map(|rule| CompiledRule {
            regex: Regex::new(rule.pattern).expect("valid decision pattern"),
            weight: rule.weight,
            category: rule.category,
        })
        .collect()
});

static COMPLEX_KEYWORDS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)\b(compare|comparison|comprehensive|in-depth|detailed|analy[sz]e|analysis|architecture|trade-?offs?|versus|vs\.?|pros and cons)\b",
    )
    .expect("valid complex keyword regex")
});

static MODERATE_KEYWORDS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(explain|summari[sz]e|overview|how does|why|list|describe)\b")
        .expect("valid moderate keyword regex")
});

static SCRAPE_INTENT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(scrape|extract|full (article|page|text|content)|read the (article|page))\b")
        .expect("valid scrape intent regex")
});

/// Activation threshold of a category
pub fn activation_threshold(category: DetectedType) -> f64 {
    match category {
        DetectedType::Github => GITHUB_ACTIVATION,
        DetectedType::Jira => JIRA_ACTIVATION,
        DetectedType::Knowledge => KNOWLEDGE_ACTIVATION,
        DetectedType::Search => SEARCH_ACTIVATION,
        DetectedType::General | DetectedType::None => f64::INFINITY,
    }
}

/// Saturating confidence for a winning score, always below [`MAX_CONFIDENCE`]
pub fn confidence_for_score(score: f64) -> f64 {
    MAX_CONFIDENCE * (1.0 - (-score.max(0.0) / CONFIDENCE_SCALE).exp())
}

/// Complexity from length bands and keywords, whichever is higher
pub fn assess_complexity(message: &str) -> Complexity {
    let length = message.chars().count();
    let by_length = if length < SIMPLE_MAX_CHARS {
        Complexity::Simple
    } else if length < MODERATE_MAX_CHARS {
        Complexity::Moderate
    } else {
        Complexity::Complex
    };

    let by_keywords = if COMPLEX_KEYWORDS.is_match(message) {
        Complexity::Complex
    } else if MODERATE_KEYWORDS.is_match(message) {
        Complexity::Moderate
    } else {
        Complexity::Simple
    };

    by_length.max(by_keywords)
}

/// Deterministic, side-effect-free tool decision analyzer.
#[derive(Debug, Clone)]
pub struct DecisionAnalyzer {
    available_tools: Vec<String>,
}

impl DecisionAnalyzer {
    /// Create an analyzer that only suggests the given tools
    pub fn new(available_tools: Vec<String>) -> Self {
        Self { available_tools }
    }

    /// Classify a message.
    pub fn analyze(&self, message: &str) -> Result<ToolDecision, ClassificationError> {
        let trimmed = message.trim();
        if trimmed.is_empty() {
            return Err(ClassificationError::EmptyMessage);
        }
        let length = message.chars().count();
        if length > MAX_MESSAGE_CHARS {
            return Err(ClassificationError::MessageTooLong {
                length,
                max: MAX_MESSAGE_CHARS,
            });
        }

        let scores = category_scores(trimmed);
        let complexity = assess_complexity(trimmed);

        let winner = CATEGORY_PRIORITY
            .iter()
            .filter_map(|category| {
                let score = scores.get(category).copied().unwrap_or(0.0);
                (score >= activation_threshold(*category)).then_some((*category, score))
            })
            // Strictly-greater keeps the earlier (higher priority) category on ties
            .fold(None, |best: Option<(DetectedType, f64)>, (category, score)| match best {
                Some((_, best_score)) if score <= best_score + f64::EPSILON => best,
                _ => Some((category, score)),
            });

        let Some((category, score)) = winner else {
            let mut decision = ToolDecision::general(no_match_reasoning(&scores));
            decision.confidence = NO_MATCH_CONFIDENCE;
            decision.complexity = complexity;
            decision.estimated_steps = complexity.estimated_steps();
            debug!(complexity = %complexity, "No tool category activated");
            return Ok(decision);
        };

        let suggested_tools = self.suggest_tools(category, trimmed, &scores, complexity);
        let should_use_tools = !suggested_tools.is_empty();
        let reasoning = if should_use_tools {
            format!("Matched {} patterns (score {:.2})", category, score)
        } else {
            format!(
                "Matched {} patterns (score {:.2}) but no matching tool is registered",
                category, score
            )
        };

        debug!(
            category = %category,
            score = score,
            tools = ?suggested_tools,
            "Tool decision made"
        );

        Ok(ToolDecision {
            should_use_tools,
            detected_type: category,
            reasoning,
            confidence: confidence_for_score(score),
            complexity,
            suggested_tools,
            estimated_steps: complexity.estimated_steps(),
            fallback_strategy: fallback_strategy(category),
        })
    }

    fn suggest_tools(
        &self,
        category: DetectedType,
        message: &str,
        scores: &HashMap<DetectedType, f64>,
        complexity: Complexity,
    ) -> Vec<String> {
        let candidates: Vec<&str> = match category {
            DetectedType::Github => {
                let search_score = scores.get(&DetectedType::Search).copied().unwrap_or(0.0);
                if search_score >= SEARCH_ACTIVATION || complexity == Complexity::Complex {
                    vec![GITHUB_REPO, WEB_SEARCH]
                } else {
                    vec![GITHUB_REPO]
                }
            }
            DetectedType::Search => {
                if SCRAPE_INTENT.is_match(message) {
                    vec![KNOWLEDGE_SEARCH, WEB_SEARCH, WEB_SCRAPE]
                } else {
                    vec![KNOWLEDGE_SEARCH, WEB_SEARCH]
                }
            }
            DetectedType::Knowledge => vec![KNOWLEDGE_SEARCH],
            DetectedType::Jira => vec![JIRA_SEARCH],
            DetectedType::General | DetectedType::None => Vec::new(),
        };

        candidates
            .into_iter()
            .filter(|id| self.available_tools.iter().any(|t| t == id))
            .map(str::to_string)
            .collect()
    }
}

fn category_scores(message: &str) -> HashMap<DetectedType, f64> {
    let mut scores: HashMap<DetectedType, f64> = HashMap::new();
    for rule in RULES.iter() {
        if rule.regex.is_match(message) {
            *scores.entry(rule.category).or_insert(0.0) += rule.weight;
        }
    }
    if detect_github_request(message).full_name().is_some() {
        *scores.entry(DetectedType::Github).or_insert(0.0) += COORDINATES_WEIGHT;
    }
    scores
}

fn no_match_reasoning(scores: &HashMap<DetectedType, f64>) -> String {
    let best = CATEGORY_PRIORITY
        .iter()
        .filter_map(|c| scores.get(c).map(|s| (*c, *s)))
        .fold(None, |best: Option<(DetectedType, f64)>, (c, s)| match best {
            Some((_, b)) if s <= b => best,
            _ => Some((c, s)),
        });
    match best {
        Some((category, score)) => format!(
            "Closest category {} scored {:.2}, below its threshold of {:.2}",
            category,
            score,
            activation_threshold(category)
        ),
        None => "No tool patterns matched".to_string(),
    }
}

fn fallback_strategy(category: DetectedType) -> Option<String> {
    let strategy = match category {
        DetectedType::Github => {
            "Query the repository tool with coordinates parsed from the message"
        }
        DetectedType::Search => "Search the knowledge base first, then the web if nothing is found",
        DetectedType::Knowledge => "Search the knowledge base with default parameters",
        DetectedType::Jira => "Search the issue tracker with the message as query",
        DetectedType::General | DetectedType::None => return None,
    };
    Some(strategy.to_string())
}
