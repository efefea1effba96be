// SYNOID Repurpose - Script Line Classifier
// Copyright (c) 2026 Xing_The_Creator | SYNOID
//
// Assigns one rhetorical role per script line. The rule-based classifier is the fast,
// deterministic path (and the test double); the judgment classifier asks the model and falls
// back to the rules whenever the model is unreachable or answers outside the role set.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use crate::agent::retry::with_backoff;
use crate::agent::services::{JudgmentRequest, JudgmentService};
use crate::config::RetryPolicy;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RhetoricalRole {
    Hook,
    Backstory,
    Credibility,
    Proof,
    Lesson,
    Cta,
    Filler,
}

impl RhetoricalRole {
    pub const ALL: [RhetoricalRole; 7] = [
        RhetoricalRole::Hook,
        RhetoricalRole::Backstory,
        RhetoricalRole::Credibility,
        RhetoricalRole::Proof,
        RhetoricalRole::Lesson,
        RhetoricalRole::Cta,
        RhetoricalRole::Filler,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            RhetoricalRole::Hook => "hook",
            RhetoricalRole::Backstory => "backstory",
            RhetoricalRole::Credibility => "credibility",
            RhetoricalRole::Proof => "proof",
            RhetoricalRole::Lesson => "lesson",
            RhetoricalRole::Cta => "cta",
            RhetoricalRole::Filler => "filler",
        }
    }

    /// Parse a model label, accepting the aliases models tend to produce.
    pub fn parse(label: &str) -> Option<Self> {
        let normalized = label.trim().to_lowercase().replace(['-', ' '], "_");
        match normalized.as_str() {
            "hook" | "opening_hook" => Some(RhetoricalRole::Hook),
            "backstory" | "founder_backstory" | "origin" | "origin_story" | "story" => {
                Some(RhetoricalRole::Backstory)
            }
            "credibility" | "authority" => Some(RhetoricalRole::Credibility),
            "proof" | "social_proof" | "results" => Some(RhetoricalRole::Proof),
            "lesson" | "insight" | "takeaway" => Some(RhetoricalRole::Lesson),
            "cta" | "call_to_action" => Some(RhetoricalRole::Cta),
            "filler" | "transition" => Some(RhetoricalRole::Filler),
            _ => None,
        }
    }

    /// Every role except filler needs retrieved facts before it may be rewritten.
    pub fn requires_grounding(&self) -> bool {
        *self != RhetoricalRole::Filler
    }
}

impl fmt::Display for RhetoricalRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where a line sits in its script.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LinePosition {
    pub index: usize,
    pub total: usize,
}

impl LinePosition {
    pub fn is_first(&self) -> bool {
        self.index == 0
    }

    pub fn is_last(&self) -> bool {
        self.total > 0 && self.index + 1 == self.total
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Classification {
    pub role: RhetoricalRole,
    /// Retrieval target proposed alongside the role, if any.
    pub retrieval_hint: Option<String>,
}

impl Classification {
    pub fn new(role: RhetoricalRole) -> Self {
        Self {
            role,
            retrieval_hint: None,
        }
    }
}

#[async_trait]
pub trait LineClassifier: Send + Sync {
    async fn classify(&self, line: &str, position: LinePosition) -> Classification;
}

const CTA_MARKERS: &[&str] = &[
    "link in bio", "follow", "subscribe", "comment", "sign up", "signup", "download", "join",
    "dm me", "check out", "click", "waitlist", "try it", "grab",
];
const PROOF_MARKERS: &[&str] = &[
    "%", "$", "users", "customers", "followers", "downloads", "revenue", "views", "sold",
    "grew", "made", "signups", "mrr",
];
const CREDIBILITY_MARKERS: &[&str] = &[
    "worked at", "worked with", "featured", "certified", "expert", "award", "former",
    "built for", "trusted by", "i've helped", "i have helped", "degree",
];
const BACKSTORY_MARKERS: &[&str] = &[
    "i've been", "i have been", "i was", "when i", "back in", "years ago", "growing up",
    "i started", "used to", "since i", "my journey", "i grew up", "i quit", "i left",
];
const LESSON_MARKERS: &[&str] = &[
    "learned", "lesson", "the truth is", "secret", "remember", "you need", "never", "always",
    "if you", "the key", "here's why", "realized", "stop",
];
const HOOK_MARKERS: &[&str] = &[
    "imagine", "this is how", "nobody", "what if", "here's how", "i have", "watch",
    "you won't", "pov", "day",
];
const FILLER_PHRASES: &[&str] = &[
    "okay", "ok", "so", "um", "uh", "yeah", "alright", "let's go", "anyway", "right",
    "and", "but", "like", "so yeah",
];

/// Deterministic content and position heuristics.
#[derive(Debug, Clone, Default)]
pub struct RuleBasedClassifier;

impl RuleBasedClassifier {
    pub fn new() -> Self {
        Self
    }

    pub fn classify_sync(&self, line: &str, position: LinePosition) -> RhetoricalRole {
        let trimmed = line.trim();
        let lower = trimmed.to_lowercase().replace('\u{2019}', "'");

        if is_filler(trimmed, &lower) {
            return RhetoricalRole::Filler;
        }

        let words = word_view(&lower);
        let has_digit = lower.chars().any(|c| c.is_ascii_digit());
        let contains_any = |markers: &[&str]| markers.iter().any(|m| has_marker(&words, &lower, m));

        if contains_any(CTA_MARKERS) {
            return RhetoricalRole::Cta;
        }
        if has_digit && contains_any(PROOF_MARKERS) {
            return RhetoricalRole::Proof;
        }
        if contains_any(CREDIBILITY_MARKERS) {
            return RhetoricalRole::Credibility;
        }
        if position.is_first() && (contains_any(HOOK_MARKERS) || lower.ends_with('?')) {
            return RhetoricalRole::Hook;
        }
        if contains_any(BACKSTORY_MARKERS) {
            return RhetoricalRole::Backstory;
        }
        if contains_any(LESSON_MARKERS) {
            return RhetoricalRole::Lesson;
        }
        if contains_any(HOOK_MARKERS) || lower.ends_with('?') {
            return RhetoricalRole::Hook;
        }

        if position.is_first() {
            RhetoricalRole::Hook
        } else if position.is_last() {
            RhetoricalRole::Cta
        } else if is_first_person(&lower) {
            RhetoricalRole::Backstory
        } else {
            RhetoricalRole::Lesson
        }
    }
}

#[async_trait]
impl LineClassifier for RuleBasedClassifier {
    async fn classify(&self, line: &str, position: LinePosition) -> Classification {
        Classification::new(self.classify_sync(line, position))
    }
}

fn is_filler(trimmed: &str, lower: &str) -> bool {
    if !trimmed.chars().any(char::is_alphabetic) {
        return true;
    }
    // Scene scaffolding from rendered raw scripts.
    if lower.starts_with("[scene") || lower.starts_with("visual:") {
        return true;
    }
    let bare = lower.trim_matches(|c: char| !c.is_alphanumeric() && c != '\'' && c != ' ');
    if FILLER_PHRASES.contains(&bare) {
        return true;
    }
    bare.split_whitespace().count() < 3
        && bare
            .split_whitespace()
            .all(|w| FILLER_PHRASES.contains(&w) || w.len() <= 2)
}

/// Lowercased text with punctuation turned into spaces and padded, so word markers can be
/// matched on boundaries (" follow " must not fire on "followers").
fn word_view(lower: &str) -> String {
    let mut view = String::with_capacity(lower.len() + 2);
    view.push(' ');
    for c in lower.chars() {
        if c.is_alphanumeric() || c == '\'' {
            view.push(c);
        } else if !view.ends_with(' ') {
            view.push(' ');
        }
    }
    if !view.ends_with(' ') {
        view.push(' ');
    }
    view
}

fn has_marker(words: &str, lower: &str, marker: &str) -> bool {
    if marker.chars().all(|c| c.is_alphanumeric() || c == ' ' || c == '\'') {
        words.contains(&format!(" {} ", marker))
    } else {
        lower.contains(marker)
    }
}

fn is_first_person(lower: &str) -> bool {
    lower
        .split(|c: char| !c.is_alphanumeric() && c != '\'')
        .any(|w| matches!(w, "i" | "i'm" | "i've" | "my" | "me" | "we" | "our"))
}

/// Model-backed classifier with rule-based fallback and per-run memoisation.
pub struct JudgmentClassifier {
    judge: Arc<dyn JudgmentService>,
    rules: RuleBasedClassifier,
    retry: RetryPolicy,
    persona_name: String,
    memo: Mutex<HashMap<(String, LinePosition), Classification>>,
}

impl JudgmentClassifier {
    pub fn new(judge: Arc<dyn JudgmentService>, retry: RetryPolicy, persona_name: &str) -> Self {
        Self {
            judge,
            rules: RuleBasedClassifier::new(),
            retry,
            persona_name: persona_name.to_string(),
            memo: Mutex::new(HashMap::new()),
        }
    }

    fn prompt(&self, line: &str, position: LinePosition, heuristic: RhetoricalRole) -> String {
        format!(
            "You are analyzing one line from a reference marketing script.\n\
             Line ({} of {}): \"{}\"\n\
             A keyword heuristic suggests: {}\n\n\
             1. Pick rhetorical_role as exactly ONE of: [hook, backstory, credibility, proof, lesson, cta, filler].\n\
             2. Write retrieval_query: a short description of the KIND of true fact about {} that should be \
             retrieved from their personal memory to replace this line truthfully (origin story, traction numbers, \
             current product, beliefs...). Describe the kind of fact, do not repeat the line's own details.\n\
             3. If the line is filler and needs no personalization, use rhetorical_role \"filler\" and retrieval_query \"none\".\n\n\
             Return ONLY a JSON object like {{\"rhetorical_role\": \"backstory\", \"retrieval_query\": \"how they started building their product\"}}",
            position.index + 1,
            position.total,
            line.trim(),
            heuristic,
            self.persona_name
        )
    }
}

#[async_trait]
impl LineClassifier for JudgmentClassifier {
    async fn classify(&self, line: &str, position: LinePosition) -> Classification {
        let key = (line.trim().to_string(), position);
        if let Ok(memo) = self.memo.lock() {
            if let Some(hit) = memo.get(&key) {
                return hit.clone();
            }
        }

        let heuristic = self.rules.classify_sync(line, position);
        let request = JudgmentRequest::new(
            "You classify lines of short-form marketing scripts. Answer with JSON only.",
            self.prompt(line, position, heuristic),
            0.0,
        );

        let classification = match with_backoff(&self.retry, "classify line", || self.judge.complete(&request)).await {
            Ok(answer) => parse_classification(&answer).unwrap_or_else(|| {
                warn!(
                    "[CLASSIFY] Unusable judgment for line {}, using heuristic '{}'",
                    position.index + 1,
                    heuristic
                );
                Classification::new(heuristic)
            }),
            Err(e) => {
                warn!(
                    "[CLASSIFY] Judgment call failed for line {} ({}), using heuristic '{}'",
                    position.index + 1,
                    e,
                    heuristic
                );
                Classification::new(heuristic)
            }
        };

        debug!(
            "[CLASSIFY] Line {} -> {} (hint: {:?})",
            position.index + 1,
            classification.role,
            classification.retrieval_hint
        );

        if let Ok(mut memo) = self.memo.lock() {
            memo.entry(key).or_insert_with(|| classification.clone()).clone()
        } else {
            classification
        }
    }
}

/// Pull `{rhetorical_role, retrieval_query}` out of a model answer, tolerating code fences
/// and chatter around the JSON object.
pub fn parse_classification(answer: &str) -> Option<Classification> {
    let start = answer.find('{')?;
    let end = answer.rfind('}')?;
    if end < start {
        return None;
    }
    let value: Value = serde_json::from_str(&answer[start..=end]).ok()?;
    let role = RhetoricalRole::parse(value["rhetorical_role"].as_str()?)?;

    let retrieval_hint = value["retrieval_query"]
        .as_str()
        .map(str::trim)
        .filter(|q| !q.is_empty() && !matches!(q.to_lowercase().as_str(), "none" | "n/a" | "null"))
        .map(str::to_string);

    Some(Classification {
        role,
        retrieval_hint: if role == RhetoricalRole::Filler {
            None
        } else {
            retrieval_hint
        },
    })
}
