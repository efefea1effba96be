// SYNOID Repurpose - Retrieval Query Builder
// Copyright (c) 2026 Xing_The_Creator | SYNOID

use std::collections::HashSet;

use tracing::debug;

use crate::agent::classifier::{Classification, RhetoricalRole};
use crate::agent::script::ScriptLine;

/// Hints that share this much vocabulary with the reference line are echoes, not targets.
const ECHO_OVERLAP: f64 = 0.6;

/// Turns a classified line into a search for the *kind* of personal fact it needs, so the
/// index returns analogous facts rather than chunks that merely share the line's phrasing.
#[derive(Debug, Clone)]
pub struct RetrievalQueryBuilder {
    persona_name: String,
}

impl Default for RetrievalQueryBuilder {
    fn default() -> Self {
        Self::new("the creator")
    }
}

impl RetrievalQueryBuilder {
    pub fn new(persona_name: &str) -> Self {
        Self {
            persona_name: persona_name.to_string(),
        }
    }

    /// `None` for filler: retrieval is skipped entirely.
    pub fn build_query(&self, line: &ScriptLine, role: RhetoricalRole) -> Option<String> {
        let base = match role {
            RhetoricalRole::Filler => return None,
            RhetoricalRole::Hook => "current obsession and bold mission: what they are building right now and why it matters",
            RhetoricalRole::Backstory => "origin story: how they started, what they did before, and why they began building their current product",
            RhetoricalRole::Credibility => "experience and credentials: past projects, skills, time spent in the field",
            RhetoricalRole::Proof => "quantitative traction and concrete results: users, growth, milestones, outcomes",
            RhetoricalRole::Lesson => "beliefs, lessons learned, and communication style",
            RhetoricalRole::Cta => "current product or offer and how people can try it, join, or follow along",
        };

        let mut facets = Vec::new();
        let lower = line.raw_text.to_lowercase();
        if lower.chars().any(|c| c.is_ascii_digit()) || mentions_duration(&lower) {
            facets.push("timeframes and dates");
        }
        if lower.contains(" we ") || lower.starts_with("we ") || lower.contains("team") {
            facets.push("team and collaborators");
        }

        let query = if facets.is_empty() {
            format!("{}'s {}", self.persona_name, base)
        } else {
            format!("{}'s {}; {}", self.persona_name, base, facets.join(", "))
        };
        debug!("[QUERY] {} -> {}", role, query);
        Some(query)
    }

    /// Prefer the classifier's proposed target when it names a kind of fact rather than
    /// restating the reference line.
    pub fn build_query_with_hint(&self, line: &ScriptLine, classification: &Classification) -> Option<String> {
        if classification.role == RhetoricalRole::Filler {
            return None;
        }
        match classification.retrieval_hint.as_deref() {
            Some(hint) if !echoes(hint, &line.raw_text) => {
                debug!("[QUERY] {} -> hint {:?}", classification.role, hint);
                Some(hint.to_string())
            }
            _ => self.build_query(line, classification.role),
        }
    }
}

fn mentions_duration(lower: &str) -> bool {
    ["year", "month", "week", "days", "since", "ago"]
        .iter()
        .any(|w| lower.contains(w))
}

fn content_words(text: &str) -> HashSet<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| w.len() > 2)
        .map(str::to_string)
        .collect()
}

/// Share of the hint's content words that also occur in the line.
fn echoes(hint: &str, line: &str) -> bool {
    let hint_words = content_words(hint);
    if hint_words.is_empty() {
        return true;
    }
    let line_words = content_words(line);
    let shared = hint_words.intersection(&line_words).count();
    shared as f64 / hint_words.len() as f64 >= ECHO_OVERLAP
}

#[cfg(test)]
mod tests {
    use super::*;

    fn line(text: &str) -> ScriptLine {
        ScriptLine::new(text, None)
    }

    #[test]
    fn test_filler_builds_no_query() {
        let builder = RetrievalQueryBuilder::default();
        assert_eq!(builder.build_query(&line("okay"), RhetoricalRole::Filler), None);
    }

    #[test]
    fn test_query_names_fact_kind_not_line_content() {
        let builder = RetrievalQueryBuilder::new("Antony");
        let reference = line("I've been a fitness freak for five years");
        let query = builder.build_query(&reference, RhetoricalRole::Backstory).unwrap();
        assert!(query.contains("origin story"));
        assert!(query.contains("timeframes"));
        assert!(!query.contains("fitness"));
    }

    #[test]
    fn test_echoing_hint_is_replaced() {
        let builder = RetrievalQueryBuilder::new("Antony");
        let reference = line("I've been a fitness freak for five years");
        let echo = Classification {
            role: RhetoricalRole::Backstory,
            retrieval_hint: Some("fitness freak for five years".into()),
        };
        let query = builder.build_query_with_hint(&reference, &echo).unwrap();
        assert!(!query.contains("fitness"));

        let useful = Classification {
            role: RhetoricalRole::Backstory,
            retrieval_hint: Some("why Antony started building his social app".into()),
        };
        assert_eq!(
            builder.build_query_with_hint(&reference, &useful).as_deref(),
            Some("why Antony started building his social app")
        );
    }
}
