// SYNOID Repurpose - Grounded Rewriter
// Copyright (c) 2026 Xing_The_Creator | SYNOID
//
// Rewrites one reference line into the persona's own story using only retrieved facts.
// Grounding-or-abstain: whenever the facts are missing, the model is unreachable, or the
// safeguard rejects the draft, the original line passes through untouched.

use std::collections::HashSet;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::agent::classifier::RhetoricalRole;
use crate::agent::memory_index::RetrievalResult;
use crate::agent::retry::with_backoff;
use crate::agent::script::ScriptLine;
use crate::agent::services::{JudgmentRequest, JudgmentService};
use crate::config::{PersonalizerConfig, RetryPolicy};
use crate::error::GroundingViolation;

const NO_CONTEXT: &str = "(no specific facts; stay vague but honest)";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RewriteOutcome {
    Rewritten,
    /// Filler lines are never personalised.
    Filler,
    /// No retrieved facts for a role that needs them.
    Ungrounded,
    /// The rewrite (or an earlier stage for this line) failed after retries.
    ServiceFailed(String),
    /// Every draft tripped the grounding safeguard.
    GroundingFallback(String),
}

impl RewriteOutcome {
    pub fn is_pass_through(&self) -> bool {
        !matches!(self, RewriteOutcome::Rewritten)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RewrittenLine {
    pub original: ScriptLine,
    pub role: RhetoricalRole,
    pub used_context: RetrievalResult,
    pub output_text: String,
    pub outcome: RewriteOutcome,
}

impl RewrittenLine {
    pub fn pass_through(
        original: &ScriptLine,
        role: RhetoricalRole,
        used_context: RetrievalResult,
        outcome: RewriteOutcome,
    ) -> Self {
        Self {
            output_text: original.raw_text.clone(),
            original: original.clone(),
            role,
            used_context,
            outcome,
        }
    }
}

/// Per-request knobs for one personalization pass.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RewriteOptions {
    pub extra_instructions: Option<String>,
    /// Set on regeneration requests to push the model toward a different draft.
    pub variation: Option<u64>,
}

pub struct GroundedRewriter {
    judge: Arc<dyn JudgmentService>,
    retry: RetryPolicy,
    persona_name: String,
    temperature: f32,
    require_grounding: bool,
    grounding_retries: u32,
}

impl GroundedRewriter {
    pub fn new(judge: Arc<dyn JudgmentService>, config: &PersonalizerConfig) -> Self {
        Self {
            judge,
            retry: config.retry.clone(),
            persona_name: config.persona_name.clone(),
            temperature: config.temperature,
            require_grounding: config.require_grounding,
            grounding_retries: config.grounding_retries,
        }
    }

    pub async fn rewrite(
        &self,
        line: &ScriptLine,
        role: RhetoricalRole,
        context: RetrievalResult,
        options: &RewriteOptions,
    ) -> RewrittenLine {
        if role == RhetoricalRole::Filler {
            return RewrittenLine::pass_through(line, role, RetrievalResult::default(), RewriteOutcome::Filler);
        }
        if context.is_empty() && self.require_grounding {
            debug!("[REWRITE] No facts for {} line, keeping original", role);
            return RewrittenLine::pass_through(line, role, context, RewriteOutcome::Ungrounded);
        }

        let facts = context.joined();
        let mut feedback: Option<String> = None;
        let mut last_violation = GroundingViolation::new("no draft produced");

        for attempt in 0..=self.grounding_retries {
            let request = JudgmentRequest::new(
                format!(
                    "You are {}. You rewrite lines of marketing scripts into your own true story.",
                    self.persona_name
                ),
                self.prompt(line, role, &facts, options, feedback.as_deref()),
                self.temperature_for(options),
            );

            let answer = match with_backoff(&self.retry, "rewrite line", || self.judge.complete(&request)).await {
                Ok(answer) => answer,
                Err(e) => {
                    warn!("[REWRITE] Rewrite failed, keeping original line: {}", e);
                    return RewrittenLine::pass_through(line, role, context, RewriteOutcome::ServiceFailed(e.to_string()));
                }
            };

            let draft = clean_output(&answer);
            match check_grounding(&draft, &line.raw_text, &facts) {
                Ok(()) => {
                    info!("[REWRITE] {} line rewritten", role);
                    return RewrittenLine {
                        original: line.clone(),
                        role,
                        used_context: context,
                        output_text: draft,
                        outcome: RewriteOutcome::Rewritten,
                    };
                }
                Err(violation) => {
                    warn!(
                        "[REWRITE] Draft {} rejected by grounding safeguard: {}",
                        attempt + 1,
                        violation
                    );
                    feedback = Some(violation.reason.clone());
                    last_violation = violation;
                }
            }
        }

        RewrittenLine::pass_through(
            line,
            role,
            context,
            RewriteOutcome::GroundingFallback(last_violation.reason),
        )
    }

    fn temperature_for(&self, options: &RewriteOptions) -> f32 {
        if options.variation.is_some() {
            (self.temperature + 0.2).min(1.2)
        } else {
            self.temperature
        }
    }

    fn prompt(
        &self,
        line: &ScriptLine,
        role: RhetoricalRole,
        facts: &str,
        options: &RewriteOptions,
        feedback: Option<&str>,
    ) -> String {
        let mut prompt = format!(
            "Rewrite one line from a reference script so it is entirely about YOU, your real story and your current work.\n\n\
             Context (true facts about you):\n{}\n\n\
             Rhetorical role of this line: {}\n\
             Original line (copy ONLY its structure and intent, never its details):\n{}\n\n\
             Rules:\n\
             - Every detail must come from the context. Replace anything unrelated in the original with your real story.\n\
             - Never invent achievements, numbers, dates or durations that the context does not state.\n\
             - Do not merge facts into claims the context does not make.\n\
             - Keep the same purpose ({}) and roughly the same length.\n\
             - Fast, direct, no fluff, no slang. 1-2 sentences.\n\
             - Output ONLY the rewritten line.",
            if facts.is_empty() { NO_CONTEXT } else { facts },
            role,
            line.raw_text.trim(),
            role
        );

        if let Some(extra) = options.extra_instructions.as_deref().map(str::trim).filter(|e| !e.is_empty()) {
            prompt.push_str(&format!("\n\nAdditional instructions:\n{}", extra));
        }
        if let Some(nonce) = options.variation {
            prompt.push_str(&format!(
                "\n\nThis is regeneration #{}: take a different angle and different wording than an obvious first draft, using the same facts.",
                nonce
            ));
        }
        if let Some(reason) = feedback {
            prompt.push_str(&format!(
                "\n\nYour previous draft was rejected: {}. Use only facts and numbers that appear in the context.",
                reason
            ));
        }
        prompt
    }
}

/// Strip the wrapping models like to add: labels, quotes, extra paragraphs, line breaks.
pub fn clean_output(answer: &str) -> String {
    let first_block = answer
        .trim()
        .split("\n\n")
        .find(|b| !b.trim().is_empty())
        .unwrap_or("");

    let mut text = first_block.split_whitespace().collect::<Vec<_>>().join(" ");
    for label in ["rewritten line:", "rewritten:", "output:", "line:"] {
        if text.to_lowercase().starts_with(label) {
            text = text[label.len()..].trim_start().to_string();
        }
    }

    strip_paired_wrapping(&text).to_string()
}

/// Peel quote or emphasis pairs off both ends. A lone trailing `'` is a possessive, not a quote.
fn strip_paired_wrapping(text: &str) -> &str {
    const PAIRS: &[(char, char)] = &[('"', '"'), ('\'', '\''), ('\u{201c}', '\u{201d}'), ('*', '*')];
    let mut text = text.trim();
    loop {
        let (Some(first), Some(last)) = (text.chars().next(), text.chars().last()) else {
            return text;
        };
        if text.chars().count() < 2 || !PAIRS.contains(&(first, last)) {
            return text;
        }
        text = text[first.len_utf8()..text.len() - last.len_utf8()].trim();
    }
}

/// Reject drafts that carry numbers absent from the facts, come back empty, or balloon far
/// past the original line's length.
pub fn check_grounding(draft: &str, original: &str, facts: &str) -> Result<(), GroundingViolation> {
    if draft.trim().is_empty() {
        return Err(GroundingViolation::new("empty rewrite"));
    }

    let original_len = original.chars().count();
    let limit = (original_len * 3).max(original_len + 200);
    if draft.chars().count() > limit {
        return Err(GroundingViolation::new(format!(
            "rewrite is {} chars for a {} char line",
            draft.chars().count(),
            original_len
        )));
    }

    let supported = numbers_in(facts);
    let unsupported: Vec<String> = numbers_in(draft)
        .into_iter()
        .filter(|n| !supported.contains(n))
        .collect();
    if !unsupported.is_empty() {
        let mut unsupported = unsupported;
        unsupported.sort();
        return Err(GroundingViolation::new(format!(
            "numbers not present in context: {}",
            unsupported.join(", ")
        )));
    }
    Ok(())
}

fn number_word(word: &str) -> Option<u64> {
    // "one" is left out on purpose: it is far more often a pronoun than a count.
    let value = match word {
        "zero" => 0,
        "two" => 2,
        "three" => 3,
        "four" => 4,
        "five" => 5,
        "six" => 6,
        "seven" => 7,
        "eight" => 8,
        "nine" => 9,
        "ten" => 10,
        "eleven" => 11,
        "twelve" => 12,
        "thirteen" => 13,
        "fourteen" => 14,
        "fifteen" => 15,
        "sixteen" => 16,
        "seventeen" => 17,
        "eighteen" => 18,
        "nineteen" => 19,
        "twenty" => 20,
        "thirty" => 30,
        "forty" => 40,
        "fifty" => 50,
        "sixty" => 60,
        "seventy" => 70,
        "eighty" => 80,
        "ninety" => 90,
        "hundred" => 100,
        "thousand" => 1_000,
        "million" => 1_000_000,
        _ => return None,
    };
    Some(value)
}

/// A comma at `i` followed by exactly three digits.
fn is_thousands_group(chars: &[char], i: usize) -> bool {
    (1..=3).all(|k| chars.get(i + k).is_some_and(|c| c.is_ascii_digit()))
        && !chars.get(i + 4).is_some_and(|c| c.is_ascii_digit())
}

/// Every numeric claim in `text`, normalised: digit runs lose their thousands separators and
/// spelled-out numbers become digits ("twenty-one" -> "21").
pub fn numbers_in(text: &str) -> HashSet<String> {
    let mut found = HashSet::new();
    let lower = text.to_lowercase();

    let chars: Vec<char> = lower.chars().collect();
    let mut i = 0;
    while i < chars.len() {
        if chars[i].is_ascii_digit() {
            let mut digits = String::new();
            while i < chars.len() {
                let c = chars[i];
                if c.is_ascii_digit() {
                    digits.push(c);
                } else if c == ',' && is_thousands_group(&chars, i) {
                    // Separator only: "10,000" is one number, "1,2,3" is three.
                } else if c == '.' && chars.get(i + 1).is_some_and(|n| n.is_ascii_digit()) {
                    digits.push('.');
                } else {
                    break;
                }
                i += 1;
            }
            found.insert(digits);
        } else {
            i += 1;
        }
    }

    for word in lower.split(|c: char| !c.is_alphanumeric() && c != '-') {
        let parts: Vec<&str> = word.split('-').filter(|p| !p.is_empty()).collect();
        match parts.as_slice() {
            [tens, unit] => match (number_word(tens), number_word(unit).or((*unit == "one").then_some(1))) {
                (Some(t), Some(u)) if (20..=90).contains(&t) && u < 10 => {
                    found.insert((t + u).to_string());
                }
                (t, u) => {
                    found.extend(t.map(|v| v.to_string()));
                    found.extend(u.filter(|_| *unit != "one").map(|v| v.to_string()));
                }
            },
            _ => {
                for part in parts {
                    if let Some(v) = number_word(part) {
                        found.insert(v.to_string());
                    }
                }
            }
        }
    }
    found
}
