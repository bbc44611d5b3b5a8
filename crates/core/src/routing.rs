//! Triage classification and confirmation-reply reading.
//!
//! Both classifiers are deterministic keyword scans, never a model call: the
//! router must be testable turn-by-turn and must refuse to guess. Ambiguous
//! or off-topic input is an error the caller turns into a clarification
//! question.

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SpecialistKind {
    Production,
    Demand,
    Data,
}

impl SpecialistKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Production => "production",
            Self::Demand => "demand",
            Self::Data => "data",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Production => "production planner",
            Self::Demand => "demand planner",
            Self::Data => "data steward",
        }
    }
}

impl std::fmt::Display for SpecialistKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum RoutingAmbiguityError {
    #[error("the request does not mention a supply-chain topic that can be routed")]
    OffTopic,
    #[error("the request fits both the {} and the {}", first.label(), second.label())]
    Tied { first: SpecialistKind, second: SpecialistKind },
}

const PRODUCTION_TERMS: &[&str] = &[
    "production",
    "produce",
    "manufactur",
    "capacity",
    "output",
    "inventory",
    "stock",
    "shortage",
    "plan",
];

const DEMAND_TERMS: &[&str] = &[
    "demand",
    "forecast",
    "sales",
    "orders",
    "trend",
    "smoothing",
    "moving average",
    "projection",
    "outlook",
];

const DATA_TERMS: &[&str] = &[
    "generate",
    "synthetic",
    "seed",
    "populate",
    "sample data",
    "delete all",
    "wipe",
    "purge",
    "reset",
];

/// Routes one user turn to a specialist, or refuses.
///
/// Scoring is a substring hit count per vocabulary; the strict maximum wins.
/// No hits is off-topic, a tie at the top is ambiguous, and neither is ever
/// defaulted to a specialist.
pub fn classify(input: &str) -> Result<SpecialistKind, RoutingAmbiguityError> {
    let lowered = input.to_lowercase();
    let score = |terms: &[&str]| terms.iter().filter(|term| lowered.contains(*term)).count();

    let scored = [
        (SpecialistKind::Data, score(DATA_TERMS)),
        (SpecialistKind::Production, score(PRODUCTION_TERMS)),
        (SpecialistKind::Demand, score(DEMAND_TERMS)),
    ];

    let best = scored.iter().map(|&(_, score)| score).max().unwrap_or(0);
    if best == 0 {
        return Err(RoutingAmbiguityError::OffTopic);
    }

    let mut leaders = scored.iter().filter(|&&(_, score)| score == best);
    let (winner, _) = leaders.next().copied().unwrap_or((SpecialistKind::Production, 0));
    if let Some(&(runner_up, _)) = leaders.next() {
        return Err(RoutingAmbiguityError::Tied { first: winner, second: runner_up });
    }

    Ok(winner)
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReplyKind {
    Affirmative,
    Negative,
    Other,
}

const AFFIRMATIVE_WORDS: &[&str] = &[
    "yes", "y", "yep", "yeah", "ok", "okay", "confirm", "confirmed", "proceed", "sure", "si",
    "sí", "dale", "adelante", "confirmo",
];

const AFFIRMATIVE_PHRASES: &[&str] = &["go ahead", "do it", "sounds good", "please proceed"];

const NEGATIVE_WORDS: &[&str] = &["no", "n", "nope", "cancel", "stop", "abort", "cancelar"];

/// Reads a reply to a pending proposal.
///
/// Anything that is neither a clear assent nor a short, bare rejection is
/// `Other`: a longer negative-leading reply ("no, make it 600") is treated as
/// revision input rather than a cancellation.
pub fn classify_reply(input: &str) -> ReplyKind {
    let lowered = input.trim().to_lowercase();
    let normalized = lowered.trim_end_matches(['.', '!']).trim();
    if normalized.is_empty() {
        return ReplyKind::Other;
    }

    if AFFIRMATIVE_PHRASES.iter().any(|phrase| normalized.starts_with(phrase)) {
        return ReplyKind::Affirmative;
    }

    let first = normalized.split([' ', ',']).next().unwrap_or(normalized);
    if AFFIRMATIVE_WORDS.contains(&first) {
        return ReplyKind::Affirmative;
    }

    if NEGATIVE_WORDS.contains(&first) && normalized.split_whitespace().count() <= 3 {
        return ReplyKind::Negative;
    }

    ReplyKind::Other
}
