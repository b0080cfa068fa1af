//! Heuristic Trigger Classifier
//!
//! Scores gameplay signals for one subject and decides whether a dramatic
//! moment deserves a dynamically generated video. A per-subject cooldown keeps
//! sustained high-pressure exchanges from flooding the queue.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::debug;

/// Score ceiling.
pub const MAX_SCORE: u32 = 100;

/// Classifier weights, threshold and cooldown.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TriggerConfig {
    /// Pressure delta that earns the major weight
    pub pressure_major_delta: i32,
    pub pressure_major_weight: u32,
    /// Pressure delta that earns the minor weight
    pub pressure_minor_delta: i32,
    pub pressure_minor_weight: u32,
    pub contradiction_weight: u32,
    pub accusation_weight: u32,
    pub emotional_keyword_weight: u32,
    pub emotional_keyword_cap: u32,
    pub action_keyword_weight: u32,
    pub action_keyword_cap: u32,
    /// Score at which a trigger fires
    pub threshold: u32,
    /// Minimum turns between two triggered jobs for the same subject. 0 disables.
    pub cooldown_turns: u64,
    /// Floor priority for triggered video jobs
    pub video_priority: i32,
    /// Word stems counted as emotionally charged
    pub emotional_keywords: Vec<String>,
    /// Word stems counted as physical action
    pub action_keywords: Vec<String>,
}

impl Default for TriggerConfig {
    fn default() -> Self {
        Self {
            pressure_major_delta: 2,
            pressure_major_weight: 30,
            pressure_minor_delta: 1,
            pressure_minor_weight: 15,
            contradiction_weight: 35,
            accusation_weight: 25,
            emotional_keyword_weight: 5,
            emotional_keyword_cap: 20,
            action_keyword_weight: 5,
            action_keyword_cap: 15,
            threshold: 60,
            cooldown_turns: 3,
            video_priority: 100,
            emotional_keywords: stems(&[
                "furious", "terrif", "scream", "sob", "tear", "panic", "panick", "rage", "anger",
                "angr", "fear", "desperate", "tremble", "horrif", "weep", "shout",
            ]),
            action_keywords: stems(&[
                "slam", "grab", "run", "flee", "storm", "throw", "shove", "lunge", "bolt",
                "smash", "draw", "point",
            ]),
        }
    }
}

fn stems(words: &[&str]) -> Vec<String> {
    words.iter().map(|w| w.to_string()).collect()
}

/// Signals observed for one subject on one turn.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TriggerSignals {
    /// Change in pressure level since the previous turn
    pub pressure_delta: i32,
    pub contradiction_detected: bool,
    pub direct_accusation: bool,
    pub emotional_keywords: u32,
    pub action_keywords: u32,
}

impl TriggerSignals {
    /// Build signals, counting keywords in the latest generated text.
    pub fn from_text(
        pressure_delta: i32,
        contradiction_detected: bool,
        direct_accusation: bool,
        text: &str,
        config: &TriggerConfig,
    ) -> Self {
        Self {
            pressure_delta,
            contradiction_detected,
            direct_accusation,
            emotional_keywords: count_stems(text, &config.emotional_keywords),
            action_keywords: count_stems(text, &config.action_keywords),
        }
    }
}

/// Endings a keyword may take and still count.
const INFLECTIONS: &[&str] = &[
    "s", "d", "ed", "ing", "y", "ly", "ily", "ied", "ies", "ying", "ic", "ion", "ful", "ous",
    "ously",
];

/// Endings that follow a dropped final `e` or a doubled final consonant.
const STEM_CHANGING: &[&str] = &["ed", "ing", "ion"];

/// Words in `text` that are one of `stems` or a regular inflection of one,
/// case-insensitively.
pub fn count_stems(text: &str, stems: &[String]) -> u32 {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|word| !word.is_empty())
        .map(str::to_lowercase)
        .filter(|word| stems.iter().any(|stem| inflects(word, &stem.to_lowercase())))
        .count() as u32
}

/// `word` is `stem` plus a known ending. Handles "smashes", "trembling" and
/// "slammed" but not "rune" or "pointless".
fn inflects(word: &str, stem: &str) -> bool {
    if stem.is_empty() {
        return false;
    }
    let Some(rest) = word.strip_prefix(stem) else {
        return stem
            .strip_suffix('e')
            .and_then(|trimmed| word.strip_prefix(trimmed))
            .is_some_and(|rest| STEM_CHANGING.contains(&rest));
    };
    if rest.is_empty() || INFLECTIONS.contains(&rest) {
        return true;
    }
    if rest == "es" {
        return ["s", "sh", "ch", "x", "z"].iter().any(|end| stem.ends_with(end));
    }
    // doubled final consonant: "slam" + "m" + "ed"
    match (stem.chars().last(), rest.chars().next()) {
        (Some(last), Some(first)) if last == first && !"aeiouy".contains(last) => {
            STEM_CHANGING.contains(&&rest[first.len_utf8()..])
        }
        _ => false,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TriggerScore {
    pub trigger: bool,
    pub score: u32,
}

/// Outcome of evaluating one turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "decision", rename_all = "snake_case")]
pub enum TriggerDecision {
    Fire { score: u32 },
    BelowThreshold { score: u32 },
    CoolingDown { score: u32, turns_remaining: u64 },
}

impl TriggerDecision {
    pub fn fires(&self) -> bool {
        matches!(self, TriggerDecision::Fire { .. })
    }

    pub fn score(&self) -> u32 {
        match *self {
            TriggerDecision::Fire { score }
            | TriggerDecision::BelowThreshold { score }
            | TriggerDecision::CoolingDown { score, .. } => score,
        }
    }
}

/// Last triggered turn per subject.
#[derive(Debug, Clone, Default)]
pub struct CooldownState {
    last_triggered: HashMap<String, u64>,
}

impl CooldownState {
    pub fn last_triggered(&self, subject_id: &str) -> Option<u64> {
        self.last_triggered.get(subject_id).copied()
    }

    /// Turns left before `subject_id` may trigger again, if any.
    pub fn remaining(&self, subject_id: &str, turn: u64, cooldown: u64) -> Option<u64> {
        let last = self.last_triggered(subject_id)?;
        if turn < last {
            // Out-of-order turn for a subject that already fired.
            return Some(cooldown.max(1));
        }
        let elapsed = turn - last;
        (elapsed < cooldown).then(|| cooldown - elapsed)
    }

    pub fn record(&mut self, subject_id: &str, turn: u64) {
        self.last_triggered.insert(subject_id.to_string(), turn);
    }

    pub fn clear(&mut self) {
        self.last_triggered.clear();
    }
}

pub struct TriggerClassifier {
    config: TriggerConfig,
    cooldowns: Mutex<CooldownState>,
}

impl TriggerClassifier {
    pub fn new(config: TriggerConfig) -> Self {
        Self {
            config,
            cooldowns: Mutex::new(CooldownState::default()),
        }
    }

    pub fn config(&self) -> &TriggerConfig {
        &self.config
    }

    /// Additive score, capped at [`MAX_SCORE`]. Ignores cooldown.
    pub fn score(&self, signals: &TriggerSignals) -> TriggerScore {
        let c = &self.config;
        let mut score = 0u32;

        if signals.pressure_delta >= c.pressure_major_delta {
            score = score.saturating_add(c.pressure_major_weight);
        } else if signals.pressure_delta >= c.pressure_minor_delta {
            score = score.saturating_add(c.pressure_minor_weight);
        }
        if signals.contradiction_detected {
            score = score.saturating_add(c.contradiction_weight);
        }
        if signals.direct_accusation {
            score = score.saturating_add(c.accusation_weight);
        }
        score = score.saturating_add(
            signals
                .emotional_keywords
                .saturating_mul(c.emotional_keyword_weight)
                .min(c.emotional_keyword_cap),
        );
        score = score.saturating_add(
            signals
                .action_keywords
                .saturating_mul(c.action_keyword_weight)
                .min(c.action_keyword_cap),
        );

        let score = score.min(MAX_SCORE);
        TriggerScore {
            trigger: score >= c.threshold,
            score,
        }
    }

    /// Score a turn and apply the subject's cooldown. A firing decision starts
    /// a new cooldown window.
    pub fn evaluate(&self, subject_id: &str, turn: u64, signals: &TriggerSignals) -> TriggerDecision {
        let TriggerScore { trigger, score } = self.score(signals);
        if !trigger {
            return TriggerDecision::BelowThreshold { score };
        }

        let mut cooldowns = self.cooldowns.lock();
        if let Some(turns_remaining) =
            cooldowns.remaining(subject_id, turn, self.config.cooldown_turns)
        {
            debug!(
                subject_id,
                turn, score, turns_remaining, "Trigger suppressed by cooldown"
            );
            return TriggerDecision::CoolingDown {
                score,
                turns_remaining,
            };
        }
        cooldowns.record(subject_id, turn);
        TriggerDecision::Fire { score }
    }

    pub fn last_triggered(&self, subject_id: &str) -> Option<u64> {
        self.cooldowns.lock().last_triggered(subject_id)
    }

    pub fn reset(&self) {
        self.cooldowns.lock().clear();
    }
}

impl Default for TriggerClassifier {
    fn default() -> Self {
        Self::new(TriggerConfig::default())
    }
}
