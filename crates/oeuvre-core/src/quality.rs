//! Heuristic quality scoring for extracted text.
//!
//! Scraped pages mix real prose with navigation, cookie banners and
//! sign-up prompts. [`score_text`] rates a text in `[0, 1]` so ingestion
//! can drop documents that carry little information before they are
//! chunked and embedded.
//!
//! # Scoring
//!
//! | Signal | Weight |
//! |--------|--------|
//! | Length (saturates at 300 words) | 0.25 |
//! | Structure (paragraphs, sentences) | 0.20 |
//! | Language quality sub-score | 0.35 |
//! | Meaningful content | 0.20 |
//! | Title present | 0.05 bonus |
//! | Boilerplate phrase hits | −0.10 each, capped at −0.40 |
//!
//! Texts under the minimum word count skip the weighted sum entirely
//! and score at most [`SHORT_TEXT_CEILING`], which keeps them in the
//! low band.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

/// Highest score a text below the minimum word count can receive.
pub const SHORT_TEXT_CEILING: f32 = 0.3;

/// Default minimum word count for a text to be scored normally.
pub const DEFAULT_MIN_WORDS: usize = 50;

const LOW_BAND_MAX: f32 = 0.4;
const HIGH_BAND_MIN: f32 = 0.7;

const BOILERPLATE_PENALTY: f32 = 0.1;
const BOILERPLATE_PENALTY_CAP: f32 = 0.4;

/// Navigational and boilerplate phrases, matched case-insensitively.
///
/// No pattern may contain another, so one phrase is counted once.
/// Single words that also occur in ordinary prose are left out.
const BOILERPLATE_PATTERNS: &[&str] = &[
    "we use cookies",
    "accept cookies",
    "cookie policy",
    "click here",
    "subscribe to our newsletter",
    "sign up for our newsletter",
    "all rights reserved",
    "privacy policy",
    "terms of use",
    "terms of service",
    "log in to reply",
    "share this article",
    "advertisement",
    "enable javascript",
    "skip to content",
    "back to top",
];

/// Quality band a score falls into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QualityBand {
    Low,
    Medium,
    High,
}

impl QualityBand {
    pub fn from_score(score: f32) -> Self {
        if score < LOW_BAND_MAX {
            QualityBand::Low
        } else if score < HIGH_BAND_MIN {
            QualityBand::Medium
        } else {
            QualityBand::High
        }
    }
}

/// Score plus the sub-signals it was derived from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualityReport {
    pub score: f32,
    pub word_count: usize,
    pub meaningful_content: bool,
    pub has_structure: bool,
    pub language_quality: f32,
    pub boilerplate_hits: usize,
}

impl QualityReport {
    pub fn band(&self) -> QualityBand {
        QualityBand::from_score(self.score)
    }
}

/// Rate `text` for informational value.
///
/// Pure function: the same input always yields the same report.
///
/// # Arguments
///
/// * `text` — Extracted document text.
/// * `title` — Optional document title; a non-empty one adds a small bonus.
/// * `min_words` — Word count below which the text is scored low.
pub fn score_text(text: &str, title: Option<&str>, min_words: usize) -> QualityReport {
    let words: Vec<&str> = text.split_whitespace().collect();
    let word_count = words.len();
    let boilerplate_hits = count_boilerplate(text);
    let language_quality = language_quality(text, &words);
    let has_structure = has_structure(text);

    if word_count < min_words.max(1) {
        let ratio = word_count as f32 / min_words.max(1) as f32;
        return QualityReport {
            score: (ratio * SHORT_TEXT_CEILING).clamp(0.0, SHORT_TEXT_CEILING),
            word_count,
            meaningful_content: false,
            has_structure,
            language_quality,
            boilerplate_hits,
        };
    }

    let alpha = alphabetic_ratio(&words);
    let meaningful_content = boilerplate_hits < 3 && alpha >= 0.6;

    let mut score = (word_count as f32 / 300.0).min(1.0) * 0.25;
    if has_paragraphs(text) {
        score += 0.1;
    }
    if sentence_count(text) >= 3 {
        score += 0.1;
    }
    score += language_quality * 0.35;
    if meaningful_content {
        score += 0.2;
    }
    if title.map(|t| !t.trim().is_empty()).unwrap_or(false) {
        score += 0.05;
    }
    score -= (boilerplate_hits as f32 * BOILERPLATE_PENALTY).min(BOILERPLATE_PENALTY_CAP);

    QualityReport {
        score: score.clamp(0.0, 1.0),
        word_count,
        meaningful_content,
        has_structure,
        language_quality,
        boilerplate_hits,
    }
}

fn count_boilerplate(text: &str) -> usize {
    let lower = text.to_lowercase();
    BOILERPLATE_PATTERNS
        .iter()
        .map(|p| lower.matches(p).count())
        .sum()
}

fn has_paragraphs(text: &str) -> bool {
    text.split("\n\n").filter(|p| !p.trim().is_empty()).count() >= 2
}

fn sentence_count(text: &str) -> usize {
    text.split(['.', '!', '?'])
        .filter(|s| s.split_whitespace().count() >= 3)
        .count()
}

fn has_structure(text: &str) -> bool {
    has_paragraphs(text) || sentence_count(text) >= 3
}

/// Share of words that are mostly letters.
fn alphabetic_ratio(words: &[&str]) -> f32 {
    if words.is_empty() {
        return 0.0;
    }
    let alpha = words
        .iter()
        .filter(|w| {
            let total = w.chars().count();
            let letters = w.chars().filter(|c| c.is_alphabetic()).count();
            letters * 2 >= total && letters > 0
        })
        .count();
    alpha as f32 / words.len() as f32
}

/// Language-quality sub-score in `[0, 1]`.
///
/// Blends the alphabetic ratio, plausible word and sentence lengths,
/// and lexical diversity.
fn language_quality(text: &str, words: &[&str]) -> f32 {
    if words.is_empty() {
        return 0.0;
    }

    let alpha = alphabetic_ratio(words);

    let total_chars: usize = words.iter().map(|w| w.chars().count()).sum();
    let avg_word_len = total_chars as f32 / words.len() as f32;
    let word_len_score = if (3.0..=8.5).contains(&avg_word_len) {
        1.0
    } else {
        0.5
    };

    let sentences = sentence_count(text).max(1);
    let avg_sentence_len = words.len() as f32 / sentences as f32;
    let sentence_len_score = if (5.0..=40.0).contains(&avg_sentence_len) {
        1.0
    } else {
        0.5
    };

    let unique: HashSet<String> = words.iter().map(|w| w.to_lowercase()).collect();
    let diversity = unique.len() as f32 / words.len() as f32;
    let diversity_score = (diversity / 0.4).min(1.0);

    (0.4 * alpha + 0.2 * word_len_score + 0.2 * sentence_len_score + 0.2 * diversity_score)
        .clamp(0.0, 1.0)
}
