//! Lexical uniqueness filter for generated posts.
//!
//! Approximate by design: word-level Jaccard overlap against a bounded FIFO
//! history plus a deny-list of filler phrases. Near-duplicates can slip
//! through and distinct short posts sharing common words can be rejected;
//! both are accepted tradeoffs.

use std::collections::{HashSet, VecDeque};

use regex::Regex;

/// Why a candidate was rejected.
#[derive(Debug, PartialEq)]
pub enum Rejection {
    /// Case-insensitive exact match with a history entry.
    Duplicate,
    /// Word overlap with some history entry exceeded the threshold.
    TooSimilar { score: f64 },
    /// Candidate contains a deny-listed filler phrase.
    Denied,
}

impl std::fmt::Display for Rejection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Rejection::Duplicate => write!(f, "exact duplicate of a prior post"),
            Rejection::TooSimilar { score } => write!(f, "too similar to a prior post ({score:.2})"),
            Rejection::Denied => write!(f, "contains a deny-listed phrase"),
        }
    }
}

struct Entry {
    lowered: String,
    words: HashSet<String>,
}

pub struct UniquenessFilter {
    history: VecDeque<Entry>,
    capacity: usize,
    /// Jaccard score above which a candidate is rejected. Tunable; 0.30 is
    /// the observed operating point.
    threshold: f64,
    deny: Vec<Regex>,
}

impl UniquenessFilter {
    pub fn new(capacity: usize, threshold: f64, deny: Vec<Regex>) -> Self {
        Self {
            history: VecDeque::with_capacity(capacity),
            capacity,
            threshold,
            deny,
        }
    }

    /// Decide whether a candidate may be posted.
    pub fn check(&self, candidate: &str) -> Result<(), Rejection> {
        if self.deny.iter().any(|r| r.is_match(candidate)) {
            return Err(Rejection::Denied);
        }

        let lowered = candidate.to_lowercase();
        let words = word_set(candidate);

        for entry in &self.history {
            if entry.lowered == lowered {
                return Err(Rejection::Duplicate);
            }
            let score = jaccard(&words, &entry.words);
            if score > self.threshold {
                return Err(Rejection::TooSimilar { score });
            }
        }

        Ok(())
    }

    pub fn is_acceptable(&self, candidate: &str) -> bool {
        self.check(candidate).is_ok()
    }

    /// Append an accepted post, evicting the oldest entry when full.
    pub fn record(&mut self, candidate: &str) {
        if self.capacity == 0 {
            return;
        }
        if self.history.len() == self.capacity {
            self.history.pop_front();
        }
        self.history.push_back(Entry {
            lowered: candidate.to_lowercase(),
            words: word_set(candidate),
        });
    }

    pub fn len(&self) -> usize {
        self.history.len()
    }

    pub fn is_empty(&self) -> bool {
        self.history.is_empty()
    }
}

/// Case-folded word set, punctuation trimmed from word edges.
fn word_set(text: &str) -> HashSet<String> {
    text.split_whitespace()
        .map(|w| w.trim_matches(|c: char| !c.is_alphanumeric()).to_lowercase())
        .filter(|w| !w.is_empty())
        .collect()
}

fn jaccard(a: &HashSet<String>, b: &HashSet<String>) -> f64 {
    if a.is_empty() && b.is_empty() {
        return 1.0;
    }
    let intersection = a.intersection(b).count();
    let union = a.len() + b.len() - intersection;
    intersection as f64 / union as f64
}
