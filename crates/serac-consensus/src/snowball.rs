//! Snowball confidence counters.
//!
//! Two shapes are used by the higher layers:
//!
//! - [`Snowball`]: the n-ary counter deciding among conflicting choices
//!   (transaction conflict sets)
//! - [`UnarySnowball`]: the single-choice counter each block in the Snowman
//!   tree carries

use std::collections::HashMap;

use serac_ids::Id;

/// N-ary Snowball instance over a set of mutually exclusive choices.
///
/// Each poll either meets the quorum alpha for one choice (a successful
/// poll) or resets confidence. Preference moves to a choice only when its
/// accumulated successful-poll count strictly exceeds the incumbent's; ties
/// retain the current preference.
#[derive(Debug, Clone, Default)]
pub struct Snowball {
    /// Successful-poll count per choice.
    polls: HashMap<Id, u32>,
    /// The currently preferred choice.
    preference: Option<Id>,
    /// Consecutive successful polls for the preference.
    confidence: u32,
}

impl Snowball {
    /// Creates a counter with no choices.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a choice. The first choice becomes the preference.
    pub fn add(&mut self, choice: Id) {
        self.polls.entry(choice).or_insert(0);
        if self.preference.is_none() {
            self.preference = Some(choice);
        }
    }

    /// Returns the current preference.
    #[must_use]
    pub fn preference(&self) -> Option<Id> {
        self.preference
    }

    /// Returns the consecutive-success confidence of the preference.
    #[must_use]
    pub fn confidence(&self) -> u32 {
        self.confidence
    }

    /// Returns the successful-poll count for `choice`.
    #[must_use]
    pub fn num_successful_polls(&self, choice: &Id) -> u32 {
        self.polls.get(choice).copied().unwrap_or(0)
    }

    /// Records a poll in which `chosen` received `count` votes out of a
    /// quorum requirement of `alpha`.
    pub fn record_poll(&mut self, chosen: Id, count: usize, alpha: usize) {
        if count >= alpha && self.polls.contains_key(&chosen) {
            self.record_successful_poll(chosen);
        } else {
            self.record_unsuccessful_poll();
        }
    }

    /// Records a successful poll for `chosen`.
    pub fn record_successful_poll(&mut self, chosen: Id) {
        let successes = self.polls.entry(chosen).or_insert(0);
        *successes += 1;
        let successes = *successes;

        match self.preference {
            Some(pref) if pref == chosen => {
                self.confidence += 1;
            }
            Some(pref) => {
                // Strict inequality: a tie keeps the incumbent.
                if successes > self.num_successful_polls(&pref) {
                    self.preference = Some(chosen);
                    self.confidence = 1;
                } else {
                    self.confidence = 0;
                }
            }
            None => {
                self.preference = Some(chosen);
                self.confidence = 1;
            }
        }
    }

    /// Records a poll that met no quorum.
    pub fn record_unsuccessful_poll(&mut self) {
        self.confidence = 0;
    }

    /// Drops a decided choice. If it was the preference, the remaining
    /// choice with the most successful polls takes over with confidence
    /// reset.
    pub fn remove(&mut self, choice: &Id) {
        self.polls.remove(choice);
        if self.preference == Some(*choice) {
            self.preference = self
                .polls
                .iter()
                .max_by_key(|(id, polls)| (**polls, std::cmp::Reverse(**id)))
                .map(|(id, _)| *id);
            self.confidence = 0;
        }
    }

    /// Returns true once confidence reached `beta`.
    #[must_use]
    pub fn finalized(&self, beta: usize) -> bool {
        self.confidence as usize >= beta
    }
}

/// Single-choice Snowball counter.
///
/// Tracks the confidence and successful-poll count of one decision; the
/// Snowman tree stores one per processing block and compares siblings when
/// walking its preference.
#[derive(Debug, Clone, Copy, Default)]
pub struct UnarySnowball {
    confidence: u32,
    num_successful_polls: u32,
}

impl UnarySnowball {
    /// Creates a zeroed counter.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a successful poll.
    pub fn record_successful_poll(&mut self) {
        self.confidence += 1;
        self.num_successful_polls += 1;
    }

    /// Records an unsuccessful poll, resetting confidence.
    pub fn record_unsuccessful_poll(&mut self) {
        self.confidence = 0;
    }

    /// Consecutive successful polls.
    #[must_use]
    pub fn confidence(&self) -> u32 {
        self.confidence
    }

    /// Total successful polls.
    #[must_use]
    pub fn num_successful_polls(&self) -> u32 {
        self.num_successful_polls
    }

    /// Returns true once confidence reached `beta`.
    #[must_use]
    pub fn finalized(&self, beta: usize) -> bool {
        self.confidence as usize >= beta
    }
}
