// Challenge domain model: the entities returned by the platform API and
// carried inside push-update frames.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// The two kinds of challenge the platform supports.
///
/// A challenge's type is fixed at creation; updates never change it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChallengeType {
    TimeBased,
    Toggle,
}

/// Detail payload for time-based challenges.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeBasedDetails {
    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
}

/// Detail payload for toggle challenges.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToggleDetails {
    pub is_active: bool,
}

/// A website the challenge blocks while active.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Distraction {
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

/// A user participating in a challenge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Participant {
    pub id: i64,
    pub username: String,
}

/// A challenge as returned by the REST API and embedded in push frames.
///
/// Exactly one of `time_based_details` / `toggle_details` is populated,
/// selected by `challenge_type`. The optional collections may be omitted by
/// endpoints that return slim representations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Challenge {
    pub id: i64,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub challenge_type: ChallengeType,
    pub strict_mode: bool,
    pub completed: bool,
    pub creator_id: i64,
    #[serde(default)]
    pub time_based_details: Option<TimeBasedDetails>,
    #[serde(default)]
    pub toggle_details: Option<ToggleDetails>,
    #[serde(default)]
    pub distractions: Option<Vec<Distraction>>,
    #[serde(default)]
    pub participants: Option<Vec<Participant>>,
}

impl Challenge {
    /// Whether a toggle challenge is currently active. `None` for
    /// time-based challenges (and for toggle challenges missing details).
    pub fn is_active(&self) -> Option<bool> {
        self.toggle_details.map(|d| d.is_active)
    }

    /// Merge an incoming update into this cached entry.
    ///
    /// Partial-merge semantics: mutable fields present in the update replace
    /// the cached values; fields the update omits keep their cached values.
    /// Identity fields (`id`, `challenge_type`, `creator_id`) are never
    /// touched, and the details variant never switches sides.
    pub fn merge_update(&mut self, incoming: &Challenge) {
        self.name = incoming.name.clone();
        self.strict_mode = incoming.strict_mode;
        self.completed = incoming.completed;

        if incoming.description.is_some() {
            self.description = incoming.description.clone();
        }
        if incoming.challenge_type != self.challenge_type {
            // The type is immutable by contract; a mismatch means the server
            // sent a payload for a different entity shape. Keep our details.
            debug!(
                challenge_id = self.id,
                "ignoring details from update with mismatched challenge_type"
            );
        } else {
            match self.challenge_type {
                ChallengeType::Toggle => {
                    if incoming.toggle_details.is_some() {
                        self.toggle_details = incoming.toggle_details;
                    }
                }
                ChallengeType::TimeBased => {
                    if incoming.time_based_details.is_some() {
                        self.time_based_details = incoming.time_based_details.clone();
                    }
                }
            }
        }

        if incoming.distractions.is_some() {
            self.distractions = incoming.distractions.clone();
        }
        if incoming.participants.is_some() {
            self.participants = incoming.participants.clone();
        }
    }
}

#[cfg(test)]
pub(crate) mod test_fixtures {
    use super::*;

    /// A toggle challenge with the given id and active state.
    pub fn toggle_challenge(id: i64, name: &str, is_active: bool) -> Challenge {
        Challenge {
            id,
            name: name.to_string(),
            description: Some(format!("{name} description")),
            challenge_type: ChallengeType::Toggle,
            strict_mode: false,
            completed: false,
            creator_id: 1,
            time_based_details: None,
            toggle_details: Some(ToggleDetails { is_active }),
            distractions: Some(vec![Distraction {
                url: "https://news.example.com".to_string(),
                name: Some("News".to_string()),
            }]),
            participants: None,
        }
    }

    /// A time-based challenge spanning a fixed window.
    pub fn time_based_challenge(id: i64, name: &str) -> Challenge {
        Challenge {
            id,
            name: name.to_string(),
            description: None,
            challenge_type: ChallengeType::TimeBased,
            strict_mode: true,
            completed: false,
            creator_id: 2,
            time_based_details: Some(TimeBasedDetails {
                start_date: "2025-01-01T09:00:00Z".parse().unwrap(),
                end_date: "2025-01-31T17:00:00Z".parse().unwrap(),
            }),
            toggle_details: None,
            distractions: None,
            participants: None,
        }
    }
}
