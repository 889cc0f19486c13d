//! Canonical viewer record and its per-field merge rule.
//!
//! Duplicate observations of the same viewer are reconciled with a
//! last-writer-wins rule keyed on `captured_at`:
//!
//! 1. **Fresher or equal observation** (`incoming.captured_at >=
//!    current.captured_at`): profile fields and relationship flags take the
//!    incoming value. Empty incoming strings and absent reactions never erase
//!    a known value.
//! 2. **Stale observation**: only fills fields that are still empty.
//! 3. `captured_at` always becomes the maximum of the two.
//!
//! Applying the same record twice is a no-op the second time, which is what
//! makes chunk merges idempotent.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::model::ids::ViewerId;

/// One observed viewer, normalized from any known external shape.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ViewerRecord {
    /// Stable viewer identity.
    pub id: ViewerId,
    /// Account handle; may change over time.
    #[serde(default)]
    pub handle: String,
    /// Display name; may change over time.
    #[serde(default)]
    pub display_name: String,
    /// Avatar image URL.
    #[serde(default)]
    pub avatar_url: String,
    #[serde(default)]
    pub verified: bool,
    #[serde(default)]
    pub private: bool,
    /// The viewer follows the subject.
    #[serde(default)]
    pub follows_subject: bool,
    /// The subject follows the viewer.
    #[serde(default)]
    pub followed_by_subject: bool,
    /// Optional short reaction (usually a single emoji).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reaction: Option<String>,
    /// When this observation was made.
    pub captured_at: DateTime<Utc>,
}

impl ViewerRecord {
    /// Create a record with every optional attribute at its default.
    #[must_use]
    pub fn new(id: ViewerId, captured_at: DateTime<Utc>) -> Self {
        Self {
            id,
            handle: String::new(),
            display_name: String::new(),
            avatar_url: String::new(),
            verified: false,
            private: false,
            follows_subject: false,
            followed_by_subject: false,
            reaction: None,
            captured_at,
        }
    }

    /// Merge another observation of the same viewer into this one.
    ///
    /// Returns `true` if any field changed.
    pub fn absorb(&mut self, incoming: &Self) -> bool {
        debug_assert_eq!(self.id, incoming.id, "absorb across identities");

        let mut changed = false;
        if incoming.captured_at >= self.captured_at {
            changed |= refresh_text(&mut self.handle, &incoming.handle);
            changed |= refresh_text(&mut self.display_name, &incoming.display_name);
            changed |= refresh_text(&mut self.avatar_url, &incoming.avatar_url);
            changed |= refresh(&mut self.verified, incoming.verified);
            changed |= refresh(&mut self.private, incoming.private);
            changed |= refresh(&mut self.follows_subject, incoming.follows_subject);
            changed |= refresh(&mut self.followed_by_subject, incoming.followed_by_subject);
            if incoming.reaction.is_some() {
                changed |= refresh(&mut self.reaction, incoming.reaction.clone());
            }
            changed |= refresh(&mut self.captured_at, incoming.captured_at);
        } else {
            changed |= fill_text(&mut self.handle, &incoming.handle);
            changed |= fill_text(&mut self.display_name, &incoming.display_name);
            changed |= fill_text(&mut self.avatar_url, &incoming.avatar_url);
            if self.reaction.is_none() && incoming.reaction.is_some() {
                self.reaction.clone_from(&incoming.reaction);
                changed = true;
            }
        }
        changed
    }
}

fn refresh<T: PartialEq>(slot: &mut T, value: T) -> bool {
    if *slot == value {
        false
    } else {
        *slot = value;
        true
    }
}

fn refresh_text(slot: &mut String, value: &str) -> bool {
    if value.is_empty() || slot == value {
        return false;
    }
    value.clone_into(slot);
    true
}

fn fill_text(slot: &mut String, value: &str) -> bool {
    if !slot.is_empty() || value.is_empty() {
        return false;
    }
    value.clone_into(slot);
    true
}
