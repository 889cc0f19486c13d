//! Known external payload shapes.
//!
//! The feed delivers two families of user objects:
//!
//! - **Listing**: a flat array of user-like objects (`pk`, `username`,
//!   `friendship_status`, ...).
//! - **Edge**: `{ "node": ... }` wrappers where the user lives at
//!   `node.user`, `node.viewer`, or directly on `node`.
//!
//! [`RawUser::decode`] picks the variant from the object's structure and
//! decodes it with tolerant field readers. Everything that is not an
//! identifier degrades to a default instead of rejecting the record.

use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::Value;

use super::NormalizeError;
use super::lenient::{self, RawId, RawInstant};
use crate::model::{ViewerId, ViewerRecord};

/// Reaction recorded when a listing only carries a `has_liked` flag.
pub const LIKE_REACTION: &str = "❤️";

/// Field paths inside an edge `node` that may hold the user object, in
/// lookup order. When none is an object the node itself is the user.
const EDGE_USER_PATHS: &[&str] = &["user", "viewer", "profile"];

/// Which external shape a record was decoded from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Shape {
    Listing,
    Edge,
}

/// A decoded raw record, one variant per known external shape.
#[derive(Debug, Clone)]
pub enum RawUser {
    Listing(ListingUser),
    Edge {
        /// The located user object.
        user: EdgeUser,
        /// Node-level metadata that sits beside a nested user object.
        meta: EdgeMeta,
    },
}

/// Flat user object from a listing response.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ListingUser {
    #[serde(deserialize_with = "lenient::id")]
    pub pk: Option<RawId>,
    #[serde(deserialize_with = "lenient::id")]
    pub pk_id: Option<RawId>,
    #[serde(deserialize_with = "lenient::id")]
    pub id: Option<RawId>,
    #[serde(deserialize_with = "lenient::id")]
    pub user_id: Option<RawId>,
    #[serde(deserialize_with = "lenient::text")]
    pub username: Option<String>,
    #[serde(deserialize_with = "lenient::text")]
    pub full_name: Option<String>,
    #[serde(deserialize_with = "lenient::text")]
    pub profile_pic_url: Option<String>,
    #[serde(deserialize_with = "lenient::boolean")]
    pub is_verified: Option<bool>,
    #[serde(deserialize_with = "lenient::boolean")]
    pub is_private: Option<bool>,
    #[serde(deserialize_with = "lenient::nested")]
    pub friendship_status: Option<FriendshipStatus>,
    #[serde(deserialize_with = "lenient::text")]
    pub reaction: Option<String>,
    #[serde(deserialize_with = "lenient::boolean")]
    pub has_liked: Option<bool>,
    #[serde(deserialize_with = "lenient::instant")]
    pub captured_at: Option<RawInstant>,
    #[serde(deserialize_with = "lenient::integer")]
    pub timestamp: Option<i64>,
}

/// Relationship block attached to listing users.
///
/// `following` is the subject following this user; `followed_by` is this
/// user following the subject.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct FriendshipStatus {
    #[serde(deserialize_with = "lenient::boolean")]
    pub following: Option<bool>,
    #[serde(deserialize_with = "lenient::boolean")]
    pub followed_by: Option<bool>,
}

/// User object located inside an edge node.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct EdgeUser {
    #[serde(deserialize_with = "lenient::id")]
    pub id: Option<RawId>,
    #[serde(deserialize_with = "lenient::id")]
    pub pk: Option<RawId>,
    #[serde(rename = "strong_id__", deserialize_with = "lenient::id")]
    pub strong_id: Option<RawId>,
    #[serde(deserialize_with = "lenient::text")]
    pub username: Option<String>,
    #[serde(deserialize_with = "lenient::text")]
    pub full_name: Option<String>,
    #[serde(deserialize_with = "lenient::text")]
    pub profile_pic_url: Option<String>,
    #[serde(deserialize_with = "lenient::boolean")]
    pub is_verified: Option<bool>,
    #[serde(deserialize_with = "lenient::boolean")]
    pub is_private: Option<bool>,
    #[serde(deserialize_with = "lenient::boolean")]
    pub followed_by_viewer: Option<bool>,
    #[serde(deserialize_with = "lenient::boolean")]
    pub follows_viewer: Option<bool>,
    #[serde(deserialize_with = "lenient::text")]
    pub reaction: Option<String>,
    #[serde(deserialize_with = "lenient::instant")]
    pub captured_at: Option<RawInstant>,
    #[serde(deserialize_with = "lenient::integer")]
    pub timestamp: Option<i64>,
}

/// Node-level fields that accompany a nested edge user.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct EdgeMeta {
    #[serde(deserialize_with = "lenient::text")]
    pub reaction: Option<String>,
    #[serde(deserialize_with = "lenient::boolean")]
    pub followed_by_viewer: Option<bool>,
    #[serde(deserialize_with = "lenient::boolean")]
    pub follows_viewer: Option<bool>,
    #[serde(deserialize_with = "lenient::instant")]
    pub captured_at: Option<RawInstant>,
    #[serde(deserialize_with = "lenient::integer")]
    pub timestamp: Option<i64>,
}

impl RawUser {
    /// Decode one raw JSON value into a known shape.
    ///
    /// # Errors
    ///
    /// Returns [`NormalizeError::NotAnObject`] for non-object input and
    /// [`NormalizeError::Malformed`] if serde rejects the object. A `node`
    /// that is not an object is an unknown field of a listing record.
    pub fn decode(value: &Value) -> Result<Self, NormalizeError> {
        let Value::Object(map) = value else {
            return Err(NormalizeError::NotAnObject {
                found: lenient::json_kind(value),
            });
        };

        let Some((node, node_map)) = map
            .get("node")
            .and_then(|node| node.as_object().map(|node_map| (node, node_map)))
        else {
            let user = ListingUser::deserialize(value)
                .map_err(|e| NormalizeError::Malformed(e.to_string()))?;
            return Ok(Self::Listing(user));
        };

        let user_value = EDGE_USER_PATHS
            .iter()
            .find_map(|path| node_map.get(*path).filter(|v| v.is_object()))
            .unwrap_or(node);

        let user =
            EdgeUser::deserialize(user_value).map_err(|e| NormalizeError::Malformed(e.to_string()))?;
        let meta = if std::ptr::eq(user_value, node) {
            EdgeMeta::default()
        } else {
            EdgeMeta::deserialize(node).map_err(|e| NormalizeError::Malformed(e.to_string()))?
        };

        Ok(Self::Edge { user, meta })
    }

    /// The shape this record was decoded from.
    #[must_use]
    pub const fn shape(&self) -> Shape {
        match self {
            Self::Listing(_) => Shape::Listing,
            Self::Edge { .. } => Shape::Edge,
        }
    }

    /// Convert into the canonical record.
    ///
    /// # Errors
    ///
    /// Returns [`NormalizeError::MissingId`] or [`NormalizeError::InvalidId`]
    /// when no identifier candidate is usable.
    pub fn into_record(self, now: DateTime<Utc>) -> Result<ViewerRecord, NormalizeError> {
        match self {
            Self::Listing(user) => {
                let id = resolve_id(&[&user.pk, &user.pk_id, &user.id, &user.user_id])?;
                let friendship = user.friendship_status.unwrap_or_default();
                let reaction = clean_reaction(user.reaction).or_else(|| {
                    user.has_liked
                        .unwrap_or(false)
                        .then(|| LIKE_REACTION.to_string())
                });

                let mut record = ViewerRecord::new(
                    id,
                    resolve_instant(user.captured_at.as_ref(), user.timestamp, now),
                );
                record.handle = user.username.unwrap_or_default();
                record.display_name = user.full_name.unwrap_or_default();
                record.avatar_url = user.profile_pic_url.unwrap_or_default();
                record.verified = user.is_verified.unwrap_or(false);
                record.private = user.is_private.unwrap_or(false);
                record.follows_subject = friendship.followed_by.unwrap_or(false);
                record.followed_by_subject = friendship.following.unwrap_or(false);
                record.reaction = reaction;
                Ok(record)
            }
            Self::Edge { user, meta } => {
                let id = resolve_id(&[&user.id, &user.pk, &user.strong_id])?;
                let captured_at = resolve_instant(
                    meta.captured_at.as_ref().or(user.captured_at.as_ref()),
                    meta.timestamp.or(user.timestamp),
                    now,
                );

                let mut record = ViewerRecord::new(id, captured_at);
                record.handle = user.username.unwrap_or_default();
                record.display_name = user.full_name.unwrap_or_default();
                record.avatar_url = user.profile_pic_url.unwrap_or_default();
                record.verified = user.is_verified.unwrap_or(false);
                record.private = user.is_private.unwrap_or(false);
                record.follows_subject = meta
                    .follows_viewer
                    .or(user.follows_viewer)
                    .unwrap_or(false);
                record.followed_by_subject = meta
                    .followed_by_viewer
                    .or(user.followed_by_viewer)
                    .unwrap_or(false);
                record.reaction = clean_reaction(meta.reaction).or_else(|| clean_reaction(user.reaction));
                Ok(record)
            }
        }
    }
}

/// Pick the first usable identifier among the candidates, in order.
///
/// A present-but-unusable candidate does not stop the search; it only
/// determines the error reported when nothing usable is found.
fn resolve_id(candidates: &[&Option<RawId>]) -> Result<ViewerId, NormalizeError> {
    let mut first_rejection = None;
    for raw in candidates.iter().filter_map(|c| (*c).as_ref()) {
        match coerce_id(raw) {
            Ok(id) => return Ok(id),
            Err(err) => {
                first_rejection.get_or_insert(err);
            }
        }
    }
    Err(first_rejection.unwrap_or(NormalizeError::MissingId))
}

fn coerce_id(raw: &RawId) -> Result<ViewerId, NormalizeError> {
    let text = match raw {
        RawId::Text(s) => s.clone(),
        RawId::Number(n) => {
            if let Some(v) = n.as_u64() {
                v.to_string()
            } else if let Some(v) = n.as_i64() {
                v.to_string()
            } else {
                match n.as_f64() {
                    #[allow(clippy::cast_possible_truncation)]
                    Some(v) if v.is_finite() && v.fract() == 0.0 && v.abs() < 9.0e15 => {
                        format!("{}", v as i64)
                    }
                    _ => {
                        return Err(NormalizeError::InvalidId { raw: n.to_string() });
                    }
                }
            }
        }
        RawId::Unsupported(kind) => {
            return Err(NormalizeError::InvalidId {
                raw: format!("<{kind}>"),
            });
        }
    };
    ViewerId::new(text.as_str()).map_err(|_| NormalizeError::InvalidId { raw: text })
}

fn resolve_instant(
    captured_at: Option<&RawInstant>,
    timestamp_secs: Option<i64>,
    now: DateTime<Utc>,
) -> DateTime<Utc> {
    captured_at
        .and_then(parse_instant)
        .or_else(|| timestamp_secs.and_then(|secs| DateTime::from_timestamp(secs, 0)))
        .unwrap_or(now)
}

fn parse_instant(raw: &RawInstant) -> Option<DateTime<Utc>> {
    match raw {
        RawInstant::Text(s) => {
            let s = s.trim();
            DateTime::parse_from_rfc3339(s)
                .ok()
                .map(|dt| dt.with_timezone(&Utc))
                .or_else(|| s.parse::<i64>().ok().and_then(DateTime::from_timestamp_millis))
        }
        RawInstant::Number(n) => n.as_i64().and_then(DateTime::from_timestamp_millis),
    }
}

fn clean_reaction(raw: Option<String>) -> Option<String> {
    raw.map(|r| r.trim().to_string()).filter(|r| !r.is_empty())
}
