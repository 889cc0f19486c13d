//! Canonical data model shared by every component.

pub mod ids;
pub mod viewer;

pub use ids::{ContentId, IdError, OwnerId, ViewerId};
pub use viewer::ViewerRecord;
