//! Typed ID definitions for all domain entities.
//!
//! One marker type + type alias per entity, giving compile-time type safety
//! for ID usage throughout the application.

pub use super::id::{Id, V4, V7};

/// Marker type for Post entities (fixed, non-templated posts).
pub struct Post;

/// Marker type for PostTemplate entities.
pub struct PostTemplate;

/// Marker type for PostVariant entities.
pub struct PostVariant;

/// Marker type for Schedule entities.
pub struct Schedule;

/// Marker type for PublishJob entities.
pub struct PublishJob;

/// Marker type for VariantSelectionHistory entities.
pub struct VariantSelectionHistory;

/// Marker type for PublishedPost entities.
pub struct PublishedPost;

/// Marker type for MetricsSnapshot entities.
pub struct MetricsSnapshot;

pub type PostId = Id<Post>;
pub type PostTemplateId = Id<PostTemplate>;
pub type PostVariantId = Id<PostVariant>;
pub type ScheduleId = Id<Schedule>;
pub type JobId = Id<PublishJob>;
pub type VariantSelectionHistoryId = Id<VariantSelectionHistory>;
pub type PublishedPostId = Id<PublishedPost>;
pub type MetricsSnapshotId = Id<MetricsSnapshot>;
