//! Content entities: fixed Posts, templated Variants, and the publish record.

pub mod history;
pub mod metrics;
pub mod post;
pub mod published;
pub mod template;
pub mod variant;

pub use history::VariantSelectionHistory;
pub use metrics::MetricsSnapshot;
pub use post::Post;
pub use published::PublishedPost;
pub use template::PostTemplate;
pub use variant::PostVariant;
