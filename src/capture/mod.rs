//! Entity change capture.
//!
//! Persistence hooks call [`ChangeCapture`] after each insert, update or
//! delete of an entity type that was registered in the
//! [`EntityTopicRegistry`]. Each mutation becomes one [`ChangeEvent`],
//! serialized as JSON and published to that type's topic, keyed by the
//! entity identifier:
//!
//! ```json
//! {"operation":"MODIFY","name":"Customer","before":{..},"after":{..}}
//! ```

pub mod diffable;
pub mod event;
pub mod registry;
pub mod translator;

pub use diffable::{assign_field, Diffable};
pub use event::{ChangeEvent, Operation};
pub use registry::{EntityTopic, EntityTopicRegistry, EntityTopicRegistryBuilder, TopicBinding};
pub use translator::ChangeCapture;
