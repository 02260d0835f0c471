use std::any::{type_name, TypeId};
use std::collections::HashMap;
use tracing::{debug, info};

use crate::capture::Diffable;
use crate::config::CaptureConfig;

/// Where change events of one entity type go.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntityTopic {
    pub topic: String,
    pub name: Option<String>,
}

impl EntityTopic {
    pub fn new(topic: impl Into<String>) -> Self {
        Self {
            topic: topic.into(),
            name: None,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }
}

#[derive(Debug, Clone)]
pub struct TopicBinding {
    pub topic: String,
    pub display_name: String,
}

/// Entity type to topic mapping, fixed after startup.
///
/// Types that were never registered are opted out of change capture.
#[derive(Debug, Default)]
pub struct EntityTopicRegistry {
    bindings: HashMap<TypeId, TopicBinding>,
}

impl EntityTopicRegistry {
    pub fn builder() -> EntityTopicRegistryBuilder {
        EntityTopicRegistryBuilder::default()
    }

    pub fn get<T: Diffable>(&self) -> Option<&TopicBinding> {
        self.bindings.get(&TypeId::of::<T>())
    }

    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }
}

#[derive(Debug, Default)]
pub struct EntityTopicRegistryBuilder {
    bindings: HashMap<TypeId, TopicBinding>,
}

impl EntityTopicRegistryBuilder {
    pub fn register<T: Diffable>(mut self, entity: EntityTopic) -> Self {
        let display_name = entity
            .name
            .filter(|n| !n.is_empty())
            .unwrap_or_else(|| short_type_name::<T>().to_string());
        debug!(
            entity = T::ENTITY_TYPE,
            topic = %entity.topic,
            name = %display_name,
            "Registered entity topic"
        );
        self.bindings.insert(
            TypeId::of::<T>(),
            TopicBinding {
                topic: entity.topic,
                display_name,
            },
        );
        self
    }

    /// Registers `T` if the config table has an entry for `T::ENTITY_TYPE`.
    pub fn register_from_config<T: Diffable>(self, config: &CaptureConfig) -> Self {
        match config.entities.get(T::ENTITY_TYPE) {
            Some(entry) => {
                let mut entity = EntityTopic::new(entry.topic.clone());
                entity.name = entry.name.clone();
                self.register::<T>(entity)
            }
            None => {
                debug!(entity = T::ENTITY_TYPE, "No capture topic configured");
                self
            }
        }
    }

    pub fn build(self) -> EntityTopicRegistry {
        info!(entities = self.bindings.len(), "Entity topic registry built");
        EntityTopicRegistry {
            bindings: self.bindings,
        }
    }
}

fn short_type_name<T>() -> &'static str {
    let full = type_name::<T>();
    // Generic arguments would otherwise leak their own paths.
    let base = full.split('<').next().unwrap_or(full);
    base.rsplit("::").next().unwrap_or(base)
}
