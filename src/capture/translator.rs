use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, error, info};

use crate::capture::{ChangeEvent, Diffable, EntityTopicRegistry, Operation, TopicBinding};
use crate::kafka::{DeliveryHandle, Envelope, JsonSerializer, Publisher};
use crate::{Error, Result};

/// Turns entity lifecycle mutations into [`ChangeEvent`]s on the entity's
/// configured topic.
///
/// Wire the `on_*` methods to the persistence layer's post-commit hooks and
/// [`before_commit`](Self::before_commit) to its pre-commit hook. Events are
/// keyed by the entity identifier.
pub struct ChangeCapture {
    registry: Arc<EntityTopicRegistry>,
    publisher: Arc<dyn Publisher>,
}

impl ChangeCapture {
    pub fn new(registry: Arc<EntityTopicRegistry>, publisher: Arc<dyn Publisher>) -> Self {
        Self {
            registry,
            publisher,
        }
    }

    pub fn on_insert<T: Diffable>(&self, entity: &T) -> Result<Option<DeliveryHandle>> {
        self.on_mutation(Operation::Add, entity, entity.identifier(), None)
    }

    pub fn on_update<T: Diffable>(
        &self,
        entity: &T,
        old_state: &[Value],
    ) -> Result<Option<DeliveryHandle>> {
        self.on_mutation(Operation::Modify, entity, entity.identifier(), Some(old_state))
    }

    pub fn on_delete<T: Diffable>(&self, entity: &T) -> Result<Option<DeliveryHandle>> {
        self.on_mutation(Operation::Remove, entity, entity.identifier(), None)
    }

    /// Fails with [`Error::MissingIdentifier`] when a captured entity has no
    /// identifier, so the surrounding write can still be aborted.
    pub fn before_commit<T: Diffable>(&self, entity: &T) -> Result<()> {
        match self.registry.get::<T>() {
            Some(binding) => {
                require_identifier::<T>(binding, entity.identifier().as_ref()).map(|_| ())
            }
            None => Ok(()),
        }
    }

    /// Publishes the change event for one mutation.
    ///
    /// Returns `Ok(None)` when `T` is not registered for capture. For
    /// `Modify`, `old_state` is the prior snapshot in
    /// [`Diffable::property_names`] order; the rebuilt `before` gets
    /// `identifier` forced onto it since snapshots carry no identity.
    pub fn on_mutation<T: Diffable>(
        &self,
        operation: Operation,
        entity: &T,
        identifier: Option<Value>,
        old_state: Option<&[Value]>,
    ) -> Result<Option<DeliveryHandle>> {
        let Some(binding) = self.registry.get::<T>() else {
            return Ok(None);
        };

        let event = match operation {
            Operation::Add => ChangeEvent::added(binding.display_name.clone(), entity.clone()),
            Operation::Remove => ChangeEvent::removed(binding.display_name.clone(), entity.clone()),
            Operation::Modify => {
                let old_state = old_state.ok_or_else(|| Error::InvalidField {
                    field: T::identifier_name().to_string(),
                    reason: "update captured without prior state".to_string(),
                })?;
                let mut before = T::from_snapshot(old_state)?;
                if let Some(id) = &identifier {
                    before.set_field(T::identifier_name(), id.clone())?;
                }
                ChangeEvent::modified(binding.display_name.clone(), before, entity.clone())
            }
        };
        debug!(entity = %binding.display_name, ?operation, "Change event built");

        let identifier = match require_identifier::<T>(binding, identifier.as_ref()) {
            Ok(id) => id,
            Err(e) => {
                error!(
                    entity = %binding.display_name,
                    ?operation,
                    error = %e,
                    "Dropping change event"
                );
                return Err(e);
            }
        };

        let payload = JsonSerializer::serialize(&event)?;
        let key = identifier_key(identifier);
        info!(topic = %binding.topic, key = %key, ?operation, "Publishing change event");

        Ok(Some(
            self.publisher.send(&binding.topic, Envelope::new(key, payload)),
        ))
    }
}

fn require_identifier<'a, T: Diffable>(
    binding: &TopicBinding,
    identifier: Option<&'a Value>,
) -> Result<&'a Value> {
    match identifier {
        Some(id) if !id.is_null() => Ok(id),
        _ => Err(Error::MissingIdentifier {
            entity: binding.display_name.clone(),
            field: T::identifier_name().to_string(),
        }),
    }
}

// Strings are used bare; other values in their JSON form.
fn identifier_key(identifier: &Value) -> String {
    match identifier {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::test_entities::{AuditLog, Customer};
    use crate::capture::EntityTopic;
    use crate::kafka::InMemoryPublisher;
    use serde_json::json;

    const CUSTOMER_TOPIC: &str = "customer-topic";

    fn setup() -> (ChangeCapture, InMemoryPublisher) {
        let registry = EntityTopicRegistry::builder()
            .register::<Customer>(EntityTopic::new(CUSTOMER_TOPIC))
            .build();
        let publisher = InMemoryPublisher::new();
        let capture = ChangeCapture::new(Arc::new(registry), Arc::new(publisher.clone()));
        (capture, publisher)
    }

    fn customer(id: Option<i64>, name: &str) -> Customer {
        Customer {
            id,
            name: Some(name.to_string()),
            last_name: Some("Smith".to_string()),
        }
    }

    fn published(publisher: &InMemoryPublisher) -> (String, Value) {
        let sent = publisher.sent_to(CUSTOMER_TOPIC);
        assert_eq!(sent.len(), 1);
        (sent[0].key.clone(), serde_json::from_slice(&sent[0].payload).unwrap())
    }

    #[tokio::test]
    async fn test_modify_rebuilds_before_with_identifier() {
        let (capture, publisher) = setup();
        let current = customer(Some(42), "Alicia");

        capture
            .on_update(&current, &[json!("Alice"), Value::Null])
            .unwrap()
            .expect("customer is registered");

        let (key, event) = published(&publisher);
        assert_eq!(key, "42");
        assert_eq!(event["operation"], "MODIFY");
        assert_eq!(event["name"], "Customer");
        assert_eq!(event["before"], json!({"id": 42, "name": "Alice", "lastName": null}));
        assert_eq!(event["after"], json!({"id": 42, "name": "Alicia", "lastName": "Smith"}));
    }

    #[tokio::test]
    async fn test_add_has_no_before() {
        let (capture, publisher) = setup();

        capture.on_insert(&customer(Some(7), "Bob")).unwrap();

        let (key, event) = published(&publisher);
        assert_eq!(key, "7");
        assert_eq!(event["operation"], "ADD");
        assert_eq!(event["before"], Value::Null);
        assert_eq!(event["after"]["name"], "Bob");
    }

    #[tokio::test]
    async fn test_remove_has_no_after() {
        let (capture, publisher) = setup();

        capture.on_delete(&customer(Some(7), "Bob")).unwrap();

        let (_, event) = published(&publisher);
        assert_eq!(event["operation"], "REMOVE");
        assert_eq!(event["before"]["id"], 7);
        assert_eq!(event["after"], Value::Null);
    }

    #[tokio::test]
    async fn test_unregistered_entity_is_ignored() {
        let (capture, publisher) = setup();

        let result = capture.on_insert(&AuditLog::default()).unwrap();
        assert!(result.is_none());
        assert!(publisher.sent().is_empty());
    }

    #[tokio::test]
    async fn test_missing_identifier_drops_event() {
        let (capture, publisher) = setup();

        let err = capture.on_insert(&customer(None, "Ghost")).unwrap_err();
        assert!(matches!(
            err,
            Error::MissingIdentifier { entity, field } if entity == "Customer" && field == "id"
        ));
        assert!(publisher.sent().is_empty());
    }

    #[tokio::test]
    async fn test_identifier_of_wrong_type_fails_modify() {
        let (capture, publisher) = setup();

        let result = capture.on_mutation(
            Operation::Modify,
            &customer(Some(1), "Carol"),
            Some(json!("cust-001")),
            Some(&[json!("Caroline"), json!("Smith")]),
        );

        assert!(matches!(result, Err(Error::InvalidField { field, .. }) if field == "id"));
        assert!(publisher.sent().is_empty());
    }

    #[tokio::test]
    async fn test_modify_requires_prior_state() {
        let (capture, _publisher) = setup();

        let result =
            capture.on_mutation(Operation::Modify, &customer(Some(1), "Dan"), Some(json!(1)), None);
        assert!(matches!(result, Err(Error::InvalidField { .. })));
    }

    #[test]
    fn test_before_commit_validates_identifier() {
        let (capture, _publisher) = setup();

        assert!(capture.before_commit(&customer(Some(1), "Eve")).is_ok());
        assert!(matches!(
            capture.before_commit(&customer(None, "Eve")),
            Err(Error::MissingIdentifier { .. })
        ));
        // Unregistered types are never checked.
        assert!(capture.before_commit(&AuditLog::default()).is_ok());
    }

    #[test]
    fn test_identifier_key_forms() {
        assert_eq!(identifier_key(&json!(42)), "42");
        assert_eq!(identifier_key(&json!("abc")), "abc");
    }
}
