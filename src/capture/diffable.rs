use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use crate::{Error, Result};

/// An entity whose lifecycle mutations can be captured as change events.
///
/// Implementors expose their persisted properties as an ordered list of
/// named values. The order of [`property_names`](Diffable::property_names)
/// is the order of a prior-state snapshot handed to
/// [`ChangeCapture::on_update`](crate::capture::ChangeCapture::on_update).
///
/// # Example
///
/// ```rust
/// use kafka_helper::capture::{assign_field, Diffable};
/// use kafka_helper::{Error, Result};
/// use serde::{Deserialize, Serialize};
/// use serde_json::Value;
///
/// #[derive(Debug, Clone, Default, Serialize, Deserialize)]
/// #[serde(rename_all = "camelCase")]
/// struct Customer {
///     id: Option<i64>,
///     name: Option<String>,
///     last_name: Option<String>,
/// }
///
/// impl Diffable for Customer {
///     const ENTITY_TYPE: &'static str = "customer";
///
///     fn property_names() -> &'static [&'static str] {
///         &["name", "lastName"]
///     }
///
///     fn identifier(&self) -> Option<Value> {
///         self.id.map(Value::from)
///     }
///
///     fn set_field(&mut self, name: &str, value: Value) -> Result<()> {
///         match name {
///             "id" => assign_field(&mut self.id, name, value),
///             "name" => assign_field(&mut self.name, name, value),
///             "lastName" => assign_field(&mut self.last_name, name, value),
///             other => Err(Error::InvalidField {
///                 field: other.to_string(),
///                 reason: "unknown property".to_string(),
///             }),
///         }
///     }
/// }
///
/// let before = Customer::from_snapshot(&["Alice".into(), Value::Null]).unwrap();
/// assert_eq!(before.name.as_deref(), Some("Alice"));
/// assert_eq!(before.last_name, None);
/// ```
pub trait Diffable: Default + Clone + Serialize + Send + Sync + 'static {
    /// Key of this type in the `[capture.entities]` config table.
    const ENTITY_TYPE: &'static str;

    /// Persisted properties in snapshot order, identifier excluded.
    fn property_names() -> &'static [&'static str];

    fn identifier_name() -> &'static str {
        "id"
    }

    fn identifier(&self) -> Option<Value>;

    /// Sets one property (or the identifier) from a JSON value.
    fn set_field(&mut self, name: &str, value: Value) -> Result<()>;

    /// Current property values in [`property_names`](Diffable::property_names) order.
    ///
    /// The default reads the serialized form, so serialized field names must
    /// match the property names.
    fn snapshot(&self) -> Result<Vec<Value>> {
        let serialized = serde_json::to_value(self)?;
        Ok(Self::property_names()
            .iter()
            .map(|name| serialized.get(*name).cloned().unwrap_or(Value::Null))
            .collect())
    }

    /// Rebuilds an instance by applying a snapshot onto a blank one.
    fn from_snapshot(values: &[Value]) -> Result<Self> {
        let names = Self::property_names();
        if values.len() != names.len() {
            return Err(Error::InvalidField {
                field: Self::ENTITY_TYPE.to_string(),
                reason: format!(
                    "snapshot has {} values for {} properties",
                    values.len(),
                    names.len()
                ),
            });
        }

        let mut blank = Self::default();
        for (name, value) in names.iter().zip(values) {
            blank.set_field(name, value.clone())?;
        }
        Ok(blank)
    }
}

/// Deserializes `value` into a typed field slot.
pub fn assign_field<T: DeserializeOwned>(slot: &mut T, field: &str, value: Value) -> Result<()> {
    *slot = serde_json::from_value(value).map_err(|e| Error::InvalidField {
        field: field.to_string(),
        reason: e.to_string(),
    })?;
    Ok(())
}
