use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Operation {
    Add,
    Modify,
    Remove,
}

/// Before/after view of one entity mutation.
///
/// Built through the constructors so that `Add` never has a `before`,
/// `Remove` never has an `after`, and `Modify` always has both.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeEvent<T> {
    operation: Operation,
    name: String,
    before: Option<T>,
    after: Option<T>,
}

impl<T> ChangeEvent<T> {
    pub fn added(name: impl Into<String>, after: T) -> Self {
        Self {
            operation: Operation::Add,
            name: name.into(),
            before: None,
            after: Some(after),
        }
    }

    pub fn modified(name: impl Into<String>, before: T, after: T) -> Self {
        Self {
            operation: Operation::Modify,
            name: name.into(),
            before: Some(before),
            after: Some(after),
        }
    }

    pub fn removed(name: impl Into<String>, before: T) -> Self {
        Self {
            operation: Operation::Remove,
            name: name.into(),
            before: Some(before),
            after: None,
        }
    }

    pub fn operation(&self) -> Operation {
        self.operation
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn before(&self) -> Option<&T> {
        self.before.as_ref()
    }

    pub fn after(&self) -> Option<&T> {
        self.after.as_ref()
    }
}
