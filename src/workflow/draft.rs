// ChatPay — Draft records assembled by the form engine

use super::FieldKey;
use crate::conversation::validate::MinorUnits;
use serde::Serialize;

/// A validated answer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum FieldValue {
    Text(String),
    Amount(MinorUnits),
    Count(u32),
}

/// Validated answers of one workflow instance, in the order they were given.
///
/// Repeated sub-forms (bulk recipients) are stored as nested drafts.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Draft {
    values: Vec<(FieldKey, FieldValue)>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    recipients: Vec<Draft>,
}

impl Draft {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a field, replacing any earlier value while keeping its position.
    pub fn insert(&mut self, key: FieldKey, value: FieldValue) {
        match self.values.iter_mut().find(|(k, _)| *k == key) {
            Some(slot) => slot.1 = value,
            None => self.values.push((key, value)),
        }
    }

    pub fn get(&self, key: FieldKey) -> Option<&FieldValue> {
        self.values.iter().find(|(k, _)| *k == key).map(|(_, v)| v)
    }

    pub fn contains(&self, key: FieldKey) -> bool {
        self.get(key).is_some()
    }

    pub fn text(&self, key: FieldKey) -> Option<&str> {
        match self.get(key) {
            Some(FieldValue::Text(s)) => Some(s),
            _ => None,
        }
    }

    pub fn amount(&self, key: FieldKey) -> Option<MinorUnits> {
        match self.get(key) {
            Some(FieldValue::Amount(a)) => Some(*a),
            _ => None,
        }
    }

    pub fn count(&self, key: FieldKey) -> Option<u32> {
        match self.get(key) {
            Some(FieldValue::Count(n)) => Some(*n),
            _ => None,
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (FieldKey, &FieldValue)> {
        self.values.iter().map(|(k, v)| (*k, v))
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty() && self.recipients.is_empty()
    }

    pub fn push_recipient(&mut self, recipient: Draft) {
        self.recipients.push(recipient);
    }

    pub fn recipients(&self) -> &[Draft] {
        &self.recipients
    }
}
