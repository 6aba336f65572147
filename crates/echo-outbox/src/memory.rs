//! In-memory outbox.

use std::sync::Mutex;

use crate::{Outbox, OutboxError, OutboxRecord};

/// Outbox held in memory. Does not survive restarts.
#[derive(Debug, Default)]
pub struct MemoryOutbox {
    records: Mutex<Vec<OutboxRecord>>,
}

impl MemoryOutbox {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Outbox for MemoryOutbox {
    fn add(&self, record: &OutboxRecord) -> Result<(), OutboxError> {
        let mut records = self.records.lock().map_err(|_| OutboxError::Poisoned)?;
        if records.iter().any(|r| r.id == record.id) {
            return Err(OutboxError::Duplicate(record.id.clone()));
        }
        records.push(record.clone());
        Ok(())
    }

    fn list(&self) -> Result<Vec<OutboxRecord>, OutboxError> {
        let records = self.records.lock().map_err(|_| OutboxError::Poisoned)?;
        Ok(records.clone())
    }

    fn delete(&self, id: &str) -> Result<bool, OutboxError> {
        let mut records = self.records.lock().map_err(|_| OutboxError::Poisoned)?;
        let before = records.len();
        records.retain(|r| r.id != id);
        Ok(records.len() != before)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_add_list_delete() {
        let outbox = MemoryOutbox::new();
        let first = OutboxRecord::new(json!({ "id": "a", "text": "1" }));
        let second = OutboxRecord::new(json!({ "id": "b", "text": "2" }));

        outbox.add(&first).unwrap();
        outbox.add(&second).unwrap();

        let ids: Vec<_> = outbox.list().unwrap().into_iter().map(|r| r.id).collect();
        assert_eq!(ids, vec!["a", "b"]);

        assert!(outbox.delete("a").unwrap());
        assert!(!outbox.delete("a").unwrap());
        assert_eq!(outbox.len().unwrap(), 1);
    }

    #[test]
    fn test_duplicate_rejected() {
        let outbox = MemoryOutbox::new();
        let record = OutboxRecord::new(json!({ "id": "a" }));
        outbox.add(&record).unwrap();
        assert_eq!(
            outbox.add(&record).unwrap_err(),
            OutboxError::Duplicate("a".to_string())
        );
        assert_eq!(outbox.len().unwrap(), 1);
    }
}
