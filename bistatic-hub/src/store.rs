//! Latest-value registers, one per ingestion stream.
//!
//! Each slot is written only by its own stream's dispatch path and read by the
//! HTTP API. Readers always see a whole message, never a partial write.

use std::sync::{PoisonError, RwLock};

use bistatic_core::types::StreamKind;

#[derive(Debug, Default)]
pub struct LatestValues {
    slots: [RwLock<String>; StreamKind::COUNT],
}

impl LatestValues {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the latest message for `kind`.
    pub fn publish(&self, kind: StreamKind, message: String) {
        let mut slot = self.slots[kind.index()]
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        *slot = message;
    }

    /// Latest message for `kind`, empty before the first one arrives.
    pub fn get(&self, kind: StreamKind) -> String {
        self.slots[kind.index()]
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_until_published() {
        let store = LatestValues::new();
        for kind in StreamKind::ALL {
            assert_eq!(store.get(kind), "");
        }
    }

    #[test]
    fn test_slots_are_independent() {
        let store = LatestValues::new();
        store.publish(StreamKind::Map, "{\"map\":1}".into());
        store.publish(StreamKind::Timestamp, "1718747749000".into());
        store.publish(StreamKind::Map, "{\"map\":2}".into());

        assert_eq!(store.get(StreamKind::Map), "{\"map\":2}");
        assert_eq!(store.get(StreamKind::Timestamp), "1718747749000");
        assert_eq!(store.get(StreamKind::Detection), "");
    }
}
