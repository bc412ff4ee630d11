//! Published service endpoints.

use std::collections::HashMap;
use std::sync::RwLock;

use crate::service::{FIXED_PORT, Service};

/// Service to `host:port` mapping published after a successful start.
///
/// Written by the start sequence in one piece, read concurrently by any
/// number of callers. Lookups never observe a half-built mapping.
#[derive(Debug, Default)]
pub struct EndpointDirectory {
    entries: RwLock<HashMap<Service, String>>,
}

impl EndpointDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the whole mapping.
    pub fn publish(&self, entries: HashMap<Service, String>) {
        *self.write() = entries;
    }

    /// Drop every entry.
    pub fn clear(&self) {
        self.write().clear();
    }

    /// Address for `service`, or an empty string when none is published.
    ///
    /// With `fixed_port` the shared edge entry answers for every service.
    pub fn lookup(&self, service: Service, fixed_port: bool) -> String {
        let key = if fixed_port { FIXED_PORT } else { service };
        self.read().get(&key).cloned().unwrap_or_default()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    /// Copy of the current mapping.
    pub fn snapshot(&self) -> HashMap<Service, String> {
        self.read().clone()
    }

    // A writer that panicked left either the old or the new map in place,
    // both of which are whole, so poisoning is ignored.
    fn read(&self) -> std::sync::RwLockReadGuard<'_, HashMap<Service, String>> {
        self.entries.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, HashMap<Service, String>> {
        self.entries.write().unwrap_or_else(|e| e.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::service::{S3, SQS};

    #[test]
    fn test_empty_lookup() {
        let directory = EndpointDirectory::new();
        assert_eq!(directory.lookup(S3, false), "");
        assert_eq!(directory.lookup(S3, true), "");
        assert!(directory.is_empty());
    }

    #[test]
    fn test_fixed_port_answers_for_every_service() {
        let directory = EndpointDirectory::new();
        directory.publish(HashMap::from([(FIXED_PORT, "localhost:49153".to_string())]));

        assert_eq!(directory.lookup(S3, true), "localhost:49153");
        assert_eq!(directory.lookup(SQS, true), "localhost:49153");
        assert_eq!(directory.lookup(S3, false), "");
    }

    #[test]
    fn test_publish_replaces_and_clear_empties() {
        let directory = EndpointDirectory::new();
        directory.publish(HashMap::from([
            (S3, "localhost:1".to_string()),
            (SQS, "localhost:2".to_string()),
        ]));
        directory.publish(HashMap::from([(S3, "localhost:3".to_string())]));

        assert_eq!(directory.lookup(S3, false), "localhost:3");
        assert_eq!(directory.lookup(SQS, false), "");

        directory.clear();
        assert!(directory.snapshot().is_empty());
    }

    #[test]
    fn test_concurrent_readers_see_whole_mappings() {
        let directory = Arc::new(EndpointDirectory::new());
        let writer = {
            let directory = Arc::clone(&directory);
            std::thread::spawn(move || {
                for i in 0..200 {
                    directory.publish(HashMap::from([
                        (S3, format!("localhost:{i}")),
                        (SQS, format!("localhost:{i}")),
                    ]));
                }
            })
        };

        for _ in 0..200 {
            let snapshot = directory.snapshot();
            if !snapshot.is_empty() {
                assert_eq!(snapshot.get(&S3), snapshot.get(&SQS));
            }
        }
        writer.join().unwrap();
    }
}
