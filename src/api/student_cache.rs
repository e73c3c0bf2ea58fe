//! Time-boxed, process-local cache for student listings.
//!
//! Listings are keyed by their filter. Any student write calls
//! [`StudentCache::invalidate`], which drops every entry and bumps the
//! generation. A listing fetched under an older generation is never stored.
//! Separate server processes each keep their own cache.

use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::db::Student;

#[derive(Debug, Clone)]
struct CachedListing {
    students: Arc<Vec<Student>>,
    fetched_at: Instant,
}

#[derive(Debug)]
pub struct StudentCache {
    entries: DashMap<String, CachedListing>,
    generation: AtomicU64,
    ttl: Duration,
}

impl StudentCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            generation: AtomicU64::new(0),
            ttl,
        }
    }

    /// A fresh listing for `key`, if one is cached
    pub fn get(&self, key: &str) -> Option<Arc<Vec<Student>>> {
        let entry = self.entries.get(key)?;
        if entry.fetched_at.elapsed() < self.ttl {
            return Some(entry.students.clone());
        }
        drop(entry);
        self.entries.remove(key);
        None
    }

    /// Read before querying; pass the value to [`StudentCache::put`]
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    /// Store a listing fetched under `generation`. Skipped when a write
    /// invalidated the cache since then.
    pub fn put(
        &self,
        key: String,
        generation: u64,
        students: Vec<Student>,
    ) -> Arc<Vec<Student>> {
        let students = Arc::new(students);
        if !self.ttl.is_zero() && self.generation() == generation {
            self.entries.insert(
                key.clone(),
                CachedListing {
                    students: students.clone(),
                    fetched_at: Instant::now(),
                },
            );
            // An invalidate may have cleared the map between the check and the insert
            if self.generation() != generation {
                self.entries
                    .remove_if(&key, |_, cached| Arc::ptr_eq(&cached.students, &students));
            }
        }
        students
    }

    pub fn invalidate(&self) {
        self.generation.fetch_add(1, Ordering::AcqRel);
        self.entries.clear();
        tracing::trace!("Student cache invalidated");
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn student(admission: &str) -> Student {
        Student {
            id: admission.to_lowercase(),
            admission_number: admission.to_string(),
            name: "Test".to_string(),
            locker_number: None,
            class_name: Some("10A".to_string()),
            roll_number: None,
            phone_name: None,
            special_pass: false,
            created_at: "2026-01-01T00:00:00Z".to_string(),
            updated_at: "2026-01-01T00:00:00Z".to_string(),
        }
    }

    #[test]
    fn test_hit_then_invalidate() {
        let cache = StudentCache::new(Duration::from_secs(60));
        assert!(cache.get("10A|").is_none());

        cache.put("10A|".to_string(), cache.generation(), vec![student("A1"), student("A2")]);
        assert_eq!(cache.get("10A|").unwrap().len(), 2);
        assert!(cache.get("10B|").is_none());

        cache.invalidate();
        assert!(cache.is_empty());
        assert!(cache.get("10A|").is_none());
    }

    #[test]
    fn test_expired_entries_are_dropped() {
        let cache = StudentCache::new(Duration::from_millis(1));
        cache.put("|".to_string(), cache.generation(), vec![student("A1")]);
        std::thread::sleep(Duration::from_millis(5));
        assert!(cache.get("|").is_none());
        assert_eq!(cache.len(), 0);
    }

    #[test]
    fn test_zero_ttl_disables_caching() {
        let cache = StudentCache::new(Duration::ZERO);
        let listing = cache.put("|".to_string(), cache.generation(), vec![student("A1")]);
        assert_eq!(listing.len(), 1);
        assert!(cache.is_empty());
    }

    #[test]
    fn test_listing_fetched_before_a_write_is_not_stored() {
        let cache = StudentCache::new(Duration::from_secs(60));
        assert!(cache.get("|").is_none());
        let generation = cache.generation();

        // A student write lands while the listing query is in flight
        cache.invalidate();

        let listing = cache.put("|".to_string(), generation, vec![student("A1")]);
        assert_eq!(listing.len(), 1);
        assert!(cache.get("|").is_none());

        cache.put("|".to_string(), cache.generation(), vec![student("A1"), student("A2")]);
        assert_eq!(cache.get("|").unwrap().len(), 2);
    }
}
