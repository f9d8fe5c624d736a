//! Lease registry for scan targets
//!
//! This module keeps the ordered list of servers that spiders may index and
//! decides which one is handed out next. A target is leased by stamping it
//! with the current time; it becomes eligible again once the stamp is older
//! than the lease timeout, or immediately after an explicit release.

use serde::Serialize;
use std::io::BufRead;
use std::path::Path;
use std::time::{Duration, Instant};

use super::protocol::MAX_TARGET_LEN;

/// Default time after which an un-refreshed lease is reclaimed
pub const DEFAULT_LEASE_TIMEOUT: Duration = Duration::from_secs(60);

// ============================================================================
// Target
// ============================================================================

/// A server that can be leased for scanning
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target {
    /// Server name (hostname)
    name: String,

    /// When the target was last leased or refreshed; `None` means free
    last_seen: Option<Instant>,
}

impl Target {
    /// Create a free target
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            last_seen: None,
        }
    }

    /// Target name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Last lease or keepalive time
    pub fn last_seen(&self) -> Option<Instant> {
        self.last_seen
    }

    /// Check whether the target can be leased at `now`
    pub fn is_eligible(&self, now: Instant, lease_timeout: Duration) -> bool {
        match self.last_seen {
            None => true,
            Some(seen) => now.saturating_duration_since(seen) > lease_timeout,
        }
    }

    fn refresh(&mut self, now: Instant) {
        self.last_seen = Some(now);
    }

    fn reset(&mut self) {
        self.last_seen = None;
    }
}

// ============================================================================
// Lease Registry
// ============================================================================

/// Ordered collection of targets with a round-robin cursor
///
/// The registry has a single owner (the scheduler's receive loop), so no
/// interior locking is used.
#[derive(Debug)]
pub struct LeaseRegistry {
    /// Targets in rotation order
    targets: Vec<Target>,

    /// Index of the next target to examine; always `< targets.len()` when non-empty
    cursor: usize,

    /// Age after which a lease is considered abandoned
    lease_timeout: Duration,
}

impl Default for LeaseRegistry {
    fn default() -> Self {
        Self::new(DEFAULT_LEASE_TIMEOUT)
    }
}

impl LeaseRegistry {
    /// Create an empty registry
    pub fn new(lease_timeout: Duration) -> Self {
        Self {
            targets: Vec::new(),
            cursor: 0,
            lease_timeout,
        }
    }

    /// Lease timeout in use
    pub fn lease_timeout(&self) -> Duration {
        self.lease_timeout
    }

    /// Number of registered targets
    pub fn len(&self) -> usize {
        self.targets.len()
    }

    /// Check if no targets are registered
    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }

    /// Check if a target is registered
    pub fn contains(&self, name: &str) -> bool {
        self.position(name).is_some()
    }

    /// Look up a target by name
    pub fn get(&self, name: &str) -> Option<&Target> {
        self.targets.iter().find(|t| t.name == name)
    }

    /// Target names in rotation order, starting from the slot order (not the cursor)
    pub fn names(&self) -> Vec<&str> {
        self.targets.iter().map(|t| t.name.as_str()).collect()
    }

    /// Add a target so that it becomes the next candidate
    ///
    /// Returns `false` (and logs a warning) when the name is empty, already
    /// registered, or cannot be carried by the wire protocol.
    pub fn add_target(&mut self, name: impl Into<String>) -> bool {
        let name = name.into();

        if name.is_empty() {
            tracing::warn!("Ignoring empty target name");
            return false;
        }

        if name.len() > MAX_TARGET_LEN || name.contains('\n') {
            tracing::warn!(
                name_len = name.len(),
                "Ignoring target name that does not fit in a datagram"
            );
            return false;
        }

        if self.contains(&name) {
            tracing::warn!(server = %name, "Duplicated target");
            return false;
        }

        // Insert in front of the cursor; the cursor now points at the new target.
        self.targets.insert(self.cursor, Target::new(name));
        true
    }

    /// Remove a target entirely
    ///
    /// The cursor keeps pointing at the same next candidate.
    pub fn remove_target(&mut self, name: &str) -> bool {
        let Some(index) = self.position(name) else {
            return false;
        };

        self.targets.remove(index);

        if index < self.cursor {
            self.cursor -= 1;
        }
        if self.cursor >= self.targets.len() {
            self.cursor = 0;
        }

        tracing::info!(server = %name, "Target removed");
        true
    }

    /// Lease the next eligible target
    pub fn acquire(&mut self) -> Option<String> {
        self.acquire_at(Instant::now())
    }

    /// Lease the next eligible target as of `now`
    ///
    /// Each target is examined at most once per call. `None` means every
    /// target currently holds a live lease.
    pub fn acquire_at(&mut self, now: Instant) -> Option<String> {
        let len = self.targets.len();

        for step in 0..len {
            let index = (self.cursor + step) % len;
            let target = &mut self.targets[index];

            if target.is_eligible(now, self.lease_timeout) {
                target.refresh(now);
                let name = target.name.clone();
                self.cursor = (index + 1) % len;
                return Some(name);
            }
        }

        None
    }

    /// Refresh a held lease
    pub fn keepalive(&mut self, name: &str) -> bool {
        self.keepalive_at(name, Instant::now())
    }

    /// Refresh a held lease as of `now`
    ///
    /// Unknown names are ignored; a keepalive racing a removal is benign.
    pub fn keepalive_at(&mut self, name: &str, now: Instant) -> bool {
        match self.position(name) {
            Some(index) => {
                self.targets[index].refresh(now);
                true
            }
            None => false,
        }
    }

    /// Release a lease so the target is immediately eligible again
    pub fn release(&mut self, name: &str) -> bool {
        match self.position(name) {
            Some(index) => {
                self.targets[index].reset();
                true
            }
            None => false,
        }
    }

    /// Add every non-empty line of `reader` as a target
    ///
    /// Lines are trimmed; lines starting with `#` are comments. Returns the
    /// number of targets actually added.
    pub fn load_from_list<R: BufRead>(&mut self, reader: R) -> std::io::Result<usize> {
        let mut added = 0;

        for line in reader.lines() {
            let line = line?;
            let name = line.trim();

            if name.is_empty() || name.starts_with('#') {
                continue;
            }

            if self.add_target(name) {
                added += 1;
            }
        }

        Ok(added)
    }

    /// Load targets from a newline-delimited file
    pub fn load_from_file(&mut self, path: impl AsRef<Path>) -> std::io::Result<usize> {
        let path = path.as_ref();
        let file = std::fs::File::open(path)?;
        let added = self.load_from_list(std::io::BufReader::new(file))?;

        tracing::info!(
            path = %path.display(),
            added = added,
            total = self.targets.len(),
            "Loaded target list"
        );

        Ok(added)
    }

    /// Current registry statistics
    pub fn stats(&self) -> RegistryStats {
        self.stats_at(Instant::now())
    }

    /// Registry statistics as of `now`
    pub fn stats_at(&self, now: Instant) -> RegistryStats {
        let free = self
            .targets
            .iter()
            .filter(|t| t.is_eligible(now, self.lease_timeout))
            .count();

        RegistryStats {
            total: self.targets.len(),
            leased: self.targets.len() - free,
            free,
        }
    }

    fn position(&self, name: &str) -> Option<usize> {
        self.targets.iter().position(|t| t.name == name)
    }
}

/// Registry statistics
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RegistryStats {
    pub total: usize,
    pub leased: usize,
    pub free: usize,
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn registry_with(names: &[&str]) -> LeaseRegistry {
        let mut registry = LeaseRegistry::default();
        for name in names {
            registry.add_target(*name);
        }
        registry
    }

    #[test]
    fn test_acquire_reverse_insertion_order() {
        let mut registry = registry_with(&["foo", "bar"]);

        assert_eq!(registry.acquire().as_deref(), Some("bar"));
        assert_eq!(registry.acquire().as_deref(), Some("foo"));
        assert_eq!(registry.acquire(), None);
    }

    #[test]
    fn test_golden_release_scenario() {
        let mut registry = registry_with(&["one", "two", "three", "four"]);

        assert_eq!(registry.acquire().as_deref(), Some("four"));
        assert_eq!(registry.acquire().as_deref(), Some("three"));
        registry.release("three");
        assert_eq!(registry.acquire().as_deref(), Some("two"));
        assert_eq!(registry.acquire().as_deref(), Some("one"));
        registry.release("three");
        assert_eq!(registry.acquire().as_deref(), Some("three"));
    }

    #[test]
    fn test_release_resets_timestamp() {
        let mut registry = registry_with(&["foo", "bar"]);

        assert_eq!(registry.acquire().as_deref(), Some("bar"));
        assert_eq!(registry.acquire().as_deref(), Some("foo"));
        registry.release("bar");

        assert!(registry.get("bar").unwrap().last_seen().is_none());
        assert!(registry.get("foo").unwrap().last_seen().is_some());
    }

    #[test]
    fn test_release_then_acquire_single_target() {
        let mut registry = registry_with(&["solo"]);

        assert_eq!(registry.acquire().as_deref(), Some("solo"));
        assert_eq!(registry.acquire(), None);
        assert!(registry.release("solo"));
        assert_eq!(registry.acquire().as_deref(), Some("solo"));
    }

    #[test]
    fn test_lease_reclaimed_after_timeout() {
        let mut registry = LeaseRegistry::new(Duration::from_secs(60));
        registry.add_target("foo");
        let start = Instant::now();

        assert_eq!(registry.acquire_at(start).as_deref(), Some("foo"));
        assert_eq!(registry.acquire_at(start + Duration::from_secs(30)), None);
        // Exactly at the boundary the lease is still live
        assert_eq!(registry.acquire_at(start + Duration::from_secs(60)), None);
        assert_eq!(
            registry.acquire_at(start + Duration::from_secs(61)).as_deref(),
            Some("foo")
        );
    }

    #[test]
    fn test_keepalive_prevents_reclamation() {
        let mut registry = LeaseRegistry::new(Duration::from_secs(60));
        registry.add_target("foo");
        let start = Instant::now();

        registry.acquire_at(start);
        assert!(registry.keepalive_at("foo", start + Duration::from_secs(50)));

        assert_eq!(registry.acquire_at(start + Duration::from_secs(100)), None);
        assert_eq!(
            registry.acquire_at(start + Duration::from_secs(111)).as_deref(),
            Some("foo")
        );
    }

    #[test]
    fn test_keepalive_unknown_target_is_noop() {
        let mut registry = registry_with(&["foo"]);

        assert!(!registry.keepalive("bar"));
        assert!(registry.get("foo").unwrap().last_seen().is_none());
    }

    #[test]
    fn test_release_unknown_target_is_noop() {
        let mut registry = registry_with(&["foo"]);

        assert_eq!(registry.acquire().as_deref(), Some("foo"));
        assert!(!registry.release("bar"));
        assert!(registry.get("foo").unwrap().last_seen().is_some());
    }

    #[test]
    fn test_duplicate_add() {
        let mut registry = LeaseRegistry::default();

        assert!(registry.add_target("x"));
        assert!(!registry.add_target("x"));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_rejects_unusable_names() {
        let mut registry = LeaseRegistry::default();

        assert!(!registry.add_target(""));
        assert!(!registry.add_target("a".repeat(MAX_TARGET_LEN + 1)));
        assert!(!registry.add_target("bad\nname"));
        assert!(registry.add_target("a".repeat(MAX_TARGET_LEN)));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_empty_registry_operations() {
        let mut registry = LeaseRegistry::default();

        assert_eq!(registry.acquire(), None);
        assert!(!registry.keepalive("foo"));
        assert!(!registry.release("foo"));
        assert!(!registry.remove_target("foo"));
        assert_eq!(registry.stats().total, 0);
    }

    #[test]
    fn test_added_target_is_next_candidate() {
        let mut registry = registry_with(&["a", "b", "c"]);

        assert_eq!(registry.acquire().as_deref(), Some("c"));
        registry.add_target("new");
        assert_eq!(registry.acquire().as_deref(), Some("new"));
        assert_eq!(registry.acquire().as_deref(), Some("b"));
    }

    #[test]
    fn test_remove_target_keeps_rotation() {
        let mut registry = registry_with(&["a", "b", "c", "d"]);
        // Order is d, c, b, a

        assert_eq!(registry.acquire().as_deref(), Some("d"));
        assert_eq!(registry.acquire().as_deref(), Some("c"));

        // Remove a target behind the cursor
        assert!(registry.remove_target("d"));
        assert_eq!(registry.acquire().as_deref(), Some("b"));

        // Remove the last slot while the cursor points at it
        assert!(registry.remove_target("a"));
        assert_eq!(registry.len(), 2);
        assert_eq!(registry.acquire(), None);

        registry.release("c");
        assert_eq!(registry.acquire().as_deref(), Some("c"));
    }

    #[test]
    fn test_load_from_list() {
        let list = "alpha\n\nbeta\n# comment\nalpha\n  gamma  \r\n";
        let mut registry = LeaseRegistry::default();

        let added = registry.load_from_list(Cursor::new(list)).unwrap();

        assert_eq!(added, 3);
        assert_eq!(registry.len(), 3);
        assert!(registry.contains("gamma"));
        assert_eq!(registry.acquire().as_deref(), Some("gamma"));
    }

    #[test]
    fn test_load_from_missing_file() {
        let mut registry = LeaseRegistry::default();
        let result = registry.load_from_file("/nonexistent/servers.dat");
        assert!(result.is_err());
        assert!(registry.is_empty());
    }

    #[test]
    fn test_stats() {
        let mut registry = registry_with(&["a", "b", "c"]);
        registry.acquire();

        let stats = registry.stats();
        assert_eq!(stats.total, 3);
        assert_eq!(stats.leased, 1);
        assert_eq!(stats.free, 2);
    }
}
