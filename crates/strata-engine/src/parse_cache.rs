//! Parsed call-target cache.
//!
//! Keyed by source identity plus the normalized argument-name list, holding
//! the source weakly so a cache entry never keeps a source alive. Stale
//! entries are swept opportunistically on each `parse` call; there is no
//! background eviction thread.

use crate::error::GuestError;
use crate::language::{CallTarget, Language, Source};
use dashmap::DashMap;
use std::sync::{Arc, Weak};

#[derive(Clone, PartialEq, Eq, Hash)]
struct ParseKey {
    source_id: u64,
    arg_names: Vec<String>,
}

impl ParseKey {
    fn new(source: &Arc<Source>, arg_names: &[String]) -> Self {
        // An empty argument list and an absent one are the same key.
        Self {
            source_id: source.id(),
            arg_names: arg_names.to_vec(),
        }
    }
}

struct CacheEntry {
    source: Weak<Source>,
    target: Arc<CallTarget>,
}

/// Cache of parsed call targets.
pub struct SourceParseCache {
    entries: DashMap<ParseKey, CacheEntry>,
}

impl SourceParseCache {
    /// Create an empty cache
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
        }
    }

    /// Return the cached call target for (source, arg_names), parsing and
    /// inserting on a miss.
    ///
    /// Two threads racing on the same missing entry both parse, but only
    /// one insertion wins and its target is returned to all callers:
    /// duplicate work, never duplicate state. Parse results for identical
    /// keys are semantically interchangeable, so this is not a correctness
    /// issue.
    pub fn parse(
        &self,
        language: &dyn Language,
        source: &Arc<Source>,
        arg_names: &[String],
    ) -> Result<Arc<CallTarget>, GuestError> {
        self.sweep_stale();

        let key = ParseKey::new(source, arg_names);
        if let Some(entry) = self.entries.get(&key) {
            if entry.source.upgrade().is_some() {
                return Ok(entry.target.clone());
            }
        }

        // Parse outside any map lock.
        let target = language.parse(source, arg_names)?;

        match self.entries.entry(key) {
            dashmap::mapref::entry::Entry::Occupied(mut existing) => {
                // Lost the insertion race (or found a stale entry whose
                // source was reclaimed): prefer the live winner, replace a
                // dead one.
                if existing.get().source.upgrade().is_some() {
                    Ok(existing.get().target.clone())
                } else {
                    existing.insert(CacheEntry {
                        source: Arc::downgrade(source),
                        target: target.clone(),
                    });
                    Ok(target)
                }
            }
            dashmap::mapref::entry::Entry::Vacant(vacant) => {
                vacant.insert(CacheEntry {
                    source: Arc::downgrade(source),
                    target: target.clone(),
                });
                Ok(target)
            }
        }
    }

    /// Number of live entries
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True if the cache holds no entries
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drop entries whose source has been reclaimed.
    fn sweep_stale(&self) {
        self.entries
            .retain(|_, entry| entry.source.upgrade().is_some());
    }
}

impl Default for SourceParseCache {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::Context;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use strata_sdk::Value;

    struct TestLanguage {
        parses: AtomicUsize,
    }

    impl TestLanguage {
        fn new() -> Self {
            Self {
                parses: AtomicUsize::new(0),
            }
        }
        fn parse_count(&self) -> usize {
            self.parses.load(Ordering::SeqCst)
        }
    }

    impl Language for TestLanguage {
        fn name(&self) -> &str {
            "test"
        }

        fn initialize(&self, _context: &Arc<Context>) -> Result<(), GuestError> {
            Ok(())
        }

        fn parse(
            &self,
            source: &Arc<Source>,
            _arg_names: &[String],
        ) -> Result<Arc<CallTarget>, GuestError> {
            self.parses.fetch_add(1, Ordering::SeqCst);
            let value = source.text().len() as i64;
            Ok(CallTarget::new(source.name(), move |_| Ok(Value::Int(value))))
        }
    }

    #[test]
    fn test_hit_returns_same_target() {
        let cache = SourceParseCache::new();
        let language = TestLanguage::new();
        let source = Source::new("s", "abc");

        let first = cache.parse(&language, &source, &[]).unwrap();
        let second = cache.parse(&language, &source, &[]).unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(language.parse_count(), 1);
    }

    #[test]
    fn test_distinct_arg_names_are_distinct_entries() {
        let cache = SourceParseCache::new();
        let language = TestLanguage::new();
        let source = Source::new("s", "abc");

        cache.parse(&language, &source, &[]).unwrap();
        cache
            .parse(&language, &source, &["x".to_string()])
            .unwrap();
        assert_eq!(language.parse_count(), 2);
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn test_same_text_distinct_sources_are_distinct_entries() {
        let cache = SourceParseCache::new();
        let language = TestLanguage::new();
        let a = Source::new("s", "abc");
        let b = Source::new("s", "abc");

        cache.parse(&language, &a, &[]).unwrap();
        cache.parse(&language, &b, &[]).unwrap();
        assert_eq!(language.parse_count(), 2);
    }

    #[test]
    fn test_stale_entries_swept_on_parse() {
        let cache = SourceParseCache::new();
        let language = TestLanguage::new();

        let dead = Source::new("dead", "x");
        cache.parse(&language, &dead, &[]).unwrap();
        assert_eq!(cache.len(), 1);
        drop(dead);

        // The next parse call sweeps the reclaimed entry.
        let live = Source::new("live", "y");
        cache.parse(&language, &live, &[]).unwrap();
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_parse_error_not_cached() {
        struct FailingLanguage;
        impl Language for FailingLanguage {
            fn name(&self) -> &str {
                "fail"
            }
            fn initialize(&self, _context: &Arc<Context>) -> Result<(), GuestError> {
                Ok(())
            }
            fn parse(
                &self,
                _source: &Arc<Source>,
                _arg_names: &[String],
            ) -> Result<Arc<CallTarget>, GuestError> {
                Err(GuestError::Parse("syntax error".into()))
            }
        }

        let cache = SourceParseCache::new();
        let source = Source::new("s", "oops");
        assert!(cache.parse(&FailingLanguage, &source, &[]).is_err());
        assert!(cache.is_empty());
    }
}
