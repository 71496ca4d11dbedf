/*!
The engine context: compilation cache, results cache and the shared
register buffer.

Both caches are fixed-size open-addressed tables with a primary and one
displacement slot per key. Insertion overwrites: a colliding entry is
pushed to the displacement slot, and when that is taken too, the stale
displaced entry is dropped. Nothing is ever searched beyond the two slots,
so lookups stay O(1) and the tables need no eviction bookkeeping.

The caches are engine-wide rather than process-wide; callers that want
sharing pass the same [`Engine`] around. All access is guarded by mutexes,
so an engine can be used from several threads, with each match running on
its own register buffer once the buffers leave the shared pool.
*/

use std::hash::{Hash, Hasher};
use std::sync::{Arc, Mutex};

use log::trace;
use rustc_hash::FxHasher;

use crate::ast::CompileData;
use crate::exec::{build_regexp_data, Regexp, RegexpData, Subject};
use crate::ranges::{CaseFolder, Latin1CaseFolder};
use crate::{Error, Flags};

/// Register counts up to this size use the engine's shared buffer; larger
/// requests get an ad-hoc allocation.
const STATIC_REGISTER_BUFFER_SIZE: usize = (128 + 1) * 2;

const COMPILATION_CACHE_ENTRIES: usize = 128;
const RESULTS_CACHE_ENTRIES: usize = 256;

fn fingerprint(pattern: &str, flags: Flags) -> u64 {
    let mut hasher = FxHasher::default();
    pattern.hash(&mut hasher);
    flags.bits().hash(&mut hasher);
    hasher.finish()
}

fn subject_fingerprint(subject: &Subject, pattern: &str, flags: Flags) -> u64 {
    let mut hasher = FxHasher::default();
    subject.hash(&mut hasher);
    pattern.hash(&mut hasher);
    flags.bits().hash(&mut hasher);
    hasher.finish()
}

struct CompilationEntry {
    hash: u64,
    pattern: String,
    flags: Flags,
    data: Arc<RegexpData>,
}

struct CompilationCache {
    entries: Vec<Option<CompilationEntry>>,
}

impl CompilationCache {
    fn new() -> Self {
        Self { entries: (0..COMPILATION_CACHE_ENTRIES).map(|_| None).collect() }
    }

    fn slots(&self, hash: u64) -> (usize, usize) {
        let primary = (hash as usize) & (COMPILATION_CACHE_ENTRIES - 1);
        let secondary = (primary + 1) & (COMPILATION_CACHE_ENTRIES - 1);
        (primary, secondary)
    }

    fn lookup(&self, hash: u64, pattern: &str, flags: Flags) -> Option<Arc<RegexpData>> {
        let (primary, secondary) = self.slots(hash);
        for slot in [primary, secondary] {
            if let Some(entry) = &self.entries[slot] {
                if entry.hash == hash && entry.flags == flags && entry.pattern == pattern {
                    return Some(Arc::clone(&entry.data));
                }
            }
        }
        None
    }

    fn put(&mut self, hash: u64, pattern: String, flags: Flags, data: Arc<RegexpData>) {
        let (primary, secondary) = self.slots(hash);
        let entry = CompilationEntry { hash, pattern, flags, data };
        if self.entries[primary].is_none() {
            self.entries[primary] = Some(entry);
        } else if self.entries[secondary].is_none() {
            self.entries[secondary] = Some(entry);
        } else {
            // Displace: drop the entry in the secondary slot and take the
            // primary one.
            self.entries[secondary] = None;
            self.entries[primary] = Some(entry);
        }
    }
}

/// All matches of a global pattern over one subject, as cached by
/// [`Engine::exec_all`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GlobalResults {
    /// Capture registers of every match, concatenated.
    pub matches: Vec<i32>,
    /// Capture registers per match; `matches.len()` is a multiple of it.
    pub registers_per_match: usize,
    /// Capture registers of the final match.
    pub last_match: Vec<i32>,
}

struct ResultsEntry {
    hash: u64,
    subject: Arc<Subject>,
    pattern: String,
    flags: Flags,
    results: Arc<GlobalResults>,
}

struct ResultsCache {
    entries: Vec<Option<ResultsEntry>>,
}

impl ResultsCache {
    fn new() -> Self {
        Self { entries: (0..RESULTS_CACHE_ENTRIES).map(|_| None).collect() }
    }

    fn slots(&self, hash: u64) -> (usize, usize) {
        let primary = (hash as usize) & (RESULTS_CACHE_ENTRIES - 1);
        let secondary = (primary + 1) & (RESULTS_CACHE_ENTRIES - 1);
        (primary, secondary)
    }

    fn lookup(
        &self,
        hash: u64,
        subject: &Subject,
        pattern: &str,
        flags: Flags,
    ) -> Option<Arc<GlobalResults>> {
        let (primary, secondary) = self.slots(hash);
        for slot in [primary, secondary] {
            if let Some(entry) = &self.entries[slot] {
                if entry.hash == hash
                    && entry.flags == flags
                    && entry.pattern == pattern
                    && *entry.subject == *subject
                {
                    return Some(Arc::clone(&entry.results));
                }
            }
        }
        None
    }

    fn put(
        &mut self,
        hash: u64,
        subject: Arc<Subject>,
        pattern: String,
        flags: Flags,
        results: Arc<GlobalResults>,
    ) {
        let (primary, secondary) = self.slots(hash);
        let entry = ResultsEntry { hash, subject, pattern, flags, results };
        if self.entries[primary].is_none() {
            self.entries[primary] = Some(entry);
        } else if self.entries[secondary].is_none() {
            self.entries[secondary] = Some(entry);
        } else {
            self.entries[secondary] = None;
            self.entries[primary] = Some(entry);
        }
    }
}

/// The regexp engine: owns the caches and the shared register buffer.
pub struct Engine {
    compilation_cache: Mutex<CompilationCache>,
    results_cache: Mutex<ResultsCache>,
    register_buffer: Mutex<Vec<i32>>,
}

impl Default for Engine {
    fn default() -> Self {
        Self::new()
    }
}

impl Engine {
    /// Creates an engine with empty caches.
    pub fn new() -> Self {
        Self {
            compilation_cache: Mutex::new(CompilationCache::new()),
            results_cache: Mutex::new(ResultsCache::new()),
            register_buffer: Mutex::new(vec![-1; STATIC_REGISTER_BUFFER_SIZE]),
        }
    }

    /// Compiles a pattern with the default Latin-1 case folder.
    ///
    /// `pattern` is the source text, used as the cache key together with
    /// `flags`; `data` is its parse. Two compiles of the same pattern and
    /// flags share their compiled data through the compilation cache.
    pub fn compile(
        &self,
        pattern: &str,
        data: CompileData,
        flags: Flags,
    ) -> Result<Regexp, Error> {
        self.compile_with_folder(pattern, data, flags, Arc::new(Latin1CaseFolder))
    }

    /// Compiles a pattern with an injected case-fold oracle.
    pub fn compile_with_folder(
        &self,
        pattern: &str,
        data: CompileData,
        flags: Flags,
        case_folder: Arc<dyn CaseFolder>,
    ) -> Result<Regexp, Error> {
        let hash = fingerprint(pattern, flags);
        if let Some(data) = self.compilation_cache.lock().unwrap().lookup(hash, pattern, flags)
        {
            trace!("compilation cache hit for /{pattern}/");
            return Ok(Regexp { data });
        }
        let data = Arc::new(build_regexp_data(pattern, data, flags, case_folder)?);
        self.compilation_cache.lock().unwrap().put(
            hash,
            pattern.to_string(),
            flags,
            Arc::clone(&data),
        );
        Ok(Regexp { data })
    }

    /// Finds all matches of a global pattern, backed by the results cache:
    /// repeating the same pattern over the same subject returns the cached
    /// match array.
    pub fn exec_all(
        &self,
        regexp: &Regexp,
        subject: &Arc<Subject>,
    ) -> Result<Option<Arc<GlobalResults>>, Error> {
        assert!(regexp.flags().global());
        let hash = subject_fingerprint(subject, regexp.pattern(), regexp.flags());
        if let Some(results) = self.results_cache.lock().unwrap().lookup(
            hash,
            subject,
            regexp.pattern(),
            regexp.flags(),
        ) {
            trace!("results cache hit for /{}/", regexp.pattern());
            return Ok(Some(results));
        }

        let mut global = regexp.global_matches(subject);
        let mut matches = Vec::new();
        let mut last_match = Vec::new();
        let registers_per_match = (regexp.capture_count() + 1) * 2;
        while let Some(registers) = global.fetch_next()? {
            matches.extend_from_slice(registers);
            last_match.clear();
            last_match.extend_from_slice(registers);
        }
        if matches.is_empty() {
            return Ok(None);
        }
        let results =
            Arc::new(GlobalResults { matches, registers_per_match, last_match });
        self.results_cache.lock().unwrap().put(
            hash,
            Arc::clone(subject),
            regexp.pattern().to_string(),
            regexp.flags(),
            Arc::clone(&results),
        );
        Ok(Some(results))
    }

    /// Runs `f` on a register buffer of at least `required` entries,
    /// reusing the engine's buffer when it is large enough and free.
    pub(crate) fn with_register_buffer<R>(
        &self,
        required: usize,
        f: impl FnOnce(&mut [i32]) -> R,
    ) -> R {
        if required <= STATIC_REGISTER_BUFFER_SIZE {
            if let Ok(mut buffer) = self.register_buffer.try_lock() {
                return f(&mut buffer[..required]);
            }
        }
        // Above the fixed size, or the shared buffer is busy on another
        // thread: fall back to an ad-hoc allocation released on return.
        let mut buffer = vec![-1; required];
        f(&mut buffer)
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::ast::Tree;

    fn compile(engine: &Engine, pattern: &str) -> Regexp {
        engine
            .compile(pattern, CompileData::new(Tree::atom_str(pattern), 0), Flags::empty())
            .unwrap()
    }

    #[test]
    fn compilation_cache_shares_data() {
        let engine = Engine::new();
        let a = compile(&engine, "abcdefgh");
        let b = compile(&engine, "abcdefgh");
        assert!(Arc::ptr_eq(&a.data, &b.data));
        // Different flags miss the cache.
        let c = engine
            .compile(
                "abcdefgh",
                CompileData::new(Tree::atom_str("abcdefgh"), 0),
                Flags::GLOBAL,
            )
            .unwrap();
        assert!(!Arc::ptr_eq(&a.data, &c.data));
    }

    #[test]
    fn displacement_keeps_the_newest_entry() {
        let mut cache = CompilationCache::new();
        let engine = Engine::new();
        let re = compile(&engine, "abcdefgh");
        // Three entries forced into the same two slots: the last insert
        // displaces the middle one.
        cache.put(0, "a".into(), Flags::empty(), Arc::clone(&re.data));
        cache.put(0, "b".into(), Flags::empty(), Arc::clone(&re.data));
        cache.put(0, "c".into(), Flags::empty(), Arc::clone(&re.data));
        assert!(cache.lookup(0, "c", Flags::empty()).is_some());
        assert!(cache.lookup(0, "b", Flags::empty()).is_none());
        assert!(cache.lookup(0, "a", Flags::empty()).is_none());
    }
}
