//! Human-readable id allocation
//!
//! HRIDs look like `TASK_AAA001`: the entity type uppercased, an underscore,
//! a three-letter base-26 block and a three-digit decimal block. The two
//! blocks form a single sequence `seq = alpha * 1000 + digits`, so `AAA999`
//! is followed by `AAB000`. Each `(user, type)` pair has its own sequence,
//! starting at `AAA001`.

use std::collections::HashMap;

use once_cell::sync::Lazy;
use parking_lot::Mutex;
use regex::Regex;

use crate::error::{MnemonError, Result};

/// Sequence values per alpha block
const ALPHA_SPAN: u64 = 1000;
/// Total sequence space per (user, type): 26^3 * 1000
const SEQ_CAPACITY: u64 = 26 * 26 * 26 * ALPHA_SPAN;
/// Characters of the type name that participate in the ordering key
const TYPE_KEY_CHARS: usize = 8;

static HRID_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^([A-Z][A-Z0-9_]*)_([A-Z]{3})([0-9]{3})$").expect("hrid grammar"));

/// A parsed HRID: entity type (lowercased), alpha block index, numeric block
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedHrid {
    pub memory_type: String,
    pub alpha: u32,
    pub num: u32,
}

impl ParsedHrid {
    /// Position in the per-(user, type) sequence
    pub fn seq(&self) -> u64 {
        self.alpha as u64 * ALPHA_SPAN + self.num as u64
    }
}

/// Parse and validate an HRID against the grammar `TYPE '_' [A-Z]{3}[0-9]{3}`
pub fn parse(hrid: &str) -> Result<ParsedHrid> {
    let caps = HRID_RE.captures(hrid).ok_or_else(|| {
        MnemonError::InvalidInput(format!("malformed HRID: {:?} (expected TYPE_AAA000)", hrid))
    })?;
    let alpha = caps[2]
        .bytes()
        .fold(0u32, |acc, b| acc * 26 + (b - b'A') as u32);
    let num: u32 = caps[3].parse().expect("three digits");
    Ok(ParsedHrid {
        memory_type: caps[1].to_lowercase(),
        alpha,
        num,
    })
}

/// Entity type encoded in an HRID prefix (lowercased)
pub fn type_of(hrid: &str) -> Result<String> {
    Ok(parse(hrid)?.memory_type)
}

/// Render the HRID for a `(type, seq)` pair
fn format_hrid(memory_type: &str, seq: u64) -> String {
    let mut alpha = seq / ALPHA_SPAN;
    let num = seq % ALPHA_SPAN;
    let mut letters = [b'A'; 3];
    for slot in letters.iter_mut().rev() {
        *slot = b'A' + (alpha % 26) as u8;
        alpha /= 26;
    }
    format!(
        "{}_{}{:03}",
        memory_type.to_uppercase(),
        std::str::from_utf8(&letters).expect("ascii letters"),
        num
    )
}

/// Deterministic cross-type ordering key.
///
/// The leading type characters are packed in base 37 (`A-Z` = 1..=26,
/// `0-9` = 27..=36, anything else 0) above the sequence number. Saturating
/// arithmetic keeps the key total for pathologically long type names; exact
/// up to seven encoded characters.
pub fn to_index(hrid: &str) -> Result<u64> {
    let parsed = parse(hrid)?;
    let mut code: u64 = 0;
    for c in parsed
        .memory_type
        .to_uppercase()
        .chars()
        .take(TYPE_KEY_CHARS)
    {
        let v = match c {
            'A'..='Z' => c as u64 - 'A' as u64 + 1,
            '0'..='9' => c as u64 - '0' as u64 + 27,
            _ => 0,
        };
        code = code.saturating_mul(37).saturating_add(v);
    }
    Ok(code
        .saturating_mul(SEQ_CAPACITY)
        .saturating_add(parsed.seq()))
}

#[derive(Default)]
struct AllocatorState {
    /// Next sequence value per (user_id, memory_type)
    counters: HashMap<(String, String), u64>,
    /// (user_id, hrid) -> memory id
    forward: HashMap<(String, String), String>,
    /// (user_id, memory id) -> hrid
    inverse: HashMap<(String, String), String>,
}

/// Process-local HRID allocator.
///
/// Counters are not persisted; the service seeds them through [`assign`]
/// while scanning the graph store on first allocation for a `(user, type)`.
///
/// [`assign`]: HridAllocator::assign
#[derive(Default)]
pub struct HridAllocator {
    state: Mutex<AllocatorState>,
}

impl HridAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate the next HRID for `(user_id, memory_type)`
    pub fn next(&self, memory_type: &str, user_id: &str) -> Result<String> {
        let memory_type = memory_type.to_lowercase();
        let mut state = self.state.lock();
        let counter = state
            .counters
            .entry((user_id.to_string(), memory_type.clone()))
            .or_insert(1);
        if *counter >= SEQ_CAPACITY {
            return Err(MnemonError::ResourceExhausted(format!(
                "HRID space exhausted for user {:?} type {:?}",
                user_id, memory_type
            )));
        }
        let hrid = format_hrid(&memory_type, *counter);
        *counter += 1;
        Ok(hrid)
    }

    /// Record the mapping `hrid <-> id` and advance the counter past it.
    ///
    /// Also used for recovery: replaying persisted HRIDs through `assign`
    /// restores the counter floor after a restart.
    pub fn assign(&self, hrid: &str, id: &str, user_id: &str) -> Result<()> {
        let parsed = parse(hrid)?;
        let mut state = self.state.lock();
        let counter = state
            .counters
            .entry((user_id.to_string(), parsed.memory_type.clone()))
            .or_insert(1);
        *counter = (*counter).max(parsed.seq() + 1);
        state
            .forward
            .insert((user_id.to_string(), hrid.to_string()), id.to_string());
        state
            .inverse
            .insert((user_id.to_string(), id.to_string()), hrid.to_string());
        Ok(())
    }

    /// Resolve an HRID to the internal id, if known to this process
    pub fn resolve(&self, hrid: &str, user_id: &str) -> Option<String> {
        self.state
            .lock()
            .forward
            .get(&(user_id.to_string(), hrid.to_string()))
            .cloned()
    }

    /// Inverse lookup: internal id to HRID, if known to this process
    pub fn hrid_of(&self, id: &str, user_id: &str) -> Option<String> {
        self.state
            .lock()
            .inverse
            .get(&(user_id.to_string(), id.to_string()))
            .cloned()
    }

    /// Drop the mapping for a deleted memory. The counter is not rewound;
    /// HRIDs are never reissued within a process lifetime.
    pub fn forget(&self, hrid: &str, user_id: &str) {
        let mut state = self.state.lock();
        if let Some(id) = state
            .forward
            .remove(&(user_id.to_string(), hrid.to_string()))
        {
            state.inverse.remove(&(user_id.to_string(), id));
        }
    }

    /// Whether a counter exists for `(user, type)` (i.e. recovery already ran)
    pub fn has_counter(&self, memory_type: &str, user_id: &str) -> bool {
        self.state
            .lock()
            .counters
            .contains_key(&(user_id.to_string(), memory_type.to_lowercase()))
    }

    /// Mark a `(user, type)` sequence as recovered even when no HRIDs exist
    pub fn touch(&self, memory_type: &str, user_id: &str) {
        self.state
            .lock()
            .counters
            .entry((user_id.to_string(), memory_type.to_lowercase()))
            .or_insert(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_hrid_is_aaa001() {
        let alloc = HridAllocator::new();
        assert_eq!(alloc.next("task", "u1").unwrap(), "TASK_AAA001");
        assert_eq!(alloc.next("task", "u1").unwrap(), "TASK_AAA002");
    }

    #[test]
    fn test_counters_scoped_per_user_and_type() {
        let alloc = HridAllocator::new();
        assert_eq!(alloc.next("task", "u1").unwrap(), "TASK_AAA001");
        assert_eq!(alloc.next("note", "u1").unwrap(), "NOTE_AAA001");
        assert_eq!(alloc.next("task", "u2").unwrap(), "TASK_AAA001");
    }

    #[test]
    fn test_numeric_overflow_advances_alpha() {
        assert_eq!(format_hrid("task", 999), "TASK_AAA999");
        assert_eq!(format_hrid("task", 1000), "TASK_AAB000");
        assert_eq!(format_hrid("task", 25_999), "TASK_AAZ999");
        assert_eq!(format_hrid("task", 26_000), "TASK_ABA000");
    }

    #[test]
    fn test_parse_roundtrip() {
        let parsed = parse("TASK_ABC042").unwrap();
        assert_eq!(parsed.memory_type, "task");
        assert_eq!(parsed.alpha, 28); // A=0, B=1, C=2 -> 0*676 + 1*26 + 2
        assert_eq!(parsed.num, 42);
        assert_eq!(format_hrid("task", parsed.seq()), "TASK_ABC042");
    }

    #[test]
    fn test_parse_type_with_underscore() {
        let parsed = parse("MEETING_NOTE_AAA001").unwrap();
        assert_eq!(parsed.memory_type, "meeting_note");
    }

    #[test]
    fn test_parse_rejects_malformed() {
        for bad in ["task_AAA001", "TASK-AAA001", "TASK_AA001", "TASK_AAA01", "TASK_aaa001", ""] {
            assert!(parse(bad).is_err(), "{:?} should be rejected", bad);
        }
    }

    #[test]
    fn test_assign_advances_counter() {
        let alloc = HridAllocator::new();
        alloc.assign("TASK_AAA007", "id-7", "u1").unwrap();
        assert_eq!(alloc.next("task", "u1").unwrap(), "TASK_AAA008");
        assert_eq!(alloc.resolve("TASK_AAA007", "u1"), Some("id-7".to_string()));
        assert_eq!(alloc.hrid_of("id-7", "u1"), Some("TASK_AAA007".to_string()));
    }

    #[test]
    fn test_forget_removes_both_directions() {
        let alloc = HridAllocator::new();
        alloc.assign("TASK_AAA001", "id-1", "u1").unwrap();
        alloc.forget("TASK_AAA001", "u1");
        assert_eq!(alloc.resolve("TASK_AAA001", "u1"), None);
        assert_eq!(alloc.hrid_of("id-1", "u1"), None);
        // sequence is not rewound
        assert_eq!(alloc.next("task", "u1").unwrap(), "TASK_AAA002");
    }

    #[test]
    fn test_exhaustion() {
        let alloc = HridAllocator::new();
        alloc
            .assign(&format_hrid("task", SEQ_CAPACITY - 1), "id-max", "u1")
            .unwrap();
        let err = alloc.next("task", "u1").unwrap_err();
        assert_eq!(err.kind(), "resource_exhausted");
    }

    #[test]
    fn test_to_index_monotone_within_type() {
        let a = to_index("TASK_AAA001").unwrap();
        let b = to_index("TASK_AAA002").unwrap();
        let c = to_index("TASK_AAB000").unwrap();
        assert!(a < b && b < c);
    }

    #[test]
    fn test_to_index_groups_by_type() {
        // Different types occupy disjoint key ranges
        let note = to_index("NOTE_ZZZ999").unwrap();
        let task = to_index("TASK_AAA001").unwrap();
        assert_ne!(note / SEQ_CAPACITY, task / SEQ_CAPACITY);
    }

    #[test]
    fn test_to_index_deterministic() {
        assert_eq!(
            to_index("DOCUMENT_AAA001").unwrap(),
            to_index("DOCUMENT_AAA001").unwrap()
        );
    }
}
