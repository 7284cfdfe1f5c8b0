//! Process-wide coverage registry and the runtime functions behind the
//! injected calls.
//!
//! Instrumented text references exactly two script-global names, `LINE_FN`
//! and `BRANCH_FN`. Hosts bind those names to [`line_hit`] and
//! [`branch_probe`] once per environment; the functions are never emitted
//! into the rewritten text, so every file shares one definition. Per-file
//! records are created at instrumentation time, before the module first
//! runs, which is why a registered file with an empty `lines` map reads as
//! "loaded but never executed" rather than "unknown".

use std::collections::{BTreeMap, HashMap};
use std::sync::RwLock;

use once_cell::sync::Lazy;
use serde::ser::SerializeMap;
use serde::{Serialize, Serializer};
use serde_json::Value;

use crate::span::{BranchRecord, SourceLocation};

/// Script-global name the line counter calls resolve to.
pub const LINE_FN: &str = "__covLine";
/// Script-global name the branch probe calls resolve to.
pub const BRANCH_FN: &str = "__covBranch";

/// One rewritten conditional: the static arm locations plus the values
/// observed flowing through the probe, bucketed by which arm they chose.
#[derive(Debug, Clone, Serialize)]
pub struct BranchSite {
    /// Extent of the truthy arm in the original text.
    pub consequent: SourceLocation,
    /// Extent of the falsy arm in the original text.
    pub alternate: SourceLocation,
    /// Test values that selected the consequent.
    pub taken_consequent: Vec<Value>,
    /// Test values that selected the alternate.
    pub taken_alternate: Vec<Value>,
}

impl BranchSite {
    fn from_record(record: &BranchRecord) -> Self {
        Self {
            consequent: record.consequent,
            alternate: record.alternate,
            taken_consequent: Vec::new(),
            taken_alternate: Vec::new(),
        }
    }

    /// Whether both arms have been observed at least once.
    pub fn is_fully_covered(&self) -> bool {
        !self.taken_consequent.is_empty() && !self.taken_alternate.is_empty()
    }
}

/// Coverage data for a single registered file.
#[derive(Debug, Clone, Default, Serialize)]
pub struct FileCoverage {
    /// Execution counts keyed by 1-indexed line.
    pub lines: BTreeMap<u32, u64>,
    /// Branch sites keyed by the probe's (line, column).
    #[serde(serialize_with = "branches_as_string_keys")]
    pub branches: BTreeMap<(u32, u32), BranchSite>,
    /// The file as it was read, split into lines.
    pub source: Vec<String>,
}

impl FileCoverage {
    /// Total executions recorded for a line.
    pub fn line_count(&self, line: u32) -> u64 {
        self.lines.get(&line).copied().unwrap_or(0)
    }
}

/// JSON object keys must be strings; (line, column) becomes "line:column".
fn branches_as_string_keys<S>(
    branches: &BTreeMap<(u32, u32), BranchSite>,
    serializer: S,
) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    let mut map = serializer.serialize_map(Some(branches.len()))?;
    for ((line, column), site) in branches {
        map.serialize_entry(&format!("{}:{}", line, column), site)?;
    }
    map.end()
}

/// Script-style truthiness for values flowing through a branch probe.
pub trait Truthy {
    /// Whether the value selects the consequent arm.
    fn is_truthy(&self) -> bool;
    /// JSON snapshot stored in the outcome bucket.
    fn snapshot(&self) -> Value;
}

impl Truthy for bool {
    fn is_truthy(&self) -> bool {
        *self
    }
    fn snapshot(&self) -> Value {
        Value::Bool(*self)
    }
}

impl Truthy for i64 {
    fn is_truthy(&self) -> bool {
        *self != 0
    }
    fn snapshot(&self) -> Value {
        Value::from(*self)
    }
}

impl Truthy for f64 {
    fn is_truthy(&self) -> bool {
        *self != 0.0 && !self.is_nan()
    }
    fn snapshot(&self) -> Value {
        serde_json::Number::from_f64(*self)
            .map(Value::Number)
            .unwrap_or(Value::Null)
    }
}

impl Truthy for &str {
    fn is_truthy(&self) -> bool {
        !self.is_empty()
    }
    fn snapshot(&self) -> Value {
        Value::String((*self).to_string())
    }
}

impl Truthy for String {
    fn is_truthy(&self) -> bool {
        !self.is_empty()
    }
    fn snapshot(&self) -> Value {
        Value::String(self.clone())
    }
}

impl Truthy for Value {
    fn is_truthy(&self) -> bool {
        match self {
            Value::Null => false,
            Value::Bool(b) => *b,
            Value::Number(n) => n.as_f64().map_or(false, |f| f != 0.0 && !f.is_nan()),
            Value::String(s) => !s.is_empty(),
            Value::Array(_) | Value::Object(_) => true,
        }
    }
    fn snapshot(&self) -> Value {
        self.clone()
    }
}

static REGISTRY: Lazy<RwLock<HashMap<String, FileCoverage>>> =
    Lazy::new(|| RwLock::new(HashMap::new()));

/// Seed a registry entry for a file about to be loaded.
///
/// The first registration wins: instrumenting a path that is already
/// registered keeps the existing record and its accumulated counts.
/// Returns whether the entry was fresh.
pub fn register_file(file: &str, source: &str, branches: &[BranchRecord]) -> bool {
    let mut registry = REGISTRY.write().unwrap();
    if registry.contains_key(file) {
        return false;
    }

    let mut coverage = FileCoverage {
        source: source.lines().map(str::to_string).collect(),
        ..Default::default()
    };
    for record in branches {
        coverage
            .branches
            .insert((record.line, record.column), BranchSite::from_record(record));
    }
    registry.insert(file.to_string(), coverage);
    true
}

/// Record one execution of a line.
///
/// Unknown files are ignored rather than invented: registration happens at
/// instrumentation time, so a miss means the call did not come from code
/// this process instrumented.
pub fn line_hit(file: &str, line: u32) {
    let mut registry = REGISTRY.write().unwrap();
    if let Some(coverage) = registry.get_mut(file) {
        *coverage.lines.entry(line).or_insert(0) += 1;
    }
}

/// Record a branch outcome and hand the test value straight back, so the
/// rewritten conditional evaluates exactly as the original would have.
pub fn branch_probe<V: Truthy>(file: &str, line: u32, column: u32, value: V) -> V {
    let mut registry = REGISTRY.write().unwrap();
    if let Some(site) = registry
        .get_mut(file)
        .and_then(|coverage| coverage.branches.get_mut(&(line, column)))
    {
        if value.is_truthy() {
            site.taken_consequent.push(value.snapshot());
        } else {
            site.taken_alternate.push(value.snapshot());
        }
    }
    value
}

/// Whether a file has been registered.
pub fn is_registered(file: &str) -> bool {
    REGISTRY.read().unwrap().contains_key(file)
}

/// Coverage for one file, if registered.
pub fn file_record(file: &str) -> Option<FileCoverage> {
    REGISTRY.read().unwrap().get(file).cloned()
}

/// Stable snapshot of the whole registry, sorted by path.
pub fn snapshot() -> BTreeMap<String, FileCoverage> {
    let registry = REGISTRY.read().unwrap();
    registry
        .iter()
        .map(|(path, coverage)| (path.clone(), coverage.clone()))
        .collect()
}

/// Drop every registered file. Hosts that reuse a process for several
/// measurement runs call this between runs.
pub fn reset() {
    REGISTRY.write().unwrap().clear();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::span::Position;

    // The registry is process-global and unit tests share one process, so
    // every test works against its own unique path and none calls reset().

    fn record_at(line: u32, column: u32) -> BranchRecord {
        let arm = |l, c| SourceLocation {
            start: Position { line: l, column: c },
            end: Position { line: l, column: c + 3 },
        };
        BranchRecord {
            line,
            column,
            consequent: arm(line, column + 4),
            alternate: arm(line, column + 10),
        }
    }

    #[test]
    fn test_register_seeds_branches_and_source() {
        let file = "/virtual/registry/seed.js";
        assert!(register_file(file, "a\nb\n", &[record_at(1, 8)]));

        let coverage = file_record(file).expect("registered");
        assert_eq!(coverage.source, vec!["a", "b"]);
        assert!(coverage.lines.is_empty());

        let site = coverage.branches.get(&(1, 8)).expect("seeded site");
        assert!(site.taken_consequent.is_empty());
        assert!(site.taken_alternate.is_empty());
        assert!(!site.is_fully_covered());
    }

    #[test]
    fn test_first_registration_wins() {
        let file = "/virtual/registry/rereg.js";
        assert!(register_file(file, "x();\n", &[]));
        line_hit(file, 1);
        line_hit(file, 1);

        // A second load of the same path must not wipe the counts.
        assert!(!register_file(file, "x();\n", &[]));
        assert_eq!(file_record(file).unwrap().line_count(1), 2);
    }

    #[test]
    fn test_line_hits_accumulate() {
        let file = "/virtual/registry/lines.js";
        register_file(file, "a();\nb();\n", &[]);
        for _ in 0..3 {
            line_hit(file, 1);
        }
        line_hit(file, 2);

        let coverage = file_record(file).unwrap();
        assert_eq!(coverage.line_count(1), 3);
        assert_eq!(coverage.line_count(2), 1);
        assert_eq!(coverage.line_count(9), 0);
    }

    #[test]
    fn test_unknown_file_is_ignored() {
        line_hit("/virtual/registry/never-registered.js", 1);
        assert!(!is_registered("/virtual/registry/never-registered.js"));
    }

    #[test]
    fn test_probe_returns_value_and_buckets_by_truthiness() {
        let file = "/virtual/registry/probe.js";
        register_file(file, "var r = a ? b : c;\n", &[record_at(1, 8)]);

        assert_eq!(branch_probe(file, 1, 8, 7i64), 7);
        assert_eq!(branch_probe(file, 1, 8, 0i64), 0);
        assert_eq!(branch_probe(file, 1, 8, "ok"), "ok");

        let site = file_record(file)
            .unwrap()
            .branches
            .get(&(1, 8))
            .cloned()
            .unwrap();
        assert_eq!(site.taken_consequent, vec![Value::from(7), Value::from("ok")]);
        assert_eq!(site.taken_alternate, vec![Value::from(0)]);
        assert!(site.is_fully_covered());
    }

    #[test]
    fn test_probe_at_unknown_site_still_returns_value() {
        let file = "/virtual/registry/nosite.js";
        register_file(file, "x\n", &[]);
        assert!(branch_probe(file, 9, 9, true));
    }

    #[test]
    fn test_truthiness_follows_script_rules() {
        assert!(!false.is_truthy());
        assert!(!0i64.is_truthy());
        assert!(!0.0f64.is_truthy());
        assert!(!f64::NAN.is_truthy());
        assert!(!"".is_truthy());
        assert!(!Value::Null.is_truthy());

        assert!(true.is_truthy());
        assert!((-1i64).is_truthy());
        assert!(0.5f64.is_truthy());
        assert!("no".is_truthy());
        assert!(Value::Array(vec![]).is_truthy());
        assert!(Value::from(serde_json::Map::new()).is_truthy());
    }

    #[test]
    fn test_snapshot_is_sorted_and_detached() {
        let first = "/virtual/registry/snap-a.js";
        let second = "/virtual/registry/snap-b.js";
        register_file(first, "a\n", &[]);
        register_file(second, "b\n", &[]);

        let snap = snapshot();
        let keys: Vec<&String> = snap.keys().filter(|k| k.contains("/snap-")).collect();
        assert_eq!(keys, vec![first, second]);

        // Mutating the registry afterwards must not change the snapshot.
        line_hit(first, 1);
        assert_eq!(snap[first].line_count(1), 0);
    }

    #[test]
    fn test_branch_keys_serialize_as_strings() {
        let file = "/virtual/registry/serde.js";
        register_file(file, "var r = a ? b : c;\n", &[record_at(1, 8)]);

        let json = serde_json::to_value(file_record(file).unwrap()).unwrap();
        assert!(json["branches"]["1:8"]["consequent"]["start"]["line"].is_u64());
    }
}
