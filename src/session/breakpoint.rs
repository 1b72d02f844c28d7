use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// Location the remote debugger reports for a line that holds no code.
pub const UNVERIFIED_LOCATION: i64 = -1;

/// Breakpoint as sent to the remote debugger.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BreakpointRecord {
    pub id: i64,
    pub path: String,
    pub line: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub column: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub condition: Option<String>,
}

/// Breakpoint as requested by the editor.
#[derive(Debug, Clone, Deserialize)]
pub struct SourceBreakpoint {
    pub line: i64,
    #[serde(default)]
    pub column: Option<i64>,
    #[serde(default)]
    pub condition: Option<String>,
}

/// Current breakpoint records and their verification state, index aligned.
#[derive(Debug, Default)]
pub struct BreakpointSet {
    records: Vec<BreakpointRecord>,
    verified: Vec<bool>,
    next_id: i64,
}

impl BreakpointSet {
    /// Drop every record and install `requested` instead, all unverified.
    pub fn replace(&mut self, path: &str, requested: Vec<SourceBreakpoint>) {
        self.records = requested
            .into_iter()
            .map(|bp| {
                self.next_id += 1;
                BreakpointRecord {
                    id: self.next_id,
                    path: path.to_string(),
                    line: bp.line,
                    column: bp.column,
                    condition: bp.condition,
                }
            })
            .collect();
        self.verified = vec![false; self.records.len()];
    }

    pub fn records(&self) -> &[BreakpointRecord] {
        &self.records
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Records serialized as call params.
    pub fn params(&self) -> Vec<Value> {
        self.records
            .iter()
            .filter_map(|r| serde_json::to_value(r).ok())
            .collect()
    }

    /// Apply remote locations by position. A missing entry or
    /// [`UNVERIFIED_LOCATION`] leaves the record unverified.
    pub fn apply_locations(&mut self, locations: &[i64]) {
        if locations.len() != self.records.len() {
            log::warn!(
                target: "session",
                "{} locations for {} breakpoints",
                locations.len(),
                self.records.len()
            );
        }
        for (idx, verified) in self.verified.iter_mut().enumerate() {
            *verified = matches!(locations.get(idx), Some(&loc) if loc != UNVERIFIED_LOCATION);
        }
    }

    pub fn mark_unverified(&mut self) {
        self.verified.iter_mut().for_each(|v| *v = false);
    }

    pub fn verified(&self) -> &[bool] {
        &self.verified
    }

    /// True if a verified breakpoint sits on `line` of `path`.
    pub fn hits(&self, path: &str, line: i64) -> bool {
        self.records
            .iter()
            .zip(&self.verified)
            .any(|(r, &v)| v && r.line == line && same_file(&r.path, path))
    }

    pub fn has_verified(&self) -> bool {
        self.verified.iter().any(|v| *v)
    }

    /// Editor view of every record, in request order.
    pub fn to_dap(&self) -> Vec<Value> {
        self.records
            .iter()
            .zip(&self.verified)
            .map(|(r, &verified)| {
                let mut bp = json!({
                    "id": r.id,
                    "verified": verified,
                    "line": r.line,
                    "source": {"path": r.path},
                });
                if let Some(column) = r.column {
                    bp["column"] = json!(column);
                }
                bp
            })
            .collect()
    }
}

/// Remote paths may be relative to the program directory.
fn same_file(a: &str, b: &str) -> bool {
    a == b || a.ends_with(&format!("/{b}")) || b.ends_with(&format!("/{a}"))
}
