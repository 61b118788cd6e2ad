//! Diff engine.
//!
//! Compares configuration text after normalization: trailing whitespace is
//! stripped, blank lines are dropped and so are lines matching a volatile
//! pattern (timestamps, counters, uptime). The result is an ordered list of
//! added, removed and changed lines with references into both inputs.
//!
//! `diff(b, a)` is always `diff(a, b)` with sides swapped: LCS ties are
//! broken by line content rather than by argument position.
//!
//! The LCS table is bounded by [`MAX_LCS_CELLS`]. Past that the differing
//! middle is compared as two multisets: lines present on one side only are
//! reported, and lines that merely moved are not.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;
use tracing::warn;

/// Largest LCS table built, in cells (4 bytes each).
pub const MAX_LCS_CELLS: usize = 4 * 1024 * 1024;

/// A configured regex failed to compile.
#[derive(Debug, Error)]
#[error("invalid pattern '{pattern}': {source}")]
pub struct PatternError {
    pub pattern: String,
    #[source]
    pub source: regex::Error,
}

/// Compile a list of patterns, reporting the first bad one.
pub fn compile_patterns<S: AsRef<str>>(patterns: &[S]) -> Result<Vec<Regex>, PatternError> {
    patterns
        .iter()
        .map(|p| {
            Regex::new(p.as_ref()).map_err(|source| PatternError {
                pattern: p.as_ref().to_string(),
                source,
            })
        })
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiffOp {
    Added,
    Removed,
    Changed,
}

/// One difference. Line numbers are 1-based positions in the original text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiffEntry {
    pub op: DiffOp,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub left_line: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub right_line: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub left: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub right: Option<String>,
}

impl DiffEntry {
    fn removed(line: &Line) -> Self {
        Self {
            op: DiffOp::Removed,
            left_line: Some(line.number),
            right_line: None,
            left: Some(line.text.clone()),
            right: None,
        }
    }

    fn added(line: &Line) -> Self {
        Self {
            op: DiffOp::Added,
            left_line: None,
            right_line: Some(line.number),
            left: None,
            right: Some(line.text.clone()),
        }
    }

    fn changed(left: &Line, right: &Line) -> Self {
        Self {
            op: DiffOp::Changed,
            left_line: Some(left.number),
            right_line: Some(right.number),
            left: Some(left.text.clone()),
            right: Some(right.text.clone()),
        }
    }

    /// The same difference seen from the other side.
    pub fn swapped(&self) -> Self {
        Self {
            op: match self.op {
                DiffOp::Added => DiffOp::Removed,
                DiffOp::Removed => DiffOp::Added,
                DiffOp::Changed => DiffOp::Changed,
            },
            left_line: self.right_line,
            right_line: self.left_line,
            left: self.right.clone(),
            right: self.left.clone(),
        }
    }

    /// Text on both sides, for scoring.
    pub fn texts(&self) -> impl Iterator<Item = &str> {
        self.left.iter().chain(self.right.iter()).map(String::as_str)
    }
}

impl std::fmt::Display for DiffEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.op {
            DiffOp::Added => write!(
                f,
                "+ [{}] {}",
                self.right_line.unwrap_or_default(),
                self.right.as_deref().unwrap_or_default()
            ),
            DiffOp::Removed => write!(
                f,
                "- [{}] {}",
                self.left_line.unwrap_or_default(),
                self.left.as_deref().unwrap_or_default()
            ),
            DiffOp::Changed => write!(
                f,
                "~ [{}->{}] {} => {}",
                self.left_line.unwrap_or_default(),
                self.right_line.unwrap_or_default(),
                self.left.as_deref().unwrap_or_default(),
                self.right.as_deref().unwrap_or_default()
            ),
        }
    }
}

/// A normalized line and where it came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Line {
    pub number: usize,
    pub text: String,
}

/// Normalizing line differ.
#[derive(Debug, Clone)]
pub struct Differ {
    volatile: Vec<Regex>,
}

impl Differ {
    pub fn new<S: AsRef<str>>(volatile_patterns: &[S]) -> Result<Self, PatternError> {
        Ok(Self {
            volatile: compile_patterns(volatile_patterns)?,
        })
    }

    pub fn normalize(&self, text: &str) -> Vec<Line> {
        text.lines()
            .enumerate()
            .filter_map(|(idx, raw)| {
                let line = raw.trim_end();
                if line.trim().is_empty() || self.volatile.iter().any(|re| re.is_match(line)) {
                    None
                } else {
                    Some(Line {
                        number: idx + 1,
                        text: line.to_string(),
                    })
                }
            })
            .collect()
    }

    /// Whether two texts are equal after normalization.
    pub fn equivalent(&self, left: &str, right: &str) -> bool {
        let l = self.normalize(left);
        let r = self.normalize(right);
        l.len() == r.len() && l.iter().zip(r.iter()).all(|(a, b)| a.text == b.text)
    }

    pub fn diff(&self, left: &str, right: &str) -> Vec<DiffEntry> {
        diff_lines(&self.normalize(left), &self.normalize(right))
    }
}

/// Diff two normalized line lists.
pub fn diff_lines(left: &[Line], right: &[Line]) -> Vec<DiffEntry> {
    let prefix = left
        .iter()
        .zip(right.iter())
        .take_while(|(a, b)| a.text == b.text)
        .count();
    let suffix = left[prefix..]
        .iter()
        .rev()
        .zip(right[prefix..].iter().rev())
        .take_while(|(a, b)| a.text == b.text)
        .count();

    let a = &left[prefix..left.len() - suffix];
    let b = &right[prefix..right.len() - suffix];
    if a.is_empty() && b.is_empty() {
        return Vec::new();
    }

    let cells = (a.len() + 1).saturating_mul(b.len() + 1);
    if cells > MAX_LCS_CELLS {
        warn!(
            left_lines = a.len(),
            right_lines = b.len(),
            "Diff too large for line alignment; comparing line sets"
        );
        return coarse_diff(a, b);
    }

    // lcs[i][j] = LCS length of a[i..] and b[j..]
    let width = b.len() + 1;
    let mut lcs = vec![0u32; (a.len() + 1) * width];
    for i in (0..a.len()).rev() {
        for j in (0..b.len()).rev() {
            lcs[i * width + j] = if a[i].text == b[j].text {
                lcs[(i + 1) * width + j + 1] + 1
            } else {
                lcs[(i + 1) * width + j].max(lcs[i * width + j + 1])
            };
        }
    }

    let mut entries = Vec::new();
    let mut removed: Vec<&Line> = Vec::new();
    let mut added: Vec<&Line> = Vec::new();
    let (mut i, mut j) = (0, 0);
    while i < a.len() || j < b.len() {
        if i < a.len() && j < b.len() && a[i].text == b[j].text {
            flush_gap(&mut entries, &mut removed, &mut added);
            i += 1;
            j += 1;
            continue;
        }
        let skip_left = if i == a.len() {
            false
        } else if j == b.len() {
            true
        } else {
            let down = lcs[(i + 1) * width + j];
            let right = lcs[i * width + j + 1];
            // Ties go to the lexicographically smaller line so the result
            // does not depend on argument order.
            down > right || (down == right && a[i].text < b[j].text)
        };
        if skip_left {
            removed.push(&a[i]);
            i += 1;
        } else {
            added.push(&b[j]);
            j += 1;
        }
    }
    flush_gap(&mut entries, &mut removed, &mut added);
    entries
}

/// Lines found on only one side, counting duplicates, as a single gap.
fn coarse_diff(a: &[Line], b: &[Line]) -> Vec<DiffEntry> {
    let mut right_counts: HashMap<&str, usize> = HashMap::new();
    for line in b {
        *right_counts.entry(line.text.as_str()).or_default() += 1;
    }
    let mut left_counts: HashMap<&str, usize> = HashMap::new();
    for line in a {
        *left_counts.entry(line.text.as_str()).or_default() += 1;
    }

    let mut removed: Vec<&Line> = Vec::new();
    for line in a {
        match right_counts.get_mut(line.text.as_str()) {
            Some(n) if *n > 0 => *n -= 1,
            _ => removed.push(line),
        }
    }
    let mut added: Vec<&Line> = Vec::new();
    for line in b {
        match left_counts.get_mut(line.text.as_str()) {
            Some(n) if *n > 0 => *n -= 1,
            _ => added.push(line),
        }
    }

    let mut entries = Vec::with_capacity(removed.len().max(added.len()));
    flush_gap(&mut entries, &mut removed, &mut added);
    entries
}

/// Emit one gap between matched lines: paired lines become changes, the
/// remainder plain removals or additions.
fn flush_gap<'a>(entries: &mut Vec<DiffEntry>, removed: &mut Vec<&'a Line>, added: &mut Vec<&'a Line>) {
    let paired = removed.len().min(added.len());
    for k in 0..paired {
        entries.push(DiffEntry::changed(removed[k], added[k]));
    }
    entries.extend(removed[paired..].iter().map(|l| DiffEntry::removed(l)));
    entries.extend(added[paired..].iter().map(|l| DiffEntry::added(l)));
    removed.clear();
    added.clear();
}

#[cfg(test)]
mod tests {
    use super::*;
    use netcommit_protocol::defaults::DEFAULT_VOLATILE_PATTERNS;

    fn differ() -> Differ {
        Differ::new(DEFAULT_VOLATILE_PATTERNS).unwrap()
    }

    #[test]
    fn test_identical_after_normalization() {
        let a = "hostname sw1\n\ninterface eth0   \n  ip address 10.1.1.1/24\n";
        let b = "! Last configuration change at 10:02:11\nhostname sw1\ninterface eth0\n  ip address 10.1.1.1/24\n";
        assert!(differ().diff(a, b).is_empty());
        assert!(differ().equivalent(a, b));
    }

    #[test]
    fn test_volatile_patterns_match_whole_line_shapes() {
        let d = differ();
        let kept = d.normalize(
            "interface eth0\n  description uptime-monitor\n  description counters uplink\n",
        );
        assert_eq!(kept.len(), 3);

        let dropped = d.normalize(
            "sw1 uptime is 3 weeks, 2 days\n\
             \"uptime_seconds\": 1234,\n\
             Last clearing of \"show interface\" counters never\n\
             \x20 5120 packets input\n\
             \"in_octets\": 99,\n",
        );
        assert!(dropped.is_empty(), "{dropped:?}");

        // A real description change is reported
        let diff = d.diff(
            "  description uptime-monitor\n",
            "  description uptime-monitor-v2\n",
        );
        assert_eq!(diff.len(), 1);
    }

    #[test]
    fn test_changed_line_pairs_remove_and_add() {
        let a = "hostname sw1\nntp server 10.0.0.1\nlogging host 10.0.0.9\n";
        let b = "hostname sw1\nntp server 10.0.0.2\nlogging host 10.0.0.9\n";
        let diff = differ().diff(a, b);
        assert_eq!(diff.len(), 1);
        assert_eq!(diff[0].op, DiffOp::Changed);
        assert_eq!(diff[0].left_line, Some(2));
        assert_eq!(diff[0].right.as_deref(), Some("ntp server 10.0.0.2"));
    }

    #[test]
    fn test_added_and_removed_lines() {
        let a = "a\nb\nc\n";
        let b = "a\nc\nd\n";
        let diff = differ().diff(a, b);
        let ops: Vec<DiffOp> = diff.iter().map(|e| e.op).collect();
        assert_eq!(ops, vec![DiffOp::Removed, DiffOp::Added]);
        assert_eq!(diff[0].left.as_deref(), Some("b"));
        assert_eq!(diff[1].right.as_deref(), Some("d"));
        assert_eq!(diff[1].right_line, Some(3));
    }

    #[test]
    fn test_diff_is_symmetric() {
        let cases = [
            ("x\ny\n", "y\nx\n"),
            ("a\nb\nc\nd\n", "d\nc\nb\na\n"),
            ("hostname a\nntp server 1\n", "hostname b\nntp server 1\nntp server 2\n"),
            ("", "only\nright\n"),
            ("p\nq\nr\ns\n", "q\nx\ns\np\n"),
        ];
        let d = differ();
        for (a, b) in cases {
            let forward = d.diff(a, b);
            let backward: Vec<DiffEntry> = d.diff(b, a).iter().map(DiffEntry::swapped).collect();
            assert_eq!(forward, backward, "diff({a:?}, {b:?})");
        }
    }

    fn numbered(lines: impl Iterator<Item = String>) -> Vec<Line> {
        lines
            .enumerate()
            .map(|(idx, text)| Line {
                number: idx + 1,
                text,
            })
            .collect()
    }

    #[test]
    fn test_large_disjoint_inputs_use_bounded_diff() {
        let a = numbered((0..20_000).map(|i| format!("ip route 10.{}.0.0/16 192.0.2.1", i)));
        let b = numbered((0..20_000).map(|i| format!("ip route 172.{}.0.0/16 192.0.2.1", i)));
        assert!((a.len() + 1) * (b.len() + 1) > MAX_LCS_CELLS);

        let diff = diff_lines(&a, &b);
        assert_eq!(diff.len(), 20_000);
        assert!(diff.iter().all(|e| e.op == DiffOp::Changed));
        assert_eq!(diff[0].left.as_deref(), Some("ip route 10.0.0.0/16 192.0.2.1"));
        assert_eq!(diff[0].right.as_deref(), Some("ip route 172.0.0.0/16 192.0.2.1"));

        let backward: Vec<DiffEntry> = diff_lines(&b, &a).iter().map(DiffEntry::swapped).collect();
        assert_eq!(diff, backward);
    }

    #[test]
    fn test_large_inputs_report_only_one_sided_lines() {
        let mut left: Vec<String> = (0..5_000).map(|i| format!("vlan {}", i)).collect();
        let mut right: Vec<String> = left.iter().rev().cloned().collect();
        left.push("ntp server 10.0.0.1".to_string());
        right.push("ntp server 10.0.0.2".to_string());
        right.push("logging host 10.0.0.9".to_string());
        let (a, b) = (numbered(left.into_iter()), numbered(right.into_iter()));

        let diff = diff_lines(&a, &b);
        assert_eq!(diff.len(), 2);
        assert_eq!(diff[0].op, DiffOp::Changed);
        assert_eq!(diff[0].left.as_deref(), Some("ntp server 10.0.0.1"));
        assert_eq!(diff[0].right.as_deref(), Some("ntp server 10.0.0.2"));
        assert_eq!(diff[1].op, DiffOp::Added);
        assert_eq!(diff[1].right_line, Some(5_002));
    }

    #[test]
    fn test_invalid_volatile_pattern() {
        let err = Differ::new(&["(unclosed"]).unwrap_err();
        assert_eq!(err.pattern, "(unclosed");
    }
}
