//! Unified diff between the origin function and a failed candidate patch.
//!
//! The output feeds the feedback prompts, so only the classic unified-diff
//! shape matters, not byte-perfect parity with any particular diff tool.
//! Inputs are single functions; the quadratic LCS table is fine at that
//! size.

/// Unified diff (3 lines of context) of `from_text` -> `to_text`, with the
/// conventional `---`/`+++` file headers. Returns an empty string when the
/// inputs are identical.
pub fn unified_diff(from_text: &str, to_text: &str, from_file: &str, to_file: &str) -> String {
    let from_lines: Vec<&str> = from_text.trim().lines().collect();
    let to_lines: Vec<&str> = to_text.trim().lines().collect();

    let ops = diff_ops(&from_lines, &to_lines);
    if ops.iter().all(|op| matches!(op, Op::Equal(_))) {
        return String::new();
    }

    let hunks = build_hunks(&ops, 3);

    let mut out = Vec::new();
    out.push(format!("--- {}", from_file));
    out.push(format!("+++ {}", to_file));
    for hunk in hunks {
        out.push(format!(
            "@@ -{},{} +{},{} @@",
            hunk.from_start + 1,
            hunk.from_len,
            hunk.to_start + 1,
            hunk.to_len
        ));
        out.extend(hunk.lines);
    }
    out.join("\n")
}

#[derive(Debug, Clone)]
enum Op {
    Equal(String),
    Delete(String),
    Insert(String),
}

/// Line-level edit script from an LCS table.
fn diff_ops(from_lines: &[&str], to_lines: &[&str]) -> Vec<Op> {
    let n = from_lines.len();
    let m = to_lines.len();

    let mut lcs = vec![vec![0usize; m + 1]; n + 1];
    for i in (0..n).rev() {
        for j in (0..m).rev() {
            lcs[i][j] = if from_lines[i] == to_lines[j] {
                lcs[i + 1][j + 1] + 1
            } else {
                lcs[i + 1][j].max(lcs[i][j + 1])
            };
        }
    }

    let mut ops = Vec::new();
    let (mut i, mut j) = (0usize, 0usize);
    while i < n && j < m {
        if from_lines[i] == to_lines[j] {
            ops.push(Op::Equal(from_lines[i].to_string()));
            i += 1;
            j += 1;
        } else if lcs[i + 1][j] >= lcs[i][j + 1] {
            ops.push(Op::Delete(from_lines[i].to_string()));
            i += 1;
        } else {
            ops.push(Op::Insert(to_lines[j].to_string()));
            j += 1;
        }
    }
    while i < n {
        ops.push(Op::Delete(from_lines[i].to_string()));
        i += 1;
    }
    while j < m {
        ops.push(Op::Insert(to_lines[j].to_string()));
        j += 1;
    }
    ops
}

struct Hunk {
    from_start: usize,
    from_len: usize,
    to_start: usize,
    to_len: usize,
    lines: Vec<String>,
}

fn build_hunks(ops: &[Op], context: usize) -> Vec<Hunk> {
    // indexes of non-equal ops
    let changed: Vec<usize> = ops
        .iter()
        .enumerate()
        .filter(|(_, op)| !matches!(op, Op::Equal(_)))
        .map(|(i, _)| i)
        .collect();

    if changed.is_empty() {
        return Vec::new();
    }

    // group changes whose context windows touch
    let mut groups: Vec<(usize, usize)> = Vec::new();
    let mut start = changed[0];
    let mut end = changed[0];
    for &c in &changed[1..] {
        if c <= end + 2 * context {
            end = c;
        } else {
            groups.push((start, end));
            start = c;
            end = c;
        }
    }
    groups.push((start, end));

    let mut hunks = Vec::new();
    // running source/target positions per op index
    let mut from_pos = vec![0usize; ops.len() + 1];
    let mut to_pos = vec![0usize; ops.len() + 1];
    for (i, op) in ops.iter().enumerate() {
        let (df, dt) = match op {
            Op::Equal(_) => (1, 1),
            Op::Delete(_) => (1, 0),
            Op::Insert(_) => (0, 1),
        };
        from_pos[i + 1] = from_pos[i] + df;
        to_pos[i + 1] = to_pos[i] + dt;
    }

    for (group_start, group_end) in groups {
        let lo = group_start.saturating_sub(context);
        let hi = (group_end + context + 1).min(ops.len());

        let mut lines = Vec::new();
        for op in &ops[lo..hi] {
            match op {
                Op::Equal(l) => lines.push(format!(" {}", l)),
                Op::Delete(l) => lines.push(format!("-{}", l)),
                Op::Insert(l) => lines.push(format!("+{}", l)),
            }
        }

        hunks.push(Hunk {
            from_start: from_pos[lo],
            from_len: from_pos[hi] - from_pos[lo],
            to_start: to_pos[lo],
            to_len: to_pos[hi] - to_pos[lo],
            lines,
        });
    }

    hunks
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identical_inputs_empty_diff() {
        let text = "def f(a):\n    return a\n";
        assert_eq!(unified_diff(text, text, "a.py", "b.py"), "");
    }

    #[test]
    fn test_single_line_change() {
        let from = "def div(a, b):\n    return a / b";
        let to = "def div(a, b):\n    if b == 0:\n        return 0\n    return a / b";
        let diff = unified_diff(from, to, "buggy_func.py", "patch_func.py");

        assert!(diff.starts_with("--- buggy_func.py\n+++ patch_func.py"));
        assert!(diff.contains("+    if b == 0:"));
        assert!(diff.contains("+        return 0"));
        assert!(diff.contains(" def div(a, b):"));
    }

    #[test]
    fn test_deletion_marked() {
        let from = "a\nb\nc";
        let to = "a\nc";
        let diff = unified_diff(from, to, "x", "y");
        assert!(diff.contains("-b"));
        assert!(!diff.contains("+b"));
    }

    #[test]
    fn test_replacement_has_both_markers() {
        let from = "keep\nold line\nkeep2";
        let to = "keep\nnew line\nkeep2";
        let diff = unified_diff(from, to, "x", "y");
        assert!(diff.contains("-old line"));
        assert!(diff.contains("+new line"));
        assert!(diff.contains(" keep"));
        assert!(diff.contains(" keep2"));
    }

    #[test]
    fn test_distant_changes_make_separate_hunks() {
        let mut from_lines: Vec<String> = (0..30).map(|i| format!("line{}", i)).collect();
        let mut to_lines = from_lines.clone();
        to_lines[1] = "changed1".to_string();
        to_lines[28] = "changed28".to_string();
        from_lines[1] = "line1".to_string();

        let diff = unified_diff(&from_lines.join("\n"), &to_lines.join("\n"), "x", "y");
        assert_eq!(diff.matches("@@").count(), 4); // two hunks, two markers each
    }

    #[test]
    fn test_hunk_header_positions() {
        let from = "a\nb\nc";
        let to = "a\nB\nc";
        let diff = unified_diff(from, to, "x", "y");
        assert!(diff.contains("@@ -1,3 +1,3 @@"));
    }
}
