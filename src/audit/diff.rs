//! Diff generation for restore logging
//!
//! Generates human-readable line diffs between the live version of a
//! deployment file and the version about to be restored over it, so the
//! operator log shows exactly what a restore changed.

/// Files larger than this (in lines) are summarised instead of diffed
const MAX_DIFF_LINES: usize = 2000;

/// Long lines are truncated in diff output
const MAX_LINE_WIDTH: usize = 120;

/// Result of comparing two versions of a text file
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TextDiff {
    /// Number of lines only present in the new version
    pub added: usize,
    /// Number of lines only present in the old version
    pub removed: usize,
    /// `-`/`+` prefixed lines describing the change
    pub lines: Vec<String>,
}

impl TextDiff {
    /// Check if the two versions were identical
    pub fn is_unchanged(&self) -> bool {
        self.added == 0 && self.removed == 0
    }

    /// One-line summary of the change
    pub fn summary(&self) -> String {
        if self.is_unchanged() {
            "unchanged".to_string()
        } else {
            format!("+{} -{}", self.added, self.removed)
        }
    }
}

/// Generate a line diff between two texts
///
/// Uses a longest-common-subsequence walk, which is plenty for the small
/// configuration files restores overwrite. Inputs above the size cap are
/// reported as a whole-file replacement.
pub fn diff_text(old: &str, new: &str) -> TextDiff {
    let old_lines: Vec<&str> = old.lines().collect();
    let new_lines: Vec<&str> = new.lines().collect();

    if old_lines == new_lines {
        return TextDiff::default();
    }

    if old_lines.len() > MAX_DIFF_LINES || new_lines.len() > MAX_DIFF_LINES {
        return TextDiff {
            added: new_lines.len(),
            removed: old_lines.len(),
            lines: vec![format!(
                "(file too large to diff: {} -> {} lines)",
                old_lines.len(),
                new_lines.len()
            )],
        };
    }

    let n = old_lines.len();
    let m = new_lines.len();
    // lcs[i][j] = LCS length of old[i..] and new[j..]
    let mut lcs = vec![vec![0usize; m + 1]; n + 1];
    for i in (0..n).rev() {
        for j in (0..m).rev() {
            lcs[i][j] = if old_lines[i] == new_lines[j] {
                lcs[i + 1][j + 1] + 1
            } else {
                lcs[i + 1][j].max(lcs[i][j + 1])
            };
        }
    }

    let mut diff = TextDiff::default();
    let (mut i, mut j) = (0, 0);
    while i < n || j < m {
        if i < n && j < m && old_lines[i] == new_lines[j] {
            i += 1;
            j += 1;
        } else if j < m && (i == n || lcs[i][j + 1] >= lcs[i + 1][j]) {
            diff.added += 1;
            diff.lines.push(format!("+ {}", truncate(new_lines[j])));
            j += 1;
        } else {
            diff.removed += 1;
            diff.lines.push(format!("- {}", truncate(old_lines[i])));
            i += 1;
        }
    }
    diff
}

fn truncate(line: &str) -> String {
    if line.chars().count() > MAX_LINE_WIDTH {
        let cut: String = line.chars().take(MAX_LINE_WIDTH - 3).collect();
        format!("{}...", cut)
    } else {
        line.to_string()
    }
}
