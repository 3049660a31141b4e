// Copyright 2025 The Filetrace Authors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
// https://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Line-level diff between two file contents, rendered as a patch whose
//! hunks carry per-line old/new line numbers (1-based, 0 meaning "no line
//! on that side").
//!
//! Unchanged lines are found by anchoring on lines that occur equally
//! rarely on both sides (histogram style), recursing into the gaps, and
//! falling back to leading/trailing runs where no anchor exists.

#![allow(missing_docs)]

use std::collections::BTreeMap;
use std::collections::HashMap;
use std::iter;
use std::ops::Range;

use bstr::BStr;
use bstr::BString;
use itertools::Itertools as _;

/// Number of unchanged lines carried on each side of a changed region.
const CONTEXT_LINES: usize = 3;

/// Give up on histogram anchoring when every line occurs more often than
/// this on the left side.
const MAX_OCCURRENCES: usize = 100;

pub fn find_line_ranges(text: &[u8]) -> Vec<Range<usize>> {
    text.split_inclusive(|b| *b == b'\n')
        .scan(0, |total, line| {
            let start = *total;
            *total += line.len();
            Some(start..*total)
        })
        .collect()
}

/// Number of lines in a blob, counting a final unterminated line.
pub fn count_lines(data: &[u8]) -> usize {
    if data.is_empty() {
        return 0;
    }
    let newlines = data.iter().filter(|b| **b == b'\n').count();
    if data.ends_with(b"\n") {
        newlines
    } else {
        newlines + 1
    }
}

#[derive(Clone, Debug)]
struct DiffSource<'input, 'aux> {
    text: &'input BStr,
    ranges: &'aux [Range<usize>],
    /// Number of preceding line ranges excluded from `ranges`.
    global_offset: usize,
}

impl<'input, 'aux> DiffSource<'input, 'aux> {
    fn new(text: &'input [u8], ranges: &'aux [Range<usize>]) -> Self {
        DiffSource {
            text: BStr::new(text),
            ranges,
            global_offset: 0,
        }
    }

    fn narrowed(&self, positions: Range<usize>) -> Self {
        DiffSource {
            text: self.text,
            ranges: &self.ranges[positions.start..positions.end],
            global_offset: self.global_offset + positions.start,
        }
    }
}

struct Histogram<'input> {
    line_to_positions: HashMap<&'input BStr, Vec<usize>>,
}

impl<'input> Histogram<'input> {
    fn calculate(source: &DiffSource<'input, '_>) -> Self {
        let mut line_to_positions: HashMap<&BStr, Vec<usize>> = HashMap::new();
        for (i, range) in source.ranges.iter().enumerate() {
            let positions = line_to_positions.entry(&source.text[range.clone()]).or_default();
            // Allow one more than MAX_OCCURRENCES so the cap is detectable.
            if positions.len() <= MAX_OCCURRENCES {
                positions.push(i);
            }
        }
        Histogram { line_to_positions }
    }

    fn count_to_entries(&self) -> BTreeMap<usize, Vec<(&'input BStr, &Vec<usize>)>> {
        let mut count_to_entries: BTreeMap<usize, Vec<_>> = BTreeMap::new();
        for (line, positions) in &self.line_to_positions {
            count_to_entries
                .entry(positions.len())
                .or_default()
                .push((*line, positions));
        }
        count_to_entries
    }
}

/// Longest chain of `(left, right)` pairs strictly increasing on both
/// sides, where `input[right]` is the left position paired with `right`.
/// Patience-sorting LIS, O(n log n).
fn longest_common_chain(input: &[usize]) -> Vec<(usize, usize)> {
    let mut tails: Vec<usize> = vec![];
    let mut prev: Vec<Option<usize>> = vec![None; input.len()];
    for (right_pos, &left_pos) in input.iter().enumerate() {
        let k = tails.partition_point(|&t| input[t] < left_pos);
        if k > 0 {
            prev[right_pos] = Some(tails[k - 1]);
        }
        if k == tails.len() {
            tails.push(right_pos);
        } else {
            tails[k] = right_pos;
        }
    }

    let mut result = vec![];
    let mut cursor = tails.last().copied();
    while let Some(right_pos) = cursor {
        result.push((input[right_pos], right_pos));
        cursor = prev[right_pos];
    }
    result.reverse();
    result
}

/// Finds unchanged line positions among the two sources, appending global
/// `(left, right)` index pairs in ascending order.
fn collect_unchanged_lines(
    found_positions: &mut Vec<(usize, usize)>,
    left: &DiffSource,
    right: &DiffSource,
) {
    if left.ranges.is_empty() || right.ranges.is_empty() {
        return;
    }

    // Prefer anchor-based matching over leading/trailing runs.
    let old_len = found_positions.len();
    collect_unchanged_lines_lcs(found_positions, left, right);
    if found_positions.len() != old_len {
        return;
    }

    let common_leading_len = iter::zip(left.ranges, right.ranges)
        .take_while(|&(l, r)| left.text[l.clone()] == right.text[r.clone()])
        .count();
    let left_ranges = &left.ranges[common_leading_len..];
    let right_ranges = &right.ranges[common_leading_len..];

    let common_trailing_len = iter::zip(left_ranges.iter().rev(), right_ranges.iter().rev())
        .take_while(|&(l, r)| left.text[l.clone()] == right.text[r.clone()])
        .count();

    found_positions.extend(
        (0..common_leading_len).map(|i| (left.global_offset + i, right.global_offset + i)),
    );
    found_positions.extend((1..=common_trailing_len).rev().map(|i| {
        (
            left.global_offset + left.ranges.len() - i,
            right.global_offset + right.ranges.len() - i,
        )
    }));
}

fn collect_unchanged_lines_lcs(
    found_positions: &mut Vec<(usize, usize)>,
    left: &DiffSource,
    right: &DiffSource,
) {
    let left_histogram = Histogram::calculate(left);
    let left_count_to_entries = left_histogram.count_to_entries();
    if *left_count_to_entries.keys().next().unwrap() > MAX_OCCURRENCES {
        // Every line repeats a lot; not worth anchoring on any of them.
        return;
    }
    let right_histogram = Histogram::calculate(right);

    // Look for the rarest lines on the left that occur equally often on
    // the right; their occurrences pair up positionally.
    let Some(shared_positions) = left_count_to_entries.values().find_map(|left_entries| {
        let both: Vec<(&Vec<usize>, &Vec<usize>)> = left_entries
            .iter()
            .filter_map(|&(line, left_positions)| {
                let right_positions = right_histogram.line_to_positions.get(line)?;
                (left_positions.len() == right_positions.len())
                    .then_some((left_positions, right_positions))
            })
            .collect();
        (!both.is_empty()).then_some(both)
    }) else {
        return;
    };

    // [(position, serial identifying {line, occurrence #})]
    let (mut left_positions, mut right_positions): (Vec<_>, Vec<_>) = shared_positions
        .iter()
        .flat_map(|&(lefts, rights)| iter::zip(lefts, rights))
        .enumerate()
        .map(|(serial, (&left_pos, &right_pos))| ((left_pos, serial), (right_pos, serial)))
        .unzip();
    left_positions.sort_unstable_by_key(|&(pos, _serial)| pos);
    right_positions.sort_unstable_by_key(|&(pos, _serial)| pos);
    let left_index_by_right_index: Vec<usize> = {
        let mut left_index_map = vec![0; left_positions.len()];
        for (i, &(_pos, serial)) in left_positions.iter().enumerate() {
            left_index_map[serial] = i;
        }
        right_positions
            .iter()
            .map(|&(_pos, serial)| left_index_map[serial])
            .collect()
    };

    let chain = longest_common_chain(&left_index_by_right_index);

    // Emit the anchors, recursing into the gaps between them.
    let mut previous_left_position = 0;
    let mut previous_right_position = 0;
    for (left_index, right_index) in chain {
        let (left_position, _) = left_positions[left_index];
        let (right_position, _) = right_positions[right_index];
        collect_unchanged_lines(
            found_positions,
            &left.narrowed(previous_left_position..left_position),
            &right.narrowed(previous_right_position..right_position),
        );
        found_positions.push((
            left.global_offset + left_position,
            right.global_offset + right_position,
        ));
        previous_left_position = left_position + 1;
        previous_right_position = right_position + 1;
    }
    // Also recurse into the range after the last anchor.
    collect_unchanged_lines(
        found_positions,
        &left.narrowed(previous_left_position..left.ranges.len()),
        &right.narrowed(previous_right_position..right.ranges.len()),
    );
}

/// Patch line kinds. The `*EofNl` origins mirror the end-of-newline
/// markers a git-style patch may carry; the engine skips them.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum DiffOrigin {
    Context,
    Addition,
    Deletion,
    ContextEofNl,
    AddEofNl,
    DelEofNl,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct DiffLine {
    pub origin: DiffOrigin,
    /// 1-based line number on the old side, 0 for additions.
    pub old_lineno: u32,
    /// 1-based line number on the new side, 0 for deletions.
    pub new_lineno: u32,
    pub content: BString,
}

impl DiffLine {
    pub fn context(old_lineno: u32, new_lineno: u32, content: impl Into<BString>) -> Self {
        DiffLine {
            origin: DiffOrigin::Context,
            old_lineno,
            new_lineno,
            content: content.into(),
        }
    }

    pub fn addition(new_lineno: u32, content: impl Into<BString>) -> Self {
        DiffLine {
            origin: DiffOrigin::Addition,
            old_lineno: 0,
            new_lineno,
            content: content.into(),
        }
    }

    pub fn deletion(old_lineno: u32, content: impl Into<BString>) -> Self {
        DiffLine {
            origin: DiffOrigin::Deletion,
            old_lineno,
            new_lineno: 0,
            content: content.into(),
        }
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct PatchHunk {
    pub old_start: u32,
    pub old_count: u32,
    pub new_start: u32,
    pub new_count: u32,
    pub lines: Vec<DiffLine>,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Patch {
    pub is_binary: bool,
    pub hunks: Vec<PatchHunk>,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum LineOp {
    Same(usize, usize),
    Del(usize),
    Add(usize),
}

impl LineOp {
    fn is_change(self) -> bool {
        !matches!(self, LineOp::Same(..))
    }
}

impl Patch {
    /// Diffs two file contents. A NUL byte on either side makes the patch
    /// binary, with no hunks.
    pub fn from_contents(old: &[u8], new: &[u8]) -> Patch {
        if old.contains(&0) || new.contains(&0) {
            return Patch {
                is_binary: true,
                hunks: vec![],
            };
        }

        let old_ranges = find_line_ranges(old);
        let new_ranges = find_line_ranges(new);
        let mut matched = vec![];
        collect_unchanged_lines(
            &mut matched,
            &DiffSource::new(old, &old_ranges),
            &DiffSource::new(new, &new_ranges),
        );
        debug_assert!(matched.windows(2).all(|w| w[0].0 < w[1].0 && w[0].1 < w[1].1));

        // Flatten into one op per line on either side.
        let mut ops = vec![];
        let (mut o, mut n) = (0, 0);
        for &(left, right) in &matched {
            ops.extend((o..left).map(LineOp::Del));
            ops.extend((n..right).map(LineOp::Add));
            ops.push(LineOp::Same(left, right));
            o = left + 1;
            n = right + 1;
        }
        ops.extend((o..old_ranges.len()).map(LineOp::Del));
        ops.extend((n..new_ranges.len()).map(LineOp::Add));

        // Carve out hunk windows: changed ops plus surrounding context,
        // overlapping windows merged.
        let windows: Vec<Range<usize>> = ops
            .iter()
            .enumerate()
            .filter(|(_, op)| op.is_change())
            .map(|(i, _)| i.saturating_sub(CONTEXT_LINES)..(i + CONTEXT_LINES + 1).min(ops.len()))
            .coalesce(|previous, current| {
                if current.start <= previous.end {
                    Ok(previous.start..current.end)
                } else {
                    Err((previous, current))
                }
            })
            .collect();

        let old_line = |i: usize| BString::from(&old[old_ranges[i].clone()]);
        let new_line = |i: usize| BString::from(&new[new_ranges[i].clone()]);
        let hunks = windows
            .into_iter()
            .map(|window| {
                let lines: Vec<DiffLine> = ops[window]
                    .iter()
                    .map(|&op| match op {
                        LineOp::Same(l, r) => {
                            DiffLine::context(l as u32 + 1, r as u32 + 1, old_line(l))
                        }
                        LineOp::Del(l) => DiffLine::deletion(l as u32 + 1, old_line(l)),
                        LineOp::Add(r) => DiffLine::addition(r as u32 + 1, new_line(r)),
                    })
                    .collect();
                let old_linenos: Vec<u32> = lines
                    .iter()
                    .filter(|line| line.old_lineno != 0)
                    .map(|line| line.old_lineno)
                    .collect();
                let new_linenos: Vec<u32> = lines
                    .iter()
                    .filter(|line| line.new_lineno != 0)
                    .map(|line| line.new_lineno)
                    .collect();
                PatchHunk {
                    old_start: old_linenos.first().copied().unwrap_or(0),
                    old_count: old_linenos.len() as u32,
                    new_start: new_linenos.first().copied().unwrap_or(0),
                    new_count: new_linenos.len() as u32,
                    lines,
                }
            })
            .collect();

        Patch {
            is_binary: false,
            hunks,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn no_ranges() -> Vec<Range<usize>> {
        vec![]
    }

    #[test]
    fn test_find_line_ranges_empty() {
        assert_eq!(find_line_ranges(b""), no_ranges());
    }

    #[test]
    fn test_find_line_ranges_blank_line() {
        assert_eq!(find_line_ranges(b"\n"), vec![0..1]);
    }

    #[test]
    fn test_find_line_ranges_missing_newline_at_eof() {
        assert_eq!(find_line_ranges(b"foo"), vec![0..3]);
    }

    #[test]
    fn test_find_line_ranges_multiple_lines() {
        assert_eq!(find_line_ranges(b"a\nbb\nccc\n"), vec![0..2, 2..5, 5..9]);
    }

    #[test]
    fn test_count_lines() {
        assert_eq!(count_lines(b""), 0);
        assert_eq!(count_lines(b"a\n"), 1);
        assert_eq!(count_lines(b"a"), 1);
        assert_eq!(count_lines(b"a\nb"), 2);
        assert_eq!(count_lines(b"a\nb\n"), 2);
    }

    #[test]
    fn test_longest_common_chain() {
        assert_eq!(longest_common_chain(&[]), vec![]);
        assert_eq!(longest_common_chain(&[0, 1, 2]), vec![(0, 0), (1, 1), (2, 2)]);
        assert_eq!(longest_common_chain(&[2, 1, 0]), vec![(0, 2)]);
        assert_eq!(
            longest_common_chain(&[0, 1, 4, 2, 3, 5]),
            vec![(0, 0), (1, 1), (2, 3), (3, 4), (5, 5)]
        );
    }

    #[test]
    fn test_patch_identical() {
        let patch = Patch::from_contents(b"a\nb\n", b"a\nb\n");
        assert!(!patch.is_binary);
        assert_eq!(patch.hunks, vec![]);
    }

    #[test]
    fn test_patch_binary() {
        let patch = Patch::from_contents(b"a\n", b"a\0b\n");
        assert!(patch.is_binary);
        assert_eq!(patch.hunks, vec![]);
    }

    #[test]
    fn test_patch_modified_line() {
        let patch = Patch::from_contents(b"a\nb\nc\n", b"a\nB\nc\n");
        assert_eq!(patch.hunks.len(), 1);
        assert_eq!(
            patch.hunks[0].lines,
            vec![
                DiffLine::context(1, 1, "a\n"),
                DiffLine::deletion(2, "b\n"),
                DiffLine::addition(2, "B\n"),
                DiffLine::context(3, 3, "c\n"),
            ]
        );
    }

    #[test]
    fn test_patch_addition_at_start() {
        let patch = Patch::from_contents(b"b\n", b"a\nb\n");
        assert_eq!(patch.hunks.len(), 1);
        assert_eq!(
            patch.hunks[0].lines,
            vec![DiffLine::addition(1, "a\n"), DiffLine::context(1, 2, "b\n")]
        );
        assert_eq!(patch.hunks[0].new_start, 1);
    }

    #[test]
    fn test_patch_deletion_at_end() {
        let patch = Patch::from_contents(b"a\nb\n", b"a\n");
        assert_eq!(patch.hunks.len(), 1);
        assert_eq!(
            patch.hunks[0].lines,
            vec![DiffLine::context(1, 1, "a\n"), DiffLine::deletion(2, "b\n")]
        );
    }

    #[test]
    fn test_patch_distant_changes_make_separate_hunks() {
        let old = b"a\nb\nc\nd\ne\nf\ng\nh\ni\nj\nk\n";
        let new = b"A\nb\nc\nd\ne\nf\ng\nh\ni\nj\nK\n";
        let patch = Patch::from_contents(old, new);
        assert_eq!(patch.hunks.len(), 2);
        assert_eq!(patch.hunks[0].lines[0], DiffLine::deletion(1, "a\n"));
        assert_eq!(patch.hunks[0].lines.last().unwrap(), &DiffLine::context(4, 4, "d\n"));
        assert_eq!(patch.hunks[1].lines[0], DiffLine::context(8, 8, "h\n"));
    }

    #[test]
    fn test_patch_nearby_changes_merge_into_one_hunk() {
        let old = b"a\nb\nc\nd\ne\n";
        let new = b"A\nb\nc\nd\nE\n";
        let patch = Patch::from_contents(old, new);
        assert_eq!(patch.hunks.len(), 1);
    }

    #[test]
    fn test_patch_no_trailing_newline() {
        let patch = Patch::from_contents(b"a\nb", b"a\nb\nc");
        let added: Vec<_> = patch
            .hunks
            .iter()
            .flat_map(|hunk| &hunk.lines)
            .filter(|line| line.origin == DiffOrigin::Addition)
            .collect();
        // "b" gains a newline, so it reads as replaced; "c" is new.
        assert!(added.iter().any(|line| line.content == "c"));
    }

    #[test]
    fn test_patch_from_empty() {
        let patch = Patch::from_contents(b"", b"a\nb\n");
        assert_eq!(patch.hunks.len(), 1);
        assert_eq!(
            patch.hunks[0].lines,
            vec![DiffLine::addition(1, "a\n"), DiffLine::addition(2, "b\n")]
        );
    }

    #[test]
    fn test_patch_to_empty() {
        let patch = Patch::from_contents(b"a\n", b"");
        assert_eq!(patch.hunks.len(), 1);
        assert_eq!(patch.hunks[0].lines, vec![DiffLine::deletion(1, "a\n")]);
    }

    #[test]
    fn test_patch_repeated_lines_recursion() {
        // The repeated "x" lines are not unique globally, but become
        // matchable once the unique anchors split the inputs.
        let old = b"x\nalpha\nx\nbeta\nx\n";
        let new = b"x\nalpha\nnew\nx\nbeta\nx\n";
        let patch = Patch::from_contents(old, new);
        let additions: Vec<_> = patch
            .hunks
            .iter()
            .flat_map(|hunk| &hunk.lines)
            .filter(|line| line.origin == DiffOrigin::Addition)
            .collect();
        assert_eq!(additions.len(), 1);
        assert_eq!(additions[0].content, "new\n");
        assert_eq!(additions[0].new_lineno, 3);
    }
}
