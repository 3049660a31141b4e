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

//! Per-line attribution (blame) over a trace DAG.
//!
//! The engine visits the trace in parents-first order and derives each
//! revision's annotated file from its primary parent's by walking the blob
//! patch between them. Lines that a revision carries over unchanged are
//! shared with the parent's annotated file rather than re-allocated, so a
//! line untouched for thousands of commits exists exactly once.

use std::rc::Rc;

use bstr::BStr;
use bstr::BString;
use bstr::ByteSlice as _;
use thiserror::Error;
use tracing::instrument;

use crate::backend::Backend;
use crate::backend::BackendError;
use crate::backend::CommitId;
use crate::backend::DeltaStatus;
use crate::diff;
use crate::diff::DiffOrigin;
use crate::diff::Patch;
use crate::diff::PatchHunk;
use crate::trace::Trace;
use crate::trace::TraceNodeId;

/// How many annotated revisions between progress reports.
pub const BLAME_PROGRESS_INTERVAL: usize = 10;

/// Default ripple range for [`AnnotatedFile::find_line_by_reference`].
pub const LINE_SEARCH_RANGE: usize = 250;

const BINARY_PLACEHOLDER: &str = "[binary data]";

/// One line of an annotated file. Identity matters: an unchanged line is
/// the *same* `Rc<Line>` in every revision that carries it.
#[derive(Debug, Eq, PartialEq)]
pub struct Line {
    /// The revision that introduced this line.
    pub node: TraceNodeId,
    /// Line text, including the trailing newline when present.
    pub text: BString,
}

/// A file where every line knows the trace node that introduced it.
///
/// Index 0 holds a synthetic sentinel; real lines start at index 1,
/// matching patch line numbers.
#[derive(Debug)]
pub struct AnnotatedFile {
    pub binary: bool,
    pub lines: Vec<Rc<Line>>,
}

impl AnnotatedFile {
    fn new(node: TraceNodeId) -> Self {
        let sentinel = Rc::new(Line {
            node,
            text: BString::from(""),
        });
        AnnotatedFile {
            binary: false,
            lines: vec![sentinel],
        }
    }

    /// The node this file was annotated for.
    pub fn node(&self) -> TraceNodeId {
        self.lines[0].node
    }

    /// Number of real lines (the sentinel doesn't count).
    pub fn line_count(&self) -> usize {
        self.lines.len() - 1
    }

    /// Searches outward from `start` for the index at which this file
    /// carries `target` (by line identity, not text). Useful for tracking
    /// a line across revisions that share it.
    pub fn find_line_by_reference(
        &self,
        target: &Rc<Line>,
        start: usize,
        search_range: usize,
    ) -> Option<usize> {
        let count = self.lines.len();
        let start = start.min(count - 1);
        let search_range = search_range.min(count);

        let mut lo = start as isize;
        let mut hi = start + 1;
        for _ in 0..search_range {
            if lo >= 0 && Rc::ptr_eq(&self.lines[lo as usize], target) {
                return Some(lo as usize);
            }
            if hi < count && Rc::ptr_eq(&self.lines[hi], target) {
                return Some(hi);
            }
            lo -= 1;
            hi += 1;
        }
        None
    }
}

/// One step of a patch walk: either carry forward a line from the old
/// side, or blame a fresh line on the new revision.
#[derive(Debug, Eq, PartialEq)]
enum PatchStep<'a> {
    Context { old_line: u32, new_line: u32 },
    Added { new_line: u32, content: &'a BStr },
}

/// Walks a patch as a flat sequence of [`PatchStep`]s. Line cursors start
/// at 1 on both sides; deletions advance the old cursor silently;
/// end-of-newline markers are skipped. Old-side lines after the last hunk
/// are emitted as trailing context.
struct PatchTraversal<'a> {
    hunks: &'a [PatchHunk],
    /// Length of the old side's line vector (sentinel included).
    num_lines_a: u32,
    hunk_index: usize,
    line_index: usize,
    cursor_a: u32,
    cursor_b: u32,
    /// Old-side target and new-side lineno of a context line being
    /// caught up to.
    catch_up: Option<(u32, u32)>,
}

impl<'a> PatchTraversal<'a> {
    fn new(patch: &'a Patch, num_lines_a: usize) -> Self {
        PatchTraversal {
            hunks: &patch.hunks,
            num_lines_a: num_lines_a as u32,
            hunk_index: 0,
            line_index: 0,
            cursor_a: 1,
            cursor_b: 1,
            catch_up: None,
        }
    }
}

impl<'a> Iterator for PatchTraversal<'a> {
    type Item = PatchStep<'a>;

    fn next(&mut self) -> Option<PatchStep<'a>> {
        loop {
            // Catch up to the old side of a context line, carrying over
            // everything skipped since the previous hunk line.
            if let Some((target_a, line_b)) = self.catch_up {
                if self.cursor_a <= target_a {
                    let step = PatchStep::Context {
                        old_line: self.cursor_a,
                        new_line: self.cursor_b,
                    };
                    self.cursor_a += 1;
                    self.cursor_b += 1;
                    return Some(step);
                }
                assert_eq!(self.cursor_b, line_b + 1, "diff line numbers regressed");
                self.catch_up = None;
            }

            if let Some(hunk) = self.hunks.get(self.hunk_index) {
                let Some(line) = hunk.lines.get(self.line_index) else {
                    self.hunk_index += 1;
                    self.line_index = 0;
                    continue;
                };
                self.line_index += 1;
                match line.origin {
                    DiffOrigin::Deletion => {
                        // Skip the deleted line.
                        assert!(line.old_lineno >= 1);
                        self.cursor_a = line.old_lineno + 1;
                    }
                    DiffOrigin::Addition => {
                        // This revision is to blame for this line.
                        assert!(line.new_lineno >= 1);
                        let step = PatchStep::Added {
                            new_line: self.cursor_b,
                            content: line.content.as_ref(),
                        };
                        self.cursor_b += 1;
                        return Some(step);
                    }
                    DiffOrigin::Context => {
                        assert!(line.old_lineno >= 1);
                        self.catch_up = Some((line.old_lineno, line.new_lineno));
                    }
                    DiffOrigin::ContextEofNl | DiffOrigin::AddEofNl | DiffOrigin::DelEofNl => {}
                }
                continue;
            }

            // Copy the rest of the old file.
            if self.cursor_a < self.num_lines_a {
                let step = PatchStep::Context {
                    old_line: self.cursor_a,
                    new_line: self.cursor_b,
                };
                self.cursor_a += 1;
                self.cursor_b += 1;
                return Some(step);
            }
            return None;
        }
    }
}

/// First-ever annotation of the file: every line is blamed on the node
/// that added it. A NUL byte degrades the file to a binary placeholder.
fn make_initial_blame(node: TraceNodeId, data: &[u8]) -> AnnotatedFile {
    let mut blame = AnnotatedFile::new(node);
    if data.find_byte(0).is_some() {
        blame.binary = true;
        blame.lines.push(Rc::new(Line {
            node,
            text: BString::from(BINARY_PLACEHOLDER),
        }));
        return blame;
    }
    blame.lines.extend(data.split_inclusive(|b| *b == b'\n').map(|line| {
        Rc::new(Line {
            node,
            text: BString::from(line),
        })
    }));
    blame
}

/// Rebuilds the annotated file of `node_b` from its primary parent's
/// annotated file plus the patch between the two blobs. Context lines are
/// shared by reference; added lines are blamed on `node_b`.
fn blame_patch(patch: &Patch, blame_a: &AnnotatedFile, node_b: TraceNodeId) -> AnnotatedFile {
    let mut blame_b = AnnotatedFile::new(node_b);
    if patch.is_binary {
        blame_b.binary = true;
        blame_b.lines.push(Rc::new(Line {
            node: node_b,
            text: BString::from(BINARY_PLACEHOLDER),
        }));
        return blame_b;
    }

    for step in PatchTraversal::new(patch, blame_a.lines.len()) {
        match step {
            PatchStep::Context { old_line, new_line } => {
                debug_assert_eq!(new_line as usize, blame_b.lines.len());
                blame_b.lines.push(Rc::clone(&blame_a.lines[old_line as usize]));
            }
            PatchStep::Added { new_line, content } => {
                debug_assert_eq!(new_line as usize, blame_b.lines.len());
                blame_b.lines.push(Rc::new(Line {
                    node: node_b,
                    text: BString::from(content),
                }));
            }
        }
    }
    blame_b
}

/// Merge-parent refinement: for every line `blame_b` shares with the
/// secondary parent, the parent's line object wins. When both branches of
/// a merge carry an identical line, its true origin is the earlier branch,
/// not the commit that merged them.
fn override_blame(patch: &Patch, blame_a: &AnnotatedFile, blame_b: &mut AnnotatedFile) {
    for step in PatchTraversal::new(patch, blame_a.lines.len()) {
        if let PatchStep::Context { old_line, new_line } = step {
            debug_assert_eq!(
                blame_b.lines[new_line as usize].text,
                blame_a.lines[old_line as usize].text
            );
            blame_b.lines[new_line as usize] = Rc::clone(&blame_a.lines[old_line as usize]);
        }
    }
}

#[derive(Debug, Error)]
pub enum AnnotateError {
    #[error(transparent)]
    Backend(#[from] BackendError),
    #[error("annotation cancelled by caller")]
    Cancelled,
}

/// Knobs for [`annotate_trace`].
#[derive(Clone, Debug)]
pub struct AnnotateOptions {
    /// Stop after annotating the node whose commit id matches.
    pub stop_at: Option<CommitId>,
    pub progress_interval: usize,
}

impl Default for AnnotateOptions {
    fn default() -> Self {
        AnnotateOptions {
            stop_at: None,
            progress_interval: BLAME_PROGRESS_INTERVAL,
        }
    }
}

/// Computes an annotated file for every reachable revision of a sealed
/// trace, oldest first, storing the result on each node.
///
/// `progress` is invoked with the number of visited revisions every
/// `progress_interval` steps; returning `false` aborts with
/// [`AnnotateError::Cancelled`].
#[instrument(skip_all)]
pub fn annotate_trace(
    backend: &dyn Backend,
    trace: &mut Trace,
    options: &AnnotateOptions,
    progress: &mut dyn FnMut(usize) -> bool,
) -> Result<(), AnnotateError> {
    let sequence: Vec<TraceNodeId> = trace.walk_graph(trace.root()).collect();
    let interval = options.progress_interval.max(1);

    let Some(&oldest) = sequence.last() else {
        return Ok(());
    };
    // Blob cache of size one, warmed with the oldest revision's blob.
    let mut blob_a_id = trace.node(oldest).blob_id.clone();
    let mut blob_a = backend.read_file(&blob_a_id)?;

    for (i, &node_id) in sequence.iter().rev().enumerate() {
        if i % interval == 0 && !progress(i) {
            return Err(AnnotateError::Cancelled);
        }

        debug_assert!(trace.node(node_id).sealed);
        debug_assert!(trace.node(node_id).annotated_file.is_none());

        let ancestor_blob_id = trace.ancestor_blob_id(node_id);
        let blob_id_b = trace.node(node_id).blob_id.clone();

        // Nodes that contribute no new blob (a pure rename, or a merge
        // that took the side branch's file verbatim) share the parent's
        // annotations outright.
        if ancestor_blob_id == blob_id_b {
            debug_assert!(matches!(
                trace.node(node_id).status,
                DeltaStatus::Renamed | DeltaStatus::Added
            ));
            let parent = trace.node(node_id).parents[0];
            let alias = Rc::clone(parent_annotation(trace, parent));
            trace.node_mut(node_id).annotated_file = Some(alias);
            continue;
        }

        // Informal revision number in blame order.
        trace.node_mut(node_id).revision_number = (i + 1) as u32;

        let blob_b = backend.read_file(&blob_id_b)?;

        if ancestor_blob_id.is_null() {
            debug_assert_eq!(trace.node(node_id).status, DeltaStatus::Added);
            let annotated = make_initial_blame(node_id, &blob_b);
            trace.node_mut(node_id).annotated_file = Some(Rc::new(annotated));
            continue;
        }

        if blob_a_id != ancestor_blob_id {
            blob_a = backend.read_file(&ancestor_blob_id)?;
            blob_a_id = ancestor_blob_id.clone();
        }
        // else: the cached blob is the ancestor (common case)

        let parent = trace.node(node_id).parents[0];
        let blame_a = Rc::clone(parent_annotation(trace, parent));
        let patch = backend.diff_file_contents(&blob_a, &blob_b);
        let mut blame_b = blame_patch(&patch, &blame_a, node_id);
        debug_assert!(blame_b.binary || blame_b.line_count() == diff::count_lines(&blob_b));

        // Enrich the blame with more precise origins from a merged branch.
        let parents = trace.node(node_id).parents.clone();
        if !blame_b.binary && parents.len() >= 2 {
            let extra = parents[1];
            let extra_blob_id = trace.node(extra).blob_id.clone();
            if extra_blob_id != ancestor_blob_id {
                #[cfg(debug_assertions)]
                {
                    // Very expensive check; the trace guarantees it.
                    assert!(backend.descendant_of(
                        &trace.node(node_id).commit_id,
                        &trace.node(extra).commit_id
                    )?);
                }
                let older_blob = backend.read_file(&extra_blob_id)?;
                let older_blame = Rc::clone(parent_annotation(trace, extra));
                let older_patch = backend.diff_file_contents(&older_blob, &blob_b);
                override_blame(&older_patch, &older_blame, &mut blame_b);
            }
        }

        trace.node_mut(node_id).annotated_file = Some(Rc::new(blame_b));

        // The blob just annotated is likely the next node's ancestor.
        blob_a_id = blob_id_b;
        blob_a = blob_b;

        if options.stop_at.as_ref() == Some(&trace.node(node_id).commit_id) {
            break;
        }
    }
    Ok(())
}

fn parent_annotation(trace: &Trace, parent: TraceNodeId) -> &Rc<AnnotatedFile> {
    trace
        .node(parent)
        .annotated_file
        .as_ref()
        .expect("parent node is not annotated yet")
}
