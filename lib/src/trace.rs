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

//! Reconstructs the interesting ancestry of one file as a pruned DAG of
//! trace nodes: the revisions where the file was added, modified, renamed
//! or merged, linked parent-to-child, following the path through renames.
//!
//! The walk is frontier-based: each entry is a branch of history still to
//! explore, and merge side-branches discovered along the way are pushed to
//! the front so a branch is drained depth-first before the next one starts.

use std::collections::HashMap;
#[cfg(debug_assertions)]
use std::collections::HashSet;
use std::collections::VecDeque;
use std::fmt::Write as _;
use std::rc::Rc;
use std::time::Instant;

use thiserror::Error;
use tracing::instrument;

use crate::annotate::annotate_trace;
use crate::annotate::AnnotateError;
use crate::annotate::AnnotateOptions;
use crate::annotate::AnnotatedFile;
use crate::backend::Backend;
use crate::backend::BackendError;
use crate::backend::BackendResult;
use crate::backend::Commit;
use crate::backend::CommitId;
use crate::backend::DeltaStatus;
use crate::backend::FileId;
use crate::backend::TreeId;
use crate::backend::TreeValue;
use crate::object_id::id7;
use crate::object_id::ObjectId;

/// How many commits to examine between progress reports.
pub const TRACE_PROGRESS_INTERVAL: usize = 200;

/// Index of a [`TraceNode`] within its owning [`Trace`]. Parent/child
/// relations are index pairs into the node arena, so the cyclic links of
/// the graph never turn into ownership cycles.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct TraceNodeId(u32);

impl TraceNodeId {
    fn index(self) -> usize {
        self.0 as usize
    }
}

/// One significant revision of the traced file.
#[derive(Debug)]
pub struct TraceNode {
    /// Path of the file at this revision.
    pub path: String,
    /// Earliest commit in this node's branch chain where the blob shows up.
    pub commit_id: CommitId,
    pub blob_id: FileId,
    /// Branch ancestry level: 0 on the seed branch, +1 for each merge
    /// side-branch entered.
    pub level: u32,
    pub status: DeltaStatus,
    /// parents[0] is the primary ancestor; a second entry is the
    /// contribution of a merged branch.
    pub parents: Vec<TraceNodeId>,
    pub children: Vec<TraceNodeId>,
    pub sealed: bool,
    /// Ordinal in blame order; 0 until the blame engine assigns it.
    pub revision_number: u32,
    /// Irrelevant commits this node is subbing in for.
    pub subbing_in_for: Vec<CommitId>,
    /// Filled in by the blame engine.
    pub annotated_file: Option<Rc<AnnotatedFile>>,
}

impl TraceNode {
    fn status_char(&self) -> char {
        match self.status {
            DeltaStatus::Unmodified => 'U',
            DeltaStatus::Added => 'A',
            DeltaStatus::Deleted => 'D',
            DeltaStatus::Modified => 'M',
            DeltaStatus::Renamed => 'R',
            DeltaStatus::Unreadable => '!',
        }
    }
}

#[derive(Debug, Error)]
pub enum TraceError {
    #[error(transparent)]
    Backend(#[from] BackendError),
    #[error("octopus merge unsupported at commit {}", .commit.hex())]
    OctopusUnsupported { commit: CommitId },
    #[error("path {path:?} not found at the seed commit")]
    PathNotFound { path: String },
    #[error("trace cancelled by caller")]
    Cancelled,
}

/// Knobs for [`trace_file`].
#[derive(Clone, Debug)]
pub struct TraceOptions {
    /// Skip this many commits at a time along the first-parent chain of
    /// the seed branch, accepting the skip only when the blob is unchanged
    /// across the gap. 0 disables skimming.
    pub skim_interval: usize,
    /// Deepest merge side-branch level to explore.
    pub max_level: u32,
    pub progress_interval: usize,
}

impl Default for TraceOptions {
    fn default() -> Self {
        TraceOptions {
            skim_interval: 0,
            max_level: u32::MAX,
            progress_interval: TRACE_PROGRESS_INTERVAL,
        }
    }
}

/// The pruned history of one file.
///
/// Owns the node arena. A successfully built trace always has a root (the
/// node for the seed revision); every other node is reachable from it by
/// walking parent links.
#[derive(Debug)]
pub struct Trace {
    nodes: Vec<TraceNode>,
    root: Option<TraceNodeId>,
    path: String,
}

impl Trace {
    pub(crate) fn new(path: &str) -> Self {
        Trace {
            nodes: vec![],
            root: None,
            path: path.to_owned(),
        }
    }

    pub fn root(&self) -> TraceNodeId {
        self.root.expect("a built trace always has a root node")
    }

    /// The path the trace was seeded with.
    pub fn top_path(&self) -> &str {
        &self.path
    }

    pub fn node(&self, id: TraceNodeId) -> &TraceNode {
        &self.nodes[id.index()]
    }

    pub(crate) fn node_mut(&mut self, id: TraceNodeId) -> &mut TraceNode {
        &mut self.nodes[id.index()]
    }

    /// Number of live nodes (eliminated tombstones excluded).
    pub fn len(&self) -> usize {
        self.nodes
            .iter()
            .filter(|node| node.status != DeltaStatus::Unreadable)
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Blob id of the primary ancestor, or null for a node with no
    /// parents (the revision that introduced the file).
    pub fn ancestor_blob_id(&self, id: TraceNodeId) -> FileId {
        match self.node(id).parents.first() {
            Some(&parent) => {
                debug_assert!(self.node(parent).sealed);
                self.node(parent).blob_id.clone()
            }
            None => FileId::null(),
        }
    }

    /// Finds the node representing `commit_id`, consulting the
    /// `subbing_in_for` lists of nodes that absorbed eliminated ones.
    pub fn node_for_commit(&self, commit_id: &CommitId) -> Option<TraceNodeId> {
        (0..self.nodes.len() as u32).map(TraceNodeId).find(|&id| {
            let node = self.node(id);
            node.status != DeltaStatus::Unreadable
                && (&node.commit_id == commit_id || node.subbing_in_for.contains(commit_id))
        })
    }

    /// Yields every node reachable from `start`, each one only after all
    /// of its children. Walking the result in reverse gives blame order
    /// (parents first).
    pub fn walk_graph(&self, start: TraceNodeId) -> GraphWalk<'_> {
        GraphWalk {
            trace: self,
            frontier_nodes: vec![start],
            frontier_pending: vec![0],
            #[cfg(debug_assertions)]
            seen: HashSet::new(),
        }
    }

    /// Text dump of the trace for debugging, one node per line.
    pub fn dump(&self) -> String {
        let mut out = String::new();
        for id in self.walk_graph(self.root()) {
            let node = self.node(id);
            let indent = "    ".repeat(node.level as usize);
            writeln!(
                out,
                "({},{},{},{}) {}{}",
                node.level,
                id7(&node.commit_id),
                id7(&node.blob_id),
                node.status_char(),
                indent,
                node.path,
            )
            .unwrap();
        }
        out
    }

    /// Runs the blame engine over this trace. See [`annotate_trace`].
    pub fn annotate(
        &mut self,
        backend: &dyn Backend,
        options: &AnnotateOptions,
        progress: &mut dyn FnMut(usize) -> bool,
    ) -> Result<(), AnnotateError> {
        annotate_trace(backend, self, options, progress)
    }

    /// Drops every node's annotated file and revision number so the blame
    /// engine can run on this trace again (e.g. when benchmarking blame
    /// alone on a trace built once).
    pub fn clear_annotations(&mut self) {
        for node in &mut self.nodes {
            node.annotated_file = None;
            node.revision_number = 0;
        }
    }

    pub(crate) fn new_node(
        &mut self,
        path: String,
        commit_id: CommitId,
        blob_id: FileId,
        level: u32,
    ) -> TraceNodeId {
        let id = TraceNodeId(self.nodes.len() as u32);
        self.nodes.push(TraceNode {
            path,
            commit_id,
            blob_id,
            level,
            status: DeltaStatus::Unmodified,
            parents: vec![],
            children: vec![],
            sealed: false,
            revision_number: 0,
            subbing_in_for: vec![],
            annotated_file: None,
        });
        id
    }

    pub(crate) fn add_parent(&mut self, child: TraceNodeId, parent: TraceNodeId) {
        assert!(!self.node(child).parents.contains(&parent));
        assert!(!self.node(parent).children.contains(&child));
        self.node_mut(child).parents.push(parent);
        self.node_mut(parent).children.push(child);
    }

    /// Removes a node that turned out to contribute nothing (sealed
    /// UNMODIFIED) and re-parents its children onto `replace_with`, which
    /// already represents the same blob. The eliminated commit is recorded
    /// in the replacement's `subbing_in_for`.
    pub(crate) fn unlink_passthrough(&mut self, node_id: TraceNodeId, replace_with: TraceNodeId) {
        assert!(
            self.node(node_id).parents.is_empty(),
            "passthrough nodes aren't supposed to have any parents"
        );
        assert_ne!(
            self.node(node_id).status,
            DeltaStatus::Unreadable,
            "this node has already been unlinked"
        );
        assert_ne!(
            self.node(replace_with).status,
            DeltaStatus::Unreadable,
            "don't chain passthrough nodes"
        );
        assert!(self.node(replace_with).sealed);

        let children = std::mem::take(&mut self.node_mut(node_id).children);
        for &child in &children {
            assert_ne!(self.node(child).status, DeltaStatus::Unreadable);
            let old_index = self.find_parent_link(child, node_id);
            match self.node(child).parents.iter().position(|&p| p == replace_with) {
                None => {
                    self.node_mut(child).parents[old_index] = replace_with;
                    debug_assert!(!self.node(replace_with).children.contains(&child));
                    self.node_mut(replace_with).children.push(child);
                }
                Some(existing_index) => {
                    assert!(existing_index < old_index);
                    self.node_mut(child).parents.remove(old_index);
                    debug_assert!(self.node(replace_with).children.contains(&child));
                }
            }
        }

        let commit_id = self.node(node_id).commit_id.clone();
        let subbing = std::mem::take(&mut self.node_mut(node_id).subbing_in_for);
        debug_assert!(!subbing
            .iter()
            .any(|id| self.node(replace_with).subbing_in_for.contains(id)));
        let replacement = self.node_mut(replace_with);
        replacement.subbing_in_for.push(commit_id);
        replacement.subbing_in_for.extend(subbing);

        let node = self.node_mut(node_id);
        node.sealed = true;
        node.status = DeltaStatus::Unreadable;
        node.parents.clear();
        node.children.clear();
    }

    /// Detaches a MODIFIED node that merely re-introduces a blob already
    /// contributed on a more original branch, re-parenting its children
    /// onto that earlier contributor.
    fn cull(&mut self, node_id: TraceNodeId, keeper: TraceNodeId) {
        debug_assert_ne!(node_id, keeper);
        debug_assert_eq!(self.node(node_id).blob_id, self.node(keeper).blob_id);
        debug_assert!(self.node(keeper).sealed);

        let children = std::mem::take(&mut self.node_mut(node_id).children);
        for &child in &children {
            debug_assert_ne!(child, keeper);
            let old_index = self.find_parent_link(child, node_id);
            if self.node(child).parents.contains(&keeper) {
                self.node_mut(child).parents.remove(old_index);
            } else {
                self.node_mut(child).parents[old_index] = keeper;
                self.node_mut(keeper).children.push(child);
            }
        }
        let parents = std::mem::take(&mut self.node_mut(node_id).parents);
        for &parent in &parents {
            let siblings = &mut self.node_mut(parent).children;
            if let Some(i) = siblings.iter().position(|&c| c == node_id) {
                siblings.remove(i);
            }
        }

        let commit_id = self.node(node_id).commit_id.clone();
        let subbing = std::mem::take(&mut self.node_mut(node_id).subbing_in_for);
        let keeper_node = self.node_mut(keeper);
        keeper_node.subbing_in_for.push(commit_id);
        keeper_node.subbing_in_for.extend(subbing);

        let node = self.node_mut(node_id);
        node.status = DeltaStatus::Unreadable;
    }

    fn find_parent_link(&self, child: TraceNodeId, parent: TraceNodeId) -> usize {
        self.node(child)
            .parents
            .iter()
            .position(|&p| p == parent)
            .expect("parent/child links out of sync")
    }
}

/// See [`Trace::walk_graph`]. A frontier of candidate nodes with pending-
/// child counters; each step picks the rightmost entry whose children have
/// all been yielded. If no entry qualifies the graph has a cycle, which is
/// a bug in the trace construction.
pub struct GraphWalk<'a> {
    trace: &'a Trace,
    frontier_nodes: Vec<TraceNodeId>,
    frontier_pending: Vec<usize>,
    #[cfg(debug_assertions)]
    seen: HashSet<CommitId>,
}

impl Iterator for GraphWalk<'_> {
    type Item = TraceNodeId;

    fn next(&mut self) -> Option<TraceNodeId> {
        if self.frontier_nodes.is_empty() {
            return None;
        }

        // Rightmost frontier node with no pending children.
        let Some(i) = self.frontier_pending.iter().rposition(|&pending| pending == 0) else {
            panic!("frontier deadlock: cycle in trace graph");
        };
        let node_id = self.frontier_nodes.remove(i);
        self.frontier_pending.remove(i);

        // Push this node's parents to the frontier tail. A parent already
        // in the frontier has had some of its children yielded; carry its
        // counter over.
        for &parent in &self.trace.node(node_id).parents {
            debug_assert!(self.trace.node(parent).children.contains(&node_id));
            let pending = match self.frontier_nodes.iter().position(|&n| n == parent) {
                Some(j) => {
                    self.frontier_nodes.remove(j);
                    self.frontier_pending.remove(j)
                }
                None => self.trace.node(parent).children.len(),
            };
            debug_assert!((1..=self.trace.node(parent).children.len()).contains(&pending));
            self.frontier_nodes.push(parent);
            self.frontier_pending.push(pending - 1);
        }

        #[cfg(debug_assertions)]
        {
            let node = self.trace.node(node_id);
            debug_assert!(matches!(
                node.status,
                DeltaStatus::Added | DeltaStatus::Deleted | DeltaStatus::Modified | DeltaStatus::Renamed
            ));
            assert!(
                self.seen.insert(node.commit_id.clone()),
                "commit {} visited twice",
                id7(&node.commit_id)
            );
        }

        Some(node_id)
    }
}

/// Walks the commit graph backward from `seed`, following `top_path`
/// through renames, and returns the trace DAG of the file's significant
/// revisions.
///
/// `progress` is invoked with the current node count every
/// `progress_interval` commits; returning `false` aborts the trace with
/// [`TraceError::Cancelled`].
#[instrument(skip_all)]
pub fn trace_file(
    backend: &dyn Backend,
    top_path: &str,
    seed: &Commit,
    options: &TraceOptions,
    progress: &mut dyn FnMut(usize) -> bool,
) -> Result<Trace, TraceError> {
    let mut trace = Trace::new(top_path);
    let mut frontier: VecDeque<(Option<TraceNodeId>, Commit)> = VecDeque::new();
    frontier.push_back((None, seed.clone()));
    // Blob found at every commit examined so far; doubles as the
    // visited-commits set.
    let mut known_blobs: HashMap<CommitId, FileId> = HashMap::new();
    // Which node covers each examined commit.
    let mut owners: HashMap<CommitId, TraceNodeId> = HashMap::new();
    let mut num_commits: usize = 0;
    let interval = options.progress_interval.max(1);

    if !progress(0) {
        return Err(TraceError::Cancelled);
    }
    let start_time = Instant::now();

    // Outer loop: pop a branch off the frontier.
    while let Some((anchor, branch_commit)) = frontier.pop_front() {
        let mut commit = branch_commit;
        let (mut path, level, anchor_blob) = match anchor {
            Some(anchor) => {
                let node = trace.node(anchor);
                (node.path.clone(), node.level + 1, node.blob_id.clone())
            }
            None => (top_path.to_owned(), 0, FileId::null()),
        };

        if known_blobs.contains_key(&commit.id) {
            continue;
        }
        if level > options.max_level {
            continue;
        }

        let mut tree_above: Option<TreeId> = None;
        let mut commit_above: Option<Commit> = None;
        let mut new_branch = true;
        let mut skip_skimming = 0usize;
        let mut cur_node = anchor;
        let mut cur_blob = anchor_blob;
        let final_blob;
        let mut stop_commit: Option<CommitId> = None;

        // Inner loop: walk the branch along first parents.
        loop {
            debug_assert!(!known_blobs.contains_key(&commit.id), "commit already visited");
            num_commits += 1;
            let tree = commit.root_tree.clone();

            if num_commits % interval == 0 && !progress(trace.len()) {
                return Err(TraceError::Cancelled);
            }

            let (found_path, blob_id) = locate_blob(backend, &path, &tree, tree_above.as_ref(), &cur_blob)?;
            let mut useful = blob_id != cur_blob;
            known_blobs.insert(commit.id.clone(), blob_id.clone());

            if blob_id.is_null() {
                // The file doesn't exist here; the branch ends above.
                final_blob = FileId::null();
                break;
            }
            if !new_branch && found_path != trace.node(cur_node.expect("walked branch has a node")).path {
                if !useful {
                    // Rename without a content change stays significant.
                    trace.node_mut(cur_node.expect("walked branch has a node")).status =
                        DeltaStatus::Renamed;
                    useful = true;
                }
                // With a content change as well, the node seals as MODIFIED.
            }
            path = found_path;

            if new_branch || useful {
                let node_above = cur_node;
                let node = trace.new_node(path.clone(), commit.id.clone(), blob_id.clone(), level);
                match node_above {
                    Some(above) => trace.add_parent(above, node),
                    None => trace.root = Some(node),
                }
                if !new_branch {
                    let above = node_above.expect("walked branch has a node");
                    let commit_above = commit_above.as_ref().expect("walked branch has a commit");
                    let significant =
                        seal_node(backend, &mut trace, above, commit_above, &blob_id, &mut frontier)?;
                    debug_assert!(significant);
                }
                new_branch = false;
                cur_node = Some(node);
                cur_blob = blob_id;
                owners.insert(commit.id.clone(), node);
            } else {
                let node = cur_node.expect("walked branch has a node");
                debug_assert_eq!(trace.node(node).level, level);
                // Extend the node backward to this earlier commit.
                trace.node_mut(node).commit_id = commit.id.clone();
                owners.insert(commit.id.clone(), node);
            }

            commit_above = Some(commit.clone());
            tree_above = Some(tree);

            // Optionally skim over irrelevant stretches of the seed branch.
            if skip_skimming > 0 {
                skip_skimming -= 1;
            } else if level == 0 && options.skim_interval > 0 {
                let node = cur_node.expect("walked branch has a node");
                let (landed, skip) = skim_branch(
                    backend,
                    &mut trace,
                    node,
                    &commit,
                    &mut known_blobs,
                    &mut owners,
                    options.skim_interval,
                )?;
                skip_skimming = skip;
                if skip == 0 {
                    commit = landed;
                    commit_above = Some(commit.clone());
                    tree_above = Some(commit.root_tree.clone());
                }
            }

            // Advance to the first parent.
            let Some(parent_id) = commit.parents.first().cloned() else {
                // Initial commit.
                final_blob = FileId::null();
                break;
            };
            if let Some(known) = known_blobs.get(&parent_id) {
                // Already seen; its blob becomes the ancestor blob for
                // sealing the final node of this branch.
                final_blob = known.clone();
                stop_commit = Some(parent_id);
                break;
            }
            commit = backend.get_commit(&parent_id)?;
        }

        // Seal the last open node of the branch.
        if !new_branch {
            let node = cur_node.expect("walked branch has a node");
            let commit_above = commit_above.expect("walked branch has a commit");
            let significant =
                seal_node(backend, &mut trace, node, &commit_above, &final_blob, &mut frontier)?;
            if significant {
                // A branch that ran into an already-visited commit hangs
                // off the node covering that commit as its primary
                // ancestor. (A null final blob means the file was added
                // here instead; such nodes keep zero parents.)
                if !final_blob.is_null() {
                    let stop_commit = stop_commit.expect("non-null ancestor blob comes from a visited commit");
                    let keeper = *owners.get(&stop_commit).expect("visited commit has no owning node");
                    trace.add_parent(node, keeper);
                }
            } else {
                // The branch tail changed nothing; splice it out in favor
                // of the node that already covers the stop commit.
                let stop_commit = stop_commit.expect("unmodified tail must stop at a visited commit");
                let keeper = *owners.get(&stop_commit).expect("visited commit has no owning node");
                trace.unlink_passthrough(node, keeper);
                for owner in owners.values_mut() {
                    if *owner == node {
                        *owner = keeper;
                    }
                }
            }
        }
    }

    if trace.root.is_none() {
        return Err(TraceError::PathNotFound {
            path: top_path.to_owned(),
        });
    }

    prune_reintroductions(&mut trace);

    if !progress(trace.len()) {
        return Err(TraceError::Cancelled);
    }
    tracing::debug!(
        num_commits,
        relevant = trace.len(),
        elapsed_ms = start_time.elapsed().as_millis() as u64,
        "trace complete"
    );
    Ok(trace)
}

/// Updates a node's status from its newly discovered ancestor blob and
/// marks it sealed. If the node is significant and sits on a merge commit,
/// the merge's second parent is pushed onto the frontier so the side
/// branch gets traced at the next level.
fn seal_node(
    backend: &dyn Backend,
    trace: &mut Trace,
    node_id: TraceNodeId,
    commit: &Commit,
    ancestor_blob: &FileId,
    frontier: &mut VecDeque<(Option<TraceNodeId>, Commit)>,
) -> Result<bool, TraceError> {
    {
        let node = trace.node_mut(node_id);
        assert!(!node.sealed, "node already sealed");
        debug_assert_eq!(commit.id, node.commit_id);
        debug_assert!(!node.blob_id.is_null());

        if node.status != DeltaStatus::Unmodified {
            // Status was set while walking (rename); keep it.
            debug_assert_eq!(node.status, DeltaStatus::Renamed);
        } else if ancestor_blob == &node.blob_id {
            // Stays UNMODIFIED: the branch contributed nothing.
        } else if ancestor_blob.is_null() {
            node.status = DeltaStatus::Added;
        } else {
            node.status = DeltaStatus::Modified;
        }
        node.sealed = true;
    }

    let significant = trace.node(node_id).status != DeltaStatus::Unmodified;
    if significant && commit.parents.len() > 1 {
        if commit.parents.len() > 2 {
            return Err(TraceError::OctopusUnsupported {
                commit: commit.id.clone(),
            });
        }
        let parent1 = backend.get_commit(&commit.parents[1])?;
        frontier.push_front((Some(node_id), parent1));
    }
    Ok(significant)
}

/// Looks up the traced file in `tree`, redirecting the path when the
/// commit above renamed it. Returns an empty path and a null blob id when
/// the file doesn't exist in this tree at all.
fn locate_blob(
    backend: &dyn Backend,
    path: &str,
    tree: &TreeId,
    tree_above: Option<&TreeId>,
    known_blob: &FileId,
) -> BackendResult<(String, FileId)> {
    // Most common case: the path is in the commit's tree.
    if let Some(TreeValue::File(id)) = backend.path_value(tree, path)? {
        return Ok((path.to_owned(), id));
    }

    // No tree above means we just entered a fresh branch whose tip doesn't
    // have the file; the branch is useless.
    let Some(tree_above) = tree_above else {
        return Ok((String::new(), FileId::null()));
    };

    // Did the commit above rename the file? If we're lucky it renamed the
    // file without modifying it, which an exact blob match on the deleted
    // side catches without similarity detection.
    let deltas = backend.diff_trees(tree, tree_above, false)?;
    let (mut adds, mut dels) = (0, 0);
    for delta in &deltas {
        match delta.status {
            DeltaStatus::Deleted => {
                dels += 1;
                if &delta.old_file.id == known_blob {
                    return Ok((delta.old_file.path.clone(), known_blob.clone()));
                }
            }
            DeltaStatus::Added => adds += 1,
            _ => {}
        }
    }

    // A rename needs at least one add and one del.
    if adds == 0 || dels == 0 {
        return Ok((String::new(), FileId::null()));
    }

    // Fall back to similarity-based rename detection. Slow!
    let deltas = backend.diff_trees(tree, tree_above, true)?;
    for delta in &deltas {
        if delta.status == DeltaStatus::Renamed && delta.new_file.path == path {
            if let Some(TreeValue::File(id)) = backend.path_value(tree, &delta.old_file.path)? {
                return Ok((delta.old_file.path.clone(), id));
            }
        }
    }

    // We're past the commit that created this file.
    Ok((String::new(), FileId::null()))
}

/// Rewinds `interval` commits along the first-parent chain without looking
/// at the skimmed trees, then checks the blob at the landing commit. If it
/// matches, the node is brought down to the landing commit and all skimmed
/// commits are marked visited; otherwise the rewind is discarded and the
/// caller walks the next `len` commits normally before trying again.
///
/// Skimming can miss revisions that change and then revert to an identical
/// blob within one interval.
fn skim_branch(
    backend: &dyn Backend,
    trace: &mut Trace,
    node_id: TraceNodeId,
    top_commit: &Commit,
    known_blobs: &mut HashMap<CommitId, FileId>,
    owners: &mut HashMap<CommitId, TraceNodeId>,
    interval: usize,
) -> Result<(Commit, usize), BackendError> {
    let (node_blob, node_path) = {
        let node = trace.node(node_id);
        debug_assert_eq!(node.commit_id, top_commit.id);
        debug_assert_eq!(node.level, 0);
        (node.blob_id.clone(), node.path.clone())
    };

    let mut skimmed = vec![top_commit.id.clone()];
    let mut commit = top_commit.clone();
    for _ in 0..interval {
        if commit.parents.len() != 1 {
            // A merge (or the initial commit); don't skim across it.
            return Ok((top_commit.clone(), skimmed.len()));
        }
        commit = backend.get_commit(&commit.parents[0])?;
        skimmed.push(commit.id.clone());
    }

    match backend.path_value(&commit.root_tree, &node_path)? {
        Some(TreeValue::File(id)) if id == node_blob => {
            // Accept: bring the node down to the landing commit and mark
            // everything in between as visited with the current blob.
            trace.node_mut(node_id).commit_id = commit.id.clone();
            for id in &skimmed {
                known_blobs.insert(id.clone(), node_blob.clone());
                owners.insert(id.clone(), node_id);
            }
            Ok((commit, 0))
        }
        _ => Ok((top_commit.clone(), skimmed.len())),
    }
}

/// Scraps useless revisions: culls nodes whose blob is already contributed
/// at a smaller ancestry level nearer the tail. For example:
///
/// ```text
/// (level=3) │ │ ┿   blob2 - keep
/// (level=2) │ │ ┿   blob1 - cull
/// (level=1) │ ┿─╯   blob1 - cull
/// (level=0) ┿─╯     blob1 - keep
///           ├─╮
/// (level=1) │ ┷     blob1 - keep - earliest appearance of blob1
/// ```
///
/// Only MODIFIED nodes are culled; ADDED and RENAMED stay so the path
/// history is preserved. The root always stays.
fn prune_reintroductions(trace: &mut Trace) {
    let root = trace.root();
    let order: Vec<TraceNodeId> = trace.walk_graph(root).collect();
    let mut known_levels: HashMap<FileId, (u32, TraceNodeId)> = HashMap::new();
    for &node_id in order.iter().rev() {
        let (blob_id, level, status) = {
            let node = trace.node(node_id);
            debug_assert!(node.sealed);
            debug_assert_ne!(node.status, DeltaStatus::Unmodified);
            (node.blob_id.clone(), node.level, node.status)
        };
        match known_levels.get(&blob_id) {
            Some(&(known_level, keeper)) if known_level <= level => {
                if status == DeltaStatus::Modified && node_id != root {
                    trace.cull(node_id, keeper);
                }
            }
            _ => {
                known_levels.insert(blob_id, (level, node_id));
            }
        }
    }
}
