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

//! The repository capability set the trace/blame engine depends on.
//!
//! A [`Backend`] hands out immutable, content-addressed objects: commits,
//! trees (by path lookup), and file blobs, plus tree and blob diffs. The
//! engine never mutates a repository through this interface.

use std::collections::HashSet;
use std::fmt::Debug;

use bstr::BString;
use thiserror::Error;

use crate::diff::Patch;
use crate::object_id::id_type;
use crate::object_id::ObjectId;

id_type!(pub CommitId);
id_type!(pub TreeId);
id_type!(pub FileId);

impl FileId {
    /// The distinguished "no such blob" id.
    pub fn null() -> Self {
        FileId::new(vec![])
    }

    pub fn is_null(&self) -> bool {
        self.as_bytes().is_empty()
    }
}

impl CommitId {
    /// Pseudo-commit id representing the uncommitted working-directory
    /// state. Never collides with a real content hash in practice.
    pub fn workdir() -> Self {
        CommitId::from_bytes(&[0xee; 20])
    }

    pub fn is_workdir(&self) -> bool {
        self == &CommitId::workdir()
    }
}

#[derive(Debug, PartialEq, Eq, Clone, PartialOrd, Ord)]
pub struct MillisSinceEpoch(pub i64);

#[derive(Debug, PartialEq, Eq, Clone, PartialOrd, Ord)]
pub struct Timestamp {
    pub timestamp: MillisSinceEpoch,
    // time zone offset in minutes
    pub tz_offset: i32,
}

impl Timestamp {
    pub fn now() -> Self {
        Self::from_datetime(chrono::offset::Local::now())
    }

    pub fn from_datetime<Tz: chrono::TimeZone<Offset = chrono::offset::FixedOffset>>(
        datetime: chrono::DateTime<Tz>,
    ) -> Self {
        Self {
            timestamp: MillisSinceEpoch(datetime.timestamp_millis()),
            tz_offset: datetime.offset().local_minus_utc() / 60,
        }
    }
}

#[derive(Debug, PartialEq, Eq, Clone)]
pub struct Signature {
    pub name: String,
    pub email: String,
    pub timestamp: Timestamp,
}

#[derive(Debug, PartialEq, Eq, Clone)]
pub struct Commit {
    pub id: CommitId,
    pub parents: Vec<CommitId>,
    pub root_tree: TreeId,
    pub author: Signature,
}

/// What a path resolves to within a tree.
#[derive(Debug, PartialEq, Eq, Clone)]
pub enum TreeValue {
    File(FileId),
    Tree(TreeId),
}

/// Change classification, shared between tree deltas and trace nodes.
/// `Unreadable` is only ever used as a tombstone for trace nodes that were
/// eliminated from the graph.
#[derive(Debug, PartialEq, Eq, Clone, Copy, Hash)]
pub enum DeltaStatus {
    Unmodified,
    Added,
    Deleted,
    Modified,
    Renamed,
    Unreadable,
}

/// One side of a tree delta. The id is null and the path empty on the side
/// where the file does not exist.
#[derive(Debug, PartialEq, Eq, Clone)]
pub struct DiffFile {
    pub id: FileId,
    pub path: String,
}

impl DiffFile {
    pub fn absent() -> Self {
        DiffFile {
            id: FileId::null(),
            path: String::new(),
        }
    }
}

#[derive(Debug, PartialEq, Eq, Clone)]
pub struct TreeDelta {
    pub status: DeltaStatus,
    pub old_file: DiffFile,
    pub new_file: DiffFile,
}

pub type BackendResult<T> = Result<T, BackendError>;

#[derive(Debug, Error)]
pub enum BackendError {
    #[error("Object {hash} of type {object_type} not found")]
    ObjectNotFound { object_type: String, hash: String },
    #[error("Error when reading object {hash} of type {object_type}")]
    ReadObject {
        object_type: String,
        hash: String,
        source: Box<dyn std::error::Error + Send + Sync>,
    },
    #[error(transparent)]
    Other(Box<dyn std::error::Error + Send + Sync>),
}

impl BackendError {
    pub fn not_found(id: &impl ObjectId) -> Self {
        BackendError::ObjectNotFound {
            object_type: id.object_type(),
            hash: id.hex(),
        }
    }
}

/// Read access to a commit graph and its trees and blobs.
///
/// The engine is single-threaded; implementations are free to hold
/// non-`Sync` handles (the host moves the backend onto its worker thread
/// wholesale).
pub trait Backend: Debug {
    fn get_commit(&self, id: &CommitId) -> BackendResult<Commit>;

    fn read_file(&self, id: &FileId) -> BackendResult<BString>;

    /// Looks up `path` in the given tree. `path` is slash-separated and
    /// relative to the tree root.
    fn path_value(&self, tree: &TreeId, path: &str) -> BackendResult<Option<TreeValue>>;

    /// Diffs two trees. With `find_renames`, add/delete pairs above the
    /// provider's similarity threshold are reported as `Renamed` deltas.
    fn diff_trees(
        &self,
        old_tree: &TreeId,
        new_tree: &TreeId,
        find_renames: bool,
    ) -> BackendResult<Vec<TreeDelta>>;

    /// Diffs two file contents into a line patch. The default is the
    /// crate's own line diff so that annotations come out byte-identical
    /// no matter which backend produced the blobs.
    fn diff_file_contents(&self, old: &[u8], new: &[u8]) -> Patch {
        Patch::from_contents(old, new)
    }

    /// Whether `commit_id` has `ancestor_id` among its ancestors (a commit
    /// is its own descendant). Only consulted by debug assertions.
    fn descendant_of(&self, commit_id: &CommitId, ancestor_id: &CommitId) -> BackendResult<bool>;
}

/// Iteration order of [`RevWalk`].
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum RevWalkSort {
    /// Depth-first along parent links, most recent push first.
    #[default]
    None,
    /// Author timestamp, newest first.
    Time,
}

/// Ancestor walker over a backend's commit graph. Commits pushed onto the
/// walk are yielded along with everything reachable from them.
pub struct RevWalk<'a> {
    backend: &'a dyn Backend,
    sort: RevWalkSort,
    frontier: Vec<Commit>,
    visited: HashSet<CommitId>,
}

impl<'a> RevWalk<'a> {
    pub fn new(backend: &'a dyn Backend) -> Self {
        RevWalk {
            backend,
            sort: RevWalkSort::default(),
            frontier: vec![],
            visited: HashSet::new(),
        }
    }

    pub fn push(&mut self, id: &CommitId) -> BackendResult<()> {
        self.frontier.push(self.backend.get_commit(id)?);
        Ok(())
    }

    pub fn sort(&mut self, sort: RevWalkSort) {
        self.sort = sort;
    }

    /// Clears pushed heads and visit state so the walker can be reused.
    pub fn reset(&mut self) {
        self.frontier.clear();
        self.visited.clear();
    }
}

impl Iterator for RevWalk<'_> {
    type Item = BackendResult<Commit>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let index = match self.sort {
                RevWalkSort::None => self.frontier.len().checked_sub(1)?,
                RevWalkSort::Time => self
                    .frontier
                    .iter()
                    .enumerate()
                    .max_by_key(|(_, commit)| commit.author.timestamp.timestamp.0)
                    .map(|(i, _)| i)?,
            };
            let commit = self.frontier.swap_remove(index);
            if !self.visited.insert(commit.id.clone()) {
                continue;
            }
            for parent in &commit.parents {
                if !self.visited.contains(parent) {
                    match self.backend.get_commit(parent) {
                        Ok(parent) => self.frontier.push(parent),
                        Err(err) => return Some(Err(err)),
                    }
                }
            }
            return Some(Ok(commit));
        }
    }
}

/// `descendant_of` in terms of [`RevWalk`], for backends without a native
/// graph query.
pub fn walk_descendant_of(
    backend: &dyn Backend,
    commit_id: &CommitId,
    ancestor_id: &CommitId,
) -> BackendResult<bool> {
    let mut walk = RevWalk::new(backend);
    walk.push(commit_id)?;
    for commit in walk {
        if &commit?.id == ancestor_id {
            return Ok(true);
        }
    }
    Ok(false)
}

const WORKDIR_TREE: [u8; 20] = [0xee; 20];

/// Presents the uncommitted state of one file as a pseudo-commit on top of
/// another backend: id [`CommitId::workdir()`], parents `[head]`, and a
/// synthetic tree containing exactly `{path: blob}`.
#[derive(Debug)]
pub struct WorkdirOverlay<'a> {
    inner: &'a dyn Backend,
    seed: Commit,
    path: String,
    blob_id: FileId,
}

impl<'a> WorkdirOverlay<'a> {
    /// `blob_id` must already be readable through `inner`.
    pub fn new(inner: &'a dyn Backend, head: &Commit, path: &str, blob_id: FileId) -> Self {
        let seed = Commit {
            id: CommitId::workdir(),
            parents: vec![head.id.clone()],
            root_tree: TreeId::from_bytes(&WORKDIR_TREE),
            author: Signature {
                name: String::new(),
                email: String::new(),
                timestamp: Timestamp::now(),
            },
        };
        WorkdirOverlay {
            inner,
            seed,
            path: path.to_owned(),
            blob_id,
        }
    }

    /// The pseudo-commit to seed a trace with.
    pub fn seed(&self) -> &Commit {
        &self.seed
    }

    fn is_workdir_tree(&self, tree: &TreeId) -> bool {
        tree == &self.seed.root_tree
    }
}

impl Backend for WorkdirOverlay<'_> {
    fn get_commit(&self, id: &CommitId) -> BackendResult<Commit> {
        if id.is_workdir() {
            Ok(self.seed.clone())
        } else {
            self.inner.get_commit(id)
        }
    }

    fn read_file(&self, id: &FileId) -> BackendResult<BString> {
        self.inner.read_file(id)
    }

    fn path_value(&self, tree: &TreeId, path: &str) -> BackendResult<Option<TreeValue>> {
        if self.is_workdir_tree(tree) {
            if path == self.path {
                Ok(Some(TreeValue::File(self.blob_id.clone())))
            } else {
                Ok(None)
            }
        } else {
            self.inner.path_value(tree, path)
        }
    }

    fn diff_trees(
        &self,
        old_tree: &TreeId,
        new_tree: &TreeId,
        find_renames: bool,
    ) -> BackendResult<Vec<TreeDelta>> {
        if self.is_workdir_tree(new_tree) {
            // The synthetic tree holds a single file, so the only deltas
            // the walker can learn about are for that path.
            let new_file = DiffFile {
                id: self.blob_id.clone(),
                path: self.path.clone(),
            };
            let delta = match self.inner.path_value(old_tree, &self.path)? {
                Some(TreeValue::File(old_id)) if old_id == self.blob_id => None,
                Some(TreeValue::File(old_id)) => Some(TreeDelta {
                    status: DeltaStatus::Modified,
                    old_file: DiffFile {
                        id: old_id,
                        path: self.path.clone(),
                    },
                    new_file,
                }),
                _ => Some(TreeDelta {
                    status: DeltaStatus::Added,
                    old_file: DiffFile::absent(),
                    new_file,
                }),
            };
            Ok(delta.into_iter().collect())
        } else if self.is_workdir_tree(old_tree) {
            // The walker only ever diffs an older tree against a newer one.
            Ok(vec![])
        } else {
            self.inner.diff_trees(old_tree, new_tree, find_renames)
        }
    }

    fn diff_file_contents(&self, old: &[u8], new: &[u8]) -> Patch {
        self.inner.diff_file_contents(old, new)
    }

    fn descendant_of(&self, commit_id: &CommitId, ancestor_id: &CommitId) -> BackendResult<bool> {
        if ancestor_id.is_workdir() {
            return Ok(commit_id.is_workdir());
        }
        if commit_id.is_workdir() {
            let head = &self.seed.parents[0];
            return Ok(head == ancestor_id || self.inner.descendant_of(head, ancestor_id)?);
        }
        self.inner.descendant_of(commit_id, ancestor_id)
    }
}
