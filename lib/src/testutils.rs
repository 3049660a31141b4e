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

//! In-memory [`Backend`] for tests: content-addressed blobs and trees,
//! label-addressed commits, and a line-based similarity scorer for rename
//! detection.

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::collections::HashMap;

use blake2::Blake2b512;
use blake2::Digest as _;
use bstr::BString;

use crate::backend::walk_descendant_of;
use crate::backend::Backend;
use crate::backend::BackendError;
use crate::backend::BackendResult;
use crate::backend::Commit;
use crate::backend::CommitId;
use crate::backend::DeltaStatus;
use crate::backend::DiffFile;
use crate::backend::FileId;
use crate::backend::MillisSinceEpoch;
use crate::backend::Signature;
use crate::backend::Timestamp;
use crate::backend::TreeDelta;
use crate::backend::TreeId;
use crate::backend::TreeValue;
use crate::diff;
use crate::diff::DiffOrigin;
use crate::diff::Patch;
use crate::object_id::id7;
use crate::object_id::ObjectId;

/// Similarity ratio above which an add/delete pair counts as a rename.
const RENAME_THRESHOLD: f64 = 0.5;

fn hash20(parts: &[&[u8]]) -> Vec<u8> {
    let mut hasher = Blake2b512::new();
    for part in parts {
        hasher.update(part);
        hasher.update([0xff]);
    }
    hasher.finalize()[..20].to_vec()
}

/// Flat tree: full slash-separated paths mapped straight to blobs.
#[derive(Clone, Debug, Default)]
struct Tree {
    entries: BTreeMap<String, FileId>,
}

#[derive(Debug, Default)]
pub struct TestBackend {
    commits: RefCell<HashMap<CommitId, Commit>>,
    trees: RefCell<HashMap<TreeId, Tree>>,
    files: RefCell<HashMap<FileId, BString>>,
    labels: RefCell<HashMap<CommitId, String>>,
}

impl TestBackend {
    pub fn new() -> Self {
        TestBackend::default()
    }

    /// Stores a blob. Identical contents share one id, so renames without
    /// a content change keep their blob id across trees.
    pub fn add_file(&self, data: &[u8]) -> FileId {
        let id = FileId::new(hash20(&[b"file".as_slice(), data]));
        self.files.borrow_mut().insert(id.clone(), BString::from(data));
        id
    }

    pub fn add_tree(&self, entries: &[(&str, FileId)]) -> TreeId {
        let mut tree = Tree::default();
        let mut parts: Vec<Vec<u8>> = vec![b"tree".to_vec()];
        for (path, file_id) in entries {
            parts.push(path.as_bytes().to_vec());
            parts.push(file_id.to_bytes());
            tree.entries.insert((*path).to_owned(), file_id.clone());
        }
        let part_refs: Vec<&[u8]> = parts.iter().map(|part| part.as_slice()).collect();
        let id = TreeId::new(hash20(&part_refs));
        self.trees.borrow_mut().insert(id.clone(), tree);
        id
    }

    /// Creates a commit whose id is derived from `label`, so tests can
    /// assert attributions by label. Labels must be unique per backend.
    pub fn commit(&self, label: &str, parents: &[&CommitId], files: &[(&str, &str)]) -> Commit {
        let entries: Vec<(&str, FileId)> = files
            .iter()
            .map(|(path, content)| (*path, self.add_file(content.as_bytes())))
            .collect();
        let tree = self.add_tree(&entries);
        let id = CommitId::new(hash20(&[b"commit".as_slice(), label.as_bytes()]));
        assert!(
            self.labels
                .borrow_mut()
                .insert(id.clone(), label.to_owned())
                .is_none(),
            "duplicate commit label {label:?}"
        );
        let commit = Commit {
            id,
            parents: parents.iter().map(|&id| id.clone()).collect(),
            root_tree: tree,
            author: Signature {
                name: "Some One".to_owned(),
                email: "some.one@example.com".to_owned(),
                // stable timestamps for reproducible output
                timestamp: Timestamp {
                    timestamp: MillisSinceEpoch(0),
                    tz_offset: 0,
                },
            },
        };
        self.commits
            .borrow_mut()
            .insert(commit.id.clone(), commit.clone());
        commit
    }

    /// The label a commit was created with, falling back to a short hex id
    /// for foreign commits (e.g. the workdir pseudo-commit).
    pub fn label(&self, id: &CommitId) -> String {
        self.labels
            .borrow()
            .get(id)
            .cloned()
            .unwrap_or_else(|| id7(id))
    }

    /// Line-based similarity of two blobs in 0.0..=1.0.
    fn similarity(&self, old_id: &FileId, new_id: &FileId) -> BackendResult<f64> {
        let old = self.read_file(old_id)?;
        let new = self.read_file(new_id)?;
        let old_lines = diff::count_lines(&old);
        let new_lines = diff::count_lines(&new);
        if old_lines + new_lines == 0 {
            return Ok(1.0);
        }
        let patch = Patch::from_contents(&old, &new);
        if patch.is_binary {
            return Ok(if old == new { 1.0 } else { 0.0 });
        }
        let deleted = patch
            .hunks
            .iter()
            .flat_map(|hunk| &hunk.lines)
            .filter(|line| line.origin == DiffOrigin::Deletion)
            .count();
        let common = old_lines - deleted;
        Ok(2.0 * common as f64 / (old_lines + new_lines) as f64)
    }

    fn detect_renames(&self, deltas: Vec<TreeDelta>) -> BackendResult<Vec<TreeDelta>> {
        let mut result = vec![];
        let mut adds = vec![];
        let mut dels = vec![];
        for delta in deltas {
            match delta.status {
                DeltaStatus::Added => adds.push(delta),
                DeltaStatus::Deleted => dels.push(delta),
                _ => result.push(delta),
            }
        }
        for add in adds {
            let mut best: Option<(usize, f64)> = None;
            for (i, del) in dels.iter().enumerate() {
                let score = if del.old_file.id == add.new_file.id {
                    1.0
                } else {
                    self.similarity(&del.old_file.id, &add.new_file.id)?
                };
                if score >= RENAME_THRESHOLD && best.map_or(true, |(_, s)| score > s) {
                    best = Some((i, score));
                }
            }
            match best {
                Some((i, _score)) => {
                    let del = dels.remove(i);
                    result.push(TreeDelta {
                        status: DeltaStatus::Renamed,
                        old_file: del.old_file,
                        new_file: add.new_file,
                    });
                }
                None => result.push(add),
            }
        }
        result.extend(dels);
        Ok(result)
    }

    fn tree(&self, id: &TreeId) -> BackendResult<Tree> {
        self.trees
            .borrow()
            .get(id)
            .cloned()
            .ok_or_else(|| BackendError::not_found(id))
    }
}

impl Backend for TestBackend {
    fn get_commit(&self, id: &CommitId) -> BackendResult<Commit> {
        self.commits
            .borrow()
            .get(id)
            .cloned()
            .ok_or_else(|| BackendError::not_found(id))
    }

    fn read_file(&self, id: &FileId) -> BackendResult<BString> {
        self.files
            .borrow()
            .get(id)
            .cloned()
            .ok_or_else(|| BackendError::not_found(id))
    }

    fn path_value(&self, tree: &TreeId, path: &str) -> BackendResult<Option<TreeValue>> {
        Ok(self
            .tree(tree)?
            .entries
            .get(path)
            .cloned()
            .map(TreeValue::File))
    }

    fn diff_trees(
        &self,
        old_tree: &TreeId,
        new_tree: &TreeId,
        find_renames: bool,
    ) -> BackendResult<Vec<TreeDelta>> {
        let old = self.tree(old_tree)?;
        let new = self.tree(new_tree)?;
        let mut deltas = vec![];
        for (path, old_id) in &old.entries {
            match new.entries.get(path) {
                None => deltas.push(TreeDelta {
                    status: DeltaStatus::Deleted,
                    old_file: DiffFile {
                        id: old_id.clone(),
                        path: path.clone(),
                    },
                    new_file: DiffFile::absent(),
                }),
                Some(new_id) if new_id != old_id => deltas.push(TreeDelta {
                    status: DeltaStatus::Modified,
                    old_file: DiffFile {
                        id: old_id.clone(),
                        path: path.clone(),
                    },
                    new_file: DiffFile {
                        id: new_id.clone(),
                        path: path.clone(),
                    },
                }),
                Some(_) => {}
            }
        }
        for (path, new_id) in &new.entries {
            if !old.entries.contains_key(path) {
                deltas.push(TreeDelta {
                    status: DeltaStatus::Added,
                    old_file: DiffFile::absent(),
                    new_file: DiffFile {
                        id: new_id.clone(),
                        path: path.clone(),
                    },
                });
            }
        }
        if find_renames {
            deltas = self.detect_renames(deltas)?;
        }
        Ok(deltas)
    }

    fn descendant_of(&self, commit_id: &CommitId, ancestor_id: &CommitId) -> BackendResult<bool> {
        walk_descendant_of(self, commit_id, ancestor_id)
    }
}
