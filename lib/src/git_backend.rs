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

//! [`Backend`] over a real git repository via libgit2.

use std::fmt::Debug;
use std::fmt::Formatter;
use std::path::Path;

use bstr::BString;

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
use crate::backend::WorkdirOverlay;
use crate::object_id::ObjectId;

pub struct GitBackend {
    repo: git2::Repository,
}

impl Debug for GitBackend {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GitBackend")
            .field("path", &self.repo.path())
            .finish()
    }
}

fn gerr(err: git2::Error) -> BackendError {
    BackendError::Other(Box::new(err))
}

fn find_err(err: git2::Error, id: &impl ObjectId) -> BackendError {
    if err.code() == git2::ErrorCode::NotFound {
        BackendError::not_found(id)
    } else {
        gerr(err)
    }
}

fn git_oid(id: &impl ObjectId) -> BackendResult<git2::Oid> {
    git2::Oid::from_bytes(id.as_bytes()).map_err(gerr)
}

fn convert_commit(commit: &git2::Commit) -> Commit {
    let author = commit.author();
    Commit {
        id: CommitId::from_bytes(commit.id().as_bytes()),
        parents: commit
            .parent_ids()
            .map(|id| CommitId::from_bytes(id.as_bytes()))
            .collect(),
        root_tree: TreeId::from_bytes(commit.tree_id().as_bytes()),
        author: Signature {
            name: author.name().unwrap_or_default().to_owned(),
            email: author.email().unwrap_or_default().to_owned(),
            timestamp: Timestamp {
                timestamp: MillisSinceEpoch(author.when().seconds() * 1000),
                tz_offset: author.when().offset_minutes(),
            },
        },
    }
}

fn convert_delta_status(status: git2::Delta) -> DeltaStatus {
    match status {
        git2::Delta::Unmodified => DeltaStatus::Unmodified,
        git2::Delta::Added => DeltaStatus::Added,
        git2::Delta::Deleted => DeltaStatus::Deleted,
        git2::Delta::Renamed | git2::Delta::Copied => DeltaStatus::Renamed,
        git2::Delta::Unreadable => DeltaStatus::Unreadable,
        _ => DeltaStatus::Modified,
    }
}

fn convert_diff_file(file: git2::DiffFile<'_>) -> DiffFile {
    DiffFile {
        id: FileId::from_bytes(file.id().as_bytes()),
        path: file
            .path()
            .map(|path| path.to_string_lossy().into_owned())
            .unwrap_or_default(),
    }
}

impl GitBackend {
    /// Discovers the repository containing `path`.
    pub fn open(path: &Path) -> BackendResult<Self> {
        let repo = git2::Repository::discover(path).map_err(gerr)?;
        Ok(GitBackend { repo })
    }

    pub fn workdir(&self) -> Option<&Path> {
        self.repo.workdir()
    }

    pub fn head_commit(&self) -> BackendResult<Commit> {
        let head = self
            .repo
            .head()
            .and_then(|head| head.peel_to_commit())
            .map_err(gerr)?;
        Ok(convert_commit(&head))
    }

    /// Snapshots the working-directory state of `rel_path` into the object
    /// database and wraps this backend with a pseudo-commit for it.
    pub fn workdir_seed(&self, rel_path: &str) -> BackendResult<WorkdirOverlay<'_>> {
        let head = self.head_commit()?;
        let workdir = self.repo.workdir().ok_or_else(|| {
            BackendError::Other("bare repository has no working directory".into())
        })?;
        let data = std::fs::read(workdir.join(rel_path))
            .map_err(|err| BackendError::Other(Box::new(err)))?;
        let blob_oid = self.repo.blob(&data).map_err(gerr)?;
        Ok(WorkdirOverlay::new(
            self,
            &head,
            rel_path,
            FileId::from_bytes(blob_oid.as_bytes()),
        ))
    }
}

impl Backend for GitBackend {
    fn get_commit(&self, id: &CommitId) -> BackendResult<Commit> {
        let commit = self
            .repo
            .find_commit(git_oid(id)?)
            .map_err(|err| find_err(err, id))?;
        Ok(convert_commit(&commit))
    }

    fn read_file(&self, id: &FileId) -> BackendResult<BString> {
        let blob = self
            .repo
            .find_blob(git_oid(id)?)
            .map_err(|err| find_err(err, id))?;
        Ok(BString::from(blob.content()))
    }

    fn path_value(&self, tree: &TreeId, path: &str) -> BackendResult<Option<TreeValue>> {
        let tree = self
            .repo
            .find_tree(git_oid(tree)?)
            .map_err(|err| find_err(err, tree))?;
        match tree.get_path(Path::new(path)) {
            Ok(entry) => Ok(match entry.kind() {
                Some(git2::ObjectType::Blob) => {
                    Some(TreeValue::File(FileId::from_bytes(entry.id().as_bytes())))
                }
                Some(git2::ObjectType::Tree) => {
                    Some(TreeValue::Tree(TreeId::from_bytes(entry.id().as_bytes())))
                }
                // Submodules and the like don't participate in tracing.
                _ => None,
            }),
            Err(err) if err.code() == git2::ErrorCode::NotFound => Ok(None),
            Err(err) => Err(gerr(err)),
        }
    }

    fn diff_trees(
        &self,
        old_tree: &TreeId,
        new_tree: &TreeId,
        find_renames: bool,
    ) -> BackendResult<Vec<TreeDelta>> {
        let old = self
            .repo
            .find_tree(git_oid(old_tree)?)
            .map_err(|err| find_err(err, old_tree))?;
        let new = self
            .repo
            .find_tree(git_oid(new_tree)?)
            .map_err(|err| find_err(err, new_tree))?;
        let mut diff = self
            .repo
            .diff_tree_to_tree(Some(&old), Some(&new), None)
            .map_err(gerr)?;
        if find_renames {
            // Similarity threshold stays at libgit2's default.
            let mut opts = git2::DiffFindOptions::new();
            diff.find_similar(Some(&mut opts)).map_err(gerr)?;
        }
        Ok(diff
            .deltas()
            .map(|delta| TreeDelta {
                status: convert_delta_status(delta.status()),
                old_file: convert_diff_file(delta.old_file()),
                new_file: convert_diff_file(delta.new_file()),
            })
            .collect())
    }

    fn descendant_of(&self, commit_id: &CommitId, ancestor_id: &CommitId) -> BackendResult<bool> {
        if commit_id == ancestor_id {
            return Ok(true);
        }
        self.repo
            .graph_descendant_of(git_oid(commit_id)?, git_oid(ancestor_id)?)
            .map_err(gerr)
    }
}
