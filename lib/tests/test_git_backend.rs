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

use std::fs;

use filetrace_lib::annotate::annotate_trace;
use filetrace_lib::annotate::AnnotateOptions;
use filetrace_lib::backend::Backend;
use filetrace_lib::backend::CommitId;
use filetrace_lib::backend::DeltaStatus;
use filetrace_lib::git_backend::GitBackend;
use filetrace_lib::object_id::ObjectId;
use filetrace_lib::trace::trace_file;
use filetrace_lib::trace::TraceOptions;
use pretty_assertions::assert_eq;

fn signature() -> git2::Signature<'static> {
    git2::Signature::new("Some One", "some.one@example.com", &git2::Time::new(1700000000, 0))
        .unwrap()
}

/// Writes a commit whose tree holds exactly `files`, advancing HEAD.
fn commit_files(
    repo: &git2::Repository,
    message: &str,
    parents: &[git2::Oid],
    files: &[(&str, &str)],
) -> git2::Oid {
    let mut builder = repo.treebuilder(None).unwrap();
    for (path, content) in files {
        let blob = repo.blob(content.as_bytes()).unwrap();
        builder.insert(path, blob, 0o100644).unwrap();
    }
    let tree = repo.find_tree(builder.write().unwrap()).unwrap();
    let sig = signature();
    let parents: Vec<git2::Commit> = parents
        .iter()
        .map(|&oid| repo.find_commit(oid).unwrap())
        .collect();
    let parent_refs: Vec<&git2::Commit> = parents.iter().collect();
    repo.commit(Some("HEAD"), &sig, &sig, message, &tree, &parent_refs)
        .unwrap()
}

fn commit_id(oid: git2::Oid) -> CommitId {
    CommitId::from_bytes(oid.as_bytes())
}

#[test]
fn test_git_trace_and_annotate_through_rename() {
    let temp = tempfile::tempdir().unwrap();
    let repo = git2::Repository::init(temp.path()).unwrap();

    let c1 = commit_files(&repo, "add hello", &[], &[("hello.txt", "alpha\nbeta\n")]);
    let c2 = commit_files(&repo, "rename", &[c1], &[("greeting.txt", "alpha\nbeta\n")]);
    let c3 = commit_files(
        &repo,
        "extend",
        &[c2],
        &[("greeting.txt", "alpha\nbeta\ngamma\n")],
    );

    let backend = GitBackend::open(temp.path()).unwrap();
    let seed = backend.get_commit(&commit_id(c3)).unwrap();
    let mut trace = trace_file(
        &backend,
        "greeting.txt",
        &seed,
        &TraceOptions::default(),
        &mut |_| true,
    )
    .unwrap();

    let summary: Vec<(CommitId, DeltaStatus, String)> = trace
        .walk_graph(trace.root())
        .map(|id| {
            let node = trace.node(id);
            (node.commit_id.clone(), node.status, node.path.clone())
        })
        .collect();
    assert_eq!(
        summary,
        vec![
            (commit_id(c3), DeltaStatus::Modified, "greeting.txt".to_owned()),
            (commit_id(c2), DeltaStatus::Renamed, "greeting.txt".to_owned()),
            (commit_id(c1), DeltaStatus::Added, "hello.txt".to_owned()),
        ]
    );

    annotate_trace(&backend, &mut trace, &AnnotateOptions::default(), &mut |_| true).unwrap();
    let annotated = trace.node(trace.root()).annotated_file.as_ref().unwrap();
    let origins: Vec<CommitId> = annotated.lines[1..]
        .iter()
        .map(|line| trace.node(line.node).commit_id.clone())
        .collect();
    assert_eq!(origins, vec![commit_id(c1), commit_id(c1), commit_id(c3)]);
}

#[test]
fn test_git_workdir_seed() {
    let temp = tempfile::tempdir().unwrap();
    let repo = git2::Repository::init(temp.path()).unwrap();
    commit_files(&repo, "add file", &[], &[("notes.txt", "committed\n")]);
    fs::write(
        temp.path().join("notes.txt"),
        "committed\nuncommitted\n",
    )
    .unwrap();

    let backend = GitBackend::open(temp.path()).unwrap();
    let overlay = backend.workdir_seed("notes.txt").unwrap();
    let seed = overlay.seed().clone();
    assert!(seed.id.is_workdir());

    let mut trace = trace_file(
        &overlay,
        "notes.txt",
        &seed,
        &TraceOptions::default(),
        &mut |_| true,
    )
    .unwrap();
    annotate_trace(&overlay, &mut trace, &AnnotateOptions::default(), &mut |_| true).unwrap();

    let annotated = trace.node(trace.root()).annotated_file.as_ref().unwrap();
    assert_eq!(annotated.line_count(), 2);
    assert!(!trace.node(annotated.lines[1].node).commit_id.is_workdir());
    assert!(trace.node(annotated.lines[2].node).commit_id.is_workdir());
}

#[test]
fn test_git_descendant_of() {
    let temp = tempfile::tempdir().unwrap();
    let repo = git2::Repository::init(temp.path()).unwrap();
    let c1 = commit_files(&repo, "one", &[], &[("f", "1\n")]);
    let c2 = commit_files(&repo, "two", &[c1], &[("f", "2\n")]);

    let backend = GitBackend::open(temp.path()).unwrap();
    assert!(backend.descendant_of(&commit_id(c2), &commit_id(c1)).unwrap());
    assert!(!backend.descendant_of(&commit_id(c1), &commit_id(c2)).unwrap());
    assert!(backend.descendant_of(&commit_id(c1), &commit_id(c1)).unwrap());
}

#[test]
fn test_git_path_value_distinguishes_trees() {
    let temp = tempfile::tempdir().unwrap();
    let repo = git2::Repository::init(temp.path()).unwrap();

    // Build a nested tree by hand: dir/inner.txt
    let blob = repo.blob(b"data\n").unwrap();
    let mut inner = repo.treebuilder(None).unwrap();
    inner.insert("inner.txt", blob, 0o100644).unwrap();
    let inner_id = inner.write().unwrap();
    let mut root = repo.treebuilder(None).unwrap();
    root.insert("dir", inner_id, 0o040000).unwrap();
    let root_id = root.write().unwrap();
    let tree = repo.find_tree(root_id).unwrap();
    let sig = signature();
    let c1 = repo
        .commit(Some("HEAD"), &sig, &sig, "nested", &tree, &[])
        .unwrap();

    let backend = GitBackend::open(temp.path()).unwrap();
    let commit = backend.get_commit(&commit_id(c1)).unwrap();
    use filetrace_lib::backend::TreeValue;
    assert!(matches!(
        backend.path_value(&commit.root_tree, "dir/inner.txt").unwrap(),
        Some(TreeValue::File(_))
    ));
    assert!(matches!(
        backend.path_value(&commit.root_tree, "dir").unwrap(),
        Some(TreeValue::Tree(_))
    ));
    assert_eq!(backend.path_value(&commit.root_tree, "missing").unwrap(), None);
}
