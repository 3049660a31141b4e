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

use std::fmt::Write as _;
use std::rc::Rc;

use filetrace_lib::annotate::annotate_trace;
use filetrace_lib::annotate::AnnotateOptions;
use filetrace_lib::backend::Commit;
use filetrace_lib::backend::WorkdirOverlay;
use filetrace_lib::testutils::TestBackend;
use filetrace_lib::trace::trace_file;
use filetrace_lib::trace::Trace;
use filetrace_lib::trace::TraceOptions;

fn traced(backend: &TestBackend, path: &str, seed: &Commit) -> Trace {
    let mut trace =
        trace_file(backend, path, seed, &TraceOptions::default(), &mut |_| true).unwrap();
    annotate_trace(backend, &mut trace, &AnnotateOptions::default(), &mut |_| true).unwrap();
    trace
}

fn render(backend: &TestBackend, trace: &Trace) -> String {
    let root = trace.node(trace.root());
    let annotated = root.annotated_file.as_ref().unwrap();
    let mut output = String::new();
    for line in &annotated.lines[1..] {
        let node = trace.node(line.node);
        write!(output, "{}: {}", backend.label(&node.commit_id), line.text).unwrap();
    }
    output
}

fn annotate(backend: &TestBackend, path: &str, seed: &Commit) -> String {
    let trace = traced(backend, path, seed);
    render(backend, &trace)
}

#[test]
fn test_annotate_linear() {
    let backend = TestBackend::new();
    let commit1 = backend.commit("commit1", &[], &[("file", "")]);
    let commit2 = backend.commit("commit2", &[&commit1.id], &[("file", "2a\n2b\n")]);
    let commit3 = backend.commit("commit3", &[&commit2.id], &[("file", "2b\n3\n")]);

    insta::assert_snapshot!(annotate(&backend, "file", &commit2), @r#"
    commit2: 2a
    commit2: 2b
    "#);
    insta::assert_snapshot!(annotate(&backend, "file", &commit3), @r#"
    commit2: 2b
    commit3: 3
    "#);
}

#[test]
fn test_annotate_merge_simple() {
    // 4    "2 1 3"
    // |\
    // | 3  "1 3"
    // 2 |  "2 1"
    // |/
    // 1    "1"
    let backend = TestBackend::new();
    let commit1 = backend.commit("commit1", &[], &[("file", "1\n")]);
    let commit2 = backend.commit("commit2", &[&commit1.id], &[("file", "2\n1\n")]);
    let commit3 = backend.commit("commit3", &[&commit1.id], &[("file", "1\n3\n")]);
    let commit4 = backend.commit(
        "commit4",
        &[&commit2.id, &commit3.id],
        &[("file", "2\n1\n3\n")],
    );

    insta::assert_snapshot!(annotate(&backend, "file", &commit4), @r#"
    commit2: 2
    commit1: 1
    commit3: 3
    "#);
}

#[test]
fn test_annotate_merge_split_interleaved() {
    // 6    "1a 4 1b 6 2a 5 2b"
    // |\
    // | 5  "1b 5 2b"
    // 4 |  "1a 4 2a"
    // |/
    // 3    "1a 1b 2a 2b"
    // |\
    // | 2  "2a 2b"
    // 1    "1a 1b"
    let backend = TestBackend::new();
    let commit1 = backend.commit("commit1", &[], &[("file", "1a\n1b\n")]);
    let commit2 = backend.commit("commit2", &[], &[("file", "2a\n2b\n")]);
    let commit3 = backend.commit(
        "commit3",
        &[&commit1.id, &commit2.id],
        &[("file", "1a\n1b\n2a\n2b\n")],
    );
    let commit4 = backend.commit("commit4", &[&commit3.id], &[("file", "1a\n4\n2a\n")]);
    let commit5 = backend.commit("commit5", &[&commit3.id], &[("file", "1b\n5\n2b\n")]);
    let commit6 = backend.commit(
        "commit6",
        &[&commit4.id, &commit5.id],
        &[("file", "1a\n4\n1b\n6\n2a\n5\n2b\n")],
    );

    insta::assert_snapshot!(annotate(&backend, "file", &commit6), @r#"
    commit1: 1a
    commit4: 4
    commit1: 1b
    commit6: 6
    commit2: 2a
    commit5: 5
    commit2: 2b
    "#);
}

#[test]
fn test_annotate_file_added_in_merge_commit() {
    // The file comes from the side branch; the merge adds a second line.
    // Line 1 belongs to the side branch, line 2 to the merge itself.
    let backend = TestBackend::new();
    let commit1 = backend.commit("commit1", &[], &[("other", "x\n")]);
    let commit2 = backend.commit(
        "commit2",
        &[&commit1.id],
        &[("other", "x\n"), ("b2.txt", "one\n")],
    );
    let commit3 = backend.commit("commit3", &[&commit1.id], &[("other", "y\n")]);
    let commit4 = backend.commit(
        "commit4",
        &[&commit3.id, &commit2.id],
        &[("other", "y\n"), ("b2.txt", "one\ntwo\n")],
    );

    insta::assert_snapshot!(annotate(&backend, "b2.txt", &commit4), @r#"
    commit2: one
    commit4: two
    "#);
}

#[test]
fn test_annotate_file_taken_verbatim_from_side_branch() {
    // The merge adopts the side branch's file unchanged: the merge node
    // shares the side branch's annotated file outright.
    let backend = TestBackend::new();
    let commit1 = backend.commit("commit1", &[], &[("other", "x\n")]);
    let commit2 = backend.commit(
        "commit2",
        &[&commit1.id],
        &[("other", "x\n"), ("b2.txt", "one\ntwo\n")],
    );
    let commit3 = backend.commit("commit3", &[&commit1.id], &[("other", "y\n")]);
    let commit4 = backend.commit(
        "commit4",
        &[&commit3.id, &commit2.id],
        &[("other", "y\n"), ("b2.txt", "one\ntwo\n")],
    );

    let trace = traced(&backend, "b2.txt", &commit4);
    insta::assert_snapshot!(render(&backend, &trace), @r#"
    commit2: one
    commit2: two
    "#);

    let root = trace.node(trace.root());
    let side = trace.node(root.parents[0]);
    assert!(Rc::ptr_eq(
        root.annotated_file.as_ref().unwrap(),
        side.annotated_file.as_ref().unwrap()
    ));
}

#[test]
fn test_annotate_pure_rename_reuses_lines() {
    let backend = TestBackend::new();
    let content = "alpha\nbeta\n";
    let commit1 = backend.commit("commit1", &[], &[("foo", content)]);
    let commit2 = backend.commit("commit2", &[&commit1.id], &[("bar", content)]);

    let trace = traced(&backend, "bar", &commit2);
    insta::assert_snapshot!(render(&backend, &trace), @r#"
    commit1: alpha
    commit1: beta
    "#);

    // the rename node aliases its parent's annotated file, line for line
    let root = trace.node(trace.root());
    let parent = trace.node(root.parents[0]);
    let root_file = root.annotated_file.as_ref().unwrap();
    let parent_file = parent.annotated_file.as_ref().unwrap();
    assert!(Rc::ptr_eq(root_file, parent_file));
    // no revision number was spent on the rename
    assert_eq!(root.revision_number, 0);
    assert_ne!(parent.revision_number, 0);
}

#[test]
fn test_annotate_line_identity_shared_across_revisions() {
    let backend = TestBackend::new();
    let commit1 = backend.commit("commit1", &[], &[("file", "keep\n")]);
    let commit2 = backend.commit("commit2", &[&commit1.id], &[("file", "keep\nnew\n")]);

    let trace = traced(&backend, "file", &commit2);
    let root = trace.node(trace.root());
    let parent = trace.node(root.parents[0]);
    let root_file = root.annotated_file.as_ref().unwrap();
    let parent_file = parent.annotated_file.as_ref().unwrap();

    // the carried-over line is the same allocation in both revisions
    assert!(Rc::ptr_eq(&root_file.lines[1], &parent_file.lines[1]));
    assert_eq!(trace.node(root_file.lines[2].node).commit_id, commit2.id);
}

#[test]
fn test_annotate_binary_file_degrades_to_placeholder() {
    let backend = TestBackend::new();
    let commit1 = backend.commit("commit1", &[], &[("blob.bin", "PK\x00\x01stuff")]);
    let commit2 = backend.commit("commit2", &[&commit1.id], &[("blob.bin", "PK\x00\x02other")]);

    let trace = traced(&backend, "blob.bin", &commit2);
    let root_file = trace.node(trace.root()).annotated_file.as_ref().unwrap();
    assert!(root_file.binary);
    // sentinel + a single placeholder line
    assert_eq!(root_file.lines.len(), 2);
}

#[test]
fn test_annotate_stop_commit_leaves_newer_nodes_unannotated() {
    let backend = TestBackend::new();
    let commit1 = backend.commit("commit1", &[], &[("file", "1\n")]);
    let commit2 = backend.commit("commit2", &[&commit1.id], &[("file", "1\n2\n")]);
    let commit3 = backend.commit("commit3", &[&commit2.id], &[("file", "1\n2\n3\n")]);

    let mut trace = trace_file(
        &backend,
        "file",
        &commit3,
        &TraceOptions::default(),
        &mut |_| true,
    )
    .unwrap();
    let options = AnnotateOptions {
        stop_at: Some(commit2.id.clone()),
        ..Default::default()
    };
    annotate_trace(&backend, &mut trace, &options, &mut |_| true).unwrap();

    let order: Vec<_> = trace.walk_graph(trace.root()).collect();
    assert!(trace.node(order[0]).annotated_file.is_none());
    assert!(trace.node(order[1]).annotated_file.is_some());
    assert!(trace.node(order[2]).annotated_file.is_some());
}

#[test]
fn test_annotate_reruns_after_clearing() {
    let backend = TestBackend::new();
    let commit1 = backend.commit("commit1", &[], &[("file", "1\n")]);
    let commit2 = backend.commit("commit2", &[&commit1.id], &[("file", "1\n2\n")]);

    let mut trace = traced(&backend, "file", &commit2);
    let first = render(&backend, &trace);

    trace.clear_annotations();
    assert!(trace.node(trace.root()).annotated_file.is_none());
    assert_eq!(trace.node(trace.root()).revision_number, 0);

    annotate_trace(&backend, &mut trace, &AnnotateOptions::default(), &mut |_| true).unwrap();
    assert_eq!(render(&backend, &trace), first);
}

#[test]
fn test_annotate_workdir_pseudo_commit() {
    let backend = TestBackend::new();
    let commit1 = backend.commit("commit1", &[], &[("file", "committed\n")]);
    let workdir_blob = backend.add_file(b"committed\nuncommitted\n");
    let overlay = WorkdirOverlay::new(&backend, &commit1, "file", workdir_blob);

    let seed = overlay.seed().clone();
    let mut trace = trace_file(
        &overlay,
        "file",
        &seed,
        &TraceOptions::default(),
        &mut |_| true,
    )
    .unwrap();
    annotate_trace(&overlay, &mut trace, &AnnotateOptions::default(), &mut |_| true).unwrap();

    let root = trace.node(trace.root());
    assert!(root.commit_id.is_workdir());
    let annotated = root.annotated_file.as_ref().unwrap();
    assert_eq!(
        trace.node(annotated.lines[1].node).commit_id,
        commit1.id
    );
    assert!(trace.node(annotated.lines[2].node).commit_id.is_workdir());
}

#[test]
fn test_annotate_skimmed_trace_matches_plain() {
    let backend = TestBackend::new();
    let mut head = backend.commit("commit0", &[], &[("file", "base\n")]);
    for i in 1..40 {
        let content = if i < 25 { "base\n" } else { "base\nlate\n" };
        let churn = format!("noise {i}\n");
        head = backend.commit(
            &format!("commit{i}"),
            &[&head.id],
            &[("file", content), ("churn", churn.as_str())],
        );
    }

    let plain = annotate(&backend, "file", &head);

    let mut trace = trace_file(
        &backend,
        "file",
        &head,
        &TraceOptions {
            skim_interval: 6,
            ..Default::default()
        },
        &mut |_| true,
    )
    .unwrap();
    annotate_trace(&backend, &mut trace, &AnnotateOptions::default(), &mut |_| true).unwrap();
    assert_eq!(plain, render(&backend, &trace));
}
