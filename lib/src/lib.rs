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

//! Trace the relevant commits in a file's history and annotate (blame) it.
//!
//! The [`trace`] module walks the commit graph backward from a seed
//! revision and builds a pruned DAG of the file's significant revisions;
//! the [`annotate`] module then attributes every line of every reachable
//! revision to the commit that introduced it. This can be much faster than
//! per-revision blame when annotations are wanted at all points of the
//! file's history.

#![deny(unused_must_use)]

pub mod annotate;
pub mod backend;
pub mod diff;
pub mod git_backend;
pub mod object_id;
pub mod testutils;
pub mod trace;
