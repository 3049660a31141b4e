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

//! Debug driver for the trace/blame engine: traces a file's history from
//! the working-directory state of a git repository and prints per-line
//! annotations.

use std::fmt::Write as _;
use std::path::Path;
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Instant;

use bstr::BStr;
use bstr::ByteSlice as _;
use clap::Parser;
use filetrace_lib::annotate::annotate_trace;
use filetrace_lib::annotate::AnnotateError;
use filetrace_lib::annotate::AnnotateOptions;
use filetrace_lib::backend::Backend;
use filetrace_lib::backend::BackendError;
use filetrace_lib::backend::Timestamp;
use filetrace_lib::git_backend::GitBackend;
use filetrace_lib::object_id::id7;
use filetrace_lib::trace::trace_file;
use filetrace_lib::trace::Trace;
use filetrace_lib::trace::TraceError;
use filetrace_lib::trace::TraceOptions;
use thiserror::Error;

/// Filetrace trace/blame tool.
#[derive(Clone, Debug, Parser)]
#[command(name = "filetrace", version)]
struct Args {
    /// File path
    path: PathBuf,
    /// Print trace (file history)
    #[arg(short = 't', long = "trace")]
    dump_trace: bool,
    /// Don't print annotations
    #[arg(short, long)]
    quiet: bool,
    /// Skimming interval
    #[arg(short, long, value_name = "N", default_value_t = 0)]
    skim: usize,
    /// Max breadth level
    #[arg(short, long, value_name = "N", default_value_t = 0x3fff_ffff)]
    max_level: u32,
    /// Benchmark mode
    #[arg(short, long)]
    benchmark: bool,
}

#[derive(Debug, Error)]
enum CommandError {
    #[error(transparent)]
    Backend(#[from] BackendError),
    #[error(transparent)]
    Trace(#[from] TraceError),
    #[error(transparent)]
    Annotate(#[from] AnnotateError),
    #[error("{0}")]
    Path(String),
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    match run(&args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("Error: {err}");
            ExitCode::FAILURE
        }
    }
}

fn run(args: &Args) -> Result<(), CommandError> {
    let backend = GitBackend::open(&args.path)?;
    let rel_path = repo_relative_path(&backend, &args.path)?;
    let overlay = backend.workdir_seed(&rel_path)?;
    let seed = overlay.seed().clone();

    let options = TraceOptions {
        skim_interval: args.skim,
        max_level: args.max_level,
        ..Default::default()
    };
    let annotate_options = AnnotateOptions {
        stop_at: Some(seed.id.clone()),
        ..Default::default()
    };

    let started = Instant::now();
    let mut trace = trace_file(&overlay, &rel_path, &seed, &options, &mut |n| {
        eprint!("\rTrace {n}...");
        true
    })?;
    eprintln!("\rTrace: {} nodes in {} ms", trace.len(), started.elapsed().as_millis());

    if args.dump_trace {
        print!("{}", trace.dump());
    }

    let started = Instant::now();
    annotate_trace(&overlay, &mut trace, &annotate_options, &mut |n| {
        eprint!("\rBlame {n}...");
        true
    })?;
    eprintln!("\rBlame: {} ms", started.elapsed().as_millis());

    if !args.quiet {
        print!("{}", render_annotations(&overlay, &trace)?);
    }

    if args.benchmark {
        run_benchmark(&overlay, &rel_path, &seed, &options, &annotate_options, &mut trace)?;
    }
    Ok(())
}

fn run_benchmark(
    backend: &dyn Backend,
    rel_path: &str,
    seed: &filetrace_lib::backend::Commit,
    options: &TraceOptions,
    annotate_options: &AnnotateOptions,
    trace: &mut Trace,
) -> Result<(), CommandError> {
    const ROUNDS: u32 = 10;
    println!("Benchmarking...");

    let started = Instant::now();
    for _ in 0..ROUNDS {
        trace_file(backend, rel_path, seed, options, &mut |_| true)?;
    }
    println!("Trace: {} ms avg", started.elapsed().as_millis() / u128::from(ROUNDS));

    // Blame alone, on the trace built once above.
    let started = Instant::now();
    for _ in 0..ROUNDS {
        trace.clear_annotations();
        annotate_trace(backend, trace, annotate_options, &mut |_| true)?;
    }
    println!(
        "Blame: {} ms avg",
        started.elapsed().as_millis() / u128::from(ROUNDS)
    );
    Ok(())
}

fn repo_relative_path(backend: &GitBackend, path: &Path) -> Result<String, CommandError> {
    let workdir = backend
        .workdir()
        .ok_or_else(|| CommandError::Path("repository has no working directory".to_owned()))?;
    let workdir = workdir
        .canonicalize()
        .map_err(|err| CommandError::Path(err.to_string()))?;
    let path = path
        .canonicalize()
        .map_err(|err| CommandError::Path(format!("{}: {err}", path.display())))?;
    let rel = path
        .strip_prefix(&workdir)
        .map_err(|_| CommandError::Path(format!("{} is outside the repository", path.display())))?;
    Ok(rel.to_string_lossy().replace('\\', "/"))
}

fn render_annotations(backend: &dyn Backend, trace: &Trace) -> Result<String, CommandError> {
    let root = trace.node(trace.root());
    let annotated = root
        .annotated_file
        .as_ref()
        .expect("seed revision is not annotated");
    let now = Timestamp::now();

    let mut output = String::new();
    for (i, line) in annotated.lines.iter().enumerate().skip(1) {
        let node = trace.node(line.node);
        let (author, timestamp) = if node.commit_id.is_workdir() {
            ("Not Committed Yet".to_owned(), now.clone())
        } else {
            let commit = backend.get_commit(&node.commit_id)?;
            (commit.author.name, commit.author.timestamp)
        };
        let date = chrono::DateTime::from_timestamp_millis(timestamp.timestamp.0)
            .map(|datetime| datetime.format("%Y-%m-%d").to_string())
            .unwrap_or_default();
        writeln!(
            output,
            "{} {:20} ({:20} {date} {i}) {}",
            id7(&node.commit_id),
            node.path,
            author,
            BStr::new(line.text.trim_end()),
        )
        .unwrap();
    }
    Ok(output)
}
