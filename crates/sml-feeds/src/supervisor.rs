//! Input supervisor — translates one declared input into a live set of
//! per-file tailers.
//!
//! Two workers run while the supervisor is live: a path rescan every
//! `path_update_interval_sec` (re-expand the glob, spawn children for new
//! matches, note vanished ones) and a detach sweep every
//! `detach_interval_sec` (close children whose file has been absent for
//! `detach_time_sec`).
//!
//! Glob policy: a `*` in the folder portion of the pattern puts the
//! supervisor in multi-folder mode, one child per matched folder. In
//! single-folder mode with `tail = true` exactly the lexicographically
//! first match is followed and the rest are warned about; with
//! `tail = false` the whole matched set is handed to one tailer for
//! one-shot processing in reverse order.

use crate::tailer::{FileTailer, TailerHandle};
use sml_core::checkpoint::CheckpointStore;
use sml_core::InputDescriptor;
use sml_output::FilterChain;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant, SystemTime};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

pub struct InputSupervisor {
    input: Arc<InputDescriptor>,
    chain: Mutex<FilterChain>,
    store: Arc<CheckpointStore>,
    token: CancellationToken,
}

/// Child book-keeping shared between the rescan and detach workers.
#[derive(Default)]
struct ChildSet {
    /// Keyed by file path in single-folder mode, folder path in
    /// multi-folder mode.
    children: HashMap<PathBuf, TailerHandle>,
    missing_since: HashMap<PathBuf, Instant>,
    /// Files already handed off for one-shot processing.
    oneshot_done: HashSet<PathBuf>,
}

/// Handle to a running supervisor and its workers.
pub struct SupervisorHandle {
    token: CancellationToken,
    children: Arc<Mutex<ChildSet>>,
    rescan: tokio::task::JoinHandle<()>,
    detach: tokio::task::JoinHandle<()>,
}

impl SupervisorHandle {
    pub fn child_count(&self) -> usize {
        self.children.lock().expect("child set lock").children.len()
    }

    /// Close every child, wait for final checkpoints, stop the workers.
    pub async fn shutdown(self) {
        self.token.cancel();
        let _ = self.rescan.await;
        let _ = self.detach.await;

        let handles: Vec<TailerHandle> = {
            let mut set = self.children.lock().expect("child set lock");
            set.missing_since.clear();
            set.children.drain().map(|(_, handle)| handle).collect()
        };
        for handle in handles {
            handle.request_close();
            handle.join().await;
        }
    }
}

struct SupervisorCtx {
    input: Arc<InputDescriptor>,
    chain: Mutex<FilterChain>,
    store: Arc<CheckpointStore>,
    token: CancellationToken,
    children: Arc<Mutex<ChildSet>>,
}

impl InputSupervisor {
    pub fn new(
        input: Arc<InputDescriptor>,
        chain: FilterChain,
        store: Arc<CheckpointStore>,
        token: CancellationToken,
    ) -> InputSupervisor {
        InputSupervisor {
            input,
            chain: Mutex::new(chain),
            store,
            token,
        }
    }

    /// True once glob expansion yields at least one existing regular file.
    pub fn is_ready(&self) -> bool {
        self.input
            .path
            .as_deref()
            .map(|pattern| !expand(pattern).is_empty())
            .unwrap_or(false)
    }

    /// Start the rescan and detach workers.
    pub fn spawn(self) -> SupervisorHandle {
        let children = Arc::new(Mutex::new(ChildSet::default()));
        let ctx = Arc::new(SupervisorCtx {
            input: self.input,
            chain: self.chain,
            store: self.store,
            token: self.token.clone(),
            children: Arc::clone(&children),
        });

        let rescan = tokio::spawn(rescan_worker(Arc::clone(&ctx)));
        let detach = tokio::spawn(detach_worker(ctx));

        SupervisorHandle {
            token: self.token,
            children,
            rescan,
            detach,
        }
    }
}

// ---------------------------------------------------------------------------
// Workers
// ---------------------------------------------------------------------------

async fn rescan_worker(ctx: Arc<SupervisorCtx>) {
    loop {
        rescan_once(&ctx);
        tokio::select! {
            _ = ctx.token.cancelled() => return,
            _ = tokio::time::sleep(ctx.input.path_update_interval()) => {}
        }
    }
}

async fn detach_worker(ctx: Arc<SupervisorCtx>) {
    loop {
        tokio::select! {
            _ = ctx.token.cancelled() => return,
            _ = tokio::time::sleep(ctx.input.detach_interval()) => {}
        }
        detach_sweep(&ctx);
    }
}

fn rescan_once(ctx: &SupervisorCtx) {
    let Some(pattern) = ctx.input.path.as_deref() else {
        return;
    };
    let mut set = ctx.children.lock().expect("child set lock");
    set.children.retain(|_, handle| !handle.is_finished());

    match glob_mode(pattern) {
        GlobMode::Multi => rescan_multi_folder(ctx, &mut set, pattern),
        GlobMode::Single => rescan_single_folder(ctx, &mut set, pattern),
    }
}

fn rescan_single_folder(ctx: &SupervisorCtx, set: &mut ChildSet, pattern: &str) {
    let files = age_gated(expand(pattern), &ctx.input);

    if ctx.input.tail {
        if set.children.is_empty() {
            if let Some(plan) = follow_plan(&ctx.input, &files) {
                let key = plan[0].clone();
                let handle = spawn_child(ctx, plan);
                set.children.insert(key, handle);
            }
        }
        // Track presence of the followed file for the detach sweep.
        let keys: Vec<PathBuf> = set.children.keys().cloned().collect();
        for key in keys {
            if key.exists() {
                set.missing_since.remove(&key);
            } else {
                set.missing_since.entry(key).or_insert_with(Instant::now);
            }
        }
    } else {
        let fresh: Vec<PathBuf> = files
            .into_iter()
            .rev()
            .filter(|file| !set.oneshot_done.contains(file))
            .collect();
        if !fresh.is_empty() {
            set.oneshot_done.extend(fresh.iter().cloned());
            let key = fresh[0].clone();
            let handle = spawn_child(ctx, fresh);
            set.children.insert(key, handle);
        }
    }
}

fn rescan_multi_folder(ctx: &SupervisorCtx, set: &mut ChildSet, pattern: &str) {
    let by_folder = expand_by_folder(pattern);

    for (folder, files) in &by_folder {
        if !set.children.contains_key(folder) {
            if let Some(plan) = folder_plan(&ctx.input, files) {
                let handle = spawn_child(ctx, plan);
                set.children.insert(folder.clone(), handle);
            }
        }
        set.missing_since.remove(folder);
    }

    let vanished: Vec<PathBuf> = set
        .children
        .keys()
        .filter(|folder| !by_folder.contains_key(*folder))
        .cloned()
        .collect();
    for folder in vanished {
        set.missing_since.entry(folder).or_insert_with(Instant::now);
    }
}

fn detach_sweep(ctx: &SupervisorCtx) {
    let detach_time = ctx.input.detach_time();
    let mut set = ctx.children.lock().expect("child set lock");

    debug!(
        input = %ctx.input.cache_key(),
        children = set.children.len(),
        missing = set.missing_since.len(),
        "detach sweep"
    );

    let expired: Vec<PathBuf> = set
        .missing_since
        .iter()
        .filter(|(_, since)| since.elapsed() >= detach_time)
        .map(|(key, _)| key.clone())
        .collect();

    for key in expired {
        set.missing_since.remove(&key);
        if let Some(handle) = set.children.remove(&key) {
            info!(path = %key.display(), "detaching absent child");
            handle.request_close();
        }
    }
}

fn spawn_child(ctx: &SupervisorCtx, files: Vec<PathBuf>) -> TailerHandle {
    debug!(input = %ctx.input.cache_key(), first = %files[0].display(), "spawning tailer");
    let mut chain = ctx
        .chain
        .lock()
        .expect("prototype chain lock")
        .clone_chain();
    chain.set_input(Arc::clone(&ctx.input));
    FileTailer::new(
        Arc::clone(&ctx.input),
        files,
        chain,
        Arc::clone(&ctx.store),
    )
    .spawn(ctx.token.child_token())
}

// ---------------------------------------------------------------------------
// Glob policy
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum GlobMode {
    Single,
    Multi,
}

/// Multi-folder mode when a wildcard occurs before the last path separator.
pub(crate) fn glob_mode(pattern: &str) -> GlobMode {
    match pattern.rfind('/') {
        Some(split) if pattern[..split].contains('*') => GlobMode::Multi,
        _ => GlobMode::Single,
    }
}

/// Expand to existing regular files, lexicographically sorted.
pub(crate) fn expand(pattern: &str) -> Vec<PathBuf> {
    let mut files: Vec<PathBuf> = match glob::glob(pattern) {
        Ok(paths) => paths.flatten().filter(|path| path.is_file()).collect(),
        Err(err) => {
            warn!(pattern, %err, "bad glob pattern");
            Vec::new()
        }
    };
    files.sort();
    files
}

/// Expansion grouped by containing folder.
pub(crate) fn expand_by_folder(pattern: &str) -> BTreeMap<PathBuf, Vec<PathBuf>> {
    let mut by_folder: BTreeMap<PathBuf, Vec<PathBuf>> = BTreeMap::new();
    for file in expand(pattern) {
        let folder = file
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        by_folder.entry(folder).or_default().push(file);
    }
    by_folder
}

/// Follow plan for single-folder tail mode: the first match only.
fn follow_plan(input: &InputDescriptor, files: &[PathBuf]) -> Option<Vec<PathBuf>> {
    let first = files.first()?;
    if files.len() > 1 {
        warn!(
            input = %input.cache_key(),
            followed = %first.display(),
            ignored = files.len() - 1,
            "pattern matched multiple files in tail mode, following the first"
        );
    }
    Some(vec![first.clone()])
}

/// Plan for one folder's files in multi-folder mode, `tail` inherited.
fn folder_plan(input: &InputDescriptor, files: &[PathBuf]) -> Option<Vec<PathBuf>> {
    let files = age_gated(files.to_vec(), input);
    if input.tail {
        follow_plan(input, &files)
    } else if files.is_empty() {
        None
    } else {
        Some(files.into_iter().rev().collect())
    }
}

fn age_gated(files: Vec<PathBuf>, input: &InputDescriptor) -> Vec<PathBuf> {
    if input.max_age_min == 0 {
        return files;
    }
    files
        .into_iter()
        .filter(|file| {
            let skip = std::fs::metadata(file)
                .and_then(|meta| meta.modified())
                .map(|modified| older_than(modified, input.max_age_min))
                .unwrap_or(false);
            if skip {
                info!(
                    path = %file.display(),
                    max_age_min = input.max_age_min,
                    "skipping file older than the age gate"
                );
            }
            !skip
        })
        .collect()
}

pub(crate) fn older_than(modified: SystemTime, max_age_min: u64) -> bool {
    modified
        .elapsed()
        .map(|age| age > Duration::from_secs(max_age_min * 60))
        .unwrap_or(false)
}
