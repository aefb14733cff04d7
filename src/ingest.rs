//! Top-level orchestration: the `Creator` that ties C1–C10 together into
//! one ingest run.
//!
//! Grounded on `towl-db/towl/db/creator/base.py`'s `Creator` (dispatch
//! table over the decoded event, commit-every-N loop, `close()` ordering)
//! and `create_from_log_file`/`Creator.make`.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::NaiveTime;
use tracing::info;

use crate::devmem::DevMemManager;
use crate::error::{IngestError, Result};
use crate::event::{self, WireEvent};
use crate::event_writer::EventWriter;
use crate::line_source::LineSource;
use crate::prefix;
use crate::python_cmd;
use crate::recipe::{RecipeCollector, RecipeManager};
use crate::store::Store;

pub const DB_FILE_NAME: &str = "towl.db";

pub struct Creator {
    devmem: DevMemManager,
    collector: RecipeCollector,
    recipe_mgr: RecipeManager,
    writer: EventWriter,
}

impl Creator {
    pub fn new() -> Self {
        Creator {
            devmem: DevMemManager::new(),
            collector: RecipeCollector::new(),
            recipe_mgr: RecipeManager::new(),
            writer: EventWriter::new(),
        }
    }

    /// Runs the whole batch: read every line, react to it, flush deferred
    /// writes, and commit. Does not touch the filesystem beyond `store`
    /// and `log_path` — directory setup is `create_from_log_file`'s job.
    pub fn ingest(&mut self, store: &mut Store, log_path: &Path) -> Result<()> {
        let mut lines = LineSource::open(log_path)?;
        let mut processed = 0u64;

        while let Some((_line_no, line)) = lines.next_line()? {
            let Some(parsed) = prefix::parse_line(&line) else {
                continue;
            };
            let Some(wire) = event::decode(parsed.payload) else {
                continue;
            };
            self.react(store, parsed.timestamp, parsed.tid, wire)?;
            processed += 1;
        }

        self.devmem.finish(store)?;
        store.finish()?;
        info!(events = processed, "ingest complete");
        Ok(())
    }

    fn react(&mut self, store: &mut Store, ts: NaiveTime, tid: u64, wire: WireEvent) -> Result<()> {
        match wire {
            WireEvent::DevMemMalloc { addr, size, stream } => {
                self.devmem
                    .malloc(store, &mut self.writer, ts, tid, addr, size, stream, false)?;
            }
            WireEvent::DevMemFree { addr } => {
                self.devmem.free(store, &mut self.writer, ts, tid, addr)?;
            }
            WireEvent::DevMemSummary {
                used,
                workspace,
                persistent,
                tag,
            } => {
                self.devmem
                    .record_status(store, &mut self.writer, ts, tid, used, workspace, persistent, tag)?;
            }
            WireEvent::RecipeLaunch {
                workspace,
                handle,
                nbuffers,
                name,
            } => {
                if let Some(collected) = self.collector.on_launch(ts, tid, workspace, handle, nbuffers, name) {
                    self.recipe_mgr
                        .publish_launch(store, &mut self.writer, &mut self.devmem, collected)?;
                }
            }
            WireEvent::RecipeLaunchBuf {
                index,
                device_addr,
                handle_addr,
                synapse_name,
                ..
            } => {
                if let Some(collected) = self.collector.on_launch_buf(index, device_addr, handle_addr, synapse_name) {
                    self.recipe_mgr
                        .publish_launch(store, &mut self.writer, &mut self.devmem, collected)?;
                }
            }
            WireEvent::RecipeFinished { handle } => {
                self.recipe_mgr.finish_launch(store, &mut self.writer, ts, tid, handle)?;
            }
            WireEvent::PythonTowlCmd(cmd) => {
                python_cmd::react(store, &mut self.writer, &mut self.devmem, ts, tid, cmd)?;
            }
        }
        Ok(())
    }
}

impl Default for Creator {
    fn default() -> Self {
        Self::new()
    }
}

/// Runs a full ingest into a fresh `<output>/towl.db`, optionally copying
/// the input log alongside it, per §6's `create from-log-file`.
pub fn create_from_log_file(
    log_path: &Path,
    output: &Path,
    overwrite: bool,
    copy: bool,
) -> Result<()> {
    create_from_log_file_impl(log_path, output, overwrite, copy, false)
}

/// `maintain recreate`'s backing primitive: a no-op if the output already
/// holds a store, instead of the usual fatal "already exists" (§6, §SUPPLEMENTAL).
pub fn create_from_log_file_idempotent(log_path: &Path, output: &Path, copy: bool) -> Result<()> {
    create_from_log_file_impl(log_path, output, false, copy, true)
}

fn create_from_log_file_impl(
    log_path: &Path,
    output: &Path,
    overwrite: bool,
    copy: bool,
    do_nothing_if_exists: bool,
) -> Result<()> {
    // §7 checks the output *directory*, not just the db file within it —
    // grounded on `Creator.__init__`'s `os.path.exists(output_path)`.
    if output.exists() {
        if do_nothing_if_exists {
            info!(path = %output.display(), "output already populated; nothing to do");
            return Ok(());
        }
        if !overwrite {
            return Err(IngestError::OutputExists(output.to_path_buf()));
        }
        fs::remove_dir_all(output)?;
    }
    fs::create_dir_all(output)?;
    let db_path = output.join(DB_FILE_NAME);

    let result = (|| -> Result<()> {
        let mut store = Store::create(&db_path)?;
        let mut creator = Creator::new();
        creator.ingest(&mut store, log_path)?;
        store.optimize()?;
        if copy {
            let dest = output.join(
                log_path
                    .file_name()
                    .unwrap_or_else(|| std::ffi::OsStr::new("input.log")),
            );
            fs::copy(log_path, dest)?;
        }
        Ok(())
    })();

    if let Err(e) = &result {
        // Fatal: clean up the partially-built output (§7).
        let _ = fs::remove_dir_all(output);
        tracing::error!(error = %e, "ingest failed; removed partial output");
    }
    result
}

/// §SUPPLEMENTAL — `maintain recreate`: locates the preserved input log
/// copy under `dir` (the one file that is not `towl.db`) and rebuilds the
/// store from it. `create_from_log_file_impl`'s overwrite path wipes the
/// whole output directory before re-ingesting, and the preserved log lives
/// inside that directory, so it is staged to a scratch location first.
pub fn maintain_recreate(dir: &Path) -> Result<()> {
    let preserved = fs::read_dir(dir)?
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .find(|p| p.file_name().and_then(|n| n.to_str()) != Some(DB_FILE_NAME))
        .ok_or_else(|| {
            IngestError::OpenInput {
                path: dir.to_path_buf(),
                source: std::io::Error::new(
                    std::io::ErrorKind::NotFound,
                    "no preserved input log found alongside towl.db",
                ),
            }
        })?;

    let file_name = preserved
        .file_name()
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("input.log"));
    let staging_dir = std::env::temp_dir().join(format!("towl-recreate-{}", std::process::id()));
    fs::create_dir_all(&staging_dir)?;
    let staged = staging_dir.join(&file_name);
    fs::copy(&preserved, &staged)?;

    let result = create_from_log_file(&staged, dir, true, true);
    let _ = fs::remove_dir_all(&staging_dir);
    result
}
