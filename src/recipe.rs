//! C6 — Recipe Collector and C7 — Recipe Manager.
//!
//! Grounded on `towl-db/towl/db/creator/recipe_reactor.py` (`RecipeCollector`,
//! `RecipeReactor`) and `towl-db/towl/db/creator/recipe_manager.py`
//! (`RecipeManager.publish_launch` / `finish_launch`). The manager's FIFO is
//! the same flavor of ordering invariant as `cognitod/src/runtime/sequencer.rs`'s
//! `OrderingValidator`: the head is trusted, never searched.

use std::collections::VecDeque;

use chrono::NaiveTime;
use tracing::{error, warn};

use crate::devmem::DevMemManager;
use crate::error::Result;
use crate::event_writer::EventWriter;
use crate::model::{DataRecipeLaunch, EventKind, LaunchBuffer};
use crate::store::Store;

/// One raw `recipe.launch.buf` line, not yet resolved to a buffer ident —
/// that resolution needs `DevMemManager::get_buffer_by_addr`, which the
/// collector deliberately has no access to (§4.6 is buffer-agnostic).
pub struct RawLaunchBuf {
    pub index: u32,
    pub device_addr: u64,
    pub handle_addr: u64,
    pub synapse_name: String,
}

/// A fully-collected launch, still carrying raw addresses for the caller to
/// resolve into `LaunchBuffer`s before handing off to `RecipeManager`.
pub struct CollectedLaunch {
    pub ts: NaiveTime,
    pub tid: u64,
    pub workspace: u64,
    pub handle: u64,
    pub recipe_name: String,
    pub raw_buffers: Vec<RawLaunchBuf>,
}

struct InFlightLaunch {
    ts: NaiveTime,
    tid: u64,
    workspace: u64,
    handle: u64,
    recipe_name: String,
    nbuffers: u32,
    raw_buffers: Vec<RawLaunchBuf>,
}

/// C6. Assembles one `recipe.launch` plus its N `recipe.launch.buf` lines
/// into a single launch record.
pub struct RecipeCollector {
    in_flight: Option<InFlightLaunch>,
}

impl RecipeCollector {
    pub fn new() -> Self {
        RecipeCollector { in_flight: None }
    }

    /// Returns a completed launch immediately when `nbuffers == 0` (§8's
    /// boundary case: a launch with no buffers publishes with an empty
    /// list rather than waiting for a `recipe.launch.buf` that never comes).
    pub fn on_launch(
        &mut self,
        ts: NaiveTime,
        tid: u64,
        workspace: u64,
        handle: u64,
        nbuffers: u32,
        recipe_name: String,
    ) -> Option<CollectedLaunch> {
        if self.in_flight.is_some() {
            warn!(
                handle = format!("{handle:#x}"),
                "new recipe.launch while still collecting a prior one; discarding partial launch"
            );
        }
        if nbuffers == 0 {
            self.in_flight = None;
            return Some(CollectedLaunch {
                ts,
                tid,
                workspace,
                handle,
                recipe_name,
                raw_buffers: Vec::new(),
            });
        }
        self.in_flight = Some(InFlightLaunch {
            ts,
            tid,
            workspace,
            handle,
            recipe_name,
            nbuffers,
            raw_buffers: Vec::new(),
        });
        None
    }

    /// Returns the completed launch once all `nbuffers` have arrived.
    pub fn on_launch_buf(
        &mut self,
        index: u32,
        device_addr: u64,
        handle_addr: u64,
        synapse_name: String,
    ) -> Option<CollectedLaunch> {
        let Some(in_flight) = self.in_flight.as_mut() else {
            warn!(index, "recipe.launch.buf with no active launch collector; dropping");
            return None;
        };

        in_flight.raw_buffers.push(RawLaunchBuf {
            index,
            device_addr,
            handle_addr,
            synapse_name,
        });

        if in_flight.raw_buffers.len() as u32 >= in_flight.nbuffers {
            let in_flight = self.in_flight.take().unwrap();
            return Some(CollectedLaunch {
                ts: in_flight.ts,
                tid: in_flight.tid,
                workspace: in_flight.workspace,
                handle: in_flight.handle,
                recipe_name: in_flight.recipe_name,
                raw_buffers: in_flight.raw_buffers,
            });
        }
        None
    }
}

impl Default for RecipeCollector {
    fn default() -> Self {
        Self::new()
    }
}

/// C7. FIFO of in-flight launches; `finish_launch` only ever inspects the
/// head — a mismatch is logged and dropped, never searched for (§4.7).
pub struct RecipeManager {
    next_launch_ident: u64,
    launched: VecDeque<DataRecipeLaunch>,
}

impl RecipeManager {
    pub fn new() -> Self {
        RecipeManager {
            next_launch_ident: 0,
            launched: VecDeque::new(),
        }
    }

    /// Resolves a `CollectedLaunch`'s raw addresses into `LaunchBuffer`s
    /// (synthesizing unknown buffers as needed, §4.5) and persists the
    /// launch. `offset` is `handle_addr - buffer.addr` per buffer (§4.7).
    pub fn publish_launch(
        &mut self,
        store: &mut Store,
        writer: &mut EventWriter,
        devmem: &mut DevMemManager,
        collected: CollectedLaunch,
    ) -> Result<u64> {
        let ident = self.next_launch_ident;
        self.next_launch_ident += 1;

        let event = writer.add(store, collected.ts, collected.tid, EventKind::RecipeLaunch, ident)?;

        let mut buffers = Vec::with_capacity(collected.raw_buffers.len());
        for raw in &collected.raw_buffers {
            // Resolved by handle_addr, not device_addr: the handle is what
            // the recipe actually dereferences, and offset is measured from
            // the buffer that contains it (§4.7).
            let buffer_ident = devmem.get_buffer_by_addr(
                store,
                writer,
                collected.ts,
                collected.tid,
                raw.handle_addr,
            )?;
            let buffer_addr = store
                .get_buffer_addr_by_ident(buffer_ident)?
                .unwrap_or(raw.handle_addr);
            buffers.push(LaunchBuffer {
                buffer: buffer_ident,
                index: raw.index,
                offset: raw.handle_addr.wrapping_sub(buffer_addr),
                synapse_name: raw.synapse_name.clone(),
            });
        }

        let launch = DataRecipeLaunch {
            ident,
            handle: collected.handle,
            workspace: collected.workspace,
            recipe_name: collected.recipe_name,
            buffers: buffers.clone(),
            event_launch: event.ident,
            event_finished: None,
        };
        store.insert_launch(&launch)?;

        for buf in &buffers {
            devmem.mark_launch_ref(buf.buffer, event.ident);
        }

        self.launched.push_back(launch);
        Ok(ident)
    }

    pub fn finish_launch(
        &mut self,
        store: &mut Store,
        writer: &mut EventWriter,
        ts: NaiveTime,
        tid: u64,
        handle: u64,
    ) -> Result<()> {
        let Some(head) = self.launched.front() else {
            error!(handle = format!("{handle:#x}"), "recipe.finished with no launch in flight");
            return Ok(());
        };

        if head.handle != handle {
            error!(
                expected = format!("{:#x}", head.handle),
                got = format!("{handle:#x}"),
                "recipe.finished does not match head of launch queue; dropping"
            );
            return Ok(());
        }

        let mut launch = self.launched.pop_front().unwrap();
        let event = writer.add(store, ts, tid, EventKind::RecipeFinished, launch.ident)?;
        launch.event_finished = Some(event.ident);
        store.update_launch_finished(launch.ident, event.ident)?;
        Ok(())
    }
}

impl Default for RecipeManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn t() -> NaiveTime {
        NaiveTime::from_hms_opt(0, 0, 0).unwrap()
    }

    #[test]
    fn collector_assembles_launch_after_nbuffers() {
        let mut c = RecipeCollector::new();
        assert!(c.on_launch(t(), 1, 0, 0xcafe, 2, "recipe".to_string()).is_none());
        assert!(c.on_launch_buf(0, 0x1000, 0x1000, "a".to_string()).is_none());
        assert!(c.on_launch_buf(1, 0x2000, 0x2000, "b".to_string()).is_some());
    }

    #[test]
    fn collector_warns_and_drops_stray_launch_buf() {
        let mut c = RecipeCollector::new();
        assert!(c.on_launch_buf(0, 0x1000, 0x1000, "a".to_string()).is_none());
    }

    #[test]
    fn collector_replaces_on_double_launch() {
        let mut c = RecipeCollector::new();
        assert!(c.on_launch(t(), 1, 0, 0xaaaa, 1, "first".to_string()).is_none());
        assert!(c.on_launch(t(), 1, 0, 0xbbbb, 1, "second".to_string()).is_none());
        let result = c.on_launch_buf(0, 0x1000, 0x1000, "a".to_string());
        let collected = result.unwrap();
        assert_eq!(collected.handle, 0xbbbb);
        assert_eq!(collected.recipe_name, "second");
    }

    #[test]
    fn launch_with_zero_buffers_completes_immediately() {
        let mut c = RecipeCollector::new();
        let collected = c
            .on_launch(t(), 1, 0, 0xcafe, 0, "empty_recipe".to_string())
            .expect("nbuffers=0 should publish immediately");
        assert!(collected.raw_buffers.is_empty());
    }

    #[test]
    fn finish_launch_on_empty_queue_is_tolerated() {
        let mut store = Store::create_in_memory().unwrap();
        let mut writer = EventWriter::new();
        let mut mgr = RecipeManager::new();
        mgr.finish_launch(&mut store, &mut writer, t(), 1, 0xcafe).unwrap();
    }

    #[test]
    fn finish_launch_mismatch_does_not_pop_head() {
        let mut store = Store::create_in_memory().unwrap();
        let mut writer = EventWriter::new();
        let mut devmem = DevMemManager::new();
        let mut mgr = RecipeManager::new();

        let collected = CollectedLaunch {
            ts: t(),
            tid: 1,
            workspace: 0,
            handle: 0xaaaa,
            recipe_name: "r".to_string(),
            raw_buffers: vec![],
        };
        mgr.publish_launch(&mut store, &mut writer, &mut devmem, collected).unwrap();
        mgr.finish_launch(&mut store, &mut writer, t(), 1, 0xbbbb).unwrap();
        assert_eq!(mgr.launched.len(), 1);
        assert_eq!(mgr.launched.front().unwrap().handle, 0xaaaa);

        mgr.finish_launch(&mut store, &mut writer, t(), 1, 0xaaaa).unwrap();
        assert_eq!(mgr.launched.len(), 0);
    }
}
