//! C5 — DevMem Manager. Owns buffer identity: malloc/free, synthesis of
//! "unknown" buffers on lookup miss, and deferred metadata writes.
//!
//! Grounded on `towl-db/towl/db/creator/devmem_manager.py`'s
//! `DevMemManager`, with the dirty-set/flush-on-finish pattern mirrored
//! from `cognitod/src/context.rs`'s `prune_locked`-style deferred
//! bookkeeping.

use std::collections::{HashMap, HashSet};

use chrono::NaiveTime;
use tracing::warn;

use crate::error::Result;
use crate::event_writer::EventWriter;
use crate::interval_map::IntervalMap;
use crate::model::{BufferMeta, DataBuffer, DevMemBufEvent, DeviceMemoryShortSummaryEvent, EventKind, FrameInfo};
use crate::store::Store;

pub struct DevMemManager {
    next_buffer_ident: u64,
    intervals: IntervalMap,
    /// addr -> ident, for O(1) exact-address lookup on free.
    live_by_addr: HashMap<u64, u64>,
    all_buffers: HashMap<u64, DataBuffer>,
    needs_meta_update: HashSet<u64>,
}

impl DevMemManager {
    pub fn new() -> Self {
        DevMemManager {
            next_buffer_ident: 0,
            intervals: IntervalMap::new(),
            live_by_addr: HashMap::new(),
            all_buffers: HashMap::new(),
            needs_meta_update: HashSet::new(),
        }
    }

    #[allow(clippy::too_many_arguments)]
    pub fn malloc(
        &mut self,
        store: &mut Store,
        writer: &mut EventWriter,
        ts: NaiveTime,
        tid: u64,
        addr: u64,
        size: u64,
        stream: u64,
        unknown: bool,
    ) -> Result<u64> {
        let ident = self.next_buffer_ident;
        self.next_buffer_ident += 1;

        let event_ident = writer.peek_next_ident();
        let event = writer.add(store, ts, tid, EventKind::DevMemBuf, event_ident)?;

        let buffer = DataBuffer {
            ident,
            addr,
            size,
            stream,
            meta: BufferMeta {
                unknown,
                alloc_frames: Vec::new(),
            },
            event_malloc: event.ident,
            event_free: None,
            event_first_launch: None,
            event_last_launch: None,
        };
        // data_buffers must exist before events_devmem_buf, whose
        // buffer_ident is a foreign key into it.
        store.insert_data_buffer(&buffer)?;

        let buf_event = DevMemBufEvent {
            ident: event.ident,
            buffer_ident: ident,
            is_allocation: true,
        };
        store.insert_devmem_buf_event(&buf_event)?;

        self.intervals.map(addr, addr + size, ident);
        self.live_by_addr.insert(addr, ident);
        self.all_buffers.insert(ident, buffer);

        Ok(ident)
    }

    pub fn free(
        &mut self,
        store: &mut Store,
        writer: &mut EventWriter,
        ts: NaiveTime,
        tid: u64,
        addr: u64,
    ) -> Result<()> {
        let Some(&ident) = self.live_by_addr.get(&addr) else {
            warn!(addr = format!("{addr:#x}"), "devmem.free on unknown address");
            return Ok(());
        };

        let buffer = self.all_buffers.get(&ident).expect("live buffer must exist in all_buffers");
        self.intervals.unmap(buffer.addr, buffer.addr + buffer.size);
        self.live_by_addr.remove(&addr);

        let event_ident = writer.peek_next_ident();
        let event = writer.add(store, ts, tid, EventKind::DevMemBuf, event_ident)?;
        let buf_event = DevMemBufEvent {
            ident: event.ident,
            buffer_ident: ident,
            is_allocation: false,
        };
        store.insert_devmem_buf_event(&buf_event)?;

        let buffer = self.all_buffers.get_mut(&ident).unwrap();
        buffer.event_free = Some(event.ident);
        self.needs_meta_update.insert(ident);

        Ok(())
    }

    /// Resolves `addr` to a buffer ident, synthesizing a single-byte
    /// "unknown" buffer on miss (§4.5, a soft miss — not an error).
    pub fn get_buffer_by_addr(
        &mut self,
        store: &mut Store,
        writer: &mut EventWriter,
        ts: NaiveTime,
        tid: u64,
        addr: u64,
    ) -> Result<u64> {
        if let Some(ident) = self.intervals.lookup(addr)? {
            return Ok(ident);
        }
        self.malloc(store, writer, ts, tid, addr, 1, 0, true)
    }

    pub fn record_status(
        &mut self,
        store: &mut Store,
        writer: &mut EventWriter,
        ts: NaiveTime,
        tid: u64,
        used: u64,
        workspace: u64,
        persistent: u64,
        tag: String,
    ) -> Result<()> {
        let event_ident = writer.peek_next_ident();
        let event = writer.add(store, ts, tid, EventKind::DevMemSummary, event_ident)?;
        let summary = DeviceMemoryShortSummaryEvent {
            ident: event.ident,
            used,
            workspace,
            persistent,
            tag,
        };
        store.insert_devmem_summary_event(&summary)
    }

    pub fn append_alloc_frames(&mut self, ident: u64, frames: Vec<FrameInfo>) {
        if let Some(buf) = self.all_buffers.get_mut(&ident) {
            buf.meta.alloc_frames.push(frames);
            self.needs_meta_update.insert(ident);
        }
    }

    pub fn mark_launch_ref(&mut self, ident: u64, launch_event_ident: u64) {
        if let Some(buf) = self.all_buffers.get_mut(&ident) {
            if buf.event_first_launch.is_none() {
                buf.event_first_launch = Some(launch_event_ident);
            }
            buf.event_last_launch = Some(launch_event_ident);
            self.needs_meta_update.insert(ident);
        }
    }

    /// Flushes every dirty buffer's meta JSON and back-references. Must run
    /// exactly once, at the end of ingest (§4.5).
    pub fn finish(&mut self, store: &mut Store) -> Result<()> {
        for ident in self.needs_meta_update.drain().collect::<Vec<_>>() {
            if let Some(buf) = self.all_buffers.get(&ident) {
                store.update_buffer_meta_and_refs(buf)?;
            }
        }
        Ok(())
    }
}

impl Default for DevMemManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
impl DevMemManager {
    pub(crate) fn buffer_for_test(&self, ident: &u64) -> &DataBuffer {
        self.all_buffers.get(ident).expect("buffer must exist")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn t() -> NaiveTime {
        NaiveTime::from_hms_opt(0, 0, 0).unwrap()
    }

    #[test]
    fn malloc_then_free_clears_live_mapping() {
        let mut store = Store::create_in_memory().unwrap();
        let mut writer = EventWriter::new();
        let mut mgr = DevMemManager::new();

        let ident = mgr
            .malloc(&mut store, &mut writer, t(), 1, 0x1000, 16, 0, false)
            .unwrap();
        assert_eq!(mgr.intervals.lookup(0x1000).unwrap(), Some(ident));

        mgr.free(&mut store, &mut writer, t(), 1, 0x1000).unwrap();
        assert_eq!(mgr.intervals.lookup(0x1000).unwrap(), None);
    }

    #[test]
    fn free_of_unknown_address_is_tolerated() {
        let mut store = Store::create_in_memory().unwrap();
        let mut writer = EventWriter::new();
        let mut mgr = DevMemManager::new();
        // must not panic or error
        mgr.free(&mut store, &mut writer, t(), 1, 0xdead).unwrap();
    }

    #[test]
    fn lookup_miss_synthesizes_unknown_buffer() {
        let mut store = Store::create_in_memory().unwrap();
        let mut writer = EventWriter::new();
        let mut mgr = DevMemManager::new();

        let ident = mgr
            .get_buffer_by_addr(&mut store, &mut writer, t(), 1, 0x2000)
            .unwrap();
        let buf = mgr.all_buffers.get(&ident).unwrap();
        assert!(buf.meta.unknown);
        assert_eq!(buf.size, 1);
        assert_eq!(buf.stream, 0);
    }

    #[test]
    fn lookup_hit_returns_existing_buffer_for_mid_region_address() {
        let mut store = Store::create_in_memory().unwrap();
        let mut writer = EventWriter::new();
        let mut mgr = DevMemManager::new();

        let ident = mgr
            .malloc(&mut store, &mut writer, t(), 1, 0x3000, 0x100, 0, false)
            .unwrap();
        let found = mgr
            .get_buffer_by_addr(&mut store, &mut writer, t(), 1, 0x3050)
            .unwrap();
        assert_eq!(found, ident);
    }
}
