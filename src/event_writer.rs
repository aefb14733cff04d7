//! C9 — Event Writer. The sole producer of `Event.ident` values: a
//! monotonic counter starting at 0, one persisted row per call.
//!
//! Grounded on `towl-db/towl/db/creator/event_writer.py`'s `EventWriter.add`.

use chrono::NaiveTime;

use crate::error::Result;
use crate::model::{Event, EventKind};
use crate::store::Store;

pub struct EventWriter {
    next_ident: u64,
}

impl EventWriter {
    pub fn new() -> Self {
        EventWriter { next_ident: 0 }
    }

    /// The ident the next `add` call will assign. Lets a caller build a
    /// detail row that shares its primary key with the event row (§3's
    /// `events_devmem_buf`/`events_devmem_summary`/`events_pythonlog`) before
    /// the event itself is written, so `reference` can be set correctly in
    /// one insert rather than patched in after (events are never mutated).
    pub fn peek_next_ident(&self) -> u64 {
        self.next_ident
    }

    pub fn add(
        &mut self,
        store: &mut Store,
        timestamp: NaiveTime,
        tid: u64,
        kind: EventKind,
        reference: u64,
    ) -> Result<Event> {
        let ident = self.next_ident;
        self.next_ident += 1;
        let event = Event {
            ident,
            kind,
            reference,
            timestamp,
            tid,
        };
        store.insert_event(&event)?;
        Ok(event)
    }
}

impl Default for EventWriter {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn idents_are_monotonic_from_zero() {
        let mut store = Store::create_in_memory().unwrap();
        let mut writer = EventWriter::new();
        let t = NaiveTime::from_hms_opt(0, 0, 0).unwrap();
        let e0 = writer.add(&mut store, t, 0, EventKind::DevMemBuf, 0).unwrap();
        let e1 = writer.add(&mut store, t, 0, EventKind::DevMemBuf, 0).unwrap();
        let e2 = writer.add(&mut store, t, 0, EventKind::DevMemBuf, 0).unwrap();
        assert_eq!((e0.ident, e1.ident, e2.ident), (0, 1, 2));
    }
}
