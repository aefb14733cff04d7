//! C10 — Store. Relational persistence, grounded on
//! `cognitod/src/incidents.rs`'s `IncidentStore` (one struct wrapping a
//! connection, one method per statement, typed rows in and out) adapted
//! from `sqlx`'s async pool to a single blocking `rusqlite::Connection`,
//! since the ingest core is single-threaded and synchronous by contract
//! (§5) — see DESIGN.md for why that substitution was made.
//!
//! DDL lives in `schema`; the addr-halving storage quirk (§4.10) is applied
//! here, at the only two places addresses cross the store boundary.

mod schema;

use std::path::Path;

use chrono::NaiveTime;
use rusqlite::{params, Connection, OptionalExtension};

use crate::error::Result;
use crate::model::{
    DataBuffer, DataRecipeLaunch, DevMemBufEvent, DeviceMemoryShortSummaryEvent, Event,
    EventKind, LaunchBuffer, PythonLogEvent,
};

/// Commit a pending write transaction every this many events (§4.10).
pub const COMMIT_EVERY_N_EVENTS: u64 = 100;

pub struct Store {
    conn: Connection,
    pending_since_commit: u64,
}

impl Store {
    /// Creates a brand-new store at `path`. Caller is responsible for
    /// ensuring `path` does not already exist (§7 "Fatal setup").
    pub fn create(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)?;
        Self::init(conn)
    }

    pub fn create_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Self::init(conn)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.execute_batch(schema::CREATE_TABLES)?;
        conn.execute_batch(schema::CREATE_VIEWS)?;
        conn.execute_batch(schema::SEED_EVENT_KINDS)?;
        conn.execute(
            "INSERT INTO meta (version) VALUES (?1)",
            params![schema::SCHEMA_VERSION],
        )?;
        // Synchronous writes are disabled for the duration of ingest: a
        // failed run discards the whole output directory (§5), so there is
        // nothing an fsync would protect here.
        conn.pragma_update(None, "synchronous", "OFF")?;
        conn.pragma_update(None, "journal_mode", "OFF")?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        conn.execute_batch("BEGIN")?;
        Ok(Store {
            conn,
            pending_since_commit: 0,
        })
    }

    /// Opens an existing store for read/maintenance use (not ingest).
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        Ok(Store {
            conn,
            pending_since_commit: 0,
        })
    }

    pub fn insert_event(&mut self, event: &Event) -> Result<()> {
        self.conn.execute(
            "INSERT INTO events (ident, kind, reference, timestamp, tid) VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                event.ident,
                event.kind as i64,
                event.reference,
                event.timestamp.format("%H:%M:%S%.f").to_string(),
                event.tid,
            ],
        )?;
        self.bump_commit_counter()?;
        Ok(())
    }

    pub fn insert_data_buffer(&mut self, buf: &DataBuffer) -> Result<()> {
        let meta_json = serde_json::to_string(&buf.meta).unwrap_or_else(|_| "{}".to_string());
        self.conn.execute(
            "INSERT INTO data_buffers
                (ident, addr, size, stream, meta, event_malloc, event_free, event_first_launch, event_last_launch)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                buf.ident,
                (buf.addr / 2) as i64,
                buf.size,
                buf.stream,
                meta_json,
                buf.event_malloc,
                buf.event_free,
                buf.event_first_launch,
                buf.event_last_launch,
            ],
        )?;
        Ok(())
    }

    pub fn update_buffer_meta_and_refs(&mut self, buf: &DataBuffer) -> Result<()> {
        let meta_json = serde_json::to_string(&buf.meta).unwrap_or_else(|_| "{}".to_string());
        self.conn.execute(
            "UPDATE data_buffers
             SET meta = ?1, event_first_launch = ?2, event_last_launch = ?3, event_free = ?4
             WHERE ident = ?5",
            params![
                meta_json,
                buf.event_first_launch,
                buf.event_last_launch,
                buf.event_free,
                buf.ident,
            ],
        )?;
        Ok(())
    }

    pub fn get_buffer_addr_by_ident(&self, ident: u64) -> Result<Option<u64>> {
        let addr: Option<i64> = self
            .conn
            .query_row(
                "SELECT addr FROM data_buffers WHERE ident = ?1",
                params![ident],
                |row| row.get(0),
            )
            .optional()?;
        Ok(addr.map(|a| (a as u64) * 2))
    }

    pub fn insert_devmem_buf_event(&mut self, ev: &DevMemBufEvent) -> Result<()> {
        self.conn.execute(
            "INSERT INTO events_devmem_buf (ident, buffer_ident, is_allocation) VALUES (?1, ?2, ?3)",
            params![ev.ident, ev.buffer_ident, ev.is_allocation],
        )?;
        Ok(())
    }

    pub fn insert_devmem_summary_event(&mut self, ev: &DeviceMemoryShortSummaryEvent) -> Result<()> {
        self.conn.execute(
            "INSERT INTO events_devmem_summary (ident, used, workspace, persistent, tag)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![ev.ident, ev.used, ev.workspace, ev.persistent, ev.tag],
        )?;
        Ok(())
    }

    pub fn insert_launch(&mut self, launch: &DataRecipeLaunch) -> Result<()> {
        self.conn.execute(
            "INSERT INTO data_launches (ident, handle, workspace, recipe_name, event_launch, event_finished)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                launch.ident,
                launch.handle,
                launch.workspace,
                launch.recipe_name,
                launch.event_launch,
                launch.event_finished,
            ],
        )?;
        for buf in &launch.buffers {
            self.insert_launch_buf(launch.ident, buf)?;
        }
        Ok(())
    }

    fn insert_launch_buf(&mut self, launch_ident: u64, buf: &LaunchBuffer) -> Result<()> {
        self.conn.execute(
            "INSERT INTO data_launches_bufs (launch_ident, buffer_ident, \"index\", offset, synapse_name)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![launch_ident, buf.buffer, buf.index, buf.offset, buf.synapse_name],
        )?;
        Ok(())
    }

    pub fn update_launch_finished(&mut self, ident: u64, event_finished: u64) -> Result<()> {
        self.conn.execute(
            "UPDATE data_launches SET event_finished = ?1 WHERE ident = ?2",
            params![event_finished, ident],
        )?;
        Ok(())
    }

    pub fn insert_pythonlog_event(&mut self, ev: &PythonLogEvent) -> Result<()> {
        self.conn.execute(
            "INSERT INTO events_pythonlog (ident, command, message, funcname, filename, lineno, content, mark_id)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                ev.ident,
                ev.command,
                ev.message,
                ev.funcname,
                ev.filename,
                ev.lineno,
                ev.content,
                ev.mark_id,
            ],
        )?;
        Ok(())
    }

    fn bump_commit_counter(&mut self) -> Result<()> {
        self.pending_since_commit += 1;
        if self.pending_since_commit >= COMMIT_EVERY_N_EVENTS {
            self.conn.execute_batch("COMMIT; BEGIN")?;
            self.pending_since_commit = 0;
        }
        Ok(())
    }

    /// Final commit at end of ingest. A transaction is always open between
    /// `init`/periodic commits and this call, so this always has something
    /// to flush.
    pub fn finish(&mut self) -> Result<()> {
        self.conn.execute_batch("COMMIT")?;
        self.pending_since_commit = 0;
        Ok(())
    }

    /// Maintenance path (§4.10), run once after `finish`, never mid-ingest.
    pub fn optimize(&self) -> Result<()> {
        self.conn.execute_batch("VACUUM; PRAGMA optimize;")?;
        Ok(())
    }
}
