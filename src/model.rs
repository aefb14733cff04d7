//! Storage-side data model (§3). Distinct from the wire-level event tokens
//! decoded in `event::WireEvent` — these are the rows the store persists.

use serde::{Deserialize, Serialize};

/// Closed enumeration backing the `events.kind` column. The integer values
/// are a wire-format commitment (§6) and must never be renumbered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(i64)]
pub enum EventKind {
    DevMemBuf = 0,
    DevMemSummary = 1,
    RecipeLaunch = 2,
    RecipeFinished = 3,
    PythonLog = 4,
}

impl EventKind {
    pub fn name(self) -> &'static str {
        match self {
            EventKind::DevMemBuf => "devmem_buf",
            EventKind::DevMemSummary => "devmem_summary",
            EventKind::RecipeLaunch => "recipe_launch",
            EventKind::RecipeFinished => "recipe_finished",
            EventKind::PythonLog => "python_log",
        }
    }
}

/// An immutable, globally-ordered event row. `ident` is assigned by
/// `EventWriter` and is the only thing downstream readers may rely on for
/// ordering (§5).
#[derive(Debug, Clone)]
pub struct Event {
    pub ident: u64,
    pub kind: EventKind,
    pub reference: u64,
    pub timestamp: chrono::NaiveTime,
    pub tid: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FrameInfo {
    pub filename: String,
    pub funcname: String,
    pub line: u32,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BufferMeta {
    pub unknown: bool,
    pub alloc_frames: Vec<Vec<FrameInfo>>,
}

#[derive(Debug, Clone)]
pub struct DataBuffer {
    pub ident: u64,
    pub addr: u64,
    pub size: u64,
    pub stream: u64,
    pub meta: BufferMeta,
    pub event_malloc: u64,
    pub event_free: Option<u64>,
    pub event_first_launch: Option<u64>,
    pub event_last_launch: Option<u64>,
}

impl DataBuffer {
    pub fn end(&self) -> u64 {
        self.addr + self.size
    }
}

#[derive(Debug, Clone)]
pub struct DevMemBufEvent {
    pub ident: u64,
    pub buffer_ident: u64,
    pub is_allocation: bool,
}

#[derive(Debug, Clone)]
pub struct DeviceMemoryShortSummaryEvent {
    pub ident: u64,
    pub used: u64,
    pub workspace: u64,
    pub persistent: u64,
    pub tag: String,
}

#[derive(Debug, Clone)]
pub struct LaunchBuffer {
    pub buffer: u64,
    pub index: u32,
    pub offset: u64,
    pub synapse_name: String,
}

#[derive(Debug, Clone)]
pub struct DataRecipeLaunch {
    pub ident: u64,
    pub handle: u64,
    pub workspace: u64,
    pub recipe_name: String,
    pub buffers: Vec<LaunchBuffer>,
    pub event_launch: u64,
    pub event_finished: Option<u64>,
}

#[derive(Debug, Clone)]
pub struct PythonLogEvent {
    pub ident: u64,
    pub command: String,
    pub message: Option<String>,
    pub funcname: Option<String>,
    pub filename: Option<String>,
    pub lineno: Option<u32>,
    pub content: Option<String>,
    pub mark_id: Option<u64>,
}
