//! C8 — Python-command Reactor. Decodes in-band structured commands and
//! persists them.
//!
//! Grounded on `towl-db/towl/db/creator/python_reactor.py` (the canonical
//! of the two near-duplicate variants found in `original_source/` — see
//! DESIGN.md's note on §9's open question) and the wire side emitting these
//! payloads, `towl-instrument/core/log.py` / `memory_interceptor.py`.
//! `frame-log`'s `memory` dict rewrite (`addr -> buffer_ident`) is
//! `_handle_framelog`.

use std::collections::BTreeMap;

use chrono::NaiveTime;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::devmem::DevMemManager;
use crate::error::{IngestError, Result};
use crate::event::TowlCommand;
use crate::event_writer::EventWriter;
use crate::model::{EventKind, FrameInfo, PythonLogEvent};
use crate::store::Store;

#[derive(Debug, Deserialize)]
struct AttachAllocationPointPayload {
    addr: u64,
    frames: Vec<FrameInfo>,
}

/// The caller's frame, when captured (`get_your_caller_frame` may return
/// `None` if the stack was exhausted before reaching the requested depth).
#[derive(Debug, Deserialize)]
struct ScriptLogPayload {
    message: String,
    frame: Option<FrameInfo>,
}

#[derive(Debug, Deserialize)]
struct MarkPayload {
    message: String,
    frame: Option<FrameInfo>,
    mark_id: u64,
}

#[derive(Debug, Deserialize)]
struct FrameLogPayload {
    message: String,
    frame: Option<FrameInfo>,
    stack: Vec<FrameVariables>,
}

#[derive(Debug, Clone, Deserialize)]
struct FrameVariables {
    frame: FrameInfo,
    /// name -> device address (a tensor's `data_ptr()`, an integer on the
    /// wire), rewritten to name -> buffer ident before being persisted.
    memory: BTreeMap<String, u64>,
}

#[derive(Debug, Clone, Serialize)]
struct ResolvedFrameVariables {
    frame: FrameInfo,
    memory: BTreeMap<String, u64>,
}

#[derive(Debug, Serialize)]
struct FrameLogContent {
    stack: Vec<ResolvedFrameVariables>,
}

fn malformed(kind: &str) -> IngestError {
    IngestError::MalformedPayload {
        kind: kind.to_string(),
        body: String::new(),
    }
}

pub fn react(
    store: &mut Store,
    writer: &mut EventWriter,
    devmem: &mut DevMemManager,
    ts: NaiveTime,
    tid: u64,
    cmd: TowlCommand,
) -> Result<()> {
    match cmd.command.as_str() {
        "attach-allocation-point" => {
            handle_attach_allocation_point(store, writer, devmem, ts, tid, cmd.payload)
        }
        "script-log" => handle_script_log(store, writer, ts, tid, cmd.payload),
        "mark-code-enter" => handle_mark(store, writer, ts, tid, "mark-code-enter", cmd.payload),
        "mark-code-exit" => handle_mark(store, writer, ts, tid, "mark-code-exit", cmd.payload),
        "frame-log" => handle_frame_log(store, writer, devmem, ts, tid, cmd.payload),
        other => Err(IngestError::UnsupportedPythonCommand(other.to_string())),
    }
}

fn handle_attach_allocation_point(
    store: &mut Store,
    writer: &mut EventWriter,
    devmem: &mut DevMemManager,
    ts: NaiveTime,
    tid: u64,
    payload: Value,
) -> Result<()> {
    let payload: AttachAllocationPointPayload =
        serde_json::from_value(payload).map_err(|_| malformed("attach-allocation-point"))?;

    let ident = devmem.get_buffer_by_addr(store, writer, ts, tid, payload.addr)?;
    devmem.append_alloc_frames(ident, payload.frames);
    Ok(())
}

fn handle_script_log(
    store: &mut Store,
    writer: &mut EventWriter,
    ts: NaiveTime,
    tid: u64,
    payload: Value,
) -> Result<()> {
    let payload: ScriptLogPayload =
        serde_json::from_value(payload).map_err(|_| malformed("script-log"))?;
    let event_ident = writer.peek_next_ident();
    let event = writer.add(store, ts, tid, EventKind::PythonLog, event_ident)?;
    let log = PythonLogEvent {
        ident: event.ident,
        command: "script-log".to_string(),
        message: Some(payload.message),
        funcname: payload.frame.as_ref().map(|f| f.funcname.clone()),
        filename: payload.frame.as_ref().map(|f| f.filename.clone()),
        lineno: payload.frame.as_ref().map(|f| f.line),
        content: None,
        mark_id: None,
    };
    store.insert_pythonlog_event(&log)
}

fn handle_mark(
    store: &mut Store,
    writer: &mut EventWriter,
    ts: NaiveTime,
    tid: u64,
    command: &str,
    payload: Value,
) -> Result<()> {
    let payload: MarkPayload = serde_json::from_value(payload).map_err(|_| malformed(command))?;
    let event_ident = writer.peek_next_ident();
    let event = writer.add(store, ts, tid, EventKind::PythonLog, event_ident)?;
    let log = PythonLogEvent {
        ident: event.ident,
        command: command.to_string(),
        message: Some(payload.message),
        funcname: payload.frame.as_ref().map(|f| f.funcname.clone()),
        filename: payload.frame.as_ref().map(|f| f.filename.clone()),
        lineno: payload.frame.as_ref().map(|f| f.line),
        content: None,
        mark_id: Some(payload.mark_id),
    };
    store.insert_pythonlog_event(&log)
}

fn handle_frame_log(
    store: &mut Store,
    writer: &mut EventWriter,
    devmem: &mut DevMemManager,
    ts: NaiveTime,
    tid: u64,
    payload: Value,
) -> Result<()> {
    let payload: FrameLogPayload =
        serde_json::from_value(payload).map_err(|_| malformed("frame-log"))?;

    let mut resolved_stack = Vec::with_capacity(payload.stack.len());
    for fvars in payload.stack {
        let mut memory = BTreeMap::new();
        for (name, addr) in fvars.memory {
            let ident = devmem.get_buffer_by_addr(store, writer, ts, tid, addr)?;
            memory.insert(name, ident);
        }
        resolved_stack.push(ResolvedFrameVariables {
            frame: fvars.frame,
            memory,
        });
    }

    let content = serde_json::to_string(&FrameLogContent { stack: resolved_stack })
        .map_err(|_| malformed("frame-log"))?;
    let event_ident = writer.peek_next_ident();
    let event = writer.add(store, ts, tid, EventKind::PythonLog, event_ident)?;
    let log = PythonLogEvent {
        ident: event.ident,
        command: "frame-log".to_string(),
        message: Some(payload.message),
        funcname: payload.frame.as_ref().map(|f| f.funcname.clone()),
        filename: payload.frame.as_ref().map(|f| f.filename.clone()),
        lineno: payload.frame.as_ref().map(|f| f.line),
        content: Some(content),
        mark_id: None,
    };
    store.insert_pythonlog_event(&log)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn t() -> NaiveTime {
        NaiveTime::from_hms_opt(0, 0, 0).unwrap()
    }

    #[test]
    fn script_log_persists_as_pythonlog_event() {
        let mut store = Store::create_in_memory().unwrap();
        let mut writer = EventWriter::new();
        let mut devmem = DevMemManager::new();

        let cmd = TowlCommand {
            command: "script-log".to_string(),
            payload: json!({
                "message": "hello",
                "frame": {"filename": "a.py", "funcname": "f", "line": 1},
            }),
        };
        react(&mut store, &mut writer, &mut devmem, t(), 0, cmd).unwrap();
    }

    #[test]
    fn mark_code_enter_persists_message_and_frame() {
        let mut store = Store::create_in_memory().unwrap();
        let mut writer = EventWriter::new();
        let mut devmem = DevMemManager::new();

        let cmd = TowlCommand {
            command: "mark-code-enter".to_string(),
            payload: json!({
                "message": "entered",
                "frame": {"filename": "a.py", "funcname": "f", "line": 5},
                "mark_id": 7,
            }),
        };
        react(&mut store, &mut writer, &mut devmem, t(), 0, cmd).unwrap();
    }

    #[test]
    fn frame_log_resolves_stack_memory_addresses_to_buffer_idents() {
        let mut store = Store::create_in_memory().unwrap();
        let mut writer = EventWriter::new();
        let mut devmem = DevMemManager::new();

        let cmd = TowlCommand {
            command: "frame-log".to_string(),
            payload: json!({
                "message": "snapshot",
                "frame": {"filename": "a.py", "funcname": "f", "line": 1},
                "stack": [{
                    "frame": {"filename": "b.py", "funcname": "g", "line": 2},
                    "memory": {"x": 4096},
                }],
            }),
        };
        react(&mut store, &mut writer, &mut devmem, t(), 0, cmd).unwrap();

        let ident = devmem
            .get_buffer_by_addr(&mut store, &mut writer, t(), 0, 4096)
            .unwrap();
        assert!(devmem.buffer_for_test(&ident).meta.unknown);
    }

    #[test]
    fn attach_allocation_point_synthesizes_unknown_buffer_on_miss() {
        let mut store = Store::create_in_memory().unwrap();
        let mut writer = EventWriter::new();
        let mut devmem = DevMemManager::new();

        let cmd = TowlCommand {
            command: "attach-allocation-point".to_string(),
            payload: json!({"addr": 4096, "frames": [{"filename": "a.py", "funcname": "f", "line": 10}]}),
        };
        react(&mut store, &mut writer, &mut devmem, t(), 0, cmd).unwrap();

        let ident = devmem
            .get_buffer_by_addr(&mut store, &mut writer, t(), 0, 4096)
            .unwrap();
        assert_eq!(devmem.buffer_for_test(&ident).meta.alloc_frames.len(), 1);
    }

    #[test]
    fn unknown_command_is_fatal() {
        let mut store = Store::create_in_memory().unwrap();
        let mut writer = EventWriter::new();
        let mut devmem = DevMemManager::new();

        let cmd = TowlCommand {
            command: "not-a-real-command".to_string(),
            payload: json!({}),
        };
        let err = react(&mut store, &mut writer, &mut devmem, t(), 0, cmd).unwrap_err();
        assert!(matches!(err, IngestError::UnsupportedPythonCommand(_)));
    }
}
