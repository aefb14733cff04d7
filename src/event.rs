//! C3 — Event Decoder. Dispatches a payload's leading token to a typed wire
//! event. This is the wire-level `EventKind` (string tokens), distinct from
//! the storage-side `model::EventKind` (small integer enum).
//!
//! Grounded on `towl-db/towl/db/events/event_reader.py`'s dispatch table and
//! fixed-column parsers, and `towl-db/towl/db/events/data.py`'s `EventKind`
//! string constants.

use serde::Deserialize;

#[derive(Debug, Clone, PartialEq)]
pub enum WireEvent {
    DevMemMalloc {
        addr: u64,
        size: u64,
        stream: u64,
    },
    DevMemFree {
        addr: u64,
    },
    DevMemSummary {
        used: u64,
        workspace: u64,
        persistent: u64,
        tag: String,
    },
    RecipeLaunch {
        workspace: u64,
        handle: u64,
        nbuffers: u32,
        name: String,
    },
    RecipeLaunchBuf {
        index: u32,
        tid: u64,
        ty: String,
        device_addr: u64,
        handle_addr: u64,
        synapse_name: String,
    },
    RecipeFinished {
        handle: u64,
    },
    PythonTowlCmd(TowlCommand),
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct TowlCommand {
    pub command: String,
    pub payload: serde_json::Value,
}

/// Splits `payload` on its first space into `kind_token` and `rest`, then
/// dispatches. Unknown kinds and malformed bodies return `None` and are
/// silently skipped — `event::decode` never raises; only the reactors that
/// consume a *known* but semantically invalid event raise fatal errors.
pub fn decode(payload: &str) -> Option<WireEvent> {
    let (kind, rest) = payload.split_once(' ').unwrap_or((payload, ""));
    match kind {
        "devmem.malloc" => decode_malloc(rest),
        "devmem.free" => decode_free(rest),
        "devmem.summary" => decode_summary(rest),
        "recipe.launch" => decode_launch(rest),
        "recipe.launch.buf" => decode_launch_buf(rest),
        "recipe.finished" => decode_finished(rest),
        "python" => decode_python(rest),
        _ => None,
    }
}

fn hex(s: &str) -> Option<u64> {
    u64::from_str_radix(s.trim_start_matches("0x"), 16).ok()
}

// The wire format interleaves literal label words between values (e.g.
// `ff00 size 1024 stream 0`, not `ff00 1024 0`) — columns at odd/even
// positions per `event_reader.py`'s `columns[N]` indexing, not a plain
// positional tuple.

fn decode_malloc(rest: &str) -> Option<WireEvent> {
    let columns: Vec<&str> = rest.split(' ').collect();
    let addr = hex(columns.first()?)?;
    let size = columns.get(2)?.parse().ok()?;
    let stream = columns.get(4)?.parse().ok()?;
    Some(WireEvent::DevMemMalloc { addr, size, stream })
}

fn decode_free(rest: &str) -> Option<WireEvent> {
    let addr = hex(rest.trim())?;
    Some(WireEvent::DevMemFree { addr })
}

fn decode_summary(rest: &str) -> Option<WireEvent> {
    let columns: Vec<&str> = rest.splitn(8, ' ').collect();
    let used = columns.get(1)?.parse().ok()?;
    let workspace = columns.get(3)?.parse().ok()?;
    let persistent = columns.get(5)?.parse().ok()?;
    let tag = (*columns.get(7)?).to_string();
    Some(WireEvent::DevMemSummary {
        used,
        workspace,
        persistent,
        tag,
    })
}

fn decode_launch(rest: &str) -> Option<WireEvent> {
    let columns: Vec<&str> = rest.splitn(8, ' ').collect();
    let workspace = columns.get(1)?.parse().ok()?;
    let handle = hex(columns.get(3)?)?;
    let nbuffers = columns.get(5)?.parse().ok()?;
    let name = (*columns.get(7)?).to_string();
    Some(WireEvent::RecipeLaunch {
        workspace,
        handle,
        nbuffers,
        name,
    })
}

fn decode_launch_buf(rest: &str) -> Option<WireEvent> {
    let columns: Vec<&str> = rest.splitn(11, ' ').collect();
    let index = columns.first()?.parse().ok()?;
    let tid = columns.get(2)?.parse().ok()?;
    let ty = (*columns.get(4)?).to_string();
    let device_addr = hex(columns.get(6)?)?;
    let handle_addr = hex(columns.get(8)?)?;
    let synapse_name = (*columns.get(10)?).to_string();
    Some(WireEvent::RecipeLaunchBuf {
        index,
        tid,
        ty,
        device_addr,
        handle_addr,
        synapse_name,
    })
}

fn decode_finished(rest: &str) -> Option<WireEvent> {
    let handle = hex(rest.trim())?;
    Some(WireEvent::RecipeFinished { handle })
}

fn decode_python(rest: &str) -> Option<WireEvent> {
    let json_str = rest.strip_prefix("TOWL-CMD: ")?;
    let cmd: TowlCommand = serde_json::from_str(json_str).ok()?;
    Some(WireEvent::PythonTowlCmd(cmd))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_malloc() {
        let ev = decode("devmem.malloc deadbeef size 100 stream 2").unwrap();
        assert_eq!(
            ev,
            WireEvent::DevMemMalloc {
                addr: 0xdeadbeef,
                size: 100,
                stream: 2
            }
        );
    }

    #[test]
    fn decodes_free() {
        let ev = decode("devmem.free deadbeef").unwrap();
        assert_eq!(ev, WireEvent::DevMemFree { addr: 0xdeadbeef });
    }

    #[test]
    fn decodes_summary_with_spaced_tag() {
        let ev = decode("devmem.summary used 10 workspace 20 persistent 30 tag a tag with spaces").unwrap();
        assert_eq!(
            ev,
            WireEvent::DevMemSummary {
                used: 10,
                workspace: 20,
                persistent: 30,
                tag: "a tag with spaces".to_string()
            }
        );
    }

    #[test]
    fn decodes_launch_and_buf() {
        let ev = decode("recipe.launch ws 16 handle cafe nbufs 2 name my_recipe").unwrap();
        assert_eq!(
            ev,
            WireEvent::RecipeLaunch {
                workspace: 16,
                handle: 0xcafe,
                nbuffers: 2,
                name: "my_recipe".to_string()
            }
        );

        let ev = decode("recipe.launch.buf 0 id 7 type input device deadbeef handle cafe00 synapse syn_input").unwrap();
        assert_eq!(
            ev,
            WireEvent::RecipeLaunchBuf {
                index: 0,
                tid: 7,
                ty: "input".to_string(),
                device_addr: 0xdeadbeef,
                handle_addr: 0xcafe00,
                synapse_name: "syn_input".to_string(),
            }
        );
    }

    #[test]
    fn decodes_finished() {
        assert_eq!(
            decode("recipe.finished cafe").unwrap(),
            WireEvent::RecipeFinished { handle: 0xcafe }
        );
    }

    #[test]
    fn decodes_python_towl_cmd() {
        let line = r#"python TOWL-CMD: {"command": "script-log", "payload": {"message": "hi"}}"#;
        let ev = decode(line).unwrap();
        match ev {
            WireEvent::PythonTowlCmd(cmd) => assert_eq!(cmd.command, "script-log"),
            _ => panic!("expected PythonTowlCmd"),
        }
    }

    #[test]
    fn plain_python_log_line_is_skipped() {
        assert!(decode("python some regular stdout line").is_none());
    }

    #[test]
    fn unknown_kind_is_skipped() {
        assert!(decode("totally.unknown foo bar").is_none());
    }
}
