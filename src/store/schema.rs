//! SQL DDL for the store (§4.10). Grouped the way
//! `towl-db/towl/db/store/sql.py` groups its query-string constants, but as
//! plain Rust string constants rather than a class-per-concern split, since
//! this module has no sibling query builder that needs the namespacing.

pub const SCHEMA_VERSION: i64 = 20240206;

pub const CREATE_TABLES: &str = "
CREATE TABLE meta (
    version INTEGER NOT NULL
);

CREATE TABLE event_kind (
    ident INTEGER PRIMARY KEY,
    name  TEXT NOT NULL
);

CREATE TABLE events (
    ident     INTEGER PRIMARY KEY,
    kind      INTEGER NOT NULL REFERENCES event_kind(ident),
    reference INTEGER NOT NULL,
    timestamp TEXT NOT NULL,
    tid       INTEGER NOT NULL
);

CREATE TABLE data_buffers (
    ident              INTEGER PRIMARY KEY,
    addr               INTEGER NOT NULL,
    size               INTEGER NOT NULL,
    stream             INTEGER NOT NULL,
    meta               TEXT NOT NULL,
    event_malloc       INTEGER NOT NULL REFERENCES events(ident),
    event_free         INTEGER REFERENCES events(ident),
    event_first_launch INTEGER REFERENCES events(ident),
    event_last_launch  INTEGER REFERENCES events(ident)
);

CREATE TABLE events_devmem_buf (
    ident         INTEGER PRIMARY KEY REFERENCES events(ident),
    buffer_ident  INTEGER NOT NULL REFERENCES data_buffers(ident),
    is_allocation INTEGER NOT NULL
);

CREATE TABLE events_devmem_summary (
    ident      INTEGER PRIMARY KEY REFERENCES events(ident),
    used       INTEGER NOT NULL,
    workspace  INTEGER NOT NULL,
    persistent INTEGER NOT NULL,
    tag        TEXT NOT NULL
);

CREATE TABLE data_launches (
    ident          INTEGER PRIMARY KEY,
    handle         INTEGER NOT NULL,
    workspace      INTEGER NOT NULL,
    recipe_name    TEXT NOT NULL,
    event_launch   INTEGER NOT NULL REFERENCES events(ident),
    event_finished INTEGER REFERENCES events(ident)
);

CREATE TABLE data_launches_bufs (
    launch_ident  INTEGER NOT NULL REFERENCES data_launches(ident),
    buffer_ident  INTEGER NOT NULL REFERENCES data_buffers(ident),
    \"index\"       INTEGER NOT NULL,
    offset        INTEGER NOT NULL,
    synapse_name  TEXT NOT NULL,
    PRIMARY KEY (launch_ident, \"index\")
);

CREATE TABLE events_pythonlog (
    ident    INTEGER PRIMARY KEY REFERENCES events(ident),
    command  TEXT NOT NULL,
    message  TEXT,
    funcname TEXT,
    filename TEXT,
    lineno   INTEGER,
    content  TEXT,
    mark_id  INTEGER
);
";

pub const CREATE_VIEWS: &str = "
CREATE VIEW view_events AS
    SELECT e.ident, e.kind, ek.name AS kind_name, e.reference, e.timestamp, e.tid
    FROM events e JOIN event_kind ek ON e.kind = ek.ident;

CREATE VIEW view_launches AS
    SELECT e.ident AS event_ident, e.timestamp, e.tid,
           l.ident, l.handle, l.workspace, l.recipe_name, l.event_launch, l.event_finished
    FROM events e JOIN data_launches l ON e.reference = l.ident
    WHERE e.kind = 2;

CREATE VIEW view_launches_bufs AS
    SELECT b.launch_ident, b.buffer_ident, b.\"index\", b.offset, b.synapse_name,
           db.addr * 2 AS buffer_addr
    FROM data_launches_bufs b JOIN data_buffers db ON b.buffer_ident = db.ident;

CREATE VIEW view_devmem_buf AS
    SELECT e.ident AS event_ident, e.timestamp, e.tid,
           d.buffer_ident, d.is_allocation,
           b.addr * 2 AS addr, b.size, b.stream
    FROM events e
    JOIN events_devmem_buf d ON e.reference = d.ident
    JOIN data_buffers b ON d.buffer_ident = b.ident
    WHERE e.kind = 0;

CREATE VIEW view_devmem_summary AS
    SELECT e.ident AS event_ident, e.timestamp, e.tid,
           s.used, s.workspace, s.persistent, s.tag
    FROM events e JOIN events_devmem_summary s ON e.reference = s.ident
    WHERE e.kind = 1;

CREATE VIEW view_pythonlog AS
    SELECT e.ident AS event_ident, e.timestamp, e.tid,
           p.command, p.message, p.funcname, p.filename, p.lineno, p.content, p.mark_id
    FROM events e JOIN events_pythonlog p ON e.reference = p.ident
    WHERE e.kind = 4;
";

pub const SEED_EVENT_KINDS: &str = "
INSERT INTO event_kind (ident, name) VALUES
    (0, 'DEVMEM_BUF'),
    (1, 'DEVMEM_SUMMARY'),
    (2, 'RECIPE_LAUNCH'),
    (3, 'RECIPE_FINISHED'),
    (4, 'PYTHON_LOG');
";
