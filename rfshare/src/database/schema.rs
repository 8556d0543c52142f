//! Database schema definitions.

/// Table names, one per record kind.
pub const TABLES: &[&str] = &[
    "frontends",
    "lnbs",
    "dishes",
    "dvbs_muxes",
    "dvbc_muxes",
    "dvbt_muxes",
    "satellites",
];

/// SQL schema for the record store.
///
/// Every record kind is a key/value table: `k` holds the JSON-encoded key,
/// `v` the JSON-encoded record.
pub const SCHEMA_SQL: &str = r#"
-- Tuner frontends and their reservation blocks
CREATE TABLE IF NOT EXISTS frontends (
    k TEXT PRIMARY KEY NOT NULL,
    v TEXT NOT NULL,
    updated_at INTEGER DEFAULT (strftime('%s', 'now'))
);

-- LNBs with nested connections and networks
CREATE TABLE IF NOT EXISTS lnbs (
    k TEXT PRIMARY KEY NOT NULL,
    v TEXT NOT NULL,
    updated_at INTEGER DEFAULT (strftime('%s', 'now'))
);

-- Dishes and positioner state
CREATE TABLE IF NOT EXISTS dishes (
    k TEXT PRIMARY KEY NOT NULL,
    v TEXT NOT NULL,
    updated_at INTEGER DEFAULT (strftime('%s', 'now'))
);

-- Muxes, one table per delivery system family
CREATE TABLE IF NOT EXISTS dvbs_muxes (
    k TEXT PRIMARY KEY NOT NULL,
    v TEXT NOT NULL,
    updated_at INTEGER DEFAULT (strftime('%s', 'now'))
);

CREATE TABLE IF NOT EXISTS dvbc_muxes (
    k TEXT PRIMARY KEY NOT NULL,
    v TEXT NOT NULL,
    updated_at INTEGER DEFAULT (strftime('%s', 'now'))
);

CREATE TABLE IF NOT EXISTS dvbt_muxes (
    k TEXT PRIMARY KEY NOT NULL,
    v TEXT NOT NULL,
    updated_at INTEGER DEFAULT (strftime('%s', 'now'))
);

-- Satellites with nested band scan state
CREATE TABLE IF NOT EXISTS satellites (
    k TEXT PRIMARY KEY NOT NULL,
    v TEXT NOT NULL,
    updated_at INTEGER DEFAULT (strftime('%s', 'now'))
);
"#;
