//! Database schema definitions
//!
//! Town, detail and tier names use `COLLATE NOCASE`, so equality lookups and
//! uniqueness are case-insensitive without wrapping every query in `LOWER()`.

/// SQL schema for the database
pub const SCHEMA_SQL: &str = r#"
-- Configured sites
CREATE TABLE IF NOT EXISTS sources (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL UNIQUE,
    schedule_url TEXT NOT NULL,
    base_url TEXT NOT NULL,
    image_base_url TEXT,
    active INTEGER NOT NULL DEFAULT 1,
    last_run_at TEXT,
    created_at TEXT NOT NULL
);

-- Where a listing is available
CREATE TABLE IF NOT EXISTS locations (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    source_id INTEGER NOT NULL REFERENCES sources(id),
    town TEXT NOT NULL COLLATE NOCASE,
    detail TEXT NOT NULL COLLATE NOCASE,
    is_default INTEGER NOT NULL DEFAULT 0,
    UNIQUE(source_id, town, detail)
);

CREATE INDEX IF NOT EXISTS idx_locations_source ON locations(source_id);

-- Canonical pricing per tier
CREATE TABLE IF NOT EXISTS tiers (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    source_id INTEGER NOT NULL REFERENCES sources(id),
    name TEXT NOT NULL COLLATE NOCASE,
    stars INTEGER,
    incall_30min TEXT,
    incall_45min TEXT,
    incall_1hr TEXT,
    outcall_1hr TEXT,
    UNIQUE(source_id, name)
);

-- One row per (source, name)
CREATE TABLE IF NOT EXISTS listings (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    source_id INTEGER NOT NULL REFERENCES sources(id),
    name TEXT NOT NULL,
    profile_url TEXT NOT NULL,
    tier TEXT,
    age INTEGER,
    nationality TEXT,
    ethnicity TEXT,
    height TEXT,
    weight TEXT,
    bust TEXT,
    bust_type TEXT,
    measurements TEXT,
    hair_color TEXT,
    eye_color TEXT,
    service_type TEXT,
    incall_30min TEXT,
    incall_45min TEXT,
    incall_1hr TEXT,
    outcall_1hr TEXT,
    rate_notes TEXT,
    images TEXT,
    is_active INTEGER NOT NULL DEFAULT 1,
    is_expired INTEGER NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    UNIQUE(source_id, name)
);

CREATE INDEX IF NOT EXISTS idx_listings_source ON listings(source_id);

-- Replaced wholesale on every successful scrape of the listing
CREATE TABLE IF NOT EXISTS schedules (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    listing_id INTEGER NOT NULL REFERENCES listings(id) ON DELETE CASCADE,
    location_id INTEGER NOT NULL REFERENCES locations(id),
    day_of_week TEXT NOT NULL,
    date TEXT NOT NULL,
    start_time TEXT,
    end_time TEXT,
    is_expired INTEGER NOT NULL DEFAULT 0
);

CREATE INDEX IF NOT EXISTS idx_schedules_listing ON schedules(listing_id);
CREATE INDEX IF NOT EXISTS idx_schedules_date ON schedules(date);

CREATE TABLE IF NOT EXISTS tags (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL UNIQUE
);

CREATE TABLE IF NOT EXISTS listing_tags (
    listing_id INTEGER NOT NULL REFERENCES listings(id) ON DELETE CASCADE,
    tag_id INTEGER NOT NULL REFERENCES tags(id),
    PRIMARY KEY(listing_id, tag_id)
);

-- Run history
CREATE TABLE IF NOT EXISTS runs (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    source TEXT NOT NULL,
    started_at TEXT NOT NULL,
    completed_at TEXT,
    status TEXT NOT NULL,
    total INTEGER NOT NULL DEFAULT 0,
    new_count INTEGER NOT NULL DEFAULT 0,
    updated_count INTEGER NOT NULL DEFAULT 0,
    errors INTEGER NOT NULL DEFAULT 0,
    schedule_items INTEGER NOT NULL DEFAULT 0,
    error_details TEXT,
    config_hash TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_runs_source ON runs(source);
"#;

/// Initializes the database schema
///
/// # Arguments
///
/// * `conn` - The database connection
///
/// # Returns
///
/// * `Ok(())` - Schema initialized successfully
/// * `Err(rusqlite::Error)` - Failed to initialize schema
pub fn initialize_schema(conn: &rusqlite::Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(SCHEMA_SQL)?;
    Ok(())
}
