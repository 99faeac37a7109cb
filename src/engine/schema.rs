//! Engine object definitions

use std::path::Path;

use super::handle::path_literal;

/// SQL to create the settings table
pub const CREATE_SETTINGS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS settings (
    key TEXT UNIQUE NOT NULL,
    value TEXT
)
"#;

pub const DROP_SETTINGS_TABLE: &str = "DROP TABLE IF EXISTS settings";

/// Insert a setting, or update its value on key conflict
pub const UPSERT_SETTING: &str = r#"
INSERT INTO settings (key, value)
VALUES (?, ?)
ON CONFLICT (key)
DO UPDATE SET value = excluded.value
"#;

pub const SELECT_SETTINGS: &str = "SELECT key, value FROM settings ORDER BY key";

/// Most recent channel entries, newest first
pub const SELECT_TOP_K: &str = r#"
SELECT id, title, link, media_url, summary, content, media_descriptions, published_ms
FROM channel
ORDER BY published_ms DESC
LIMIT ?
"#;

/// View over a registered parquet file
pub fn create_channel_view(path: &Path) -> String {
    format!(
        "CREATE VIEW IF NOT EXISTS channel AS SELECT * FROM read_parquet({})",
        path_literal(path)
    )
}

/// Bulk insert of a persisted settings file
pub fn import_settings(path: &Path) -> String {
    format!(
        "INSERT INTO settings SELECT key, value FROM read_parquet({})",
        path_literal(path)
    )
}

/// Export of the settings table in parquet format
pub fn export_settings(path: &Path) -> String {
    format!(
        "COPY (SELECT key, value FROM settings ORDER BY key) TO {} (FORMAT 'parquet')",
        path_literal(path)
    )
}
