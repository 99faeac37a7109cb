//! Substrate schema definitions

/// SQL to create the key-value table shared by every store name
pub const CREATE_KV_ITEMS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS kv_items (
    store TEXT NOT NULL,
    key TEXT NOT NULL,
    value BLOB NOT NULL,
    PRIMARY KEY (store, key)
)
"#;

/// All schema creation statements
pub fn all_schema_statements() -> Vec<&'static str> {
    vec![CREATE_KV_ITEMS_TABLE]
}
