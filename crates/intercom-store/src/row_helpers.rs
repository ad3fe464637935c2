use chrono::Utc;

use crate::error::StoreError;

/// Get a required column value from a row, returning CorruptRow on failure.
pub fn get<T: rusqlite::types::FromSql>(
    row: &rusqlite::Row<'_>,
    idx: usize,
    table: &'static str,
    column: &'static str,
) -> Result<T, StoreError> {
    row.get(idx).map_err(|e| StoreError::CorruptRow {
        table,
        column,
        detail: e.to_string(),
    })
}

/// Get an optional column value.
pub fn get_opt<T: rusqlite::types::FromSql>(
    row: &rusqlite::Row<'_>,
    idx: usize,
    table: &'static str,
    column: &'static str,
) -> Result<Option<T>, StoreError> {
    row.get(idx).map_err(|e| StoreError::CorruptRow {
        table,
        column,
        detail: e.to_string(),
    })
}

/// Read an INTEGER 0/1 flag column.
pub fn get_flag(
    row: &rusqlite::Row<'_>,
    idx: usize,
    table: &'static str,
    column: &'static str,
) -> Result<bool, StoreError> {
    let raw: i64 = get(row, idx, table, column)?;
    match raw {
        0 => Ok(false),
        1 => Ok(true),
        other => Err(StoreError::CorruptRow {
            table,
            column,
            detail: format!("flag out of range: {other}"),
        }),
    }
}

/// Read a REAL gain column, rejecting values outside [0, 1].
pub fn get_gain(
    row: &rusqlite::Row<'_>,
    idx: usize,
    table: &'static str,
    column: &'static str,
) -> Result<f32, StoreError> {
    let raw: f64 = get(row, idx, table, column)?;
    if !(0.0..=1.0).contains(&raw) {
        return Err(StoreError::CorruptRow {
            table,
            column,
            detail: format!("gain out of range: {raw}"),
        });
    }
    Ok(raw as f32)
}

/// Current time in the RFC 3339 form every timestamp column uses.
pub fn now() -> String {
    Utc::now().to_rfc3339()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rusqlite::Connection;

    fn with_row<T>(sql: &str, f: impl FnOnce(&rusqlite::Row<'_>) -> T) -> T {
        let conn = Connection::open_in_memory().unwrap();
        let mut stmt = conn.prepare(sql).unwrap();
        let mut rows = stmt.query([]).unwrap();
        let row = rows.next().unwrap().unwrap();
        f(row)
    }

    #[test]
    fn flag_parses_zero_and_one() {
        assert!(with_row("SELECT 1", |r| get_flag(r, 0, "t", "c")).unwrap());
        assert!(!with_row("SELECT 0", |r| get_flag(r, 0, "t", "c")).unwrap());
    }

    #[test]
    fn flag_rejects_other_values() {
        let result = with_row("SELECT 7", |r| get_flag(r, 0, "speakers", "is_deleted"));
        assert!(matches!(
            result,
            Err(StoreError::CorruptRow { table: "speakers", column: "is_deleted", .. })
        ));
    }

    #[test]
    fn gain_rejects_out_of_range() {
        assert!(with_row("SELECT 0.5", |r| get_gain(r, 0, "t", "c")).is_ok());
        assert!(with_row("SELECT 1.5", |r| get_gain(r, 0, "t", "c")).is_err());
    }

    #[test]
    fn get_opt_reads_null() {
        let v: Option<String> = with_row("SELECT NULL", |r| get_opt(r, 0, "t", "c")).unwrap();
        assert!(v.is_none());
    }
}
