use chrono::{DateTime, Utc};

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

/// Parse a string into an enum, returning CorruptRow on failure.
pub fn parse_enum<T: std::str::FromStr>(
    raw: &str,
    table: &'static str,
    column: &'static str,
) -> Result<T, StoreError> {
    raw.parse().map_err(|_| StoreError::CorruptRow {
        table,
        column,
        detail: format!("unknown variant: {raw}"),
    })
}

/// Parse an RFC 3339 timestamp column.
pub fn parse_time(
    raw: &str,
    table: &'static str,
    column: &'static str,
) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| StoreError::CorruptRow {
            table,
            column,
            detail: format!("invalid timestamp {raw}: {e}"),
        })
}

pub fn now_rfc3339() -> String {
    Utc::now().to_rfc3339()
}

#[cfg(test)]
mod tests {
    use super::*;
    use netherlink_core::models::RequestStatus;

    #[test]
    fn parse_enum_valid() {
        let status: RequestStatus = parse_enum("accepted", "friend_requests", "status").unwrap();
        assert_eq!(status, RequestStatus::Accepted);
    }

    #[test]
    fn parse_enum_invalid() {
        let err = parse_enum::<RequestStatus>("maybe", "friend_requests", "status").unwrap_err();
        assert!(matches!(
            err,
            StoreError::CorruptRow { table: "friend_requests", column: "status", .. }
        ));
    }

    #[test]
    fn parse_time_roundtrips_now() {
        let raw = now_rfc3339();
        assert!(parse_time(&raw, "users", "created_at").is_ok());
    }

    #[test]
    fn parse_time_rejects_garbage() {
        assert!(parse_time("yesterday", "users", "created_at").is_err());
    }
}
