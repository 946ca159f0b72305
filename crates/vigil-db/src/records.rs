//! Persistence operations for classified records.
//!
//! Writes go through [`insert_record`], which assigns the identifier and
//! timestamp. Reads go through [`query_records`], which filters by kind and
//! time range and always returns newest first.

use chrono::{DateTime, SubsecRound, Utc};
use rusqlite::{params, Connection};
use vigil_types::{
    decode_timestamp, encode_timestamp, ClassificationKind, ClassifiedEvent, RecordQuery,
    MAX_PARAM_VALUE_LEN,
};

use crate::error::RecordError;

/// Inserts a classified record and returns it with its assigned identifier.
///
/// `timestamp` defaults to the current time and is truncated to the stored
/// microsecond precision.
///
/// # Errors
///
/// Returns `RecordError::Invalid` if `param_value` is empty or longer than
/// [`MAX_PARAM_VALUE_LEN`], or `RecordError::Database` on SQL failure.
pub fn insert_record(
    conn: &Connection,
    kind: ClassificationKind,
    param_value: &str,
    timestamp: Option<DateTime<Utc>>,
) -> Result<ClassifiedEvent, RecordError> {
    if param_value.is_empty() {
        return Err(RecordError::Invalid("param_value must not be empty".to_string()));
    }
    if param_value.len() > MAX_PARAM_VALUE_LEN {
        return Err(RecordError::Invalid(format!(
            "param_value exceeds {} bytes",
            MAX_PARAM_VALUE_LEN
        )));
    }

    let timestamp = timestamp.unwrap_or_else(Utc::now).trunc_subsecs(6);
    let id = conn.query_row(
        "INSERT INTO classified_records (timestamp, param_value, classification_type)
         VALUES (?1, ?2, ?3)
         RETURNING id",
        params![encode_timestamp(&timestamp), param_value, kind.as_str()],
        |row| row.get::<_, i64>(0),
    )?;

    Ok(ClassifiedEvent {
        id,
        timestamp,
        param_value: param_value.to_string(),
        classification_type: kind,
    })
}

/// Queries classified records, newest first.
///
/// # Errors
///
/// Returns `RecordError::Database` on SQL failure or `RecordError::Corrupt`
/// if a stored row cannot be decoded.
pub fn query_records(
    conn: &Connection,
    query: &RecordQuery,
) -> Result<Vec<ClassifiedEvent>, RecordError> {
    // WHERE clauses and bind parameters are collected separately so nothing
    // is interpolated.
    let mut clauses: Vec<String> = Vec::new();
    let mut param_values: Vec<Box<dyn rusqlite::types::ToSql>> = Vec::new();
    let mut idx = 1u32;

    if let Some(kind) = query.kind {
        clauses.push(format!("classification_type = ?{idx}"));
        param_values.push(Box::new(kind.as_str()));
        idx += 1;
    }

    if let Some(ref since) = query.since {
        clauses.push(format!("timestamp >= ?{idx}"));
        param_values.push(Box::new(encode_timestamp(since)));
        idx += 1;
    }

    if let Some(ref until) = query.until {
        clauses.push(format!("timestamp <= ?{idx}"));
        param_values.push(Box::new(encode_timestamp(until)));
        idx += 1;
    }

    let where_clause = if clauses.is_empty() {
        String::new()
    } else {
        format!("WHERE {}", clauses.join(" AND "))
    };
    let sql = format!(
        "SELECT id, timestamp, param_value, classification_type
         FROM classified_records
         {where_clause}
         ORDER BY timestamp DESC, id DESC
         LIMIT ?{idx} OFFSET ?{}",
        idx + 1
    );

    let limit = i64::try_from(query.limit)
        .map_err(|_| RecordError::Invalid(format!("limit out of range: {}", query.limit)))?;
    let offset = i64::try_from(query.offset)
        .map_err(|_| RecordError::Invalid(format!("skip out of range: {}", query.offset)))?;
    param_values.push(Box::new(limit));
    param_values.push(Box::new(offset));

    let params_refs: Vec<&dyn rusqlite::types::ToSql> =
        param_values.iter().map(|p| &**p).collect();

    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(params_refs.as_slice(), |row| {
        Ok((
            row.get::<_, i64>(0)?,
            row.get::<_, String>(1)?,
            row.get::<_, String>(2)?,
            row.get::<_, String>(3)?,
        ))
    })?;

    let mut records = Vec::new();
    for row in rows {
        let (id, timestamp, param_value, kind) = row?;
        let timestamp = decode_timestamp(&timestamp).map_err(|e| RecordError::Corrupt {
            id,
            reason: e.to_string(),
        })?;
        let classification_type = kind
            .parse::<ClassificationKind>()
            .map_err(|e| RecordError::Corrupt {
                id,
                reason: e.to_string(),
            })?;
        records.push(ClassifiedEvent {
            id,
            timestamp,
            param_value,
            classification_type,
        });
    }

    Ok(records)
}
