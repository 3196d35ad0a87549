use crate::domain::{Command, CommandRecord, EventLog, LogError, Reading, SensorRecord};
use crate::sqlite::TimestampSequencer;
use async_trait::async_trait;
use rusqlite::{params, Connection, OpenFlags};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, info, instrument};

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS sensor_readings (
        timestamp TEXT PRIMARY KEY NOT NULL,
        sensor_id TEXT NOT NULL,
        value TEXT NOT NULL
    );
    CREATE TABLE IF NOT EXISTS actuator_commands (
        timestamp TEXT PRIMARY KEY NOT NULL,
        device_id TEXT NOT NULL,
        command TEXT NOT NULL
    );
";

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Durable log stored in a single SQLite database
///
/// One write connection is shared behind a mutex, so appends are serialized.
/// Every query opens its own read-only connection; with WAL journaling readers
/// never wait on the writer.
#[derive(Clone)]
pub struct SqliteEventLog {
    inner: Arc<Inner>,
}

struct Inner {
    path: PathBuf,
    writer: Mutex<Writer>,
}

struct Writer {
    conn: Connection,
    readings: TimestampSequencer,
    commands: TimestampSequencer,
}

impl SqliteEventLog {
    /// Open or create the log at `path`
    ///
    /// Failing here means the storage is unusable, which callers treat as fatal.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, LogError> {
        let path = path.as_ref().to_path_buf();
        let open_err = |e: rusqlite::Error| LogError::Open(format!("{}: {}", path.display(), e));

        let conn = Connection::open(&path).map_err(open_err)?;
        let journal_mode: String = conn
            .pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))
            .map_err(open_err)?;
        conn.pragma_update(None, "synchronous", "FULL")
            .map_err(open_err)?;
        conn.busy_timeout(BUSY_TIMEOUT).map_err(open_err)?;
        conn.execute_batch(SCHEMA).map_err(open_err)?;

        let last_reading = max_timestamp(&conn, "sensor_readings").map_err(open_err)?;
        let last_command = max_timestamp(&conn, "actuator_commands").map_err(open_err)?;

        info!(
            path = %path.display(),
            journal_mode = %journal_mode,
            last_reading = ?last_reading,
            last_command = ?last_command,
            "opened event log"
        );

        Ok(Self {
            inner: Arc::new(Inner {
                path,
                writer: Mutex::new(Writer {
                    conn,
                    readings: TimestampSequencer::new(last_reading),
                    commands: TimestampSequencer::new(last_command),
                }),
            }),
        })
    }

    pub fn path(&self) -> &Path {
        &self.inner.path
    }
}

fn max_timestamp(conn: &Connection, table: &str) -> rusqlite::Result<Option<String>> {
    conn.query_row(&format!("SELECT MAX(timestamp) FROM {}", table), [], |row| {
        row.get(0)
    })
}

fn sql_limit(limit: usize) -> i64 {
    i64::try_from(limit).unwrap_or(i64::MAX)
}

impl Inner {
    fn append_reading(&self, reading: &Reading) -> Result<SensorRecord, LogError> {
        let write_err = |e: rusqlite::Error| LogError::Write(e.to_string());
        let mut writer = self
            .writer
            .lock()
            .map_err(|_| LogError::Write("writer lock poisoned".to_string()))?;
        let Writer { conn, readings, .. } = &mut *writer;

        let key = readings.next_key(reading.observed_at)?;
        conn.execute(
            "INSERT INTO sensor_readings (timestamp, sensor_id, value) VALUES (?1, ?2, ?3)",
            params![key, reading.sensor_id, reading.value],
        )
        .map_err(write_err)?;
        readings.commit(key.clone());

        Ok(SensorRecord {
            recorded_at: key,
            sensor_id: reading.sensor_id.clone(),
            value: reading.value.clone(),
        })
    }

    fn append_command(&self, command: &Command) -> Result<CommandRecord, LogError> {
        let write_err = |e: rusqlite::Error| LogError::Write(e.to_string());
        let mut writer = self
            .writer
            .lock()
            .map_err(|_| LogError::Write("writer lock poisoned".to_string()))?;
        let Writer { conn, commands, .. } = &mut *writer;

        let key = commands.next_key(command.issued_at)?;
        conn.execute(
            "INSERT INTO actuator_commands (timestamp, device_id, command) VALUES (?1, ?2, ?3)",
            params![key, command.device_id, command.payload],
        )
        .map_err(write_err)?;
        commands.commit(key.clone());

        Ok(CommandRecord {
            recorded_at: key,
            device_id: command.device_id.clone(),
            command: command.payload.clone(),
        })
    }

    fn reader(&self) -> Result<Connection, LogError> {
        let conn = Connection::open_with_flags(
            &self.path,
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )
        .map_err(|e| LogError::Read(e.to_string()))?;
        conn.busy_timeout(BUSY_TIMEOUT)
            .map_err(|e| LogError::Read(e.to_string()))?;
        Ok(conn)
    }

    fn recent_readings(&self, limit: usize) -> Result<Vec<SensorRecord>, LogError> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        let read_err = |e: rusqlite::Error| LogError::Read(e.to_string());
        let conn = self.reader()?;
        let mut stmt = conn
            .prepare(
                "SELECT timestamp, sensor_id, value FROM sensor_readings
                 ORDER BY timestamp DESC LIMIT ?1",
            )
            .map_err(read_err)?;
        let rows = stmt
            .query_map(params![sql_limit(limit)], |row| {
                Ok(SensorRecord {
                    recorded_at: row.get(0)?,
                    sensor_id: row.get(1)?,
                    value: row.get(2)?,
                })
            })
            .map_err(read_err)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(read_err)
    }

    fn recent_commands(&self, limit: usize) -> Result<Vec<CommandRecord>, LogError> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        let read_err = |e: rusqlite::Error| LogError::Read(e.to_string());
        let conn = self.reader()?;
        let mut stmt = conn
            .prepare(
                "SELECT timestamp, device_id, command FROM actuator_commands
                 ORDER BY timestamp DESC LIMIT ?1",
            )
            .map_err(read_err)?;
        let rows = stmt
            .query_map(params![sql_limit(limit)], |row| {
                Ok(CommandRecord {
                    recorded_at: row.get(0)?,
                    device_id: row.get(1)?,
                    command: row.get(2)?,
                })
            })
            .map_err(read_err)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(read_err)
    }
}

// The blocking work runs on spawn_blocking; dropping the awaiting future
// does not abort an append that already started.
#[async_trait]
impl EventLog for SqliteEventLog {
    #[instrument(skip_all, fields(sensor_id = %reading.sensor_id))]
    async fn append_reading(&self, reading: &Reading) -> Result<SensorRecord, LogError> {
        let inner = Arc::clone(&self.inner);
        let reading = reading.clone();
        let record = tokio::task::spawn_blocking(move || inner.append_reading(&reading))
            .await
            .map_err(|e| LogError::Write(format!("append task failed: {}", e)))??;
        debug!(recorded_at = %record.recorded_at, "appended reading");
        Ok(record)
    }

    #[instrument(skip_all, fields(device_id = %command.device_id))]
    async fn append_command(&self, command: &Command) -> Result<CommandRecord, LogError> {
        let inner = Arc::clone(&self.inner);
        let command = command.clone();
        let record = tokio::task::spawn_blocking(move || inner.append_command(&command))
            .await
            .map_err(|e| LogError::Write(format!("append task failed: {}", e)))??;
        debug!(recorded_at = %record.recorded_at, "appended command");
        Ok(record)
    }

    async fn recent_readings(&self, limit: usize) -> Result<Vec<SensorRecord>, LogError> {
        let inner = Arc::clone(&self.inner);
        tokio::task::spawn_blocking(move || inner.recent_readings(limit))
            .await
            .map_err(|e| LogError::Read(format!("query task failed: {}", e)))?
    }

    async fn recent_commands(&self, limit: usize) -> Result<Vec<CommandRecord>, LogError> {
        let inner = Arc::clone(&self.inner);
        tokio::task::spawn_blocking(move || inner.recent_commands(limit))
            .await
            .map_err(|e| LogError::Read(format!("query task failed: {}", e)))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use tempfile::TempDir;

    fn open_temp() -> (TempDir, SqliteEventLog) {
        let dir = tempfile::tempdir().unwrap();
        let log = SqliteEventLog::open(dir.path().join("events.db")).unwrap();
        (dir, log)
    }

    fn reading(sensor_id: &str, value: &str, second: u32) -> Reading {
        Reading {
            sensor_id: sensor_id.to_string(),
            value: value.to_string(),
            observed_at: Utc.with_ymd_and_hms(2026, 10, 15, 12, 0, second).unwrap(),
        }
    }

    #[tokio::test]
    async fn test_append_and_read_newest_first() {
        let (_dir, log) = open_temp();

        log.append_reading(&reading("humidity", "57", 1)).await.unwrap();
        log.append_reading(&reading("gas", "812", 2)).await.unwrap();
        log.append_reading(&reading("humidity", "60", 3)).await.unwrap();

        let rows = log.recent_readings(3).await.unwrap();
        let values: Vec<_> = rows.iter().map(|r| r.value.as_str()).collect();
        assert_eq!(values, vec!["60", "812", "57"]);
        assert_eq!(rows[0].recorded_at, "2026-10-15T12:00:03.000000Z");
    }

    #[tokio::test]
    async fn test_limit_bounds_results() {
        let (_dir, log) = open_temp();
        for second in 0..5 {
            log.append_reading(&reading("gas", &second.to_string(), second))
                .await
                .unwrap();
        }

        assert_eq!(log.recent_readings(2).await.unwrap().len(), 2);
        assert_eq!(log.recent_readings(50).await.unwrap().len(), 5);
        assert!(log.recent_readings(0).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_colliding_timestamps_are_both_stored() {
        let (_dir, log) = open_temp();

        let first = log.append_reading(&reading("gas", "1", 9)).await.unwrap();
        let second = log.append_reading(&reading("gas", "2", 9)).await.unwrap();

        assert_ne!(first.recorded_at, second.recorded_at);
        assert!(second.recorded_at > first.recorded_at);

        let rows = log.recent_readings(10).await.unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].value, "2");
        assert_eq!(rows[1].value, "1");
    }

    #[tokio::test]
    async fn test_reads_are_stable() {
        let (_dir, log) = open_temp();
        for second in 0..3 {
            log.append_reading(&reading("humidity", "50", second)).await.unwrap();
        }

        let first = log.recent_readings(2).await.unwrap();
        let second = log.recent_readings(2).await.unwrap();
        assert_eq!(first, second);
        assert!(first[0].recorded_at > first[1].recorded_at);
    }

    #[tokio::test]
    async fn test_streams_are_independent() {
        let (_dir, log) = open_temp();
        let issued_at = Utc.with_ymd_and_hms(2026, 10, 15, 12, 0, 0).unwrap();

        log.append_reading(&reading("gas", "3", 0)).await.unwrap();
        let record = log
            .append_command(&Command {
                device_id: "servo".to_string(),
                payload: "90".to_string(),
                issued_at,
            })
            .await
            .unwrap();

        // Same timestamp in the other stream needs no tie-break
        assert_eq!(record.recorded_at, "2026-10-15T12:00:00.000000Z");
        assert_eq!(log.recent_commands(10).await.unwrap(), vec![record]);
        assert_eq!(log.recent_readings(10).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_reopen_keeps_history_and_ordering() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("events.db");

        {
            let log = SqliteEventLog::open(&path).unwrap();
            log.append_reading(&reading("gas", "old", 30)).await.unwrap();
        }

        let log = SqliteEventLog::open(&path).unwrap();
        // Clock behind the stored history
        let record = log.append_reading(&reading("gas", "new", 10)).await.unwrap();
        assert_eq!(record.recorded_at, "2026-10-15T12:00:30.000000Z#000001");

        let rows = log.recent_readings(10).await.unwrap();
        assert_eq!(rows[0].value, "new");
        assert_eq!(rows[1].value, "old");
    }

    #[tokio::test]
    async fn test_reopen_after_exhausted_suffix_keeps_order() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("events.db");
        drop(SqliteEventLog::open(&path).unwrap());

        {
            let conn = Connection::open(&path).unwrap();
            conn.execute(
                "INSERT INTO sensor_readings (timestamp, sensor_id, value) VALUES (?1, ?2, ?3)",
                params!["2026-10-15T12:00:30.000000Z#999999", "gas", "old"],
            )
            .unwrap();
        }

        let log = SqliteEventLog::open(&path).unwrap();
        let record = log.append_reading(&reading("gas", "new", 10)).await.unwrap();
        assert_eq!(record.recorded_at, "2026-10-15T12:00:30.000001Z");

        let rows = log.recent_readings(10).await.unwrap();
        assert_eq!(rows[0].value, "new");
        assert_eq!(rows[1].value, "old");
    }

    #[test]
    fn test_schema_is_keyed_by_timestamp() {
        let (dir, _log) = open_temp();
        let conn = Connection::open(dir.path().join("events.db")).unwrap();

        for table in ["sensor_readings", "actuator_commands"] {
            let mut stmt = conn
                .prepare(&format!("PRAGMA table_info({})", table))
                .unwrap();
            let columns: Vec<(String, i64)> = stmt
                .query_map([], |row| Ok((row.get(1)?, row.get(5)?)))
                .unwrap()
                .collect::<Result<_, _>>()
                .unwrap();

            assert_eq!(columns.len(), 3, "{} has {:?}", table, columns);
            assert_eq!(columns[0], ("timestamp".to_string(), 1));
            assert!(columns[1..].iter().all(|(_, pk)| *pk == 0));
        }
    }

    #[test]
    fn test_open_fails_for_unwritable_path() {
        let dir = tempfile::tempdir().unwrap();
        let result = SqliteEventLog::open(dir.path().join("missing").join("events.db"));
        assert!(matches!(result, Err(LogError::Open(_))));
    }

    #[tokio::test]
    async fn test_concurrent_appends_produce_unique_rows() {
        let (_dir, log) = open_temp();
        let at = Utc.with_ymd_and_hms(2026, 10, 15, 12, 0, 0).unwrap();

        let mut handles = Vec::new();
        for i in 0..16 {
            let log = log.clone();
            handles.push(tokio::spawn(async move {
                log.append_command(&Command {
                    device_id: "servo".to_string(),
                    payload: i.to_string(),
                    issued_at: at,
                })
                .await
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        let rows = log.recent_commands(100).await.unwrap();
        assert_eq!(rows.len(), 16);
        for pair in rows.windows(2) {
            assert!(pair[0].recorded_at > pair[1].recorded_at);
        }
    }
}
