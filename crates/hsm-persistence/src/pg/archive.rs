//! `PgArchiveService`: eligibility, archive, restore,
//! `restore_and_delete`, batch archive, and cleanup against
//! `machine_event_archive`.
//!
//! Compression: `flate2`'s zlib writer/reader at a configurable level 0-9,
//! the 2-byte CMF/FLG header, DEFLATE body, 4-byte Adler-32 trailer flate2
//! already emits natively. Below `ArchivalConfig::threshold` bytes the blob
//! is stored uncompressed; either form is accepted on read via
//! `looks_like_zlib`.

use chrono::{DateTime, Duration, Utc};
use diesel::prelude::*;
use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use flate2::Compression;
use hsm_core::{ArchiveService, BatchArchiveOutcome, EventLogError, MachineEvent};
use log::{debug, warn};
use std::io::{Read, Write};
use ulid::Ulid;

use crate::config::ArchivalConfig;
use crate::error::PersistenceError;
use crate::pg::{event_to_new_row, row_to_event, ConnectionProvider};
use crate::schema::{event_log, instance_cooldown, machine_event_archive};
use diesel::r2d2::{self, ConnectionManager};
use diesel::PgConnection;

#[derive(Queryable, Debug)]
struct ArchiveRow {
    root_event_id: String,
    machine_id: String,
    events_data: Vec<u8>,
    event_count: i32,
    original_size: i32,
    compressed_size: i32,
    compression_level: i32,
    archived_at: DateTime<Utc>,
    first_event_at: DateTime<Utc>,
    last_event_at: DateTime<Utc>,
    restore_count: i32,
    last_restored_at: Option<DateTime<Utc>>,
}

#[derive(Insertable, Debug)]
#[diesel(table_name = machine_event_archive)]
struct NewArchiveRow {
    root_event_id: String,
    machine_id: String,
    events_data: Vec<u8>,
    event_count: i32,
    original_size: i32,
    compressed_size: i32,
    compression_level: i32,
    first_event_at: DateTime<Utc>,
    last_event_at: DateTime<Utc>,
}

/// Validates the zlib header: `header % 31 == 0`, low nibble of
/// CMF `== 8`, high bit of CMF `== 0`.
fn looks_like_zlib(bytes: &[u8]) -> bool {
    if bytes.len() < 2 {
        return false;
    }
    let cmf = bytes[0];
    let flg = bytes[1];
    let header = u16::from_be_bytes([cmf, flg]);
    cmf & 0x0f == 8 && cmf & 0x80 == 0 && header % 31 == 0
}

fn compress(level: u32, json: &str) -> std::io::Result<Vec<u8>> {
    let mut enc = ZlibEncoder::new(Vec::new(), Compression::new(level));
    enc.write_all(json.as_bytes())?;
    enc.finish()
}

fn decompress_or_raw(bytes: &[u8]) -> Result<String, PersistenceError> {
    if looks_like_zlib(bytes) {
        let mut dec = ZlibDecoder::new(bytes);
        let mut out = String::new();
        dec.read_to_string(&mut out)
            .map_err(|e| PersistenceError::Unknown(format!("zlib decode: {e}")))?;
        Ok(out)
    } else {
        String::from_utf8(bytes.to_vec()).map_err(|e| PersistenceError::Unknown(format!("utf8 decode: {e}")))
    }
}

pub struct PgArchiveService<P: ConnectionProvider> {
    pub provider: P,
    pub config: ArchivalConfig,
}

impl<P: ConnectionProvider> PgArchiveService<P> {
    pub fn new(provider: P, config: ArchivalConfig) -> Self {
        Self { provider, config }
    }

    fn fetch_archive_row(&self, root_event_id: Ulid) -> Result<Option<ArchiveRow>, PersistenceError> {
        let mut conn = self.provider.connection()?;
        machine_event_archive::table
            .filter(machine_event_archive::root_event_id.eq(root_event_id.to_string()))
            .first::<ArchiveRow>(&mut conn)
            .optional()
            .map_err(Into::into)
    }

    /// Whether `root_event_id` reactivated out of the archive more recently
    /// than `restore_cooldown_hours` ago.
    fn in_cooldown(
        &self,
        conn: &mut r2d2::PooledConnection<ConnectionManager<PgConnection>>,
        root_event_id: Ulid,
    ) -> Result<bool, PersistenceError> {
        let cooldown_cutoff = Utc::now() - Duration::hours(self.config.restore_cooldown_hours);
        let reactivated_at: Option<DateTime<Utc>> = instance_cooldown::table
            .filter(instance_cooldown::root_event_id.eq(root_event_id.to_string()))
            .select(instance_cooldown::reactivated_at)
            .first(conn)
            .optional()?;
        Ok(matches!(reactivated_at, Some(ts) if ts > cooldown_cutoff))
    }

    fn decode_events(&self, row: &ArchiveRow) -> Result<Vec<MachineEvent>, PersistenceError> {
        let json = decompress_or_raw(&row.events_data)?;
        serde_json::from_str(&json)
            .map_err(|e| PersistenceError::CorruptArchive(row.root_event_id.clone(), e.to_string()))
    }
}

impl<P: ConnectionProvider> ArchiveService for PgArchiveService<P> {
    fn is_eligible(&self, root_event_id: Ulid) -> Result<bool, EventLogError> {
        let run = || -> Result<bool, PersistenceError> {
            let mut conn = self.provider.connection()?;
            let cutoff = Utc::now() - Duration::days(self.config.days_inactive);
            let latest: Option<DateTime<Utc>> = event_log::table
                .filter(event_log::root_event_id.eq(root_event_id.to_string()))
                .select(diesel::dsl::max(event_log::created_at))
                .first(&mut conn)?;
            if !matches!(latest, Some(ts) if ts < cutoff) {
                return Ok(false);
            }
            Ok(!self.in_cooldown(&mut conn, root_event_id)?)
        };
        run().map_err(Into::into)
    }

    fn eligible_instances(&self, limit: usize) -> Result<Vec<Ulid>, EventLogError> {
        // Root ids whose latest active record is older than `days_inactive`
        //. `archive()` deletes an instance's active rows in the
        // same transaction it inserts the archive row, so an already
        // archived instance is absent from `event_log` by construction, no
        // separate "not already archived" predicate is needed.
        //
        // `restore_and_delete` reinserts rows with a fresh `created_at`
        // (the column default), which alone would make a just-reactivated
        // instance ineligible for a full `days_inactive` rather than just
        // `restore_cooldown_hours`. The two windows are meant to be
        // independent. `instance_cooldown` tracks reactivation time
        // separately so the `NOT EXISTS` predicate below enforces the
        // shorter cooldown without conflating it with inactivity.
        let run = || -> Result<Vec<Ulid>, PersistenceError> {
            let mut conn = self.provider.connection()?;
            let cutoff = Utc::now() - Duration::days(self.config.days_inactive);
            let cooldown_cutoff = Utc::now() - Duration::hours(self.config.restore_cooldown_hours);

            let ids: Vec<String> = event_log::table
                .group_by(event_log::root_event_id)
                .select(event_log::root_event_id)
                .having(diesel::dsl::max(event_log::created_at).lt(cutoff))
                .filter(diesel::dsl::not(diesel::dsl::exists(
                    instance_cooldown::table.filter(
                        instance_cooldown::root_event_id
                            .eq(event_log::root_event_id)
                            .and(instance_cooldown::reactivated_at.gt(cooldown_cutoff)),
                    ),
                )))
                .order(event_log::root_event_id.asc())
                .limit(limit as i64)
                .load(&mut conn)?;

            Ok(ids.into_iter().filter_map(|s| Ulid::from_string(&s).ok()).collect())
        };
        run().map_err(Into::into)
    }

    fn archive(&self, root_event_id: Ulid) -> Result<bool, EventLogError> {
        if !self.config.enabled {
            return Ok(false);
        }
        let run = || -> Result<bool, PersistenceError> {
            let mut conn = self.provider.connection()?;
            conn.transaction::<_, PersistenceError, _>(|tx_conn| {
                if machine_event_archive::table
                    .filter(machine_event_archive::root_event_id.eq(root_event_id.to_string()))
                    .count()
                    .get_result::<i64>(tx_conn)?
                    > 0
                {
                    return Ok(false);
                }

                let rows = event_log::table
                    .filter(event_log::root_event_id.eq(root_event_id.to_string()))
                    .order(event_log::sequence_number.asc())
                    .load::<crate::pg::EventRow>(tx_conn)?;
                if rows.is_empty() {
                    return Ok(false);
                }

                let events: Vec<MachineEvent> = rows.into_iter().filter_map(row_to_event).collect();
                let machine_id = events[0].machine_id.clone();
                let first_event_at = events[0].created_at;
                let last_event_at = events[events.len() - 1].created_at;

                let json = serde_json::to_string(&events).expect("serialize archived events");
                let original_size = json.len();
                let (blob, compressed_size, level) = if original_size < self.config.threshold {
                    (json.into_bytes(), original_size, 0)
                } else {
                    let compressed = compress(self.config.level, &json)
                        .map_err(|e| PersistenceError::Unknown(format!("zlib encode: {e}")))?;
                    let len = compressed.len();
                    (compressed, len, self.config.level as i32)
                };

                diesel::insert_into(machine_event_archive::table)
                    .values(&NewArchiveRow {
                        root_event_id: root_event_id.to_string(),
                        machine_id,
                        events_data: blob,
                        event_count: events.len() as i32,
                        original_size: original_size as i32,
                        compressed_size: compressed_size as i32,
                        compression_level: level,
                        first_event_at,
                        last_event_at,
                    })
                    .execute(tx_conn)?;

                diesel::delete(event_log::table.filter(event_log::root_event_id.eq(root_event_id.to_string())))
                    .execute(tx_conn)?;

                Ok(true)
            })
        };
        run().map_err(Into::into)
    }

    fn restore(&self, root_event_id: Ulid) -> Result<Option<Vec<MachineEvent>>, EventLogError> {
        let run = || -> Result<Option<Vec<MachineEvent>>, PersistenceError> {
            match self.fetch_archive_row(root_event_id)? {
                None => Ok(None),
                Some(row) => {
                    let events = self.decode_events(&row)?;
                    let mut conn = self.provider.connection()?;
                    diesel::update(
                        machine_event_archive::table
                            .filter(machine_event_archive::root_event_id.eq(root_event_id.to_string())),
                    )
                    .set((
                        machine_event_archive::restore_count.eq(machine_event_archive::restore_count + 1),
                        machine_event_archive::last_restored_at.eq(Utc::now()),
                    ))
                    .execute(&mut conn)?;
                    Ok(Some(events))
                }
            }
        };
        run().map_err(Into::into)
    }

    fn restore_and_delete(&self, root_event_id: Ulid) -> Result<Option<Vec<MachineEvent>>, EventLogError> {
        let run = || -> Result<Option<Vec<MachineEvent>>, PersistenceError> {
            let mut conn = self.provider.connection()?;
            conn.transaction::<_, PersistenceError, _>(|tx_conn| {
                let row = machine_event_archive::table
                    .filter(machine_event_archive::root_event_id.eq(root_event_id.to_string()))
                    .for_update()
                    .first::<ArchiveRow>(tx_conn)
                    .optional()?;
                let row = match row {
                    None => return Ok(None),
                    Some(r) => r,
                };
                let events = self.decode_events(&row)?;

                let new_rows: Vec<crate::pg::NewEventRow> = events
                    .iter()
                    .map(|ev| event_to_new_row(ev, ev.context.clone()))
                    .collect();
                diesel::insert_into(event_log::table).values(&new_rows).execute(tx_conn)?;
                diesel::delete(
                    machine_event_archive::table
                        .filter(machine_event_archive::root_event_id.eq(root_event_id.to_string())),
                )
                .execute(tx_conn)?;

                diesel::insert_into(instance_cooldown::table)
                    .values((
                        instance_cooldown::root_event_id.eq(root_event_id.to_string()),
                        instance_cooldown::reactivated_at.eq(Utc::now()),
                    ))
                    .on_conflict(instance_cooldown::root_event_id)
                    .do_update()
                    .set(instance_cooldown::reactivated_at.eq(Utc::now()))
                    .execute(tx_conn)?;

                Ok(Some(events))
            })
        };
        run().map_err(Into::into)
    }

    fn batch_archive(&self, limit: usize) -> Result<BatchArchiveOutcome, EventLogError> {
        let ids = self.eligible_instances(limit)?;
        let mut outcome = BatchArchiveOutcome::default();
        for id in ids {
            match self.archive(id) {
                Ok(true) => outcome.archived += 1,
                Ok(false) => outcome.skipped += 1,
                Err(e) => {
                    warn!("batch_archive: failed to archive {id}: {e}");
                    outcome.failed += 1;
                }
            }
        }
        debug!(
            "batch_archive: archived={} skipped={} failed={}",
            outcome.archived, outcome.skipped, outcome.failed
        );
        Ok(outcome)
    }

    fn cleanup(&self, older_than_days: i64) -> Result<usize, EventLogError> {
        let run = || -> Result<usize, PersistenceError> {
            let mut conn = self.provider.connection()?;
            let cutoff = Utc::now() - Duration::days(older_than_days);
            let deleted = diesel::delete(machine_event_archive::table.filter(machine_event_archive::archived_at.lt(cutoff)))
                .execute(&mut conn)?;
            let cooldown_cutoff = Utc::now() - Duration::hours(self.config.restore_cooldown_hours);
            diesel::delete(instance_cooldown::table.filter(instance_cooldown::reactivated_at.lt(cooldown_cutoff)))
                .execute(&mut conn)?;
            Ok(deleted)
        };
        run().map_err(Into::into)
    }
}
