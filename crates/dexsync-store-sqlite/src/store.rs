//! [`SqliteStore`], the SQLite implementation of [`LocalStore`].

use std::path::Path;

use chrono::Utc;
use dexsync_core::{
  hash::hash_json,
  species::SpeciesId,
  store::{LocalStore, LocalVersionRecord, SyncCheckpoint},
  tidbit::TidbitPayload,
  txn::{CommitReceipt, PayloadMigration, StagedChunk, SyncCompletion},
};
use rusqlite::OptionalExtension as _;
use tracing::debug;

use crate::{
  encode::{
    decode_count, decode_payload, encode_dt, encode_species, RawCheckpoint, RawHistory,
  },
  schema::SCHEMA,
  Error, Result,
};

/// A payload row ready to be written: `(species, revision, json, hash)`.
type EncodedPayload = (String, i64, String, String);

// ─── Store ───────────────────────────────────────────────────────────────────

/// A local dataset store backed by a single SQLite file.
///
/// Cloning is cheap; the inner connection is reference-counted.
#[derive(Clone)]
pub struct SqliteStore {
  conn: tokio_rusqlite::Connection,
}

impl SqliteStore {
  /// Open (or create) a store at `path` and run schema initialisation.
  pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
    let conn = tokio_rusqlite::Connection::open(path).await?;
    let store = Self { conn };
    store.init_schema().await?;
    Ok(store)
  }

  /// Open an in-memory store, mostly for tests.
  pub async fn open_in_memory() -> Result<Self> {
    let conn = tokio_rusqlite::Connection::open_in_memory().await?;
    let store = Self { conn };
    store.init_schema().await?;
    Ok(store)
  }

  async fn init_schema(&self) -> Result<()> {
    self
      .conn
      .call(|conn| {
        conn.execute_batch(SCHEMA)?;
        Ok(())
      })
      .await?;
    Ok(())
  }

  fn encode_payloads(payloads: &[TidbitPayload]) -> Result<Vec<EncodedPayload>> {
    payloads
      .iter()
      .map(|p| {
        Ok((
          encode_species(p.species_id),
          i64::from(p.tidbit_revision),
          serde_json::to_string(p)?,
          hash_json(p)?,
        ))
      })
      .collect()
  }
}

// ─── LocalStore impl ─────────────────────────────────────────────────────────

impl LocalStore for SqliteStore {
  type Error = Error;

  // ── Version state ─────────────────────────────────────────────────────────

  async fn load_version_record(&self) -> Result<LocalVersionRecord> {
    let (current, raws): (Option<String>, Vec<RawHistory>) = self
      .conn
      .call(|conn| {
        let current: Option<String> = conn
          .query_row(
            "SELECT current_version FROM local_version WHERE id = 1",
            [],
            |r| r.get(0),
          )
          .optional()?;

        let mut stmt = conn.prepare(
          "SELECT version, timestamp, total_entities, sync_duration_ms
           FROM version_history ORDER BY seq",
        )?;
        let rows = stmt
          .query_map([], |row| {
            Ok(RawHistory {
              version:          row.get(0)?,
              timestamp:        row.get(1)?,
              total_entities:   row.get(2)?,
              sync_duration_ms: row.get(3)?,
            })
          })?
          .collect::<rusqlite::Result<Vec<_>>>()?;

        Ok((current, rows))
      })
      .await?;

    Ok(LocalVersionRecord {
      current_version: current,
      version_history: raws
        .into_iter()
        .map(RawHistory::into_entry)
        .collect::<Result<_>>()?,
    })
  }

  async fn load_checkpoint(&self) -> Result<Option<SyncCheckpoint>> {
    let raw: Option<RawCheckpoint> = self
      .conn
      .call(|conn| {
        Ok(conn
          .query_row(
            "SELECT version, chunk_index, timestamp FROM sync_checkpoint WHERE id = 1",
            [],
            |row| {
              Ok(RawCheckpoint {
                version:     row.get(0)?,
                chunk_index: row.get(1)?,
                timestamp:   row.get(2)?,
              })
            },
          )
          .optional()?)
      })
      .await?;

    raw.map(RawCheckpoint::into_checkpoint).transpose()
  }

  // ── Writes ────────────────────────────────────────────────────────────────

  async fn commit_chunk(&self, chunk: StagedChunk) -> Result<CommitReceipt> {
    let rows        = Self::encode_payloads(&chunk.payloads)?;
    let version     = chunk.version.clone();
    let chunk_index = i64::try_from(chunk.chunk_index)
      .map_err(|_| Error::Decode(format!("chunk index {} overflows", chunk.chunk_index)))?;
    let now         = Utc::now();
    let now_str     = encode_dt(now);

    let written = self
      .conn
      .call(move |conn| {
        let tx = conn.transaction()?;
        {
          let mut upsert = tx.prepare(
            "INSERT INTO payloads (
               species_id, tidbit_revision, payload_json, content_hash,
               dataset_version, committed_at
             ) VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT (species_id) DO UPDATE SET
               tidbit_revision = excluded.tidbit_revision,
               payload_json    = excluded.payload_json,
               content_hash    = excluded.content_hash,
               dataset_version = excluded.dataset_version,
               committed_at    = excluded.committed_at",
          )?;
          for (species, revision, json, hash) in &rows {
            upsert.execute(rusqlite::params![species, revision, json, hash, version, now_str])?;
          }
        }
        tx.execute(
          "INSERT INTO sync_checkpoint (id, version, chunk_index, timestamp)
           VALUES (1, ?1, ?2, ?3)
           ON CONFLICT (id) DO UPDATE SET
             version     = excluded.version,
             chunk_index = excluded.chunk_index,
             timestamp   = excluded.timestamp",
          rusqlite::params![version, chunk_index, now_str],
        )?;
        tx.commit()?;
        Ok(rows.len())
      })
      .await?;

    debug!(chunk = chunk.chunk_index, rows = written, "chunk committed");
    Ok(CommitReceipt {
      chunk_index:  Some(chunk.chunk_index),
      rows_written: written,
      migrated:     0,
      committed_at: now,
    })
  }

  async fn finish_sync(&self, completion: SyncCompletion) -> Result<CommitReceipt> {
    let version     = completion.version.clone();
    let at_str      = encode_dt(completion.completed_at);
    let total       = i64::try_from(completion.total_entities)
      .map_err(|_| Error::Decode("total_entities overflows".into()))?;
    let duration    = i64::try_from(completion.sync_duration_ms)
      .map_err(|_| Error::Decode("sync_duration_ms overflows".into()))?;
    let retain: Vec<String> =
      completion.retain_species.iter().copied().map(encode_species).collect();
    let migration   = completion.migration;
    let now         = Utc::now();

    let (written, migrated) = self
      .conn
      .call(move |conn| {
        let tx = conn.transaction()?;
        tx.execute(
          "INSERT INTO local_version (id, current_version) VALUES (1, ?1)
           ON CONFLICT (id) DO UPDATE SET current_version = excluded.current_version",
          rusqlite::params![version],
        )?;
        tx.execute(
          "INSERT INTO version_history (version, timestamp, total_entities, sync_duration_ms)
           VALUES (?1, ?2, ?3, ?4)",
          rusqlite::params![version, at_str, total, duration],
        )?;

        let existing: Vec<String> = {
          let mut stmt = tx.prepare("SELECT species_id FROM payloads")?;
          stmt
            .query_map([], |r| r.get(0))?
            .collect::<rusqlite::Result<Vec<_>>>()?
        };
        let mut pruned = 0usize;
        for species in existing.iter().filter(|s| !retain.contains(s)) {
          pruned += tx.execute(
            "DELETE FROM payloads WHERE species_id = ?1",
            rusqlite::params![species],
          )?;
        }

        let migrated = match &migration {
          Some(migration) => migrate_rows(&tx, migration)?,
          None => 0,
        };

        tx.execute("DELETE FROM sync_checkpoint", [])?;
        tx.commit()?;
        Ok((2 + pruned, migrated))
      })
      .await?;

    if migrated > 0 {
      debug!(migrated, "payloads migrated during finish");
    }
    Ok(CommitReceipt {
      chunk_index:  None,
      rows_written: written,
      migrated,
      committed_at: now,
    })
  }

  async fn clear_checkpoint(&self) -> Result<()> {
    self
      .conn
      .call(|conn| {
        conn.execute("DELETE FROM sync_checkpoint", [])?;
        Ok(())
      })
      .await?;
    Ok(())
  }

  async fn migrate_payloads(&self, migration: PayloadMigration) -> Result<usize> {
    let migrated = self
      .conn
      .call(move |conn| {
        let tx = conn.transaction()?;
        let migrated = migrate_rows(&tx, &migration)?;
        tx.commit()?;
        Ok(migrated)
      })
      .await?;

    Ok(migrated)
  }

  // ── Reads ─────────────────────────────────────────────────────────────────

  async fn get_payload(&self, species: SpeciesId) -> Result<Option<TidbitPayload>> {
    let id_str = encode_species(species);

    let json: Option<String> = self
      .conn
      .call(move |conn| {
        Ok(conn
          .query_row(
            "SELECT payload_json FROM payloads WHERE species_id = ?1",
            rusqlite::params![id_str],
            |r| r.get(0),
          )
          .optional()?)
      })
      .await?;

    json.as_deref().map(decode_payload).transpose()
  }

  async fn species_count(&self) -> Result<usize> {
    let n: i64 = self
      .conn
      .call(|conn| Ok(conn.query_row("SELECT COUNT(*) FROM payloads", [], |r| r.get(0))?))
      .await?;
    decode_count(n, "payload count")
  }
}

// ─── Migration ───────────────────────────────────────────────────────────────

/// Rewrite every payload stamped with `migration.from_version` inside `tx`
/// and restamp it with `migration.to_version`. Rows written by a newer
/// release are left alone.
fn migrate_rows(
  tx: &rusqlite::Transaction<'_>,
  migration: &PayloadMigration,
) -> Result<usize, tokio_rusqlite::Error> {
  let rows: Vec<(String, String)> = {
    let mut stmt =
      tx.prepare("SELECT species_id, payload_json FROM payloads WHERE dataset_version = ?1")?;
    stmt
      .query_map(rusqlite::params![migration.from_version], |r| Ok((r.get(0)?, r.get(1)?)))?
      .collect::<rusqlite::Result<Vec<_>>>()?
  };

  for (species, json) in &rows {
    let value: serde_json::Value = serde_json::from_str(json)
      .map_err(|e| tokio_rusqlite::Error::Other(Box::new(e)))?;
    let migrated = (migration.transform)(value).map_err(|msg| {
      tokio_rusqlite::Error::Other(format!("species {species}: {msg}").into())
    })?;
    let payload: TidbitPayload = serde_json::from_value(migrated)
      .map_err(|e| tokio_rusqlite::Error::Other(Box::new(e)))?;
    let hash = hash_json(&payload)
      .map_err(|e| tokio_rusqlite::Error::Other(Box::new(e)))?;
    let encoded = serde_json::to_string(&payload)
      .map_err(|e| tokio_rusqlite::Error::Other(Box::new(e)))?;
    tx.execute(
      "UPDATE payloads
       SET payload_json = ?2, content_hash = ?3, tidbit_revision = ?4, dataset_version = ?5
       WHERE species_id = ?1",
      rusqlite::params![
        species,
        encoded,
        hash,
        i64::from(payload.tidbit_revision),
        migration.to_version
      ],
    )?;
  }

  Ok(rows.len())
}
