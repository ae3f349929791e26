use super::model::{
    Channel, HistoryAction, HistoryEntry, OcrResult, ParcelRecord, ParcelStatus,
};
use crate::database::{self, conversion_error, from_millis, now_millis, SharedConnection};
use crate::error::{IntakeError, Result};
use crate::logging::log_debug;
use chrono::{DateTime, Duration, Utc};
use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Params, Row};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS parcels (
    id TEXT PRIMARY KEY,
    tracking_number TEXT,
    tracking_barcode_url TEXT,
    parcel_image_urls TEXT NOT NULL DEFAULT '[]',
    ocr_result TEXT,
    ocr_text TEXT,
    status TEXT NOT NULL DEFAULT 'pending',
    channel TEXT,
    description TEXT,
    category TEXT,
    quantity INTEGER,
    sourced_by TEXT,
    created_by TEXT,
    updated_by TEXT,
    created_at INTEGER NOT NULL,
    updated_at INTEGER NOT NULL,
    history TEXT NOT NULL DEFAULT '[]'
);
CREATE INDEX IF NOT EXISTS idx_parcels_tracking_number ON parcels(tracking_number);
CREATE INDEX IF NOT EXISTS idx_parcels_status ON parcels(status);
CREATE INDEX IF NOT EXISTS idx_parcels_created_at ON parcels(created_at);
";

const SELECT_COLUMNS: &str = "SELECT id, tracking_number, tracking_barcode_url, parcel_image_urls,
        ocr_result, status, channel, description, category, quantity,
        sourced_by, created_by, updated_by, created_at, updated_at, history
     FROM parcels";

/// Newest first; rowid breaks ties between records created in the same millisecond
const NEWEST_FIRST: &str = "ORDER BY created_at DESC, rowid DESC";

pub const DEFAULT_PAGE_SIZE: u32 = 10;
pub const MAX_PAGE_SIZE: u32 = 100;
pub const SEARCH_LIMIT: u32 = 20;

/// Filters for [`ParcelStore::list`]; unset fields match everything
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParcelQuery {
    /// Case-insensitive substring of the tracking number
    pub tracking_number: Option<String>,
    pub category: Option<String>,
    pub status: Option<ParcelStatus>,
    pub channel: Option<Channel>,
    pub created_by: Option<String>,
    pub page: Option<u32>,
    pub limit: Option<u32>,
}

impl ParcelQuery {
    pub fn page(&self) -> u32 {
        self.page.unwrap_or(1).max(1)
    }

    pub fn limit(&self) -> u32 {
        self.limit
            .unwrap_or(DEFAULT_PAGE_SIZE)
            .clamp(1, MAX_PAGE_SIZE)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ParcelPage {
    pub items: Vec<ParcelRecord>,
    pub total: u64,
    pub page: u32,
    pub limit: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatusCount {
    pub status: ParcelStatus,
    pub count: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChannelCount {
    pub channel: Channel,
    pub count: u64,
}

/// SQLite persistence for parcel records. Every write is one transaction
/// under the connection lock.
#[derive(Clone)]
pub struct ParcelStore {
    conn: SharedConnection,
}

impl ParcelStore {
    /// Wrap a connection and make sure the schema exists
    pub fn new(conn: SharedConnection) -> Result<Self> {
        let store = Self { conn };
        store.migrate()?;
        Ok(store)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::new(database::open_in_memory()?)
    }

    pub fn migrate(&self) -> Result<()> {
        database::lock(&self.conn)?.execute_batch(SCHEMA)?;
        Ok(())
    }

    /// Persist `record`, appending a `create` or `update` history entry.
    ///
    /// Create vs update is decided by whether the id is already stored. On
    /// create the status is reset to `pending` and `created_at` is stamped.
    /// History is appended to the stored copy, so a stale in-memory record
    /// can never drop earlier entries.
    pub fn save(&self, record: &mut ParcelRecord) -> Result<HistoryAction> {
        let mut conn = database::lock(&self.conn)?;
        let tx = conn.transaction()?;

        let stored_history: Option<String> = tx
            .query_row(
                "SELECT history FROM parcels WHERE id = ?1",
                params![record.id.to_string()],
                |row| row.get(0),
            )
            .optional()?;
        let stored_history = stored_history
            .map(|json| serde_json::from_str::<Vec<HistoryEntry>>(&json))
            .transpose()?;

        let action = persist(&tx, record, stored_history)?;
        tx.commit()?;
        Ok(action)
    }

    pub fn find_by_id(&self, id: &Uuid) -> Result<Option<ParcelRecord>> {
        let conn = database::lock(&self.conn)?;
        select_by_id(&conn, id)
    }

    /// Like [`find_by_id`](Self::find_by_id) but a missing record is an error
    pub fn get(&self, id: &Uuid) -> Result<ParcelRecord> {
        self.find_by_id(id)?
            .ok_or_else(|| IntakeError::NotFound(format!("Parcel {}", id)))
    }

    pub fn count(&self) -> Result<u64> {
        let conn = database::lock(&self.conn)?;
        let total: i64 = conn.query_row("SELECT COUNT(*) FROM parcels", [], |row| row.get(0))?;
        Ok(total as u64)
    }

    pub fn list(&self, query: &ParcelQuery) -> Result<ParcelPage> {
        let mut clauses: Vec<&str> = Vec::new();
        let mut values: Vec<Value> = Vec::new();

        if let Some(tracking_number) = &query.tracking_number {
            clauses.push("instr(lower(coalesce(tracking_number, '')), lower(?)) > 0");
            values.push(Value::Text(tracking_number.clone()));
        }
        if let Some(category) = &query.category {
            clauses.push("category = ?");
            values.push(Value::Text(category.clone()));
        }
        if let Some(status) = query.status {
            clauses.push("status = ?");
            values.push(Value::Text(status.as_str().to_string()));
        }
        if let Some(channel) = query.channel {
            clauses.push("channel = ?");
            values.push(Value::Text(channel.as_str().to_string()));
        }
        if let Some(created_by) = &query.created_by {
            clauses.push("created_by = ?");
            values.push(Value::Text(created_by.clone()));
        }

        let where_sql = if clauses.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", clauses.join(" AND "))
        };

        let (page, limit) = (query.page(), query.limit());
        let offset = (page as i64 - 1) * limit as i64;

        let conn = database::lock(&self.conn)?;
        let total: i64 = conn.query_row(
            &format!("SELECT COUNT(*) FROM parcels {}", where_sql),
            params_from_iter(values.iter()),
            |row| row.get(0),
        )?;

        let sql = format!(
            "{} {} {} LIMIT {} OFFSET {}",
            SELECT_COLUMNS, where_sql, NEWEST_FIRST, limit, offset
        );
        let items = query_records(&conn, &sql, params_from_iter(values.iter()))?;

        Ok(ParcelPage {
            items,
            total: total as u64,
            page,
            limit,
        })
    }

    /// Tracking number or OCR text containing `term`, case-insensitive
    pub fn search(&self, term: &str) -> Result<Vec<ParcelRecord>> {
        let term = term.trim();
        if term.is_empty() {
            return Ok(Vec::new());
        }
        self.select(
            &format!(
                "WHERE instr(lower(coalesce(tracking_number, '')), lower(?1)) > 0
                    OR instr(lower(coalesce(ocr_text, '')), lower(?1)) > 0
                 {} LIMIT {}",
                NEWEST_FIRST, SEARCH_LIMIT
            ),
            params![term],
        )
    }

    pub fn find_by_status(&self, status: ParcelStatus) -> Result<Vec<ParcelRecord>> {
        self.select(
            &format!("WHERE status = ?1 {}", NEWEST_FIRST),
            params![status.as_str()],
        )
    }

    pub fn find_by_channel(&self, channel: Channel) -> Result<Vec<ParcelRecord>> {
        self.select(
            &format!("WHERE channel = ?1 {}", NEWEST_FIRST),
            params![channel.as_str()],
        )
    }

    /// Records created within `[start, end]`
    pub fn find_by_date_range(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<ParcelRecord>> {
        self.select(
            &format!("WHERE created_at >= ?1 AND created_at <= ?2 {}", NEWEST_FIRST),
            params![start.timestamp_millis(), end.timestamp_millis()],
        )
    }

    pub fn find_recent(&self, days: i64) -> Result<Vec<ParcelRecord>> {
        let end = Utc::now();
        self.find_by_date_range(end - Duration::days(days), end)
    }

    pub fn find_with_images(&self) -> Result<Vec<ParcelRecord>> {
        self.select(
            &format!("WHERE parcel_image_urls != '[]' {}", NEWEST_FIRST),
            [],
        )
    }

    pub fn find_without_tracking_number(&self) -> Result<Vec<ParcelRecord>> {
        self.select(
            &format!(
                "WHERE tracking_number IS NULL OR tracking_number = '' {}",
                NEWEST_FIRST
            ),
            [],
        )
    }

    pub fn find_by_quantity_range(&self, min: i64, max: i64) -> Result<Vec<ParcelRecord>> {
        self.select(
            &format!("WHERE quantity >= ?1 AND quantity <= ?2 {}", NEWEST_FIRST),
            params![min, max],
        )
    }

    /// Count per status, ordered by status name
    pub fn stats_by_status(&self) -> Result<Vec<StatusCount>> {
        let conn = database::lock(&self.conn)?;
        let mut stmt = conn.prepare(
            "SELECT status, COUNT(*) FROM parcels GROUP BY status ORDER BY status ASC",
        )?;
        let stats = stmt
            .query_map([], |row| {
                let status: String = row.get(0)?;
                Ok(StatusCount {
                    status: status.parse().map_err(|e| conversion_error(0, e))?,
                    count: row.get::<_, i64>(1)? as u64,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(stats)
    }

    /// Count per channel for records that have one, ordered by channel name
    pub fn stats_by_channel(&self) -> Result<Vec<ChannelCount>> {
        let conn = database::lock(&self.conn)?;
        let mut stmt = conn.prepare(
            "SELECT channel, COUNT(*) FROM parcels
             WHERE channel IS NOT NULL
             GROUP BY channel ORDER BY channel ASC",
        )?;
        let stats = stmt
            .query_map([], |row| {
                let channel: String = row.get(0)?;
                Ok(ChannelCount {
                    channel: channel.parse().map_err(|e| conversion_error(0, e))?,
                    count: row.get::<_, i64>(1)? as u64,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(stats)
    }

    pub fn update_ocr_result(&self, id: &Uuid, result: OcrResult) -> Result<Option<ParcelRecord>> {
        self.modify(id, |record| record.apply_ocr_result(result))
    }

    pub fn mark_processed(&self, id: &Uuid) -> Result<Option<ParcelRecord>> {
        self.modify(id, ParcelRecord::mark_processed)
    }

    pub fn mark_failed(&self, id: &Uuid, error: &str) -> Result<Option<ParcelRecord>> {
        self.modify(id, |record| record.mark_failed(error))
    }

    /// Remove a record, returning what was stored
    pub fn delete(&self, id: &Uuid) -> Result<Option<ParcelRecord>> {
        let mut conn = database::lock(&self.conn)?;
        let tx = conn.transaction()?;

        let Some(record) = select_by_id(&tx, id)? else {
            return Ok(None);
        };
        tx.execute("DELETE FROM parcels WHERE id = ?1", params![id.to_string()])?;
        tx.commit()?;
        Ok(Some(record))
    }

    /// Load, change and save a record in one transaction; `None` when it
    /// does not exist. A record deleted concurrently is never re-inserted.
    pub fn modify<F>(&self, id: &Uuid, change: F) -> Result<Option<ParcelRecord>>
    where
        F: FnOnce(&mut ParcelRecord),
    {
        let mut conn = database::lock(&self.conn)?;
        let tx = conn.transaction()?;

        let Some(mut record) = select_by_id(&tx, id)? else {
            return Ok(None);
        };
        let stored_history = std::mem::take(&mut record.history);
        change(&mut record);
        persist(&tx, &mut record, Some(stored_history))?;
        tx.commit()?;
        Ok(Some(record))
    }

    fn select<P: Params>(&self, where_sql: &str, params: P) -> Result<Vec<ParcelRecord>> {
        let conn = database::lock(&self.conn)?;
        query_records(&conn, &format!("{} {}", SELECT_COLUMNS, where_sql), params)
    }
}

fn select_by_id(conn: &Connection, id: &Uuid) -> Result<Option<ParcelRecord>> {
    let record = conn
        .query_row(
            &format!("{} WHERE id = ?1", SELECT_COLUMNS),
            params![id.to_string()],
            row_to_record,
        )
        .optional()?;
    Ok(record)
}

/// Stamp `record`, append its history entry and write the row.
/// `stored_history` is `None` when the row does not exist yet.
fn persist(
    conn: &Connection,
    record: &mut ParcelRecord,
    stored_history: Option<Vec<HistoryEntry>>,
) -> Result<HistoryAction> {
    let now = now_millis();
    let (action, mut history) = match stored_history {
        Some(history) => (HistoryAction::Update, history),
        None => {
            record.created_at = now;
            record.status = ParcelStatus::Pending;
            (HistoryAction::Create, Vec::new())
        }
    };
    record.updated_at = now;

    history.push(HistoryEntry {
        action,
        at: now,
        snapshot: record.snapshot(),
    });
    record.history = history;

    write_row(conn, record, action)?;

    log_debug(
        "parcels",
        &format!(
            "Saved parcel {} ({:?}, {} history entries)",
            record.id,
            action,
            record.history.len()
        ),
    )
    .unwrap_or_default();

    Ok(action)
}

fn query_records<P: Params>(conn: &Connection, sql: &str, params: P) -> Result<Vec<ParcelRecord>> {
    let mut stmt = conn.prepare(sql)?;
    let records = stmt
        .query_map(params, row_to_record)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(records)
}

fn write_row(conn: &Connection, record: &ParcelRecord, action: HistoryAction) -> Result<()> {
    let image_urls = serde_json::to_string(&record.parcel_image_urls)?;
    let ocr_result = record
        .ocr_result
        .as_ref()
        .map(serde_json::to_string)
        .transpose()?;
    let ocr_text = record.ocr_result.as_ref().map(|r| r.extracted_text.as_str());
    let history = serde_json::to_string(&record.history)?;

    let sql = match action {
        HistoryAction::Create => {
            "INSERT INTO parcels (
                id, tracking_number, tracking_barcode_url, parcel_image_urls, ocr_result, ocr_text,
                status, channel, description, category, quantity, sourced_by, created_by,
                updated_by, created_at, updated_at, history
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17)"
        }
        HistoryAction::Update => {
            "UPDATE parcels SET
                tracking_number = ?2, tracking_barcode_url = ?3, parcel_image_urls = ?4,
                ocr_result = ?5, ocr_text = ?6, status = ?7, channel = ?8, description = ?9,
                category = ?10, quantity = ?11, sourced_by = ?12, created_by = ?13,
                updated_by = ?14, created_at = ?15, updated_at = ?16, history = ?17
             WHERE id = ?1"
        }
    };

    conn.execute(
        sql,
        params![
            record.id.to_string(),
            record.tracking_number,
            record.tracking_barcode_url,
            image_urls,
            ocr_result,
            ocr_text,
            record.status.as_str(),
            record.channel.map(|c| c.as_str()),
            record.description,
            record.category,
            record.quantity,
            record.sourced_by,
            record.created_by,
            record.updated_by,
            record.created_at.timestamp_millis(),
            record.updated_at.timestamp_millis(),
            history,
        ],
    )?;
    Ok(())
}

fn json_column<T: serde::de::DeserializeOwned>(row: &Row, idx: usize) -> rusqlite::Result<T> {
    let text: String = row.get(idx)?;
    serde_json::from_str(&text).map_err(|e| conversion_error(idx, e))
}

fn row_to_record(row: &Row) -> rusqlite::Result<ParcelRecord> {
    let id: String = row.get(0)?;
    let status: String = row.get(5)?;
    let channel: Option<String> = row.get(6)?;
    let ocr_result: Option<String> = row.get(4)?;

    Ok(ParcelRecord {
        id: Uuid::parse_str(&id).map_err(|e| conversion_error(0, e))?,
        tracking_number: row.get(1)?,
        tracking_barcode_url: row.get(2)?,
        parcel_image_urls: json_column(row, 3)?,
        ocr_result: ocr_result
            .map(|json| serde_json::from_str(&json))
            .transpose()
            .map_err(|e| conversion_error(4, e))?,
        status: status.parse().map_err(|e| conversion_error(5, e))?,
        channel: channel
            .map(|c| c.parse::<Channel>())
            .transpose()
            .map_err(|e| conversion_error(6, e))?,
        description: row.get(7)?,
        category: row.get(8)?,
        quantity: row.get(9)?,
        sourced_by: row.get(10)?,
        created_by: row.get(11)?,
        updated_by: row.get(12)?,
        created_at: from_millis(row.get(13)?)?,
        updated_at: from_millis(row.get(14)?)?,
        history: json_column(row, 15)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> ParcelStore {
        ParcelStore::open_in_memory().unwrap()
    }

    fn saved(store: &ParcelStore, change: impl FnOnce(&mut ParcelRecord)) -> ParcelRecord {
        let mut record = ParcelRecord::new();
        change(&mut record);
        store.save(&mut record).unwrap();
        record
    }

    #[test]
    fn test_create_then_update_history() {
        let store = store();
        let mut record = ParcelRecord::new();
        record.status = ParcelStatus::Processed;

        assert_eq!(store.save(&mut record).unwrap(), HistoryAction::Create);
        assert_eq!(record.status, ParcelStatus::Pending);
        assert_eq!(record.history.len(), 1);

        record.description = Some("two jackets".to_string());
        assert_eq!(store.save(&mut record).unwrap(), HistoryAction::Update);

        let loaded = store.get(&record.id).unwrap();
        let actions: Vec<_> = loaded.history.iter().map(|h| h.action).collect();
        assert_eq!(actions, vec![HistoryAction::Create, HistoryAction::Update]);
        assert_eq!(loaded.history[0].snapshot.description, None);
        assert_eq!(
            loaded.history[1].snapshot.description.as_deref(),
            Some("two jackets")
        );
        assert_eq!(loaded, record);
    }

    #[test]
    fn test_stale_copy_does_not_drop_history() {
        let store = store();
        let record = saved(&store, |_| {});
        let mut stale = record.clone();

        store.mark_processed(&record.id).unwrap();
        stale.category = Some("shoes".to_string());
        store.save(&mut stale).unwrap();

        let loaded = store.get(&record.id).unwrap();
        assert_eq!(loaded.history.len(), 3);
        assert_eq!(loaded.category.as_deref(), Some("shoes"));
    }

    #[test]
    fn test_list_filters_and_paginates() {
        let store = store();
        for i in 0..5 {
            saved(&store, |r| {
                r.tracking_number = Some(format!("SN00{}", i));
                r.category = Some(if i % 2 == 0 { "toys" } else { "books" }.to_string());
            });
        }

        let page = store
            .list(&ParcelQuery {
                category: Some("toys".to_string()),
                limit: Some(2),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(page.total, 3);
        assert_eq!(page.items.len(), 2);
        assert_eq!(page.items[0].tracking_number.as_deref(), Some("SN004"));

        let page = store
            .list(&ParcelQuery {
                tracking_number: Some("sn001".to_string()),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(page.total, 1);
        assert_eq!(page.page, 1);
        assert_eq!(page.limit, DEFAULT_PAGE_SIZE);
    }

    #[test]
    fn test_search_matches_ocr_text() {
        let store = store();
        let record = saved(&store, |_| {});
        store
            .update_ocr_result(
                &record.id,
                OcrResult {
                    extracted_text: "PKG-2024-001".to_string(),
                    confidence: 0.95,
                    processed_at: Utc::now(),
                    provider: "mock-ocr".to_string(),
                    error: None,
                },
            )
            .unwrap();

        let found = store.search("pkg-2024").unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].status, ParcelStatus::Processed);
        assert!(store.search("   ").unwrap().is_empty());
    }

    #[test]
    fn test_specialised_finders() {
        let store = store();
        saved(&store, |r| {
            r.parcel_image_urls = vec!["http://x/1.png".to_string()];
            r.quantity = Some(4);
            r.channel = Some(Channel::Taobao);
        });
        saved(&store, |r| {
            r.tracking_number = Some(String::new());
            r.quantity = Some(10);
        });

        assert_eq!(store.find_with_images().unwrap().len(), 1);
        assert_eq!(store.find_without_tracking_number().unwrap().len(), 2);
        assert_eq!(store.find_by_quantity_range(1, 5).unwrap().len(), 1);
        assert_eq!(store.find_by_channel(Channel::Taobao).unwrap().len(), 1);
        assert_eq!(store.find_recent(7).unwrap().len(), 2);
        assert_eq!(store.find_by_status(ParcelStatus::Pending).unwrap().len(), 2);
    }

    #[test]
    fn test_stats() {
        let store = store();
        let a = saved(&store, |r| r.channel = Some(Channel::Xianyu));
        saved(&store, |r| r.channel = Some(Channel::Alibaba));
        saved(&store, |_| {});
        store.mark_failed(&a.id, "blurry").unwrap();

        assert_eq!(
            store.stats_by_status().unwrap(),
            vec![
                StatusCount { status: ParcelStatus::Failed, count: 1 },
                StatusCount { status: ParcelStatus::Pending, count: 2 },
            ]
        );
        assert_eq!(
            store.stats_by_channel().unwrap(),
            vec![
                ChannelCount { channel: Channel::Alibaba, count: 1 },
                ChannelCount { channel: Channel::Xianyu, count: 1 },
            ]
        );
    }

    #[test]
    fn test_delete() {
        let store = store();
        let record = saved(&store, |_| {});
        assert!(store.delete(&record.id).unwrap().is_some());
        assert!(store.find_by_id(&record.id).unwrap().is_none());
        assert!(store.delete(&record.id).unwrap().is_none());
        assert!(store.mark_processed(&record.id).unwrap().is_none());
    }

    #[test]
    fn test_concurrent_modify_keeps_every_change() {
        let store = store();
        let record = saved(&store, |r| r.quantity = Some(0));

        std::thread::scope(|scope| {
            for _ in 0..8 {
                scope.spawn(|| {
                    for _ in 0..5 {
                        store
                            .modify(&record.id, |r| r.quantity = Some(r.quantity.unwrap_or(0) + 1))
                            .unwrap()
                            .unwrap();
                    }
                });
            }
        });

        let loaded = store.get(&record.id).unwrap();
        assert_eq!(loaded.quantity, Some(40));
        assert_eq!(loaded.history.len(), 41);
        assert_eq!(loaded.history.last().unwrap().snapshot.quantity, Some(40));
    }

    #[test]
    fn test_modify_racing_delete_never_reinserts() {
        let store = store();
        let ids: Vec<Uuid> = (0..20).map(|_| saved(&store, |_| {}).id).collect();

        std::thread::scope(|scope| {
            scope.spawn(|| {
                for id in &ids {
                    store.delete(id).unwrap();
                }
            });
            scope.spawn(|| {
                for id in ids.iter().rev() {
                    store.mark_processed(id).unwrap();
                }
            });
        });

        assert_eq!(store.count().unwrap(), 0);
        for id in &ids {
            assert!(store.mark_failed(id, "gone").unwrap().is_none());
        }
        assert_eq!(store.count().unwrap(), 0);
    }
}
