// Postgres persistence for harvested events. Writes stage in memory and
// flush inside a single transaction on commit, so a mid-batch failure
// leaves the table untouched.

use std::sync::Mutex;

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Postgres, Transaction};
use tracing::{debug, info};
use uuid::Uuid;

use nightjar_common::{Event, SourceTag};

use crate::error::{Result, StoreError};

/// A persisted event: the normalized record plus its storage identity.
#[derive(Debug, Clone)]
pub struct StoredEvent {
    pub id: Uuid,
    pub event: Event,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
}

/// A row from the events table.
#[derive(Debug, sqlx::FromRow)]
struct EventRow {
    id: Uuid,
    title: String,
    start_time: NaiveDateTime,
    end_time: Option<NaiveDateTime>,
    location: String,
    price: Option<String>,
    url: String,
    description: String,
    image_url: Option<String>,
    owner: Option<String>,
    owner_url: Option<String>,
    ticket_url: Option<String>,
    source: String,
    first_seen: DateTime<Utc>,
    last_seen: DateTime<Utc>,
}

impl TryFrom<EventRow> for StoredEvent {
    type Error = StoreError;

    fn try_from(row: EventRow) -> Result<Self> {
        let source: SourceTag = row
            .source
            .parse()
            .map_err(|e: String| StoreError::Corrupt(format!("event {}: {e}", row.id)))?;
        Ok(StoredEvent {
            id: row.id,
            event: Event {
                title: row.title,
                start_time: row.start_time,
                end_time: row.end_time,
                location: row.location,
                price: row.price,
                url: row.url,
                description: row.description,
                image_url: row.image_url,
                owner: row.owner,
                owner_url: row.owner_url,
                ticket_url: row.ticket_url,
                source,
            },
            first_seen: row.first_seen,
            last_seen: row.last_seen,
        })
    }
}

enum StagedOp {
    Insert { id: Uuid, values: Event },
    Update { id: Uuid, values: Event },
}

/// Postgres-backed event store.
pub struct PgEventStore {
    pool: PgPool,
    staged: Mutex<Vec<StagedOp>>,
}

impl PgEventStore {
    pub async fn connect(database_url: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(4)
            .connect(database_url)
            .await?;
        Ok(Self::new(pool))
    }

    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            staged: Mutex::new(Vec::new()),
        }
    }

    /// Run the embedded SQL migrations.
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| StoreError::Migration(e.to_string()))?;
        Ok(())
    }

    /// Find a committed event with the exact same title and location whose
    /// start time falls on the given calendar day. Staged writes are not
    /// visible here.
    pub async fn find_matching(
        &self,
        title: &str,
        location: &str,
        day: NaiveDate,
    ) -> Result<Option<StoredEvent>> {
        let row = sqlx::query_as::<_, EventRow>(
            r#"
            SELECT * FROM events
            WHERE title = $1
              AND location = $2
              AND start_time::date = $3
            LIMIT 1
            "#,
        )
        .bind(title)
        .bind(location)
        .bind(day)
        .fetch_optional(&self.pool)
        .await?;

        row.map(StoredEvent::try_from).transpose()
    }

    /// Stage an insert. Returns the identity the row will get on commit.
    pub fn stage_insert(&self, values: Event) -> Uuid {
        let id = Uuid::new_v4();
        self.staged
            .lock()
            .expect("staged ops lock poisoned")
            .push(StagedOp::Insert { id, values });
        id
    }

    /// Stage an update of every mutable field of an existing row.
    pub fn stage_update(&self, id: Uuid, values: Event) {
        self.staged
            .lock()
            .expect("staged ops lock poisoned")
            .push(StagedOp::Update { id, values });
    }

    /// Number of currently staged writes.
    pub fn staged_len(&self) -> usize {
        self.staged.lock().expect("staged ops lock poisoned").len()
    }

    /// Flush all staged writes in one transaction. The staged batch is
    /// consumed either way; a failed batch is dropped, not retried.
    pub async fn commit(&self) -> Result<u64> {
        let ops: Vec<StagedOp> = {
            let mut staged = self.staged.lock().expect("staged ops lock poisoned");
            staged.drain(..).collect()
        };
        if ops.is_empty() {
            debug!("Nothing staged, skipping commit");
            return Ok(0);
        }

        let count = ops.len() as u64;
        let now = Utc::now();
        let mut tx: Transaction<'_, Postgres> = self.pool.begin().await?;

        for op in &ops {
            match op {
                StagedOp::Insert { id, values } => insert_event(&mut tx, *id, values, now).await?,
                StagedOp::Update { id, values } => update_event(&mut tx, *id, values, now).await?,
            }
        }

        tx.commit().await?;
        info!(rows = count, "Committed event batch");
        Ok(count)
    }

    /// Total number of committed events, for observability.
    pub async fn count(&self) -> Result<i64> {
        let n: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM events")
            .fetch_one(&self.pool)
            .await?;
        Ok(n)
    }
}

async fn insert_event(
    tx: &mut Transaction<'_, Postgres>,
    id: Uuid,
    e: &Event,
    now: DateTime<Utc>,
) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO events
            (id, title, start_time, end_time, location, price, url,
             description, image_url, owner, owner_url, ticket_url, source,
             first_seen, last_seen)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $14)
        "#,
    )
    .bind(id)
    .bind(&e.title)
    .bind(e.start_time)
    .bind(e.end_time)
    .bind(&e.location)
    .bind(&e.price)
    .bind(&e.url)
    .bind(&e.description)
    .bind(&e.image_url)
    .bind(&e.owner)
    .bind(&e.owner_url)
    .bind(&e.ticket_url)
    .bind(e.source.to_string())
    .bind(now)
    .execute(&mut **tx)
    .await?;
    Ok(())
}

async fn update_event(
    tx: &mut Transaction<'_, Postgres>,
    id: Uuid,
    e: &Event,
    now: DateTime<Utc>,
) -> Result<()> {
    sqlx::query(
        r#"
        UPDATE events SET
            title = $2, start_time = $3, end_time = $4, location = $5,
            price = $6, url = $7, description = $8, image_url = $9,
            owner = $10, owner_url = $11, ticket_url = $12, source = $13,
            last_seen = $14
        WHERE id = $1
        "#,
    )
    .bind(id)
    .bind(&e.title)
    .bind(e.start_time)
    .bind(e.end_time)
    .bind(&e.location)
    .bind(&e.price)
    .bind(&e.url)
    .bind(&e.description)
    .bind(&e.image_url)
    .bind(&e.owner)
    .bind(&e.owner_url)
    .bind(&e.ticket_url)
    .bind(e.source.to_string())
    .bind(now)
    .execute(&mut **tx)
    .await?;
    Ok(())
}
