use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use portal_schemas::{
    ActionKind, AuditEvent, NewPurchaseOrder, PoSnapshot, PoState, PurchaseOrder,
};
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{PgConnection, PgPool, Row};
use uuid::Uuid;

pub const ENV_DB_URL: &str = "PORTAL_DATABASE_URL";

const PO_COLUMNS: &str = r#"
          po_id,
          owner_id,
          po_number,
          state,
          version,
          locked_by,
          locked_at,
          lock_expires_at,
          acknowledged_at,
          sent_at,
          cancelled_at,
          expected_delivery_date,
          created_at_utc,
          updated_at_utc
"#;

const AUDIT_COLUMNS: &str = r#"
          event_id,
          po_id,
          owner_id,
          po_version,
          action,
          actor_id,
          occurred_at,
          before_snapshot,
          after_snapshot,
          metadata,
          hash_prev,
          hash_self
"#;

/// Connect with explicit pool limits. `acquire_timeout` bounds how long a
/// request waits for a pooled connection.
pub async fn connect(url: &str, max_connections: u32, acquire_timeout: Duration) -> Result<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(max_connections)
        .acquire_timeout(acquire_timeout)
        .connect(url)
        .await
        .context("failed to connect to Postgres")?;
    Ok(pool)
}

/// Run embedded SQLx migrations.
pub async fn migrate(pool: &PgPool) -> Result<()> {
    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .context("db migrate failed")?;
    Ok(())
}

#[derive(Debug, Clone)]
pub struct DbStatus {
    pub ok: bool,
    pub has_purchase_orders_table: bool,
    pub has_audit_table: bool,
}

/// Connectivity + schema presence.
pub async fn status(pool: &PgPool) -> Result<DbStatus> {
    let (one,): (i32,) = sqlx::query_as::<_, (i32,)>("select 1")
        .fetch_one(pool)
        .await
        .context("status connectivity query failed")?;

    let (has_po, has_audit): (bool, bool) = sqlx::query_as::<_, (bool, bool)>(
        r#"
        select
          exists (select 1 from information_schema.tables
                  where table_schema = 'public' and table_name = 'purchase_orders'),
          exists (select 1 from information_schema.tables
                  where table_schema = 'public' and table_name = 'po_audit_events')
        "#,
    )
    .fetch_one(pool)
    .await
    .context("status table-exists query failed")?;

    Ok(DbStatus {
        ok: one == 1,
        has_purchase_orders_table: has_po,
        has_audit_table: has_audit,
    })
}

// ---------------------------------------------------------------------------
// Purchase orders
// ---------------------------------------------------------------------------

/// Insert a purchase order row. Order intake owns creation; this exists for
/// seeding and fixtures.
pub async fn insert_purchase_order(conn: &mut PgConnection, po: &NewPurchaseOrder) -> Result<()> {
    sqlx::query(
        r#"
        insert into purchase_orders (
          po_id, owner_id, po_number, state, version, expected_delivery_date, created_at_utc
        ) values (
          $1, $2, $3, $4, $5, $6, $7
        )
        "#,
    )
    .bind(po.po_id)
    .bind(po.owner_id)
    .bind(&po.po_number)
    .bind(po.state.as_str())
    .bind(po.version)
    .bind(po.expected_delivery_date)
    .bind(po.created_at_utc)
    .execute(conn)
    .await
    .context("insert_purchase_order failed")?;
    Ok(())
}

/// Load a PO for its owner and take the row lock for the rest of the
/// enclosing transaction. Concurrent actions on the same PO queue here and
/// observe the winner's committed row.
///
/// A PO owned by someone else is indistinguishable from a missing one.
pub async fn load_po_for_update(
    conn: &mut PgConnection,
    po_id: Uuid,
    owner_id: Uuid,
) -> Result<Option<PurchaseOrder>> {
    let sql = format!(
        "select {PO_COLUMNS} from purchase_orders where po_id = $1 and owner_id = $2 for update"
    );
    let row = sqlx::query(&sql)
        .bind(po_id)
        .bind(owner_id)
        .fetch_optional(conn)
        .await
        .context("load_po_for_update failed")?;

    row.as_ref().map(po_from_row).transpose()
}

/// Plain owner-scoped read without a row lock.
pub async fn fetch_po_for_owner(
    pool: &PgPool,
    po_id: Uuid,
    owner_id: Uuid,
) -> Result<Option<PurchaseOrder>> {
    let sql = format!("select {PO_COLUMNS} from purchase_orders where po_id = $1 and owner_id = $2");
    let row = sqlx::query(&sql)
        .bind(po_id)
        .bind(owner_id)
        .fetch_optional(pool)
        .await
        .context("fetch_po_for_owner failed")?;

    row.as_ref().map(po_from_row).transpose()
}

/// Compare-and-swap write of every mutable field.
///
/// Writes `after` only when the stored version still equals
/// `expected_version`; the stored version becomes `expected_version + 1`.
/// Returns `Ok(None)` when zero rows matched (version moved underneath us).
pub async fn update_po_if_version(
    conn: &mut PgConnection,
    po_id: Uuid,
    owner_id: Uuid,
    expected_version: i64,
    after: &PoSnapshot,
    updated_at_utc: DateTime<Utc>,
) -> Result<Option<i64>> {
    let row = sqlx::query(
        r#"
        update purchase_orders
        set state = $4,
            version = version + 1,
            locked_by = $5,
            locked_at = $6,
            lock_expires_at = $7,
            acknowledged_at = $8,
            sent_at = $9,
            cancelled_at = $10,
            expected_delivery_date = $11,
            updated_at_utc = $12
        where po_id = $1
          and owner_id = $2
          and version = $3
        returning version
        "#,
    )
    .bind(po_id)
    .bind(owner_id)
    .bind(expected_version)
    .bind(after.state.as_str())
    .bind(after.locked_by)
    .bind(after.locked_at)
    .bind(after.lock_expires_at)
    .bind(after.acknowledged_at)
    .bind(after.sent_at)
    .bind(after.cancelled_at)
    .bind(after.expected_delivery_date)
    .bind(updated_at_utc)
    .fetch_optional(conn)
    .await
    .context("update_po_if_version failed")?;

    match row {
        Some(r) => Ok(Some(r.try_get::<i64, _>("version")?)),
        None => Ok(None),
    }
}

/// Set lock metadata directly. Lock acquisition is owned by an external
/// collaborator; tests use this to stage held and expired locks.
#[cfg(feature = "testkit")]
pub async fn set_lock_for_test(
    pool: &PgPool,
    po_id: Uuid,
    locked_by: Option<Uuid>,
    locked_at: Option<DateTime<Utc>>,
    lock_expires_at: Option<DateTime<Utc>>,
) -> Result<()> {
    sqlx::query(
        r#"
        update purchase_orders
        set locked_by = $2, locked_at = $3, lock_expires_at = $4
        where po_id = $1
        "#,
    )
    .bind(po_id)
    .bind(locked_by)
    .bind(locked_at)
    .bind(lock_expires_at)
    .execute(pool)
    .await
    .context("set_lock_for_test failed")?;
    Ok(())
}

fn po_from_row(row: &PgRow) -> Result<PurchaseOrder> {
    let state_raw: String = row.try_get("state")?;
    // An out-of-set state is a data-integrity fault, never a silent default.
    let state: PoState = state_raw
        .parse()
        .map_err(|e| anyhow!("data integrity: purchase_orders.state: {e}"))?;

    Ok(PurchaseOrder {
        po_id: row.try_get("po_id")?,
        owner_id: row.try_get("owner_id")?,
        po_number: row.try_get("po_number")?,
        state,
        version: row.try_get("version")?,
        locked_by: row.try_get("locked_by")?,
        locked_at: row.try_get("locked_at")?,
        lock_expires_at: row.try_get("lock_expires_at")?,
        acknowledged_at: row.try_get("acknowledged_at")?,
        sent_at: row.try_get("sent_at")?,
        cancelled_at: row.try_get("cancelled_at")?,
        expected_delivery_date: row.try_get("expected_delivery_date")?,
        created_at_utc: row.try_get("created_at_utc")?,
        updated_at_utc: row.try_get("updated_at_utc")?,
    })
}

// ---------------------------------------------------------------------------
// Audit events
// ---------------------------------------------------------------------------

/// `hash_self` of the highest-version event for a PO, or `None` for an empty
/// history. Call after the PO row lock is held so the chain cannot fork.
pub async fn last_audit_hash(conn: &mut PgConnection, po_id: Uuid) -> Result<Option<String>> {
    let row: Option<(String,)> = sqlx::query_as(
        r#"
        select hash_self
        from po_audit_events
        where po_id = $1
        order by po_version desc
        limit 1
        "#,
    )
    .bind(po_id)
    .fetch_optional(conn)
    .await
    .context("last_audit_hash failed")?;

    Ok(row.map(|(h,)| h))
}

/// Append one audit event (append-only is enforced by a table trigger).
pub async fn insert_po_audit_event(conn: &mut PgConnection, ev: &AuditEvent) -> Result<()> {
    let hash_self = ev
        .hash_self
        .as_deref()
        .ok_or_else(|| anyhow!("insert_po_audit_event: event {} is not sealed", ev.event_id))?;
    let before = serde_json::to_value(&ev.before).context("serialize before_snapshot")?;
    let after = serde_json::to_value(&ev.after).context("serialize after_snapshot")?;

    sqlx::query(
        r#"
        insert into po_audit_events (
          event_id, po_id, owner_id, po_version, action, actor_id, occurred_at,
          before_snapshot, after_snapshot, metadata, hash_prev, hash_self
        ) values (
          $1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12
        )
        "#,
    )
    .bind(ev.event_id)
    .bind(ev.po_id)
    .bind(ev.owner_id)
    .bind(ev.po_version)
    .bind(ev.action.as_str())
    .bind(ev.actor_id)
    .bind(ev.occurred_at)
    .bind(before)
    .bind(after)
    .bind(&ev.metadata)
    .bind(&ev.hash_prev)
    .bind(hash_self)
    .execute(conn)
    .await
    .context("insert_po_audit_event failed")?;
    Ok(())
}

/// Owner-scoped history of a PO in version order, which is also chain
/// order.
pub async fn fetch_audit_events(
    pool: &PgPool,
    po_id: Uuid,
    owner_id: Uuid,
) -> Result<Vec<AuditEvent>> {
    let sql = format!(
        "select {AUDIT_COLUMNS} from po_audit_events \
         where po_id = $1 and owner_id = $2 \
         order by po_version asc"
    );
    let rows = sqlx::query(&sql)
        .bind(po_id)
        .bind(owner_id)
        .fetch_all(pool)
        .await
        .context("fetch_audit_events failed")?;

    rows.iter().map(audit_from_row).collect()
}

fn audit_from_row(row: &PgRow) -> Result<AuditEvent> {
    let action_raw: String = row.try_get("action")?;
    let action: ActionKind = action_raw
        .parse()
        .map_err(|e| anyhow!("data integrity: po_audit_events.action: {e}"))?;
    let before: serde_json::Value = row.try_get("before_snapshot")?;
    let after: serde_json::Value = row.try_get("after_snapshot")?;

    Ok(AuditEvent {
        event_id: row.try_get("event_id")?,
        po_id: row.try_get("po_id")?,
        owner_id: row.try_get("owner_id")?,
        po_version: row.try_get("po_version")?,
        action,
        actor_id: row.try_get("actor_id")?,
        occurred_at: row.try_get("occurred_at")?,
        before: serde_json::from_value(before).context("decode before_snapshot")?,
        after: serde_json::from_value(after).context("decode after_snapshot")?,
        metadata: row.try_get("metadata")?,
        hash_prev: row.try_get("hash_prev")?,
        hash_self: Some(row.try_get::<String, _>("hash_self")?),
    })
}
