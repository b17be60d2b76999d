//! Database layer: migrations, record queries, and the conditional updates
//! the allocation engine relies on.
//!
//! Every mutation of `donations.status` or `organizations.capacity` is a
//! compare-and-swap: the `WHERE` clause restates the precondition the caller
//! read earlier, and the helper reports whether a row was actually changed.
//! `false` means another writer got there first.

use std::collections::HashMap;
use std::str::FromStr;
use std::time::Duration;

use serde::Serialize;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::{QueryBuilder, Sqlite, SqliteConnection, SqliteExecutor, SqlitePool, Transaction};
use tracing::info;

use crate::errors::Result;
use crate::models::{
    Donation, DonationStatus, Match, MatchStatus, NewDonation, NewOrganization, Organization,
    OrganizationStatus,
};
use crate::scoring::ScoreBreakdown;

const BUSY_TIMEOUT: Duration = Duration::from_secs(10);

const DONATION_COLUMNS: &str = "id, food_type, quantity, unit, description, lat, lng, \
    donor_name, donor_contact, notes, status, assigned_organization_id, is_auto_assigned, \
    expires_at, created_at";

const ORGANIZATION_COLUMNS: &str = "id, name, lat, lng, contact, email, capacity, \
    avg_response_minutes, status, created_at";

const MATCH_COLUMNS: &str = "id, donation_id, organization_id, total_score, distance_score, \
    urgency_score, capacity_score, load_balance_score, distance_km, status, assigned_at, \
    completed_at";

/// Establish a SQLite connection pool and run pending migrations.
pub async fn init_pool(database_url: &str, max_connections: u32) -> Result<SqlitePool> {
    let url = if database_url.starts_with("sqlite:") {
        database_url.to_string()
    } else {
        format!("sqlite:{database_url}")
    };

    // WAL lets readers proceed while a writer holds the lock; writers queue
    // on the busy timeout instead of failing.
    let options = SqliteConnectOptions::from_str(&url)?
        .create_if_missing(true)
        .foreign_keys(true)
        .journal_mode(SqliteJournalMode::Wal)
        .busy_timeout(BUSY_TIMEOUT);

    let pool = SqlitePoolOptions::new()
        .max_connections(max_connections)
        .connect_with(options)
        .await?;

    migrate(&pool).await?;
    Ok(pool)
}

/// A private in-memory database on a single long-lived connection.
pub async fn init_memory_pool() -> Result<SqlitePool> {
    let options = SqliteConnectOptions::from_str("sqlite::memory:")?.foreign_keys(true);

    // Each in-memory connection is its own database, so keep exactly one
    // and never let the pool recycle it.
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .min_connections(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .connect_with(options)
        .await?;

    migrate(&pool).await?;
    Ok(pool)
}

/// Open a transaction that takes the write lock up front.
///
/// A deferred transaction that reads first and writes later cannot upgrade
/// its lock while another writer is active; SQLite fails it immediately with
/// `SQLITE_BUSY`. Taking the lock at `BEGIN` makes contenders wait, so they
/// see the committed state and fail the conditional updates instead.
pub async fn begin_write(pool: &SqlitePool) -> Result<Transaction<'static, Sqlite>> {
    Ok(pool.begin_with("BEGIN IMMEDIATE").await?)
}

async fn migrate(pool: &SqlitePool) -> Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    info!("Database migrations applied successfully");
    Ok(())
}

// ─────────────────────────────────────────────────────────
// Donations
// ─────────────────────────────────────────────────────────

pub async fn insert_donation(
    pool: &SqlitePool,
    input: &NewDonation,
    created_at: i64,
) -> Result<Donation> {
    let query = format!(
        "INSERT INTO donations \
            (food_type, quantity, unit, description, lat, lng, donor_name, donor_contact, \
             notes, expires_at, created_at) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11) \
         RETURNING {DONATION_COLUMNS}"
    );
    let donation = sqlx::query_as::<_, Donation>(&query)
        .bind(input.food_type)
        .bind(input.quantity)
        .bind(input.unit)
        .bind(&input.description)
        .bind(input.lat)
        .bind(input.lng)
        .bind(&input.donor_name)
        .bind(&input.donor_contact)
        .bind(&input.notes)
        .bind(input.expires_at)
        .bind(created_at)
        .fetch_one(pool)
        .await?;
    Ok(donation)
}

pub async fn get_donation<'e, E>(conn: E, id: i64) -> Result<Option<Donation>>
where
    E: SqliteExecutor<'e>,
{
    let query = format!("SELECT {DONATION_COLUMNS} FROM donations WHERE id = ?1");
    let row = sqlx::query_as::<_, Donation>(&query)
        .bind(id)
        .fetch_optional(conn)
        .await?;
    Ok(row)
}

/// List donations, most pressing deadline first.
pub async fn list_donations(
    pool: &SqlitePool,
    status: Option<DonationStatus>,
) -> Result<Vec<Donation>> {
    let rows = match status {
        Some(status) => {
            let query = format!(
                "SELECT {DONATION_COLUMNS} FROM donations \
                 WHERE status = ?1 \
                 ORDER BY expires_at ASC, id ASC"
            );
            sqlx::query_as::<_, Donation>(&query)
                .bind(status)
                .fetch_all(pool)
                .await?
        }
        None => {
            let query = format!(
                "SELECT {DONATION_COLUMNS} FROM donations ORDER BY expires_at ASC, id ASC"
            );
            sqlx::query_as::<_, Donation>(&query).fetch_all(pool).await?
        }
    };
    Ok(rows)
}

/// `available -> assigned`, recording the receiving organization.
pub async fn claim_donation(
    conn: &mut SqliteConnection,
    donation_id: i64,
    organization_id: i64,
    auto_assigned: bool,
) -> Result<bool> {
    let result = sqlx::query(
        "UPDATE donations \
         SET status = 'assigned', assigned_organization_id = ?2, is_auto_assigned = ?3 \
         WHERE id = ?1 AND status = 'available'",
    )
    .bind(donation_id)
    .bind(organization_id)
    .bind(auto_assigned)
    .execute(conn)
    .await?;
    Ok(result.rows_affected() > 0)
}

/// Move a donation out of `from`. Leaving `assigned` for anything but
/// `delivered` drops the organization reference; returning to `available`
/// also clears the auto-dispatch flag so the sweep may rescue it again.
pub async fn transition_donation(
    conn: &mut SqliteConnection,
    donation_id: i64,
    from: DonationStatus,
    to: DonationStatus,
) -> Result<bool> {
    let keep_assignment = to == DonationStatus::Delivered;
    let reset_flag = to == DonationStatus::Available;
    let result = sqlx::query(
        "UPDATE donations \
         SET status = ?3, \
             assigned_organization_id = CASE WHEN ?4 THEN assigned_organization_id ELSE NULL END, \
             is_auto_assigned = CASE WHEN ?5 THEN 0 ELSE is_auto_assigned END \
         WHERE id = ?1 AND status = ?2",
    )
    .bind(donation_id)
    .bind(from)
    .bind(to)
    .bind(keep_assignment)
    .bind(reset_flag)
    .execute(conn)
    .await?;
    Ok(result.rows_affected() > 0)
}

// ─────────────────────────────────────────────────────────
// Organizations
// ─────────────────────────────────────────────────────────

pub async fn insert_organization(
    pool: &SqlitePool,
    input: &NewOrganization,
    created_at: i64,
) -> Result<Organization> {
    let query = format!(
        "INSERT INTO organizations \
            (name, lat, lng, contact, email, capacity, avg_response_minutes, status, created_at) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9) \
         RETURNING {ORGANIZATION_COLUMNS}"
    );
    let organization = sqlx::query_as::<_, Organization>(&query)
        .bind(input.name.trim())
        .bind(input.lat)
        .bind(input.lng)
        .bind(input.contact.trim())
        .bind(&input.email)
        .bind(input.capacity)
        .bind(input.avg_response_minutes)
        .bind(input.status)
        .bind(created_at)
        .fetch_one(pool)
        .await?;
    Ok(organization)
}

pub async fn get_organization<'e, E>(conn: E, id: i64) -> Result<Option<Organization>>
where
    E: SqliteExecutor<'e>,
{
    let query = format!("SELECT {ORGANIZATION_COLUMNS} FROM organizations WHERE id = ?1");
    let row = sqlx::query_as::<_, Organization>(&query)
        .bind(id)
        .fetch_optional(conn)
        .await?;
    Ok(row)
}

pub async fn list_organizations(
    pool: &SqlitePool,
    status: Option<OrganizationStatus>,
) -> Result<Vec<Organization>> {
    let rows = match status {
        Some(status) => {
            let query = format!(
                "SELECT {ORGANIZATION_COLUMNS} FROM organizations WHERE status = ?1 ORDER BY id"
            );
            sqlx::query_as::<_, Organization>(&query)
                .bind(status)
                .fetch_all(pool)
                .await?
        }
        None => {
            let query = format!("SELECT {ORGANIZATION_COLUMNS} FROM organizations ORDER BY id");
            sqlx::query_as::<_, Organization>(&query).fetch_all(pool).await?
        }
    };
    Ok(rows)
}

/// Active organizations with headroom, in id order so ties resolve stably.
pub async fn list_eligible_organizations(conn: &mut SqliteConnection) -> Result<Vec<Organization>> {
    let query = format!(
        "SELECT {ORGANIZATION_COLUMNS} FROM organizations \
         WHERE status = 'active' AND capacity > 0 \
         ORDER BY id ASC"
    );
    let rows = sqlx::query_as::<_, Organization>(&query)
        .fetch_all(conn)
        .await?;
    Ok(rows)
}

/// Administrative update; only `Some` fields are applied.
/// Returns `None` if the organization does not exist.
pub async fn update_organization(
    pool: &SqlitePool,
    id: i64,
    capacity: Option<i64>,
    status: Option<OrganizationStatus>,
    avg_response_minutes: Option<f64>,
) -> Result<Option<Organization>> {
    let query = format!(
        "UPDATE organizations SET \
            capacity = COALESCE(?2, capacity), \
            status = COALESCE(?3, status), \
            avg_response_minutes = COALESCE(?4, avg_response_minutes) \
         WHERE id = ?1 \
         RETURNING {ORGANIZATION_COLUMNS}"
    );
    let row = sqlx::query_as::<_, Organization>(&query)
        .bind(id)
        .bind(capacity)
        .bind(status)
        .bind(avg_response_minutes)
        .fetch_optional(pool)
        .await?;
    Ok(row)
}

/// Add `delta` to an organization's capacity. A negative delta only applies
/// while the remaining capacity covers it.
pub async fn apply_capacity_delta(
    conn: &mut SqliteConnection,
    organization_id: i64,
    delta: i64,
) -> Result<bool> {
    let result = sqlx::query(
        "UPDATE organizations \
         SET capacity = capacity + ?2 \
         WHERE id = ?1 AND capacity + ?2 >= 0",
    )
    .bind(organization_id)
    .bind(delta)
    .execute(conn)
    .await?;
    Ok(result.rows_affected() > 0)
}

// ─────────────────────────────────────────────────────────
// Matches
// ─────────────────────────────────────────────────────────

/// Count pending/accepted matches per organization, restricted to `organization_ids`.
pub async fn active_match_counts(
    conn: &mut SqliteConnection,
    organization_ids: &[i64],
) -> Result<HashMap<i64, i64>> {
    if organization_ids.is_empty() {
        return Ok(HashMap::new());
    }

    let mut builder: QueryBuilder<Sqlite> = QueryBuilder::new(
        "SELECT organization_id, COUNT(*) FROM matches \
         WHERE status IN ('pending', 'accepted') AND organization_id IN (",
    );
    let mut ids = builder.separated(", ");
    for id in organization_ids {
        ids.push_bind(*id);
    }
    ids.push_unseparated(") GROUP BY organization_id");

    let rows: Vec<(i64, i64)> = builder.build_query_as().fetch_all(conn).await?;
    Ok(rows.into_iter().collect())
}

pub async fn insert_match(
    conn: &mut SqliteConnection,
    donation_id: i64,
    organization_id: i64,
    score: &ScoreBreakdown,
    assigned_at: i64,
) -> Result<Match> {
    let query = format!(
        "INSERT INTO matches \
            (donation_id, organization_id, total_score, distance_score, urgency_score, \
             capacity_score, load_balance_score, distance_km, status, assigned_at) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, 'pending', ?9) \
         RETURNING {MATCH_COLUMNS}"
    );
    let row = sqlx::query_as::<_, Match>(&query)
        .bind(donation_id)
        .bind(organization_id)
        .bind(score.total_score)
        .bind(score.distance_score)
        .bind(score.urgency_score)
        .bind(score.capacity_score)
        .bind(score.load_balance_score)
        .bind(score.distance_km)
        .bind(assigned_at)
        .fetch_one(conn)
        .await?;
    Ok(row)
}

pub async fn get_match<'e, E>(conn: E, id: i64) -> Result<Option<Match>>
where
    E: SqliteExecutor<'e>,
{
    let query = format!("SELECT {MATCH_COLUMNS} FROM matches WHERE id = ?1");
    let row = sqlx::query_as::<_, Match>(&query)
        .bind(id)
        .fetch_optional(conn)
        .await?;
    Ok(row)
}

/// List matches, newest first, optionally filtered by status and/or organization.
pub async fn list_matches(
    pool: &SqlitePool,
    status: Option<MatchStatus>,
    organization_id: Option<i64>,
) -> Result<Vec<Match>> {
    let query = format!(
        "SELECT {MATCH_COLUMNS} FROM matches \
         WHERE (?1 IS NULL OR status = ?1) AND (?2 IS NULL OR organization_id = ?2) \
         ORDER BY assigned_at DESC, id DESC"
    );
    let rows = sqlx::query_as::<_, Match>(&query)
        .bind(status)
        .bind(organization_id)
        .fetch_all(pool)
        .await?;
    Ok(rows)
}

pub async fn list_matches_for_donation<'e, E>(conn: E, donation_id: i64) -> Result<Vec<Match>>
where
    E: SqliteExecutor<'e>,
{
    let query = format!("SELECT {MATCH_COLUMNS} FROM matches WHERE donation_id = ?1 ORDER BY id");
    let rows = sqlx::query_as::<_, Match>(&query)
        .bind(donation_id)
        .fetch_all(conn)
        .await?;
    Ok(rows)
}

/// `from -> to` on a single match. `completed_at` is written as given.
pub async fn transition_match(
    conn: &mut SqliteConnection,
    match_id: i64,
    from: MatchStatus,
    to: MatchStatus,
    completed_at: Option<i64>,
) -> Result<bool> {
    let result = sqlx::query(
        "UPDATE matches SET status = ?3, completed_at = ?4 WHERE id = ?1 AND status = ?2",
    )
    .bind(match_id)
    .bind(from)
    .bind(to)
    .bind(completed_at)
    .execute(conn)
    .await?;
    Ok(result.rows_affected() > 0)
}

// ─────────────────────────────────────────────────────────
// Expiry
// ─────────────────────────────────────────────────────────

const OVERDUE_DONATIONS: &str = "SELECT id FROM donations \
    WHERE expires_at < ?1 AND status NOT IN ('delivered', 'expired')";

/// Active matches on overdue donations, aggregated per organization.
pub async fn overdue_active_match_counts(
    conn: &mut SqliteConnection,
    now: i64,
) -> Result<Vec<(i64, i64)>> {
    let query = format!(
        "SELECT organization_id, COUNT(*) FROM matches \
         WHERE status IN ('pending', 'accepted') AND donation_id IN ({OVERDUE_DONATIONS}) \
         GROUP BY organization_id \
         ORDER BY organization_id"
    );
    let rows: Vec<(i64, i64)> = sqlx::query_as(&query).bind(now).fetch_all(conn).await?;
    Ok(rows)
}

pub async fn expire_overdue_matches(conn: &mut SqliteConnection, now: i64) -> Result<u64> {
    let query = format!(
        "UPDATE matches SET status = 'expired' \
         WHERE status IN ('pending', 'accepted') AND donation_id IN ({OVERDUE_DONATIONS})"
    );
    let result = sqlx::query(&query).bind(now).execute(conn).await?;
    Ok(result.rows_affected())
}

pub async fn expire_overdue_donations(conn: &mut SqliteConnection, now: i64) -> Result<u64> {
    let result = sqlx::query(
        "UPDATE donations SET status = 'expired', assigned_organization_id = NULL \
         WHERE expires_at < ?1 AND status NOT IN ('delivered', 'expired')",
    )
    .bind(now)
    .execute(conn)
    .await?;
    Ok(result.rows_affected())
}

// ─────────────────────────────────────────────────────────
// Summary
// ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, sqlx::FromRow)]
pub struct Summary {
    pub total_organizations: i64,
    pub active_organizations: i64,
    pub total_donations: i64,
    pub available_donations: i64,
    pub total_matches: i64,
    pub active_matches: i64,
}

pub async fn summary(pool: &SqlitePool) -> Result<Summary> {
    let row = sqlx::query_as::<_, Summary>(
        "SELECT \
            (SELECT COUNT(*) FROM organizations) AS total_organizations, \
            (SELECT COUNT(*) FROM organizations WHERE status = 'active') AS active_organizations, \
            (SELECT COUNT(*) FROM donations) AS total_donations, \
            (SELECT COUNT(*) FROM donations WHERE status = 'available') AS available_donations, \
            (SELECT COUNT(*) FROM matches) AS total_matches, \
            (SELECT COUNT(*) FROM matches WHERE status IN ('pending', 'accepted')) AS active_matches",
    )
    .fetch_one(pool)
    .await?;
    Ok(row)
}
