use async_trait::async_trait;
use log::{info, warn};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use std::collections::HashMap;
use uuid::Uuid;

use crate::error::{is_unique_violation, StoreError, StoreResult};
use crate::models::{
    amount_to_db, Asset, AssetRow, BetRow, Deal, DealRow, DealStatus, Event, EventRow,
};
use crate::store::LedgerStore;

const DEAL_COLUMNS: &str =
    "id, event_id, token, collateral, size, user_raw_addr, deal_status, attempts, created_at";
const ASSET_COLUMNS: &str = "user_raw_address, event_id, token, collateral_staked, size";

#[derive(Clone)]
pub struct PgLedgerStore {
    pool: PgPool,
}

impl PgLedgerStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn connect(database_url: &str, max_connections: u32) -> StoreResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await
            .map_err(StoreError::transaction("connect"))?;
        info!("Connected to Postgres Database");
        Ok(Self::new(pool))
    }

    pub async fn migrate(&self) -> StoreResult<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| StoreError::TransactionFailed {
                op: "migrate",
                source: e.into(),
            })?;
        info!("Ledger store migrations applied");
        Ok(())
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn deal_status(&self, id: Uuid, op: &'static str) -> StoreResult<Option<DealStatus>> {
        let code: Option<i16> = sqlx::query_scalar("SELECT deal_status FROM deals WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(StoreError::transaction(op))?;
        code.map(DealStatus::from_code).transpose()
    }

    async fn rejected_transition(&self, id: Uuid, op: &'static str) -> StoreError {
        match self.deal_status(id, op).await {
            Ok(Some(status)) => StoreError::DealAlreadyProcessed { id, status },
            Ok(None) => StoreError::DealNotFound(id),
            Err(e) => e,
        }
    }
}

#[async_trait]
impl LedgerStore for PgLedgerStore {
    async fn save_event(&self, event: &Event) -> StoreResult<()> {
        event.check_outcomes()?;
        let op = "save event";
        let mut tx = self.pool.begin().await.map_err(StoreError::transaction(op))?;

        sqlx::query(
            r#"
            INSERT INTO events (id, tag, logo_link, title, active)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(event.id)
        .bind(event.tag.code())
        .bind(&event.logo_link)
        .bind(&event.title)
        .bind(event.active)
        .execute(&mut *tx)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                StoreError::EventAlreadyExists(event.id)
            } else {
                StoreError::TransactionFailed { op, source: e }
            }
        })?;

        for bet in event.bets.values() {
            sqlx::query(
                r#"
                INSERT INTO event_bets (event_id, token, title, logo_link)
                VALUES ($1, $2, $3, $4)
                "#,
            )
            .bind(event.id)
            .bind(bet.token.as_str())
            .bind(&bet.title)
            .bind(&bet.logo_link)
            .execute(&mut *tx)
            .await
            .map_err(StoreError::transaction(op))?;
        }

        tx.commit().await.map_err(StoreError::transaction(op))?;
        info!("Event saved: event_id={}, title={}", event.id, event.title);
        Ok(())
    }

    async fn get_event_copy(&self, id: Uuid) -> StoreResult<Event> {
        let op = "get event";
        let row: EventRow = sqlx::query_as(
            r#"
            SELECT id, tag, logo_link, title, active
            FROM events
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(StoreError::transaction(op))?
        .ok_or(StoreError::EventNotFound(id))?;

        let bets: Vec<BetRow> = sqlx::query_as(
            r#"
            SELECT event_id, token, title, logo_link
            FROM event_bets
            WHERE event_id = $1
            "#,
        )
        .bind(id)
        .fetch_all(&self.pool)
        .await
        .map_err(StoreError::transaction(op))?;

        row.into_event(bets)
    }

    async fn list_events(&self) -> StoreResult<Vec<Event>> {
        let op = "list events";
        let rows: Vec<EventRow> = sqlx::query_as(
            r#"
            SELECT id, tag, logo_link, title, active
            FROM events
            ORDER BY created_at ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(StoreError::transaction(op))?;

        let bet_rows: Vec<BetRow> =
            sqlx::query_as("SELECT event_id, token, title, logo_link FROM event_bets")
                .fetch_all(&self.pool)
                .await
                .map_err(StoreError::transaction(op))?;

        let mut bets_by_event: HashMap<Uuid, Vec<BetRow>> = HashMap::new();
        for bet in bet_rows {
            bets_by_event.entry(bet.event_id).or_default().push(bet);
        }

        rows.into_iter()
            .map(|row| {
                let bets = bets_by_event.remove(&row.id).unwrap_or_default();
                row.into_event(bets)
            })
            .collect()
    }

    async fn deactivate_event(&self, id: Uuid) -> StoreResult<()> {
        let result = sqlx::query("UPDATE events SET active = FALSE WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(StoreError::transaction("deactivate event"))?;
        if result.rows_affected() == 0 {
            return Err(StoreError::EventNotFound(id));
        }
        info!("Event deactivated: event_id={}", id);
        Ok(())
    }

    async fn delete_event(&self, id: Uuid) -> StoreResult<()> {
        let result = sqlx::query("DELETE FROM events WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(StoreError::transaction("delete event"))?;
        if result.rows_affected() == 0 {
            return Err(StoreError::EventNotFound(id));
        }
        info!("Event deleted: event_id={}", id);
        Ok(())
    }

    async fn save_deal_unchecked(&self, deal: &Deal) -> StoreResult<()> {
        let op = "save deal unchecked";
        let mut tx = self.pool.begin().await.map_err(StoreError::transaction(op))?;

        let active: Option<bool> =
            sqlx::query_scalar("SELECT active FROM events WHERE id = $1 FOR SHARE")
                .bind(deal.event_id)
                .fetch_optional(&mut *tx)
                .await
                .map_err(StoreError::transaction(op))?;
        match active {
            None => return Err(StoreError::EventNotFound(deal.event_id)),
            Some(false) => return Err(StoreError::ClosedEvent(deal.event_id)),
            Some(true) => {}
        }

        sqlx::query("INSERT INTO users (raw_addr) VALUES ($1) ON CONFLICT (raw_addr) DO NOTHING")
            .bind(&deal.user_raw_addr)
            .execute(&mut *tx)
            .await
            .map_err(StoreError::transaction(op))?;

        sqlx::query(
            r#"
            INSERT INTO deals (id, event_id, token, collateral, size, user_raw_addr, deal_status, attempts)
            VALUES ($1, $2, $3, $4, $5, $6, $7, 0)
            "#,
        )
        .bind(deal.id)
        .bind(deal.event_id)
        .bind(deal.token.as_str())
        .bind(amount_to_db(deal.collateral))
        .bind(amount_to_db(deal.size))
        .bind(&deal.user_raw_addr)
        .bind(DealStatus::Unchecked.code())
        .execute(&mut *tx)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                StoreError::DealAlreadyExists(deal.id)
            } else {
                StoreError::TransactionFailed { op, source: e }
            }
        })?;

        sqlx::query("INSERT INTO user_deals (user_raw_addr, deal_id) VALUES ($1, $2)")
            .bind(&deal.user_raw_addr)
            .bind(deal.id)
            .execute(&mut *tx)
            .await
            .map_err(StoreError::transaction(op))?;

        tx.commit().await.map_err(StoreError::transaction(op))?;
        info!(
            "Deal saved unchecked: deal_id={}, event_id={}, user={}",
            deal.id, deal.event_id, deal.user_raw_addr
        );
        Ok(())
    }

    async fn get_deal(&self, id: Uuid) -> StoreResult<Deal> {
        let row: DealRow = sqlx::query_as(&format!("SELECT {DEAL_COLUMNS} FROM deals WHERE id = $1"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(StoreError::transaction("get deal"))?
            .ok_or(StoreError::DealNotFound(id))?;
        Deal::try_from(row)
    }

    async fn mark_pending(&self, id: Uuid) -> StoreResult<bool> {
        let op = "mark deal pending";
        let result = sqlx::query("UPDATE deals SET deal_status = $1 WHERE id = $2 AND deal_status = $3")
            .bind(DealStatus::Pending.code())
            .bind(id)
            .bind(DealStatus::Unchecked.code())
            .execute(&self.pool)
            .await
            .map_err(StoreError::transaction(op))?;
        if result.rows_affected() == 1 {
            return Ok(true);
        }
        match self.deal_status(id, op).await? {
            Some(_) => Ok(false),
            None => Err(StoreError::DealNotFound(id)),
        }
    }

    async fn promote_deal(&self, id: Uuid) -> StoreResult<Deal> {
        let op = "promote deal";
        let mut tx = self.pool.begin().await.map_err(StoreError::transaction(op))?;

        let flipped = sqlx::query(
            r#"
            UPDATE deals SET deal_status = $1
            WHERE id = $2 AND deal_status IN ($3, $4)
            "#,
        )
        .bind(DealStatus::Verified.code())
        .bind(id)
        .bind(DealStatus::Unchecked.code())
        .bind(DealStatus::Pending.code())
        .execute(&mut *tx)
        .await
        .map_err(StoreError::transaction(op))?;

        if flipped.rows_affected() == 0 {
            drop(tx);
            return Err(self.rejected_transition(id, op).await);
        }

        let row: DealRow = sqlx::query_as(&format!("SELECT {DEAL_COLUMNS} FROM deals WHERE id = $1"))
            .bind(id)
            .fetch_one(&mut *tx)
            .await
            .map_err(StoreError::transaction(op))?;
        let deal = Deal::try_from(row)?;

        // A concurrent opener turns the insert into a no-op; the row is then locked.
        let opened = Asset::opened_by(&deal);
        let inserted = sqlx::query(
            r#"
            INSERT INTO assets (user_raw_address, event_id, token, collateral_staked, size)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (user_raw_address, event_id, token) DO NOTHING
            "#,
        )
        .bind(&opened.user_raw_address)
        .bind(opened.event_id)
        .bind(opened.token.as_str())
        .bind(amount_to_db(opened.collateral_staked))
        .bind(amount_to_db(opened.size))
        .execute(&mut *tx)
        .await
        .map_err(StoreError::asset_write(op))?;

        if inserted.rows_affected() == 0 {
            let row: Option<AssetRow> = sqlx::query_as(&format!(
                "SELECT {ASSET_COLUMNS} FROM assets \
                 WHERE user_raw_address = $1 AND event_id = $2 AND token = $3 FOR UPDATE"
            ))
            .bind(&deal.user_raw_addr)
            .bind(deal.event_id)
            .bind(deal.token.as_str())
            .fetch_optional(&mut *tx)
            .await
            .map_err(StoreError::transaction(op))?;
            let row = row.ok_or(StoreError::ConcurrentUpdate { op })?;

            let mut asset = Asset::try_from(row)?;
            asset.accumulate(&deal)?;
            sqlx::query(
                r#"
                UPDATE assets SET collateral_staked = $1, size = $2
                WHERE user_raw_address = $3 AND event_id = $4 AND token = $5
                "#,
            )
            .bind(amount_to_db(asset.collateral_staked))
            .bind(amount_to_db(asset.size))
            .bind(&asset.user_raw_address)
            .bind(asset.event_id)
            .bind(asset.token.as_str())
            .execute(&mut *tx)
            .await
            .map_err(StoreError::transaction(op))?;
        }

        tx.commit().await.map_err(StoreError::transaction(op))?;
        info!(
            "Deal verified: deal_id={}, event_id={}, collateral={}",
            deal.id, deal.event_id, deal.collateral
        );
        Ok(deal)
    }

    async fn decline_deal(&self, id: Uuid) -> StoreResult<()> {
        let op = "decline deal";
        let result = sqlx::query(
            r#"
            UPDATE deals SET deal_status = $1
            WHERE id = $2 AND deal_status IN ($3, $4)
            "#,
        )
        .bind(DealStatus::Declined.code())
        .bind(id)
        .bind(DealStatus::Unchecked.code())
        .bind(DealStatus::Pending.code())
        .execute(&self.pool)
        .await
        .map_err(StoreError::transaction(op))?;
        if result.rows_affected() == 0 {
            return Err(self.rejected_transition(id, op).await);
        }
        info!("Deal declined: deal_id={}", id);
        Ok(())
    }

    async fn delete_deal(&self, id: Uuid) -> StoreResult<()> {
        let op = "delete deal";
        let result = sqlx::query("DELETE FROM deals WHERE id = $1 AND deal_status <> $2")
            .bind(id)
            .bind(DealStatus::Verified.code())
            .execute(&self.pool)
            .await
            .map_err(StoreError::transaction(op))?;
        if result.rows_affected() == 0 {
            return Err(self.rejected_transition(id, op).await);
        }
        warn!("Deal deleted: deal_id={}", id);
        Ok(())
    }

    async fn increment_attempt(&self, id: Uuid) -> StoreResult<i32> {
        let attempts: Option<i32> = sqlx::query_scalar(
            "UPDATE deals SET attempts = attempts + 1 WHERE id = $1 RETURNING attempts",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(StoreError::transaction("increment attempt"))?;
        attempts.ok_or(StoreError::DealNotFound(id))
    }

    async fn pending_deals(&self) -> StoreResult<Vec<Deal>> {
        let rows: Vec<DealRow> = sqlx::query_as(&format!(
            "SELECT {DEAL_COLUMNS} FROM deals WHERE deal_status = $1 ORDER BY created_at ASC"
        ))
        .bind(DealStatus::Pending.code())
        .fetch_all(&self.pool)
        .await
        .map_err(StoreError::transaction("pending deals"))?;
        rows.into_iter().map(Deal::try_from).collect()
    }

    async fn get_user_assets(&self, address: &str) -> StoreResult<Vec<Asset>> {
        let rows: Vec<AssetRow> = sqlx::query_as(&format!(
            "SELECT {ASSET_COLUMNS} FROM assets WHERE user_raw_address = $1"
        ))
        .bind(address)
        .fetch_all(&self.pool)
        .await
        .map_err(StoreError::transaction("get user assets"))?;
        rows.into_iter().map(Asset::try_from).collect()
    }

    async fn get_event_assets(&self, event_id: Uuid) -> StoreResult<Vec<Asset>> {
        let rows: Vec<AssetRow> = sqlx::query_as(&format!(
            "SELECT {ASSET_COLUMNS} FROM assets WHERE event_id = $1"
        ))
        .bind(event_id)
        .fetch_all(&self.pool)
        .await
        .map_err(StoreError::transaction("get event assets"))?;
        rows.into_iter().map(Asset::try_from).collect()
    }

    async fn delete_event_assets(&self, event_id: Uuid) -> StoreResult<u64> {
        let result = sqlx::query("DELETE FROM assets WHERE event_id = $1")
            .bind(event_id)
            .execute(&self.pool)
            .await
            .map_err(StoreError::transaction("delete event assets"))?;
        Ok(result.rows_affected())
    }
}
