use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use ledger_store::Token;
use log::info;
use uuid::Uuid;

use crate::error::{MarketError, MarketResult};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BetState {
    pub token: Token,
    pub collateral: u64,
    pub percentage: f64,
}

/// Copy of an event's accumulators taken under its lock.
#[derive(Debug, Clone, PartialEq)]
pub struct EventState {
    pub id: Uuid,
    pub active: bool,
    pub collateral: u64,
    pub bets: [BetState; 2],
}

#[derive(Debug)]
struct Accumulators {
    active: bool,
    collateral: [u64; 2],
}

#[derive(Debug)]
struct EventRuntime {
    id: Uuid,
    seq: u64,
    inner: Mutex<Accumulators>,
}

impl EventRuntime {
    fn read(&self) -> MarketResult<(bool, [u64; 2])> {
        let guard = self.inner.lock().map_err(|_| MarketError::Poisoned)?;
        Ok((guard.active, guard.collateral))
    }
}

fn build_state(id: Uuid, active: bool, collateral: [u64; 2]) -> EventState {
    let total = collateral.iter().map(|c| *c as u128).sum::<u128>();
    let bet = |token: Token| {
        let amount = collateral[token.index()];
        let percentage = if total == 0 {
            0.0
        } else {
            amount as f64 / total as f64 * 100.0
        };
        BetState { token, collateral: amount, percentage }
    };
    EventState {
        id,
        active,
        collateral: u64::try_from(total).unwrap_or(u64::MAX),
        bets: [bet(Token::A), bet(Token::B)],
    }
}

/// In-memory confirmed collateral per event and outcome.
#[derive(Clone, Default)]
pub struct RuntimeLedger {
    events: Arc<RwLock<HashMap<Uuid, Arc<EventRuntime>>>>,
    seq: Arc<AtomicU64>,
}

impl RuntimeLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn create_event(&self, id: Uuid) -> MarketResult<()> {
        self.restore_event(id, true, [0, 0])
    }

    /// Registers an event with collateral already confirmed elsewhere.
    pub fn restore_event(&self, id: Uuid, active: bool, collateral: [u64; 2]) -> MarketResult<()> {
        collateral[0]
            .checked_add(collateral[1])
            .ok_or(MarketError::Overflow(id))?;

        let mut guard = self.events.write().map_err(|_| MarketError::Poisoned)?;
        if guard.contains_key(&id) {
            return Err(MarketError::AlreadyExists(id));
        }
        guard.insert(
            id,
            Arc::new(EventRuntime {
                id,
                seq: self.seq.fetch_add(1, Ordering::Relaxed),
                inner: Mutex::new(Accumulators { active, collateral }),
            }),
        );
        info!("Event registered in runtime: event_id={}, active={}", id, active);
        Ok(())
    }

    fn runtime(&self, id: Uuid) -> MarketResult<Arc<EventRuntime>> {
        let guard = self.events.read().map_err(|_| MarketError::Poisoned)?;
        guard.get(&id).cloned().ok_or(MarketError::EventNotFound(id))
    }

    pub fn contains(&self, id: Uuid) -> MarketResult<bool> {
        let guard = self.events.read().map_err(|_| MarketError::Poisoned)?;
        Ok(guard.contains_key(&id))
    }

    /// Adds `amount` to the outcome. Inactive events still accept deposits
    /// so confirmations that land during closure stay counted.
    pub fn deposit(&self, id: Uuid, token: Token, amount: u64) -> MarketResult<EventState> {
        let runtime = self.runtime(id)?;
        let mut guard = runtime.inner.lock().map_err(|_| MarketError::Poisoned)?;

        let other = guard.collateral[token.complement().index()];
        let updated = guard.collateral[token.index()]
            .checked_add(amount)
            .filter(|sum| sum.checked_add(other).is_some())
            .ok_or(MarketError::Overflow(id))?;
        guard.collateral[token.index()] = updated;

        let (active, collateral) = (guard.active, guard.collateral);
        drop(guard);
        Ok(build_state(id, active, collateral))
    }

    pub fn get_state(&self, id: Uuid) -> MarketResult<EventState> {
        let runtime = self.runtime(id)?;
        let (active, collateral) = runtime.read()?;
        Ok(build_state(id, active, collateral))
    }

    pub fn is_active(&self, id: Uuid) -> MarketResult<bool> {
        Ok(self.runtime(id)?.read()?.0)
    }

    /// States of every registered event in registration order.
    pub fn snapshot_all(&self) -> MarketResult<Vec<EventState>> {
        let mut runtimes: Vec<Arc<EventRuntime>> = {
            let guard = self.events.read().map_err(|_| MarketError::Poisoned)?;
            guard.values().cloned().collect()
        };
        runtimes.sort_by_key(|runtime| runtime.seq);

        let mut raw = Vec::with_capacity(runtimes.len());
        for runtime in &runtimes {
            let (active, collateral) = runtime.read()?;
            raw.push((runtime.id, active, collateral));
        }

        Ok(raw
            .into_iter()
            .map(|(id, active, collateral)| build_state(id, active, collateral))
            .collect())
    }

    pub fn close(&self, id: Uuid) -> MarketResult<()> {
        let runtime = self.runtime(id)?;
        let mut guard = runtime.inner.lock().map_err(|_| MarketError::Poisoned)?;
        guard.active = false;
        info!("Event closed in runtime: event_id={}", id);
        Ok(())
    }

    pub fn remove(&self, id: Uuid) -> MarketResult<()> {
        let mut guard = self.events.write().map_err(|_| MarketError::Poisoned)?;
        guard.remove(&id).ok_or(MarketError::EventNotFound(id))?;
        info!("Event removed from runtime: event_id={}", id);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.events.read().map(|guard| guard.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::Rng;

    #[test]
    fn percentages_follow_collateral_split() {
        let ledger = RuntimeLedger::new();
        let id = Uuid::new_v4();
        ledger.create_event(id).unwrap();

        let empty = ledger.get_state(id).unwrap();
        assert_eq!(empty.collateral, 0);
        assert!(empty.bets.iter().all(|b| b.percentage == 0.0));

        ledger.deposit(id, Token::A, 100).unwrap();
        ledger.deposit(id, Token::B, 50).unwrap();
        let state = ledger.get_state(id).unwrap();

        assert_eq!(state.collateral, 150);
        assert_eq!(state.bets[0].collateral, 100);
        assert_eq!(state.bets[1].collateral, 50);
        assert!((state.bets[0].percentage - 66.666).abs() < 0.01);
        assert!((state.bets[1].percentage - 33.333).abs() < 0.01);
        let sum: f64 = state.bets.iter().map(|b| b.percentage).sum();
        assert!((sum - 100.0).abs() < 1e-9);
    }

    #[test]
    fn one_sided_event_reports_full_percentage() {
        let ledger = RuntimeLedger::new();
        let id = Uuid::new_v4();
        ledger.create_event(id).unwrap();
        ledger.deposit(id, Token::B, 7).unwrap();

        let state = ledger.get_state(id).unwrap();
        assert_eq!(state.bets[0].percentage, 0.0);
        assert_eq!(state.bets[1].percentage, 100.0);
    }

    #[test]
    fn registration_errors() {
        let ledger = RuntimeLedger::new();
        let id = Uuid::new_v4();
        ledger.create_event(id).unwrap();
        assert!(matches!(ledger.create_event(id), Err(MarketError::AlreadyExists(_))));

        let missing = Uuid::new_v4();
        assert!(matches!(ledger.deposit(missing, Token::A, 1), Err(MarketError::EventNotFound(_))));
        assert!(matches!(ledger.get_state(missing), Err(MarketError::EventNotFound(_))));
        assert!(matches!(ledger.close(missing), Err(MarketError::EventNotFound(_))));
    }

    #[test]
    fn overflow_is_rejected_without_mutation() {
        let ledger = RuntimeLedger::new();
        let id = Uuid::new_v4();
        ledger.restore_event(id, true, [u64::MAX - 1, 0]).unwrap();

        assert!(matches!(ledger.deposit(id, Token::B, 2), Err(MarketError::Overflow(_))));
        assert_eq!(ledger.get_state(id).unwrap().collateral, u64::MAX - 1);
    }

    #[test]
    fn closed_event_still_accepts_late_deposits() {
        let ledger = RuntimeLedger::new();
        let id = Uuid::new_v4();
        ledger.create_event(id).unwrap();
        ledger.close(id).unwrap();

        let state = ledger.deposit(id, Token::A, 10).unwrap();
        assert!(!state.active);
        assert_eq!(state.collateral, 10);

        ledger.remove(id).unwrap();
        assert!(ledger.is_empty());
    }

    #[test]
    fn snapshot_keeps_registration_order() {
        let ledger = RuntimeLedger::new();
        let ids: Vec<Uuid> = (0..5).map(|_| Uuid::new_v4()).collect();
        for id in &ids {
            ledger.create_event(*id).unwrap();
        }
        let snapshot = ledger.snapshot_all().unwrap();
        let order: Vec<Uuid> = snapshot.iter().map(|s| s.id).collect();
        assert_eq!(order, ids);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_deposits_sum_exactly() {
        let ledger = RuntimeLedger::new();
        let id = Uuid::new_v4();
        ledger.create_event(id).unwrap();

        let mut handles = Vec::new();
        let mut expected = [0u64; 2];
        for _ in 0..16 {
            let amounts: Vec<(Token, u64)> = {
                let mut rng = rand::thread_rng();
                (0..200)
                    .map(|_| {
                        let token = if rng.gen_bool(0.5) { Token::A } else { Token::B };
                        (token, rng.gen_range(1..1_000_000))
                    })
                    .collect()
            };
            for (token, amount) in &amounts {
                expected[token.index()] += amount;
            }
            let ledger = ledger.clone();
            handles.push(tokio::spawn(async move {
                for (token, amount) in amounts {
                    ledger.deposit(id, token, amount).unwrap();
                    tokio::task::yield_now().await;
                }
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        let state = ledger.get_state(id).unwrap();
        assert_eq!(state.bets[0].collateral, expected[0]);
        assert_eq!(state.bets[1].collateral, expected[1]);
        assert_eq!(state.collateral, expected[0] + expected[1]);
    }
}
