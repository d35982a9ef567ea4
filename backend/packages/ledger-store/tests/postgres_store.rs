//! Runs against the database in `DATABASE_URL`; skipped when it is unset.

use std::env;
use std::sync::Arc;

use ledger_store::{Bet, Deal, DealStatus, Event, LedgerStore, PgLedgerStore, StoreError, Tag, Token};
use uuid::Uuid;

async fn store() -> Option<PgLedgerStore> {
    let url = match env::var("DATABASE_URL") {
        Ok(url) => url,
        Err(_) => {
            eprintln!("DATABASE_URL not set, skipping Postgres store test");
            return None;
        }
    };
    let store = PgLedgerStore::connect(&url, 5).await.unwrap();
    store.migrate().await.unwrap();
    Some(store)
}

fn event() -> Event {
    Event::new(
        Tag::Crypto,
        "SOL above 500",
        "",
        [
            Bet { token: Token::A, title: "Yes".into(), logo_link: String::new() },
            Bet { token: Token::B, title: "No".into(), logo_link: String::new() },
        ],
    )
}

#[tokio::test]
async fn promote_accumulates_one_asset_per_user_event_token() {
    let Some(store) = store().await else { return };
    let store = Arc::new(store);
    let event = event();
    store.save_event(&event).await.unwrap();
    let address = format!("0:{}", Uuid::new_v4().simple());

    let first = Deal::new(event.id, address.as_str(), Token::A, 40);
    let second = Deal::new(event.id, address.as_str(), Token::A, 60);
    for deal in [&first, &second] {
        store.save_deal_unchecked(deal).await.unwrap();
        store.mark_pending(deal.id).await.unwrap();
    }

    let (first_id, second_id) = (first.id, second.id);
    let (a, b) = tokio::join!(
        {
            let store = store.clone();
            async move { store.promote_deal(first_id).await }
        },
        {
            let store = store.clone();
            async move { store.promote_deal(second_id).await }
        }
    );
    for result in [a, b] {
        match result {
            Ok(deal) => assert_eq!(deal.status, DealStatus::Verified),
            Err(e) => panic!("promote failed: {}", e),
        }
    }

    let assets = store.get_user_assets(&address).await.unwrap();
    assert_eq!(assets.len(), 1);
    assert_eq!(assets[0].collateral_staked, 100);
    assert_eq!(assets[0].size, 100);

    assert!(matches!(
        store.promote_deal(first_id).await,
        Err(StoreError::DealAlreadyProcessed { status: DealStatus::Verified, .. })
    ));

    store.delete_event_assets(event.id).await.unwrap();
    store.delete_event(event.id).await.unwrap();
}

#[tokio::test]
async fn pending_deals_excludes_unconfirmed_intents() {
    let Some(store) = store().await else { return };
    let event = event();
    store.save_event(&event).await.unwrap();
    let address = format!("0:{}", Uuid::new_v4().simple());

    let intent = Deal::new(event.id, address.as_str(), Token::B, 5);
    let confirmed = Deal::new(event.id, address.as_str(), Token::B, 6);
    store.save_deal_unchecked(&intent).await.unwrap();
    store.save_deal_unchecked(&confirmed).await.unwrap();
    store.mark_pending(confirmed.id).await.unwrap();

    let pending: Vec<Uuid> = store.pending_deals().await.unwrap().into_iter().map(|d| d.id).collect();
    assert!(pending.contains(&confirmed.id));
    assert!(!pending.contains(&intent.id));

    store.decline_deal(intent.id).await.unwrap();
    store.decline_deal(confirmed.id).await.unwrap();
    store.delete_event(event.id).await.unwrap();
}
