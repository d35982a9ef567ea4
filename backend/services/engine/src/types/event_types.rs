use ledger_store::{Asset, Event, StoreError, Tag, Token};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::store::runtime::EventState;
use crate::types::units::{format_percentage, format_units};

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct BetDto {
    pub token: Token,
    pub title: String,
    pub percentage: String,
    pub logo_link: String,
}

/// Read projection of one event with its live collateral split.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct EventDto {
    pub id: Uuid,
    pub tag: Tag,
    pub logo_link: String,
    pub title: String,
    pub collateral: String,
    pub collateral_units: u64,
    pub bets: Vec<BetDto>,
}

impl EventDto {
    /// Joins stored metadata with runtime state. Fails when the stored bets
    /// do not cover both tokens.
    pub fn assemble(event: &Event, state: &EventState) -> Result<Self, StoreError> {
        event.check_outcomes()?;

        let bets = state
            .bets
            .iter()
            .filter_map(|bet| {
                event.bets.get(&bet.token).map(|meta| BetDto {
                    token: bet.token,
                    title: meta.title.clone(),
                    percentage: format_percentage(bet.percentage),
                    logo_link: meta.logo_link.clone(),
                })
            })
            .collect();

        Ok(Self {
            id: event.id,
            tag: event.tag,
            logo_link: event.logo_link.clone(),
            title: event.title.clone(),
            collateral: format_units(state.collateral),
            collateral_units: state.collateral,
            bets,
        })
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct EventPage {
    pub items: Vec<EventDto>,
    pub pages: usize,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct AssetDto {
    pub event_id: Uuid,
    pub event_title: String,
    pub bet_title: String,
    pub token: Token,
    pub collateral_staked: String,
    pub size: String,
}

impl AssetDto {
    pub fn new(asset: &Asset, event: &Event) -> Self {
        Self {
            event_id: asset.event_id,
            event_title: event.title.clone(),
            bet_title: event.bet_title(asset.token).to_string(),
            token: asset.token,
            collateral_staked: format_units(asset.collateral_staked),
            size: format_units(asset.size),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Portfolio {
    pub assets: Vec<AssetDto>,
    pub total_in_market: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::runtime::BetState;
    use crate::test_utils::sample_event;

    #[test]
    fn assembles_dto_in_token_order() {
        let event = sample_event(Tag::Crypto, "BTC above 100k");
        let state = EventState {
            id: event.id,
            active: true,
            collateral: 150_000_000_000,
            bets: [
                BetState { token: Token::A, collateral: 100_000_000_000, percentage: 200.0 / 3.0 },
                BetState { token: Token::B, collateral: 50_000_000_000, percentage: 100.0 / 3.0 },
            ],
        };

        let dto = EventDto::assemble(&event, &state).unwrap();
        assert_eq!(dto.collateral, "150.0000");
        assert_eq!(dto.bets.len(), 2);
        assert_eq!(dto.bets[0].token, Token::A);
        assert_eq!(dto.bets[0].percentage, "67");
        assert_eq!(dto.bets[1].percentage, "33");

        let json = serde_json::to_value(&dto).unwrap();
        assert_eq!(json["tag"], 2);
        assert_eq!(json["bets"][0]["token"], "TokenA");
        assert!(json.get("logoLink").is_some());
    }

    #[test]
    fn rejects_event_missing_an_outcome() {
        let mut event = sample_event(Tag::Other, "incomplete");
        event.bets.remove(&Token::B);
        let state = EventState {
            id: event.id,
            active: true,
            collateral: 0,
            bets: [
                BetState { token: Token::A, collateral: 0, percentage: 0.0 },
                BetState { token: Token::B, collateral: 0, percentage: 0.0 },
            ],
        };
        assert!(matches!(
            EventDto::assemble(&event, &state),
            Err(StoreError::InvalidOutcomes(_))
        ));
    }
}
