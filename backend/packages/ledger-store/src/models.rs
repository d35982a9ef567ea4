use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::error::StoreError;

/// One side of a two-outcome event.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Token {
    #[serde(rename = "TokenA")]
    A,
    #[serde(rename = "TokenB")]
    B,
}

impl Token {
    pub const ALL: [Token; 2] = [Token::A, Token::B];

    pub fn complement(self) -> Token {
        match self {
            Token::A => Token::B,
            Token::B => Token::A,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Token::A => "TokenA",
            Token::B => "TokenB",
        }
    }

    pub fn index(self) -> usize {
        match self {
            Token::A => 0,
            Token::B => 1,
        }
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Token {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "TokenA" => Ok(Token::A),
            "TokenB" => Ok(Token::B),
            other => Err(StoreError::InvalidToken(other.to_string())),
        }
    }
}

/// Event category. `All` is only meaningful as a read filter.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(into = "i16", try_from = "i16")]
pub enum Tag {
    Politic,
    Economics,
    Crypto,
    Culture,
    Other,
    All,
}

impl Tag {
    pub fn code(self) -> i16 {
        match self {
            Tag::Politic => 0,
            Tag::Economics => 1,
            Tag::Crypto => 2,
            Tag::Culture => 3,
            Tag::Other => 4,
            Tag::All => 5,
        }
    }

    pub fn matches(self, filter: Tag) -> bool {
        filter == Tag::All || self == filter
    }
}

impl From<Tag> for i16 {
    fn from(tag: Tag) -> Self {
        tag.code()
    }
}

impl TryFrom<i16> for Tag {
    type Error = StoreError;

    fn try_from(code: i16) -> Result<Self, Self::Error> {
        match code {
            0 => Ok(Tag::Politic),
            1 => Ok(Tag::Economics),
            2 => Ok(Tag::Crypto),
            3 => Ok(Tag::Culture),
            4 => Ok(Tag::Other),
            5 => Ok(Tag::All),
            other => Err(StoreError::InvalidTag(other)),
        }
    }
}

/// Lifecycle of a deal. Codes are part of the persisted contract.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum DealStatus {
    Unchecked,
    Verified,
    Declined,
    Pending,
}

impl DealStatus {
    pub fn code(self) -> i16 {
        match self {
            DealStatus::Unchecked => 0,
            DealStatus::Verified => 1,
            DealStatus::Declined => 2,
            DealStatus::Pending => 3,
        }
    }

    pub fn from_code(code: i16) -> Result<Self, StoreError> {
        match code {
            0 => Ok(DealStatus::Unchecked),
            1 => Ok(DealStatus::Verified),
            2 => Ok(DealStatus::Declined),
            3 => Ok(DealStatus::Pending),
            other => Err(StoreError::InvalidDealStatus(other)),
        }
    }

    pub fn is_final(self) -> bool {
        matches!(self, DealStatus::Verified | DealStatus::Declined)
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Bet {
    pub token: Token,
    pub title: String,
    pub logo_link: String,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Event {
    pub id: Uuid,
    pub tag: Tag,
    pub logo_link: String,
    pub title: String,
    pub active: bool,
    pub bets: BTreeMap<Token, Bet>,
}

impl Event {
    pub fn new(tag: Tag, title: impl Into<String>, logo_link: impl Into<String>, bets: [Bet; 2]) -> Self {
        Self {
            id: Uuid::new_v4(),
            tag,
            logo_link: logo_link.into(),
            title: title.into(),
            active: true,
            bets: bets.into_iter().map(|bet| (bet.token, bet)).collect(),
        }
    }

    /// Both tokens must be present, each keyed under its own token.
    pub fn check_outcomes(&self) -> Result<(), StoreError> {
        let complete = self.bets.len() == Token::ALL.len()
            && Token::ALL
                .iter()
                .all(|t| self.bets.get(t).map(|b| b.token == *t).unwrap_or(false));
        if complete {
            Ok(())
        } else {
            Err(StoreError::InvalidOutcomes(self.id))
        }
    }

    pub fn bet_title(&self, token: Token) -> &str {
        self.bets.get(&token).map(|b| b.title.as_str()).unwrap_or_default()
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Deal {
    pub id: Uuid,
    pub event_id: Uuid,
    pub user_raw_addr: String,
    pub token: Token,
    pub collateral: u64,
    pub size: u64,
    pub status: DealStatus,
    pub attempts: i32,
    pub created_at: DateTime<Utc>,
}

impl Deal {
    pub fn new(event_id: Uuid, user_raw_addr: impl Into<String>, token: Token, collateral: u64) -> Self {
        Self {
            id: Uuid::new_v4(),
            event_id,
            user_raw_addr: user_raw_addr.into(),
            token,
            collateral,
            size: collateral,
            status: DealStatus::Unchecked,
            attempts: 0,
            created_at: Utc::now(),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Asset {
    pub user_raw_address: String,
    pub event_id: Uuid,
    pub token: Token,
    pub collateral_staked: u64,
    pub size: u64,
}

impl Asset {
    /// The position a first verified deal opens.
    pub fn opened_by(deal: &Deal) -> Self {
        Self {
            user_raw_address: deal.user_raw_addr.clone(),
            event_id: deal.event_id,
            token: deal.token,
            collateral_staked: deal.collateral,
            size: deal.size,
        }
    }

    pub fn accumulate(&mut self, deal: &Deal) -> Result<(), StoreError> {
        self.collateral_staked = self
            .collateral_staked
            .checked_add(deal.collateral)
            .ok_or(StoreError::AmountOverflow(deal.id))?;
        self.size = self
            .size
            .checked_add(deal.size)
            .ok_or(StoreError::AmountOverflow(deal.id))?;
        Ok(())
    }
}

pub fn amount_to_db(amount: u64) -> String {
    amount.to_string()
}

pub fn amount_from_db(raw: &str) -> Result<u64, StoreError> {
    raw.trim()
        .parse::<u64>()
        .map_err(|_| StoreError::InvalidAmount(raw.to_string()))
}

#[derive(Debug, Clone, FromRow)]
pub struct EventRow {
    pub id: Uuid,
    pub tag: i16,
    pub logo_link: String,
    pub title: String,
    pub active: bool,
}

#[derive(Debug, Clone, FromRow)]
pub struct BetRow {
    pub event_id: Uuid,
    pub token: String,
    pub title: String,
    pub logo_link: String,
}

impl TryFrom<BetRow> for Bet {
    type Error = StoreError;

    fn try_from(row: BetRow) -> Result<Self, Self::Error> {
        Ok(Bet {
            token: row.token.parse()?,
            title: row.title,
            logo_link: row.logo_link,
        })
    }
}

impl EventRow {
    pub fn into_event(self, bet_rows: Vec<BetRow>) -> Result<Event, StoreError> {
        let mut bets = BTreeMap::new();
        for row in bet_rows {
            let bet = Bet::try_from(row)?;
            bets.insert(bet.token, bet);
        }
        Ok(Event {
            id: self.id,
            tag: Tag::try_from(self.tag)?,
            logo_link: self.logo_link,
            title: self.title,
            active: self.active,
            bets,
        })
    }
}

#[derive(Debug, Clone, FromRow)]
pub struct DealRow {
    pub id: Uuid,
    pub event_id: Uuid,
    pub token: String,
    pub collateral: String,
    pub size: String,
    pub user_raw_addr: String,
    pub deal_status: i16,
    pub attempts: i32,
    pub created_at: DateTime<Utc>,
}

impl TryFrom<DealRow> for Deal {
    type Error = StoreError;

    fn try_from(row: DealRow) -> Result<Self, Self::Error> {
        Ok(Deal {
            id: row.id,
            event_id: row.event_id,
            user_raw_addr: row.user_raw_addr,
            token: row.token.parse()?,
            collateral: amount_from_db(&row.collateral)?,
            size: amount_from_db(&row.size)?,
            status: DealStatus::from_code(row.deal_status)?,
            attempts: row.attempts,
            created_at: row.created_at,
        })
    }
}

#[derive(Debug, Clone, FromRow)]
pub struct AssetRow {
    pub user_raw_address: String,
    pub event_id: Uuid,
    pub token: String,
    pub collateral_staked: String,
    pub size: String,
}

impl TryFrom<AssetRow> for Asset {
    type Error = StoreError;

    fn try_from(row: AssetRow) -> Result<Self, Self::Error> {
        Ok(Asset {
            user_raw_address: row.user_raw_address,
            event_id: row.event_id,
            token: row.token.parse()?,
            collateral_staked: amount_from_db(&row.collateral_staked)?,
            size: amount_from_db(&row.size)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_complement_and_parse() {
        assert_eq!(Token::A.complement(), Token::B);
        assert_eq!(Token::B.complement(), Token::A);
        assert_eq!("TokenB".parse::<Token>().unwrap(), Token::B);
        assert!(matches!("TokenC".parse::<Token>(), Err(StoreError::InvalidToken(_))));
    }

    #[test]
    fn tag_serializes_as_code() {
        assert_eq!(serde_json::to_string(&Tag::Crypto).unwrap(), "2");
        let tag: Tag = serde_json::from_str("5").unwrap();
        assert_eq!(tag, Tag::All);
        assert!(serde_json::from_str::<Tag>("9").is_err());
        assert!(Tag::Culture.matches(Tag::All));
        assert!(!Tag::Culture.matches(Tag::Politic));
    }

    #[test]
    fn deal_status_codes_are_stable() {
        for status in [
            DealStatus::Unchecked,
            DealStatus::Verified,
            DealStatus::Declined,
            DealStatus::Pending,
        ] {
            assert_eq!(DealStatus::from_code(status.code()).unwrap(), status);
        }
        assert_eq!(DealStatus::Verified.code(), 1);
        assert!(DealStatus::Declined.is_final());
        assert!(!DealStatus::Pending.is_final());
    }

    #[test]
    fn amounts_round_trip_through_strings() {
        assert_eq!(amount_from_db(&amount_to_db(u64::MAX)).unwrap(), u64::MAX);
        assert!(matches!(amount_from_db("-1"), Err(StoreError::InvalidAmount(_))));
        assert!(matches!(amount_from_db("1.5"), Err(StoreError::InvalidAmount(_))));
    }

    #[test]
    fn deal_row_with_bad_collateral_is_rejected() {
        let row = DealRow {
            id: Uuid::new_v4(),
            event_id: Uuid::new_v4(),
            token: "TokenA".into(),
            collateral: "abc".into(),
            size: "1".into(),
            user_raw_addr: "0:abc".into(),
            deal_status: 0,
            attempts: 0,
            created_at: Utc::now(),
        };
        assert!(matches!(Deal::try_from(row), Err(StoreError::InvalidAmount(_))));
    }

    #[test]
    fn event_requires_both_outcomes() {
        let mut event = Event::new(
            Tag::Crypto,
            "BTC above 100k",
            "btc.png",
            [
                Bet { token: Token::A, title: "Yes".into(), logo_link: String::new() },
                Bet { token: Token::B, title: "No".into(), logo_link: String::new() },
            ],
        );
        assert!(event.check_outcomes().is_ok());
        assert_eq!(event.bet_title(Token::B), "No");

        event.bets.remove(&Token::B);
        assert!(matches!(event.check_outcomes(), Err(StoreError::InvalidOutcomes(_))));
    }

    #[test]
    fn asset_accumulates_deal_amounts() {
        let event_id = Uuid::new_v4();
        let first = Deal::new(event_id, "0:user", Token::A, 100);
        let second = Deal::new(event_id, "0:user", Token::A, 25);
        let mut asset = Asset::opened_by(&first);
        asset.accumulate(&second).unwrap();
        assert_eq!(asset.collateral_staked, 125);
        assert_eq!(asset.size, 125);

        let huge = Deal::new(event_id, "0:user", Token::A, u64::MAX);
        assert!(matches!(asset.accumulate(&huge), Err(StoreError::AmountOverflow(_))));
    }
}
