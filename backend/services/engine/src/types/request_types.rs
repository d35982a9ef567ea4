use ledger_store::{Bet, Event, Tag, Token};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct NewBet {
    pub token: Token,
    #[validate(length(min = 1, max = 256, message = "Bet title must be 1-256 characters"))]
    pub title: String,
    #[serde(default)]
    #[validate(length(max = 2048, message = "Logo link is too long"))]
    pub logo_link: String,
}

#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct NewEvent {
    pub tag: Tag,
    #[validate(length(min = 1, max = 512, message = "Title must be 1-512 characters"))]
    pub title: String,
    #[serde(default)]
    #[validate(length(max = 2048, message = "Logo link is too long"))]
    pub logo_link: String,
    #[validate(length(equal = 2, message = "An event has exactly two bets"), nested)]
    pub bets: Vec<NewBet>,
}

impl NewEvent {
    /// Builds the event; `None` unless the bets cover both tokens.
    pub fn into_event(self) -> Option<Event> {
        if self.tag == Tag::All {
            return None;
        }
        let mut bets = self.bets.into_iter().map(|bet| Bet {
            token: bet.token,
            title: bet.title,
            logo_link: bet.logo_link,
        });
        let first = bets.next()?;
        let second = bets.next()?;
        if first.token == second.token {
            return None;
        }
        Some(Event::new(self.tag, self.title, self.logo_link, [first, second]))
    }
}

#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct DepositIntent {
    #[validate(length(min = 1, message = "Address is required"))]
    pub address: String,
    #[serde(alias = "eventID")]
    pub event_id: Uuid,
    pub token: Token,
    /// Whole coins.
    #[validate(range(exclusive_min = 0.0, message = "Collateral must be greater than 0"))]
    pub collateral: f64,
}

/// What the wallet has to sign to fund a deal.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct DepositInstruction {
    pub address: String,
    /// Nanotons, as a decimal string.
    pub amount: String,
    pub memo: String,
    #[serde(rename = "depositID")]
    pub deposit_id: Uuid,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
pub enum DepositStatus {
    Ok,
    Error,
}

impl From<DepositStatus> for u8 {
    fn from(status: DepositStatus) -> Self {
        match status {
            DepositStatus::Ok => 0,
            DepositStatus::Error => 1,
        }
    }
}

impl TryFrom<u8> for DepositStatus {
    type Error = String;

    fn try_from(code: u8) -> Result<Self, String> {
        match code {
            0 => Ok(DepositStatus::Ok),
            1 => Ok(DepositStatus::Error),
            other => Err(format!("invalid deposit status {}", other)),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DepositConfirmation {
    #[serde(rename = "depositID", alias = "depositId")]
    pub deposit_id: Uuid,
    pub deposit_status: DepositStatus,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CloseEventRequest {
    pub event_id: Uuid,
    pub winning_token: Token,
}

/// Pages are one-based; page 0 reads as an empty page.
#[derive(Debug, Clone, Deserialize)]
pub struct EventPageQuery {
    #[serde(default = "all_tags")]
    pub tag: Tag,
    #[serde(default = "first_page")]
    pub page: usize,
}

fn all_tags() -> Tag {
    Tag::All
}

fn first_page() -> usize {
    1
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventQuery {
    pub event_id: Uuid,
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct UserAssetsQuery {
    #[validate(length(min = 1, message = "Address is required"))]
    pub address: String,
}
