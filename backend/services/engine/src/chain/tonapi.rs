use std::time::Duration;

use async_trait::async_trait;
use base64ct::{Base64, Base64Url, Encoding};
use log::{debug, warn};
use serde::Deserialize;
use serde_json::Value;

use crate::chain::{
    AccountId, ChainError, ChainMessage, ChainTransaction, Direction, LedgerClient, MessageBody,
};

const TEXT_COMMENT_OP: &str = "text_comment";

/// `LedgerClient` backed by the TonAPI v2 REST interface.
#[derive(Clone, Debug)]
pub struct TonApiClient {
    http: reqwest::Client,
    base_url: String,
    token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TransactionsPage {
    #[serde(default)]
    transactions: Vec<Value>,
}

#[derive(Debug, Deserialize)]
struct RawTransaction {
    hash: String,
    #[serde(default)]
    in_msg: Option<RawMessage>,
    #[serde(default)]
    out_msgs: Vec<RawMessage>,
}

#[derive(Debug, Deserialize)]
struct RawMessage {
    #[serde(default)]
    op_code: Option<String>,
    #[serde(default)]
    decoded_op_name: Option<String>,
    #[serde(default)]
    decoded_body: Option<Value>,
}

impl RawMessage {
    fn into_body(self) -> MessageBody {
        match self.decoded_op_name.as_deref() {
            Some(TEXT_COMMENT_OP) => match self
                .decoded_body
                .as_ref()
                .and_then(|body| body.get("text"))
                .and_then(Value::as_str)
            {
                Some(text) => MessageBody::Comment(text.to_string()),
                None => MessageBody::Malformed,
            },
            Some(op) => MessageBody::Binary { op_name: op.to_string() },
            None => match self.op_code {
                Some(code) => MessageBody::Binary { op_name: code },
                None => MessageBody::Empty,
            },
        }
    }
}

impl From<RawTransaction> for ChainTransaction {
    fn from(raw: RawTransaction) -> Self {
        let mut messages = Vec::with_capacity(raw.out_msgs.len() + 1);
        if let Some(in_msg) = raw.in_msg {
            messages.push(ChainMessage {
                direction: Direction::Incoming,
                body: in_msg.into_body(),
            });
        }
        messages.extend(raw.out_msgs.into_iter().map(|out| ChainMessage {
            direction: Direction::Outgoing,
            body: out.into_body(),
        }));
        ChainTransaction { hash: raw.hash, messages }
    }
}

impl TonApiClient {
    pub fn new(base_url: impl Into<String>, token: Option<String>) -> Result<Self, ChainError> {
        let http = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(5))
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| ChainError::ExternalUnavailable(format!("failed to build http client: {}", e)))?;

        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token,
        })
    }

    fn transactions_url(&self, account: &AccountId) -> String {
        format!("{}/v2/blockchain/accounts/{}/transactions", self.base_url, account)
    }
}

/// Decodes a transactions page one entry at a time so a single odd
/// transaction does not hide the rest.
fn decode_transactions(page: TransactionsPage) -> Vec<ChainTransaction> {
    page.transactions
        .into_iter()
        .filter_map(|raw| match serde_json::from_value::<RawTransaction>(raw) {
            Ok(tx) => Some(tx.into()),
            Err(e) => {
                warn!("Skipping undecodable transaction: {}", e);
                None
            }
        })
        .collect()
}

/// Accepts the raw form (`wc:64 hex`) or the 48 character user-friendly form
/// and returns the raw form, so both spellings of one wallet are the same account.
pub fn parse_ton_address(raw: &str) -> Result<AccountId, ChainError> {
    let trimmed = raw.trim();
    let invalid = || ChainError::InvalidAddress(raw.to_string());

    if let Some((workchain, hash)) = trimmed.split_once(':') {
        workchain.parse::<i32>().map_err(|_| invalid())?;
        if hash.len() != 64 || !hash.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(invalid());
        }
        return Ok(AccountId::new(format!("{}:{}", workchain, hash.to_ascii_lowercase())));
    }

    if trimmed.len() != FRIENDLY_LEN {
        return Err(invalid());
    }
    let mut buf = [0u8; FRIENDLY_BYTES];
    let decoded = if trimmed.contains(['-', '_']) {
        Base64Url::decode(trimmed, &mut buf)
    } else {
        Base64::decode(trimmed, &mut buf)
    }
    .map_err(|_| invalid())?;
    if decoded.len() != FRIENDLY_BYTES {
        return Err(invalid());
    }

    let (body, checksum) = decoded.split_at(34);
    if crc16(body).to_be_bytes() != checksum {
        return Err(invalid());
    }
    // Testnet bit aside, only bounceable and non-bounceable tags exist.
    if !matches!(body[0] & 0x7f, 0x11 | 0x51) {
        return Err(invalid());
    }
    let workchain = body[1] as i8;
    Ok(AccountId::new(format!("{}:{}", workchain, hex::encode(&body[2..]))))
}

const FRIENDLY_LEN: usize = 48;
const FRIENDLY_BYTES: usize = 36;

/// CRC-16/XMODEM.
fn crc16(data: &[u8]) -> u16 {
    data.iter().fold(0u16, |mut crc, byte| {
        crc ^= (*byte as u16) << 8;
        for _ in 0..8 {
            crc = if crc & 0x8000 != 0 { (crc << 1) ^ 0x1021 } else { crc << 1 };
        }
        crc
    })
}

#[async_trait]
impl LedgerClient for TonApiClient {
    fn parse_address(&self, raw: &str) -> Result<AccountId, ChainError> {
        parse_ton_address(raw)
    }

    async fn list_recent_transactions(
        &self,
        account: &AccountId,
        limit: usize,
    ) -> Result<Vec<ChainTransaction>, ChainError> {
        let mut request = self
            .http
            .get(self.transactions_url(account))
            .query(&[("limit", limit.to_string()), ("sort_order", "desc".to_string())]);
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }

        let response = request
            .send()
            .await
            .map_err(|e| ChainError::ExternalUnavailable(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(ChainError::ExternalUnavailable(format!(
                "tonapi returned {} for {}",
                status, account
            )));
        }

        let page: TransactionsPage = response
            .json()
            .await
            .map_err(|e| ChainError::ExternalUnavailable(format!("invalid tonapi payload: {}", e)))?;

        let transactions = decode_transactions(page);
        debug!("Fetched transactions: account={}, count={}", account, transactions.len());
        Ok(transactions)
    }
}
