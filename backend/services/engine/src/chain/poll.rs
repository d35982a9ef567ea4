use std::time::Duration;

use log::warn;
use tokio::time::{sleep, timeout};
use tokio_util::sync::CancellationToken;

use crate::chain::{find_memo, AccountId, ChainError, ChainTransaction, Direction, LedgerClient};

/// Fixed-backoff retry policy for ledger lookups. Only transport failures
/// are retried.
#[derive(Debug, Clone, Copy)]
pub struct PollPolicy {
    pub retries: usize,
    pub backoff: Duration,
    pub call_timeout: Duration,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            retries: 10,
            backoff: Duration::from_secs(5),
            call_timeout: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Confirmation {
    Confirmed(String),
    NotYetConfirmed,
}

pub async fn fetch_with_retry(
    client: &dyn LedgerClient,
    account: &AccountId,
    limit: usize,
    policy: &PollPolicy,
    cancel: &CancellationToken,
) -> Result<Vec<ChainTransaction>, ChainError> {
    let attempts = policy.retries.max(1);
    let mut last_error = ChainError::ExternalUnavailable("no attempt made".into());

    for attempt in 1..=attempts {
        if cancel.is_cancelled() {
            return Err(ChainError::Cancelled);
        }

        let call = timeout(policy.call_timeout, client.list_recent_transactions(account, limit));
        let result = tokio::select! {
            _ = cancel.cancelled() => return Err(ChainError::Cancelled),
            result = call => result,
        };

        match result {
            Ok(Ok(transactions)) => return Ok(transactions),
            Ok(Err(ChainError::ExternalUnavailable(reason))) => {
                warn!(
                    "Ledger lookup failed: account={}, attempt={}/{}, reason={}",
                    account, attempt, attempts, reason
                );
                last_error = ChainError::ExternalUnavailable(reason);
            }
            Ok(Err(other)) => return Err(other),
            Err(_) => {
                warn!("Ledger lookup timed out: account={}, attempt={}/{}", account, attempt, attempts);
                last_error = ChainError::ExternalUnavailable("request timed out".into());
            }
        }

        if attempt < attempts {
            tokio::select! {
                _ = cancel.cancelled() => return Err(ChainError::Cancelled),
                _ = sleep(policy.backoff) => {}
            }
        }
    }

    Err(last_error)
}

/// Looks for `expected` among the account's recent `direction` memos.
pub async fn confirm_memo(
    client: &dyn LedgerClient,
    account: &AccountId,
    direction: Direction,
    expected: &str,
    limit: usize,
    policy: &PollPolicy,
    cancel: &CancellationToken,
) -> Result<Confirmation, ChainError> {
    let transactions = fetch_with_retry(client, account, limit, policy, cancel).await?;
    Ok(match find_memo(&transactions, direction, expected) {
        Some(hash) => Confirmation::Confirmed(hash.to_string()),
        None => Confirmation::NotYetConfirmed,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{comment_tx, MockLedgerClient};

    fn quick_policy() -> PollPolicy {
        PollPolicy {
            retries: 3,
            backoff: Duration::from_secs(5),
            call_timeout: Duration::from_secs(30),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn retries_transport_failures_then_succeeds() {
        let client = MockLedgerClient::new();
        let account = AccountId::new("0:user");
        client.set_transactions("0:user", vec![comment_tx("t1", Direction::Outgoing, "memo")]);
        client.fail_next(2);

        let cancel = CancellationToken::new();
        let confirmation = confirm_memo(&client, &account, Direction::Outgoing, "memo", 10, &quick_policy(), &cancel)
            .await
            .unwrap();
        assert_eq!(confirmation, Confirmation::Confirmed("t1".into()));
        assert_eq!(client.calls(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn gives_up_after_policy_retries() {
        let client = MockLedgerClient::new();
        let account = AccountId::new("0:user");
        client.fail_next(10);

        let cancel = CancellationToken::new();
        let err = fetch_with_retry(&client, &account, 10, &quick_policy(), &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, ChainError::ExternalUnavailable(_)));
        assert_eq!(client.calls(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn missing_memo_is_not_an_error() {
        let client = MockLedgerClient::new();
        let account = AccountId::new("0:user");
        client.set_transactions("0:user", vec![comment_tx("t1", Direction::Outgoing, "other")]);

        let cancel = CancellationToken::new();
        let confirmation = confirm_memo(&client, &account, Direction::Outgoing, "memo", 10, &quick_policy(), &cancel)
            .await
            .unwrap();
        assert_eq!(confirmation, Confirmation::NotYetConfirmed);
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_token_stops_polling() {
        let client = MockLedgerClient::new();
        let account = AccountId::new("0:user");
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = fetch_with_retry(&client, &account, 10, &quick_policy(), &cancel)
            .await
            .unwrap_err();
        assert_eq!(err, ChainError::Cancelled);
        assert_eq!(client.calls(), 0);
    }
}
