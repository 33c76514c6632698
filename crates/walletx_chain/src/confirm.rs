//! Waiting for a submitted transaction to be mined.

use std::sync::atomic::{AtomicU32, Ordering};

use alloy_primitives::B256;
use tracing::{debug, info, warn};

use crate::cancel::CancelToken;
use crate::error::ChainError;
use crate::retry::{RetryError, RetryPolicy, retry};
use crate::rpc::ChainRpc;
use crate::types::TransactionReceipt;

/// Why no receipt was returned.
#[derive(Debug, thiserror::Error)]
pub enum ConfirmError {
    /// The retry budget ran out while the node still did not know the
    /// receipt. The transaction may confirm later; its outcome is unknown.
    #[error("transaction {hash} not confirmed after {attempts} polls")]
    Timeout { hash: B256, attempts: u32 },

    /// Every poll failed with a hard RPC error.
    #[error("receipt polling for {hash} failed {attempts} times: {source}")]
    Rpc {
        hash: B256,
        attempts: u32,
        #[source]
        source: ChainError,
    },

    /// The caller stopped waiting.
    #[error("stopped waiting for {hash}")]
    Cancelled { hash: B256 },
}

enum Poll {
    NotMined,
    Failed(ChainError),
}

/// Polls `eth_getTransactionReceipt` under a bounded retry policy.
pub struct ConfirmationWaiter<'a> {
    rpc: &'a dyn ChainRpc,
    policy: RetryPolicy,
}

impl<'a> ConfirmationWaiter<'a> {
    pub fn new(rpc: &'a dyn ChainRpc, policy: RetryPolicy) -> Self {
        Self { rpc, policy }
    }

    /// Return the receipt once the transaction is mined.
    ///
    /// "Not mined yet" and transient RPC failures both consume an attempt.
    /// Exhaustion reports [`ConfirmError::Timeout`] if any poll reached the
    /// node and got "not found", and [`ConfirmError::Rpc`] only when every
    /// single poll failed hard.
    pub async fn wait(
        &self,
        hash: B256,
        cancel: &CancelToken,
    ) -> Result<TransactionReceipt, ConfirmError> {
        let not_mined = AtomicU32::new(0);
        let not_mined = &not_mined;
        let rpc = self.rpc;

        let result = retry(&self.policy, cancel, |_: &Poll| true, move || async move {
            match rpc.get_transaction_receipt(hash).await {
                Ok(Some(receipt)) => Ok(receipt),
                Ok(None) => {
                    not_mined.fetch_add(1, Ordering::Relaxed);
                    debug!(%hash, "receipt not available yet");
                    Err(Poll::NotMined)
                }
                Err(e) => {
                    warn!(%hash, "receipt poll failed: {e}");
                    Err(Poll::Failed(e))
                }
            }
        })
        .await;

        match result {
            Ok(receipt) => {
                info!(
                    %hash,
                    block = receipt.block_number(),
                    gas_used = %receipt.gas_used,
                    "transaction confirmed"
                );
                Ok(receipt)
            }
            Err(RetryError::Cancelled { attempts }) => {
                debug!(%hash, attempts, "confirmation wait cancelled");
                Err(ConfirmError::Cancelled { hash })
            }
            Err(RetryError::Exhausted { attempts, last }) => {
                Err(self.give_up(hash, attempts, last, not_mined.load(Ordering::Relaxed)))
            }
            // Every poll outcome is retryable, so this only guards the match.
            Err(RetryError::Fatal(last)) => {
                Err(self.give_up(hash, 1, last, not_mined.load(Ordering::Relaxed)))
            }
        }
    }

    fn give_up(&self, hash: B256, attempts: u32, last: Poll, not_mined: u32) -> ConfirmError {
        match last {
            Poll::Failed(source) if not_mined == 0 => ConfirmError::Rpc {
                hash,
                attempts,
                source,
            },
            _ => {
                warn!(%hash, attempts, "transaction still unconfirmed, giving up locally");
                ConfirmError::Timeout { hash, attempts }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cancel::cancel_pair;
    use crate::rpc::TransactionRequest;
    use alloy_primitives::{Address, Bytes, U64, U256};
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::time::Duration;

    /// Replays receipt poll outcomes in order, then keeps answering "not mined".
    struct ReceiptScript {
        polls: Mutex<Vec<Result<Option<TransactionReceipt>, ChainError>>>,
        calls: AtomicU32,
    }

    impl ReceiptScript {
        fn new(polls: Vec<Result<Option<TransactionReceipt>, ChainError>>) -> Self {
            Self {
                polls: Mutex::new(polls),
                calls: AtomicU32::new(0),
            }
        }

        fn calls(&self) -> u32 {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl ChainRpc for ReceiptScript {
        async fn chain_id(&self) -> Result<u64, ChainError> {
            Ok(42101)
        }
        async fn block_number(&self) -> Result<u64, ChainError> {
            Ok(0)
        }
        async fn get_balance(&self, _: Address) -> Result<U256, ChainError> {
            Ok(U256::ZERO)
        }
        async fn get_code(&self, _: Address) -> Result<Bytes, ChainError> {
            Ok(Bytes::new())
        }
        async fn get_transaction_receipt(
            &self,
            _: B256,
        ) -> Result<Option<TransactionReceipt>, ChainError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let mut polls = self.polls.lock();
            if polls.is_empty() { Ok(None) } else { polls.remove(0) }
        }
        async fn send_transaction(&self, _: &TransactionRequest) -> Result<B256, ChainError> {
            Ok(B256::ZERO)
        }
    }

    fn receipt(hash: B256) -> TransactionReceipt {
        TransactionReceipt {
            transaction_hash: hash,
            block_number: Some(U64::from(100)),
            gas_used: U256::from(21_000),
            status: Some(U64::from(1)),
            logs: Vec::new(),
        }
    }

    fn policy(attempts: u32) -> RetryPolicy {
        RetryPolicy::fixed(attempts, Duration::from_millis(1))
    }

    #[tokio::test]
    async fn returns_receipt_once_mined() {
        let hash = B256::repeat_byte(0xaa);
        let rpc = ReceiptScript::new(vec![Ok(None), Ok(None), Ok(Some(receipt(hash)))]);
        let waiter = ConfirmationWaiter::new(&rpc, policy(5));

        let got = waiter.wait(hash, &CancelToken::never()).await.unwrap();
        assert_eq!(got.transaction_hash, hash);
        assert_eq!(got.block_number(), 100);
        assert_eq!(rpc.calls(), 3);
    }

    #[tokio::test]
    async fn transient_rpc_errors_are_retried() {
        let hash = B256::repeat_byte(0xab);
        let rpc = ReceiptScript::new(vec![
            Err(ChainError::Transport("reset".into())),
            Ok(Some(receipt(hash))),
        ]);
        let waiter = ConfirmationWaiter::new(&rpc, policy(3));
        assert!(waiter.wait(hash, &CancelToken::never()).await.is_ok());
    }

    #[tokio::test]
    async fn never_mined_is_timeout() {
        let hash = B256::repeat_byte(0xac);
        let rpc = ReceiptScript::new(Vec::new());
        let waiter = ConfirmationWaiter::new(&rpc, policy(4));

        let err = waiter.wait(hash, &CancelToken::never()).await.unwrap_err();
        assert!(matches!(err, ConfirmError::Timeout { attempts: 4, .. }));
        assert_eq!(rpc.calls(), 4);
    }

    #[tokio::test]
    async fn mixed_failures_still_count_as_timeout() {
        let hash = B256::repeat_byte(0xad);
        let rpc = ReceiptScript::new(vec![
            Ok(None),
            Err(ChainError::Transport("a".into())),
            Err(ChainError::Transport("b".into())),
        ]);
        let waiter = ConfirmationWaiter::new(&rpc, policy(3));

        let err = waiter.wait(hash, &CancelToken::never()).await.unwrap_err();
        assert!(matches!(err, ConfirmError::Timeout { .. }));
    }

    #[tokio::test]
    async fn all_hard_failures_is_rpc_error() {
        let hash = B256::repeat_byte(0xae);
        let rpc = ReceiptScript::new(vec![
            Err(ChainError::Rpc { code: -32603, message: "internal".into() }),
            Err(ChainError::Rpc { code: -32603, message: "internal".into() }),
        ]);
        let waiter = ConfirmationWaiter::new(&rpc, policy(2));

        let err = waiter.wait(hash, &CancelToken::never()).await.unwrap_err();
        match err {
            ConfirmError::Rpc { attempts, source, .. } => {
                assert_eq!(attempts, 2);
                assert!(matches!(source, ChainError::Rpc { code: -32603, .. }));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn cancellation_stops_polling() {
        let hash = B256::repeat_byte(0xaf);
        let rpc = ReceiptScript::new(Vec::new());
        let waiter =
            ConfirmationWaiter::new(&rpc, RetryPolicy::fixed(100, Duration::from_secs(60)));
        let (handle, token) = cancel_pair();

        let wait = waiter.wait(hash, &token);
        let cancel = async {
            tokio::time::sleep(Duration::from_millis(5)).await;
            handle.cancel();
        };
        let (result, ()) = tokio::join!(wait, cancel);

        assert!(matches!(result, Err(ConfirmError::Cancelled { .. })));
        assert_eq!(rpc.calls(), 1);
    }
}
