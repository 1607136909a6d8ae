//! The Order Poller: for a single conditional order and a block context,
//! asks the handler library for a poll result and maps it to an order-book
//! submission, a deferral, or a deletion.

use {
    crate::{
        domain::{
            conditional_order::{ConditionalOrderParams, DiscreteOrderStatus, PollResultSummary},
            eth::{Address, H256},
            filter_policy::{self, Action, Candidate, FilterPolicy},
            handler::{Handler, PollContext},
            poll_result::PollResult,
        },
        infra::{metrics::Metrics, orderbook::{OrderBookApi, SubmissionOutcome}},
    },
    std::{collections::BTreeMap, sync::Arc},
};

/// What the caller must do to the registry as a result of one poll. The
/// Order Poller never touches the registry directly: poll tasks for one
/// block run concurrently while registry writes stay single-writer, so
/// mutation is deferred to whoever drives the bounded fan-out (the Block
/// Processor).
#[derive(Debug, Clone)]
pub enum PollEffect {
    /// A new discrete order was submitted (or re-submitted idempotently);
    /// record it against the conditional order's `orders` map.
    Submitted(crate::domain::conditional_order::OrderUid),
    /// Nothing to do; the handler deferred, or the order-book rejected the
    /// submission for a reason that may resolve itself later.
    Deferred,
    /// Filter policy said `DROP`, or the handler said `DONT_TRY_AGAIN`:
    /// delete the conditional order permanently.
    Delete,
    /// Filter policy said `SKIP`: leave untouched this poll.
    Skipped,
}

pub struct Outcome {
    pub effect: PollEffect,
    pub summary: PollResultSummary,
}

pub struct OrderPoller {
    handler: Arc<dyn Handler>,
    orderbook: Arc<dyn OrderBookApi>,
    chain_id: String,
}

impl OrderPoller {
    pub fn new(handler: Arc<dyn Handler>, orderbook: Arc<dyn OrderBookApi>, chain_id: String) -> Self {
        Self {
            handler,
            orderbook,
            chain_id,
        }
    }

    /// Evaluates the filter policy, polls the handler, and maps the result
    /// to a registry effect for a single conditional order. `existing_orders`
    /// is the conditional order's current `orders` map, needed for the
    /// idempotence check.
    pub async fn poll(
        &self,
        owner: Address,
        tx: H256,
        params: &ConditionalOrderParams,
        existing_orders: &BTreeMap<crate::domain::conditional_order::OrderUid, DiscreteOrderStatus>,
        context: PollContext,
        filter_policy: &FilterPolicy,
    ) -> Outcome {
        let conditional_order_id = filter_policy::conditional_order_id(params);
        let action = filter_policy.evaluate(&Candidate {
            owner,
            handler: params.handler,
            transaction_hash: tx,
            conditional_order_id: &conditional_order_id,
        });

        match action {
            Action::Drop => {
                return Outcome {
                    effect: PollEffect::Delete,
                    summary: PollResultSummary::DontTryAgain,
                };
            }
            Action::Skip => {
                return Outcome {
                    effect: PollEffect::Skipped,
                    summary: PollResultSummary::TryNextBlock,
                };
            }
            Action::Accept => {}
        }

        let result = self.handler.poll(params, context).await;
        let handler_label = params.handler.to_string();
        let owner_label = owner.to_string();

        match result {
            PollResult::Success(signed_order) => {
                let uid = signed_order.uid();
                if existing_orders.contains_key(&uid) {
                    // Idempotence: we have already emitted this discrete
                    // order for this conditional order, never resubmit.
                    return Outcome {
                        effect: PollEffect::Deferred,
                        summary: PollResultSummary::Success,
                    };
                }

                match self.orderbook.submit_order(&signed_order).await {
                    Ok(SubmissionOutcome::Submitted | SubmissionOutcome::Duplicate) => {
                        Metrics::get()
                            .orderbook_discrete_orders_total
                            .with_label_values(&[&self.chain_id, &handler_label, &owner_label, &conditional_order_id])
                            .inc();
                        Outcome {
                            effect: PollEffect::Submitted(uid),
                            summary: PollResultSummary::Success,
                        }
                    }
                    Err(err) => {
                        tracing::warn!(?err, %owner, handler = %params.handler, "order-book rejected submission");
                        Metrics::get()
                            .orderbook_errors_total
                            .with_label_values(&[
                                &self.chain_id,
                                &handler_label,
                                &owner_label,
                                &conditional_order_id,
                                "rejected",
                                &err.to_string(),
                            ])
                            .inc();
                        // The order stays eligible: it remains absent from
                        // `orders` so the next block retries it.
                        Outcome {
                            effect: PollEffect::Deferred,
                            summary: PollResultSummary::Success,
                        }
                    }
                }
            }
            PollResult::TryNextBlock(reason) => {
                tracing::debug!(%owner, reason, "deferring to next block");
                Outcome {
                    effect: PollEffect::Deferred,
                    summary: PollResultSummary::TryNextBlock,
                }
            }
            PollResult::TryAtBlock(block, reason) => {
                tracing::debug!(%owner, block, reason, "deferring to a specific block");
                Outcome {
                    effect: PollEffect::Deferred,
                    summary: PollResultSummary::TryAtBlock(block),
                }
            }
            PollResult::TryAtEpoch(epoch, reason) => {
                tracing::debug!(%owner, epoch, reason, "deferring to a specific timestamp");
                Outcome {
                    effect: PollEffect::Deferred,
                    summary: PollResultSummary::TryAtEpoch(epoch),
                }
            }
            PollResult::DontTryAgain(reason) => {
                tracing::info!(%owner, reason, "handler will never be satisfiable, deleting");
                Outcome {
                    effect: PollEffect::Delete,
                    summary: PollResultSummary::DontTryAgain,
                }
            }
            PollResult::UnexpectedError(reason) => {
                tracing::warn!(%owner, reason, "unexpected handler error");
                Metrics::get()
                    .polling_unexpected_errors_total
                    .with_label_values(&[&self.chain_id])
                    .inc();
                Outcome {
                    effect: PollEffect::Deferred,
                    summary: PollResultSummary::UnexpectedError,
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use {
        super::*,
        crate::{
            domain::{eth::Bytes, handler::MockHandler, poll_result::SignedOrder},
            infra::orderbook::MockOrderBookApi,
        },
    };

    fn params() -> ConditionalOrderParams {
        ConditionalOrderParams {
            handler: Address::default(),
            salt: H256::default(),
            static_input: Bytes::new(),
        }
    }

    fn context() -> PollContext {
        PollContext {
            block_number: 1,
            block_timestamp: 1,
            overrides: None,
        }
    }

    #[tokio::test]
    async fn drop_action_deletes_without_polling_the_handler() {
        let mut handler = MockHandler::new();
        handler.expect_poll().times(0);
        let orderbook = MockOrderBookApi::new();

        let poller = OrderPoller::new(Arc::new(handler), Arc::new(orderbook), "1".into());
        let policy = FilterPolicy {
            default_action: Action::Drop,
            ..Default::default()
        };
        let outcome = poller
            .poll(Address::default(), H256::default(), &params(), &BTreeMap::new(), context(), &policy)
            .await;
        assert!(matches!(outcome.effect, PollEffect::Delete));
    }

    #[tokio::test]
    async fn skip_action_leaves_order_untouched() {
        let mut handler = MockHandler::new();
        handler.expect_poll().times(0);
        let orderbook = MockOrderBookApi::new();

        let poller = OrderPoller::new(Arc::new(handler), Arc::new(orderbook), "1".into());
        let policy = FilterPolicy {
            default_action: Action::Skip,
            ..Default::default()
        };
        let outcome = poller
            .poll(Address::default(), H256::default(), &params(), &BTreeMap::new(), context(), &policy)
            .await;
        assert!(matches!(outcome.effect, PollEffect::Skipped));
    }

    #[tokio::test]
    async fn success_with_already_emitted_uid_is_idempotent() {
        let signed_order = SignedOrder {
            order: Bytes::new(),
            signature: Bytes::new(),
            owner: Address::default(),
            valid_to: 0,
        };
        let uid = signed_order.uid();

        let mut handler = MockHandler::new();
        handler
            .expect_poll()
            .returning(move |_, _| PollResult::Success(SignedOrder {
                order: Bytes::new(),
                signature: Bytes::new(),
                owner: Address::default(),
                valid_to: 0,
            }));
        let mut orderbook = MockOrderBookApi::new();
        orderbook.expect_submit_order().times(0);

        let poller = OrderPoller::new(Arc::new(handler), Arc::new(orderbook), "1".into());
        let mut existing = BTreeMap::new();
        existing.insert(uid, DiscreteOrderStatus::Submitted);

        let policy = FilterPolicy::default();
        let outcome = poller
            .poll(Address::default(), H256::default(), &params(), &existing, context(), &policy)
            .await;
        assert!(matches!(outcome.effect, PollEffect::Deferred));
    }

    #[tokio::test]
    async fn success_submits_a_new_order() {
        let mut handler = MockHandler::new();
        handler.expect_poll().returning(|_, _| {
            PollResult::Success(SignedOrder {
                order: Bytes::new(),
                signature: Bytes::new(),
                owner: Address::default(),
                valid_to: 0,
            })
        });
        let mut orderbook = MockOrderBookApi::new();
        orderbook
            .expect_submit_order()
            .returning(|_| Ok(SubmissionOutcome::Submitted));

        let poller = OrderPoller::new(Arc::new(handler), Arc::new(orderbook), "1".into());
        let policy = FilterPolicy::default();
        let outcome = poller
            .poll(Address::default(), H256::default(), &params(), &BTreeMap::new(), context(), &policy)
            .await;
        assert!(matches!(outcome.effect, PollEffect::Submitted(_)));
    }
}
