//! Filter policy evaluation.
//!
//! The policy document itself is hot-reloaded by
//! [`crate::infra::filter_policy_loader`]; this module only holds the
//! in-memory representation and the pure evaluation function.

use {
    crate::domain::{
        conditional_order::ConditionalOrderParams,
        eth::{Address, H256},
    },
    serde::{Deserialize, Serialize},
    std::collections::HashMap,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Action {
    Accept,
    Drop,
    Skip,
}

/// A hot-reloadable filter policy document. Map keys are the lowercase
/// `0x`-prefixed hex encoding of an address/hash rather than the typed
/// values themselves: the document is fetched as JSON from an external URL,
/// and JSON object keys are always strings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FilterPolicy {
    pub default_action: Action,
    #[serde(default)]
    pub owners: HashMap<String, Action>,
    #[serde(default)]
    pub handlers: HashMap<String, Action>,
    #[serde(default)]
    pub transactions: HashMap<String, Action>,
    #[serde(default)]
    pub conditional_order_ids: HashMap<String, Action>,
}

impl Default for FilterPolicy {
    fn default() -> Self {
        Self {
            default_action: Action::Accept,
            owners: HashMap::new(),
            handlers: HashMap::new(),
            transactions: HashMap::new(),
            conditional_order_ids: HashMap::new(),
        }
    }
}

/// Everything the policy needs to evaluate a single candidate poll.
pub struct Candidate<'a> {
    pub owner: Address,
    pub handler: Address,
    pub transaction_hash: H256,
    pub conditional_order_id: &'a str,
}

impl FilterPolicy {
    /// Evaluates the policy for `candidate`. Evaluation order on first match
    /// wins: conditional-order-id, transaction, owner, handler, then the
    /// default action.
    pub fn evaluate(&self, candidate: &Candidate<'_>) -> Action {
        if let Some(action) = self.conditional_order_ids.get(candidate.conditional_order_id) {
            return *action;
        }
        let tx_key = candidate.transaction_hash.to_string().to_lowercase();
        if let Some(action) = self.transactions.get(&tx_key) {
            return *action;
        }
        let owner_key = candidate.owner.to_string().to_lowercase();
        if let Some(action) = self.owners.get(&owner_key) {
            return *action;
        }
        let handler_key = candidate.handler.to_string().to_lowercase();
        if let Some(action) = self.handlers.get(&handler_key) {
            return *action;
        }
        self.default_action
    }
}

/// Deterministic string identity used as the `conditional_order_id` filter
/// key: `handler-salt`, matching what an operator would copy out of a block
/// explorer.
pub fn conditional_order_id(params: &ConditionalOrderParams) -> String {
    format!("{}-{}", params.handler, params.salt)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidate(owner: Address, handler: Address) -> Candidate<'static> {
        Candidate {
            owner,
            handler,
            transaction_hash: H256(Default::default()),
            conditional_order_id: "id",
        }
    }

    #[test]
    fn default_action_applies_when_nothing_matches() {
        let policy = FilterPolicy {
            default_action: Action::Drop,
            ..Default::default()
        };
        let owner = Address::default();
        let handler = Address::default();
        assert_eq!(policy.evaluate(&candidate(owner, handler)), Action::Drop);
    }

    #[test]
    fn owner_override_wins_over_default() {
        let owner = Address::default();
        let handler = Address::default();
        let mut policy = FilterPolicy {
            default_action: Action::Accept,
            ..Default::default()
        };
        policy
            .owners
            .insert(owner.to_string().to_lowercase(), Action::Skip);
        assert_eq!(policy.evaluate(&candidate(owner, handler)), Action::Skip);
    }

    #[test]
    fn conditional_order_id_wins_over_everything() {
        let owner = Address::default();
        let handler = Address::default();
        let mut policy = FilterPolicy {
            default_action: Action::Accept,
            ..Default::default()
        };
        policy
            .owners
            .insert(owner.to_string().to_lowercase(), Action::Drop);
        policy
            .conditional_order_ids
            .insert("id".to_string(), Action::Skip);
        assert_eq!(policy.evaluate(&candidate(owner, handler)), Action::Skip);
    }
}
