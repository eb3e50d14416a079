use alloy_primitives::Address;
use serde::Deserialize;

use crate::types::events::EventKind;

/// One "kind A observed ⇒ flush kind B first" entry of the precedence table.
///
/// With `contract` set the rule applies only to events emitted by that
/// address and replaces any global rule for the kind; contract pairs on the
/// same chain are known to emit transfer/marketplace logs in different
/// relative orders.
#[derive(Debug, Clone, Deserialize)]
pub struct PrecedenceRule {
    pub on: EventKind,
    #[serde(default)]
    pub contract: Option<Address>,
    pub flush_first: Vec<EventKind>,
}
