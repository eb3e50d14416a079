//! Cross-contract ordering buffer.
//!
//! Events arrive grouped by contract rather than by time; the chain emits a
//! transfer and a marketplace log for the same action in a fixed but
//! kind-dependent relative order. The buffer holds per-kind pending lists
//! and consults an explicit precedence table to decide which pending lists
//! must materialize before a newly observed event may be appended.
//!
//! The buffer is a per-delivery-batch unit: [`OrderingBuffer::drain`] runs
//! after the last log of a batch so no pending state ever crosses a batch
//! boundary.

use std::collections::HashMap;

use alloy::primitives::Address;

use crate::types::config::precedence::PrecedenceRule;
use crate::types::events::{
    BuyEvent, DecodedEvent, DevMintEvent, EventKind, SellEvent, SetUriEvent, TicketMintEvent,
    TransferEvent,
};

/// A drained pending list, ready for materialization.
#[derive(Debug)]
pub enum Flush {
    Transfers(Vec<TransferEvent>),
    Sells(Vec<SellEvent>),
    Buys(Vec<BuyEvent>),
    TicketMints(Vec<TicketMintEvent>),
    DevMints(Vec<DevMintEvent>),
    SetUris(Vec<SetUriEvent>),
}

/// End-of-batch drain order.
const FINAL_ORDER: [EventKind; 6] = [
    EventKind::Transfer,
    EventKind::Sell,
    EventKind::Buy,
    EventKind::TicketMint,
    EventKind::DevMint,
    EventKind::SetUri,
];

/// Precedence table: observed kind -> pending kinds that must flush first.
///
/// A contract-scoped rule replaces the global rule for that kind, so
/// contract pairs with a different empirical emission order can be
/// configured independently.
#[derive(Debug, Default, Clone)]
pub struct FlushPolicy {
    global: HashMap<EventKind, Vec<EventKind>>,
    scoped: HashMap<(Address, EventKind), Vec<EventKind>>,
}

impl FlushPolicy {
    pub fn from_rules(rules: &[PrecedenceRule]) -> Self {
        let mut policy = Self::default();
        for rule in rules {
            let entry = match rule.contract {
                Some(address) => policy.scoped.entry((address, rule.on)).or_default(),
                None => policy.global.entry(rule.on).or_default(),
            };
            entry.extend(rule.flush_first.iter().copied());
        }
        policy
    }

    /// The order observed on chain: marketplace events wait for pending
    /// transfers, transfers force pending sells then buys out first, and
    /// batch mints wait for pending transfers.
    pub fn standard() -> Self {
        let mut global = HashMap::new();
        global.insert(EventKind::Sell, vec![EventKind::Transfer]);
        global.insert(EventKind::Buy, vec![EventKind::Transfer]);
        global.insert(
            EventKind::Transfer,
            vec![EventKind::Sell, EventKind::Buy],
        );
        global.insert(EventKind::TicketMint, vec![EventKind::Transfer]);
        global.insert(EventKind::DevMint, vec![EventKind::Transfer]);

        Self {
            global,
            scoped: HashMap::new(),
        }
    }

    /// Kinds that must flush before an event of `kind` from `contract` is
    /// buffered. Empty when no rule matches.
    pub fn flush_before(&self, contract: &Address, kind: EventKind) -> &[EventKind] {
        if let Some(kinds) = self.scoped.get(&(*contract, kind)) {
            return kinds;
        }
        self.global.get(&kind).map(Vec::as_slice).unwrap_or(&[])
    }
}

#[derive(Debug, Default)]
pub struct OrderingBuffer {
    policy: FlushPolicy,
    transfers: Vec<TransferEvent>,
    sells: Vec<SellEvent>,
    buys: Vec<BuyEvent>,
    ticket_mints: Vec<TicketMintEvent>,
    dev_mints: Vec<DevMintEvent>,
    set_uris: Vec<SetUriEvent>,
}

impl OrderingBuffer {
    pub fn new(policy: FlushPolicy) -> Self {
        Self {
            policy,
            ..Default::default()
        }
    }

    /// Buffer `event`, first returning the pending lists its arrival forces
    /// out, in precedence order.
    pub fn observe(&mut self, event: DecodedEvent) -> Vec<Flush> {
        let kind = event.kind();
        let contract = event.contract();

        let order: Vec<EventKind> = self.policy.flush_before(&contract, kind).to_vec();
        let flushes = order.into_iter().filter_map(|k| self.take(k)).collect();

        self.push(event);
        flushes
    }

    /// Flush everything left at the end of a delivery batch, in the fixed
    /// final order. Guarantees no event is silently dropped or carried over.
    pub fn drain(&mut self) -> Vec<Flush> {
        FINAL_ORDER.into_iter().filter_map(|k| self.take(k)).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.transfers.is_empty()
            && self.sells.is_empty()
            && self.buys.is_empty()
            && self.ticket_mints.is_empty()
            && self.dev_mints.is_empty()
            && self.set_uris.is_empty()
    }

    fn take(&mut self, kind: EventKind) -> Option<Flush> {
        match kind {
            EventKind::Transfer if !self.transfers.is_empty() => {
                Some(Flush::Transfers(std::mem::take(&mut self.transfers)))
            }
            EventKind::Sell if !self.sells.is_empty() => {
                Some(Flush::Sells(std::mem::take(&mut self.sells)))
            }
            EventKind::Buy if !self.buys.is_empty() => {
                Some(Flush::Buys(std::mem::take(&mut self.buys)))
            }
            EventKind::TicketMint if !self.ticket_mints.is_empty() => {
                Some(Flush::TicketMints(std::mem::take(&mut self.ticket_mints)))
            }
            EventKind::DevMint if !self.dev_mints.is_empty() => {
                Some(Flush::DevMints(std::mem::take(&mut self.dev_mints)))
            }
            EventKind::SetUri if !self.set_uris.is_empty() => {
                Some(Flush::SetUris(std::mem::take(&mut self.set_uris)))
            }
            _ => None,
        }
    }

    fn push(&mut self, event: DecodedEvent) {
        match event {
            DecodedEvent::Transfer(e) => self.transfers.push(e),
            // Custom mints join the transfer pending list.
            DecodedEvent::Mint(e) => self.transfers.push(e.into_transfer()),
            DecodedEvent::Sell(e) => self.sells.push(e),
            DecodedEvent::Buy(e) => self.buys.push(e),
            DecodedEvent::BatchMint(e) => self.ticket_mints.push(e),
            DecodedEvent::DevMint(e) => self.dev_mints.push(e),
            DecodedEvent::SetUri(e) => self.set_uris.push(e),
        }
    }
}
