use std::collections::{BTreeMap, VecDeque};

use ethers::types::Address;
use log::{debug, error, info, warn};
use rand::rngs::SmallRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};

use crate::data_structures::{ChainId, Guid, Packet, PathKey};
use crate::error::{BridgeError, Disposition};
use crate::onchain::chain::{Chain, DeliveryOutcome};
use crate::routing::diagnostics::{diagnose_path, PathEnd, PathStatus};
use crate::simulation::config::SimulationConfig;
use crate::storage::{ChainSnapshot, StateStore};
use crate::verification::VerifierSet;

/// A packet the destination refused for good.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DeadLetter {
    pub packet: Packet,
    pub error: BridgeError,
}

/// What one relay round did.
#[derive(Clone, Debug, Default)]
pub struct RelayReport {
    pub collected: usize,
    pub delivered: Vec<DeliveryOutcome>,
    /// Packets held at the head of their path, with the reason.
    pub stuck: Vec<(Guid, BridgeError)>,
    pub rejected: Vec<(Guid, BridgeError)>,
    /// Packets still waiting for source confirmations.
    pub waiting: usize,
    pub duplicates: usize,
}

impl RelayReport {
    fn made_progress(&self) -> bool {
        self.collected > 0 || !self.delivered.is_empty() || !self.rejected.is_empty() || self.waiting > 0
    }

    fn absorb(&mut self, round: RelayReport) {
        self.collected += round.collected;
        self.delivered.extend(round.delivered);
        self.rejected.extend(round.rejected);
        self.duplicates += round.duplicates;
        // Only the latest view of stuck and waiting packets is meaningful
        self.stuck = round.stuck;
        self.waiting = round.waiting;
    }
}

/// Deterministic stand-in for the external delivery layer: ordered per path,
/// at-least-once, unordered across paths.
#[derive(Debug)]
pub struct Network {
    config: SimulationConfig,
    chains: BTreeMap<ChainId, Chain>,
    verifiers: VerifierSet,
    inflight: BTreeMap<PathKey, VecDeque<Packet>>,
    // Bounded by `delivered_retention`, in finalization order
    delivered: BTreeMap<Guid, Packet>,
    delivered_order: VecDeque<Guid>,
    dead_letters: Vec<DeadLetter>,
    rng: SmallRng,
}

impl Network {
    pub fn new(config: SimulationConfig, verifiers: VerifierSet) -> Self {
        let rng = SmallRng::seed_from_u64(config.seed);
        Network {
            config,
            chains: BTreeMap::new(),
            verifiers,
            inflight: BTreeMap::new(),
            delivered: BTreeMap::new(),
            delivered_order: VecDeque::new(),
            dead_letters: Vec::new(),
            rng,
        }
    }

    pub fn config(&self) -> &SimulationConfig {
        &self.config
    }

    pub fn verifiers(&self) -> &VerifierSet {
        &self.verifiers
    }

    pub fn add_chain(&mut self, chain: Chain) -> Result<(), BridgeError> {
        let chain_id = chain.chain_id();
        if self.chains.contains_key(&chain_id) {
            return Err(BridgeError::InvalidConfig {
                reason: format!("chain {} already in the network", chain_id),
            });
        }
        info!("Network: added chain {} ({})", chain_id, chain.name());
        self.chains.insert(chain_id, chain);
        Ok(())
    }

    pub fn chain(&self, chain_id: ChainId) -> Result<&Chain, BridgeError> {
        self.chains
            .get(&chain_id)
            .ok_or(BridgeError::UnknownChain { chain_id })
    }

    pub fn chain_mut(&mut self, chain_id: ChainId) -> Result<&mut Chain, BridgeError> {
        self.chains
            .get_mut(&chain_id)
            .ok_or(BridgeError::UnknownChain { chain_id })
    }

    pub fn chains(&self) -> impl Iterator<Item = &Chain> {
        self.chains.values()
    }

    pub fn dead_letters(&self) -> &[DeadLetter] {
        &self.dead_letters
    }

    /// Packets accepted by the delivery layer and not yet finalized.
    pub fn inflight(&self) -> impl Iterator<Item = &Packet> {
        self.inflight.values().flatten()
    }

    pub fn delivered_packet(&self, guid: &Guid) -> Option<&Packet> {
        self.delivered.get(guid)
    }

    pub fn is_idle(&self) -> bool {
        self.inflight.values().all(VecDeque::is_empty)
            && self.chains.values().all(|c| c.endpoint().outbox_len() == 0)
    }

    /// Queues a packet that did not come from an endpoint outbox.
    pub fn inject(&mut self, packet: Packet) {
        warn!("Network: injected packet {:?} on {}", packet.guid(), packet.path());
        self.inflight.entry(packet.path()).or_default().push_back(packet);
    }

    /// Moves every chain's outbox into the per-path queues.
    pub fn collect_outbound(&mut self) -> usize {
        let mut collected = 0;
        for chain in self.chains.values_mut() {
            for packet in chain.drain_outbox() {
                debug!("Network: accepted {:?} on {}", packet.guid(), packet.path());
                self.inflight.entry(packet.path()).or_default().push_back(packet);
                collected += 1;
            }
        }
        collected
    }

    fn deliver(&mut self, packet: &Packet, confirmations: u64) -> Result<DeliveryOutcome, BridgeError> {
        let attestations = self.verifiers.attest(packet, confirmations);
        let dest_chain_id = packet.message.dest_chain_id;
        self.chain_mut(dest_chain_id)?
            .receive_packet(packet, &attestations)
    }

    fn confirmations(&self, packet: &Packet) -> u64 {
        self.chains
            .get(&packet.message.source_chain_id)
            .map(|c| c.block_number().saturating_sub(packet.sent_at_block))
            .unwrap_or(0)
    }

    /// One round: collect outboxes, advance every chain one block, then work each
    /// path from its head until it empties, blocks or waits for confirmations.
    pub fn relay_once(&mut self) -> RelayReport {
        let mut report = RelayReport {
            collected: self.collect_outbound(),
            ..Default::default()
        };
        for chain in self.chains.values_mut() {
            chain.advance_block();
        }

        let mut paths: Vec<PathKey> = self.inflight.keys().copied().collect();
        paths.shuffle(&mut self.rng);

        for path in paths {
            loop {
                let packet = match self.inflight.get(&path).and_then(|q| q.front()) {
                    Some(packet) => packet.clone(),
                    None => break,
                };
                let confirmations = self.confirmations(&packet);
                if confirmations < packet.send_config.required_confirmations {
                    report.waiting += 1;
                    break;
                }

                match self.deliver(&packet, confirmations) {
                    Ok(outcome) => {
                        self.pop(&path);
                        if let DeliveryOutcome::Delivered { compose: Some(compose), .. } = &outcome {
                            debug!("Network: compose on {:?} -> {:?}", packet.guid(), compose);
                        }
                        self.remember_delivered(&packet);
                        report.delivered.push(outcome);
                        if self.roll_duplicate() {
                            match self.deliver(&packet, confirmations) {
                                Ok(dup) => debug!("Network: duplicate of {:?} -> {:?}", packet.guid(), dup),
                                Err(e) => warn!("Network: duplicate of {:?} failed: {}", packet.guid(), e),
                            }
                            report.duplicates += 1;
                        }
                    }
                    Err(err) => match err.disposition() {
                        Disposition::Stuck => {
                            warn!("Network: {:?} stuck on {}: {}", packet.guid(), path, err);
                            report.stuck.push((packet.guid(), err));
                            break;
                        }
                        Disposition::Rejected => {
                            error!("Network: {:?} rejected on {}: {}", packet.guid(), path, err);
                            self.pop(&path);
                            report.rejected.push((packet.guid(), err.clone()));
                            self.dead_letters.push(DeadLetter { packet, error: err });
                        }
                    },
                }
            }
        }
        self.inflight.retain(|_, q| !q.is_empty());
        report
    }

    fn remember_delivered(&mut self, packet: &Packet) {
        if self.delivered.insert(packet.guid(), packet.clone()).is_none() {
            self.delivered_order.push_back(packet.guid());
        }
        while self.delivered_order.len() > self.config.delivered_retention {
            if let Some(old) = self.delivered_order.pop_front() {
                self.delivered.remove(&old);
            }
        }
    }

    fn pop(&mut self, path: &PathKey) {
        if let Some(queue) = self.inflight.get_mut(path) {
            queue.pop_front();
        }
    }

    fn roll_duplicate(&mut self) -> bool {
        let rate = self.config.duplicate_delivery_rate.clamp(0.0, 1.0);
        rate > 0.0 && self.rng.gen_bool(rate)
    }

    /// Relays until nothing is left or a round makes no progress (only stuck
    /// packets remain), bounded by `max_rounds`.
    pub fn run_until_idle(&mut self) -> RelayReport {
        let mut total = RelayReport::default();
        for round in 0..self.config.max_rounds {
            let report = self.relay_once();
            let progressed = report.made_progress();
            total.absorb(report);
            if self.is_idle() || !progressed {
                debug!("Network: settled after {} rounds", round + 1);
                break;
            }
        }
        total
    }

    /// Delivers an already finalized packet again.
    pub fn redeliver(&mut self, guid: &Guid) -> Result<DeliveryOutcome, BridgeError> {
        let packet = self
            .delivered
            .get(guid)
            .cloned()
            .ok_or(BridgeError::UnknownPacket { guid: *guid })?;
        let confirmations = self.confirmations(&packet);
        info!("Network: redelivering {:?}", guid);
        self.deliver(&packet, confirmations)
    }

    /// Static check of the path from `source_adapter` on `source_chain` to
    /// `dest_adapter` on `dest_chain`.
    pub fn diagnose(
        &self,
        source_chain: ChainId,
        source_adapter: Address,
        dest_chain: ChainId,
        dest_adapter: Address,
    ) -> Result<PathStatus, BridgeError> {
        let src = self.chain(source_chain)?;
        let dst = self.chain(dest_chain)?;
        let status = diagnose_path(
            PathEnd {
                address: source_adapter,
                routes: src.adapter(&source_adapter)?.routes(),
            },
            PathEnd {
                address: dest_adapter,
                routes: dst.adapter(&dest_adapter)?.routes(),
            },
            dst.endpoint().verifier_keys(),
        );
        info!(
            "Network: path {}:{:?} -> {}:{:?} is {}",
            source_chain, source_adapter, dest_chain, dest_adapter, status
        );
        Ok(status)
    }

    pub fn persist(&self, store: &mut impl StateStore) -> Result<(), BridgeError> {
        for chain in self.chains.values() {
            store.save(&ChainSnapshot::capture(chain))?;
        }
        Ok(())
    }

    /// Replaces a chain's live state with its last saved snapshot, as after a
    /// node restart. In-flight packets belong to the delivery layer and stay.
    pub fn restart_chain(&mut self, chain_id: ChainId, store: &impl StateStore) -> Result<(), BridgeError> {
        let snapshot = store.load(chain_id)?.ok_or(BridgeError::Storage {
            reason: format!("no snapshot for chain {}", chain_id),
        })?;
        let chain = snapshot.into_chain()?;
        info!(
            "Network: chain {} restarted at block {}",
            chain_id,
            chain.block_number()
        );
        self.chains.insert(chain_id, chain);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::simulation::deployment::build_network;
    use crate::test_utils::{deposit_request, two_chain_config, usd1, user, HUB, SPOKE};

    fn network(rate: f64) -> Network {
        let sim = SimulationConfig {
            duplicate_delivery_rate: rate,
            ..Default::default()
        };
        build_network(&two_chain_config(), sim).unwrap()
    }

    #[test]
    fn duplicates_never_double_credit() {
        let mut net = network(1.0);
        net.chain_mut(SPOKE)
            .unwrap()
            .deposit_cross_chain(user(1), deposit_request(SPOKE, 100, 90, user(1)))
            .unwrap();
        let report = net.run_until_idle();
        assert!(report.duplicates >= 2);
        assert!(report.rejected.is_empty());
        assert_eq!(net.chain(SPOKE).unwrap().balance_of(&usd1(), &user(1)), 900);
        let vault = net.chain(HUB).unwrap().vault().unwrap();
        assert_eq!(vault.total_assets(), 1100);
    }

    #[test]
    fn unknown_destination_is_dead_lettered() {
        let mut net = network(0.0);
        net.chain_mut(SPOKE)
            .unwrap()
            .deposit_cross_chain(user(1), deposit_request(SPOKE, 10, 0, user(1)))
            .unwrap();
        net.collect_outbound();
        let mut packet = net.inflight().next().unwrap().clone();
        packet.message.dest_chain_id = 40000;
        net.inject(packet);

        let report = net.run_until_idle();
        assert_eq!(report.rejected.len(), 1);
        assert_eq!(
            net.dead_letters()[0].error,
            BridgeError::UnknownChain { chain_id: 40000 }
        );
    }

    #[test]
    fn delivered_packets_are_evicted_past_retention() {
        let sim = SimulationConfig {
            delivered_retention: 1,
            ..Default::default()
        };
        let mut net = build_network(&two_chain_config(), sim).unwrap();
        net.chain_mut(SPOKE)
            .unwrap()
            .deposit_cross_chain(user(1), deposit_request(SPOKE, 100, 90, user(1)))
            .unwrap();
        let report = net.run_until_idle();
        assert_eq!(report.delivered.len(), 2);
        let first = report.delivered[0].guid();
        let second = report.delivered[1].guid();
        assert!(net.delivered_packet(&first).is_none());
        assert!(net.delivered_packet(&second).is_some());
        assert!(matches!(
            net.redeliver(&first),
            Err(BridgeError::UnknownPacket { .. })
        ));
    }

    #[test]
    fn redeliver_requires_known_packet() {
        let mut net = network(0.0);
        assert!(matches!(
            net.redeliver(&Guid::zero()),
            Err(BridgeError::UnknownPacket { .. })
        ));
    }
}
