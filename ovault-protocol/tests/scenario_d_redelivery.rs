use ovault_protocol::{
    events::ChainEvent,
    onchain::{CrossChainReceipt, DeliveryOutcome},
    routing::SecurityConfig,
    test_utils::{
        admin, asset_adapter, composer_address, deposit_request, eagle, two_chain_network, usd1,
        user, HUB, SPOKE,
    },
};

#[test]
fn redelivered_guid_is_a_no_op() {
    let mut net = two_chain_network().unwrap();
    let alice = user(1);
    let guid = match net
        .chain_mut(SPOKE)
        .unwrap()
        .deposit_cross_chain(alice, deposit_request(SPOKE, 100, 90, alice))
        .unwrap()
    {
        CrossChainReceipt::Sent(receipt) => receipt.guid,
        other => panic!("unexpected {:?}", other),
    };
    net.run_until_idle();

    let hub_before = net.chain(HUB).unwrap().ledger().clone();
    let spoke_before = net.chain(SPOKE).unwrap().ledger().clone();
    let vault_before = net.chain(HUB).unwrap().vault().unwrap().position();

    let outcome = net.redeliver(&guid).unwrap();
    assert_eq!(outcome, DeliveryOutcome::AlreadyProcessed { guid });
    // A second time changes nothing either
    assert_eq!(
        net.redeliver(&guid).unwrap(),
        DeliveryOutcome::AlreadyProcessed { guid }
    );
    net.run_until_idle();

    let hub = net.chain(HUB).unwrap();
    assert_eq!(hub.ledger(), &hub_before);
    assert_eq!(hub.vault().unwrap().position(), vault_before);
    assert_eq!(net.chain(SPOKE).unwrap().ledger(), &spoke_before);
    assert_eq!(net.chain(SPOKE).unwrap().balance_of(&eagle(), &alice), 100);
    assert_eq!(hub.balance_of(&usd1(), &composer_address()), 0);

    let signals = hub
        .events()
        .iter()
        .filter(|e| matches!(e, ChainEvent::AlreadyProcessed { guid: g, adapter } if *g == guid && *adapter == asset_adapter(HUB)))
        .count();
    assert_eq!(signals, 2);
    assert_eq!(hub.composer().unwrap().record(&guid).unwrap().attempts, 0);
}

#[test]
fn redelivered_outbound_leg_does_not_remint_shares() {
    let mut net = two_chain_network().unwrap();
    let bob = user(2);
    net.chain_mut(SPOKE)
        .unwrap()
        .deposit_cross_chain(bob, deposit_request(SPOKE, 40, 40, bob))
        .unwrap();
    let report = net.run_until_idle();

    let share_leg = report
        .delivered
        .iter()
        .find_map(|o| match o {
            DeliveryOutcome::Delivered {
                guid,
                compose: None,
                ..
            } => Some(*guid),
            _ => None,
        })
        .unwrap();
    assert_eq!(
        net.redeliver(&share_leg).unwrap(),
        DeliveryOutcome::AlreadyProcessed { guid: share_leg }
    );
    let spoke = net.chain(SPOKE).unwrap();
    assert_eq!(spoke.balance_of(&eagle(), &bob), 40);
    assert_eq!(spoke.ledger().total_supply(&eagle()), 40);
}

#[test]
fn redelivery_after_receiver_reconfiguration_is_still_a_no_op() {
    let mut net = two_chain_network().unwrap();
    let alice = user(1);
    let guid = match net
        .chain_mut(SPOKE)
        .unwrap()
        .deposit_cross_chain(alice, deposit_request(SPOKE, 100, 90, alice))
        .unwrap()
    {
        CrossChainReceipt::Sent(receipt) => receipt.guid,
        other => panic!("unexpected {:?}", other),
    };
    net.run_until_idle();
    let hub_before = net.chain(HUB).unwrap().ledger().clone();

    let hub = net.chain_mut(HUB).unwrap();
    hub.remove_route(admin(), asset_adapter(HUB), SPOKE).unwrap();
    assert_eq!(
        net.redeliver(&guid).unwrap(),
        DeliveryOutcome::AlreadyProcessed { guid }
    );

    // Route restored but the receive side now demands a different verifier
    let hub = net.chain_mut(HUB).unwrap();
    hub.set_route(admin(), asset_adapter(HUB), SPOKE, asset_adapter(SPOKE))
        .unwrap();
    hub.set_security_config(admin(), asset_adapter(HUB), SPOKE, SecurityConfig::new(["nethermind"], 1))
        .unwrap();
    assert_eq!(
        net.redeliver(&guid).unwrap(),
        DeliveryOutcome::AlreadyProcessed { guid }
    );

    assert_eq!(net.chain(HUB).unwrap().ledger(), &hub_before);
    assert!(net.dead_letters().is_empty());
    assert_eq!(net.chain(SPOKE).unwrap().balance_of(&eagle(), &alice), 100);
}
