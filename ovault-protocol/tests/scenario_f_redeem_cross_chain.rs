use ovault_protocol::{
    composer::ComposeState,
    onchain::CrossChainReceipt,
    simulation::Network,
    test_utils::{
        composer_address, deposit_request, eagle, redeem_request, two_chain_network, usd1, user,
        HUB, SPOKE, VAULT_SEED,
    },
};

fn network_with_shares_on_spoke() -> Network {
    let mut net = two_chain_network().unwrap();
    let alice = user(1);
    net.chain_mut(SPOKE)
        .unwrap()
        .deposit_cross_chain(alice, deposit_request(SPOKE, 100, 100, alice))
        .unwrap();
    net.run_until_idle();
    assert_eq!(net.chain(SPOKE).unwrap().balance_of(&eagle(), &alice), 100);
    net
}

#[test]
fn redeem_returns_assets_to_spoke() {
    let mut net = network_with_shares_on_spoke();
    let alice = user(1);

    let guid = match net
        .chain_mut(SPOKE)
        .unwrap()
        .redeem_cross_chain(alice, redeem_request(SPOKE, 50, 50, alice))
        .unwrap()
    {
        CrossChainReceipt::Sent(receipt) => receipt.guid,
        other => panic!("unexpected {:?}", other),
    };
    let report = net.run_until_idle();
    assert!(report.rejected.is_empty() && report.stuck.is_empty());

    let hub = net.chain(HUB).unwrap();
    assert_eq!(hub.compose_state(&guid), Some(ComposeState::Completed));
    assert_eq!(
        hub.events().compose_trail(&guid),
        vec![
            ComposeState::Received,
            ComposeState::Composing,
            ComposeState::Redeemed,
            ComposeState::AssetsSent,
            ComposeState::Completed
        ]
    );
    let vault = hub.vault().unwrap();
    assert_eq!(vault.total_assets(), VAULT_SEED + 50);
    assert_eq!(vault.total_supply(), VAULT_SEED + 50);
    assert_eq!(hub.balance_of(&eagle(), &composer_address()), 0);

    let spoke = net.chain(SPOKE).unwrap();
    assert_eq!(spoke.balance_of(&eagle(), &alice), 50);
    assert_eq!(spoke.balance_of(&usd1(), &alice), 900 + 50);
}

#[test]
fn failed_redeem_refunds_shares_on_the_hub() {
    let mut net = network_with_shares_on_spoke();
    let alice = user(1);

    let guid = match net
        .chain_mut(SPOKE)
        .unwrap()
        .redeem_cross_chain(alice, redeem_request(SPOKE, 30, 31, alice))
        .unwrap()
    {
        CrossChainReceipt::Sent(receipt) => receipt.guid,
        other => panic!("unexpected {:?}", other),
    };
    net.run_until_idle();

    let hub = net.chain_mut(HUB).unwrap();
    assert_eq!(hub.compose_state(&guid), Some(ComposeState::ComposeFailed));
    assert_eq!(hub.balance_of(&eagle(), &composer_address()), 30);

    let receipt = hub.refund_compose(alice, guid).unwrap();
    assert_eq!(receipt.token, eagle());
    assert_eq!(receipt.amount, 30);
    assert_eq!(hub.balance_of(&eagle(), &alice), 30);
    assert_eq!(hub.balance_of(&eagle(), &composer_address()), 0);
    assert_eq!(hub.vault().unwrap().total_supply(), VAULT_SEED + 100);
}

#[test]
fn hub_holder_redeems_to_spoke_directly() {
    let mut net = two_chain_network().unwrap();
    let bob = user(2);
    let hub = net.chain_mut(HUB).unwrap();
    let shares = hub.vault_deposit(bob, 200, bob).unwrap();
    assert_eq!(shares, 200);

    match hub
        .redeem_cross_chain(bob, redeem_request(SPOKE, 200, 200, bob))
        .unwrap()
    {
        CrossChainReceipt::Local {
            amount_out,
            outbound: Some(_),
        } => assert_eq!(amount_out, 200),
        other => panic!("unexpected {:?}", other),
    }
    net.run_until_idle();
    assert_eq!(net.chain(SPOKE).unwrap().balance_of(&usd1(), &bob), 1_000 + 200);
}
