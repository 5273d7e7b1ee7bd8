use ovault_protocol::{
    composer::{ComposeState, ResubmitOptions},
    onchain::CrossChainReceipt,
    test_utils::{
        admin, composer_address, deposit_request, eagle, native, two_chain_network, usd1, user,
        HUB, SPOKE, VAULT_SEED,
    },
    BridgeError,
};

fn start_deposit(net: &mut ovault_protocol::simulation::Network, amount: u128, min: u128) -> ovault_protocol::data_structures::Guid {
    let alice = user(1);
    match net
        .chain_mut(SPOKE)
        .unwrap()
        .deposit_cross_chain(alice, deposit_request(SPOKE, amount, min, alice))
        .unwrap()
    {
        CrossChainReceipt::Sent(receipt) => receipt.guid,
        other => panic!("unexpected {:?}", other),
    }
}

#[test]
fn paused_vault_holds_funds_and_retry_uses_current_rate() {
    let mut net = two_chain_network().unwrap();
    net.chain_mut(HUB).unwrap().set_vault_paused(admin(), true).unwrap();

    let guid = start_deposit(&mut net, 100, 90);
    let report = net.run_until_idle();
    assert_eq!(report.delivered.len(), 1, "only the inbound leg is delivered");

    let hub = net.chain(HUB).unwrap();
    assert_eq!(hub.compose_state(&guid), Some(ComposeState::ComposeFailed));
    let pending = hub.pending_composes();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].guid, guid);
    assert_eq!(pending[0].amount, 100);
    assert_eq!(pending[0].token, usd1());
    assert!(pending[0].reason.contains("paused"));
    // The finalized funds sit with the Composer, nothing was minted
    assert_eq!(hub.balance_of(&usd1(), &composer_address()), 100);
    assert_eq!(hub.vault().unwrap().total_supply(), VAULT_SEED);

    // Someone donates while the compose waits: 1100 assets back 1000 shares
    let hub = net.chain_mut(HUB).unwrap();
    hub.set_vault_paused(admin(), false).unwrap();
    hub.donate(user(2), 100).unwrap();
    assert_eq!(hub.vault().unwrap().preview_deposit(100).unwrap(), 90);

    // Permissionless: a third party drives the retry
    let outcome = hub
        .retry_compose(user(3), guid, ResubmitOptions::default())
        .unwrap();
    assert!(outcome.is_completed(), "{:?}", outcome);
    assert_eq!(hub.compose_state(&guid), Some(ComposeState::Completed));
    assert!(hub.pending_composes().is_empty());
    assert_eq!(
        hub.events().compose_trail(&guid),
        vec![
            ComposeState::Received,
            ComposeState::Composing,
            ComposeState::ComposeFailed,
            ComposeState::Retried,
            ComposeState::Composing,
            ComposeState::Deposited,
            ComposeState::SharesSent,
            ComposeState::Completed
        ]
    );

    net.run_until_idle();
    assert_eq!(net.chain(SPOKE).unwrap().balance_of(&eagle(), &user(1)), 90);
}

#[test]
fn retry_below_floor_stays_pending_until_refund() {
    let mut net = two_chain_network().unwrap();
    // Rate moves before the deposit lands: 100 assets buy 90 shares
    net.chain_mut(HUB).unwrap().donate(user(2), 100).unwrap();

    let guid = start_deposit(&mut net, 100, 95);
    net.run_until_idle();

    let hub = net.chain_mut(HUB).unwrap();
    assert_eq!(hub.compose_state(&guid), Some(ComposeState::ComposeFailed));
    let failed = hub.retry_compose(user(3), guid, ResubmitOptions::default()).unwrap();
    assert!(!failed.is_completed());

    // Only the refund address may lower the floor
    let err = hub
        .retry_compose(
            user(3),
            guid,
            ResubmitOptions {
                extra_fee: 0,
                min_amount_out: Some(80),
            },
        )
        .unwrap_err();
    assert!(matches!(err, BridgeError::Unauthorized { .. }));

    let native_before = hub.balance_of(&native(), &user(1));
    let receipt = hub.refund_compose(user(1), guid).unwrap();
    assert_eq!(receipt.amount, 100);
    assert_eq!(receipt.refund_address, user(1));
    assert_eq!(hub.balance_of(&usd1(), &user(1)), 1_000 + 100);
    assert_eq!(
        hub.balance_of(&native(), &user(1)),
        native_before + receipt.native_returned
    );
    assert_eq!(hub.compose_state(&guid), Some(ComposeState::Refunded));

    assert_eq!(
        hub.refund_compose(user(1), guid),
        Err(BridgeError::AlreadyResolved { guid })
    );
    assert_eq!(
        hub.retry_compose(user(1), guid, ResubmitOptions::default()),
        Err(BridgeError::AlreadyResolved { guid })
    );
}
