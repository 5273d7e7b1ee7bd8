use ovault_protocol::{
    bridge::SendParams,
    bridge::SendOptions,
    error::{Disposition, ErrorKind},
    routing::PathStatus,
    simulation::{build_network, SimulationConfig},
    test_utils::{
        addr, admin, asset_adapter, composer_address, deposit_request, three_chain_config,
        two_chain_network, usd1, user, HUB, LOCKBOX_LIQUIDITY, SPOKE, THIRD,
    },
    BridgeError,
};

#[test]
fn message_from_unconfigured_chain_is_rejected_before_mint() {
    let mut config = three_chain_config();
    // THIRD knows the hub, the hub never configured THIRD
    config.connections.retain(|c| !(c.from == HUB && c.to == THIRD));
    let mut net = build_network(&config, SimulationConfig::default()).unwrap();

    let status = net
        .diagnose(THIRD, asset_adapter(THIRD), HUB, asset_adapter(HUB))
        .unwrap();
    assert_eq!(
        status,
        PathStatus::NoRoute {
            side: ovault_protocol::routing::PathSide::Destination
        }
    );

    let dave = user(1);
    net.chain_mut(THIRD)
        .unwrap()
        .deposit_cross_chain(dave, deposit_request(THIRD, 100, 90, dave))
        .unwrap();
    let report = net.run_until_idle();

    assert!(report.delivered.is_empty());
    assert_eq!(report.rejected.len(), 1);
    let (_, err) = &report.rejected[0];
    assert_eq!(
        *err,
        BridgeError::NoRoute {
            local_chain_id: HUB,
            remote_chain_id: THIRD
        }
    );
    assert_eq!(err.kind(), ErrorKind::Configuration);
    assert_eq!(err.disposition(), Disposition::Rejected);
    assert_eq!(net.dead_letters().len(), 1);

    let hub = net.chain(HUB).unwrap();
    assert_eq!(hub.balance_of(&usd1(), &asset_adapter(HUB)), LOCKBOX_LIQUIDITY);
    assert_eq!(hub.balance_of(&usd1(), &composer_address()), 0);
    assert!(hub.composer().unwrap().pending_composes().next().is_none());
    let adapter = hub.adapter(&asset_adapter(HUB)).unwrap();
    assert_eq!(adapter.consumed_count(), 0);
}

#[test]
fn spoofed_sender_is_a_sender_mismatch() {
    let mut net = two_chain_network().unwrap();
    // Hub expects a different peer for SPOKE than the adapter actually sending
    net.chain_mut(HUB)
        .unwrap()
        .set_route(admin(), asset_adapter(HUB), SPOKE, addr(0xBAD))
        .unwrap();

    let alice = user(1);
    net.chain_mut(SPOKE)
        .unwrap()
        .deposit_cross_chain(alice, deposit_request(SPOKE, 100, 90, alice))
        .unwrap();
    let report = net.run_until_idle();

    assert_eq!(report.rejected.len(), 1);
    match &report.rejected[0].1 {
        BridgeError::SenderMismatch {
            remote_chain_id,
            expected,
            got,
        } => {
            assert_eq!(*remote_chain_id, SPOKE);
            assert_eq!(*expected, addr(0xBAD));
            assert_eq!(*got, asset_adapter(SPOKE));
        }
        other => panic!("expected sender mismatch, got {:?}", other),
    }
    let hub = net.chain(HUB).unwrap();
    assert_eq!(hub.balance_of(&usd1(), &composer_address()), 0);
    assert_eq!(hub.balance_of(&usd1(), &asset_adapter(HUB)), LOCKBOX_LIQUIDITY);
}

#[test]
fn removed_route_blocks_sends_with_no_route_not_fee_error() {
    let mut net = two_chain_network().unwrap();
    let hub = net.chain_mut(HUB).unwrap();
    hub.remove_route(admin(), asset_adapter(HUB), SPOKE).unwrap();

    let params = SendParams {
        dest_chain_id: SPOKE,
        recipient: user(1),
        amount: 10,
        min_amount_out: 10,
        compose_payload: None,
        options: SendOptions::default(),
    };
    let quote_err = hub.quote_send(asset_adapter(HUB), &params).unwrap_err();
    assert!(quote_err.is_configuration());

    hub.approve(user(1), &usd1(), asset_adapter(HUB), 10);
    // Zero fee would also be too little; the route problem must win
    let err = hub.send(user(1), asset_adapter(HUB), params, 0).unwrap_err();
    assert_eq!(
        err,
        BridgeError::NoRoute {
            local_chain_id: HUB,
            remote_chain_id: SPOKE
        }
    );
    assert_eq!(hub.balance_of(&usd1(), &user(1)), 1_000);
}
