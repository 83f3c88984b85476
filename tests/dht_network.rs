//! End to end DHT operations over an in-memory [Testnet].

use std::time::Duration;

use kadmux::{
    Bytes, Config, Context, Dht, Error, Key, MemoryNetwork, Peer, Testnet, ValueOrPeers,
};

fn ctx() -> Context {
    Context::background().with_timeout(Duration::from_secs(10))
}

#[test]
fn put_get_value() {
    let testnet = Testnet::new(10).unwrap();

    let key = Key::from("QmHello");
    let value = Bytes::from_static(b"Hello World!");

    testnet.nodes[1]
        .put_value(&ctx(), key.clone(), value.clone())
        .unwrap();

    let found = testnet.nodes[9].get_value(&ctx(), &key).unwrap();
    assert_eq!(found, Some(value));

    let missing = testnet.nodes[9]
        .get_value(&ctx(), &Key::from("QmNothing"))
        .unwrap();
    assert_eq!(missing, None);
}

#[test]
fn put_value_reaches_known_peers() {
    let testnet = Testnet::new(5).unwrap();
    let publisher = &testnet.nodes[0];

    let key = Key::from("QmReplicated");
    let value = Bytes::from_static(b"replica");

    publisher
        .put_value(&ctx(), key.clone(), value.clone())
        .unwrap();

    // The first node knows everyone, and five nodes fit in one bucket.
    for node in &testnet.nodes {
        assert_eq!(node.get_local(&key).unwrap(), Some(value.clone()));
    }
}

#[test]
fn provide_find_providers() {
    let testnet = Testnet::new(10).unwrap();

    let key = Key::from("QmProvided");
    let provider = &testnet.nodes[2];

    provider.provide(&ctx(), &key).unwrap();

    let providers = testnet.nodes[7].find_providers(&ctx(), &key, 1).unwrap();

    assert_eq!(providers.len(), 1);
    assert_eq!(providers[0].id(), provider.local_peer().id());
    assert!(!providers[0].addresses().is_empty());
}

#[test]
fn find_peer() {
    let testnet = Testnet::new(10).unwrap();

    let target = testnet.nodes[8].local_peer().clone();

    let found = testnet.nodes[3]
        .find_peer(&ctx(), target.id())
        .unwrap()
        .unwrap();

    assert_eq!(found.id(), target.id());
    assert_eq!(found.addresses(), target.addresses());
}

#[test]
fn get_value_or_peers_returns_closer_peers() {
    let testnet = Testnet::new(10).unwrap();

    let bootstrap = &testnet.nodes[0];
    let requester = &testnet.nodes[1];

    // A key for which the bootstrap node knows someone closer than itself,
    // other than the requester.
    let key = (0..1000)
        .map(|i| Key::from(format!("QmKey{i}").as_str()))
        .find(|key| {
            let target = key.id();
            testnet.nodes.iter().skip(2).any(|node| {
                target.closer(node.local_peer().kad_id(), bootstrap.local_peer().kad_id())
            })
        })
        .unwrap();

    let peer = requester
        .find_local(bootstrap.local_peer().id())
        .unwrap()
        .0;

    let result = requester.get_value_or_peers(&ctx(), &peer, &key, 0).unwrap();

    let ValueOrPeers::CloserPeers(peers) = result else {
        panic!("expected closer peers, got {result:?}");
    };

    assert!(!peers.is_empty());
    for closer in &peers {
        assert!(key
            .id()
            .closer(closer.kad_id(), bootstrap.local_peer().kad_id()));
        assert_ne!(closer.id(), requester.local_peer().id());
    }
}

#[test]
fn get_value_or_peers_not_found() {
    let testnet = Testnet::new(2).unwrap();

    let (a, b) = (&testnet.nodes[0], &testnet.nodes[1]);
    let peer = a.find_local(b.local_peer().id()).unwrap().0;

    // B only knows A, which is never returned to A itself.
    let result = a
        .get_value_or_peers(&ctx(), &peer, &Key::from("QmNothing"), 0)
        .unwrap();

    assert_eq!(result, ValueOrPeers::NotFound);
}

#[test]
fn get_value_through_providers() {
    let testnet = Testnet::new(3).unwrap();

    let (a, b, c) = (&testnet.nodes[0], &testnet.nodes[1], &testnet.nodes[2]);

    let key = Key::from("QmFromProvider");
    let value = Bytes::from_static(b"provided");

    // C holds the value, B only knows that C provides it.
    c.put_local(key.clone(), value.clone()).unwrap();
    let c_at_b = b.get_peer(c.local_peer().id()).unwrap();
    b.providers().add_provider(key.clone(), c_at_b);

    let b_at_a = a.find_local(b.local_peer().id()).unwrap().0;

    let result = a.get_value_or_peers(&ctx(), &b_at_a, &key, 0).unwrap();
    assert_eq!(result, ValueOrPeers::Value(value));

    // A now knows C as a provider.
    let providers = a.providers().get_providers(&key);
    assert_eq!(providers.len(), 1);
    assert_eq!(providers[0].id(), c.local_peer().id());
}

#[test]
fn connect_failure_leaves_no_routing_state() {
    let testnet = Testnet::new(3).unwrap();

    let offline = testnet.nodes[2].local_peer().clone();
    testnet.network.set_online(offline.id(), false);

    let newcomer = testnet.spawn_node(Config::default()).unwrap();

    let result = newcomer.connect(&ctx(), &offline);
    assert!(matches!(result, Err(Error::Dial { .. })));
    assert!(newcomer.find_local(offline.id()).is_none());

    let stranger = Peer::random();
    let result = newcomer.connect(&ctx(), &stranger);
    assert!(result.unwrap_err().is_transport());
    assert!(newcomer.find_local(stranger.id()).is_none());
}

#[test]
fn lookups_route_around_offline_peers() {
    let testnet = Testnet::new(10).unwrap();

    let key = Key::from("QmResilient");
    let value = Bytes::from_static(b"still here");

    testnet.nodes[0]
        .put_value(&ctx(), key.clone(), value.clone())
        .unwrap();

    for node in &testnet.nodes[3..6] {
        testnet.network.set_online(node.local_peer().id(), false);
    }

    // Joined after the put, so the value is not stored locally.
    let latecomer = testnet.spawn_node(Config::default()).unwrap();
    assert_eq!(latecomer.get_local(&key).unwrap(), None);

    let found = latecomer.get_value(&ctx(), &key).unwrap();
    assert_eq!(found, Some(value));
}

#[test]
fn cancelled_lookup() {
    let testnet = Testnet::new(5).unwrap();

    let (ctx, mut cancel) = Context::background().with_cancel();
    cancel.cancel();

    let result = testnet.nodes[4].get_value(&ctx, &Key::from("QmCancelled"));

    assert!(matches!(result, Err(Error::Cancelled)));
}

#[test]
fn load_providable_keys() {
    let testnet = Testnet::new(1).unwrap();
    let node: &Dht = &testnet.nodes[0];

    node.put_local(Key::from("a"), Bytes::from_static(b"1"))
        .unwrap();
    node.put_local(Key::from("b"), Bytes::from_static(b"2"))
        .unwrap();

    assert_eq!(node.load_providable_keys().unwrap(), 2);

    let mut local = node.providers().get_local();
    local.sort();
    assert_eq!(local, vec![Key::from("a"), Key::from("b")]);
}

#[test]
fn start_stop() {
    let testnet = Testnet::with_config(
        3,
        Config {
            ping_interval: Some(Duration::from_millis(10)),
            ..Default::default()
        },
    )
    .unwrap();

    let node = &testnet.nodes[1];
    let ctx = Context::background();

    node.start(&ctx).unwrap();
    assert!(matches!(node.start(&ctx), Err(Error::AlreadyRunning)));

    std::thread::sleep(Duration::from_millis(50));

    node.stop();
    assert!(node.start(&ctx).is_ok());
    node.stop();
}

/// Poll `condition` until it holds or a second passes.
fn eventually(condition: impl Fn() -> bool) -> bool {
    let deadline = std::time::Instant::now() + Duration::from_secs(1);

    while std::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(5));
    }

    condition()
}

#[test]
fn ping_routine_refreshes_peers() {
    let network = MemoryNetwork::new();

    let pinger = network
        .spawn(Config {
            ping_interval: Some(Duration::from_millis(20)),
            ping_count: 10,
            ..Default::default()
        })
        .unwrap();

    let quiet = Config {
        ping_interval: None,
        ..Default::default()
    };
    let remotes = (0..3)
        .map(|_| network.spawn(quiet.clone()).unwrap())
        .collect::<Vec<_>>();
    let offline = network.spawn(quiet.clone()).unwrap();
    network.set_online(offline.local_peer().id(), false);

    // The pinger knows them, they have never heard of it.
    for remote in remotes.iter().chain([&offline]) {
        let peer = pinger.get_peer(remote.local_peer().id()).unwrap();
        pinger.update(&peer);
        assert!(peer.latency().is_zero());
    }

    pinger.start(&Context::background()).unwrap();

    let pinger_id = pinger.local_peer().id().clone();

    assert!(eventually(|| remotes
        .iter()
        .all(|remote| remote.find_local(&pinger_id).is_some())));

    for remote in &remotes {
        let (peer, _) = pinger.find_local(remote.local_peer().id()).unwrap();
        assert!(!peer.latency().is_zero());
    }

    let (unreachable, _) = pinger.find_local(offline.local_peer().id()).unwrap();
    assert!(unreachable.latency().is_zero());

    // Failed pings do not stop the routine.
    let later = network.spawn(quiet).unwrap();
    pinger.update(&pinger.get_peer(later.local_peer().id()).unwrap());

    assert!(eventually(|| later.find_local(&pinger_id).is_some()));
    assert!(matches!(
        pinger.start(&Context::background()),
        Err(Error::AlreadyRunning)
    ));

    pinger.stop();
}
