use std::time::Duration;

use chord_ring::{Config, IdSpace, NodeHandle, UdpNode, UdpTransport};

/// Identifier space the scenario tests run in: small enough that node and
/// key positions are readable.
pub const BITS: u32 = 8;

pub fn space() -> IdSpace {
    IdSpace::new(BITS)
}

pub fn init() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_env_filter("chord_ring=debug")
        .try_init();
}

/// Spawns a node with a fixed id on an OS-assigned port, with timers fast
/// enough that a handful of stabilize rounds fit in a short sleep.
pub async fn spawn(id: u64, bootstrap: Option<&str>) -> NodeHandle<UdpTransport> {
    let mut config = Config::new("127.0.0.1:0").with_id(space().id(id));
    config.bits = BITS;
    config.replicas = 3;
    config.stabilize_interval = Duration::from_millis(50);
    config.fix_fingers_interval = Duration::from_millis(25);
    config.check_predecessor_interval = Duration::from_millis(100);
    config.rpc_timeout = Duration::from_millis(250);
    config.bootstrap = bootstrap.map(str::to_string);
    UdpNode::new(config).start().await.expect("node should start")
}

pub async fn settle(ms: u64) {
    tokio::time::sleep(Duration::from_millis(ms)).await;
}

/// Brute-forces a key whose hash lands exactly on `target`.
pub fn key_hashing_to(target: u64) -> String {
    let space = space();
    let want = space.id(target);
    (0..200_000u64)
        .map(|i| format!("key-{i}"))
        .find(|key| space.hash(key.as_bytes()) == want)
        .expect("some key should hash to the target id")
}
