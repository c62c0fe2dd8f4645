mod common;

use common::{key_hashing_to, settle, space, spawn};

#[tokio::test]
async fn single_node_owns_everything() {
    common::init();
    let node = spawn(1, None).await;

    node.put("x".into(), "1".into()).await.unwrap();
    assert_eq!(node.get("x").await.unwrap(), Some("1".into()));
    assert_eq!(node.get("missing").await.unwrap(), None);

    let owner = node.lookup("anything").await.unwrap();
    assert_eq!(owner.endpoint, node.endpoint());

    let info = node.info();
    assert!(info.ready);
    assert!(info.predecessor.is_none());
    assert_eq!(info.successors[0].id, *node.id());
    node.stop();
}

#[tokio::test]
async fn two_node_ring_splits_ownership() {
    common::init();
    let space = space();
    let n1 = spawn(10, None).await;
    let n2 = spawn(200, Some(n1.endpoint())).await;
    settle(600).await;

    let i1 = n1.info();
    let i2 = n2.info();
    assert_eq!(i1.successors[0].id, space.id(200));
    assert_eq!(i2.successors[0].id, space.id(10));
    assert_eq!(i1.predecessor.as_ref().map(|p| p.id.clone()), Some(space.id(200)));
    assert_eq!(i2.predecessor.as_ref().map(|p| p.id.clone()), Some(space.id(10)));
    assert!(i2.ready);

    // a key at 150 falls in (10, 200]: owned by n2, replicated at n1
    let key = key_hashing_to(150);
    n1.put(key.clone(), "v".into()).await.unwrap();
    let owner = n1.lookup(&key).await.unwrap();
    assert_eq!(owner.id, space.id(200));
    assert_eq!(n1.get(&key).await.unwrap(), Some("v".into()));
    assert_eq!(n2.get(&key).await.unwrap(), Some("v".into()));

    settle(400).await;
    let i1 = n1.info();
    assert_eq!(i1.primary_keys, 0);
    assert_eq!(i1.replica_keys[0], 1);

    n1.stop();
    n2.stop();
}

#[tokio::test]
async fn lookup_routes_across_the_ring() {
    common::init();
    let space = space();
    let n10 = spawn(10, None).await;
    let n60 = spawn(60, Some(n10.endpoint())).await;
    let n120 = spawn(120, Some(n10.endpoint())).await;
    let n200 = spawn(200, Some(n10.endpoint())).await;
    settle(1500).await;

    // succ(130) in {10, 60, 120, 200} is 200
    let key = key_hashing_to(130);
    for handle in [&n10, &n60, &n120, &n200] {
        let owner = handle.lookup(&key).await.unwrap();
        assert_eq!(owner.id, space.id(200), "from node {}", handle.id());
    }

    // the ring is a single cycle: successors form a permutation
    let mut successor_ids: Vec<_> = [&n10, &n60, &n120, &n200]
        .iter()
        .map(|h| h.info().successors[0].id.clone())
        .collect();
    successor_ids.sort();
    successor_ids.dedup();
    assert_eq!(successor_ids.len(), 4);

    for handle in [n10, n60, n120, n200] {
        handle.stop();
    }
}

#[tokio::test]
async fn join_under_load_moves_keys_without_losing_any() {
    common::init();
    let space = space();
    let n10 = spawn(10, None).await;
    let n60 = spawn(60, Some(n10.endpoint())).await;
    let n120 = spawn(120, Some(n10.endpoint())).await;
    let n200 = spawn(200, Some(n10.endpoint())).await;
    settle(1200).await;

    for i in 0..100 {
        n10.put(format!("key-{i}"), format!("v-{i}"))
            .await
            .unwrap_or_else(|e| panic!("put key-{i}: {e}"));
    }

    let n150 = spawn(150, Some(n10.endpoint())).await;
    settle(2000).await;

    // every key readable from an arbitrary node
    for i in 0..100 {
        let got = n60.get(&format!("key-{i}")).await.unwrap();
        assert_eq!(got, Some(format!("v-{i}")), "key-{i} after join");
    }

    // each key lives at exactly one primary, and the joiner owns its slice
    let handles = [&n10, &n60, &n120, &n150, &n200];
    let total: usize = handles.iter().map(|h| h.info().primary_keys).sum();
    assert_eq!(total, 100);

    let expected_at_150 = (0..100)
        .filter(|i| {
            space
                .hash(format!("key-{i}").as_bytes())
                .in_half_open(&space.id(120), &space.id(150))
        })
        .count();
    assert_eq!(n150.info().primary_keys, expected_at_150);

    for handle in [n10, n60, n120, n150, n200] {
        handle.stop();
    }
}

#[tokio::test]
async fn crash_promotes_replicas_at_the_successor() {
    common::init();
    let space = space();
    let n10 = spawn(10, None).await;
    let n60 = spawn(60, Some(n10.endpoint())).await;
    let n120 = spawn(120, Some(n10.endpoint())).await;
    let n200 = spawn(200, Some(n10.endpoint())).await;
    settle(1200).await;

    // owned by 120, replicated on its successors
    let key = key_hashing_to(90);
    n10.put(key.clone(), "survivor".into()).await.unwrap();
    settle(400).await;

    n120.stop();
    settle(1500).await;

    assert_eq!(n10.get(&key).await.unwrap(), Some("survivor".into()));
    let owner = n10.lookup(&key).await.unwrap();
    assert_eq!(owner.id, space.id(200));

    for handle in [n10, n60, n200] {
        handle.stop();
    }
}

#[tokio::test]
async fn graceful_leave_hands_keys_to_the_successor() {
    common::init();
    let space = space();
    let n10 = spawn(10, None).await;
    let n120 = spawn(120, Some(n10.endpoint())).await;
    let n200 = spawn(200, Some(n10.endpoint())).await;
    settle(1200).await;

    for i in 0..30 {
        n200.put(format!("key-{i}"), format!("v-{i}")).await.unwrap();
    }

    n120.leave().await.unwrap();
    settle(800).await;

    for i in 0..30 {
        let got = n10.get(&format!("key-{i}")).await.unwrap();
        assert_eq!(got, Some(format!("v-{i}")), "key-{i} after leave");
    }
    let total = n10.info().primary_keys + n200.info().primary_keys;
    assert_eq!(total, 30);

    let i10 = n10.info();
    assert_eq!(i10.successors[0].id, space.id(200));
    assert_eq!(
        n200.info().predecessor.map(|p| p.id),
        Some(space.id(10))
    );

    n10.stop();
    n200.stop();
}

#[tokio::test]
async fn notify_is_idempotent_and_fingers_settle() {
    common::init();
    let space = space();
    let n10 = spawn(10, None).await;
    let n200 = spawn(200, Some(n10.endpoint())).await;
    settle(1000).await;

    // many more stabilize rounds change nothing once converged
    let before = n10.info();
    settle(500).await;
    let after = n10.info();
    assert_eq!(
        before.predecessor.map(|p| p.id),
        after.predecessor.map(|p| p.id)
    );
    assert_eq!(
        before.successors.iter().map(|n| n.id.clone()).collect::<Vec<_>>(),
        after.successors.iter().map(|n| n.id.clone()).collect::<Vec<_>>()
    );

    // fingers match their definition: first node at or after the target
    for (index, node) in &after.fingers {
        let target = space.finger_start(&space.id(10), *index);
        let expected = if target.in_half_open(&space.id(10), &space.id(200)) {
            space.id(200)
        } else {
            space.id(10)
        };
        assert_eq!(node.id, expected, "finger {index}");
    }

    n10.stop();
    n200.stop();
}
