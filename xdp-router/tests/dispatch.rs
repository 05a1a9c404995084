//! Frames pushed through a `Router` running on a scripted engine: one verdict per
//! frame, in order, applied the way the handler asked.

mod common;

use common::{
    CLIENT_MAC, ETH0_MAC, Outcome, RecordingNetOps, SERVER_MAC, decide, eth0_config, frame_to,
    scripted,
};
use xdp_router::{Action, HandlerError, Metadata, Rewriter, Router};

fn router() -> Router<RecordingNetOps> {
    Router::with_net(RecordingNetOps::default(), eth0_config())
}

#[test]
fn every_frame_gets_one_verdict_in_order() {
    let (engine, feeder) = scripted();
    let mut router = router();
    router
        .start_with(decide(|_| Ok(Action::Pass)), move |_, _| Ok(engine))
        .unwrap();

    let frames: Vec<Vec<u8>> = (0u8..10).map(|i| frame_to(SERVER_MAC, &[i; 20])).collect();
    for frame in &frames {
        feeder.push(frame, 2048);
    }
    let outcomes = feeder.wait_for(frames.len());
    let expected: Vec<Outcome> = frames.iter().cloned().map(Outcome::InPlace).collect();
    assert_eq!(outcomes, expected);

    router.close().unwrap();
    let stats = router.stats();
    assert_eq!(stats.received, 10);
    assert_eq!(stats.passed, 10);
    assert_eq!(stats.dropped, 0);
}

#[test]
fn drop_is_never_transmitted() {
    let (engine, feeder) = scripted();
    let mut router = router();
    router
        .start_with(decide(|_| Ok(Action::Drop)), move |_, _| Ok(engine))
        .unwrap();
    feeder.push(&frame_to(SERVER_MAC, b"x"), 2048);
    assert_eq!(feeder.wait_for(1), vec![Outcome::Dropped]);
    router.close().unwrap();
    assert_eq!(router.stats().dropped, 1);
}

fn grow_to(len: usize) -> impl FnMut(&mut Metadata) -> Result<Action, HandlerError> + Send + 'static {
    decide(move |meta| {
        let mut bytes = meta.frame.to_vec();
        bytes.resize(len, 0xee);
        meta.frame.replace(&bytes);
        Ok(Action::Rewrite)
    })
}

#[test]
fn rewrite_fitting_the_buffer_goes_out_in_place() {
    let (engine, feeder) = scripted();
    let mut router = router();
    router.start_with(grow_to(64), move |_, _| Ok(engine)).unwrap();

    let original = frame_to(SERVER_MAC, &[1; 46]);
    feeder.push(&original, 64);
    let mut expected = original.clone();
    expected.resize(64, 0xee);
    assert_eq!(feeder.wait_for(1), vec![Outcome::InPlace(expected)]);
    router.close().unwrap();
    assert_eq!(router.stats().rewritten, 1);
}

#[test]
fn rewrite_exceeding_the_buffer_is_reallocated() {
    let (engine, feeder) = scripted();
    let mut router = router();
    router.start_with(grow_to(65), move |_, _| Ok(engine)).unwrap();

    let original = frame_to(SERVER_MAC, &[1; 46]);
    feeder.push(&original, 64);
    let mut expected = original.clone();
    expected.resize(65, 0xee);
    assert_eq!(feeder.wait_for(1), vec![Outcome::Reallocated(expected)]);
    router.close().unwrap();
}

#[test]
fn new_frame_replaces_the_original() {
    let (engine, feeder) = scripted();
    let mut router = router();
    router
        .start_with(
            decide(|meta| {
                meta.set_frame(vec![7u8; 30].into());
                Ok(Action::New)
            }),
            move |_, _| Ok(engine),
        )
        .unwrap();
    feeder.push(&frame_to(SERVER_MAC, b"small"), 2048);
    assert_eq!(feeder.wait_for(1), vec![Outcome::Reallocated(vec![7; 30])]);
    router.close().unwrap();
    assert_eq!(router.stats().injected, 1);
}

#[test]
fn decision_error_drops_only_that_frame() {
    let (engine, feeder) = scripted();
    let mut router = router();
    router
        .start_with(
            decide(|meta| {
                if meta.sequence == 1 {
                    return Err(HandlerError::new("policy failure"));
                }
                Ok(Action::Pass)
            }),
            move |_, _| Ok(engine),
        )
        .unwrap();

    let frames: Vec<Vec<u8>> = (0u8..3).map(|i| frame_to(SERVER_MAC, &[i])).collect();
    for frame in &frames {
        feeder.push(frame, 2048);
    }
    assert_eq!(
        feeder.wait_for(3),
        vec![
            Outcome::InPlace(frames[0].clone()),
            Outcome::Dropped,
            Outcome::InPlace(frames[2].clone()),
        ]
    );
    router.close().unwrap();
    let stats = router.stats();
    assert_eq!(stats.decision_errors, 1);
    assert_eq!(stats.dropped, 1);
    assert_eq!(stats.passed, 2);
}

#[test]
fn unknown_action_is_dropped_and_counted() {
    let (engine, feeder) = scripted();
    let mut router = router();
    router
        .start_with(decide(|_| Ok(Action::from(9))), move |_, _| Ok(engine))
        .unwrap();
    feeder.push(&frame_to(SERVER_MAC, b"?"), 2048);
    assert_eq!(feeder.wait_for(1), vec![Outcome::Dropped]);
    router.close().unwrap();
    let stats = router.stats();
    assert_eq!(stats.unknown_actions, 1);
    assert_eq!(stats.dropped, 1);
}

#[test]
fn metadata_carries_queue_and_sequence() {
    let (engine, feeder) = scripted();
    let mut router = router();
    router
        .start_with(
            decide(|meta| {
                assert_eq!(meta.if_index, 2);
                assert_eq!(meta.queue_id, 0);
                assert_eq!(meta.mark, 0);
                meta.mark = 1;
                Ok(if meta.sequence % 2 == 0 { Action::Pass } else { Action::Drop })
            }),
            move |_, _| Ok(engine),
        )
        .unwrap();
    let frame = frame_to(SERVER_MAC, b"seq");
    for _ in 0..4 {
        feeder.push(&frame, 2048);
    }
    assert_eq!(
        feeder.wait_for(4),
        vec![
            Outcome::InPlace(frame.clone()),
            Outcome::Dropped,
            Outcome::InPlace(frame.clone()),
            Outcome::Dropped,
        ]
    );
    router.close().unwrap();
}

#[test]
fn rewriter_redirects_server_traffic_to_client() {
    let (engine, feeder) = scripted();
    let mut router = router();
    let config = router.config().clone();
    router
        .start_with(
            Rewriter::new(config.client_mac, config.server_mac),
            move |_, _| Ok(engine),
        )
        .unwrap();
    assert_eq!(router.binding().unwrap().interface.mac, Some(ETH0_MAC));

    let to_server = frame_to(SERVER_MAC, b"hello server");
    feeder.push(&to_server, 2048);
    let outcomes = feeder.wait_for(1);

    let mut expected = to_server.clone();
    expected[..6].copy_from_slice(&CLIENT_MAC);
    assert_eq!(outcomes, vec![Outcome::InPlace(expected)]);
    router.close().unwrap();
    let stats = router.stats();
    assert_eq!(stats.dropped, 0);
    assert_eq!(stats.rewritten, 1);
}
