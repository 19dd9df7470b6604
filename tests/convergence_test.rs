//! Tests that every client of a model converges to the text of the model's log, whatever the
//! interleaving of edits and deliveries.
//!
//! Clients edit at random, and only sometimes process what the server has sent them, so their edits
//! routinely race with each other and pile up in flight.

use std::{thread, time::Duration};

use log::LevelFilter;
use oplog_rs::{
    messages::ServerMessage,
    operation_log::{MemJournal, MemLogStore},
    server::ServerSpec,
    transform::ComposePrefix,
    types::data_types::OpID,
};
use rand::{rngs::StdRng, Rng, SeedableRng};

mod common;

use crate::common::{
    client::{settle, Client},
    logging::setup_logger,
    service::{configuration, log_of, start_server, text_of, TextServer},
    text_ot::{self, TextChange, TextOT},
};

#[test]
fn random_interleavings_converge_test() {
    setup_logger(LevelFilter::Info);

    for seed in 0..5 {
        // 1. Initialize test components.

        // 1.1. Start a server, and bootstrap three clients of the same model.
        let server = start_server();
        let mut clients: Vec<Client> = ["a", "b", "c"]
            .iter()
            .map(|name| Client::new(&server, name, "doc"))
            .collect();
        for client in clients.iter_mut() {
            client.subscribe();
            client.process_until_received(1);
        }

        // 2. Interleave random edits with random deliveries.
        let mut rng = StdRng::seed_from_u64(seed);
        for _ in 0..60 {
            let client = &mut clients[rng.gen_range(0, 3)];
            if rng.gen_bool(0.5) {
                client.random_edit(&mut rng);
            } else {
                client.process();
            }
            if rng.gen_bool(0.1) {
                thread::sleep(Duration::from_millis(1));
            }
        }

        // 3. Let every client catch up, and check that they agree with the log and with each other.
        let (a, rest) = clients.split_at_mut(1);
        let (b, c) = rest.split_at_mut(1);
        settle(&server, &mut [&mut a[0], &mut b[0], &mut c[0]]);

        let text = text_of(&server, "doc");
        let log_ids: Vec<OpID> = log_of(&server, "doc").into_iter().map(|op| op.id).collect();
        for client in &clients {
            assert_eq!(client.doc(), text, "seed {seed}");

            // Every client incorporated every entry exactly once, in log order.
            assert_eq!(client.processed(), log_ids.as_slice(), "seed {seed}");
        }
    }
}

#[test]
fn own_operations_are_acknowledged_not_delivered_test() {
    setup_logger(LevelFilter::Info);

    // 1. Initialize test components.
    let server = start_server();
    let mut a = Client::new(&server, "a", "doc");
    let mut b = Client::new(&server, "b", "doc");
    a.subscribe();
    b.subscribe();
    a.process_until_received(1);
    b.process_until_received(1);

    // 2. Both clients pipeline a burst of edits without waiting for acks.
    let mut rng = StdRng::seed_from_u64(42);
    let mut sent_by_a = Vec::new();
    let mut sent_by_b = Vec::new();
    for _ in 0..20 {
        sent_by_a.push(a.random_edit(&mut rng));
        sent_by_b.push(b.random_edit(&mut rng));
    }
    settle(&server, &mut [&mut a, &mut b]);

    // 3. Each client got its own operations back as acks, in the order it sent them, and never as
    // operations to apply.
    for (client, sent) in [(&a, &sent_by_a), (&b, &sent_by_b)] {
        let mut acks = Vec::new();
        for message in client.received() {
            if let ServerMessage::Notification {
                ack_id, operations, ..
            } = message
            {
                assert!(operations.iter().all(|op| !sent.contains(&op.id)));
                acks.extend(ack_id.iter().cloned());
            }
        }
        assert_eq!(&acks, sent);
    }
    assert_eq!(a.doc(), b.doc());
    assert_eq!(log_of(&server, "doc").len(), 40);
}

#[test]
fn models_are_independent_test() {
    setup_logger(LevelFilter::Info);

    // 1. Initialize test components: two clients per model, on separate models.
    let server = start_server();
    let mut left_a = Client::new(&server, "la", "left");
    let mut left_b = Client::new(&server, "lb", "left");
    let mut right_a = Client::new(&server, "ra", "right");
    let mut right_b = Client::new(&server, "rb", "right");
    for client in [&mut left_a, &mut left_b, &mut right_a, &mut right_b] {
        client.subscribe();
        client.process_until_received(1);
    }

    // 2. Edit both models concurrently.
    let mut rng = StdRng::seed_from_u64(7);
    for _ in 0..15 {
        left_a.random_edit(&mut rng);
        right_b.random_edit(&mut rng);
        left_b.random_edit(&mut rng);
        right_a.random_edit(&mut rng);
    }
    settle(
        &server,
        &mut [&mut left_a, &mut left_b, &mut right_a, &mut right_b],
    );

    // 3. Each model's log holds exactly its own clients' operations.
    for (model, prefixes) in [("left", ["la", "lb"]), ("right", ["ra", "rb"])] {
        let log = log_of(&server, model);
        assert_eq!(log.len(), 30);
        assert!(log
            .iter()
            .all(|op| prefixes.iter().any(|prefix| op.id.as_str().starts_with(prefix))));
    }
    assert_eq!(left_a.doc(), text_of(&server, "left"));
    assert_eq!(left_b.doc(), text_of(&server, "left"));
    assert_eq!(right_a.doc(), text_of(&server, "right"));
    assert_eq!(right_b.doc(), text_of(&server, "right"));
}

#[test]
fn compacted_bootstrap_test() {
    setup_logger(LevelFilter::Info);

    // 1. Initialize test components: a server that composes all but the last entry of a Bootstrap.
    let server: TextServer = ServerSpec::builder()
        .transform(TextOT)
        .log_store(MemLogStore::<TextChange>::new())
        .journal(MemJournal::<TextChange>::new())
        .configuration(configuration())
        .compaction(ComposePrefix { keep_last: 1 })
        .build()
        .start();
    let mut a = Client::new(&server, "a", "doc");
    a.subscribe();
    a.process_until_received(1);
    a.edit(text_ot::insert(0, "ace"));
    a.edit(text_ot::insert(1, "b"));
    a.edit(text_ot::insert(3, "d"));
    settle(&server, &mut [&mut a]);

    // 2. A new subscriber gets two operations instead of three, the first ending at a2.
    let mut b = Client::new(&server, "b", "doc");
    b.subscribe();
    b.process_until_received(1);
    match &b.received()[0] {
        ServerMessage::Bootstrap { rebased, .. } => {
            let ids: Vec<&str> = rebased.iter().map(|op| op.id.as_str()).collect();
            assert_eq!(ids, ["a2", "a3"]);
            assert_eq!(rebased[1].parents, log_of(&server, "doc")[2].parents);
        }
        message => panic!("expected a Bootstrap, got {message:?}"),
    }
    assert_eq!(b.doc(), "abcde");

    // 3. The compacted Bootstrap leaves B on the log's tail, so it can edit right away.
    b.edit(text_ot::insert(5, "!"));
    settle(&server, &mut [&mut a, &mut b]);
    assert_eq!(a.doc(), "abcde!");
    assert_eq!(log_of(&server, "doc").len(), 4);
}
