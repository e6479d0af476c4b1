//! End-to-end supervisor scenarios: install over the bundle queue,
//! message dispatch, hot-swap, trap containment, and resume from
//! persisted storage.

use eea_agent::peripherals::SimulatedPeripherals;
use eea_agent::persist::{self, BundleStore, Persistor};
use eea_agent::supervisor::{Supervisor, SupervisorState};
use eea_core::{
    AgentConfig, Bundle, InboundMessage, OutboundMessage, PersistRequest, QueueReceiver,
    QueueSender, SlotReceiver, SlotSender, bounded, slot,
};
use std::sync::Arc;
use std::time::Duration;

/// A guest that registers message buffers, echoes every received message
/// back out, and reports link-state changes on the `link` topic.
fn guest_wat(id: &str) -> String {
    format!(
        r#"
        (module
            (import "env" "eea_set_message_buffers"
                (func $set_buffers (param i32 i32 i32 i32) (result i32)))
            (import "env" "eea_send_message"
                (func $send (param i32 i32 i32 i32 i32) (result i32)))
            (memory (export "memory") 2)
            (global (export "BUNDLE_IDENTIFIER") i32 (i32.const 16))
            (global (export "BUNDLE_IDENTIFIER_LENGTH") i32 (i32.const 8))
            (data (i32.const 8) "\{len:02x}")
            (data (i32.const 16) "{id}")
            (data (i32.const 64) "link")
            (func (export "eea_init") (result i32)
                (drop (call $set_buffers
                    (i32.const 1024) (i32.const 256)
                    (i32.const 2048) (i32.const 1024)))
                i32.const 0)
            (func (export "eea_loop") (param i64) (result i32)
                i32.const 0)
            (func (export "eea_message_received") (param i32 i32) (result i32)
                (call $send
                    (i32.const 1024) (local.get 0)
                    (i32.const 2048) (local.get 1)
                    (i32.const 0)))
            (func (export "eea_set_connection_status") (param i32) (result i32)
                (call $send
                    (i32.const 64) (i32.const 4)
                    (i32.const 0) (i32.const 0)
                    (i32.const 0)))
            (func (export "eea_shutdown") (result i32)
                i32.const 0))
        "#,
        len = id.len(),
        id = id,
    )
}

/// A guest whose loop traps immediately.
const TRAPPING_WAT: &str = r#"
    (module
        (memory (export "memory") 1)
        (global (export "BUNDLE_IDENTIFIER") i32 (i32.const 16))
        (global (export "BUNDLE_IDENTIFIER_LENGTH") i32 (i32.const 8))
        (data (i32.const 8) "\05")
        (data (i32.const 16) "traps")
        (func (export "eea_loop") (param i64) (result i32)
            unreachable))
"#;

fn bundle_from_wat(wat_text: &str) -> Bundle {
    Bundle::new(wat::parse_str(wat_text).unwrap())
}

struct Harness {
    supervisor: Supervisor,
    in_tx: QueueSender<InboundMessage>,
    bundle_tx: SlotSender<Bundle>,
    out_rx: QueueReceiver<OutboundMessage>,
    persist_rx: SlotReceiver<PersistRequest>,
}

fn harness() -> Harness {
    let config = Arc::new(AgentConfig {
        device_id: "DEV1".to_string(),
        ..AgentConfig::default()
    });
    let (out_tx, out_rx) = bounded("q_out", 10);
    let (in_tx, in_rx) = bounded("q_in", 10);
    let (bundle_tx, bundle_rx) = slot("q_bundle");
    let (persist_tx, persist_rx) = slot("q_persist");
    let supervisor = Supervisor::new(
        config,
        in_rx,
        bundle_rx,
        out_tx,
        persist_tx,
        Arc::new(SimulatedPeripherals::default()),
    )
    .unwrap();
    Harness {
        supervisor,
        in_tx,
        bundle_tx,
        out_rx,
        persist_rx,
    }
}

fn hello_bundle_field(message: &OutboundMessage) -> String {
    let payload: serde_json::Value = serde_json::from_slice(&message.payload).unwrap();
    assert_eq!(payload["service"], "embeddedWorkflowAgent");
    payload["bundle"].as_str().unwrap().to_string()
}

#[test]
fn bundle_delivery_installs_and_announces() {
    let mut h = harness();
    let bundle = bundle_from_wat(&guest_wat("v1-abc"));
    h.bundle_tx.replace(bundle.clone());

    assert_eq!(h.supervisor.state(), SupervisorState::Idle);
    h.supervisor.tick();

    assert_eq!(h.supervisor.state(), SupervisorState::Running);
    assert_eq!(h.supervisor.bundle_id(), Some("v1-abc"));

    let hello = h.out_rx.try_recv().expect("hello should follow install");
    assert_eq!(hello.topic, "losant/DEV1/fromAgent/hello");
    assert_eq!(hello_bundle_field(&hello), "v1-abc");

    // the persist request carries the exact installed bytes
    let request = h.persist_rx.take().expect("persist request should follow install");
    assert_eq!(request.bundle_id, "v1-abc");
    assert_eq!(request.bytes, bundle.bytes);
}

#[test]
fn inbound_message_reaches_guest_and_reply_is_queued() {
    let mut h = harness();
    h.bundle_tx.replace(bundle_from_wat(&guest_wat("v1-abc")));
    h.supervisor.tick();
    let _hello = h.out_rx.try_recv().unwrap();

    h.in_tx.try_send(InboundMessage::new(
        "losant/DEV1/command",
        b"{\"name\":\"ping\"}".to_vec(),
    ));
    h.supervisor.tick();

    let reply = h.out_rx.try_recv().expect("guest should have echoed");
    assert_eq!(reply.topic, "losant/DEV1/command");
    assert_eq!(reply.payload, b"{\"name\":\"ping\"}");
}

#[test]
fn hot_swap_delivers_queued_messages_to_new_bundle() {
    let mut h = harness();
    h.bundle_tx.replace(bundle_from_wat(&guest_wat("v1-abc")));
    h.supervisor.tick();
    assert_eq!(hello_bundle_field(&h.out_rx.try_recv().unwrap()), "v1-abc");

    // a message and a replacement bundle arrive between ticks: the swap
    // is applied first, then the message reaches the new bundle
    h.in_tx.try_send(InboundMessage::new("losant/DEV1/command", b"x".to_vec()));
    h.bundle_tx.replace(bundle_from_wat(&guest_wat("v2-xyz")));
    h.supervisor.tick();

    assert_eq!(h.supervisor.bundle_id(), Some("v2-xyz"));
    assert_eq!(hello_bundle_field(&h.out_rx.try_recv().unwrap()), "v2-xyz");
    let reply = h.out_rx.try_recv().expect("new bundle should have echoed");
    assert_eq!(reply.payload, b"x");
}

#[test]
fn reinstalling_same_bundle_repeats_hello() {
    let mut h = harness();
    let wat_text = guest_wat("v1-abc");
    h.bundle_tx.replace(bundle_from_wat(&wat_text));
    h.supervisor.tick();
    assert_eq!(hello_bundle_field(&h.out_rx.try_recv().unwrap()), "v1-abc");

    h.bundle_tx.replace(bundle_from_wat(&wat_text));
    h.supervisor.tick();
    assert_eq!(h.supervisor.state(), SupervisorState::Running);
    assert_eq!(hello_bundle_field(&h.out_rx.try_recv().unwrap()), "v1-abc");
}

#[test]
fn guest_trap_faults_supervisor_terminally() {
    let mut h = harness();
    h.bundle_tx.replace(bundle_from_wat(TRAPPING_WAT));
    h.supervisor.tick();
    assert_eq!(h.supervisor.state(), SupervisorState::Running);

    // next tick drives eea_loop, which traps
    h.supervisor.tick();
    assert_eq!(h.supervisor.state(), SupervisorState::Faulted);

    // terminal: further traffic is ignored
    h.in_tx.try_send(InboundMessage::new("losant/DEV1/command", b"x".to_vec()));
    h.bundle_tx.replace(bundle_from_wat(&guest_wat("v9")));
    h.supervisor.tick();
    assert_eq!(h.supervisor.state(), SupervisorState::Faulted);
}

#[test]
fn unparsable_bundle_is_discarded() {
    let mut h = harness();
    h.bundle_tx.replace(Bundle::new(b"not a wasm module".to_vec()));
    h.supervisor.tick();
    assert_eq!(h.supervisor.state(), SupervisorState::Idle);
    assert!(h.out_rx.try_recv().is_none(), "no hello for a failed load");
    assert!(h.persist_rx.take().is_none(), "no persist for a failed load");
}

#[test]
fn failed_swap_lands_idle() {
    // teardown happens before parse, so a bad replacement leaves the
    // device idle rather than running the old bundle
    let mut h = harness();
    h.bundle_tx.replace(bundle_from_wat(&guest_wat("v1-abc")));
    h.supervisor.tick();
    let _hello = h.out_rx.try_recv().unwrap();

    h.bundle_tx.replace(Bundle::new(b"garbage".to_vec()));
    h.supervisor.tick();
    assert_eq!(h.supervisor.state(), SupervisorState::Idle);
    assert_eq!(h.supervisor.bundle_id(), None);
}

#[test]
fn link_state_markers_reach_guest_hook() {
    let mut h = harness();
    h.bundle_tx.replace(bundle_from_wat(&guest_wat("v1-abc")));
    h.supervisor.tick();
    let _hello = h.out_rx.try_recv().unwrap();

    h.in_tx.try_send(InboundMessage::connect());
    h.supervisor.tick();

    let notice = h.out_rx.try_recv().expect("guest reports link change");
    assert_eq!(notice.topic, "link");
    assert_eq!(h.supervisor.state(), SupervisorState::Running);
}

#[test]
fn synthetic_markers_without_bundle_are_harmless() {
    let mut h = harness();
    h.in_tx.try_send(InboundMessage::connect());
    h.in_tx.try_send(InboundMessage::disconnect());
    h.supervisor.tick();
    assert_eq!(h.supervisor.state(), SupervisorState::Idle);
    assert!(h.out_rx.try_recv().is_none());
}

#[test]
fn reboot_restores_persisted_bundle() {
    let dir = tempfile::tempdir().unwrap();
    let config = Arc::new(AgentConfig {
        device_id: "DEV1".to_string(),
        storage_dir: dir.path().to_path_buf(),
        ..AgentConfig::default()
    });

    // first boot: bundle arrives over the broker path and is persisted
    {
        let (out_tx, mut out_rx) = bounded("q_out", 10);
        let (_in_tx, in_rx) = bounded("q_in", 10);
        let (bundle_tx, bundle_rx) = slot("q_bundle");
        let (persist_tx, persist_rx) = slot("q_persist");
        let mut supervisor = Supervisor::new(
            Arc::clone(&config),
            in_rx,
            bundle_rx,
            out_tx,
            persist_tx,
            Arc::new(SimulatedPeripherals::default()),
        )
        .unwrap();

        bundle_tx.replace(bundle_from_wat(&guest_wat("v1-abc")));
        supervisor.tick();
        assert_eq!(hello_bundle_field(&out_rx.try_recv().unwrap()), "v1-abc");

        let mut persistor = Persistor::new(
            BundleStore::new(dir.path()),
            persist_rx,
            Duration::from_millis(100),
        );
        persistor.poll_once();
    }

    // reboot: bootstrap replays the blob, first tick reinstalls it
    {
        let (out_tx, mut out_rx) = bounded("q_out", 10);
        let (_in_tx, in_rx) = bounded("q_in", 10);
        let (bundle_tx, bundle_rx) = slot("q_bundle");
        let (persist_tx, _persist_rx) = slot("q_persist");

        let store = BundleStore::new(dir.path());
        persist::bootstrap(&store, &bundle_tx, &out_tx, &config);

        let mut supervisor = Supervisor::new(
            Arc::clone(&config),
            in_rx,
            bundle_rx,
            out_tx,
            persist_tx,
            Arc::new(SimulatedPeripherals::default()),
        )
        .unwrap();
        supervisor.tick();

        assert_eq!(supervisor.state(), SupervisorState::Running);
        assert_eq!(supervisor.bundle_id(), Some("v1-abc"));
        assert_eq!(hello_bundle_field(&out_rx.try_recv().unwrap()), "v1-abc");
    }
}
