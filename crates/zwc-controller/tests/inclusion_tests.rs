//! Inclusion and exclusion state machine behavior.

use std::sync::Arc;

use tokio::sync::broadcast;

use zwc_controller::{Controller, ControllerEvent, NodeStatus};
use zwc_core::{
    AddNodeReport, AddNodeStatus, Callback, CommandClass, DeviceClass, FunctionType, NodeId,
    RemoveNodeReport, RemoveNodeStatus, ZWaveError, NODE_BROADCAST,
};
use zwc_testkit::{init_test_tracing, node, ready_controller, MockTransport, MockTransportBuilder};

fn drain_events(rx: &mut broadcast::Receiver<ControllerEvent>) -> Vec<ControllerEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

fn add_node_ready() -> Callback {
    Callback::AddNode(AddNodeReport::status_only(AddNodeStatus::Ready, NodeId::new(0)))
}

fn remove_node_ready() -> Callback {
    Callback::RemoveNode(RemoveNodeReport {
        status: RemoveNodeStatus::Ready,
        node_id: NodeId::new(0),
    })
}

async fn include_node_seven(mock: &Arc<MockTransport>, controller: &Arc<Controller>) {
    mock.on_request_inject(FunctionType::AddNodeToNetwork, vec![add_node_ready()]);
    assert!(controller.begin_inclusion(false).await.unwrap());

    mock.inject(Callback::AddNode(AddNodeReport {
        status: AddNodeStatus::AddingSlave,
        node_id: node(7),
        device_class: Some(DeviceClass::new(0x04, 0x10, 0x01)),
        supported_ccs: vec![CommandClass::BinarySwitch, CommandClass::Version],
        controlled_ccs: vec![],
    }))
    .await;
    mock.inject(Callback::AddNode(AddNodeReport::status_only(
        AddNodeStatus::ProtocolDone,
        node(7),
    )))
    .await;
    mock.inject(Callback::AddNode(AddNodeReport::status_only(
        AddNodeStatus::Done,
        node(7),
    )))
    .await;
}

#[tokio::test]
async fn inclusion_happy_path_commits_the_node() {
    init_test_tracing();
    let (mock, controller) = ready_controller(MockTransportBuilder::new()).await;
    let mut events = controller.subscribe();

    include_node_seven(&mock, &controller).await;

    // the node is committed with its advertised capabilities
    let added = controller.get_node(node(7)).expect("node 7 must exist");
    assert_eq!(added.status(), NodeStatus::Alive);
    assert!(added.supports_cc(CommandClass::BinarySwitch));
    assert!(added.supports_cc(CommandClass::Version));
    assert_eq!(
        added.device_class().unwrap(),
        DeviceClass::new(0x04, 0x10, 0x01)
    );
    assert!(added.has_suc_return_route());
    // no security manager configured, so the node is insecure
    assert!(!added.is_secure());
    assert!(!controller.is_inclusion_active());

    let events = drain_events(&mut events);
    assert!(matches!(
        events[0],
        ControllerEvent::InclusionStarted { secure: true }
    ));
    assert!(matches!(events[1], ControllerEvent::InclusionStopped));
    match &events[2] {
        ControllerEvent::NodeAdded { node: added } => assert_eq!(added.id(), node(7)),
        other => panic!("expected a node added event, got {other:?}"),
    }
}

#[tokio::test]
async fn secure_inclusion_runs_the_s0_bootstrap() {
    init_test_tracing();
    let (mock, controller) =
        ready_controller(MockTransportBuilder::new().network_key([0x11; 16])).await;

    mock.on_request_inject(FunctionType::AddNodeToNetwork, vec![add_node_ready()]);
    assert!(controller.begin_inclusion(false).await.unwrap());
    mock.inject(Callback::AddNode(AddNodeReport {
        status: AddNodeStatus::AddingSlave,
        node_id: node(8),
        device_class: Some(DeviceClass::new(0x04, 0x10, 0x01)),
        supported_ccs: vec![CommandClass::BinarySwitch, CommandClass::Security],
        controlled_ccs: vec![],
    }))
    .await;
    mock.inject(Callback::AddNode(AddNodeReport::status_only(
        AddNodeStatus::ProtocolDone,
        node(8),
    )))
    .await;
    mock.inject(Callback::AddNode(AddNodeReport::status_only(
        AddNodeStatus::Done,
        node(8),
    )))
    .await;

    let added = controller.get_node(node(8)).unwrap();
    assert!(added.is_secure());
    assert!(added.supports_cc(CommandClass::Security));
}

#[tokio::test]
async fn a_failing_s0_bootstrap_falls_back_to_insecure() {
    init_test_tracing();
    let (mock, controller) =
        ready_controller(MockTransportBuilder::new().network_key([0x11; 16])).await;
    mock.fail_cc(node(8), CommandClass::Security, ZWaveError::MessageExpired);

    mock.on_request_inject(FunctionType::AddNodeToNetwork, vec![add_node_ready()]);
    assert!(controller.begin_inclusion(false).await.unwrap());
    mock.inject(Callback::AddNode(AddNodeReport {
        status: AddNodeStatus::AddingSlave,
        node_id: node(8),
        device_class: None,
        supported_ccs: vec![CommandClass::Security],
        controlled_ccs: vec![],
    }))
    .await;
    mock.inject(Callback::AddNode(AddNodeReport::status_only(
        AddNodeStatus::Done,
        node(8),
    )))
    .await;

    let added = controller.get_node(node(8)).unwrap();
    assert!(!added.is_secure());
    // the failed bootstrap removes Security from the capability set
    assert!(!added.supports_cc(CommandClass::Security));
}

#[tokio::test]
async fn inclusion_failure_before_ready_rejects_the_begin_promise() {
    init_test_tracing();
    let (mock, controller) = ready_controller(MockTransportBuilder::new()).await;
    let mut events = controller.subscribe();

    mock.on_request_inject(
        FunctionType::AddNodeToNetwork,
        vec![Callback::AddNode(AddNodeReport::status_only(
            AddNodeStatus::Failed,
            NodeId::new(0),
        ))],
    );
    let result = controller.begin_inclusion(false).await;
    assert_eq!(result, Err(ZWaveError::InclusionFailed));

    // the internal stop is sent as a second add-node request
    mock.wait_for_request(FunctionType::AddNodeToNetwork, 2).await;
    assert!(!controller.is_inclusion_active());

    let events = drain_events(&mut events);
    assert!(
        !events
            .iter()
            .any(|event| matches!(event, ControllerEvent::InclusionStarted { .. })),
        "no inclusion started event may be emitted"
    );
}

#[tokio::test]
async fn begin_operations_are_mutually_exclusive() {
    init_test_tracing();
    let (mock, controller) = ready_controller(MockTransportBuilder::new()).await;

    mock.on_request_inject(FunctionType::RemoveNodeFromNetwork, vec![remove_node_ready()]);
    assert!(controller.begin_exclusion().await.unwrap());

    // while the exclusion runs, inclusion refuses without side effects
    assert!(!controller.begin_inclusion(false).await.unwrap());
    assert!(mock.sent_of(FunctionType::AddNodeToNetwork).is_empty());

    // and a second exclusion refuses as well
    assert!(!controller.begin_exclusion().await.unwrap());
}

#[tokio::test]
async fn stop_operations_are_idempotent() {
    init_test_tracing();
    let (mock, controller) = ready_controller(MockTransportBuilder::new()).await;
    let mut events = controller.subscribe();

    assert!(!controller.stop_inclusion().await.unwrap());
    assert!(!controller.stop_exclusion().await.unwrap());

    assert!(mock.sent_of(FunctionType::AddNodeToNetwork).is_empty());
    assert!(mock.sent_of(FunctionType::RemoveNodeFromNetwork).is_empty());
    assert!(drain_events(&mut events).is_empty());
}

#[tokio::test]
async fn stop_inclusion_resolves_on_the_done_report() {
    init_test_tracing();
    let (mock, controller) = ready_controller(MockTransportBuilder::new()).await;

    mock.on_request_inject(FunctionType::AddNodeToNetwork, vec![add_node_ready()]);
    assert!(controller.begin_inclusion(false).await.unwrap());

    mock.on_request_inject(
        FunctionType::AddNodeToNetwork,
        vec![Callback::AddNode(AddNodeReport::status_only(
            AddNodeStatus::Done,
            NODE_BROADCAST,
        ))],
    );
    assert!(controller.stop_inclusion().await.unwrap());
    assert!(!controller.is_inclusion_active());
}

#[tokio::test]
async fn done_with_the_broadcast_id_drops_the_pending_node() {
    init_test_tracing();
    let (mock, controller) = ready_controller(MockTransportBuilder::new()).await;

    mock.on_request_inject(FunctionType::AddNodeToNetwork, vec![add_node_ready()]);
    assert!(controller.begin_inclusion(false).await.unwrap());

    mock.inject(Callback::AddNode(AddNodeReport {
        status: AddNodeStatus::AddingSlave,
        node_id: node(9),
        device_class: None,
        supported_ccs: vec![],
        controlled_ccs: vec![],
    }))
    .await;
    mock.inject(Callback::AddNode(AddNodeReport::status_only(
        AddNodeStatus::Done,
        NODE_BROADCAST,
    )))
    .await;

    assert!(controller.get_node(node(9)).is_none());
}

#[tokio::test]
async fn exclusion_removes_the_node_from_the_registry() {
    init_test_tracing();
    let (mock, controller) = ready_controller(MockTransportBuilder::new().node_ids(&[1, 4])).await;
    let mut events = controller.subscribe();

    mock.on_request_inject(FunctionType::RemoveNodeFromNetwork, vec![remove_node_ready()]);
    assert!(controller.begin_exclusion().await.unwrap());

    mock.inject(Callback::RemoveNode(RemoveNodeReport {
        status: RemoveNodeStatus::RemovingSlave,
        node_id: node(4),
    }))
    .await;
    mock.inject(Callback::RemoveNode(RemoveNodeReport {
        status: RemoveNodeStatus::Done,
        node_id: node(4),
    }))
    .await;

    assert!(controller.get_node(node(4)).is_none());

    let events = drain_events(&mut events);
    assert!(matches!(events[0], ControllerEvent::ExclusionStarted));
    match &events[1] {
        ControllerEvent::NodeRemoved { node: removed, replaced } => {
            assert_eq!(removed.id(), node(4));
            assert!(!replaced);
        }
        other => panic!("expected a node removed event, got {other:?}"),
    }
}

#[tokio::test]
async fn exclusion_failure_before_ready_rejects_the_begin_promise() {
    init_test_tracing();
    let (mock, controller) = ready_controller(MockTransportBuilder::new()).await;

    mock.on_request_inject(
        FunctionType::RemoveNodeFromNetwork,
        vec![Callback::RemoveNode(RemoveNodeReport {
            status: RemoveNodeStatus::Failed,
            node_id: NodeId::new(0),
        })],
    );
    let result = controller.begin_exclusion().await;
    assert_eq!(result, Err(ZWaveError::ExclusionFailed));
    mock.wait_for_request(FunctionType::RemoveNodeFromNetwork, 2)
        .await;
    assert!(!controller.is_exclusion_active());
}

#[tokio::test]
async fn inclusion_and_exclusion_flags_are_never_set_together() {
    init_test_tracing();
    let (mock, controller) = ready_controller(MockTransportBuilder::new()).await;

    mock.on_request_inject(FunctionType::AddNodeToNetwork, vec![add_node_ready()]);
    assert!(controller.begin_inclusion(true).await.unwrap());
    assert!(controller.is_inclusion_active());
    assert!(!controller.is_exclusion_active());

    assert!(!controller.begin_exclusion().await.unwrap());
    assert!(!controller.is_exclusion_active());
}
