//! Replace-failed-node state machine behavior.

use std::sync::Arc;

use tokio::sync::broadcast;

use zwc_controller::{ControllerEvent, NodeStatus};
use zwc_core::{
    Callback, CommandClass, FunctionType, NodeId, ReplaceFailedNodeStatus, Response, ZWaveError,
};
use zwc_testkit::{init_test_tracing, node, ready_controller, MockTransportBuilder};

fn drain_events(rx: &mut broadcast::Receiver<ControllerEvent>) -> Vec<ControllerEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

#[tokio::test]
async fn replace_preserves_the_node_id_but_not_the_identity() {
    init_test_tracing();
    let (mock, controller) = ready_controller(
        MockTransportBuilder::new()
            .node_ids(&[1, 5])
            .network_key([0x22; 16]),
    )
    .await;
    let mut events = controller.subscribe();

    let old_node = controller.get_node(node(5)).unwrap();
    mock.fail_ping(node(5));

    mock.on_request_inject(
        FunctionType::ReplaceFailedNode,
        vec![Callback::ReplaceFailedNode(
            ReplaceFailedNodeStatus::FailedNodeReplace,
        )],
    );
    let ready = controller.replace_failed_node(node(5)).await.unwrap();
    assert!(ready);
    assert!(controller.is_inclusion_active());

    mock.inject(Callback::ReplaceFailedNode(
        ReplaceFailedNodeStatus::FailedNodeReplaceDone,
    ))
    .await;

    // same id, fresh node object
    let new_node = controller.get_node(node(5)).expect("node 5 must exist");
    assert!(!Arc::ptr_eq(&old_node, &new_node));
    assert_eq!(new_node.id(), node(5));
    assert_eq!(new_node.status(), NodeStatus::Alive);
    // replace flows assume security because no NIF is received
    assert!(new_node.is_secure());
    assert!(!controller.is_inclusion_active());

    let events = drain_events(&mut events);
    assert!(matches!(
        events[0],
        ControllerEvent::InclusionStarted { secure: true }
    ));
    assert!(matches!(events[1], ControllerEvent::InclusionStopped));
    match &events[2] {
        ControllerEvent::NodeRemoved { node: removed, replaced } => {
            assert_eq!(removed.id(), node(5));
            assert!(replaced);
            // observers can still resolve the pre-replace handle
            assert!(Arc::ptr_eq(removed, &old_node));
        }
        other => panic!("expected a node removed event, got {other:?}"),
    }
    match &events[3] {
        ControllerEvent::NodeAdded { node: added } => assert!(Arc::ptr_eq(added, &new_node)),
        other => panic!("expected a node added event, got {other:?}"),
    }
}

#[tokio::test]
async fn replace_is_refused_while_another_operation_is_active() {
    init_test_tracing();
    let (mock, controller) = ready_controller(MockTransportBuilder::new().node_ids(&[1, 5])).await;

    mock.on_request_inject(
        FunctionType::AddNodeToNetwork,
        vec![Callback::AddNode(zwc_core::AddNodeReport::status_only(
            zwc_core::AddNodeStatus::Ready,
            NodeId::new(0),
        ))],
    );
    assert!(controller.begin_inclusion(false).await.unwrap());

    assert!(!controller.replace_failed_node(node(5)).await.unwrap());
    assert!(mock.sent_of(FunctionType::ReplaceFailedNode).is_empty());
}

#[tokio::test]
async fn replace_is_refused_when_the_node_responds_to_a_ping() {
    init_test_tracing();
    let (mock, controller) = ready_controller(MockTransportBuilder::new().node_ids(&[1, 5])).await;

    let result = controller.replace_failed_node(node(5)).await;
    match result {
        Err(ZWaveError::ReplaceFailed { reason }) => {
            assert!(reason.contains("responded to a ping"));
        }
        other => panic!("expected a replace failure, got {other:?}"),
    }
    assert!(mock.sent_of(FunctionType::ReplaceFailedNode).is_empty());
}

#[tokio::test]
async fn replace_decodes_the_start_flags_into_an_error() {
    init_test_tracing();
    let (mock, controller) = ready_controller(MockTransportBuilder::new().node_ids(&[1, 5])).await;
    mock.fail_ping(node(5));
    mock.script(
        FunctionType::ReplaceFailedNode,
        Ok(Response::ReplaceFailedNode {
            start_flags: 1 << 3,
        }),
    );

    let result = controller.replace_failed_node(node(5)).await;
    match result {
        Err(ZWaveError::ReplaceFailed { reason }) => {
            assert!(reason.contains("could not be started"));
            assert!(reason.contains("failed nodes list"));
        }
        other => panic!("expected a replace failure, got {other:?}"),
    }
}

#[tokio::test]
async fn a_node_ok_report_rejects_the_replace() {
    init_test_tracing();
    let (mock, controller) = ready_controller(MockTransportBuilder::new().node_ids(&[1, 5])).await;
    let mut events = controller.subscribe();
    mock.fail_ping(node(5));

    mock.on_request_inject(
        FunctionType::ReplaceFailedNode,
        vec![Callback::ReplaceFailedNode(ReplaceFailedNodeStatus::NodeOk)],
    );
    let result = controller.replace_failed_node(node(5)).await;
    assert_eq!(result, Err(ZWaveError::ReplaceNodeOk { node_id: node(5) }));

    let events = drain_events(&mut events);
    assert!(events
        .iter()
        .any(|event| matches!(event, ControllerEvent::InclusionFailed)));
    // the node stays in the registry
    assert!(controller.get_node(node(5)).is_some());
}

#[tokio::test]
async fn a_replace_failed_report_rejects_the_replace() {
    init_test_tracing();
    let (mock, controller) = ready_controller(MockTransportBuilder::new().node_ids(&[1, 5])).await;
    mock.fail_ping(node(5));

    mock.on_request_inject(
        FunctionType::ReplaceFailedNode,
        vec![Callback::ReplaceFailedNode(
            ReplaceFailedNodeStatus::FailedNodeReplaceFailed,
        )],
    );
    let result = controller.replace_failed_node(node(5)).await;
    assert!(matches!(result, Err(ZWaveError::ReplaceFailed { .. })));
}

#[tokio::test]
async fn replaced_nodes_get_the_security_cc_even_without_a_nif() {
    init_test_tracing();
    let (mock, controller) = ready_controller(
        MockTransportBuilder::new()
            .node_ids(&[1, 5])
            .network_key([0x22; 16]),
    )
    .await;
    mock.fail_ping(node(5));

    mock.on_request_inject(
        FunctionType::ReplaceFailedNode,
        vec![Callback::ReplaceFailedNode(
            ReplaceFailedNodeStatus::FailedNodeReplace,
        )],
    );
    assert!(controller.replace_failed_node(node(5)).await.unwrap());
    mock.inject(Callback::ReplaceFailedNode(
        ReplaceFailedNodeStatus::FailedNodeReplaceDone,
    ))
    .await;

    let new_node = controller.get_node(node(5)).unwrap();
    assert!(new_node.supports_cc(CommandClass::Security));
    // the bootstrap ran: scheme get, nonce get and key set went to the node
    let security_commands: Vec<_> = mock
        .sent_of(FunctionType::SendData)
        .into_iter()
        .filter(|request| match request {
            zwc_core::Request::SendData { command, .. } => {
                command.command_class() == CommandClass::Security
            }
            _ => false,
        })
        .collect();
    assert_eq!(security_commands.len(), 3);
}
