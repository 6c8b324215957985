//! Failed-node removal and hard reset behavior.

use std::sync::Arc;

use zwc_controller::{ControllerEvent, Transport};
use zwc_core::{
    Callback, CommandClass, FunctionType, RemoveFailedNodeResponse, RemoveFailedNodeStatus,
    Response, ValueId, ZWaveError,
};
use zwc_testkit::{init_test_tracing, node, ready_controller, MockTransportBuilder};

#[tokio::test]
async fn removal_is_refused_when_the_node_responds_to_a_ping() {
    init_test_tracing();
    let (mock, controller) = ready_controller(MockTransportBuilder::new().node_ids(&[1, 9])).await;

    let result = controller.remove_failed_node(node(9)).await;
    match result {
        Err(ZWaveError::ReplaceFailed { reason }) => {
            assert!(reason.contains("responded to a ping"));
        }
        other => panic!("expected a failure, got {other:?}"),
    }
    // no removal request may be sent
    assert!(mock.sent_of(FunctionType::RemoveFailedNode).is_empty());
    assert!(controller.get_node(node(9)).is_some());
}

#[tokio::test]
async fn removal_start_flags_are_decoded_into_the_error() {
    init_test_tracing();
    let (mock, controller) = ready_controller(MockTransportBuilder::new().node_ids(&[1, 9])).await;
    mock.fail_ping(node(9));
    mock.script(
        FunctionType::RemoveFailedNode,
        Ok(Response::RemoveFailedNode(
            RemoveFailedNodeResponse::StartFailed((1 << 1) | (1 << 5)),
        )),
    );

    let result = controller.remove_failed_node(node(9)).await;
    match result {
        Err(ZWaveError::RemoveFailed { reason }) => {
            assert!(reason.contains("could not be started"));
            assert!(reason.contains("primary controller"));
            assert!(reason.contains("could not be started"));
        }
        other => panic!("expected a failure, got {other:?}"),
    }
}

#[tokio::test]
async fn a_node_ok_status_is_its_own_error() {
    init_test_tracing();
    let (mock, controller) = ready_controller(MockTransportBuilder::new().node_ids(&[1, 9])).await;
    mock.fail_ping(node(9));
    mock.script(
        FunctionType::RemoveFailedNode,
        Ok(Response::RemoveFailedNode(
            RemoveFailedNodeResponse::Status(RemoveFailedNodeStatus::NodeOk),
        )),
    );

    assert_eq!(
        controller.remove_failed_node(node(9)).await,
        Err(ZWaveError::RemoveNodeOk { node_id: node(9) })
    );
    assert!(controller.get_node(node(9)).is_some());
}

#[tokio::test]
async fn a_node_not_removed_status_fails_the_removal() {
    init_test_tracing();
    let (mock, controller) = ready_controller(MockTransportBuilder::new().node_ids(&[1, 9])).await;
    mock.fail_ping(node(9));
    mock.script(
        FunctionType::RemoveFailedNode,
        Ok(Response::RemoveFailedNode(
            RemoveFailedNodeResponse::Status(RemoveFailedNodeStatus::NodeNotRemoved),
        )),
    );

    assert!(matches!(
        controller.remove_failed_node(node(9)).await,
        Err(ZWaveError::RemoveFailed { .. })
    ));
}

#[tokio::test]
async fn a_successful_removal_publishes_the_event_and_clears_the_registry() {
    init_test_tracing();
    let (mock, controller) = ready_controller(MockTransportBuilder::new().node_ids(&[1, 9])).await;
    let mut events = controller.subscribe();
    mock.fail_ping(node(9));

    controller.remove_failed_node(node(9)).await.unwrap();

    assert!(controller.get_node(node(9)).is_none());
    match events.try_recv().unwrap() {
        ControllerEvent::NodeRemoved { node: removed, replaced } => {
            assert_eq!(removed.id(), node(9));
            assert!(!replaced);
        }
        other => panic!("expected a node removed event, got {other:?}"),
    }
}

#[tokio::test]
async fn removing_an_unknown_node_is_a_registry_error() {
    init_test_tracing();
    let (_mock, controller) = ready_controller(MockTransportBuilder::new()).await;
    assert_eq!(
        controller.remove_failed_node(node(42)).await,
        Err(ZWaveError::NodeNotFound { node_id: node(42) })
    );
}

#[tokio::test]
async fn hard_reset_clears_the_registry_after_the_confirmation() {
    init_test_tracing();
    let (mock, controller) =
        ready_controller(MockTransportBuilder::new().node_ids(&[1, 2, 3])).await;
    assert_eq!(controller.node_ids().len(), 3);

    let sensor = controller.get_node(node(2)).unwrap();
    sensor.value_db().set_value(
        ValueId::new(CommandClass::Basic, 0, "currentValue"),
        serde_json::json!(42),
    );

    let resetting = Arc::clone(&controller);
    let task = tokio::spawn(async move { resetting.hard_reset().await });

    mock.wait_for_request(FunctionType::HardReset, 1).await;
    assert!(mock.inject(Callback::HardReset).await);

    task.await.unwrap().unwrap();
    assert!(controller.node_ids().is_empty());

    // the per-node value rows are dropped along with the registry
    assert!(mock.value_store().index_by_node().is_empty());

    // the one-shot confirmation handler is gone
    assert!(!mock.has_handler(FunctionType::HardReset));
}

#[tokio::test]
async fn a_failed_hard_reset_unregisters_the_handler() {
    init_test_tracing();
    let (mock, controller) = ready_controller(MockTransportBuilder::new().node_ids(&[1, 2])).await;
    mock.script(
        FunctionType::HardReset,
        Err(ZWaveError::MessageDropped {
            reason: "stick unplugged".into(),
        }),
    );

    let result = controller.hard_reset().await;
    assert!(matches!(result, Err(ZWaveError::MessageDropped { .. })));
    assert!(!mock.has_handler(FunctionType::HardReset));
    // the registry is untouched
    assert_eq!(controller.node_ids(), vec![node(1), node(2)]);
}
