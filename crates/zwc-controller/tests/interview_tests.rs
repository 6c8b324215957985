//! Controller interview behavior.

use zwc_controller::Controller;
use zwc_core::{
    CommandClass, ControllerCapabilities, FunctionType, LibraryType, NodeId, Request, ValueId,
    ZWaveError,
};
use zwc_testkit::{
    init_test_tracing, node, ready_controller, try_ready_controller, MockTransportBuilder,
};

#[tokio::test]
async fn capability_queries_fail_before_the_interview() {
    init_test_tracing();
    let mock = MockTransportBuilder::new().finish();
    let controller = Controller::new(mock);

    assert_eq!(
        controller.is_function_supported(FunctionType::SendData),
        Err(ZWaveError::DriverNotReady)
    );
    assert_eq!(controller.own_node_id(), Err(ZWaveError::DriverNotReady));
}

#[tokio::test]
async fn interview_populates_identity_and_registry() {
    init_test_tracing();
    let (mock, controller) =
        ready_controller(MockTransportBuilder::new().node_ids(&[1, 2, 5])).await;

    let identity = controller.identity().expect("interview completed");
    assert_eq!(identity.own_node_id, node(1));
    assert_eq!(identity.library_type, LibraryType::StaticController);
    assert_eq!(identity.manufacturer_id, 0x0086);

    // one node object per reported id; the own node is always present
    assert_eq!(controller.node_ids(), vec![node(1), node(2), node(5)]);
    assert!(controller.get_node(node(1)).is_some());

    // the value DB hook ran exactly once
    assert_eq!(mock.init_value_db_calls(), 1);

    // the stick's manufacturer metadata lands in the own node's value DB
    let own = controller.get_node(node(1)).unwrap();
    let manufacturer = own
        .value_db()
        .get_value(&ValueId::new(
            CommandClass::ManufacturerSpecific,
            0,
            "manufacturerId",
        ))
        .unwrap();
    assert_eq!(manufacturer, serde_json::json!(0x0086));

    assert!(controller
        .is_function_supported(FunctionType::SendData)
        .unwrap());
    assert!(!controller
        .is_function_supported(FunctionType::Other(0xEE))
        .unwrap());
}

#[tokio::test]
async fn controller_promotes_itself_to_suc_when_the_network_has_none() {
    init_test_tracing();
    let (mock, controller) = ready_controller(MockTransportBuilder::new()).await;

    let requests = mock.sent_of(FunctionType::SetSucNodeId);
    assert_eq!(
        requests,
        vec![Request::SetSucNodeId {
            suc_node_id: node(1),
            enable_suc: true,
            enable_sis: true,
        }]
    );
    assert_eq!(
        controller.identity().unwrap().suc_node_id,
        node(1),
        "the promotion must be reflected in the identity cache"
    );
}

#[tokio::test]
async fn no_promotion_when_a_sis_is_present() {
    init_test_tracing();
    let capabilities = ControllerCapabilities {
        is_sis_present: true,
        ..ControllerCapabilities::default()
    };
    let (mock, _controller) =
        ready_controller(MockTransportBuilder::new().capabilities(capabilities)).await;

    assert!(mock.sent_of(FunctionType::SetSucNodeId).is_empty());
}

#[tokio::test]
async fn no_promotion_for_secondary_controllers() {
    init_test_tracing();
    let capabilities = ControllerCapabilities {
        is_secondary: true,
        ..ControllerCapabilities::default()
    };
    let (mock, _controller) =
        ready_controller(MockTransportBuilder::new().capabilities(capabilities)).await;

    assert!(mock.sent_of(FunctionType::SetSucNodeId).is_empty());
}

#[tokio::test]
async fn serial_api_timeouts_are_pushed_for_static_controllers() {
    init_test_tracing();
    let (mock, _controller) = ready_controller(MockTransportBuilder::new()).await;

    let requests = mock.sent_of(FunctionType::SetSerialApiTimeouts);
    assert_eq!(
        requests,
        vec![Request::SetSerialApiTimeouts {
            ack_timeout_ms: 1000,
            byte_timeout_ms: 150,
        }]
    );
}

#[tokio::test]
async fn serial_api_timeouts_are_skipped_for_bridge_controllers() {
    init_test_tracing();
    let (mock, _controller) = ready_controller(
        MockTransportBuilder::new().library_type(LibraryType::BridgeController),
    )
    .await;

    assert!(mock.sent_of(FunctionType::SetSerialApiTimeouts).is_empty());
}

#[tokio::test]
async fn a_failing_identity_query_aborts_the_interview() {
    init_test_tracing();
    let mock = MockTransportBuilder::new().finish();
    mock.script(
        FunctionType::GetControllerId,
        Err(ZWaveError::MessageDropped {
            reason: "stick unplugged".into(),
        }),
    );
    let controller = Controller::new(mock);

    let result = controller.interview().await;
    assert!(matches!(result, Err(ZWaveError::MessageDropped { .. })));

    // the controller must remain unusable
    assert_eq!(
        controller.is_function_supported(FunctionType::SendData),
        Err(ZWaveError::DriverNotReady)
    );
}

#[tokio::test]
async fn cached_nodes_are_restored() {
    init_test_tracing();
    let cache = serde_json::json!({
        "nodes": {
            "2": {
                "id": 2,
                "status": "asleep",
                "interviewStage": "Complete",
                "isSecure": true,
                "commandClasses": {
                    "0x84": { "supported": true, "controlled": false, "secure": false, "version": 2 }
                }
            }
        }
    });
    let (_mock, controller) =
        ready_controller(MockTransportBuilder::new().node_ids(&[1, 2]).cache(cache)).await;

    let restored = controller.get_node(node(2)).unwrap();
    assert_eq!(restored.status(), zwc_controller::NodeStatus::Asleep);
    assert_eq!(
        restored.interview_stage(),
        zwc_controller::InterviewStage::Complete
    );
    assert!(restored.is_secure());
    assert!(restored.supports_cc(CommandClass::WakeUp));
    assert_eq!(restored.cc_version(CommandClass::WakeUp), 2);
}

#[tokio::test]
async fn a_cache_entry_with_a_mismatched_id_is_refused() {
    init_test_tracing();
    let cache = serde_json::json!({
        "nodes": {
            "2": { "id": 3, "status": "alive" }
        }
    });
    let (_mock, _controller, result) = try_ready_controller(
        MockTransportBuilder::new().node_ids(&[1, 2]).cache(cache),
    )
    .await;

    assert!(matches!(result, Err(ZWaveError::InvalidCache { .. })));
}

#[tokio::test]
async fn network_serialization_covers_every_node() {
    init_test_tracing();
    let (_mock, controller) =
        ready_controller(MockTransportBuilder::new().node_ids(&[1, 2, 7])).await;

    let serialized = controller.serialize();
    let nodes = serialized["nodes"].as_object().unwrap();
    assert_eq!(nodes.len(), 3);
    assert_eq!(nodes["7"]["id"], serde_json::json!(7));
}

#[tokio::test]
async fn is_failed_node_queries_the_stick() {
    init_test_tracing();
    let (mock, controller) = ready_controller(MockTransportBuilder::new().node_ids(&[1, 4])).await;
    mock.script(
        FunctionType::IsFailedNode,
        Ok(zwc_core::Response::IsFailedNode { failed: true }),
    );

    assert!(controller.is_failed_node(NodeId::new(4)).await.unwrap());
    assert_eq!(mock.sent_of(FunctionType::IsFailedNode).len(), 1);
}
