//! Lifeline and wake-up bootstrap behavior for newly added nodes.

use zwc_core::{
    AddNodeReport, AddNodeStatus, Association, Callback, CcCommand, CommandClass, DeviceClass,
    FunctionType, NodeId, Request,
};
use zwc_testkit::{init_test_tracing, node, ready_controller, MockTransportBuilder};

fn add_node_ready() -> Callback {
    Callback::AddNode(AddNodeReport::status_only(AddNodeStatus::Ready, NodeId::new(0)))
}

async fn include_node(
    mock: &std::sync::Arc<zwc_testkit::MockTransport>,
    controller: &std::sync::Arc<zwc_controller::Controller>,
    node_id: NodeId,
    supported_ccs: Vec<CommandClass>,
) {
    mock.on_request_inject(FunctionType::AddNodeToNetwork, vec![add_node_ready()]);
    assert!(controller.begin_inclusion(true).await.unwrap());
    mock.inject(Callback::AddNode(AddNodeReport {
        status: AddNodeStatus::AddingSlave,
        node_id,
        device_class: Some(DeviceClass::new(0x04, 0x07, 0x01)),
        supported_ccs,
        controlled_ccs: vec![],
    }))
    .await;
    mock.inject(Callback::AddNode(AddNodeReport::status_only(
        AddNodeStatus::Done,
        node_id,
    )))
    .await;
}

#[tokio::test]
async fn zwave_plus_nodes_get_a_lifeline_association() {
    init_test_tracing();
    let (mock, controller) = ready_controller(MockTransportBuilder::new()).await;

    include_node(
        &mock,
        &controller,
        node(6),
        vec![CommandClass::ZWavePlusInfo, CommandClass::Association],
    )
    .await;

    // the controller added itself to group 1
    assert_eq!(mock.association_state(node(6), 1), vec![node(1)]);

    // and assigned a return route back to itself
    let routes = mock.sent_of(FunctionType::AssignReturnRoute);
    assert!(routes.contains(&Request::AssignReturnRoute {
        node_id: node(6),
        destination: node(1),
    }));
}

#[tokio::test]
async fn multi_channel_nodes_get_an_endpoint_zero_lifeline() {
    init_test_tracing();
    let (mock, controller) = ready_controller(MockTransportBuilder::new()).await;

    include_node(
        &mock,
        &controller,
        node(6),
        vec![
            CommandClass::ZWavePlusInfo,
            CommandClass::Association,
            CommandClass::MultiChannelAssociation,
        ],
    )
    .await;

    // the multi-channel variant is preferred, targeting endpoint 0
    let lifeline_sets: Vec<Request> = mock
        .sent_of(FunctionType::SendData)
        .into_iter()
        .filter(|request| {
            matches!(
                request,
                Request::SendData {
                    command: CcCommand::MultiChannelAssociationSet { .. },
                    ..
                }
            )
        })
        .collect();
    assert_eq!(
        lifeline_sets,
        vec![Request::SendData {
            node_id: node(6),
            command: CcCommand::MultiChannelAssociationSet {
                group: 1,
                node_ids: vec![],
                destinations: vec![Association::multi_channel(node(1), 0)],
            },
        }]
    );
}

#[tokio::test]
async fn non_zwave_plus_nodes_get_no_lifeline() {
    init_test_tracing();
    let (mock, controller) = ready_controller(MockTransportBuilder::new()).await;

    include_node(&mock, &controller, node(6), vec![CommandClass::Association]).await;

    assert!(mock.association_state(node(6), 1).is_empty());
    assert!(mock.sent_of(FunctionType::AssignReturnRoute).is_empty());
}

#[tokio::test]
async fn wake_up_nodes_are_pointed_at_the_controller() {
    init_test_tracing();
    let (mock, controller) = ready_controller(MockTransportBuilder::new()).await;
    mock.set_cc_version(node(6), CommandClass::WakeUp, 2);

    include_node(&mock, &controller, node(6), vec![CommandClass::WakeUp]).await;

    let added = controller.get_node(node(6)).unwrap();
    // the queried version is registered on the node
    assert_eq!(added.cc_version(CommandClass::WakeUp), 2);

    // the wake-up destination is the controller, keeping the device interval
    let interval_sets: Vec<Request> = mock
        .sent_of(FunctionType::SendData)
        .into_iter()
        .filter(|request| {
            matches!(
                request,
                Request::SendData {
                    command: CcCommand::WakeUpIntervalSet { .. },
                    ..
                }
            )
        })
        .collect();
    assert_eq!(
        interval_sets,
        vec![Request::SendData {
            node_id: node(6),
            command: CcCommand::WakeUpIntervalSet {
                interval_secs: 3600,
                destination: node(1),
            },
        }]
    );
}

#[tokio::test]
async fn transient_lifeline_failures_do_not_abort_the_commit() {
    init_test_tracing();
    let (mock, controller) = ready_controller(MockTransportBuilder::new()).await;
    mock.fail_cc(
        node(6),
        CommandClass::Association,
        zwc_core::ZWaveError::NodeTimeout { node_id: node(6) },
    );

    include_node(
        &mock,
        &controller,
        node(6),
        vec![CommandClass::ZWavePlusInfo, CommandClass::Association],
    )
    .await;

    // the association set failed, the node is committed regardless
    assert!(controller.get_node(node(6)).is_some());
}
