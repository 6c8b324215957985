//! Fixture helpers for decorating nodes with capabilities and cached state.

use std::sync::Arc;

use zwc_controller::{Controller, Node};
use zwc_core::{CommandClass, CommandClassInfo, NodeId, ValueId, ZWaveResult};

use crate::{MockTransport, MockTransportBuilder};

/// Build a mock transport, run the controller interview against it, and hand
/// both back ready for use.
///
/// # Panics
///
/// Panics when the interview fails; fixtures are expected to interview
/// cleanly.
pub async fn ready_controller(
    builder: MockTransportBuilder,
) -> (Arc<MockTransport>, Arc<Controller>) {
    let mock = builder.finish();
    let controller = Controller::new(mock.clone());
    controller
        .interview()
        .await
        .expect("the fixture interview must succeed");
    (mock, controller)
}

/// Run the interview and return the result instead of panicking.
pub async fn try_ready_controller(
    builder: MockTransportBuilder,
) -> (Arc<MockTransport>, Arc<Controller>, ZWaveResult<()>) {
    let mock = builder.finish();
    let controller = Controller::new(mock.clone());
    let result = controller.interview().await;
    (mock, controller, result)
}

/// Give a node a set of supported command classes at version 1.
pub fn add_supported_ccs(node: &Node, ccs: &[CommandClass]) {
    for cc in ccs {
        node.add_cc(*cc, CommandClassInfo::supported(1));
    }
}

/// Mark a node as Z-Wave Plus.
pub fn make_zwave_plus(node: &Node) {
    node.add_cc(CommandClass::ZWavePlusInfo, CommandClassInfo::supported(2));
}

/// Give a node the Association CC with a cached group count.
pub fn add_association_support(node: &Node, group_count: u8) {
    node.add_cc(CommandClass::Association, CommandClassInfo::supported(2));
    node.value_db().set_value(
        ValueId::new(CommandClass::Association, 0, "groupCount"),
        serde_json::json!(group_count),
    );
}

/// Give a node the Multi Channel Association CC with a cached group count.
pub fn add_multi_channel_association_support(node: &Node, group_count: u8) {
    node.add_cc(
        CommandClass::MultiChannelAssociation,
        CommandClassInfo::supported(3),
    );
    node.value_db().set_value(
        ValueId::new(CommandClass::MultiChannelAssociation, 0, "groupCount"),
        serde_json::json!(group_count),
    );
}

/// Seed the cached plain destinations of an association group.
pub fn seed_cached_associations(node: &Node, group: u8, node_ids: &[u8]) {
    node.value_db().set_value(
        ValueId::new(CommandClass::Association, 0, format!("nodeIds.{group}")),
        serde_json::json!(node_ids),
    );
}

/// Seed the cached multi-channel destinations of an association group.
pub fn seed_cached_mc_destinations(
    node: &Node,
    group: u8,
    destinations: &[zwc_core::Association],
) {
    node.value_db().set_value(
        ValueId::new(
            CommandClass::MultiChannelAssociation,
            0,
            format!("destinations.{group}"),
        ),
        serde_json::to_value(destinations).expect("associations serialize"),
    );
}

/// Give a node the Association Group Information CC.
pub fn add_agi_support(node: &Node) {
    node.add_cc(
        CommandClass::AssociationGroupInfo,
        CommandClassInfo::supported(1),
    );
}

/// Seed the AGI cache for one group.
pub fn seed_agi_group(
    node: &Node,
    group: u8,
    name: Option<&str>,
    profile: Option<u16>,
    issued_commands: Option<&[CommandClass]>,
) {
    let db = node.value_db();
    if let Some(name) = name {
        db.set_value(
            ValueId::new(
                CommandClass::AssociationGroupInfo,
                0,
                format!("name.{group}"),
            ),
            serde_json::json!(name),
        );
    }
    if let Some(profile) = profile {
        db.set_value(
            ValueId::new(
                CommandClass::AssociationGroupInfo,
                0,
                format!("profile.{group}"),
            ),
            serde_json::json!(profile),
        );
    }
    if let Some(commands) = issued_commands {
        let ids: Vec<u8> = commands.iter().map(|cc| cc.id()).collect();
        db.set_value(
            ValueId::new(
                CommandClass::AssociationGroupInfo,
                0,
                format!("issuedCommands.{group}"),
            ),
            serde_json::json!(ids),
        );
    }
}

/// Give a node multi-channel endpoints.
pub fn add_endpoints(node: &Node, count: u8) {
    node.add_cc(CommandClass::MultiChannel, CommandClassInfo::supported(4));
    node.value_db().set_value(
        ValueId::new(CommandClass::MultiChannel, 0, "individualCount"),
        serde_json::json!(count),
    );
}

/// Seed the supported command classes of one endpoint.
pub fn seed_endpoint_ccs(node: &Node, endpoint: u8, ccs: &[CommandClass]) {
    let ids: Vec<u8> = ccs.iter().map(|cc| cc.id()).collect();
    node.value_db().set_value(
        ValueId::new(CommandClass::MultiChannel, endpoint, "commandClasses"),
        serde_json::json!(ids),
    );
}

/// Seed the manufacturer triple of a node so device-config lookups resolve.
pub fn seed_manufacturer_info(
    node: &Node,
    manufacturer_id: u16,
    product_type: u16,
    product_id: u16,
) {
    let db = node.value_db();
    db.set_value(
        ValueId::new(CommandClass::ManufacturerSpecific, 0, "manufacturerId"),
        serde_json::json!(manufacturer_id),
    );
    db.set_value(
        ValueId::new(CommandClass::ManufacturerSpecific, 0, "productType"),
        serde_json::json!(product_type),
    );
    db.set_value(
        ValueId::new(CommandClass::ManufacturerSpecific, 0, "productId"),
        serde_json::json!(product_id),
    );
}

/// Shorthand for building a [`NodeId`].
#[must_use]
pub const fn node(id: u8) -> NodeId {
    NodeId::new(id)
}
