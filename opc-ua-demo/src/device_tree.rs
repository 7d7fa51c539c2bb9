use anyhow::{Context, Result};
use opc_ua_engine::types::ids::data_type_ids;
use opc_ua_engine::{Argument, AttributeId, NodeId, QualifiedName, UaServer, Variant};

/// Nodes of the sample address space the demo loop works with.
#[derive(Debug, Clone)]
pub struct DeviceTree {
    pub custom_object: NodeId,
    pub my_variable: NodeId,
    pub my_method: NodeId,
    /// `.../4:G/4:Basic` and `.../4:G/4:In`.
    pub branches: Vec<NodeId>,
}

/// Path from Objects down to the controller's global variable group.
pub const GLOBAL_VARS_PATH: [&str; 6] = [
    "2:DeviceSet",
    "4:CPX-E-CEC-C1-PN",
    "4:Resources",
    "4:Application",
    "3:GlobalVars",
    "4:G",
];

/// Registers the demo namespaces and builds the device tree under Objects.
pub fn build(server: &UaServer) -> Result<DeviceTree> {
    let ns2 = server.register_namespace("http://test2")?;
    let ns3 = server.register_namespace("http://test3")?;
    let ns4 = server.register_namespace("http://test4")?;
    let objects = server.objects_node();

    let device_set = server.add_object(&objects, None, QualifiedName::new(ns2, "DeviceSet"))?;

    let custom_object = server
        .add_object(
            &objects,
            Some(NodeId::numeric(ns2, 99)),
            QualifiedName::new(ns2, "NewObject"),
        )
        .context("custom object")?;
    let my_variable =
        server.add_variable(&custom_object, QualifiedName::new(ns2, "MyVariable"), 8i32)?;
    server.add_property(&custom_object, QualifiedName::new(ns2, "MyProperty"), 8.8f64)?;
    let my_method = server.add_method(
        &custom_object,
        QualifiedName::new(ns2, "MyMethod"),
        vec![Argument::new("Input", data_type_ids::BYTE)],
        vec![Argument::new("Result", data_type_ids::BYTE)],
        |object, _| {
            tracing::info!(object = %object, "MyMethod called");
            Ok(vec![Variant::Byte(0)])
        },
    )?;

    let cpx = server.add_object(&device_set, None, QualifiedName::new(ns4, "CPX-E-CEC-C1-PN"))?;
    let resources = server.add_object(&cpx, None, QualifiedName::new(ns4, "Resources"))?;
    let application = server.add_object(&resources, None, QualifiedName::new(ns4, "Application"))?;
    let global_vars = server.add_object(&application, None, QualifiedName::new(ns3, "GlobalVars"))?;
    let g = server.add_object(&global_vars, None, QualifiedName::new(ns4, "G"))?;

    let mut branches = Vec::new();
    for name in ["Basic", "In"] {
        let branch = server.add_object(&g, None, QualifiedName::new(ns4, name))?;
        let p = server.add_object(&branch, None, QualifiedName::new(ns4, "p"))?;

        for (name, value) in [
            ("ActionId", Variant::UInt16(0)),
            ("BarCode", Variant::UInt16(0)),
            ("Error", Variant::Byte(0)),
            ("SlideCnt", Variant::UInt16(0)),
        ] {
            server.add_variable(&p, QualifiedName::new(ns4, name), value)?;
        }

        let data = server.add_object(&p, None, QualifiedName::new(ns4, "Data"))?;
        for name in ["payload1", "payload2"] {
            server.add_variable(&data, QualifiedName::new(ns4, name), 0u16)?;
        }

        let status = server.add_object(&p, None, QualifiedName::new(ns4, "Status"))?;
        for name in ["Busy", "Enable", "Error", "Ready"] {
            server.add_variable(&status, QualifiedName::new(ns4, name), false)?;
        }
        branches.push(branch);
    }

    tracing::info!(nodes = server.address_space().node_count(), "device tree built");
    Ok(DeviceTree {
        custom_object,
        my_variable,
        my_method,
        branches,
    })
}

/// Logs the node and each of its direct children with value and type.
pub fn log_children(server: &UaServer, node_id: &NodeId) -> Result<()> {
    let node = server.address_space().get_node(node_id)?;
    tracing::info!("Children of {}, Name={}:", node_id, node.browse_name.name);
    for child in server.browse(node_id)? {
        match server.read(&child.node_id, AttributeId::Value) {
            Ok(value) if !value.is_empty() => tracing::info!(
                "  {}, Name={}, Value is {} ({})",
                child.node_id,
                child.browse_name.name,
                value,
                value.type_tag()
            ),
            _ => tracing::info!("  {}, Name={}", child.node_id, child.browse_name.name),
        }
    }
    Ok(())
}
