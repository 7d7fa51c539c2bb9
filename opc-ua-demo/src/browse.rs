use std::io::Write;

use anyhow::Result;
use opc_ua_engine::types::ids::object_ids;
use opc_ua_engine::{AttributeId, NodeClass, NodeId, UaProvider, ns0};

struct Pending {
    node_id: NodeId,
    name: String,
    node_class: NodeClass,
    depth: usize,
}

/// Prints the hierarchy below `start` depth-first, one node per line.
///
/// Variables are printed with their current value and type. Returns the
/// number of nodes printed.
pub async fn print_tree<W: Write>(
    provider: &dyn UaProvider,
    start: &NodeId,
    max_depth: usize,
    out: &mut W,
) -> Result<usize> {
    let mut stack = Vec::new();
    push_children(provider, start, 0, &mut stack).await?;

    let mut printed = 0;
    while let Some(entry) = stack.pop() {
        let indent = "  ".repeat(entry.depth);
        if entry.node_class == NodeClass::Variable {
            match provider.read(&entry.node_id, AttributeId::Value).await {
                Ok(value) => writeln!(
                    out,
                    "{indent}{}, Name={}, Value is {} ({})",
                    entry.node_id,
                    entry.name,
                    value,
                    value.type_tag()
                )?,
                Err(e) => writeln!(
                    out,
                    "{indent}{}, Name={}, Value unavailable: {e}",
                    entry.node_id, entry.name
                )?,
            }
        } else {
            writeln!(out, "{indent}{}, Name={}", entry.node_id, entry.name)?;
        }
        printed += 1;

        if entry.depth + 1 < max_depth {
            push_children(provider, &entry.node_id, entry.depth + 1, &mut stack).await?;
        }
    }
    Ok(printed)
}

async fn push_children(
    provider: &dyn UaProvider,
    node_id: &NodeId,
    depth: usize,
    stack: &mut Vec<Pending>,
) -> Result<()> {
    let children = provider.browse(node_id).await?;
    // Reversed so the first child is popped first.
    stack.extend(children.into_iter().rev().map(|c| Pending {
        node_id: c.node_id,
        name: c.browse_name.name,
        node_class: c.node_class,
        depth,
    }));
    Ok(())
}

/// Prints `Server/NamespaceArray` with each entry's index.
pub async fn print_namespaces<W: Write>(provider: &dyn UaProvider, out: &mut W) -> Result<()> {
    let value = provider
        .read(&ns0(object_ids::SERVER_NAMESPACE_ARRAY), AttributeId::Value)
        .await?;
    let Some(uris) = value.as_string_array() else {
        anyhow::bail!("NamespaceArray is not a string array: {value}");
    };
    writeln!(out, "Namespaces:")?;
    for (index, uri) in uris.iter().enumerate() {
        writeln!(out, "  {index}: {uri}")?;
    }
    Ok(())
}
