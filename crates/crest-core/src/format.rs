//! Human-readable rendering of specification nodes.
//!
//! Formats a node's cached resolution order as a flat connector list and its
//! bases as a recursive ASCII tree:
//! ```text
//! ClassCapabilities(Critter)
//! ├── ISwimmer (zoo.water)
//! ├── IAnimal (zoo.base)
//! └── Any (crest.core)
//! ```

use crate::error::Result;
use crate::graph::SpecGraph;
use crate::handle::SpecId;

/// One display line for a node: `Name (module)` for capability sets, the
/// bare label for plain composition nodes.
fn display_name(graph: &SpecGraph, id: SpecId) -> Result<String> {
    Ok(match graph.capability_identity(id)? {
        Some((name, module)) => format!("{name} ({module})"),
        None => graph.label(id)?.to_string(),
    })
}

/// Format a node's resolution order, most specific first.
pub fn format_resolution_order(graph: &SpecGraph, id: SpecId) -> Result<String> {
    let mut out = format!("{}\n", display_name(graph, id)?);
    let order: Vec<SpecId> = graph
        .resolution_order(id)?
        .iter()
        .copied()
        .filter(|member| *member != id)
        .collect();

    let count = order.len();
    for (i, member) in order.iter().enumerate() {
        let connector = if i == count - 1 { "└── " } else { "├── " };
        out.push_str(&format!("{connector}{}\n", display_name(graph, *member)?));
    }
    out.push_str(&format!("\n{count} capability sets implied\n"));
    Ok(out)
}

/// Format a node's bases as a recursive tree.
pub fn format_bases_tree(graph: &SpecGraph, id: SpecId) -> Result<String> {
    let mut out = format!("{}\n", display_name(graph, id)?);
    let bases = graph.bases(id)?.to_vec();
    let count = bases.len();
    for (i, base) in bases.iter().enumerate() {
        format_base(graph, &mut out, *base, "", i == count - 1)?;
    }
    Ok(out)
}

/// Recursively format one base entry.
fn format_base(
    graph: &SpecGraph,
    out: &mut String,
    id: SpecId,
    prefix: &str,
    is_last: bool,
) -> Result<()> {
    let connector = if is_last { "└── " } else { "├── " };
    out.push_str(&format!("{prefix}{connector}{}\n", display_name(graph, id)?));

    let child_prefix = if is_last {
        format!("{prefix}    ")
    } else {
        format!("{prefix}│   ")
    };

    let bases = graph.bases(id)?.to_vec();
    let count = bases.len();
    for (i, base) in bases.iter().enumerate() {
        format_base(graph, out, *base, &child_prefix, i == count - 1)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capability::CapabilityDef;

    #[test]
    fn order_listing_names_capabilities_with_modules() {
        let mut graph = SpecGraph::new();
        let animal = graph
            .create_capability(CapabilityDef::new("IAnimal", "zoo.base"))
            .unwrap();
        let swimmer = graph
            .create_capability(CapabilityDef::new("ISwimmer", "zoo.water").with_base(animal))
            .unwrap();
        let node = graph.create_composition("Critter", &[swimmer]).unwrap();

        let output = format_resolution_order(&graph, node).unwrap();
        assert!(output.starts_with("Critter\n"));
        assert!(output.contains("├── ISwimmer (zoo.water)"));
        assert!(output.contains("├── IAnimal (zoo.base)"));
        assert!(output.contains("└── Any (crest.core)"));
        assert!(output.contains("3 capability sets implied"));
    }

    #[test]
    fn capability_order_excludes_itself_from_the_listing() {
        let mut graph = SpecGraph::new();
        let x = graph
            .create_capability(CapabilityDef::new("X", "test"))
            .unwrap();
        let output = format_resolution_order(&graph, x).unwrap();
        assert!(output.starts_with("X (test)\n"));
        assert!(output.contains("└── Any (crest.core)"));
        assert!(!output.contains("├── X"));
    }

    #[test]
    fn bases_tree_nests() {
        let mut graph = SpecGraph::new();
        let a = graph
            .create_capability(CapabilityDef::new("A", "test"))
            .unwrap();
        let b = graph
            .create_capability(CapabilityDef::new("B", "test").with_base(a))
            .unwrap();
        let node = graph.create_composition("node", &[b]).unwrap();

        let output = format_bases_tree(&graph, node).unwrap();
        assert!(output.contains("└── B (test)"));
        assert!(output.contains("    └── A (test)"));
    }
}
