use super::expression::{Group, Node};
use crate::attribute::Registry;

/// Reorders every group so that cheap tests run before expensive ones. The
/// sort is stable, so equally expensive children keep their order and the
/// result of the tree never changes.
pub fn optimize(group: &mut Group, registry: &Registry) {
    for child in &mut group.children {
        if let Node::Group(nested) = child {
            optimize(nested, registry);
        }
    }
    group
        .children
        .sort_by_cached_key(|child| cost(child, registry));
}

fn cost(node: &Node, registry: &Registry) -> u32 {
    match node {
        Node::Test(test) => registry.speed(test.attribute()).cost(),
        Node::Group(group) => group
            .children
            .iter()
            .map(|child| cost(child, registry))
            .sum(),
    }
}
