use std::collections::{HashMap, HashSet};

use arda_shell::api_client::reorder_items;
use arda_shell::MenuNode;
use proptest::prelude::*;

/// Trees with unique ids assigned after generation.
fn arb_shape() -> impl Strategy<Value = Vec<MenuNode>> {
    let leaf = "[A-Z][a-z]{2,8}".prop_map(|label| MenuNode {
        id: 0,
        parent_id: None,
        order: 0,
        label,
        path: None,
        roles: Vec::new(),
        children: Vec::new(),
    });
    let node = leaf.prop_recursive(3, 24, 4, |inner| {
        ("[A-Z][a-z]{2,8}", prop::collection::vec(inner, 0..4)).prop_map(|(label, children)| MenuNode {
            id: 0,
            parent_id: None,
            order: 0,
            label,
            path: None,
            roles: Vec::new(),
            children,
        })
    });
    prop::collection::vec(node, 0..5).prop_map(|mut tree| {
        fn number(nodes: &mut [MenuNode], next: &mut i64) {
            for node in nodes {
                *next += 1;
                node.id = *next;
                number(&mut node.children, next);
            }
        }
        let mut next = 0;
        number(&mut tree, &mut next);
        tree
    })
}

fn count(nodes: &[MenuNode]) -> usize {
    nodes.iter().map(|n| 1 + count(&n.children)).sum()
}

proptest! {
    // ========================================================================
    // Property: every node is placed exactly once, siblings ordered 0..n
    // ========================================================================
    #[test]
    fn reorder_items_place_every_node_once(tree in arb_shape()) {
        let items = reorder_items(&tree);
        prop_assert_eq!(items.len(), count(&tree));

        let ids: HashSet<i64> = items.iter().map(|i| i.id).collect();
        prop_assert_eq!(ids.len(), items.len());

        let mut by_parent: HashMap<Option<i64>, Vec<i64>> = HashMap::new();
        for item in &items {
            if let Some(parent) = item.parent_id {
                prop_assert!(ids.contains(&parent));
            }
            by_parent.entry(item.parent_id).or_default().push(item.order);
        }
        for orders in by_parent.values() {
            let expected: Vec<i64> = (0..orders.len() as i64).collect();
            prop_assert_eq!(orders, &expected);
        }
    }
}
