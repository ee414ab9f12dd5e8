use keyscope::trie::TrieNode;
use keyscope::{KeyName, KeyPath, Trie};
use proptest::prelude::*;
use std::collections::BTreeSet;

#[derive(Debug, Clone)]
enum Operation {
    Insert(String),
    Remove(String),
}

fn arb_name() -> impl Strategy<Value = String> {
    prop_oneof![
        "[abc]{1,2}(:[abc]{1,2}){0,3}",
        "[abc]{0,2}(:{1,2}[abc]{0,2}){0,2}",
        Just(String::new()),
        Just(":".to_string()),
    ]
}

fn arb_operation() -> impl Strategy<Value = Operation> {
    prop_oneof![
        3 => arb_name().prop_map(Operation::Insert),
        1 => arb_name().prop_map(Operation::Remove),
    ]
}

fn apply(trie: &mut Trie, model: &mut BTreeSet<String>, op: &Operation) {
    match op {
        Operation::Insert(name) => {
            trie.insert(&KeyName::from(name.as_str()));
            model.insert(name.clone());
        }
        Operation::Remove(name) => {
            let removed = trie.remove(&KeyName::from(name.as_str()));
            assert_eq!(removed, model.remove(name));
        }
    }
}

proptest! {
    #[test]
    fn root_count_matches_distinct_names(ops in prop::collection::vec(arb_operation(), 1..120)) {
        let mut trie = Trie::new(":");
        let mut model = BTreeSet::new();
        for op in &ops {
            apply(&mut trie, &mut model, op);
        }
        prop_assert_eq!(trie.len(), model.len() as u64);
        prop_assert_eq!(trie.root().count(), model.len() as u64);
        let mut indexed: Vec<String> = trie.keys().iter().map(|k| k.as_str().to_string()).collect();
        indexed.sort();
        prop_assert_eq!(indexed, model.iter().cloned().collect::<Vec<_>>());
    }

    #[test]
    fn prefix_counts_cover_their_subtree(names in prop::collection::vec(arb_name(), 1..60)) {
        let mut trie = Trie::new(":");
        for name in &names {
            trie.insert(&KeyName::from(name.as_str()));
        }
        let distinct: BTreeSet<&String> = names.iter().collect();
        let paths: Vec<KeyPath> = distinct
            .iter()
            .map(|name| KeyPath::of(&KeyName::from(name.as_str()), ":"))
            .collect();
        for path in &paths {
            for depth in 0..=path.depth() {
                let prefix = path.truncated(depth);
                let expected = paths.iter().filter(|p| p.starts_with(&prefix)).count() as u64;
                let node = trie.node(&prefix).expect("prefix node exists");
                prop_assert_eq!(node.count(), expected, "prefix {:?}", prefix);
            }
        }
    }

    #[test]
    fn inserting_twice_equals_inserting_once(names in prop::collection::vec(arb_name(), 1..60)) {
        let mut once = Trie::new(":");
        let mut twice = Trie::new(":");
        for name in &names {
            let key = KeyName::from(name.as_str());
            once.insert(&key);
            twice.insert(&key);
            twice.insert(&key);
        }
        prop_assert_eq!(once.root(), twice.root());
        prop_assert_eq!(once.node_count(), twice.node_count());
    }

    #[test]
    fn removing_everything_leaves_an_empty_root(ops in prop::collection::vec(arb_operation(), 1..120)) {
        let mut trie = Trie::new(":");
        let mut model = BTreeSet::new();
        for op in &ops {
            apply(&mut trie, &mut model, op);
        }
        for name in &model {
            prop_assert!(trie.remove(&KeyName::from(name.as_str())));
        }
        prop_assert!(trie.is_empty());
        prop_assert_eq!(trie.root(), &TrieNode::default());
        prop_assert_eq!(trie.node_count(), 1);
    }
}
