// HashMap property tests against std::collections::HashMap.
//
// Property 1: a single map behaves like the model under any sequence of
//   insert/set/remove/remove_at/clear/reserve/shrink/merge.
// Property 2: copy-on-write isolation. Snapshots taken at arbitrary points
//   and then mutated independently each keep matching their own model, and
//   mutating one never shows through another.
// Property 3: the bulk operators agree with their obvious model versions.
use std::collections::HashMap as Model;
use std::collections::HashSet;
use std::hash::RandomState;

use cow_hash::HashMap;
use proptest::prelude::*;

type Map = HashMap<u16, u32, RandomState>;

#[derive(Clone, Debug)]
enum Op {
    Insert(u16, u32),
    Set(u16, u32),
    Remove(u16),
    RemoveAt(u16),
    Clear,
    Reserve(u8),
    Shrink,
    Merge(Vec<(u16, u32)>),
}

fn op() -> impl Strategy<Value = Op> {
    let key = 0u16..64;
    prop_oneof![
        6 => (key.clone(), any::<u32>()).prop_map(|(k, v)| Op::Insert(k, v)),
        2 => (key.clone(), any::<u32>()).prop_map(|(k, v)| Op::Set(k, v)),
        4 => key.clone().prop_map(Op::Remove),
        2 => key.clone().prop_map(Op::RemoveAt),
        1 => Just(Op::Clear),
        1 => any::<u8>().prop_map(Op::Reserve),
        1 => Just(Op::Shrink),
        1 => proptest::collection::vec((key, 0u32..1000), 0..8).prop_map(Op::Merge),
    ]
}

fn apply(map: &mut Map, model: &mut Model<u16, u32>, op: &Op) {
    match op {
        Op::Insert(k, v) => assert_eq!(map.insert(*k, *v), model.insert(*k, *v)),
        Op::Set(k, v) => {
            map.set(*k, *v);
            model.insert(*k, *v);
        }
        Op::Remove(k) => assert_eq!(map.remove(k), model.remove(k)),
        Op::RemoveAt(k) => match map.index_of(k) {
            Some(index) => {
                let (key, value) = map.remove_at(index);
                assert_eq!(key, *k);
                assert_eq!(Some(value), model.remove(k));
            }
            None => assert!(!model.contains_key(k)),
        },
        Op::Clear => {
            map.clear();
            model.clear();
        }
        Op::Reserve(n) => {
            map.reserve(*n as usize);
            assert!(map.capacity() >= map.len() + *n as usize);
        }
        Op::Shrink => map.shrink_to_fit(),
        Op::Merge(pairs) => {
            map.merge(pairs.iter().copied(), |a, b| a.wrapping_add(b));
            for &(k, v) in pairs {
                model
                    .entry(k)
                    .and_modify(|existing| *existing = existing.wrapping_add(v))
                    .or_insert(v);
            }
        }
    }
}

fn check(map: &Map, model: &Model<u16, u32>) -> Result<(), TestCaseError> {
    prop_assert_eq!(map.len(), model.len());
    prop_assert!(map.capacity() >= map.len());
    for (k, v) in model {
        prop_assert_eq!(map.get(k), Some(v));
    }
    let mut seen = 0;
    for (k, v) in map.iter() {
        prop_assert_eq!(model.get(k), Some(v));
        seen += 1;
    }
    prop_assert_eq!(seen, model.len());
    Ok(())
}

proptest! {
    #[test]
    fn prop_matches_std_model(ops in proptest::collection::vec(op(), 1..200)) {
        let mut map = Map::default();
        let mut model = Model::new();
        for op in &ops {
            apply(&mut map, &mut model, op);
            check(&map, &model)?;
        }
    }

    #[test]
    fn prop_snapshots_are_isolated(
        ops in proptest::collection::vec((op(), 0usize..4, any::<bool>()), 1..150)
    ) {
        // Each step applies `op` to one of the live maps, and optionally
        // first forks that map into a new snapshot.
        let mut maps = vec![(Map::default(), Model::new())];
        for (op, target, fork) in &ops {
            let target = target % maps.len();
            if *fork && maps.len() < 6 {
                let (map, model) = &maps[target];
                let fork = (map.clone(), model.clone());
                prop_assert!(fork.0.shares_storage_with(map));
                maps.push(fork);
            }
            let (map, model) = &mut maps[target];
            apply(map, model, op);
            for (map, model) in &maps {
                check(map, model)?;
            }
        }
    }

    #[test]
    fn prop_bulk_operators(pairs in proptest::collection::vec((0u16..128, any::<u32>()), 0..200)) {
        let map: Map = pairs.iter().copied().collect();
        let model: Model<u16, u32> = pairs.iter().copied().collect();
        check(&map, &model)?;

        let halved = map.map_values(|v| v / 2);
        prop_assert_eq!(halved.len(), model.len());
        for (k, v) in &model {
            prop_assert_eq!(halved.get(k), Some(&(v / 2)));
        }

        let even = map.filter(|_, v| v % 2 == 0);
        prop_assert_eq!(even.len(), model.values().filter(|v| *v % 2 == 0).count());

        let compacted = map.compact_map_values(|v| (v % 3 == 0).then_some(*v as u64));
        prop_assert_eq!(compacted.len(), model.values().filter(|v| *v % 3 == 0).count());

        let groups: HashMap<u16, Vec<u16>, RandomState> =
            HashMap::grouping(model.keys().copied(), |k| k % 7);
        prop_assert_eq!(groups.values().map(Vec::len).sum::<usize>(), model.len());
        for (remainder, group) in groups.iter() {
            prop_assert!(group.iter().all(|k| k % 7 == *remainder));
        }

        let mut drained: Vec<(u16, u32)> = map.clone().into_iter().collect();
        drained.sort_unstable();
        let mut expected: Vec<(u16, u32)> = model.into_iter().collect();
        expected.sort_unstable();
        prop_assert_eq!(drained, expected);
        let distinct: HashSet<u16> = pairs.iter().map(|&(k, _)| k).collect();
        prop_assert_eq!(map.len(), distinct.len());
    }
}
