use std::hash::RandomState;

use clap::Parser;
use cow_hash::HashMap;

#[derive(Parser, Debug)]
struct Args {
    #[arg(short = 'c', long = "target_capacity", default_value_t = 1000)]
    target_capacity: usize,
}

fn main() {
    let args = Args::parse();

    println!(
        "Creating HashMap with target capacity: {}",
        args.target_capacity
    );

    let mut map: HashMap<u64, u64, RandomState> = HashMap::with_capacity(args.target_capacity);

    println!("Actual capacity: {}", map.capacity());
    println!("Filling map with u64 keys...");

    let num_values = map.capacity() as u64;
    for key in 0..num_values {
        if map.insert(key, key * 2).is_some() {
            panic!("Key already exists in map: {}", key);
        }
    }

    println!("Inserted {} entries into map", map.len());
    println!(
        "Final load factor: {:.2}%",
        (map.len() as f64 / map.capacity() as f64) * 100.0
    );

    map.print_probe_histogram();
    map.debug_stats().print();

    let mut snapshot = map.clone();
    println!(
        "Snapshot shares storage before writing: {}",
        snapshot.shares_storage_with(&map)
    );
    snapshot.debug_stats().print();

    snapshot.remove(&0);
    println!(
        "Snapshot shares storage after removing one key: {}",
        snapshot.shares_storage_with(&map)
    );
    println!(
        "Original still holds {} entries, snapshot holds {}",
        map.len(),
        snapshot.len()
    );
    snapshot.debug_stats().print();
}
