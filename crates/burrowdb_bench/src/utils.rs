//! Benchmark utilities.

use burrowdb_core::{DbConfig, EnvConfig, Environment, InsertFlags, KeyType};
use rand::seq::SliceRandom;
use rand::Rng;

/// Generate random record data of the specified size.
pub fn random_data(size: usize) -> Vec<u8> {
    let mut rng = rand::thread_rng();
    (0..size).map(|_| rng.gen()).collect()
}

/// Generate `count` distinct big-endian keys in random order.
pub fn shuffled_keys(count: u64) -> Vec<[u8; 8]> {
    let mut keys: Vec<[u8; 8]> = (0..count).map(u64::to_be_bytes).collect();
    keys.shuffle(&mut rand::thread_rng());
    keys
}

/// An in-memory environment holding `count` `UInt64` keys in database 1.
pub fn populated_env(count: u64, record_size: usize) -> Environment {
    let env = Environment::create_in_memory(EnvConfig::new().cache_unlimited(true)).unwrap();
    let db = env
        .create_db(1, DbConfig::new().key_type(KeyType::UInt64))
        .unwrap();
    let record = random_data(record_size);
    for i in 0..count {
        db.insert(None, &i.to_le_bytes(), &record, InsertFlags::NONE)
            .unwrap();
    }
    env
}
