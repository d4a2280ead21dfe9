//! Benchmark utilities.

use rand::distributions::Alphanumeric;
use rand::Rng;

/// Generate a random text line of the specified length.
pub fn random_line(len: usize) -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(len)
        .map(char::from)
        .collect()
}

/// Generate `count` destination keys named `key0`, `key1`, ...
pub fn generate_keys(count: usize) -> Vec<String> {
    (0..count).map(|i| format!("key{i}")).collect()
}

/// Generate a key sequence of `len` picks from `keys`, uniformly at random.
pub fn random_key_order(keys: &[String], len: usize) -> Vec<String> {
    let mut rng = rand::thread_rng();
    (0..len)
        .map(|_| keys[rng.gen_range(0..keys.len())].clone())
        .collect()
}
