/// Test data generators

use proptest::prelude::*;
use rand::Rng;

/// Generate random bytes
pub fn random_bytes(len: usize) -> Vec<u8> {
    let mut rng = rand::thread_rng();
    (0..len).map(|_| rng.gen()).collect()
}

/// Generate a random zero-padded item id such as "042"
pub fn random_item_id() -> String {
    let mut rng = rand::thread_rng();
    format!("{:03}", rng.gen_range(1..1000))
}

/// Generate a random stock quantity
pub fn random_quantity() -> u64 {
    rand::thread_rng().gen_range(1..10_000)
}

/// Any quantity; its decimal text fits below every fixture modulus
pub fn quantity_strategy() -> impl Strategy<Value = u64> {
    0u64..=u64::MAX
}

/// Small nonces and identities (the Harn scheme only needs 0 < x < n)
pub fn scalar_strategy() -> impl Strategy<Value = u64> {
    2u64..1_000_000_000
}
