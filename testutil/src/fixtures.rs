/// Fixed four-node network used across the test suites
///
/// Validator primes are 140-bit so every modulus is wider than a 256-bit
/// record digest. Authority and reader primes are 150-bit.

use serde_json::{json, Value};

pub const VALIDATORS: [&str; 4] = ["NodeA", "NodeB", "NodeC", "NodeD"];

/// (p, q) per validator, in `VALIDATORS` order
pub const VALIDATOR_PRIMES: [(&str, &str); 4] = [
    (
        "958013856635145294289316470636212967484107",
        "836716600205237460929663107975709684628631",
    ),
    (
        "1251706933060467821580960225219645872570297",
        "744912059669725608519652071608103426426119",
    ),
    (
        "1139011452438076807548693537402608045676277",
        "742822938725816303406130483051118542796177",
    ),
    (
        "737832879121676923208275173463612392367099",
        "811125802019830430883450387121503211131973",
    ),
];

pub const VALIDATOR_EXPONENT: &str = "65537";

pub const AUTHORITY_P: &str = "1004162036461488639338597000466705179253226703";
pub const AUTHORITY_Q: &str = "950133741151267522116252385927940618264103623";
pub const AUTHORITY_E: &str = "973028207197278907211";

pub const READER_P: &str = "1080954735722463992988394149602856332100628417";
pub const READER_Q: &str = "1158106283320086444890911863299879973542293243";
pub const READER_E: &str = "106506253943651610547613";

/// Public identity integers per validator
pub const IDENTITIES: [u64; 4] = [126, 127, 128, 129];

/// Secret nonces per validator
pub const NONCES: [u64; 4] = [621, 721, 821, 921];

/// Key file in the short {p, q, e} shape
pub fn validator_key_json(index: usize) -> Value {
    let (p, q) = VALIDATOR_PRIMES[index];
    json!({ "p": p, "q": q, "e": VALIDATOR_EXPONENT })
}

/// Network description with inline keys for all four validators
pub fn network_json(protocol: Value) -> Value {
    let validators: Vec<Value> = VALIDATORS
        .iter()
        .enumerate()
        .map(|(i, name)| {
            json!({
                "name": name,
                "key": validator_key_json(i),
                "identity": IDENTITIES[i].to_string(),
                "nonce": NONCES[i].to_string(),
            })
        })
        .collect();

    json!({
        "validators": validators,
        "authority": { "p": AUTHORITY_P, "q": AUTHORITY_Q, "e": AUTHORITY_E },
        "reader": { "p": READER_P, "q": READER_Q, "e": READER_E },
        "protocol": protocol,
    })
}

/// Network description with default protocol options
pub fn default_network_json() -> Value {
    network_json(json!({}))
}
