/// Network configuration
///
/// A JSON document names the validators (with their identities, optional
/// nonces and key material), the identity authority, the reader and the
/// protocol options. Loading it produces an immutable `Network` shared by
/// the submission and query services.

use consensus::crypto::bigint::{decimal, decimal_option};
use consensus::crypto::rsa::encode_message;
use consensus::crypto::{
    AggregationPolicy, Authority, HarnError, HashFunction, KeyError, KeyFile, RsaKeyPair, Signer,
};
use consensus::{ConsensusError, Coordinator};
use num_bigint::BigUint;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{info, warn};

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Cannot read config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Malformed config: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Key material for {node}: {source}")]
    Key {
        node: String,
        #[source]
        source: KeyError,
    },

    #[error("No key material found for validator {0}")]
    MissingKey(String),

    #[error("Invalid validator set: {0}")]
    ValidatorSet(#[from] ConsensusError),

    #[error("Invalid signer: {0}")]
    Signer(#[from] HarnError),

    #[error("{first} and {second} share an RSA modulus")]
    SharedModulus { first: String, second: String },

    #[error("Modulus of {node} has {bits} bits, at least {needed} are required")]
    ModulusTooSmall { node: String, bits: u64, needed: u64 },

    #[error("Unknown validator {0}")]
    UnknownNode(String),

    #[error("Signature of {0} does not verify under its own public key")]
    SelfVerificationFailed(String),
}

pub type Result<T> = std::result::Result<T, ConfigError>;

/// Where validator key files come from when not inlined
pub trait KeySource {
    /// `Ok(None)` when this source has no key for `node`
    fn load(&self, node: &str) -> std::result::Result<Option<KeyFile>, KeyError>;
}

/// Directory of `<node>.json` key files
#[derive(Clone, Debug)]
pub struct KeyDirectory {
    root: PathBuf,
}

impl KeyDirectory {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn path_for(&self, node: &str) -> PathBuf {
        self.root.join(format!("{}.json", node))
    }

    /// Validate a key file and rewrite it in the full {p, q, e, n, phi(n), d} shape
    pub fn normalize(&self, node: &str) -> Result<RsaKeyPair> {
        let path = self.path_for(node);
        let key_error = |source| ConfigError::Key {
            node: node.to_string(),
            source,
        };

        let file = KeyFile::read(&path).map_err(key_error)?;
        let pair = RsaKeyPair::from_key_file(&file).map_err(key_error)?;
        pair.to_key_file().write(&path).map_err(key_error)?;

        info!(node, path = %path.display(), bits = pair.bits(), "Key file normalized");
        Ok(pair)
    }
}

impl KeySource for KeyDirectory {
    fn load(&self, node: &str) -> std::result::Result<Option<KeyFile>, KeyError> {
        KeyFile::read(&self.path_for(node)).map(Some)
    }
}

impl KeySource for BTreeMap<String, KeyFile> {
    fn load(&self, node: &str) -> std::result::Result<Option<KeyFile>, KeyError> {
        Ok(self.get(node).cloned())
    }
}

/// How the agreed value is chosen among replicas
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValueSelection {
    /// Value held by the first validator that has the item
    FirstMatch,
    /// Most common value; ties go to the one seen first in validator order
    #[default]
    Majority,
}

/// Protocol options
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProtocolConfig {
    pub hash: HashFunction,
    pub aggregation: AggregationPolicy,
    pub value_selection: ValueSelection,
    /// Re-run the record consensus before answering a query
    pub consensus_gate: bool,
    /// Reuse extracted Harn secrets across queries
    pub cache_secrets: bool,
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        Self {
            hash: HashFunction::default(),
            aggregation: AggregationPolicy::default(),
            value_selection: ValueSelection::default(),
            consensus_gate: true,
            cache_secrets: true,
        }
    }
}

/// One validator entry
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidatorConfig {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<KeyFile>,
    #[serde(with = "decimal")]
    pub identity: BigUint,
    #[serde(default, with = "decimal_option", skip_serializing_if = "Option::is_none")]
    pub nonce: Option<BigUint>,
}

/// Network configuration document
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkConfig {
    pub validators: Vec<ValidatorConfig>,
    /// Directory holding `<node>.json` for validators without an inline key
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key_dir: Option<PathBuf>,
    pub authority: KeyFile,
    #[serde(default)]
    pub authority_version: u64,
    pub reader: KeyFile,
    #[serde(default)]
    pub protocol: ProtocolConfig,
}

impl NetworkConfig {
    /// Load from a JSON file; a relative `key_dir` is resolved against the file's directory
    pub fn load(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let mut config = Self::from_json(raw.strip_prefix('\u{feff}').unwrap_or(&raw))?;

        if let (Some(dir), Some(parent)) = (&config.key_dir, path.parent()) {
            if dir.is_relative() {
                config.key_dir = Some(parent.join(dir));
            }
        }
        Ok(config)
    }

    pub fn from_json(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }

    /// Build the network, reading missing keys from `key_dir`
    pub fn build(&self) -> Result<Network> {
        match &self.key_dir {
            Some(dir) => self.build_with(&KeyDirectory::new(dir)),
            None => self.build_with(&BTreeMap::<String, KeyFile>::new()),
        }
    }

    /// Build the network, reading missing keys from `keys`
    pub fn build_with(&self, keys: &dyn KeySource) -> Result<Network> {
        let names: Vec<String> = self.validators.iter().map(|v| v.name.clone()).collect();
        let coordinator = Coordinator::new(names)?;

        let authority_key = load_pair("authority", &self.authority)?;
        let authority = Authority::with_version(authority_key, self.authority_version);
        let reader = load_pair("reader", &self.reader)?;

        // Any u64 quantity must fit under the reader modulus
        let widest_quantity = encode_message(&u64::MAX.to_string()).bits();
        if reader.bits() <= widest_quantity {
            return Err(ConfigError::ModulusTooSmall {
                node: "reader".to_string(),
                bits: reader.bits(),
                needed: widest_quantity + 1,
            });
        }

        let digest_bits = self.protocol.hash.output_bits();
        let mut validators = Vec::with_capacity(self.validators.len());
        for entry in &self.validators {
            let file = match &entry.key {
                Some(file) => file.clone(),
                None => keys
                    .load(&entry.name)
                    .map_err(|source| ConfigError::Key {
                        node: entry.name.clone(),
                        source,
                    })?
                    .ok_or_else(|| ConfigError::MissingKey(entry.name.clone()))?,
            };
            let key = load_pair(&entry.name, &file)?;

            // Record digests are signed directly, so they must stay below n
            if key.bits() <= digest_bits {
                return Err(ConfigError::ModulusTooSmall {
                    node: entry.name.clone(),
                    bits: key.bits(),
                    needed: digest_bits + 1,
                });
            }

            let signer = match &entry.nonce {
                Some(nonce) => Signer::new(entry.name.clone(), entry.identity.clone(), nonce.clone()),
                None => {
                    warn!(node = %entry.name, "No nonce configured, drawing one at random");
                    Signer::with_random_nonce(entry.name.clone(), entry.identity.clone(), authority.modulus())
                }
            };
            authority.check_signer(&signer)?;

            validators.push(ValidatorNode {
                name: entry.name.clone(),
                key,
                signer,
            });
        }

        check_distinct_moduli(&validators, &authority, &reader)?;

        info!(
            validators = validators.len(),
            quorum = coordinator.quorum_size(),
            hash = ?self.protocol.hash,
            "Network loaded"
        );

        Ok(Network {
            validators,
            authority,
            reader,
            protocol: self.protocol.clone(),
            coordinator,
        })
    }
}

fn load_pair(node: &str, file: &KeyFile) -> Result<RsaKeyPair> {
    RsaKeyPair::from_key_file(file).map_err(|source| ConfigError::Key {
        node: node.to_string(),
        source,
    })
}

fn check_distinct_moduli(validators: &[ValidatorNode], authority: &Authority, reader: &RsaKeyPair) -> Result<()> {
    let mut seen: BTreeMap<&BigUint, &str> = BTreeMap::new();
    let roles = validators
        .iter()
        .map(|v| (v.name.as_str(), v.key.modulus()))
        .chain([("authority", authority.modulus()), ("reader", reader.modulus())]);

    for (role, modulus) in roles {
        if let Some(first) = seen.insert(modulus, role) {
            return Err(ConfigError::SharedModulus {
                first: first.to_string(),
                second: role.to_string(),
            });
        }
    }
    Ok(())
}

/// A validator with its loaded key and Harn signer
#[derive(Clone, Debug)]
pub struct ValidatorNode {
    pub name: String,
    pub key: RsaKeyPair,
    pub signer: Signer,
}

/// Immutable, validated network shared by all services
#[derive(Debug)]
pub struct Network {
    validators: Vec<ValidatorNode>,
    authority: Authority,
    reader: RsaKeyPair,
    protocol: ProtocolConfig,
    coordinator: Coordinator,
}

impl Network {
    pub fn validators(&self) -> &[ValidatorNode] {
        &self.validators
    }

    pub fn validator(&self, name: &str) -> Result<&ValidatorNode> {
        self.validators
            .iter()
            .find(|v| v.name == name)
            .ok_or_else(|| ConfigError::UnknownNode(name.to_string()))
    }

    pub fn validator_names(&self) -> Vec<String> {
        self.coordinator.validators().to_vec()
    }

    pub fn authority(&self) -> &Authority {
        &self.authority
    }

    pub fn reader(&self) -> &RsaKeyPair {
        &self.reader
    }

    pub fn protocol(&self) -> &ProtocolConfig {
        &self.protocol
    }

    pub fn coordinator(&self) -> &Coordinator {
        &self.coordinator
    }

    pub fn quorum_size(&self) -> usize {
        self.coordinator.quorum_size()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use testutil::fixtures;

    fn config(protocol: serde_json::Value) -> NetworkConfig {
        serde_json::from_value(fixtures::network_json(protocol)).unwrap()
    }

    #[test]
    fn test_default_network_loads() {
        let network = config(json!({})).build().unwrap();
        assert_eq!(network.validator_names(), fixtures::VALIDATORS.to_vec());
        assert_eq!(network.quorum_size(), 3);
        assert_eq!(network.protocol(), &ProtocolConfig::default());
        assert_eq!(network.validator("NodeC").unwrap().signer.nonce, BigUint::from(821u32));
        assert!(matches!(network.validator("NodeZ"), Err(ConfigError::UnknownNode(_))));
    }

    #[test]
    fn test_protocol_options_parse() {
        let network = config(json!({
            "hash": "blake3",
            "aggregation": "unconditional",
            "value_selection": "first_match",
            "consensus_gate": false
        }))
        .build()
        .unwrap();

        let protocol = network.protocol();
        assert_eq!(protocol.hash, HashFunction::Blake3);
        assert_eq!(protocol.aggregation, AggregationPolicy::Unconditional);
        assert_eq!(protocol.value_selection, ValueSelection::FirstMatch);
        assert!(!protocol.consensus_gate);
        assert!(protocol.cache_secrets);
    }

    #[test]
    fn test_missing_nonce_is_drawn() {
        let mut cfg = config(json!({}));
        cfg.validators[1].nonce = None;
        let network = cfg.build().unwrap();
        let nonce = &network.validators()[1].signer.nonce;
        assert!(*nonce > BigUint::from(1u32));
        assert!(nonce < network.authority().modulus());
    }

    #[test]
    fn test_duplicate_validator_is_rejected() {
        let mut cfg = config(json!({}));
        cfg.validators[3].name = "NodeA".to_string();
        assert!(matches!(cfg.build(), Err(ConfigError::ValidatorSet(_))));
    }

    #[test]
    fn test_small_validator_modulus_is_rejected() {
        let mut cfg = config(json!({}));
        cfg.validators[0].key = Some(KeyFile::from_primes(
            BigUint::from(61u32),
            BigUint::from(53u32),
            BigUint::from(17u32),
        ));
        assert!(matches!(
            cfg.build(),
            Err(ConfigError::ModulusTooSmall { ref node, .. }) if node == "NodeA"
        ));
    }

    #[test]
    fn test_modulus_floor_follows_selected_digest() {
        // 200-bit modulus: wide enough for MD5 digests, too narrow for SHA-256
        let narrow = KeyFile::from_primes(
            "1155587265460919309098822660847".parse::<BigUint>().unwrap(),
            "1144782567404347824212535212519".parse::<BigUint>().unwrap(),
            BigUint::from(65537u32),
        );

        let mut cfg = config(json!({}));
        cfg.validators[0].key = Some(narrow.clone());
        assert!(matches!(
            cfg.build(),
            Err(ConfigError::ModulusTooSmall { bits: 200, needed: 257, .. })
        ));

        let mut cfg = config(json!({ "hash": "md5" }));
        cfg.validators[0].key = Some(narrow);
        let network = cfg.build().unwrap();
        assert_eq!(network.protocol().hash, HashFunction::Md5);
        assert_eq!(network.validator("NodeA").unwrap().key.bits(), 200);
    }

    #[test]
    fn test_shared_modulus_is_rejected() {
        let mut cfg = config(json!({}));
        cfg.validators[2].key = cfg.validators[1].key.clone();
        assert!(matches!(
            cfg.build(),
            Err(ConfigError::SharedModulus { ref first, ref second }) if first == "NodeB" && second == "NodeC"
        ));
    }

    #[test]
    fn test_identity_outside_authority_range_is_rejected() {
        let mut cfg = config(json!({}));
        cfg.validators[0].identity = BigUint::from(0u32);
        assert!(matches!(cfg.build(), Err(ConfigError::Signer(_))));
    }

    #[test]
    fn test_missing_key_without_directory() {
        let mut cfg = config(json!({}));
        cfg.validators[0].key = None;
        assert!(matches!(cfg.build(), Err(ConfigError::MissingKey(ref n)) if n == "NodeA"));
    }

    #[test]
    fn test_key_directory_loads_and_normalizes() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join("NodeA.json"),
            fixtures::validator_key_json(0).to_string(),
        )
        .unwrap();

        let mut cfg = config(json!({}));
        cfg.validators[0].key = None;
        cfg.key_dir = Some(dir.path().to_path_buf());
        let network = cfg.build().unwrap();
        let loaded = network.validator("NodeA").unwrap().key.clone();

        let keys = KeyDirectory::new(dir.path());
        let normalized = keys.normalize("NodeA").unwrap();
        assert_eq!(normalized, loaded);

        let full = KeyFile::read(&keys.path_for("NodeA")).unwrap();
        assert_eq!(full.d.as_ref(), Some(loaded.private_exponent()));
        assert_eq!(full.n.as_ref(), Some(loaded.modulus()));
    }

    #[test]
    fn test_load_resolves_relative_key_dir() {
        let dir = tempfile::tempdir().unwrap();
        let mut doc = fixtures::default_network_json();
        doc["key_dir"] = json!("keys");
        let path = dir.path().join("network.json");
        fs::write(&path, doc.to_string()).unwrap();

        let cfg = NetworkConfig::load(&path).unwrap();
        assert_eq!(cfg.key_dir, Some(dir.path().join("keys")));
    }
}
