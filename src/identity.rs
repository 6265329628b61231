use sha2::{Digest, Sha256};
use uuid::Uuid;

/// Produces stable identifiers for entities (teams, players) so reruns over
/// the same input yield identical records.
pub trait IdGenerator: Send + Sync {
    fn generate_id(&self, seed_text: &str) -> String;
}

/// UUIDv5 ids under a namespace derived from a fixed label.
#[derive(Debug, Clone)]
pub struct Uuid5IdGenerator {
    namespace: Uuid,
}

impl Uuid5IdGenerator {
    pub fn new(namespace_label: &str) -> Self {
        Self {
            namespace: Uuid::new_v5(&Uuid::NAMESPACE_OID, namespace_label.as_bytes()),
        }
    }
}

impl IdGenerator for Uuid5IdGenerator {
    fn generate_id(&self, seed_text: &str) -> String {
        Uuid::new_v5(&self.namespace, seed_text.as_bytes()).to_string()
    }
}

/// Hex SHA-256 of `bytes`, used for record fingerprints.
pub fn fingerprint(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}
