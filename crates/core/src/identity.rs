use sha2::{Digest, Sha256};

/// Identity material derived from a username/password pair.
///
/// The same credentials always derive the same UUID, which is how a user
/// rehydrates its identity across restarts. The UUID is not a secret.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DerivedIdentity {
    pub uuid: String,
    pub username_hash: String,
    pub password_hash: String,
}

impl DerivedIdentity {
    #[must_use]
    pub fn derive(username: &str, password: &str) -> Self {
        let mut uuid_hasher = Sha256::new();
        uuid_hasher.update(username.as_bytes());
        let username_hash = hex::encode(uuid_hasher.clone().finalize());
        uuid_hasher.update(password.as_bytes());

        Self {
            uuid: hex::encode(uuid_hasher.finalize()),
            username_hash,
            password_hash: hex::encode(Sha256::digest(password.as_bytes())),
        }
    }
}
