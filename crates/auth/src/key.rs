//! API key issuance, keyed hashing, and usability rules.
//!
//! Only `HMAC-SHA256(server_secret, raw_key)` and a short display prefix are
//! stored. The raw key exists in memory exactly once, in the [`GeneratedKey`]
//! handed back at creation.

use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use rand::RngCore;
use serde::Serialize;
use sha2::Sha256;

use genflow_core::{ApiKeyId, ApiUserId, Entity, TenantId};

use crate::scope::Scope;

type HmacSha256 = Hmac<Sha256>;

/// Marker at the start of every issued key.
pub const KEY_PREFIX: &str = "gf_live_";

const SECRET_BYTES: usize = 32;
const DISPLAY_CHARS: usize = 8;

/// Secret-keyed hash for API keys.
#[derive(Clone)]
pub struct KeyHasher {
    secret: Vec<u8>,
}

impl core::fmt::Debug for KeyHasher {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("KeyHasher").field("secret", &"<redacted>").finish()
    }
}

impl KeyHasher {
    pub fn new(secret: impl AsRef<[u8]>) -> Self {
        Self {
            secret: secret.as_ref().to_vec(),
        }
    }

    /// Lowercase hex HMAC-SHA256 of `raw`.
    pub fn hash(&self, raw: &str) -> String {
        // HMAC accepts keys of any length, including empty.
        let mut mac = match HmacSha256::new_from_slice(&self.secret) {
            Ok(mac) => mac,
            Err(_) => unreachable!("hmac keys have no length limit"),
        };
        mac.update(raw.as_bytes());
        hex::encode(mac.finalize().into_bytes())
    }
}

/// Output of key generation. `raw` must be shown to the caller once and dropped.
#[derive(Clone)]
pub struct GeneratedKey {
    pub raw: String,
    pub prefix: String,
    pub hash: String,
}

impl core::fmt::Debug for GeneratedKey {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("GeneratedKey")
            .field("prefix", &self.prefix)
            .field("hash", &self.hash)
            .finish_non_exhaustive()
    }
}

/// Generate `gf_live_` + 64 hex chars of CSPRNG output.
pub fn generate_api_key(hasher: &KeyHasher) -> GeneratedKey {
    let mut bytes = [0u8; SECRET_BYTES];
    rand::rng().fill_bytes(&mut bytes);

    let raw = format!("{KEY_PREFIX}{}", hex::encode(bytes));
    let prefix = raw[..KEY_PREFIX.len() + DISPLAY_CHARS].to_string();
    let hash = hasher.hash(&raw);

    GeneratedKey { raw, prefix, hash }
}

/// Why a presented key was refused. Recorded in the audit log only.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyRejection {
    NotFound,
    Inactive,
    Expired,
    Revoked,
    UserInactive,
}

impl KeyRejection {
    pub fn as_str(&self) -> &'static str {
        match self {
            KeyRejection::NotFound => "not_found",
            KeyRejection::Inactive => "inactive",
            KeyRejection::Expired => "expired",
            KeyRejection::Revoked => "revoked",
            KeyRejection::UserInactive => "user_inactive",
        }
    }
}

/// A scoped key owned by one API user.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiKey {
    pub id: ApiKeyId,
    pub tenant_id: TenantId,
    pub api_user_id: ApiUserId,
    pub name: String,
    #[serde(skip)]
    pub key_hash: String,
    pub prefix: String,
    pub scopes: Vec<Scope>,
    pub active: bool,
    pub expires_at: Option<DateTime<Utc>>,
    pub revoked_at: Option<DateTime<Utc>>,
    pub usage_count: u64,
    pub last_used_at: Option<DateTime<Utc>>,
    pub last_used_ip: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl ApiKey {
    pub fn issue(
        tenant_id: TenantId,
        api_user_id: ApiUserId,
        name: impl Into<String>,
        scopes: Vec<Scope>,
        expires_at: Option<DateTime<Utc>>,
        generated: &GeneratedKey,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: ApiKeyId::new(),
            tenant_id,
            api_user_id,
            name: name.into(),
            key_hash: generated.hash.clone(),
            prefix: generated.prefix.clone(),
            scopes,
            active: true,
            expires_at,
            revoked_at: None,
            usage_count: 0,
            last_used_at: None,
            last_used_ip: None,
            created_at: now,
        }
    }

    /// Usable iff active, not expired and not revoked.
    pub fn check_usable(&self, now: DateTime<Utc>) -> Result<(), KeyRejection> {
        if self.revoked_at.is_some() {
            return Err(KeyRejection::Revoked);
        }
        if !self.active {
            return Err(KeyRejection::Inactive);
        }
        match self.expires_at {
            Some(exp) if exp <= now => Err(KeyRejection::Expired),
            _ => Ok(()),
        }
    }

    /// Revoke permanently. Returns `false` if the key was already revoked;
    /// the first revocation timestamp is kept.
    pub fn revoke(&mut self, now: DateTime<Utc>) -> bool {
        self.active = false;
        if self.revoked_at.is_some() {
            return false;
        }
        self.revoked_at = Some(now);
        true
    }

    pub fn record_use(&mut self, now: DateTime<Utc>, ip: Option<&str>) {
        self.usage_count += 1;
        self.last_used_at = Some(now);
        if let Some(ip) = ip {
            self.last_used_ip = Some(ip.to_string());
        }
    }
}

impl Entity for ApiKey {
    type Id = ApiKeyId;

    fn id(&self) -> &Self::Id {
        &self.id
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use proptest::prelude::*;

    fn hasher() -> KeyHasher {
        KeyHasher::new("test-secret")
    }

    fn issue(expires_at: Option<DateTime<Utc>>) -> (ApiKey, GeneratedKey) {
        let generated = generate_api_key(&hasher());
        let key = ApiKey::issue(
            TenantId::new(),
            ApiUserId::new(),
            "ci",
            vec![Scope::READ],
            expires_at,
            &generated,
            Utc::now(),
        );
        (key, generated)
    }

    #[test]
    fn generated_key_shape() {
        let g = generate_api_key(&hasher());
        assert!(g.raw.starts_with(KEY_PREFIX));
        assert_eq!(g.raw.len(), KEY_PREFIX.len() + SECRET_BYTES * 2);
        assert!(g.raw.starts_with(&g.prefix));
        assert_eq!(g.prefix.len(), KEY_PREFIX.len() + DISPLAY_CHARS);
        assert_eq!(g.hash.len(), 64);
        assert!(!g.hash.contains(&g.raw[KEY_PREFIX.len()..]));
    }

    #[test]
    fn debug_output_never_contains_raw_key() {
        let g = generate_api_key(&hasher());
        assert!(!format!("{g:?}").contains(&g.raw));
        assert!(!format!("{:?}", hasher()).contains("test-secret"));
    }

    #[test]
    fn hash_is_deterministic_and_keyed() {
        let g = generate_api_key(&hasher());
        assert_eq!(hasher().hash(&g.raw), g.hash);
        assert_ne!(KeyHasher::new("other-secret").hash(&g.raw), g.hash);
    }

    #[test]
    fn stored_key_never_holds_raw_secret() {
        let (key, generated) = issue(None);
        assert_eq!(key.key_hash, generated.hash);
        assert_ne!(key.key_hash, generated.raw);
        let json = serde_json::to_string(&key).unwrap();
        assert!(!json.contains(&generated.hash));
        assert!(!json.contains(&generated.raw));
    }

    #[test]
    fn usability_rules() {
        let now = Utc::now();
        let (key, _) = issue(None);
        assert!(key.check_usable(now).is_ok());

        let (key, _) = issue(Some(now - Duration::seconds(1)));
        assert_eq!(key.check_usable(now), Err(KeyRejection::Expired));

        let (mut key, _) = issue(None);
        key.active = false;
        assert_eq!(key.check_usable(now), Err(KeyRejection::Inactive));
    }

    #[test]
    fn revocation_is_permanent_and_keeps_first_timestamp() {
        let t0 = Utc::now();
        let (mut key, _) = issue(None);
        assert!(key.revoke(t0));
        assert!(!key.revoke(t0 + Duration::seconds(5)));
        assert_eq!(key.revoked_at, Some(t0));

        key.active = true;
        assert_eq!(key.check_usable(t0), Err(KeyRejection::Revoked));
    }

    #[test]
    fn record_use_updates_counters() {
        let now = Utc::now();
        let (mut key, _) = issue(None);
        key.record_use(now, Some("10.0.0.1"));
        key.record_use(now, None);
        assert_eq!(key.usage_count, 2);
        assert_eq!(key.last_used_at, Some(now));
        assert_eq!(key.last_used_ip.as_deref(), Some("10.0.0.1"));
    }

    proptest! {
        #![proptest_config(ProptestConfig { cases: 64, .. ProptestConfig::default() })]

        #[test]
        fn distinct_raw_keys_hash_differently(a in "[a-f0-9]{16}", b in "[a-f0-9]{16}") {
            prop_assume!(a != b);
            let h = hasher();
            prop_assert_ne!(h.hash(&a), h.hash(&b));
        }
    }
}
