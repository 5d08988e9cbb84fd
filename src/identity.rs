//! Who owns the data being loaded and saved.
//!
//! An [`IdentityResolver`] is built once per session. It settles on either
//! an authenticated owner or a guest id, and every storage call afterwards
//! goes through [`IdentityResolver::owner_key`].

use crate::error::StoreResult;
use chrono::Utc;
use lazy_static::lazy_static;
use log::{debug, info};
use rand::Rng;
use regex::Regex;
use serde_json::Value;

use crate::storage::LocalStore;

/// Local key holding the persisted guest id.
pub const GUEST_ID_KEY: &str = "guestUserId";
/// Local key set while a guest session is active.
pub const GUEST_MODE_KEY: &str = "guestMode";
pub const GUEST_COOKIE: &str = "guest-id";

const GUEST_COOKIE_MAX_AGE: u64 = 31_536_000; // one year
const GUEST_SUFFIX_LEN: usize = 9;
const BASE36: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";

lazy_static! {
    static ref GUEST_COOKIE_RE: Regex = Regex::new(r"(?:^|;\s*)guest-id=([^;]+)").unwrap();
}

/// A signed-in account, as handed over by the login flow.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AuthenticatedUser {
    pub id: String,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Identity {
    Guest { id: String },
    Owner { id: String },
}

impl Identity {
    pub fn key(&self) -> &str {
        match self {
            Identity::Guest { id } | Identity::Owner { id } => id,
        }
    }

    pub fn is_authenticated(&self) -> bool {
        matches!(self, Identity::Owner { .. })
    }
}

/// `guest_{epoch millis}_{9 base-36 chars}`
pub fn generate_guest_id() -> String {
    let mut rng = rand::thread_rng();
    let suffix: String = (0..GUEST_SUFFIX_LEN)
        .map(|_| BASE36[rng.gen_range(0..BASE36.len())] as char)
        .collect();
    format!("guest_{}_{}", Utc::now().timestamp_millis(), suffix)
}

/// Pull the guest id out of a `Cookie` header.
pub fn guest_id_from_cookie(header: &str) -> Option<String> {
    GUEST_COOKIE_RE
        .captures(header)
        .map(|c| c[1].trim().to_string())
        .filter(|id| !id.is_empty())
}

/// The `Set-Cookie` value mirroring a guest id.
pub fn guest_cookie(id: &str) -> String {
    format!(
        "{}={}; Path=/; Max-Age={}; SameSite=Lax",
        GUEST_COOKIE, id, GUEST_COOKIE_MAX_AGE
    )
}

#[derive(Clone, Debug)]
pub struct IdentityResolver {
    identity: Identity,
    /// Guest id known on this device, kept after sign-in so its data can
    /// be migrated.
    guest_id: Option<String>,
}

impl IdentityResolver {
    /// Settle the session's identity.
    ///
    /// With a signed-in user, the owner is that user and any guest id
    /// already on this device is remembered but never created. Without one,
    /// the guest id is taken from local storage, then from the cookie, and
    /// minted fresh as a last resort; whichever is found is written back to
    /// local storage.
    pub fn resolve(
        local: &LocalStore,
        cookie_header: Option<&str>,
        user: Option<AuthenticatedUser>,
    ) -> StoreResult<Self> {
        let known = local
            .get_str(GUEST_ID_KEY)
            .or_else(|| cookie_header.and_then(guest_id_from_cookie));

        if let Some(user) = user {
            debug!("resolved authenticated owner {}", user.id);
            local.delete(GUEST_MODE_KEY)?;
            return Ok(IdentityResolver {
                identity: Identity::Owner { id: user.id },
                guest_id: known,
            });
        }

        let id = match known {
            Some(id) => id,
            None => {
                let id = generate_guest_id();
                info!("created guest id {}", id);
                id
            }
        };
        if local.get_str(GUEST_ID_KEY).as_deref() != Some(id.as_str()) {
            local.set(GUEST_ID_KEY, Value::String(id.clone()))?;
        }
        local.set(GUEST_MODE_KEY, Value::Bool(true))?;
        Ok(IdentityResolver {
            identity: Identity::Guest { id: id.clone() },
            guest_id: Some(id),
        })
    }

    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    /// The key every storage read and write is scoped to.
    pub fn owner_key(&self) -> &str {
        self.identity.key()
    }

    pub fn is_authenticated(&self) -> bool {
        self.identity.is_authenticated()
    }

    pub fn guest_id(&self) -> Option<&str> {
        self.guest_id.as_deref()
    }

    /// `Set-Cookie` value to send while in guest mode.
    pub fn cookie(&self) -> Option<String> {
        match &self.identity {
            Identity::Guest { id } => Some(guest_cookie(id)),
            Identity::Owner { .. } => None,
        }
    }

    /// Switch to a signed-in owner after a successful login and leave
    /// guest mode on this device.
    pub fn sign_in(&mut self, local: &LocalStore, user: AuthenticatedUser) -> StoreResult<()> {
        local.delete(GUEST_MODE_KEY)?;
        self.identity = Identity::Owner { id: user.id };
        Ok(())
    }
}
