use std::sync::Mutex;

use anyhow::Context;

/// Where we store secrets in the OS keyring.
///
/// This is intentionally constant so upgrades don't orphan secrets.
const SERVICE: &str = "campuschat";
const ACCESS_TOKEN_USER: &str = "access_token";

/// Holds the bearer token outside the plain-JSON caches.
pub trait TokenVault: Send + Sync {
    fn get(&self) -> anyhow::Result<Option<String>>;
    fn set(&self, token: &str) -> anyhow::Result<()>;
    fn delete(&self) -> anyhow::Result<()>;
}

pub struct KeyringVault {
    entry: keyring::Entry,
}

impl KeyringVault {
    pub fn new() -> anyhow::Result<Self> {
        let entry = keyring::Entry::new(SERVICE, ACCESS_TOKEN_USER).context("create keyring entry")?;
        Ok(Self { entry })
    }
}

impl TokenVault for KeyringVault {
    fn get(&self) -> anyhow::Result<Option<String>> {
        match self.entry.get_password() {
            Ok(v) => Ok(Some(v)),
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(e) => Err(anyhow::Error::new(e)).context("get secret"),
        }
    }

    fn set(&self, token: &str) -> anyhow::Result<()> {
        self.entry.set_password(token).context("set secret")
    }

    fn delete(&self) -> anyhow::Result<()> {
        match self.entry.delete_credential() {
            Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
            Err(e) => Err(anyhow::Error::new(e)).context("delete secret"),
        }
    }
}

/// Process-local vault for tests and `--no-keyring` runs.
#[derive(Default)]
pub struct MemoryVault {
    token: Mutex<Option<String>>,
}

impl MemoryVault {
    pub fn with_token(token: impl Into<String>) -> Self {
        Self {
            token: Mutex::new(Some(token.into())),
        }
    }
}

impl TokenVault for MemoryVault {
    fn get(&self) -> anyhow::Result<Option<String>> {
        let guard = self
            .token
            .lock()
            .map_err(|_| anyhow::anyhow!("token vault poisoned"))?;
        Ok(guard.clone())
    }

    fn set(&self, token: &str) -> anyhow::Result<()> {
        let mut guard = self
            .token
            .lock()
            .map_err(|_| anyhow::anyhow!("token vault poisoned"))?;
        *guard = Some(token.to_string());
        Ok(())
    }

    fn delete(&self) -> anyhow::Result<()> {
        let mut guard = self
            .token
            .lock()
            .map_err(|_| anyhow::anyhow!("token vault poisoned"))?;
        *guard = None;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_vault_round_trip() {
        let v = MemoryVault::default();
        assert_eq!(v.get().unwrap(), None);
        v.set("tok").unwrap();
        assert_eq!(v.get().unwrap().as_deref(), Some("tok"));
        v.delete().unwrap();
        v.delete().unwrap();
        assert_eq!(v.get().unwrap(), None);
    }
}
