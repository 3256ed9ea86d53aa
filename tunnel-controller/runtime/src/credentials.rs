use crate::{
    core::{registry::Error, Account, AccountSource},
    k8s::Secret,
    store::Store,
};

pub(crate) const TOKEN_KEY: &str = "apiToken";
pub(crate) const ACCOUNT_KEY: &str = "account_id";

/// Reads the registry account from a Secret on every use.
pub(crate) struct SecretAccounts<S> {
    store: S,
    ns: String,
    name: String,
}

impl<S> SecretAccounts<S> {
    pub(crate) fn new(store: S, ns: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            store,
            ns: ns.into(),
            name: name.into(),
        }
    }
}

#[async_trait::async_trait]
impl<S: Store> AccountSource for SecretAccounts<S> {
    async fn account(&self) -> Result<Account, Error> {
        let Self { store, ns, name } = self;
        let secret = store
            .get::<Secret>(ns, name)
            .await
            .map_err(|e| Error::Unavailable(format!("failed to read Secret {ns}/{name}: {e}")))?
            .ok_or_else(|| Error::Credentials(format!("Secret {ns}/{name} not found")))?;

        let value = |key: &str| {
            read_key(&secret, key)
                .ok_or_else(|| Error::Credentials(format!("Secret {ns}/{name} has no {key:?} key")))
        };
        Ok(Account::new(value(ACCOUNT_KEY)?, value(TOKEN_KEY)?))
    }
}

/// Reads a non-empty, trimmed value from a Secret.
pub(crate) fn read_key(secret: &Secret, key: &str) -> Option<String> {
    let data = secret
        .data
        .as_ref()
        .and_then(|data| data.get(key))
        .map(|value| String::from_utf8_lossy(&value.0).into_owned());
    let string_data = || {
        secret
            .string_data
            .as_ref()
            .and_then(|data| data.get(key))
            .cloned()
    };
    data.or_else(string_data)
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}
