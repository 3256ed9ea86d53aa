use crate::registry::{self, find_by_name, AccountSource, Registry};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum NameError {
    #[error("tunnel name {0:?} is already in use")]
    InUse(String),

    #[error("cannot verify that tunnel name {name:?} is unused: {source}")]
    Unverifiable {
        name: String,
        #[source]
        source: registry::Error,
    },
}

/// Fails unless no live registry tunnel carries `name`.
///
/// A live tunnel whose ID is `reusing` is the one being bound on purpose and
/// does not count. Two admissions racing for the same name may both pass; the
/// loser fails later when its tunnel is created.
pub async fn ensure_name_available(
    registry: &dyn Registry,
    accounts: &dyn AccountSource,
    name: &str,
    reusing: Option<&str>,
) -> Result<(), NameError> {
    let unverifiable = |source| NameError::Unverifiable {
        name: name.to_string(),
        source,
    };

    let account = accounts.account().await.map_err(unverifiable)?;
    let tunnels = registry
        .list_tunnels(&account)
        .await
        .map_err(unverifiable)?;

    match find_by_name(&tunnels, name) {
        Some(tunnel) if Some(tunnel.id.as_str()) != reusing => {
            Err(NameError::InUse(name.to_string()))
        }
        _ => Ok(()),
    }
}
