//! `ldap3`-backed directory connections.

use async_trait::async_trait;
use ldap3::{Ldap, LdapConnAsync, LdapConnSettings, Scope, SearchEntry, SearchOptions};
use rootcause::prelude::Report;
use tracing::debug;

use super::directory::{DirectoryConfig, DirectoryConnection, DirectoryDialer, DirectoryEntry};
use crate::error::DirectoryError;

/// LDAP result code for `sizeLimitExceeded`.
const SIZE_LIMIT_EXCEEDED: u32 = 4;

/// Dials real directory servers.
#[derive(Debug, Clone, Copy, Default)]
pub struct LdapDialer;

#[async_trait]
impl DirectoryDialer for LdapDialer {
    async fn dial(
        &self,
        config: &DirectoryConfig,
    ) -> Result<Box<dyn DirectoryConnection>, Report<DirectoryError>> {
        let settings = LdapConnSettings::new().set_conn_timeout(config.timeout());
        let (conn, ldap) = LdapConnAsync::with_settings(settings, &config.url)
            .await
            .map_err(|e| DirectoryError::Connect {
                url: config.url.clone(),
                reason: e.to_string(),
            })?;
        ldap3::drive!(conn);
        debug!(url = %config.url, "directory connection opened");
        Ok(Box::new(LdapConnection { ldap }))
    }
}

struct LdapConnection {
    ldap: Ldap,
}

#[async_trait]
impl DirectoryConnection for LdapConnection {
    async fn bind(&mut self, dn: &str, password: &str) -> Result<(), Report<DirectoryError>> {
        self.ldap
            .simple_bind(dn, password)
            .await
            .and_then(|result| result.success())
            .map_err(|e| DirectoryError::Bind {
                dn: dn.to_string(),
                reason: e.to_string(),
            })?;
        Ok(())
    }

    async fn search_one(
        &mut self,
        base: &str,
        filter: &str,
        attributes: &[&str],
    ) -> Result<Option<DirectoryEntry>, Report<DirectoryError>> {
        let ldap3::SearchResult(entries, result) = self
            .ldap
            .with_search_options(SearchOptions::new().sizelimit(1))
            .search(base, Scope::Subtree, filter, attributes.to_vec())
            .await
            .map_err(|e| DirectoryError::Search {
                reason: e.to_string(),
            })?;

        // More than one match still returns the first entry with rc=4.
        if result.rc != 0 && result.rc != SIZE_LIMIT_EXCEEDED {
            return Err(DirectoryError::Search {
                reason: result.to_string(),
            }
            .into());
        }

        Ok(entries.into_iter().next().map(|raw| {
            let entry = SearchEntry::construct(raw);
            DirectoryEntry {
                dn: entry.dn,
                attributes: entry.attrs,
            }
        }))
    }

    async fn close(&mut self) {
        if let Err(e) = self.ldap.unbind().await {
            debug!(error = %e, "directory unbind failed");
        }
    }
}
