//! Database-backed [`ShopResolver`].

use chrono::Utc;
use secrecy::{ExposeSecret, SecretString};

use crate::db::shop_repo::{self, ShopRow};
use crate::db::{Database, DatabaseError};

use super::{CollaboratorError, ShopCredentials, ShopResolver};

/// Stores the Admin API credentials produced by the OAuth install flow.
#[derive(Clone)]
pub struct ShopRegistry {
    db: Database,
}

impl ShopRegistry {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Registers or updates a connected shop.
    pub fn register(
        &self,
        shop_id: i64,
        domain: &str,
        access_token: &SecretString,
    ) -> Result<(), DatabaseError> {
        let row = ShopRow {
            id: shop_id,
            myshopify_domain: domain.trim().to_lowercase(),
            access_token: access_token.expose_secret().to_string(),
            updated_at: Utc::now().to_rfc3339(),
        };
        self.db.with_conn(|conn| shop_repo::upsert(conn, &row))?;
        log::info!("Registered shop {} ({})", shop_id, row.myshopify_domain);
        Ok(())
    }

    pub fn remove(&self, shop_id: i64) -> Result<bool, DatabaseError> {
        self.db.with_conn(|conn| shop_repo::delete(conn, shop_id))
    }
}

impl ShopResolver for ShopRegistry {
    fn resolve(&self, shop_id: i64) -> Result<ShopCredentials, CollaboratorError> {
        let row = self
            .db
            .with_conn(|conn| shop_repo::find_by_id(conn, shop_id))
            .map_err(|e| CollaboratorError::request("shop registry", e.to_string()))?
            .ok_or(CollaboratorError::ShopNotConnected(shop_id))?;

        Ok(ShopCredentials {
            shop_id,
            domain: row.myshopify_domain,
            access_token: SecretString::from(row.access_token),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_and_resolve() {
        let registry = ShopRegistry::new(Database::open_in_memory().unwrap());
        registry
            .register(42, " Demo.myshopify.com ", &SecretString::from("shpat_x"))
            .unwrap();

        let creds = registry.resolve(42).unwrap();
        assert_eq!(creds.domain, "demo.myshopify.com");
        assert_eq!(creds.access_token.expose_secret(), "shpat_x");
    }

    #[test]
    fn test_unknown_shop() {
        let registry = ShopRegistry::new(Database::open_in_memory().unwrap());
        let err = registry.resolve(9).unwrap_err();
        assert!(matches!(err, CollaboratorError::ShopNotConnected(9)));
    }
}
