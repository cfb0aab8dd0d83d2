//! Shop repository: connected Shopify stores and their access tokens.

use rusqlite::{params, Connection, OptionalExtension, Row};

use super::DatabaseError;

#[derive(Debug, Clone)]
pub struct ShopRow {
    pub id: i64,
    pub myshopify_domain: String,
    pub access_token: String,
    pub updated_at: String,
}

impl ShopRow {
    fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            id: row.get("id")?,
            myshopify_domain: row.get("myshopify_domain")?,
            access_token: row.get("access_token")?,
            updated_at: row.get("updated_at")?,
        })
    }
}

/// Inserts or replaces the credentials of a shop.
pub fn upsert(conn: &Connection, shop: &ShopRow) -> Result<(), DatabaseError> {
    conn.execute(
        "INSERT INTO shops (id, myshopify_domain, access_token, updated_at)
         VALUES (?1, ?2, ?3, ?4)
         ON CONFLICT(id) DO UPDATE SET
             myshopify_domain = excluded.myshopify_domain,
             access_token = excluded.access_token,
             updated_at = excluded.updated_at",
        params![
            shop.id,
            shop.myshopify_domain,
            shop.access_token,
            shop.updated_at
        ],
    )?;
    Ok(())
}

pub fn find_by_id(conn: &Connection, id: i64) -> Result<Option<ShopRow>, DatabaseError> {
    let row = conn
        .query_row(
            "SELECT * FROM shops WHERE id = ?1",
            params![id],
            ShopRow::from_row,
        )
        .optional()?;
    Ok(row)
}

pub fn delete(conn: &Connection, id: i64) -> Result<bool, DatabaseError> {
    let deleted = conn.execute("DELETE FROM shops WHERE id = ?1", params![id])?;
    Ok(deleted > 0)
}
