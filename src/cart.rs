//! Shopping cart plumbing used during customer login.
//!
//! The local cart lives in durable storage under `cart_items`. The server-side
//! cart is reached through the `CartApi` trait so the session can be exercised
//! without a network.

use crate::storage::{Storage, KEY_CART_ITEMS};
use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::time::Duration;

/// One line of a cart
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CartItem {
    pub menu_item_id: i64,
    pub quantity: i64,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub price: f64,
}

impl CartItem {
    pub fn new(menu_item_id: i64, quantity: i64, name: &str, price: f64) -> Self {
        Self {
            menu_item_id,
            quantity,
            name: name.to_string(),
            price,
        }
    }
}

/// Read the locally cached cart. Missing or malformed data reads as empty.
pub fn load_local(storage: &dyn Storage) -> Vec<CartItem> {
    storage
        .get(KEY_CART_ITEMS)
        .and_then(|raw| serde_json::from_str(&raw).ok())
        .unwrap_or_default()
}

/// Overwrite the locally cached cart
pub fn store_local(storage: &dyn Storage, items: &[CartItem]) -> Result<()> {
    let raw = serde_json::to_string(items)?;
    storage.set(KEY_CART_ITEMS, &raw)
}

/// Extract the item list from a `GET /api/cart` body.
/// The body must be an object whose `items` field is an array of cart items.
pub fn parse_cart_body(body: &Value) -> Result<Vec<CartItem>> {
    let items = body
        .get("items")
        .filter(|v| v.is_array())
        .ok_or_else(|| anyhow!("cart response has no items array"))?;
    let items: Vec<CartItem> = serde_json::from_value(items.clone())
        .map_err(|e| anyhow!("malformed cart item: {}", e))?;
    Ok(items)
}

/// Server-side cart operations, authenticated with a bearer token
pub trait CartApi {
    /// Offer local items for merge into the server cart
    fn push(&self, token: &str, items: &[CartItem]) -> Result<()>;
    /// Fetch the authoritative cart body
    fn pull(&self, token: &str) -> Result<Value>;
}

pub struct HttpCartClient {
    base_url: String,
    agent: ureq::Agent,
}

impl HttpCartClient {
    pub fn new(base_url: &str, timeout: Duration) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            agent: ureq::AgentBuilder::new().timeout(timeout).build(),
        }
    }

    fn url(&self) -> String {
        format!("{}/api/cart", self.base_url)
    }
}

impl CartApi for HttpCartClient {
    fn push(&self, token: &str, items: &[CartItem]) -> Result<()> {
        let resp = self
            .agent
            .post(&self.url())
            .set("Authorization", &format!("Bearer {}", token))
            .send_json(json!({ "items": items }));

        match resp {
            Ok(_) => Ok(()),
            Err(ureq::Error::Status(code, _)) => Err(anyhow!("cart merge rejected: {}", code)),
            Err(e) => Err(anyhow!("cart merge failed: {}", e)),
        }
    }

    fn pull(&self, token: &str) -> Result<Value> {
        let resp = self
            .agent
            .get(&self.url())
            .set("Authorization", &format!("Bearer {}", token))
            .call();

        match resp {
            Ok(r) => Ok(r.into_json::<Value>()?),
            Err(ureq::Error::Status(code, resp)) => {
                let body = resp.into_string().unwrap_or_default();
                Err(anyhow!("cart fetch error {}: {}", code, body))
            }
            Err(e) => Err(anyhow!("cart fetch failed: {}", e)),
        }
    }
}
