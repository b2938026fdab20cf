//! Cart store contract.

use async_trait::async_trait;
use common::{ProductId, UserId};
use domain::CartLine;

use crate::Result;

/// Storage for users' cart lines, unique on `(user_id, product_id)`.
#[async_trait]
pub trait CartStore: Send + Sync {
    /// Lists all lines for a user, oldest first.
    async fn list_lines(&self, user_id: UserId) -> Result<Vec<CartLine>>;

    /// Reads one line.
    async fn get_line(&self, user_id: UserId, product_id: ProductId) -> Result<Option<CartLine>>;

    /// Inserts the line, or replaces quantity and price of the existing line
    /// for the same `(user_id, product_id)`.
    async fn upsert_line(&self, line: CartLine) -> Result<CartLine>;

    /// Removes one line. Returns false if it did not exist.
    async fn remove_line(&self, user_id: UserId, product_id: ProductId) -> Result<bool>;

    /// Removes every line for a user in one write. Returns the number removed.
    async fn delete_all(&self, user_id: UserId) -> Result<usize>;
}
