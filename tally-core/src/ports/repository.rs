//! Repository port - document store abstraction

use async_trait::async_trait;
use uuid::Uuid;

use crate::domain::result::Result;
use crate::domain::{Account, Category, Document, Tag, Transaction};

/// Document store abstraction
///
/// This trait defines every storage operation the core needs. Each call is
/// assumed atomic on its own; there are no multi-key transactions.
#[async_trait]
pub trait Repository: Send + Sync {
    // === Accounts ===

    /// Get all accounts
    async fn get_accounts(&self) -> Result<Vec<Account>>;

    /// Get account by ID
    async fn get_account_by_id(&self, id: Uuid) -> Result<Option<Account>>;

    /// Add a new account
    async fn add_account(&self, account: &Account) -> Result<()>;

    /// Update an existing account
    async fn update_account(&self, account: &Account) -> Result<()>;

    // === Categories & tags ===

    async fn get_categories(&self) -> Result<Vec<Category>>;

    async fn add_category(&self, category: &Category) -> Result<()>;

    async fn get_tags(&self) -> Result<Vec<Tag>>;

    async fn add_tag(&self, tag: &Tag) -> Result<()>;

    // === Transactions ===

    /// Get all transactions
    async fn get_transactions(&self) -> Result<Vec<Transaction>>;

    /// Add a new transaction
    async fn add_transaction(&self, tx: &Transaction) -> Result<()>;

    /// Delete a transaction (used to roll back half-written transfers)
    async fn delete_transaction(&self, id: Uuid) -> Result<()>;

    // === Other collections ===

    /// Get all documents of a collection (groups, loans, budgets, ...)
    async fn get_documents(&self, collection: &str) -> Result<Vec<Document>>;

    /// Add a document to a collection
    async fn add_document(&self, collection: &str, document: &Document) -> Result<()>;
}
