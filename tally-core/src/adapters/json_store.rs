//! JSON document store implementation
//!
//! Keeps every collection in memory behind an async `RwLock`. When opened
//! with a path, each write is applied to a copy of the data and flushed to
//! disk on the blocking pool: the file is rewritten through a temporary file
//! in the same directory and renamed into place while an exclusive lock on
//! `<store>.lock` is held. The copy replaces the in-memory data only after
//! the file write succeeded, so a failed write leaves no trace.

use std::collections::BTreeMap;
use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use fs2::FileExt;
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::domain::result::{Error, Result};
use crate::domain::{Account, Category, Document, Tag, Transaction};
use crate::ports::Repository;

/// On-disk layout of the store
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
struct StoreData {
    #[serde(default)]
    accounts: Vec<Account>,
    #[serde(default)]
    categories: Vec<Category>,
    #[serde(default)]
    tags: Vec<Tag>,
    #[serde(default)]
    transactions: Vec<Transaction>,
    #[serde(default)]
    documents: BTreeMap<String, Vec<Document>>,
}

/// Document store backed by an optional JSON file
pub struct JsonStore {
    data: RwLock<StoreData>,
    path: Option<PathBuf>,
}

impl JsonStore {
    /// Create a store that lives only in memory
    pub fn in_memory() -> Self {
        Self {
            data: RwLock::new(StoreData::default()),
            path: None,
        }
    }

    /// Open (or create on first write) a store persisted at `path`
    pub fn open(path: &Path) -> Result<Self> {
        let data = if path.exists() {
            let _lock = Self::acquire_lock(path)?;
            let content = fs::read_to_string(path)?;
            if content.trim().is_empty() {
                StoreData::default()
            } else {
                serde_json::from_str(&content)?
            }
        } else {
            StoreData::default()
        };

        Ok(Self {
            data: RwLock::new(data),
            path: Some(path.to_path_buf()),
        })
    }

    /// Path of the backing file, if any
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    fn acquire_lock(path: &Path) -> Result<File> {
        let lock_path = path.with_extension("lock");
        let lock = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&lock_path)?;
        lock.lock_exclusive()?;
        Ok(lock)
    }

    fn persist(path: &Path, data: &StoreData) -> Result<()> {
        let dir = path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        fs::create_dir_all(dir)?;

        let lock = Self::acquire_lock(path)?;
        let tmp = NamedTempFile::new_in(dir)?;
        {
            let mut writer = BufWriter::new(tmp.as_file());
            serde_json::to_writer(&mut writer, data)?;
            writer.flush()?;
        }
        tmp.persist(path).map_err(|e| Error::Io(e.error))?;
        lock.unlock()?;
        Ok(())
    }

    /// Apply `change` and make it durable before anyone can read it
    ///
    /// `change` runs on a copy; when it or the file write fails the
    /// in-memory data is untouched.
    async fn commit<F>(&self, change: F) -> Result<()>
    where
        F: FnOnce(&mut StoreData) -> Result<()> + Send,
    {
        let mut data = self.data.write().await;
        let Some(path) = self.path.clone() else {
            return change(&mut *data);
        };

        let mut next = (*data).clone();
        change(&mut next)?;
        let next = tokio::task::spawn_blocking(move || -> Result<StoreData> {
            Self::persist(&path, &next)?;
            Ok(next)
        })
        .await
        .map_err(|e| Error::storage(format!("store write did not complete: {}", e)))??;
        *data = next;
        Ok(())
    }
}

#[async_trait]
impl Repository for JsonStore {
    async fn get_accounts(&self) -> Result<Vec<Account>> {
        Ok(self.data.read().await.accounts.clone())
    }

    async fn get_account_by_id(&self, id: Uuid) -> Result<Option<Account>> {
        let data = self.data.read().await;
        Ok(data.accounts.iter().find(|a| a.id == id).cloned())
    }

    async fn add_account(&self, account: &Account) -> Result<()> {
        account.validate().map_err(Error::validation)?;
        self.commit(|data| {
            if data.accounts.iter().any(|a| a.id == account.id) {
                return Err(Error::validation(format!(
                    "account {} already exists",
                    account.id
                )));
            }
            data.accounts.push(account.clone());
            Ok(())
        })
        .await
    }

    async fn update_account(&self, account: &Account) -> Result<()> {
        account.validate().map_err(Error::validation)?;
        self.commit(|data| {
            let slot = data
                .accounts
                .iter_mut()
                .find(|a| a.id == account.id)
                .ok_or_else(|| Error::not_found(format!("account {}", account.id)))?;
            *slot = account.clone();
            Ok(())
        })
        .await
    }

    async fn get_categories(&self) -> Result<Vec<Category>> {
        Ok(self.data.read().await.categories.clone())
    }

    async fn add_category(&self, category: &Category) -> Result<()> {
        self.commit(|data| {
            data.categories.push(category.clone());
            Ok(())
        })
        .await
    }

    async fn get_tags(&self) -> Result<Vec<Tag>> {
        Ok(self.data.read().await.tags.clone())
    }

    async fn add_tag(&self, tag: &Tag) -> Result<()> {
        self.commit(|data| {
            data.tags.push(tag.clone());
            Ok(())
        })
        .await
    }

    async fn get_transactions(&self) -> Result<Vec<Transaction>> {
        Ok(self.data.read().await.transactions.clone())
    }

    async fn add_transaction(&self, tx: &Transaction) -> Result<()> {
        self.commit(|data| {
            if data.transactions.iter().any(|t| t.id == tx.id) {
                return Err(Error::validation(format!(
                    "transaction {} already exists",
                    tx.id
                )));
            }
            data.transactions.push(tx.clone());
            Ok(())
        })
        .await
    }

    async fn delete_transaction(&self, id: Uuid) -> Result<()> {
        self.commit(|data| {
            let before = data.transactions.len();
            data.transactions.retain(|t| t.id != id);
            if data.transactions.len() == before {
                return Err(Error::not_found(format!("transaction {}", id)));
            }
            Ok(())
        })
        .await
    }

    async fn get_documents(&self, collection: &str) -> Result<Vec<Document>> {
        let data = self.data.read().await;
        Ok(data.documents.get(collection).cloned().unwrap_or_default())
    }

    async fn add_document(&self, collection: &str, document: &Document) -> Result<()> {
        if document.get("id").map_or(true, |id| id.trim().is_empty()) {
            return Err(Error::validation(format!(
                "document in '{}' has no id",
                collection
            )));
        }
        self.commit(|data| {
            data.documents
                .entry(collection.to_string())
                .or_default()
                .push(document.clone());
            Ok(())
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use rust_decimal::Decimal;

    #[tokio::test]
    async fn test_account_roundtrip_in_memory() {
        let store = JsonStore::in_memory();
        let mut account = Account::new(Uuid::new_v4(), "Nubank", "BRL");
        store.add_account(&account).await.unwrap();

        account.balance = Decimal::from(10);
        store.update_account(&account).await.unwrap();

        let loaded = store.get_account_by_id(account.id).await.unwrap().unwrap();
        assert_eq!(loaded.balance, Decimal::from(10));
        assert!(store.add_account(&account).await.is_err());
    }

    #[tokio::test]
    async fn test_update_missing_account_fails() {
        let store = JsonStore::in_memory();
        let account = Account::new(Uuid::new_v4(), "Ghost", "USD");
        let err = store.update_account(&account).await.unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }

    #[tokio::test]
    async fn test_delete_transaction() {
        let store = JsonStore::in_memory();
        let tx = Transaction::new(
            Uuid::new_v4(),
            Uuid::new_v4(),
            Decimal::ONE,
            "USD",
            NaiveDate::from_ymd_opt(2024, 3, 1).unwrap(),
        );
        store.add_transaction(&tx).await.unwrap();
        store.delete_transaction(tx.id).await.unwrap();
        assert!(store.get_transactions().await.unwrap().is_empty());
        assert!(store.delete_transaction(tx.id).await.is_err());
    }

    #[tokio::test]
    async fn test_document_requires_id() {
        let store = JsonStore::in_memory();
        let doc = Document::new();
        assert!(store.add_document("groups", &doc).await.is_err());

        let mut doc = Document::new();
        doc.insert("id".to_string(), "g1".to_string());
        store.add_document("groups", &doc).await.unwrap();
        assert_eq!(store.get_documents("groups").await.unwrap().len(), 1);
        assert!(store.get_documents("loans").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_persists_to_disk() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("store.json");

        {
            let store = JsonStore::open(&path).unwrap();
            store.add_category(&Category::new("Food")).await.unwrap();
        }

        let reopened = JsonStore::open(&path).unwrap();
        let categories = reopened.get_categories().await.unwrap();
        assert_eq!(categories.len(), 1);
        assert_eq!(categories[0].name, "Food");
    }

    #[tokio::test]
    async fn test_failed_write_leaves_store_unchanged() {
        let dir = tempfile::TempDir::new().unwrap();
        let sub = dir.path().join("sub");
        let path = sub.join("store.json");
        let store = JsonStore::open(&path).unwrap();

        let tx = Transaction::new(
            Uuid::new_v4(),
            Uuid::new_v4(),
            Decimal::ONE,
            "BRL",
            NaiveDate::from_ymd_opt(2024, 3, 1).unwrap(),
        );
        store.add_transaction(&tx).await.unwrap();

        // a regular file where the directory should be makes every write fail
        fs::remove_dir_all(&sub).unwrap();
        fs::write(&sub, b"not a directory").unwrap();

        let account = Account::new(Uuid::new_v4(), "Nubank", "BRL");
        assert!(store.add_account(&account).await.is_err());
        assert!(store.delete_transaction(tx.id).await.is_err());
        assert!(store.get_accounts().await.unwrap().is_empty());
        assert_eq!(store.get_transactions().await.unwrap().len(), 1);

        fs::remove_file(&sub).unwrap();
        store.add_category(&Category::new("Food")).await.unwrap();

        let reopened = JsonStore::open(&path).unwrap();
        assert!(reopened.get_accounts().await.unwrap().is_empty());
        assert_eq!(reopened.get_transactions().await.unwrap().len(), 1);
        assert_eq!(reopened.get_categories().await.unwrap().len(), 1);
    }
}
