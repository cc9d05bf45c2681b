//! Backup service - full-store ZIP archives
//!
//! An archive holds `manifest.json` plus one `<collection>.csv` per
//! collection. Restoring recreates every entity under a fresh id and
//! re-links foreign keys through per-collection old -> new id maps.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fs::File;
use std::io::{Cursor, Read, Write};
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use zip::write::SimpleFileOptions;
use zip::{ZipArchive, ZipWriter};

use crate::domain::{Account, BackupManifest, Category, Document, ImportMetadata, Tag, Transaction};
use crate::ports::Repository;
use crate::services::import::normalize::{format_date, parse_date};

pub const MANIFEST_FILE: &str = "manifest.json";

/// Every collection written to an archive, in restore order
pub const COLLECTIONS: &[&str] = &[
    "preferences",
    "groups",
    "categories",
    "tags",
    "accounts",
    "transactions",
    "subscriptions",
    "loans",
    "credit_cards",
    "budgets",
];

/// Foreign key columns on generic documents and the collection they point to
const DOCUMENT_REFERENCES: &[(&str, &str)] = &[
    ("account_id", "accounts"),
    ("category_id", "categories"),
    ("group_id", "groups"),
];

/// Flat CSV shape of a transaction
#[derive(Debug, Serialize, Deserialize)]
struct TransactionRow {
    id: Uuid,
    account_id: Uuid,
    /// `YYYY-MM-DD`
    date: String,
    amount: Decimal,
    currency: String,
    description: String,
    category: String,
    /// `;`-separated
    tags: String,
    created_at: DateTime<Utc>,
    batch_id: Option<String>,
    import_row: Option<usize>,
    fingerprint: Option<String>,
    foreign_amount: Option<Decimal>,
    foreign_currency: Option<String>,
}

impl From<&Transaction> for TransactionRow {
    fn from(tx: &Transaction) -> Self {
        let import = tx.import.as_ref();
        Self {
            id: tx.id,
            account_id: tx.account_id,
            date: format_date(tx.date),
            amount: tx.amount,
            currency: tx.currency.clone(),
            description: tx.description.clone(),
            category: tx.category.clone(),
            tags: tx.tags.join(";"),
            created_at: tx.created_at,
            batch_id: import.map(|m| m.batch_id.clone()),
            import_row: import.map(|m| m.row),
            fingerprint: import.map(|m| m.fingerprint.clone()),
            foreign_amount: import.and_then(|m| m.foreign_amount),
            foreign_currency: import.and_then(|m| m.foreign_currency.clone()),
        }
    }
}

impl TransactionRow {
    fn into_transaction(self) -> Transaction {
        let import = self.batch_id.map(|batch_id| ImportMetadata {
            batch_id,
            row: self.import_row.unwrap_or_default(),
            fingerprint: self.fingerprint.unwrap_or_default(),
            foreign_amount: self.foreign_amount,
            foreign_currency: self.foreign_currency,
        });
        Transaction {
            id: self.id,
            account_id: self.account_id,
            date: parse_date(&self.date),
            amount: self.amount,
            currency: self.currency,
            description: self.description,
            category: self.category,
            tags: Transaction::normalize_tags(&self.tags.split(';').collect::<Vec<_>>()),
            import,
            created_at: self.created_at,
        }
    }
}

/// Result of a restore
#[derive(Debug, Default, Serialize)]
pub struct RestoreSummary {
    /// Records recreated per collection
    pub restored: BTreeMap<String, usize>,
    /// Foreign keys that pointed at nothing in the archive and were cleared
    pub dangling_references: usize,
    /// Transactions dropped because their account was not in the archive
    pub orphaned_transactions: usize,
}

/// Result of an export
#[derive(Debug, Serialize)]
pub struct ExportSummary {
    pub manifest: BackupManifest,
    pub counts: BTreeMap<String, usize>,
}

/// Backup service for whole-store export and restore
pub struct BackupService {
    repository: Arc<dyn Repository>,
}

impl BackupService {
    pub fn new(repository: Arc<dyn Repository>) -> Self {
        Self { repository }
    }

    /// Write every collection into a ZIP archive at `path`
    pub async fn export(&self, path: &Path) -> Result<ExportSummary> {
        let (accounts, categories, tags, transactions) = tokio::try_join!(
            self.repository.get_accounts(),
            self.repository.get_categories(),
            self.repository.get_tags(),
            self.repository.get_transactions(),
        )?;

        let file = File::create(path)
            .with_context(|| format!("Failed to create backup file {}", path.display()))?;
        let mut zip = ZipWriter::new(file);
        let options =
            SimpleFileOptions::default().compression_method(zip::CompressionMethod::Deflated);

        let mut counts = BTreeMap::new();
        for &collection in COLLECTIONS {
            let (content, count) = match collection {
                "accounts" => (serialize_rows(&accounts)?, accounts.len()),
                "categories" => (serialize_rows(&categories)?, categories.len()),
                "tags" => (serialize_rows(&tags)?, tags.len()),
                "transactions" => {
                    let rows: Vec<TransactionRow> = transactions.iter().map(TransactionRow::from).collect();
                    (serialize_rows(&rows)?, rows.len())
                }
                other => {
                    let documents = self.repository.get_documents(other).await?;
                    (serialize_documents(&documents)?, documents.len())
                }
            };
            zip.start_file(format!("{}.csv", collection), options)?;
            zip.write_all(&content)?;
            counts.insert(collection.to_string(), count);
        }

        let manifest = BackupManifest::new(COLLECTIONS.iter().map(|c| c.to_string()).collect());
        zip.start_file(MANIFEST_FILE, options)?;
        zip.write_all(serde_json::to_string_pretty(&manifest)?.as_bytes())?;
        zip.finish()?;

        tracing::info!(path = %path.display(), "backup exported");
        Ok(ExportSummary { manifest, counts })
    }

    /// Restore an archive from disk
    pub async fn restore(&self, path: &Path, force: bool) -> Result<RestoreSummary> {
        let bytes = std::fs::read(path)
            .with_context(|| format!("Failed to read backup {}", path.display()))?;
        self.restore_bytes(&bytes, force).await
    }

    /// Restore an archive already in memory
    ///
    /// Refuses to restore on top of a store that has accounts or
    /// transactions unless `force` is set.
    pub async fn restore_bytes(&self, bytes: &[u8], force: bool) -> Result<RestoreSummary> {
        let mut archive = ZipArchive::new(Cursor::new(bytes)).context("Not a ZIP archive")?;

        let manifest: BackupManifest = serde_json::from_str(&read_entry(&mut archive, MANIFEST_FILE)?)
            .context("Malformed backup manifest")?;
        manifest
            .validate()
            .map_err(|e| anyhow::anyhow!("Cannot restore backup: {}", e))?;

        if !force {
            let (accounts, transactions) = tokio::try_join!(
                self.repository.get_accounts(),
                self.repository.get_transactions()
            )?;
            if !accounts.is_empty() || !transactions.is_empty() {
                anyhow::bail!("Store is not empty; restore with force to add the backup on top");
            }
        }

        let contains: BTreeSet<&str> = manifest.contains.iter().map(String::as_str).collect();
        let mut ids: HashMap<&str, HashMap<String, String>> = HashMap::new();
        let mut summary = RestoreSummary::default();

        for &collection in COLLECTIONS {
            if !contains.contains(collection) {
                continue;
            }
            let content = read_entry(&mut archive, &format!("{}.csv", collection))?;
            let restored = match collection {
                "accounts" => {
                    let mut map = HashMap::new();
                    let mut count = 0;
                    for mut account in deserialize_rows::<Account>(&content, collection)? {
                        let new_id = Uuid::new_v4();
                        map.insert(account.id.to_string(), new_id.to_string());
                        account.id = new_id;
                        if let Some(group) = account.group_id.take() {
                            account.group_id = relink(&ids, "groups", &group, &mut summary);
                        }
                        self.repository.add_account(&account).await?;
                        count += 1;
                    }
                    ids.insert(collection, map);
                    count
                }
                "categories" => {
                    let mut map = HashMap::new();
                    for mut category in deserialize_rows::<Category>(&content, collection)? {
                        let new_id = Uuid::new_v4();
                        map.insert(category.id.to_string(), new_id.to_string());
                        category.id = new_id;
                        self.repository.add_category(&category).await?;
                    }
                    let count = map.len();
                    ids.insert(collection, map);
                    count
                }
                "tags" => {
                    let mut count = 0;
                    for mut tag in deserialize_rows::<Tag>(&content, collection)? {
                        tag.id = Uuid::new_v4();
                        self.repository.add_tag(&tag).await?;
                        count += 1;
                    }
                    count
                }
                "transactions" => {
                    let mut count = 0;
                    for row in deserialize_rows::<TransactionRow>(&content, collection)? {
                        let mut tx = row.into_transaction();
                        let Some(account_id) = ids
                            .get("accounts")
                            .and_then(|m| m.get(&tx.account_id.to_string()))
                            .and_then(|id| Uuid::parse_str(id).ok())
                        else {
                            tracing::warn!(transaction = %tx.id, account = %tx.account_id, "dropping transaction without account");
                            summary.orphaned_transactions += 1;
                            continue;
                        };
                        tx.id = Uuid::new_v4();
                        tx.account_id = account_id;
                        self.repository.add_transaction(&tx).await?;
                        count += 1;
                    }
                    count
                }
                other => {
                    let mut map = HashMap::new();
                    for mut document in parse_documents(&content, other)? {
                        let new_id = Uuid::new_v4().to_string();
                        if let Some(old) = document.insert("id".to_string(), new_id.clone()) {
                            map.insert(old, new_id);
                        }
                        for &(column, target) in DOCUMENT_REFERENCES {
                            if let Some(old) = document.remove(column) {
                                if let Some(new) = relink(&ids, target, &old, &mut summary) {
                                    document.insert(column.to_string(), new);
                                }
                            }
                        }
                        self.repository.add_document(other, &document).await?;
                    }
                    let count = map.len();
                    ids.insert(other, map);
                    count
                }
            };
            summary.restored.insert(collection.to_string(), restored);
        }

        tracing::info!(
            dangling = summary.dangling_references,
            orphaned = summary.orphaned_transactions,
            "backup restored"
        );
        Ok(summary)
    }
}

/// Map an old id through a collection's id map, counting misses
fn relink(
    ids: &HashMap<&str, HashMap<String, String>>,
    collection: &str,
    old: &str,
    summary: &mut RestoreSummary,
) -> Option<String> {
    let new = ids.get(collection).and_then(|m| m.get(old)).cloned();
    if new.is_none() {
        tracing::debug!(collection, id = old, "clearing dangling reference");
        summary.dangling_references += 1;
    }
    new
}

fn read_entry<R: Read + std::io::Seek>(archive: &mut ZipArchive<R>, name: &str) -> Result<String> {
    let mut entry = archive
        .by_name(name)
        .with_context(|| format!("Backup is missing {}", name))?;
    let mut content = String::new();
    entry
        .read_to_string(&mut content)
        .with_context(|| format!("Failed to read {}", name))?;
    Ok(content)
}

fn serialize_rows<T: Serialize>(rows: &[T]) -> Result<Vec<u8>> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    for row in rows {
        writer.serialize(row)?;
    }
    writer.into_inner().context("Failed to flush CSV")
}

fn deserialize_rows<T: for<'de> Deserialize<'de>>(content: &str, collection: &str) -> Result<Vec<T>> {
    csv::Reader::from_reader(content.as_bytes())
        .deserialize()
        .collect::<std::result::Result<Vec<T>, _>>()
        .with_context(|| format!("Malformed {}.csv", collection))
}

/// Write documents with the union of their keys as header, `id` first
fn serialize_documents(documents: &[Document]) -> Result<Vec<u8>> {
    let mut columns: Vec<&str> = vec!["id"];
    let keys: BTreeSet<&str> = documents
        .iter()
        .flat_map(|d| d.keys().map(String::as_str))
        .filter(|k| *k != "id")
        .collect();
    columns.extend(keys);

    let mut writer = csv::Writer::from_writer(Vec::new());
    writer.write_record(&columns)?;
    for document in documents {
        writer.write_record(columns.iter().map(|c| document.get(*c).map_or("", String::as_str)))?;
    }
    writer.into_inner().context("Failed to flush CSV")
}

/// Read documents back, dropping empty cells
fn parse_documents(content: &str, collection: &str) -> Result<Vec<Document>> {
    let mut reader = csv::Reader::from_reader(content.as_bytes());
    let headers = reader
        .headers()
        .with_context(|| format!("Malformed {}.csv", collection))?
        .clone();
    let mut documents = Vec::new();
    for record in reader.records() {
        let record = record.with_context(|| format!("Malformed {}.csv", collection))?;
        let document: Document = headers
            .iter()
            .zip(record.iter())
            .filter(|(_, v)| !v.is_empty())
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        if document.contains_key("id") {
            documents.push(document);
        }
    }
    Ok(documents)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::json_store::JsonStore;
    use chrono::NaiveDate;
    use tempfile::TempDir;

    fn doc(pairs: &[(&str, &str)]) -> Document {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    #[test]
    fn test_documents_csv_union_header() {
        let docs = vec![doc(&[("id", "1"), ("name", "Rent")]), doc(&[("id", "2"), ("amount", "10")])];
        let bytes = serialize_documents(&docs).unwrap();
        let text = String::from_utf8(bytes).unwrap();
        assert!(text.starts_with("id,amount,name\n"));

        let back = parse_documents(&text, "budgets").unwrap();
        assert_eq!(back, docs);
    }

    #[tokio::test]
    async fn test_restore_remaps_ids_and_links() {
        let dir = TempDir::new().unwrap();
        let archive = dir.path().join("backup.zip");

        let source = Arc::new(JsonStore::in_memory());
        source.add_document("groups", &doc(&[("id", "g1"), ("name", "Banks")])).await.unwrap();
        let mut account = Account::new(Uuid::new_v4(), "Nubank", "BRL");
        account.group_id = Some("g1".to_string());
        source.add_account(&account).await.unwrap();
        let mut ghost = Account::new(Uuid::new_v4(), "Loose", "BRL");
        ghost.group_id = Some("missing".to_string());
        source.add_account(&ghost).await.unwrap();
        let category = Category::new("Food");
        source.add_category(&category).await.unwrap();
        let mut tx = Transaction::new(
            Uuid::new_v4(),
            account.id,
            Decimal::new(-1250, 2),
            "BRL",
            NaiveDate::from_ymd_opt(2024, 3, 1).unwrap(),
        );
        tx.tags = vec!["trip".to_string(), "work".to_string()];
        source.add_transaction(&tx).await.unwrap();
        source
            .add_document(
                "budgets",
                &doc(&[("id", "b1"), ("category_id", &category.id.to_string()), ("account_id", "nope")]),
            )
            .await
            .unwrap();

        let export = BackupService::new(source).export(&archive).await.unwrap();
        assert_eq!(export.counts["accounts"], 2);

        let target = Arc::new(JsonStore::in_memory());
        let summary = BackupService::new(target.clone()).restore(&archive, false).await.unwrap();
        assert_eq!(summary.restored["accounts"], 2);
        assert_eq!(summary.restored["transactions"], 1);
        // "missing" group and "nope" account
        assert_eq!(summary.dangling_references, 2);

        let groups = target.get_documents("groups").await.unwrap();
        let accounts = target.get_accounts().await.unwrap();
        let nubank = accounts.iter().find(|a| a.name == "Nubank").unwrap();
        assert_ne!(nubank.id, account.id);
        assert_eq!(nubank.group_id.as_ref(), groups[0].get("id"));
        assert!(accounts.iter().find(|a| a.name == "Loose").unwrap().group_id.is_none());

        let txs = target.get_transactions().await.unwrap();
        assert_eq!(txs[0].account_id, nubank.id);
        assert_eq!(txs[0].tags, vec!["trip", "work"]);

        let categories = target.get_categories().await.unwrap();
        let budgets = target.get_documents("budgets").await.unwrap();
        assert_eq!(budgets[0].get("category_id"), Some(&categories[0].id.to_string()));
        assert!(budgets[0].get("account_id").is_none());
    }

    #[tokio::test]
    async fn test_restore_refuses_non_empty_store() {
        let dir = TempDir::new().unwrap();
        let archive = dir.path().join("backup.zip");
        let store = Arc::new(JsonStore::in_memory());
        store.add_account(&Account::new(Uuid::new_v4(), "Cash", "USD")).await.unwrap();

        let service = BackupService::new(store.clone());
        service.export(&archive).await.unwrap();
        assert!(service.restore(&archive, false).await.is_err());

        service.restore(&archive, true).await.unwrap();
        assert_eq!(store.get_accounts().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_restore_rejects_foreign_manifest() {
        let mut zip = ZipWriter::new(Cursor::new(Vec::new()));
        zip.start_file(MANIFEST_FILE, SimpleFileOptions::default()).unwrap();
        zip.write_all(br#"{"appName":"other","backupVersion":1,"exportedAt":"2024-01-01T00:00:00Z","contains":[]}"#)
            .unwrap();
        let bytes = zip.finish().unwrap().into_inner();

        let service = BackupService::new(Arc::new(JsonStore::in_memory()));
        let err = service.restore_bytes(&bytes, false).await.unwrap_err();
        assert!(err.to_string().contains("other"));
    }
}
