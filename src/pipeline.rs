//! Registration pipeline: validation, digest, storage and ledger append as
//! one unit of work.
//!
//! Records are written `Pending`, the block is appended, then the record is
//! marked `Committed`. A record whose append never happened is marked
//! `Orphaned`, either immediately or by [`RegistrationPipeline::reconcile`].

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::blockchain::Ledger;
use crate::credential::{CredentialEncoder, CredentialImage, CredentialPayload};
use crate::crypto::{digest_hex, is_digest_hex};
use crate::error::{RegistryError, Result, StoreError};
use crate::persistence::{RecordStatus, RecordStore, StoredRecord};
use crate::registration::{CanonicalDocument, RegisterRequest};

pub const DEFAULT_STORAGE_TIMEOUT: Duration = Duration::from_secs(5);
pub const DEFAULT_RECONCILE_GRACE: Duration = Duration::from_secs(300);

const COMMIT_ATTEMPTS: u32 = 3;
const COMMIT_RETRY_BACKOFF: Duration = Duration::from_millis(25);

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Deadline applied to every record store call.
    pub storage_timeout: Duration,
    /// Pending records younger than this are left alone by `reconcile`.
    pub reconcile_grace: Duration,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        PipelineConfig {
            storage_timeout: DEFAULT_STORAGE_TIMEOUT,
            reconcile_grace: DEFAULT_RECONCILE_GRACE,
        }
    }
}

/// Outcome of a successful registration.
///
/// `block_index` refers to the ledger of the process that appended the
/// block. The ledger is not persisted, so after a restart the same index
/// may belong to another tourist's block.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Registration {
    pub id: String,
    pub data_hash: String,
    pub block_index: u64,
    pub credential: CredentialPayload,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReconcileReport {
    pub committed: Vec<String>,
    pub orphaned: Vec<String>,
}

/// Result of following a block's reference back to its stored record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AuditReport {
    pub index: u64,
    pub tourist_id: String,
    pub block_data_hash: String,
    pub record_found: bool,
    pub record_status: Option<RecordStatus>,
    pub recomputed_hash: Option<String>,
    pub matches: bool,
}

pub struct RegistrationPipeline {
    store: Arc<dyn RecordStore>,
    ledger: Arc<Ledger>,
    config: PipelineConfig,
}

impl RegistrationPipeline {
    pub fn new(store: Arc<dyn RecordStore>, ledger: Arc<Ledger>) -> Self {
        Self::with_config(store, ledger, PipelineConfig::default())
    }

    pub fn with_config(store: Arc<dyn RecordStore>, ledger: Arc<Ledger>, config: PipelineConfig) -> Self {
        RegistrationPipeline { store, ledger, config }
    }

    pub fn ledger(&self) -> &Arc<Ledger> {
        &self.ledger
    }

    /// Register under a freshly generated id.
    pub async fn register(&self, request: RegisterRequest) -> Result<Registration> {
        self.register_with_id(Uuid::new_v4().to_string(), request).await
    }

    /// Register under a fresh id and render its credential. The image is
    /// produced before anything is stored, so an encoding failure leaves
    /// neither a record nor a block behind.
    pub async fn register_rendered(
        &self,
        request: RegisterRequest,
        encoder: &dyn CredentialEncoder,
    ) -> Result<(Registration, CredentialImage)> {
        request.validate()?;

        let document = CanonicalDocument::new(Uuid::new_v4().to_string(), request);
        let image = encoder.encode(&credential_of(&document)).map_err(|e| {
            error!(id = %document.id, error = %e, "credential encoding failed");
            e
        })?;

        let registration = self.store_and_chain(document).await?;
        Ok((registration, image))
    }

    /// Register under a caller-chosen id. Retrying with the same id and the
    /// same request returns the original registration instead of appending
    /// a second block.
    ///
    /// Dropping the returned future before the store write completes never
    /// touches the ledger; a write that lands anyway stays `Pending` until
    /// reconciliation orphans it.
    pub async fn register_with_id(&self, id: String, request: RegisterRequest) -> Result<Registration> {
        request.validate()?;
        self.store_and_chain(CanonicalDocument::new(id, request)).await
    }

    /// Store `Pending`, append, mark `Committed`. Succeeds only when all
    /// three steps did.
    async fn store_and_chain(&self, document: CanonicalDocument) -> Result<Registration> {
        let id = document.id.clone();
        let (canonical, itinerary, emergency) = encode_document(&document)?;
        let data_hash = digest_hex(&canonical);
        let credential = credential_of(&document);

        let record = StoredRecord::pending(&document, canonical, data_hash.clone());
        match self.call_store(move |store| store.put(&record)).await {
            Ok(()) => {}
            Err(StoreError::Duplicate(_)) => return self.resume(&id, &data_hash).await,
            Err(e) => {
                error!(id = %id, data_hash = %data_hash, error = %e, "failed to store registration");
                return Err(storage_failure());
            }
        }

        let block = match self.ledger.append(&id, &data_hash, itinerary, emergency) {
            Ok(block) => block,
            Err(e) => {
                error!(id = %id, data_hash = %data_hash, error = %e, "ledger append failed");
                self.abandon(&id).await;
                return Err(RegistryError::Ledger(e));
            }
        };

        let index = block.index;
        if let Err(e) = self.commit(&id, index).await {
            error!(id = %id, data_hash = %data_hash, index, error = %e, "block appended but record could not be committed");
            self.abandon(&id).await;
            return Err(storage_failure());
        }

        info!(id = %id, data_hash = %data_hash, index, "tourist registered");
        Ok(Registration {
            id,
            data_hash,
            block_index: index,
            credential,
        })
    }

    /// Mark `id` committed at `index`, retrying transient store failures.
    async fn commit(&self, id: &str, index: u64) -> std::result::Result<(), StoreError> {
        let mut attempt = 1;
        loop {
            let commit_id = id.to_string();
            match self.call_store(move |store| store.mark_committed(&commit_id, index)).await {
                Ok(()) => return Ok(()),
                Err(StoreError::NotPending { status, .. }) if status == RecordStatus::Committed.as_str() => {
                    return Ok(())
                }
                Err(e) if attempt < COMMIT_ATTEMPTS => {
                    debug!(id = %id, index, attempt, error = %e, "retrying commit mark");
                    tokio::time::sleep(COMMIT_RETRY_BACKOFF * attempt).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Best-effort orphan mark after a failed registration.
    async fn abandon(&self, id: &str) {
        let orphan_id = id.to_string();
        if let Err(e) = self.call_store(move |store| store.mark_orphaned(&orphan_id)).await {
            warn!(id = %id, error = %e, "record left pending for reconciliation");
        }
    }

    /// Canonical bytes of a registered document, verbatim as stored.
    pub async fn fetch(&self, id: &str) -> Result<Vec<u8>> {
        Ok(self.visible_record(id).await?.raw_data)
    }

    pub async fn fetch_document(&self, id: &str) -> Result<CanonicalDocument> {
        let record = self.visible_record(id).await?;
        record.document().map_err(|e| {
            error!(id = %id, error = %e, "stored document is unreadable");
            storage_failure()
        })
    }

    /// Re-issue the credential payload of an existing registration.
    pub async fn credential_for(&self, id: &str) -> Result<CredentialPayload> {
        let record = self.visible_record(id).await?;
        Ok(CredentialPayload {
            id: record.id,
            tourist_name: record.tourist_name,
            digital_id_expiry: record.digital_id_expiry,
        })
    }

    /// Settle pending records older than the grace period: committed when
    /// the ledger holds their block, orphaned otherwise.
    pub async fn reconcile(&self, now: DateTime<Utc>) -> Result<ReconcileReport> {
        let cutoff = chrono::Duration::from_std(self.config.reconcile_grace)
            .ok()
            .and_then(|grace| now.checked_sub_signed(grace))
            .ok_or_else(|| {
                RegistryError::Validation(format!(
                    "reconcile grace of {}s is out of range",
                    self.config.reconcile_grace.as_secs()
                ))
            })?;

        let pending = self
            .call_store(move |store| store.pending_before(cutoff))
            .await
            .map_err(|e| {
                error!(error = %e, "failed to list pending records");
                storage_failure()
            })?;

        let mut report = ReconcileReport::default();
        for record in pending {
            let id = record.id.clone();
            let chained_at = self
                .ledger
                .find_by_subject(&record.id)
                .filter(|b| b.data_hash == record.data_hash)
                .map(|b| b.index);

            let result = match chained_at {
                Some(index) => {
                    let commit_id = id.clone();
                    self.call_store(move |store| store.mark_committed(&commit_id, index)).await
                }
                None => {
                    let orphan_id = id.clone();
                    self.call_store(move |store| store.mark_orphaned(&orphan_id)).await
                }
            };

            match (result, chained_at.is_some()) {
                (Ok(()), true) => report.committed.push(id),
                (Ok(()), false) => report.orphaned.push(id),
                (Err(StoreError::NotPending { .. }), _) => {
                    debug!(id = %id, "record settled concurrently");
                }
                (Err(e), _) => {
                    error!(id = %id, data_hash = %record.data_hash, error = %e, "reconciliation failed");
                    return Err(storage_failure());
                }
            }
        }

        if !report.committed.is_empty() || !report.orphaned.is_empty() {
            info!(
                committed = report.committed.len(),
                orphaned = report.orphaned.len(),
                "reconciled pending records"
            );
        }
        Ok(report)
    }

    /// Follow block `index` back to its stored record and recompute the digest.
    pub async fn audit(&self, index: u64) -> Result<AuditReport> {
        let block = self
            .ledger
            .get(index)
            .filter(|b| !b.is_genesis())
            .ok_or_else(|| RegistryError::NotFound(format!("block {}", index)))?;

        let lookup_id = block.tourist_id.clone();
        let record = match self.call_store(move |store| store.get(&lookup_id)).await {
            Ok(record) => Some(record),
            Err(StoreError::NotFound(_)) => None,
            Err(e) => {
                error!(index, id = %block.tourist_id, error = %e, "audit lookup failed");
                return Err(storage_failure());
            }
        };

        let recomputed_hash = record.as_ref().map(|r| digest_hex(&r.raw_data));
        let matches = record
            .as_ref()
            .zip(recomputed_hash.as_ref())
            .map(|(r, h)| {
                is_digest_hex(&block.data_hash) && r.data_hash == block.data_hash && *h == block.data_hash
            })
            .unwrap_or(false);

        Ok(AuditReport {
            index,
            tourist_id: block.tourist_id,
            block_data_hash: block.data_hash,
            record_found: record.is_some(),
            record_status: record.map(|r| r.status),
            recomputed_hash,
            matches,
        })
    }

    /// A record callers may see. Only committed records qualify; a record
    /// still pending has not been reported as registered to anyone.
    async fn visible_record(&self, id: &str) -> Result<StoredRecord> {
        let lookup_id = id.to_string();
        let record = match self.call_store(move |store| store.get(&lookup_id)).await {
            Ok(record) => record,
            Err(StoreError::NotFound(_)) => return Err(RegistryError::NotFound(id.to_string())),
            Err(e) => {
                error!(id = %id, error = %e, "failed to load registration");
                return Err(storage_failure());
            }
        };

        match record.status {
            RecordStatus::Committed => Ok(record),
            RecordStatus::Pending | RecordStatus::Orphaned => {
                debug!(id = %id, status = record.status.as_str(), "record not visible");
                Err(RegistryError::NotFound(id.to_string()))
            }
        }
    }

    /// Settle a retry whose id is already in the store.
    async fn resume(&self, id: &str, data_hash: &str) -> Result<Registration> {
        let lookup_id = id.to_string();
        let existing = self
            .call_store(move |store| store.get(&lookup_id))
            .await
            .map_err(|e| {
                error!(id = %id, data_hash = %data_hash, error = %e, "failed to load existing registration");
                storage_failure()
            })?;

        if existing.data_hash != data_hash {
            return Err(RegistryError::Conflict(format!(
                "id {} is already registered with a different document",
                id
            )));
        }

        let chained_at = self
            .ledger
            .find_by_subject(id)
            .filter(|b| b.data_hash == data_hash)
            .map(|b| b.index);

        let block_index = match existing.status {
            RecordStatus::Committed => match (existing.block_index, chained_at) {
                (Some(stored), Some(current)) if stored == current => stored,
                _ => {
                    return Err(RegistryError::Conflict(format!(
                        "{} was registered on an earlier ledger; fetch it instead of retrying",
                        id
                    )))
                }
            },
            RecordStatus::Pending => {
                let index = chained_at.ok_or_else(|| {
                    RegistryError::Conflict(format!("registration {} is still in progress", id))
                })?;
                self.commit(id, index).await.map_err(|e| {
                    error!(id = %id, index, error = %e, "failed to commit retried registration");
                    storage_failure()
                })?;
                index
            }
            RecordStatus::Orphaned => {
                return Err(RegistryError::Conflict(format!(
                    "an earlier registration attempt for {} failed; retry with a new id",
                    id
                )))
            }
        };

        debug!(id = %id, block_index, "retry matched an existing registration");
        Ok(Registration {
            id: existing.id.clone(),
            data_hash: existing.data_hash.clone(),
            block_index,
            credential: CredentialPayload {
                id: existing.id,
                tourist_name: existing.tourist_name,
                digital_id_expiry: existing.digital_id_expiry,
            },
        })
    }

    /// Run a blocking store call off the async runtime, bounded by the
    /// configured deadline.
    async fn call_store<T, F>(&self, op: F) -> std::result::Result<T, StoreError>
    where
        F: FnOnce(&dyn RecordStore) -> std::result::Result<T, StoreError> + Send + 'static,
        T: Send + 'static,
    {
        let store = Arc::clone(&self.store);
        let task = tokio::task::spawn_blocking(move || op(store.as_ref()));
        match tokio::time::timeout(self.config.storage_timeout, task).await {
            Ok(Ok(result)) => result,
            Ok(Err(join)) => Err(StoreError::Database(format!("store task failed: {}", join))),
            Err(_) => Err(StoreError::Timeout(self.config.storage_timeout.as_millis() as u64)),
        }
    }
}

fn encode_document(document: &CanonicalDocument) -> Result<(Vec<u8>, Vec<u8>, Vec<u8>)> {
    let encode_err = |e: serde_json::Error| {
        error!(id = %document.id, error = %e, "failed to serialize document");
        RegistryError::Storage("Failed to marshal data".to_string())
    };
    let canonical = document.to_canonical_bytes().map_err(encode_err)?;
    let itinerary = document.itinerary_payload().map_err(encode_err)?;
    let emergency = document.emergency_payload().map_err(encode_err)?;
    Ok((canonical, itinerary, emergency))
}

fn credential_of(document: &CanonicalDocument) -> CredentialPayload {
    CredentialPayload {
        id: document.id.clone(),
        tourist_name: document.tourist_name.clone(),
        digital_id_expiry: document.digital_id_expiry.clone(),
    }
}

fn storage_failure() -> RegistryError {
    RegistryError::Storage("Failed to access registration storage".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::InMemoryRecordStore;
    use crate::registration::tests::sample_request;

    fn pipeline() -> (RegistrationPipeline, InMemoryRecordStore, Arc<Ledger>) {
        let store = InMemoryRecordStore::new();
        let ledger = Arc::new(Ledger::new());
        let pipeline = RegistrationPipeline::new(Arc::new(store.clone()), ledger.clone());
        (pipeline, store, ledger)
    }

    #[tokio::test]
    async fn test_register_stores_and_chains() {
        let (pipeline, store, ledger) = pipeline();
        let reg = pipeline.register(sample_request()).await.unwrap();

        let record = store.get(&reg.id).unwrap();
        assert_eq!(record.status, RecordStatus::Committed);
        assert_eq!(record.block_index, Some(1));
        assert_eq!(record.data_hash, digest_hex(&record.raw_data));
        assert_eq!(ledger.len(), 2);
        assert_eq!(ledger.get(1).unwrap().data_hash, reg.data_hash);
        assert_eq!(reg.credential.tourist_name, "Asha Verma");
        assert_eq!(reg.credential.digital_id_expiry, "2025-11-09");
    }

    #[tokio::test]
    async fn test_invalid_request_has_no_side_effects() {
        let (pipeline, store, ledger) = pipeline();
        let mut req = sample_request();
        req.contact.email = "not-an-email".to_string();

        let err = pipeline.register(req).await.unwrap_err();
        assert!(matches!(err, RegistryError::Validation(_)));
        assert!(store.is_empty());
        assert_eq!(ledger.len(), 1);
    }

    #[tokio::test]
    async fn test_retry_with_same_id_does_not_append_twice() {
        let (pipeline, _store, ledger) = pipeline();
        let id = Uuid::new_v4().to_string();

        let first = pipeline.register_with_id(id.clone(), sample_request()).await.unwrap();
        let second = pipeline.register_with_id(id.clone(), sample_request()).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(ledger.len(), 2);

        let mut changed = sample_request();
        changed.personal_info.full_name = "Someone Else".to_string();
        assert!(matches!(
            pipeline.register_with_id(id, changed).await,
            Err(RegistryError::Conflict(_))
        ));
        assert_eq!(ledger.len(), 2);
    }

    #[tokio::test]
    async fn test_pending_record_is_hidden_until_chained() {
        let (pipeline, store, _ledger) = pipeline();
        let doc = CanonicalDocument::new("stuck", sample_request());
        let bytes = doc.to_canonical_bytes().unwrap();
        let hash = digest_hex(&bytes);
        store.put(&StoredRecord::pending(&doc, bytes, hash)).unwrap();

        assert!(matches!(pipeline.fetch("stuck").await, Err(RegistryError::NotFound(_))));
        assert!(matches!(
            pipeline.register_with_id("stuck".to_string(), sample_request()).await,
            Err(RegistryError::Conflict(_))
        ));
    }

    #[tokio::test]
    async fn test_reconcile_commits_chained_and_orphans_the_rest() {
        let (pipeline, store, ledger) = pipeline();

        let chained = CanonicalDocument::new("chained", sample_request());
        let bytes = chained.to_canonical_bytes().unwrap();
        let hash = digest_hex(&bytes);
        store.put(&StoredRecord::pending(&chained, bytes, hash.clone())).unwrap();
        let block = ledger.append("chained", &hash, vec![], vec![]).unwrap();

        let lost = CanonicalDocument::new("lost", sample_request());
        let bytes = lost.to_canonical_bytes().unwrap();
        let hash = digest_hex(&bytes);
        store.put(&StoredRecord::pending(&lost, bytes, hash)).unwrap();

        // Inside the grace period nothing is touched.
        let report = pipeline.reconcile(Utc::now()).await.unwrap();
        assert_eq!(report, ReconcileReport::default());

        let later = Utc::now() + chrono::Duration::seconds(3600);
        let report = pipeline.reconcile(later).await.unwrap();
        assert_eq!(report.committed, vec!["chained".to_string()]);
        assert_eq!(report.orphaned, vec!["lost".to_string()]);
        assert_eq!(store.get("chained").unwrap().block_index, Some(block.index));
        assert_eq!(store.get("lost").unwrap().status, RecordStatus::Orphaned);
        assert!(matches!(pipeline.fetch("lost").await, Err(RegistryError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_audit_follows_block_to_record() {
        let (pipeline, _store, _ledger) = pipeline();
        let reg = pipeline.register(sample_request()).await.unwrap();

        let report = pipeline.audit(reg.block_index).await.unwrap();
        assert!(report.record_found);
        assert!(report.matches);
        assert_eq!(report.record_status, Some(RecordStatus::Committed));
        assert_eq!(report.recomputed_hash.as_deref(), Some(reg.data_hash.as_str()));

        assert!(matches!(pipeline.audit(0).await, Err(RegistryError::NotFound(_))));
        assert!(matches!(pipeline.audit(42).await, Err(RegistryError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_audit_reports_missing_record() {
        let (pipeline, _store, ledger) = pipeline();
        let block = ledger.append("ghost", &"0".repeat(64), vec![], vec![]).unwrap();

        let report = pipeline.audit(block.index).await.unwrap();
        assert!(!report.record_found);
        assert!(!report.matches);
        assert!(ledger.verify().is_ok());
    }
}
