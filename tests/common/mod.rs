//! Shared test doubles: a controllable payment provider and in-memory
//! implementations of the filing collaborators.

#![allow(dead_code)]

use async_trait::async_trait;
use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use telos::executor::{ActivityError, EngineConfig, WorkflowEngine, WorkflowRegistry};
use telos::filing::{
    ComplianceCheckWorkflow, ComplianceChecker, ComplianceStatus, DocumentExtractor,
    EscalationNotice, EscalationSink, ExtractedData, FilingDeps, FilingRequest, FilingSubmitter,
    FilingWorkflow, Notifier, RecordStore,
};
use telos::payment::{
    PaymentError, PaymentProvider, PaymentRequest, PaymentResult, PaymentStatus, ProviderRegistry,
    WebhookValidation,
};
use telos::storage::{HistoryStore, InMemoryHistoryStore};

/// Payment provider whose `verify` answer is scripted by the test.
pub struct ScriptedProvider {
    pub verify_status: Mutex<PaymentStatus>,
    pub failure_reason: Mutex<Option<String>>,
    pub verify_calls: AtomicUsize,
}

impl ScriptedProvider {
    pub fn succeeding() -> Arc<Self> {
        Arc::new(Self {
            verify_status: Mutex::new(PaymentStatus::Succeeded),
            failure_reason: Mutex::new(None),
            verify_calls: AtomicUsize::new(0),
        })
    }

    pub fn rejecting(reason: &str) -> Arc<Self> {
        Arc::new(Self {
            verify_status: Mutex::new(PaymentStatus::Failed),
            failure_reason: Mutex::new(Some(reason.to_string())),
            verify_calls: AtomicUsize::new(0),
        })
    }

    pub fn calls(&self) -> usize {
        self.verify_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PaymentProvider for ScriptedProvider {
    fn name(&self) -> &'static str {
        "mockpay"
    }

    async fn create_checkout(
        &self,
        request: &PaymentRequest,
    ) -> Result<PaymentResult, PaymentError> {
        Ok(PaymentResult {
            status: PaymentStatus::Pending,
            provider: "mockpay".to_string(),
            provider_txn_id: request.reference.clone(),
            checkout_url: Some(format!("https://pay.example/{}", request.reference)),
            failure_reason: None,
            raw: serde_json::json!({}),
        })
    }

    async fn verify(&self, provider_txn_id: &str) -> Result<PaymentResult, PaymentError> {
        self.verify_calls.fetch_add(1, Ordering::SeqCst);
        let status = *self.verify_status.lock().unwrap();
        Ok(PaymentResult {
            status,
            provider: "mockpay".to_string(),
            provider_txn_id: provider_txn_id.to_string(),
            checkout_url: None,
            failure_reason: self.failure_reason.lock().unwrap().clone(),
            raw: serde_json::json!({}),
        })
    }

    fn validate_webhook(
        &self,
        _raw_body: &[u8],
        _signature_header: Option<&str>,
        _remote_addr: Option<IpAddr>,
    ) -> WebhookValidation {
        WebhookValidation::Accepted
    }
}

#[derive(Default)]
pub struct RecordingNotifier {
    pub sent: Mutex<Vec<(String, String)>>,
}

impl RecordingNotifier {
    pub fn messages(&self) -> Vec<(String, String)> {
        self.sent.lock().unwrap().clone()
    }

    pub fn timeout_notices(&self) -> usize {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .filter(|(_, body)| body.contains("did not receive your one-time pin"))
            .count()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn send(&self, recipient: &str, body: &str) -> Result<(), ActivityError> {
        self.sent
            .lock()
            .unwrap()
            .push((recipient.to_string(), body.to_string()));
        Ok(())
    }
}

#[derive(Default)]
pub struct CountingExtractor {
    pub calls: AtomicUsize,
}

impl CountingExtractor {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DocumentExtractor for CountingExtractor {
    async fn extract(&self, documents: &[String]) -> Result<ExtractedData, ActivityError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let mut fields = std::collections::BTreeMap::new();
        fields.insert("document_count".to_string(), documents.len().to_string());
        Ok(ExtractedData { fields })
    }
}

/// Submitter that dedupes on the idempotency key, like the real registrar
/// channel must.
#[derive(Default)]
pub struct DedupingSubmitter {
    /// idempotency key -> issued reference
    pub filings: Mutex<HashMap<String, String>>,
    pub next: AtomicUsize,
}

impl DedupingSubmitter {
    pub fn submissions(&self) -> usize {
        self.filings.lock().unwrap().len()
    }
}

#[async_trait]
impl FilingSubmitter for DedupingSubmitter {
    async fn submit(
        &self,
        idempotency_key: &str,
        _company_reg_num: &str,
        _service_type: &str,
        _extracted: &ExtractedData,
        _otp: &str,
    ) -> Result<String, ActivityError> {
        let mut filings = self.filings.lock().unwrap();
        if let Some(reference) = filings.get(idempotency_key) {
            return Ok(reference.clone());
        }
        let n = self.next.fetch_add(1, Ordering::SeqCst) + 1;
        let reference = format!("AR2025/{:06}", n);
        filings.insert(idempotency_key.to_string(), reference.clone());
        Ok(reference)
    }
}

#[derive(Default)]
pub struct InMemoryRecords {
    pub counters: Mutex<HashMap<String, i64>>,
}

#[async_trait]
impl RecordStore for InMemoryRecords {
    async fn increment(&self, key: &str) -> Result<i64, ActivityError> {
        let mut counters = self.counters.lock().unwrap();
        let value = counters.entry(key.to_string()).or_insert(0);
        *value += 1;
        Ok(*value)
    }

    async fn read(&self, key: &str) -> Result<Option<i64>, ActivityError> {
        Ok(self.counters.lock().unwrap().get(key).copied())
    }
}

#[derive(Default)]
pub struct AlwaysCompliant;

#[async_trait]
impl ComplianceChecker for AlwaysCompliant {
    async fn check(&self, company_reg_num: &str) -> Result<ComplianceStatus, ActivityError> {
        Ok(ComplianceStatus {
            in_good_standing: true,
            detail: format!("{} has no outstanding returns", company_reg_num),
        })
    }
}

#[derive(Default)]
pub struct RecordingEscalations {
    pub notices: Mutex<Vec<EscalationNotice>>,
}

impl RecordingEscalations {
    pub fn notices(&self) -> Vec<EscalationNotice> {
        self.notices.lock().unwrap().clone()
    }
}

#[async_trait]
impl EscalationSink for RecordingEscalations {
    async fn escalate(&self, notice: &EscalationNotice) -> Result<(), ActivityError> {
        self.notices.lock().unwrap().push(notice.clone());
        Ok(())
    }
}

/// One wired-up engine plus handles on every test double.
pub struct TestEnv {
    pub storage: Arc<InMemoryHistoryStore>,
    pub provider: Arc<ScriptedProvider>,
    pub notifier: Arc<RecordingNotifier>,
    pub extractor: Arc<CountingExtractor>,
    pub submitter: Arc<DedupingSubmitter>,
    pub records: Arc<InMemoryRecords>,
    pub escalations: Arc<RecordingEscalations>,
    pub deps: FilingDeps,
}

impl TestEnv {
    pub fn new(provider: Arc<ScriptedProvider>) -> Self {
        // RUST_LOG=debug makes failing scenarios readable.
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .try_init();

        let notifier = Arc::new(RecordingNotifier::default());
        let extractor = Arc::new(CountingExtractor::default());
        let submitter = Arc::new(DedupingSubmitter::default());
        let records = Arc::new(InMemoryRecords::default());
        let escalations = Arc::new(RecordingEscalations::default());

        let deps = FilingDeps {
            providers: ProviderRegistry::new().register(provider.clone()),
            extractor: extractor.clone(),
            submitter: submitter.clone(),
            records: records.clone(),
            notifier: notifier.clone(),
            checker: Arc::new(AlwaysCompliant),
            escalations: escalations.clone(),
        };

        Self {
            storage: Arc::new(InMemoryHistoryStore::new()),
            provider,
            notifier,
            extractor,
            submitter,
            records,
            escalations,
            deps,
        }
    }

    /// Build an engine over this environment's storage with a short OTP
    /// window and a fast deadline poll.
    pub fn engine(&self, otp_deadline: Duration) -> WorkflowEngine {
        self.engine_with_storage(self.storage.clone() as Arc<dyn HistoryStore>, otp_deadline)
    }

    /// Same wiring over an arbitrary store (used by the SQLite tests).
    pub fn engine_with_storage(
        &self,
        storage: Arc<dyn HistoryStore>,
        otp_deadline: Duration,
    ) -> WorkflowEngine {
        let registry = WorkflowRegistry::new()
            .register(FilingWorkflow::new(&self.deps).with_otp_deadline(otp_deadline))
            .register(ComplianceCheckWorkflow::new(&self.deps));

        WorkflowEngine::with_config(
            storage,
            registry,
            EngineConfig {
                max_concurrent_activities: 8,
                deadline_poll_interval: Duration::from_millis(25),
            },
        )
    }
}

pub fn filing_request() -> FilingRequest {
    FilingRequest {
        user_contact: "+27820000001".to_string(),
        company_reg_num: "2019/123456/07".to_string(),
        service_type: "annual_return".to_string(),
        documents: vec!["https://uploads.example/doc1.pdf".to_string()],
        payment_provider: "mockpay".to_string(),
        payment_txn_id: "TXN-1".to_string(),
    }
}

pub fn otp_payload(code: &str) -> Vec<u8> {
    serde_json::to_vec(code).unwrap()
}
