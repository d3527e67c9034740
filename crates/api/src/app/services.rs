use std::sync::Arc;

use axum::http::HeaderName;

use finback_events::{
    BusinessEventNotifier, EventDispatcher, EventTypeGate, ExternalSink, InMemoryEventTypeGate,
    ListenerRegistry, NotifierSettings, TransactionHost,
};
use finback_infra::{
    CommandLedger, CommandProcessor, ExternalEventOutbox, InMemoryCommandLedger, PlatformConfig,
    ReplayRecorder, ThreadTransactionHost, TransactionManager,
};
use finback_portfolio::{ActivityJournal, ClientWriteService, InMemoryRepository, LoanWriteService};

use crate::idempotency::IdempotentReplayCoordinator;

/// Process-wide wiring shared by every request.
pub struct AppServices {
    pub config: PlatformConfig,
    pub gate: Arc<InMemoryEventTypeGate>,
    pub outbox: ExternalEventOutbox,
    pub journal: ActivityJournal,
    pub ledger: InMemoryCommandLedger,
    pub transactions: Arc<TransactionManager>,
    pub processor: CommandProcessor,
    pub coordinator: IdempotentReplayCoordinator,
    pub clients: ClientWriteService,
    pub loans: LoanWriteService,
}

impl std::fmt::Debug for AppServices {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppServices")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

/// Wire the in-memory stack.
///
/// Listener registration happens here, before the registry is frozen.
pub fn build_services(config: PlatformConfig) -> AppServices {
    let journal = ActivityJournal::new();
    let mut registry = ListenerRegistry::builder();
    journal.register(&mut registry);
    let registry = Arc::new(registry.build());

    let gate = Arc::new(InMemoryEventTypeGate::new());
    let outbox = ExternalEventOutbox::new();
    let notifier = Arc::new(BusinessEventNotifier::new(
        EventDispatcher::new(registry),
        gate.clone() as Arc<dyn EventTypeGate>,
        Arc::new(outbox.clone()) as Arc<dyn ExternalSink>,
        Arc::new(ThreadTransactionHost) as Arc<dyn TransactionHost>,
        NotifierSettings {
            external_events_enabled: config.external_events_enabled,
        },
    ));
    let transactions = Arc::new(TransactionManager::new().with_synchronization(notifier.clone()));

    let ledger = InMemoryCommandLedger::new();
    let ledger_handle: Arc<dyn CommandLedger> = Arc::new(ledger.clone());
    let processor = CommandProcessor::new(ledger_handle.clone(), transactions.clone());
    let header = HeaderName::from_bytes(config.idempotency_key_header.as_bytes()).unwrap_or_else(|_| {
        tracing::warn!(
            header = %config.idempotency_key_header,
            "invalid idempotency header name; using idempotency-key"
        );
        HeaderName::from_static("idempotency-key")
    });
    let coordinator = IdempotentReplayCoordinator::new(
        header,
        ReplayRecorder::new(ledger_handle, transactions.clone()),
        config.max_capture_bytes,
    );

    let client_repo = InMemoryRepository::new();
    let clients = ClientWriteService::new(client_repo.clone(), notifier.clone(), transactions.clone());
    let loans = LoanWriteService::new(
        InMemoryRepository::new(),
        client_repo,
        notifier,
        transactions.clone(),
    );

    tracing::info!(
        external_events_enabled = config.external_events_enabled,
        idempotency_header = %coordinator.header(),
        "services wired"
    );

    AppServices {
        config,
        gate,
        outbox,
        journal,
        ledger,
        transactions,
        processor,
        coordinator,
        clients,
        loans,
    }
}
