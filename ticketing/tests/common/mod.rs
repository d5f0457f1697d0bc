//! Shared harness for engine integration tests.

#![allow(dead_code, clippy::unwrap_used)]

use keygate_core::{
    EngineResult, Key, KeyCode, KeyKind, KeyStatus, LedgerStore, Notifier, PaymentReference,
    PricingPolicy, Purchase,
};
use keygate_testing::{
    fixtures, FaultInjectingStore, FixedClock, InMemoryLedgerStore, MockPaymentGateway,
    RecordingNotifier, SequentialCodeGenerator,
};
use keygate_ticketing::{
    Booking, BookingRequest, CallbackAck, EngineConfig, EngineEnvironment, ReconciliationEngine,
};
use std::sync::Arc;

/// How to build a [`Harness`]
#[derive(Default)]
pub struct Options {
    pub confirmed: u32,
    pub faults: bool,
    pub notifier: Option<Arc<dyn Notifier>>,
    pub config: EngineConfig,
}

pub struct Harness {
    pub engine: Arc<ReconciliationEngine>,
    pub memory: InMemoryLedgerStore,
    pub faults: Option<FaultInjectingStore>,
    pub gateway: MockPaymentGateway,
    pub notifier: RecordingNotifier,
    pub clock: FixedClock,
}

impl Harness {
    pub async fn new() -> Self {
        Self::build(Options::default()).await
    }

    pub async fn with_confirmed(confirmed: u32) -> Self {
        Self::build(Options {
            confirmed,
            ..Options::default()
        })
        .await
    }

    pub async fn build(options: Options) -> Self {
        let memory = InMemoryLedgerStore::with_capacity(fixtures::capacity_state(options.confirmed)).await;
        let faults = options
            .faults
            .then(|| FaultInjectingStore::new(Arc::new(memory.clone())));
        let store: Arc<dyn LedgerStore> = match &faults {
            Some(faulty) => Arc::new(faulty.clone()),
            None => Arc::new(memory.clone()),
        };

        let gateway = MockPaymentGateway::new();
        let notifier = RecordingNotifier::new();
        let clock = FixedClock::new(fixtures::epoch());
        let env = EngineEnvironment {
            store,
            gateway: Arc::new(gateway.clone()),
            notifier: options
                .notifier
                .unwrap_or_else(|| Arc::new(notifier.clone())),
            clock: Arc::new(clock.clone()),
            codes: Arc::new(SequentialCodeGenerator::new()),
        };
        let engine = ReconciliationEngine::new(env, PricingPolicy::default(), options.config);

        Self {
            engine: Arc::new(engine),
            memory,
            faults,
            gateway,
            notifier,
            clock,
        }
    }

    pub async fn issue(&self, kind: KeyKind, count: u32) -> Vec<Key> {
        self.engine
            .issue_keys(kind, count, None, &fixtures::admin())
            .await
            .unwrap()
    }

    pub async fn issue_one(&self, kind: KeyKind) -> Key {
        self.issue(kind, 1).await.remove(0)
    }

    pub async fn book(&self, code: &KeyCode) -> EngineResult<Booking> {
        self.engine.start_booking(request(code)).await
    }

    pub async fn approve(&self, purchase: &Purchase) -> CallbackAck {
        let body = MockPaymentGateway::approved(reference(purchase), "txn-0001");
        self.engine.handle_gateway_callback(&body).await
    }

    pub async fn decline(&self, purchase: &Purchase, code: &str) -> CallbackAck {
        let body = MockPaymentGateway::declined(reference(purchase), code);
        self.engine.handle_gateway_callback(&body).await
    }

    pub async fn purchase(&self, purchase: &Purchase) -> Purchase {
        self.engine.purchase_status(purchase.id).await.unwrap()
    }

    pub async fn key(&self, key: &Key) -> Key {
        self.engine.keys().get(key.id).await.unwrap()
    }

    pub async fn invitations(&self, parent: &Key) -> Vec<Key> {
        self.engine.invitation_keys(parent.id).await.unwrap()
    }

    pub async fn confirmed(&self) -> u32 {
        self.engine.capacity_snapshot().await.unwrap().confirmed
    }

    pub async fn active_keys(&self) -> usize {
        self.memory.keys_with_status(KeyStatus::Active).await.len()
    }
}

pub fn request(code: &KeyCode) -> BookingRequest {
    BookingRequest {
        code: code.as_str().to_string(),
        contact: fixtures::contact(),
        tier: None,
        addons: Vec::new(),
    }
}

pub fn reference(purchase: &Purchase) -> &PaymentReference {
    purchase.payment_reference.as_ref().unwrap()
}
