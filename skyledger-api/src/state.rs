use skyledger_core::payment::FundsRail;
use skyledger_core::registry::BackendRegistry;
use skyledger_core::Address;
use skyledger_order::{Ledger, LedgerSettings};
use skyledger_shared::{EventEnvelope, LedgerEvent};
use skyledger_store::app_config::RateLimitConfig;
use skyledger_store::{RedisClient, SnapshotStore, StoreError};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{broadcast, Mutex, RwLock};
use tracing::{error, info};

use crate::auth::AuthConfig;
use crate::error::AppError;
use crate::metrics::ApiMetrics;

pub const EVENT_BUS_CAPACITY: usize = 1024;
pub const REGISTRY_ADDRESS: &str = "registry";

#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<RwLock<BackendRegistry>>,
    /// Every instance ever deployed, keyed by address.
    pub instances: Arc<RwLock<HashMap<Address, Arc<Ledger>>>>,
    pub rail: Arc<dyn FundsRail>,
    pub events: broadcast::Sender<EventEnvelope>,
    registry_sequence: Arc<AtomicU64>,
    /// Held across snapshot and save so stores land in commit order.
    persist_lock: Arc<Mutex<()>>,
    pub store: Option<Arc<dyn SnapshotStore>>,
    pub redis: Option<Arc<RedisClient>>,
    pub rate_limit: Option<RateLimitConfig>,
    pub auth: AuthConfig,
    pub settings: LedgerSettings,
    pub metrics: Arc<ApiMetrics>,
}

impl AppState {
    /// Fresh registry pointing at a freshly deployed instance, both
    /// administered by `admin`.
    pub fn new(
        admin: Address,
        rail: Arc<dyn FundsRail>,
        settings: LedgerSettings,
        auth: AuthConfig,
        metrics: ApiMetrics,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_BUS_CAPACITY);
        let ledger = Ledger::deploy(admin.clone(), rail.clone(), settings.clone(), events.clone());
        let registry = BackendRegistry::new(admin, ledger.address().clone());

        let mut instances = HashMap::new();
        instances.insert(ledger.address().clone(), Arc::new(ledger));

        Self {
            registry: Arc::new(RwLock::new(registry)),
            instances: Arc::new(RwLock::new(instances)),
            rail,
            events,
            registry_sequence: Arc::new(AtomicU64::new(0)),
            persist_lock: Arc::new(Mutex::new(())),
            store: None,
            redis: None,
            rate_limit: None,
            auth,
            settings,
            metrics: Arc::new(metrics),
        }
    }

    /// Rebuilds the registry and every instance it has pointed at from the
    /// store, or bootstraps a fresh pair and saves it when the store is empty.
    pub async fn restore(
        admin: Address,
        rail: Arc<dyn FundsRail>,
        settings: LedgerSettings,
        auth: AuthConfig,
        metrics: ApiMetrics,
        store: Arc<dyn SnapshotStore>,
    ) -> Result<Self, StoreError> {
        let Some(registry) = store.load_registry().await? else {
            let state = Self::new(admin, rail, settings, auth, metrics).with_store(store.clone());
            let ledger = state
                .ledger()
                .await
                .map_err(|_| StoreError::Corrupt("fresh registry has no instance".to_string()))?;
            store.save_snapshot(&ledger.snapshot()).await?;
            store.save_registry(&*state.registry.read().await).await?;
            if let Some(balances) = state.rail.export_balances() {
                store.save_balances(&balances).await?;
            }
            info!(instance = %ledger.address(), "Bootstrapped empty store");
            return Ok(state);
        };

        let (events, _) = broadcast::channel(EVENT_BUS_CAPACITY);
        let mut instances = HashMap::new();
        // Includes instances deployed but not yet switched to.
        for address in store.list_instances().await? {
            let Some(snapshot) = store.load_snapshot(&address).await? else {
                continue;
            };
            let ledger = Ledger::restore(snapshot, rail.clone(), settings.clone(), events.clone())
                .map_err(|e| StoreError::Corrupt(e.to_string()))?;
            instances.insert(address, Arc::new(ledger));
        }
        if !instances.contains_key(registry.current()) {
            error!(current = %registry.current(), "Registry points at an instance with no snapshot");
        }
        info!(
            current = %registry.current(),
            instances = instances.len(),
            "Restored ledger state"
        );

        Ok(Self {
            registry: Arc::new(RwLock::new(registry)),
            instances: Arc::new(RwLock::new(instances)),
            rail,
            events,
            registry_sequence: Arc::new(AtomicU64::new(0)),
            persist_lock: Arc::new(Mutex::new(())),
            store: Some(store),
            redis: None,
            rate_limit: None,
            auth,
            settings,
            metrics: Arc::new(metrics),
        })
    }

    pub fn with_store(mut self, store: Arc<dyn SnapshotStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn with_rate_limit(mut self, redis: Arc<RedisClient>, limits: RateLimitConfig) -> Self {
        self.redis = Some(redis);
        self.rate_limit = Some(limits);
        self
    }

    /// The instance the registry currently points at.
    pub async fn ledger(&self) -> Result<Arc<Ledger>, AppError> {
        let current = self.registry.read().await.current().clone();
        self.instances
            .read()
            .await
            .get(&current)
            .cloned()
            .ok_or_else(|| AppError::NotFoundError(format!("ledger instance {} is not loaded", current)))
    }

    /// Best effort: the mutation is already committed in memory, so a failed
    /// save is logged rather than reported to the caller.
    pub async fn persist(&self, ledger: &Ledger) {
        let Some(store) = &self.store else {
            return;
        };
        let _guard = self.persist_lock.lock().await;

        if let Err(e) = store.save_snapshot(&ledger.snapshot()).await {
            error!(instance = %ledger.address(), error = %e, "Failed to persist snapshot");
        }
        if let Some(balances) = self.rail.export_balances() {
            if let Err(e) = store.save_balances(&balances).await {
                error!(error = %e, "Failed to persist rail balances");
            }
        }
    }

    pub async fn persist_registry(&self) {
        if let Some(store) = &self.store {
            let registry = self.registry.read().await.clone();
            if let Err(e) = store.save_registry(&registry).await {
                error!(error = %e, "Failed to persist backend registry");
            }
        }
    }

    pub fn publish_registry_event(&self, event: LedgerEvent) {
        let sequence = self.registry_sequence.fetch_add(1, Ordering::SeqCst) + 1;
        let _ = self
            .events
            .send(EventEnvelope::new(Address::new(REGISTRY_ADDRESS), sequence, event));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use skyledger_core::payment::BalanceBook;
    use skyledger_core::Amount;
    use skyledger_order::{BookingRequest, LedgerSnapshot};
    use skyledger_shared::Masked;
    use skyledger_store::MemoryStore;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    const ADMIN: &str = "0xadmin";

    fn auth() -> AuthConfig {
        AuthConfig {
            secret: "state-secret".to_string(),
            expiration: 60,
            issue_tokens: false,
        }
    }

    fn admin() -> Address {
        Address::new(ADMIN)
    }

    /// Stalls the first snapshot save so a later one can try to overtake it.
    #[derive(Default)]
    struct StallingStore {
        inner: MemoryStore,
        saves: AtomicUsize,
    }

    #[async_trait]
    impl SnapshotStore for StallingStore {
        async fn save_snapshot(&self, snapshot: &LedgerSnapshot) -> Result<(), StoreError> {
            if self.saves.fetch_add(1, Ordering::SeqCst) == 0 {
                tokio::time::sleep(Duration::from_millis(50)).await;
            }
            self.inner.save_snapshot(snapshot).await
        }

        async fn load_snapshot(&self, instance: &Address) -> Result<Option<LedgerSnapshot>, StoreError> {
            self.inner.load_snapshot(instance).await
        }

        async fn save_registry(&self, registry: &BackendRegistry) -> Result<(), StoreError> {
            self.inner.save_registry(registry).await
        }

        async fn load_registry(&self) -> Result<Option<BackendRegistry>, StoreError> {
            self.inner.load_registry().await
        }

        async fn list_instances(&self) -> Result<Vec<Address>, StoreError> {
            self.inner.list_instances().await
        }

        async fn save_balances(&self, balances: &[(Address, Amount)]) -> Result<(), StoreError> {
            self.inner.save_balances(balances).await
        }

        async fn load_balances(&self) -> Result<Vec<(Address, Amount)>, StoreError> {
            self.inner.load_balances().await
        }
    }

    #[tokio::test]
    async fn test_overlapping_saves_keep_the_newest_snapshot() {
        let store = Arc::new(StallingStore::default());
        let state = AppState::new(
            admin(),
            Arc::new(BalanceBook::new()),
            LedgerSettings::default(),
            auth(),
            ApiMetrics::new().unwrap(),
        )
        .with_store(store.clone());
        let ledger = state.ledger().await.unwrap();

        ledger
            .add_airline(&admin(), "First Air".to_string(), Address::new("0x1"), None)
            .unwrap();
        let stalled = {
            let state = state.clone();
            let ledger = ledger.clone();
            tokio::spawn(async move { state.persist(&ledger).await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;

        ledger
            .add_airline(&admin(), "Second Air".to_string(), Address::new("0x2"), None)
            .unwrap();
        state.persist(&ledger).await;
        stalled.await.unwrap();

        let stored = store.load_snapshot(ledger.address()).await.unwrap().unwrap();
        assert_eq!(stored.airlines.len(), 2);
        assert_eq!(stored, ledger.snapshot());
    }

    #[tokio::test]
    async fn test_restore_reloads_instances_not_yet_switched_to() {
        let store: Arc<dyn SnapshotStore> = Arc::new(MemoryStore::new());
        let rail: Arc<dyn FundsRail> = Arc::new(BalanceBook::new());
        let state = AppState::restore(
            admin(),
            rail.clone(),
            LedgerSettings::default(),
            auth(),
            ApiMetrics::new().unwrap(),
            store.clone(),
        )
        .await
        .unwrap();

        let staged = Ledger::deploy(admin(), rail.clone(), LedgerSettings::default(), state.events.clone());
        state.persist(&staged).await;

        let restored = AppState::restore(
            admin(),
            rail,
            LedgerSettings::default(),
            auth(),
            ApiMetrics::new().unwrap(),
            store,
        )
        .await
        .unwrap();

        let instances = restored.instances.read().await;
        assert_eq!(instances.len(), 2);
        assert!(instances.contains_key(staged.address()));
        assert_eq!(restored.registry.read().await.current(), state.registry.read().await.current());
    }

    #[tokio::test]
    async fn test_persist_saves_rail_balances() {
        let store = Arc::new(MemoryStore::new());
        let rail = Arc::new(BalanceBook::with_balances([(Address::new("0xbuyer"), 1_000)]));
        let state = AppState::new(
            admin(),
            rail,
            LedgerSettings::default(),
            auth(),
            ApiMetrics::new().unwrap(),
        )
        .with_store(store.clone());
        let ledger = state.ledger().await.unwrap();

        let airline_id = ledger
            .add_airline(&admin(), "Garuda".to_string(), Address::new("0xowner"), None)
            .unwrap();
        let ticket_id = ledger
            .add_ticket(
                &Address::new("0xowner"),
                skyledger_catalog::NewTicket {
                    airline_id,
                    from: "Jakarta".to_string(),
                    to: "Denpasar".to_string(),
                    price: 300,
                    quantity: 1,
                    departure: 1_700_000_000,
                    arrival: 1_700_006_000,
                },
            )
            .unwrap();
        ledger
            .book_flight(
                &Address::new("0xbuyer"),
                BookingRequest {
                    ticket_ids: vec![ticket_id],
                    first_name: Masked("Made".to_string()),
                    last_name: Masked("Wirawan".to_string()),
                    paid: 300,
                },
            )
            .unwrap();
        state.persist(&ledger).await;

        let balances = store.load_balances().await.unwrap();
        assert!(balances.contains(&(Address::new("0xbuyer"), 700)));
        assert!(balances.contains(&(Address::new("0xowner"), 300)));
    }
}
