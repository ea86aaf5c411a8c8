use async_trait::async_trait;
use chrono::{DateTime, Utc};
use skyledger_catalog::{Airline, Ticket};
use skyledger_core::lifecycle::LifecycleState;
use skyledger_core::registry::BackendRegistry;
use skyledger_core::{Address, Amount};
use skyledger_order::{BookedLeg, BookingRecord, LedgerSnapshot};
use skyledger_shared::Masked;
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{Pool, Postgres, Row};
use std::collections::HashMap;
use std::sync::RwLock;
use std::time::Duration;
use tracing::{debug, info};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
    #[error("corrupt record: {0}")]
    Corrupt(String),
}

/// Durable home for ledger snapshots and the backend registry.
#[async_trait]
pub trait SnapshotStore: Send + Sync {
    async fn save_snapshot(&self, snapshot: &LedgerSnapshot) -> Result<(), StoreError>;

    async fn load_snapshot(&self, instance: &Address) -> Result<Option<LedgerSnapshot>, StoreError>;

    async fn save_registry(&self, registry: &BackendRegistry) -> Result<(), StoreError>;

    async fn load_registry(&self) -> Result<Option<BackendRegistry>, StoreError>;

    /// Every instance with a stored snapshot, deployed or not.
    async fn list_instances(&self) -> Result<Vec<Address>, StoreError>;

    async fn save_balances(&self, balances: &[(Address, Amount)]) -> Result<(), StoreError>;

    async fn load_balances(&self) -> Result<Vec<(Address, Amount)>, StoreError>;
}

#[derive(Clone)]
pub struct DbClient {
    pub pool: Pool<Postgres>,
}

impl DbClient {
    pub async fn new(connection_string: &str) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .acquire_timeout(Duration::from_secs(3))
            .connect(connection_string)
            .await?;

        Ok(Self { pool })
    }

    pub async fn migrate(&self) -> Result<(), StoreError> {
        info!("Running database migrations...");
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        info!("Migrations completed successfully.");
        Ok(())
    }
}

#[async_trait]
impl SnapshotStore for DbClient {
    /// Replaces the instance's rows in one transaction, so a reader never
    /// sees half a snapshot.
    async fn save_snapshot(&self, snapshot: &LedgerSnapshot) -> Result<(), StoreError> {
        let instance = snapshot.instance.as_str();
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            "INSERT INTO ledger_config (instance, admin, lifecycle, last_airline_id, last_ticket_id, last_purchase_id, updated_at)
             VALUES ($1, $2, $3, $4, $5, $6, now())
             ON CONFLICT (instance) DO UPDATE SET
                admin = EXCLUDED.admin,
                lifecycle = EXCLUDED.lifecycle,
                last_airline_id = EXCLUDED.last_airline_id,
                last_ticket_id = EXCLUDED.last_ticket_id,
                last_purchase_id = EXCLUDED.last_purchase_id,
                updated_at = now()",
        )
        .bind(instance)
        .bind(snapshot.admin.as_str())
        .bind(lifecycle_label(snapshot.lifecycle))
        .bind(to_db_id(snapshot.last_airline_id)?)
        .bind(to_db_id(snapshot.last_ticket_id)?)
        .bind(to_db_id(snapshot.last_purchase_id)?)
        .execute(&mut *tx)
        .await?;

        for table in ["airlines", "tickets", "booking_records"] {
            sqlx::query(&format!("DELETE FROM {} WHERE instance = $1", table))
                .bind(instance)
                .execute(&mut *tx)
                .await?;
        }

        for airline in &snapshot.airlines {
            sqlx::query("INSERT INTO airlines (instance, id, name, owner, logo_ref) VALUES ($1, $2, $3, $4, $5)")
                .bind(instance)
                .bind(to_db_id(airline.id)?)
                .bind(&airline.name)
                .bind(airline.owner.as_str())
                .bind(&airline.logo_ref)
                .execute(&mut *tx)
                .await?;
        }

        for ticket in &snapshot.tickets {
            sqlx::query(
                "INSERT INTO tickets (instance, id, airline_id, origin, destination, price, quantity, departure, arrival)
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)",
            )
            .bind(instance)
            .bind(to_db_id(ticket.id)?)
            .bind(to_db_id(ticket.airline_id)?)
            .bind(&ticket.from)
            .bind(&ticket.to)
            .bind(ticket.price.to_string())
            .bind(i64::from(ticket.quantity))
            .bind(ticket.departure)
            .bind(ticket.arrival)
            .execute(&mut *tx)
            .await?;
        }

        for record in &snapshot.bookings {
            let legs = serde_json::to_value(&record.legs).map_err(|e| StoreError::Corrupt(e.to_string()))?;
            sqlx::query(
                "INSERT INTO booking_records (instance, purchase_id, buyer, first_name, last_name, total, legs, booked_at)
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
            )
            .bind(instance)
            .bind(to_db_id(record.purchase_id)?)
            .bind(record.buyer.as_str())
            .bind(record.first_name.expose())
            .bind(record.last_name.expose())
            .bind(record.total.to_string())
            .bind(legs)
            .bind(record.booked_at)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        debug!(
            instance,
            airlines = snapshot.airlines.len(),
            tickets = snapshot.tickets.len(),
            bookings = snapshot.bookings.len(),
            "Snapshot saved"
        );
        Ok(())
    }

    async fn load_snapshot(&self, instance: &Address) -> Result<Option<LedgerSnapshot>, StoreError> {
        let Some(config) = sqlx::query(
            "SELECT admin, lifecycle, last_airline_id, last_ticket_id, last_purchase_id FROM ledger_config WHERE instance = $1",
        )
        .bind(instance.as_str())
        .fetch_optional(&self.pool)
        .await?
        else {
            return Ok(None);
        };

        let airlines = sqlx::query("SELECT id, name, owner, logo_ref FROM airlines WHERE instance = $1 ORDER BY id")
            .bind(instance.as_str())
            .fetch_all(&self.pool)
            .await?
            .iter()
            .map(airline_from_row)
            .collect::<Result<Vec<_>, _>>()?;

        let tickets = sqlx::query(
            "SELECT id, airline_id, origin, destination, price, quantity, departure, arrival
             FROM tickets WHERE instance = $1 ORDER BY id",
        )
        .bind(instance.as_str())
        .fetch_all(&self.pool)
        .await?
        .iter()
        .map(ticket_from_row)
        .collect::<Result<Vec<_>, _>>()?;

        let bookings = sqlx::query(
            "SELECT purchase_id, buyer, first_name, last_name, total, legs, booked_at
             FROM booking_records WHERE instance = $1 ORDER BY purchase_id",
        )
        .bind(instance.as_str())
        .fetch_all(&self.pool)
        .await?
        .iter()
        .map(booking_from_row)
        .collect::<Result<Vec<_>, _>>()?;

        Ok(Some(LedgerSnapshot {
            instance: instance.clone(),
            admin: Address::new(config.try_get::<String, _>("admin")?),
            lifecycle: parse_lifecycle(&config.try_get::<String, _>("lifecycle")?)?,
            airlines,
            last_airline_id: from_db_id(config.try_get("last_airline_id")?)?,
            tickets,
            last_ticket_id: from_db_id(config.try_get("last_ticket_id")?)?,
            bookings,
            last_purchase_id: from_db_id(config.try_get("last_purchase_id")?)?,
        }))
    }

    async fn save_registry(&self, registry: &BackendRegistry) -> Result<(), StoreError> {
        let history: Vec<&str> = registry.history().iter().map(Address::as_str).collect();
        let history = serde_json::to_value(history).map_err(|e| StoreError::Corrupt(e.to_string()))?;

        sqlx::query(
            "INSERT INTO backend_registry (id, admin, current_instance, history) VALUES (1, $1, $2, $3)
             ON CONFLICT (id) DO UPDATE SET
                admin = EXCLUDED.admin,
                current_instance = EXCLUDED.current_instance,
                history = EXCLUDED.history",
        )
        .bind(registry.admin().as_str())
        .bind(registry.current().as_str())
        .bind(history)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn load_registry(&self) -> Result<Option<BackendRegistry>, StoreError> {
        let row = sqlx::query("SELECT admin, current_instance, history FROM backend_registry WHERE id = 1")
            .fetch_optional(&self.pool)
            .await?;

        row.map(|row| -> Result<BackendRegistry, StoreError> {
            let history: Vec<Address> = serde_json::from_value(row.try_get("history")?)
                .map_err(|e| StoreError::Corrupt(e.to_string()))?;
            Ok(BackendRegistry::restore(
                Address::new(row.try_get::<String, _>("admin")?),
                Address::new(row.try_get::<String, _>("current_instance")?),
                history,
            ))
        })
        .transpose()
    }

    async fn list_instances(&self) -> Result<Vec<Address>, StoreError> {
        let rows = sqlx::query("SELECT instance FROM ledger_config ORDER BY instance")
            .fetch_all(&self.pool)
            .await?;
        rows.iter()
            .map(|row| -> Result<Address, StoreError> { Ok(Address::new(row.try_get::<String, _>("instance")?)) })
            .collect()
    }

    async fn save_balances(&self, balances: &[(Address, Amount)]) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;
        for (account, balance) in balances {
            sqlx::query(
                "INSERT INTO rail_balances (account, balance) VALUES ($1, $2)
                 ON CONFLICT (account) DO UPDATE SET balance = EXCLUDED.balance",
            )
            .bind(account.as_str())
            .bind(balance.to_string())
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn load_balances(&self) -> Result<Vec<(Address, Amount)>, StoreError> {
        let rows = sqlx::query("SELECT account, balance FROM rail_balances ORDER BY account")
            .fetch_all(&self.pool)
            .await?;
        rows.iter()
            .map(|row| -> Result<(Address, Amount), StoreError> {
                Ok((
                    Address::new(row.try_get::<String, _>("account")?),
                    parse_amount(&row.try_get::<String, _>("balance")?)?,
                ))
            })
            .collect()
    }
}

/// Keeps snapshots in process memory. Used when no database is configured.
#[derive(Debug, Default)]
pub struct MemoryStore {
    snapshots: RwLock<HashMap<Address, LedgerSnapshot>>,
    registry: RwLock<Option<BackendRegistry>>,
    balances: RwLock<HashMap<Address, Amount>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SnapshotStore for MemoryStore {
    async fn save_snapshot(&self, snapshot: &LedgerSnapshot) -> Result<(), StoreError> {
        self.snapshots
            .write()
            .map_err(|_| StoreError::Corrupt("snapshot map lock poisoned".to_string()))?
            .insert(snapshot.instance.clone(), snapshot.clone());
        Ok(())
    }

    async fn load_snapshot(&self, instance: &Address) -> Result<Option<LedgerSnapshot>, StoreError> {
        let snapshots = self
            .snapshots
            .read()
            .map_err(|_| StoreError::Corrupt("snapshot map lock poisoned".to_string()))?;
        Ok(snapshots.get(instance).cloned())
    }

    async fn save_registry(&self, registry: &BackendRegistry) -> Result<(), StoreError> {
        *self
            .registry
            .write()
            .map_err(|_| StoreError::Corrupt("registry lock poisoned".to_string()))? = Some(registry.clone());
        Ok(())
    }

    async fn load_registry(&self) -> Result<Option<BackendRegistry>, StoreError> {
        let registry = self
            .registry
            .read()
            .map_err(|_| StoreError::Corrupt("registry lock poisoned".to_string()))?;
        Ok(registry.clone())
    }

    async fn list_instances(&self) -> Result<Vec<Address>, StoreError> {
        let snapshots = self
            .snapshots
            .read()
            .map_err(|_| StoreError::Corrupt("snapshot map lock poisoned".to_string()))?;
        let mut instances: Vec<Address> = snapshots.keys().cloned().collect();
        instances.sort();
        Ok(instances)
    }

    async fn save_balances(&self, balances: &[(Address, Amount)]) -> Result<(), StoreError> {
        self.balances
            .write()
            .map_err(|_| StoreError::Corrupt("balance map lock poisoned".to_string()))?
            .extend(balances.iter().cloned());
        Ok(())
    }

    async fn load_balances(&self) -> Result<Vec<(Address, Amount)>, StoreError> {
        let balances = self
            .balances
            .read()
            .map_err(|_| StoreError::Corrupt("balance map lock poisoned".to_string()))?;
        let mut balances: Vec<(Address, Amount)> = balances.iter().map(|(a, b)| (a.clone(), *b)).collect();
        balances.sort();
        Ok(balances)
    }
}

fn airline_from_row(row: &PgRow) -> Result<Airline, StoreError> {
    Ok(Airline {
        id: from_db_id(row.try_get("id")?)?,
        name: row.try_get("name")?,
        owner: Address::new(row.try_get::<String, _>("owner")?),
        logo_ref: row.try_get("logo_ref")?,
    })
}

fn ticket_from_row(row: &PgRow) -> Result<Ticket, StoreError> {
    let quantity: i64 = row.try_get("quantity")?;
    Ok(Ticket {
        id: from_db_id(row.try_get("id")?)?,
        airline_id: from_db_id(row.try_get("airline_id")?)?,
        from: row.try_get("origin")?,
        to: row.try_get("destination")?,
        price: parse_amount(&row.try_get::<String, _>("price")?)?,
        quantity: u32::try_from(quantity).map_err(|_| StoreError::Corrupt(format!("quantity {}", quantity)))?,
        departure: row.try_get("departure")?,
        arrival: row.try_get("arrival")?,
    })
}

fn booking_from_row(row: &PgRow) -> Result<BookingRecord, StoreError> {
    let legs: Vec<BookedLeg> =
        serde_json::from_value(row.try_get("legs")?).map_err(|e| StoreError::Corrupt(e.to_string()))?;
    let booked_at: DateTime<Utc> = row.try_get("booked_at")?;
    Ok(BookingRecord {
        purchase_id: from_db_id(row.try_get("purchase_id")?)?,
        legs,
        buyer: Address::new(row.try_get::<String, _>("buyer")?),
        first_name: Masked(row.try_get("first_name")?),
        last_name: Masked(row.try_get("last_name")?),
        total: parse_amount(&row.try_get::<String, _>("total")?)?,
        booked_at,
    })
}

// Postgres has no unsigned integers; ids live in BIGINT and amounts in TEXT.

fn to_db_id(id: u64) -> Result<i64, StoreError> {
    i64::try_from(id).map_err(|_| StoreError::Corrupt(format!("id {} exceeds BIGINT", id)))
}

fn from_db_id(id: i64) -> Result<u64, StoreError> {
    u64::try_from(id).map_err(|_| StoreError::Corrupt(format!("negative id {}", id)))
}

fn parse_amount(value: &str) -> Result<Amount, StoreError> {
    value
        .parse()
        .map_err(|_| StoreError::Corrupt(format!("amount '{}'", value)))
}

fn lifecycle_label(state: LifecycleState) -> &'static str {
    match state {
        LifecycleState::Active => "ACTIVE",
        LifecycleState::Paused => "PAUSED",
        LifecycleState::Destroyed => "DESTROYED",
    }
}

fn parse_lifecycle(label: &str) -> Result<LifecycleState, StoreError> {
    match label {
        "ACTIVE" => Ok(LifecycleState::Active),
        "PAUSED" => Ok(LifecycleState::Paused),
        "DESTROYED" => Ok(LifecycleState::Destroyed),
        other => Err(StoreError::Corrupt(format!("lifecycle state '{}'", other))),
    }
}
