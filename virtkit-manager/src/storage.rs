//! Persistence for VM registrations and memory usage samples.
//!
//! The database key scheme is deliberate: VM rows carry a durable surrogate
//! `id` alongside the hypervisor's runtime `domain_id`. Runtime ids are
//! recycled across domain restarts, so measurements always reference the
//! surrogate key and write paths translate from `domain_id` first.

use async_trait::async_trait;
use chrono::Utc;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;

use virtkit_common::{Error, MemUsage, Result};

/// How many recent samples a usage-history read returns.
const RECENT_USAGE_LIMIT: i64 = 12;

#[async_trait]
pub trait Datastore: Send + Sync {
    /// Register a VM and return its durable surrogate id.
    async fn create_vm(&self, name: &str, domain_id: i32) -> Result<i64>;

    /// Translate a runtime domain id into the surrogate id. Unregistered
    /// domains are `Error::NotFound`.
    async fn vm_id_for_domain(&self, domain_id: i32) -> Result<i64>;

    /// Append one usage sample, stamped now, for the VM currently holding
    /// `domain_id`.
    async fn record_usage(&self, domain_id: i32, usage: f64) -> Result<()>;

    /// Most recent usage samples for a VM, newest first.
    async fn recent_usage(&self, vm_id: i64) -> Result<Vec<MemUsage>>;
}

pub struct PgDatastore {
    pool: PgPool,
}

impl PgDatastore {
    pub fn new(pool: PgPool) -> Self {
        PgDatastore { pool }
    }

    pub async fn connect(url: &str) -> Result<Self> {
        let pool = PgPoolOptions::new().max_connections(5).connect(url).await?;
        Ok(PgDatastore { pool })
    }
}

#[async_trait]
impl Datastore for PgDatastore {
    async fn create_vm(&self, name: &str, domain_id: i32) -> Result<i64> {
        let id = sqlx::query_scalar::<_, i64>(
            "INSERT INTO vms (name, domain_id) VALUES ($1, $2) RETURNING id",
        )
        .bind(name)
        .bind(domain_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(id)
    }

    async fn vm_id_for_domain(&self, domain_id: i32) -> Result<i64> {
        sqlx::query_scalar::<_, i64>(
            "SELECT id FROM vms WHERE domain_id = $1 ORDER BY created_at DESC LIMIT 1",
        )
        .bind(domain_id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| Error::NotFound(format!("vm for domain {domain_id}")))
    }

    async fn record_usage(&self, domain_id: i32, usage: f64) -> Result<()> {
        let vm_id = self.vm_id_for_domain(domain_id).await?;
        sqlx::query("INSERT INTO measurements (time, vm_id, mem_usage) VALUES ($1, $2, $3)")
            .bind(Utc::now())
            .bind(vm_id)
            .bind(usage)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn recent_usage(&self, vm_id: i64) -> Result<Vec<MemUsage>> {
        let rows = sqlx::query_as::<_, MemUsage>(
            "SELECT time, mem_usage AS usage FROM measurements \
             WHERE vm_id = $1 ORDER BY time DESC LIMIT $2",
        )
        .bind(vm_id)
        .bind(RECENT_USAGE_LIMIT)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }
}
