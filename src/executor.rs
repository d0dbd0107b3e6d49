//! Transactional Write Executor
//!
//! The batch manager only sees these two traits. `Neo4jExecutor` backs them
//! with a `neo4rs` transaction; tests use the in-memory executor in `mock`.

use crate::cypher::Params;
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use neo4rs::{query, BoltNull, BoltType};
use serde_json::Value;
use std::collections::HashMap;
use tokio::sync::Mutex;

/// One open write transaction. Everything run through it commits or rolls
/// back together.
#[async_trait]
pub trait WriteTransaction: Send + Sync {
    /// Takes `&self` so a chunk's statements can be issued concurrently.
    async fn run(&self, query: &str, params: &Params) -> Result<()>;
    async fn commit(self: Box<Self>) -> Result<()>;
    async fn rollback(self: Box<Self>) -> Result<()>;
}

#[async_trait]
pub trait TransactionalExecutor: Send + Sync {
    async fn begin(&self) -> Result<Box<dyn WriteTransaction>>;
}

// ============================================================================
// Neo4j
// ============================================================================

pub struct Neo4jExecutor {
    graph: neo4rs::Graph,
}

impl Neo4jExecutor {
    pub fn new(graph: neo4rs::Graph) -> Self {
        Self { graph }
    }
}

#[async_trait]
impl TransactionalExecutor for Neo4jExecutor {
    async fn begin(&self) -> Result<Box<dyn WriteTransaction>> {
        let txn = self.graph.start_txn().await.context("Failed to start transaction")?;
        Ok(Box::new(Neo4jTransaction { txn: Mutex::new(txn) }))
    }
}

/// The driver needs `&mut Txn` per statement, so concurrent `run` calls
/// queue on the mutex.
struct Neo4jTransaction {
    txn: Mutex<neo4rs::Txn>,
}

#[async_trait]
impl WriteTransaction for Neo4jTransaction {
    async fn run(&self, cypher: &str, params: &Params) -> Result<()> {
        let mut q = query(cypher);
        for (key, value) in params {
            q = q.param(key, json_to_bolt(value).with_context(|| format!("Invalid value for parameter {}", key))?);
        }

        let mut txn = self.txn.lock().await;
        txn.run(q).await.context("Failed to run statement in transaction")?;
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        self.txn
            .into_inner()
            .commit()
            .await
            .context("Failed to commit transaction")?;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        self.txn
            .into_inner()
            .rollback()
            .await
            .context("Failed to rollback transaction")?;
        Ok(())
    }
}

/// Bolt integers are `i64`; an unsigned value above `i64::MAX` is rejected
/// rather than rounded through `f64`.
pub fn json_to_bolt(value: &Value) -> Result<BoltType> {
    let bolt = match value {
        Value::Null => BoltType::Null(BoltNull),
        Value::Bool(b) => (*b).into(),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                i.into()
            } else if n.is_u64() {
                return Err(anyhow!("Integer {} does not fit in a 64-bit signed integer", n));
            } else {
                n.as_f64()
                    .ok_or_else(|| anyhow!("Number {} is not representable as a float", n))?
                    .into()
            }
        }
        Value::String(s) => s.clone().into(),
        Value::Array(items) => items
            .iter()
            .map(json_to_bolt)
            .collect::<Result<Vec<BoltType>>>()?
            .into(),
        Value::Object(map) => map
            .iter()
            .map(|(k, v)| Ok((k.clone(), json_to_bolt(v)?)))
            .collect::<Result<HashMap<String, BoltType>>>()?
            .into(),
    };
    Ok(bolt)
}
