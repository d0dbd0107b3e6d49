use anyhow::{Context, Result};
use bank_graph_import::batch::BatchOptions;
use bank_graph_import::pipeline::{EntityTable, GraphImporter, ImportOptions, ImportPhase, ImportSummary};
use bank_graph_import::{BatchProgress, DetectorOptions, Neo4jExecutor, RecordData};
use redis::AsyncCommands;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::env;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

const IDLE_POLL_DELAY: Duration = Duration::from_secs(2);
const ERROR_POLL_DELAY: Duration = Duration::from_secs(5);

/// Rows of one sheet as produced by the upload service's tabular parser.
#[derive(Debug, Serialize, Deserialize, Clone)]
struct ImportTable {
    entity_type: String,
    #[serde(default)]
    headers: Vec<String>,
    #[serde(default)]
    rows: Vec<serde_json::Map<String, Value>>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
struct ImportJob {
    job_id: String,
    #[serde(default)]
    dataset_id: Option<String>,
    tables: Vec<ImportTable>,
}

#[derive(Debug, Serialize)]
pub struct JobUpdatePayload {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub progress: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result_summary: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl JobUpdatePayload {
    fn progress(progress: i32) -> Self {
        Self {
            status: None,
            progress: Some(progress),
            result_summary: None,
            error: None,
        }
    }
}

#[derive(Clone)]
pub struct ApiClient {
    client: reqwest::Client,
    base_url: String,
}

impl ApiClient {
    pub fn new(base_url: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url,
        }
    }

    pub async fn update_job(&self, job_id: &str, payload: JobUpdatePayload) -> Result<()> {
        let url = format!("{}/api/v1/jobs/{}", self.base_url, job_id);

        let response = self
            .client
            .patch(&url)
            .json(&payload)
            .send()
            .await
            .context("Failed to send update request")?;

        if !response.status().is_success() {
            let error_text = response.text().await.unwrap_or_default();
            error!("Failed to update job status: {}", error_text);
            return Err(anyhow::anyhow!("API Error: {}", error_text));
        }

        info!(
            "📊 Updated job {} (status={:?}, progress={:?})",
            job_id, payload.status, payload.progress
        );

        Ok(())
    }
}

#[derive(Debug)]
struct Config {
    redis_url: String,
    neo4j_uri: String,
    neo4j_user: String,
    neo4j_password: String,
    api_gateway_url: String,
    import_queue: String,
    batch_size: usize,
    max_retries: u32,
    retry_base_delay: Duration,
    min_confidence: f64,
}

impl Config {
    fn from_env() -> Result<Self> {
        dotenv::dotenv().ok();

        Ok(Config {
            redis_url: env::var("REDIS_URL").unwrap_or_else(|_| "redis://localhost:6379".to_string()),
            neo4j_uri: env::var("NEO4J_URI").unwrap_or_else(|_| "bolt://localhost:7687".to_string()),
            neo4j_user: env::var("NEO4J_USER").unwrap_or_else(|_| "neo4j".to_string()),
            neo4j_password: env::var("NEO4J_PASSWORD").unwrap_or_else(|_| "password".to_string()),
            api_gateway_url: env::var("API_GATEWAY_URL").unwrap_or_else(|_| "http://localhost:8080".to_string()),
            import_queue: env::var("IMPORT_QUEUE").unwrap_or_else(|_| "import_queue".to_string()),
            batch_size: env_parse("IMPORT_BATCH_SIZE", bank_graph_import::batch::DEFAULT_BATCH_SIZE)?,
            max_retries: env_parse("IMPORT_MAX_RETRIES", bank_graph_import::batch::DEFAULT_MAX_RETRIES)?,
            retry_base_delay: Duration::from_millis(env_parse("IMPORT_RETRY_BASE_MS", 1000u64)?),
            min_confidence: env_parse("IMPORT_MIN_CONFIDENCE", bank_graph_import::pipeline::DEFAULT_MIN_CONFIDENCE)?,
        })
    }

    fn import_options(&self, dataset_id: Option<String>) -> ImportOptions {
        ImportOptions {
            dataset_id,
            min_confidence: self.min_confidence,
            batch: BatchOptions {
                batch_size: self.batch_size,
                max_retries: self.max_retries,
                base_delay: self.retry_base_delay,
                on_progress: None,
            },
            on_progress: None,
        }
    }
}

fn env_parse<T>(key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse()
            .with_context(|| format!("Invalid value for {}: {:?}", key, raw)),
        Err(_) => Ok(default),
    }
}

/// Connect to Redis with exponential backoff retry logic
async fn connect_redis_with_retry(url: &str, max_retries: u32) -> Result<redis::Client> {
    use tokio::time::sleep;

    for attempt in 1..=max_retries {
        info!("🔄 Attempting to connect to Redis at {}... (attempt {}/{})", url, attempt, max_retries);

        let outcome = match redis::Client::open(url) {
            Ok(client) => client.get_async_connection().await.map(|_| client),
            Err(e) => Err(e),
        };

        match outcome {
            Ok(client) => {
                info!("✅ Successfully connected to Redis");
                return Ok(client);
            }
            Err(e) if attempt < max_retries => {
                let wait_time = 2u64.pow(attempt - 1); // 1s, 2s, 4s, 8s
                warn!(
                    "⚠️  Failed to connect to Redis: {}. Retrying in {}s (attempt {}/{})...",
                    e, wait_time, attempt, max_retries
                );
                sleep(Duration::from_secs(wait_time)).await;
            }
            Err(e) => {
                error!("❌ Failed to connect to Redis after {} attempts: {}", max_retries, e);
                return Err(anyhow::anyhow!("Redis connection failed after {} retries: {}", max_retries, e));
            }
        }
    }

    Err(anyhow::anyhow!("Failed to connect to Redis"))
}

/// Connect to Neo4j with exponential backoff retry logic
async fn connect_neo4j_with_retry(uri: &str, user: &str, password: &str, max_retries: u32) -> Result<neo4rs::Graph> {
    use tokio::time::sleep;

    for attempt in 1..=max_retries {
        info!("🔄 Attempting to connect to Neo4j at {}... (attempt {}/{})", uri, attempt, max_retries);

        match neo4rs::Graph::new(uri, user, password).await {
            Ok(graph) => {
                info!("✅ Successfully connected to Neo4j");
                return Ok(graph);
            }
            Err(e) => {
                if attempt < max_retries {
                    let wait_time = 2u64.pow(attempt - 1);
                    warn!(
                        "⚠️  Failed to connect to Neo4j: {}. Retrying in {}s (attempt {}/{})...",
                        e, wait_time, attempt, max_retries
                    );
                    sleep(Duration::from_secs(wait_time)).await;
                } else {
                    error!("❌ Failed to connect to Neo4j after {} attempts: {}", max_retries, e);
                    return Err(anyhow::anyhow!("Neo4j connection failed after {} retries: {}", max_retries, e));
                }
            }
        }
    }

    Err(anyhow::anyhow!("Failed to connect to Neo4j"))
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()),
        )
        .init();

    info!("🚀 Graph Import Worker starting...");

    let config = Config::from_env()?;
    let api_client = ApiClient::new(config.api_gateway_url.clone());

    let redis_client = connect_redis_with_retry(&config.redis_url, 4).await?;
    let mut redis_conn = redis_client
        .get_async_connection()
        .await
        .context("Failed to get Redis async connection")?;

    let graph = connect_neo4j_with_retry(&config.neo4j_uri, &config.neo4j_user, &config.neo4j_password, 4).await?;
    let executor = Neo4jExecutor::new(graph);
    let importer = GraphImporter::new(DetectorOptions::default())?;

    let shutdown = Arc::new(AtomicBool::new(false));
    let shutdown_clone = shutdown.clone();

    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("🛑 Shutdown signal received, finishing current job...");
                shutdown_clone.store(true, Ordering::SeqCst);
            }
            Err(err) => {
                error!("Failed to listen for shutdown signal: {}", err);
            }
        }
    });

    info!("👂 Listening for jobs on {}...", config.import_queue);
    while !shutdown.load(Ordering::SeqCst) {
        let outcome = process_job(&mut redis_conn, &executor, &importer, &api_client, &config).await;
        if let Err(e) = &outcome {
            error!("Error processing job: {:?}", e);
        }
        if let Some(delay) = poll_delay(&outcome) {
            tokio::time::sleep(delay).await;
        }
    }

    info!("👋 Graph Import Worker shutdown complete");
    Ok(())
}

/// Pause before the next poll: none right after a job, a short one when the
/// queue was empty, a longer one after an error.
fn poll_delay(outcome: &Result<bool>) -> Option<Duration> {
    match outcome {
        Ok(true) => None,
        Ok(false) => Some(IDLE_POLL_DELAY),
        Err(_) => Some(ERROR_POLL_DELAY),
    }
}

async fn process_job(
    redis_conn: &mut redis::aio::Connection,
    executor: &Neo4jExecutor,
    importer: &GraphImporter,
    api_client: &ApiClient,
    config: &Config,
) -> Result<bool> {
    // RPOP rather than BRPOP: older Redis builds reject the float timeout
    let result: Option<String> = redis_conn
        .rpop(&config.import_queue, None)
        .await
        .context("Failed to pop from Redis queue")?;

    let Some(job_json) = result else {
        return Ok(false);
    };

    let job: ImportJob = serde_json::from_str(&job_json).context("Failed to deserialize job")?;
    info!("📝 Processing import job {} ({} tables)", job.job_id, job.tables.len());

    let payload = JobUpdatePayload {
        status: Some("PROCESSING".to_string()),
        ..JobUpdatePayload::progress(0)
    };
    if let Err(e) = api_client.update_job(&job.job_id, payload).await {
        error!("Failed to update job status to PROCESSING: {:?}", e);
    }

    match run_import(&job, executor, importer, api_client, config).await {
        Ok(summary) => {
            info!(
                "✅ Import job {} done: {} nodes, {} relationships",
                job.job_id, summary.nodes.succeeded, summary.relationships.succeeded
            );
            let payload = JobUpdatePayload {
                status: Some("COMPLETED".to_string()),
                progress: Some(100),
                result_summary: Some(serde_json::to_value(&summary).unwrap_or_default()),
                error: None,
            };
            if let Err(e) = api_client.update_job(&job.job_id, payload).await {
                error!("Failed to update job status to COMPLETED: {:?}", e);
            }
        }
        Err(e) => {
            error!("❌ Failed to process import job {}: {:?}", job.job_id, e);
            let payload = JobUpdatePayload {
                status: Some("FAILED".to_string()),
                progress: None,
                result_summary: None,
                error: Some(format!("{:?}", e)),
            };
            if let Err(e) = api_client.update_job(&job.job_id, payload).await {
                error!("Failed to update job status to FAILED: {:?}", e);
            }
        }
    }

    Ok(true)
}

async fn run_import(
    job: &ImportJob,
    executor: &Neo4jExecutor,
    importer: &GraphImporter,
    api_client: &ApiClient,
    config: &Config,
) -> Result<ImportSummary> {
    let tables = to_entity_tables(&job.tables);

    // Progress callbacks are synchronous; the HTTP updates happen on a
    // separate task fed through a channel.
    let (tx, mut rx) = mpsc::unbounded_channel::<i32>();
    let forwarder = {
        let api_client = api_client.clone();
        let job_id = job.job_id.clone();
        tokio::spawn(async move {
            while let Some(progress) = rx.recv().await {
                if let Err(e) = api_client.update_job(&job_id, JobUpdatePayload::progress(progress)).await {
                    warn!("Failed to report progress {}%: {:?}", progress, e);
                }
            }
        })
    };

    let mut options = config.import_options(job.dataset_id.clone());
    options.on_progress = Some(Arc::new(move |phase: ImportPhase, p: BatchProgress| {
        let _ = tx.send(progress_percent(phase, &p));
    }));

    let outcome = importer.import(executor, &tables, &options).await;

    drop(options);
    if let Err(e) = forwarder.await {
        warn!("Progress reporter task failed: {}", e);
    }

    outcome
}

/// Nodes cover 5-50%, relationships 50-95%; 100% is reserved for COMPLETED.
fn progress_percent(phase: ImportPhase, progress: &BatchProgress) -> i32 {
    let fraction = if progress.total_items == 0 {
        1.0
    } else {
        progress.items_processed as f64 / progress.total_items as f64
    };
    let base = match phase {
        ImportPhase::Nodes => 5.0,
        ImportPhase::Relationships => 50.0,
    };
    (base + fraction * 45.0).round() as i32
}

/// Rows arrive as JSON objects; a key that is present is a value (possibly
/// null), a key that is missing is absent.
fn to_entity_tables(tables: &[ImportTable]) -> Vec<EntityTable> {
    tables
        .iter()
        .map(|table| {
            let headers = if table.headers.is_empty() {
                let mut keys: Vec<String> = table.rows.iter().flat_map(|row| row.keys().cloned()).collect();
                keys.sort();
                keys.dedup();
                keys
            } else {
                table.headers.clone()
            };

            let rows = table
                .rows
                .iter()
                .map(|row| {
                    row.iter()
                        .map(|(k, v)| (k.clone(), Some(v.clone())))
                        .collect::<RecordData>()
                })
                .collect();

            EntityTable {
                entity_type: table.entity_type.clone(),
                headers,
                rows,
            }
        })
        .collect()
}
