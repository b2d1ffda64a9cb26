use super::client::{open_session, parse_oid, perform_get, QueryClient, SNMP_TIMEOUT_SECS};
use super::types::{SnmpError, SnmpResult, SnmpValue, SnmpVersion};
use crate::config::Target;
use crate::secret::SecretString;
use async_trait::async_trait;
use snmp2::SyncSession;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot};

/// Requests a worker holds beyond the one in flight. A full queue means the
/// target is not keeping up, which callers see as a timeout.
const SESSION_QUEUE_DEPTH: usize = 8;

/// Request handed to a session worker thread
#[derive(Debug)]
enum SessionRequest {
    Get {
        oid: String,
        response_tx: oneshot::Sender<SnmpResult<SnmpValue>>,
    },
    Shutdown,
}

/// Everything that makes two targets share (or not share) a session
#[derive(Clone, PartialEq, Eq, Hash)]
struct SessionKey {
    host: String,
    port: u16,
    version: SnmpVersion,
    community: SecretString,
}

impl SessionKey {
    fn for_target(target: &Target) -> Self {
        Self {
            host: target.host.clone(),
            port: target.port,
            version: target.version,
            community: target.community.clone(),
        }
    }

    fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// One worker thread holding a persistent session to a single target
struct SessionWorker {
    addr: String,
    request_tx: mpsc::Sender<SessionRequest>,
}

impl SessionWorker {
    fn spawn(key: SessionKey, timeout: Duration) -> std::io::Result<Self> {
        let (request_tx, request_rx) = mpsc::channel(SESSION_QUEUE_DEPTH);
        let addr = key.addr();

        std::thread::Builder::new()
            .name(format!("snmp-{}", addr))
            .spawn(move || run_session_thread(key, timeout, request_rx))?;

        tracing::debug!("Spawned SNMP session worker for {}", addr);

        Ok(Self { addr, request_tx })
    }

    async fn get(&self, oid: String) -> SnmpResult<SnmpValue> {
        let (response_tx, response_rx) = oneshot::channel();

        match self
            .request_tx
            .try_send(SessionRequest::Get { oid, response_tx })
        {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                tracing::debug!("Session queue for {} is full", self.addr);
                return Err(SnmpError::Timeout);
            }
            Err(TrySendError::Closed(_)) => {
                return Err(SnmpError::RequestFailed("Session worker died".into()));
            }
        }

        response_rx
            .await
            .map_err(|_| SnmpError::RequestFailed("Session worker didn't respond".into()))?
    }

    /// A worker with a full queue stops once its last sender is dropped
    fn shutdown(&self) {
        let _ = self.request_tx.try_send(SessionRequest::Shutdown);
    }
}

/// Pooled SNMP client: one persistent session per target, each on its own
/// thread, so a hung target only ever blocks its own worker.
#[derive(Clone)]
pub struct PooledClient {
    workers: Arc<RwLock<HashMap<SessionKey, Arc<SessionWorker>>>>,
    timeout: Duration,
}

impl PooledClient {
    pub fn new() -> Self {
        Self::with_timeout(Duration::from_secs(SNMP_TIMEOUT_SECS))
    }

    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            workers: Arc::new(RwLock::new(HashMap::new())),
            timeout,
        }
    }

    fn get_or_spawn(&self, target: &Target) -> SnmpResult<Arc<SessionWorker>> {
        let key = SessionKey::for_target(target);

        // Read lock first (fast path if the worker exists)
        {
            let workers = self
                .workers
                .read()
                .map_err(|_| SnmpError::RequestFailed("Session pool lock poisoned".into()))?;
            if let Some(worker) = workers.get(&key) {
                return Ok(Arc::clone(worker));
            }
        }

        let mut workers = self
            .workers
            .write()
            .map_err(|_| SnmpError::RequestFailed("Session pool lock poisoned".into()))?;

        // Another caller may have created it while we waited for the write lock
        if let Some(worker) = workers.get(&key) {
            return Ok(Arc::clone(worker));
        }

        let worker = Arc::new(
            SessionWorker::spawn(key.clone(), self.timeout)
                .map_err(|e| SnmpError::RequestFailed(format!("Failed to spawn worker: {}", e)))?,
        );
        workers.insert(key, Arc::clone(&worker));
        tracing::info!(
            "Opened pooled SNMP session for {} (total: {})",
            worker.addr,
            workers.len()
        );

        Ok(worker)
    }

    #[cfg(test)]
    fn count(&self) -> usize {
        self.workers.read().map(|w| w.len()).unwrap_or(0)
    }

    /// Stop every worker thread
    pub fn shutdown_all(&self) {
        let Ok(mut workers) = self.workers.write() else {
            return;
        };
        if !workers.is_empty() {
            tracing::info!("Closing {} pooled SNMP sessions", workers.len());
        }
        for (_, worker) in workers.drain() {
            worker.shutdown();
        }
    }
}

impl Default for PooledClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl QueryClient for PooledClient {
    async fn fetch(&self, target: &Target, oid: &str) -> SnmpResult<SnmpValue> {
        // Reject malformed OIDs before they reach the worker queue
        parse_oid(oid)?;
        let worker = self.get_or_spawn(target)?;
        worker.get(oid.to_string()).await
    }
}

/// Worker loop (blocking). The session is opened lazily and dropped after
/// any failure so the next request starts from a clean socket.
fn run_session_thread(
    key: SessionKey,
    timeout: Duration,
    mut request_rx: mpsc::Receiver<SessionRequest>,
) {
    let addr = key.addr();
    let mut session = None;

    while let Some(request) = request_rx.blocking_recv() {
        match request {
            // The caller already gave up; do not spend a round trip on it
            SessionRequest::Get { response_tx, .. } if response_tx.is_closed() => {
                tracing::debug!("Skipping abandoned request for {}", addr);
            }
            SessionRequest::Get { oid, response_tx } => {
                let result = get_on_session(&mut session, &key, timeout, &oid);
                if result.is_err() {
                    session = None;
                }
                let _ = response_tx.send(result);
            }
            SessionRequest::Shutdown => break,
        }
    }

    tracing::debug!("SNMP session worker stopped for {}", addr);
}

fn get_on_session(
    session: &mut Option<SyncSession>,
    key: &SessionKey,
    timeout: Duration,
    oid: &str,
) -> SnmpResult<SnmpValue> {
    let oid = parse_oid(oid)?;
    if session.is_none() {
        *session = Some(open_session(
            &key.addr(),
            key.community.expose().as_bytes(),
            key.version,
            timeout,
        )?);
    }
    match session.as_mut() {
        Some(s) => perform_get(s, &oid),
        None => Err(SnmpError::NetworkUnreachable),
    }
}
