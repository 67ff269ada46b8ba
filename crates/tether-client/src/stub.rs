use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::de::DeserializeOwned;
use tracing::debug;

use tether_common::{Command, Result, RpcResult, TetherError};
use tether_metrics::{CallMeasurer, ClientMeasurer};

use crate::config::SelectionPolicy;
use crate::pool::ConnectionPool;

/// Default time a stub call waits for a proxy and then for the response.
pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(30);

/// Request/response helper on top of a [`ConnectionPool`].
///
/// A call selects a proxy, sends the command, waits for the response and
/// unwraps the result:
///
/// - a cancelled request becomes [`TetherError::Cancelled`]
/// - an exceptional result becomes [`TetherError::ServerSide`]
/// - a timed out request is cancelled and becomes [`TetherError::Timeout`]
///
/// Every call is recorded in the stub's [`CallMeasurer`].
///
/// # Example
///
/// ```rust,no_run
/// use std::sync::Arc;
/// use tether_client::{ClientConfig, ConnectionPool, RemoteServer, RemoteStub};
/// use tether_common::{Command, Param};
/// use serde_json::json;
///
/// # #[tokio::main]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let pool = Arc::new(ConnectionPool::new(ClientConfig::with_servers(vec![
///     RemoteServer::new("127.0.0.1", 9090),
/// ])));
/// pool.start_up().await?;
///
/// let stub = RemoteStub::new(pool);
/// let sum: i64 = stub
///     .call_as(
///         Command::new("demo.Math", "add")
///             .with_static(true)
///             .with_param(Param::new(json!(1), "long"))
///             .with_param(Param::new(json!(2), "long")),
///     )
///     .await?;
/// assert_eq!(sum, 3);
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct RemoteStub {
    pool: Arc<ConnectionPool>,
    measurer: Arc<dyn CallMeasurer>,
    timeout: Duration,
    policy: Option<SelectionPolicy>,
}

impl RemoteStub {
    pub fn new(pool: Arc<ConnectionPool>) -> Self {
        Self {
            pool,
            measurer: Arc::new(ClientMeasurer::new()),
            timeout: DEFAULT_CALL_TIMEOUT,
            policy: None,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Overrides the pool's configured selection policy.
    pub fn with_policy(mut self, policy: SelectionPolicy) -> Self {
        self.policy = Some(policy);
        self
    }

    pub fn with_measurer(mut self, measurer: Arc<dyn CallMeasurer>) -> Self {
        self.measurer = measurer;
        self
    }

    pub fn measurer(&self) -> &Arc<dyn CallMeasurer> {
        &self.measurer
    }

    pub fn pool(&self) -> &Arc<ConnectionPool> {
        &self.pool
    }

    /// Performs one remote call and returns its non-exceptional result.
    pub async fn call(&self, command: Command) -> Result<RpcResult> {
        let method = command.qualified_name();
        let start = Instant::now();

        let outcome = self.invoke(command).await;
        self.measurer.record_call(&method, start, outcome.is_ok());
        if let Err(e) = &outcome {
            debug!(method = %method, error = %e, "remote call failed");
        }
        outcome
    }

    /// Performs one remote call and deserializes the returned value.
    pub async fn call_as<T: DeserializeOwned>(&self, command: Command) -> Result<T> {
        let result = self.call(command).await?;
        Ok(serde_json::from_value(result.return_value)?)
    }

    async fn invoke(&self, command: Command) -> Result<RpcResult> {
        let policy = match self.policy {
            Some(policy) => policy,
            None => self.pool.config().selection,
        };

        let proxy = self.pool.select_proxy_timeout(policy, self.timeout).await?;
        let future = proxy.send(command)?;

        let response = match future.get_timeout(self.timeout).await {
            Ok(response) => response,
            Err(e @ TetherError::Timeout(_)) => {
                future.cancel();
                return Err(e);
            }
            Err(e) => return Err(e),
        };

        let result = response.result.ok_or_else(|| {
            TetherError::ServerSide(format!("response {} carried no result", response.id))
        })?;

        match result.error_message() {
            Some(message) => Err(TetherError::ServerSide(message)),
            None => Ok(result),
        }
    }
}

impl std::fmt::Debug for RemoteStub {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteStub")
            .field("timeout", &self.timeout)
            .field("policy", &self.policy)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ClientConfig, RemoteServer};
    use crate::test_support::{MockServer, Mode};
    use serde_json::json;
    use tether_common::Param;

    async fn stub_for(server: &MockServer) -> RemoteStub {
        let config = ClientConfig {
            servers: vec![server.server()],
            pool_size: 2,
            connect_timeout_ms: 500,
            ..Default::default()
        };
        let pool = Arc::new(ConnectionPool::new(config));
        pool.start_up().await.unwrap();
        RemoteStub::new(pool).with_timeout(Duration::from_millis(200))
    }

    #[tokio::test]
    async fn test_call_returns_value_and_records() {
        let server = MockServer::start(Mode::Echo).await;
        let stub = stub_for(&server).await;

        let command = Command::new("demo.Echo", "echo").with_param(Param::new(json!("hi"), "string"));
        let echoed: String = stub.call_as(command).await.unwrap();
        assert_eq!(echoed, "hi");

        let snapshot = stub.measurer().snapshot();
        assert_eq!(snapshot.total_calls, 1);
        assert_eq!(snapshot.methods["demo.Echo.echo"].success_count, 1);
    }

    #[tokio::test]
    async fn test_call_timeout_cancels_request() {
        let server = MockServer::start(Mode::Silent).await;
        let stub = stub_for(&server).await;

        let err = stub.call(Command::new("demo.Echo", "echo")).await.unwrap_err();
        assert!(matches!(err, TetherError::Timeout(200)));
        assert!(stub.pool().list_proxies().iter().all(|p| p.pending_count() == 0));
        assert_eq!(stub.measurer().snapshot().failed_calls, 1);
    }

    #[tokio::test]
    async fn test_call_on_stopped_pool_times_out() {
        let server = MockServer::start(Mode::Echo).await;
        let stub = stub_for(&server).await;
        stub.pool().stop("", None);

        let err = stub.call(Command::new("demo.Echo", "echo")).await.unwrap_err();
        assert!(matches!(err, TetherError::PoolTimeout(200)));
    }

    #[tokio::test]
    async fn test_call_on_unstarted_pool() {
        let pool = Arc::new(ConnectionPool::new(ClientConfig::with_servers(vec![
            RemoteServer::new("127.0.0.1", 1),
        ])));
        let stub = RemoteStub::new(pool).with_policy(SelectionPolicy::Workload);
        let err = stub.call(Command::new("a", "b")).await.unwrap_err();
        assert!(matches!(err, TetherError::NoAvailableConnection));
    }
}
