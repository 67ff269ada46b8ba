//! Load simulation through a client pool.

use std::fmt;
use std::time::{Duration, Instant};

use futures::stream::{self, StreamExt};
use serde_json::json;
use tracing::debug;

use tether_client::RemoteStub;
use tether_common::{Command, Param};
use tether_metrics::MetricsSnapshot;

/// Outcome of a [`simulate`] run.
#[derive(Debug, Clone)]
pub struct SimulationReport {
    pub calls: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub elapsed: Duration,
    pub metrics: MetricsSnapshot,
}

impl SimulationReport {
    pub fn calls_per_second(&self) -> f64 {
        let secs = self.elapsed.as_secs_f64();
        if secs == 0.0 {
            return 0.0;
        }
        self.calls as f64 / secs
    }
}

impl fmt::Display for SimulationReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "{} calls in {:.2?} ({:.0} calls/s): {} ok, {} failed",
            self.calls,
            self.elapsed,
            self.calls_per_second(),
            self.succeeded,
            self.failed
        )?;
        write!(f, "{}", self.metrics)
    }
}

/// The command issued for call number `seq`.
pub fn echo_command(seq: usize) -> Command {
    Command::new("demo.Echo", "echo").with_param(Param::new(json!(format!("echo-{seq}")), "string"))
}

/// Issues `calls` echo calls with at most `concurrency` in flight.
///
/// Each call's result is checked against what was sent, so a response routed
/// to the wrong request counts as a failure.
pub async fn simulate(stub: &RemoteStub, calls: usize, concurrency: usize) -> SimulationReport {
    stub.measurer().reset();
    let start = Instant::now();

    let outcomes: Vec<bool> = stream::iter(0..calls)
        .map(|seq| async move {
            let expected = format!("echo-{seq}");
            match stub.call_as::<String>(echo_command(seq)).await {
                Ok(echoed) => echoed == expected,
                Err(e) => {
                    debug!(seq, error = %e, "simulated call failed");
                    false
                }
            }
        })
        .buffer_unordered(concurrency.max(1))
        .collect()
        .await;

    let succeeded = outcomes.iter().filter(|ok| **ok).count();
    SimulationReport {
        calls,
        succeeded,
        failed: calls - succeeded,
        elapsed: start.elapsed(),
        metrics: stub.measurer().snapshot(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tether_client::{ClientConfig, ConnectionPool, RemoteServer, SelectionPolicy};
    use tether_server::demo::demo_registry;
    use tether_server::{ServerConfig, TcpServer};

    #[tokio::test]
    async fn test_simulation_over_two_ports() {
        let config = ServerConfig::with_ports(vec![0, 0]).bind_host("127.0.0.1");
        let server = TcpServer::bind(&config, Arc::new(demo_registry()))
            .await
            .unwrap()
            .spawn()
            .unwrap();

        let servers = server
            .local_addrs()
            .iter()
            .map(|a| RemoteServer::new("127.0.0.1", a.port()))
            .collect();
        let pool = Arc::new(ConnectionPool::new(ClientConfig {
            servers,
            pool_size: 4,
            selection: SelectionPolicy::Workload,
            ..Default::default()
        }));
        pool.start_up().await.unwrap();

        let stub = RemoteStub::new(pool).with_timeout(Duration::from_secs(5));
        let report = simulate(&stub, 200, 16).await;

        assert_eq!(report.succeeded, 200);
        assert_eq!(report.failed, 0);
        assert_eq!(report.metrics.total_calls, 200);
        assert_eq!(report.metrics.methods["demo.Echo.echo"].call_count, 200);
        assert_eq!(server.measurer().snapshot().total_calls, 200);
        assert!(report.to_string().starts_with("200 calls"));
    }
}
