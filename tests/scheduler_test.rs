//! Scheduler behavior against a scripted in-memory SNMP agent, on virtual time.

use async_trait::async_trait;
use snmp_poller::config::Target;
use snmp_poller::metrics::{DerivedMetric, DerivedValue, MetricGroup, MetricKind};
use snmp_poller::poller::{PollingTask, Scheduler, SchedulerOptions, TaskState};
use snmp_poller::secret::SecretString;
use snmp_poller::sink::{Sink, SinkDispatcher};
use snmp_poller::snmp::{QueryClient, SnmpError, SnmpResult, SnmpValue, SnmpVersion};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::Instant;

/// How a scripted host answers
enum Behavior {
    /// Hand out these values in order, then keep repeating the last one
    Values(VecDeque<SnmpValue>),
    Fail(SnmpError),
    /// Never answer before `Duration`
    Hang(Duration),
}

#[derive(Default)]
struct ScriptedAgent {
    hosts: Mutex<HashMap<String, Behavior>>,
}

impl ScriptedAgent {
    fn with(self, host: &str, behavior: Behavior) -> Self {
        self.hosts.lock().unwrap().insert(host.to_string(), behavior);
        self
    }
}

#[async_trait]
impl QueryClient for ScriptedAgent {
    async fn fetch(&self, target: &Target, _oid: &str) -> SnmpResult<SnmpValue> {
        let reply = {
            let mut hosts = self.hosts.lock().unwrap();
            match hosts.get_mut(&target.host) {
                Some(Behavior::Values(values)) if values.len() > 1 => Ok(values.pop_front()),
                Some(Behavior::Values(values)) => Ok(values.front().cloned()),
                Some(Behavior::Fail(e)) => Err(Ok(e.clone())),
                Some(Behavior::Hang(d)) => Err(Err(*d)),
                None => Ok(None),
            }
        };

        match reply {
            Ok(Some(value)) => Ok(value),
            Ok(None) => Err(SnmpError::NetworkUnreachable),
            Err(Ok(e)) => Err(e),
            Err(Err(hang)) => {
                tokio::time::sleep(hang).await;
                Err(SnmpError::Timeout)
            }
        }
    }
}

#[derive(Clone, Default)]
struct Collected(Arc<Mutex<Vec<DerivedMetric>>>);

impl Collected {
    fn for_host(&self, host: &str) -> Vec<DerivedMetric> {
        self.0
            .lock()
            .unwrap()
            .iter()
            .filter(|m| m.target == host)
            .cloned()
            .collect()
    }
}

impl Sink for Collected {
    fn name(&self) -> &str {
        "collected"
    }

    fn report(&mut self, metric: &DerivedMetric) -> anyhow::Result<()> {
        self.0.lock().unwrap().push(metric.clone());
        Ok(())
    }
}

fn task(host: &str, group: MetricGroup, start: Instant) -> PollingTask {
    let target = Arc::new(Target {
        host: host.to_string(),
        port: 161,
        community: SecretString::new("public"),
        version: SnmpVersion::V2c,
        interval_secs: 5,
    });
    PollingTask::new(target, group, start)
}

fn options() -> SchedulerOptions {
    SchedulerOptions {
        query_timeout: Duration::from_secs(60),
        ..SchedulerOptions::default()
    }
}

/// Run the scheduler for `duration` of virtual time, then shut it down and
/// return it together with everything the sinks received
async fn run_for(
    tasks: Vec<PollingTask>,
    agent: ScriptedAgent,
    options: SchedulerOptions,
    duration: Duration,
) -> (Scheduler, Collected) {
    let collected = Collected::default();
    let dispatcher = SinkDispatcher::spawn(vec![Box::new(collected.clone())], 1024).unwrap();
    let mut scheduler = Scheduler::new(tasks, Arc::new(agent), dispatcher.handle(), options);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let running = tokio::spawn(async move {
        scheduler.run(shutdown_rx).await;
        scheduler
    });

    tokio::time::sleep(duration).await;
    shutdown_tx.send(true).unwrap();
    let scheduler = running.await.unwrap();

    dispatcher.shutdown(Duration::from_secs(5)).await;
    (scheduler, collected)
}

#[tokio::test(start_paused = true)]
async fn test_timeout_on_one_target_does_not_affect_another() {
    let start = Instant::now();
    let agent = ScriptedAgent::default()
        .with("a", Behavior::Fail(SnmpError::Timeout))
        .with("b", Behavior::Values(VecDeque::from([SnmpValue::TimeTicks(1)])));

    let (scheduler, collected) = run_for(
        vec![
            task("a", MetricGroup::Uptime, start),
            task("b", MetricGroup::Uptime, start),
        ],
        agent,
        options(),
        Duration::from_secs(12),
    )
    .await;

    // Slots at 0s, 5s and 10s for both
    let a = collected.for_host("a");
    assert_eq!(a.len(), 3);
    assert!(a.iter().all(|m| m.value == DerivedValue::Timeout));
    assert_eq!(collected.for_host("b").len(), 3);

    // A timeout never retires a task
    assert_eq!(scheduler.task_state("a/uptime"), Some(TaskState::Idle));
    assert_eq!(scheduler.schedulable_count(), 2);
    assert_eq!(
        scheduler.next_due("a/uptime"),
        scheduler.next_due("b/uptime")
    );
}

#[tokio::test(start_paused = true)]
async fn test_persistent_error_retires_exactly_that_task() {
    let start = Instant::now();
    let agent = ScriptedAgent::default()
        .with("a", Behavior::Fail(SnmpError::AuthFailure))
        .with("b", Behavior::Values(VecDeque::from([SnmpValue::TimeTicks(1)])));

    let (scheduler, collected) = run_for(
        vec![
            task("a", MetricGroup::Uptime, start),
            task("b", MetricGroup::Uptime, start),
        ],
        agent,
        options(),
        Duration::from_secs(12),
    )
    .await;

    let a = collected.for_host("a");
    assert_eq!(a.len(), 1);
    assert!(matches!(&a[0].value, DerivedValue::Error(msg) if msg.contains("Authentication")));
    assert_eq!(collected.for_host("b").len(), 3);

    assert_eq!(scheduler.task_state("a/uptime"), Some(TaskState::Failed));
    assert_eq!(scheduler.task_state("b/uptime"), Some(TaskState::Idle));
    assert_eq!(scheduler.schedulable_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_hung_target_does_not_delay_another() {
    let start = Instant::now();
    let agent = ScriptedAgent::default()
        .with("a", Behavior::Hang(Duration::from_secs(3600)))
        .with("b", Behavior::Values(VecDeque::from([SnmpValue::TimeTicks(1)])));

    let (scheduler, collected) = run_for(
        vec![
            task("a", MetricGroup::Uptime, start),
            task("b", MetricGroup::Uptime, start),
        ],
        agent,
        options(),
        Duration::from_secs(21),
    )
    .await;

    // B ran at 0, 5, 10, 15 and 20s while A's single cycle was still stuck
    assert_eq!(collected.for_host("b").len(), 5);
    assert!(collected.for_host("a").is_empty());
    // A's stuck cycle was aborted at shutdown; its slots kept advancing
    assert_eq!(
        scheduler.next_due("a/uptime"),
        Some(start + Duration::from_secs(25))
    );
}

#[tokio::test(start_paused = true)]
async fn test_uptime_reports_each_sample_verbatim() {
    let start = Instant::now();
    let agent = ScriptedAgent::default().with(
        "10.0.0.1",
        Behavior::Values(VecDeque::from([
            SnmpValue::TimeTicks(123456),
            SnmpValue::TimeTicks(129456),
        ])),
    );

    let (_, collected) = run_for(
        vec![task("10.0.0.1", MetricGroup::Uptime, start)],
        agent,
        options(),
        Duration::from_secs(7),
    )
    .await;

    let reports = collected.for_host("10.0.0.1");
    let values: Vec<_> = reports.iter().map(|m| m.value.clone()).collect();
    assert_eq!(
        values,
        vec![DerivedValue::Integer(123456), DerivedValue::Integer(129456)]
    );
    assert!(reports.iter().all(|m| m.oid == "1.3.6.1.2.1.1.3.0"));
}

#[tokio::test(start_paused = true)]
async fn test_bandwidth_rate_between_cycles() {
    let start = Instant::now();
    // ifSpeed and inOctets share the script: speed 1000, then octets 1000,
    // then 1800 for both on the next cycle
    let agent = ScriptedAgent::default().with(
        "10.0.0.2",
        Behavior::Values(VecDeque::from([
            SnmpValue::Counter32(1000),
            SnmpValue::Counter32(1000),
            SnmpValue::Counter32(1800),
        ])),
    );
    let (_, collected) = run_for(
        vec![task("10.0.0.2", MetricGroup::Bandwidth(2), start)],
        agent,
        options(),
        Duration::from_secs(7),
    )
    .await;

    let rates: Vec<_> = collected
        .for_host("10.0.0.2")
        .into_iter()
        .filter(|m| m.kind == MetricKind::InOctets)
        .map(|m| m.value)
        .collect();
    assert_eq!(rates.len(), 2);
    assert!(matches!(
        rates[0],
        DerivedValue::Bandwidth { bits_per_sec, .. } if bits_per_sec == 0.0
    ));
    assert!(matches!(
        rates[1],
        DerivedValue::Bandwidth { bits_per_sec, .. } if bits_per_sec == 1280.0
    ));
}
