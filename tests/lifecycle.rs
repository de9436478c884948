use std::{
    collections::HashSet,
    sync::{Arc, Mutex},
    time::Duration,
};

use async_trait::async_trait;
use simple_proxy::{
    config::ConfigError,
    core::{LifecycleState, Orchestrator, OrchestratorError, ProxySpec, RoutingRule, proxy_set_channel},
    ports::{EngineError, ProxyEngine, ProxyInstance},
};
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Event {
    Start(String),
    Close(String),
    Wait(String),
}

/// Engine double that records every call and fails `start` for chosen addresses.
#[derive(Default, Clone)]
struct RecordingEngine {
    events: Arc<Mutex<Vec<Event>>>,
    failing: Arc<Mutex<HashSet<String>>>,
}

impl RecordingEngine {
    fn fail_on(&self, address: &str) {
        self.failing.lock().unwrap().insert(address.to_string());
    }

    fn events(&self) -> Vec<Event> {
        self.events.lock().unwrap().clone()
    }

    fn count(&self, wanted: &Event) -> usize {
        self.events().iter().filter(|e| *e == wanted).count()
    }
}

struct RecordingInstance {
    address: String,
    engine: RecordingEngine,
    closed: bool,
}

#[async_trait]
impl ProxyInstance for RecordingInstance {
    fn address(&self) -> &str {
        &self.address
    }

    fn start(&mut self) -> Result<(), EngineError> {
        self.engine
            .events
            .lock()
            .unwrap()
            .push(Event::Start(self.address.clone()));
        if self.engine.failing.lock().unwrap().contains(&self.address) {
            return Err(EngineError::Bind {
                address: self.address.clone(),
                source: std::io::Error::new(std::io::ErrorKind::AddrInUse, "address already in use"),
            });
        }
        Ok(())
    }

    fn close(&self) {
        self.engine
            .events
            .lock()
            .unwrap()
            .push(Event::Close(self.address.clone()));
    }

    async fn wait(&mut self) -> Result<(), EngineError> {
        self.engine
            .events
            .lock()
            .unwrap()
            .push(Event::Wait(self.address.clone()));
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        Err(EngineError::Closed {
            address: self.address.clone(),
        })
    }
}

impl ProxyEngine for RecordingEngine {
    fn create(&self, spec: &ProxySpec) -> Box<dyn ProxyInstance> {
        Box::new(RecordingInstance {
            address: spec.interface.clone(),
            engine: self.clone(),
            closed: false,
        })
    }
}

/// Engine double whose instances for `held` addresses only finish `wait` once
/// `release` is cancelled.
#[derive(Clone)]
struct HeldEngine {
    held: Arc<HashSet<String>>,
    release: CancellationToken,
    started: Arc<Mutex<Vec<String>>>,
}

impl HeldEngine {
    fn new(held: &[&str]) -> Self {
        Self {
            held: Arc::new(held.iter().map(|a| a.to_string()).collect()),
            release: CancellationToken::new(),
            started: Arc::default(),
        }
    }

    fn started(&self) -> usize {
        self.started.lock().unwrap().len()
    }
}

struct HeldInstance {
    address: String,
    engine: HeldEngine,
}

#[async_trait]
impl ProxyInstance for HeldInstance {
    fn address(&self) -> &str {
        &self.address
    }

    fn start(&mut self) -> Result<(), EngineError> {
        self.engine.started.lock().unwrap().push(self.address.clone());
        Ok(())
    }

    fn close(&self) {}

    async fn wait(&mut self) -> Result<(), EngineError> {
        if self.engine.held.contains(&self.address) {
            self.engine.release.cancelled().await;
        }
        Err(EngineError::Closed {
            address: self.address.clone(),
        })
    }
}

impl ProxyEngine for HeldEngine {
    fn create(&self, spec: &ProxySpec) -> Box<dyn ProxyInstance> {
        Box::new(HeldInstance {
            address: spec.interface.clone(),
            engine: self.clone(),
        })
    }
}

fn spec(interface: &str) -> ProxySpec {
    ProxySpec {
        interface: interface.to_string(),
        rules: vec![RoutingRule::Passthrough {
            target: ":9000".to_string(),
        }],
    }
}

fn orchestrator(engine: &RecordingEngine) -> Orchestrator {
    let (_sender, inbox) = proxy_set_channel();
    Orchestrator::new(Arc::new(engine.clone()), inbox, CancellationToken::new())
}

#[tokio::test]
async fn first_proxy_set_becomes_active() {
    let engine = RecordingEngine::default();
    let mut orch = orchestrator(&engine);
    assert_eq!(orch.state(), LifecycleState::Empty);

    let generation = orch.apply_proxy_set(vec![spec(":8080"), spec(":8081")]).await.unwrap();

    assert_eq!(generation, 1);
    assert_eq!(orch.state(), LifecycleState::Active);
    assert_eq!(orch.active_generation(), Some(1));
    assert_eq!(orch.active_addresses(), vec![":8080", ":8081"]);
    assert_eq!(
        engine.events(),
        vec![Event::Start(":8080".into()), Event::Start(":8081".into())]
    );
}

#[tokio::test]
async fn failed_candidate_is_rolled_back_and_previous_set_kept() {
    let engine = RecordingEngine::default();
    let mut orch = orchestrator(&engine);
    orch.apply_proxy_set(vec![spec(":8080")]).await.unwrap();

    engine.fail_on(":8081");
    let err = orch
        .apply_proxy_set(vec![spec(":9090"), spec(":8081")])
        .await
        .unwrap_err();

    assert_eq!(err.failures().len(), 1);
    assert!(err.to_string().contains(":8081"));
    assert_eq!(orch.state(), LifecycleState::Active);
    assert_eq!(orch.active_generation(), Some(1));
    assert_eq!(orch.active_addresses(), vec![":8080"]);

    // the started part of the candidate is closed, the failed one never is,
    // and the active listener is untouched
    assert_eq!(engine.count(&Event::Close(":9090".into())), 1);
    assert_eq!(engine.count(&Event::Wait(":9090".into())), 1);
    assert_eq!(engine.count(&Event::Close(":8081".into())), 0);
    assert_eq!(engine.count(&Event::Close(":8080".into())), 0);
}

#[tokio::test]
async fn failed_first_candidate_returns_to_empty() {
    let engine = RecordingEngine::default();
    engine.fail_on(":8080");
    let mut orch = orchestrator(&engine);

    assert!(orch.apply_proxy_set(vec![spec(":8080")]).await.is_err());
    assert_eq!(orch.state(), LifecycleState::Empty);
    assert_eq!(orch.active_generation(), None);
}

#[tokio::test]
async fn successful_swap_drains_previous_set() {
    let engine = RecordingEngine::default();
    let mut orch = orchestrator(&engine);
    orch.apply_proxy_set(vec![spec(":8080")]).await.unwrap();

    let generation = orch.apply_proxy_set(vec![spec(":8080"), spec(":8081")]).await.unwrap();
    assert_eq!(generation, 2);
    assert_eq!(orch.active_generation(), Some(2));

    orch.wait_for_drains().await;
    assert_eq!(orch.pending_drains(), 0);

    let events = engine.events();
    // new generation starts before the old one is closed
    let second_start = events
        .iter()
        .rposition(|e| *e == Event::Start(":8080".into()))
        .unwrap();
    let close = events
        .iter()
        .position(|e| *e == Event::Close(":8080".into()))
        .unwrap();
    assert!(second_start < close);
    assert_eq!(engine.count(&Event::Close(":8080".into())), 1);
    assert_eq!(engine.count(&Event::Close(":8081".into())), 0);
}

#[tokio::test]
async fn load_error_keeps_active_set() {
    let engine = RecordingEngine::default();
    let mut orch = orchestrator(&engine);
    orch.apply_proxy_set(vec![spec(":8080")]).await.unwrap();

    orch.on_load_error(&ConfigError::Parse {
        file: "proxy.hcl".to_string(),
        message: "unexpected token".to_string(),
    });

    assert_eq!(orch.state(), LifecycleState::Active);
    assert_eq!(orch.active_generation(), Some(1));
    assert_eq!(engine.count(&Event::Close(":8080".into())), 0);
}

#[tokio::test]
async fn shutdown_closes_everything() {
    let engine = RecordingEngine::default();
    let mut orch = orchestrator(&engine);
    orch.apply_proxy_set(vec![spec(":8080")]).await.unwrap();
    orch.apply_proxy_set(vec![spec(":8081")]).await.unwrap();

    orch.shutdown().await;

    assert_eq!(orch.state(), LifecycleState::Terminated);
    assert_eq!(orch.active_generation(), None);
    assert_eq!(orch.pending_drains(), 0);
    assert_eq!(engine.count(&Event::Close(":8080".into())), 1);
    assert_eq!(engine.count(&Event::Close(":8081".into())), 1);
}

#[tokio::test]
async fn run_fails_on_initial_load_error() {
    let engine = RecordingEngine::default();
    let (sender, inbox) = proxy_set_channel();
    let orch = Orchestrator::new(Arc::new(engine.clone()), inbox, CancellationToken::new());

    let run = tokio::spawn(orch.run());
    sender
        .send_error(ConfigError::Parse {
            file: "proxy.hcl".to_string(),
            message: "unexpected token".to_string(),
        })
        .await;

    let result = tokio::time::timeout(Duration::from_secs(2), run)
        .await
        .unwrap()
        .unwrap();
    assert!(matches!(result, Err(OrchestratorError::InitialLoad(_))));
    assert!(engine.events().is_empty());
}

#[tokio::test]
async fn run_fails_on_initial_start_error() {
    let engine = RecordingEngine::default();
    engine.fail_on(":8081");
    let (sender, inbox) = proxy_set_channel();
    let orch = Orchestrator::new(Arc::new(engine.clone()), inbox, CancellationToken::new());

    let run = tokio::spawn(orch.run());
    sender.send_proxy_set(vec![spec(":8080"), spec(":8081")]).await;

    let result = tokio::time::timeout(Duration::from_secs(2), run)
        .await
        .unwrap()
        .unwrap();
    assert!(matches!(result, Err(OrchestratorError::InitialStart(_))));
    assert_eq!(engine.count(&Event::Close(":8080".into())), 1);
}

#[tokio::test]
async fn run_survives_reload_failures_until_cancelled() {
    let engine = RecordingEngine::default();
    let (sender, inbox) = proxy_set_channel();
    let cancel = CancellationToken::new();
    let orch = Orchestrator::new(Arc::new(engine.clone()), inbox, cancel.clone());
    let run = tokio::spawn(orch.run());

    sender.send_proxy_set(vec![spec(":8080")]).await;
    sender
        .send_error(ConfigError::Parse {
            file: "proxy.hcl".to_string(),
            message: "unexpected token".to_string(),
        })
        .await;
    engine.fail_on(":9090");
    sender.send_proxy_set(vec![spec(":9090")]).await;
    assert!(sender.send_proxy_set(vec![spec(":8082")]).await);

    // wait until the last set is applied
    tokio::time::timeout(Duration::from_secs(2), async {
        while engine.count(&Event::Start(":8082".into())) == 0 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap();

    cancel.cancel();
    let result = tokio::time::timeout(Duration::from_secs(2), run)
        .await
        .unwrap()
        .unwrap();
    assert!(result.is_ok());
    assert_eq!(engine.count(&Event::Close(":8080".into())), 1);
    assert_eq!(engine.count(&Event::Close(":8082".into())), 1);
}

#[tokio::test]
async fn stuck_drain_does_not_hold_up_swaps() {
    let engine = HeldEngine::new(&[":8080", ":8081"]);
    let (_sender, inbox) = proxy_set_channel();
    let mut orch = Orchestrator::new(Arc::new(engine.clone()), inbox, CancellationToken::new());

    assert_eq!(orch.apply_proxy_set(vec![spec(":8080")]).await.unwrap(), 1);

    let generation = tokio::time::timeout(
        Duration::from_secs(1),
        orch.apply_proxy_set(vec![spec(":8081")]),
    )
    .await
    .expect("swap waited for the retired set to drain")
    .unwrap();
    assert_eq!(generation, 2);
    assert_eq!(orch.state(), LifecycleState::Active);
    assert_eq!(orch.pending_drains(), 1);

    let generation = tokio::time::timeout(
        Duration::from_secs(1),
        orch.apply_proxy_set(vec![spec(":8082")]),
    )
    .await
    .expect("swap waited for the retired set to drain")
    .unwrap();
    assert_eq!(generation, 3);
    assert_eq!(orch.active_addresses(), vec![":8082"]);
    assert_eq!(orch.pending_drains(), 2);

    engine.release.cancel();
    tokio::time::timeout(Duration::from_secs(2), orch.wait_for_drains())
        .await
        .expect("drains never finished");
    assert_eq!(orch.pending_drains(), 0);
}

#[tokio::test]
async fn shutdown_waits_for_stuck_drain() {
    let engine = HeldEngine::new(&[":8080"]);
    let (sender, inbox) = proxy_set_channel();
    let cancel = CancellationToken::new();
    let run = tokio::spawn(Orchestrator::new(Arc::new(engine.clone()), inbox, cancel.clone()).run());

    sender.send_proxy_set(vec![spec(":8080")]).await;
    sender.send_proxy_set(vec![spec(":8081")]).await;
    tokio::time::timeout(Duration::from_secs(2), async {
        while engine.started() < 2 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap();

    cancel.cancel();
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(!run.is_finished(), "shutdown finished before the retired set drained");

    engine.release.cancel();
    let result = tokio::time::timeout(Duration::from_secs(2), run)
        .await
        .unwrap()
        .unwrap();
    assert!(result.is_ok());
}
