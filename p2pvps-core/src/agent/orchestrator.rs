use std::path::PathBuf;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use super::heartbeat::ExpirationTimer;
use super::state::{LifecycleSnapshot, LifecycleState};
use crate::config::{ConfigError, DeviceIdentity};
use crate::error::{AgentError, Disposition, FatalError, Phase};
use crate::provisioning::{PipelineOutcome, ProvisioningPipeline, StepRunner};
use crate::server::LeaseServer;
use crate::types::{Credentials, DeviceSpecs};

/// State machine that owns one device's rental cycle.
///
/// All lifecycle state (current phase, credentials, the expiration timer)
/// lives here and is only touched by [`step`](Self::step), which performs
/// exactly one transition per call. Because the orchestrator awaits each
/// expiration check inline, two checks can never overlap, and teardown
/// always starts with the timer already disarmed.
pub struct Orchestrator<S, R> {
    identity: DeviceIdentity,
    server: S,
    pipeline: ProvisioningPipeline<R>,
    check_interval: Duration,
    disk_probe: PathBuf,
    state: LifecycleState,
    credentials: Option<Credentials>,
    timer: Option<ExpirationTimer>,
    status: watch::Sender<LifecycleSnapshot>,
}

impl<S: LeaseServer, R: StepRunner> Orchestrator<S, R> {
    /// Fails if `check_interval` is zero.
    pub fn new(
        identity: DeviceIdentity,
        server: S,
        pipeline: ProvisioningPipeline<R>,
        check_interval: Duration,
    ) -> Result<Self, ConfigError> {
        if check_interval.is_zero() {
            return Err(ConfigError::Invalid("expiration check interval must be non-zero".into()));
        }
        let (status, _) = watch::channel(LifecycleSnapshot::default());
        let disk_probe = pipeline.artifacts().output_dir().to_path_buf();
        Ok(Self {
            identity,
            server,
            pipeline,
            check_interval,
            disk_probe,
            state: LifecycleState::Unregistered,
            credentials: None,
            timer: None,
            status,
        })
    }

    /// Publish lifecycle snapshots on an existing channel instead of a private one.
    pub fn with_status_channel(mut self, status: watch::Sender<LifecycleSnapshot>) -> Self {
        status.send_replace(self.snapshot());
        self.status = status;
        self
    }

    pub fn subscribe(&self) -> watch::Receiver<LifecycleSnapshot> {
        self.status.subscribe()
    }

    pub fn state(&self) -> LifecycleState {
        self.state
    }

    pub fn credentials(&self) -> Option<&Credentials> {
        self.credentials.as_ref()
    }

    pub fn timer_armed(&self) -> bool {
        self.timer.is_some()
    }

    pub fn server(&self) -> &S {
        &self.server
    }

    pub fn pipeline(&self) -> &ProvisioningPipeline<R> {
        &self.pipeline
    }

    pub fn snapshot(&self) -> LifecycleSnapshot {
        LifecycleSnapshot { state: self.state, timer_armed: self.timer_armed() }
    }

    /// Drive the lifecycle until it halts. There is no normal return.
    pub async fn run(mut self) -> FatalError {
        loop {
            if let Err(fatal) = self.step().await {
                return fatal;
            }
        }
    }

    /// Perform one transition from the current state.
    pub async fn step(&mut self) -> Result<(), FatalError> {
        match self.state {
            LifecycleState::Unregistered => {
                info!(device_id = %self.identity.device_id, "starting device lifecycle");
                self.transition(LifecycleState::Registering);
                Ok(())
            }
            LifecycleState::Registering => self.register().await,
            LifecycleState::Provisioning => self.provision().await,
            LifecycleState::Active => {
                self.await_tick().await;
                Ok(())
            }
            LifecycleState::CheckingExpiration => self.check_expiration().await,
            LifecycleState::Deprovisioning => {
                self.deprovision().await;
                Ok(())
            }
            LifecycleState::FatalFailure => Err(FatalError::Halted),
        }
    }

    async fn register(&mut self) -> Result<(), FatalError> {
        // Credentials from a previous cycle are never reused.
        self.credentials = None;
        let specs = DeviceSpecs::snapshot(&self.disk_probe).await;
        debug!(?specs, "device specs snapshot");

        match self.server.register(&self.identity.device_id, &specs).await {
            Ok(credentials) => {
                self.credentials = Some(credentials);
                self.transition(LifecycleState::Provisioning);
                Ok(())
            }
            Err(e) => {
                if matches!(e, AgentError::ServerError { .. }) {
                    error!("ensure the deviceId in the device config matches the Owned Devices section of the marketplace");
                }
                self.halt(FatalError::Registration(e))
            }
        }
    }

    async fn provision(&mut self) -> Result<(), FatalError> {
        let Some(credentials) = self.credentials.clone() else {
            warn!("no credentials for provisioning, registering again");
            self.transition(LifecycleState::Registering);
            return Ok(());
        };

        match self.pipeline.provision(credentials).await {
            PipelineOutcome::Success => {
                self.arm_timer();
                self.transition(LifecycleState::Active);
                Ok(())
            }
            PipelineOutcome::Failed { step, cause } => {
                self.halt(FatalError::Provisioning { step, source: cause })
            }
        }
    }

    async fn await_tick(&mut self) {
        let fired = match self.timer.as_mut() {
            Some(timer) => timer.tick().await,
            None => false,
        };
        if !fired {
            // Wait out one period by hand so a timer that keeps dying still
            // yields checks at the configured rate.
            let period = self.timer.as_ref().map_or(self.check_interval, ExpirationTimer::period);
            warn!(period_secs = period.as_secs_f64(), "expiration timer stopped, checking after one period");
            self.disarm_timer();
            self.publish();
            tokio::time::sleep(period).await;
            self.arm_timer();
        }
        self.transition(LifecycleState::CheckingExpiration);
    }

    async fn check_expiration(&mut self) -> Result<(), FatalError> {
        let now = Utc::now();
        info!(%now, "checking lease expiration");

        match self.server.get_expiration(&self.identity.device_id).await {
            Ok(expiration) => {
                info!(%expiration, "lease expiration");
                if expiration.has_passed(now) {
                    info!("lease has expired, stopping the workload");
                    self.disarm_timer();
                    self.transition(LifecycleState::Deprovisioning);
                } else {
                    self.transition(LifecycleState::Active);
                }
                Ok(())
            }
            Err(e) => match e.disposition(Phase::ExpirationCheck) {
                Disposition::Fatal => self.halt(FatalError::ExpirationCheck(e)),
                Disposition::Retry | Disposition::Continue => {
                    warn!(kind = e.kind(), error = %e, "expiration check failed, will try again");
                    self.transition(LifecycleState::Active);
                    Ok(())
                }
            },
        }
    }

    async fn deprovision(&mut self) {
        // No check may fire while the workload is being torn down.
        self.disarm_timer();

        let failures = self.pipeline.teardown().await.into_iter().filter(|r| !r.succeeded).count();
        if failures > 0 {
            // Re-registration proceeds regardless of teardown failures.
            warn!(failures, "teardown incomplete, re-registering anyway");
        }

        self.credentials = None;
        self.transition(LifecycleState::Registering);
    }

    fn arm_timer(&mut self) {
        self.disarm_timer();
        self.timer = Some(ExpirationTimer::arm(self.check_interval));
    }

    fn disarm_timer(&mut self) {
        if let Some(timer) = self.timer.take() {
            timer.disarm();
        }
    }

    fn halt(&mut self, fatal: FatalError) -> Result<(), FatalError> {
        error!(phase = fatal.phase(), error = %fatal, "device lifecycle halted");
        self.disarm_timer();
        self.transition(LifecycleState::FatalFailure);
        Err(fatal)
    }

    fn transition(&mut self, next: LifecycleState) {
        if self.state != next {
            info!(from = %self.state, to = %next, "lifecycle transition");
        }
        self.state = next;
        self.publish();
    }

    fn publish(&self) {
        self.status.send_replace(self.snapshot());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provisioning::{ArtifactWriter, ExternalStep, StepResult};
    use crate::types::{LeaseExpiration, Result};
    use async_trait::async_trait;
    use std::collections::{HashSet, VecDeque};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    #[derive(Default)]
    struct FakeServer {
        registrations: Mutex<VecDeque<Result<Credentials>>>,
        expirations: Mutex<VecDeque<Result<LeaseExpiration>>>,
        register_calls: AtomicUsize,
        expiration_calls: AtomicUsize,
        in_flight: AtomicUsize,
        max_in_flight: AtomicUsize,
        check_delay: Duration,
    }

    impl FakeServer {
        fn registering(creds: Vec<Credentials>) -> Self {
            Self {
                registrations: Mutex::new(creds.into_iter().map(Ok).collect()),
                ..Default::default()
            }
        }

        fn then_expiration(self, result: Result<LeaseExpiration>) -> Self {
            self.expirations.lock().unwrap().push_back(result);
            self
        }
    }

    #[async_trait]
    impl LeaseServer for FakeServer {
        async fn register(&self, _device_id: &str, _specs: &DeviceSpecs) -> Result<Credentials> {
            self.register_calls.fetch_add(1, Ordering::SeqCst);
            self.registrations
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Err(AgentError::NetworkUnreachable("no more registrations".into())))
        }

        async fn get_expiration(&self, _device_id: &str) -> Result<LeaseExpiration> {
            self.expiration_calls.fetch_add(1, Ordering::SeqCst);
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(self.check_delay).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            self.expirations
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Ok(LeaseExpiration(Utc::now() + chrono::Duration::hours(1))))
        }
    }

    /// Records each step together with whether the timer was armed when it ran.
    struct FakeRunner {
        failing: HashSet<ExternalStep>,
        status: watch::Receiver<LifecycleSnapshot>,
        calls: Mutex<Vec<(ExternalStep, bool)>>,
    }

    impl FakeRunner {
        fn steps(&self) -> Vec<ExternalStep> {
            self.calls.lock().unwrap().iter().map(|(s, _)| *s).collect()
        }
    }

    #[async_trait]
    impl StepRunner for FakeRunner {
        async fn run(&self, step: ExternalStep) -> StepResult {
            let armed = self.status.borrow().timer_armed;
            self.calls.lock().unwrap().push((step, armed));
            if self.failing.contains(&step) {
                StepResult::failure(step, Some(1), "failed")
            } else {
                StepResult::success(step, "")
            }
        }
    }

    fn identity() -> DeviceIdentity {
        serde_json::from_str(
            r#"{"deviceId":"dev-1","serverIp":"10.0.0.2","serverPort":3000,
                "sshServer":"relay.example","sshServerPort":6100}"#,
        )
        .unwrap()
    }

    fn creds(user: &str, port: u16) -> Credentials {
        Credentials { username: user.into(), password: format!("{user}-pw"), port }
    }

    fn orchestrator(
        server: FakeServer,
        failing: &[ExternalStep],
        dir: &std::path::Path,
    ) -> Orchestrator<FakeServer, FakeRunner> {
        let (tx, rx) = watch::channel(LifecycleSnapshot::default());
        let runner = FakeRunner {
            failing: failing.iter().copied().collect(),
            status: rx,
            calls: Mutex::new(Vec::new()),
        };
        let pipeline = ProvisioningPipeline::new(runner, ArtifactWriter::new(dir, identity()));
        Orchestrator::new(identity(), server, pipeline, Duration::from_secs(120))
            .unwrap()
            .with_status_channel(tx)
    }

    async fn drive_until_active(orch: &mut Orchestrator<FakeServer, FakeRunner>) {
        for _ in 0..3 {
            orch.step().await.unwrap();
        }
        assert_eq!(orch.state(), LifecycleState::Active);
    }

    fn tunnel_port(orch: &Orchestrator<FakeServer, FakeRunner>) -> u64 {
        let raw = std::fs::read_to_string(orch.pipeline().artifacts().config_path()).unwrap();
        let config: serde_json::Value = serde_json::from_str(&raw).unwrap();
        config["sshTunnelPort"].as_u64().unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn registration_then_provisioning_reaches_active() {
        let dir = tempfile::tempdir().unwrap();
        let mut orch = orchestrator(FakeServer::registering(vec![creds("u1", 3101)]), &[], dir.path());

        assert_eq!(orch.state(), LifecycleState::Unregistered);
        orch.step().await.unwrap();
        assert_eq!(orch.state(), LifecycleState::Registering);
        orch.step().await.unwrap();
        assert_eq!(orch.state(), LifecycleState::Provisioning);
        assert_eq!(orch.credentials(), Some(&creds("u1", 3101)));
        assert!(!orch.timer_armed());
        orch.step().await.unwrap();
        assert_eq!(orch.state(), LifecycleState::Active);
        assert!(orch.timer_armed());

        assert_eq!(tunnel_port(&orch), 3101);
        assert_eq!(
            orch.pipeline().runner().steps(),
            [ExternalStep::StoragePrep, ExternalStep::ImageBuild, ExternalStep::ImageRun]
        );
        assert_eq!(*orch.subscribe().borrow(), LifecycleSnapshot { state: LifecycleState::Active, timer_armed: true });
    }

    #[tokio::test(start_paused = true)]
    async fn registration_failure_is_fatal_and_skips_provisioning() {
        let dir = tempfile::tempdir().unwrap();
        let server = FakeServer::default();
        server.registrations.lock().unwrap().push_back(Err(AgentError::ServerError {
            status: Some(500),
            message: "HTTP 500".into(),
        }));
        let mut orch = orchestrator(server, &[], dir.path());

        orch.step().await.unwrap();
        let err = orch.step().await.unwrap_err();
        assert!(matches!(err, FatalError::Registration(AgentError::ServerError { status: Some(500), .. })));
        assert_eq!(orch.state(), LifecycleState::FatalFailure);
        assert!(orch.pipeline().runner().steps().is_empty());
        assert!(!orch.pipeline().artifacts().config_path().exists());
        assert!(matches!(orch.step().await, Err(FatalError::Halted)));
    }

    #[tokio::test(start_paused = true)]
    async fn build_failure_is_fatal_and_run_never_happens() {
        let dir = tempfile::tempdir().unwrap();
        let mut orch = orchestrator(
            FakeServer::registering(vec![creds("u1", 3101)]),
            &[ExternalStep::ImageBuild],
            dir.path(),
        );

        orch.step().await.unwrap();
        orch.step().await.unwrap();
        let err = orch.step().await.unwrap_err();
        assert!(matches!(err, FatalError::Provisioning { step: "image-build", .. }));
        assert_eq!(err.phase(), "image-build");
        assert_eq!(orch.state(), LifecycleState::FatalFailure);
        assert!(!orch.timer_armed());
        assert!(!orch.pipeline().runner().steps().contains(&ExternalStep::ImageRun));
    }

    #[tokio::test(start_paused = true)]
    async fn future_expiration_keeps_device_active() {
        let dir = tempfile::tempdir().unwrap();
        let server = FakeServer::registering(vec![creds("u1", 3101)])
            .then_expiration(Ok(LeaseExpiration(Utc::now() + chrono::Duration::days(3))));
        let mut orch = orchestrator(server, &[], dir.path());
        drive_until_active(&mut orch).await;

        orch.step().await.unwrap();
        assert_eq!(orch.state(), LifecycleState::CheckingExpiration);
        orch.step().await.unwrap();
        assert_eq!(orch.state(), LifecycleState::Active);
        assert!(orch.timer_armed());
        assert_eq!(orch.server().register_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn expired_lease_disarms_before_teardown_and_reregisters() {
        let dir = tempfile::tempdir().unwrap();
        let server = FakeServer::registering(vec![creds("u1", 3101), creds("u2", 3202)])
            .then_expiration(Ok(LeaseExpiration(Utc::now() - chrono::Duration::hours(1))));
        let mut orch = orchestrator(server, &[ExternalStep::ImageStop], dir.path());
        drive_until_active(&mut orch).await;

        orch.step().await.unwrap(); // tick
        orch.step().await.unwrap(); // check
        assert_eq!(orch.state(), LifecycleState::Deprovisioning);
        assert!(!orch.timer_armed());

        orch.step().await.unwrap();
        assert_eq!(orch.state(), LifecycleState::Registering);
        assert!(orch.credentials().is_none());

        let calls = orch.pipeline().runner().calls.lock().unwrap().clone();
        let teardown: Vec<_> = calls
            .iter()
            .filter(|(s, _)| matches!(s, ExternalStep::ImageStop | ExternalStep::ImageCleanup))
            .collect();
        assert_eq!(teardown.len(), 2, "cleanup still runs after a failed stop");
        assert!(teardown.iter().all(|(_, armed)| !armed));

        // Fresh cycle with fresh credentials.
        orch.step().await.unwrap();
        assert_eq!(orch.credentials(), Some(&creds("u2", 3202)));
        orch.step().await.unwrap();
        assert_eq!(orch.state(), LifecycleState::Active);
        assert_eq!(tunnel_port(&orch), 3202);
        assert_eq!(orch.server().register_calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn transport_failure_during_check_stays_active() {
        let dir = tempfile::tempdir().unwrap();
        let server = FakeServer::registering(vec![creds("u1", 3101)])
            .then_expiration(Err(AgentError::NetworkUnreachable("connection refused".into())))
            .then_expiration(Err(AgentError::DataMissing("expiration")));
        let mut orch = orchestrator(server, &[], dir.path());
        drive_until_active(&mut orch).await;

        for _ in 0..2 {
            orch.step().await.unwrap();
            orch.step().await.unwrap();
            assert_eq!(orch.state(), LifecycleState::Active);
            assert!(orch.timer_armed());
        }

        // The timer keeps ticking: a third check happens on schedule.
        orch.step().await.unwrap();
        assert_eq!(orch.state(), LifecycleState::CheckingExpiration);
        assert_eq!(orch.server().expiration_calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn slow_checks_never_overlap() {
        let dir = tempfile::tempdir().unwrap();
        let mut server = FakeServer::registering(vec![creds("u1", 3101)]);
        // Each check outlasts several timer periods.
        server.check_delay = Duration::from_secs(500);
        let mut orch = orchestrator(server, &[], dir.path());
        drive_until_active(&mut orch).await;

        for _ in 0..10 {
            orch.step().await.unwrap();
        }
        assert_eq!(orch.server().expiration_calls.load(Ordering::SeqCst), 5);
        assert_eq!(orch.server().max_in_flight.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn zero_check_interval_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let (_tx, rx) = watch::channel(LifecycleSnapshot::default());
        let runner = FakeRunner { failing: HashSet::new(), status: rx, calls: Mutex::new(Vec::new()) };
        let pipeline = ProvisioningPipeline::new(runner, ArtifactWriter::new(dir.path(), identity()));

        let err = Orchestrator::new(identity(), FakeServer::default(), pipeline, Duration::ZERO).err().unwrap();
        assert!(matches!(err, ConfigError::Invalid(_)), "{err}");
    }

    #[tokio::test(start_paused = true)]
    async fn dead_timer_still_checks_after_one_period() {
        let dir = tempfile::tempdir().unwrap();
        let mut orch = orchestrator(FakeServer::registering(vec![creds("u1", 3101)]), &[], dir.path());
        drive_until_active(&mut orch).await;

        for round in 1..=3 {
            if let Some(timer) = orch.timer.as_ref() {
                timer.kill_task();
            }
            let before = tokio::time::Instant::now();
            orch.step().await.unwrap();
            assert_eq!(orch.state(), LifecycleState::CheckingExpiration);
            assert!(before.elapsed() >= Duration::from_secs(120), "re-armed without waiting");
            assert!(orch.timer_armed());

            orch.step().await.unwrap();
            assert_eq!(orch.state(), LifecycleState::Active);
            assert_eq!(orch.server().expiration_calls.load(Ordering::SeqCst), round);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn run_returns_the_fatal_error() {
        let dir = tempfile::tempdir().unwrap();
        let orch = orchestrator(FakeServer::default(), &[], dir.path());
        let err = orch.run().await;
        assert!(matches!(err, FatalError::Registration(AgentError::NetworkUnreachable(_))));
    }
}
