//! Driver for one resharing run.
//!
//! The orchestrator:
//!   * generates pre-parameters and builds one engine per party
//!   * wires each engine to a private outbound adapter feeding the shared
//!     stream, and to a private completion adapter
//!   * starts every engine on its own task and runs the router next to them
//!   * waits for exactly one completion per new-committee member
//!   * hands the collected results to the aggregator for the
//!     reconstruction check
//!
//! Any fatal error flips a shutdown signal, aborts the sibling tasks and is
//! returned to the caller; nothing in here terminates the process.

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use num_bigint::BigUint;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, error, info, warn};

use crate::aggregator::{ProtocolResult, ResultAggregator, SecretShare};
use crate::config::{validate_config, DeliveryPolicy, RunConfig, MAX_TIMEOUT};
use crate::engine::{EngineFactory, EngineHandle, EngineOutcome, ProtocolEngine, Role, WireMessage};
use crate::error::{DeliveryError, EngineError, ReshareError, Result};
use crate::party::{PartyId, ResharingParameters};
use crate::routing::{MessageEnvelope, Router, RouterStats, RoutingTable};

/// Output type of the engines a factory builds.
pub type FactoryOutput<F> = <<F as EngineFactory>::Engine as ProtocolEngine>::Output;

/// Lifecycle of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunPhase {
    Idle,
    Starting,
    Running,
    Collecting,
    Verifying,
    Done,
    Failed,
}

impl fmt::Display for RunPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Outcome of a successful run.
#[derive(Debug)]
pub struct RunReport<O> {
    /// One save data per new-committee member, in index order
    pub results: ProtocolResult<O>,
    /// Sum of the shares modulo the group order; equals the original secret
    pub reconstructed: BigUint,
    pub router: RouterStats,
    /// Undelivered messages observed during the run
    pub delivery_failures: Vec<DeliveryError>,
    pub elapsed: std::time::Duration,
}

struct Completion<O> {
    party: PartyId,
    role: Role,
    outcome: EngineOutcome<O>,
}

struct StartFailure {
    party: PartyId,
    error: EngineError,
}

type StartResult = std::result::Result<(), StartFailure>;

/// Tasks and channels alive between engine construction and teardown.
struct LiveRun<E: ProtocolEngine> {
    shutdown: watch::Sender<bool>,
    adapters: JoinSet<()>,
    starts: JoinSet<StartResult>,
    router: Option<JoinHandle<RouterStats>>,
    completions: mpsc::Receiver<Completion<E::Output>>,
    failures: mpsc::UnboundedReceiver<DeliveryError>,
}

impl<E: ProtocolEngine> LiveRun<E> {
    /// Cancels every task of the run.
    fn abort(&mut self) {
        let _ = self.shutdown.send(true);
        self.starts.abort_all();
        self.adapters.abort_all();
        if let Some(router) = self.router.take() {
            router.abort();
        }
    }

    /// Stops the router and adapters after a successful collection.
    async fn shut_down(&mut self) -> Result<RouterStats> {
        let _ = self.shutdown.send(true);
        let stats = match self.router.take() {
            Some(router) => router.await?,
            None => RouterStats::default(),
        };
        self.adapters.abort_all();
        while self.adapters.join_next().await.is_some() {}
        Ok(stats)
    }
}

/// Generic resharing driver, parameterized over the engine backend.
pub struct Orchestrator<F: EngineFactory> {
    params: ResharingParameters,
    config: RunConfig,
    factory: Arc<F>,
    phase: RunPhase,
    transitions: Vec<RunPhase>,
}

impl<F> Orchestrator<F>
where
    F: EngineFactory,
    FactoryOutput<F>: SecretShare,
{
    pub fn new(params: ResharingParameters, config: RunConfig, factory: F) -> Self {
        Self {
            params,
            config,
            factory: Arc::new(factory),
            phase: RunPhase::Idle,
            transitions: vec![RunPhase::Idle],
        }
    }

    pub fn phase(&self) -> RunPhase {
        self.phase
    }

    /// Every phase the run went through, starting with `Idle`.
    pub fn transitions(&self) -> &[RunPhase] {
        &self.transitions
    }

    pub fn parameters(&self) -> &ResharingParameters {
        &self.params
    }

    /// Drives the run to completion and checks that the new shares
    /// recompose `secret`.
    pub async fn run(&mut self, secret: &BigUint) -> Result<RunReport<FactoryOutput<F>>> {
        if self.phase != RunPhase::Idle {
            return Err(ReshareError::Config(format!(
                "run already executed (phase {})",
                self.phase
            )));
        }

        let started_at = Instant::now();
        self.transition(RunPhase::Starting);
        if let Err(e) = validate_config(&self.config) {
            return Err(self.fail(e));
        }

        let mut live = match self.launch().await {
            Ok(live) => live,
            Err(e) => return Err(self.fail(e)),
        };

        self.transition(RunPhase::Collecting);
        let collected = self.collect(&mut live, started_at).await;
        let (aggregator, mut delivery_failures) = match collected {
            Ok(collected) => collected,
            Err(e) => {
                live.abort();
                return Err(self.fail(e));
            }
        };

        let router = match live.shut_down().await {
            Ok(stats) => stats,
            Err(e) => return Err(self.fail(e)),
        };
        while let Ok(failure) = live.failures.try_recv() {
            delivery_failures.push(failure);
        }
        drop(live);
        if self.config.delivery_policy == DeliveryPolicy::FailFast
            && !delivery_failures.is_empty()
        {
            let first = delivery_failures.swap_remove(0);
            return Err(self.fail(first.into()));
        }

        self.transition(RunPhase::Verifying);
        let results = match aggregator.finish() {
            Ok(results) => results,
            Err(e) => return Err(self.fail(e.into())),
        };
        let order = self.factory.group_order();
        let reconstructed = match results
            .verify(secret, &order)
            .and_then(|()| results.reconstruct(&order))
        {
            Ok(value) => value,
            Err(e) => return Err(self.fail(e)),
        };

        self.transition(RunPhase::Done);
        let elapsed = started_at.elapsed();
        info!(
            "All {} parties completed; reconstructed secret matches ({:?})",
            results.len(),
            elapsed
        );

        Ok(RunReport {
            results,
            reconstructed,
            router,
            delivery_failures,
            elapsed,
        })
    }

    /// Builds every engine, then starts the router and the engines.
    async fn launch(&mut self) -> Result<LiveRun<F::Engine>> {
        let total = self.params.old_party_count() + self.params.new_party_count();
        let (shutdown, shutdown_rx) = watch::channel(false);
        let (outbound_tx, outbound_rx) = mpsc::channel(self.config.outbound_capacity);
        let (completion_tx, completions) = mpsc::channel(total);
        let (failure_tx, failures) = mpsc::unbounded_channel();
        let mut adapters = JoinSet::new();

        let mut table = RoutingTable::new();
        let committees = [
            (Role::Old, self.params.old_committee().clone()),
            (Role::New, self.params.new_committee().clone()),
        ];
        for (role, committee) in committees {
            for party in &committee {
                let built = self
                    .build_engine(party, role, &outbound_tx, &completion_tx, &shutdown_rx, &mut adapters)
                    .await
                    .and_then(|engine| table.insert(party.clone(), Arc::new(engine)));
                if let Err(e) = built {
                    let _ = shutdown.send(true);
                    adapters.abort_all();
                    return Err(e);
                }
            }
        }
        // Only the adapters keep the shared channels open from here on.
        drop(outbound_tx);
        drop(completion_tx);

        let table = Arc::new(table);
        let router = Router::new(Arc::clone(&table), outbound_rx, failure_tx);
        let router = tokio::spawn(router.run(shutdown_rx));

        let mut starts = JoinSet::new();
        for party in table.parties() {
            let Some((_, engine)) = table.get(party.id()) else {
                continue;
            };
            let engine = Arc::clone(engine);
            let party = party.clone();
            starts.spawn_blocking(move || {
                debug!("Starting engine for {}", party);
                engine.start().map_err(|error| StartFailure { party, error })
            });
        }

        self.transition(RunPhase::Running);
        info!(
            "Resharing running: {} old → {} new parties (new threshold {})",
            self.params.old_party_count(),
            self.params.new_party_count(),
            self.params.new_threshold()
        );

        Ok(LiveRun {
            shutdown,
            adapters,
            starts,
            router: Some(router),
            completions,
            failures,
        })
    }

    async fn build_engine(
        &self,
        party: &PartyId,
        role: Role,
        outbound: &mpsc::Sender<MessageEnvelope>,
        completions: &mpsc::Sender<Completion<FactoryOutput<F>>>,
        shutdown: &watch::Receiver<bool>,
        adapters: &mut JoinSet<()>,
    ) -> Result<F::Engine> {
        info!("Computing local pre-params for {}", party);
        let pre_params = self.pre_params(party).await?;

        let (wire_tx, wire_rx) = mpsc::unbounded_channel();
        let (done_tx, done_rx) = oneshot::channel();
        adapters.spawn(forward_outbound(
            party.clone(),
            wire_rx,
            outbound.clone(),
            shutdown.clone(),
        ));
        adapters.spawn(forward_completion(party.clone(), role, done_rx, completions.clone()));

        let handle = EngineHandle::new(party.clone(), wire_tx, done_tx);
        self.factory
            .build(party, role, pre_params, handle)
            .map_err(|source| ReshareError::Startup {
                party: party.clone(),
                source,
            })
    }

    async fn pre_params(&self, party: &PartyId) -> Result<F::PreParams> {
        let factory = Arc::clone(&self.factory);
        let owned = party.clone();
        let limit = self.config.pre_params_timeout;
        let task = tokio::task::spawn_blocking(move || factory.pre_params(&owned));

        match tokio::time::timeout(limit, task).await {
            Ok(Ok(Ok(pre_params))) => Ok(pre_params),
            Ok(Ok(Err(source))) => Err(ReshareError::PreParams {
                party: party.clone(),
                source,
            }),
            Ok(Err(join)) => Err(join.into()),
            Err(_) => Err(ReshareError::PreParamsTimeout {
                party: party.clone(),
                limit,
            }),
        }
    }

    /// Waits until every new-committee member has reported.
    async fn collect(
        &self,
        live: &mut LiveRun<F::Engine>,
        started_at: Instant,
    ) -> Result<(ResultAggregator<FactoryOutput<F>>, Vec<DeliveryError>)> {
        let mut aggregator = ResultAggregator::new(self.params.new_committee().clone());
        let mut delivery_failures = Vec::new();
        let deadline = run_deadline(started_at, self.config.run_timeout);
        let expired = tokio::time::sleep_until(deadline);
        tokio::pin!(expired);

        while !aggregator.is_complete() {
            // The router reports a failure before the recipient can finish,
            // so polling failures ahead of completions never misses one.
            tokio::select! {
                biased;

                Some(joined) = live.starts.join_next() => check_start(joined)?,
                Some(failure) = live.failures.recv() => {
                    if self.config.delivery_policy == DeliveryPolicy::FailFast {
                        return Err(failure.into());
                    }
                    delivery_failures.push(failure);
                }
                completion = live.completions.recv() => {
                    let Some(completion) = completion else {
                        return Err(ReshareError::Aggregation(
                            crate::error::AggregationError::Missing(aggregator.outstanding()),
                        ));
                    };
                    self.record_completion(&mut aggregator, completion)?;
                }
                _ = &mut expired => {
                    return Err(ReshareError::Timeout {
                        elapsed: started_at.elapsed(),
                        outstanding: aggregator.outstanding(),
                        delivery_failures: delivery_failures.len(),
                    });
                }
            }
        }

        // Start calls may still be wrapping up after their party finished.
        loop {
            match tokio::time::timeout_at(deadline, live.starts.join_next()).await {
                Ok(Some(joined)) => check_start(joined)?,
                Ok(None) => break,
                Err(_) => {
                    return Err(ReshareError::Timeout {
                        elapsed: started_at.elapsed(),
                        outstanding: Vec::new(),
                        delivery_failures: delivery_failures.len(),
                    })
                }
            }
        }

        Ok((aggregator, delivery_failures))
    }

    fn record_completion(
        &self,
        aggregator: &mut ResultAggregator<FactoryOutput<F>>,
        completion: Completion<FactoryOutput<F>>,
    ) -> Result<()> {
        let Completion {
            party,
            role,
            outcome,
        } = completion;

        match (role, outcome) {
            (_, Err(source)) => Err(ReshareError::Engine { party, source }),
            (Role::Old, Ok(_)) => {
                info!("Old committee party {} finished resharing", party);
                Ok(())
            }
            (Role::New, Ok(output)) => {
                aggregator.accept(&party, output)?;
                info!(
                    "{} completed ({} / {})",
                    party,
                    aggregator.collected(),
                    aggregator.expected()
                );
                Ok(())
            }
        }
    }

    fn transition(&mut self, next: RunPhase) {
        debug!("Run phase {} -> {}", self.phase, next);
        self.phase = next;
        self.transitions.push(next);
    }

    fn fail(&mut self, error: ReshareError) -> ReshareError {
        error!("Resharing failed during {}: {}", self.phase, error);
        self.transition(RunPhase::Failed);
        error
    }
}

/// Run deadline on the tokio clock. A timeout the clock cannot represent
/// is clamped to [`MAX_TIMEOUT`] instead of overflowing.
fn run_deadline(started_at: Instant, timeout: Duration) -> tokio::time::Instant {
    let at = started_at
        .checked_add(timeout)
        .or_else(|| started_at.checked_add(MAX_TIMEOUT))
        .unwrap_or(started_at);
    tokio::time::Instant::from_std(at)
}

fn check_start(joined: std::result::Result<StartResult, tokio::task::JoinError>) -> Result<()> {
    match joined {
        Ok(Ok(())) => Ok(()),
        Ok(Err(StartFailure { party, error })) => Err(ReshareError::Startup {
            party,
            source: error,
        }),
        Err(join) => Err(join.into()),
    }
}

/// Tags every message of `party` with its identity and forwards it to the
/// shared stream.
async fn forward_outbound(
    party: PartyId,
    mut wire: mpsc::UnboundedReceiver<WireMessage>,
    outbound: mpsc::Sender<MessageEnvelope>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            next = wire.recv() => {
                let Some(message) = next else { break };
                if outbound.send(MessageEnvelope::new(party.clone(), message)).await.is_err() {
                    warn!("Shared stream closed; dropping messages from {}", party);
                    break;
                }
            }
        }
    }
    debug!("Outbound adapter for {} stopped", party);
}

async fn forward_completion<O>(
    party: PartyId,
    role: Role,
    done: oneshot::Receiver<EngineOutcome<O>>,
    completions: mpsc::Sender<Completion<O>>,
) {
    match done.await {
        Ok(outcome) => {
            let _ = completions
                .send(Completion {
                    party,
                    role,
                    outcome,
                })
                .await;
        }
        Err(_) => debug!("{} was dropped without reporting a result", party),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DeliveryPolicy;
    use crate::engine::Routing;
    use crate::error::AggregationError;
    use crate::party::PeerGroup;
    use std::collections::HashMap;
    use std::time::Duration;

    const ORDER: u64 = 1_000_003;

    #[derive(Debug, Clone, PartialEq)]
    struct TestShare(u64);

    impl SecretShare for TestShare {
        fn secret_share(&self) -> BigUint {
            BigUint::from(self.0)
        }
    }

    #[derive(Clone)]
    enum Script {
        /// Broadcast once on start, then finish
        Announce,
        /// Finish with the share once any message arrives
        FinishOnMessage(u64),
        FailStart,
        FailOnMessage,
        /// Never finishes
        Silent,
        /// Sends to a ghost and to signer2 on start, then finishes
        MisrouteThenFinish(u64),
        /// Finish with the share once a message from the given sender arrives
        FinishOnMessageFrom(&'static str, u64),
    }

    struct ScriptedEngine {
        script: Script,
        handle: EngineHandle<TestShare>,
    }

    impl ProtocolEngine for ScriptedEngine {
        type Output = TestShare;

        fn start(&self) -> std::result::Result<(), EngineError> {
            match &self.script {
                Script::Announce => {
                    self.handle
                        .send(WireMessage::new(vec![1], Routing::Broadcast, "Announce"))?;
                    self.handle.finish(Ok(TestShare(0)))
                }
                Script::FailStart => Err(EngineError::Startup("no pre-params".into())),
                Script::MisrouteThenFinish(value) => {
                    let ghost = PartyId::new("ghost", "Ghost", 99).unwrap();
                    let signer2 = PartyId::new("signer2", "Signer2", 2).unwrap();
                    self.handle.send(WireMessage::new(
                        vec![2],
                        Routing::To(vec![ghost, signer2]),
                        "Misroute",
                    ))?;
                    self.handle.finish(Ok(TestShare(*value)))
                }
                _ => Ok(()),
            }
        }

        fn consume(
            &self,
            _payload: &[u8],
            from: &PartyId,
            _is_broadcast: bool,
        ) -> std::result::Result<bool, EngineError> {
            assert_ne!(from, self.handle.party());
            match &self.script {
                Script::FinishOnMessage(value) if !self.handle.is_finished() => {
                    self.handle.finish(Ok(TestShare(*value)))?;
                    Ok(true)
                }
                Script::FinishOnMessageFrom(sender, value)
                    if from.id() == *sender && !self.handle.is_finished() =>
                {
                    self.handle.finish(Ok(TestShare(*value)))?;
                    Ok(true)
                }
                Script::FailOnMessage if !self.handle.is_finished() => {
                    self.handle
                        .finish(Err(EngineError::Protocol("bad round".into())))?;
                    Ok(true)
                }
                _ => Ok(true),
            }
        }
    }

    struct ScriptedFactory {
        scripts: HashMap<String, Script>,
        fail_pre_params: bool,
    }

    impl EngineFactory for ScriptedFactory {
        type Engine = ScriptedEngine;
        type PreParams = ();

        fn pre_params(&self, party: &PartyId) -> std::result::Result<(), EngineError> {
            if self.fail_pre_params {
                return Err(EngineError::Startup(format!("no entropy for {}", party)));
            }
            Ok(())
        }

        fn build(
            &self,
            party: &PartyId,
            _role: Role,
            _pre_params: (),
            handle: EngineHandle<TestShare>,
        ) -> std::result::Result<ScriptedEngine, EngineError> {
            let script = self
                .scripts
                .get(party.id())
                .cloned()
                .unwrap_or(Script::Silent);
            Ok(ScriptedEngine { script, handle })
        }

        fn group_order(&self) -> BigUint {
            BigUint::from(ORDER)
        }
    }

    fn parameters() -> ResharingParameters {
        let old = PeerGroup::new(vec![PartyId::new("importer", "Importer", 0).unwrap()]).unwrap();
        let new = PeerGroup::new(
            (1..=3)
                .map(|i| PartyId::new(format!("signer{i}"), format!("Signer{i}"), i).unwrap())
                .collect(),
        )
        .unwrap();
        ResharingParameters::new(old, new, 0, 2).unwrap()
    }

    /// Importer announces, signers finish with 100/55/100 (sum 0xff).
    fn happy_scripts() -> HashMap<String, Script> {
        HashMap::from([
            ("importer".to_string(), Script::Announce),
            ("signer1".to_string(), Script::FinishOnMessage(100)),
            ("signer2".to_string(), Script::FinishOnMessage(55)),
            ("signer3".to_string(), Script::FinishOnMessage(100)),
        ])
    }

    fn orchestrator(
        scripts: HashMap<String, Script>,
        config: RunConfig,
    ) -> Orchestrator<ScriptedFactory> {
        let factory = ScriptedFactory {
            scripts,
            fail_pre_params: false,
        };
        Orchestrator::new(parameters(), config, factory)
    }

    #[tokio::test]
    async fn test_run_reaches_done() {
        let mut orch = orchestrator(happy_scripts(), RunConfig::default());
        let report = orch.run(&BigUint::from(0xffu32)).await.unwrap();

        assert_eq!(orch.phase(), RunPhase::Done);
        assert_eq!(
            orch.transitions(),
            &[
                RunPhase::Idle,
                RunPhase::Starting,
                RunPhase::Running,
                RunPhase::Collecting,
                RunPhase::Verifying,
                RunPhase::Done
            ]
        );
        assert_eq!(report.results.len(), 3);
        assert_eq!(report.results.get("signer2"), Some(&TestShare(55)));
        assert_eq!(report.reconstructed, BigUint::from(0xffu32));
        assert_eq!(report.router.envelopes, 1);
        assert_eq!(report.router.deliveries, 3);
        assert!(report.delivery_failures.is_empty());
    }

    #[tokio::test]
    async fn test_start_failure_fails_run_without_verification() {
        let mut scripts = happy_scripts();
        scripts.insert("signer2".to_string(), Script::FailStart);
        let mut orch = orchestrator(scripts, RunConfig::default());

        let err = orch.run(&BigUint::from(0xffu32)).await.unwrap_err();
        assert!(matches!(err, ReshareError::Startup { ref party, .. } if party.id() == "signer2"));
        assert_eq!(orch.phase(), RunPhase::Failed);
        assert!(!orch.transitions().contains(&RunPhase::Verifying));
    }

    #[tokio::test]
    async fn test_engine_error_is_fatal() {
        let mut scripts = happy_scripts();
        scripts.insert("signer3".to_string(), Script::FailOnMessage);
        let mut orch = orchestrator(scripts, RunConfig::default());

        let err = orch.run(&BigUint::from(0xffu32)).await.unwrap_err();
        assert!(matches!(err, ReshareError::Engine { ref party, .. } if party.id() == "signer3"));
        assert_eq!(orch.phase(), RunPhase::Failed);
    }

    #[tokio::test]
    async fn test_stalled_run_times_out() {
        let mut scripts = happy_scripts();
        scripts.insert("signer1".to_string(), Script::Silent);
        let config = RunConfig::default().with_run_timeout(Duration::from_millis(200));
        let mut orch = orchestrator(scripts, config);

        match orch.run(&BigUint::from(0xffu32)).await {
            Err(ReshareError::Timeout { outstanding, .. }) => {
                let ids: Vec<&str> = outstanding.iter().map(|p| p.id()).collect();
                assert_eq!(ids, vec!["signer1"]);
            }
            other => panic!("expected timeout, got {:?}", other.map(|r| r.results.len())),
        }
        assert_eq!(orch.phase(), RunPhase::Failed);
    }

    #[tokio::test]
    async fn test_misrouted_message_is_recorded_under_best_effort() {
        let mut scripts = happy_scripts();
        scripts.insert("signer1".to_string(), Script::MisrouteThenFinish(100));
        // The ghost delivery is attempted before signer2 can finish.
        scripts.insert("signer2".to_string(), Script::FinishOnMessageFrom("signer1", 55));
        let mut orch = orchestrator(scripts, RunConfig::default());

        let report = orch.run(&BigUint::from(0xffu32)).await.unwrap();
        assert_eq!(orch.phase(), RunPhase::Done);
        assert_eq!(report.delivery_failures.len(), 1);
        assert_eq!(report.delivery_failures[0].recipient_id(), "ghost");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_misrouted_message_fails_under_fail_fast() {
        // Every signer completes, so the failure races the last completion.
        for _ in 0..50 {
            let mut scripts = happy_scripts();
            scripts.insert("signer1".to_string(), Script::MisrouteThenFinish(100));
            scripts.insert("signer2".to_string(), Script::FinishOnMessageFrom("signer1", 55));
            let config = RunConfig::default().with_delivery_policy(DeliveryPolicy::FailFast);
            let mut orch = orchestrator(scripts, config);

            match orch.run(&BigUint::from(0xffu32)).await {
                Err(ReshareError::Delivery(failure @ DeliveryError::UnknownRecipient { .. })) => {
                    assert_eq!(failure.recipient_id(), "ghost");
                }
                Err(other) => panic!("expected an unknown recipient, got {other}"),
                Ok(report) => panic!(
                    "run reached Done with {} delivery failure(s)",
                    report.delivery_failures.len()
                ),
            }
            assert_eq!(orch.phase(), RunPhase::Failed);
            assert!(!orch.transitions().contains(&RunPhase::Verifying));
        }
    }

    #[tokio::test]
    async fn test_wrong_shares_fail_verification() {
        let mut scripts = happy_scripts();
        scripts.insert("signer3".to_string(), Script::FinishOnMessage(101));
        let mut orch = orchestrator(scripts, RunConfig::default());

        let err = orch.run(&BigUint::from(0xffu32)).await.unwrap_err();
        assert!(matches!(err, ReshareError::Verification { .. }));
        assert_eq!(
            &orch.transitions()[orch.transitions().len() - 2..],
            &[RunPhase::Verifying, RunPhase::Failed]
        );
    }

    #[tokio::test]
    async fn test_pre_params_failure_fails_during_starting() {
        let factory = ScriptedFactory {
            scripts: happy_scripts(),
            fail_pre_params: true,
        };
        let mut orch = Orchestrator::new(parameters(), RunConfig::default(), factory);

        let err = orch.run(&BigUint::from(0xffu32)).await.unwrap_err();
        assert!(matches!(err, ReshareError::PreParams { .. }));
        assert_eq!(
            orch.transitions(),
            &[RunPhase::Idle, RunPhase::Starting, RunPhase::Failed]
        );
    }

    #[tokio::test]
    async fn test_oversized_run_timeout_is_a_config_error() {
        let config = RunConfig::default().with_run_timeout(Duration::from_secs(u64::MAX));
        let mut orch = orchestrator(happy_scripts(), config);

        let err = orch.run(&BigUint::from(0xffu32)).await.unwrap_err();
        assert!(matches!(err, ReshareError::Config(_)));
        assert_eq!(
            orch.transitions(),
            &[RunPhase::Idle, RunPhase::Starting, RunPhase::Failed]
        );
    }

    #[test]
    fn test_run_deadline_clamps_instead_of_overflowing() {
        let now = Instant::now();
        let clamped = run_deadline(now, Duration::from_secs(u64::MAX));
        assert!(clamped > tokio::time::Instant::from_std(now));
        assert_eq!(
            run_deadline(now, Duration::from_secs(5)),
            tokio::time::Instant::from_std(now + Duration::from_secs(5))
        );
    }

    #[tokio::test]
    async fn test_run_only_once() {
        let mut orch = orchestrator(happy_scripts(), RunConfig::default());
        orch.run(&BigUint::from(0xffu32)).await.unwrap();
        assert!(matches!(
            orch.run(&BigUint::from(0xffu32)).await,
            Err(ReshareError::Config(_))
        ));
    }

    #[test]
    fn test_missing_completion_message() {
        let party = PartyId::new("signer1", "Signer1", 1).unwrap();
        let err = ReshareError::from(AggregationError::Missing(vec![party]));
        assert_eq!(
            err.to_string(),
            "aggregation error: missing completions for [signer1]"
        );
    }
}
