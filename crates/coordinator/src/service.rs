//! Coordinator service
//!
//! Composes the parameter store, the task and account ledgers, the task
//! generator and the model collaborator into the operations exposed to
//! workers. All methods are synchronous and may block on the ledger backend;
//! the HTTP layer runs them on the blocking pool.

use crate::aggregation::{AggregationPolicy, ExponentialBlend};
use crate::generator::TaskGenerator;
use crate::ledger::{
    AccountLedger, LedgerStore, MemoryStore, SqliteStore, TaskId, TaskLedger, TransactionKind,
};
use crate::parameters::ParameterStore;
use chrono::Utc;
use hydra_common::config::{CoordinatorConfig, StorageBackend};
use hydra_common::{BigramModel, HydraConfig, HydraError, Model, Parameters, Result, METRICS};
use hydra_proto::{
    BalanceResponse, HealthResponse, QueryResponse, RegisterResponse, SubmitResultResponse,
    TaskAssignment, TransactionEntry, TransactionsResponse,
};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Upper bound on one serialized `f32` plus its separator
const JSON_BYTES_PER_ELEMENT: usize = 16;

/// Room for ids, tensor names and shapes around the parameter data
const REQUEST_OVERHEAD_BYTES: usize = 1 << 20;

/// Federated-learning coordinator
pub struct Coordinator {
    config: CoordinatorConfig,
    parameters: ParameterStore,
    tasks: TaskLedger,
    accounts: AccountLedger,
    generator: TaskGenerator,
    policy: Box<dyn AggregationPolicy>,
    model: Arc<dyn Model>,
}

impl Coordinator {
    /// Build a coordinator over an existing ledger store
    pub fn new(
        config: CoordinatorConfig,
        model: Arc<dyn Model>,
        store: Arc<dyn LedgerStore>,
    ) -> Result<Self> {
        config.validate()?;

        let initial = model.initial_parameters();
        let parameters = match &config.checkpoint_path {
            Some(path) => ParameterStore::load_or(path, initial)?,
            None => ParameterStore::new(initial),
        };

        let corpus = config.load_corpus()?;
        if corpus.is_empty() {
            warn!("Training corpus is empty, no tasks will be generated");
        }
        let generator = TaskGenerator::new(corpus, config.samples_per_task, config.reward_per_task);
        let policy = Box::new(ExponentialBlend::new(config.blend_weight)?);

        Ok(Self {
            config,
            parameters,
            tasks: TaskLedger::new(Arc::clone(&store)),
            accounts: AccountLedger::new(store),
            generator,
            policy,
            model,
        })
    }

    /// Build the coordinator described by `config`
    pub fn from_config(config: &HydraConfig) -> Result<Self> {
        let coordinator = config.coordinator()?.clone();

        let store: Arc<dyn LedgerStore> = match coordinator.storage.backend {
            StorageBackend::Memory => {
                info!("Using in-memory ledger");
                Arc::new(MemoryStore::new())
            }
            StorageBackend::Sqlite => Arc::new(SqliteStore::open(&coordinator.storage.path)?),
        };
        let model = Arc::new(BigramModel::new(config.model.clone()));

        Self::new(coordinator, model, store)
    }

    /// Replace the aggregation policy
    pub fn with_policy(mut self, policy: Box<dyn AggregationPolicy>) -> Self {
        info!("Aggregation policy set to {}", policy.name());
        self.policy = policy;
        self
    }

    pub fn config(&self) -> &CoordinatorConfig {
        &self.config
    }

    pub fn parameters(&self) -> &ParameterStore {
        &self.parameters
    }

    pub fn tasks(&self) -> &TaskLedger {
        &self.tasks
    }

    pub fn accounts(&self) -> &AccountLedger {
        &self.accounts
    }

    /// Largest accepted request body: the configured limit, or room for a
    /// full JSON update of the current model
    pub fn max_request_bytes(&self) -> usize {
        self.config.max_request_bytes.unwrap_or_else(|| {
            self.parameters
                .total_elements()
                .saturating_mul(JSON_BYTES_PER_ELEMENT)
                .saturating_add(REQUEST_OVERHEAD_BYTES)
        })
    }

    /// Seed the pending pool at startup.
    ///
    /// A persisted ledger that still holds pending tasks is resumed as is.
    pub fn bootstrap(&self) -> Result<usize> {
        let pending = self.tasks.pending_count()?;
        if pending > 0 {
            info!("Resuming with {} pending tasks", pending);
            self.refresh_pending_gauge();
            return Ok(0);
        }

        let created = match self.generator.generate(
            self.config.initial_tasks,
            &self.tasks,
            &mut rand::rng(),
        ) {
            Ok(ids) => {
                info!(
                    "Seeded {} tasks from {} corpus examples",
                    ids.len(),
                    self.generator.corpus_len()
                );
                ids.len()
            }
            Err(HydraError::EmptyCorpus) => {
                warn!("Cannot seed tasks from an empty corpus");
                0
            }
            Err(e) => return Err(e),
        };
        self.refresh_pending_gauge();
        Ok(created)
    }

    /// Create the worker's account if needed
    pub fn register(&self, worker_id: &str) -> Result<RegisterResponse> {
        validate_worker_id(worker_id)?;

        let (account, created) = self.accounts.register(worker_id)?;
        if created {
            METRICS.coordinator.registrations_total.inc();
        }

        Ok(RegisterResponse {
            worker_id: account.worker_id,
            created,
            balance: account.balance,
        })
    }

    /// Hand the oldest pending task to `worker_id` with a parameter snapshot.
    ///
    /// `None` means the pending pool is empty.
    pub fn request_task(&self, worker_id: &str) -> Result<Option<TaskAssignment>> {
        validate_worker_id(worker_id)?;
        self.accounts.account(worker_id)?;

        let Some(task) = self.tasks.acquire_one_pending(worker_id)? else {
            debug!("No pending tasks for {}", worker_id);
            return Ok(None);
        };

        let parameters = self.parameters.snapshot();
        METRICS.coordinator.tasks_issued_total.inc();
        self.refresh_pending_gauge();
        info!("Issued {} to {}", task.task_id, worker_id);

        Ok(Some(TaskAssignment {
            task_id: task.task_id.to_string(),
            data_batch: task.data_batch,
            parameters,
            reward: task.reward,
        }))
    }

    /// Accept a trained update: complete the task, blend, then pay the reward
    pub fn submit_result(
        &self,
        worker_id: &str,
        task_id: &str,
        update: &Parameters,
    ) -> Result<SubmitResultResponse> {
        validate_worker_id(worker_id)?;
        let outcome = self.try_submit(worker_id, &TaskId::from(task_id), update);
        if let Err(e) = &outcome {
            METRICS.coordinator.submissions_rejected_total.inc();
            warn!("Rejected result for {} from {}: {}", task_id, worker_id, e);
        }
        outcome
    }

    fn try_submit(
        &self,
        worker_id: &str,
        task_id: &TaskId,
        update: &Parameters,
    ) -> Result<SubmitResultResponse> {
        self.accounts.account(worker_id)?;

        // Reject unusable updates while the task can still be resubmitted
        self.parameters.check_compatible(update)?;

        let receipt = self.tasks.complete(task_id, worker_id, update)?;

        if let Err(e) = self.parameters.apply(update, self.policy.as_ref()) {
            error!("Blend failed after completing {}: {}", task_id, e);
            return Err(e);
        }

        let new_balance = self.accounts.credit(
            worker_id,
            receipt.reward,
            TransactionKind::Reward,
            format!("Completed {}", task_id),
        )?;

        METRICS.coordinator.tasks_completed_total.inc();
        info!(
            "Accepted {} from {}: +{} tokens, balance {}",
            task_id, worker_id, receipt.reward, new_balance
        );

        Ok(SubmitResultResponse {
            tokens_earned: receipt.reward,
            new_balance,
        })
    }

    pub fn balance(&self, worker_id: &str) -> Result<BalanceResponse> {
        validate_worker_id(worker_id)?;
        let account = self.accounts.account(worker_id)?;
        let tasks_completed = self.tasks.count_completed_by(worker_id)?;

        Ok(BalanceResponse {
            worker_id: account.worker_id,
            balance: account.balance,
            tasks_completed,
            member_since: account.created_at,
        })
    }

    /// Debit the query cost, then answer `prompt` from the current model.
    ///
    /// The debit is not refunded when inference fails.
    pub fn paid_query(&self, worker_id: &str, prompt: &str) -> Result<QueryResponse> {
        validate_worker_id(worker_id)?;
        let cost = self.config.query_cost;

        let new_balance = match self.accounts.debit_if_sufficient(
            worker_id,
            cost,
            TransactionKind::Query,
            "Model query",
        ) {
            Ok(balance) => balance,
            Err(e) => {
                if matches!(e, HydraError::InsufficientBalance { .. }) {
                    METRICS.coordinator.queries_rejected_total.inc();
                }
                return Err(e);
            }
        };

        let snapshot = self.parameters.snapshot();
        let response = self.model.infer(&snapshot, prompt)?;

        METRICS.coordinator.queries_total.inc();
        info!("Served query for {}: -{} tokens", worker_id, cost);

        Ok(QueryResponse {
            response,
            cost,
            new_balance,
        })
    }

    pub fn transactions(&self, worker_id: &str) -> Result<TransactionsResponse> {
        validate_worker_id(worker_id)?;
        let transactions = self
            .accounts
            .history(worker_id)?
            .into_iter()
            .map(|tx| TransactionEntry {
                delta: tx.delta,
                kind: tx.kind.as_str().to_string(),
                reason: tx.reason,
                timestamp: tx.timestamp,
            })
            .collect();

        Ok(TransactionsResponse {
            worker_id: worker_id.to_string(),
            transactions,
        })
    }

    pub fn health(&self) -> Result<HealthResponse> {
        Ok(HealthResponse {
            status: "healthy".to_string(),
            timestamp: Utc::now(),
            pending_tasks: self.tasks.pending_count()?,
        })
    }

    /// Generate a fresh batch when no task is pending. Returns tasks created.
    pub fn replenish_if_low(&self) -> Result<usize> {
        if self.tasks.pending_count()? > 0 {
            return Ok(0);
        }

        info!("Pending pool empty, generating {} tasks", self.config.replenish_batch);
        let ids = self
            .generator
            .generate(self.config.replenish_batch, &self.tasks, &mut rand::rng())?;
        self.refresh_pending_gauge();
        Ok(ids.len())
    }

    /// Requeue tasks whose lease expired; a no-op when leases are disabled
    pub fn reap_expired_leases(&self) -> Result<u64> {
        let Some(lease) = self.config.task_lease() else {
            return Ok(0);
        };

        let requeued = self.tasks.requeue_expired(lease)?;
        if requeued > 0 {
            METRICS.coordinator.tasks_requeued_total.inc_by(requeued);
            self.refresh_pending_gauge();
        }
        Ok(requeued)
    }

    /// One maintenance pass; failures are logged, never propagated
    pub fn run_maintenance(&self) {
        if let Err(e) = self.reap_expired_leases() {
            warn!("Lease reaping failed: {}", e);
        }
        if let Err(e) = self.replenish_if_low() {
            warn!("Task replenishment failed: {}", e);
        }
    }

    /// Write the global parameters to the configured checkpoint, if any
    pub fn save_checkpoint(&self) -> Result<()> {
        match &self.config.checkpoint_path {
            Some(path) => self.parameters.save(path),
            None => Ok(()),
        }
    }

    /// Start the periodic maintenance loop
    pub fn start_background(self: Arc<Self>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(self.config.replenish_interval());
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

            loop {
                interval.tick().await;

                let this = Arc::clone(&self);
                if let Err(e) = tokio::task::spawn_blocking(move || this.run_maintenance()).await {
                    error!("Maintenance pass panicked: {}", e);
                }
            }
        })
    }

    fn refresh_pending_gauge(&self) {
        match self.tasks.pending_count() {
            Ok(pending) => METRICS.coordinator.tasks_pending.set(pending as i64),
            Err(e) => debug!("Could not count pending tasks: {}", e),
        }
    }
}

fn validate_worker_id(worker_id: &str) -> Result<()> {
    if worker_id.trim().is_empty() {
        return Err(HydraError::invalid_input("worker_id must not be empty"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::TaskStatus;
    use hydra_common::{Tensor, TrainOptions, TrainReport};

    /// Model with a single four-element tensor
    struct TinyModel;

    impl Model for TinyModel {
        fn initial_parameters(&self) -> Parameters {
            let mut params = Parameters::new();
            params.insert("w", Tensor::zeros(vec![4]).unwrap());
            params.insert("b", Tensor::zeros(vec![1]).unwrap());
            params
        }

        fn train(
            &self,
            _params: &mut Parameters,
            _batch: &[String],
            _options: TrainOptions,
        ) -> Result<TrainReport> {
            Ok(TrainReport {
                final_loss: 0.0,
                steps: 0,
            })
        }

        fn infer(&self, params: &Parameters, prompt: &str) -> Result<String> {
            Ok(format!("{} @ {}", prompt, params.get("w").map_or(0.0, |w| w.data[0])))
        }
    }

    fn config() -> CoordinatorConfig {
        CoordinatorConfig {
            corpus: ["a", "b", "c", "d"].iter().map(|s| s.to_string()).collect(),
            initial_tasks: 1,
            ..CoordinatorConfig::default()
        }
    }

    fn coordinator(config: CoordinatorConfig) -> Coordinator {
        Coordinator::new(config, Arc::new(TinyModel), Arc::new(MemoryStore::new())).unwrap()
    }

    fn update(value: f32) -> Parameters {
        let mut params = Parameters::new();
        params.insert("w", Tensor::full(vec![4], value).unwrap());
        params
    }

    #[test]
    fn test_register_twice_keeps_balance() {
        let coordinator = coordinator(config());
        assert!(coordinator.register("w1").unwrap().created);

        coordinator
            .accounts()
            .credit("w1", 2.0, TransactionKind::Reward, "seed")
            .unwrap();

        let again = coordinator.register("w1").unwrap();
        assert!(!again.created);
        assert_eq!(again.balance, 2.0);
    }

    #[test]
    fn test_empty_worker_id_is_invalid() {
        let coordinator = coordinator(config());
        assert!(matches!(
            coordinator.register("  "),
            Err(HydraError::InvalidInput(_))
        ));
        assert!(matches!(
            coordinator.balance(""),
            Err(HydraError::InvalidInput(_))
        ));
        assert!(matches!(
            coordinator.transactions(" "),
            Err(HydraError::InvalidInput(_))
        ));
    }

    #[test]
    fn test_unknown_worker_cannot_request() {
        let coordinator = coordinator(config());
        coordinator.bootstrap().unwrap();

        assert!(matches!(
            coordinator.request_task("ghost"),
            Err(HydraError::UnknownWorker(_))
        ));
        assert_eq!(coordinator.tasks().pending_count().unwrap(), 1);
    }

    #[test]
    fn test_full_task_round_trip() {
        let coordinator = coordinator(config());
        assert_eq!(coordinator.bootstrap().unwrap(), 1);
        coordinator.register("w1").unwrap();

        let assignment = coordinator.request_task("w1").unwrap().unwrap();
        assert_eq!(assignment.data_batch.len(), 3);
        assert_eq!(assignment.parameters, TinyModel.initial_parameters());

        let outcome = coordinator
            .submit_result("w1", &assignment.task_id, &update(10.0))
            .unwrap();
        assert_eq!(outcome.tokens_earned, 1.0);
        assert_eq!(outcome.new_balance, 1.0);

        let task = coordinator
            .tasks()
            .get(&TaskId::from(assignment.task_id.as_str()))
            .unwrap()
            .unwrap();
        assert_eq!(task.status, TaskStatus::Completed);

        let global = coordinator.parameters().snapshot();
        assert!(global.get("w").unwrap().data.iter().all(|&x| (x - 1.0).abs() < 1e-6));
        assert_eq!(global.get("b").unwrap().data, vec![0.0]);

        let balance = coordinator.balance("w1").unwrap();
        assert_eq!(balance.balance, 1.0);
        assert_eq!(balance.tasks_completed, 1);
    }

    #[test]
    fn test_empty_pool_returns_none() {
        let coordinator = coordinator(config());
        coordinator.register("w1").unwrap();
        assert!(coordinator.request_task("w1").unwrap().is_none());
    }

    #[test]
    fn test_double_submit_does_not_double_credit() {
        let coordinator = coordinator(config());
        coordinator.bootstrap().unwrap();
        coordinator.register("w1").unwrap();
        let assignment = coordinator.request_task("w1").unwrap().unwrap();

        coordinator
            .submit_result("w1", &assignment.task_id, &update(1.0))
            .unwrap();
        let version = coordinator.parameters().version();

        let err = coordinator
            .submit_result("w1", &assignment.task_id, &update(1.0))
            .unwrap_err();
        assert!(matches!(err, HydraError::InvalidTaskState { .. }));
        assert_eq!(coordinator.balance("w1").unwrap().balance, 1.0);
        assert_eq!(coordinator.parameters().version(), version);
    }

    #[test]
    fn test_submit_by_other_worker_is_rejected() {
        let coordinator = coordinator(config());
        coordinator.bootstrap().unwrap();
        coordinator.register("w1").unwrap();
        coordinator.register("w2").unwrap();
        let assignment = coordinator.request_task("w1").unwrap().unwrap();

        let err = coordinator
            .submit_result("w2", &assignment.task_id, &update(1.0))
            .unwrap_err();
        assert!(matches!(err, HydraError::NotYourTask { .. }));
        assert_eq!(coordinator.balance("w2").unwrap().balance, 0.0);
    }

    #[test]
    fn test_incompatible_update_leaves_task_assigned() {
        let coordinator = coordinator(config());
        coordinator.bootstrap().unwrap();
        coordinator.register("w1").unwrap();
        let assignment = coordinator.request_task("w1").unwrap().unwrap();

        let mut bad = Parameters::new();
        bad.insert("w", Tensor::zeros(vec![5]).unwrap());
        let err = coordinator
            .submit_result("w1", &assignment.task_id, &bad)
            .unwrap_err();
        assert!(matches!(err, HydraError::IncompatibleUpdateShape { .. }));

        // A corrected resubmission still succeeds
        coordinator
            .submit_result("w1", &assignment.task_id, &update(1.0))
            .unwrap();
    }

    #[test]
    fn test_unknown_task_submission() {
        let coordinator = coordinator(config());
        coordinator.register("w1").unwrap();

        assert!(matches!(
            coordinator.submit_result("w1", "task-missing", &update(1.0)),
            Err(HydraError::TaskNotFound(_))
        ));
    }

    #[test]
    fn test_query_rejected_when_balance_too_low() {
        let coordinator = coordinator(config());
        coordinator.register("w1").unwrap();
        coordinator
            .accounts()
            .credit("w1", 0.3, TransactionKind::Reward, "seed")
            .unwrap();

        let err = coordinator.paid_query("w1", "hello").unwrap_err();
        assert!(matches!(err, HydraError::InsufficientBalance { .. }));
        assert_eq!(coordinator.balance("w1").unwrap().balance, 0.3);
    }

    #[test]
    fn test_query_debits_cost() {
        let coordinator = coordinator(config());
        coordinator.register("w1").unwrap();
        coordinator
            .accounts()
            .credit("w1", 1.0, TransactionKind::Reward, "seed")
            .unwrap();

        let answer = coordinator.paid_query("w1", "hello").unwrap();
        assert_eq!(answer.cost, 0.5);
        assert_eq!(answer.new_balance, 0.5);
        assert!(answer.response.starts_with("hello"));

        let history = coordinator.transactions("w1").unwrap().transactions;
        assert_eq!(history.len(), 2);
        assert_eq!(history[1].kind, "query");
        assert_eq!(coordinator.accounts().audited_balance("w1").unwrap(), 0.5);
    }

    #[test]
    fn test_replenish_only_when_pool_is_empty() {
        let coordinator = coordinator(CoordinatorConfig {
            replenish_batch: 4,
            ..config()
        });
        coordinator.bootstrap().unwrap();
        assert_eq!(coordinator.replenish_if_low().unwrap(), 0);

        coordinator.register("w1").unwrap();
        coordinator.request_task("w1").unwrap().unwrap();
        assert_eq!(coordinator.replenish_if_low().unwrap(), 4);
        assert_eq!(coordinator.tasks().pending_count().unwrap(), 4);
    }

    #[test]
    fn test_maintenance_survives_empty_corpus() {
        let coordinator = coordinator(CoordinatorConfig {
            corpus: Vec::new(),
            ..config()
        });
        assert_eq!(coordinator.bootstrap().unwrap(), 0);
        assert!(matches!(
            coordinator.replenish_if_low(),
            Err(HydraError::EmptyCorpus)
        ));
        coordinator.run_maintenance();
    }

    #[test]
    fn test_leases_disabled_by_default() {
        let coordinator = coordinator(config());
        coordinator.bootstrap().unwrap();
        coordinator.register("w1").unwrap();
        coordinator.request_task("w1").unwrap().unwrap();

        assert_eq!(coordinator.reap_expired_leases().unwrap(), 0);
        assert_eq!(coordinator.tasks().count_by_status(TaskStatus::Assigned).unwrap(), 1);
    }

    #[test]
    fn test_resume_keeps_existing_pending_tasks() {
        let store: Arc<dyn LedgerStore> = Arc::new(MemoryStore::new());
        let first = Coordinator::new(config(), Arc::new(TinyModel), Arc::clone(&store)).unwrap();
        assert_eq!(first.bootstrap().unwrap(), 1);

        let second = Coordinator::new(config(), Arc::new(TinyModel), store).unwrap();
        assert_eq!(second.bootstrap().unwrap(), 0);
        assert_eq!(second.tasks().pending_count().unwrap(), 1);
    }

    #[tokio::test]
    async fn test_background_loop_replenishes() {
        let coordinator = Arc::new(coordinator(CoordinatorConfig {
            replenish_interval_secs: 1,
            replenish_batch: 2,
            ..config()
        }));

        let handle = Arc::clone(&coordinator).start_background();
        tokio::time::sleep(std::time::Duration::from_millis(200)).await;
        handle.abort();

        assert_eq!(coordinator.tasks().pending_count().unwrap(), 2);
    }
}
