use super::core::{RunReport, Stage, StageOutcome, StageOutput, StageRecord};
use super::hooks::{HookAction, HookContext, PersistArtifactHook, ProgressHook, StageHook};
use super::run_state::{RunState, RunTracker, Transition};
use crate::artifact::ArtifactSink;
use crate::config::RunnerConfig;
use crate::error::{StagelineError, StagelineResult};
use crate::events::{EventEmitter, PipelineEvent};
use crate::logger::{LogLevel, LOGGER};
use crate::state::{StateSnapshot, StateStore, StateView};
use serde_json::{json, Value};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Instant;
use tokio::sync::broadcast;
use uuid::Uuid;

struct StageEntry {
    stage: Box<dyn Stage>,
    hooks: Vec<Arc<dyn StageHook>>,
}

struct PipelineInner {
    name: String,
    stages: Vec<StageEntry>,
    global_hooks: Vec<Arc<dyn StageHook>>,
    config: RunnerConfig,
    events: EventEmitter,
}

/// Pipeline executor that runs stages sequentially
///
/// A `Pipeline` is an immutable definition; each call to [`Pipeline::new_run`]
/// creates an independent [`PipelineRun`] with its own state. Cloning a
/// pipeline is cheap and shares the definition.
///
/// # Example
/// ```no_run
/// use serde_json::json;
/// use stageline::artifact::ArtifactSink;
/// use stageline::pipeline::stages::FnStage;
/// use stageline::pipeline::{Pipeline, StageDescriptor, StageOutput};
///
/// # async fn demo() -> stageline::error::StagelineResult<()> {
/// let pipeline = Pipeline::builder("greeting")
///     .add_stage(FnStage::new(
///         StageDescriptor::new("greet", "greeting").requires(["name"]),
///         |state| Ok(StageOutput::new(json!(format!("hello {}", state.get_string("name")?)))),
///     ))
///     .build()?;
///
/// let sink = ArtifactSink::in_memory();
/// let report = pipeline.run([("name", json!("ada"))], &sink).await?;
/// assert_eq!(report.snapshot.get("greeting"), Some(&json!("hello ada")));
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct Pipeline {
    inner: Arc<PipelineInner>,
}

impl Pipeline {
    /// Create a new pipeline builder
    pub fn builder(name: impl Into<String>) -> PipelineBuilder {
        PipelineBuilder::new(name)
    }

    /// Get the pipeline name
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Get the number of stages
    pub fn stage_count(&self) -> usize {
        self.inner.stages.len()
    }

    pub fn stage_names(&self) -> Vec<&str> {
        self.inner.stages.iter().map(|e| e.stage.name()).collect()
    }

    pub fn config(&self) -> &RunnerConfig {
        &self.inner.config
    }

    /// Subscribe to lifecycle events of every run of this pipeline
    pub fn subscribe(&self) -> broadcast::Receiver<PipelineEvent> {
        self.inner.events.subscribe()
    }

    /// Artifact sink over the backend named in this pipeline's configuration
    pub fn open_sink(&self) -> ArtifactSink {
        ArtifactSink::from_config(&self.inner.config.artifact_backend)
    }

    /// Check that every stage's required keys are supplied by `available`
    /// or by the output of an earlier stage
    pub fn validate_inputs<I, S>(&self, available: I) -> StagelineResult<()>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut available: HashSet<String> = available.into_iter().map(Into::into).collect();

        for entry in &self.inner.stages {
            let descriptor = entry.stage.descriptor();
            let missing: Vec<String> = descriptor
                .requires
                .iter()
                .filter(|key| !available.contains(*key))
                .cloned()
                .collect();

            if !missing.is_empty() {
                return Err(StagelineError::Configuration {
                    stage: descriptor.name.clone(),
                    missing,
                });
            }
            available.insert(descriptor.output_key.clone());
        }

        Ok(())
    }

    /// Create a run seeded with `inputs`, writing artifacts to `sink`
    pub fn new_run<I, K>(&self, inputs: I, sink: &ArtifactSink) -> StagelineResult<PipelineRun>
    where
        I: IntoIterator<Item = (K, Value)>,
        K: Into<String>,
    {
        Ok(PipelineRun {
            run_id: Uuid::new_v4(),
            pipeline: self.clone(),
            state: StateStore::with_inputs(inputs)?,
            tracker: RunTracker::new(),
            sink: sink.clone(),
            records: Arc::new(Mutex::new(Vec::new())),
            warnings: Arc::new(Mutex::new(Vec::new())),
        })
    }

    /// Create a run and execute it to completion
    pub async fn run<I, K>(&self, inputs: I, sink: &ArtifactSink) -> StagelineResult<RunReport>
    where
        I: IntoIterator<Item = (K, Value)>,
        K: Into<String>,
    {
        self.new_run(inputs, sink)?.execute().await
    }
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("name", &self.inner.name)
            .field("stages", &self.stage_names())
            .field("global_hooks", &self.inner.global_hooks.len())
            .finish()
    }
}

/// One execution of a pipeline
///
/// The run's state, tracker and records are shared handles: clone the
/// `PipelineRun` (or call [`tracker`](Self::tracker)) before spawning
/// `execute` to observe the run while it progresses.
#[derive(Clone)]
pub struct PipelineRun {
    run_id: Uuid,
    pipeline: Pipeline,
    state: StateStore,
    tracker: RunTracker,
    sink: ArtifactSink,
    records: Arc<Mutex<Vec<StageRecord>>>,
    warnings: Arc<Mutex<Vec<String>>>,
}

impl PipelineRun {
    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    pub fn pipeline_name(&self) -> &str {
        self.pipeline.name()
    }

    /// Read-only view of the run's state
    pub fn state(&self) -> StateView {
        self.state.view()
    }

    /// Consistent copy of the run's state and progress
    pub fn snapshot(&self) -> StagelineResult<StateSnapshot> {
        self.state.snapshot()
    }

    pub fn status(&self) -> StagelineResult<RunState> {
        self.tracker.current()
    }

    pub fn transitions(&self) -> StagelineResult<Vec<Transition>> {
        self.tracker.history()
    }

    pub fn tracker(&self) -> RunTracker {
        self.tracker.clone()
    }

    pub fn artifacts(&self) -> &ArtifactSink {
        &self.sink
    }

    pub fn stage_records(&self) -> StagelineResult<Vec<StageRecord>> {
        Ok(self.records.lock()?.clone())
    }

    /// Advisory hook failures recorded so far
    pub fn warnings(&self) -> StagelineResult<Vec<String>> {
        Ok(self.warnings.lock()?.clone())
    }

    /// Execute every stage in order
    ///
    /// Stops at the first fatal error and returns it; the run is left in the
    /// `Failed` state with its state and records available for inspection.
    pub async fn execute(&self) -> StagelineResult<RunReport> {
        let inner = &self.pipeline.inner;
        let total_stages = inner.stages.len();

        // Nothing is logged or emitted unless this call owns the run
        self.tracker.claim()?;

        LOGGER.log(
            LogLevel::Info,
            &format!(
                "Starting pipeline '{}' with {} stages (run: {})",
                inner.name, total_stages, self.run_id
            ),
            "pipeline",
        );
        inner
            .events
            .pipeline_started(self.run_id, &inner.name, total_stages);

        let pipeline_start = Instant::now();

        if let Err(e) = self.pipeline.validate_inputs(self.state.keys()) {
            return Err(self.fail(e));
        }

        for (index, entry) in inner.stages.iter().enumerate() {
            let descriptor = entry.stage.descriptor();
            let stage_name = descriptor.name.clone();

            self.tracker
                .apply(|s| s.start_stage(index, stage_name.clone()))?;

            LOGGER.log(
                LogLevel::Info,
                &format!(
                    "Executing stage {}/{}: {} (run: {})",
                    index + 1,
                    total_stages,
                    stage_name,
                    self.run_id
                ),
                "pipeline",
            );
            inner.events.stage_started(
                self.run_id,
                &inner.name,
                &stage_name,
                index,
                total_stages,
            );

            let stage_start = Instant::now();

            match self.execute_stage(index, entry).await {
                Ok(outcome) => {
                    let duration = stage_start.elapsed();
                    LOGGER.log_with_context(
                        LogLevel::Info,
                        &format!(
                            "Stage '{}' completed successfully in {:.2}s (run: {})",
                            stage_name,
                            duration.as_secs_f64(),
                            self.run_id
                        ),
                        "pipeline",
                        HashMap::from([
                            ("run_id".to_string(), json!(self.run_id)),
                            ("stage".to_string(), json!(stage_name)),
                            ("output_key".to_string(), json!(outcome.output_key)),
                            ("duration_ms".to_string(), json!(duration.as_millis() as u64)),
                            (
                                "short_circuited_by".to_string(),
                                json!(outcome.short_circuited_by),
                            ),
                        ]),
                    );

                    inner.events.stage_completed(
                        self.run_id,
                        &inner.name,
                        &stage_name,
                        index,
                        total_stages,
                        &outcome.output_key,
                        outcome
                            .artifacts
                            .iter()
                            .map(|a| format!("{}@{}", a.name, a.version))
                            .collect(),
                        duration.as_millis() as u64,
                    );

                    self.records
                        .lock()?
                        .push(StageRecord::applied(&outcome, duration));
                }
                Err(e) => {
                    self.records.lock()?.push(StageRecord::failed(
                        descriptor,
                        e.to_string(),
                        stage_start.elapsed(),
                    ));
                    return Err(self.fail(e));
                }
            }
        }

        let status = self.tracker.apply(|s| s.complete(total_stages))?;
        let total_duration = pipeline_start.elapsed();

        let report = RunReport {
            run_id: self.run_id,
            pipeline_name: inner.name.clone(),
            status,
            stage_records: self.stage_records()?,
            total_duration,
            warnings: self.warnings()?,
            snapshot: self.state.snapshot()?,
        };

        LOGGER.log(
            LogLevel::Info,
            &format!(
                "Pipeline '{}' completed successfully in {:.2}s (run: {})",
                inner.name,
                total_duration.as_secs_f64(),
                self.run_id
            ),
            "pipeline",
        );
        inner.events.pipeline_completed(
            self.run_id,
            &inner.name,
            total_duration.as_millis() as u64,
            report.executed_stages(),
            report.short_circuited_stages(),
        );

        Ok(report)
    }

    /// Pre-hooks, body, output write, artifact persistence, post-hooks
    async fn execute_stage(
        &self,
        index: usize,
        entry: &StageEntry,
    ) -> StagelineResult<StageOutcome> {
        let inner = &self.pipeline.inner;
        let descriptor = entry.stage.descriptor();
        let stage_name = descriptor.name.as_str();

        let missing = self.state.missing_keys(&descriptor.requires);
        if !missing.is_empty() {
            return Err(StagelineError::Configuration {
                stage: stage_name.to_string(),
                missing,
            });
        }

        let ctx = HookContext {
            run_id: self.run_id,
            pipeline_name: &inner.name,
            stage: descriptor,
            stage_index: index,
            total_stages: inner.stages.len(),
            state: &self.state,
            artifacts: &self.sink,
        };

        let hooks: Vec<&dyn StageHook> = inner
            .global_hooks
            .iter()
            .chain(entry.hooks.iter())
            .map(Arc::as_ref)
            .collect();

        let mut substitute: Option<(String, StageOutput)> = None;
        for hook in &hooks {
            match hook.before_stage(&ctx) {
                Ok(HookAction::Continue) => {}
                Ok(HookAction::ShortCircuit(output)) => {
                    substitute = Some((hook.name().to_string(), output));
                    break;
                }
                Err(e) => self.hook_failed(*hook, stage_name, e)?,
            }
        }

        let (output, short_circuited_by) = match substitute {
            Some((hook_name, output)) => {
                LOGGER.log(
                    LogLevel::Info,
                    &format!(
                        "Stage '{}' short-circuited by hook '{}' (run: {})",
                        stage_name, hook_name, self.run_id
                    ),
                    "pipeline",
                );
                inner.events.stage_short_circuited(
                    self.run_id,
                    &inner.name,
                    stage_name,
                    &hook_name,
                );
                (output, Some(hook_name))
            }
            None => {
                let view = self.state.view();
                let output = entry.stage.run(&view).await.map_err(|e| {
                    StagelineError::StageExecution {
                        stage: stage_name.to_string(),
                        source: Box::new(e),
                    }
                })?;
                (output, None)
            }
        };

        // Nothing is written unless the output key is still free
        if let Some(written_by) = self.state.writer_of(&descriptor.output_key) {
            return Err(StagelineError::KeyConflict {
                key: descriptor.output_key.clone(),
                stage: stage_name.to_string(),
                written_by,
            });
        }

        let StageOutput {
            value,
            artifacts: new_artifacts,
        } = output;

        // Artifacts go first so a failed put leaves the key space untouched;
        // earlier versions from this stage remain in the append-only sink
        let mut artifacts = Vec::with_capacity(new_artifacts.len());
        for artifact in new_artifacts {
            let stored = self.sink.put_artifact(artifact).map_err(|e| {
                StagelineError::StageExecution {
                    stage: stage_name.to_string(),
                    source: Box::new(e),
                }
            })?;
            artifacts.push(stored);
        }

        self.state
            .set(descriptor.output_key.clone(), value.clone(), stage_name)?;

        let outcome = StageOutcome {
            stage_name: stage_name.to_string(),
            output_key: descriptor.output_key.clone(),
            value,
            artifacts,
            short_circuited_by,
        };

        for hook in hooks.iter().rev() {
            if let Err(e) = hook.after_stage(&ctx, &outcome) {
                self.hook_failed(*hook, stage_name, e)?;
            }
        }

        Ok(outcome)
    }

    /// Advisory failures are recorded and swallowed; anything else aborts
    fn hook_failed(
        &self,
        hook: &dyn StageHook,
        stage_name: &str,
        error: StagelineError,
    ) -> StagelineResult<()> {
        let inner = &self.pipeline.inner;
        let message = error.to_string();
        let advisory = hook.advisory();

        inner.events.hook_failed(
            self.run_id,
            &inner.name,
            stage_name,
            hook.name(),
            advisory,
            &message,
        );

        if advisory {
            LOGGER.log(
                LogLevel::Warn,
                &format!(
                    "Advisory hook '{}' failed on stage '{}': {} (run: {})",
                    hook.name(),
                    stage_name,
                    message,
                    self.run_id
                ),
                "pipeline",
            );
            self.warnings
                .lock()?
                .push(format!("{} ({}): {}", hook.name(), stage_name, message));
            return Ok(());
        }

        match error {
            StagelineError::KeyConflict {
                key, written_by, ..
            } => Err(StagelineError::KeyConflict {
                key,
                stage: stage_name.to_string(),
                written_by,
            }),
            other => Err(StagelineError::Hook {
                stage: stage_name.to_string(),
                hook: hook.name().to_string(),
                source: Box::new(other),
            }),
        }
    }

    /// Move the run to Failed, log and publish, and hand the error back
    fn fail(&self, error: StagelineError) -> StagelineError {
        let inner = &self.pipeline.inner;
        let message = error.to_string();

        let failed_stage = match self.tracker.apply(|s| s.fail(message.clone())) {
            Ok(RunState::Failed { stage, .. }) => stage,
            Ok(_) => None,
            Err(e) => {
                LOGGER.log(
                    LogLevel::Warn,
                    &format!("Could not record failure (run: {}): {}", self.run_id, e),
                    "pipeline",
                );
                None
            }
        };

        LOGGER.log(
            LogLevel::Error,
            &format!(
                "Pipeline '{}' failed at {}: {} (run: {})",
                inner.name,
                failed_stage.as_deref().unwrap_or("input validation"),
                message,
                self.run_id
            ),
            "pipeline",
        );
        inner
            .events
            .pipeline_failed(self.run_id, &inner.name, failed_stage.as_deref(), &message);

        error
    }
}

impl std::fmt::Debug for PipelineRun {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipelineRun")
            .field("run_id", &self.run_id)
            .field("pipeline", &self.pipeline.name())
            .field("state", &self.state)
            .field("sink", &self.sink)
            .finish()
    }
}

enum PendingHook {
    Ready(Arc<dyn StageHook>),
    Persist {
        state_key: String,
        artifact_name: String,
        content_type: String,
    },
}

struct PendingStage {
    stage: Box<dyn Stage>,
    hooks: Vec<PendingHook>,
}

/// Builder for constructing pipelines
pub struct PipelineBuilder {
    name: String,
    stages: Vec<PendingStage>,
    global_hooks: Vec<Arc<dyn StageHook>>,
    config: RunnerConfig,
    errors: Vec<String>,
}

impl PipelineBuilder {
    /// Create a new pipeline builder
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            stages: Vec::new(),
            global_hooks: Vec::new(),
            config: RunnerConfig::default(),
            errors: Vec::new(),
        }
    }

    pub fn config(mut self, config: RunnerConfig) -> Self {
        self.config = config;
        self
    }

    /// Add a stage to the pipeline
    pub fn add_stage<S: Stage + 'static>(self, stage: S) -> Self {
        self.add_boxed_stage(Box::new(stage))
    }

    /// Add a boxed stage to the pipeline
    pub fn add_boxed_stage(mut self, stage: Box<dyn Stage>) -> Self {
        self.stages.push(PendingStage {
            stage,
            hooks: Vec::new(),
        });
        self
    }

    /// Attach a hook to the most recently added stage
    pub fn with_hook<H: StageHook + 'static>(self, hook: H) -> Self {
        self.attach(PendingHook::Ready(Arc::new(hook)))
    }

    /// Attach a hook that runs around every stage
    pub fn global_hook<H: StageHook + 'static>(mut self, hook: H) -> Self {
        self.global_hooks.push(Arc::new(hook));
        self
    }

    /// Save `state_key` as artifact `artifact_name` after the most recently
    /// added stage; failures are advisory per `RunnerConfig::advisory_artifact_hooks`
    pub fn persist_artifact(
        self,
        state_key: impl Into<String>,
        artifact_name: impl Into<String>,
        content_type: impl Into<String>,
    ) -> Self {
        self.attach(PendingHook::Persist {
            state_key: state_key.into(),
            artifact_name: artifact_name.into(),
            content_type: content_type.into(),
        })
    }

    fn attach(mut self, hook: PendingHook) -> Self {
        match self.stages.last_mut() {
            Some(stage) => stage.hooks.push(hook),
            None => self
                .errors
                .push("a stage hook was attached before any stage was added".to_string()),
        }
        self
    }

    /// Build the pipeline
    ///
    /// # Errors
    /// `EmptyPipeline` with no stages; `BuilderError` for duplicate stage
    /// names or misplaced hooks
    pub fn build(self) -> StagelineResult<Pipeline> {
        if !self.errors.is_empty() {
            return Err(StagelineError::BuilderError(self.errors.join("; ")));
        }
        if self.stages.is_empty() {
            return Err(StagelineError::EmptyPipeline);
        }

        let mut names = HashSet::new();
        let mut output_keys = HashSet::new();
        for pending in &self.stages {
            let descriptor = pending.stage.descriptor();
            if !names.insert(descriptor.name.clone()) {
                return Err(StagelineError::BuilderError(format!(
                    "duplicate stage name '{}'",
                    descriptor.name
                )));
            }
            if !output_keys.insert(descriptor.output_key.clone()) {
                LOGGER.log(
                    LogLevel::Warn,
                    &format!(
                        "Pipeline '{}': stage '{}' reuses output key '{}' and will fail with a key conflict",
                        self.name, descriptor.name, descriptor.output_key
                    ),
                    "pipeline",
                );
            }
        }

        let advisory = self.config.advisory_artifact_hooks;
        let stages = self
            .stages
            .into_iter()
            .map(|pending| StageEntry {
                stage: pending.stage,
                hooks: pending
                    .hooks
                    .into_iter()
                    .map(|hook| match hook {
                        PendingHook::Ready(hook) => hook,
                        PendingHook::Persist {
                            state_key,
                            artifact_name,
                            content_type,
                        } => Arc::new(
                            PersistArtifactHook::new(state_key, artifact_name, content_type)
                                .with_advisory(advisory),
                        ) as Arc<dyn StageHook>,
                    })
                    .collect(),
            })
            .collect();

        let mut global_hooks = self.global_hooks;
        if self.config.track_progress {
            global_hooks.insert(0, Arc::new(ProgressHook::new()));
        }

        Ok(Pipeline {
            inner: Arc::new(PipelineInner {
                name: self.name,
                stages,
                global_hooks,
                events: EventEmitter::new(self.config.event_buffer),
                config: self.config,
            }),
        })
    }
}
