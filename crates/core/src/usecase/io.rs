//! 解析種別ごとの入力 → ジョブ駆動。
//!
//! 入力・コンパイル状態・参照表示フラグのいずれかが変わるたびに評価し直す。
//! ゲートが開いていればデバウンス後に前のジョブを取り消して新しいジョブを投げ、
//! 終端まで待って結果を公開する。公開するのは「現在アクティブなジョブ」の結果だけで、
//! 追い越された古いジョブの結果は捨てる。

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::Serialize;
use serde_json::Value;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use super::hub::EventHub;
use super::store::Store;
use crate::domain::error::AppError;
use crate::domain::job::{Job, JobId, JobState};
use crate::domain::settings::{ClientSettings, WaitStrategy};
use crate::domain::types::{Analysis, AnalysisRequest, GenerateParams, Input, Meta, Output};
use crate::domain::validation::Verdict;
use crate::infra::api::{abortable, Backend};
use crate::infra::metrics::{Metrics, Stage};

/// 表示中の結果と現在の入力の対応
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputState {
    /// まだ結果がない
    #[default]
    None,
    /// 結果は古い入力に対するもの
    Stale,
    Current,
}

/// 公開する解析結果
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct Results {
    /// この結果を計算した入力
    pub input: Option<Value>,
    pub output_state: OutputState,
    /// この結果を計算したときのコンパイルジョブ
    pub compilation: Option<JobId>,
    pub output: Option<Output>,
    pub reference_output: Option<Output>,
    pub validation: Option<Verdict>,
    /// 公開時点のジョブのスナップショット
    pub job: Option<Job>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DriverPhase {
    #[default]
    Idle,
    Debouncing,
    Submitting,
    Waiting,
    Completed,
}

/// ジョブ終端から得た結果
#[derive(Debug, Clone, PartialEq)]
struct Completion {
    output: Option<Output>,
    reference_output: Option<Output>,
    validation: Option<Verdict>,
    job: Option<Job>,
}

impl Completion {
    fn failure(message: impl Into<String>) -> Self {
        Self {
            output: None,
            reference_output: None,
            validation: Some(Verdict::failure(message)),
            job: None,
        }
    }

    /// 終端状態のジョブから結果を作る
    fn from_job(job: Job) -> Self {
        match job.state {
            JobState::Succeeded => {
                let data = job.analysis_data.clone().unwrap_or_default();
                Self {
                    output: data.output,
                    reference_output: data.reference_output,
                    validation: data.validation.map(Verdict::from),
                    job: Some(job),
                }
            }
            _ => Self {
                output: None,
                reference_output: None,
                validation: Some(Verdict::failure(failure_message(&job))),
                job: Some(job),
            },
        }
    }
}

/// 入力とコンパイルの両方が今と一致し、かつコンパイル済みのときだけ `Current`
fn output_state_of(
    result_input: Option<&Value>,
    result_compilation: Option<JobId>,
    input: Option<&Value>,
    compiled: Option<JobId>,
) -> OutputState {
    let same_input = result_input.is_some() && result_input == input;
    let same_compilation = result_compilation.is_some() && result_compilation == compiled;
    if same_input && same_compilation {
        OutputState::Current
    } else {
        OutputState::Stale
    }
}

/// 成功以外の終端状態のメッセージ。`Failed` は stdout そのもの。
fn failure_message(job: &Job) -> String {
    let summary = match job.state {
        JobState::Failed => return job.stdout.clone(),
        JobState::Canceled => "job was canceled",
        JobState::Timeout => "job timed out",
        JobState::OutputLimitExceeded => "job exceeded the output limit",
        JobState::Warning => "job finished with warnings",
        JobState::Queued | JobState::Running | JobState::Succeeded => "job did not finish",
    };
    if job.stdout.is_empty() {
        summary.to_string()
    } else {
        format!("{summary}\n{}", job.stdout)
    }
}

struct ActiveJob {
    id: JobId,
    input: Value,
    compilation: Option<JobId>,
    generation: u64,
}

#[derive(Default)]
struct DriverState {
    /// デバウンス中または投入中の実行
    pending: Option<CancellationToken>,
    active: Option<ActiveJob>,
    generation: u64,
    waiter: Option<JoinHandle<()>>,
    reference_task: Option<JoinHandle<()>>,
    trigger_task: Option<JoinHandle<()>>,
}

/// 一つの解析種別の入力 → ジョブ駆動
pub struct AnalysisDriver {
    analysis: Analysis,
    backend: Arc<dyn Backend>,
    hub: Arc<EventHub>,
    settings: ClientSettings,
    metrics: Arc<Metrics>,
    input: Store<Option<Value>>,
    results: Store<Results>,
    reference: Store<Option<Results>>,
    meta: Store<Option<Meta>>,
    phase: Store<DriverPhase>,
    state: Mutex<DriverState>,
}

impl AnalysisDriver {
    pub fn new(
        analysis: Analysis,
        backend: Arc<dyn Backend>,
        hub: Arc<EventHub>,
        settings: ClientSettings,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            analysis,
            backend,
            hub,
            settings,
            metrics,
            input: Store::default(),
            results: Store::default(),
            reference: Store::default(),
            meta: Store::default(),
            phase: Store::default(),
            state: Mutex::new(DriverState::default()),
        }
    }

    // ===== 公開API =====

    pub fn analysis(&self) -> Analysis {
        self.analysis
    }

    /// 入力を差し替える。同じ値なら何もしない。
    pub fn set_input(&self, json: Value) {
        self.input.set_if_changed(Some(json));
    }

    /// `/generate` で入力を作って差し替える
    pub async fn generate(&self, seed: Option<u64>) -> Result<Value, AppError> {
        let input = self
            .backend
            .generate(GenerateParams {
                analysis: self.analysis,
                seed,
            })
            .await?;
        if input.analysis != self.analysis {
            return Err(AppError::decode(format!(
                "generate returned input for {} instead of {}",
                input.analysis, self.analysis
            )));
        }
        self.set_input(input.json.clone());
        Ok(input.json)
    }

    pub fn input(&self) -> &Store<Option<Value>> {
        &self.input
    }

    pub fn results(&self) -> &Store<Results> {
        &self.results
    }

    /// 参照実装の出力（入力が変わるたびに取り直す）
    pub fn reference(&self) -> &Store<Option<Results>> {
        &self.reference
    }

    pub fn meta(&self) -> &Store<Option<Meta>> {
        &self.meta
    }

    pub fn phase(&self) -> &Store<DriverPhase> {
        &self.phase
    }

    pub fn active_job_id(&self) -> Option<JobId> {
        self.state.lock().active.as_ref().map(|a| a.id)
    }

    /// 入力・コンパイル状態・参照表示フラグの監視を始める（二回目以降は何もしない）
    pub fn start(self: &Arc<Self>) {
        let mut state = self.state.lock();
        if state.trigger_task.is_some() {
            return;
        }
        let driver = self.clone();
        state.trigger_task = Some(tokio::spawn(driver.trigger_loop()));
    }

    /// 全タスクを止める。サーバー側のジョブは取り消さない。
    pub fn stop(&self) {
        let mut state = self.state.lock();
        if let Some(token) = state.pending.take() {
            token.cancel();
        }
        for task in [
            state.waiter.take(),
            state.reference_task.take(),
            state.trigger_task.take(),
        ]
        .into_iter()
        .flatten()
        {
            task.abort();
        }
    }

    // ===== トリガー =====

    async fn trigger_loop(self: Arc<Self>) {
        let mut input_rx = self.input.subscribe();
        let mut status_rx = self.hub.compilation_status().subscribe();
        let mut show_reference_rx = self.hub.show_reference().subscribe();

        if self.input.get().is_some() {
            self.fetch_reference();
        }
        self.evaluate();

        loop {
            tokio::select! {
                res = input_rx.changed() => {
                    if res.is_err() {
                        break;
                    }
                    self.fetch_reference();
                }
                res = status_rx.changed() => {
                    if res.is_err() {
                        break;
                    }
                }
                res = show_reference_rx.changed() => {
                    if res.is_err() {
                        break;
                    }
                }
            }
            self.evaluate();
        }
    }

    /// 保留中の実行を取り消し、ゲートが開いていればデバウンスからやり直す
    fn evaluate(self: &Arc<Self>) {
        // complete と同じロックの下で判定し直す
        let mut state = self.state.lock();
        self.refresh_output_state();

        let input = self.input.get();
        if let Some(token) = state.pending.take() {
            token.cancel();
        }

        let Some(input) = input else {
            self.settle_idle();
            return;
        };
        if !self.hub.is_compiled() {
            log::debug!("{}: waiting for compilation", self.analysis);
            self.settle_idle();
            return;
        }
        if self.hub.show_reference().get() {
            self.settle_idle();
            return;
        }

        let token = CancellationToken::new();
        state.pending = Some(token.clone());
        self.phase.set_if_changed(DriverPhase::Debouncing);
        tokio::spawn(self.clone().run(input, token));
    }

    /// 取り消した実行の分だけ状態を戻す。待機中のジョブはそのまま。
    fn settle_idle(&self) {
        self.phase.update(|phase| {
            if matches!(phase, DriverPhase::Debouncing | DriverPhase::Submitting) {
                *phase = DriverPhase::Idle;
                true
            } else {
                false
            }
        });
    }

    /// 成功したコンパイルのジョブ ID
    fn compiled_id(&self) -> Option<JobId> {
        self.hub
            .compilation_status()
            .get()
            .filter(|status| status.is_ready())
            .map(|status| status.id)
    }

    fn output_state_for(&self, input: &Value, compilation: Option<JobId>) -> OutputState {
        output_state_of(
            Some(input),
            compilation,
            self.input.get().as_ref(),
            self.compiled_id(),
        )
    }

    /// 呼び出し側が `state` のロックを持っていること
    fn refresh_output_state(&self) {
        let current = self.input.get();
        let compiled = self.compiled_id();
        self.results.update(|results| {
            if results.output_state == OutputState::None {
                return false;
            }
            let next = output_state_of(
                results.input.as_ref(),
                results.compilation,
                current.as_ref(),
                compiled,
            );
            if results.output_state == next {
                return false;
            }
            results.output_state = next;
            true
        });
    }

    // ===== 実行 =====

    async fn run(self: Arc<Self>, input: Value, token: CancellationToken) {
        tokio::select! {
            biased;
            _ = token.cancelled() => return,
            _ = tokio::time::sleep(self.settings.debounce()) => {}
        }

        if !self.supersede(&token) {
            return;
        }
        let compilation = self.compiled_id();
        self.phase.set_if_changed(DriverPhase::Submitting);

        let request = AnalysisRequest {
            analysis: self.analysis,
            json: input.clone(),
            hash: None,
        };
        let started = Instant::now();
        self.metrics.inc_submissions();

        match abortable(&token, self.backend.submit_analysis(request)).await {
            Ok(Some(execution)) => {
                self.metrics.record_latency(
                    self.analysis,
                    Stage::Submit,
                    started.elapsed().as_millis() as u64,
                );
                self.activate(execution.id, input, compilation, &token, started);
            }
            Ok(None) => {
                log::warn!("{}: backend rejected the submission", self.analysis);
                self.metrics.inc_submissions_rejected();
                if !token.is_cancelled() {
                    self.phase.set_if_changed(DriverPhase::Idle);
                }
            }
            Err(e) if e.is_aborted() => {}
            Err(e) => {
                log::warn!("{}: submission failed: {e}", self.analysis);
                self.publish_request_failure(input, compilation, &token, e.to_string());
            }
        }
    }

    /// 前のアクティブジョブを外して取り消す。この実行が既に追い越されていれば false。
    fn supersede(&self, token: &CancellationToken) -> bool {
        let mut state = self.state.lock();
        if token.is_cancelled() {
            return false;
        }
        if let Some(waiter) = state.waiter.take() {
            waiter.abort();
        }
        if let Some(previous) = state.active.take() {
            let finished = self
                .hub
                .registry()
                .get(previous.id)
                .is_some_and(|job| job.state.is_terminal());
            if !finished {
                self.spawn_cancel(previous.id);
            }
        }
        true
    }

    fn activate(
        self: &Arc<Self>,
        id: JobId,
        input: Value,
        compilation: Option<JobId>,
        token: &CancellationToken,
        started: Instant,
    ) {
        let mut state = self.state.lock();
        if token.is_cancelled() {
            log::debug!("{}: job {id} is already outdated", self.analysis);
            self.spawn_cancel(id);
            return;
        }

        state.generation += 1;
        let generation = state.generation;
        state.active = Some(ActiveJob {
            id,
            input,
            compilation,
            generation,
        });
        if let Some(waiter) = state.waiter.take() {
            waiter.abort();
        }
        state.waiter = Some(tokio::spawn(self.clone().wait_for(id, generation, started)));

        log::info!("{}: submitted job {id}", self.analysis);
        self.hub.selected_job_id().set(Some(id));
        self.phase.set_if_changed(DriverPhase::Waiting);
    }

    fn spawn_cancel(&self, id: JobId) {
        self.metrics.inc_cancellations_sent();
        let backend = self.backend.clone();
        tokio::spawn(async move {
            if let Err(e) = backend.cancel_job(id).await {
                log::debug!("cancel job {id} failed: {e}");
            }
        });
    }

    fn publish_request_failure(
        &self,
        input: Value,
        compilation: Option<JobId>,
        token: &CancellationToken,
        message: String,
    ) {
        let _state = self.state.lock();
        if token.is_cancelled() {
            return;
        }
        let output_state = self.output_state_for(&input, compilation);
        self.metrics.inc_failures_published();
        self.results.set(Results {
            input: Some(input),
            output_state,
            compilation,
            validation: Some(Verdict::failure(message)),
            ..Results::default()
        });
        self.phase.set_if_changed(DriverPhase::Completed);
    }

    // ===== 待機 =====

    async fn wait_for(self: Arc<Self>, id: JobId, generation: u64, started: Instant) {
        let completion = match self.settings.wait_timeout() {
            Some(limit) => match tokio::time::timeout(limit, self.resolve(id)).await {
                Ok(completion) => completion,
                Err(_) => {
                    log::warn!("{}: gave up waiting for job {id}", self.analysis);
                    Completion::failure(format!("timed out waiting for job {id}"))
                }
            },
            None => self.resolve(id).await,
        };
        self.metrics.record_latency(
            self.analysis,
            Stage::Job,
            started.elapsed().as_millis() as u64,
        );
        self.complete(generation, completion);
    }

    async fn resolve(&self, id: JobId) -> Completion {
        match self.settings.wait_strategy {
            WaitStrategy::Events => self.watch_registry(id).await,
            WaitStrategy::LongPoll => self.long_poll(id).await,
        }
    }

    /// レジストリ上のジョブが終端になるまで待つ。`Reset` で消えたら再登場を待つ。
    async fn watch_registry(&self, id: JobId) -> Completion {
        let registry = self.hub.registry();
        let mut revision = registry.subscribe();
        loop {
            if let Some(mut handle) = registry.handle(id) {
                loop {
                    let job = handle.borrow_and_update().clone();
                    if job.state.is_terminal() {
                        return Completion::from_job(job);
                    }
                    if handle.changed().await.is_err() {
                        break;
                    }
                }
            }
            if revision.changed().await.is_err() {
                return Completion::failure(format!("lost track of job {id}"));
            }
        }
    }

    async fn long_poll(&self, id: JobId) -> Completion {
        let snapshot = || self.hub.registry().get(id);
        match self.backend.wait_job(id).await {
            Ok(Some(output)) => {
                let job = snapshot();
                Completion {
                    output: Some(output.output),
                    reference_output: job
                        .as_ref()
                        .and_then(|j| j.analysis_data.as_ref())
                        .and_then(|d| d.reference_output.clone()),
                    validation: Some(output.validation.into()),
                    job,
                }
            }
            Ok(None) => match snapshot() {
                Some(job) if job.state.is_terminal() => Completion::from_job(job),
                _ => Completion::failure(format!("job {id} did not succeed")),
            },
            Err(e) => Completion::failure(e.to_string()),
        }
    }

    /// アクティブなジョブの結果なら公開する
    fn complete(&self, generation: u64, completion: Completion) {
        let state = self.state.lock();
        let Some(active) = state
            .active
            .as_ref()
            .filter(|active| active.generation == generation)
        else {
            log::debug!("{}: discarding outdated result", self.analysis);
            self.metrics.inc_stale_discarded();
            return;
        };

        let output_state = self.output_state_for(&active.input, active.compilation);
        if completion.validation.as_ref().is_some_and(Verdict::is_failure) {
            self.metrics.inc_failures_published();
        } else {
            self.metrics.inc_results_published();
        }
        log::info!("{}: job {} finished", self.analysis, active.id);

        self.results.set(Results {
            input: Some(active.input.clone()),
            output_state,
            compilation: active.compilation,
            output: completion.output,
            reference_output: completion.reference_output,
            validation: completion.validation,
            job: completion.job,
        });
        self.phase.set_if_changed(DriverPhase::Completed);
    }

    // ===== 参照出力 =====

    /// 参照出力とメタ情報を取り直す（前の取得は中断する）
    fn fetch_reference(self: &Arc<Self>) {
        let Some(json) = self.input.get() else {
            return;
        };
        let mut state = self.state.lock();
        if let Some(task) = state.reference_task.take() {
            task.abort();
        }
        let driver = self.clone();
        state.reference_task = Some(tokio::spawn(async move {
            let started = Instant::now();
            let input = Input {
                analysis: driver.analysis,
                json: json.clone(),
            };
            match driver.backend.reference(input).await {
                Ok(execution) => {
                    driver.metrics.record_latency(
                        driver.analysis,
                        Stage::Reference,
                        started.elapsed().as_millis() as u64,
                    );
                    driver.meta.set(execution.meta);
                    let validation = match execution.error {
                        Some(error) => Verdict::failure(error),
                        None => Verdict::CorrectTerminated,
                    };
                    driver.reference.set(Some(Results {
                        input: Some(json),
                        output_state: OutputState::Current,
                        compilation: None,
                        output: execution.output.clone(),
                        reference_output: execution.output,
                        validation: Some(validation),
                        job: None,
                    }));
                }
                Err(e) => log::warn!("{}: reference failed: {e}", driver.analysis),
            }
        }));
    }
}

/// 解析種別ごとのドライバを遅延生成して保持する
pub struct IoRegistry {
    backend: Arc<dyn Backend>,
    hub: Arc<EventHub>,
    settings: ClientSettings,
    metrics: Arc<Metrics>,
    drivers: Mutex<HashMap<Analysis, Arc<AnalysisDriver>>>,
}

impl IoRegistry {
    pub fn new(
        backend: Arc<dyn Backend>,
        hub: Arc<EventHub>,
        settings: ClientSettings,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            backend,
            hub,
            settings,
            metrics,
            drivers: Mutex::new(HashMap::new()),
        }
    }

    /// 既存のドライバを返す。なければ作って監視を始める。
    /// `default_input` は新規作成時だけ使う。
    pub fn get_or_init(
        &self,
        analysis: Analysis,
        default_input: Option<Value>,
    ) -> Arc<AnalysisDriver> {
        let mut drivers = self.drivers.lock();
        if let Some(driver) = drivers.get(&analysis) {
            return driver.clone();
        }

        let driver = Arc::new(AnalysisDriver::new(
            analysis,
            self.backend.clone(),
            self.hub.clone(),
            self.settings.clone(),
            self.metrics.clone(),
        ));
        if let Some(input) = default_input {
            driver.set_input(input);
        }
        driver.start();
        drivers.insert(analysis, driver.clone());
        log::debug!("created driver for {analysis}");
        driver
    }

    pub fn get(&self, analysis: Analysis) -> Option<Arc<AnalysisDriver>> {
        self.drivers.lock().get(&analysis).cloned()
    }

    pub fn stop_all(&self) {
        for driver in self.drivers.lock().values() {
            driver.stop();
        }
    }
}
