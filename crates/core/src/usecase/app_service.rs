use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::Value;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::connection::{Backoff, ConnectionManager};
use super::hub::EventHub;
use super::io::{AnalysisDriver, IoRegistry};
use super::scoreboard::PublicScoreboard;
use crate::domain::error::AppError;
use crate::domain::job::JobId;
use crate::domain::settings::ClientSettings;
use crate::domain::types::Analysis;
use crate::infra::api::{Backend, HttpBackend, PushSource};
use crate::infra::metrics::{Metrics, MetricsSummary};

/// アプリケーションサービス（シェルが一つだけ持つ）
pub struct AppService {
    settings: ClientSettings,
    backend: Arc<dyn Backend>,
    connections: ConnectionManager,
    hub: Arc<EventHub>,
    scoreboard: Arc<PublicScoreboard>,
    ios: IoRegistry,
    metrics: Arc<Metrics>,
    shutdown: CancellationToken,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl AppService {
    pub fn new(
        settings: ClientSettings,
        backend: Arc<dyn Backend>,
        push: Arc<dyn PushSource>,
    ) -> Self {
        let metrics = Arc::new(Metrics::new());
        let hub = Arc::new(EventHub::new(metrics.clone()));
        let shutdown = CancellationToken::new();
        let connections =
            ConnectionManager::new(push, Backoff::from_settings(&settings), shutdown.clone());
        let ios = IoRegistry::new(
            backend.clone(),
            hub.clone(),
            settings.clone(),
            metrics.clone(),
        );

        Self {
            settings,
            backend,
            connections,
            hub,
            scoreboard: Arc::new(PublicScoreboard::new()),
            ios,
            metrics,
            shutdown,
            tasks: Mutex::new(Vec::new()),
        }
    }

    /// HTTP バックエンドにつなぐ構成で作る
    pub fn connect(settings: ClientSettings) -> Result<Self, AppError> {
        let http = Arc::new(HttpBackend::new(settings.api_base.clone())?);
        log::info!("using backend at {}", settings.api_base);
        Ok(Self::new(settings, http.clone(), http))
    }

    // ==================== Lifecycle ====================

    /// プッシュチャネルを開く（二回目以降は何もしない）
    pub fn start(&self) {
        let mut tasks = self.tasks.lock();
        if !tasks.is_empty() {
            return;
        }
        log::info!("starting push channels (backend: {})", self.backend.name());
        tasks.push(self.connections.spawn_events(self.hub.clone()));
        tasks.push(self.connections.spawn_scoreboard(self.scoreboard.clone()));
    }

    /// 受信ループとドライバを止める
    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        self.ios.stop_all();
        let tasks: Vec<JoinHandle<()>> = self.tasks.lock().drain(..).collect();
        for task in tasks {
            if let Err(e) = task.await {
                log::warn!("listener task ended abnormally: {e}");
            }
        }
        log::info!("shut down");
    }

    // ==================== Analysis ====================

    /// 解析種別のドライバ（初回呼び出しで作られる）
    pub fn io(&self, analysis: Analysis, default_input: Option<Value>) -> Arc<AnalysisDriver> {
        self.ios.get_or_init(analysis, default_input)
    }

    /// ジョブを明示的に取り消す
    pub async fn cancel_job(&self, id: JobId) -> Result<(), AppError> {
        self.backend.cancel_job(id).await?;
        self.metrics.inc_cancellations_sent();
        Ok(())
    }

    // ==================== View flags ====================

    pub fn select_job(&self, id: Option<JobId>) {
        self.hub.selected_job_id().set(id);
    }

    pub fn set_show_reference(&self, show: bool) {
        self.hub.show_reference().set_if_changed(show);
    }

    // ==================== Queries ====================

    pub fn settings(&self) -> &ClientSettings {
        &self.settings
    }

    pub fn hub(&self) -> &Arc<EventHub> {
        &self.hub
    }

    pub fn scoreboard(&self) -> &Arc<PublicScoreboard> {
        &self.scoreboard
    }

    pub fn metrics(&self) -> MetricsSummary {
        self.metrics.summary()
    }
}
