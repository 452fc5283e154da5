mod commands;
mod events;

use std::collections::HashSet;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing_subscriber::EnvFilter;

use insp_core::domain::settings::ClientSettings;
use insp_core::domain::types::Analysis;
use insp_core::usecase::app_service::AppService;
use insp_core::usecase::io::AnalysisDriver;

use crate::events::{
    emit_event, CompilationStatusPayload, ConnectionChangedPayload, JobSummary,
    JobsChangedPayload, RankingEntry, ResultsChangedPayload, ScoreboardChangedPayload,
    COMMAND_RESULT, COMPILATION_STATUS, CONNECTION_CHANGED, ERROR, JOBS_CHANGED,
    RESULTS_CHANGED, SCOREBOARD_CHANGED,
};

/// 起動時に入力を生成して解析する種別
const ENV_ANALYSIS: &str = "INSPECTIFY_ANALYSIS";

/// サービスと、シェル側で張った購読タスク
pub(crate) struct Shell {
    pub(crate) service: AppService,
    watched: Mutex<HashSet<Analysis>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl Shell {
    fn new(service: AppService) -> Self {
        Self {
            service,
            watched: Mutex::new(HashSet::new()),
            tasks: Mutex::new(Vec::new()),
        }
    }

    /// ドライバを取得し、初回なら結果の出力を始める
    pub(crate) fn driver(&self, analysis: Analysis) -> Arc<AnalysisDriver> {
        let driver = self.service.io(analysis, None);
        if self.watched.lock().insert(analysis) {
            self.tasks.lock().push(watch_results(driver.clone()));
        }
        driver
    }

    fn track(&self, task: JoinHandle<()>) {
        self.tasks.lock().push(task);
    }

    async fn shutdown(&self) {
        for task in self.tasks.lock().drain(..) {
            task.abort();
        }
        self.service.shutdown().await;
    }
}

pub fn run() {
    init_logging();

    let settings = match ClientSettings::from_env() {
        Ok(settings) => settings,
        Err(e) => {
            log::error!("設定の読み込みに失敗しました: {e}");
            std::process::exit(2);
        }
    };

    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            log::error!("ランタイムの起動に失敗しました: {e}");
            std::process::exit(1);
        }
    };

    runtime.block_on(serve(settings));
}

/// `RUST_LOG` で絞り込み（既定は info）。log クレートの出力も拾う。
fn init_logging() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();
}

async fn serve(settings: ClientSettings) {
    let service = match AppService::connect(settings) {
        Ok(service) => service,
        Err(e) => {
            log::error!("バックエンドに接続できません: {e}");
            return;
        }
    };
    let shell = Arc::new(Shell::new(service));
    shell.service.start();
    spawn_status_watchers(&shell);

    if let Ok(name) = std::env::var(ENV_ANALYSIS) {
        match name.parse::<Analysis>() {
            Ok(analysis) => {
                let driver = shell.driver(analysis);
                if let Err(e) = driver.generate(None).await {
                    log::warn!("{analysis}: 入力の生成に失敗しました: {e}");
                }
            }
            Err(e) => log::warn!("{ENV_ANALYSIS}: {e}"),
        }
    }

    let reader = tokio::spawn(read_commands(shell.clone()));

    if let Err(e) = tokio::signal::ctrl_c().await {
        log::error!("シグナル待ちに失敗しました: {e}");
    }
    reader.abort();
    shell.shutdown().await;
}

/// stdin の JSON コマンドを処理する。EOF で終わる。
async fn read_commands(shell: Arc<Shell>) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => {
                log::debug!("stdin closed");
                break;
            }
            Err(e) => {
                log::warn!("stdin read failed: {e}");
                break;
            }
        };
        if line.trim().is_empty() {
            continue;
        }

        let result = match commands::parse(&line) {
            Ok(command) => commands::execute(&shell, command).await,
            Err(e) => Err(e),
        };
        match result {
            Ok(value) => emit_event(COMMAND_RESULT, value),
            Err(e) => emit_event(ERROR, e.payload()),
        }
    }
}

/// 値が変わるたびに `emit` を呼ぶ（購読直後に現在値でも一回呼ぶ）
fn forward<T, F>(mut rx: watch::Receiver<T>, mut emit: F) -> JoinHandle<()>
where
    T: Send + Sync + 'static,
    F: FnMut(&T) + Send + 'static,
{
    tokio::spawn(async move {
        loop {
            {
                let value = rx.borrow_and_update();
                emit(&*value);
            }
            if rx.changed().await.is_err() {
                break;
            }
        }
    })
}

fn spawn_status_watchers(shell: &Shell) {
    let hub = shell.service.hub().clone();

    shell.track(forward(hub.connection().subscribe(), |state| {
        emit_event(
            CONNECTION_CHANGED,
            ConnectionChangedPayload { state: *state },
        )
    }));

    shell.track(forward(hub.compilation_status().subscribe(), |status| {
        emit_event(
            COMPILATION_STATUS,
            CompilationStatusPayload {
                status: status.clone(),
                ready: status.as_ref().is_some_and(|s| s.is_ready()),
            },
        )
    }));

    let registry_hub = hub.clone();
    shell.track(forward(hub.registry().subscribe(), move |_| {
        let jobs = registry_hub
            .registry()
            .jobs()
            .iter()
            .map(JobSummary::from)
            .collect();
        emit_event(JOBS_CHANGED, JobsChangedPayload { jobs })
    }));

    shell.track(forward(
        shell.service.scoreboard().view().subscribe(),
        |view| {
            emit_event(
                SCOREBOARD_CHANGED,
                ScoreboardChangedPayload {
                    ranking: view
                        .ranking()
                        .into_iter()
                        .map(|(group, passed)| RankingEntry {
                            group: group.to_string(),
                            passed,
                        })
                        .collect(),
                    last_finished: view.last_finished.map(|t| t.to_rfc3339()),
                },
            )
        },
    ));
}

fn watch_results(driver: Arc<AnalysisDriver>) -> JoinHandle<()> {
    let analysis = driver.analysis();
    let phase_driver = driver.clone();
    forward(driver.results().subscribe(), move |results| {
        emit_event(
            RESULTS_CHANGED,
            ResultsChangedPayload::new(analysis, phase_driver.phase().get(), results),
        )
    })
}
