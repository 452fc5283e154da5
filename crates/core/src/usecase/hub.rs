use std::collections::HashMap;
use std::sync::Arc;

use serde::Serialize;

use super::connection::StreamSignal;
use super::registry::JobRegistry;
use super::store::Store;
use crate::domain::event::{CompilationStatus, Event, GroupsConfig, Program};
use crate::domain::job::JobId;
use crate::infra::metrics::Metrics;

/// プッシュチャネルの接続状態
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    Connected,
    #[default]
    Disconnected,
}

/// グループ → プログラムのハッシュ文字列 → ジョブID
pub type Assignments = HashMap<String, HashMap<String, JobId>>;

/// `/events` のメッセージを各ミラーへ振り分ける
pub struct EventHub {
    registry: JobRegistry,
    compilation_status: Store<Option<CompilationStatus>>,
    groups_config: Store<Option<GroupsConfig>>,
    programs: Store<Vec<Program>>,
    assignments: Store<Assignments>,
    connection: Store<ConnectionState>,
    selected_job_id: Store<Option<JobId>>,
    show_reference: Store<bool>,
    metrics: Arc<Metrics>,
}

impl EventHub {
    pub fn new(metrics: Arc<Metrics>) -> Self {
        Self {
            registry: JobRegistry::new(),
            compilation_status: Store::default(),
            groups_config: Store::default(),
            programs: Store::default(),
            assignments: Store::default(),
            connection: Store::default(),
            selected_job_id: Store::default(),
            show_reference: Store::default(),
            metrics,
        }
    }

    /// 接続ループからのシグナルを処理する
    pub fn handle_signal(&self, signal: StreamSignal<Event>) {
        match signal {
            StreamSignal::Message(event) => {
                self.connection.set_if_changed(ConnectionState::Connected);
                self.dispatch(event);
            }
            StreamSignal::Malformed(_) => self.metrics.inc_malformed_frames(),
            StreamSignal::Error(e) => {
                log::warn!("/events disconnected: {e}");
                self.metrics.inc_disconnects();
                self.connection.set_if_changed(ConnectionState::Disconnected);
            }
        }
    }

    pub fn dispatch(&self, event: Event) {
        self.metrics.inc_events_received();
        log::debug!("event: {}", event.name());

        match event {
            Event::Reset => {
                self.registry.apply_reset();
                self.compilation_status.set_if_changed(None);
                self.groups_config.set_if_changed(None);
                self.programs.set_if_changed(Vec::new());
                self.assignments.set_if_changed(Assignments::new());
            }
            Event::CompilationStatus { status } => {
                if let Some(s) = &status {
                    log::info!("compilation {}: {}", s.id, s.state.as_str());
                }
                self.compilation_status.set_if_changed(status);
            }
            Event::JobChanged { job } => self.registry.apply_job_changed(job),
            Event::JobsChanged { jobs } => self.registry.apply_jobs_changed(jobs),
            Event::GroupsConfig { config } => self.groups_config.set(Some(config)),
            Event::ProgramsConfig { programs } => self.programs.set(programs),
            Event::GroupProgramJobAssigned {
                group,
                program,
                job_id,
            } => {
                self.assignments.update(|assignments| {
                    assignments
                        .entry(group)
                        .or_default()
                        .insert(program.hash_str, job_id)
                        != Some(job_id)
                });
            }
        }
    }

    // ===== 読み出し =====

    pub fn registry(&self) -> &JobRegistry {
        &self.registry
    }

    pub fn compilation_status(&self) -> &Store<Option<CompilationStatus>> {
        &self.compilation_status
    }

    pub fn groups_config(&self) -> &Store<Option<GroupsConfig>> {
        &self.groups_config
    }

    pub fn programs(&self) -> &Store<Vec<Program>> {
        &self.programs
    }

    pub fn assignments(&self) -> &Store<Assignments> {
        &self.assignments
    }

    pub fn connection(&self) -> &Store<ConnectionState> {
        &self.connection
    }

    /// 直近に投入した解析ジョブ（画面で選択中のジョブ）
    pub fn selected_job_id(&self) -> &Store<Option<JobId>> {
        &self.selected_job_id
    }

    /// 参照出力表示中は解析ジョブを投げない
    pub fn show_reference(&self) -> &Store<bool> {
        &self.show_reference
    }

    /// コンパイル済みか
    pub fn is_compiled(&self) -> bool {
        self.compilation_status
            .get()
            .is_some_and(|s| s.is_ready())
    }
}
