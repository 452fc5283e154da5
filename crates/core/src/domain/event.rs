use serde::{Deserialize, Serialize};

use super::job::{Job, JobId, JobState, Span};
use super::types::{Analysis, Input, InputHash};

// ─── /events ─────────────────────────────────────────────────────

/// `/events` ストリームのメッセージ
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value")]
pub enum Event {
    Reset,
    CompilationStatus {
        status: Option<CompilationStatus>,
    },
    JobChanged {
        job: Job,
    },
    JobsChanged {
        jobs: Vec<JobId>,
    },
    GroupsConfig {
        config: GroupsConfig,
    },
    ProgramsConfig {
        programs: Vec<Program>,
    },
    GroupProgramJobAssigned {
        group: String,
        program: Program,
        job_id: JobId,
    },
}

impl Event {
    /// ログ用の短い名前
    pub fn name(&self) -> &'static str {
        match self {
            Self::Reset => "Reset",
            Self::CompilationStatus { .. } => "CompilationStatus",
            Self::JobChanged { .. } => "JobChanged",
            Self::JobsChanged { .. } => "JobsChanged",
            Self::GroupsConfig { .. } => "GroupsConfig",
            Self::ProgramsConfig { .. } => "ProgramsConfig",
            Self::GroupProgramJobAssigned { .. } => "GroupProgramJobAssigned",
        }
    }
}

/// バックエンドのコンパイル状態（全体で一つ）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompilationStatus {
    pub id: JobId,
    pub state: JobState,
    #[serde(default)]
    pub error_output: Option<Vec<Span>>,
}

impl CompilationStatus {
    /// 解析ジョブを投げてよい状態か
    pub fn is_ready(&self) -> bool {
        self.state == JobState::Succeeded
    }
}

/// グループ設定
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct GroupsConfig {
    pub groups: Vec<GroupConfig>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupConfig {
    pub name: String,
    #[serde(default)]
    pub git: Option<String>,
    #[serde(default)]
    pub path: Option<String>,
    #[serde(default)]
    pub run: Option<String>,
}

/// 採点用プログラム
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Program {
    pub hash: InputHash,
    pub hash_str: String,
    pub input: Input,
}

// ─── /checko-public ──────────────────────────────────────────────

/// `/checko-public` ストリームのメッセージ
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value")]
pub enum PublicEvent {
    Reset,
    StateChanged(PublicState),
}

/// スコアボード全体
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct PublicState {
    #[serde(default)]
    pub last_finished: Option<chrono::DateTime<chrono::FixedOffset>>,
    pub analysis: Vec<PublicAnalysis>,
    pub groups: Vec<PublicGroup>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PublicAnalysis {
    pub analysis: Analysis,
    pub programs: Vec<Option<Input>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PublicGroup {
    pub name: String,
    pub analysis_results: Vec<PublicAnalysisResults>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PublicAnalysisResults {
    pub analysis: Analysis,
    pub status: GroupStatus,
    #[serde(default)]
    pub last_hash: Option<String>,
    pub results: Vec<PublicProgramResult>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublicProgramResult {
    pub state: JobState,
}

/// グループの採点進行状況
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum GroupStatus {
    #[default]
    Initial,
    CheckingForUpdate,
    Compiling,
    Testing,
    CompilationError,
    Finished,
}

impl PublicGroup {
    /// 成功したプログラム数（解析ごとの合計）
    pub fn passed(&self) -> usize {
        self.analysis_results
            .iter()
            .flat_map(|r| r.results.iter())
            .filter(|r| r.state == JobState::Succeeded)
            .count()
    }
}
