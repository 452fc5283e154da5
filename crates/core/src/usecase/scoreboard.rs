use chrono::{DateTime, FixedOffset};
use serde::Serialize;

use super::store::Store;
use crate::domain::event::{PublicAnalysis, PublicEvent, PublicGroup};

/// 公開スコアボードの表示用スナップショット
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct ScoreboardView {
    pub analysis: Vec<PublicAnalysis>,
    pub groups: Vec<PublicGroup>,
    pub last_finished: Option<DateTime<FixedOffset>>,
}

impl ScoreboardView {
    /// 成功数の多い順（同数は名前順）
    pub fn ranking(&self) -> Vec<(&str, usize)> {
        let mut ranking: Vec<(&str, usize)> = self
            .groups
            .iter()
            .map(|g| (g.name.as_str(), g.passed()))
            .collect();
        ranking.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(b.0)));
        ranking
    }
}

/// `/checko-public` の読み取り専用ミラー
#[derive(Default)]
pub struct PublicScoreboard {
    view: Store<ScoreboardView>,
}

impl PublicScoreboard {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn apply(&self, event: PublicEvent) {
        match event {
            PublicEvent::Reset => self.view.set(ScoreboardView::default()),
            PublicEvent::StateChanged(state) => {
                log::debug!(
                    "scoreboard: {} groups, {} analyses",
                    state.groups.len(),
                    state.analysis.len()
                );
                self.view.update(|view| {
                    view.analysis = state.analysis;
                    view.groups = state.groups;
                    // 終了時刻はメッセージに含まれるときだけ更新する
                    if let Some(last_finished) = state.last_finished {
                        view.last_finished = Some(last_finished);
                    }
                    true
                });
            }
        }
    }

    pub fn view(&self) -> &Store<ScoreboardView> {
        &self.view
    }
}
