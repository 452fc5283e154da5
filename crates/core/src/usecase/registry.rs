use std::collections::HashMap;

use parking_lot::Mutex;
use tokio::sync::watch;

use crate::domain::job::{Job, JobId};

/// サーバー側ジョブのローカルミラー。
///
/// ジョブごとに watch チャネルを持ち、`JobChanged` では同じチャネルに新しい
/// スナップショットを流す（購読中のハンドルはそのまま使い続けられる）。
/// `Reset` ですべてのチャネルが破棄され、古いハンドルは closed になる。
pub struct JobRegistry {
    inner: Mutex<Inner>,
    revision: watch::Sender<u64>,
}

#[derive(Default)]
struct Inner {
    ids: Vec<JobId>,
    jobs: HashMap<JobId, watch::Sender<Job>>,
}

impl JobRegistry {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            revision: watch::Sender::new(0),
        }
    }

    /// 全消去（何度呼んでも同じ結果）
    pub fn apply_reset(&self) {
        {
            let mut inner = self.inner.lock();
            inner.ids.clear();
            inner.jobs.clear();
        }
        self.bump();
    }

    /// スナップショットで丸ごと上書きする
    pub fn apply_job_changed(&self, job: Job) {
        {
            let mut inner = self.inner.lock();
            match inner.jobs.get(&job.id) {
                Some(tx) => {
                    {
                        let current = tx.borrow();
                        if !current.is_placeholder() && !current.state.can_advance_to(job.state) {
                            log::warn!(
                                "job {} moved backwards: {} -> {}",
                                job.id,
                                current.state.as_str(),
                                job.state.as_str()
                            );
                        }
                    }
                    tx.send_replace(job);
                }
                None => {
                    let id = job.id;
                    inner.jobs.insert(id, watch::Sender::new(job));
                }
            }
        }
        self.bump();
    }

    /// ID一覧を置き換え、未知のIDにはプレースホルダを置く
    pub fn apply_jobs_changed(&self, ids: Vec<JobId>) {
        {
            let mut inner = self.inner.lock();
            for id in &ids {
                inner
                    .jobs
                    .entry(*id)
                    .or_insert_with(|| watch::Sender::new(Job::placeholder(*id)));
            }
            inner.ids = ids;
        }
        self.bump();
    }

    // ===== 読み出し =====

    pub fn ids(&self) -> Vec<JobId> {
        self.inner.lock().ids.clone()
    }

    pub fn get(&self, id: JobId) -> Option<Job> {
        self.inner.lock().jobs.get(&id).map(|tx| tx.borrow().clone())
    }

    /// ジョブの購読ハンドル。同じIDなら `Reset` まで同じチャネルを返す。
    pub fn handle(&self, id: JobId) -> Option<watch::Receiver<Job>> {
        self.inner.lock().jobs.get(&id).map(|tx| tx.subscribe())
    }

    /// ID一覧順のスナップショット
    pub fn jobs(&self) -> Vec<Job> {
        let inner = self.inner.lock();
        inner
            .ids
            .iter()
            .filter_map(|id| inner.jobs.get(id).map(|tx| tx.borrow().clone()))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// いずれかの変更で通知されるリビジョン
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.revision.subscribe()
    }

    fn bump(&self) {
        self.revision.send_modify(|rev| *rev += 1);
    }
}

impl Default for JobRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::job::{JobKind, JobState};

    fn job(id: u64, state: JobState) -> Job {
        Job {
            id: JobId(id),
            state,
            kind: JobKind::Compilation,
            group_name: None,
            stdout: String::new(),
            spans: vec![],
            analysis_data: None,
        }
    }

    #[test]
    fn test_reset_is_idempotent() {
        let reg = JobRegistry::new();
        reg.apply_job_changed(job(1, JobState::Running));
        reg.apply_jobs_changed(vec![JobId(1), JobId(2)]);

        reg.apply_reset();
        assert!(reg.is_empty());
        assert!(reg.ids().is_empty());

        reg.apply_reset();
        assert!(reg.is_empty());
        assert!(reg.ids().is_empty());
    }

    #[test]
    fn test_placeholder_synthesis() {
        let reg = JobRegistry::new();
        reg.apply_job_changed(job(2, JobState::Running));
        reg.apply_jobs_changed(vec![JobId(1), JobId(2), JobId(3)]);

        for id in reg.ids() {
            assert!(reg.get(id).is_some());
        }
        let placeholder = reg.get(JobId(3)).unwrap();
        assert_eq!(placeholder.kind, JobKind::Waiting);
        assert_eq!(placeholder.state, JobState::Queued);
        assert!(placeholder.stdout.is_empty());
        assert!(placeholder.spans.is_empty());
        assert!(placeholder.analysis_data.is_none());

        // 既存エントリは置き換えない
        assert_eq!(reg.get(JobId(2)).unwrap().state, JobState::Running);
    }

    #[test]
    fn test_jobs_in_id_order() {
        let reg = JobRegistry::new();
        reg.apply_job_changed(job(5, JobState::Running));
        reg.apply_job_changed(job(4, JobState::Queued));
        reg.apply_jobs_changed(vec![JobId(5), JobId(4)]);

        let ids: Vec<JobId> = reg.jobs().iter().map(|j| j.id).collect();
        assert_eq!(ids, vec![JobId(5), JobId(4)]);
    }

    #[tokio::test]
    async fn test_handle_survives_job_changed() {
        let reg = JobRegistry::new();
        reg.apply_jobs_changed(vec![JobId(9)]);
        let mut handle = reg.handle(JobId(9)).unwrap();

        reg.apply_job_changed(job(9, JobState::Running));
        handle.changed().await.unwrap();
        assert_eq!(handle.borrow_and_update().state, JobState::Running);

        reg.apply_job_changed(job(9, JobState::Succeeded));
        handle.changed().await.unwrap();
        assert_eq!(handle.borrow_and_update().state, JobState::Succeeded);
    }

    #[tokio::test]
    async fn test_reset_closes_handles() {
        let reg = JobRegistry::new();
        reg.apply_job_changed(job(1, JobState::Running));
        let mut handle = reg.handle(JobId(1)).unwrap();

        reg.apply_reset();
        assert!(handle.changed().await.is_err());
        assert!(reg.handle(JobId(1)).is_none());
    }

    #[test]
    fn test_backwards_snapshot_still_overwrites() {
        let reg = JobRegistry::new();
        reg.apply_job_changed(job(1, JobState::Succeeded));
        reg.apply_job_changed(job(1, JobState::Running));
        assert_eq!(reg.get(JobId(1)).unwrap().state, JobState::Running);
    }

    #[test]
    fn test_revision_bumps() {
        let reg = JobRegistry::new();
        let rx = reg.subscribe();
        reg.apply_jobs_changed(vec![JobId(1)]);
        assert!(rx.has_changed().unwrap());
        assert_eq!(*rx.borrow(), 1);
    }
}
