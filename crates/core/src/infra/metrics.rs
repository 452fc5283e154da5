use std::collections::{BTreeMap, VecDeque};

use parking_lot::Mutex;
use serde::Serialize;

use crate::domain::types::Analysis;

/// 保持するレイテンシ記録の上限
const MAX_LATENCY_RECORDS: usize = 1000;

/// ローカルメトリクス収集器
pub struct Metrics {
    counters: Mutex<MetricsCounters>,
    latencies: Mutex<VecDeque<LatencySample>>,
}

#[derive(Debug, Default)]
struct MetricsCounters {
    events_received: u64,
    malformed_frames: u64,
    disconnects: u64,
    submissions: u64,
    submissions_rejected: u64,
    cancellations_sent: u64,
    stale_discarded: u64,
    results_published: u64,
    failures_published: u64,
}

/// 計測区間
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    /// 投入から `/analysis` 応答まで
    Submit,
    /// 投入からジョブ終端まで
    Job,
    Reference,
}

#[derive(Debug, Clone, Copy)]
struct LatencySample {
    analysis: Analysis,
    stage: Stage,
    duration_ms: u64,
}

/// メトリクスサマリー（シェルに返す用）
#[derive(Debug, Clone, Serialize)]
pub struct MetricsSummary {
    pub events_received: u64,
    pub malformed_frames: u64,
    pub disconnects: u64,
    pub submissions: u64,
    pub submissions_rejected: u64,
    pub cancellations_sent: u64,
    pub stale_discarded: u64,
    pub results_published: u64,
    pub failures_published: u64,
    /// 記録のある解析種別だけ、種別順
    pub latency: Vec<AnalysisLatency>,
}

/// 解析種別ごとの平均レイテンシ（ms）
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnalysisLatency {
    pub analysis: Analysis,
    pub samples: usize,
    pub submit_ms: Option<f64>,
    pub job_ms: Option<f64>,
    pub reference_ms: Option<f64>,
}

#[derive(Default)]
struct Mean {
    total: u64,
    count: u64,
}

impl Mean {
    fn get(&self) -> Option<f64> {
        (self.count > 0).then(|| self.total as f64 / self.count as f64)
    }
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            counters: Mutex::new(MetricsCounters::default()),
            latencies: Mutex::new(VecDeque::with_capacity(MAX_LATENCY_RECORDS)),
        }
    }

    pub fn inc_events_received(&self) {
        self.counters.lock().events_received += 1;
    }

    pub fn inc_malformed_frames(&self) {
        self.counters.lock().malformed_frames += 1;
    }

    pub fn inc_disconnects(&self) {
        self.counters.lock().disconnects += 1;
    }

    pub fn inc_submissions(&self) {
        self.counters.lock().submissions += 1;
    }

    pub fn inc_submissions_rejected(&self) {
        self.counters.lock().submissions_rejected += 1;
    }

    pub fn inc_cancellations_sent(&self) {
        self.counters.lock().cancellations_sent += 1;
    }

    pub fn inc_stale_discarded(&self) {
        self.counters.lock().stale_discarded += 1;
    }

    pub fn inc_results_published(&self) {
        self.counters.lock().results_published += 1;
    }

    pub fn inc_failures_published(&self) {
        self.counters.lock().failures_published += 1;
    }

    pub fn record_latency(&self, analysis: Analysis, stage: Stage, duration_ms: u64) {
        let mut latencies = self.latencies.lock();
        if latencies.len() == MAX_LATENCY_RECORDS {
            latencies.pop_front();
        }
        latencies.push_back(LatencySample {
            analysis,
            stage,
            duration_ms,
        });
    }

    pub fn summary(&self) -> MetricsSummary {
        let c = self.counters.lock();

        let mut by_analysis: BTreeMap<Analysis, (usize, [Mean; 3])> = BTreeMap::new();
        for sample in self.latencies.lock().iter() {
            let (samples, means) = by_analysis.entry(sample.analysis).or_default();
            *samples += 1;
            let mean = &mut means[sample.stage as usize];
            mean.total += sample.duration_ms;
            mean.count += 1;
        }
        let latency = by_analysis
            .into_iter()
            .map(|(analysis, (samples, [submit, job, reference]))| AnalysisLatency {
                analysis,
                samples,
                submit_ms: submit.get(),
                job_ms: job.get(),
                reference_ms: reference.get(),
            })
            .collect();

        MetricsSummary {
            events_received: c.events_received,
            malformed_frames: c.malformed_frames,
            disconnects: c.disconnects,
            submissions: c.submissions,
            submissions_rejected: c.submissions_rejected,
            cancellations_sent: c.cancellations_sent,
            stale_discarded: c.stale_discarded,
            results_published: c.results_published,
            failures_published: c.failures_published,
            latency,
        }
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}
