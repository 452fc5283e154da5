use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use serde::de::DeserializeOwned;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::hub::EventHub;
use super::scoreboard::PublicScoreboard;
use crate::domain::event::{Event, PublicEvent};
use crate::domain::settings::ClientSettings;
use crate::infra::api::sse::{parse_frame, SseDecoder};
use crate::infra::api::{ApiError, PushSource};

pub const EVENTS_PATH: &str = "/events";
pub const PUBLIC_PATH: &str = "/checko-public";

/// 受信ループから呼び出し側へ渡すもの
#[derive(Debug)]
pub enum StreamSignal<T> {
    Message(T),
    /// JSON として読めなかったフレーム（ストリームは継続する）
    Malformed(String),
    /// ストリームが切れた。この後は再接続待ちに入る。
    Error(ApiError),
}

/// 上限付き指数バックオフ
#[derive(Debug, Clone)]
pub struct Backoff {
    initial: Duration,
    max: Duration,
    current: Duration,
}

impl Backoff {
    pub fn new(initial: Duration, max: Duration) -> Self {
        let max = max.max(initial);
        Self {
            initial,
            max,
            current: initial,
        }
    }

    pub fn from_settings(settings: &ClientSettings) -> Self {
        Self::new(settings.reconnect_initial(), settings.reconnect_max())
    }

    /// 次の待ち時間を返し、その次の値を倍にする
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.current;
        self.current = (self.current * 2).min(self.max);
        delay
    }

    pub fn reset(&mut self) {
        self.current = self.initial;
    }
}

/// `path` を購読し続ける。切断したらバックオフして再接続し、`shutdown` で終了する。
pub async fn listen<T, F>(
    source: Arc<dyn PushSource>,
    path: &str,
    mut backoff: Backoff,
    shutdown: CancellationToken,
    mut handler: F,
) where
    T: DeserializeOwned,
    F: FnMut(StreamSignal<T>),
{
    loop {
        let err = tokio::select! {
            biased;
            _ = shutdown.cancelled() => break,
            err = read_stream(source.as_ref(), path, &mut backoff, &mut handler) => err,
        };
        handler(StreamSignal::Error(err));

        let delay = backoff.next_delay();
        log::info!("{path}: reconnecting in {}ms", delay.as_millis());
        tokio::select! {
            biased;
            _ = shutdown.cancelled() => break,
            _ = tokio::time::sleep(delay) => {}
        }
    }
    log::debug!("{path}: listener stopped");
}

/// ストリームが終わるまで読み、終わった理由を返す
async fn read_stream<T, F>(
    source: &dyn PushSource,
    path: &str,
    backoff: &mut Backoff,
    handler: &mut F,
) -> ApiError
where
    T: DeserializeOwned,
    F: FnMut(StreamSignal<T>),
{
    let mut stream = match source.open(path).await {
        Ok(stream) => stream,
        Err(e) => return e,
    };
    let mut decoder = SseDecoder::new();

    while let Some(chunk) = stream.next().await {
        let chunk = match chunk {
            Ok(chunk) => chunk,
            Err(e) => return e,
        };
        for frame in decoder.feed(&chunk) {
            match parse_frame::<T>(&frame) {
                Ok(message) => {
                    backoff.reset();
                    handler(StreamSignal::Message(message));
                }
                Err(e) => {
                    log::warn!("{path}: skipping malformed frame: {e}");
                    handler(StreamSignal::Malformed(frame));
                }
            }
        }
    }

    ApiError::Transport(format!("{path}: stream ended"))
}

/// 二本のプッシュチャネル（`/events` と `/checko-public`）を張る
pub struct ConnectionManager {
    source: Arc<dyn PushSource>,
    backoff: Backoff,
    shutdown: CancellationToken,
}

impl ConnectionManager {
    pub fn new(source: Arc<dyn PushSource>, backoff: Backoff, shutdown: CancellationToken) -> Self {
        Self {
            source,
            backoff,
            shutdown,
        }
    }

    pub fn spawn_events(&self, hub: Arc<EventHub>) -> JoinHandle<()> {
        let source = self.source.clone();
        let backoff = self.backoff.clone();
        let shutdown = self.shutdown.clone();
        tokio::spawn(async move {
            listen::<Event, _>(source, EVENTS_PATH, backoff, shutdown, |signal| {
                hub.handle_signal(signal)
            })
            .await;
        })
    }

    /// スコアボードは接続状態を持たないので、切断はログに残すだけ
    pub fn spawn_scoreboard(&self, scoreboard: Arc<PublicScoreboard>) -> JoinHandle<()> {
        let source = self.source.clone();
        let backoff = self.backoff.clone();
        let shutdown = self.shutdown.clone();
        tokio::spawn(async move {
            listen::<PublicEvent, _>(source, PUBLIC_PATH, backoff, shutdown, |signal| {
                match signal {
                    StreamSignal::Message(event) => scoreboard.apply(event),
                    StreamSignal::Malformed(_) => {}
                    StreamSignal::Error(e) => log::debug!("{PUBLIC_PATH}: {e}"),
                }
            })
            .await;
        })
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;

    use async_trait::async_trait;
    use parking_lot::Mutex;
    use tokio::time::Instant;

    use super::*;
    use crate::infra::api::ChunkStream;

    /// open のたびに用意したチャンク列を一つずつ返す。尽きたら接続失敗。
    struct ScriptedSource {
        scripts: Mutex<VecDeque<Vec<&'static str>>>,
        opened_at: Mutex<Vec<Instant>>,
    }

    impl ScriptedSource {
        fn new(scripts: Vec<Vec<&'static str>>) -> Arc<Self> {
            Arc::new(Self {
                scripts: Mutex::new(scripts.into()),
                opened_at: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl PushSource for ScriptedSource {
        async fn open(&self, _path: &str) -> Result<ChunkStream, ApiError> {
            self.opened_at.lock().push(Instant::now());
            match self.scripts.lock().pop_front() {
                Some(chunks) => Ok(futures_util::stream::iter(
                    chunks
                        .into_iter()
                        .map(|c| Ok(c.as_bytes().to_vec()))
                        .collect::<Vec<_>>(),
                )
                .boxed()),
                None => Err(ApiError::Transport("connection refused".to_string())),
            }
        }
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let mut backoff = Backoff::new(Duration::from_millis(500), Duration::from_secs(30));
        let delays: Vec<u128> = (0..9).map(|_| backoff.next_delay().as_millis()).collect();
        assert_eq!(
            delays,
            vec![500, 1000, 2000, 4000, 8000, 16000, 30000, 30000, 30000]
        );
        backoff.reset();
        assert_eq!(backoff.next_delay(), Duration::from_millis(500));
    }

    #[tokio::test(start_paused = true)]
    async fn test_malformed_frame_does_not_disconnect() {
        let source = ScriptedSource::new(vec![vec![
            "data: {\"type\":\"Reset\"}\n\n",
            "data: {not json}\n\n",
            "data: {\"type\":\"JobsChanged\",\"value\":{\"jobs\":[1]}}\n\n",
        ]]);
        let signals: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
        let shutdown = CancellationToken::new();

        let sink = signals.clone();
        let task = tokio::spawn(listen::<Event, _>(
            source,
            EVENTS_PATH,
            Backoff::new(Duration::from_millis(500), Duration::from_secs(30)),
            shutdown.clone(),
            move |signal| {
                let label = match signal {
                    StreamSignal::Message(e) => e.name().to_string(),
                    StreamSignal::Malformed(_) => "malformed".to_string(),
                    StreamSignal::Error(_) => "error".to_string(),
                };
                sink.lock().push(label);
            },
        ));

        tokio::time::sleep(Duration::from_millis(100)).await;
        shutdown.cancel();
        task.await.unwrap();

        // 不正フレームの後も同じストリームから読み続け、切断は終端の一回だけ
        assert_eq!(
            *signals.lock(),
            vec!["Reset", "malformed", "JobsChanged", "error"]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconnect_schedule() {
        let source = ScriptedSource::new(vec![]);
        let shutdown = CancellationToken::new();
        let start = Instant::now();

        let task = tokio::spawn(listen::<Event, _>(
            source.clone(),
            EVENTS_PATH,
            Backoff::new(Duration::from_millis(100), Duration::from_millis(400)),
            shutdown.clone(),
            |_| {},
        ));

        tokio::time::sleep(Duration::from_millis(1600)).await;
        shutdown.cancel();
        task.await.unwrap();

        let opened: Vec<u128> = source
            .opened_at
            .lock()
            .iter()
            .map(|t| t.duration_since(start).as_millis())
            .collect();
        assert_eq!(&opened[..6], &[0, 100, 300, 700, 1100, 1500]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_parsed_message_resets_backoff() {
        let source = ScriptedSource::new(vec![
            vec![],
            vec![],
            vec!["data: {\"type\":\"Reset\"}\n\n"],
        ]);
        let shutdown = CancellationToken::new();
        let start = Instant::now();

        let task = tokio::spawn(listen::<Event, _>(
            source.clone(),
            EVENTS_PATH,
            Backoff::new(Duration::from_millis(100), Duration::from_secs(10)),
            shutdown.clone(),
            |_| {},
        ));

        tokio::time::sleep(Duration::from_millis(500)).await;
        shutdown.cancel();
        task.await.unwrap();

        let opened: Vec<u128> = source
            .opened_at
            .lock()
            .iter()
            .map(|t| t.duration_since(start).as_millis())
            .collect();
        // 100, 200 と伸びた後、メッセージ受信で 100 に戻る
        assert_eq!(&opened[..4], &[0, 100, 300, 400]);
    }
}
