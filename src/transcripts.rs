//! Per-video transcript retrieval with escalating attempts

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::config::TranscriptConfig;
use crate::error::Result;
use crate::reconcile::VideoReference;

/// Per-attempt settings handed to the fetcher
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FetchOptions {
    /// Render in a visible browser window instead of a hidden one
    pub visible: bool,
    pub timeout: Duration,
}

/// What a fetcher reports for one attempt
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TranscriptResponse {
    pub success: bool,
    pub text: Option<String>,
    pub error: Option<String>,
}

/// Browser-automation side of transcript retrieval
#[async_trait]
pub trait TranscriptFetcher: Send + Sync {
    async fn retrieve_transcript(
        &self,
        video_url: &str,
        video_id: &str,
        options: FetchOptions,
    ) -> Result<TranscriptResponse>;
}

/// Final outcome for one video
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranscriptResult {
    pub video_id: String,
    pub url: String,
    pub success: bool,
    pub text: Option<String>,
    pub error: Option<String>,
    pub attempts: u32,
}

enum AttemptOutcome {
    Transcript(String),
    /// Nothing to retrieve; retrying will not help
    Unavailable(String),
    Failed(String),
}

/// Retries each video independently, one video at a time
pub struct TranscriptRetriever {
    config: TranscriptConfig,
    fetcher: Arc<dyn TranscriptFetcher>,
}

impl TranscriptRetriever {
    pub fn new(config: TranscriptConfig, fetcher: Arc<dyn TranscriptFetcher>) -> Self {
        Self { config, fetcher }
    }

    /// Retrieve transcripts for every video with a canonical id, sequentially
    pub async fn retrieve_all(&self, videos: &[VideoReference]) -> Vec<TranscriptResult> {
        let candidates: Vec<(&str, &VideoReference)> = videos
            .iter()
            .filter_map(|video| video.canonical_id.as_deref().map(|id| (id, video)))
            .collect();

        if candidates.is_empty() {
            return Vec::new();
        }

        info!("📝 Retrieving transcripts for {} videos", candidates.len());
        let mut results = Vec::with_capacity(candidates.len());

        for (index, (video_id, video)) in candidates.iter().enumerate() {
            if index > 0 {
                tokio::time::sleep(self.config.inter_video_delay()).await;
            }
            results.push(self.retrieve(video_id, &video.url).await);
        }

        let found = results.iter().filter(|result| result.success).count();
        info!("📝 {}/{} transcripts retrieved", found, results.len());
        results
    }

    /// Up to `max_attempts` tries with growing timeout, visible browser on later tries
    pub async fn retrieve(&self, video_id: &str, url: &str) -> TranscriptResult {
        let max_attempts = self.config.max_attempts.max(1);
        let mut last_error = String::from("no attempt made");

        for attempt in 0..max_attempts {
            let options = FetchOptions {
                visible: self.config.visible_for_attempt(attempt),
                timeout: self.config.timeout_for_attempt(attempt),
            };

            match self.attempt(video_id, url, options).await {
                AttemptOutcome::Transcript(text) => {
                    info!("✅ Transcript for {}: {} chars", video_id, text.len());
                    return TranscriptResult {
                        video_id: video_id.to_string(),
                        url: url.to_string(),
                        success: true,
                        text: Some(text),
                        error: None,
                        attempts: attempt + 1,
                    };
                }
                AttemptOutcome::Unavailable(reason) => {
                    debug!("No transcript available for {}: {}", video_id, reason);
                    return TranscriptResult {
                        video_id: video_id.to_string(),
                        url: url.to_string(),
                        success: false,
                        text: None,
                        error: Some(reason),
                        attempts: attempt + 1,
                    };
                }
                AttemptOutcome::Failed(error) => last_error = error,
            }

            if attempt + 1 < max_attempts {
                let backoff = self.config.backoff_for_attempt(attempt);
                debug!(
                    "Retry {}/{} for {} in {:?} (visible={})",
                    attempt + 1,
                    max_attempts,
                    video_id,
                    backoff,
                    options.visible
                );
                tokio::time::sleep(backoff).await;
            }
        }

        warn!("❌ Transcript for {} failed after {} attempts: {}", video_id, max_attempts, last_error);
        TranscriptResult {
            video_id: video_id.to_string(),
            url: url.to_string(),
            success: false,
            text: None,
            error: Some(format!("{} (after {} attempts)", last_error, max_attempts)),
            attempts: max_attempts,
        }
    }

    async fn attempt(&self, video_id: &str, url: &str, options: FetchOptions) -> AttemptOutcome {
        let call = self.fetcher.retrieve_transcript(url, video_id, options);

        let response = match tokio::time::timeout(options.timeout, call).await {
            Ok(Ok(response)) => response,
            Ok(Err(e)) => return AttemptOutcome::Failed(e.to_string()),
            Err(_) => return AttemptOutcome::Failed(format!("timed out after {:?}", options.timeout)),
        };

        if response.success {
            return match response.text {
                Some(text) if text.trim().chars().count() > self.config.min_length => {
                    AttemptOutcome::Transcript(text)
                }
                _ => AttemptOutcome::Unavailable("no transcript available".to_string()),
            };
        }

        let error = response.error.unwrap_or_else(|| "transcript retrieval failed".to_string());
        if error.to_lowercase().contains("no transcript") {
            AttemptOutcome::Unavailable(error)
        } else {
            AttemptOutcome::Failed(error)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::HarvestError;
    use crate::reconcile::{DiscoverySource, VideoContext};
    use std::collections::VecDeque;
    use tokio::sync::Mutex;
    use tokio::time::Instant;

    /// Replays scripted responses and records the options of every call
    struct ScriptedFetcher {
        script: Mutex<VecDeque<Result<TranscriptResponse>>>,
        calls: Mutex<Vec<(String, FetchOptions, Instant)>>,
        hang: bool,
    }

    impl ScriptedFetcher {
        fn new(script: Vec<Result<TranscriptResponse>>) -> Arc<Self> {
            Arc::new(Self {
                script: Mutex::new(script.into()),
                calls: Mutex::new(Vec::new()),
                hang: false,
            })
        }
    }

    #[async_trait]
    impl TranscriptFetcher for ScriptedFetcher {
        async fn retrieve_transcript(
            &self,
            _video_url: &str,
            video_id: &str,
            options: FetchOptions,
        ) -> Result<TranscriptResponse> {
            self.calls.lock().await.push((video_id.to_string(), options, Instant::now()));
            if self.hang {
                std::future::pending::<()>().await;
            }
            self.script
                .lock()
                .await
                .pop_front()
                .unwrap_or_else(|| Ok(TranscriptResponse::default()))
        }
    }

    fn long_text() -> String {
        "word ".repeat(20)
    }

    fn ok(text: &str) -> Result<TranscriptResponse> {
        Ok(TranscriptResponse {
            success: true,
            text: Some(text.to_string()),
            error: None,
        })
    }

    fn failed(error: &str) -> Result<TranscriptResponse> {
        Ok(TranscriptResponse {
            success: false,
            text: None,
            error: Some(error.to_string()),
        })
    }

    fn video(id: Option<&str>, url: &str) -> VideoReference {
        VideoReference {
            canonical_id: id.map(str::to_string),
            url: url.to_string(),
            discovery_source: DiscoverySource::AnnotationContent,
            context: VideoContext::default(),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_escalates_until_success() {
        let fetcher = ScriptedFetcher::new(vec![
            failed("player did not load"),
            Err(HarvestError::Network("browser crashed".to_string())),
            failed("captions button missing"),
            ok(&long_text()),
        ]);
        let retriever = TranscriptRetriever::new(TranscriptConfig::default(), fetcher.clone());

        let result = retriever.retrieve("AAAAAAAAAAA", "https://youtu.be/AAAAAAAAAAA").await;
        assert!(result.success);
        assert_eq!(result.attempts, 4);

        let calls = fetcher.calls.lock().await;
        let visible: Vec<bool> = calls.iter().map(|(_, options, _)| options.visible).collect();
        assert_eq!(visible, vec![false, false, false, true]);
        assert_eq!(calls[0].1.timeout, Duration::from_secs(60));
        assert_eq!(calls[3].1.timeout, Duration::from_secs(90));

        let gaps: Vec<Duration> = calls.windows(2).map(|pair| pair[1].2 - pair[0].2).collect();
        assert_eq!(
            gaps,
            vec![Duration::from_secs(1), Duration::from_secs(2), Duration::from_secs(4)]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_short_transcript_is_terminal() {
        let fetcher = ScriptedFetcher::new(vec![ok("too short"), ok(&long_text())]);
        let retriever = TranscriptRetriever::new(TranscriptConfig::default(), fetcher.clone());

        let result = retriever.retrieve("AAAAAAAAAAA", "https://youtu.be/AAAAAAAAAAA").await;
        assert!(!result.success);
        assert_eq!(result.attempts, 1);
        assert_eq!(fetcher.calls.lock().await.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_transcript_error_is_terminal() {
        let fetcher = ScriptedFetcher::new(vec![failed("No transcript available for this video")]);
        let retriever = TranscriptRetriever::new(TranscriptConfig::default(), fetcher.clone());

        let result = retriever.retrieve("AAAAAAAAAAA", "https://youtu.be/AAAAAAAAAAA").await;
        assert!(!result.success);
        assert_eq!(fetcher.calls.lock().await.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_gives_up_after_max_attempts_on_timeouts() {
        let fetcher = Arc::new(ScriptedFetcher {
            script: Mutex::new(VecDeque::new()),
            calls: Mutex::new(Vec::new()),
            hang: true,
        });
        let retriever = TranscriptRetriever::new(TranscriptConfig::default(), fetcher.clone());

        let result = retriever.retrieve("AAAAAAAAAAA", "https://youtu.be/AAAAAAAAAAA").await;
        assert!(!result.success);
        assert_eq!(result.attempts, 5);
        assert!(result.error.unwrap().contains("timed out"));
        assert_eq!(fetcher.calls.lock().await.len(), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn test_videos_run_sequentially_with_delay() {
        let fetcher = ScriptedFetcher::new(vec![ok(&long_text()), ok(&long_text())]);
        let retriever = TranscriptRetriever::new(TranscriptConfig::default(), fetcher.clone());

        let videos = vec![
            video(Some("AAAAAAAAAAA"), "https://youtu.be/AAAAAAAAAAA"),
            video(None, "https://cdn.example.com/demo.mp4"),
            video(Some("BBBBBBBBBBB"), "https://youtu.be/BBBBBBBBBBB"),
        ];
        let results = retriever.retrieve_all(&videos).await;

        assert_eq!(results.len(), 2);
        assert!(results.iter().all(|result| result.success));

        let calls = fetcher.calls.lock().await;
        assert_eq!(calls[0].0, "AAAAAAAAAAA");
        assert_eq!(calls[1].0, "BBBBBBBBBBB");
        assert_eq!(calls[1].2 - calls[0].2, Duration::from_secs(1));
    }
}
