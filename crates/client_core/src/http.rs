use std::time::Duration;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use futures::stream;
use reqwest::{Client, RequestBuilder};
use serde::de::DeserializeOwned;
use shared::{
    domain::StudentId,
    error::ApiError,
    protocol::{BadgeRecord, CompleteStepRequest, CompleteStepResult, LessonRecord},
};
use tracing::debug;
use url::Url;

use crate::{
    error::{CompleteStepError, SourceError},
    ports::{ProgressSource, SnapshotStream, StepCompletionService},
};

#[derive(Clone)]
pub struct HttpProgressClient {
    http: Client,
    base_url: Url,
    poll_interval: Option<Duration>,
}

impl HttpProgressClient {
    pub fn new(base_url: &str) -> Result<Self> {
        let base_url = Url::parse(base_url.trim())
            .with_context(|| format!("invalid server url '{base_url}'"))?;
        if base_url.cannot_be_a_base() {
            bail!("server url '{base_url}' cannot carry a path");
        }
        Ok(Self {
            http: Client::new(),
            base_url,
            poll_interval: None,
        })
    }

    /// Re-fetch each subscribed channel on this interval. Zero disables polling.
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = (!interval.is_zero()).then_some(interval);
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Result<Self> {
        self.http = Client::builder()
            .timeout(timeout)
            .build()
            .context("failed to build http client")?;
        Ok(self)
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    fn endpoint(&self, segments: &[&str]) -> Url {
        let mut url = self.base_url.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url
    }

    fn snapshots<T>(&self, url: Url) -> SnapshotStream<T>
    where
        T: DeserializeOwned + Send + 'static,
    {
        let http = self.http.clone();
        let poll_interval = self.poll_interval;
        Box::pin(stream::unfold(true, move |first| {
            let request = http.get(url.clone());
            async move {
                if !first {
                    tokio::time::sleep(poll_interval?).await;
                }
                Some((fetch_json(request).await, false))
            }
        }))
    }
}

impl ProgressSource for HttpProgressClient {
    fn lessons(&self, student_id: &StudentId) -> SnapshotStream<LessonRecord> {
        self.snapshots(self.endpoint(&["students", student_id.as_str(), "lessons"]))
    }

    fn badges(&self, student_id: &StudentId) -> SnapshotStream<BadgeRecord> {
        self.snapshots(self.endpoint(&["students", student_id.as_str(), "badges"]))
    }
}

#[async_trait]
impl StepCompletionService for HttpProgressClient {
    async fn complete_step(
        &self,
        request: CompleteStepRequest,
    ) -> Result<CompleteStepResult, CompleteStepError> {
        let url = self.endpoint(&[
            "lessons",
            request.lesson_id.as_str(),
            "steps",
            request.step_id.as_str(),
            "complete",
        ]);
        let result = fetch_json(self.http.post(url).json(&request)).await?;
        Ok(result)
    }
}

async fn fetch_json<T: DeserializeOwned>(request: RequestBuilder) -> Result<T, SourceError> {
    let res = request
        .send()
        .await
        .map_err(|err| SourceError::Transport(err.to_string()))?;
    let status = res.status();
    let body = res
        .text()
        .await
        .map_err(|err| SourceError::Transport(err.to_string()))?;

    if !status.is_success() {
        debug!(%status, "request rejected by server");
        return Err(match serde_json::from_str::<ApiError>(&body) {
            Ok(err) => SourceError::Api(err),
            Err(_) => SourceError::Transport(format!("server responded with {status}")),
        });
    }
    serde_json::from_str(&body).map_err(|err| SourceError::Decode(err.to_string()))
}

#[cfg(test)]
#[path = "tests/http_tests.rs"]
mod tests;
