//! Transformer backed by an asynchronous job queue.
//!
//! The transformer enqueues the message body and awaits the worker's reply.
//! Workers run on their own tasks, so a slow backend only holds up the
//! request that is waiting on it.

use super::{TransformError, Transformer};
use crate::message::{ProxyRequest, ProxyResponse};
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Which chain a job was enqueued from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobPhase {
    Request,
    Response,
}

/// A body waiting to be transformed.
pub struct Job {
    pub phase: JobPhase,
    pub payload: Vec<u8>,
    reply: oneshot::Sender<Result<Vec<u8>, String>>,
}

impl Job {
    /// Hand the result back to the waiting transformer.
    pub fn complete(self, result: Result<Vec<u8>, String>) {
        Self::reply_to(self.reply, result);
    }

    fn reply_to(reply: oneshot::Sender<Result<Vec<u8>, String>>, result: Result<Vec<u8>, String>) {
        if reply.send(result).is_err() {
            debug!("Job requester went away before completion");
        }
    }
}

/// Backend that processes queued jobs.
#[async_trait]
pub trait JobWorker: Send + Sync + 'static {
    async fn process(&self, phase: JobPhase, payload: Vec<u8>) -> Result<Vec<u8>, String>;
}

/// Producer side of a job queue.
#[derive(Clone)]
pub struct JobQueue {
    sender: mpsc::Sender<Job>,
}

impl JobQueue {
    /// Create a queue with a bounded backlog and its receiving end.
    pub fn bounded(capacity: usize) -> (Self, mpsc::Receiver<Job>) {
        let (sender, receiver) = mpsc::channel(capacity);
        (Self { sender }, receiver)
    }

    /// Create a queue and spawn a dispatcher that runs every job on `worker`.
    pub fn spawn(worker: Arc<dyn JobWorker>, capacity: usize) -> (Self, JoinHandle<()>) {
        let (queue, mut receiver) = Self::bounded(capacity);

        let handle = tokio::spawn(async move {
            while let Some(job) = receiver.recv().await {
                let worker = Arc::clone(&worker);
                tokio::spawn(async move {
                    let Job {
                        phase,
                        payload,
                        reply,
                    } = job;
                    let result = worker.process(phase, payload).await;
                    Job::reply_to(reply, result);
                });
            }
            debug!("Job queue closed");
        });

        (queue, handle)
    }

    /// Enqueue a payload and wait for the worker's result.
    pub async fn submit(&self, phase: JobPhase, payload: Vec<u8>) -> Result<Vec<u8>, TransformError> {
        let (reply, done) = oneshot::channel();
        self.sender
            .send(Job {
                phase,
                payload,
                reply,
            })
            .await
            .map_err(|_| TransformError::Job("job queue is closed".to_string()))?;

        done.await
            .map_err(|_| TransformError::Job("job dropped without a result".to_string()))?
            .map_err(TransformError::Job)
    }
}

/// Transformer that delegates body rewriting to a job queue.
pub struct JobTransformer {
    name: String,
    queue: JobQueue,
}

impl JobTransformer {
    pub fn new(name: impl Into<String>, queue: JobQueue) -> Self {
        Self {
            name: name.into(),
            queue,
        }
    }
}

#[async_trait]
impl Transformer for JobTransformer {
    fn name(&self) -> &str {
        &self.name
    }

    async fn transform_request(
        &self,
        mut request: ProxyRequest,
    ) -> Result<ProxyRequest, TransformError> {
        let body = std::mem::take(&mut request.body);
        request.body = self.queue.submit(JobPhase::Request, body).await.map_err(|e| {
            warn!(transformer = %self.name, error = %e, "Request job failed");
            e
        })?;
        Ok(request)
    }

    async fn transform_response(
        &self,
        mut response: ProxyResponse,
    ) -> Result<ProxyResponse, TransformError> {
        let body = std::mem::take(&mut response.body);
        response.body = self.queue.submit(JobPhase::Response, body).await.map_err(|e| {
            warn!(transformer = %self.name, error = %e, "Response job failed");
            e
        })?;
        Ok(response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::RequestTarget;

    struct Upper;

    #[async_trait]
    impl JobWorker for Upper {
        async fn process(&self, phase: JobPhase, payload: Vec<u8>) -> Result<Vec<u8>, String> {
            match phase {
                JobPhase::Request => Ok(payload.to_ascii_uppercase()),
                JobPhase::Response => Err("responses not supported".to_string()),
            }
        }
    }

    fn request(body: &str) -> ProxyRequest {
        ProxyRequest::new(
            "POST",
            RequestTarget::Inbound {
                path: "/tokenize".to_string(),
            },
        )
        .with_body(body)
    }

    #[tokio::test]
    async fn test_request_roundtrip_through_worker() {
        let (queue, _handle) = JobQueue::spawn(Arc::new(Upper), 8);
        let transformer = JobTransformer::new("tokenizer", queue);

        let out = transformer.transform_request(request("card")).await.unwrap();
        assert_eq!(out.body, b"CARD");
        assert_eq!(out.method, "POST");
    }

    #[tokio::test]
    async fn test_worker_error_propagates() {
        let (queue, _handle) = JobQueue::spawn(Arc::new(Upper), 8);
        let transformer = JobTransformer::new("tokenizer", queue);

        let err = transformer
            .transform_response(ProxyResponse::new(200).with_body("x"))
            .await
            .unwrap_err();
        assert!(matches!(err, TransformError::Job(msg) if msg == "responses not supported"));
    }

    #[tokio::test]
    async fn test_closed_queue() {
        let (queue, receiver) = JobQueue::bounded(1);
        drop(receiver);
        let transformer = JobTransformer::new("tokenizer", queue);

        let err = transformer.transform_request(request("x")).await.unwrap_err();
        assert!(matches!(err, TransformError::Job(_)));
    }

    #[tokio::test]
    async fn test_dropped_job() {
        let (queue, mut receiver) = JobQueue::bounded(1);
        tokio::spawn(async move {
            // Drop every job without replying
            while let Some(job) = receiver.recv().await {
                drop(job);
            }
        });
        let transformer = JobTransformer::new("tokenizer", queue);

        let err = transformer.transform_request(request("x")).await.unwrap_err();
        assert!(matches!(err, TransformError::Job(msg) if msg.contains("dropped")));
    }

    #[tokio::test]
    async fn test_manual_completion() {
        let (queue, mut receiver) = JobQueue::bounded(1);
        tokio::spawn(async move {
            if let Some(job) = receiver.recv().await {
                let mut payload = job.payload.clone();
                payload.extend_from_slice(b"!");
                job.complete(Ok(payload));
            }
        });

        let out = queue.submit(JobPhase::Request, b"hi".to_vec()).await.unwrap();
        assert_eq!(out, b"hi!");
    }
}
