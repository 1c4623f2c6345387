//! Scripted in-memory transport for tests.

use crate::backend::transport::{BackendSink, BackendStream, Transport};
use crate::config::ServiceConfig;
use crate::error::{DenoiseError, DenoiseResult};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::{mpsc, watch};

/// How one connection behaves.
#[derive(Debug, Clone)]
pub enum Plan {
    /// Answers every batch with the same bytes
    Echo,
    /// Answers every batch with silence of the same length
    Mute,
    /// Accepts batches, never answers
    Silent,
    /// Answers with a payload that is not 16-bit PCM
    Garbage,
    /// Connect fails with this error
    Fail(DenoiseError),
    /// Connect never completes
    Hang,
    /// Connects, then no write or close ever completes (backend stopped reading)
    Stalled,
}

struct Inner {
    default_plan: Plan,
    queued: Mutex<VecDeque<Plan>>,
    connects: AtomicUsize,
    closes: AtomicUsize,
    sent: AtomicUsize,
    kill: watch::Sender<u64>,
}

/// Transport whose connections follow [`Plan`]s.
///
/// Queued plans are used first, one per connect, then the default plan.
#[derive(Clone)]
pub struct MockTransport {
    inner: Arc<Inner>,
}

impl MockTransport {
    pub fn new(default_plan: Plan) -> Self {
        let (kill, _) = watch::channel(0);
        Self {
            inner: Arc::new(Inner {
                default_plan,
                queued: Mutex::new(VecDeque::new()),
                connects: AtomicUsize::new(0),
                closes: AtomicUsize::new(0),
                sent: AtomicUsize::new(0),
                kill,
            }),
        }
    }

    /// Plan for the next connect that has no queued plan yet.
    pub fn push_plan(&self, plan: Plan) {
        self.inner.queued.lock().unwrap().push_back(plan);
    }

    /// End the read side of every live connection, as a dropped socket would.
    pub fn drop_connections(&self) {
        self.inner.kill.send_modify(|n| *n += 1);
    }

    pub fn connect_count(&self) -> usize {
        self.inner.connects.load(Ordering::SeqCst)
    }

    pub fn closed_count(&self) -> usize {
        self.inner.closes.load(Ordering::SeqCst)
    }

    /// Batches written to any connection.
    pub fn sent_count(&self) -> usize {
        self.inner.sent.load(Ordering::SeqCst)
    }

    fn next_plan(&self) -> Plan {
        self.inner
            .queued
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| self.inner.default_plan.clone())
    }
}

pub struct MockSink {
    plan: Plan,
    replies: mpsc::UnboundedSender<Vec<u8>>,
    inner: Arc<Inner>,
}

pub struct MockStream {
    replies: mpsc::UnboundedReceiver<Vec<u8>>,
    kill: watch::Receiver<u64>,
}

impl Transport for MockTransport {
    type Sink = MockSink;
    type Stream = MockStream;

    async fn connect(&self, _config: &ServiceConfig) -> DenoiseResult<(MockSink, MockStream)> {
        self.inner.connects.fetch_add(1, Ordering::SeqCst);
        let plan = self.next_plan();

        match plan {
            Plan::Fail(err) => Err(err),
            Plan::Hang => std::future::pending().await,
            plan => {
                let (tx, rx) = mpsc::unbounded_channel();
                let sink = MockSink {
                    plan,
                    replies: tx,
                    inner: self.inner.clone(),
                };
                let stream = MockStream {
                    replies: rx,
                    kill: self.inner.kill.subscribe(),
                };
                Ok((sink, stream))
            }
        }
    }
}

impl BackendSink for MockSink {
    async fn send_audio(&mut self, pcm: Vec<u8>) -> DenoiseResult<()> {
        self.inner.sent.fetch_add(1, Ordering::SeqCst);
        if matches!(self.plan, Plan::Stalled) {
            return std::future::pending().await;
        }
        let reply = match self.plan {
            Plan::Echo => Some(pcm),
            Plan::Mute => Some(vec![0; pcm.len()]),
            Plan::Garbage => Some(vec![1, 2, 3]),
            _ => None,
        };
        if let Some(reply) = reply {
            let _ = self.replies.send(reply);
        }
        Ok(())
    }

    async fn close(&mut self) {
        self.inner.closes.fetch_add(1, Ordering::SeqCst);
        if matches!(self.plan, Plan::Stalled) {
            std::future::pending::<()>().await;
        }
    }
}

impl BackendStream for MockStream {
    async fn next_audio(&mut self) -> Option<DenoiseResult<Vec<u8>>> {
        tokio::select! {
            _ = self.kill.changed() => None,
            reply = self.replies.recv() => reply.map(Ok),
        }
    }
}
