//! Intake queue, worker rails and the public pipeline surface

use crate::container::{Completion, MessageContainer};
use crate::context::{Direction, PipelineContext, PipelineStep};
use crate::error::PipelineError;
use crate::steps::{
    ExecutionDispatcher, ExecutionStep, IdentityStep, PlacementStep, RoutingStep, SerializationStep, TransportStep,
};
use crate::tracker::ResponseTracker;
use crate::transport::Transport;
use crate::PipelineConfig;
use bytes::Bytes;
use mesh_cluster::ClusterManager;
use mesh_placement::AddressableManager;
use mesh_routing::Router;
use mesh_wire::{AddressableReference, CborCodec, Message, MessageCodec, MessageContent, MessageTarget, NodeId};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Queued traversal
#[derive(Debug)]
struct Envelope {
    direction: Direction,
    container: MessageContainer,
}

#[derive(Debug, Default)]
struct Counters {
    submitted: AtomicU64,
    rejected: AtomicU64,
    reinjected: AtomicU64,
    completed: AtomicU64,
    failed: AtomicU64,
}

/// Cheap handle for submitting messages to a pipeline
#[derive(Debug, Clone)]
pub struct PipelineHandle {
    tx: mpsc::Sender<Envelope>,
    capacity: usize,
    counters: Arc<Counters>,
    local_node_id: NodeId,
    next_id: Arc<AtomicI64>,
}

impl PipelineHandle {
    /// Node this pipeline runs on
    pub fn local_node_id(&self) -> &NodeId {
        &self.local_node_id
    }

    /// Submit an outbound message, the completion resolves when its traversal ends
    pub fn write_message(&self, message: Message) -> Completion {
        let (container, completion) = MessageContainer::for_message(message);
        self.counters.submitted.fetch_add(1, Ordering::Relaxed);
        // A rejected container already carries the error in its completion
        let _ = self.enqueue(Direction::Outbound, container);
        completion
    }

    /// Submit an outbound message nobody waits on
    pub fn write_detached(&self, message: Message) -> Result<(), PipelineError> {
        self.counters.submitted.fetch_add(1, Ordering::Relaxed);
        self.enqueue(Direction::Outbound, MessageContainer::detached(message))
    }

    /// Submit bytes received from another node
    pub fn deliver(&self, encoded: Bytes) -> Result<(), PipelineError> {
        self.counters.submitted.fetch_add(1, Ordering::Relaxed);
        self.enqueue(Direction::Inbound, MessageContainer::from_wire(encoded))
    }

    /// Queue `container` as a new traversal started by a step, handing it back if refused
    pub(crate) fn reinject(
        &self,
        direction: Direction,
        container: MessageContainer,
    ) -> Result<(), (PipelineError, MessageContainer)> {
        self.counters.reinjected.fetch_add(1, Ordering::Relaxed);
        self.try_enqueue(direction, container)
    }

    /// Fresh message id, unique for this pipeline
    pub fn next_message_id(&self) -> i64 {
        self.next_id.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Admit without waiting; a rejected container is completed with the error
    fn enqueue(&self, direction: Direction, container: MessageContainer) -> Result<(), PipelineError> {
        self.try_enqueue(direction, container).map_err(|(err, mut rejected)| {
            rejected.complete(Err(err.clone()));
            err
        })
    }

    fn try_enqueue(
        &self,
        direction: Direction,
        container: MessageContainer,
    ) -> Result<(), (PipelineError, MessageContainer)> {
        match self.tx.try_send(Envelope { direction, container }) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(envelope)) => {
                self.counters.rejected.fetch_add(1, Ordering::Relaxed);
                let err = PipelineError::CapacityExceeded {
                    capacity: self.capacity,
                };
                warn!("Rejected {}: {}", envelope.container.describe(), err);
                Err((err, envelope.container))
            }
            Err(TrySendError::Closed(envelope)) => Err((PipelineError::Closed, envelope.container)),
        }
    }

    fn queued(&self) -> usize {
        self.capacity.saturating_sub(self.tx.capacity())
    }
}

/// Pipeline statistics
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PipelineStats {
    /// Local node ID
    pub local_node_id: String,
    /// Messages submitted by callers or the transport
    pub submitted: u64,
    /// Submissions refused because the queue was full
    pub rejected: u64,
    /// Traversals started by a step
    pub reinjected: u64,
    /// Traversals that ended successfully
    pub completed: u64,
    /// Traversals that ended with an error
    pub failed: u64,
    /// Messages waiting in the queue
    pub queued: usize,
    /// Running rails
    pub rails: usize,
    /// Requests waiting for a response
    pub pending_responses: usize,
}

/// Bidirectional message pipeline of one node
pub struct Pipeline {
    config: PipelineConfig,
    steps: Arc<[Arc<dyn PipelineStep>]>,
    handle: PipelineHandle,
    receiver: Arc<Mutex<mpsc::Receiver<Envelope>>>,
    tracker: Arc<ResponseTracker>,
    cancel: CancellationToken,
    rails: Mutex<Vec<JoinHandle<()>>>,
}

impl Pipeline {
    /// Pipeline running `steps` with its own response tracker
    pub fn new(config: PipelineConfig, local_node_id: NodeId, steps: Vec<Arc<dyn PipelineStep>>) -> Self {
        Self::from_parts(config, local_node_id, steps, Arc::new(ResponseTracker::new()))
    }

    /// Pipeline running `steps`, sharing `tracker` with them
    pub fn from_parts(
        config: PipelineConfig,
        local_node_id: NodeId,
        steps: Vec<Arc<dyn PipelineStep>>,
        tracker: Arc<ResponseTracker>,
    ) -> Self {
        let capacity = config.queue_capacity.max(1);
        let (tx, rx) = mpsc::channel(capacity);
        let handle = PipelineHandle {
            tx,
            capacity,
            counters: Arc::new(Counters::default()),
            local_node_id,
            next_id: Arc::new(AtomicI64::new(0)),
        };
        Self {
            config,
            steps: steps.into(),
            handle,
            receiver: Arc::new(Mutex::new(rx)),
            tracker,
            cancel: CancellationToken::new(),
            rails: Mutex::new(Vec::new()),
        }
    }

    /// Builder assembling the standard step array
    pub fn builder(local_node_id: NodeId) -> PipelineBuilder {
        PipelineBuilder::new(local_node_id)
    }

    /// Submission handle
    pub fn handle(&self) -> PipelineHandle {
        self.handle.clone()
    }

    /// Step array
    pub fn steps(&self) -> Arc<[Arc<dyn PipelineStep>]> {
        self.steps.clone()
    }

    /// Response tracker shared with the execution step
    pub fn tracker(&self) -> &Arc<ResponseTracker> {
        &self.tracker
    }

    /// Node this pipeline runs on
    pub fn local_node_id(&self) -> &NodeId {
        self.handle.local_node_id()
    }

    /// Spawn the rails
    pub async fn start(&self) {
        let mut rails = self.rails.lock().await;
        if !rails.is_empty() {
            warn!("Pipeline rails already running");
            return;
        }

        for index in 0..self.config.rails {
            let receiver = self.receiver.clone();
            let steps = self.steps.clone();
            let handle = self.handle.clone();
            let cancel = self.cancel.clone();
            rails.push(tokio::spawn(async move {
                run_rail(index, receiver, steps, handle, cancel).await;
            }));
        }
        info!(
            "Pipeline started on {} with {} rails (queue capacity {})",
            self.handle.local_node_id, self.config.rails, self.handle.capacity
        );
    }

    /// Cancel the rails, wait for them and fail whatever is still queued
    pub async fn shutdown(&self) {
        self.cancel.cancel();

        let rails: Vec<JoinHandle<()>> = self.rails.lock().await.drain(..).collect();
        for rail in rails {
            if let Err(e) = rail.await {
                error!("Pipeline rail terminated abnormally: {}", e);
            }
        }

        let mut receiver = self.receiver.lock().await;
        receiver.close();
        let mut drained = 0usize;
        while let Ok(mut envelope) = receiver.try_recv() {
            envelope.container.complete(Err(PipelineError::Cancelled));
            drained += 1;
        }
        info!("Pipeline on {} stopped ({} queued messages cancelled)", self.handle.local_node_id, drained);
    }

    /// Invoke `method` on `reference` and wait for its result
    pub async fn invoke(
        &self,
        reference: AddressableReference,
        method: impl Into<String>,
        arguments: Vec<u8>,
    ) -> Result<Vec<u8>, PipelineError> {
        match self.request(Message::invocation(reference, method, arguments)).await? {
            MessageContent::InvocationResponse { data } => Ok(data),
            MessageContent::Error { description } => Err(PipelineError::Remote(description)),
            other => Err(PipelineError::step(
                "execution",
                format!("unexpected {} response", other.kind()),
                "invocation",
            )),
        }
    }

    /// Ask `node` for its identity through the mesh
    pub async fn connection_info(&self, node: &NodeId) -> Result<NodeId, PipelineError> {
        let message =
            Message::new(MessageContent::ConnectionInfoRequest).with_target(MessageTarget::Unicast(node.clone()));
        match self.request(message).await? {
            MessageContent::ConnectionInfoResponse { node_id } => Ok(node_id),
            MessageContent::Error { description } => Err(PipelineError::Remote(description)),
            other => Err(PipelineError::step(
                "execution",
                format!("unexpected {} response", other.kind()),
                "connection info",
            )),
        }
    }

    async fn request(&self, mut message: Message) -> Result<MessageContent, PipelineError> {
        let message_id = self.handle.next_message_id();
        message.message_id = Some(message_id);
        let response = self.tracker.register(message_id);
        let completion = self.handle.write_message(message);

        let timeout = self.config.invocation_timeout;
        let result = tokio::time::timeout(timeout, async {
            completion.await?;
            response.await.map_err(|_| PipelineError::Closed)
        })
        .await;
        self.tracker.cancel(message_id);

        result.unwrap_or(Err(PipelineError::Timeout(timeout)))
    }

    /// Snapshot of the counters
    pub fn stats(&self) -> PipelineStats {
        let counters = &self.handle.counters;
        PipelineStats {
            local_node_id: self.handle.local_node_id.to_string(),
            submitted: counters.submitted.load(Ordering::Relaxed),
            rejected: counters.rejected.load(Ordering::Relaxed),
            reinjected: counters.reinjected.load(Ordering::Relaxed),
            completed: counters.completed.load(Ordering::Relaxed),
            failed: counters.failed.load(Ordering::Relaxed),
            queued: self.handle.queued(),
            rails: self.rails.try_lock().map(|rails| rails.len()).unwrap_or(0),
            pending_responses: self.tracker.pending(),
        }
    }
}

async fn run_rail(
    index: usize,
    receiver: Arc<Mutex<mpsc::Receiver<Envelope>>>,
    steps: Arc<[Arc<dyn PipelineStep>]>,
    handle: PipelineHandle,
    cancel: CancellationToken,
) {
    debug!("Rail {} started", index);
    loop {
        let envelope = tokio::select! {
            _ = cancel.cancelled() => break,
            envelope = async { receiver.lock().await.recv().await } => envelope,
        };
        let Some(Envelope {
            direction,
            mut container,
        }) = envelope
        else {
            break;
        };

        let result = {
            let mut ctx = PipelineContext::new(steps.clone(), direction, handle.clone(), cancel.clone());
            tokio::select! {
                result = ctx.next(&mut container) => result,
                _ = cancel.cancelled() => Err(PipelineError::Cancelled),
            }
        };
        match result {
            Ok(()) => {
                handle.counters.completed.fetch_add(1, Ordering::Relaxed);
                container.complete(Ok(()));
            }
            Err(e) => {
                handle.counters.failed.fetch_add(1, Ordering::Relaxed);
                if e == PipelineError::Cancelled {
                    debug!("Rail {} cancelled {:?} traversal of {}", index, direction, container.describe());
                } else if e.is_defect() {
                    error!("Rail {} aborted {:?} traversal of {}: {}", index, direction, container.describe(), e);
                } else {
                    warn!("Rail {} failed {:?} traversal of {}: {}", index, direction, container.describe(), e);
                    reply_with_error(&handle, &container, &e);
                }
                container.complete(Err(e));
            }
        }
    }
    debug!("Rail {} stopped", index);
}

/// Remote senders learn about failures through an `Error` reply
fn reply_with_error(handle: &PipelineHandle, container: &MessageContainer, err: &PipelineError) {
    let Some(request) = container.message() else {
        return;
    };
    let is_request = matches!(
        request.content,
        MessageContent::InvocationRequest { .. } | MessageContent::ConnectionInfoRequest
    );
    let remote = request.source.as_ref().is_some_and(|source| source != handle.local_node_id());
    if !is_request || !remote || request.message_id.is_none() {
        return;
    }

    let reply = Message::reply_to(
        request,
        MessageContent::Error {
            description: err.to_string(),
        },
    );
    if let Err(e) = handle.write_detached(reply) {
        warn!("Could not send error reply for {}: {}", container.describe(), e);
    }
}

/// Builder for a pipeline with the standard step array
pub struct PipelineBuilder {
    local_node_id: NodeId,
    config: PipelineConfig,
    cluster: Option<Arc<ClusterManager>>,
    addressables: Option<Arc<AddressableManager>>,
    router: Option<Arc<dyn Router>>,
    codec: Arc<dyn MessageCodec>,
    transport: Option<Arc<dyn Transport>>,
    dispatcher: Option<Arc<dyn ExecutionDispatcher>>,
}

impl PipelineBuilder {
    /// Create a new pipeline builder
    pub fn new(local_node_id: NodeId) -> Self {
        Self {
            local_node_id,
            config: PipelineConfig::default(),
            cluster: None,
            addressables: None,
            router: None,
            codec: Arc::new(CborCodec::new()),
            transport: None,
            dispatcher: None,
        }
    }

    /// Set the pipeline sizing
    pub fn config(mut self, config: PipelineConfig) -> Self {
        self.config = config;
        self
    }

    /// Set the cluster manager
    pub fn cluster(mut self, cluster: Arc<ClusterManager>) -> Self {
        self.cluster = Some(cluster);
        self
    }

    /// Set the addressable manager
    pub fn addressables(mut self, addressables: Arc<AddressableManager>) -> Self {
        self.addressables = Some(addressables);
        self
    }

    /// Set the router
    pub fn router(mut self, router: Arc<dyn Router>) -> Self {
        self.router = Some(router);
        self
    }

    /// Set the envelope codec
    pub fn codec(mut self, codec: Arc<dyn MessageCodec>) -> Self {
        self.codec = codec;
        self
    }

    /// Set the transport
    pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Set the executor of inbound invocations
    pub fn dispatcher(mut self, dispatcher: Arc<dyn ExecutionDispatcher>) -> Self {
        self.dispatcher = Some(dispatcher);
        self
    }

    /// Build the pipeline
    pub fn build(self) -> Result<Pipeline, &'static str> {
        let cluster = self.cluster.ok_or("Cluster manager is required")?;
        let addressables = self.addressables.ok_or("Addressable manager is required")?;
        let router = self.router.ok_or("Router is required")?;
        let transport = self.transport.ok_or("Transport is required")?;

        let tracker = Arc::new(ResponseTracker::new());
        let steps: Vec<Arc<dyn PipelineStep>> = vec![
            Arc::new(ExecutionStep::new(self.dispatcher, tracker.clone())),
            Arc::new(IdentityStep),
            Arc::new(PlacementStep::new(cluster, addressables)),
            Arc::new(RoutingStep::new(router)),
            Arc::new(SerializationStep::new(self.codec)),
            Arc::new(TransportStep::new(transport)),
        ];
        Ok(Pipeline::from_parts(self.config, self.local_node_id, steps, tracker))
    }
}
