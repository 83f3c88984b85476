//! Request/response correlation over a single protocol [Pipe].

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};

use flume::{Receiver, Sender};
use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use super::{mux::DEFAULT_PIPE_CAPACITY, NetMessage, Pipe, RequestSender};
use crate::{CancelHandle, Context, Error, Result};

/// Size of the random id correlating a request with its response.
const REQUEST_ID_SIZE: usize = 8;

/// Number of threads serving inbound requests.
pub const DEFAULT_HANDLER_WORKERS: usize = 4;

/// Answers requests arriving at a [Service].
pub trait Handler: Send + Sync {
    /// Returns the response to send back, or `None` to leave the request unanswered.
    fn handle_message(&self, ctx: &Context, message: NetMessage) -> Option<NetMessage>;
}

#[derive(Debug, Serialize, Deserialize)]
struct Envelope {
    #[serde(rename = "r")]
    #[serde(with = "serde_bytes")]
    request_id: Vec<u8>,

    #[serde(rename = "s")]
    is_response: u8,

    #[serde(rename = "d")]
    #[serde(with = "serde_bytes")]
    data: Vec<u8>,
}

type Pending = Arc<Mutex<HashMap<Vec<u8>, Sender<NetMessage>>>>;

#[derive(Debug, Default)]
struct Running {
    cancel: Option<CancelHandle>,
    handles: Vec<JoinHandle<()>>,
}

/// An inbound request waiting for a worker.
struct Request {
    request_id: Vec<u8>,
    message: NetMessage,
}

/// Sends requests and serves incoming ones over one protocol [Pipe].
///
/// Register [Service::pipe] with a [super::Muxer] and call [Service::start]
/// with the [Handler] answering remote requests. Requests are served by a
/// fixed pool of workers; when all are busy the incoming queue backs up.
#[derive(Debug)]
pub struct Service {
    pipe: Pipe,
    pending: Pending,
    workers: usize,
    running: Mutex<Running>,
}

impl Default for Service {
    fn default() -> Self {
        Self::new()
    }
}

impl Service {
    pub fn new() -> Self {
        Self::with_workers(DEFAULT_HANDLER_WORKERS)
    }

    /// A service serving at most `workers` requests at a time.
    pub fn with_workers(workers: usize) -> Self {
        Service {
            pipe: Pipe::new(DEFAULT_PIPE_CAPACITY),
            pending: Arc::new(Mutex::new(HashMap::new())),
            workers: workers.max(1),
            running: Mutex::new(Running::default()),
        }
    }

    pub fn pipe(&self) -> &Pipe {
        &self.pipe
    }

    /// Start reading the incoming queue, answering requests with `handler`.
    pub fn start(&self, ctx: &Context, handler: Arc<dyn Handler>) -> Result<()> {
        let mut running = self.running.lock().unwrap_or_else(PoisonError::into_inner);

        if running.handles.iter().any(|handle| !handle.is_finished()) {
            return Err(Error::AlreadyRunning);
        }
        // Reap threads that exited after a parent cancellation.
        for handle in running.handles.drain(..) {
            let _ = handle.join();
        }

        let (ctx, cancel) = ctx.with_cancel();
        let (requests_tx, requests_rx) = flume::bounded(self.workers);

        for _ in 0..self.workers {
            let ctx = ctx.clone();
            let requests = requests_rx.clone();
            let outgoing = self.pipe.outgoing_tx().clone();
            let handler = handler.clone();

            running.handles.push(thread::spawn(move || {
                serve_requests(ctx, requests, outgoing, handler)
            }));
        }

        let pipe = self.pipe.clone();
        let pending = self.pending.clone();

        running.handles.push(thread::spawn(move || {
            handle_incoming(ctx, pipe, pending, requests_tx)
        }));
        running.cancel = Some(cancel);

        Ok(())
    }

    /// Stop reading the incoming queue and wait for every worker, including
    /// those in the middle of a request, to exit.
    pub fn stop(&self) {
        let mut running = self.running.lock().unwrap_or_else(PoisonError::into_inner);

        if let Some(mut cancel) = running.cancel.take() {
            cancel.cancel();
        }
        for handle in running.handles.drain(..) {
            let _ = handle.join();
        }
    }

    /// Send a message expecting no response.
    pub fn send_message(&self, ctx: &Context, message: NetMessage) -> Result<()> {
        let (peer, data) = message.into_parts();
        let wrapped = wrap(random_request_id(), false, &data)?;

        ctx.send(self.pipe.outgoing_tx(), NetMessage::new(peer, wrapped))
    }

    // === Private Methods ===

    fn pending(&self) -> std::sync::MutexGuard<'_, HashMap<Vec<u8>, Sender<NetMessage>>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl RequestSender for Service {
    fn send_request(&self, ctx: &Context, message: NetMessage) -> Result<NetMessage> {
        let (peer, data) = message.into_parts();

        let request_id = random_request_id();
        let wrapped = wrap(request_id.clone(), false, &data)?;

        let (sender, receiver) = flume::bounded(1);
        self.pending().insert(request_id.clone(), sender);

        let result = ctx
            .send(self.pipe.outgoing_tx(), NetMessage::new(peer, wrapped))
            .and_then(|_| ctx.recv(&receiver));

        self.pending().remove(&request_id);

        result
    }
}

impl Drop for Service {
    fn drop(&mut self) {
        self.stop();
    }
}

fn random_request_id() -> Vec<u8> {
    rand::thread_rng().gen::<[u8; REQUEST_ID_SIZE]>().to_vec()
}

fn wrap(request_id: Vec<u8>, is_response: bool, data: &[u8]) -> Result<Vec<u8>> {
    Ok(serde_bencode::to_bytes(&Envelope {
        request_id,
        is_response: is_response as u8,
        data: data.to_vec(),
    })?)
}

fn handle_incoming(ctx: Context, pipe: Pipe, pending: Pending, requests: Sender<Request>) {
    while let Ok(message) = ctx.recv(pipe.incoming_rx()) {
        let (peer, data) = message.into_parts();

        let envelope: Envelope = match serde_bencode::from_bytes(&data) {
            Ok(envelope) => envelope,
            Err(error) => {
                debug!(?error, %peer, "Dropped malformed service message");
                continue;
            }
        };

        if envelope.is_response != 0 {
            let waiting = pending
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .remove(&envelope.request_id);

            match waiting {
                Some(sender) => {
                    let _ = sender.try_send(NetMessage::new(peer, envelope.data));
                }
                None => {
                    trace!(context = "service", %peer, "Response to an unknown or expired request");
                }
            }

            continue;
        }

        let request = Request {
            request_id: envelope.request_id,
            message: NetMessage::new(peer, envelope.data),
        };

        if ctx.send(&requests, request).is_err() {
            break;
        }
    }

    trace!(context = "service", "Incoming loop stopped");
}

fn serve_requests(
    ctx: Context,
    requests: Receiver<Request>,
    outgoing: Sender<NetMessage>,
    handler: Arc<dyn Handler>,
) {
    while let Ok(Request {
        request_id,
        message,
    }) = ctx.recv(&requests)
    {
        let Some(response) = handler.handle_message(&ctx, message) else {
            continue;
        };

        let (peer, data) = response.into_parts();

        match wrap(request_id, true, &data) {
            Ok(wrapped) => {
                if ctx.send(&outgoing, NetMessage::new(peer, wrapped)).is_err() {
                    break;
                }
            }
            Err(error) => debug!(?error, "Failed to wrap response"),
        }
    }
}
