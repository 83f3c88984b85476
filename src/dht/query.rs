//! Iterative lookups.
//!
//! `alpha` workers repeatedly take the closest unqueried candidate, query it,
//! and merge the peers it returns, until one of them produces a result, the
//! candidates run out, or the context is done. Each peer is queried at most
//! once, and peers learned more than `max_hops` hops away from the seeds are
//! ignored.

use std::collections::{HashMap, HashSet};
use std::sync::{Condvar, Mutex, PoisonError};
use std::thread;
use std::time::Duration;

use tracing::{debug, trace};

use super::Dht;
use crate::{ClosestPeers, Context, Id, Peer, PeerId, Result};

/// How often idle workers recheck the context while others are in flight.
const IDLE_WAKEUP: Duration = Duration::from_millis(50);

/// What querying one peer produced.
pub(crate) enum QueryStep<T> {
    /// A final result, the lookup stops.
    Done(T),
    /// Peers to query next, possibly none.
    Continue(Vec<Peer>),
}

struct QueryState<T> {
    candidates: ClosestPeers,
    hops: HashMap<PeerId, usize>,
    seen: HashSet<PeerId>,
    inflight: usize,
    queried: usize,
    result: Option<T>,
}

impl<T> QueryState<T> {
    fn add(&mut self, peer: Peer, hop: usize) {
        if self.seen.insert(peer.id().clone()) {
            self.hops.insert(peer.id().clone(), hop);
            self.candidates.add(peer);
        }
    }
}

impl Dht {
    /// Run an iterative lookup towards `target`, starting from `seeds`.
    ///
    /// Returns `Ok(None)` if the candidates ran out without a result, and the
    /// context's error if it got cancelled or timed out first.
    pub(crate) fn run_query<T, F>(
        &self,
        ctx: &Context,
        target: Id,
        seeds: Vec<Peer>,
        step: F,
    ) -> Result<Option<T>>
    where
        T: Send,
        F: Fn(&Context, &Peer) -> Result<QueryStep<T>> + Sync,
    {
        let mut state = QueryState {
            candidates: ClosestPeers::new(target),
            hops: HashMap::new(),
            seen: HashSet::new(),
            inflight: 0,
            queried: 0,
            result: None,
        };

        // Never query ourselves.
        state.seen.insert(self.local_peer().id().clone());

        for seed in seeds {
            state.add(seed, 0);
        }

        let state = Mutex::new(state);
        let wakeup = Condvar::new();

        let workers = self.config().alpha.max(1);

        thread::scope(|scope| {
            for _ in 0..workers {
                scope.spawn(|| self.query_worker(ctx, &state, &wakeup, &step));
            }
        });

        let state = state.into_inner().unwrap_or_else(PoisonError::into_inner);

        trace!(
            context = "query",
            %target,
            queried = state.queried,
            found = state.result.is_some(),
            "Query done"
        );

        match state.result {
            Some(result) => Ok(Some(result)),
            None => ctx.check().map(|_| None),
        }
    }

    fn query_worker<T, F>(
        &self,
        ctx: &Context,
        state: &Mutex<QueryState<T>>,
        wakeup: &Condvar,
        step: &F,
    ) where
        F: Fn(&Context, &Peer) -> Result<QueryStep<T>>,
    {
        loop {
            let (peer, hop) = {
                let mut guard = state.lock().unwrap_or_else(PoisonError::into_inner);

                loop {
                    if guard.result.is_some() || ctx.is_cancelled() {
                        wakeup.notify_all();
                        return;
                    }

                    if let Some(peer) = guard.candidates.pop_closest() {
                        let hop = guard.hops.get(peer.id()).copied().unwrap_or_default();

                        guard.inflight += 1;
                        guard.queried += 1;

                        break (peer, hop);
                    }

                    if guard.inflight == 0 {
                        wakeup.notify_all();
                        return;
                    }

                    guard = wakeup
                        .wait_timeout(guard, IDLE_WAKEUP)
                        .unwrap_or_else(PoisonError::into_inner)
                        .0;
                }
            };

            let outcome = step(ctx, &peer);

            let mut guard = state.lock().unwrap_or_else(PoisonError::into_inner);
            guard.inflight -= 1;

            match outcome {
                Ok(QueryStep::Done(result)) => {
                    if guard.result.is_none() {
                        guard.result = Some(result);
                    }
                }
                Ok(QueryStep::Continue(peers)) => {
                    let next_hop = hop + 1;

                    if next_hop > self.config().max_hops {
                        trace!(context = "query", %peer, hop, "Reached max hops");
                    } else {
                        for peer in peers {
                            guard.add(peer, next_hop);
                        }
                    }
                }
                Err(error) => {
                    debug!(?error, %peer, "Query step failed");
                }
            }

            drop(guard);
            wakeup.notify_all();
        }
    }
}
