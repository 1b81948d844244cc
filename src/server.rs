//! TCP front end of the server.
//!
//! `run` owns the accept loop and spawns one handler task per connection.
//! A handler reads request frames in arrival order and writes exactly one
//! reply per frame. Shutdown is a raised flag that every handler, and every
//! suspended blocking command, watches; nothing waits out an unbounded
//! `BLPOP` before the process can exit.

use crate::{db::DbDropGuard, CommandVariant, Connection, Db, Error, Frame, Result};
use std::{future::Future, sync::Arc, time::Duration};
use tokio::{
    net::{TcpListener, TcpStream},
    sync::{mpsc, watch, Semaphore},
    time,
};
use tracing::{debug, error, info, warn};

/// Hard cap on simultaneously served connections. When it is reached,
/// further accepts park until a handler finishes and returns its permit.
const MAX_CONNECTIONS: usize = 250;

/// Pauses between retries of a failed `accept`, in seconds. Transient
/// failures (file-descriptor exhaustion and friends) usually clear up
/// within a few of these; once the table is exhausted the loop gives up.
const ACCEPT_BACKOFF_SECS: [u64; 6] = [1, 2, 4, 8, 16, 32];

/// Observes the server-wide stop flag from inside a connection task.
///
/// Handed to every handler, and threaded into command execution so that
/// `BLPOP`/`XREAD BLOCK` can abandon their wait when the server stops.
#[derive(Debug)]
pub(crate) struct ShutdownSignal {
    stopping: watch::Receiver<bool>,
}

impl ShutdownSignal {
    pub(crate) fn new(stopping: watch::Receiver<bool>) -> Self {
        Self { stopping }
    }

    /// `true` once the stop flag has been raised.
    pub(crate) fn is_stopping(&self) -> bool {
        *self.stopping.borrow()
    }

    /// Resolves when the stop flag is raised; immediately if it already is.
    ///
    /// Cancellation safe, so it can sit in a `select!` arm next to a frame
    /// read or a blocking keyspace wait, and be polled again on the next
    /// loop iteration.
    pub(crate) async fn wait(&mut self) {
        // a closed channel means the listener is already gone; treat it
        // the same as a raised flag
        let _ = self.stopping.wait_for(|stopping| *stopping).await;
    }
}

/// Accept-loop state: the shared keyspace, the socket, the permit pool and
/// the pieces `run` uses to coordinate shutdown with handler tasks.
#[derive(Debug)]
struct Listener {
    db_holder: DbDropGuard,
    listener: TcpListener,
    /// Connection permits. One is claimed before each accept and rides in
    /// the handler task until it ends.
    permits: Arc<Semaphore>,
    /// Prototype for the per-handler [`ShutdownSignal`]s.
    stop_rx: watch::Receiver<bool>,
    /// Drain barrier. Each handler task carries a clone; `run` waits for
    /// the channel to close, which happens when the last clone drops.
    done_tx: mpsc::Sender<()>,
}

/// One task per connection: reads frames, dispatches commands against the
/// shared keyspace, writes replies.
#[derive(Debug)]
struct Handler<S> {
    db: Db,
    connection: Connection<S>,
    shutdown: ShutdownSignal,
}

/// Serve connections from `listener` until the `shutdown` future completes,
/// then stop accepting, raise the stop flag for every handler, and wait for
/// them to drain.
///
/// `tokio::signal::ctrl_c()` is the usual `shutdown` argument.
pub async fn run(listener: TcpListener, shutdown: impl Future) {
    let (stop_tx, stop_rx) = watch::channel(false);
    let (done_tx, mut done_rx) = mpsc::channel::<()>(1);

    let mut listener = Listener {
        db_holder: DbDropGuard::new(),
        listener,
        permits: Arc::new(Semaphore::new(MAX_CONNECTIONS)),
        stop_rx,
        done_tx,
    };

    tokio::select! {
        res = listener.serve() => {
            // only a dead accept loop lands here; per-connection errors
            // are logged from their own tasks
            if let Err(err) = res {
                error!(cause = %err, "accept loop gave up");
            }
        }
        _ = shutdown => {
            info!("shutting down");
        }
    }

    // Raise the stop flag, then drop our own end of the drain channel.
    // `recv` yields `None` once the last handler task, and with it the last
    // `done_tx` clone, is gone.
    let Listener { done_tx, .. } = listener;
    let _ = stop_tx.send(true);
    drop(done_tx);
    let _ = done_rx.recv().await;
}

impl Listener {
    /// Accept connections forever, spawning a handler task for each.
    ///
    /// Returns only when `accept` has failed past the whole backoff table.
    async fn serve(&mut self) -> Result<()> {
        info!("accepting inbound connections");

        loop {
            // the semaphore is never closed, so acquire cannot fail
            let permit = self.permits.clone().acquire_owned().await.unwrap();

            let socket = self.accept().await?;
            debug!("accepted inbound connection");

            let mut handler = Handler {
                db: self.db_holder.db(),
                connection: Connection::new(socket),
                shutdown: ShutdownSignal::new(self.stop_rx.clone()),
            };
            let done = self.done_tx.clone();

            tokio::spawn(async move {
                // `done` and `permit` ride along so the drain barrier and
                // the connection cap both release when this task ends
                let _done = done;
                let _permit = permit;
                if let Err(err) = handler.run().await {
                    error!(cause = %err, "connection error");
                }
            });
        }
    }

    /// One accept, retrying transient failures with growing pauses.
    async fn accept(&mut self) -> Result<TcpStream> {
        let mut backoff = ACCEPT_BACKOFF_SECS.iter();

        loop {
            match self.listener.accept().await {
                Ok((socket, _)) => return Ok(socket),
                Err(err) => match backoff.next() {
                    Some(&secs) => {
                        warn!(%err, "accept failed, retrying in {secs}s");
                        time::sleep(Duration::from_secs(secs)).await;
                    }
                    None => {
                        error!(%err, "accept kept failing, giving up");
                        return Err(err.into());
                    }
                },
            }
        }
    }
}

impl Handler<TcpStream> {
    /// Process a single connection.
    ///
    /// Request frames are read from the socket and processed strictly in
    /// order; the reply for frame N is fully written before frame N+1 is
    /// looked at. Frames the peer pipelines while a command runs simply wait
    /// in the read buffer.
    ///
    /// Recoverable failures (unknown verb, arity, syntax, wrong type, stream
    /// id rules) become `-ERR`/`-WRONGTYPE` replies and the connection keeps
    /// going. Broken RESP framing is fatal: the handler makes a best-effort
    /// attempt to report it, then hangs up.
    ///
    /// When the stop flag is raised, the connection is processed until it
    /// reaches a safe state, at which point it is terminated.
    #[tracing::instrument(skip_all)]
    async fn run(&mut self) -> Result<()> {
        while !self.shutdown.is_stopping() {
            let maybe_frame = tokio::select! {
                res = self.connection.read_frame() => res,
                _ = self.shutdown.wait() => return Ok(()),
            };

            let frame = match maybe_frame {
                // If `None` is returned from `read_frame()` then the peer
                // closed the socket. There is no further work to do.
                Ok(None) => return Ok(()),
                Ok(Some(frame)) => frame,
                Err(err @ Error::Protocol(_)) => {
                    // Broken framing: tell the peer, then hang up.
                    let reply = Frame::SimpleError("ERR Protocol error".to_string());
                    let _ = self.connection.write_frame(&reply).await;
                    return Err(err);
                }
                Err(err) => return Err(err),
            };

            // Convert the RESP frame into a command. Unknown verbs and bad
            // argument lists come back as recoverable errors and are
            // reported to the peer; the connection keeps serving.
            let cmd = match CommandVariant::from_frame(frame) {
                Ok(cmd) => cmd,
                Err(err) if err.is_recoverable() => {
                    let reply = err.into_reply()?;
                    debug!(?reply, "rejected command");
                    self.connection.write_frame(&reply).await?;
                    continue;
                }
                Err(err) => return Err(err),
            };

            debug!(?cmd);

            // Perform the work needed to apply the command. This may mutate
            // the database state as a result.
            //
            // The connection is passed into the apply function which allows
            // the command to write response frames directly to it. Blocking
            // commands also watch the connection and the stop flag while
            // suspended.
            cmd.apply(&self.db, &mut self.connection, &mut self.shutdown)
                .await?;
        }

        Ok(())
    }
}
