//! Transport handle and lifecycle.

use crate::config::{DisconnectCallback, TransportAttributes, TransportSettings};
use crate::error::TransportError;
use crate::ipc::{IpcKeys, Mailbox, SignalChannel};
use crate::qp::context::{CompletionCallback, Context, ErrorCallback};
use crate::qp::worker;
use crate::queue::WorkQueue;
use crossbeam_channel::RecvTimeoutError;
use parking_lot::{Condvar, Mutex};
use shmqp_core::{AccessFlags, Data, MemoryRegion, RemoteLocation, Role, State};
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU8, AtomicU32, AtomicU64, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Instant;

/// Which local work queue an operation targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Direction {
    Send,
    Receive,
}

/// Local work queues guarded by the transport lock.
#[derive(Debug)]
struct Queues {
    send: WorkQueue<Context>,
    recv: WorkQueue<Context>,
    /// Set once the transport is closing; posts fail and the sender exits.
    stop: bool,
}

impl Queues {
    fn get_mut(&mut self, direction: Direction) -> &mut WorkQueue<Context> {
        match direction {
            Direction::Send => &mut self.send,
            Direction::Receive => &mut self.recv,
        }
    }
}

/// Shared IPC objects of a connected transport.
#[derive(Debug)]
pub(crate) struct Link {
    pub(crate) mailbox: Mailbox,
    pub(crate) signals: SignalChannel,
}

impl Link {
    /// Removes every shared object, attempting all of them.
    fn remove(&self) -> Result<(), TransportError> {
        let mailbox = self.mailbox.remove();
        let signals = self.signals.remove();
        mailbox.and(signals)
    }
}

struct Inner {
    settings: TransportSettings,
    keys: IpcKeys,
    state: AtomicU8,
    queues: Mutex<Queues>,
    cond: Condvar,
    link: Mutex<Option<Arc<Link>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    disconnect: Mutex<Option<DisconnectCallback>>,
    /// Set by `destroy`; a link failure seen afterwards is not a disconnect.
    stopping: AtomicBool,
    next_key: AtomicU32,
    next_ticket: AtomicU64,
}

impl Drop for Inner {
    fn drop(&mut self) {
        if let Some(link) = self.link.get_mut().take()
            && let Err(err) = link.remove()
        {
            tracing::warn!(error = %err, "failed to release shared objects on drop");
        }
    }
}

/// One endpoint of a shared memory queue pair.
///
/// Cheap to clone; every clone drives the same endpoint. Completion,
/// error and disconnect callbacks receive a reference to it and may post
/// further work from inside the callback.
#[derive(Clone)]
pub struct Transport {
    inner: Arc<Inner>,
}

impl fmt::Debug for Transport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transport")
            .field("role", &self.role())
            .field("state", &self.state())
            .field("namespace", &self.inner.settings.namespace)
            .finish()
    }
}

impl Transport {
    /// Creates an unconnected transport.
    ///
    /// Zero timeout and queue depths are replaced by their defaults.
    ///
    /// # Errors
    /// Returns `Core(InvalidAttribute)` if the attributes are unusable.
    pub fn init(attributes: TransportAttributes) -> Result<Self, TransportError> {
        let (settings, disconnect) = attributes.resolve()?;
        let keys = IpcKeys::derive(&settings.namespace, &settings.shm_dir);
        tracing::debug!(
            role = %settings.role,
            namespace = %settings.namespace,
            timeout_us = settings.timeout.as_micros() as u64,
            sq_depth = settings.sq_depth,
            rq_depth = settings.rq_depth,
            "transport initialized"
        );
        let queues = Queues {
            send: WorkQueue::new(settings.sq_depth),
            recv: WorkQueue::new(settings.rq_depth),
            stop: false,
        };
        Ok(Self {
            inner: Arc::new(Inner {
                settings,
                keys,
                state: AtomicU8::new(State::Init as u8),
                queues: Mutex::new(queues),
                cond: Condvar::new(),
                link: Mutex::new(None),
                workers: Mutex::new(Vec::with_capacity(2)),
                disconnect: Mutex::new(disconnect),
                stopping: AtomicBool::new(false),
                next_key: AtomicU32::new(1),
                next_ticket: AtomicU64::new(1),
            }),
        })
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> State {
        State::from_u8(self.inner.state.load(Ordering::Acquire))
    }

    /// Role this transport was created with.
    #[must_use]
    pub fn role(&self) -> Role {
        self.inner.settings.role
    }

    /// Resolved settings.
    #[must_use]
    pub fn settings(&self) -> &TransportSettings {
        &self.inner.settings
    }

    /// Shared identifiers derived from the namespace.
    #[must_use]
    pub fn keys(&self) -> &IpcKeys {
        &self.inner.keys
    }

    /// Server address binding. Addressing is implicit in the namespace.
    ///
    /// # Errors
    /// Never fails.
    pub fn bind(&self) -> Result<(), TransportError> {
        Ok(())
    }

    /// Connection-manager thread. There are no connection events to watch.
    ///
    /// # Errors
    /// Never fails.
    pub fn start_monitor_thread(&self) -> Result<(), TransportError> {
        Ok(())
    }

    /// Client side of connection setup.
    ///
    /// Maps the mailbox, opens the signal channel, starts the worker
    /// threads and attaches to the mailbox. Follow with
    /// [`finalize_connect`](Self::finalize_connect).
    ///
    /// # Errors
    /// Returns `WrongRole` on a server, `InvalidState` unless in `Init`, or
    /// the IPC failure that stopped setup.
    pub fn connect(&self) -> Result<(), TransportError> {
        self.require_role(Role::Client)?;
        self.establish()
    }

    /// Server side of connection setup; returns the connected transport.
    ///
    /// Follow with [`finalize_accept`](Self::finalize_accept).
    ///
    /// # Errors
    /// Returns `WrongRole` on a client, `InvalidState` unless in `Init`, or
    /// the IPC failure that stopped setup.
    pub fn accept_one(&self) -> Result<Transport, TransportError> {
        self.require_role(Role::Server)?;
        self.establish()?;
        Ok(self.clone())
    }

    /// Completes the client rendezvous: waits for the server to attach, then
    /// takes the gate and waits for zero.
    ///
    /// # Errors
    /// Returns `ConnectTimeout` if the server does not finalize in time.
    pub fn finalize_connect(&self) -> Result<(), TransportError> {
        self.require_role(Role::Client)?;
        self.rendezvous(false)
    }

    /// Completes the server rendezvous: takes the gate, waits for zero and
    /// gives it back, leaving the gate free.
    ///
    /// # Errors
    /// Returns `ConnectTimeout` if the client does not finalize in time.
    pub fn finalize_accept(&self) -> Result<(), TransportError> {
        self.require_role(Role::Server)?;
        self.rendezvous(true)
    }

    /// Posts a send of `data`.
    ///
    /// Blocks while every send context is in use, up to the configured
    /// timeout. `on_complete` gets the data back once the message sits in the
    /// mailbox; `on_error` gets it back if the send cannot be carried out.
    ///
    /// # Errors
    /// Returns `FrameTooLarge` if `data` exceeds the mailbox capacity,
    /// `Timeout` if no context frees up in time, `NotConnected` or
    /// `ConnectionClosed` if the transport is not connected. The data is
    /// dropped on error.
    pub fn post_send<C, E>(
        &self,
        data: Data,
        mr: &MemoryRegion,
        on_complete: C,
        on_error: E,
    ) -> Result<(), TransportError>
    where
        C: FnOnce(&Transport, Data) + Send + 'static,
        E: FnOnce(&Transport, Data, TransportError) + Send + 'static,
    {
        self.check_send_size(&data)?;
        tracing::trace!(size = data.size(), lkey = mr.lkey(), "post send");
        self.submit(
            Direction::Send,
            data,
            Box::new(on_complete),
            Box::new(on_error),
        )
        .map(drop)
    }

    /// Posts a receive into `data`.
    ///
    /// Blocks while every receive context is in use, up to the configured
    /// timeout. Incoming messages fill posted receives in order.
    ///
    /// # Errors
    /// Returns `Timeout` if no context frees up in time, `NotConnected` or
    /// `ConnectionClosed` if the transport is not connected.
    pub fn post_receive<C, E>(
        &self,
        data: Data,
        mr: &MemoryRegion,
        on_complete: C,
        on_error: E,
    ) -> Result<(), TransportError>
    where
        C: FnOnce(&Transport, Data) + Send + 'static,
        E: FnOnce(&Transport, Data, TransportError) + Send + 'static,
    {
        tracing::trace!(max_size = data.max_size(), lkey = mr.lkey(), "post receive");
        self.submit(
            Direction::Receive,
            data,
            Box::new(on_complete),
            Box::new(on_error),
        )
        .map(drop)
    }

    /// Sends `data` and blocks until it sits in the mailbox.
    ///
    /// # Errors
    /// As [`post_send`](Self::post_send), plus `Timeout` if the send does not
    /// complete within the configured timeout.
    pub fn wait_send(&self, data: Data, mr: &MemoryRegion) -> Result<Data, TransportError> {
        self.check_send_size(&data)?;
        self.wait(Direction::Send, data, mr)
    }

    /// Posts a receive into `data` and blocks until a message fills it.
    ///
    /// # Errors
    /// As [`post_receive`](Self::post_receive), plus `Timeout` if no message
    /// arrives within the configured timeout.
    pub fn wait_receive(&self, data: Data, mr: &MemoryRegion) -> Result<Data, TransportError> {
        self.wait(Direction::Receive, data, mr)
    }

    /// One-sided read placeholder. Moves no bytes and never calls
    /// `on_complete`; `data` and the callback are dropped.
    ///
    /// # Errors
    /// Never fails.
    pub fn post_read<C>(
        &self,
        data: Data,
        rloc: &RemoteLocation,
        mr: &MemoryRegion,
        on_complete: C,
    ) -> Result<(), TransportError>
    where
        C: FnOnce(&Transport, Data) + Send + 'static,
    {
        tracing::trace!(raddr = rloc.raddr, rkey = rloc.rkey, lkey = mr.lkey(), "post read");
        drop((data, on_complete));
        Ok(())
    }

    /// One-sided write placeholder. Moves no bytes and never calls
    /// `on_complete`; `data` and the callback are dropped.
    ///
    /// # Errors
    /// Never fails.
    pub fn post_write<C>(
        &self,
        data: Data,
        rloc: &RemoteLocation,
        mr: &MemoryRegion,
        on_complete: C,
    ) -> Result<(), TransportError>
    where
        C: FnOnce(&Transport, Data) + Send + 'static,
    {
        tracing::trace!(raddr = rloc.raddr, rkey = rloc.rkey, lkey = mr.lkey(), "post write");
        drop((data, on_complete));
        Ok(())
    }

    /// Synchronous [`post_read`](Self::post_read); returns `data` untouched.
    ///
    /// # Errors
    /// Never fails.
    pub fn wait_read(
        &self,
        data: Data,
        rloc: &RemoteLocation,
        mr: &MemoryRegion,
    ) -> Result<Data, TransportError> {
        tracing::trace!(raddr = rloc.raddr, rkey = rloc.rkey, lkey = mr.lkey(), "wait read");
        Ok(data)
    }

    /// Synchronous [`post_write`](Self::post_write); returns `data` untouched.
    ///
    /// # Errors
    /// Never fails.
    pub fn wait_write(
        &self,
        data: Data,
        rloc: &RemoteLocation,
        mr: &MemoryRegion,
    ) -> Result<Data, TransportError> {
        tracing::trace!(raddr = rloc.raddr, rkey = rloc.rkey, lkey = mr.lkey(), "wait write");
        Ok(data)
    }

    /// Registers `buf` for transfers. The key is unique per transport.
    #[must_use]
    pub fn register_memory(&self, buf: &[u8], access: AccessFlags) -> MemoryRegion {
        let key = self.inner.next_key.fetch_add(1, Ordering::Relaxed);
        let mr = MemoryRegion::new(buf.as_ptr() as u64, buf.len() as u64, access, key);
        tracing::trace!(addr = mr.addr(), length = mr.length(), key, "memory registered");
        mr
    }

    /// Releases a registration.
    ///
    /// # Errors
    /// Never fails.
    pub fn deregister_memory(&self, mr: MemoryRegion) -> Result<(), TransportError> {
        tracing::trace!(key = mr.lkey(), "memory deregistered");
        Ok(())
    }

    /// Describes `size` bytes at `addr` for the peer, keyed by `mr`.
    ///
    /// # Errors
    /// Never fails.
    pub fn make_remote_location(
        &self,
        mr: &MemoryRegion,
        addr: u64,
        size: u32,
    ) -> Result<RemoteLocation, TransportError> {
        Ok(mr.remote_location(addr, size))
    }

    /// Tears the transport down. Safe to call more than once.
    ///
    /// Stops both workers, removes the mailbox and every semaphore set, and
    /// fails still-queued work with `ConnectionClosed`. The local disconnect
    /// callback is not called.
    ///
    /// # Errors
    /// Returns the first failure to remove a shared object. Teardown still
    /// runs to the end.
    pub fn destroy(&self) -> Result<(), TransportError> {
        if self.inner.stopping.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        tracing::debug!(role = %self.role(), "destroying transport");
        self.close();

        let link = self.inner.link.lock().take();
        let removed = match link {
            Some(link) => link.remove(),
            None => Ok(()),
        };

        self.join_workers();

        self.fail_pending(Direction::Send);
        self.fail_pending(Direction::Receive);
        drop(self.inner.disconnect.lock().take());
        removed
    }

    fn require_role(&self, expected: Role) -> Result<(), TransportError> {
        if self.role() == expected {
            Ok(())
        } else {
            Err(TransportError::WrongRole { expected })
        }
    }

    fn ensure_connected(&self) -> Result<(), TransportError> {
        match self.state() {
            State::Connected => Ok(()),
            State::Init => Err(TransportError::NotConnected),
            State::Closed => Err(TransportError::ConnectionClosed),
        }
    }

    fn check_send_size(&self, data: &Data) -> Result<(), TransportError> {
        let max = self.inner.settings.mailbox_capacity;
        if data.size() > max {
            return Err(TransportError::frame_too_large(data.size(), max));
        }
        Ok(())
    }

    fn link(&self) -> Result<Arc<Link>, TransportError> {
        match self.inner.link.lock().as_ref() {
            Some(link) => Ok(Arc::clone(link)),
            None => match self.state() {
                State::Closed => Err(TransportError::ConnectionClosed),
                _ => Err(TransportError::NotConnected),
            },
        }
    }

    fn establish(&self) -> Result<(), TransportError> {
        let mut slot = self.inner.link.lock();
        let state = self.state();
        if state != State::Init || slot.is_some() {
            return Err(TransportError::InvalidState {
                expected: State::Init,
                actual: state,
            });
        }

        let settings = &self.inner.settings;
        let keys = &self.inner.keys;
        let mailbox = Mailbox::open(
            keys.mailbox_path(),
            settings.mailbox_capacity,
            keys.mailbox_sem(),
        )?;
        let signals = match SignalChannel::open(keys, settings.role) {
            Ok(signals) => signals,
            Err(err) => {
                if let Err(cleanup) = mailbox.remove() {
                    tracing::warn!(error = %cleanup, "mailbox cleanup failed");
                }
                return Err(err);
            }
        };
        let link = Arc::new(Link { mailbox, signals });
        self.inner
            .state
            .store(State::Connected as u8, Ordering::Release);

        if let Err(err) = self
            .spawn_workers(&link)
            .and_then(|()| link.mailbox.attach())
        {
            tracing::error!(error = %err, "connection setup failed");
            self.abort_setup(&link);
            return Err(err);
        }

        *slot = Some(link);
        tracing::debug!(
            role = %settings.role,
            mailbox = %keys.mailbox_path().display(),
            "transport connected"
        );
        Ok(())
    }

    fn spawn_workers(&self, link: &Arc<Link>) -> Result<(), TransportError> {
        let mut workers = self.inner.workers.lock();

        let transport = self.clone();
        let shared = Arc::clone(link);
        workers.push(
            thread::Builder::new()
                .name("shmqp-sender".into())
                .spawn(move || worker::run_sender(&transport, &shared))?,
        );

        let transport = self.clone();
        let shared = Arc::clone(link);
        workers.push(
            thread::Builder::new()
                .name("shmqp-receiver".into())
                .spawn(move || worker::run_receiver(&transport, &shared))?,
        );
        Ok(())
    }

    /// Joins and forgets the worker threads, returning how many panicked.
    fn join_workers(&self) -> usize {
        let current = thread::current().id();
        let workers = std::mem::take(&mut *self.inner.workers.lock());
        let mut panicked = 0;
        for handle in workers {
            // Destroy may run from a callback on a worker thread.
            if handle.thread().id() == current {
                continue;
            }
            if handle.join().is_err() {
                tracing::error!("worker thread panicked");
                panicked += 1;
            }
        }
        panicked
    }

    /// Undoes a half-finished `establish`, returning to `Init`.
    fn abort_setup(&self, link: &Link) {
        self.inner.stopping.store(true, Ordering::Release);
        {
            let mut queues = self.inner.queues.lock();
            queues.stop = true;
            self.inner.cond.notify_all();
        }
        if let Err(err) = link.remove() {
            tracing::warn!(error = %err, "cleanup after failed setup incomplete");
        }
        self.join_workers();
        self.inner.queues.lock().stop = false;
        self.inner.stopping.store(false, Ordering::Release);
        self.inner.state.store(State::Init as u8, Ordering::Release);
    }

    fn rendezvous(&self, restore: bool) -> Result<(), TransportError> {
        let state = self.state();
        if state != State::Connected {
            return Err(TransportError::InvalidState {
                expected: State::Connected,
                actual: state,
            });
        }
        let link = self.link()?;
        link.mailbox.rendezvous(restore, self.inner.settings.timeout)?;
        tracing::debug!(role = %self.role(), "connection finalized");
        Ok(())
    }

    /// Parks a context on `direction`'s queue and returns its ticket.
    fn submit(
        &self,
        direction: Direction,
        data: Data,
        on_complete: CompletionCallback,
        on_error: ErrorCallback,
    ) -> Result<u64, TransportError> {
        self.ensure_connected()?;
        let ticket = self.inner.next_ticket.fetch_add(1, Ordering::Relaxed);
        let mut context = Context::new(ticket, data, on_complete, on_error);
        let deadline = Instant::now() + self.inner.settings.timeout;

        let mut queues = self.inner.queues.lock();
        loop {
            if queues.stop {
                return Err(TransportError::ConnectionClosed);
            }
            match queues.get_mut(direction).post(context) {
                Ok(()) => break,
                Err(returned) => context = returned,
            }
            if self
                .inner
                .cond
                .wait_until(&mut queues, deadline)
                .timed_out()
            {
                tracing::debug!(?direction, "post timed out waiting for a free context");
                return Err(TransportError::Timeout);
            }
        }
        if direction == Direction::Send {
            self.inner.cond.notify_all();
        }
        Ok(ticket)
    }

    fn wait(
        &self,
        direction: Direction,
        data: Data,
        mr: &MemoryRegion,
    ) -> Result<Data, TransportError> {
        let (tx, rx) = crossbeam_channel::bounded(1);
        let err_tx = tx.clone();
        tracing::trace!(?direction, lkey = mr.lkey(), "synchronous post");
        let ticket = self.submit(
            direction,
            data,
            Box::new(move |_: &Transport, data: Data| {
                let _ = tx.send(Ok(data));
            }),
            Box::new(move |_: &Transport, _: Data, err: TransportError| {
                let _ = err_tx.send(Err(err));
            }),
        )?;

        match rx.recv_timeout(self.inner.settings.timeout) {
            Ok(result) => result,
            Err(RecvTimeoutError::Disconnected) => Err(TransportError::ConnectionClosed),
            Err(RecvTimeoutError::Timeout) => {
                let cancelled = {
                    let mut queues = self.inner.queues.lock();
                    let cancelled = queues
                        .get_mut(direction)
                        .cancel(|context| context.ticket == ticket);
                    self.inner.cond.notify_all();
                    cancelled
                };
                match cancelled {
                    Some(_) => Err(TransportError::Timeout),
                    // Already picked up by the worker; it may have just finished.
                    None => rx.try_recv().unwrap_or(Err(TransportError::Timeout)),
                }
            }
        }
    }

    /// Moves to `Closed` and wakes everything blocked on the local lock.
    fn close(&self) {
        let mut queues = self.inner.queues.lock();
        queues.stop = true;
        self.inner
            .state
            .store(State::Closed as u8, Ordering::Release);
        self.inner.cond.notify_all();
    }

    fn fail_pending(&self, direction: Direction) {
        let drained = self.inner.queues.lock().get_mut(direction).drain();
        if !drained.is_empty() {
            tracing::debug!(?direction, count = drained.len(), "failing queued work");
            self.inner.cond.notify_all();
        }
        for context in drained {
            context.fail(self, TransportError::ConnectionClosed);
        }
    }

    /// Blocks until a send is queued or the transport stops.
    pub(crate) fn next_send(&self) -> Option<(usize, Context)> {
        let mut queues = self.inner.queues.lock();
        loop {
            if queues.stop {
                return None;
            }
            if let Some(next) = queues.send.next() {
                return Some(next);
            }
            self.inner.cond.wait(&mut queues);
        }
    }

    /// Takes the head receive, if any is posted.
    pub(crate) fn next_receive(&self) -> Option<(usize, Context)> {
        self.inner.queues.lock().recv.next()
    }

    /// Frees a context once its callback has returned.
    pub(crate) fn recycle(&self, direction: Direction, index: usize) {
        let mut queues = self.inner.queues.lock();
        queues.get_mut(direction).complete(index);
        self.inner.cond.notify_all();
    }

    /// Worker exit path: closes the transport, fails what is still queued
    /// on `direction`, and reports a peer disconnect once.
    pub(crate) fn on_link_failure(&self, direction: Direction) {
        let local = self.inner.stopping.load(Ordering::Acquire);
        self.close();
        self.fail_pending(direction);
        if local {
            return;
        }
        let callback = self.inner.disconnect.lock().take();
        if let Some(callback) = callback {
            tracing::debug!(role = %self.role(), "peer disconnected");
            callback(self);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shmqp_core::CoreError;
    use std::sync::atomic::AtomicUsize;
    use std::sync::mpsc;
    use std::time::Duration;
    use tempfile::{TempDir, tempdir};

    const WAIT: Duration = Duration::from_secs(5);

    fn init_tracing() {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    }

    fn namespace(test: &str) -> String {
        format!("qp-{}-{test}", std::process::id())
    }

    fn mr(transport: &Transport) -> MemoryRegion {
        transport.register_memory(&[], AccessFlags::LOCAL_WRITE)
    }

    /// Connects and finalizes a server/client pair sharing one namespace.
    fn pair_with(
        test: &str,
        server: TransportAttributes,
        client: TransportAttributes,
    ) -> (TempDir, Transport, Transport) {
        init_tracing();
        let dir = tempdir().unwrap();
        let ns = namespace(test);
        let server = Transport::init(server.namespace(&ns).shm_dir(dir.path())).unwrap();
        let client = Transport::init(client.namespace(&ns).shm_dir(dir.path())).unwrap();

        let server = server.accept_one().unwrap();
        client.connect().unwrap();
        let finalizer = {
            let server = server.clone();
            thread::spawn(move || server.finalize_accept())
        };
        client.finalize_connect().unwrap();
        finalizer.join().unwrap().unwrap();
        (dir, server, client)
    }

    fn pair(test: &str) -> (TempDir, Transport, Transport) {
        pair_with(test, TransportAttributes::server(), TransportAttributes::client())
    }

    fn fail_test(_: &Transport, _: Data, err: TransportError) {
        panic!("unexpected work request failure: {err}");
    }

    #[test]
    fn test_init_defaults() {
        let transport = Transport::init(TransportAttributes::client()).unwrap();
        assert_eq!(transport.state(), State::Init);
        assert_eq!(transport.role(), Role::Client);
        assert_eq!(transport.settings().sq_depth, 5);
        assert_eq!(transport.settings().rq_depth, 5);
        assert_eq!(transport.settings().timeout, Duration::from_micros(3_000_000));
        assert!(transport.bind().is_ok());
        assert!(transport.start_monitor_thread().is_ok());
    }

    #[test]
    fn test_init_rejects_invalid_attributes() {
        let err = Transport::init(TransportAttributes::client().namespace("")).unwrap_err();
        assert!(matches!(
            err,
            TransportError::Core(CoreError::InvalidAttribute {
                name: "namespace",
                ..
            })
        ));
    }

    #[test]
    fn test_wrong_role_rejected() {
        let client = Transport::init(TransportAttributes::client()).unwrap();
        let server = Transport::init(TransportAttributes::server()).unwrap();
        assert!(matches!(
            client.accept_one(),
            Err(TransportError::WrongRole {
                expected: Role::Server
            })
        ));
        assert!(matches!(
            server.connect(),
            Err(TransportError::WrongRole {
                expected: Role::Client
            })
        ));
        assert_eq!(client.state(), State::Init);
    }

    #[test]
    fn test_post_before_connect_fails() {
        let client = Transport::init(TransportAttributes::client()).unwrap();
        let mr = mr(&client);
        let err = client
            .post_send(Data::from("hello"), &mr, |_, _| {}, |_, _, _| {})
            .unwrap_err();
        assert!(matches!(err, TransportError::NotConnected));
        assert!(matches!(
            client.finalize_connect(),
            Err(TransportError::InvalidState {
                expected: State::Connected,
                actual: State::Init
            })
        ));
    }

    #[test]
    fn test_finalize_leaves_gate_at_one() {
        let (_dir, server, client) = pair("gate");
        assert_eq!(server.state(), State::Connected);
        assert_eq!(client.state(), State::Connected);
        let link = server.link().unwrap();
        assert_eq!(link.mailbox.gate_value().unwrap(), 1);
        assert_eq!(link.mailbox.vacancy_value().unwrap(), 1);
        client.destroy().unwrap();
        server.destroy().unwrap();
    }

    #[test]
    fn test_connect_twice_rejected() {
        let (_dir, server, client) = pair("twice");
        assert!(matches!(
            client.connect(),
            Err(TransportError::InvalidState {
                expected: State::Init,
                actual: State::Connected
            })
        ));
        client.destroy().unwrap();
        server.destroy().unwrap();
    }

    #[test]
    fn test_finalize_times_out_without_peer() {
        let dir = tempdir().unwrap();
        let server = Transport::init(
            TransportAttributes::server()
                .namespace(namespace("lonely"))
                .shm_dir(dir.path())
                .timeout(Duration::from_millis(50)),
        )
        .unwrap();
        let server = server.accept_one().unwrap();
        assert!(matches!(
            server.finalize_accept(),
            Err(TransportError::ConnectTimeout)
        ));
        server.destroy().unwrap();
    }

    #[test]
    fn test_hello_round_trip() {
        let (_dir, server, client) = pair("hello");
        let (tx, rx) = mpsc::channel();
        server
            .post_receive(
                Data::with_capacity(64),
                &mr(&server),
                move |_, data| tx.send(data).unwrap(),
                fail_test,
            )
            .unwrap();

        let sent = client.wait_send(Data::from("hello"), &mr(&client)).unwrap();
        assert_eq!(sent.as_slice(), b"hello");

        let received = rx.recv_timeout(WAIT).unwrap();
        assert_eq!(received.size(), 5);
        assert_eq!(received.as_slice(), b"hello");
        client.destroy().unwrap();
        server.destroy().unwrap();
    }

    #[test]
    fn test_wait_receive_gets_reply() {
        let (_dir, server, client) = pair("reply");
        let replier = {
            let server = server.clone();
            thread::spawn(move || {
                let request = server
                    .wait_receive(Data::with_capacity(32), &mr(&server))
                    .unwrap();
                let mut reply = request.as_slice().to_vec();
                reply.reverse();
                server.wait_send(Data::from(reply), &mr(&server)).unwrap();
            })
        };

        let (tx, rx) = mpsc::channel();
        client
            .post_receive(
                Data::with_capacity(32),
                &mr(&client),
                move |_, data| tx.send(data).unwrap(),
                fail_test,
            )
            .unwrap();
        // The server has to have its receive posted before the request lands.
        let mut sent = None;
        for _ in 0..100 {
            if server.inner.queues.lock().recv.has_pending() {
                sent = Some(client.wait_send(Data::from("ping"), &mr(&client)).unwrap());
                break;
            }
            thread::sleep(Duration::from_millis(5));
        }
        assert!(sent.is_some());

        replier.join().unwrap();
        assert_eq!(rx.recv_timeout(WAIT).unwrap().as_slice(), b"gnip");
        client.destroy().unwrap();
        server.destroy().unwrap();
    }

    #[test]
    fn test_messages_delivered_in_fifo_order() {
        let (_dir, server, client) = pair("fifo");
        let (tx, rx) = mpsc::channel();
        for _ in 0..5 {
            let tx = tx.clone();
            server
                .post_receive(
                    Data::with_capacity(16),
                    &mr(&server),
                    move |_, data| tx.send(data.as_slice().to_vec()).unwrap(),
                    fail_test,
                )
                .unwrap();
        }
        for i in 0..5u8 {
            client
                .post_send(Data::from(vec![i; 3]), &mr(&client), |_, _| {}, fail_test)
                .unwrap();
        }
        let received: Vec<Vec<u8>> = (0..5).map(|_| rx.recv_timeout(WAIT).unwrap()).collect();
        let expected: Vec<Vec<u8>> = (0..5u8).map(|i| vec![i; 3]).collect();
        assert_eq!(received, expected);
        client.destroy().unwrap();
        server.destroy().unwrap();
    }

    #[test]
    fn test_send_completions_follow_post_order() {
        let (_dir, server, client) = pair("send-order");
        for _ in 0..5 {
            server
                .post_receive(Data::with_capacity(16), &mr(&server), |_, _| {}, fail_test)
                .unwrap();
        }
        let (tx, rx) = mpsc::channel();
        for i in 0..5u8 {
            let tx = tx.clone();
            client
                .post_send(
                    Data::from(vec![i]),
                    &mr(&client),
                    move |_, _| tx.send(i).unwrap(),
                    fail_test,
                )
                .unwrap();
        }
        let completed: Vec<u8> = (0..5).map(|_| rx.recv_timeout(WAIT).unwrap()).collect();
        assert_eq!(completed, vec![0, 1, 2, 3, 4]);
        client.destroy().unwrap();
        server.destroy().unwrap();
    }

    #[test]
    fn test_post_blocks_while_context_in_use() {
        let (_dir, server, client) = pair_with(
            "backpressure",
            TransportAttributes::server(),
            TransportAttributes::client().sq_depth(1),
        );
        let (release_tx, release_rx) = mpsc::channel::<()>();
        let (entered_tx, entered_rx) = mpsc::channel();
        client
            .post_send(
                Data::from("first"),
                &mr(&client),
                move |_, _| {
                    entered_tx.send(()).unwrap();
                    release_rx.recv().unwrap();
                },
                fail_test,
            )
            .unwrap();
        entered_rx.recv_timeout(WAIT).unwrap();

        let second = {
            let client = client.clone();
            thread::spawn(move || {
                let mr = mr(&client);
                client.post_send(Data::from("second"), &mr, |_, _| {}, fail_test)
            })
        };
        thread::sleep(Duration::from_millis(50));
        assert!(!second.is_finished());

        release_tx.send(()).unwrap();
        second.join().unwrap().unwrap();
        client.destroy().unwrap();
        server.destroy().unwrap();
    }

    #[test]
    fn test_post_times_out_when_queue_stays_full() {
        let (_dir, server, client) = pair_with(
            "post-timeout",
            TransportAttributes::server().timeout(Duration::from_millis(200)),
            TransportAttributes::client()
                .timeout(Duration::from_millis(200))
                .rq_depth(1),
        );
        client
            .post_receive(Data::with_capacity(8), &mr(&client), |_, _| {}, |_, _, _| {})
            .unwrap();
        let err = client
            .post_receive(Data::with_capacity(8), &mr(&client), |_, _| {}, |_, _, _| {})
            .unwrap_err();
        assert!(matches!(err, TransportError::Timeout));
        client.destroy().unwrap();
        server.destroy().unwrap();
    }

    #[test]
    fn test_wait_receive_times_out_and_withdraws() {
        let (_dir, server, client) = pair_with(
            "wait-timeout",
            TransportAttributes::server().timeout(Duration::from_millis(200)),
            TransportAttributes::client().timeout(Duration::from_millis(200)),
        );
        let err = server
            .wait_receive(Data::with_capacity(8), &mr(&server))
            .unwrap_err();
        assert!(matches!(err, TransportError::Timeout));
        assert!(!server.inner.queues.lock().recv.has_pending());
        client.destroy().unwrap();
        server.destroy().unwrap();
    }

    #[test]
    fn test_bidirectional_without_torn_payloads() {
        const COUNT: usize = 8;
        let (_dir, server, client) = pair_with(
            "bidir",
            TransportAttributes::server().sq_depth(COUNT).rq_depth(COUNT),
            TransportAttributes::client().sq_depth(COUNT).rq_depth(COUNT),
        );

        let collect = |transport: &Transport| {
            let (tx, rx) = mpsc::channel();
            for _ in 0..COUNT {
                let tx = tx.clone();
                transport
                    .post_receive(
                        Data::with_capacity(4096),
                        &mr(transport),
                        move |_, data| tx.send(data.as_slice().to_vec()).unwrap(),
                        fail_test,
                    )
                    .unwrap();
            }
            rx
        };
        let at_server = collect(&server);
        let at_client = collect(&client);

        let blast = |transport: &Transport, tag: u8| {
            let transport = transport.clone();
            thread::spawn(move || {
                let mr = mr(&transport);
                for i in 0..COUNT {
                    let payload = vec![tag.wrapping_add(i as u8); 1000 + i * 100];
                    transport.post_send(Data::from(payload), &mr, |_, _| {}, fail_test).unwrap();
                }
            })
        };
        let from_server = blast(&server, 0x10);
        let from_client = blast(&client, 0x80);
        from_server.join().unwrap();
        from_client.join().unwrap();

        for (rx, tag) in [(&at_server, 0x80u8), (&at_client, 0x10u8)] {
            for i in 0..COUNT {
                let payload = rx.recv_timeout(WAIT).unwrap();
                assert_eq!(payload.len(), 1000 + i * 100);
                let expected = tag.wrapping_add(i as u8);
                assert!(payload.iter().all(|&b| b == expected));
            }
        }
        client.destroy().unwrap();
        server.destroy().unwrap();
    }

    #[test]
    fn test_oversized_send_rejected() {
        let (_dir, server, client) = pair_with(
            "oversized",
            TransportAttributes::server().mailbox_capacity(16),
            TransportAttributes::client().mailbox_capacity(16),
        );
        let err = client
            .post_send(Data::from(vec![0u8; 32]), &mr(&client), |_, _| {}, |_, _, _| {})
            .unwrap_err();
        assert!(matches!(err, TransportError::FrameTooLarge { size: 32, max: 16 }));
        client.destroy().unwrap();
        server.destroy().unwrap();
    }

    #[test]
    fn test_short_receive_buffer_fails_context_only() {
        let (_dir, server, client) = pair("short");
        let (err_tx, err_rx) = mpsc::channel();
        server
            .post_receive(
                Data::with_capacity(4),
                &mr(&server),
                |_, _| panic!("short buffer must not complete"),
                move |_, _, err| err_tx.send(err).unwrap(),
            )
            .unwrap();
        let (tx, rx) = mpsc::channel();
        server
            .post_receive(
                Data::with_capacity(64),
                &mr(&server),
                move |_, data| tx.send(data).unwrap(),
                fail_test,
            )
            .unwrap();

        client.wait_send(Data::from("0123456789"), &mr(&client)).unwrap();
        client.wait_send(Data::from("next"), &mr(&client)).unwrap();

        let err = err_rx.recv_timeout(WAIT).unwrap();
        assert!(matches!(err, TransportError::FrameTooLarge { size: 10, max: 4 }));
        assert_eq!(rx.recv_timeout(WAIT).unwrap().as_slice(), b"next");
        assert_eq!(server.state(), State::Connected);
        client.destroy().unwrap();
        server.destroy().unwrap();
    }

    #[test]
    fn test_post_after_destroy_fails() {
        let (_dir, server, client) = pair("after-destroy");
        client.destroy().unwrap();
        assert_eq!(client.state(), State::Closed);
        let err = client
            .post_send(Data::from("late"), &mr(&client), |_, _| {}, |_, _, _| {})
            .unwrap_err();
        assert!(matches!(err, TransportError::ConnectionClosed));
        let err = client
            .post_receive(Data::with_capacity(8), &mr(&client), |_, _| {}, |_, _, _| {})
            .unwrap_err();
        assert!(matches!(err, TransportError::ConnectionClosed));
        client.destroy().unwrap();
        server.destroy().unwrap();
    }

    #[test]
    fn test_destroy_fails_queued_receives() {
        let (_dir, server, client) = pair("drain");
        let (tx, rx) = mpsc::channel();
        client
            .post_receive(
                Data::with_capacity(8),
                &mr(&client),
                |_, _| panic!("nothing was sent"),
                move |_, data, err| tx.send((data.max_size(), err)).unwrap(),
            )
            .unwrap();
        client.destroy().unwrap();
        let (max_size, err) = rx.recv_timeout(WAIT).unwrap();
        assert_eq!(max_size, 8);
        assert!(matches!(err, TransportError::ConnectionClosed));
        server.destroy().unwrap();
    }

    #[test]
    fn test_peer_destroy_fires_disconnect_once() {
        let server_calls = Arc::new(AtomicUsize::new(0));
        let client_calls = Arc::new(AtomicUsize::new(0));
        let (tx, rx) = mpsc::channel();
        let server_attrs = {
            let calls = Arc::clone(&server_calls);
            TransportAttributes::server().on_disconnect(move |transport| {
                calls.fetch_add(1, Ordering::SeqCst);
                tx.send(transport.state()).unwrap();
            })
        };
        let client_attrs = {
            let calls = Arc::clone(&client_calls);
            TransportAttributes::client().on_disconnect(move |_| {
                calls.fetch_add(1, Ordering::SeqCst);
            })
        };
        let (_dir, server, client) = pair_with("disconnect", server_attrs, client_attrs);

        client.destroy().unwrap();
        assert_eq!(rx.recv_timeout(WAIT).unwrap(), State::Closed);
        assert_eq!(server.state(), State::Closed);

        server.destroy().unwrap();
        thread::sleep(Duration::from_millis(20));
        assert_eq!(server_calls.load(Ordering::SeqCst), 1);
        assert_eq!(client_calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_destroy_from_completion_callback() {
        let (_dir, server, client) = pair("self-destroy");
        let (tx, rx) = mpsc::channel();
        server
            .post_receive(
                Data::with_capacity(16),
                &mr(&server),
                move |transport, _| tx.send(transport.destroy().is_ok()).unwrap(),
                fail_test,
            )
            .unwrap();
        client.wait_send(Data::from("bye"), &mr(&client)).unwrap();
        assert!(rx.recv_timeout(WAIT).unwrap());
        assert_eq!(server.state(), State::Closed);
        client.destroy().unwrap();
    }

    #[test]
    fn test_one_sided_placeholders_always_succeed() {
        let transport = Transport::init(TransportAttributes::client()).unwrap();
        let buf = [0u8; 64];
        let mr = transport.register_memory(&buf, AccessFlags::REMOTE_READ | AccessFlags::REMOTE_WRITE);
        let rloc = transport.make_remote_location(&mr, mr.addr() + 8, 16).unwrap();
        assert_eq!(rloc.rkey, mr.rkey());

        let (tx, rx) = mpsc::channel();
        let read_tx = tx.clone();
        transport
            .post_read(Data::from("keep"), &rloc, &mr, move |_, data| {
                read_tx.send(data).unwrap();
            })
            .unwrap();
        transport
            .post_write(Data::from("keep"), &rloc, &mr, move |_, data| {
                tx.send(data).unwrap();
            })
            .unwrap();
        assert!(matches!(rx.try_recv(), Err(mpsc::TryRecvError::Disconnected)));

        let data = transport.wait_read(Data::from("same"), &rloc, &mr).unwrap();
        assert_eq!(data.as_slice(), b"same");
        assert!(transport.wait_write(Data::with_capacity(4), &rloc, &mr).is_ok());
        transport.deregister_memory(mr).unwrap();
    }

    #[test]
    fn test_one_sided_placeholders_succeed_after_destroy() {
        let (_dir, server, client) = pair("one-sided");
        let buf = [0u8; 16];
        let mr = client.register_memory(&buf, AccessFlags::REMOTE_READ);
        let rloc = client.make_remote_location(&mr, mr.addr(), 16).unwrap();
        client.destroy().unwrap();

        assert!(client.post_read(Data::with_capacity(4), &rloc, &mr, |_, _| {}).is_ok());
        assert!(client.wait_write(Data::with_capacity(4), &rloc, &mr).is_ok());
        server.destroy().unwrap();
    }

    #[test]
    fn test_join_workers_reports_panics() {
        let transport = Transport::init(TransportAttributes::client()).unwrap();
        {
            let mut workers = transport.inner.workers.lock();
            workers.push(thread::spawn(|| {}));
            workers.push(thread::spawn(|| panic!("worker failure")));
        }
        assert_eq!(transport.join_workers(), 1);
        assert!(transport.inner.workers.lock().is_empty());
        assert_eq!(transport.join_workers(), 0);
    }

    #[test]
    fn test_register_memory_keys_are_unique() {
        let transport = Transport::init(TransportAttributes::client()).unwrap();
        let buf = vec![0u8; 32];
        let first = transport.register_memory(&buf, AccessFlags::LOCAL_WRITE);
        let second = transport.register_memory(&buf, AccessFlags::LOCAL_WRITE);
        assert_ne!(first.lkey(), second.lkey());
        assert_eq!(first.length(), 32);
        let rloc = transport
            .make_remote_location(&first, first.addr() + 30, 8)
            .unwrap();
        assert_eq!(rloc.raddr, first.addr() + 30);
        assert_eq!(rloc.rkey, first.rkey());
    }
}
