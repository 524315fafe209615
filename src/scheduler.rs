//! # Scheduler Core
//!
//! Fixed-quantum cooperative loops that interleave network processing, the
//! user application and the watchdog.
//!
//! In single-task mode one loop feeds the watchdog, runs the network step and
//! then the application step every quantum. In split mode the network side
//! runs [`run_process_task`] and the application side runs
//! [`run_application_task`] on separate executors; the application stays idle
//! until the network side fires the shared [`InitSignal`].
//!
//! ```ignore
//! static INIT: InitSignal = InitSignal::new();
//!
//! #[embassy_executor::task]
//! async fn network(node: &'static mut Node) -> ! {
//!     run_process_task(node, &INIT, QUANTUM).await
//! }
//!
//! #[embassy_executor::task]
//! async fn application(app: &'static mut App, wdt: &'static mut Wdt) -> ! {
//!     run_application_task(app, wdt, &INIT, QUANTUM).await
//! }
//! ```

use core::future::poll_fn;
use core::sync::atomic::{AtomicBool, Ordering};
use core::task::Poll;

use embassy_sync::waitqueue::AtomicWaker;
use embassy_time::{Duration, Ticker};

use crate::clock::Clock;
use crate::gateway::GatewayTransport;
use crate::link::NetworkLink;
use crate::message::SensorMessage;
use crate::outbox::{BufferedOutbox, MessageOutbox, Presenter};
use crate::session::Session;

/// Default scheduling quantum.
pub const QUANTUM: Duration = Duration::from_millis(1);

/// Upper bound of replies a [`MessageRouter`] may queue per inbound message.
pub const MAX_ROUTED_REPLIES: usize = 4;

/// The network-processing half of a node.
#[allow(async_fn_in_trait)]
pub trait NodeCore {
    /// One-time startup. May take long (link association, certificate load).
    async fn begin(&mut self);

    /// One network-processing step. Must return within a quantum or so.
    async fn process(&mut self);
}

/// The user application loop.
#[allow(async_fn_in_trait)]
pub trait Application {
    async fn step(&mut self);
}

/// Hardware or task watchdog.
pub trait Watchdog {
    fn feed(&mut self);
}

/// Watchdog for deployments without one.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoWatchdog;

impl Watchdog for NoWatchdog {
    fn feed(&mut self) {}
}

/// One-shot completion flag shared between the two split-mode tasks.
///
/// Written once by the network task after [`NodeCore::begin`]; the
/// application task awaits it instead of polling.
pub struct InitSignal {
    done: AtomicBool,
    waker: AtomicWaker,
}

impl InitSignal {
    pub const fn new() -> Self {
        Self {
            done: AtomicBool::new(false),
            waker: AtomicWaker::new(),
        }
    }

    /// Marks initialization as finished and wakes the waiter.
    pub fn complete(&self) {
        self.done.store(true, Ordering::Release);
        self.waker.wake();
    }

    pub fn is_complete(&self) -> bool {
        self.done.load(Ordering::Acquire)
    }

    /// Resolves once [`InitSignal::complete`] has been called.
    pub async fn wait(&self) {
        poll_fn(|cx| {
            if self.is_complete() {
                return Poll::Ready(());
            }
            self.waker.register(cx.waker());
            if self.is_complete() {
                Poll::Ready(())
            } else {
                Poll::Pending
            }
        })
        .await
    }
}

impl Default for InitSignal {
    fn default() -> Self {
        Self::new()
    }
}

/// Runs one single-task quantum: watchdog, network step, application step.
pub async fn run_quantum<N, A, W>(node: &mut N, app: &mut A, watchdog: &mut W)
where
    N: NodeCore,
    A: Application,
    W: Watchdog,
{
    watchdog.feed();
    node.process().await;
    app.step().await;
}

/// Single-task mode: begins the node, then runs [`run_quantum`] forever.
pub async fn run_single_task<N, A, W>(
    node: &mut N,
    app: &mut A,
    watchdog: &mut W,
    quantum: Duration,
) -> !
where
    N: NodeCore,
    A: Application,
    W: Watchdog,
{
    node.begin().await;
    let mut ticker = Ticker::every(quantum);
    loop {
        run_quantum(node, app, watchdog).await;
        ticker.next().await;
    }
}

/// Split mode, network side: begins the node, fires `init`, then processes
/// every quantum.
pub async fn run_process_task<N>(node: &mut N, init: &InitSignal, quantum: Duration) -> !
where
    N: NodeCore,
{
    node.begin().await;
    init.complete();
    let mut ticker = Ticker::every(quantum);
    loop {
        node.process().await;
        ticker.next().await;
    }
}

/// Split mode, application side: waits for `init`, then feeds the watchdog
/// and steps the application every quantum.
pub async fn run_application_task<A, W>(
    app: &mut A,
    watchdog: &mut W,
    init: &InitSignal,
    quantum: Duration,
) -> !
where
    A: Application,
    W: Watchdog,
{
    init.wait().await;
    let mut ticker = Ticker::every(quantum);
    loop {
        watchdog.feed();
        app.step().await;
        ticker.next().await;
    }
}

/// Consumer of inbound messages, normally the sensor-network router.
pub trait MessageRouter {
    /// Handles one inbound message. Replies queued into `replies` are
    /// published right after.
    fn route(&mut self, message: &SensorMessage, replies: &mut dyn MessageOutbox);
}

/// A [`NodeCore`] that drives a [`GatewayTransport`] and hands every fresh
/// inbound message to a [`MessageRouter`].
pub struct GatewayNode<'a, L, S, P, C, R> {
    transport: GatewayTransport<'a, L, S, P, C>,
    router: R,
}

impl<'a, L, S, P, C, R> GatewayNode<'a, L, S, P, C, R>
where
    L: NetworkLink,
    S: Session,
    P: Presenter,
    C: Clock,
    R: MessageRouter,
{
    pub fn new(transport: GatewayTransport<'a, L, S, P, C>, router: R) -> Self {
        Self { transport, router }
    }

    pub fn transport(&self) -> &GatewayTransport<'a, L, S, P, C> {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut GatewayTransport<'a, L, S, P, C> {
        &mut self.transport
    }
}

impl<L, S, P, C, R> NodeCore for GatewayNode<'_, L, S, P, C, R>
where
    L: NetworkLink,
    S: Session,
    P: Presenter,
    C: Clock,
    R: MessageRouter,
{
    async fn begin(&mut self) {
        if !self.transport.initialize() {
            warn!("gwt: node started without link bring-up");
        }
        self.transport.connect();
    }

    async fn process(&mut self) {
        if !self.transport.poll_available().await {
            return;
        }
        let message = self.transport.receive_last();
        let mut replies = BufferedOutbox::<MAX_ROUTED_REPLIES>::new();
        self.router.route(&message, &mut replies);
        for reply in replies.iter() {
            if !self.transport.send(reply).await {
                debug!("gwt: reply to node {} dropped", reply.node_id);
            }
        }
    }
}
