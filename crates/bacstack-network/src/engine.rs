//! The NPDU routing engine.
//!
//! [`NetworkLayer`] sits between an application binding and any number of
//! attached link-layer adapters. Locally addressed traffic is framed and
//! handed to the right adapter; remote traffic is forwarded through
//! routers learned from I-Am-Router-To-Network announcements, with
//! Who-Is-Router-To-Network discovery when no path is known yet. Frames
//! arriving from the adapters are delivered upstream, relayed toward
//! their destination network, or consumed as network-layer messages.

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use bacstack_core::encoding::{Reader, Writer};
use bacstack_core::npdu::{
    NetworkMessage, NetworkPriority, Npci, NpduAddress, RejectReason, RoutingTableEntry,
    DEFAULT_HOP_COUNT, GLOBAL_BROADCAST_NETWORK,
};
use bacstack_core::{Address, AddressKind, Mac, Pdu};
use bacstack_datalink::{Confirmations, Sink, Source, Upstream};
use tokio::sync::{mpsc, oneshot, watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout, Duration};

use crate::cache::{RouterInfo, RouterInfoCache, RouterStatus};
use crate::error::NetworkError;

/// Largest NPDU a BACnet/IP frame can carry.
const MAX_NPDU_LEN: usize = 1497;
/// How long a Who-Is-Router-To-Network discovery stays pending.
const DISCOVERY_TIMEOUT: Duration = Duration::from_secs(2);
/// Reply window for Initialize-Routing-Table and What-Is-Network-Number.
const DIAGNOSTIC_TIMEOUT: Duration = Duration::from_secs(3);
const EVENT_QUEUE_DEPTH: usize = 64;

enum Event {
    Inbound { adapter: usize, pdu: Pdu },
    DiscoveryExpired { network: u16, generation: u64 },
}

#[derive(Debug, Clone, Copy)]
enum DiscoveryOutcome {
    Found,
    Failed(RejectReason),
    TimedOut,
}

/// A frame held back until its destination network resolves.
struct QueuedRelay {
    arrival_adapter: usize,
    reply_to: Mac,
    npdu: Vec<u8>,
    expecting_reply: bool,
    priority: NetworkPriority,
}

struct Discovery {
    generation: u64,
    outcome: watch::Sender<Option<DiscoveryOutcome>>,
    queued: Vec<QueuedRelay>,
}

#[derive(Debug, Clone, Copy)]
struct AdapterNetwork {
    number: Option<u16>,
    configured: bool,
}

struct Adapter<L> {
    link: L,
    network: Mutex<AdapterNetwork>,
}

struct IrtPending {
    from: Mac,
    reply: oneshot::Sender<Vec<RoutingTableEntry>>,
}

struct NumberPending {
    adapter: usize,
    reply: oneshot::Sender<u16>,
}

struct EngineState<L> {
    adapters: Vec<Adapter<L>>,
    local_adapter: usize,
    upstream: Upstream,
    events: mpsc::Sender<Event>,
    routers: Mutex<RouterInfoCache>,
    discoveries: Mutex<HashMap<u16, Discovery>>,
    next_generation: AtomicU64,
    irt_pending: Mutex<Option<IrtPending>>,
    number_pending: Mutex<Option<NumberPending>>,
}

/// Composes adapters into a [`NetworkLayer`].
pub struct NetworkBuilder<L> {
    upstream: Upstream,
    adapters: Vec<Adapter<L>>,
    inbounds: Vec<Confirmations>,
    local_adapter: usize,
}

impl<L: Sink> NetworkBuilder<L> {
    pub fn new(upstream: Upstream) -> Self {
        NetworkBuilder {
            upstream,
            adapters: Vec::new(),
            inbounds: Vec::new(),
            local_adapter: 0,
        }
    }

    /// Attaches a link as the next adapter and returns its index.
    ///
    /// `network` is the adapter's network number when administratively
    /// known; leave it `None` to learn it from Network-Number-Is traffic.
    pub fn attach_adapter(
        &mut self,
        network: Option<u16>,
        link: L,
        inbound: Confirmations,
    ) -> usize {
        let index = self.adapters.len();
        self.adapters.push(Adapter {
            link,
            network: Mutex::new(AdapterNetwork {
                number: network,
                configured: network.is_some(),
            }),
        });
        self.inbounds.push(inbound);
        index
    }

    /// Chooses the adapter that carries the local address classes.
    /// Defaults to the first one attached.
    pub fn with_local_adapter(mut self, index: usize) -> Self {
        self.local_adapter = index;
        self
    }

    /// Finishes composition.
    ///
    /// Returns the layer and its driver. The driver future must be polled
    /// (e.g. via `tokio::spawn`) for inbound processing, relaying, and
    /// discovery expiry to make progress; it runs until dropped.
    pub fn build(self) -> (NetworkLayer<L>, impl Future<Output = ()>) {
        let (events_tx, mut events_rx) = mpsc::channel(EVENT_QUEUE_DEPTH);
        let local_adapter = self.local_adapter.min(self.adapters.len().saturating_sub(1));
        let state = Arc::new(EngineState {
            adapters: self.adapters,
            local_adapter,
            upstream: self.upstream,
            events: events_tx.clone(),
            routers: Mutex::new(RouterInfoCache::new()),
            discoveries: Mutex::new(HashMap::new()),
            next_generation: AtomicU64::new(0),
            irt_pending: Mutex::new(None),
            number_pending: Mutex::new(None),
        });

        let mut forwarders = Vec::new();
        for (index, mut inbound) in self.inbounds.into_iter().enumerate() {
            let tx = events_tx.clone();
            forwarders.push(tokio::spawn(async move {
                while let Some(pdu) = inbound.recv().await {
                    if tx
                        .send(Event::Inbound {
                            adapter: index,
                            pdu,
                        })
                        .await
                        .is_err()
                    {
                        break;
                    }
                }
            }));
        }

        let driver_state = state.clone();
        let driver = async move {
            while let Some(event) = events_rx.recv().await {
                match event {
                    Event::Inbound { adapter, pdu } => {
                        process_inbound(&driver_state, adapter, pdu).await;
                    }
                    Event::DiscoveryExpired {
                        network,
                        generation,
                    } => {
                        expire_discovery(&driver_state, network, generation).await;
                    }
                }
            }
        };

        (NetworkLayer { state, forwarders }, driver)
    }
}

/// The routing engine over a set of attached adapters.
pub struct NetworkLayer<L: Sink> {
    state: Arc<EngineState<L>>,
    forwarders: Vec<JoinHandle<()>>,
}

impl<L: Sink> NetworkLayer<L> {
    pub fn builder(upstream: Upstream) -> NetworkBuilder<L> {
        NetworkBuilder::new(upstream)
    }

    /// Sends an application NPDU toward its destination.
    ///
    /// Local classes go out the local adapter, a global broadcast fans
    /// out everywhere, and remote classes are forwarded through a known
    /// router, waiting out one shared discovery round when no path to the
    /// destination network is cached yet.
    pub async fn request(&self, pdu: Pdu) -> Result<(), NetworkError> {
        let destination = pdu.destination;

        // An explicit @router annotation skips lookup and discovery.
        if let Some(router) = destination.route() {
            let Some(dadr) = NpduAddress::from_destination(&destination) else {
                return Err(NetworkError::InvalidDestination);
            };
            let npci = Npci {
                destination: Some(dadr),
                expecting_reply: pdu.expecting_reply,
                priority: pdu.priority,
                ..Npci::new()
            };
            let adapter = self.adapter(self.state.local_adapter)?;
            return send_frame(adapter, &npci, &pdu.data, Address::local_station(router)).await;
        }

        match destination.kind() {
            AddressKind::LocalStation(_) | AddressKind::LocalBroadcast => {
                let npci = Npci {
                    expecting_reply: pdu.expecting_reply,
                    priority: pdu.priority,
                    ..Npci::new()
                };
                let adapter = self.adapter(self.state.local_adapter)?;
                send_frame(adapter, &npci, &pdu.data, destination).await
            }
            AddressKind::GlobalBroadcast => {
                let npci = Npci {
                    destination: NpduAddress::from_destination(&destination),
                    expecting_reply: pdu.expecting_reply,
                    priority: pdu.priority,
                    ..Npci::new()
                };
                let mut sent = false;
                let mut first_error = None;
                for (index, adapter) in self.state.adapters.iter().enumerate() {
                    match send_frame(adapter, &npci, &pdu.data, Address::local_broadcast()).await
                    {
                        Ok(()) => sent = true,
                        Err(e) => {
                            log::warn!("global broadcast failed on adapter {index}: {e}");
                            if first_error.is_none() {
                                first_error = Some(e);
                            }
                        }
                    }
                }
                if sent {
                    Ok(())
                } else {
                    Err(first_error.unwrap_or(NetworkError::InvalidDestination))
                }
            }
            AddressKind::RemoteStation { network, mac } => {
                self.send_remote(network, Some(mac), &pdu).await
            }
            AddressKind::RemoteBroadcast(network) => self.send_remote(network, None, &pdu).await,
        }
    }

    async fn send_remote(
        &self,
        network: u16,
        mac: Option<Mac>,
        pdu: &Pdu,
    ) -> Result<(), NetworkError> {
        // A directly attached network needs no routing header at all.
        if let Some(index) = attached_adapter(&self.state, network).await {
            let adapter = self.adapter(index)?;
            let npci = Npci {
                expecting_reply: pdu.expecting_reply,
                priority: pdu.priority,
                ..Npci::new()
            };
            let link_dest = match mac {
                Some(mac) => Address::local_station(mac),
                None => Address::local_broadcast(),
            };
            return send_frame(adapter, &npci, &pdu.data, link_dest).await;
        }

        let info = resolve_route(&self.state, network).await?;
        let adapter = self.adapter(info.adapter)?;
        let npci = Npci {
            destination: Some(NpduAddress {
                network,
                mac: mac.unwrap_or(Mac::empty()),
            }),
            expecting_reply: pdu.expecting_reply,
            priority: pdu.priority,
            ..Npci::new()
        };
        send_frame(adapter, &npci, &pdu.data, Address::local_station(info.address)).await
    }

    /// Resolves the router to a network, running a discovery round when
    /// nothing usable is cached.
    pub async fn who_is_router_to_network(
        &self,
        network: u16,
    ) -> Result<RouterInfo, NetworkError> {
        resolve_route(&self.state, network).await
    }

    /// Reads or replaces a router's routing table. An empty `entries`
    /// list is the read-request form. Returns the table the router
    /// answered with.
    pub async fn initialize_routing_table(
        &self,
        router: Address,
        entries: Vec<RoutingTableEntry>,
    ) -> Result<Vec<RoutingTableEntry>, NetworkError> {
        let AddressKind::LocalStation(mac) = router.kind() else {
            return Err(NetworkError::InvalidDestination);
        };
        let adapter = self.adapter(self.state.local_adapter)?;

        let (tx, rx) = oneshot::channel();
        *self.state.irt_pending.lock().await = Some(IrtPending {
            from: mac,
            reply: tx,
        });
        let request = NetworkMessage::InitializeRoutingTable { entries };
        if let Err(e) = send_network_message(adapter, &request, Address::local_station(mac)).await
        {
            self.state.irt_pending.lock().await.take();
            return Err(e);
        }
        match timeout(DIAGNOSTIC_TIMEOUT, rx).await {
            Ok(Ok(entries)) => Ok(entries),
            Ok(Err(_)) => Err(NetworkError::Closed),
            Err(_) => {
                self.state.irt_pending.lock().await.take();
                Err(NetworkError::Timeout)
            }
        }
    }

    /// Asks the local segment for its network number. Answers immediately
    /// when the local adapter already knows it.
    pub async fn what_is_network_number(&self) -> Result<u16, NetworkError> {
        let index = self.state.local_adapter;
        let adapter = self.adapter(index)?;
        if let Some(number) = adapter.network.lock().await.number {
            return Ok(number);
        }

        let (tx, rx) = oneshot::channel();
        *self.state.number_pending.lock().await = Some(NumberPending {
            adapter: index,
            reply: tx,
        });
        if let Err(e) = send_network_message(
            adapter,
            &NetworkMessage::WhatIsNetworkNumber,
            Address::local_broadcast(),
        )
        .await
        {
            self.state.number_pending.lock().await.take();
            return Err(e);
        }
        match timeout(DIAGNOSTIC_TIMEOUT, rx).await {
            Ok(Ok(number)) => Ok(number),
            Ok(Err(_)) => Err(NetworkError::Closed),
            Err(_) => {
                self.state.number_pending.lock().await.take();
                Err(NetworkError::Timeout)
            }
        }
    }

    /// Every router path currently cached.
    pub async fn router_paths(&self) -> Vec<RouterInfo> {
        self.state.routers.lock().await.entries().cloned().collect()
    }

    /// The network number an adapter is configured with or has learned.
    pub async fn network_number(&self, adapter: usize) -> Option<u16> {
        match self.state.adapters.get(adapter) {
            Some(adapter) => adapter.network.lock().await.number,
            None => None,
        }
    }

    /// Stops the adapter pumps. Also happens on drop; the driver future
    /// stops when dropped or aborted by its owner.
    pub fn close(&mut self) {
        for task in self.forwarders.drain(..) {
            task.abort();
        }
    }

    fn adapter(&self, index: usize) -> Result<&Adapter<L>, NetworkError> {
        self.state
            .adapters
            .get(index)
            .ok_or(NetworkError::InvalidDestination)
    }
}

impl<L: Sink> Drop for NetworkLayer<L> {
    fn drop(&mut self) {
        self.close();
    }
}

async fn attached_adapter<L>(state: &EngineState<L>, network: u16) -> Option<usize> {
    for (index, adapter) in state.adapters.iter().enumerate() {
        if adapter.network.lock().await.number == Some(network) {
            return Some(index);
        }
    }
    None
}

async fn adapter_network<L>(state: &EngineState<L>, index: usize) -> Option<u16> {
    match state.adapters.get(index) {
        Some(adapter) => adapter.network.lock().await.number,
        None => None,
    }
}

/// A cached path that may be used for forwarding right now. Busy and
/// unreachable entries stay in the cache so Router-Available can restore
/// them, but neither counts as a path; the caller falls back to discovery.
async fn reachable_path<L>(state: &EngineState<L>, network: u16) -> Option<RouterInfo> {
    state
        .routers
        .lock()
        .await
        .get(None, network)
        .filter(|info| info.status == RouterStatus::Reachable)
        .cloned()
}

fn new_discovery(
    events: &mpsc::Sender<Event>,
    next_generation: &AtomicU64,
    network: u16,
) -> Discovery {
    let generation = next_generation.fetch_add(1, Ordering::Relaxed);
    let (outcome, _) = watch::channel(None);
    let events = events.clone();
    tokio::spawn(async move {
        sleep(DISCOVERY_TIMEOUT).await;
        let _ = events
            .send(Event::DiscoveryExpired {
                network,
                generation,
            })
            .await;
    });
    Discovery {
        generation,
        outcome,
        queued: Vec::new(),
    }
}

async fn join_discovery<L>(
    state: &EngineState<L>,
    network: u16,
) -> (watch::Receiver<Option<DiscoveryOutcome>>, bool) {
    let mut discoveries = state.discoveries.lock().await;
    match discoveries.get(&network) {
        Some(discovery) => (discovery.outcome.subscribe(), false),
        None => {
            let discovery = new_discovery(&state.events, &state.next_generation, network);
            let rx = discovery.outcome.subscribe();
            discoveries.insert(network, discovery);
            (rx, true)
        }
    }
}

/// Finds a router to `network`, broadcasting Who-Is-Router-To-Network and
/// waiting out the discovery window when the cache has no usable path.
/// Concurrent callers for the same network share a single round.
async fn resolve_route<L: Sink>(
    state: &EngineState<L>,
    network: u16,
) -> Result<RouterInfo, NetworkError> {
    if let Some(info) = reachable_path(state, network).await {
        return Ok(info);
    }

    let (mut rx, created) = join_discovery(state, network).await;
    if created {
        broadcast_who_is(state, network).await;
    }

    let outcome = match rx.wait_for(|outcome| outcome.is_some()).await {
        Ok(value) => *value,
        Err(_) => return Err(NetworkError::Closed),
    };
    match outcome {
        Some(DiscoveryOutcome::Found) => reachable_path(state, network)
            .await
            .ok_or(NetworkError::NoRouteToNetwork { network }),
        Some(DiscoveryOutcome::Failed(reason)) => Err(NetworkError::Rejected { network, reason }),
        // The window closed without an I-Am, but routed traffic may have
        // taught us a path in the meantime.
        Some(DiscoveryOutcome::TimedOut) | None => reachable_path(state, network)
            .await
            .ok_or(NetworkError::NoRouteToNetwork { network }),
    }
}

async fn broadcast_who_is<L: Sink>(state: &EngineState<L>, network: u16) {
    let message = NetworkMessage::WhoIsRouterToNetwork {
        network: Some(network),
    };
    for (index, adapter) in state.adapters.iter().enumerate() {
        if let Err(e) = send_network_message(adapter, &message, Address::local_broadcast()).await {
            log::debug!("router discovery broadcast on adapter {index} failed: {e}");
        }
    }
}

async fn expire_discovery<L: Sink>(state: &EngineState<L>, network: u16, generation: u64) {
    let discovery = {
        let mut discoveries = state.discoveries.lock().await;
        match discoveries.get(&network) {
            Some(discovery) if discovery.generation == generation => {
                discoveries.remove(&network)
            }
            _ => return,
        }
    };
    let Some(discovery) = discovery else { return };

    if let Some(info) = reachable_path(state, network).await {
        let _ = discovery.outcome.send(Some(DiscoveryOutcome::Found));
        flush_queued(state, discovery.queued, &info).await;
        return;
    }

    let _ = discovery.outcome.send(Some(DiscoveryOutcome::TimedOut));
    if !discovery.queued.is_empty() {
        log::info!(
            "no router to network {network} answered, rejecting {} held frames",
            discovery.queued.len()
        );
        reject_queued(
            state,
            discovery.queued,
            network,
            RejectReason::NoRouteToNetwork,
        )
        .await;
    }
}

async fn flush_queued<L: Sink>(state: &EngineState<L>, queued: Vec<QueuedRelay>, info: &RouterInfo) {
    if queued.is_empty() {
        return;
    }
    let Some(adapter) = state.adapters.get(info.adapter) else {
        return;
    };
    for relay in queued {
        let pdu = Pdu::new(relay.npdu, Address::local_station(info.address))
            .with_expecting_reply(relay.expecting_reply)
            .with_priority(relay.priority);
        if let Err(e) = adapter.link.indication(pdu).await {
            log::warn!(
                "relay to network {} via {} failed: {e}",
                info.network,
                info.address
            );
        }
    }
}

async fn reject_queued<L: Sink>(
    state: &EngineState<L>,
    queued: Vec<QueuedRelay>,
    network: u16,
    reason: RejectReason,
) {
    let message = NetworkMessage::RejectMessageToNetwork { reason, network };
    for relay in queued {
        let Some(adapter) = state.adapters.get(relay.arrival_adapter) else {
            continue;
        };
        if let Err(e) =
            send_network_message(adapter, &message, Address::local_station(relay.reply_to)).await
        {
            log::debug!("reject reply to {} failed: {e}", relay.reply_to);
        }
    }
}

/// Encodes NPCI plus payload and hands the frame to the adapter's link.
async fn send_frame<L: Sink>(
    adapter: &Adapter<L>,
    npci: &Npci,
    payload: &[u8],
    link_dest: Address,
) -> Result<(), NetworkError> {
    let mut buf = [0u8; MAX_NPDU_LEN];
    let mut w = Writer::new(&mut buf);
    npci.encode(&mut w)?;
    w.write_all(payload)?;
    let pdu = Pdu::new(w.as_written(), link_dest)
        .with_expecting_reply(npci.expecting_reply)
        .with_priority(npci.priority);
    adapter.link.indication(pdu).await?;
    Ok(())
}

async fn send_network_message<L: Sink>(
    adapter: &Adapter<L>,
    message: &NetworkMessage,
    link_dest: Address,
) -> Result<(), NetworkError> {
    let npci = Npci {
        message_type: Some(message.message_type()),
        ..Npci::new()
    };
    let mut body = [0u8; MAX_NPDU_LEN];
    let mut w = Writer::new(&mut body);
    message.encode(&mut w)?;
    send_frame(adapter, &npci, w.as_written(), link_dest).await
}

fn link_station(pdu: &Pdu) -> Option<Mac> {
    match pdu.source?.kind() {
        AddressKind::LocalStation(mac) => Some(mac),
        _ => None,
    }
}

async fn process_inbound<L: Sink>(state: &EngineState<L>, adapter_index: usize, pdu: Pdu) {
    let Some(source_mac) = link_station(&pdu) else {
        log::debug!("inbound pdu without a link station source, dropping");
        return;
    };

    let mut r = Reader::new(&pdu.data);
    let npci = match Npci::decode(&mut r) {
        Ok(npci) => npci,
        Err(e) => {
            log::debug!("undecodable npdu from {source_mac}: {e}");
            return;
        }
    };
    let body = r.read_remaining();

    learn_from_source(state, adapter_index, &npci, source_mac).await;

    match npci.destination {
        None => {
            deliver_or_handle(state, adapter_index, &npci, body, source_mac, pdu.destination)
                .await;
        }
        Some(dadr) => {
            route_addressed(state, adapter_index, &npci, dadr, body, source_mac).await;
        }
    }
}

/// A relayed frame names its source network; the station that put it on
/// our wire is therefore a router to that network.
async fn learn_from_source<L>(
    state: &EngineState<L>,
    adapter_index: usize,
    npci: &Npci,
    source_mac: Mac,
) {
    let Some(sadr) = npci.source else { return };
    if attached_adapter(state, sadr.network).await.is_some() {
        log::warn!(
            "station {source_mac} relayed traffic claiming attached network {}, not learning it",
            sadr.network
        );
        return;
    }
    state
        .routers
        .lock()
        .await
        .put(RouterInfo::new(None, sadr.network, adapter_index, source_mac));
}

async fn route_addressed<L: Sink>(
    state: &EngineState<L>,
    adapter_index: usize,
    npci: &Npci,
    dadr: NpduAddress,
    body: &[u8],
    source_mac: Mac,
) {
    if dadr.network == GLOBAL_BROADCAST_NETWORK {
        deliver_or_handle(
            state,
            adapter_index,
            npci,
            body,
            source_mac,
            Address::global_broadcast(),
        )
        .await;
        relay_broadcast(state, adapter_index, npci, body, source_mac).await;
        return;
    }

    // Addressed to the network it arrived on: nothing left to route.
    if adapter_network(state, adapter_index).await == Some(dadr.network) {
        deliver_or_handle(
            state,
            adapter_index,
            npci,
            body,
            source_mac,
            dadr.to_destination(),
        )
        .await;
        return;
    }

    match attached_adapter(state, dadr.network).await {
        Some(out_index) => {
            relay_last_leg(state, adapter_index, out_index, npci, &dadr, body, source_mac).await;
        }
        None => relay_routed(state, adapter_index, npci, &dadr, body, source_mac).await,
    }
}

/// Hands a locally destined frame to the application, or consumes it as a
/// network-layer message.
async fn deliver_or_handle<L: Sink>(
    state: &EngineState<L>,
    adapter_index: usize,
    npci: &Npci,
    body: &[u8],
    source_mac: Mac,
    destination: Address,
) {
    if let Some(message_type) = npci.message_type {
        let mut r = Reader::new(body);
        match NetworkMessage::decode(message_type, &mut r) {
            Ok(message) => {
                handle_network_message(state, adapter_index, message, source_mac).await;
            }
            Err(e) => log::debug!(
                "undecodable network message 0x{message_type:02x} from {source_mac}: {e}"
            ),
        }
        return;
    }

    // A routed frame's reply can skip discovery by going back through the
    // station that delivered it, so the source carries that annotation.
    let source = match npci.source {
        Some(sadr) => sadr.to_source().with_route(source_mac),
        None => Address::local_station(source_mac),
    };
    let upstream = Pdu::new(body, destination)
        .with_source(source)
        .with_expecting_reply(npci.expecting_reply)
        .with_priority(npci.priority);
    if state.upstream.confirmation(upstream).await.is_err() {
        log::debug!("application binding closed, dropping inbound npdu");
    }
}

/// SADR for a relayed copy: the original when present, otherwise the
/// arrival network and station.
async fn relay_source<L>(
    state: &EngineState<L>,
    arrival: usize,
    npci: &Npci,
    source_mac: Mac,
) -> Option<NpduAddress> {
    if let Some(sadr) = npci.source {
        return Some(sadr);
    }
    let network = adapter_network(state, arrival).await?;
    Some(NpduAddress {
        network,
        mac: source_mac,
    })
}

async fn relay_broadcast<L: Sink>(
    state: &EngineState<L>,
    arrival: usize,
    npci: &Npci,
    body: &[u8],
    source_mac: Mac,
) {
    if state.adapters.len() < 2 {
        return;
    }
    let hop = npci.hop_count.unwrap_or(DEFAULT_HOP_COUNT);
    if hop == 0 {
        log::debug!("hop count exhausted, not relaying global broadcast from {source_mac}");
        return;
    }
    let Some(source) = relay_source(state, arrival, npci, source_mac).await else {
        log::warn!("cannot relay from adapter {arrival} without a network number");
        return;
    };
    let relayed = Npci {
        source: Some(source),
        hop_count: Some(hop - 1),
        ..*npci
    };
    for (index, adapter) in state.adapters.iter().enumerate() {
        if index == arrival {
            continue;
        }
        if let Err(e) = send_frame(adapter, &relayed, body, Address::local_broadcast()).await {
            log::warn!("global broadcast relay on adapter {index} failed: {e}");
        }
    }
}

/// Relays onto the destination network itself: the routing header comes
/// off and the frame goes straight to the addressed station or segment.
async fn relay_last_leg<L: Sink>(
    state: &EngineState<L>,
    arrival: usize,
    out: usize,
    npci: &Npci,
    dadr: &NpduAddress,
    body: &[u8],
    source_mac: Mac,
) {
    let hop = npci.hop_count.unwrap_or(DEFAULT_HOP_COUNT);
    if hop == 0 {
        log::debug!(
            "hop count exhausted, dropping frame for network {}",
            dadr.network
        );
        return;
    }
    let Some(source) = relay_source(state, arrival, npci, source_mac).await else {
        log::warn!("cannot relay from adapter {arrival} without a network number");
        return;
    };
    let relayed = Npci {
        destination: None,
        source: Some(source),
        hop_count: None,
        ..*npci
    };
    let link_dest = if dadr.mac.is_empty() {
        Address::local_broadcast()
    } else {
        Address::local_station(dadr.mac)
    };
    let Some(adapter) = state.adapters.get(out) else {
        return;
    };
    if let Err(e) = send_frame(adapter, &relayed, body, link_dest).await {
        log::warn!("delivery onto network {} failed: {e}", dadr.network);
    }
}

/// Relays toward a network we are not attached to, through a cached
/// router or behind a fresh discovery round.
async fn relay_routed<L: Sink>(
    state: &EngineState<L>,
    arrival: usize,
    npci: &Npci,
    dadr: &NpduAddress,
    body: &[u8],
    source_mac: Mac,
) {
    let hop = npci.hop_count.unwrap_or(DEFAULT_HOP_COUNT);
    if hop == 0 {
        log::debug!(
            "hop count exhausted, dropping frame for network {}",
            dadr.network
        );
        return;
    }
    let Some(source) = relay_source(state, arrival, npci, source_mac).await else {
        log::warn!("cannot relay from adapter {arrival} without a network number");
        return;
    };
    let relayed = Npci {
        destination: Some(*dadr),
        source: Some(source),
        hop_count: Some(hop - 1),
        ..*npci
    };

    // Frame once up front; only the link target depends on which router
    // answers.
    let mut buf = [0u8; MAX_NPDU_LEN];
    let mut w = Writer::new(&mut buf);
    if let Err(e) = relayed.encode(&mut w).and_then(|()| w.write_all(body)) {
        log::warn!("relay framing for network {} failed: {e}", dadr.network);
        return;
    }
    let npdu = w.as_written().to_vec();

    if let Some(info) = reachable_path(state, dadr.network).await {
        let Some(adapter) = state.adapters.get(info.adapter) else {
            return;
        };
        let pdu = Pdu::new(npdu, Address::local_station(info.address))
            .with_expecting_reply(npci.expecting_reply)
            .with_priority(npci.priority);
        if let Err(e) = adapter.link.indication(pdu).await {
            log::warn!("relay to network {} failed: {e}", dadr.network);
        }
        return;
    }

    let relay = QueuedRelay {
        arrival_adapter: arrival,
        reply_to: source_mac,
        npdu,
        expecting_reply: npci.expecting_reply,
        priority: npci.priority,
    };
    let created = {
        let mut discoveries = state.discoveries.lock().await;
        match discoveries.get_mut(&dadr.network) {
            Some(discovery) => {
                discovery.queued.push(relay);
                false
            }
            None => {
                let mut discovery =
                    new_discovery(&state.events, &state.next_generation, dadr.network);
                discovery.queued.push(relay);
                discoveries.insert(dadr.network, discovery);
                true
            }
        }
    };
    if created {
        broadcast_who_is(state, dadr.network).await;
    }
}

async fn handle_network_message<L: Sink>(
    state: &EngineState<L>,
    adapter_index: usize,
    message: NetworkMessage,
    source_mac: Mac,
) {
    match message {
        NetworkMessage::WhoIsRouterToNetwork { network } => {
            answer_who_is_router(state, adapter_index, network, source_mac).await;
        }
        NetworkMessage::IAmRouterToNetwork { networks } => {
            learn_routers(state, adapter_index, &networks, source_mac).await;
        }
        NetworkMessage::ICouldBeRouterToNetwork { network, .. } => {
            log::debug!("ignoring I-Could-Be-Router-To-Network {network} from {source_mac}");
        }
        NetworkMessage::RejectMessageToNetwork { reason, network } => {
            log::info!("router {source_mac} rejected traffic for network {network}: {reason}");
            {
                let mut routers = state.routers.lock().await;
                if !routers.set_status(None, network, RouterStatus::Unreachable) {
                    let mut info = RouterInfo::new(None, network, adapter_index, source_mac);
                    info.status = RouterStatus::Unreachable;
                    routers.put(info);
                }
            }
            let discovery = state.discoveries.lock().await.remove(&network);
            if let Some(discovery) = discovery {
                let _ = discovery
                    .outcome
                    .send(Some(DiscoveryOutcome::Failed(reason)));
                reject_queued(state, discovery.queued, network, reason).await;
            }
        }
        NetworkMessage::RouterBusyToNetwork { networks } => {
            set_router_availability(
                state,
                adapter_index,
                &networks,
                source_mac,
                RouterStatus::Busy,
            )
            .await;
        }
        NetworkMessage::RouterAvailableToNetwork { networks } => {
            set_router_availability(
                state,
                adapter_index,
                &networks,
                source_mac,
                RouterStatus::Reachable,
            )
            .await;
        }
        NetworkMessage::InitializeRoutingTable { entries } => {
            if !entries.is_empty() {
                apply_routing_table(state, entries).await;
            }
            let table = routing_table(state).await;
            let Some(adapter) = state.adapters.get(adapter_index) else {
                return;
            };
            let ack = NetworkMessage::InitializeRoutingTableAck { entries: table };
            if let Err(e) =
                send_network_message(adapter, &ack, Address::local_station(source_mac)).await
            {
                log::warn!("routing table ack to {source_mac} failed: {e}");
            }
        }
        NetworkMessage::InitializeRoutingTableAck { entries } => {
            let mut slot = state.irt_pending.lock().await;
            match slot.as_ref() {
                Some(pending) if pending.from == source_mac => {
                    if let Some(pending) = slot.take() {
                        let _ = pending.reply.send(entries);
                    }
                }
                _ => log::debug!("unsolicited routing table ack from {source_mac}"),
            }
        }
        NetworkMessage::EstablishConnectionToNetwork { network, .. } => {
            log::debug!(
                "Establish-Connection-To-Network {network} from {source_mac} not supported"
            );
        }
        NetworkMessage::DisconnectConnectionToNetwork { network } => {
            log::debug!(
                "Disconnect-Connection-To-Network {network} from {source_mac} not supported"
            );
        }
        NetworkMessage::WhatIsNetworkNumber => {
            answer_what_is_network_number(state, adapter_index).await;
        }
        NetworkMessage::NetworkNumberIs {
            network,
            configured,
        } => {
            learn_network_number(state, adapter_index, network, configured, source_mac).await;
        }
        NetworkMessage::Unknown { message_type, .. } => {
            log::debug!("unknown network message 0x{message_type:02x} from {source_mac}");
        }
    }
}

async fn answer_who_is_router<L: Sink>(
    state: &EngineState<L>,
    adapter_index: usize,
    network: Option<u16>,
    source_mac: Mac,
) {
    let mut reachable: Vec<u16> = Vec::new();
    for (index, adapter) in state.adapters.iter().enumerate() {
        if index == adapter_index {
            continue;
        }
        if let Some(number) = adapter.network.lock().await.number {
            reachable.push(number);
        }
    }
    // Paths already learned through other ports count as well.
    {
        let routers = state.routers.lock().await;
        for info in routers.entries() {
            if info.adapter != adapter_index
                && info.status == RouterStatus::Reachable
                && !reachable.contains(&info.network)
            {
                reachable.push(info.network);
            }
        }
    }
    reachable.sort_unstable();

    let networks = match network {
        Some(wanted) => {
            if !reachable.contains(&wanted) {
                log::debug!("no path to network {wanted} for Who-Is-Router from {source_mac}");
                return;
            }
            vec![wanted]
        }
        None => {
            if reachable.is_empty() {
                return;
            }
            reachable
        }
    };

    let Some(adapter) = state.adapters.get(adapter_index) else {
        return;
    };
    let reply = NetworkMessage::IAmRouterToNetwork { networks };
    if let Err(e) = send_network_message(adapter, &reply, Address::local_broadcast()).await {
        log::debug!("I-Am-Router-To-Network on adapter {adapter_index} failed: {e}");
    }
}

async fn learn_routers<L: Sink>(
    state: &EngineState<L>,
    adapter_index: usize,
    networks: &[u16],
    source_mac: Mac,
) {
    for &network in networks {
        if attached_adapter(state, network).await.is_some() {
            log::warn!("router {source_mac} claims attached network {network}, ignoring");
            continue;
        }
        let info = RouterInfo::new(None, network, adapter_index, source_mac);
        state.routers.lock().await.put(info.clone());

        let discovery = state.discoveries.lock().await.remove(&network);
        if let Some(discovery) = discovery {
            let _ = discovery.outcome.send(Some(DiscoveryOutcome::Found));
            flush_queued(state, discovery.queued, &info).await;
        }
    }
}

async fn set_router_availability<L>(
    state: &EngineState<L>,
    adapter_index: usize,
    networks: &[u16],
    source_mac: Mac,
    status: RouterStatus,
) {
    let mut routers = state.routers.lock().await;
    if networks.is_empty() {
        // An empty list speaks for every network the router serves.
        let touched = routers.set_router_status(adapter_index, source_mac, status);
        log::debug!("router {source_mac} now {status:?} for {touched} cached paths");
        return;
    }
    for &network in networks {
        if !routers.set_status(None, network, status) {
            // Even an announcement for a path we never learned names a
            // router worth remembering.
            let mut info = RouterInfo::new(None, network, adapter_index, source_mac);
            info.status = status;
            routers.put(info);
        }
    }
}

fn port_id(index: usize) -> u8 {
    (index + 1).min(usize::from(u8::MAX)) as u8
}

async fn routing_table<L>(state: &EngineState<L>) -> Vec<RoutingTableEntry> {
    let mut table = Vec::new();
    for (index, adapter) in state.adapters.iter().enumerate() {
        if let Some(network) = adapter.network.lock().await.number {
            table.push(RoutingTableEntry {
                network,
                port_id: port_id(index),
                port_info: Vec::new(),
            });
        }
    }
    table
}

/// Initialize-Routing-Table with entries is a full replacement of the
/// adapter-to-network associations.
async fn apply_routing_table<L>(state: &EngineState<L>, entries: Vec<RoutingTableEntry>) {
    for adapter in &state.adapters {
        let mut network = adapter.network.lock().await;
        network.number = None;
        network.configured = false;
    }
    for entry in entries {
        let Some(index) = entry.port_id.checked_sub(1).map(usize::from) else {
            log::warn!("routing table entry for network {} has port id 0", entry.network);
            continue;
        };
        let Some(adapter) = state.adapters.get(index) else {
            log::warn!(
                "routing table entry for network {} names unknown port {}",
                entry.network,
                entry.port_id
            );
            continue;
        };
        let mut network = adapter.network.lock().await;
        network.number = Some(entry.network);
        network.configured = true;
    }
}

async fn answer_what_is_network_number<L: Sink>(state: &EngineState<L>, adapter_index: usize) {
    let Some(adapter) = state.adapters.get(adapter_index) else {
        return;
    };
    let network = *adapter.network.lock().await;
    // Learned numbers are hearsay; only a configured one is worth
    // announcing.
    let AdapterNetwork {
        number: Some(number),
        configured: true,
    } = network
    else {
        return;
    };
    let reply = NetworkMessage::NetworkNumberIs {
        network: number,
        configured: true,
    };
    if let Err(e) = send_network_message(adapter, &reply, Address::local_broadcast()).await {
        log::debug!("Network-Number-Is on adapter {adapter_index} failed: {e}");
    }
}

async fn learn_network_number<L>(
    state: &EngineState<L>,
    adapter_index: usize,
    network: u16,
    configured: bool,
    source_mac: Mac,
) {
    let Some(adapter) = state.adapters.get(adapter_index) else {
        return;
    };
    {
        let mut ours = adapter.network.lock().await;
        if ours.configured {
            if ours.number != Some(network) {
                log::warn!(
                    "{source_mac} announced network {network} on adapter {adapter_index} configured as {:?}",
                    ours.number
                );
            }
        } else if !configured {
            log::debug!("ignoring learned network number {network} from {source_mac}");
        } else if ours.number != Some(network) {
            log::info!(
                "adapter {adapter_index} learned network number {network} from {source_mac}"
            );
            ours.number = Some(network);
        }
    }

    let mut slot = state.number_pending.lock().await;
    if slot
        .as_ref()
        .is_some_and(|pending| pending.adapter == adapter_index)
    {
        if let Some(pending) = slot.take() {
            let _ = pending.reply.send(network);
        }
    }
}
