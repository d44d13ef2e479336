//! The running BACnet/IP link.

use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::sync::Arc;

use bacstack_core::encoding::Writer;
use bacstack_core::{Address, AddressKind, DecodeError, Mac, Pdu};
use tokio::net::UdpSocket;
use tokio::sync::{oneshot, watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{timeout, Duration};

use crate::bip::bvlc::{BvlcFunction, BvlcMessage};
use crate::bip::tables::{
    BroadcastDistributionEntry, ForeignDeviceTable, ForeignDeviceTableEntry,
};
use crate::link::{LinkError, Sink, Source, Upstream};

const MAX_BIP_FRAME_LEN: usize = 1600;
const COMMAND_TIMEOUT: Duration = Duration::from_secs(2);

/// Where a foreign-device registration stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegistrationStatus {
    /// Not a foreign device, or no registration attempted yet.
    Unregistered,
    /// A Register-Foreign-Device is outstanding.
    Pending,
    Registered,
    /// The BBMD answered with a nonzero result code.
    Rejected(u16),
}

#[derive(Debug, Clone, Copy)]
enum Mode {
    Normal,
    Foreign { bbmd: SocketAddrV4 },
}

#[derive(Default)]
struct BbmdTables {
    bdt: Vec<BroadcastDistributionEntry>,
    fdt: ForeignDeviceTable,
}

struct PendingCommand {
    expect: BvlcFunction,
    from: SocketAddrV4,
    reply: oneshot::Sender<Result<BvlcMessage, LinkError>>,
}

struct LinkState {
    unicast: Arc<UdpSocket>,
    local_addr: SocketAddrV4,
    local_mac: Mac,
    broadcast_target: Option<SocketAddrV4>,
    mode: Mode,
    /// `Some` once a broadcast distribution table is configured; that is
    /// what makes this link a BBMD.
    bbmd: Mutex<Option<BbmdTables>>,
    pending: Mutex<Option<PendingCommand>>,
    command_lock: Mutex<()>,
    registration: watch::Sender<RegistrationStatus>,
    upstream: Upstream,
}

/// A BACnet/IP station on a UDP socket pair.
///
/// Three shapes share this type: a normal station bound to an interface
/// address (with a second socket listening on the directed broadcast
/// address when the netmask is known), a foreign device registered with a
/// remote BBMD, and a BBMD once
/// [`set_broadcast_distribution_table`](BipLink::set_broadcast_distribution_table)
/// has been called. Background reader tasks decode inbound frames and hand
/// NPDUs to the [`Upstream`] binding given at construction; outbound
/// traffic goes through [`Sink::indication`].
pub struct BipLink {
    state: Arc<LinkState>,
    tasks: Vec<JoinHandle<()>>,
}

impl BipLink {
    /// Binds a normal station.
    ///
    /// `addr` should be the interface address, not the wildcard, when a
    /// `mask` is given; the mask determines the directed broadcast address
    /// used for sending and listening. With an ephemeral port or no mask
    /// the link cannot broadcast and [`Sink::indication`] fails with
    /// [`LinkError::NoBroadcast`] for local broadcasts.
    pub async fn bind(
        addr: SocketAddrV4,
        mask: Option<Ipv4Addr>,
        upstream: Upstream,
    ) -> Result<Self, LinkError> {
        let unicast = UdpSocket::bind(SocketAddr::V4(addr)).await?;
        unicast.set_broadcast(true)?;
        let local_addr = match unicast.local_addr()? {
            SocketAddr::V4(resolved) => resolved,
            SocketAddr::V6(_) => return Err(LinkError::InvalidDestination),
        };

        let broadcast_target = match (mask, addr.port()) {
            (Some(mask), port) if port != 0 => Some(SocketAddrV4::new(
                directed_broadcast(*local_addr.ip(), mask),
                port,
            )),
            _ => None,
        };

        let broadcast_listener = match broadcast_target {
            Some(target) if target.ip() != local_addr.ip() => {
                let socket = UdpSocket::bind(SocketAddr::V4(target)).await?;
                socket.set_broadcast(true)?;
                Some(Arc::new(socket))
            }
            _ => None,
        };

        let (registration, _) = watch::channel(RegistrationStatus::Unregistered);
        let state = Arc::new(LinkState {
            unicast: Arc::new(unicast),
            local_addr,
            local_mac: Mac::from(local_addr),
            broadcast_target,
            mode: Mode::Normal,
            bbmd: Mutex::new(None),
            pending: Mutex::new(None),
            command_lock: Mutex::new(()),
            registration,
            upstream,
        });

        let mut tasks = vec![spawn_reader(state.clone(), state.unicast.clone(), false)];
        if let Some(listener) = broadcast_listener {
            tasks.push(spawn_reader(state.clone(), listener, true));
        }
        Ok(BipLink { state, tasks })
    }

    /// Binds a foreign device that reaches its network through `bbmd`.
    ///
    /// Registration is sent immediately and renewed every `ttl_seconds / 2`
    /// seconds; use [`wait_registered`](BipLink::wait_registered) or
    /// [`registration_status`](BipLink::registration_status) to observe the
    /// outcome. Local broadcasts become
    /// Distribute-Broadcast-To-Network requests and are refused until the
    /// registration is accepted.
    pub async fn bind_foreign(
        addr: SocketAddrV4,
        bbmd: SocketAddrV4,
        ttl_seconds: u16,
        upstream: Upstream,
    ) -> Result<Self, LinkError> {
        let unicast = UdpSocket::bind(SocketAddr::V4(addr)).await?;
        unicast.set_broadcast(true)?;
        let local_addr = match unicast.local_addr()? {
            SocketAddr::V4(resolved) => resolved,
            SocketAddr::V6(_) => return Err(LinkError::InvalidDestination),
        };

        let (registration, _) = watch::channel(RegistrationStatus::Pending);
        let state = Arc::new(LinkState {
            unicast: Arc::new(unicast),
            local_addr,
            local_mac: Mac::from(local_addr),
            broadcast_target: None,
            mode: Mode::Foreign { bbmd },
            bbmd: Mutex::new(None),
            pending: Mutex::new(None),
            command_lock: Mutex::new(()),
            registration,
            upstream,
        });

        let tasks = vec![
            spawn_reader(state.clone(), state.unicast.clone(), false),
            spawn_renewal(state.clone(), bbmd, ttl_seconds),
        ];
        Ok(BipLink { state, tasks })
    }

    pub fn local_addr(&self) -> SocketAddrV4 {
        self.state.local_addr
    }

    /// The station MAC other devices reach this link at.
    pub fn local_mac(&self) -> Mac {
        self.state.local_mac
    }

    pub fn registration_status(&self) -> RegistrationStatus {
        *self.state.registration.borrow()
    }

    /// Waits until the BBMD accepts or rejects the foreign registration.
    pub async fn wait_registered(&self, wait: Duration) -> Result<(), LinkError> {
        if matches!(self.state.mode, Mode::Normal) {
            return Err(LinkError::BbmdNotConfigured);
        }
        let mut rx = self.state.registration.subscribe();
        let status = timeout(
            wait,
            rx.wait_for(|s| {
                matches!(
                    s,
                    RegistrationStatus::Registered | RegistrationStatus::Rejected(_)
                )
            }),
        )
        .await
        .map_err(|_| LinkError::Timeout)?
        .map_err(|_| LinkError::Closed)?;
        match *status {
            RegistrationStatus::Rejected(code) => Err(LinkError::BvlcResult(code)),
            _ => Ok(()),
        }
    }

    /// Configures (or replaces) the broadcast distribution table, turning
    /// this link into a BBMD. The table should normally include the link's
    /// own address.
    pub async fn set_broadcast_distribution_table(
        &self,
        entries: Vec<BroadcastDistributionEntry>,
    ) {
        let mut guard = self.state.bbmd.lock().await;
        match guard.as_mut() {
            Some(tables) => tables.bdt = entries,
            None => {
                *guard = Some(BbmdTables {
                    bdt: entries,
                    fdt: ForeignDeviceTable::new(),
                })
            }
        }
    }

    /// Stops the reader and renewal tasks. Also happens on drop.
    pub fn close(&mut self) {
        for task in self.tasks.drain(..) {
            task.abort();
        }
    }

    /// Registers with an arbitrary BBMD once and waits for the Result.
    pub async fn register_foreign_device(
        &self,
        bbmd: SocketAddrV4,
        ttl_seconds: u16,
    ) -> Result<(), LinkError> {
        let reply = self
            .bbmd_command(
                bbmd,
                BvlcMessage::RegisterForeignDevice { ttl_seconds },
                BvlcFunction::Result,
            )
            .await?;
        expect_success(reply)
    }

    pub async fn read_broadcast_distribution_table(
        &self,
        bbmd: SocketAddrV4,
    ) -> Result<Vec<BroadcastDistributionEntry>, LinkError> {
        let reply = self
            .bbmd_command(
                bbmd,
                BvlcMessage::ReadBroadcastDistributionTable,
                BvlcFunction::ReadBroadcastDistributionTableAck,
            )
            .await?;
        match reply {
            BvlcMessage::ReadBroadcastDistributionTableAck { entries } => Ok(entries),
            _ => Err(LinkError::InvalidFrame),
        }
    }

    pub async fn write_broadcast_distribution_table(
        &self,
        bbmd: SocketAddrV4,
        entries: &[BroadcastDistributionEntry],
    ) -> Result<(), LinkError> {
        let reply = self
            .bbmd_command(
                bbmd,
                BvlcMessage::WriteBroadcastDistributionTable {
                    entries: entries.to_vec(),
                },
                BvlcFunction::Result,
            )
            .await?;
        expect_success(reply)
    }

    pub async fn read_foreign_device_table(
        &self,
        bbmd: SocketAddrV4,
    ) -> Result<Vec<ForeignDeviceTableEntry>, LinkError> {
        let reply = self
            .bbmd_command(
                bbmd,
                BvlcMessage::ReadForeignDeviceTable,
                BvlcFunction::ReadForeignDeviceTableAck,
            )
            .await?;
        match reply {
            BvlcMessage::ReadForeignDeviceTableAck { entries } => Ok(entries),
            _ => Err(LinkError::InvalidFrame),
        }
    }

    pub async fn delete_foreign_device_table_entry(
        &self,
        bbmd: SocketAddrV4,
        address: SocketAddrV4,
    ) -> Result<(), LinkError> {
        let reply = self
            .bbmd_command(
                bbmd,
                BvlcMessage::DeleteForeignDeviceTableEntry { address },
                BvlcFunction::Result,
            )
            .await?;
        expect_success(reply)
    }

    /// One management exchange at a time: send, then have the reader task
    /// hand the matching reply back through a oneshot.
    async fn bbmd_command(
        &self,
        target: SocketAddrV4,
        request: BvlcMessage,
        expect: BvlcFunction,
    ) -> Result<BvlcMessage, LinkError> {
        let _guard = self.state.command_lock.lock().await;
        let (tx, rx) = oneshot::channel();
        *self.state.pending.lock().await = Some(PendingCommand {
            expect,
            from: target,
            reply: tx,
        });

        if let Err(e) = send_message(&self.state, &request, target).await {
            self.state.pending.lock().await.take();
            return Err(e);
        }

        match timeout(COMMAND_TIMEOUT, rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(LinkError::Closed),
            Err(_) => {
                self.state.pending.lock().await.take();
                Err(LinkError::Timeout)
            }
        }
    }
}

impl Sink for BipLink {
    async fn indication(&self, pdu: Pdu) -> Result<(), LinkError> {
        match pdu.destination.kind() {
            AddressKind::LocalStation(mac) => {
                let target = station_target(mac)?;
                send_message(
                    &self.state,
                    &BvlcMessage::OriginalUnicastNpdu { npdu: pdu.data },
                    target,
                )
                .await
            }
            AddressKind::LocalBroadcast => match self.state.mode {
                Mode::Foreign { bbmd } => {
                    if self.registration_status() != RegistrationStatus::Registered {
                        return Err(LinkError::NotRegistered);
                    }
                    send_message(
                        &self.state,
                        &BvlcMessage::DistributeBroadcastToNetwork { npdu: pdu.data },
                        bbmd,
                    )
                    .await
                }
                Mode::Normal => {
                    let target = self
                        .state
                        .broadcast_target
                        .ok_or(LinkError::NoBroadcast)?;
                    // BBMD duty: our own broadcasts go to peers and
                    // foreign devices as well.
                    distribute(
                        &self.state,
                        self.state.local_addr,
                        &pdu.data,
                        FanOut::FromLocalSegment,
                    )
                    .await;
                    send_message(
                        &self.state,
                        &BvlcMessage::OriginalBroadcastNpdu { npdu: pdu.data },
                        target,
                    )
                    .await
                }
            },
            _ => Err(LinkError::InvalidDestination),
        }
    }
}

impl Drop for BipLink {
    fn drop(&mut self) {
        self.close();
    }
}

fn directed_broadcast(ip: Ipv4Addr, mask: Ipv4Addr) -> Ipv4Addr {
    Ipv4Addr::from(u32::from(ip) | !u32::from(mask))
}

fn station_target(mac: Mac) -> Result<SocketAddrV4, LinkError> {
    match mac.to_socket_addr() {
        Some(SocketAddr::V4(addr)) => Ok(addr),
        _ => Err(LinkError::InvalidDestination),
    }
}

fn expect_success(reply: BvlcMessage) -> Result<(), LinkError> {
    match reply {
        BvlcMessage::Result { code: 0 } => Ok(()),
        BvlcMessage::Result { code } => Err(LinkError::BvlcResult(code)),
        _ => Err(LinkError::InvalidFrame),
    }
}

fn spawn_reader(
    state: Arc<LinkState>,
    socket: Arc<UdpSocket>,
    on_broadcast_socket: bool,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut buf = [0u8; MAX_BIP_FRAME_LEN];
        loop {
            let (n, src) = match socket.recv_from(&mut buf).await {
                Ok(received) => received,
                Err(e) => {
                    log::warn!("bip receive error: {e}");
                    continue;
                }
            };
            let SocketAddr::V4(src) = src else { continue };
            if src == state.local_addr {
                // Our own broadcast coming back around.
                continue;
            }
            match BvlcMessage::decode(&buf[..n]) {
                Ok(message) => dispatch(&state, message, src, on_broadcast_socket).await,
                Err(DecodeError::Unsupported) => {
                    log::debug!("unsupported BVLC function 0x{:02x} from {src}", buf[1]);
                }
                Err(_) => {
                    log::debug!("malformed BVLC frame from {src} ({n} bytes)");
                }
            }
        }
    })
}

fn spawn_renewal(state: Arc<LinkState>, bbmd: SocketAddrV4, ttl_seconds: u16) -> JoinHandle<()> {
    tokio::spawn(async move {
        let interval =
            Duration::from_secs(u64::from(ttl_seconds) / 2).max(Duration::from_secs(1));
        let register = BvlcMessage::RegisterForeignDevice { ttl_seconds };
        loop {
            if let Err(e) = send_message(&state, &register, bbmd).await {
                log::warn!("foreign device registration to {bbmd} failed: {e}");
            }
            tokio::time::sleep(interval).await;
        }
    })
}

/// Which recipients a broadcast still owes.
enum FanOut {
    /// Already on the local segment (an Original-Broadcast, ours or
    /// received): peers and foreign devices remain.
    FromLocalSegment,
    /// A unicast Distribute-Broadcast: the local segment, peers, and every
    /// foreign device except the sender remain.
    NeedsLocalSegment { exclude_foreign: SocketAddrV4 },
    /// A Forwarded-NPDU from a peer BBMD: never re-forwarded to peers,
    /// only rebroadcast locally (one-hop configurations) and to foreign
    /// devices.
    FromPeer { received_on_broadcast: bool },
}

async fn distribute(state: &LinkState, origin: SocketAddrV4, npdu: &[u8], scope: FanOut) {
    let targets = {
        let mut guard = state.bbmd.lock().await;
        let Some(tables) = guard.as_mut() else {
            return;
        };
        let mut targets: Vec<SocketAddrV4> = Vec::new();
        match scope {
            FanOut::FromLocalSegment => {
                for entry in &tables.bdt {
                    if entry.address != state.local_addr {
                        targets.push(entry.forward_target());
                    }
                }
                targets.extend(tables.fdt.live_addresses());
            }
            FanOut::NeedsLocalSegment { exclude_foreign } => {
                for entry in &tables.bdt {
                    if entry.address == state.local_addr {
                        if let Some(broadcast) = state.broadcast_target {
                            targets.push(broadcast);
                        }
                    } else {
                        targets.push(entry.forward_target());
                    }
                }
                for addr in tables.fdt.live_addresses() {
                    if addr != exclude_foreign {
                        targets.push(addr);
                    }
                }
            }
            FanOut::FromPeer {
                received_on_broadcast,
            } => {
                let in_own_table = tables.bdt.iter().any(|e| e.address == state.local_addr);
                if !received_on_broadcast && in_own_table {
                    if let Some(broadcast) = state.broadcast_target {
                        targets.push(broadcast);
                    }
                }
                targets.extend(tables.fdt.live_addresses());
            }
        }
        targets
    };

    if targets.is_empty() {
        return;
    }
    let forwarded = BvlcMessage::ForwardedNpdu {
        origin,
        npdu: npdu.to_vec(),
    };
    for target in targets {
        if let Err(e) = send_message(state, &forwarded, target).await {
            log::warn!("broadcast distribution to {target} failed: {e}");
        }
    }
}

async fn dispatch(
    state: &Arc<LinkState>,
    message: BvlcMessage,
    src: SocketAddrV4,
    on_broadcast_socket: bool,
) {
    match message {
        BvlcMessage::OriginalUnicastNpdu { npdu } => {
            deliver(state, src, Address::local_station(state.local_mac), npdu).await;
        }
        BvlcMessage::OriginalBroadcastNpdu { npdu } => {
            distribute(state, src, &npdu, FanOut::FromLocalSegment).await;
            deliver(state, src, Address::local_broadcast(), npdu).await;
        }
        BvlcMessage::DistributeBroadcastToNetwork { npdu } => {
            if state.bbmd.lock().await.is_none() {
                send_result(state, src, 0x0060).await;
                return;
            }
            distribute(
                state,
                src,
                &npdu,
                FanOut::NeedsLocalSegment {
                    exclude_foreign: src,
                },
            )
            .await;
            deliver(state, src, Address::local_broadcast(), npdu).await;
        }
        BvlcMessage::ForwardedNpdu { origin, npdu } => {
            distribute(
                state,
                origin,
                &npdu,
                FanOut::FromPeer {
                    received_on_broadcast: on_broadcast_socket,
                },
            )
            .await;
            deliver(state, origin, Address::local_broadcast(), npdu).await;
        }
        BvlcMessage::RegisterForeignDevice { ttl_seconds } => {
            let code = {
                let mut guard = state.bbmd.lock().await;
                match guard.as_mut() {
                    Some(tables) if ttl_seconds == 0 => {
                        if tables.fdt.delete(src) {
                            0x0000
                        } else {
                            0x0050
                        }
                    }
                    Some(tables) => {
                        tables.fdt.register(src, ttl_seconds);
                        0x0000
                    }
                    None => 0x0030,
                }
            };
            send_result(state, src, code).await;
        }
        BvlcMessage::ReadBroadcastDistributionTable => {
            let reply = state
                .bbmd
                .lock()
                .await
                .as_ref()
                .map(|tables| BvlcMessage::ReadBroadcastDistributionTableAck {
                    entries: tables.bdt.clone(),
                });
            match reply {
                Some(ack) => {
                    if let Err(e) = send_message(state, &ack, src).await {
                        log::warn!("bdt read reply to {src} failed: {e}");
                    }
                }
                None => send_result(state, src, 0x0020).await,
            }
        }
        BvlcMessage::WriteBroadcastDistributionTable { entries } => {
            let code = {
                let mut guard = state.bbmd.lock().await;
                match guard.as_mut() {
                    Some(tables) => {
                        tables.bdt = entries;
                        0x0000
                    }
                    None => 0x0010,
                }
            };
            send_result(state, src, code).await;
        }
        BvlcMessage::ReadForeignDeviceTable => {
            let reply = state
                .bbmd
                .lock()
                .await
                .as_mut()
                .map(|tables| BvlcMessage::ReadForeignDeviceTableAck {
                    entries: tables.fdt.snapshot(),
                });
            match reply {
                Some(ack) => {
                    if let Err(e) = send_message(state, &ack, src).await {
                        log::warn!("fdt read reply to {src} failed: {e}");
                    }
                }
                None => send_result(state, src, 0x0040).await,
            }
        }
        BvlcMessage::DeleteForeignDeviceTableEntry { address } => {
            let code = {
                let mut guard = state.bbmd.lock().await;
                match guard.as_mut() {
                    Some(tables) => {
                        if tables.fdt.delete(address) {
                            0x0000
                        } else {
                            0x0050
                        }
                    }
                    None => 0x0050,
                }
            };
            send_result(state, src, code).await;
        }
        BvlcMessage::Result { code } => handle_result(state, code, src).await,
        ack @ (BvlcMessage::ReadBroadcastDistributionTableAck { .. }
        | BvlcMessage::ReadForeignDeviceTableAck { .. }) => {
            if !resolve_pending(state, ack, src).await {
                log::debug!("unexpected table ack from {src}");
            }
        }
    }
}

async fn deliver(state: &LinkState, source: SocketAddrV4, destination: Address, npdu: Vec<u8>) {
    let pdu = Pdu::new(npdu, destination)
        .with_source(Address::local_station(Mac::from(source)));
    if state.upstream.confirmation(pdu).await.is_err() {
        log::debug!("upstream binding closed, dropping inbound npdu");
    }
}

async fn resolve_pending(state: &LinkState, message: BvlcMessage, src: SocketAddrV4) -> bool {
    let mut slot = state.pending.lock().await;
    let matched = slot
        .as_ref()
        .is_some_and(|p| p.expect == message.function() && p.from == src);
    if matched {
        if let Some(pending) = slot.take() {
            let _ = pending.reply.send(Ok(message));
        }
    }
    matched
}

async fn handle_result(state: &LinkState, code: u16, src: SocketAddrV4) {
    {
        let mut slot = state.pending.lock().await;
        if let Some(pending) = slot.as_ref() {
            if pending.from == src {
                if pending.expect == BvlcFunction::Result {
                    if let Some(pending) = slot.take() {
                        let _ = pending.reply.send(Ok(BvlcMessage::Result { code }));
                    }
                    return;
                }
                if code != 0 {
                    // The ack we were waiting for is not coming.
                    if let Some(pending) = slot.take() {
                        let _ = pending.reply.send(Err(LinkError::BvlcResult(code)));
                    }
                    return;
                }
                // A stray success result while waiting on an ack; keep
                // waiting for the real reply.
            }
        }
    }

    if let Mode::Foreign { bbmd } = state.mode {
        if src == bbmd {
            let status = if code == 0 {
                RegistrationStatus::Registered
            } else {
                log::warn!("bbmd {bbmd} rejected foreign registration: 0x{code:04x}");
                RegistrationStatus::Rejected(code)
            };
            state.registration.send_replace(status);
            return;
        }
    }
    log::debug!("unexpected BVLC result 0x{code:04x} from {src}");
}

async fn send_result(state: &LinkState, target: SocketAddrV4, code: u16) {
    if let Err(e) = send_message(state, &BvlcMessage::Result { code }, target).await {
        log::warn!("result reply to {target} failed: {e}");
    }
}

async fn send_message(
    state: &LinkState,
    message: &BvlcMessage,
    target: SocketAddrV4,
) -> Result<(), LinkError> {
    let mut buf = [0u8; MAX_BIP_FRAME_LEN];
    let mut w = Writer::new(&mut buf);
    message
        .encode(&mut w)
        .map_err(|_| LinkError::FrameTooLarge)?;
    state
        .unicast
        .send_to(w.as_written(), SocketAddr::V4(target))
        .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::{BipLink, RegistrationStatus};
    use crate::bip::bvlc::BvlcMessage;
    use crate::bip::tables::BroadcastDistributionEntry;
    use crate::link::{bind, LinkError, Sink};
    use bacstack_core::encoding::Writer;
    use bacstack_core::{Address, Mac, Pdu};
    use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
    use tokio::net::UdpSocket;
    use tokio::time::Duration;

    fn localhost(port: u16) -> SocketAddrV4 {
        SocketAddrV4::new(Ipv4Addr::LOCALHOST, port)
    }

    fn as_v4(addr: SocketAddr) -> SocketAddrV4 {
        match addr {
            SocketAddr::V4(v4) => v4,
            SocketAddr::V6(v6) => panic!("unexpected v6 address {v6}"),
        }
    }

    async fn send_raw(socket: &UdpSocket, message: &BvlcMessage, target: SocketAddrV4) {
        let mut buf = [0u8; 256];
        let mut w = Writer::new(&mut buf);
        message.encode(&mut w).unwrap();
        socket.send_to(w.as_written(), target).await.unwrap();
    }

    async fn recv_message(socket: &UdpSocket) -> (BvlcMessage, SocketAddrV4) {
        let mut buf = [0u8; 256];
        let (n, src) = socket.recv_from(&mut buf).await.unwrap();
        (BvlcMessage::decode(&buf[..n]).unwrap(), as_v4(src))
    }

    #[tokio::test]
    async fn unicast_delivery_between_links() {
        let (up_a, _conf_a) = bind(8);
        let (up_b, mut conf_b) = bind(8);
        let a = BipLink::bind(localhost(0), None, up_a).await.unwrap();
        let b = BipLink::bind(localhost(0), None, up_b).await.unwrap();

        let dest = Address::local_station(Mac::from(b.local_addr()));
        a.indication(Pdu::new([0x01, 0x00, 0x10, 0x08], dest))
            .await
            .unwrap();

        let received = conf_b.recv().await.unwrap();
        assert_eq!(received.data, [0x01, 0x00, 0x10, 0x08]);
        assert_eq!(
            received.source,
            Some(Address::local_station(Mac::from(a.local_addr())))
        );
        assert_eq!(received.destination, dest);
    }

    #[tokio::test]
    async fn local_broadcast_requires_a_mask() {
        let (up, _conf) = bind(1);
        let link = BipLink::bind(localhost(0), None, up).await.unwrap();
        let err = link
            .indication(Pdu::new([0], Address::local_broadcast()))
            .await
            .unwrap_err();
        assert!(matches!(err, LinkError::NoBroadcast));
    }

    #[tokio::test]
    async fn remote_destinations_are_refused() {
        let (up, _conf) = bind(1);
        let link = BipLink::bind(localhost(0), None, up).await.unwrap();
        let err = link
            .indication(Pdu::new([0], Address::remote_station(5, Mac::from_octet(1))))
            .await
            .unwrap_err();
        assert!(matches!(err, LinkError::InvalidDestination));
    }

    #[tokio::test]
    async fn foreign_device_registers_then_distributes() {
        let bbmd = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let bbmd_addr = as_v4(bbmd.local_addr().unwrap());

        let (up, _conf) = bind(8);
        let link = BipLink::bind_foreign(localhost(0), bbmd_addr, 60, up)
            .await
            .unwrap();
        assert_eq!(link.registration_status(), RegistrationStatus::Pending);

        let (request, src) = recv_message(&bbmd).await;
        assert_eq!(
            request,
            BvlcMessage::RegisterForeignDevice { ttl_seconds: 60 }
        );
        send_raw(&bbmd, &BvlcMessage::Result { code: 0 }, src).await;

        link.wait_registered(Duration::from_secs(2)).await.unwrap();
        assert_eq!(link.registration_status(), RegistrationStatus::Registered);

        link.indication(Pdu::new([0xAA], Address::local_broadcast()))
            .await
            .unwrap();
        let (distributed, _) = recv_message(&bbmd).await;
        assert_eq!(
            distributed,
            BvlcMessage::DistributeBroadcastToNetwork { npdu: vec![0xAA] }
        );
    }

    #[tokio::test]
    async fn unregistered_foreign_device_cannot_broadcast() {
        let bbmd = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let bbmd_addr = as_v4(bbmd.local_addr().unwrap());

        let (up, _conf) = bind(1);
        let link = BipLink::bind_foreign(localhost(0), bbmd_addr, 30, up)
            .await
            .unwrap();

        let err = link
            .indication(Pdu::new([0], Address::local_broadcast()))
            .await
            .unwrap_err();
        assert!(matches!(err, LinkError::NotRegistered));
    }

    #[tokio::test]
    async fn rejected_registration_surfaces_the_code() {
        let bbmd = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let bbmd_addr = as_v4(bbmd.local_addr().unwrap());

        let (up, _conf) = bind(1);
        let link = BipLink::bind_foreign(localhost(0), bbmd_addr, 30, up)
            .await
            .unwrap();

        let (_, src) = recv_message(&bbmd).await;
        send_raw(&bbmd, &BvlcMessage::Result { code: 0x0030 }, src).await;

        let err = link
            .wait_registered(Duration::from_secs(2))
            .await
            .unwrap_err();
        assert!(matches!(err, LinkError::BvlcResult(0x0030)));
        assert_eq!(
            link.registration_status(),
            RegistrationStatus::Rejected(0x0030)
        );
    }

    #[tokio::test]
    async fn bbmd_forwards_distribute_to_peers_and_foreign_devices() {
        let peer = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let peer_addr = as_v4(peer.local_addr().unwrap());

        let (up, mut conf) = bind(8);
        let bbmd = BipLink::bind(localhost(0), None, up).await.unwrap();
        bbmd.set_broadcast_distribution_table(vec![
            BroadcastDistributionEntry::peer(bbmd.local_addr()),
            BroadcastDistributionEntry::peer(peer_addr),
        ])
        .await;

        // One foreign device through the real link type, one raw observer.
        let (foreign_up, _foreign_conf) = bind(8);
        let foreign = BipLink::bind_foreign(localhost(0), bbmd.local_addr(), 60, foreign_up)
            .await
            .unwrap();
        foreign
            .wait_registered(Duration::from_secs(2))
            .await
            .unwrap();

        let observer = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        send_raw(
            &observer,
            &BvlcMessage::RegisterForeignDevice { ttl_seconds: 60 },
            bbmd.local_addr(),
        )
        .await;
        let (reply, _) = recv_message(&observer).await;
        assert_eq!(reply, BvlcMessage::Result { code: 0 });

        foreign
            .indication(Pdu::new([0x01, 0x00], Address::local_broadcast()))
            .await
            .unwrap();

        let delivered = conf.recv().await.unwrap();
        assert_eq!(delivered.destination, Address::local_broadcast());
        assert_eq!(
            delivered.source,
            Some(Address::local_station(Mac::from(foreign.local_addr())))
        );
        assert_eq!(delivered.data, [0x01, 0x00]);

        let (to_peer, _) = recv_message(&peer).await;
        assert_eq!(
            to_peer,
            BvlcMessage::ForwardedNpdu {
                origin: foreign.local_addr(),
                npdu: vec![0x01, 0x00],
            }
        );

        let (to_observer, _) = recv_message(&observer).await;
        assert_eq!(
            to_observer,
            BvlcMessage::ForwardedNpdu {
                origin: foreign.local_addr(),
                npdu: vec![0x01, 0x00],
            }
        );
    }

    #[tokio::test]
    async fn registration_ttl_zero_deletes_the_entry() {
        let (up, _conf) = bind(1);
        let bbmd = BipLink::bind(localhost(0), None, up).await.unwrap();
        bbmd.set_broadcast_distribution_table(vec![]).await;

        let client = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        send_raw(
            &client,
            &BvlcMessage::RegisterForeignDevice { ttl_seconds: 30 },
            bbmd.local_addr(),
        )
        .await;
        assert_eq!(recv_message(&client).await.0, BvlcMessage::Result { code: 0 });

        send_raw(
            &client,
            &BvlcMessage::RegisterForeignDevice { ttl_seconds: 0 },
            bbmd.local_addr(),
        )
        .await;
        assert_eq!(recv_message(&client).await.0, BvlcMessage::Result { code: 0 });

        send_raw(
            &client,
            &BvlcMessage::RegisterForeignDevice { ttl_seconds: 0 },
            bbmd.local_addr(),
        )
        .await;
        assert_eq!(
            recv_message(&client).await.0,
            BvlcMessage::Result { code: 0x0050 }
        );
    }

    #[tokio::test]
    async fn management_functions_nak_without_a_bdt() {
        let (up, _conf) = bind(1);
        let link = BipLink::bind(localhost(0), None, up).await.unwrap();
        let client = UdpSocket::bind("127.0.0.1:0").await.unwrap();

        for (request, nak) in [
            (BvlcMessage::ReadBroadcastDistributionTable, 0x0020),
            (
                BvlcMessage::RegisterForeignDevice { ttl_seconds: 60 },
                0x0030,
            ),
            (BvlcMessage::ReadForeignDeviceTable, 0x0040),
            (
                BvlcMessage::DistributeBroadcastToNetwork { npdu: vec![0x01] },
                0x0060,
            ),
        ] {
            send_raw(&client, &request, link.local_addr()).await;
            assert_eq!(
                recv_message(&client).await.0,
                BvlcMessage::Result { code: nak }
            );
        }
    }

    #[tokio::test]
    async fn table_management_round_trip() {
        let (up, _conf) = bind(4);
        let bbmd = BipLink::bind(localhost(0), None, up).await.unwrap();
        bbmd.set_broadcast_distribution_table(vec![BroadcastDistributionEntry::peer(
            bbmd.local_addr(),
        )])
        .await;

        let (admin_up, _admin_conf) = bind(4);
        let admin = BipLink::bind(localhost(0), None, admin_up).await.unwrap();

        let entries = vec![
            BroadcastDistributionEntry::peer(bbmd.local_addr()),
            BroadcastDistributionEntry {
                address: SocketAddrV4::new(Ipv4Addr::new(10, 1, 2, 3), 47808),
                mask: Ipv4Addr::new(255, 255, 255, 0),
            },
        ];
        admin
            .write_broadcast_distribution_table(bbmd.local_addr(), &entries)
            .await
            .unwrap();
        assert_eq!(
            admin
                .read_broadcast_distribution_table(bbmd.local_addr())
                .await
                .unwrap(),
            entries
        );

        let (foreign_up, _foreign_conf) = bind(4);
        let foreign = BipLink::bind_foreign(localhost(0), bbmd.local_addr(), 99, foreign_up)
            .await
            .unwrap();
        foreign
            .wait_registered(Duration::from_secs(2))
            .await
            .unwrap();

        let fdt = admin
            .read_foreign_device_table(bbmd.local_addr())
            .await
            .unwrap();
        assert_eq!(fdt.len(), 1);
        assert_eq!(fdt[0].address, foreign.local_addr());
        assert_eq!(fdt[0].ttl_seconds, 99);

        admin
            .delete_foreign_device_table_entry(bbmd.local_addr(), foreign.local_addr())
            .await
            .unwrap();
        assert!(admin
            .read_foreign_device_table(bbmd.local_addr())
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn forwarded_npdu_delivers_the_origin_as_source() {
        let (up, mut conf) = bind(4);
        let link = BipLink::bind(localhost(0), None, up).await.unwrap();

        let sender = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let origin = SocketAddrV4::new(Ipv4Addr::new(10, 1, 2, 3), 47808);
        send_raw(
            &sender,
            &BvlcMessage::ForwardedNpdu {
                origin,
                npdu: vec![1, 2, 3],
            },
            link.local_addr(),
        )
        .await;

        let received = conf.recv().await.unwrap();
        assert_eq!(received.data, [1, 2, 3]);
        assert_eq!(
            received.source,
            Some(Address::local_station(Mac::from(origin)))
        );
        assert_eq!(received.destination, Address::local_broadcast());
    }

    #[tokio::test(start_paused = true)]
    async fn table_read_times_out_without_a_reply() {
        let silent = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let silent_addr = as_v4(silent.local_addr().unwrap());

        let (up, _conf) = bind(1);
        let link = BipLink::bind(localhost(0), None, up).await.unwrap();
        let err = link
            .read_broadcast_distribution_table(silent_addr)
            .await
            .unwrap_err();
        assert!(matches!(err, LinkError::Timeout));
    }
}
