//! Console connection management.
//!
//! Owns the UDP session with the console: handshake, keepalive,
//! reconnection, outgoing parameter writes, serialized value reads, and
//! routing of inbound datagrams to the value cache, the meter decoder,
//! and the update bus.
//!
//! The protocol carries no correlation ids, so at most one value
//! request may be outstanding at a time; the pending-request slot is
//! guarded by an async mutex and a reply to *any* non-meter address
//! resolves it.

use crate::cache::ValueCache;
use crate::channels::{ChannelMap, MASTER};
use crate::config::{ConsoleConfig, TimingConfig};
use crate::events::{Update, UpdateBus};
use crate::meters;
use crate::osc::{OscArg, OscMessage};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::net::UdpSocket;
use tokio::sync::{broadcast, oneshot};
use tokio::time::{sleep, timeout, MissedTickBehavior};
use tracing::{debug, info, warn};


/// Identification request; the reply carries (ip, name, model, firmware).
const XINFO: &str = "/xinfo";
/// Keepalive. The console stops pushing subscribed updates if it does
/// not hear this roughly every 10 seconds; it is sent on a 9s timer
/// for the whole life of the session.
const XREMOTE: &str = "/xremote";
/// Batch subscription request.
const FORMAT_SUBSCRIBE: &str = "/formatsubscribe";
/// Meter poll request.
const METERS: &str = "/meters";
/// Meter bank carrying the main stereo output levels.
const METER_BANK: &str = "/meters/2";
/// Name registered with the console for the fader subscription.
const SUBSCRIPTION_NAME: &str = "bridge_faders";

/// Session state. Exactly one instance per connection; all transitions
/// go through the single mutex-guarded variable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Handshaking,
    Connected,
}

/// Connection-level failures surfaced to callers.
#[derive(Debug, Error)]
pub enum ConnectionError {
    #[error("console did not answer the handshake within the timeout")]
    HandshakeTimeout,
    #[error("console did not answer the handshake after {attempts} attempts")]
    HandshakeFailed { attempts: u32 },
    #[error("not connected to the console")]
    NotConnected,
    #[error("channel {0:?} is not in the channel map")]
    UnknownChannel(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// The single in-flight value request.
///
/// `gate` serializes issuers (single-outstanding-request invariant);
/// `reply` hands the matching datagram from the receive loop to the
/// waiting issuer.
#[derive(Debug)]
struct PendingSlot {
    gate: tokio::sync::Mutex<()>,
    reply: Mutex<Option<oneshot::Sender<OscMessage>>>,
}

/// The console session. Cheaply cloneable; clones share the socket,
/// state, cache, and bus, which is how the background tasks hold on to
/// the session.
#[derive(Debug, Clone)]
pub struct X32Connection {
    socket: Arc<UdpSocket>,
    channels: Arc<ChannelMap>,
    cache: ValueCache,
    bus: UpdateBus,
    state: Arc<Mutex<ConnectionState>>,
    pending: Arc<PendingSlot>,
    timing: TimingConfig,
    shutdown: Arc<Mutex<bool>>,
    tasks_started: Arc<Mutex<bool>>,
}

impl X32Connection {
    /// Bind the local socket, point it at the console, and start the
    /// receive loop. The session starts Disconnected; call
    /// [`connect`](Self::connect) to run the handshake.
    pub async fn bind(
        console: &ConsoleConfig,
        channels: ChannelMap,
        timing: TimingConfig,
    ) -> Result<Self, ConnectionError> {
        let socket = UdpSocket::bind(("0.0.0.0", console.local_port)).await?;
        socket
            .connect((console.host.as_str(), console.port))
            .await?;
        info!(
            "OSC socket bound on {} for console {}:{}",
            socket.local_addr()?,
            console.host,
            console.port
        );

        let conn = Self {
            socket: Arc::new(socket),
            channels: Arc::new(channels),
            cache: ValueCache::new(),
            bus: UpdateBus::new(),
            state: Arc::new(Mutex::new(ConnectionState::Disconnected)),
            pending: Arc::new(PendingSlot {
                gate: tokio::sync::Mutex::new(()),
                reply: Mutex::new(None),
            }),
            timing,
            shutdown: Arc::new(Mutex::new(false)),
            tasks_started: Arc::new(Mutex::new(false)),
        };
        conn.spawn_receive_loop();
        Ok(conn)
    }

    /// Establish the session: handshake with bounded retries, then
    /// subscribe and start the keepalive and meter-poll tasks.
    ///
    /// Exhausting the retry budget here is fatal to the caller; once
    /// established, later connection loss is handled by the maintenance
    /// task, which retries forever.
    pub async fn connect(&self) -> Result<(), ConnectionError> {
        let attempts = self.timing.handshake_attempts.max(1);
        for attempt in 1..=attempts {
            debug!("Handshake attempt {}/{}", attempt, attempts);
            match self.try_handshake().await {
                Ok(reply) => {
                    self.finish_connect(reply).await?;
                    self.spawn_background_tasks();
                    return Ok(());
                },
                Err(e) => {
                    warn!("Handshake attempt {}/{} failed: {}", attempt, attempts, e);
                    if attempt < attempts {
                        sleep(self.timing.retry_delay()).await;
                    }
                },
            }
        }
        Err(ConnectionError::HandshakeFailed { attempts })
    }

    /// Current session state.
    pub fn state(&self) -> ConnectionState {
        *self.state.lock()
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// New subscription to decoded state-change events.
    pub fn subscribe(&self) -> broadcast::Receiver<Update> {
        self.bus.subscribe()
    }

    /// The channel map this session resolves names against.
    pub fn channels(&self) -> &ChannelMap {
        &self.channels
    }

    /// Stop the background tasks. The session cannot be reused.
    pub fn shutdown(&self) {
        *self.shutdown.lock() = true;
        *self.state.lock() = ConnectionState::Disconnected;
        self.cache.clear();
    }

    // ----- outgoing writes ------------------------------------------------

    /// Write a fader level for a mapped channel or [`MASTER`].
    /// Fire-and-forget; the console does not acknowledge writes.
    pub async fn set_fader(&self, channel: &str, value: f32) -> Result<(), ConnectionError> {
        let address = self
            .channels
            .fader_address(channel)
            .ok_or_else(|| ConnectionError::UnknownChannel(channel.to_string()))?;
        self.set_value(&address, OscArg::Float(value.clamp(0.0, 1.0)))
            .await
    }

    /// Write a mute state. `muted = true` sends the console's
    /// `/mix/on 0` (channel off / inaudible).
    pub async fn set_mute(&self, channel: &str, muted: bool) -> Result<(), ConnectionError> {
        let address = self
            .channels
            .mute_address(channel)
            .ok_or_else(|| ConnectionError::UnknownChannel(channel.to_string()))?;
        self.set_value(&address, OscArg::Int(if muted { 0 } else { 1 }))
            .await
    }

    /// Write one parameter. Rejected (not silently dropped) while the
    /// session is not Connected.
    pub async fn set_value(&self, address: &str, value: OscArg) -> Result<(), ConnectionError> {
        if !self.is_connected() {
            warn!("Rejecting write to {} while disconnected", address);
            return Err(ConnectionError::NotConnected);
        }
        debug!("Setting {} to {:?}", address, value);
        let msg = OscMessage::with_args(address, vec![value]);
        if let Err(e) = self.send(&msg).await {
            self.mark_disconnected("write failed");
            return Err(e);
        }
        Ok(())
    }

    // ----- outgoing reads -------------------------------------------------

    /// Read one parameter: cached value if the dispatch path has seen
    /// one, otherwise a bare request to the console. `Ok(None)` means
    /// the console did not answer within the reply timeout.
    pub async fn get_value(&self, address: &str) -> Result<Option<OscArg>, ConnectionError> {
        if let Some(value) = self.cache.get(address) {
            return Ok(Some(value));
        }
        self.query(address).await
    }

    /// Re-query fader and mute for every mapped channel plus master.
    /// Replies flow back through the normal dispatch path, so each one
    /// also republishes on the update bus.
    pub async fn request_snapshot(&self) -> Result<(), ConnectionError> {
        if !self.is_connected() {
            return Err(ConnectionError::NotConnected);
        }
        info!("Requesting snapshot of all channel values");
        let mut names: Vec<String> = self.channels.names().map(str::to_string).collect();
        names.push(MASTER.to_string());

        for name in &names {
            for address in [
                self.channels.fader_address(name),
                self.channels.mute_address(name),
            ]
            .into_iter()
            .flatten()
            {
                if self.query(&address).await?.is_none() {
                    warn!("No snapshot reply for {}", address);
                }
            }
        }
        Ok(())
    }

    /// Send a bare request and wait for the single pending reply.
    async fn query(&self, address: &str) -> Result<Option<OscArg>, ConnectionError> {
        if !self.is_connected() {
            return Err(ConnectionError::NotConnected);
        }

        // One outstanding request at a time; later callers park here.
        let _gate = self.pending.gate.lock().await;

        let (tx, rx) = oneshot::channel();
        *self.pending.reply.lock() = Some(tx);

        debug!("Requesting value for {}", address);
        self.send(&OscMessage::new(address)).await?;

        match timeout(self.timing.reply_timeout(), rx).await {
            Ok(Ok(reply)) => {
                let value = reply.first_arg().cloned();
                if let Some(ref v) = value {
                    self.cache.insert(&reply.address, v.clone());
                }
                Ok(value)
            },
            _ => {
                self.pending.reply.lock().take();
                debug!("Timed out waiting for {}", address);
                Ok(None)
            },
        }
    }

    // ----- handshake ------------------------------------------------------

    /// One handshake round trip: send `/xinfo`, wait for the reply.
    async fn try_handshake(&self) -> Result<OscMessage, ConnectionError> {
        *self.state.lock() = ConnectionState::Handshaking;

        let _gate = self.pending.gate.lock().await;
        let (tx, rx) = oneshot::channel();
        *self.pending.reply.lock() = Some(tx);

        self.send(&OscMessage::new(XINFO)).await?;

        match timeout(self.timing.handshake_timeout(), rx).await {
            Ok(Ok(reply)) => Ok(reply),
            _ => {
                self.pending.reply.lock().take();
                *self.state.lock() = ConnectionState::Disconnected;
                Err(ConnectionError::HandshakeTimeout)
            },
        }
    }

    /// Handshake reply observed: mark Connected, subscribe to fader
    /// updates, and send the first keepalive.
    async fn finish_connect(&self, reply: OscMessage) -> Result<(), ConnectionError> {
        *self.state.lock() = ConnectionState::Connected;

        let name = reply.args.get(1).and_then(OscArg::as_str).unwrap_or("?");
        let model = reply.args.get(2).and_then(OscArg::as_str).unwrap_or("?");
        let firmware = reply.args.get(3).and_then(OscArg::as_str).unwrap_or("?");
        info!("Connected to {} ({}, firmware {})", name, model, firmware);

        self.send(&self.subscription_message()).await?;
        self.send(&OscMessage::new(XREMOTE)).await?;
        Ok(())
    }

    /// `/formatsubscribe` listing every mapped fader plus master.
    fn subscription_message(&self) -> OscMessage {
        let mut args = vec![OscArg::Str(SUBSCRIPTION_NAME.to_string())];
        args.extend(
            self.channels
                .all_fader_addresses()
                .into_iter()
                .map(OscArg::Str),
        );
        args.push(OscArg::Int(0));
        args.push(OscArg::Int(0));
        args.push(OscArg::Int(self.timing.subscription_interval_ms as i32));
        OscMessage::with_args(FORMAT_SUBSCRIBE, args)
    }

    // ----- background tasks -----------------------------------------------

    /// Start the maintenance and meter-poll tasks once, on the first
    /// successful connect.
    fn spawn_background_tasks(&self) {
        let mut started = self.tasks_started.lock();
        if *started {
            return;
        }
        *started = true;
        self.spawn_maintenance();
        self.spawn_meter_poll();
    }

    /// Receive loop: blocks on the socket, decodes, dispatches. Never
    /// does slow work inline; publication is non-blocking.
    fn spawn_receive_loop(&self) {
        let conn = self.clone();
        tokio::spawn(async move {
            let mut buf = vec![0u8; 8192];
            loop {
                if *conn.shutdown.lock() {
                    break;
                }
                match conn.socket.recv(&mut buf).await {
                    Ok(len) => match OscMessage::decode(&buf[..len]) {
                        Ok(msg) => conn.dispatch(msg),
                        Err(e) => {
                            debug!("Dropping undecodable datagram ({} bytes): {}", len, e)
                        },
                    },
                    Err(e) => {
                        if *conn.shutdown.lock() {
                            break;
                        }
                        warn!("UDP receive failed: {}", e);
                        conn.mark_disconnected("receive failed");
                        sleep(Duration::from_millis(250)).await;
                    },
                }
            }
            debug!("Receive loop stopped");
        });
    }

    /// Keepalive while Connected; reconnection while Disconnected.
    ///
    /// One task alternates between the two so the conflicting state
    /// transitions can never race each other. Reconnection retries
    /// forever at the fixed delay; an operator expects eventual
    /// recovery once the console comes back.
    fn spawn_maintenance(&self) {
        let conn = self.clone();
        tokio::spawn(async move {
            loop {
                if *conn.shutdown.lock() {
                    break;
                }
                if conn.is_connected() {
                    sleep(conn.timing.keepalive_interval()).await;
                    if !conn.is_connected() || *conn.shutdown.lock() {
                        continue;
                    }
                    if let Err(e) = conn.send(&OscMessage::new(XREMOTE)).await {
                        warn!("Keepalive send failed: {}", e);
                        conn.mark_disconnected("keepalive failed");
                    }
                } else {
                    info!("Connection lost, attempting to reconnect");
                    match conn.try_handshake().await {
                        Ok(reply) => {
                            if let Err(e) = conn.finish_connect(reply).await {
                                warn!("Resubscribe after reconnect failed: {}", e);
                                conn.mark_disconnected("resubscribe failed");
                            }
                        },
                        Err(e) => debug!("Reconnect attempt failed: {}", e),
                    }
                    sleep(conn.timing.retry_delay()).await;
                }
            }
            debug!("Maintenance task stopped");
        });
    }

    /// Poll the meter bank at a fast fixed interval while Connected.
    fn spawn_meter_poll(&self) {
        let conn = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(conn.timing.meter_poll_interval());
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                if *conn.shutdown.lock() {
                    break;
                }
                if !conn.is_connected() {
                    continue;
                }
                let poll =
                    OscMessage::with_args(METERS, vec![OscArg::Str(METER_BANK.to_string())]);
                if let Err(e) = conn.send(&poll).await {
                    debug!("Meter poll send failed: {}", e);
                }
            }
            debug!("Meter poll stopped");
        });
    }

    // ----- inbound dispatch -----------------------------------------------

    /// Route one inbound message, in fixed pattern order: meter blobs,
    /// then fader/mute updates, then the pending-request slot.
    fn dispatch(&self, msg: OscMessage) {
        // Meter telemetry never resolves a pending request.
        if msg.address == METER_BANK {
            match msg.first_arg().and_then(OscArg::as_blob) {
                Some(blob) => match meters::decode_main_levels(&msg.address, blob) {
                    Ok(frame) => self.bus.publish(frame.into()),
                    Err(e) => debug!("Dropping meter blob: {}", e),
                },
                None => debug!("Meter reply without blob argument"),
            }
            return;
        }

        let published = self.route_channel_update(&msg);

        // No correlation ids: any non-meter reply resolves the single
        // outstanding request, including fader/mute replies that were
        // also republished above (snapshot re-queries rely on this).
        if let Some(tx) = self.pending.reply.lock().take() {
            let _ = tx.send(msg);
        } else if !published {
            debug!("Ignoring unsolicited message: {} {:?}", msg.address, msg.args);
        }
    }

    /// Fader and mute updates: cache, classify through the channel map,
    /// publish. Updates for unmapped channels are cached but not
    /// published.
    fn route_channel_update(&self, msg: &OscMessage) -> bool {
        if msg.address.ends_with("/mix/fader") {
            let Some(value) = msg.first_arg().and_then(OscArg::as_float) else {
                return false;
            };
            self.cache.insert(&msg.address, OscArg::Float(value));
            if let Some(name) = self.channels.name_for_address(&msg.address) {
                self.bus.publish(Update::Fader {
                    channel: name.to_string(),
                    value,
                });
            }
            true
        } else if msg.address.ends_with("/mix/on") {
            let Some(on) = msg.first_arg().and_then(OscArg::as_int) else {
                return false;
            };
            self.cache.insert(&msg.address, OscArg::Int(on));
            if let Some(name) = self.channels.name_for_address(&msg.address) {
                self.bus.publish(Update::Mute {
                    channel: name.to_string(),
                    on: on != 0,
                });
            }
            true
        } else {
            false
        }
    }

    // ----- plumbing -------------------------------------------------------

    async fn send(&self, msg: &OscMessage) -> Result<(), ConnectionError> {
        self.socket.send(&msg.encode()).await?;
        Ok(())
    }

    fn mark_disconnected(&self, reason: &str) {
        let mut state = self.state.lock();
        if *state != ConnectionState::Disconnected {
            warn!("Session lost ({}), now Disconnected", reason);
            *state = ConnectionState::Disconnected;
        }
    }
}
