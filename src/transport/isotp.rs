use super::pdu::{FlowControl, Pdu, SeparationTime, MAX_TRANSFER_LEN};
use super::reassembler::{Reassembler, RxAction, RxParams};
use super::segmenter::Segmenter;
use super::TransportLayer;
use crate::error::{IsoTpError, LinkError, Result};
use crate::physical::PhysicalLayer;
use crate::types::{CanId, Config, Frame, FrameFlags, CAN_EFF_MASK, CAN_MAX_DLEN, CAN_SFF_MASK};
use log::{debug, trace, warn};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Longest single blocking link read, so an abort is noticed promptly.
const ABORT_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Smallest frame (after any addressing byte) that can carry a First Frame.
const MIN_TP_CAPACITY: usize = 3;

/// ISO-TP Address Modes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddressMode {
    Normal,
    /// One addressing byte ahead of the PCI: `tx` on frames we send, `rx`
    /// expected on frames we accept.
    Extended { tx: u8, rx: u8 },
}

impl AddressMode {
    fn len(&self) -> usize {
        match self {
            AddressMode::Normal => 0,
            AddressMode::Extended { .. } => 1,
        }
    }
}

/// ISO-TP Timing Parameters (in milliseconds)
#[derive(Debug, Clone)]
pub struct IsoTpTiming {
    pub n_bs: u32, // Sender N_Bs timeout
    pub n_cr: u32, // Receiver N_Cr timeout
}

impl Default for IsoTpTiming {
    fn default() -> Self {
        Self {
            n_bs: 1000, // Default 1 second
            n_cr: 1000,
        }
    }
}

/// ISO-TP configuration
#[derive(Debug, Clone)]
pub struct IsoTpConfig {
    pub tx_id: CanId,
    pub rx_id: CanId,
    pub extended_id: bool,
    pub address_mode: AddressMode,
    pub block_size: u8,
    pub st_min: SeparationTime,
    pub padding: Option<u8>,
    pub flow_control: bool,
    pub max_rx_len: usize,
    pub max_wait_frames: u16,
    pub timing: IsoTpTiming,
    pub timeout_ms: u32,
}

impl Config for IsoTpConfig {
    fn validate(&self) -> Result<()> {
        let mask = if self.extended_id {
            CAN_EFF_MASK
        } else {
            CAN_SFF_MASK
        };
        for (name, id) in [("tx_id", self.tx_id), ("rx_id", self.rx_id)] {
            if id > mask {
                return Err(IsoTpError::InvalidConfig(format!(
                    "{} 0x{:X} out of range for {} identifiers",
                    name,
                    id,
                    if self.extended_id { "29-bit" } else { "11-bit" }
                )));
            }
        }
        if self.max_rx_len > MAX_TRANSFER_LEN {
            return Err(IsoTpError::InvalidConfig(format!(
                "max_rx_len {} above {}",
                self.max_rx_len, MAX_TRANSFER_LEN
            )));
        }
        if self.timing.n_bs == 0 || self.timing.n_cr == 0 || self.timeout_ms == 0 {
            return Err(IsoTpError::InvalidConfig("timers must be non-zero".into()));
        }
        Ok(())
    }
}

impl Default for IsoTpConfig {
    fn default() -> Self {
        Self {
            tx_id: 0x7E0,
            rx_id: 0x7E8,
            extended_id: false,
            address_mode: AddressMode::Normal,
            block_size: 0,
            st_min: SeparationTime::ZERO,
            padding: None,
            flow_control: true,
            max_rx_len: MAX_TRANSFER_LEN,
            max_wait_frames: 10,
            timing: IsoTpTiming::default(),
            timeout_ms: 1000,
        }
    }
}

/// Cancels the transfer a session is blocked in.
///
/// The request is consumed by the blocking call that observes it. Aborting
/// while nothing is in flight cancels the next blocking call.
#[derive(Debug, Clone, Default)]
pub struct AbortHandle(Arc<AtomicBool>);

impl AbortHandle {
    pub fn abort(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_aborted(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    fn take(&self) -> bool {
        self.0.swap(false, Ordering::SeqCst)
    }
}

/// ISO-TP session over one tx/rx address pair.
pub struct IsoTp<P: PhysicalLayer> {
    config: IsoTpConfig,
    physical: P,
    reassembler: Reassembler,
    /// Receive-path outcomes not yet handed to the caller, in arrival order.
    pending: VecDeque<Result<Vec<u8>>>,
    abort: AbortHandle,
    is_open: bool,
}

impl<P: PhysicalLayer> IsoTp<P> {
    /// Creates a new ISO-TP instance with the given physical layer
    pub fn with_physical(config: IsoTpConfig, physical: P) -> Self {
        let reassembler = Reassembler::new(RxParams {
            block_size: config.block_size,
            separation_time: config.st_min,
            max_len: config.max_rx_len,
            n_cr: Duration::from_millis(config.timing.n_cr as u64),
            flow_control: config.flow_control,
        });
        Self {
            config,
            physical,
            reassembler,
            pending: VecDeque::new(),
            abort: AbortHandle::default(),
            is_open: false,
        }
    }

    pub fn config(&self) -> &IsoTpConfig {
        &self.config
    }

    pub fn abort_handle(&self) -> AbortHandle {
        self.abort.clone()
    }

    /// Bytes per frame available for PCI and data.
    fn tp_capacity(&self) -> usize {
        self.physical
            .capacity()
            .saturating_sub(self.config.address_mode.len())
    }

    fn ensure_open(&self) -> Result<()> {
        if self.is_open {
            Ok(())
        } else {
            Err(IsoTpError::NotInitialized)
        }
    }

    fn check_abort(&self) -> Result<()> {
        if self.abort.take() {
            warn!("transfer on 0x{:X} aborted", self.config.tx_id);
            return Err(IsoTpError::Aborted);
        }
        Ok(())
    }

    fn transmit(&mut self, pdu: &Pdu<'_>) -> Result<()> {
        let mut data = Vec::with_capacity(self.physical.capacity());
        if let AddressMode::Extended { tx, .. } = self.config.address_mode {
            data.push(tx);
        }
        data.extend(pdu.encode(self.tp_capacity())?);
        if let Some(padding) = self.config.padding {
            data.resize(self.physical.capacity(), padding);
        }

        let flags = if self.config.extended_id {
            FrameFlags::EXTENDED_ID
        } else {
            FrameFlags::empty()
        };
        let frame = Frame::new(self.config.tx_id, data, flags);
        trace!("tx {} {}", pdu.kind(), frame);
        self.physical.send_frame(&frame)?;
        Ok(())
    }

    /// ISO-TP bytes of a frame meant for this session.
    fn accept<'f>(&self, frame: &'f Frame) -> Option<&'f [u8]> {
        if frame.id != self.config.rx_id {
            return None;
        }
        match self.config.address_mode {
            AddressMode::Normal => Some(&frame.data),
            AddressMode::Extended { rx, .. } => match frame.data.split_first() {
                Some((&address, rest)) if address == rx => Some(rest),
                _ => None,
            },
        }
    }

    fn handle_rx(&mut self, decoded: Result<Pdu<'_>>) -> Result<Option<Vec<u8>>> {
        let pdu = decoded.map_err(|e| self.reassembler.on_malformed(e))?;
        trace!("rx {} from 0x{:X}", pdu.kind(), self.config.rx_id);

        match self.reassembler.on_pdu(pdu, Instant::now()) {
            Ok(Some(RxAction::FlowControl(fc))) => {
                if let Err(e) = self.transmit(&Pdu::FlowControl(fc)) {
                    self.reassembler.reset();
                    return Err(e);
                }
                Ok(None)
            }
            Ok(Some(RxAction::Complete(payload))) => {
                debug!(
                    "received {} bytes from 0x{:X}",
                    payload.len(),
                    self.config.rx_id
                );
                Ok(Some(payload))
            }
            Ok(None) => Ok(None),
            Err(e @ IsoTpError::RxBufferOverflow { .. }) => {
                warn!("refusing transfer: {}", e);
                if self.config.flow_control {
                    self.transmit(&Pdu::FlowControl(FlowControl::overflow()))?;
                }
                Err(e)
            }
            Err(e) => {
                warn!("reception from 0x{:X} aborted: {}", self.config.rx_id, e);
                Err(e)
            }
        }
    }

    /// Runs one decoded frame through the receive path and queues the outcome.
    ///
    /// An expired transfer is reported ahead of the frame, which is then
    /// handled from Idle so a new First Frame still starts a transfer.
    fn deliver(&mut self, decoded: Result<Pdu<'_>>) {
        if let Err(e) = self.reassembler.check_timeout(Instant::now()) {
            warn!("reception from 0x{:X} aborted: {}", self.config.rx_id, e);
            self.pending.push_back(Err(e));
        }
        match self.handle_rx(decoded) {
            Ok(Some(payload)) => self.pending.push_back(Ok(payload)),
            Ok(None) => {}
            Err(e) => self.pending.push_back(Err(e)),
        }
    }

    /// Waits until `ready`, checking the abort token between short sleeps.
    fn pace(&self, ready: Instant) -> Result<()> {
        loop {
            self.check_abort()?;
            let now = Instant::now();
            if now >= ready {
                return Ok(());
            }
            std::thread::sleep((ready - now).min(ABORT_POLL_INTERVAL));
        }
    }

    fn await_flow_control(&mut self, transfer_deadline: Instant) -> Result<FlowControl> {
        let n_bs = Duration::from_millis(self.config.timing.n_bs as u64);
        let deadline = (Instant::now() + n_bs).min(transfer_deadline);

        loop {
            self.check_abort()?;
            let now = Instant::now();
            if now >= deadline {
                warn!("no flow control from 0x{:X} in time", self.config.rx_id);
                return Err(IsoTpError::FlowControlTimeout);
            }

            let frame = match self
                .physical
                .receive_frame((deadline - now).min(ABORT_POLL_INTERVAL))
            {
                Ok(frame) => frame,
                Err(LinkError::Timeout) => continue,
                Err(e) => return Err(e.into()),
            };
            let Some(bytes) = self.accept(&frame) else {
                trace!("ignoring {}", frame);
                continue;
            };
            match Pdu::decode(bytes) {
                Ok(Pdu::FlowControl(fc)) => {
                    trace!("rx FC {:?}", fc);
                    return Ok(fc);
                }
                // Undecodable Flow Control is addressed to the sender
                Err(e) if bytes.first().map(|pci| pci >> 4) == Some(0x3) => {
                    warn!("bad flow control from 0x{:X}: {}", self.config.rx_id, e);
                    return Err(e);
                }
                decoded => self.deliver(decoded),
            }
        }
    }

    /// Feeds one link frame to the receive path.
    ///
    /// Frames for other addresses are ignored. Any Flow Control this frame
    /// calls for is sent before returning. Returns the oldest queued outcome,
    /// so a timeout reported here does not lose the frame that revealed it.
    pub fn on_frame(&mut self, frame: &Frame) -> Result<Option<Vec<u8>>> {
        self.ensure_open()?;
        match self.accept(frame) {
            Some(bytes) => self.deliver(Pdu::decode(bytes)),
            None => trace!("ignoring {}", frame),
        }
        self.pending.pop_front().transpose()
    }

    /// Performs at most one short link read.
    ///
    /// Payloads and reception errors that came in while [`send`] was waiting
    /// for Flow Control are returned first, one per call, in arrival order.
    ///
    /// [`send`]: TransportLayer::send
    pub fn poll_receive(&mut self) -> Result<Option<Vec<u8>>> {
        self.ensure_open()?;
        if let Some(outcome) = self.pending.pop_front() {
            return outcome.map(Some);
        }
        if let Err(e) = self.check_abort() {
            self.reassembler.reset();
            return Err(e);
        }

        let now = Instant::now();
        self.reassembler.check_timeout(now)?;
        let wait = match self.reassembler.deadline() {
            Some(deadline) => deadline
                .saturating_duration_since(now)
                .min(ABORT_POLL_INTERVAL),
            None => ABORT_POLL_INTERVAL,
        };

        match self.physical.receive_frame(wait) {
            Ok(frame) => self.on_frame(&frame),
            Err(LinkError::Timeout) => {
                self.reassembler.check_timeout(Instant::now())?;
                Ok(None)
            }
            Err(e) => {
                self.reassembler.reset();
                Err(e.into())
            }
        }
    }
}

impl<P: PhysicalLayer> TransportLayer for IsoTp<P> {
    fn open(&mut self) -> Result<()> {
        if self.is_open {
            return Ok(());
        }
        self.config.validate()?;
        let capacity = self.tp_capacity();
        if !(MIN_TP_CAPACITY..=CAN_MAX_DLEN).contains(&capacity) {
            return Err(IsoTpError::InvalidConfig(format!(
                "{} bytes per frame after addressing, need {} to {}",
                capacity, MIN_TP_CAPACITY, CAN_MAX_DLEN
            )));
        }
        self.physical.open()?;
        self.is_open = true;
        debug!(
            "ISO-TP session open: tx 0x{:X}, rx 0x{:X}, {} bytes per frame",
            self.config.tx_id, self.config.rx_id, capacity
        );
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        self.reassembler.reset();
        self.pending.clear();
        self.is_open = false;
        self.physical.close()?;
        Ok(())
    }

    fn send(&mut self, data: &[u8]) -> Result<()> {
        self.ensure_open()?;
        self.check_abort()?;

        let mut tx = Segmenter::new(data, self.tp_capacity())?
            .with_max_wait_frames(self.config.max_wait_frames);
        let first = tx.start();
        debug!(
            "sending {} bytes to 0x{:X} starting with {}",
            data.len(),
            self.config.tx_id,
            first.kind()
        );
        self.transmit(&first)?;

        if !self.config.flow_control {
            tx.skip_flow_control(self.config.st_min);
        }

        let transfer_deadline = Instant::now() + Duration::from_millis(self.config.timeout_ms as u64);
        let mut last_sent: Option<Instant> = None;
        while !tx.is_complete() {
            self.check_abort()?;

            if tx.awaiting_flow_control() {
                let fc = self.await_flow_control(transfer_deadline)?;
                tx.on_flow_control(fc)?;
                continue;
            }

            if let Some(sent) = last_sent {
                self.pace(sent + tx.separation_time())?;
            }
            if let Some(pdu) = tx.next_consecutive() {
                self.transmit(&pdu)?;
                last_sent = Some(Instant::now());
            }
        }

        debug!("sent {} bytes to 0x{:X}", data.len(), self.config.tx_id);
        Ok(())
    }

    fn receive(&mut self) -> Result<Vec<u8>> {
        self.ensure_open()?;
        let idle_deadline = Instant::now() + Duration::from_millis(self.config.timeout_ms as u64);
        loop {
            if let Some(payload) = self.poll_receive()? {
                return Ok(payload);
            }
            if self.reassembler.is_idle() && Instant::now() >= idle_deadline {
                return Err(IsoTpError::Timeout);
            }
        }
    }

    fn set_timeout(&mut self, timeout_ms: u32) -> Result<()> {
        if timeout_ms == 0 {
            return Err(IsoTpError::InvalidConfig("timeout must be non-zero".into()));
        }
        self.config.timeout_ms = timeout_ms;
        Ok(())
    }
}
