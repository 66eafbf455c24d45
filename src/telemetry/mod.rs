//! Ground telemetry link: framing, bit-packed payloads, uplink gate.

pub mod bits;
pub mod codec;
pub mod payload;

pub use codec::{build_frame, crc8, Frame, FrameParser, Opcode, MAX_FRAME, MAX_PAYLOAD};
pub use payload::{RxPayload, TxPayload, UplinkGate, RX_PACKET_HEADER, TX_PAYLOAD_LEN};

/// Power level commanded while THRUSTING when adaptive power is on.
pub const TELE_MAX_POWER: u8 = 30;
/// Amplifier temperature above this raises `TELEMETRY_HOT`, °C.
pub const AMP_HOT_LIMIT: f32 = 60.0;
/// UART receive idle timeout; the receive is reposted after this long.
pub const RX_IDLE_TIMEOUT_MS: u32 = 60_000;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct LinkError;

/// UART seam towards the telemetry MCU, implemented by the board crate.
pub trait TelemetryLink {
    /// Transmits a full frame; the only telemetry suspension point.
    async fn write(&mut self, frame: &[u8]) -> Result<(), LinkError>;

    /// Drains the bytes received since the last call into `buf`, returning
    /// how many were copied. Never blocks.
    fn try_read(&mut self, buf: &mut [u8]) -> usize;

    /// Re-arms the receive path after an idle timeout.
    fn restart_rx(&mut self) {}
}
