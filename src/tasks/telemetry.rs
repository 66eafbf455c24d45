//! Telemetry task: 10 Hz downlink of the packed state vector, uplink frame
//! parsing (ground-test events, GNSS, amplifier temperature), adaptive
//! power switching, and the radio configuration handshake at startup.

use embassy_time::{Duration, Ticker};

use super::now_ms;
use crate::bus::SystemBus;
use crate::config::Config;
use crate::error::ErrorFlags;
use crate::events::{post_event, EventQueue};
use crate::recorder::{record, RecordEntry, RecordQueue};
use crate::state::{FlightPhase, GnssTime};
use crate::telemetry::codec::{DIRECTION_TX, MODE_BIDIRECTIONAL};
use crate::telemetry::{
    build_frame, Frame, FrameParser, Opcode, RxPayload, TelemetryLink, TxPayload, UplinkGate,
    AMP_HOT_LIMIT, MAX_FRAME, RX_IDLE_TIMEOUT_MS, TELE_MAX_POWER,
};
use crate::TELEMETRY_FREQ_HZ;

pub async fn telemetry_task<L: TelemetryLink>(
    bus: &SystemBus,
    events: &EventQueue,
    queue: &RecordQueue,
    cfg: &Config,
    link: &mut L,
) -> ! {
    // Configure the radio before the periodic loop starts.
    send_setting(link, Opcode::Direction, DIRECTION_TX).await;
    send_setting(link, Opcode::PowerLevel, cfg.telemetry.power_level).await;
    send_setting(link, Opcode::Mode, MODE_BIDIRECTIONAL).await;
    if !cfg.telemetry.link_phrase.is_empty() {
        let crc = crc32fast::hash(cfg.telemetry.link_phrase.as_bytes());
        let mut frame = [0u8; MAX_FRAME];
        let n = build_frame(&mut frame, Opcode::LinkPhrase, &crc.to_le_bytes());
        let _ = link.write(&frame[..n]).await;
        let n = build_frame(&mut frame, Opcode::Enable, &[]);
        let _ = link.write(&frame[..n]).await;
    }

    let mut parser = FrameParser::new();
    let mut gate = UplinkGate::new(cfg.telemetry.test_phrase.as_str(), cfg.telemetry.enable_testing);
    let mut last_phase = FlightPhase::Calibrating;
    let mut seen_crc_errors = 0;
    let mut last_rx_ms = now_ms();

    let mut ticker = Ticker::every(Duration::from_hz(TELEMETRY_FREQ_HZ as u64));
    loop {
        ticker.next().await;
        let ts = now_ms();
        let phase = bus.current_phase();

        // Downlink.
        let payload = build_tx_payload(bus, ts, gate.armed());
        let mut frame = [0u8; MAX_FRAME];
        let n = build_frame(&mut frame, Opcode::Tx, &payload.pack());
        let _ = link.write(&frame[..n]).await;

        // Adaptive power: full power for the flight, configured power back
        // on the ground.
        if cfg.telemetry.adaptive_power && phase != last_phase {
            if phase == FlightPhase::Thrusting {
                send_setting(link, Opcode::PowerLevel, TELE_MAX_POWER).await;
            } else if phase == FlightPhase::Touchdown {
                send_setting(link, Opcode::PowerLevel, cfg.telemetry.power_level).await;
            }
        }
        last_phase = phase;

        // Uplink.
        let mut buf = [0u8; 64];
        loop {
            let n = link.try_read(&mut buf);
            if n == 0 {
                break;
            }
            last_rx_ms = ts;
            for &b in &buf[..n] {
                if let Some(f) = parser.push_byte(b) {
                    handle_frame(bus, events, queue, cfg.rec_mask, &mut gate, &f, ts);
                }
            }
        }
        if parser.crc_errors > seen_crc_errors {
            seen_crc_errors = parser.crc_errors;
            bus.add_error(ErrorFlags::TELEMETRY_CRC);
        }
        if ts.wrapping_sub(last_rx_ms) > RX_IDLE_TIMEOUT_MS {
            link.restart_rx();
            last_rx_ms = ts;
        }
    }
}

async fn send_setting<L: TelemetryLink>(link: &mut L, op: Opcode, value: u8) {
    let mut frame = [0u8; MAX_FRAME];
    let n = build_frame(&mut frame, op, &[value]);
    let _ = link.write(&frame[..n]).await;
}

/// Assembles one downlink sample from the bus.
pub fn build_tx_payload(bus: &SystemBus, ts: u32, testing_on: bool) -> TxPayload {
    let fused = bus.fused.try_get().unwrap_or_default();
    let gnss = bus.gnss.try_get().unwrap_or_default();
    let battery = bus.battery.try_get().unwrap_or_default();

    TxPayload {
        state: bus.current_phase().downlink_code(),
        timestamp: ((ts / 10) & 0x7FFF) as u16,
        errors: bus.errors().downlink_bits(),
        lat: (gnss.lat * 10_000.0) as i32,
        lon: (gnss.lon * 10_000.0) as i32,
        altitude: fused.height.clamp(-65_536.0, 65_535.0) as i32,
        velocity: fused.velocity.clamp(-512.0, 511.0) as i16,
        voltage: battery.decivolts(),
        pyro_continuity: bus.pyro_continuity(),
        testing_on,
    }
}

/// Processes one parsed uplink frame.
pub fn handle_frame(
    bus: &SystemBus,
    events: &EventQueue,
    queue: &RecordQueue,
    rec_mask: u32,
    gate: &mut UplinkGate,
    frame: &Frame,
    ts: u32,
) {
    let data = frame.payload();
    match frame.op {
        Opcode::Rx => {
            if let Some(rx) = RxPayload::unpack(data) {
                if let Some(ev) = gate.offer(&rx) {
                    post_event(bus, events, ev);
                }
                bus.set_testing_armed(gate.armed());
            }
        }
        Opcode::GnssLoc if data.len() >= 8 => {
            let mut gnss = bus.gnss.try_get().unwrap_or_default();
            gnss.lat = f32::from_le_bytes(data[0..4].try_into().unwrap());
            gnss.lon = f32::from_le_bytes(data[4..8].try_into().unwrap());
            bus.gnss.sender().send(gnss);
            record(
                bus,
                queue,
                rec_mask,
                RecordEntry::GnssInfo { ts, lat: gnss.lat, lon: gnss.lon, sats: gnss.sats },
            );
        }
        Opcode::GnssInfo if !data.is_empty() => {
            let mut gnss = bus.gnss.try_get().unwrap_or_default();
            gnss.sats = data[0];
            bus.gnss.sender().send(gnss);
        }
        Opcode::GnssTime if data.len() >= 3 => {
            let mut gnss = bus.gnss.try_get().unwrap_or_default();
            gnss.time = GnssTime { hour: data[2], min: data[1], sec: data[0] };
            bus.gnss.sender().send(gnss);
        }
        Opcode::TempInfo if data.len() >= 4 => {
            let temp = f32::from_le_bytes(data[0..4].try_into().unwrap());
            if temp > AMP_HOT_LIMIT {
                warn!("telemetry amplifier hot");
                bus.add_error(ErrorFlags::TELEMETRY_HOT);
            }
        }
        Opcode::Info => {}
        _ => debug!("unhandled opcode {}", u8::from(frame.op)),
    }
}
