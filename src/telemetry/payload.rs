//! Radio payloads: the bit-packed downlink state vector and the uplink
//! ground-test frame.

use super::bits::{BitReader, BitWriter};
use crate::events::Event;

/// Downlink payload length on the wire.
pub const TX_PAYLOAD_LEN: usize = 15;
/// Uplink payload length; padded to the downlink size.
pub const RX_PAYLOAD_LEN: usize = 15;

/// Well-known header marking an uplink packet as a ground-test command.
pub const RX_PACKET_HEADER: u8 = 0x72;

/// One downlink sample. Field order and widths are the wire contract:
///
/// | field            | bits |
/// |------------------|------|
/// | state            | 3    |
/// | timestamp        | 15   | centiseconds, wraps at 2¹⁵
/// | errors           | 6    |
/// | lat              | 22   | degrees × 10 000, signed
/// | lon              | 22   | degrees × 10 000, signed
/// | altitude         | 17   | metres, signed
/// | velocity         | 10   | m/s, signed
/// | voltage          | 8    | deci-volts
/// | pyro_continuity  | 2    |
/// | testing_on       | 1    |
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct TxPayload {
    pub state: u8,
    pub timestamp: u16,
    pub errors: u8,
    pub lat: i32,
    pub lon: i32,
    pub altitude: i32,
    pub velocity: i16,
    pub voltage: u8,
    pub pyro_continuity: u8,
    pub testing_on: bool,
}

impl TxPayload {
    pub fn pack(&self) -> [u8; TX_PAYLOAD_LEN] {
        let mut out = [0u8; TX_PAYLOAD_LEN];
        let mut w = BitWriter::new(&mut out);
        w.write(self.state as u32 & 0x7, 3);
        w.write(self.timestamp as u32 & 0x7FFF, 15);
        w.write(self.errors as u32 & 0x3F, 6);
        w.write_signed(self.lat, 22);
        w.write_signed(self.lon, 22);
        w.write_signed(self.altitude, 17);
        w.write_signed(self.velocity as i32, 10);
        w.write(self.voltage as u32, 8);
        w.write(self.pyro_continuity as u32 & 0x3, 2);
        w.write_bool(self.testing_on);
        out
    }

    pub fn unpack(buf: &[u8; TX_PAYLOAD_LEN]) -> Self {
        let mut r = BitReader::new(buf);
        Self {
            state: r.read(3) as u8,
            timestamp: r.read(15) as u16,
            errors: r.read(6) as u8,
            lat: r.read_signed(22),
            lon: r.read_signed(22),
            altitude: r.read_signed(17),
            velocity: r.read_signed(10) as i16,
            voltage: r.read(8) as u8,
            pyro_continuity: r.read(2) as u8,
            testing_on: r.read_bool(),
        }
    }
}

/// Uplink ground-test frame: `{header, passcode, event, enable_testing}`.
/// `event` is the mission event number plus one; zero clears the previous
/// event so the same event can be commanded again later.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct RxPayload {
    pub header: u8,
    pub passcode: u32,
    pub event: u8,
    pub enable_testing: bool,
}

impl RxPayload {
    pub fn pack(&self) -> [u8; RX_PAYLOAD_LEN] {
        let mut out = [0u8; RX_PAYLOAD_LEN];
        let mut w = BitWriter::new(&mut out);
        w.write(self.header as u32, 8);
        w.write(self.passcode, 32);
        w.write(self.event as u32, 8);
        w.write_bool(self.enable_testing);
        out
    }

    pub fn unpack(buf: &[u8]) -> Option<Self> {
        if buf.len() < 7 {
            return None;
        }
        let mut r = BitReader::new(buf);
        Some(Self {
            header: r.read(8) as u8,
            passcode: r.read(32),
            event: r.read(8) as u8,
            enable_testing: r.read_bool(),
        })
    }
}

/// Edge-triggered acceptance of uplinked test events.
///
/// A packet is accepted only when the testing mode is configured on, the
/// header matches, and the passcode matches the CRC32 of the configured
/// test phrase. A given event dispatches once; repeats are ignored until a
/// packet carrying a different event (or the zero clear) arrives.
pub struct UplinkGate {
    expected_passcode: u32,
    testing_enabled: bool,
    last_event: u8,
    armed: bool,
}

impl UplinkGate {
    pub fn new(test_phrase: &str, testing_enabled: bool) -> Self {
        Self {
            expected_passcode: crc32fast::hash(test_phrase.as_bytes()),
            testing_enabled,
            last_event: 0,
            armed: false,
        }
    }

    /// True once a valid arming packet has been seen; reported back on the
    /// downlink `testing_on` bit.
    pub fn armed(&self) -> bool {
        self.armed
    }

    /// Offers a received uplink payload; returns an event to dispatch at
    /// most once per distinct packet.
    pub fn offer(&mut self, rx: &RxPayload) -> Option<Event> {
        if !self.testing_enabled
            || rx.header != RX_PACKET_HEADER
            || rx.passcode != self.expected_passcode
        {
            return None;
        }
        if !rx.enable_testing {
            self.armed = false;
            self.last_event = 0;
            return None;
        }
        self.armed = true;

        if rx.event == self.last_event {
            return None;
        }
        self.last_event = rx.event;
        if rx.event == 0 {
            return None;
        }
        Event::try_from(rx.event - 1).ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn downlink_round_trips_at_field_limits() {
        let cases = [
            TxPayload::default(),
            TxPayload {
                state: 7,
                timestamp: 0x7FFF,
                errors: 0x3F,
                lat: 900_000,
                lon: -1_800_000,
                altitude: 65_535,
                velocity: -511,
                voltage: 255,
                pyro_continuity: 0b10,
                testing_on: true,
            },
            TxPayload {
                state: 3,
                timestamp: 1234,
                errors: 0b000100,
                lat: -473_769,
                lon: 85_417,
                altitude: -120,
                velocity: 200,
                voltage: 82,
                pyro_continuity: 0b01,
                testing_on: false,
            },
        ];
        for p in cases {
            assert_eq!(TxPayload::unpack(&p.pack()), p, "{:?}", p);
        }
    }

    #[test]
    fn uplink_round_trips() {
        let rx = RxPayload {
            header: RX_PACKET_HEADER,
            passcode: 0xDEAD_BEEF,
            event: 8,
            enable_testing: true,
        };
        assert_eq!(RxPayload::unpack(&rx.pack()).unwrap(), rx);
    }

    fn test_gate() -> UplinkGate {
        UplinkGate::new("cats", true)
    }

    fn custom1_packet() -> RxPayload {
        RxPayload {
            header: RX_PACKET_HEADER,
            passcode: crc32fast::hash(b"cats"),
            event: u8::from(Event::Custom1) + 1,
            enable_testing: true,
        }
    }

    #[test]
    fn gate_dispatches_once_per_distinct_packet() {
        let mut g = test_gate();
        let pkt = custom1_packet();
        assert_eq!(g.offer(&pkt), Some(Event::Custom1));
        assert!(g.armed());
        // Identical repeats are edge-filtered.
        assert_eq!(g.offer(&pkt), None);
        assert_eq!(g.offer(&pkt), None);

        // A different event passes, then the first one again.
        let mut pkt2 = pkt;
        pkt2.event = u8::from(Event::Custom2) + 1;
        assert_eq!(g.offer(&pkt2), Some(Event::Custom2));
        assert_eq!(g.offer(&pkt), Some(Event::Custom1));
    }

    #[test]
    fn gate_clears_on_zero_event() {
        let mut g = test_gate();
        let pkt = custom1_packet();
        assert_eq!(g.offer(&pkt), Some(Event::Custom1));
        let clear = RxPayload { event: 0, ..pkt };
        assert_eq!(g.offer(&clear), None);
        assert_eq!(g.offer(&pkt), Some(Event::Custom1));
    }

    #[test]
    fn gate_rejects_bad_credentials() {
        let mut g = test_gate();
        let pkt = custom1_packet();

        let wrong_header = RxPayload { header: 0x73, ..pkt };
        assert_eq!(g.offer(&wrong_header), None);

        let wrong_passcode = RxPayload { passcode: 1, ..pkt };
        assert_eq!(g.offer(&wrong_passcode), None);

        let disarmed = RxPayload { enable_testing: false, ..pkt };
        assert_eq!(g.offer(&disarmed), None);
        assert!(!g.armed());

        // Testing disabled in config beats everything.
        let mut off = UplinkGate::new("cats", false);
        assert_eq!(off.offer(&pkt), None);
    }
}
