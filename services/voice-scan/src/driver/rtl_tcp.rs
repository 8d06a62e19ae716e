//! RTL-SDR via an `rtl_tcp` server
//!
//! Connects to `rtl_tcp` (one dongle per server), which streams unsigned
//! 8-bit interleaved IQ from the moment the client connects. Tuning is done
//! in-band with 5-byte commands, so the stream never needs reopening.
//!
//! Wire format:
//! - Server hello: "RTL0" | tuner type (u32 BE) | gain stage count (u32 BE)
//! - Command: opcode (u8) | parameter (u32 BE)
//! - Samples: I, Q, I, Q, ... as u8 centred on 127.5

use std::io::{ErrorKind, Read, Write};
use std::net::{Shutdown, TcpStream, ToSocketAddrs};
use std::time::Duration;

use num_complex::Complex32;
use tracing::{debug, info};

use super::registry::DeviceClaim;
use super::{ReadStatus, SdrDevice, SdrError, STREAM_NOT_ACTIVE};

const MAGIC: &[u8; 4] = b"RTL0";
const HEADER_LEN: usize = 12;

const CMD_SET_FREQ: u8 = 0x01;
const CMD_SET_SAMPLE_RATE: u8 = 0x02;
const CMD_SET_GAIN_MODE: u8 = 0x03;
const CMD_SET_GAIN: u8 = 0x04;

/// Upper bound on bytes discarded by a single flush (~4 s at 2.4 MSPS)
const MAX_FLUSH_BYTES: usize = 16 * 1024 * 1024;

/// Tuner details from the server hello
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TunerInfo {
    pub tuner_type: u32,
    pub gain_count: u32,
}

impl TunerInfo {
    pub fn tuner_name(&self) -> &'static str {
        match self.tuner_type {
            1 => "E4000",
            2 => "FC0012",
            3 => "FC0013",
            4 => "FC2580",
            5 => "R820T",
            6 => "R828D",
            _ => "unknown",
        }
    }
}

fn parse_header(header: &[u8; HEADER_LEN]) -> Result<TunerInfo, SdrError> {
    if &header[0..4] != MAGIC {
        return Err(SdrError::Protocol(format!(
            "bad rtl_tcp magic {:02X?}",
            &header[0..4]
        )));
    }
    Ok(TunerInfo {
        tuner_type: u32::from_be_bytes([header[4], header[5], header[6], header[7]]),
        gain_count: u32::from_be_bytes([header[8], header[9], header[10], header[11]]),
    })
}

#[inline(always)]
fn u8_to_f32(b: u8) -> f32 {
    (b as f32 - 127.5) / 127.5
}

fn hz_param(what: &str, value: f64) -> Result<u32, SdrError> {
    if !(value > 0.0 && value <= u32::MAX as f64) {
        return Err(SdrError::Setting(format!("{} {} out of range for rtl_tcp", what, value)));
    }
    Ok(value.round() as u32)
}

/// One rtl_tcp connection, holding the claim on its endpoint
pub struct RtlTcpDevice {
    label: String,
    stream: TcpStream,
    streaming: bool,
    /// Trailing I byte whose Q has not arrived yet
    carry: Option<u8>,
    /// Next byte is the Q half of a discarded sample
    skip_byte: bool,
    scratch: Vec<u8>,
    _claim: DeviceClaim,
}

impl RtlTcpDevice {
    /// Connect and read the server hello
    pub fn connect(addr: &str, timeout: Duration, claim: DeviceClaim) -> Result<Self, SdrError> {
        let sock_addr = addr
            .to_socket_addrs()?
            .next()
            .ok_or_else(|| SdrError::NoDevice(format!("cannot resolve {}", addr)))?;

        let mut stream = TcpStream::connect_timeout(&sock_addr, timeout)?;
        stream.set_nodelay(true)?;
        stream.set_read_timeout(Some(timeout))?;

        let mut header = [0u8; HEADER_LEN];
        stream.read_exact(&mut header)?;
        let tuner = parse_header(&header)?;

        info!(
            "rtl_tcp {} connected: tuner {} ({} gain steps)",
            addr,
            tuner.tuner_name(),
            tuner.gain_count
        );

        Ok(Self {
            label: format!("rtl_tcp={}", claim.key()),
            stream,
            streaming: false,
            carry: None,
            skip_byte: false,
            scratch: Vec::new(),
            _claim: claim,
        })
    }

    fn send_command(&mut self, cmd: u8, param: u32) -> Result<(), SdrError> {
        let mut packet = [0u8; 5];
        packet[0] = cmd;
        packet[1..].copy_from_slice(&param.to_be_bytes());
        self.stream.write_all(&packet).map_err(|e| match e.kind() {
            ErrorKind::BrokenPipe | ErrorKind::ConnectionReset | ErrorKind::ConnectionAborted => {
                SdrError::Disconnected(format!("{}: {}", self.label, e))
            }
            _ => SdrError::Io(e),
        })
    }

    /// Convert raw bytes (already including any carry byte) into samples
    fn convert(&mut self, len: usize, buf: &mut [Complex32]) -> usize {
        let mut bytes = &self.scratch[..len];
        if self.skip_byte && !bytes.is_empty() {
            bytes = &bytes[1..];
            self.skip_byte = false;
        }

        let pairs = (bytes.len() / 2).min(buf.len());
        for (out, iq) in buf.iter_mut().zip(bytes.chunks_exact(2)) {
            *out = Complex32::new(u8_to_f32(iq[0]), u8_to_f32(iq[1]));
        }
        if bytes.len() % 2 == 1 {
            self.carry = Some(bytes[bytes.len() - 1]);
        }
        pairs
    }
}

impl SdrDevice for RtlTcpDevice {
    fn label(&self) -> &str {
        &self.label
    }

    fn set_sample_rate(&mut self, rate: f64) -> Result<(), SdrError> {
        let rate = hz_param("sample rate", rate)?;
        self.send_command(CMD_SET_SAMPLE_RATE, rate)
    }

    fn set_gain(&mut self, gain_db: f64) -> Result<(), SdrError> {
        // Manual gain mode, then gain in tenths of dB
        self.send_command(CMD_SET_GAIN_MODE, 1)?;
        let tenths = (gain_db * 10.0).round().max(0.0) as u32;
        self.send_command(CMD_SET_GAIN, tenths)
    }

    fn set_frequency(&mut self, freq_hz: f64) -> Result<(), SdrError> {
        let freq = hz_param("frequency", freq_hz)?;
        self.send_command(CMD_SET_FREQ, freq)
    }

    fn activate_stream(&mut self) -> Result<(), SdrError> {
        self.streaming = true;
        self.flush_stream()
    }

    fn read_stream(
        &mut self,
        buf: &mut [Complex32],
        timeout: Duration,
    ) -> Result<ReadStatus, SdrError> {
        if !self.streaming {
            return Err(SdrError::Stream { code: STREAM_NOT_ACTIVE });
        }
        if buf.is_empty() {
            return Ok(ReadStatus::Samples(0));
        }

        // A zero timeout means "block forever" to the socket API
        self.stream
            .set_read_timeout(Some(timeout.max(Duration::from_millis(1))))?;

        self.scratch.resize(buf.len() * 2, 0);
        let offset = match self.carry.take() {
            Some(b) => {
                self.scratch[0] = b;
                1
            }
            None => 0,
        };

        match self.stream.read(&mut self.scratch[offset..]) {
            Ok(0) => Err(SdrError::Disconnected(format!(
                "{} closed the connection",
                self.label
            ))),
            Ok(n) => {
                let pairs = self.convert(offset + n, buf);
                if pairs == 0 {
                    Ok(ReadStatus::Empty)
                } else {
                    Ok(ReadStatus::Samples(pairs))
                }
            }
            Err(e)
                if matches!(
                    e.kind(),
                    ErrorKind::WouldBlock | ErrorKind::TimedOut | ErrorKind::Interrupted
                ) =>
            {
                if offset == 1 {
                    self.carry = Some(self.scratch[0]);
                }
                Ok(ReadStatus::Empty)
            }
            Err(e) => Err(SdrError::Io(e)),
        }
    }

    fn flush_stream(&mut self) -> Result<(), SdrError> {
        let mut chunk = [0u8; 64 * 1024];
        let mut discarded = 0usize;

        self.stream.set_nonblocking(true)?;
        let result = loop {
            if discarded >= MAX_FLUSH_BYTES {
                break Ok(());
            }
            match self.stream.read(&mut chunk) {
                Ok(0) => {
                    break Err(SdrError::Disconnected(format!(
                        "{} closed the connection",
                        self.label
                    )))
                }
                Ok(n) => discarded += n,
                Err(e) if e.kind() == ErrorKind::WouldBlock => break Ok(()),
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => break Err(SdrError::Io(e)),
            }
        };
        self.stream.set_nonblocking(false)?;
        result?;

        // Keep I/Q alignment across the discarded bytes
        let odd = (discarded + self.carry.take().map_or(0, |_| 1)) % 2 == 1;
        self.skip_byte = self.skip_byte ^ odd;
        if discarded > 0 {
            debug!("{}: flushed {} stale bytes", self.label, discarded);
        }
        Ok(())
    }

    fn deactivate_stream(&mut self) -> Result<(), SdrError> {
        self.streaming = false;
        match self.stream.shutdown(Shutdown::Both) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotConnected => Ok(()),
            Err(e) => Err(SdrError::Io(e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::DeviceRegistry;
    use crate::driver::DeviceFactory;
    use std::net::TcpListener;
    use std::sync::mpsc;
    use std::thread;

    fn hello(tuner_type: u32, gains: u32) -> Vec<u8> {
        let mut h = MAGIC.to_vec();
        h.extend_from_slice(&tuner_type.to_be_bytes());
        h.extend_from_slice(&gains.to_be_bytes());
        h
    }

    #[test]
    fn test_parse_header() {
        let mut header = [0u8; HEADER_LEN];
        header.copy_from_slice(&hello(5, 29));
        let info = parse_header(&header).unwrap();
        assert_eq!(info.tuner_type, 5);
        assert_eq!(info.gain_count, 29);
        assert_eq!(info.tuner_name(), "R820T");

        header[0] = b'X';
        assert!(matches!(parse_header(&header), Err(SdrError::Protocol(_))));
    }

    #[test]
    fn test_u8_conversion_range() {
        assert_eq!(u8_to_f32(255), 1.0);
        assert_eq!(u8_to_f32(0), -1.0);
        assert!(u8_to_f32(128) > 0.0 && u8_to_f32(128) < 0.01);
        assert!(u8_to_f32(127) < 0.0 && u8_to_f32(127) > -0.01);
    }

    #[test]
    fn test_hz_param_bounds() {
        assert_eq!(hz_param("f", 7.1e6).unwrap(), 7_100_000);
        assert!(hz_param("f", 0.0).is_err());
        assert!(hz_param("f", -1.0).is_err());
        assert!(hz_param("f", 5.0e9).is_err());
    }

    #[test]
    fn test_session_against_fake_server() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        let (go_tx, go_rx) = mpsc::channel::<()>();

        let server = thread::spawn(move || {
            let (mut sock, _) = listener.accept().unwrap();
            sock.write_all(&hello(5, 29)).unwrap();

            // sample rate, gain mode, gain, frequency
            let mut commands = [0u8; 20];
            sock.read_exact(&mut commands).unwrap();

            go_rx.recv().unwrap();
            // 3 full samples plus a dangling I byte
            sock.write_all(&[255, 0, 128, 127, 0, 255, 255]).unwrap();
            go_rx.recv().unwrap();
            sock.write_all(&[0]).unwrap();
            go_rx.recv().unwrap();
            commands
        });

        let registry = DeviceRegistry::new(vec![addr.clone()], Duration::from_secs(2));
        let mut device = registry.make(None).unwrap();
        assert_eq!(device.label(), format!("rtl_tcp={}", addr));

        device.set_sample_rate(48_000.0).unwrap();
        device.set_gain(40.0).unwrap();
        device.set_frequency(7.1e6).unwrap();
        device.activate_stream().unwrap();
        go_tx.send(()).unwrap();

        let mut buf = vec![Complex32::new(0.0, 0.0); 16];
        let mut got = Vec::new();
        while got.len() < 3 {
            match device.read_stream(&mut buf, Duration::from_millis(500)).unwrap() {
                ReadStatus::Samples(n) => got.extend_from_slice(&buf[..n]),
                ReadStatus::Empty => {}
                ReadStatus::EndOfBurst => panic!("rtl_tcp never ends a burst"),
            }
        }
        assert_eq!(got.len(), 3);
        assert_eq!(got[0], Complex32::new(1.0, -1.0));
        assert!(got[1].re > 0.0 && got[1].im < 0.0);
        assert_eq!(got[2], Complex32::new(-1.0, 1.0));

        // The dangling I byte pairs with the next Q byte
        go_tx.send(()).unwrap();
        let mut fourth = None;
        for _ in 0..10 {
            if let ReadStatus::Samples(n) = device.read_stream(&mut buf, Duration::from_millis(200)).unwrap() {
                assert_eq!(n, 1);
                fourth = Some(buf[0]);
                break;
            }
        }
        assert_eq!(fourth, Some(Complex32::new(1.0, -1.0)));

        go_tx.send(()).unwrap();
        let commands = server.join().unwrap();
        assert_eq!(&commands[0..5], &[CMD_SET_SAMPLE_RATE, 0x00, 0x00, 0xBB, 0x80]);
        assert_eq!(&commands[5..10], &[CMD_SET_GAIN_MODE, 0, 0, 0, 1]);
        assert_eq!(&commands[10..15], &[CMD_SET_GAIN, 0, 0, 0x01, 0x90]);
        assert_eq!(&commands[15..20], &[CMD_SET_FREQ, 0x00, 0x6C, 0x56, 0x60]);

        // Server hung up
        let mut disconnected = false;
        for _ in 0..10 {
            match device.read_stream(&mut buf, Duration::from_millis(200)) {
                Err(SdrError::Disconnected(_)) => {
                    disconnected = true;
                    break;
                }
                Ok(ReadStatus::Empty) => {}
                other => panic!("unexpected read result {:?}", other),
            }
        }
        assert!(disconnected);

        device.deactivate_stream().unwrap();
        assert!(matches!(
            device.read_stream(&mut buf, Duration::from_millis(10)),
            Err(SdrError::Stream { code: STREAM_NOT_ACTIVE })
        ));
    }

    #[test]
    fn test_bad_hello_is_protocol_error() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        let server = thread::spawn(move || {
            let (mut sock, _) = listener.accept().unwrap();
            sock.write_all(b"HTTP/1.1 400").unwrap();
        });

        let registry = DeviceRegistry::new(vec![], Duration::from_secs(2));
        let result = registry.make(Some(&format!("rtl_tcp={}", addr)));
        assert!(matches!(result, Err(SdrError::Protocol(_))));
        server.join().unwrap();
    }
}
