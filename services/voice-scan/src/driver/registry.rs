//! Device registry - driver selection and exclusive device claims

use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tracing::{debug, warn};

use super::rtl_tcp::RtlTcpDevice;
use super::sim::{SimDevice, SimSignal};
use super::{DeviceFactory, SdrDevice, SdrError};

/// Parsed driver name
#[derive(Debug, Clone, PartialEq, Eq)]
enum DriverSpec {
    /// `rtl_tcp` (first free endpoint) or `rtl_tcp=host:port`
    RtlTcp(Option<String>),
    /// `sim` or `sim=<signal>`
    Sim(SimSignal),
}

fn parse_driver(driver: Option<&str>) -> Result<DriverSpec, SdrError> {
    let Some(driver) = driver.map(str::trim).filter(|d| !d.is_empty()) else {
        return Ok(DriverSpec::RtlTcp(None));
    };

    let (name, arg) = match driver.split_once('=') {
        Some((name, arg)) => (name.trim(), Some(arg.trim())),
        None => (driver, None),
    };

    match (name, arg) {
        ("rtl_tcp", None) => Ok(DriverSpec::RtlTcp(None)),
        ("rtl_tcp", Some(addr)) if !addr.is_empty() => Ok(DriverSpec::RtlTcp(Some(addr.to_string()))),
        ("sim", None) => Ok(DriverSpec::Sim(SimSignal::Silence)),
        ("sim", Some(signal)) => signal
            .parse()
            .map(DriverSpec::Sim)
            .map_err(|_| SdrError::UnknownDriver(driver.to_string())),
        _ => Err(SdrError::UnknownDriver(driver.to_string())),
    }
}

/// Exclusive hold on one physical device, released on drop
#[derive(Debug)]
pub struct DeviceClaim {
    key: String,
    claims: Arc<Mutex<HashSet<String>>>,
}

impl DeviceClaim {
    pub fn key(&self) -> &str {
        &self.key
    }
}

impl Drop for DeviceClaim {
    fn drop(&mut self) {
        let mut claims = self.claims.lock().unwrap_or_else(|e| e.into_inner());
        claims.remove(&self.key);
        debug!("Released device claim {}", self.key);
    }
}

/// Hands out device handles by driver name.
///
/// Physical devices (rtl_tcp endpoints) are claimed for the lifetime of the
/// handle, so two sessions never drive the same radio. Simulated devices are
/// unclaimed.
pub struct DeviceRegistry {
    rtl_tcp_addrs: Vec<String>,
    connect_timeout: Duration,
    claims: Arc<Mutex<HashSet<String>>>,
}

impl DeviceRegistry {
    pub fn new(rtl_tcp_addrs: Vec<String>, connect_timeout: Duration) -> Self {
        Self {
            rtl_tcp_addrs,
            connect_timeout,
            claims: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    /// Check a driver name at startup so a typo fails once, not per batch
    pub fn validate(&self, driver: Option<&str>) -> Result<(), SdrError> {
        match parse_driver(driver)? {
            DriverSpec::RtlTcp(None) if self.rtl_tcp_addrs.is_empty() => Err(SdrError::NoDevice(
                "no rtl_tcp endpoints configured (RTL_TCP_ADDRS)".to_string(),
            )),
            _ => Ok(()),
        }
    }

    /// Claim `key`, or `None` if another session holds it
    fn claim(&self, key: &str) -> Option<DeviceClaim> {
        let mut claims = self.claims.lock().unwrap_or_else(|e| e.into_inner());
        if !claims.insert(key.to_string()) {
            return None;
        }
        Some(DeviceClaim {
            key: key.to_string(),
            claims: self.claims.clone(),
        })
    }

    fn open_rtl_tcp(&self, addr: &str) -> Result<Box<dyn SdrDevice>, SdrError> {
        let claim = self
            .claim(addr)
            .ok_or_else(|| SdrError::NoDevice(format!("rtl_tcp {} is in use", addr)))?;
        let device = RtlTcpDevice::connect(addr, self.connect_timeout, claim)?;
        Ok(Box::new(device))
    }

    fn open_first_rtl_tcp(&self) -> Result<Box<dyn SdrDevice>, SdrError> {
        let mut last_error = None;
        for addr in &self.rtl_tcp_addrs {
            match self.open_rtl_tcp(addr) {
                Ok(device) => return Ok(device),
                Err(e) => {
                    debug!("rtl_tcp {} unavailable: {}", addr, e);
                    last_error = Some(e);
                }
            }
        }

        match last_error {
            Some(SdrError::NoDevice(_)) | None => Err(SdrError::NoDevice(format!(
                "all {} rtl_tcp endpoint(s) busy or unreachable",
                self.rtl_tcp_addrs.len()
            ))),
            Some(e) => {
                warn!("No rtl_tcp endpoint could be opened");
                Err(e)
            }
        }
    }
}

impl DeviceFactory for DeviceRegistry {
    fn make(&self, driver: Option<&str>) -> Result<Box<dyn SdrDevice>, SdrError> {
        match parse_driver(driver)? {
            DriverSpec::RtlTcp(Some(addr)) => self.open_rtl_tcp(&addr),
            DriverSpec::RtlTcp(None) => self.open_first_rtl_tcp(),
            DriverSpec::Sim(signal) => Ok(Box::new(SimDevice::new(signal))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_driver_names() {
        assert_eq!(parse_driver(None).unwrap(), DriverSpec::RtlTcp(None));
        assert_eq!(parse_driver(Some("  ")).unwrap(), DriverSpec::RtlTcp(None));
        assert_eq!(parse_driver(Some("rtl_tcp")).unwrap(), DriverSpec::RtlTcp(None));
        assert_eq!(
            parse_driver(Some("rtl_tcp=10.0.0.5:1234")).unwrap(),
            DriverSpec::RtlTcp(Some("10.0.0.5:1234".to_string()))
        );
        assert_eq!(parse_driver(Some("sim")).unwrap(), DriverSpec::Sim(SimSignal::Silence));
        assert_eq!(parse_driver(Some("sim=tone")).unwrap(), DriverSpec::Sim(SimSignal::Tone));
        assert_eq!(parse_driver(Some("sim=burst")).unwrap(), DriverSpec::Sim(SimSignal::Burst));
    }

    #[test]
    fn test_parse_driver_rejects_unknown() {
        assert!(matches!(parse_driver(Some("airspy")), Err(SdrError::UnknownDriver(_))));
        assert!(matches!(parse_driver(Some("sim=chirp")), Err(SdrError::UnknownDriver(_))));
        assert!(matches!(parse_driver(Some("rtl_tcp=")), Err(SdrError::UnknownDriver(_))));
    }

    #[test]
    fn test_claims_are_exclusive_until_dropped() {
        let registry = DeviceRegistry::new(vec![], Duration::from_millis(100));

        let first = registry.claim("127.0.0.1:1234").expect("first claim");
        assert_eq!(first.key(), "127.0.0.1:1234");
        assert!(registry.claim("127.0.0.1:1234").is_none());
        assert!(registry.claim("127.0.0.1:1235").is_some());

        drop(first);
        assert!(registry.claim("127.0.0.1:1234").is_some());
    }

    #[test]
    fn test_validate_requires_endpoints_for_default_driver() {
        let empty = DeviceRegistry::new(vec![], Duration::from_millis(100));
        assert!(matches!(empty.validate(None), Err(SdrError::NoDevice(_))));
        assert!(empty.validate(Some("sim")).is_ok());
        assert!(empty.validate(Some("rtl_tcp=127.0.0.1:1")).is_ok());

        let configured = DeviceRegistry::new(vec!["127.0.0.1:1234".into()], Duration::from_millis(100));
        assert!(configured.validate(None).is_ok());
    }

    #[test]
    fn test_make_sim_devices_are_unclaimed() {
        let registry = DeviceRegistry::new(vec![], Duration::from_millis(100));
        let a = registry.make(Some("sim")).unwrap();
        let b = registry.make(Some("sim")).unwrap();
        assert_eq!(a.label(), "sim:silence");
        assert_eq!(b.label(), "sim:silence");
    }

    #[test]
    fn test_make_unreachable_endpoint_fails_and_releases_claim() {
        // Port 1 on loopback is closed on any sane test host
        let registry = DeviceRegistry::new(vec!["127.0.0.1:1".into()], Duration::from_millis(200));
        assert!(registry.make(None).is_err());
        assert!(registry.claim("127.0.0.1:1").is_some());
    }
}
