use crate::measure::{Measurement, Tenths};
use crate::sampling::{self, Retryable, SensorRead};
use chrono::{DateTime, Utc};
use rand::Rng;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Where the kernel's w1 bus driver enumerates devices.
pub const DEVICE_BASE_DIR: &str = "/sys/bus/w1/devices";

/// Family prefix of DS18B20-class thermometers on the w1 bus.
const FAMILY_PREFIX: &str = "28-";

/// Power-on value of the temperature register; reading it back means no
/// conversion has completed yet.
const POWERON_MILLI: i32 = 85_000;

const MIN_MILLI: i32 = -55_000;
const MAX_MILLI: i32 = 125_000;

/// Sampling policy for this family. Conversions are slow and the kernel
/// serializes bus access, so reads are spaced further apart than DHT reads.
pub const DEFAULT_SAMPLING: sampling::Options = sampling::Options {
    reads: 5,
    inter_read_delay: Duration::from_secs(7),
    max_attempts: 50,
    retry_delay: Duration::from_secs(5),
};

#[derive(Debug, Error)]
pub enum Error {
    /// Reading the device file failed.
    #[error("device file read failed: {0}")]
    Io(#[from] io::Error),
    /// The kernel's CRC verdict was not `YES`, or the payload shape was
    /// wrong.
    #[error("conversion not ready")]
    NotReady,
    /// No parsable `t=` field in the payload.
    #[error("malformed w1_slave payload")]
    Malformed,
    /// The register still holds the power-on value.
    #[error("sensor still initializing")]
    Initializing,
    /// Outside the device's measurable range, or an exact zero.
    #[error("temperature out of range: {milli} m°C")]
    OutOfRange { milli: i32 },
    /// No thermometer directory under the base path.
    #[error("no thermometer found under {0}")]
    NoDevice(PathBuf),
    /// More than one thermometer; the device id must be given explicitly.
    #[error("multiple thermometers found: {0:?}")]
    MultipleDevices(Vec<String>),
}

impl Retryable for Error {
    fn is_retryable(&self) -> bool {
        match self {
            Error::Io(_) | Error::NoDevice(_) | Error::MultipleDevices(_) => false,
            Error::NotReady | Error::Malformed | Error::Initializing | Error::OutOfRange { .. } => {
                true
            }
        }
    }
}

/// Parses the kernel's `w1_slave` payload into millidegrees Celsius.
///
/// The payload is two lines: the scratchpad dump ending in the CRC verdict,
/// then the dump again with the converted value appended:
///
/// ```text
/// 4b 01 4b 46 7f ff 0c 10 d8 : crc=d8 YES
/// 4b 01 4b 46 7f ff 0c 10 d8 t=20687
/// ```
pub fn parse_w1_slave(payload: &str) -> Result<i32, Error> {
    let mut lines = payload.lines();
    let verdict = lines.next().ok_or(Error::NotReady)?;
    let data = lines.next().ok_or(Error::NotReady)?;
    if lines.next().is_some() || !verdict.trim_end().ends_with("YES") {
        return Err(Error::NotReady);
    }
    let (_, raw) = data.split_once("t=").ok_or(Error::Malformed)?;
    let milli: i32 = raw.trim().parse().map_err(|_| Error::Malformed)?;
    if milli == POWERON_MILLI {
        return Err(Error::Initializing);
    }
    // An exact zero is occasionally genuine but far more often a bus glitch;
    // always rejected.
    if milli == 0 || milli < MIN_MILLI || milli > MAX_MILLI {
        return Err(Error::OutOfRange { milli });
    }
    Ok(milli)
}

/// Resolves the `w1_slave` file for a thermometer under `base_dir`.
///
/// With `device_id` given, a bare serial gets the family prefix prepended
/// and the filesystem is not consulted. Without it, exactly one enumerated
/// thermometer is expected.
pub fn device_file(base_dir: &Path, device_id: Option<&str>) -> Result<PathBuf, Error> {
    let device = match device_id {
        Some(id) if id.starts_with(FAMILY_PREFIX) => id.to_string(),
        Some(id) => format!("{}{}", FAMILY_PREFIX, id),
        None => {
            let mut found = Vec::new();
            for entry in fs::read_dir(base_dir)? {
                let name = entry?.file_name();
                if let Some(name) = name.to_str() {
                    if name.starts_with(FAMILY_PREFIX) {
                        found.push(name.to_string());
                    }
                }
            }
            match found.len() {
                0 => return Err(Error::NoDevice(base_dir.to_path_buf())),
                1 => found.remove(0),
                _ => {
                    found.sort();
                    return Err(Error::MultipleDevices(found));
                }
            }
        }
    };
    log::debug!("using w1 device {}", device);
    Ok(base_dir.join(device).join("w1_slave"))
}

/// A thermometer read through the kernel's w1 device file.
///
/// Like [`crate::dht::DhtSensor`], one read is one pass and retry policy
/// belongs to a [`sampling::Sampler`].
#[derive(Debug)]
pub struct W1Sensor<TimeFn>
where
    TimeFn: Fn() -> DateTime<Utc>,
{
    path: PathBuf,
    now_fn: TimeFn,
}

impl W1Sensor<fn() -> DateTime<Utc>> {
    /// Sensor on the system clock.
    pub fn new(path: impl Into<PathBuf>) -> W1Sensor<fn() -> DateTime<Utc>> {
        W1Sensor {
            path: path.into(),
            now_fn: Utc::now,
        }
    }
}

impl<TimeFn> W1Sensor<TimeFn>
where
    TimeFn: Fn() -> DateTime<Utc>,
{
    /// Constructs a sensor with an injected clock.
    pub fn with_clock(path: impl Into<PathBuf>, now_fn: TimeFn) -> W1Sensor<TimeFn> {
        W1Sensor {
            path: path.into(),
            now_fn,
        }
    }
}

impl<TimeFn> SensorRead for W1Sensor<TimeFn>
where
    TimeFn: Fn() -> DateTime<Utc>,
{
    type Error = Error;

    fn read(&mut self) -> Result<Measurement, Error> {
        let at = (self.now_fn)();
        let payload = fs::read_to_string(&self.path)?;
        let milli = parse_w1_slave(&payload)?;
        Ok(Measurement {
            at,
            temperature: Tenths::from_milli(milli),
            humidity: None,
        })
    }
}

/// Synthesizes a plausible temperature-only reading for deployments with no
/// sensor attached.
pub fn simulate<TRng: Rng + ?Sized>(rng: &mut TRng, at: DateTime<Utc>) -> Measurement {
    Measurement {
        at,
        temperature: Tenths::new(rng.gen_range(-200..=200)),
        humidity: None,
    }
}
