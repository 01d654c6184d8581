use crate::measure::{Measurement, Tenths};
use crate::sampling::{self, Retryable, SensorRead};
use chrono::{DateTime, Utc};
use embedded_hal::delay::DelayNs;
use embedded_hal::digital::{InputPin, OutputPin};
use rand::Rng;
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Number of line levels captured per read by default.
///
/// The transmission fits comfortably; the excess at the tail is idle-high
/// line and costs nothing but capture time.
pub const DEFAULT_SAMPLE_COUNT: usize = 500;

/// Shortest capture window that could still hold a full frame: each bit-cell
/// needs at least one low and one high sample, plus the low edge that
/// terminates the final cell.
pub const MIN_SAMPLE_COUNT: usize = 2 * FRAME_BITS + 1;

/// Sampling policy matching the cadence this sensor family tolerates.
pub const DEFAULT_SAMPLING: sampling::Options = sampling::Options {
    reads: 3,
    inter_read_delay: Duration::from_secs(3),
    max_attempts: 80,
    retry_delay: Duration::from_secs(3),
};

const FRAME_BITS: usize = 40;

/// High runs longer than this many samples decode as a 1 bit.
const LONG_RUN_SAMPLES: usize = 3;

const INIT_HIGH_MS: u32 = 25;
const INIT_LOW_MS: u32 = 20;

/// Structural or plausibility failures while turning raw samples into
/// values.
///
/// All of these are transient faults of a single capture (an incomplete
/// window, a slipped bit boundary) and are retried by the sampling
/// controller rather than handled here.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Error)]
pub enum DecodeError {
    /// The capture window ended before 40 bits were observed.
    #[error("need 40 bits, got {got}")]
    InsufficientBits { got: usize },
    /// The additive checksum disagrees with the transmitted byte.
    #[error("checksum mismatch: declared {declared:#04x}, computed {computed:#04x}")]
    ChecksumMismatch { declared: u8, computed: u8 },
    /// Structurally valid frame carrying a physically impossible humidity.
    #[error("humidity of {tenths} tenths outside 0..=1000")]
    ImplausibleHumidity { tenths: u16 },
}

#[derive(Debug, PartialEq, Error)]
pub enum Error<TLineError> {
    /// Wrapped error from the line capability.
    #[error("line capture failed: {0:?}")]
    Wrapped(TLineError),
    /// Invalid argument was provided.
    #[error("invalid argument")]
    InvalidArgument,
    /// The captured window failed to decode or validate.
    #[error(transparent)]
    Decode(DecodeError),
}

impl<TLineError> From<TLineError> for Error<TLineError> {
    fn from(error: TLineError) -> Error<TLineError> {
        Error::Wrapped(error)
    }
}

impl<TLineError> Retryable for Error<TLineError> {
    fn is_retryable(&self) -> bool {
        matches!(self, Error::Decode(_))
    }
}

/// The two incompatible byte encodings sharing this wire protocol.
///
/// Nothing on the wire says which one is attached; see
/// [`Frame::sensor_model`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SensorModel {
    /// Integer-only encoding: whole units in the high bytes, low bytes
    /// always zero.
    Dht11,
    /// Fixed-point encoding: tenths across both bytes, sign bit in the
    /// temperature high byte. Covers the DHT22 and at least the DHT21,
    /// AM2301, AM2302 and AM2321.
    Dht22,
}

/// The 40-bit payload of one sensor read.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Frame {
    pub humidity_hi: u8,
    pub humidity_lo: u8,
    pub temperature_hi: u8,
    pub temperature_lo: u8,
    pub checksum: u8,
}

impl Frame {
    fn computed_checksum(&self) -> u8 {
        (u16::from(self.humidity_hi)
            + u16::from(self.humidity_lo)
            + u16::from(self.temperature_hi)
            + u16::from(self.temperature_lo)) as u8
    }

    /// Guesses which encoding produced this frame.
    ///
    /// Evaluated in priority order; the first two branches are certain, the
    /// third is a documented best effort:
    ///
    /// 1. Temperature sign bit set: only the fixed-point encoding represents
    ///    sub-zero temperatures.
    /// 2. A nonzero low byte: the integer-only encoding always sends zero
    ///    low bytes.
    /// 3. Both high bytes below 4 with zero low bytes: ambiguous. An
    ///    integer-only reading of 0..=3 units and a fixed-point reading of
    ///    0.0, 25.6, 51.2 or 76.8 produce identical bytes here, so this is a
    ///    guess for the fixed-point model, not a certainty.
    /// 4. Otherwise the integer-only model.
    pub fn sensor_model(&self) -> SensorModel {
        if self.temperature_hi & 0x80 != 0 {
            SensorModel::Dht22
        } else if self.humidity_lo != 0 || self.temperature_lo != 0 {
            SensorModel::Dht22
        } else if self.humidity_hi < 4 && self.temperature_hi < 4 {
            // The ambiguous low-range case; most likely fixed-point.
            SensorModel::Dht22
        } else {
            SensorModel::Dht11
        }
    }
}

/// Decodes a captured sample window into a checksum-valid frame.
///
/// Leading bits ahead of the final 40 are start-up noise from the initiating
/// pulse and the sensor's acknowledgement; the frame is the tail of the bit
/// sequence.
pub fn decode(samples: &[bool]) -> Result<Frame, DecodeError> {
    let bits = infer_bits(samples);
    if bits.len() < FRAME_BITS {
        return Err(DecodeError::InsufficientBits { got: bits.len() });
    }
    let mut bytes = [0u8; 5];
    for (i, bit) in bits[bits.len() - FRAME_BITS..].iter().enumerate() {
        bytes[i / 8] = bytes[i / 8] << 1 | u8::from(*bit);
    }
    let frame = Frame {
        humidity_hi: bytes[0],
        humidity_lo: bytes[1],
        temperature_hi: bytes[2],
        temperature_lo: bytes[3],
        checksum: bytes[4],
    };
    let computed = frame.computed_checksum();
    if computed != frame.checksum {
        return Err(DecodeError::ChecksumMismatch {
            declared: frame.checksum,
            computed,
        });
    }
    Ok(frame)
}

/// One logical bit per complete bit-cell: skip the low gap, measure the high
/// run. A high run that touches the end of the window has no terminating low
/// edge and is dropped rather than guessed at.
fn infer_bits(samples: &[bool]) -> Vec<bool> {
    let mut bits = Vec::with_capacity(FRAME_BITS + 8);
    let mut i = 0;
    while i < samples.len() {
        while i < samples.len() && !samples[i] {
            i += 1;
        }
        let run_start = i;
        while i < samples.len() && samples[i] {
            i += 1;
        }
        if i == samples.len() {
            break;
        }
        bits.push(i - run_start > LONG_RUN_SAMPLES);
    }
    bits
}

/// Converts a checksum-valid frame into `(temperature, humidity)`.
///
/// Humidity outside 0..=100 % rejects the frame the same way a checksum
/// failure does. Temperature is deliberately not bound-checked: the valid
/// range differs per model and is not carried on the wire, so an implausible
/// temperature survives to the caller.
pub fn interpret(frame: &Frame) -> Result<(Tenths, Tenths), DecodeError> {
    let model = frame.sensor_model();
    let humidity_tenths = match model {
        SensorModel::Dht11 => u16::from(frame.humidity_hi) * 10,
        SensorModel::Dht22 => u16::from(frame.humidity_hi) << 8 | u16::from(frame.humidity_lo),
    };
    if humidity_tenths > 1000 {
        return Err(DecodeError::ImplausibleHumidity {
            tenths: humidity_tenths,
        });
    }
    let temperature = match model {
        SensorModel::Dht11 => Tenths::new(i16::from(frame.temperature_hi) * 10),
        SensorModel::Dht22 => {
            let magnitude =
                i16::from(frame.temperature_hi & 0x7F) << 8 | i16::from(frame.temperature_lo);
            if frame.temperature_hi & 0x80 != 0 {
                Tenths::new(-magnitude)
            } else {
                Tenths::new(magnitude)
            }
        }
    };
    Ok((temperature, Tenths::new(humidity_tenths as i16)))
}

/// Capability that owns the data line: issue the initiating pulse sequence,
/// then capture `sample_count` consecutive line levels.
///
/// The capture loop is timing-sensitive; implementations must read
/// back-to-back and not yield or block between samples.
pub trait LineSampler {
    type Error;

    fn pulse_and_capture(&mut self, sample_count: usize) -> Result<Vec<bool>, Self::Error>;
}

/// [`LineSampler`] over an open-drain GPIO with a pull-up, via
/// `embedded-hal`.
///
/// Holds the line high ~25 ms, pulls it low ~20 ms to request a
/// transmission, releases it, then reads levels back-to-back. Platform pin
/// bindings are the caller's concern; any pin type implementing both
/// `InputPin` and `OutputPin` with its pull-up enabled works.
#[derive(Debug)]
pub struct GpioLine<TPin, TDelay> {
    pin: TPin,
    delay: TDelay,
}

impl<TPin, TDelay> GpioLine<TPin, TDelay> {
    pub fn new(pin: TPin, delay: TDelay) -> GpioLine<TPin, TDelay> {
        GpioLine { pin, delay }
    }
}

impl<TPin, TDelay> LineSampler for GpioLine<TPin, TDelay>
where
    TPin: InputPin + OutputPin,
    TDelay: DelayNs,
{
    type Error = TPin::Error;

    fn pulse_and_capture(&mut self, sample_count: usize) -> Result<Vec<bool>, TPin::Error> {
        self.pin.set_high()?;
        self.delay.delay_ms(INIT_HIGH_MS);
        self.pin.set_low()?;
        self.delay.delay_ms(INIT_LOW_MS);
        // Release the line; the pull-up idles it high until the sensor
        // answers.
        self.pin.set_high()?;
        let mut samples = Vec::with_capacity(sample_count);
        for _ in 0..sample_count {
            samples.push(self.pin.is_high()?);
        }
        Ok(samples)
    }
}

/// A DHT-class sensor on a sampled line.
///
/// One [`read`](SensorRead::read) is one capture-decode-interpret pass,
/// stamped from the provided clock when the read begins. Feed it to a
/// [`sampling::Sampler`] for retries and the median; this type never
/// retries.
#[derive(Debug)]
pub struct DhtSensor<TLine, TimeFn>
where
    TLine: LineSampler,
    TimeFn: Fn() -> DateTime<Utc>,
{
    line: TLine,
    now_fn: TimeFn,
    sample_count: usize,
}

impl<TLine> DhtSensor<TLine, fn() -> DateTime<Utc>>
where
    TLine: LineSampler,
{
    /// Sensor on the system clock with the default capture window.
    pub fn new(line: TLine) -> DhtSensor<TLine, fn() -> DateTime<Utc>> {
        DhtSensor {
            line,
            now_fn: Utc::now,
            sample_count: DEFAULT_SAMPLE_COUNT,
        }
    }
}

impl<TLine, TimeFn> DhtSensor<TLine, TimeFn>
where
    TLine: LineSampler,
    TimeFn: Fn() -> DateTime<Utc>,
{
    /// Constructs a sensor with an injected clock and capture window.
    ///
    /// The clock only needs to produce wall-clock timestamps for the output
    /// record; it plays no part in protocol timing. Windows too short to
    /// ever hold a 40-bit frame are rejected.
    pub fn with_clock(
        line: TLine,
        now_fn: TimeFn,
        sample_count: usize,
    ) -> Result<DhtSensor<TLine, TimeFn>, Error<TLine::Error>> {
        if sample_count < MIN_SAMPLE_COUNT {
            return Err(Error::InvalidArgument);
        }
        Ok(DhtSensor {
            line,
            now_fn,
            sample_count,
        })
    }
}

impl<TLine, TimeFn> SensorRead for DhtSensor<TLine, TimeFn>
where
    TLine: LineSampler,
    TLine::Error: fmt::Debug,
    TimeFn: Fn() -> DateTime<Utc>,
{
    type Error = Error<TLine::Error>;

    fn read(&mut self) -> Result<Measurement, Error<TLine::Error>> {
        let at = (self.now_fn)();
        let samples = self.line.pulse_and_capture(self.sample_count)?;
        let frame = decode(&samples).map_err(Error::Decode)?;
        let (temperature, humidity) = interpret(&frame).map_err(Error::Decode)?;
        Ok(Measurement {
            at,
            temperature,
            humidity: Some(humidity),
        })
    }
}

/// Synthesizes a plausible reading for deployments with no sensor attached.
///
/// Bypasses the line, the decode pipeline and all sampling policy.
pub fn simulate<TRng: Rng + ?Sized>(rng: &mut TRng, at: DateTime<Utc>) -> Measurement {
    Measurement {
        at,
        temperature: Tenths::new(rng.gen_range(-200..=200)),
        humidity: Some(Tenths::new(rng.gen_range(200..=800))),
    }
}
