use crate::measure::Measurement;
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Classifies read failures for the retry loop.
///
/// Transient faults such as a corrupt frame or an unfinished conversion are
/// worth another attempt; capability failures (GPIO, filesystem) are not
/// and abort immediately.
pub trait Retryable {
    fn is_retryable(&self) -> bool;
}

/// One attempt at producing a validated reading from a sensor.
///
/// Implementations stamp the measurement when the read begins and never
/// retry internally; all retry and backoff policy lives in [`Sampler`].
pub trait SensorRead {
    type Error: Retryable + fmt::Debug;

    fn read(&mut self) -> Result<Measurement, Self::Error>;
}

/// Options to modify the behavior of a [`Sampler`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Options {
    /// How many successful reads feed the median.
    pub reads: usize,
    /// Blocking wait between successful reads, never before the first.
    ///
    /// These sensors return unreliable data when read back-to-back, so the
    /// wait is a correctness requirement rather than tuning.
    pub inter_read_delay: Duration,
    /// Total attempt budget for each single read, including the first.
    pub max_attempts: u32,
    /// Blocking wait between attempts at the same read.
    pub retry_delay: Duration,
}

#[derive(Debug, PartialEq, Error)]
pub enum Error<TReadError> {
    /// Invalid options were provided.
    #[error("invalid sampling options")]
    InvalidArgument,
    /// Every attempt at one read failed. No partial results are kept.
    #[error("read failed after {attempts} attempts: {last:?}")]
    RetriesExhausted { attempts: u32, last: TReadError },
    /// The sensor failed in a way another attempt cannot fix.
    #[error("sensor failed: {0:?}")]
    Failed(TReadError),
}

/// Takes several validated readings and reports the median by temperature,
/// shielding the caller from the occasional spurious-but-valid reading.
///
/// The sensor families served here share the same operational profile:
/// individual reads fail often and transiently, and a lone read can pass
/// validation while still being an outlier. One sampler therefore owns the
/// whole temporal policy (spacing between reads, backoff between attempts)
/// for any [`SensorRead`]. Per-family defaults live next to the sensors
/// (see [`crate::dht::DEFAULT_SAMPLING`] and
/// [`crate::w1therm::DEFAULT_SAMPLING`]).
#[derive(Debug)]
pub struct Sampler<TRead, SleepFn>
where
    TRead: SensorRead,
    SleepFn: Fn(Duration),
{
    reader: TRead,
    sleep_fn: SleepFn,
    options: Options,
}

impl<TRead> Sampler<TRead, fn(Duration)>
where
    TRead: SensorRead,
{
    /// Sampler that blocks on [`std::thread::sleep`].
    pub fn new(reader: TRead, options: Options) -> Result<Sampler<TRead, fn(Duration)>, Error<TRead::Error>> {
        Sampler::with_sleep(reader, std::thread::sleep, options)
    }
}

impl<TRead, SleepFn> Sampler<TRead, SleepFn>
where
    TRead: SensorRead,
    SleepFn: Fn(Duration),
{
    /// Constructs a sampler with an injected blocking wait.
    ///
    /// The provided `sleep_fn` must actually block for the requested
    /// duration when driving hardware; the protocol misbehaves when reads
    /// land too close together.
    pub fn with_sleep(
        reader: TRead,
        sleep_fn: SleepFn,
        options: Options,
    ) -> Result<Sampler<TRead, SleepFn>, Error<TRead::Error>> {
        if options.reads < 1 || options.max_attempts < 1 {
            return Err(Error::InvalidArgument);
        }
        Ok(Sampler {
            reader,
            sleep_fn,
            options,
        })
    }

    /// Reads until `options.reads` measurements succeed, then returns the
    /// median by temperature.
    ///
    /// Readings are stable-sorted and the element at index `len / 2` is
    /// returned; for an even count that is the element just past the
    /// midpoint, never an average of the middle pair.
    pub fn read_median(&mut self) -> Result<Measurement, Error<TRead::Error>> {
        let mut readings = Vec::with_capacity(self.options.reads);
        for i in 0..self.options.reads {
            if i > 0 {
                (self.sleep_fn)(self.options.inter_read_delay);
            }
            readings.push(self.read_one()?);
        }
        readings.sort_by_key(|m| m.temperature);
        Ok(readings[readings.len() / 2])
    }

    fn read_one(&mut self) -> Result<Measurement, Error<TRead::Error>> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.reader.read() {
                Ok(measurement) => return Ok(measurement),
                Err(err) if !err.is_retryable() => return Err(Error::Failed(err)),
                Err(err) if attempt >= self.options.max_attempts => {
                    return Err(Error::RetriesExhausted {
                        attempts: attempt,
                        last: err,
                    })
                }
                Err(err) => {
                    log::warn!(
                        "read attempt {}/{} failed: {:?}",
                        attempt,
                        self.options.max_attempts,
                        err
                    );
                    (self.sleep_fn)(self.options.retry_delay);
                }
            }
        }
    }
}
