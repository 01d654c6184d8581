//! Readers for single-wire environmental sensors on single-board computers.
//!
//! Two sensor families share one operational pattern here: individual reads
//! fail often and transiently, so a sampling controller retries each read
//! with a blocking backoff and reports the median of several successes.
//! What differs per family is how one read happens: bit-banged line capture
//! and frame decoding for DHT-class devices, a kernel device file for
//! DS18B20-class thermometers.

/// Decoding and reading DHT11/DHT22-class sensors from a sampled data line.
pub mod dht;
/// Fixed-point measurement values shared by every sensor family.
pub mod measure;
/// The JSON line record consumed by persistence and upload collaborators.
pub mod record;
/// The shared retry and median sampling controller.
pub mod sampling;
/// DS18B20-class thermometers through the kernel's w1 bus driver.
pub mod w1therm;
