use single_wire_sensors::dht::LineSampler;
use std::collections::VecDeque;

/// Error surfaced by a scripted line failure.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LineError;

/// A [`LineSampler`] that replays pre-scripted capture windows.
#[derive(Debug, Default)]
pub struct FakeLine {
    captures: VecDeque<Result<Vec<bool>, LineError>>,
}

impl FakeLine {
    pub fn new() -> FakeLine {
        FakeLine {
            captures: VecDeque::new(),
        }
    }

    pub fn push(&mut self, capture: Vec<bool>) {
        self.captures.push_back(Ok(capture));
    }

    pub fn push_failure(&mut self) {
        self.captures.push_back(Err(LineError));
    }
}

impl LineSampler for FakeLine {
    type Error = LineError;

    fn pulse_and_capture(&mut self, sample_count: usize) -> Result<Vec<bool>, LineError> {
        // A line nobody answers on stays pulled up.
        self.captures
            .pop_front()
            .unwrap_or_else(|| Ok(vec![true; sample_count]))
    }
}

/// Expands frame bytes into a plausible capture window: leading junk from
/// the acknowledgement pulse, a two-low gap per bit-cell, short high runs
/// for 0 and long ones for 1, and a terminating low edge.
pub fn waveform(bytes: [u8; 5]) -> Vec<bool> {
    let mut samples = vec![false, false, true, true, true, true, true, true];
    for byte in bytes.iter() {
        for shift in (0..8).rev() {
            samples.extend_from_slice(&[false, false]);
            if byte >> shift & 1 == 1 {
                samples.extend_from_slice(&[true; 5]);
            } else {
                samples.extend_from_slice(&[true; 2]);
            }
        }
    }
    samples.extend_from_slice(&[false, false]);
    samples
}

pub mod gpio {
    use embedded_hal::delay::DelayNs;
    use embedded_hal::digital::{ErrorType, InputPin, OutputPin};
    use std::cell::RefCell;
    use std::collections::VecDeque;
    use std::convert::Infallible;
    use std::rc::Rc;

    /// One observable action on the fake pin or its delay.
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub enum Op {
        High,
        Low,
        DelayNs(u32),
    }

    pub type OpLog = Rc<RefCell<Vec<Op>>>;

    /// Scripted open-drain pin: records drive operations and replays input
    /// levels, defaulting to the pulled-up idle state when the script runs
    /// out.
    #[derive(Debug)]
    pub struct FakePin {
        ops: OpLog,
        levels: VecDeque<bool>,
    }

    impl FakePin {
        pub fn new(ops: OpLog, levels: Vec<bool>) -> FakePin {
            FakePin {
                ops,
                levels: levels.into(),
            }
        }
    }

    impl ErrorType for FakePin {
        type Error = Infallible;
    }

    impl InputPin for FakePin {
        fn is_high(&mut self) -> Result<bool, Infallible> {
            Ok(self.levels.pop_front().unwrap_or(true))
        }

        fn is_low(&mut self) -> Result<bool, Infallible> {
            self.is_high().map(|high| !high)
        }
    }

    impl OutputPin for FakePin {
        fn set_low(&mut self) -> Result<(), Infallible> {
            self.ops.borrow_mut().push(Op::Low);
            Ok(())
        }

        fn set_high(&mut self) -> Result<(), Infallible> {
            self.ops.borrow_mut().push(Op::High);
            Ok(())
        }
    }

    /// Delay provider that records instead of sleeping, sharing the pin's
    /// operation log so interleaving is visible.
    #[derive(Debug)]
    pub struct FakeDelay {
        ops: OpLog,
    }

    impl FakeDelay {
        pub fn new(ops: OpLog) -> FakeDelay {
            FakeDelay { ops }
        }
    }

    impl DelayNs for FakeDelay {
        fn delay_ns(&mut self, ns: u32) {
            self.ops.borrow_mut().push(Op::DelayNs(ns));
        }

        fn delay_ms(&mut self, ms: u32) {
            self.delay_ns(ms * 1_000_000);
        }
    }
}
