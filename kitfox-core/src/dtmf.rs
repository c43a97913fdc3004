//! DTMF (touch-tone) decoder and command sequencer.
//!
//! Eight Goertzel bins at the standard row/column frequencies are
//! evaluated per block of 205 * rate / 8000 samples. A digit needs a
//! dominant row and a dominant column, confirmed in two consecutive
//! blocks; five seconds of silence emits a synthetic `$` marker. The
//! sequencer buffers digits until `#` and hands the complete sequence to
//! the data-link queue.

const ROW_FREQS: [f32; 4] = [697.0, 770.0, 852.0, 941.0];
const COL_FREQS: [f32; 4] = [1209.0, 1336.0, 1477.0, 1633.0];

const DIGITS: [[char; 4]; 4] = [
    ['1', '2', '3', 'A'],
    ['4', '5', '6', 'B'],
    ['7', '8', '9', 'C'],
    ['*', '0', '#', 'D'],
];

/// Dominance ratio: the winning row's energy must exceed this multiple of
/// the sum of the other rows (likewise for columns).
const DOMINANCE: f32 = 4.0;

/// Inactivity timeout before the `$` marker, in seconds.
const TIMEOUT_SECS: f32 = 5.0;

#[derive(Debug, Clone)]
struct GoertzelBin {
    coeff: f32,
    s1: f32,
    s2: f32,
}

impl GoertzelBin {
    fn new(freq: f32, sample_rate: f32, block: usize) -> Self {
        let k = (block as f32 * freq / sample_rate).round();
        let coeff = 2.0 * (std::f32::consts::TAU * k / block as f32).cos();
        Self {
            coeff,
            s1: 0.0,
            s2: 0.0,
        }
    }

    fn update(&mut self, x: f32) {
        let s = x + self.coeff * self.s1 - self.s2;
        self.s2 = self.s1;
        self.s1 = s;
    }

    fn magnitude_squared(&self) -> f32 {
        self.s1 * self.s1 + self.s2 * self.s2 - self.coeff * self.s1 * self.s2
    }

    fn reset(&mut self) {
        self.s1 = 0.0;
        self.s2 = 0.0;
    }
}

pub struct DtmfDetector {
    bins: Vec<GoertzelBin>,
    block_size: usize,
    count: usize,
    /// Block energy accumulator for the absolute signal gate.
    power: f32,
    /// Detection in the previous block, for debouncing.
    prev_block: Option<char>,
    /// Digit already reported for the current press.
    reported: Option<char>,
    idle_blocks: u32,
    timeout_blocks: u32,
    timed_out: bool,
}

impl DtmfDetector {
    pub fn new(sample_rate: u32) -> Self {
        let block_size = (205 * sample_rate as usize) / 8000;
        let fs = sample_rate as f32;
        let bins = ROW_FREQS
            .iter()
            .chain(COL_FREQS.iter())
            .map(|&f| GoertzelBin::new(f, fs, block_size))
            .collect();
        let timeout_blocks = (TIMEOUT_SECS * fs / block_size as f32) as u32;
        Self {
            bins,
            block_size,
            count: 0,
            power: 0.0,
            prev_block: None,
            reported: None,
            idle_blocks: 0,
            timeout_blocks,
            timed_out: true,
        }
    }

    /// Process one sample; returns a decoded character at block
    /// boundaries when a new press (or the timeout marker) is recognized.
    pub fn process_sample(&mut self, sample: i16) -> Option<char> {
        let x = sample as f32;
        self.power += x * x;
        for bin in &mut self.bins {
            bin.update(x);
        }
        self.count += 1;
        if self.count < self.block_size {
            return None;
        }
        let result = self.finish_block();
        for bin in &mut self.bins {
            bin.reset();
        }
        self.count = 0;
        self.power = 0.0;
        result
    }

    fn finish_block(&mut self) -> Option<char> {
        let detected = self.detect();

        match detected {
            Some(digit) => {
                self.idle_blocks = 0;
                self.timed_out = false;
                // Two consecutive blocks of the same digit, reported once
                // per press.
                let confirmed = self.prev_block == Some(digit);
                self.prev_block = Some(digit);
                if confirmed && self.reported != Some(digit) {
                    self.reported = Some(digit);
                    return Some(digit);
                }
                None
            }
            None => {
                self.prev_block = None;
                self.reported = None;
                if !self.timed_out {
                    self.idle_blocks += 1;
                    if self.idle_blocks >= self.timeout_blocks {
                        self.timed_out = true;
                        return Some('$');
                    }
                }
                None
            }
        }
    }

    fn detect(&self) -> Option<char> {
        let energies: Vec<f32> = self.bins.iter().map(|b| b.magnitude_squared()).collect();
        let (rows, cols) = energies.split_at(4);

        let row = dominant(rows)?;
        let col = dominant(cols)?;

        // Each tone must carry a real share of the block energy; a lone
        // tone or a sweep passing through one bin is not a keypress.
        let reference = self.power * self.block_size as f32 / 4.0;
        if rows[row] < 0.2 * reference || cols[col] < 0.2 * reference {
            return None;
        }
        Some(DIGITS[row][col])
    }
}

fn dominant(energies: &[f32]) -> Option<usize> {
    let mut best = 0;
    for (i, &e) in energies.iter().enumerate() {
        if e > energies[best] {
            best = i;
        }
    }
    let others: f32 = energies
        .iter()
        .enumerate()
        .filter(|&(i, _)| i != best)
        .map(|(_, &e)| e)
        .sum();
    if energies[best] > DOMINANCE * others && energies[best] > 0.0 {
        Some(best)
    } else {
        None
    }
}

/// Accumulates decoded digits into `#`-terminated command sequences.
#[derive(Debug, Default)]
pub struct DtmfSequencer {
    buf: String,
}

impl DtmfSequencer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one decoded character. Returns the complete sequence
    /// (terminator included) when `#` arrives.
    pub fn push(&mut self, c: char) -> Option<String> {
        match c {
            '$' => {
                self.buf.clear();
                None
            }
            '#' => {
                if self.buf.is_empty() {
                    return None;
                }
                self.buf.push('#');
                Some(std::mem::take(&mut self.buf))
            }
            _ => {
                self.buf.push(c);
                None
            }
        }
    }
}
