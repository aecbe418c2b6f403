use super::reader::mask;

/// `BitWriter` packs values MSB-first into a byte vector.
#[derive(Debug, Default)]
pub struct BitWriter {
    out: Vec<u8>,
    acc: u64,
    n: u32,
}

impl BitWriter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Write the `n` lowest bits of `value` (n <= 32).
    pub fn write(&mut self, value: u32, n: u32) {
        if n == 0 {
            return;
        }
        self.acc = (self.acc << n) | u64::from(value & mask(n));
        self.n += n;
        while self.n >= 8 {
            self.n -= 8;
            self.out.push((self.acc >> self.n) as u8);
        }
        self.acc &= (1u64 << self.n) - 1;
    }

    /// Write up to 64 bits.
    pub fn write_u64(&mut self, value: u64, n: u32) {
        if n > 32 {
            self.write((value >> 32) as u32, n - 32);
            self.write(value as u32, 32);
        } else {
            self.write(value as u32, n);
        }
    }

    pub fn write_flag(&mut self, flag: bool) {
        self.write(flag as u32, 1);
    }

    /// Write an unsigned exp-Golomb code.
    pub fn write_ue(&mut self, value: u32) {
        let code = value as u64 + 1;
        let bits = 64 - code.leading_zeros();
        self.write_u64(0, bits - 1);
        self.write_u64(code, bits);
    }

    /// Write a signed exp-Golomb code.
    pub fn write_se(&mut self, value: i32) {
        let code = if value > 0 {
            (value as u32) * 2 - 1
        } else {
            value.unsigned_abs() * 2
        };
        self.write_ue(code);
    }

    /// Pad the current byte with zero bits.
    pub fn align(&mut self) {
        if self.n > 0 {
            let pad = 8 - self.n;
            self.write(0, pad);
        }
    }

    /// Write the RBSP stop bit and align.
    pub fn write_trailing_bits(&mut self) {
        self.write_flag(true);
        self.align();
    }

    pub fn bits_written(&self) -> usize {
        self.out.len() * 8 + self.n as usize
    }

    /// Finish writing, zero-padding the last byte.
    pub fn into_bytes(mut self) -> Vec<u8> {
        self.align();
        self.out
    }
}
