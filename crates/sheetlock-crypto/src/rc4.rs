//! RC4 stream cipher used by legacy BIFF8 workbook encryption

use zeroize::Zeroize;

/// RC4 keystream state
pub(crate) struct Rc4 {
    s: [u8; 256],
    i: u8,
    j: u8,
}

impl Rc4 {
    pub(crate) fn new(key: &[u8]) -> Self {
        let mut s = [0u8; 256];
        for (idx, slot) in s.iter_mut().enumerate() {
            *slot = idx as u8;
        }

        if !key.is_empty() {
            let mut j: u8 = 0;
            for i in 0..256 {
                j = j.wrapping_add(s[i]).wrapping_add(key[i % key.len()]);
                s.swap(i, j as usize);
            }
        }

        Self { s, i: 0, j: 0 }
    }

    fn next_byte(&mut self) -> u8 {
        self.i = self.i.wrapping_add(1);
        self.j = self.j.wrapping_add(self.s[self.i as usize]);
        self.s.swap(self.i as usize, self.j as usize);
        let idx = self.s[self.i as usize].wrapping_add(self.s[self.j as usize]);
        self.s[idx as usize]
    }

    /// XOR the keystream into `data`
    pub(crate) fn apply_keystream(&mut self, data: &mut [u8]) {
        for byte in data {
            *byte ^= self.next_byte();
        }
    }

    /// Advance the keystream by `n` bytes
    pub(crate) fn discard(&mut self, n: usize) {
        for _ in 0..n {
            self.next_byte();
        }
    }
}

impl Drop for Rc4 {
    fn drop(&mut self) {
        self.s.zeroize();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_vectors() {
        let mut data = *b"Plaintext";
        Rc4::new(b"Key").apply_keystream(&mut data);
        assert_eq!(data, [0xBB, 0xF3, 0x16, 0xE8, 0xD9, 0x40, 0xAF, 0x0A, 0xD3]);

        let mut data = *b"pedia";
        Rc4::new(b"Wiki").apply_keystream(&mut data);
        assert_eq!(data, [0x10, 0x21, 0xBF, 0x04, 0x20]);
    }

    #[test]
    fn discard_matches_consumed_keystream() {
        let mut a = Rc4::new(b"secret");
        let mut skipped = [0u8; 10];
        a.apply_keystream(&mut skipped);
        let mut tail_a = [0u8; 8];
        a.apply_keystream(&mut tail_a);

        let mut b = Rc4::new(b"secret");
        b.discard(10);
        let mut tail_b = [0u8; 8];
        b.apply_keystream(&mut tail_b);

        assert_eq!(tail_a, tail_b);
    }
}
