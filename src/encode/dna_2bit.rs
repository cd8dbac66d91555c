//! Two-bit nucleotide codes: `A=00`, `C=01`, `G=10`, `T=11`.
//!
//! With this assignment the complement of a code is `code ^ 0b11`, and the
//! numeric order of codes is the alphabetical order of the bases.

/// Marks bytes that are not a nucleotide in [`BASE_CODES`].
const NOT_A_BASE: u8 = 0xff;

/// Code of every byte value, case-insensitive.
static BASE_CODES: [u8; 256] = {
    let mut table = [NOT_A_BASE; 256];
    table[b'A' as usize] = 0b00;
    table[b'a' as usize] = 0b00;
    table[b'C' as usize] = 0b01;
    table[b'c' as usize] = 0b01;
    table[b'G' as usize] = 0b10;
    table[b'g' as usize] = 0b10;
    table[b'T' as usize] = 0b11;
    table[b't' as usize] = 0b11;
    table
};

const BASES: [u8; 4] = *b"ACGT";

/// Code of `base`, `None` for anything but ACGT.
#[inline]
pub fn base_to_2bit(base: u8) -> Option<u8> {
    match BASE_CODES[base as usize] {
        NOT_A_BASE => None,
        code => Some(code),
    }
}

/// Upper-case base of a code. Only the two low bits are looked at.
#[inline]
pub fn twobit_to_base(code: u8) -> u8 {
    BASES[(code & 0b11) as usize]
}

#[inline]
pub fn complement(code: u8) -> u8 {
    (code & 0b11) ^ 0b11
}
