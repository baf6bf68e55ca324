/*
 * StoneGate - control-and-monitoring server for a laboratory apparatus
 * Copyright (c) 2026  StoneGate contributors
 *
 * This program is free software: you can redistribute it and/or modify
 * it under the terms of the GNU General Public License as published by
 * the Free Software Foundation, either version 3 of the License, or
 * (at your option) any later version.
 *
 * This program is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
 * GNU General Public License for more details.
 *
 * You should have received a copy of the GNU General Public License
 * along with this program.  If not, see <https://www.gnu.org/licenses/>.
 */

//! FNV-1a/64 content hashing for schematic files. Not cryptographic, and
//! doesn't need to be: it's a cheap change-detection fingerprint over raw
//! file bytes, not a security boundary, so we hand-roll it rather than
//! pull in a hashing crate for ten lines of arithmetic.

const FNV_OFFSET_BASIS: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

pub fn fnv1a64(bytes: &[u8]) -> u64 {
    let mut hash = FNV_OFFSET_BASIS;
    for &byte in bytes {
        hash ^= byte as u64;
        hash = hash.wrapping_mul(FNV_PRIME);
    }
    hash
}

pub fn fnv1a64_hex(bytes: &[u8]) -> String {
    format!("{:016x}", fnv1a64(bytes))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_input_is_the_offset_basis() {
        assert_eq!(fnv1a64(b""), FNV_OFFSET_BASIS);
    }

    #[test]
    fn hex_is_zero_padded_to_16_chars() {
        let digest = fnv1a64_hex(b"stonegate");
        assert_eq!(digest.len(), 16);
    }

    #[test]
    fn is_deterministic_and_sensitive_to_input() {
        let a = fnv1a64_hex(b"graph-v1");
        let b = fnv1a64_hex(b"graph-v1");
        let c = fnv1a64_hex(b"graph-v2");
        assert_eq!(a, b);
        assert_ne!(a, c);
    }
}
