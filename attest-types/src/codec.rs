// SPDX-FileCopyrightText: © 2025 Phala Network <dstack@phala.network>
//
// SPDX-License-Identifier: Apache-2.0

//! Bounds-checked reader for the fixed-layout, little-endian structures
//! used by SGX quotes and SEV-SNP reports.
//!
//! Every read is checked against the remaining input; sub-slices handed out
//! are always contained in the parent slice, so span-containment invariants
//! hold by construction. Underflow and over-long declared lengths fail with
//! [`VerificationError::MalformedEvidence`].

use crate::{Result, VerificationError};

#[derive(Debug, Clone)]
pub struct SliceReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> SliceReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    pub fn is_empty(&self) -> bool {
        self.remaining() == 0
    }

    /// Take `n` bytes as a sub-slice of the underlying data.
    pub fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        if n > self.remaining() {
            return Err(VerificationError::MalformedEvidence(format!(
                "need {n} bytes at offset {}, only {} remain",
                self.pos,
                self.remaining()
            )));
        }
        let out = &self.data[self.pos..self.pos + n];
        self.pos += n;
        Ok(out)
    }

    pub fn skip(&mut self, n: usize) -> Result<()> {
        self.take(n).map(|_| ())
    }

    pub fn read_array<const N: usize>(&mut self) -> Result<[u8; N]> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }

    pub fn read_u8(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    pub fn read_u16_le(&mut self) -> Result<u16> {
        Ok(u16::from_le_bytes(self.read_array()?))
    }

    pub fn read_u32_le(&mut self) -> Result<u32> {
        Ok(u32::from_le_bytes(self.read_array()?))
    }

    pub fn read_u64_le(&mut self) -> Result<u64> {
        Ok(u64::from_le_bytes(self.read_array()?))
    }

    /// Read a u64 length prefix followed by that many bytes, as used by the
    /// packed SGX collateral layout.
    pub fn read_len_prefixed_u64(&mut self) -> Result<&'a [u8]> {
        let n = self.read_u64_le()?;
        let n = usize::try_from(n).map_err(|_| {
            VerificationError::MalformedEvidence(format!("length prefix {n} overflows usize"))
        })?;
        self.take(n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn little_endian_reads() {
        let data = [0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07, 0x08];
        let mut r = SliceReader::new(&data);
        assert_eq!(r.read_u16_le().unwrap(), 0x0201);
        assert_eq!(r.read_u32_le().unwrap(), 0x06050403);
        assert_eq!(r.remaining(), 2);
        assert_eq!(r.read_u8().unwrap(), 0x07);
    }

    #[test]
    fn take_past_end_is_malformed() {
        let mut r = SliceReader::new(&[0u8; 4]);
        r.skip(2).unwrap();
        let err = r.take(3).unwrap_err();
        assert!(matches!(err, VerificationError::MalformedEvidence(_)));
        // The reader is unchanged after a failed read.
        assert_eq!(r.remaining(), 2);
    }

    #[test]
    fn len_prefixed_field() {
        let mut data = 3u64.to_le_bytes().to_vec();
        data.extend_from_slice(b"abc");
        let mut r = SliceReader::new(&data);
        assert_eq!(r.read_len_prefixed_u64().unwrap(), b"abc");
        assert!(r.is_empty());

        let mut short = 4u64.to_le_bytes().to_vec();
        short.extend_from_slice(b"abc");
        let mut r = SliceReader::new(&short);
        assert!(r.read_len_prefixed_u64().is_err());
    }
}
