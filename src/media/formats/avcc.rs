// SPDX-License-Identifier: GPL-3.0-only

//! AVC (length-prefixed) H.264 framing
//!
//! Hardware encoders here emit `stream-format=avc`: every NAL unit is
//! preceded by a big-endian length field instead of an Annex-B start code,
//! and the SPS/PPS travel out of band in an `avcC` decoder configuration
//! record.

use std::fmt;

/// NAL unit type of a coded slice of an IDR picture
pub const NAL_TYPE_IDR: u8 = 5;
/// NAL unit type of a sequence parameter set
pub const NAL_TYPE_SPS: u8 = 7;
/// NAL unit type of a picture parameter set
pub const NAL_TYPE_PPS: u8 = 8;

const ANNEX_B_START_CODE: [u8; 4] = [0, 0, 0, 1];

/// Errors while parsing AVC framing
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AvccError {
    /// A length prefix points past the end of the buffer
    Truncated {
        offset: usize,
        needed: usize,
        available: usize,
    },
    /// Only 1, 2 and 4 byte length fields exist in AVC
    UnsupportedLengthSize(usize),
    /// Malformed decoder configuration record
    InvalidRecord(String),
    /// A parameter set is missing or has the wrong NAL type
    InvalidParameterSet(&'static str),
}

impl fmt::Display for AvccError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AvccError::Truncated {
                offset,
                needed,
                available,
            } => write!(
                f,
                "NAL unit at offset {} needs {} bytes, {} available",
                offset, needed, available
            ),
            AvccError::UnsupportedLengthSize(size) => {
                write!(f, "Unsupported NAL length size: {}", size)
            }
            AvccError::InvalidRecord(msg) => write!(f, "Invalid avcC record: {}", msg),
            AvccError::InvalidParameterSet(which) => write!(f, "Invalid {}", which),
        }
    }
}

impl std::error::Error for AvccError {}

/// NAL unit type from the first header byte
pub fn nal_unit_type(nal: &[u8]) -> Option<u8> {
    nal.first().map(|header| header & 0x1f)
}

/// Iterator over length-prefixed NAL units
///
/// Yields an error once and then stops when a length field overruns the
/// buffer.
pub struct NalUnits<'a> {
    data: &'a [u8],
    offset: usize,
    length_size: usize,
    failed: bool,
}

impl<'a> NalUnits<'a> {
    pub fn new(data: &'a [u8], length_size: usize) -> Result<Self, AvccError> {
        if !matches!(length_size, 1 | 2 | 4) {
            return Err(AvccError::UnsupportedLengthSize(length_size));
        }
        Ok(Self {
            data,
            offset: 0,
            length_size,
            failed: false,
        })
    }
}

impl<'a> Iterator for NalUnits<'a> {
    type Item = Result<&'a [u8], AvccError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed || self.offset >= self.data.len() {
            return None;
        }

        let remaining = &self.data[self.offset..];
        if remaining.len() < self.length_size {
            self.failed = true;
            return Some(Err(AvccError::Truncated {
                offset: self.offset,
                needed: self.length_size,
                available: remaining.len(),
            }));
        }

        let nal_len = remaining[..self.length_size]
            .iter()
            .fold(0usize, |acc, byte| (acc << 8) | *byte as usize);
        let body = &remaining[self.length_size..];
        if body.len() < nal_len {
            self.failed = true;
            return Some(Err(AvccError::Truncated {
                offset: self.offset,
                needed: nal_len,
                available: body.len(),
            }));
        }

        self.offset += self.length_size + nal_len;
        Some(Ok(&body[..nal_len]))
    }
}

/// Iterate the NAL units of an access unit with 4-byte length fields
pub fn nal_units(data: &[u8]) -> NalUnits<'_> {
    NalUnits {
        data,
        offset: 0,
        length_size: crate::constants::encoder::NAL_LENGTH_SIZE,
        failed: false,
    }
}

/// Append an access unit to `out` with Annex-B start codes
pub fn to_annex_b(data: &[u8], out: &mut Vec<u8>) -> Result<(), AvccError> {
    for nal in nal_units(data) {
        out.extend_from_slice(&ANNEX_B_START_CODE);
        out.extend_from_slice(nal?);
    }
    Ok(())
}

/// One SPS and one PPS, without length prefixes or start codes
///
/// Only built through [`ParameterSets::new`], so the SPS always carries
/// its profile and level bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParameterSets {
    sps: Vec<u8>,
    pps: Vec<u8>,
}

impl ParameterSets {
    /// Validate NAL types and build the pair
    pub fn new(sps: Vec<u8>, pps: Vec<u8>) -> Result<Self, AvccError> {
        // profile, constraint flags and level follow the header byte
        if sps.len() < 4 || nal_unit_type(&sps) != Some(NAL_TYPE_SPS) {
            return Err(AvccError::InvalidParameterSet("sequence parameter set"));
        }
        if pps.is_empty() || nal_unit_type(&pps) != Some(NAL_TYPE_PPS) {
            return Err(AvccError::InvalidParameterSet("picture parameter set"));
        }
        Ok(Self { sps, pps })
    }

    pub fn sps(&self) -> &[u8] {
        &self.sps
    }

    pub fn pps(&self) -> &[u8] {
        &self.pps
    }

    pub fn profile_idc(&self) -> u8 {
        self.sps[1]
    }

    pub fn profile_compatibility(&self) -> u8 {
        self.sps[2]
    }

    pub fn level_idc(&self) -> u8 {
        self.sps[3]
    }

    /// Parse the first SPS and PPS out of an `avcC` record
    pub fn from_avcc(record: &[u8]) -> Result<Self, AvccError> {
        let mut reader = RecordReader { data: record, offset: 0 };

        let version = reader.u8()?;
        if version != 1 {
            return Err(AvccError::InvalidRecord(format!(
                "configuration version {}",
                version
            )));
        }
        // profile, compatibility, level, length size
        reader.skip(4)?;

        let sps_count = reader.u8()? & 0x1f;
        let mut sps = None;
        for _ in 0..sps_count {
            let len = reader.u16()? as usize;
            let nal = reader.take(len)?;
            sps.get_or_insert_with(|| nal.to_vec());
        }

        let pps_count = reader.u8()?;
        let mut pps = None;
        for _ in 0..pps_count {
            let len = reader.u16()? as usize;
            let nal = reader.take(len)?;
            pps.get_or_insert_with(|| nal.to_vec());
        }

        match (sps, pps) {
            (Some(sps), Some(pps)) => Self::new(sps, pps),
            (None, _) => Err(AvccError::InvalidParameterSet("sequence parameter set")),
            (_, None) => Err(AvccError::InvalidParameterSet("picture parameter set")),
        }
    }

    /// Build an `avcC` record advertising `nal_length_size`-byte length fields
    pub fn to_avcc(&self, nal_length_size: usize) -> Result<Vec<u8>, AvccError> {
        if !matches!(nal_length_size, 1 | 2 | 4) {
            return Err(AvccError::UnsupportedLengthSize(nal_length_size));
        }
        let sps_len = u16::try_from(self.sps.len())
            .map_err(|_| AvccError::InvalidParameterSet("sequence parameter set"))?;
        let pps_len = u16::try_from(self.pps.len())
            .map_err(|_| AvccError::InvalidParameterSet("picture parameter set"))?;

        let mut record = Vec::with_capacity(11 + self.sps.len() + self.pps.len());
        record.push(1);
        record.push(self.profile_idc());
        record.push(self.profile_compatibility());
        record.push(self.level_idc());
        record.push(0xfc | (nal_length_size as u8 - 1));
        record.push(0xe0 | 1);
        record.extend_from_slice(&sps_len.to_be_bytes());
        record.extend_from_slice(&self.sps);
        record.push(1);
        record.extend_from_slice(&pps_len.to_be_bytes());
        record.extend_from_slice(&self.pps);
        Ok(record)
    }

    /// SPS then PPS with Annex-B start codes
    pub fn to_annex_b(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(8 + self.sps.len() + self.pps.len());
        out.extend_from_slice(&ANNEX_B_START_CODE);
        out.extend_from_slice(&self.sps);
        out.extend_from_slice(&ANNEX_B_START_CODE);
        out.extend_from_slice(&self.pps);
        out
    }
}

struct RecordReader<'a> {
    data: &'a [u8],
    offset: usize,
}

impl<'a> RecordReader<'a> {
    fn take(&mut self, len: usize) -> Result<&'a [u8], AvccError> {
        let end = self.offset + len;
        if end > self.data.len() {
            return Err(AvccError::InvalidRecord(format!(
                "record ends at {} bytes, needed {}",
                self.data.len(),
                end
            )));
        }
        let slice = &self.data[self.offset..end];
        self.offset = end;
        Ok(slice)
    }

    fn skip(&mut self, len: usize) -> Result<(), AvccError> {
        self.take(len).map(|_| ())
    }

    fn u8(&mut self) -> Result<u8, AvccError> {
        Ok(self.take(1)?[0])
    }

    fn u16(&mut self) -> Result<u16, AvccError> {
        let bytes = self.take(2)?;
        Ok(u16::from_be_bytes([bytes[0], bytes[1]]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn prefixed(nals: &[&[u8]]) -> Vec<u8> {
        let mut out = Vec::new();
        for nal in nals {
            out.extend_from_slice(&(nal.len() as u32).to_be_bytes());
            out.extend_from_slice(nal);
        }
        out
    }

    #[test]
    fn test_splits_length_prefixed_units() {
        let data = prefixed(&[&[0x65, 1, 2, 3], &[0x06, 9]]);
        let units: Vec<&[u8]> = nal_units(&data).map(|nal| nal.unwrap()).collect();
        assert_eq!(units, vec![&[0x65, 1, 2, 3][..], &[0x06, 9][..]]);
        assert_eq!(nal_unit_type(units[0]), Some(NAL_TYPE_IDR));
    }

    #[test]
    fn test_truncated_unit_stops_iteration() {
        let mut data = prefixed(&[&[0x41, 1]]);
        data.extend_from_slice(&[0, 0, 0, 10, 0x41]);
        let results: Vec<_> = nal_units(&data).collect();
        assert_eq!(results.len(), 2);
        assert!(results[0].is_ok());
        assert_eq!(
            results[1],
            Err(AvccError::Truncated {
                offset: 6,
                needed: 10,
                available: 1
            })
        );
    }

    #[test]
    fn test_annex_b_conversion() {
        let data = prefixed(&[&[0x65, 7], &[0x41]]);
        let mut out = Vec::new();
        to_annex_b(&data, &mut out).unwrap();
        assert_eq!(out, vec![0, 0, 0, 1, 0x65, 7, 0, 0, 0, 1, 0x41]);
    }

    #[test]
    fn test_avcc_record_layout() {
        let sets = ParameterSets::new(vec![0x67, 77, 0, 31, 0xaa], vec![0x68, 0xce]).unwrap();
        let record = sets.to_avcc(4).unwrap();
        assert_eq!(&record[..6], &[1, 77, 0, 31, 0xff, 0xe1]);
        assert_eq!(ParameterSets::from_avcc(&record).unwrap(), sets);
    }

    #[test]
    fn test_short_sps_is_rejected() {
        assert_eq!(
            ParameterSets::new(vec![0x67], vec![0x68, 0xce]),
            Err(AvccError::InvalidParameterSet("sequence parameter set"))
        );

        let sets = ParameterSets::new(vec![0x67, 66, 0xc0, 30], vec![0x68, 0xce]).unwrap();
        assert_eq!(sets.sps(), &[0x67, 66, 0xc0, 30]);
        assert_eq!(sets.pps(), &[0x68, 0xce]);
        assert_eq!((sets.profile_idc(), sets.level_idc()), (66, 30));
    }

    #[test]
    fn test_rejects_wrong_nal_types() {
        assert!(ParameterSets::new(vec![0x68, 77, 0, 31], vec![0x68]).is_err());
        assert!(ParameterSets::new(vec![0x67, 77, 0, 31], vec![0x67]).is_err());
        assert_eq!(
            NalUnits::new(&[], 3).err(),
            Some(AvccError::UnsupportedLengthSize(3))
        );
    }
}
