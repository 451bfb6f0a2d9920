use std::fs::File;
use std::io::Read;
use std::path::Path;

use crate::utils::DynError;

// SAC binary layout: 70 f32 header words, 40 i32 header words, 24 8-char
// string fields, then npts f32 data samples. Offsets below are in bytes.
const HEADER_SIZE: usize = 632;
const DELTA_OFFSET: usize = 0; // float word 0
const STLA_OFFSET: usize = 124; // float word 31
const STLO_OFFSET: usize = 128; // float word 32
const NVHDR_OFFSET: usize = 304; // int word 76
const NPTS_OFFSET: usize = 316; // int word 79
const KSTNM_OFFSET: usize = 440; // first string field, 8 chars
const SAC_UNDEFINED: f32 = -12345.0;
const SAC_VERSION: i32 = 6;

#[derive(Debug, Clone)]
pub struct SacTrace {
    pub station: String,
    pub delta: f64,
    pub stla: f64,
    pub stlo: f64,
    pub data: Vec<f64>,
}

fn read_f32(buf: &[u8], offset: usize, big_endian: bool) -> f32 {
    let bytes = [buf[offset], buf[offset + 1], buf[offset + 2], buf[offset + 3]];
    if big_endian {
        f32::from_be_bytes(bytes)
    } else {
        f32::from_le_bytes(bytes)
    }
}

fn read_i32(buf: &[u8], offset: usize, big_endian: bool) -> i32 {
    let bytes = [buf[offset], buf[offset + 1], buf[offset + 2], buf[offset + 3]];
    if big_endian {
        i32::from_be_bytes(bytes)
    } else {
        i32::from_le_bytes(bytes)
    }
}

fn detect_endianness(buf: &[u8]) -> Result<bool, DynError> {
    if read_i32(buf, NVHDR_OFFSET, false) == SAC_VERSION {
        return Ok(false);
    }
    if read_i32(buf, NVHDR_OFFSET, true) == SAC_VERSION {
        return Ok(true);
    }
    Err("not a SAC file: header version word is not 6 in either byte order".into())
}

pub fn parse_sac_bytes(buf: &[u8]) -> Result<SacTrace, DynError> {
    if buf.len() < HEADER_SIZE {
        return Err(format!(
            "SAC buffer too short for header: {} < {HEADER_SIZE} bytes",
            buf.len()
        )
        .into());
    }
    let big_endian = detect_endianness(buf)?;

    let delta = read_f32(buf, DELTA_OFFSET, big_endian);
    if delta == SAC_UNDEFINED || delta <= 0.0 {
        return Err("SAC header delta is undefined or non-positive".into());
    }
    let stla = read_f32(buf, STLA_OFFSET, big_endian);
    let stlo = read_f32(buf, STLO_OFFSET, big_endian);
    if stla == SAC_UNDEFINED || stlo == SAC_UNDEFINED {
        return Err("SAC header stla/stlo undefined; station coordinates are required".into());
    }
    let npts = read_i32(buf, NPTS_OFFSET, big_endian);
    if npts <= 0 {
        return Err("SAC header npts must be positive".into());
    }
    let npts = npts as usize;
    let expected = HEADER_SIZE + 4 * npts;
    if buf.len() < expected {
        return Err(format!(
            "SAC data section truncated: expected {expected} bytes, have {}",
            buf.len()
        )
        .into());
    }

    let station = String::from_utf8_lossy(&buf[KSTNM_OFFSET..KSTNM_OFFSET + 8])
        .trim_end_matches(['\0', ' '])
        .to_string();

    let mut data = Vec::with_capacity(npts);
    for i in 0..npts {
        data.push(read_f32(buf, HEADER_SIZE + 4 * i, big_endian) as f64);
    }

    Ok(SacTrace {
        station,
        delta: delta as f64,
        stla: stla as f64,
        stlo: stlo as f64,
        data,
    })
}

pub fn read_sac(path: &Path) -> Result<SacTrace, DynError> {
    let mut file = File::open(path)
        .map_err(|e| format!("failed to open {}: {e}", path.display()))?;
    let mut buf = Vec::new();
    file.read_to_end(&mut buf)?;
    parse_sac_bytes(&buf)
}

#[cfg(test)]
mod tests {
    use super::{parse_sac_bytes, HEADER_SIZE, KSTNM_OFFSET};

    fn synthetic_sac(npts: usize, big_endian: bool) -> Vec<u8> {
        let mut buf = vec![0u8; HEADER_SIZE + 4 * npts];
        let put_f32 = |buf: &mut [u8], offset: usize, v: f32| {
            let bytes = if big_endian {
                v.to_be_bytes()
            } else {
                v.to_le_bytes()
            };
            buf[offset..offset + 4].copy_from_slice(&bytes);
        };
        let put_i32 = |buf: &mut [u8], offset: usize, v: i32| {
            let bytes = if big_endian {
                v.to_be_bytes()
            } else {
                v.to_le_bytes()
            };
            buf[offset..offset + 4].copy_from_slice(&bytes);
        };
        put_f32(&mut buf, 0, 0.05); // delta
        put_f32(&mut buf, 124, -21.5); // stla
        put_f32(&mut buf, 128, 117.25); // stlo
        put_i32(&mut buf, 304, 6); // nvhdr
        put_i32(&mut buf, 316, npts as i32);
        buf[KSTNM_OFFSET..KSTNM_OFFSET + 8].copy_from_slice(b"PSA01\0\0\0");
        for i in 0..npts {
            put_f32(&mut buf, HEADER_SIZE + 4 * i, i as f32 * 0.5);
        }
        buf
    }

    #[test]
    fn parses_little_endian_header_and_data() {
        let buf = synthetic_sac(8, false);
        let trace = parse_sac_bytes(&buf).unwrap();
        assert_eq!(trace.station, "PSA01");
        assert!((trace.delta - 0.05).abs() < 1e-9);
        assert!((trace.stla + 21.5).abs() < 1e-6);
        assert!((trace.stlo - 117.25).abs() < 1e-6);
        assert_eq!(trace.data.len(), 8);
        assert!((trace.data[4] - 2.0).abs() < 1e-9);
    }

    #[test]
    fn parses_big_endian_by_sniffing_version_word() {
        let buf = synthetic_sac(4, true);
        let trace = parse_sac_bytes(&buf).unwrap();
        assert_eq!(trace.data.len(), 4);
        assert!((trace.delta - 0.05).abs() < 1e-9);
    }

    #[test]
    fn rejects_truncated_data_section() {
        let mut buf = synthetic_sac(8, false);
        buf.truncate(HEADER_SIZE + 4 * 3);
        assert!(parse_sac_bytes(&buf).is_err());
    }

    #[test]
    fn rejects_undefined_coordinates() {
        let mut buf = synthetic_sac(4, false);
        buf[124..128].copy_from_slice(&(-12345.0f32).to_le_bytes());
        assert!(parse_sac_bytes(&buf).is_err());
    }
}
