//! The pluggable element "class" (spec §1, §6.1): fill value, encode,
//! decode, native/raw size. A real client (e.g. an HDF5-style numeric or
//! compound-type class) supplies its own `ElementClass` impl; this crate
//! only needs one to exercise the codecs and addressing logic, so it
//! ships a `u32` test class, the analogue of HDF5's own `H5EA_CLS_TEST`.

use std::fmt;

/// Callback table for an array's element type. `CLASS_ID` is encoded as
/// a single byte on disk (spec §6.3) and must fit the registered set of
/// classes a given deployment recognizes; this crate does not maintain
/// a class registry of its own since it only ever builds arrays against
/// one concrete `ElementClass` at a time (monomorphized, not looked up
/// by id at runtime).
pub trait ElementClass: fmt::Debug {
    type Elem: Copy + fmt::Debug;

    const CLASS_ID: u8;
    const NAT_ELMT_SIZE: usize;
    const RAW_ELMT_SIZE: usize;

    fn fill() -> Self::Elem;
    fn encode(elem: &Self::Elem, buf: &mut [u8]);
    fn decode(buf: &[u8]) -> Self::Elem;
}

/// `u32`, little-endian, fill value `0xFFFF_FFFF` — mirrors the kind of
/// minimal numeric test class HDF5 itself uses to exercise array
/// internals without pulling in a real datatype layer.
#[derive(Debug, Clone, Copy)]
pub struct TestU32Class;

impl ElementClass for TestU32Class {
    type Elem = u32;

    const CLASS_ID: u8 = 0;
    const NAT_ELMT_SIZE: usize = 4;
    const RAW_ELMT_SIZE: usize = 4;

    fn fill() -> u32 {
        0xFFFF_FFFF
    }

    fn encode(elem: &u32, buf: &mut [u8]) {
        buf[..4].copy_from_slice(&elem.to_le_bytes());
    }

    fn decode(buf: &[u8]) -> u32 {
        u32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fill_is_all_ones() {
        assert_eq!(TestU32Class::fill(), 0xFFFF_FFFF);
    }

    #[test]
    fn encode_decode_round_trips() {
        let mut buf = [0u8; 4];
        TestU32Class::encode(&0xAABB_CCDD, &mut buf);
        assert_eq!(buf, [0xDD, 0xCC, 0xBB, 0xAA]);
        assert_eq!(TestU32Class::decode(&buf), 0xAABB_CCDD);
    }
}
