//! Finite field groups from RFC 7919.
//!
//! TLS 1.3 names these groups in key_share. TLS 1.2 DHE sends the prime and
//! generator explicitly in ServerKeyExchange, so the client maps them back to
//! a named group and refuses anything else.

use std::sync::OnceLock;

use num_bigint::BigUint;

use crate::types::NamedGroup;

/// Generator shared by all RFC 7919 groups.
pub const GENERATOR: u8 = 2;

const FFDHE2048_P: &[u8] = b"\
FFFFFFFFFFFFFFFFADF85458A2BB4A9AAFDC5620273D3CF1\
D8B9C583CE2D3695A9E13641146433FBCC939DCE249B3EF9\
7D2FE363630C75D8F681B202AEC4617AD3DF1ED5D5FD6561\
2433F51F5F066ED0856365553DED1AF3B557135E7F57C935\
984F0C70E0E68B77E2A689DAF3EFE8721DF158A136ADE735\
30ACCA4F483A797ABC0AB182B324FB61D108A94BB2C8E3FB\
B96ADAB760D7F4681D4F42A3DE394DF4AE56EDE76372BB19\
0B07A7C8EE0A6D709E02FCE1CDF7E2ECC03404CD28342F61\
9172FE9CE98583FF8E4F1232EEF28183C3FE3B1B4C6FAD73\
3BB5FCBC2EC22005C58EF1837D1683B2C6F34A26C1B2EFFA\
886B423861285C97FFFFFFFFFFFFFFFF";

/// The prime of a finite field group.
pub fn prime(group: NamedGroup) -> Option<&'static BigUint> {
    static P2048: OnceLock<Option<BigUint>> = OnceLock::new();
    match group {
        NamedGroup::Ffdhe2048 => P2048
            .get_or_init(|| BigUint::parse_bytes(FFDHE2048_P, 16))
            .as_ref(),
        _ => None,
    }
}

/// Size in bytes of the group's public values and shared secrets.
pub fn byte_len(group: NamedGroup) -> Option<usize> {
    prime(group).map(|p| ((p.bits() + 7) / 8) as usize)
}

/// Identify an explicit (p, g) pair as one of the named groups.
pub fn group_for_params(p: &[u8], g: &[u8]) -> Option<NamedGroup> {
    let p = BigUint::from_bytes_be(p);
    let g = BigUint::from_bytes_be(g);
    if g != BigUint::from(GENERATOR) {
        return None;
    }
    [NamedGroup::Ffdhe2048]
        .into_iter()
        .find(|group| prime(*group) == Some(&p))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ffdhe2048_is_2048_bits() {
        assert_eq!(prime(NamedGroup::Ffdhe2048).unwrap().bits(), 2048);
        assert_eq!(byte_len(NamedGroup::Ffdhe2048), Some(256));
    }

    #[test]
    fn maps_explicit_params() {
        let p = prime(NamedGroup::Ffdhe2048).unwrap().to_bytes_be();
        assert_eq!(group_for_params(&p, &[2]), Some(NamedGroup::Ffdhe2048));
        assert_eq!(group_for_params(&p, &[5]), None);
        assert_eq!(group_for_params(&p[1..], &[2]), None);
    }
}
