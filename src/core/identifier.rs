use std::fmt;

use ethereum_types::{H160, U256};
use serde::{Deserialize, Serialize};
use sha1::{Digest, Sha1};

/// Width of the identifier space in bits. Identifiers live on the ring
/// modulo 2^M; every peer must agree on this value and on the hash function.
pub const M: usize = 160;

/// A point on the identifier ring, derived by hashing an address or a key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Identifier(pub H160);

impl Identifier {
    pub fn from_hashed<S: AsRef<[u8]> + ?Sized>(input: &S) -> Self {
        let mut hasher = Sha1::new();
        hasher.update(input.as_ref());
        let digest = hasher.finalize();
        Self(H160::from_slice(&digest))
    }

    /// Build an identifier from a small integer. Scenario tests pin ring
    /// positions with this; production identifiers come from `from_hashed`.
    pub fn from_low_u64(value: u64) -> Self {
        Self(H160::from_low_u64_be(value))
    }

    /// Return a short, human-friendly hex for logging, like ab12cd34…ef90a1b2
    pub fn short_hex(&self) -> String {
        let b = self.0.to_fixed_bytes();
        format!(
            "{:02x}{:02x}{:02x}{:02x}…{:02x}{:02x}{:02x}{:02x}",
            b[0], b[1], b[2], b[3], b[16], b[17], b[18], b[19]
        )
    }

    fn to_u256(self) -> U256 {
        U256::from_big_endian(self.0.as_bytes())
    }

    fn from_u256_truncated(value: U256) -> Self {
        // The low 20 bytes of the big-endian form are exactly `value mod 2^M`.
        let bytes: [u8; 32] = value.to_big_endian();
        Self(H160::from_slice(&bytes[12..]))
    }
}

impl fmt::Display for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.short_hex())
    }
}

/// Ring-interval membership: does `x` lie strictly after `a` and before `b`
/// going clockwise? With `inclusive_right`, landing exactly on `b` counts.
///
/// When `a == b` the interval covers the whole ring minus `{a}` (and `b`
/// itself when inclusive). Every routing and maintenance decision in the
/// protocol reduces to this predicate, so raw `<`/`>` on identifiers must
/// never be used outside of it.
pub fn in_between(a: Identifier, x: Identifier, b: Identifier, inclusive_right: bool) -> bool {
    if a < b {
        a < x && (x < b || (inclusive_right && x == b))
    } else {
        // wrapped interval; a == b degenerates to "anywhere but a"
        x > a || x < b || (inclusive_right && x == b)
    }
}

/// `(id + 2^k) mod 2^M`.
pub fn offset(id: Identifier, k: u32) -> Identifier {
    debug_assert!((k as usize) < M);
    Identifier::from_u256_truncated(id.to_u256() + (U256::one() << k))
}

/// Target identifier of finger-table row `row` (1-indexed): `id + 2^(row-1)`.
pub fn finger_target(id: Identifier, row: usize) -> Identifier {
    debug_assert!(row >= 1 && row <= M);
    offset(id, (row - 1) as u32)
}

/// Clockwise distance from `a` to `b`: `(b - a) mod 2^M`.
pub fn ring_distance(a: Identifier, b: Identifier) -> U256 {
    let wrapped = b.to_u256() + (U256::one() << M) - a.to_u256();
    Identifier::from_u256_truncated(wrapped).to_u256()
}

/// A transport endpoint in `host:port` form. Hashing the address string
/// yields the node's identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NodeAddress(String);

impl NodeAddress {
    pub fn new(host: &str, port: u16) -> Self {
        Self(format!("{host}:{port}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn id(&self) -> Identifier {
        Identifier::from_hashed(&self.0)
    }
}

impl From<String> for NodeAddress {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for NodeAddress {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

impl fmt::Display for NodeAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// An address paired with its ring identifier.
///
/// Identifiers always travel together with addresses on the wire, so a node
/// whose identifier was seeded from an override string is still addressed
/// correctly by its peers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Peer {
    pub addr: NodeAddress,
    pub id: Identifier,
}

impl Peer {
    pub fn from_address(addr: NodeAddress) -> Self {
        let id = addr.id();
        Self { addr, id }
    }

    pub fn with_id(addr: NodeAddress, id: Identifier) -> Self {
        Self { addr, id }
    }
}

impl fmt::Display for Peer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.addr, self.id.short_hex())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn id(v: u64) -> Identifier {
        Identifier::from_low_u64(v)
    }

    #[test]
    fn hashing_is_deterministic() {
        let a = NodeAddress::new("127.0.0.1", 4000);
        assert_eq!(a.id(), a.id());
        assert_eq!(
            Identifier::from_hashed("photo.jpg"),
            Identifier::from_hashed("photo.jpg")
        );
        assert_ne!(
            Identifier::from_hashed("photo.jpg"),
            Identifier::from_hashed("photo.png")
        );
    }

    #[test]
    fn in_between_plain_interval() {
        assert!(in_between(id(10), id(20), id(30), false));
        assert!(!in_between(id(10), id(10), id(30), false));
        assert!(!in_between(id(10), id(30), id(30), false));
        assert!(in_between(id(10), id(30), id(30), true));
        assert!(!in_between(id(10), id(31), id(30), true));
    }

    #[test]
    fn in_between_wrapped_interval() {
        // (40, 10] going clockwise passes through zero
        assert!(in_between(id(40), id(50), id(10), false));
        assert!(in_between(id(40), id(5), id(10), false));
        assert!(!in_between(id(40), id(20), id(10), false));
        assert!(!in_between(id(40), id(10), id(10), false));
        assert!(in_between(id(40), id(10), id(10), true));
    }

    #[test]
    fn in_between_degenerate_interval_is_whole_ring_minus_a() {
        assert!(in_between(id(7), id(8), id(7), false));
        assert!(in_between(id(7), id(0), id(7), false));
        assert!(!in_between(id(7), id(7), id(7), false));
        assert!(in_between(id(7), id(7), id(7), true));
    }

    #[test]
    fn in_between_matches_clockwise_walk() {
        // x in (a, b] iff walking clockwise from a reaches x no later than b
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..500 {
            let a = id(rng.random::<u64>());
            let x = id(rng.random::<u64>());
            let b = id(rng.random::<u64>());
            let by_walk = ring_distance(a, x) <= ring_distance(a, b)
                && ring_distance(a, x) > U256::zero();
            assert_eq!(in_between(a, x, b, true), by_walk, "a={a} x={x} b={b}");
        }
    }

    #[test]
    fn offset_wraps_around_the_ring() {
        let top = offset(id(0), (M - 1) as u32);
        // adding 2^(M-1) twice returns to the start
        assert_eq!(offset(top, (M - 1) as u32), id(0));
        assert_eq!(offset(id(3), 2), id(7));
    }

    #[test]
    fn finger_targets_grow_exponentially() {
        let n = id(10);
        assert_eq!(finger_target(n, 1), id(11));
        assert_eq!(finger_target(n, 2), id(12));
        assert_eq!(finger_target(n, 3), id(14));
        assert_eq!(finger_target(n, 6), id(42));
    }

    #[test]
    fn ring_distance_is_directional() {
        assert_eq!(ring_distance(id(10), id(40)), U256::from(30));
        // the long way back around
        assert_eq!(
            ring_distance(id(40), id(10)),
            (U256::one() << M) - U256::from(30)
        );
        assert_eq!(ring_distance(id(5), id(5)), U256::zero());
    }
}
