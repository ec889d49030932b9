use ipnet::Ipv4Net;
use rand::Rng;
use std::net::Ipv4Addr;

/// Non-routable and reserved IPv4 blocks that are never probed.
const EXCLUDED_BLOCKS: [(Ipv4Addr, u8); 8] = [
    (Ipv4Addr::new(0, 0, 0, 0), 8),
    (Ipv4Addr::new(10, 0, 0, 0), 8),
    (Ipv4Addr::new(127, 0, 0, 0), 8),
    (Ipv4Addr::new(169, 254, 0, 0), 16),
    (Ipv4Addr::new(172, 16, 0, 0), 12),
    (Ipv4Addr::new(192, 168, 0, 0), 16),
    (Ipv4Addr::new(224, 0, 0, 0), 4),
    (Ipv4Addr::new(240, 0, 0, 0), 4),
];

/// First octets rejected before the CIDR check. Only a shortcut; the
/// exclusion table alone decides validity.
const SKIPPED_FIRST_OCTETS: [u8; 5] = [10, 127, 169, 172, 192];

/// Ordered set of excluded CIDR blocks.
#[derive(Debug, Clone)]
pub struct ExclusionTable {
    blocks: Vec<Ipv4Net>,
}

impl Default for ExclusionTable {
    fn default() -> Self {
        let blocks = EXCLUDED_BLOCKS
            .iter()
            .map(|&(addr, prefix)| Ipv4Net::new(addr, prefix).expect("static prefix is valid"))
            .collect();
        Self { blocks }
    }
}

impl ExclusionTable {
    pub fn blocks(&self) -> &[Ipv4Net] {
        &self.blocks
    }

    /// True when `ip` falls inside any excluded block.
    pub fn is_excluded(&self, ip: Ipv4Addr) -> bool {
        self.blocks.iter().any(|net| net.contains(&ip))
    }
}

/// Draws uniformly random public IPv4 addresses.
#[derive(Debug, Clone, Default)]
pub struct AddressGenerator {
    exclusions: ExclusionTable,
}

impl AddressGenerator {
    /// Next candidate address from the thread-local RNG.
    pub fn next(&self) -> Ipv4Addr {
        self.next_with(&mut rand::thread_rng())
    }

    /// Next candidate address from `rng`. Retries until the address clears
    /// the exclusion table; the last octet is always in 1..=254.
    pub fn next_with<R: Rng>(&self, rng: &mut R) -> Ipv4Addr {
        loop {
            let first: u8 = rng.gen_range(1..=223);
            if SKIPPED_FIRST_OCTETS.contains(&first) {
                continue;
            }
            let ip = Ipv4Addr::new(
                first,
                rng.gen(),
                rng.gen(),
                rng.gen_range(1..=254),
            );
            if !self.exclusions.is_excluded(ip) {
                return ip;
            }
        }
    }
}
