use crate::errors::{ErrorKind, JotError, JotResult};
use once_cell::sync::Lazy;
use rand::RngCore;
use std::fmt::{Debug, Display, Formatter};
use std::str::FromStr;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

/// Number of bytes in an object identifier.
pub const OID_LENGTH: usize = 12;

static OID_GENERATOR: Lazy<OidGenerator> = Lazy::new(OidGenerator::new);

/// A 12-byte object identifier, unique within a database instance and
/// roughly ordered by creation time.
///
/// Layout:
/// - bytes 0..4: big-endian Unix timestamp in seconds
/// - bytes 4..9: process discriminator, randomly chosen once per process
/// - bytes 9..12: big-endian wrapping counter, randomly seeded
///
/// Because the discriminator is fixed for the life of the process and the
/// counter only grows, byte-lexicographic comparison of identifiers
/// generated by one process is non-decreasing in generation order. An OID
/// is assigned by the record store on insert, never changes across
/// updates, and is never reused after deletion.
#[derive(PartialEq, Eq, PartialOrd, Ord, Hash, Clone, Copy, serde::Deserialize, serde::Serialize)]
pub struct Oid {
    bytes: [u8; OID_LENGTH],
}

impl Oid {
    /// Generates a fresh identifier from the process-wide generator.
    pub fn generate() -> Self {
        OID_GENERATOR.next_oid()
    }

    /// Builds an identifier from its raw 12-byte form.
    pub fn from_bytes(bytes: &[u8]) -> JotResult<Oid> {
        if bytes.len() != OID_LENGTH {
            log::error!("Invalid oid length {}", bytes.len());
            return Err(JotError::new(
                &format!("Object id must be {} bytes, got {}", OID_LENGTH, bytes.len()),
                ErrorKind::InvalidOid,
            ));
        }
        let mut raw = [0u8; OID_LENGTH];
        raw.copy_from_slice(bytes);
        Ok(Oid { bytes: raw })
    }

    /// Raw 12-byte form of this identifier.
    pub fn as_bytes(&self) -> &[u8; OID_LENGTH] {
        &self.bytes
    }

    /// Creation timestamp component, Unix seconds.
    pub fn timestamp(&self) -> u32 {
        u32::from_be_bytes([self.bytes[0], self.bytes[1], self.bytes[2], self.bytes[3]])
    }

    /// Counter component.
    pub fn counter(&self) -> u32 {
        u32::from_be_bytes([0, self.bytes[9], self.bytes[10], self.bytes[11]])
    }

    /// Hexadecimal rendering, 24 lowercase characters.
    pub fn to_hex(&self) -> String {
        let mut out = String::with_capacity(OID_LENGTH * 2);
        for byte in &self.bytes {
            out.push_str(&format!("{:02x}", byte));
        }
        out
    }
}

impl Display for Oid {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl Debug for Oid {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "Oid({})", self.to_hex())
    }
}

impl FromStr for Oid {
    type Err = JotError;

    fn from_str(s: &str) -> JotResult<Oid> {
        if s.len() != OID_LENGTH * 2 {
            log::error!("Invalid oid literal {}", s);
            return Err(JotError::new(
                &format!("Object id literal must be {} hex characters", OID_LENGTH * 2),
                ErrorKind::InvalidOid,
            ));
        }
        let mut bytes = [0u8; OID_LENGTH];
        for (i, chunk) in s.as_bytes().chunks(2).enumerate() {
            let pair = std::str::from_utf8(chunk).map_err(|_| {
                JotError::new("Object id literal is not valid hex", ErrorKind::InvalidOid)
            })?;
            bytes[i] = u8::from_str_radix(pair, 16).map_err(|_| {
                JotError::new("Object id literal is not valid hex", ErrorKind::InvalidOid)
            })?;
        }
        Ok(Oid { bytes })
    }
}

/// Process-wide identifier generator.
///
/// The discriminator makes identifiers from different processes disjoint;
/// the counter keeps identifiers generated within one second ordered.
struct OidGenerator {
    discriminator: [u8; 5],
    counter: AtomicU32,
}

impl OidGenerator {
    fn new() -> Self {
        let mut rng = rand::thread_rng();
        let mut discriminator = [0u8; 5];
        rng.fill_bytes(&mut discriminator);
        OidGenerator {
            discriminator,
            counter: AtomicU32::new(rng.next_u32() & 0x00ff_ffff),
        }
    }

    fn next_oid(&self) -> Oid {
        let seconds = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs() as u32)
            .unwrap_or(0);
        let count = self.counter.fetch_add(1, Ordering::SeqCst) & 0x00ff_ffff;

        let mut bytes = [0u8; OID_LENGTH];
        bytes[0..4].copy_from_slice(&seconds.to_be_bytes());
        bytes[4..9].copy_from_slice(&self.discriminator);
        bytes[9..12].copy_from_slice(&count.to_be_bytes()[1..4]);
        Oid { bytes }
    }
}
