//! Transport configuration constants.
//!
//! Network devices frequently run old SSH stacks, so the algorithm
//! preference tables lean toward compatibility: modern algorithms first,
//! legacy Diffie-Hellman, CBC ciphers and SHA-1 MACs kept as fallbacks.
//! Timeouts and cache sizing for the session layer live here as well.

use std::time::Duration;

use russh::keys::{Algorithm, EcdsaCurve, HashAlg};
use russh::{cipher, compression, kex, mac};

/// TCP + SSH handshake deadline for a new device connection.
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(25);

/// Deadline for a single command round-trip on an established shell.
pub const COMMAND_TIMEOUT: Duration = Duration::from_secs(60);

/// Deadline for the lightweight prompt liveness check.
pub const LIVENESS_TIMEOUT: Duration = Duration::from_secs(10);

/// Time-to-live for cached command results on a session.
pub const COMMAND_CACHE_TTL: Duration = Duration::from_secs(360);

/// Maximum number of cached command results per session.
pub const COMMAND_CACHE_CAPACITY: u64 = 100;

/// Key exchange algorithms in order of preference.
pub const KEX_ORDER: &[kex::Name] = &[
    kex::CURVE25519,
    kex::CURVE25519_PRE_RFC_8731,
    kex::DH_GEX_SHA256,
    kex::DH_G14_SHA256,
    kex::DH_GEX_SHA1,
    kex::DH_G14_SHA1,
    kex::DH_G1_SHA1,
    kex::ECDH_SHA2_NISTP256,
    kex::ECDH_SHA2_NISTP384,
    kex::ECDH_SHA2_NISTP521,
];

/// Cipher algorithms, modern first with CBC fallbacks for legacy devices.
pub const CIPHERS: &[cipher::Name] = &[
    cipher::CHACHA20_POLY1305,
    cipher::AES_256_GCM,
    cipher::AES_256_CTR,
    cipher::AES_192_CTR,
    cipher::AES_128_CTR,
    cipher::AES_256_CBC,
    cipher::AES_192_CBC,
    cipher::AES_128_CBC,
];

/// MAC algorithms, ETM variants preferred.
pub const MAC_ALGORITHMS: &[mac::Name] = &[
    mac::HMAC_SHA256_ETM,
    mac::HMAC_SHA512_ETM,
    mac::HMAC_SHA256,
    mac::HMAC_SHA512,
    mac::HMAC_SHA1_ETM,
    mac::HMAC_SHA1,
];

/// Compression algorithms.
pub const COMPRESSION_ALGORITHMS: &[compression::Name] = &[
    compression::NONE,
    compression::ZLIB,
    compression::ZLIB_LEGACY,
];

/// Host key algorithms, including legacy RSA/DSA for old device firmware.
pub const KEY_TYPES: &[Algorithm] = &[
    Algorithm::Ed25519,
    Algorithm::Ecdsa {
        curve: EcdsaCurve::NistP256,
    },
    Algorithm::Ecdsa {
        curve: EcdsaCurve::NistP384,
    },
    Algorithm::Ecdsa {
        curve: EcdsaCurve::NistP521,
    },
    Algorithm::Rsa {
        hash: Some(HashAlg::Sha512),
    },
    Algorithm::Rsa {
        hash: Some(HashAlg::Sha256),
    },
    Algorithm::Rsa { hash: None },
    Algorithm::Dsa,
];
