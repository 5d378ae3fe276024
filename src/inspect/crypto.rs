//! Key derivation and AES-CBC helpers for encrypted archive headers.
//!
//! - RAR 3.x/4.x: SHA-1 based KDF, AES-128-CBC.
//! - RAR 5: PBKDF2-HMAC-SHA256, AES-256-CBC.
//! - 7z: iterated SHA-256 ("7zAES"), AES-256-CBC.
//!
//! All three are CPU-bound; callers run inspections on a blocking thread.

use aes::{Aes128, Aes256};
use cbc::cipher::block_padding::NoPadding;
use cbc::cipher::{BlockDecryptMut, KeyIvInit};
use hmac::{Hmac, Mac};
use sha1::Sha1;
use sha2::{Digest, Sha256};

use crate::error::InspectError;

pub(crate) const AES_BLOCK: usize = 16;

const RAR3_HASH_ROUNDS: u32 = 0x40000;

/// Rounds `n` up to a whole number of AES blocks
pub(crate) fn block_align(n: usize) -> usize {
    n.div_ceil(AES_BLOCK) * AES_BLOCK
}

/// UTF-16LE bytes of a password, as RAR 3 and 7z hash them
fn utf16le(password: &str) -> Vec<u8> {
    password.encode_utf16().flat_map(|u| u.to_le_bytes()).collect()
}

/// RAR 3.x key and IV for one 8-byte salt
pub(crate) fn rar3_key(password: &str, salt: &[u8]) -> ([u8; 16], [u8; 16]) {
    let mut raw = utf16le(password);
    raw.extend_from_slice(salt);

    let mut hasher = Sha1::new();
    let mut iv = [0u8; 16];
    for round in 0..RAR3_HASH_ROUNDS {
        hasher.update(&raw);
        hasher.update([round as u8, (round >> 8) as u8, (round >> 16) as u8]);
        if round % (RAR3_HASH_ROUNDS / 16) == 0 {
            let snapshot = hasher.clone().finalize();
            iv[(round / (RAR3_HASH_ROUNDS / 16)) as usize] = snapshot[19];
        }
    }
    let digest = hasher.finalize();

    // digest is read as five big-endian words; the key stores each word little-endian
    let mut key = [0u8; 16];
    for word in 0..4 {
        for byte in 0..4 {
            key[word * 4 + byte] = digest[word * 4 + 3 - byte];
        }
    }
    (key, iv)
}

/// Values a RAR 5 password expands into
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) struct Rar5Keys {
    pub key: [u8; 32],
    pub password_check: [u8; 8],
}

/// RAR 5 KDF: PBKDF2-HMAC-SHA256 with `2^log2_count` rounds for the key,
/// continued for 16 more rounds each for the hash key and the check value.
/// The hash key only matters for file checksums and is not kept.
pub(crate) fn rar5_keys(password: &str, salt: &[u8], log2_count: u8) -> Result<Rar5Keys, InspectError> {
    if log2_count > 24 {
        return Err(InspectError::Unsupported(format!(
            "RAR5 KDF count 2^{} too large",
            log2_count
        )));
    }
    let mac = Hmac::<Sha256>::new_from_slice(password.as_bytes())
        .map_err(|e| InspectError::Decrypt(e.to_string()))?;
    let prf = |data: &[u8]| -> [u8; 32] {
        let mut m = mac.clone();
        m.update(data);
        m.finalize().into_bytes().into()
    };

    let mut first = salt.to_vec();
    first.extend_from_slice(&1u32.to_be_bytes());
    let mut u = prf(&first);
    let mut acc = u;

    let mut stages = [[0u8; 32]; 3];
    let rounds = [(1u32 << log2_count) - 1, 16, 16];
    for (stage, count) in rounds.iter().enumerate() {
        for _ in 0..*count {
            u = prf(&u);
            for (a, b) in acc.iter_mut().zip(u.iter()) {
                *a ^= b;
            }
        }
        stages[stage] = acc;
    }

    let mut password_check = [0u8; 8];
    for (i, byte) in stages[2].iter().enumerate() {
        password_check[i % 8] ^= byte;
    }
    Ok(Rar5Keys {
        key: stages[0],
        password_check,
    })
}

/// First four bytes of SHA-256 over the check value, as stored next to it
pub(crate) fn rar5_check_sum(check: &[u8]) -> [u8; 4] {
    let digest = Sha256::digest(check);
    [digest[0], digest[1], digest[2], digest[3]]
}

/// 7zAES key: SHA-256 over `salt || utf16le(password) || counter` repeated
/// `2^cycles_power` times. Power 0x3F means the key is used raw.
pub(crate) fn sevenzip_key(password: &str, salt: &[u8], cycles_power: u8) -> Result<[u8; 32], InspectError> {
    let pass = utf16le(password);
    if cycles_power == 0x3F {
        let mut key = [0u8; 32];
        for (dst, src) in key.iter_mut().zip(salt.iter().chain(pass.iter())) {
            *dst = *src;
        }
        return Ok(key);
    }
    if cycles_power > 24 {
        return Err(InspectError::Unsupported(format!(
            "7zAES cycle power {} too large",
            cycles_power
        )));
    }
    let mut hasher = Sha256::new();
    for counter in 0..(1u64 << cycles_power) {
        hasher.update(salt);
        hasher.update(&pass);
        hasher.update(counter.to_le_bytes());
    }
    Ok(hasher.finalize().into())
}

/// AES-128-CBC in place, no padding
pub(crate) fn aes128_cbc_decrypt(key: &[u8], iv: &[u8], buf: &mut [u8]) -> Result<(), InspectError> {
    let cipher = cbc::Decryptor::<Aes128>::new_from_slices(key, iv)
        .map_err(|e| InspectError::Decrypt(e.to_string()))?;
    cipher
        .decrypt_padded_mut::<NoPadding>(buf)
        .map_err(|e| InspectError::Decrypt(e.to_string()))?;
    Ok(())
}

/// AES-256-CBC in place, no padding
pub(crate) fn aes256_cbc_decrypt(key: &[u8], iv: &[u8], buf: &mut [u8]) -> Result<(), InspectError> {
    let cipher = cbc::Decryptor::<Aes256>::new_from_slices(key, iv)
        .map_err(|e| InspectError::Decrypt(e.to_string()))?;
    cipher
        .decrypt_padded_mut::<NoPadding>(buf)
        .map_err(|e| InspectError::Decrypt(e.to_string()))?;
    Ok(())
}
