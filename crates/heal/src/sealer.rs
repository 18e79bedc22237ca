use std::collections::HashMap;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use crypto_box::aead::OsRng;
use crypto_box::SecretKey;
use tracing::{debug, warn};

use outreach_core::paths::Paths;
use outreach_core::{Error, Result};

/// Every sealed value carries this prefix so a record can be told apart from
/// one holding plaintext at a glance.
pub const SEALED_PREFIX: &str = "sealbox_x25519:b64:";

/// Seals and opens checkpoint credentials. `None` signals failure; with
/// secrets present the heal manager treats that as fatal.
pub trait CredentialSealer: Send + Sync {
    fn seal(&self, secrets: &HashMap<String, String>) -> Option<HashMap<String, String>>;
    fn open(&self, sealed: &HashMap<String, String>) -> Option<HashMap<String, String>>;
}

/// X25519 sealed-box sealer with a keypair persisted on disk, generated on
/// first use. The checkpoint writer only needs the public half, but the
/// successor process opens with the same key file, so the secret key is what
/// gets stored.
pub struct SealboxSealer {
    secret_key: SecretKey,
}

impl SealboxSealer {
    pub fn load_or_generate(paths: &Paths) -> Result<Self> {
        let key_file = paths.sealbox_key_file();
        if key_file.exists() {
            let encoded = std::fs::read_to_string(&key_file)?;
            let bytes = BASE64
                .decode(encoded.trim())
                .map_err(|e| Error::Heal(format!("Corrupt sealbox key file: {}", e)))?;
            let bytes: [u8; 32] = bytes
                .try_into()
                .map_err(|_| Error::Heal("Sealbox key has wrong length".to_string()))?;
            return Ok(Self {
                secret_key: SecretKey::from(bytes),
            });
        }

        debug!(path = %key_file.display(), "Generating sealbox keypair");
        let secret_key = SecretKey::generate(&mut OsRng);
        std::fs::create_dir_all(paths.keys_dir())?;
        std::fs::write(&key_file, BASE64.encode(secret_key.to_bytes()))?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&key_file, std::fs::Permissions::from_mode(0o600))?;
        }
        Ok(Self { secret_key })
    }

    fn seal_value(&self, plaintext: &str) -> Option<String> {
        let public_key = self.secret_key.public_key();
        match public_key.seal(&mut OsRng, plaintext.as_bytes()) {
            Ok(ciphertext) => Some(format!("{}{}", SEALED_PREFIX, BASE64.encode(ciphertext))),
            Err(_) => {
                warn!("Sealed-box encryption failed");
                None
            }
        }
    }

    fn open_value(&self, sealed: &str) -> Option<String> {
        let encoded = sealed.strip_prefix(SEALED_PREFIX)?;
        let ciphertext = BASE64.decode(encoded).ok()?;
        let plaintext = self.secret_key.unseal(&ciphertext).ok()?;
        String::from_utf8(plaintext).ok()
    }
}

impl CredentialSealer for SealboxSealer {
    fn seal(&self, secrets: &HashMap<String, String>) -> Option<HashMap<String, String>> {
        let mut sealed = HashMap::with_capacity(secrets.len());
        for (key, value) in secrets {
            sealed.insert(key.clone(), self.seal_value(value)?);
        }
        Some(sealed)
    }

    fn open(&self, sealed: &HashMap<String, String>) -> Option<HashMap<String, String>> {
        let mut opened = HashMap::with_capacity(sealed.len());
        for (key, value) in sealed {
            if value.starts_with(SEALED_PREFIX) {
                opened.insert(key.clone(), self.open_value(value)?);
            } else {
                // Not sealed by us; pass through untouched.
                opened.insert(key.clone(), value.clone());
            }
        }
        Some(opened)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn secrets(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_seal_open_round_trip() {
        let tmp = tempfile::tempdir().unwrap();
        let paths = Paths::with_base(tmp.path().to_path_buf());
        let sealer = SealboxSealer::load_or_generate(&paths).unwrap();

        let plain = secrets(&[("searchPassword", "hunter2"), ("jwtToken", "eyJhbGci")]);
        let sealed = sealer.seal(&plain).unwrap();
        assert!(sealed["searchPassword"].starts_with(SEALED_PREFIX));
        assert!(!sealed["searchPassword"].contains("hunter2"));

        let opened = sealer.open(&sealed).unwrap();
        assert_eq!(opened, plain);
    }

    #[test]
    fn test_key_persists_across_instances() {
        let tmp = tempfile::tempdir().unwrap();
        let paths = Paths::with_base(tmp.path().to_path_buf());

        let writer = SealboxSealer::load_or_generate(&paths).unwrap();
        let sealed = writer.seal(&secrets(&[("jwtToken", "tok-1")])).unwrap();

        // A fresh instance reads the same key file and can open.
        let reader = SealboxSealer::load_or_generate(&paths).unwrap();
        let opened = reader.open(&sealed).unwrap();
        assert_eq!(opened["jwtToken"], "tok-1");
    }

    #[test]
    fn test_open_passes_unsealed_values_through() {
        let tmp = tempfile::tempdir().unwrap();
        let paths = Paths::with_base(tmp.path().to_path_buf());
        let sealer = SealboxSealer::load_or_generate(&paths).unwrap();

        let opened = sealer.open(&secrets(&[("searchName", "alice")])).unwrap();
        assert_eq!(opened["searchName"], "alice");
    }

    #[test]
    fn test_open_rejects_garbage_ciphertext() {
        let tmp = tempfile::tempdir().unwrap();
        let paths = Paths::with_base(tmp.path().to_path_buf());
        let sealer = SealboxSealer::load_or_generate(&paths).unwrap();

        let garbage = secrets(&[("jwtToken", "sealbox_x25519:b64:AAAA")]);
        assert!(sealer.open(&garbage).is_none());
    }
}
