//! Operator password hashing
//!
//! Stored form: `argon2id$<salt>$<hash>`, both parts unpadded standard base64.

use argon2::{Algorithm, Argon2, Params, Version};
use base64::{engine::general_purpose::STANDARD_NO_PAD as BASE64, Engine};
use rand::RngCore;
use subtle::ConstantTimeEq;
use zeroize::Zeroizing;

use super::AuthError;

const SCHEME: &str = "argon2id";
const SALT_LEN: usize = 16;
const HASH_LEN: usize = 32;

/// 19 MiB, 2 passes, 1 lane
fn hasher() -> Result<Argon2<'static>, AuthError> {
    let params = Params::new(19 * 1024, 2, 1, Some(HASH_LEN))
        .map_err(|e| AuthError::Hashing(e.to_string()))?;
    Ok(Argon2::new(Algorithm::Argon2id, Version::V0x13, params))
}

fn derive(password: &str, salt: &[u8]) -> Result<Zeroizing<[u8; HASH_LEN]>, AuthError> {
    let mut out = Zeroizing::new([0u8; HASH_LEN]);
    hasher()?
        .hash_password_into(password.as_bytes(), salt, &mut *out)
        .map_err(|e| AuthError::Hashing(e.to_string()))?;
    Ok(out)
}

/// Hash a password with a fresh random salt
pub fn hash_password(password: &str) -> Result<String, AuthError> {
    let mut salt = [0u8; SALT_LEN];
    rand::rngs::OsRng.fill_bytes(&mut salt);

    let hash = derive(password, &salt)?;
    Ok(format!(
        "{}${}${}",
        SCHEME,
        BASE64.encode(salt),
        BASE64.encode(&*hash)
    ))
}

/// Check `password` against a stored hash in constant time
pub fn verify_password(password: &str, encoded: &str) -> Result<bool, AuthError> {
    let mut parts = encoded.split('$');
    let (Some(SCHEME), Some(salt), Some(expected), None) =
        (parts.next(), parts.next(), parts.next(), parts.next())
    else {
        return Err(AuthError::MalformedHash);
    };

    let salt = BASE64.decode(salt).map_err(|_| AuthError::MalformedHash)?;
    let expected = BASE64.decode(expected).map_err(|_| AuthError::MalformedHash)?;
    if expected.len() != HASH_LEN {
        return Err(AuthError::MalformedHash);
    }

    let actual = derive(password, &salt)?;
    Ok(bool::from(actual.as_slice().ct_eq(&expected)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_and_verify() {
        let encoded = hash_password("correct horse").unwrap();
        assert!(encoded.starts_with("argon2id$"));
        assert!(verify_password("correct horse", &encoded).unwrap());
        assert!(!verify_password("wrong", &encoded).unwrap());
    }

    #[test]
    fn test_salts_differ() {
        let a = hash_password("pw").unwrap();
        let b = hash_password("pw").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_malformed_hash() {
        assert!(matches!(
            verify_password("pw", "$2a$10$bcrypt"),
            Err(AuthError::MalformedHash)
        ));
        assert!(matches!(
            verify_password("pw", "argon2id$only-salt"),
            Err(AuthError::MalformedHash)
        ));
    }
}
