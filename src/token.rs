//! Blob-id tokens for boot file URLs.
//!
//! Blob ids are opaque byte strings chosen by the [`Booter`](crate::booter::Booter)
//! implementation; file-backed booters use filesystem paths. Tokens wrap
//! them in URL-safe base64 so any id can ride in a URL path segment
//! unmolested, and so the id round-trips exactly when the client fetches
//! `/f/{token}`.

use base64::{engine::general_purpose, Engine as _};

use crate::error::Result;

/// Encodes a blob id as a URL-safe token.
pub fn encode(blob_id: &[u8]) -> String {
    general_purpose::URL_SAFE.encode(blob_id)
}

/// Decodes a token back into the blob id it was minted from.
///
/// # Errors
///
/// Returns [`Error::Token`](crate::error::Error::Token) if the token is not
/// valid URL-safe base64. The HTTP layer surfaces this as a 400.
pub fn decode(token: &str) -> Result<Vec<u8>> {
    Ok(general_purpose::URL_SAFE.decode(token)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;

    #[test]
    fn test_roundtrip_path_like_id() {
        let id = b"/srv/images/vmlinuz";
        let token = encode(id);
        assert_eq!(decode(&token).unwrap(), id);
    }

    #[test]
    fn test_roundtrip_empty_id() {
        let token = encode(b"");
        assert_eq!(token, "");
        assert_eq!(decode(&token).unwrap(), Vec::<u8>::new());
    }

    #[test]
    fn test_roundtrip_non_printable_id() {
        let id: Vec<u8> = (0u8..=255).collect();
        let token = encode(&id);
        assert_eq!(decode(&token).unwrap(), id);
    }

    #[test]
    fn test_token_is_url_safe() {
        // 0xfb 0xff forces '+' and '/' in standard base64; URL-safe must
        // use '-' and '_' instead.
        let token = encode(&[0xfb, 0xff, 0xfe]);
        assert!(!token.contains('+'));
        assert!(!token.contains('/'));
    }

    #[test]
    fn test_malformed_token_rejected() {
        let result = decode("not!valid!base64!");
        assert!(matches!(result, Err(Error::Token(_))));
    }
}
