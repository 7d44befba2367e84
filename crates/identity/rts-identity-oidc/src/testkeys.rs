//! Fixed RSA keypair for signing and verifying tokens in tests.

use jsonwebtoken::jwk::JwkSet;
use jsonwebtoken::{Algorithm, EncodingKey, Header};

pub const TEST_KID: &str = "test-key";

const TEST_RSA_PRIVATE_KEY: &str = include_str!("../testdata/test_rsa_key.pem");

const TEST_RSA_N: &str = "r52svqCexcPP5vzt8g_LYiFuBBcIQPgdA_Zwv5HlnQvc8_pMwrVzAgp5SD2g2ZJYtZTiZ-9Oo5dvoOrnuozt9hr3_VgRKjKXFbJ7e19hmMfQOMskBZiC8wo-1kRSDDa6tlZ-PszvgYov20WayhSD-B2G2tP7IQ9kFHEmy1LC8TWeGG1AVqtYy_6FqScdS9m7Z2uIRUZp3ZqJTTEyq1nT5iDJiyrfbqhgmW1XAz39XhAE7Zm4N_PbboTIyKVLt2DKNzp9yV1eMwyLhFLx87vGHdkDtKJ7-8s_U-t7zHj9qJyT0zRJTjdNHz13Ylda8RSJTlt24r7PlYKUKPZLa0uSrw";

/// JWKS publishing the test key, as a provider would serve it.
pub fn jwks() -> JwkSet {
    serde_json::from_value(jwks_json()).unwrap()
}

pub fn jwks_json() -> serde_json::Value {
    serde_json::json!({
        "keys": [{
            "kty": "RSA",
            "alg": "RS256",
            "use": "sig",
            "kid": TEST_KID,
            "n": TEST_RSA_N,
            "e": "AQAB",
        }]
    })
}

/// Signs an id token over the given claims with the test key.
pub fn mint_id_token(claims: &serde_json::Value) -> String {
    mint_id_token_with_kid(claims, TEST_KID)
}

pub fn mint_id_token_with_kid(claims: &serde_json::Value, kid: &str) -> String {
    let key = EncodingKey::from_rsa_pem(TEST_RSA_PRIVATE_KEY.as_bytes()).unwrap();
    let mut header = Header::new(Algorithm::RS256);
    header.kid = Some(kid.to_string());
    jsonwebtoken::encode(&header, claims, &key).unwrap()
}
