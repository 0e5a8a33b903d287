//! AWS Signature Version 4 signing for the Polly `POST /v1/speech` request.
//!
//! Hand-rolled rather than pulled from a signing crate — the canonical
//! request here is fixed (single route, single header set), so the whole
//! chain is a handful of HMAC-SHA256 calls over `sha2`/`hmac`.

use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};

const REGION: &str = "eu-west-1";
const SERVICE: &str = "polly";

type HmacSha256 = Hmac<Sha256>;

pub struct SignedRequest {
    pub amz_date: String,
    pub authorization: String,
}

/// Signs a POST to `host` + `path` with the given JSON body, using the
/// supplied access key / secret key and the current timestamp (caller
/// supplies `now` as `YYYYMMDDTHHMMSSZ` so the module stays free of
/// wall-clock calls).
pub fn sign_polly_request(host: &str, access_key: &str, secret_key: &str, body: &[u8], amz_date: &str) -> SignedRequest {
    let date_stamp = &amz_date[0..8];
    let credential_scope = format!("{date_stamp}/{REGION}/{SERVICE}/aws4_request");

    let canonical_request = canonical_request(host, body, amz_date);
    let request_hash = hex_sha256(canonical_request.as_bytes());

    let string_to_sign = format!("AWS4-HMAC-SHA256\n{amz_date}\n{credential_scope}\n{request_hash}");

    let signing_key = derive_signing_key(secret_key, date_stamp);
    let signature = hex_hmac(&signing_key, string_to_sign.as_bytes());

    let authorization = format!(
        "AWS4-HMAC-SHA256 Credential={access_key}/{credential_scope}, \
         SignedHeaders=content-type;host;x-amz-date, Signature={signature}"
    );

    SignedRequest { amz_date: amz_date.to_string(), authorization }
}

fn canonical_request(host: &str, body: &[u8], amz_date: &str) -> String {
    let payload_hash = hex_sha256(body);
    format!(
        "POST\n/v1/speech\n\ncontent-type:application/json\nhost:{host}\nx-amz-date:{amz_date}\n\n\
         content-type;host;x-amz-date\n{payload_hash}"
    )
}

fn derive_signing_key(secret_key: &str, date_stamp: &str) -> Vec<u8> {
    let k_date = hmac_bytes(format!("AWS4{secret_key}").as_bytes(), date_stamp.as_bytes());
    let k_region = hmac_bytes(&k_date, REGION.as_bytes());
    let k_service = hmac_bytes(&k_region, SERVICE.as_bytes());
    hmac_bytes(&k_service, b"aws4_request")
}

fn hmac_bytes(key: &[u8], data: &[u8]) -> Vec<u8> {
    let mut mac = HmacSha256::new_from_slice(key).expect("HMAC accepts keys of any length");
    mac.update(data);
    mac.finalize().into_bytes().to_vec()
}

fn hex_hmac(key: &[u8], data: &[u8]) -> String {
    hex_encode(&hmac_bytes(key, data))
}

fn hex_sha256(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex_encode(&hasher.finalize())
}

fn hex_encode(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}
