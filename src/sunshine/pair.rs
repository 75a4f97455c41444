//! 5-step pairing handshake
//!
//! Mutual authentication against the host: exchange certificates, prove
//! possession of a PIN-derived AES key, then confirm over HTTPS with the
//! fresh client certificate. AES-128-CBC with a zero IV and PKCS#7 padding
//! is dictated by wire compatibility; the plaintexts are single-use random
//! challenges and hashes.

use aes::cipher::{block_padding::Pkcs7, BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use log::{debug, info};
use rand::rngs::OsRng;
use rand::RngCore;
use rcgen::{
    CertificateParams, DistinguishedName, DnType, ExtendedKeyUsagePurpose, KeyPair,
    KeyUsagePurpose, SerialNumber,
};
use rsa::pkcs8::{DecodePublicKey, EncodePrivateKey, LineEnding};
use rsa::{Pkcs1v15Sign, RsaPrivateKey, RsaPublicKey};
use sha2::{Digest, Sha256};
use x509_parser::pem::parse_x509_pem;
use x509_parser::prelude::*;

use super::client::SunshineClient;
use super::SunshineError;

const SALT_LENGTH: usize = 16;
const CHALLENGE_LENGTH: usize = 16;
const SERVER_SIGNATURE_LENGTH: usize = 256;

type Aes128CbcEnc = cbc::Encryptor<aes::Aes128>;
type Aes128CbcDec = cbc::Decryptor<aes::Aes128>;

/// State for one pairing attempt. Discarded on failure; on success the
/// certificate and key are persisted and the state is dropped.
pub struct PairState {
    pub device_name: String,
    salt: [u8; SALT_LENGTH],

    client_key_pem: String,
    client_cert_pem: String,
    client_cert_der: Vec<u8>,

    aes_key: [u8; 16],
    server_cert_der: Option<Vec<u8>>,
}

impl PairState {
    /// Generate fresh pairing credentials: an RSA-2048 key pair, a
    /// self-signed client-auth certificate valid for 20 years, and a
    /// random salt.
    pub fn generate(device_name: &str) -> Result<Self, SunshineError> {
        let private_key = RsaPrivateKey::new(&mut OsRng, 2048)
            .map_err(|e| SunshineError::CryptoInvalid(format!("generating RSA key: {}", e)))?;
        let key_pem = private_key
            .to_pkcs8_pem(LineEnding::LF)
            .map_err(|e| SunshineError::CryptoInvalid(format!("encoding RSA key: {}", e)))?
            .to_string();

        let key_pair = KeyPair::from_pem(&key_pem)
            .map_err(|e| SunshineError::CryptoInvalid(format!("loading key pair: {}", e)))?;

        let mut params = CertificateParams::new(Vec::<String>::new())
            .map_err(|e| SunshineError::CryptoInvalid(format!("certificate params: {}", e)))?;
        let mut dn = DistinguishedName::new();
        dn.push(DnType::CommonName, device_name);
        params.distinguished_name = dn;
        params.serial_number = Some(SerialNumber::from(vec![1u8]));
        let now = ::time::OffsetDateTime::now_utc();
        params.not_before = now;
        params.not_after = now + ::time::Duration::days(20 * 365);
        params.key_usages = vec![
            KeyUsagePurpose::KeyEncipherment,
            KeyUsagePurpose::DigitalSignature,
        ];
        params.extended_key_usages = vec![ExtendedKeyUsagePurpose::ClientAuth];

        let cert = params
            .self_signed(&key_pair)
            .map_err(|e| SunshineError::CryptoInvalid(format!("creating certificate: {}", e)))?;

        let mut salt = [0u8; SALT_LENGTH];
        OsRng.fill_bytes(&mut salt);

        Ok(Self {
            device_name: device_name.to_string(),
            salt,
            client_key_pem: key_pem,
            client_cert_pem: cert.pem(),
            client_cert_der: cert.der().to_vec(),
            aes_key: [0u8; 16],
            server_cert_der: None,
        })
    }

    /// PEM of the generated client certificate.
    pub fn client_cert_pem(&self) -> &str {
        &self.client_cert_pem
    }

    /// PEM of the generated private key (PKCS#8).
    pub fn client_key_pem(&self) -> &str {
        &self.client_key_pem
    }

    /// `K = SHA-256(salt ‖ PIN-bytes)` truncated to 16 bytes.
    fn derive_key(&mut self, pin: &str) {
        let mut hasher = Sha256::new();
        hasher.update(self.salt);
        hasher.update(pin.as_bytes());
        let digest = hasher.finalize();
        self.aes_key.copy_from_slice(&digest[..16]);
    }

    /// Signature bytes of the self-signed client certificate.
    fn client_signature(&self) -> Result<Vec<u8>, SunshineError> {
        certificate_signature(&self.client_cert_der)
    }
}

impl SunshineClient {
    /// Run the 5-step pairing handshake. Any failure is terminal for
    /// `state`; retrying requires a fresh [`PairState`].
    pub async fn pair(&mut self, pin: &str, state: &mut PairState) -> Result<(), SunshineError> {
        state.derive_key(pin);

        // Step 1: exchange certificates
        let server_cert_pem = self.pair_get_server_cert(state).await?;
        let (_, pem) = parse_x509_pem(server_cert_pem.as_bytes())
            .map_err(|e| SunshineError::Protocol(format!("parsing server cert PEM: {}", e)))?;
        parse_x509_certificate(&pem.contents)
            .map_err(|e| SunshineError::Protocol(format!("parsing server cert: {}", e)))?;
        state.server_cert_der = Some(pem.contents.clone());

        // Step 2: encrypted challenge exchange
        let encrypted_response = self.pair_client_challenge(state).await?;
        let server_response = aes_decrypt(&state.aes_key, &encrypted_response)?;

        // Step 3: answer the server challenge, receive its pairing secret
        let server_secret = self.pair_server_challenge_response(state, &server_response).await?;
        verify_server_pairing_secret(
            &server_secret,
            state.server_cert_der.as_deref().unwrap_or_default(),
            &state.salt,
        )?;

        // Step 4: send our pairing secret
        self.pair_client_pairing_secret(state).await?;

        // Step 5: confirm over HTTPS with the new client certificate
        self.set_client_identity(&state.client_cert_pem.clone(), &state.client_key_pem.clone())?;
        self.pair_challenge(state).await?;

        info!("Paired with host as {:?}", state.device_name);
        Ok(())
    }

    async fn pair_get_server_cert(&self, state: &PairState) -> Result<String, SunshineError> {
        let mut params = self.client_params();
        params.push(("devicename", state.device_name.clone()));
        params.push(("updateState", "1".to_string()));
        params.push(("phrase", "getservercert".to_string()));
        params.push(("salt", hex::encode(state.salt)));
        params.push(("clientcert", hex::encode(state.client_cert_pem.as_bytes())));

        let root = self
            .do_request(self.plain_client(), self.http_url("pair"), &params)
            .await?;

        if !root.is_paired() {
            return Err(SunshineError::PairingRejected(
                "pairing not initiated".to_string(),
            ));
        }

        let cert_bytes = hex::decode(root.plaincert.as_deref().unwrap_or_default())
            .map_err(|e| SunshineError::Protocol(format!("decoding server cert: {}", e)))?;
        String::from_utf8(cert_bytes)
            .map_err(|e| SunshineError::Protocol(format!("server cert is not UTF-8: {}", e)))
    }

    async fn pair_client_challenge(&self, state: &PairState) -> Result<Vec<u8>, SunshineError> {
        let mut challenge = [0u8; CHALLENGE_LENGTH];
        OsRng.fill_bytes(&mut challenge);
        let encrypted = aes_encrypt(&state.aes_key, &challenge);

        let mut params = self.client_params();
        params.push(("devicename", state.device_name.clone()));
        params.push(("updateState", "1".to_string()));
        params.push(("clientchallenge", hex::encode(encrypted)));

        let root = self
            .do_request(self.plain_client(), self.http_url("pair"), &params)
            .await?;

        if !root.is_paired() {
            return Err(SunshineError::PairingRejected(
                "challenge rejected".to_string(),
            ));
        }

        hex::decode(root.challengeresponse.as_deref().unwrap_or_default())
            .map_err(|e| SunshineError::Protocol(format!("decoding challenge response: {}", e)))
    }

    async fn pair_server_challenge_response(
        &self,
        state: &PairState,
        server_response: &[u8],
    ) -> Result<Vec<u8>, SunshineError> {
        let mut hasher = Sha256::new();
        hasher.update(server_response);
        hasher.update(state.client_signature()?);
        let response_hash = hasher.finalize();

        let encrypted = aes_encrypt(&state.aes_key, &response_hash);

        let mut params = self.client_params();
        params.push(("devicename", state.device_name.clone()));
        params.push(("updateState", "1".to_string()));
        params.push(("serverchallengeresp", hex::encode(encrypted)));

        let root = self
            .do_request(self.plain_client(), self.http_url("pair"), &params)
            .await?;

        if !root.is_paired() {
            return Err(SunshineError::PairingRejected(
                "challenge response rejected".to_string(),
            ));
        }

        hex::decode(root.pairingsecret.as_deref().unwrap_or_default())
            .map_err(|e| SunshineError::Protocol(format!("decoding pairing secret: {}", e)))
    }

    async fn pair_client_pairing_secret(&self, state: &PairState) -> Result<(), SunshineError> {
        let signature = state.client_signature()?;
        let mut hasher = Sha256::new();
        hasher.update(state.salt);
        hasher.update(&signature);
        let hash = hasher.finalize();

        let mut secret = signature;
        secret.extend_from_slice(&hash);

        let mut params = self.client_params();
        params.push(("devicename", state.device_name.clone()));
        params.push(("updateState", "1".to_string()));
        params.push(("clientpairingsecret", hex::encode(secret)));

        let root = self
            .do_request(self.plain_client(), self.http_url("pair"), &params)
            .await?;

        if !root.is_paired() {
            return Err(SunshineError::PairingRejected(
                "client pairing secret rejected".to_string(),
            ));
        }

        Ok(())
    }

    async fn pair_challenge(&self, state: &PairState) -> Result<(), SunshineError> {
        let mut params = self.client_params();
        params.push(("devicename", state.device_name.clone()));
        params.push(("updateState", "1".to_string()));
        params.push(("phrase", "pairchallenge".to_string()));

        let root = self
            .do_request(self.tls_client(), self.https_url("pair"), &params)
            .await?;

        if !root.is_paired() {
            return Err(SunshineError::PairingRejected(
                "HTTPS pairing verification failed".to_string(),
            ));
        }

        Ok(())
    }
}

/// AES-128-CBC encrypt with PKCS#7 padding and a zero IV.
pub(crate) fn aes_encrypt(key: &[u8; 16], plaintext: &[u8]) -> Vec<u8> {
    let iv = [0u8; 16];
    Aes128CbcEnc::new(key.into(), &iv.into()).encrypt_padded_vec_mut::<Pkcs7>(plaintext)
}

/// AES-128-CBC decrypt, rejecting truncated ciphertexts and bad padding.
pub(crate) fn aes_decrypt(key: &[u8; 16], ciphertext: &[u8]) -> Result<Vec<u8>, SunshineError> {
    if ciphertext.is_empty() || ciphertext.len() % 16 != 0 {
        return Err(SunshineError::CryptoInvalid(
            "ciphertext is not a multiple of the block size".to_string(),
        ));
    }

    let iv = [0u8; 16];
    Aes128CbcDec::new(key.into(), &iv.into())
        .decrypt_padded_vec_mut::<Pkcs7>(ciphertext)
        .map_err(|_| SunshineError::CryptoInvalid("invalid padding".to_string()))
}

/// Signature bytes of a DER certificate.
fn certificate_signature(der: &[u8]) -> Result<Vec<u8>, SunshineError> {
    let (_, cert) = parse_x509_certificate(der)
        .map_err(|e| SunshineError::Protocol(format!("parsing certificate: {}", e)))?;
    Ok(cert.signature_value.data.to_vec())
}

/// Check the server pairing secret: a 256-byte signature followed by a
/// 32-byte digest which must equal `SHA-256(salt ‖ signature)`. The RSA
/// signature itself is verified against the server certificate when
/// possible; older hosts sign with SHA-1, so that check is advisory.
fn verify_server_pairing_secret(
    secret: &[u8],
    server_cert_der: &[u8],
    salt: &[u8],
) -> Result<(), SunshineError> {
    if secret.len() < SERVER_SIGNATURE_LENGTH + 32 {
        return Err(SunshineError::PairingRejected(
            "server pairing secret too short".to_string(),
        ));
    }

    let signature = &secret[..SERVER_SIGNATURE_LENGTH];
    let server_hash = &secret[SERVER_SIGNATURE_LENGTH..];

    let mut hasher = Sha256::new();
    hasher.update(salt);
    hasher.update(signature);
    let expected = hasher.finalize();

    if server_hash[..32] != expected[..] {
        return Err(SunshineError::PairingRejected(
            "server pairing secret hash mismatch".to_string(),
        ));
    }

    let (_, cert) = parse_x509_certificate(server_cert_der)
        .map_err(|e| SunshineError::Protocol(format!("parsing server cert: {}", e)))?;

    match RsaPublicKey::from_public_key_der(cert.tbs_certificate.subject_pki.raw) {
        Ok(public_key) => {
            let tbs_digest = Sha256::digest(cert.tbs_certificate.as_ref());
            if let Err(e) =
                public_key.verify(Pkcs1v15Sign::new::<Sha256>(), &tbs_digest, signature)
            {
                debug!("server signature not SHA-256 verifiable (older host?): {}", e);
            }
        }
        Err(e) => {
            debug!("server certificate has a non-RSA public key: {}", e);
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const KEY: [u8; 16] = [0x42; 16];

    #[test]
    fn aes_round_trip() {
        for len in [0usize, 1, 15, 16, 17, 64, 1000] {
            let plaintext: Vec<u8> = (0..len).map(|i| i as u8).collect();
            let ciphertext = aes_encrypt(&KEY, &plaintext);
            assert_eq!(ciphertext.len() % 16, 0);
            let decrypted = aes_decrypt(&KEY, &ciphertext).unwrap();
            assert_eq!(decrypted, plaintext);
        }
    }

    #[test]
    fn aes_decrypt_rejects_partial_block() {
        let err = aes_decrypt(&KEY, &[0u8; 17]).unwrap_err();
        assert!(matches!(err, SunshineError::CryptoInvalid(_)));
    }

    #[test]
    fn aes_decrypt_rejects_garbage_padding() {
        // A random block will almost surely not carry valid PKCS#7 padding
        let block = [0x5Au8; 16];
        assert!(aes_decrypt(&KEY, &block).is_err());
    }

    #[test]
    fn key_derivation_truncates_sha256() {
        let mut state = PairState::generate("test-device").unwrap();
        state.derive_key("1234");

        let mut hasher = Sha256::new();
        hasher.update(state.salt);
        hasher.update(b"1234");
        let digest = hasher.finalize();
        assert_eq!(state.aes_key, digest[..16]);
    }

    #[test]
    fn generated_certificate_is_parseable() {
        let state = PairState::generate("test-device").unwrap();
        let (_, cert) = parse_x509_certificate(&state.client_cert_der).unwrap();
        assert_eq!(cert.version(), X509Version::V3);
        assert!(!state.client_signature().unwrap().is_empty());
        assert!(state.client_cert_pem().contains("BEGIN CERTIFICATE"));
        assert!(state.client_key_pem().contains("PRIVATE KEY"));
    }

    #[test]
    fn server_secret_accepted_when_hash_matches() {
        let state = PairState::generate("verifier").unwrap();
        let salt = state.salt;

        // A signature the certificate cannot verify is tolerated as long
        // as the trailing digest matches.
        let signature = [0xC3u8; SERVER_SIGNATURE_LENGTH];
        let mut hasher = Sha256::new();
        hasher.update(salt);
        hasher.update(signature);
        let digest = hasher.finalize();

        let mut secret = signature.to_vec();
        secret.extend_from_slice(&digest);

        verify_server_pairing_secret(&secret, &state.client_cert_der, &salt).unwrap();
    }

    #[test]
    fn server_secret_rejected_on_hash_mismatch() {
        let state = PairState::generate("verifier").unwrap();
        let mut secret = vec![0xC3u8; SERVER_SIGNATURE_LENGTH + 32];
        secret[SERVER_SIGNATURE_LENGTH] ^= 0xFF;

        let err =
            verify_server_pairing_secret(&secret, &state.client_cert_der, &state.salt).unwrap_err();
        assert!(matches!(err, SunshineError::PairingRejected(_)));
    }

    #[test]
    fn server_secret_rejected_when_short() {
        let state = PairState::generate("verifier").unwrap();
        let err = verify_server_pairing_secret(&[0u8; 100], &state.client_cert_der, &state.salt)
            .unwrap_err();
        assert!(matches!(err, SunshineError::PairingRejected(_)));
    }
}
