//! PEM certificate inspection.

use chrono::{DateTime, Utc};

use crate::error::{RouteError, RouteResult};

/// Not-after time of the leaf certificate in a PEM-encoded chain.
///
/// The leaf is the first certificate block in the chain. Any parse failure
/// is a [`RouteError::MalformedCertificate`], which is fatal for the
/// transition that needed the expiry.
pub fn expiration_of(pem_bytes: &[u8]) -> RouteResult<DateTime<Utc>> {
    let blocks = pem::parse_many(pem_bytes)
        .map_err(|e| RouteError::MalformedCertificate(format!("invalid PEM: {e}")))?;

    let leaf = blocks
        .first()
        .ok_or_else(|| RouteError::MalformedCertificate("no PEM blocks found".to_owned()))?;

    let (_, cert) = x509_parser::parse_x509_certificate(leaf.contents())
        .map_err(|e| RouteError::MalformedCertificate(format!("invalid X509 certificate: {e}")))?;

    let not_after = cert.validity().not_after.to_datetime();

    DateTime::<Utc>::from_timestamp(not_after.unix_timestamp(), 0).ok_or_else(|| {
        RouteError::MalformedCertificate(format!(
            "not-after out of range: {}",
            cert.validity().not_after
        ))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn self_signed_pem(not_after: DateTime<Utc>) -> Vec<u8> {
        let mut params = rcgen::CertificateParams::new(vec!["a.example.com".to_owned()])
            .expect("params failed");
        params.not_after = time::OffsetDateTime::from_unix_timestamp(not_after.timestamp())
            .expect("timestamp out of range");

        let key_pair = rcgen::KeyPair::generate().expect("keygen failed");
        let cert = params.self_signed(&key_pair).expect("self-sign failed");
        cert.pem().into_bytes()
    }

    #[test]
    fn parses_not_after_from_leaf() {
        let expires = Utc::now() + chrono::Duration::days(90);
        let pem = self_signed_pem(expires);

        let parsed = expiration_of(&pem).expect("expiration_of failed");
        assert_eq!(parsed.timestamp(), expires.timestamp());
    }

    #[test]
    fn rejects_garbage_input() {
        assert!(matches!(
            expiration_of(b"not a certificate"),
            Err(RouteError::MalformedCertificate(_))
        ));
    }

    #[test]
    fn rejects_pem_that_is_not_a_certificate() {
        let pem = pem::encode(&pem::Pem::new("CERTIFICATE", b"garbage".to_vec()));
        assert!(matches!(
            expiration_of(pem.as_bytes()),
            Err(RouteError::MalformedCertificate(_))
        ));
    }

    #[test]
    fn rejects_empty_input() {
        assert!(matches!(
            expiration_of(b""),
            Err(RouteError::MalformedCertificate(_))
        ));
    }
}
