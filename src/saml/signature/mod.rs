//! XML signature verification of IdP responses.
//!
//! Enveloped XML-DSig signatures are checked against the IdP certificate
//! from `saml.idp_certificate`. Only the two elements the rest of the
//! pipeline reads from are accepted as signed: the `Response` root and its
//! first `Assertion`. Every signature found on either must verify, and at
//! least one of them must be present. The reference of each signature must
//! point at the element that carries it, and `ID` values must be unique in
//! the document, so a signed element cannot be swapped for a forged one.
//!
//! `KeyInfo` is ignored; keys come only from configuration.

pub mod c14n;

use base64::{Engine, engine::general_purpose::STANDARD};
use openssl::{
    bn::BigNum,
    ecdsa::EcdsaSig,
    error::ErrorStack,
    hash::{MessageDigest, hash},
    memcmp,
    pkey::{PKey, Public},
    sign::Verifier,
    x509::X509,
};
use roxmltree::{Document, Node};
use thiserror::Error;

use self::c14n::{Canonicalizer, EXC_C14N};
use super::{
    schema::{ASSERTION_NS, SamlResponse},
    validator::SignatureVerifier,
};

pub const DSIG_NS: &str = "http://www.w3.org/2000/09/xmldsig#";
pub const ENVELOPED_SIGNATURE: &str = "http://www.w3.org/2000/09/xmldsig#enveloped-signature";

pub const RSA_SHA1: &str = "http://www.w3.org/2000/09/xmldsig#rsa-sha1";
pub const RSA_SHA256: &str = "http://www.w3.org/2001/04/xmldsig-more#rsa-sha256";
pub const RSA_SHA512: &str = "http://www.w3.org/2001/04/xmldsig-more#rsa-sha512";
pub const ECDSA_SHA256: &str = "http://www.w3.org/2001/04/xmldsig-more#ecdsa-sha256";
pub const ECDSA_SHA512: &str = "http://www.w3.org/2001/04/xmldsig-more#ecdsa-sha512";

pub const DIGEST_SHA1: &str = "http://www.w3.org/2000/09/xmldsig#sha1";
pub const DIGEST_SHA256: &str = "http://www.w3.org/2001/04/xmlenc#sha256";
pub const DIGEST_SHA512: &str = "http://www.w3.org/2001/04/xmlenc#sha512";

#[derive(Debug, Error)]
pub enum SignatureError {
    #[error("no IdP certificate configured")]
    MissingCertificate,

    #[error("invalid IdP certificate: {0}")]
    Certificate(String),

    #[error("response is not signed")]
    Unsigned,

    #[error("no signature covers the response or its first assertion")]
    Uncovered,

    #[error("signature reference '{0}' does not point at the signed element")]
    WrongReference(String),

    #[error("duplicate ID '{0}' in response")]
    DuplicateId(String),

    #[error("malformed signature: {0}")]
    Malformed(String),

    #[error("unsupported algorithm: {0}")]
    UnsupportedAlgorithm(String),

    #[error("digest of the signed element does not match")]
    DigestMismatch,

    #[error("signature value does not verify against the IdP certificate")]
    BadSignature,

    #[error("XML parse error: {0}")]
    Xml(#[from] roxmltree::Error),

    #[error("crypto error: {0}")]
    Crypto(#[from] ErrorStack),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SignatureAlgorithm {
    Rsa(DigestAlgorithm),
    Ecdsa(DigestAlgorithm),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DigestAlgorithm {
    Sha1,
    Sha256,
    Sha512,
}

impl DigestAlgorithm {
    fn from_uri(uri: &str) -> Result<Self, SignatureError> {
        match uri {
            DIGEST_SHA1 => Ok(Self::Sha1),
            DIGEST_SHA256 => Ok(Self::Sha256),
            DIGEST_SHA512 => Ok(Self::Sha512),
            other => Err(SignatureError::UnsupportedAlgorithm(other.to_string())),
        }
    }

    fn message_digest(self) -> MessageDigest {
        match self {
            Self::Sha1 => MessageDigest::sha1(),
            Self::Sha256 => MessageDigest::sha256(),
            Self::Sha512 => MessageDigest::sha512(),
        }
    }
}

impl SignatureAlgorithm {
    fn from_uri(uri: &str) -> Result<Self, SignatureError> {
        match uri {
            RSA_SHA1 => Ok(Self::Rsa(DigestAlgorithm::Sha1)),
            RSA_SHA256 => Ok(Self::Rsa(DigestAlgorithm::Sha256)),
            RSA_SHA512 => Ok(Self::Rsa(DigestAlgorithm::Sha512)),
            ECDSA_SHA256 => Ok(Self::Ecdsa(DigestAlgorithm::Sha256)),
            ECDSA_SHA512 => Ok(Self::Ecdsa(DigestAlgorithm::Sha512)),
            other => Err(SignatureError::UnsupportedAlgorithm(other.to_string())),
        }
    }
}

/// [`SignatureVerifier`] backed by OpenSSL and the configured IdP certificates.
#[derive(Debug)]
pub struct XmlDsigVerifier {
    keys: Vec<PKey<Public>>,
}

impl XmlDsigVerifier {
    /// Load one or more PEM certificates, or a single base64 DER certificate
    /// as found in IdP metadata.
    pub fn from_certificate(certificate: &str) -> Result<Self, SignatureError> {
        let certificate = certificate.trim();
        if certificate.is_empty() {
            return Err(SignatureError::MissingCertificate);
        }

        let certificates = if certificate.contains("-----BEGIN") {
            X509::stack_from_pem(certificate.as_bytes())
                .map_err(|e| SignatureError::Certificate(e.to_string()))?
        } else {
            let der = STANDARD
                .decode(strip_whitespace(certificate))
                .map_err(|e| SignatureError::Certificate(e.to_string()))?;
            vec![X509::from_der(&der).map_err(|e| SignatureError::Certificate(e.to_string()))?]
        };
        if certificates.is_empty() {
            return Err(SignatureError::Certificate(
                "no certificate found in PEM input".to_string(),
            ));
        }

        let keys = certificates
            .iter()
            .map(|cert| cert.public_key())
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| SignatureError::Certificate(e.to_string()))?;
        tracing::debug!(certificates = keys.len(), "Loaded IdP signing certificates");

        Ok(Self { keys })
    }

    /// Verify the signatures of a response document.
    pub fn verify_document(&self, xml: &str) -> Result<(), SignatureError> {
        let document = Document::parse(xml)?;
        check_unique_ids(&document)?;

        let root = document.root_element();
        let first_assertion = child(root, ASSERTION_NS, "Assertion");

        let mut verified = 0;
        for target in std::iter::once(root).chain(first_assertion) {
            if let Some(signature) = child(target, DSIG_NS, "Signature") {
                self.verify_signature(target, signature)?;
                verified += 1;
            }
        }

        if verified > 0 {
            return Ok(());
        }
        if document.descendants().any(|n| {
            n.tag_name().namespace() == Some(DSIG_NS) && n.tag_name().name() == "Signature"
        }) {
            return Err(SignatureError::Uncovered);
        }
        Err(SignatureError::Unsigned)
    }

    fn verify_signature(
        &self,
        target: Node<'_, '_>,
        signature: Node<'_, '_>,
    ) -> Result<(), SignatureError> {
        let signed_info = required_child(signature, "SignedInfo")?;
        let canonicalization = required_child(signed_info, "CanonicalizationMethod")?;
        let algorithm = SignatureAlgorithm::from_uri(algorithm_of(
            required_child(signed_info, "SignatureMethod")?,
        )?)?;

        let mut references = children(signed_info, DSIG_NS, "Reference");
        let reference = references
            .next()
            .ok_or_else(|| SignatureError::Malformed("missing Reference".to_string()))?;
        if references.next().is_some() {
            return Err(SignatureError::Malformed(
                "more than one Reference".to_string(),
            ));
        }

        check_reference_uri(target, reference.attribute("URI").unwrap_or(""))?;

        let transformed = transform(target, signature, reference)?;
        let digest_algorithm =
            DigestAlgorithm::from_uri(algorithm_of(required_child(reference, "DigestMethod")?)?)?;
        let expected_digest = base64_text(required_child(reference, "DigestValue")?)?;
        let actual_digest = hash(digest_algorithm.message_digest(), transformed.as_bytes())?;
        if expected_digest.len() != actual_digest.len()
            || !memcmp::eq(&expected_digest, &actual_digest)
        {
            return Err(SignatureError::DigestMismatch);
        }

        let canonical_signed_info = canonicalizer_for(canonicalization)?.canonicalize(signed_info)?;
        let signature_value = base64_text(required_child(signature, "SignatureValue")?)?;
        let signed_bytes = canonical_signed_info.as_bytes();
        if self
            .keys
            .iter()
            .any(|key| verify_with(key, algorithm, signed_bytes, &signature_value))
        {
            tracing::debug!(
                element = target.tag_name().name(),
                "XML signature verified"
            );
            Ok(())
        } else {
            Err(SignatureError::BadSignature)
        }
    }
}

impl SignatureVerifier for XmlDsigVerifier {
    fn verify(&self, response: &SamlResponse) -> Result<(), String> {
        self.verify_document(&response.source)
            .map_err(|e| e.to_string())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// References and transforms
// ─────────────────────────────────────────────────────────────────────────────

fn check_reference_uri(target: Node<'_, '_>, uri: &str) -> Result<(), SignatureError> {
    let points_at_target = match uri.strip_prefix('#') {
        Some(id) => target.attribute("ID") == Some(id),
        None => uri.is_empty() && target.parent_element().is_none(),
    };
    if points_at_target {
        Ok(())
    } else {
        Err(SignatureError::WrongReference(uri.to_string()))
    }
}

/// Apply the reference's transforms to `target`: the enveloped signature
/// is removed, then the subtree is canonicalized.
fn transform(
    target: Node<'_, '_>,
    signature: Node<'_, '_>,
    reference: Node<'_, '_>,
) -> Result<String, SignatureError> {
    let mut canonicalizer = None;
    let mut enveloped = false;
    if let Some(transforms) = child(reference, DSIG_NS, "Transforms") {
        for transform in children(transforms, DSIG_NS, "Transform") {
            match algorithm_of(transform)? {
                ENVELOPED_SIGNATURE => enveloped = true,
                _ => canonicalizer = Some(canonicalizer_for(transform)?),
            }
        }
    }

    if !enveloped {
        return Err(SignatureError::Malformed(
            "reference lacks the enveloped-signature transform".to_string(),
        ));
    }
    let canonicalizer = canonicalizer.unwrap_or_default();
    canonicalizer
        .excluding(signature.id())
        .canonicalize(target)
}

/// Exclusive canonicalizer described by a `CanonicalizationMethod` or
/// `Transform` element, including its `InclusiveNamespaces` prefix list.
fn canonicalizer_for(method: Node<'_, '_>) -> Result<Canonicalizer, SignatureError> {
    let canonicalizer = Canonicalizer::for_algorithm(algorithm_of(method)?)?;
    let prefix_list = method
        .children()
        .find(|c| c.tag_name().name() == "InclusiveNamespaces")
        .filter(|c| {
            c.tag_name()
                .namespace()
                .is_some_and(|ns| ns.starts_with(EXC_C14N))
        })
        .and_then(|c| c.attribute("PrefixList"));
    Ok(match prefix_list {
        Some(list) => canonicalizer.with_inclusive_prefixes(list),
        None => canonicalizer,
    })
}

// ─────────────────────────────────────────────────────────────────────────────
// Crypto
// ─────────────────────────────────────────────────────────────────────────────

fn verify_with(
    key: &PKey<Public>,
    algorithm: SignatureAlgorithm,
    signed_info: &[u8],
    signature: &[u8],
) -> bool {
    let result = match algorithm {
        SignatureAlgorithm::Rsa(digest) => verify_raw(key, digest, signed_info, signature),
        SignatureAlgorithm::Ecdsa(digest) => ecdsa_der(signature)
            .and_then(|der| verify_raw(key, digest, signed_info, &der)),
    };
    result.unwrap_or_else(|e| {
        tracing::debug!(error = %e, "Key rejected signature");
        false
    })
}

fn verify_raw(
    key: &PKey<Public>,
    digest: DigestAlgorithm,
    data: &[u8],
    signature: &[u8],
) -> Result<bool, ErrorStack> {
    let mut verifier = Verifier::new(digest.message_digest(), key)?;
    verifier.update(data)?;
    verifier.verify(signature)
}

/// XML-DSig carries ECDSA signatures as raw `r || s`; OpenSSL wants DER.
fn ecdsa_der(raw: &[u8]) -> Result<Vec<u8>, ErrorStack> {
    let (r, s) = raw.split_at(raw.len() / 2);
    EcdsaSig::from_private_components(BigNum::from_slice(r)?, BigNum::from_slice(s)?)?.to_der()
}

// ─────────────────────────────────────────────────────────────────────────────
// Helpers
// ─────────────────────────────────────────────────────────────────────────────

fn check_unique_ids(document: &Document<'_>) -> Result<(), SignatureError> {
    let mut seen = std::collections::HashSet::new();
    for id in document.descendants().filter_map(|n| n.attribute("ID")) {
        if !seen.insert(id) {
            return Err(SignatureError::DuplicateId(id.to_string()));
        }
    }
    Ok(())
}

fn children<'a, 'i>(
    node: Node<'a, 'i>,
    ns: &'static str,
    name: &'static str,
) -> impl Iterator<Item = Node<'a, 'i>> {
    node.children()
        .filter(move |c| c.tag_name().namespace() == Some(ns) && c.tag_name().name() == name)
}

fn child<'a, 'i>(node: Node<'a, 'i>, ns: &'static str, name: &'static str) -> Option<Node<'a, 'i>> {
    children(node, ns, name).next()
}

fn required_child<'a, 'i>(
    node: Node<'a, 'i>,
    name: &'static str,
) -> Result<Node<'a, 'i>, SignatureError> {
    child(node, DSIG_NS, name).ok_or_else(|| SignatureError::Malformed(format!("missing {name}")))
}

fn algorithm_of<'a>(node: Node<'a, '_>) -> Result<&'a str, SignatureError> {
    node.attribute("Algorithm").ok_or_else(|| {
        SignatureError::Malformed(format!("{} without Algorithm", node.tag_name().name()))
    })
}

fn base64_text(node: Node<'_, '_>) -> Result<Vec<u8>, SignatureError> {
    let text: String = node
        .children()
        .filter(|c| c.is_text())
        .filter_map(|c| c.text())
        .collect();
    STANDARD
        .decode(strip_whitespace(&text))
        .map_err(|e| SignatureError::Malformed(format!("{}: {e}", node.tag_name().name())))
}

fn strip_whitespace(value: &str) -> String {
    value.split_ascii_whitespace().collect()
}
