use base64::{Engine, engine::general_purpose::STANDARD};
use chrono::{DateTime, TimeZone, Utc};
use once_cell::sync::Lazy;
use openssl::{
    asn1::Asn1Time,
    bn::BigNum,
    hash::{MessageDigest, hash},
    pkey::{PKey, Private},
    rsa::Rsa,
    sign::Signer,
    x509::{X509Builder, X509NameBuilder},
};
use roxmltree::{Document, Node};

use crate::saml::signature::{
    DIGEST_SHA256, DSIG_NS, ENVELOPED_SIGNATURE, RSA_SHA256, XmlDsigVerifier,
    c14n::{Canonicalizer, EXC_C14N},
};

/// The IdP response used throughout the tests: subject `shiro-saml2`,
/// valid from 09:17:05 to 09:27:05 on 2004-12-05, no attribute statement.
/// Timestamps carry no zone designator, as some IdPs emit them.
pub(crate) const SAMPLE_SAML_RESPONSE: &str = r#"<samlp:Response xmlns:samlp="urn:oasis:names:tc:SAML:2.0:protocol" xmlns:saml="urn:oasis:names:tc:SAML:2.0:assertion" ID="identifier_2" InResponseTo="identifier_1" Version="2.0" IssueInstant="2004-12-05T09:22:05" Destination="https://sp.example.com/SAML2/SSO/POST"> <saml:Issuer>https://idp.example.org/SAML2</saml:Issuer><samlp:Status><samlp:StatusCode  Value="urn:oasis:names:tc:SAML:2.0:status:Success"/></samlp:Status><saml:Assertion xmlns:saml="urn:oasis:names:tc:SAML:2.0:assertion" ID="identifier_3" Version="2.0" IssueInstant="2004-12-05T09:22:05"><saml:Issuer>https://idp.example.org/SAML2</saml:Issuer><!-- a POSTed assertion MUST be signed --><!--ds:Signature xmlns:ds="http://www.w3.org/2000/09/xmldsig#"></ds:Signature--><saml:Subject><saml:NameID Format="urn:oasis:names:tc:SAML:2.0:nameid-format:transient">shiro-saml2</saml:NameID><saml:SubjectConfirmation Method="urn:oasis:names:tc:SAML:2.0:cm:bearer"><saml:SubjectConfirmationData InResponseTo="identifier_1" Recipient="https://sp.example.com/SAML2/SSO/POST" NotOnOrAfter="2004-12-05T09:27:05"/></saml:SubjectConfirmation></saml:Subject><saml:Conditions NotBefore="2004-12-05T09:17:05" NotOnOrAfter="2004-12-05T09:27:05"><saml:AudienceRestriction><saml:Audience>https://sp.example.com/SAML2</saml:Audience></saml:AudienceRestriction></saml:Conditions><saml:AuthnStatement AuthnInstant="2004-12-05T09:22:00" SessionIndex="identifier_3"><saml:AuthnContext><saml:AuthnContextClassRef>urn:oasis:names:tc:SAML:2.0:ac:classes:PasswordProtectedTransport</saml:AuthnContextClassRef></saml:AuthnContext></saml:AuthnStatement></saml:Assertion></samlp:Response>"#;

pub(crate) const IDP_ISSUER: &str = "https://idp.example.org/SAML2";
pub(crate) const SP_CONSUMER_URL: &str = "https://sp.example.com/SAML2/SSO/POST";

/// An instant inside the fixtures' validity window.
pub(crate) fn inside_window() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2004, 12, 5, 9, 22, 5).unwrap()
}

/// Wrap assertions in a successful response from [`IDP_ISSUER`].
pub(crate) fn response_xml(assertions: &[String]) -> String {
    response_xml_with_status("urn:oasis:names:tc:SAML:2.0:status:Success", assertions)
}

pub(crate) fn response_xml_with_status(status: &str, assertions: &[String]) -> String {
    format!(
        r#"<samlp:Response xmlns:samlp="urn:oasis:names:tc:SAML:2.0:protocol" xmlns:saml="urn:oasis:names:tc:SAML:2.0:assertion" xmlns:xs="http://www.w3.org/2001/XMLSchema" xmlns:xsi="http://www.w3.org/2001/XMLSchema-instance" ID="_resp" Version="2.0" IssueInstant="2004-12-05T09:22:05Z" Destination="{SP_CONSUMER_URL}">
  <saml:Issuer>{IDP_ISSUER}</saml:Issuer>
  <samlp:Status><samlp:StatusCode Value="{status}"/></samlp:Status>
  {}
</samlp:Response>"#,
        assertions.join("\n  ")
    )
}

/// An assertion valid from 09:17:05 to 09:27:05 on 2004-12-05.
pub(crate) fn assertion_xml(name_id: Option<&str>, attribute_statements: &[String]) -> String {
    assertion_xml_with_window(
        name_id,
        "2004-12-05T09:17:05Z",
        "2004-12-05T09:27:05Z",
        attribute_statements,
    )
}

pub(crate) fn assertion_xml_with_window(
    name_id: Option<&str>,
    not_before: &str,
    not_on_or_after: &str,
    attribute_statements: &[String],
) -> String {
    let subject = name_id
        .map(|id| {
            format!(
                r#"<saml:Subject><saml:NameID Format="urn:oasis:names:tc:SAML:2.0:nameid-format:persistent">{id}</saml:NameID></saml:Subject>"#
            )
        })
        .unwrap_or_default();
    format!(
        r#"<saml:Assertion ID="_assertion" Version="2.0" IssueInstant="2004-12-05T09:22:05Z">
    <saml:Issuer>{IDP_ISSUER}</saml:Issuer>
    {subject}
    <saml:Conditions NotBefore="{not_before}" NotOnOrAfter="{not_on_or_after}"/>
    <saml:AuthnStatement AuthnInstant="2004-12-05T09:22:00Z" SessionIndex="_session"/>
    {}
  </saml:Assertion>"#,
        attribute_statements.join("\n    ")
    )
}

pub(crate) fn attribute_statement_xml(attributes: &[String]) -> String {
    format!(
        "<saml:AttributeStatement>{}</saml:AttributeStatement>",
        attributes.join("")
    )
}

/// An attribute whose values are all `xs:string`.
pub(crate) fn string_attribute_xml(name: &str, values: &[&str]) -> String {
    let values: String = values
        .iter()
        .map(|v| format!(r#"<saml:AttributeValue xsi:type="xs:string">{v}</saml:AttributeValue>"#))
        .collect();
    format!(r#"<saml:Attribute Name="{name}">{values}</saml:Attribute>"#)
}

const DIGEST_PLACEHOLDER: &str = "__DIGEST_VALUE__";
const SIGNATURE_PLACEHOLDER: &str = "__SIGNATURE_VALUE__";

static TEST_IDP: Lazy<TestIdp> = Lazy::new(TestIdp::generate);

/// The IdP whose certificate test configurations trust.
pub(crate) fn test_idp() -> &'static TestIdp {
    &TEST_IDP
}

/// A signing IdP with a fresh self-signed RSA certificate.
pub(crate) struct TestIdp {
    pub(crate) certificate_pem: String,
    key: PKey<Private>,
}

impl TestIdp {
    pub(crate) fn generate() -> Self {
        let key = PKey::from_rsa(Rsa::generate(2048).unwrap()).unwrap();

        let mut name = X509NameBuilder::new().unwrap();
        name.append_entry_by_text("CN", "idp.example.org").unwrap();
        let name = name.build();

        let mut builder = X509Builder::new().unwrap();
        builder.set_version(2).unwrap();
        let serial_number = BigNum::from_u32(1).unwrap();
        builder
            .set_serial_number(&serial_number.to_asn1_integer().unwrap())
            .unwrap();
        builder.set_subject_name(&name).unwrap();
        builder.set_issuer_name(&name).unwrap();
        builder.set_pubkey(&key).unwrap();
        builder
            .set_not_before(&Asn1Time::days_from_now(0).unwrap())
            .unwrap();
        builder
            .set_not_after(&Asn1Time::days_from_now(365).unwrap())
            .unwrap();
        builder.sign(&key, MessageDigest::sha256()).unwrap();

        let certificate_pem = String::from_utf8(builder.build().to_pem().unwrap()).unwrap();
        Self {
            certificate_pem,
            key,
        }
    }

    pub(crate) fn verifier(&self) -> XmlDsigVerifier {
        XmlDsigVerifier::from_certificate(&self.certificate_pem).unwrap()
    }

    /// Sign the element with `ID="{id}"` in a complete response document.
    /// The enveloped rsa-sha256 signature goes right after that element's
    /// `saml:Issuer`.
    pub(crate) fn sign(&self, xml: &str, id: &str) -> String {
        let start = xml
            .find(&format!(r#"ID="{id}""#))
            .expect("element to sign");
        let issuer_end = "</saml:Issuer>";
        let insert_at = start
            + xml[start..]
                .find(issuer_end)
                .expect("issuer of the signed element")
            + issuer_end.len();
        let xml = format!(
            "{}{}{}",
            &xml[..insert_at],
            signature_template(id),
            &xml[insert_at..]
        );

        let digest = {
            let document = Document::parse(&xml).unwrap();
            let (target, signature) = signed_element(&document, id);
            let canonical = Canonicalizer::default()
                .excluding(signature.id())
                .canonicalize(target)
                .unwrap();
            STANDARD.encode(hash(MessageDigest::sha256(), canonical.as_bytes()).unwrap())
        };
        let xml = splice(&xml, insert_at, DIGEST_PLACEHOLDER, &digest);

        let signature_value = {
            let document = Document::parse(&xml).unwrap();
            let (_, signature) = signed_element(&document, id);
            let signed_info = signature.first_element_child().unwrap();
            let canonical = Canonicalizer::default().canonicalize(signed_info).unwrap();
            let mut signer = Signer::new(MessageDigest::sha256(), &self.key).unwrap();
            signer.update(canonical.as_bytes()).unwrap();
            STANDARD.encode(signer.sign_to_vec().unwrap())
        };
        splice(&xml, insert_at, SIGNATURE_PLACEHOLDER, &signature_value)
    }
}

fn signature_template(id: &str) -> String {
    format!(
        r##"<ds:Signature xmlns:ds="{DSIG_NS}"><ds:SignedInfo><ds:CanonicalizationMethod Algorithm="{EXC_C14N}"/><ds:SignatureMethod Algorithm="{RSA_SHA256}"/><ds:Reference URI="#{id}"><ds:Transforms><ds:Transform Algorithm="{ENVELOPED_SIGNATURE}"/><ds:Transform Algorithm="{EXC_C14N}"/></ds:Transforms><ds:DigestMethod Algorithm="{DIGEST_SHA256}"/><ds:DigestValue>{DIGEST_PLACEHOLDER}</ds:DigestValue></ds:Reference></ds:SignedInfo><ds:SignatureValue>{SIGNATURE_PLACEHOLDER}</ds:SignatureValue></ds:Signature>"##
    )
}

fn signed_element<'a, 'i>(document: &'a Document<'i>, id: &str) -> (Node<'a, 'i>, Node<'a, 'i>) {
    let target = document
        .descendants()
        .find(|n| n.attribute("ID") == Some(id))
        .unwrap();
    let signature = target
        .children()
        .find(|c| c.tag_name().namespace() == Some(DSIG_NS) && c.tag_name().name() == "Signature")
        .unwrap();
    (target, signature)
}

/// Replace the first `placeholder` at or after `from`.
fn splice(xml: &str, from: usize, placeholder: &str, value: &str) -> String {
    let at = from + xml[from..].find(placeholder).unwrap();
    format!("{}{}{}", &xml[..at], value, &xml[at + placeholder.len()..])
}
