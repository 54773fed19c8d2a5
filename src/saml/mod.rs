//! SAML 2.0 response processing.
//!
//! Decoding, validation and claims extraction for responses delivered over
//! the HTTP-POST binding. Each stage is synchronous and request-scoped; the
//! only shared state is the decoder's one-time unmarshaller registry.

pub mod decoder;
pub mod error;
pub mod extractor;
pub mod schema;
pub mod signature;
pub mod validator;

pub use decoder::{bootstrap, decode, decode_xml, encode};
pub use error::{DecodeError, ExtractionError, ValidationError};
pub use extractor::{AttributeMap, Claims, extract};
pub use schema::{Assertion, Attribute, AttributeValue, SamlResponse};
pub use signature::{SignatureError, XmlDsigVerifier};
pub use validator::{ResponseValidator, SignatureVerifier, TrustedTransport, ValidationOutcome};
