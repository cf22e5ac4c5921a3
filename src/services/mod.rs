pub mod credentials;
pub mod extraction_client;
pub mod normalizer;

pub use credentials::{ApiKeyCredential, CredentialProvider, ManagedIdentityCredential};
pub use extraction_client::{ExtractionClient, InvoiceAnalyzer, UnconfiguredAnalyzer};
pub use normalizer::normalize;
