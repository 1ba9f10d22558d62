pub mod compression;
pub mod error;
pub mod http;
pub mod quirks;
pub mod transport;

pub use compression::{ContentEncoding, add_accept_encoding, detect_encoding};
pub use error::{DavError, DavResult};
pub use http::{HyperClient, HyperTransport, build_hyper_client};
pub use quirks::{AuthScheme, QuirkProfile};
pub use transport::{
    Credentials, HttpRequest, HttpResponse, HttpTransport, MAX_RESPONSE_BYTES, TransportConfig,
    TransportError,
};
