pub mod adapter;
pub mod parser;
pub mod types;
pub mod xml;

pub use adapter::{DavAdapter, Precondition, PutOutcome, quote_etag};
pub use parser::parse_multistatus;
pub use types::{Depth, Multistatus, PropValue, Propstat, QName, ResponseEntry};
pub use xml::{escape_xml, ns, parse_status_line};
