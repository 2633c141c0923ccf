mod authres;
mod error;
mod header;
mod headermap;
mod message;
mod nom_utils;
mod normalize;
mod rfc5322;
mod strings;

pub use authres::{AuthenticationResult, AuthenticationResults, ParseMode};
pub use error::MailParsingError;
pub use header::{Header, HeaderConformance, HeaderParseResult};
pub use headermap::HeaderMap;
pub use message::Message;
pub use normalize::{has_lone_cr_or_lf, normalize_crlf};
pub use rfc5322::{AddrSpec, Mailbox, MailboxList};
pub use strings::SharedString;

pub type Result<T> = std::result::Result<T, MailParsingError>;
