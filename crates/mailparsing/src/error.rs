use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum MailParsingError {
    #[error("invalid header: {0}")]
    HeaderParse(String),
    #[error("message is malformed: {0}")]
    MalformedMessage(String),
    #[error("while parsing header '{header_name}': {error}")]
    InvalidHeaderValue {
        header_name: String,
        error: Box<MailParsingError>,
    },
    #[error("header {0} not found in message")]
    MissingHeader(String),
    #[error("no single From address could be extracted: {0}")]
    FromExtraction(String),
}
