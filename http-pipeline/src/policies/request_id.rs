//! Client request id stamping.

use http::header::{HeaderName, HeaderValue};

use crate::message::keys;
use crate::policy::SyncPolicy;
use crate::{Message, PipelineError};

/// Stamps every operation with a client request id.
///
/// The id is generated once per operation (this policy runs per call, before
/// the retry stage) and left alone if the caller already set the header. The
/// id is also recorded under [`keys::CLIENT_REQUEST_ID`]; a caller value
/// that is not valid UTF-8 is recorded lossily.
#[derive(Clone, Debug)]
pub struct RequestIdPolicy {
    header: HeaderName,
}

impl RequestIdPolicy {
    pub fn new(header: HeaderName) -> Self {
        Self { header }
    }

    pub fn header(&self) -> &HeaderName {
        &self.header
    }
}

/// 32 lowercase hex digits from a random 128-bit value.
fn generate_id() -> String {
    format!("{:032x}", rand::random::<u128>())
}

impl SyncPolicy for RequestIdPolicy {
    fn on_sending_request(&self, message: &mut Message) -> Result<(), PipelineError> {
        // Any caller value wins, even one that is not visible ASCII
        let existing = message
            .request()
            .headers()
            .get(&self.header)
            .map(|value| String::from_utf8_lossy(value.as_bytes()).into_owned());

        let id = match existing {
            Some(id) => id,
            None => {
                let id = generate_id();
                let value = HeaderValue::from_str(&id)
                    .map_err(|e| PipelineError::policy(format!("invalid request id: {e}")))?;
                message
                    .request_mut()
                    .headers_mut()
                    .insert(self.header.clone(), value);
                id
            }
        };
        message.properties_mut().insert(keys::CLIENT_REQUEST_ID, id);
        Ok(())
    }
}
