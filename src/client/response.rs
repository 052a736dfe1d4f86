use super::ResponseWithTransaction;
use crate::{ASCOMError, ASCOMErrorCode, ASCOMResult};
use bytes::Bytes;
use mime::Mime;
use serde::Deserialize;
use serde::de::DeserializeOwned;

#[derive(Debug, Deserialize)]
struct ValueResponse<T> {
    #[serde(rename = "Value")]
    value: T,
}

fn check_json(mime_type: &Mime) -> Result<(), String> {
    if mime_type.essence_str() != mime::APPLICATION_JSON.as_ref() {
        return Err(format!("Expected JSON response, got {mime_type}"));
    }
    match mime_type.get_param(mime::CHARSET) {
        Some(mime::UTF_8) | None => Ok(()),
        Some(charset) => Err(format!("Unsupported charset {charset}")),
    }
}

/// Parses an Alpaca JSON body into either the `Value` or the reported ASCOM error.
///
/// Errors are reported as plain strings and wrapped by the caller, which knows the request URL.
pub(crate) fn parse_response<T: 'static + DeserializeOwned>(
    mime_type: &Mime,
    bytes: &Bytes,
) -> Result<ResponseWithTransaction<ASCOMResult<T>>, String> {
    check_json(mime_type)?;

    let transaction = serde_json::from_slice(bytes).map_err(|err| err.to_string())?;
    let ascom_error =
        serde_json::from_slice::<ASCOMError>(bytes).map_err(|err| err.to_string())?;

    if ascom_error.code != ASCOMErrorCode::OK {
        return Ok(ResponseWithTransaction {
            transaction,
            response: Err(ascom_error),
        });
    }

    let value = if std::any::TypeId::of::<T>() == std::any::TypeId::of::<()>() {
        // serde expects `null` for unit type, but we want to support & ignore arbitrary input
        serde_json::from_slice::<T>(b"null")
    } else {
        serde_json::from_slice::<ValueResponse<T>>(bytes).map(|response| response.value)
    }
    .map_err(|err| err.to_string())?;

    Ok(ResponseWithTransaction {
        transaction,
        response: Ok(value),
    })
}
