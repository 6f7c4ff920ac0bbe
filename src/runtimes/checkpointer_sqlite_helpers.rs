/*!
Helper utilities for the SQLite checkpointer.
*/

use crate::runtimes::checkpointer::CheckpointerError;
use crate::utils::json_ext::{deserialize_with_context, serialize_with_context};

pub(super) fn serialize_json<T: serde::Serialize>(
    value: &T,
    context: &'static str,
) -> Result<String, CheckpointerError> {
    serialize_with_context(value, context, |e, ctx| CheckpointerError::Other {
        message: format!("{ctx} serialize: {e}"),
    })
}

pub(super) fn deserialize_json<T: serde::de::DeserializeOwned>(
    json: &str,
    context: &'static str,
) -> Result<T, CheckpointerError> {
    deserialize_with_context(json, context, |e, ctx| CheckpointerError::Other {
        message: format!("{ctx} parse: {e}"),
    })
}

/// Maps a sqlx failure to a backend error tagged with the operation.
pub(super) fn backend(op: &'static str) -> impl FnOnce(sqlx::Error) -> CheckpointerError {
    move |e| CheckpointerError::Backend {
        message: format!("{op}: {e}"),
    }
}
