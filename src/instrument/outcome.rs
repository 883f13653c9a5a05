//! How instrumented return values describe themselves
//!
//! The wrapper never inspects return values directly. It asks the value, via
//! [`CallOutcome`], whether the call failed, what provider response it
//! carries (for token extraction) and what text to log as output.

use serde_json::Value;
use std::borrow::Cow;
use std::fmt;

/// Error type and message of a failed call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallFailure {
    pub error_type: String,
    pub message: String,
}

impl CallFailure {
    pub fn new(error_type: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            error_type: error_type.into(),
            message: message.into(),
        }
    }

    /// Failure of the given error value, typed by its Rust type name
    pub fn of<E: fmt::Display + ?Sized>(error: &E) -> Self {
        Self::new(short_type_name::<E>(), error.to_string())
    }
}

/// Last path segment of a type name, without generic arguments
fn short_type_name<T: ?Sized>() -> &'static str {
    let full = std::any::type_name::<T>();
    let base = full.split('<').next().unwrap_or(full);
    base.rsplit("::").next().unwrap_or(base)
}

/// Return values the wrapper knows how to observe
///
/// All methods have inert defaults, so opting a custom response type in is a
/// one-line `impl CallOutcome for MyResponse {}` plus whichever views it can
/// offer.
pub trait CallOutcome {
    /// `Some` when the call should be counted as failed
    fn failure(&self) -> Option<CallFailure> {
        None
    }

    /// Shallow JSON view searched for token usage
    fn response(&self) -> Option<Cow<'_, Value>> {
        None
    }

    /// Text recorded as the call's output when I/O logging is on
    fn output_text(&self) -> Option<String> {
        None
    }
}

impl<T: CallOutcome, E: fmt::Display> CallOutcome for Result<T, E> {
    fn failure(&self) -> Option<CallFailure> {
        match self {
            Ok(value) => value.failure(),
            Err(error) => Some(CallFailure::of(error)),
        }
    }

    fn response(&self) -> Option<Cow<'_, Value>> {
        self.as_ref().ok().and_then(CallOutcome::response)
    }

    fn output_text(&self) -> Option<String> {
        self.as_ref().ok().and_then(CallOutcome::output_text)
    }
}

impl<T: CallOutcome> CallOutcome for Option<T> {
    fn failure(&self) -> Option<CallFailure> {
        self.as_ref().and_then(CallOutcome::failure)
    }

    fn response(&self) -> Option<Cow<'_, Value>> {
        self.as_ref().and_then(CallOutcome::response)
    }

    fn output_text(&self) -> Option<String> {
        self.as_ref().and_then(CallOutcome::output_text)
    }
}

impl<T: CallOutcome + ?Sized> CallOutcome for Box<T> {
    fn failure(&self) -> Option<CallFailure> {
        (**self).failure()
    }

    fn response(&self) -> Option<Cow<'_, Value>> {
        (**self).response()
    }

    fn output_text(&self) -> Option<String> {
        (**self).output_text()
    }
}

impl CallOutcome for Value {
    fn response(&self) -> Option<Cow<'_, Value>> {
        Some(Cow::Borrowed(self))
    }

    /// Prefers a top-level `text` field, the way chat responses expose output
    fn output_text(&self) -> Option<String> {
        match self.get("text").and_then(Value::as_str) {
            Some(text) => Some(text.to_string()),
            None => Some(self.to_string()),
        }
    }
}

impl CallOutcome for String {
    fn output_text(&self) -> Option<String> {
        Some(self.clone())
    }
}

impl CallOutcome for &str {
    fn output_text(&self) -> Option<String> {
        Some((*self).to_string())
    }
}

impl CallOutcome for () {}

macro_rules! display_outcome {
    ($($ty:ty),*) => {
        $(
            impl CallOutcome for $ty {
                fn output_text(&self) -> Option<String> {
                    Some(self.to_string())
                }
            }
        )*
    };
}

display_outcome!(bool, char, i8, i16, i32, i64, i128, isize, u8, u16, u32, u64, u128, usize, f32, f64);

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[derive(Debug, thiserror::Error)]
    #[error("quota exceeded")]
    struct QuotaError;

    #[test]
    fn test_result_failure_uses_error_type_name() {
        let outcome: Result<String, QuotaError> = Err(QuotaError);
        let failure = outcome.failure().unwrap();
        assert_eq!(failure.error_type, "QuotaError");
        assert_eq!(failure.message, "quota exceeded");
        assert!(outcome.output_text().is_none());

        let outcome: Result<String, QuotaError> = Ok("fine".to_string());
        assert!(outcome.failure().is_none());
        assert_eq!(outcome.output_text().as_deref(), Some("fine"));
    }

    #[test]
    fn test_json_response_is_searched() {
        let response = json!({"text": "hello", "usage": {"prompt_tokens": 1}});
        assert_eq!(response.response().unwrap().as_ref(), &response);
        assert_eq!(response.output_text().as_deref(), Some("hello"));

        let plain = json!([1, 2]);
        assert_eq!(plain.output_text().as_deref(), Some("[1,2]"));
    }

    #[test]
    fn test_nested_result_reports_inner_failure() {
        let outcome: Result<Result<u32, String>, String> = Ok(Err("inner".to_string()));
        assert_eq!(outcome.failure().unwrap().error_type, "String");
    }

    #[test]
    fn test_primitive_outcomes() {
        assert_eq!(42u32.output_text().as_deref(), Some("42"));
        assert!(().output_text().is_none());
        assert!(true.failure().is_none());
        assert!(Some(json!({})).response().is_some());
    }
}
