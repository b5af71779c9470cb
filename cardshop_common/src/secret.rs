use std::{
    fmt,
    fmt::{Debug, Display},
};

/// A wrapper that keeps card payloads and other sensitive values out of logs. Both `Debug` and
/// `Display` print `****` regardless of the inner type; the value is only accessible through an
/// explicit [`Secret::reveal`] or [`Secret::into_inner`] call.
pub struct Secret<T> {
    value: T,
}

impl<T> Secret<T> {
    pub fn new(value: T) -> Self {
        Self { value }
    }

    pub fn reveal(&self) -> &T {
        &self.value
    }

    pub fn into_inner(self) -> T {
        self.value
    }
}

impl<T: Clone> Clone for Secret<T> {
    fn clone(&self) -> Self {
        Self { value: self.value.clone() }
    }
}

impl<T> Debug for Secret<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("****")
    }
}

impl<T> Display for Secret<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("****")
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn secrets_are_redacted() {
        let payload = Secret::new("CARD-1234-SECRET".to_string());
        assert_eq!(format!("{payload}"), "****");
        assert_eq!(format!("{payload:?}"), "****");
        assert_eq!(payload.reveal(), "CARD-1234-SECRET");
        assert_eq!(payload.into_inner(), "CARD-1234-SECRET");
    }
}
