//! Cached value for the `Date` response header.
//!
//! Formatting a date for every response is wasteful when thousands go out per second, so
//! each loop thread keeps the last formatted value and refreshes it once it is older than
//! [`UPDATE_INTERVAL`].

use std::cell::RefCell;
use std::time::{Duration, Instant};

use bytes::Bytes;
use http::HeaderValue;

const UPDATE_INTERVAL: Duration = Duration::from_millis(800);

struct CachedDate {
    value: HeaderValue,
    updated_at: Instant,
}

thread_local! {
    static CURRENT: RefCell<Option<CachedDate>> = const { RefCell::new(None) };
}

fn format_now() -> Option<HeaderValue> {
    let mut buf = faf_http_date::get_date_buff_no_key();
    faf_http_date::get_date_no_key(&mut buf);
    HeaderValue::from_maybe_shared(Bytes::from_owner(buf)).ok()
}

/// The current date formatted as an IMF-fixdate, at most [`UPDATE_INTERVAL`] old.
pub(crate) fn http_date() -> Option<HeaderValue> {
    CURRENT.with_borrow_mut(|current| {
        let now = Instant::now();
        match current {
            Some(cached) if now.duration_since(cached.updated_at) < UPDATE_INTERVAL => Some(cached.value.clone()),
            _ => {
                let value = format_now()?;
                *current = Some(CachedDate { value: value.clone(), updated_at: now });
                Some(value)
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn date_looks_like_imf_fixdate() {
        let date = http_date().unwrap();
        let date = date.to_str().unwrap();
        // Sun, 06 Nov 1994 08:49:37 GMT
        assert!(date.ends_with(" GMT"), "{date}");
        assert_eq!(date.get(3..5), Some(", "), "{date}");
    }

    #[test]
    fn value_is_reused_within_the_interval() {
        let first = http_date().unwrap();
        let second = http_date().unwrap();
        assert_eq!(first, second);
    }
}
